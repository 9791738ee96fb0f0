//! shaderwave CLI: render a demo graph offline or play it live.
//!
//! Usage:
//!   sw-cli [--config render.toml] [--tone HZ] [--frames N]
//!   sw-cli [--config render.toml] [--tone HZ] --play SECONDS
//!
//! The demo graph is `generator -> gain -> final`, rendered on the
//! software backend. Set `RUST_LOG=debug` to trace graph setup.

use std::error::Error;
use std::io::Write;
use std::time::{Duration, Instant};
use std::{env, process};

use sw_engine::stages::{final_stage, gain, gain_effect, generator};
use sw_engine::{RenderGraph, StageConfig};
use sw_gpu::{builtin_shaders, SoftwareBackend};
use sw_ir::StageId;
use sw_master::{Controller, RenderConfig, Renderer};
use tracing_subscriber::EnvFilter;

#[cfg(all(feature = "alloc_check", debug_assertions))]
#[global_allocator]
static A: assert_no_alloc::AllocDisabler = assert_no_alloc::AllocDisabler;

const USAGE: &str =
    "Usage: sw-cli [--config FILE] [--tone HZ] [--frames N | --play SECONDS]";

struct Args {
    config: Option<String>,
    frames: usize,
    play: Option<f64>,
    tone: f32,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args().unwrap_or_else(|e| {
        eprintln!("{}\n{}", e, USAGE);
        process::exit(2);
    });

    if let Err(e) = run(args) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args {
        config: None,
        frames: 16,
        play: None,
        tone: 440.0,
    };
    let mut it = env::args().skip(1);
    while let Some(flag) = it.next() {
        let mut value = || it.next().ok_or_else(|| format!("{} needs a value", flag));
        match flag.as_str() {
            "--config" => args.config = Some(value()?),
            "--frames" => args.frames = value()?.parse().map_err(|e| format!("--frames: {}", e))?,
            "--play" => args.play = Some(value()?.parse().map_err(|e| format!("--play: {}", e))?),
            "--tone" => args.tone = value()?.parse().map_err(|e| format!("--tone: {}", e))?,
            "-h" | "--help" => {
                println!("{}", USAGE);
                process::exit(0);
            }
            other => return Err(format!("unknown argument `{}`", other)),
        }
    }
    Ok(args)
}

fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let config = match &args.config {
        Some(path) => RenderConfig::load(path)?,
        None => RenderConfig::default(),
    };
    let (graph, osc) = demo_graph(config.stage_config(), args.tone)?;

    println!("Stages:   {}", graph.len());
    for id in graph.render_order() {
        if let Some(stage) = graph.find_stage(*id) {
            println!("  {} {}", id, stage.name());
        }
    }
    println!(
        "Buffer:   {} frames x {} channels @ {} Hz",
        config.frames_per_buffer, config.channels, config.sample_rate
    );
    println!();

    match args.play {
        Some(seconds) => play(config, graph, osc, args.tone, seconds),
        None => render_offline(graph, args.frames),
    }
}

/// `generator -> gain -> final`, with the generator playing `tone`.
fn demo_graph(config: StageConfig, tone: f32) -> Result<(RenderGraph, StageId), Box<dyn Error>> {
    let lib = builtin_shaders();
    let mut osc = generator(config, &lib)?;
    osc.play_note(tone, 0.5)?;
    let mut amp = gain_effect(config, &lib)?;
    amp.find_parameter_mut(gain::GAIN)
        .ok_or("gain stage has no gain parameter")?
        .set_value(0.8f32)?;
    let mut fin = final_stage(config, &lib)?;

    osc.connect_render_stage(&mut amp)?;
    amp.connect_render_stage(&mut fin)?;
    let (osc_id, terminal) = (osc.gid(), fin.gid());
    let graph = RenderGraph::new(vec![osc, amp, fin], terminal)?;
    Ok((graph, osc_id))
}

fn render_offline(graph: RenderGraph, frames: usize) -> Result<(), Box<dyn Error>> {
    let started = Instant::now();
    let mut renderer = Renderer::new(SoftwareBackend::new(), graph)?;
    let rendered = renderer.render_frames(frames)?;
    let elapsed = started.elapsed();

    for (i, frame) in rendered.iter().enumerate() {
        let levels: Vec<String> = (0..frame.channels())
            .map(|ch| {
                let samples = frame.channel(ch);
                let peak = samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));
                let rms = (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt();
                format!("ch{} peak {:.3} rms {:.3}", ch, peak, rms)
            })
            .collect();
        println!("frame {:4}: {}", i, levels.join(" | "));
    }
    println!();
    println!("Rendered {} frames in {:.2?}", rendered.len(), elapsed);
    Ok(())
}

fn play(
    config: RenderConfig,
    graph: RenderGraph,
    osc: StageId,
    tone: f32,
    seconds: f64,
) -> Result<(), Box<dyn Error>> {
    let mut ctrl = Controller::new(config);
    ctrl.play(graph, SoftwareBackend::new);
    println!("Playing {} Hz for {:.1}s (octave up halfway)...", tone, seconds);

    let started = Instant::now();
    let length = Duration::from_secs_f64(seconds);
    let mut shifted = false;
    while ctrl.is_playing() && started.elapsed() < length {
        if !shifted && started.elapsed() >= length / 2 {
            shifted = ctrl.edit(move |editor| {
                editor
                    .find_stage_mut(osc)
                    .ok_or(sw_engine::Error::StageNotFound(osc))?
                    .play_note(tone * 2.0, 0.5)
            });
        }
        print!("\rFrames: {}", ctrl.frames_rendered());
        let _ = std::io::stdout().flush();
        std::thread::sleep(Duration::from_millis(10));
    }
    let finished_early = !ctrl.is_playing();
    let frames = ctrl.frames_rendered();
    ctrl.stop();

    println!("\rFrames: {}. Done.", frames);
    if finished_early {
        return Err("playback ended early (see log)".into());
    }
    Ok(())
}
