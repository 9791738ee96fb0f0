//! End-to-end render graph tests.
//!
//! Graphs are built from the built-in stages, driven through
//! `sw_master::Renderer` on the software backend, and checked on the
//! frames that reach a capture output.

use proptest::prelude::*;
use sw_audio::{CaptureHandle, CaptureOutput};
use sw_engine::stages::{constant, final_stage, gain, gain_effect, multitrack_join};
use sw_engine::{Error, LinkError, RenderGraph, RenderStage, StageConfig, StructureError};
use sw_gpu::{builtin_shaders, SoftwareBackend};
use sw_ir::StageId;
use sw_master::Renderer;

fn config() -> StageConfig {
    StageConfig {
        frames_per_buffer: 16,
        sample_rate: 16,
        channels: 2,
    }
}

fn source(value: f32) -> RenderStage {
    constant(config(), &builtin_shaders(), value).unwrap()
}

fn scale(factor: f32) -> RenderStage {
    let mut stage = gain_effect(config(), &builtin_shaders()).unwrap();
    stage
        .find_parameter_mut(gain::GAIN)
        .unwrap()
        .set_value(factor)
        .unwrap();
    stage
}

struct Mix {
    renderer: Renderer<SoftwareBackend>,
    capture: CaptureHandle,
    join: StageId,
    terminal: StageId,
}

/// constant(0.25) + constant(0.75) -> join -> final, feeding a capture.
fn mix() -> Mix {
    let lib = builtin_shaders();
    let mut g1 = source(0.25);
    let mut g2 = source(0.75);
    let mut join = multitrack_join(config(), &lib, 2).unwrap();
    let mut fin = final_stage(config(), &lib).unwrap();
    g1.connect_render_stage(&mut join).unwrap();
    g2.connect_render_stage(&mut join).unwrap();
    join.connect_render_stage(&mut fin).unwrap();
    let (join_id, terminal) = (join.gid(), fin.gid());
    let graph = RenderGraph::new(vec![g1, g2, join, fin], terminal).unwrap();

    let mut renderer = Renderer::new(SoftwareBackend::new(), graph).unwrap();
    let out = CaptureOutput::new(16, 2);
    let capture = out.handle();
    renderer.add_output(Box::new(out));
    Mix {
        renderer,
        capture,
        join: join_id,
        terminal,
    }
}

fn last_frame(mix: &mut Mix) -> Vec<f32> {
    assert!(mix.renderer.render_frame().unwrap());
    mix.capture.frames().last().unwrap().as_slice().to_vec()
}

fn all_equal(samples: &[f32], expected: f32) -> bool {
    samples.iter().all(|&s| s == expected)
}

fn position(graph: &RenderGraph, id: StageId) -> usize {
    graph.render_order().iter().position(|&s| s == id).unwrap()
}

#[test]
fn joined_generators_sum_every_frame() {
    let mut mix = mix();
    for _ in 0..4 {
        assert!(all_equal(&last_frame(&mut mix), 1.0));
    }
}

#[test]
fn insert_between_takes_effect_next_frame() {
    let mut mix = mix();
    assert!(all_equal(&last_frame(&mut mix), 1.0));

    let doubler = scale(2.0);
    let id = doubler.gid();
    let (join, terminal) = (mix.join, mix.terminal);
    mix.renderer
        .editor()
        .insert_render_stage_between(join, terminal, doubler)
        .unwrap();

    // No stale 1.0 at the transition frame.
    assert!(all_equal(&last_frame(&mut mix), 2.0));
    assert!(all_equal(&last_frame(&mut mix), 2.0));

    let graph = mix.renderer.graph();
    assert_eq!(graph.len(), 5);
    assert!(position(graph, join) < position(graph, id));
    assert!(position(graph, id) < position(graph, terminal));
}

#[test]
fn replace_keeps_position_and_switches_function() {
    let mut mix = mix();
    let doubler = scale(2.0);
    let old = doubler.gid();
    let (join, terminal) = (mix.join, mix.terminal);
    mix.renderer
        .editor()
        .insert_render_stage_between(join, terminal, doubler)
        .unwrap();
    assert!(all_equal(&last_frame(&mut mix), 2.0));

    let order_len = mix.renderer.graph().render_order().len();
    let slot = position(mix.renderer.graph(), old);

    let halver = scale(0.5);
    let new = halver.gid();
    let removed = mix.renderer.editor().replace_render_stage(old, halver).unwrap();
    assert_eq!(removed.gid(), old);
    assert!(!removed.is_initialized());

    let graph = mix.renderer.graph();
    assert_eq!(graph.render_order().len(), order_len);
    assert_eq!(position(graph, new), slot);
    assert!(!graph.contains(old));
    assert!(all_equal(&last_frame(&mut mix), 0.5));
}

#[test]
fn remove_bridges_to_surviving_chain() {
    let mut mix = mix();
    let (join, terminal) = (mix.join, mix.terminal);
    let triple = scale(3.0);
    let halve = scale(0.5);
    let (t, h) = (triple.gid(), halve.gid());
    {
        let mut editor = mix.renderer.editor();
        editor.insert_render_stage_between(join, terminal, triple).unwrap();
        editor.insert_render_stage_between(t, terminal, halve).unwrap();
    }
    assert!(all_equal(&last_frame(&mut mix), 1.5));

    let before = mix.renderer.graph().render_order().len();
    mix.renderer.editor().remove_render_stage(t).unwrap();
    assert_eq!(mix.renderer.graph().render_order().len(), before - 1);
    assert!(mix.renderer.graph().find_stage(h).unwrap().producers().contains(&join));
    assert!(all_equal(&last_frame(&mut mix), 0.5));
}

#[test]
fn connect_refuses_taken_interfaces() {
    let mut a = source(1.0);
    let mut b = source(2.0);
    let mut amp = scale(1.0);
    let mut other = scale(1.0);

    a.connect_render_stage(&mut amp).unwrap();
    // amp's stream is taken.
    assert!(matches!(
        b.connect_render_stage(&mut amp),
        Err(Error::Link(LinkError::AlreadyLinked(_)))
    ));
    // a's output is taken.
    assert!(matches!(
        a.connect_render_stage(&mut other),
        Err(Error::Link(LinkError::AlreadyLinked(_)))
    ));
    assert_eq!(a.consumers().len(), 1);
    assert!(amp.producers().contains(&a.gid()));
}

#[test]
fn connect_refuses_mismatched_sizes() {
    let lib = builtin_shaders();
    let wide = StageConfig {
        frames_per_buffer: 32,
        ..config()
    };
    let mut a = source(1.0);
    let mut fin = final_stage(wide, &lib).unwrap();
    assert!(matches!(
        a.connect_render_stage(&mut fin),
        Err(Error::Link(LinkError::SizeMismatch { .. }))
    ));
    assert!(a.consumers().is_empty());
}

#[test]
fn construction_rejects_unwired_stage() {
    let lib = builtin_shaders();
    let mut a = source(1.0);
    let stray = source(2.0);
    let mut fin = final_stage(config(), &lib).unwrap();
    a.connect_render_stage(&mut fin).unwrap();
    let (stray_id, terminal) = (stray.gid(), fin.gid());
    let err = RenderGraph::new(vec![a, stray, fin], terminal).unwrap_err();
    assert!(matches!(
        err,
        Error::Structure(StructureError::Unreachable(id)) if id == stray_id
    ));
}

/// One track: a constant source followed by a chain of gains.
#[derive(Clone, Debug)]
struct Track {
    value: f32,
    gains: Vec<f32>,
}

fn track() -> impl Strategy<Value = Track> {
    (
        1u8..8,
        prop::collection::vec(prop::sample::select(vec![0.5f32, 1.0, 2.0]), 0..3),
    )
        .prop_map(|(n, gains)| Track {
            value: n as f32 * 0.125,
            gains,
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn random_mixes_order_producers_first(tracks in prop::collection::vec(track(), 1..6)) {
        let lib = builtin_shaders();
        let mut join = multitrack_join(config(), &lib, tracks.len()).unwrap();
        let mut fin = final_stage(config(), &lib).unwrap();
        let mut stages = Vec::new();
        let mut expected = 0.0f32;

        for t in &tracks {
            let mut tail = source(t.value);
            let mut level = t.value;
            for &g in &t.gains {
                let mut next = scale(g);
                tail.connect_render_stage(&mut next).unwrap();
                stages.push(std::mem::replace(&mut tail, next));
                level *= g;
            }
            tail.connect_render_stage(&mut join).unwrap();
            stages.push(tail);
            expected += level;
        }
        join.connect_render_stage(&mut fin).unwrap();
        let terminal = fin.gid();
        stages.push(join);
        stages.push(fin);
        let count = stages.len();

        let graph = RenderGraph::new(stages, terminal).unwrap();
        prop_assert_eq!(graph.render_order().len(), count);
        for &id in graph.render_order() {
            let stage = graph.find_stage(id).unwrap();
            for &producer in stage.producers() {
                prop_assert!(position(&graph, producer) < position(&graph, id));
            }
        }

        let mut renderer = Renderer::new(SoftwareBackend::new(), graph).unwrap();
        let frame = renderer.render_frames(1).unwrap().remove(0);
        prop_assert!(frame.as_slice().iter().all(|&s| s == expected));
    }
}
