//! Realtime playback on a dedicated render thread.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use sw_audio::{AudioError, AudioOutput, CpalOutput, HandoffMode};
use sw_engine::RenderGraph;
use sw_gpu::GpuBackend;

use crate::config::RenderConfig;
use crate::renderer::{GraphEditor, Renderer};

/// A graph edit applied on the render thread between two frames.
pub type GraphEdit = Box<dyn FnOnce(&mut GraphEditor<'_>) -> sw_engine::Result<()> + Send>;

/// Runs a [`Renderer`] on its own thread and forwards edits to it.
pub struct Controller {
    config: RenderConfig,
    playback: Option<PlaybackHandle>,
}

struct PlaybackHandle {
    stop_signal: Arc<AtomicBool>,
    frames_rendered: Arc<AtomicU64>,
    finished: Arc<AtomicBool>,
    edits: Sender<GraphEdit>,
    thread: Option<JoinHandle<()>>,
}

impl Controller {
    pub fn new(config: RenderConfig) -> Self {
        Self {
            config,
            playback: None,
        }
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    // --- Real-time playback ---

    /// Play `graph` on the default audio device.
    ///
    /// The backend is built on the render thread by `backend`, since GPU
    /// contexts are bound to the thread that created them.
    pub fn play<B, F>(&mut self, graph: RenderGraph, backend: F)
    where
        B: GpuBackend + 'static,
        F: FnOnce() -> B + Send + 'static,
    {
        let config = self.config;
        self.play_with(graph, backend, move || open_device(&config));
    }

    /// Play `graph` into the output built by `output` on the render thread.
    pub fn play_with<B, F, O>(&mut self, graph: RenderGraph, backend: F, output: O)
    where
        B: GpuBackend + 'static,
        F: FnOnce() -> B + Send + 'static,
        O: FnOnce() -> Result<Box<dyn AudioOutput>, AudioError> + Send + 'static,
    {
        self.stop();

        let stop_signal = Arc::new(AtomicBool::new(false));
        let frames_rendered = Arc::new(AtomicU64::new(0));
        let finished = Arc::new(AtomicBool::new(false));
        let (edits, queue) = crossbeam_channel::unbounded();

        let stop = stop_signal.clone();
        let rendered = frames_rendered.clone();
        let done = finished.clone();
        let config = self.config;

        let thread = std::thread::spawn(move || {
            render_thread(graph, backend, output, config, queue, stop, rendered);
            done.store(true, Ordering::Relaxed);
        });

        self.playback = Some(PlaybackHandle {
            stop_signal,
            frames_rendered,
            finished,
            edits,
            thread: Some(thread),
        });
    }

    pub fn stop(&mut self) {
        if let Some(mut pb) = self.playback.take() {
            pb.stop_signal.store(true, Ordering::Relaxed);
            if let Some(handle) = pb.thread.take() {
                if handle.join().is_err() {
                    tracing::error!("render thread panicked");
                }
            }
        }
    }

    /// Queue an edit for the render thread. Returns false when nothing is
    /// playing.
    pub fn edit<F>(&self, edit: F) -> bool
    where
        F: FnOnce(&mut GraphEditor<'_>) -> sw_engine::Result<()> + Send + 'static,
    {
        self.playback
            .as_ref()
            .is_some_and(|pb| pb.edits.send(Box::new(edit)).is_ok())
    }

    pub fn is_playing(&self) -> bool {
        self.playback
            .as_ref()
            .is_some_and(|p| !p.finished.load(Ordering::Relaxed))
    }

    pub fn frames_rendered(&self) -> u64 {
        self.playback
            .as_ref()
            .map_or(0, |p| p.frames_rendered.load(Ordering::Relaxed))
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.stop();
    }
}

fn open_device(config: &RenderConfig) -> Result<Box<dyn AudioOutput>, AudioError> {
    let (mut output, receiver) = CpalOutput::new(
        config.sample_rate,
        config.channels as u16,
        config.frames_per_buffer as usize,
        config.ring_capacity,
        config.handoff,
    )?;
    output.build_stream(receiver)?;
    Ok(Box::new(output))
}

fn render_thread<B, F, O>(
    graph: RenderGraph,
    backend: F,
    output: O,
    config: RenderConfig,
    edits: Receiver<GraphEdit>,
    stop_signal: Arc<AtomicBool>,
    frames_rendered: Arc<AtomicU64>,
) where
    B: GpuBackend,
    F: FnOnce() -> B,
    O: FnOnce() -> Result<Box<dyn AudioOutput>, AudioError>,
{
    let output = match output() {
        Ok(output) => output,
        Err(err) => {
            tracing::error!(%err, "cannot open audio output");
            return;
        }
    };
    let mut renderer = match Renderer::new(backend(), graph) {
        Ok(renderer) => renderer,
        Err(err) => {
            tracing::error!(%err, "cannot initialize render graph");
            return;
        }
    };
    renderer.add_output(output);
    if let Err(err) = renderer.start() {
        tracing::error!(%err, "cannot start audio output");
        return;
    }

    // Poll for room at a fraction of a frame's duration.
    let idle = Duration::from_secs_f64(config.frame_seconds() / 4.0);

    while !stop_signal.load(Ordering::Relaxed) {
        for edit in edits.try_iter() {
            if let Err(err) = edit(&mut renderer.editor()) {
                tracing::warn!(%err, "graph edit rejected");
            }
        }
        match renderer.render_frame() {
            Ok(true) => {
                frames_rendered.fetch_add(1, Ordering::Relaxed);
            }
            Ok(false) => match config.handoff {
                HandoffMode::Blocking => std::thread::sleep(idle),
                HandoffMode::Spin => std::hint::spin_loop(),
            },
            Err(err) => {
                tracing::error!(%err, "render failed, stopping playback");
                break;
            }
        }
    }
    tracing::debug!(frames = renderer.frame(), "render thread finished");
}
