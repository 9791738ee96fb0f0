//! Per-frame driver: bind, render, read back, hand off.

use std::ops::{Deref, DerefMut};

use sw_audio::{AudioError, AudioOutput};
use sw_engine::{Parameter, RejectedStage, RenderGraph, RenderStage};
use sw_gpu::GpuBackend;
use sw_ir::{AudioBuffer, ConnectionRole, StageId};

/// Name of the uniform block holding the frame counter.
pub const GLOBAL_TIME: &str = "global_time";

/// Errors from the frame loop.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error(transparent)]
    Engine(#[from] sw_engine::Error),
    #[error(transparent)]
    Audio(#[from] AudioError),
    #[error("terminal stage {0} does not read back audio")]
    NoOutput(StageId),
}

/// Owns a GPU backend and a graph and renders it frame by frame.
///
/// A `global_time` uniform block, incremented once per frame, is shared
/// with every stage program that declares it. Dropping the renderer
/// releases all GPU resources.
pub struct Renderer<B: GpuBackend> {
    gpu: B,
    graph: RenderGraph,
    global_time: Parameter,
    outputs: Vec<Box<dyn AudioOutput>>,
    frame: u32,
}

impl<B: GpuBackend> Renderer<B> {
    /// Initialize `graph` and the global parameters on `gpu`.
    pub fn new(gpu: B, graph: RenderGraph) -> Result<Self, RenderError> {
        let global_time = Parameter::uniform_buffer(GLOBAL_TIME, ConnectionRole::Input, 0i32)?;
        let mut renderer = Self {
            gpu,
            graph,
            global_time,
            outputs: Vec::new(),
            frame: 0,
        };
        renderer.global_time.initialize_global(&mut renderer.gpu)?;
        renderer.graph.initialize(&mut renderer.gpu)?;
        tracing::debug!(
            stages = renderer.graph.len(),
            terminal = %renderer.graph.terminal(),
            "renderer ready"
        );
        Ok(renderer)
    }

    /// Append an output. The first output paces the frame loop.
    pub fn add_output(&mut self, output: Box<dyn AudioOutput>) {
        self.outputs.push(output);
    }

    pub fn start(&mut self) -> Result<(), RenderError> {
        for output in &mut self.outputs {
            output.start()?;
        }
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), RenderError> {
        for output in &mut self.outputs {
            output.stop()?;
        }
        Ok(())
    }

    pub fn graph(&self) -> &RenderGraph {
        &self.graph
    }

    /// Edit access to the graph between frames. New stages are
    /// initialized at the next frame.
    pub fn editor(&mut self) -> GraphEditor<'_> {
        GraphEditor {
            graph: &mut self.graph,
            gpu: &mut self.gpu,
        }
    }

    pub fn gpu(&self) -> &B {
        &self.gpu
    }

    /// Frames rendered so far.
    pub fn frame(&self) -> u32 {
        self.frame
    }

    /// Render one frame and push it to every output.
    ///
    /// Returns `Ok(false)` without rendering when the lead output has no
    /// room.
    pub fn render_frame(&mut self) -> Result<bool, RenderError> {
        if let Some(lead) = self.outputs.first() {
            if !lead.is_ready() {
                return Ok(false);
            }
        }
        self.render()?;
        let terminal = self.graph.terminal();
        let buffer = self
            .graph
            .output_buffer()
            .ok_or(RenderError::NoOutput(terminal))?;
        for output in &mut self.outputs {
            output.push(buffer)?;
        }
        Ok(true)
    }

    /// Render `count` frames and return copies of them, ignoring outputs.
    pub fn render_frames(&mut self, count: usize) -> Result<Vec<AudioBuffer>, RenderError> {
        let mut frames = Vec::with_capacity(count);
        for _ in 0..count {
            self.render()?;
            let terminal = self.graph.terminal();
            let buffer = self
                .graph
                .output_buffer()
                .ok_or(RenderError::NoOutput(terminal))?;
            frames.push(buffer.clone());
        }
        Ok(frames)
    }

    /// Free the GPU resources of the graph and the global parameters.
    /// Rendering afterwards fails until the graph is initialized again.
    pub fn release(&mut self) {
        self.graph.release(&mut self.gpu);
        self.global_time.release(&mut self.gpu);
    }

    fn render(&mut self) -> Result<(), RenderError> {
        self.global_time.set_value(self.frame as i32)?;
        self.global_time.render(&mut self.gpu)?;
        self.graph.bind(&mut self.gpu)?;
        self.graph.bind_global_block(&mut self.gpu, &self.global_time)?;
        self.graph.render(&mut self.gpu, self.frame)?;
        self.frame = self.frame.wrapping_add(1);
        Ok(())
    }
}

impl<B: GpuBackend> Drop for Renderer<B> {
    fn drop(&mut self) {
        for output in &mut self.outputs {
            if let Err(err) = output.stop() {
                tracing::warn!(%err, "failed to stop audio output");
            }
        }
        self.release();
    }
}

/// A graph paired with the backend its stages were initialized on.
///
/// Dereferences to the [`RenderGraph`]. Stages taken out through the
/// editor come back with their GPU resources already released.
pub struct GraphEditor<'a> {
    graph: &'a mut RenderGraph,
    gpu: &'a mut dyn GpuBackend,
}

impl GraphEditor<'_> {
    /// [`RenderGraph::remove_render_stage`], releasing the removed stage.
    pub fn remove_render_stage(&mut self, id: StageId) -> sw_engine::Result<RenderStage> {
        let mut stage = self.graph.remove_render_stage(id)?;
        stage.release(self.gpu);
        Ok(stage)
    }

    /// [`RenderGraph::replace_render_stage`], releasing the replaced stage.
    pub fn replace_render_stage(
        &mut self,
        old: StageId,
        stage: RenderStage,
    ) -> Result<RenderStage, RejectedStage> {
        let mut old = self.graph.replace_render_stage(old, stage)?;
        old.release(self.gpu);
        Ok(old)
    }
}

impl Deref for GraphEditor<'_> {
    type Target = RenderGraph;

    fn deref(&self) -> &RenderGraph {
        self.graph
    }
}

impl DerefMut for GraphEditor<'_> {
    fn deref_mut(&mut self) -> &mut RenderGraph {
        self.graph
    }
}
