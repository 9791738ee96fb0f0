//! Frame loop and playback for shaderwave.
//!
//! [`Renderer`] drives a [`RenderGraph`] one frame at a time and hands each
//! read-back frame to its audio outputs. [`Controller`] runs a renderer on
//! a dedicated thread against the default audio device and forwards graph
//! edits to it. Both take their dimensions from a [`RenderConfig`].

mod config;
mod controller;
mod renderer;

pub use config::{ConfigError, RenderConfig};
pub use controller::{Controller, GraphEdit};
pub use renderer::{GraphEditor, RenderError, Renderer, GLOBAL_TIME};

// Re-export common types so callers don't need every crate directly.
pub use sw_audio::{AudioOutput, CaptureHandle, CaptureOutput, HandoffMode};
pub use sw_engine::{RenderGraph, RenderStage, StageConfig};
pub use sw_ir::AudioBuffer;
