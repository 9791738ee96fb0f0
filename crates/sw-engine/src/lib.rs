//! Render stages, parameters and the render graph.
//!
//! A [`RenderStage`] is one shader pass over an audio texture
//! (frames-per-buffer wide, one row per channel). Stages are wired output
//! to stream with [`RenderStage::connect_render_stage`] and handed to a
//! [`RenderGraph`], which owns them, orders them producers-first and
//! drives `bind` + `render` once per audio frame.

mod error;
mod graph;
mod history;
mod parameter;
mod stage;
pub mod stages;
mod tape;
mod topology;

pub use error::{param_name, Error, InitError, LinkError, Result, StructureError};
pub use graph::{RejectedStage, RenderGraph};
pub use history::{AudioHistory, AUDIO_HISTORY_TEXTURE};
pub use parameter::{Parameter, ParameterKind, ParameterLookup, TextureSpec};
pub use stage::{names, RenderStage, StageConfig, StageState, MAX_DRAW_BUFFERS};
pub use tape::Tape;
pub use topology::topological_sort;
