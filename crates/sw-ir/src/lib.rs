//! Core types for the shaderwave render graph.
//!
//! Values carried by stage parameters, their connection roles, stage and
//! parameter identifiers, and the planar host audio frame that the graph
//! reads back each render.
//!
//! Designed to be `no_std` compatible with the `alloc` crate.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

mod audio_buffer;
mod ids;
mod role;
mod value;

pub use audio_buffer::{AudioBuffer, MAX_CHANNELS};
pub use ids::{ParamName, ParamRef, StageId, PARAM_NAME_CAPACITY};
pub use role::ConnectionRole;
pub use value::{ParamValue, ValueKind};
