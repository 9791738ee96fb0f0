//! Audio output for shaderwave.
//!
//! Rendered frames leave the render thread through a [`FrameBridge`], a
//! bounded queue over an [`AudioRingBuffer`] that the realtime side drains
//! without blocking. [`CpalOutput`] plays them on the default device;
//! [`CaptureOutput`] keeps them in memory.

mod bridge;
mod capture;
mod cpal_backend;
mod ring;
mod traits;

pub use bridge::{FrameBridge, FrameReceiver, FrameSender, HandoffMode};
pub use capture::{CaptureHandle, CaptureOutput};
pub use cpal_backend::CpalOutput;
pub use ring::{AudioRingBuffer, PopStatus};
pub use traits::{AudioError, AudioOutput};
