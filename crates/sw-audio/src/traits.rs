//! Audio output trait and error types.

use sw_ir::AudioBuffer;

/// Error type for audio operations.
#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    /// Failed to initialize audio device
    #[error("device init error: {0}")]
    DeviceInit(String),
    /// Failed to create audio stream
    #[error("stream create error: {0}")]
    StreamCreate(String),
    /// Playback error
    #[error("playback error: {0}")]
    Playback(String),
    /// No audio device available
    #[error("no audio device available")]
    NoDevice,
    /// The consuming side of a frame bridge was dropped
    #[error("audio consumer disconnected")]
    Disconnected,
    /// Unrecognized handoff mode name
    #[error("unknown handoff mode `{0}` (expected `blocking` or `spin`)")]
    UnknownHandoff(String),
}

/// Trait for audio output backends.
///
/// Frames arrive planar, one [`AudioBuffer`] per rendered graph frame.
pub trait AudioOutput {
    /// Get the sample rate.
    fn sample_rate(&self) -> u32;

    /// Channels the output plays.
    fn channels(&self) -> u16;

    /// True when the output can take another frame without waiting.
    fn is_ready(&self) -> bool;

    /// Hand one frame to the output. May block until there is room.
    fn push(&mut self, frame: &AudioBuffer) -> Result<(), AudioError>;

    /// Start playback.
    fn start(&mut self) -> Result<(), AudioError>;

    /// Stop playback.
    fn stop(&mut self) -> Result<(), AudioError>;
}
