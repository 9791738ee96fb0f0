//! In-memory output for offline rendering and tests.

use std::sync::Arc;

use parking_lot::Mutex;
use sw_ir::AudioBuffer;

use crate::traits::{AudioError, AudioOutput};

/// Collects every pushed frame.
///
/// The frames are shared with any [`CaptureHandle`], so they stay readable
/// after the output has been moved into a renderer.
pub struct CaptureOutput {
    frames: Arc<Mutex<Vec<AudioBuffer>>>,
    sample_rate: u32,
    channels: u16,
    limit: Option<usize>,
}

impl CaptureOutput {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            frames: Arc::new(Mutex::new(Vec::new())),
            sample_rate,
            channels,
            limit: None,
        }
    }

    /// Stop accepting frames after `limit`. Once reached the output
    /// reports not ready, so a renderer skips further frames.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn handle(&self) -> CaptureHandle {
        CaptureHandle {
            frames: self.frames.clone(),
        }
    }
}

impl AudioOutput for CaptureOutput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn is_ready(&self) -> bool {
        self.limit.map_or(true, |limit| self.frames.lock().len() < limit)
    }

    fn push(&mut self, frame: &AudioBuffer) -> Result<(), AudioError> {
        if self.is_ready() {
            self.frames.lock().push(frame.clone());
        }
        Ok(())
    }

    fn start(&mut self) -> Result<(), AudioError> {
        Ok(())
    }

    fn stop(&mut self) -> Result<(), AudioError> {
        Ok(())
    }
}

/// Read access to the frames of a [`CaptureOutput`].
#[derive(Clone)]
pub struct CaptureHandle {
    frames: Arc<Mutex<Vec<AudioBuffer>>>,
}

impl CaptureHandle {
    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies of the captured frames, oldest first.
    pub fn frames(&self) -> Vec<AudioBuffer> {
        self.frames.lock().clone()
    }

    /// All captured audio interleaved at `channels` samples per frame.
    pub fn interleaved(&self, channels: usize) -> Vec<f32> {
        let frames = self.frames.lock();
        let mut out = Vec::new();
        for buffer in frames.iter() {
            let start = out.len();
            out.resize(start + buffer.frames() as usize * channels, 0.0);
            buffer.interleave_into(&mut out[start..], channels);
        }
        out
    }

    pub fn clear(&self) {
        self.frames.lock().clear();
    }
}
