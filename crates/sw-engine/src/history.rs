//! Host-side memory of past stream frames.
//!
//! Effects that look back in time (echo, FIR filtering) keep the last few
//! frames of their stream input on the host and upload them every audio
//! frame as an `audio_history_texture`. The texture is `frames_per_buffer`
//! wide and `channels * buffers` tall: row `r * channels + ch` holds
//! samples `r * frames .. (r + 1) * frames` of channel `ch`, oldest first,
//! so the current frame is always the last row group.

use sw_gpu::GpuBackend;
use sw_ir::{ConnectionRole, ParamValue};

use crate::error::Result;
use crate::parameter::{Parameter, TextureSpec};
use crate::stage::{read_stream, set_parameter, ParameterMap, StageConfig};

/// Name of the history texture parameter.
pub const AUDIO_HISTORY_TEXTURE: &str = "audio_history_texture";

/// Rolling per-channel sample history, `buffers` frames deep.
#[derive(Debug)]
pub struct AudioHistory {
    frames: usize,
    channels: usize,
    buffers: usize,
    /// One contiguous run per channel, oldest sample first.
    samples: Vec<Vec<f32>>,
    /// Scratch for the stream read-back, `frames * channels` long.
    scratch: Vec<f32>,
    last_time: Option<u32>,
}

impl AudioHistory {
    pub fn new(config: &StageConfig, buffers: u32) -> Self {
        let frames = config.frames_per_buffer as usize;
        let channels = config.channels as usize;
        let buffers = buffers.max(1) as usize;
        Self {
            frames,
            channels,
            buffers,
            samples: vec![vec![0.0; frames * buffers]; channels],
            scratch: vec![0.0; frames * channels],
            last_time: None,
        }
    }

    /// Texture shape of the uploaded history.
    pub fn texture(&self) -> TextureSpec {
        TextureSpec::new(self.frames as u32, (self.channels * self.buffers) as u32)
    }

    /// The `audio_history_texture` parameter, initially silent.
    pub fn parameter(&self) -> Result<Parameter> {
        Parameter::texture(AUDIO_HISTORY_TEXTURE, ConnectionRole::Input, self.texture())
    }

    /// Samples per frame.
    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Samples kept per channel.
    pub fn len(&self) -> usize {
        self.frames * self.buffers
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `time` is a frame not yet pushed. Marks it as seen.
    fn advance(&mut self, time: u32) -> bool {
        if self.last_time == Some(time) {
            return false;
        }
        self.last_time = Some(time);
        true
    }

    /// Push the stream input of frame `time` and stage the history texture
    /// for upload. Repeated calls for the same `time` do nothing and
    /// return `false`.
    pub(crate) fn capture(
        &mut self,
        parameters: &mut ParameterMap,
        gpu: &mut dyn GpuBackend,
        time: u32,
    ) -> Result<bool> {
        if !self.advance(time) {
            return Ok(false);
        }
        read_stream(parameters, gpu, &mut self.scratch)?;
        self.push_scratch();
        set_parameter(parameters, AUDIO_HISTORY_TEXTURE, self.texture_data())?;
        Ok(true)
    }

    /// Drop the oldest frame and append the one in the scratch buffer.
    fn push_scratch(&mut self) {
        let frames = self.frames;
        for (ch, history) in self.samples.iter_mut().enumerate() {
            history.copy_within(frames.., 0);
            let start = history.len() - frames;
            history[start..].copy_from_slice(&self.scratch[ch * frames..(ch + 1) * frames]);
        }
    }

    /// Append one frame laid out one row per channel.
    pub fn push_frame(&mut self, frame: &[f32]) {
        let n = self.scratch.len().min(frame.len());
        self.scratch[..n].copy_from_slice(&frame[..n]);
        self.scratch[n..].fill(0.0);
        self.push_scratch();
    }

    /// Sample of channel `ch`, `age` samples before the newest one.
    pub fn sample(&self, ch: usize, age: usize) -> f32 {
        self.samples
            .get(ch)
            .and_then(|h| h.len().checked_sub(age + 1).map(|i| h[i]))
            .unwrap_or(0.0)
    }

    /// Back to silence, as if nothing had been pushed.
    pub fn clear(&mut self) {
        for history in &mut self.samples {
            history.fill(0.0);
        }
        self.last_time = None;
    }

    /// Texels in the layout of [`AudioHistory::texture`].
    pub fn texture_data(&self) -> ParamValue {
        let mut data = Vec::with_capacity(self.len() * self.channels);
        for row in 0..self.buffers {
            for history in &self.samples {
                data.extend_from_slice(&history[row * self.frames..(row + 1) * self.frames]);
            }
        }
        ParamValue::FloatArray(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> StageConfig {
        StageConfig {
            frames_per_buffer: 2,
            sample_rate: 8,
            channels: 2,
        }
    }

    #[test]
    fn frames_shift_oldest_out() {
        let mut h = AudioHistory::new(&config(), 2);
        h.push_frame(&[1.0, 2.0, 10.0, 20.0]);
        h.push_frame(&[3.0, 4.0, 30.0, 40.0]);
        assert_eq!(h.sample(0, 0), 4.0);
        assert_eq!(h.sample(0, 3), 1.0);
        assert_eq!(h.sample(1, 1), 30.0);
        h.push_frame(&[5.0, 6.0, 50.0, 60.0]);
        assert_eq!(h.sample(0, 3), 3.0);
        assert_eq!(h.sample(0, 4), 0.0);
    }

    #[test]
    fn texture_rows_interleave_channels_per_buffer() {
        let mut h = AudioHistory::new(&config(), 2);
        h.push_frame(&[1.0, 2.0, 10.0, 20.0]);
        h.push_frame(&[3.0, 4.0, 30.0, 40.0]);
        let spec = h.texture();
        assert_eq!((spec.width, spec.height), (2, 4));
        assert_eq!(
            h.texture_data(),
            ParamValue::FloatArray(vec![1.0, 2.0, 10.0, 20.0, 3.0, 4.0, 30.0, 40.0])
        );
    }

    #[test]
    fn advance_sees_each_time_once_until_cleared() {
        let mut h = AudioHistory::new(&config(), 1);
        assert!(h.advance(0));
        assert!(!h.advance(0));
        assert!(h.advance(1));
        h.push_frame(&[1.0; 4]);
        h.clear();
        assert_eq!(h.sample(0, 0), 0.0);
        assert!(h.advance(1));
    }

    #[test]
    fn short_frame_is_zero_padded() {
        let mut h = AudioHistory::new(&config(), 1);
        h.push_frame(&[1.0]);
        assert_eq!(h.sample(0, 1), 1.0);
        assert_eq!(h.sample(1, 0), 0.0);
    }
}
