//! Multichannel f32 audio frame with planar layout.
//!
//! The layout matches a single-component float texture of
//! `frames × channels` texels, so a stage's output texture reads back
//! straight into an `AudioBuffer` without reshuffling.

use alloc::vec;
use alloc::vec::Vec;

/// Maximum number of audio channels per buffer.
pub const MAX_CHANNELS: u16 = 8;

/// A multichannel f32 audio buffer in planar layout.
///
/// Data is stored as `channels` contiguous planes of `frames` samples each.
/// `data[ch * frames + frame]` gives the sample for channel `ch` at `frame`.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioBuffer {
    data: Vec<f32>,
    channels: u16,
    frames: u16,
}

impl AudioBuffer {
    /// Create a new silent buffer with the given dimensions.
    pub fn new(channels: u16, frames: u16) -> Self {
        Self {
            data: vec![0.0; channels as usize * frames as usize],
            channels,
            frames,
        }
    }

    /// Build a buffer from planar sample data.
    ///
    /// Returns `None` when `data` does not hold exactly `channels * frames`
    /// samples.
    pub fn from_planar(channels: u16, frames: u16, data: Vec<f32>) -> Option<Self> {
        (data.len() == channels as usize * frames as usize).then_some(Self {
            data,
            channels,
            frames,
        })
    }

    /// Fill all samples with zero.
    pub fn silence(&mut self) {
        self.data.fill(0.0);
    }

    /// Number of channels.
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Number of frames.
    pub fn frames(&self) -> u16 {
        self.frames
    }

    /// Total number of samples across all channels.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True if the buffer holds no samples.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Read-only access to one channel's sample data.
    pub fn channel(&self, ch: u16) -> &[f32] {
        let start = ch as usize * self.frames as usize;
        &self.data[start..start + self.frames as usize]
    }

    /// Mutable access to one channel's sample data.
    pub fn channel_mut(&mut self, ch: u16) -> &mut [f32] {
        let start = ch as usize * self.frames as usize;
        let len = self.frames as usize;
        &mut self.data[start..start + len]
    }

    /// All samples, channel planes back to back.
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Mutable view of all samples.
    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Overwrite this buffer with planar samples from `src`.
    ///
    /// Copies the overlapping prefix; any remaining samples are zeroed.
    pub fn copy_from_slice(&mut self, src: &[f32]) {
        let n = self.data.len().min(src.len());
        self.data[..n].copy_from_slice(&src[..n]);
        self.data[n..].fill(0.0);
    }

    /// Write frames interleaved into `out` (`out_channels` samples per frame).
    ///
    /// Extra output channels are zero-filled; surplus source channels are
    /// dropped. Returns the number of frames written.
    pub fn interleave_into(&self, out: &mut [f32], out_channels: usize) -> usize {
        if out_channels == 0 {
            return 0;
        }
        let frames = (out.len() / out_channels).min(self.frames as usize);
        for (frame, chunk) in out.chunks_mut(out_channels).take(frames).enumerate() {
            for (ch, sample) in chunk.iter_mut().enumerate() {
                *sample = if ch < self.channels as usize {
                    self.data[ch * self.frames as usize + frame]
                } else {
                    0.0
                };
            }
        }
        frames
    }

    /// Scale all samples by `gain`.
    pub fn apply_gain(&mut self, gain: f32) {
        for s in &mut self.data {
            *s *= gain;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_is_silent() {
        let buf = AudioBuffer::new(2, 4);
        assert_eq!(buf.channels(), 2);
        assert_eq!(buf.frames(), 4);
        assert_eq!(buf.len(), 8);
        assert!(buf.channel(0).iter().all(|&s| s == 0.0));
        assert!(buf.channel(1).iter().all(|&s| s == 0.0));
    }

    #[test]
    fn channel_mut_writes_correctly() {
        let mut buf = AudioBuffer::new(2, 2);
        buf.channel_mut(0)[0] = 1.0;
        buf.channel_mut(1)[1] = -0.5;
        assert_eq!(buf.channel(0), &[1.0, 0.0]);
        assert_eq!(buf.channel(1), &[0.0, -0.5]);
        assert_eq!(buf.as_slice(), &[1.0, 0.0, 0.0, -0.5]);
    }

    #[test]
    fn from_planar_checks_length() {
        assert!(AudioBuffer::from_planar(2, 2, vec![0.0; 3]).is_none());
        let buf = AudioBuffer::from_planar(1, 3, vec![1.0, 2.0, 3.0]).unwrap();
        assert_eq!(buf.channel(0), &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn silence_clears_data() {
        let mut buf = AudioBuffer::new(1, 2);
        buf.channel_mut(0)[0] = 1.0;
        buf.silence();
        assert_eq!(buf.channel(0), &[0.0, 0.0]);
    }

    #[test]
    fn copy_from_short_slice_zero_fills() {
        let mut buf = AudioBuffer::new(1, 4);
        buf.as_mut_slice().fill(9.0);
        buf.copy_from_slice(&[1.0, 2.0]);
        assert_eq!(buf.as_slice(), &[1.0, 2.0, 0.0, 0.0]);
    }

    #[test]
    fn interleave_stereo() {
        let buf = AudioBuffer::from_planar(2, 2, vec![1.0, 2.0, -1.0, -2.0]).unwrap();
        let mut out = [0.0; 4];
        assert_eq!(buf.interleave_into(&mut out, 2), 2);
        assert_eq!(out, [1.0, -1.0, 2.0, -2.0]);
    }

    #[test]
    fn interleave_mono_into_wider_output_zero_fills() {
        let buf = AudioBuffer::from_planar(1, 2, vec![0.5, 0.25]).unwrap();
        let mut out = [7.0; 6];
        assert_eq!(buf.interleave_into(&mut out, 3), 2);
        assert_eq!(out, [0.5, 0.0, 0.0, 0.25, 0.0, 0.0]);
    }

    #[test]
    fn apply_gain_scales_all() {
        let mut buf = AudioBuffer::new(2, 1);
        buf.channel_mut(0)[0] = 1.0;
        buf.channel_mut(1)[0] = -0.5;
        buf.apply_gain(2.0);
        assert!((buf.channel(0)[0] - 2.0).abs() < 1e-6);
        assert!((buf.channel(1)[0] - -1.0).abs() < 1e-6);
    }
}
