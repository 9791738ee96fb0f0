//! Recorded audio kept on the host, addressed in whole frames.

use crate::stage::StageConfig;

/// Per-channel sample runs that grow as frames are recorded.
///
/// Frames are laid out the way stage textures are: `frames_per_buffer`
/// samples of channel 0, then channel 1, and so on.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Tape {
    frames_per_buffer: usize,
    sample_rate: u32,
    channels: Vec<Vec<f32>>,
}

impl Tape {
    pub fn new(config: &StageConfig) -> Self {
        Self {
            frames_per_buffer: config.frames_per_buffer as usize,
            sample_rate: config.sample_rate,
            channels: vec![Vec::new(); config.channels as usize],
        }
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Samples stored per channel.
    pub fn len(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whole frames stored, counting a trailing partial one.
    pub fn frames(&self) -> usize {
        self.len().div_ceil(self.frames_per_buffer.max(1))
    }

    pub fn seconds(&self) -> f32 {
        self.len() as f32 / self.sample_rate.max(1) as f32
    }

    /// Samples of channel `ch`.
    pub fn channel(&self, ch: usize) -> Option<&[f32]> {
        self.channels.get(ch).map(Vec::as_slice)
    }

    /// Write one frame at frame index `position`, growing the tape with
    /// silence when it is shorter.
    pub fn record(&mut self, frame: &[f32], position: usize) {
        let frames = self.frames_per_buffer;
        let start = position * frames;
        for (ch, samples) in self.channels.iter_mut().enumerate() {
            if samples.len() < start + frames {
                samples.resize(start + frames, 0.0);
            }
            let src = frame.get(ch * frames..(ch + 1) * frames).unwrap_or(&[]);
            let dst = &mut samples[start..start + frames];
            dst[..src.len()].copy_from_slice(src);
            dst[src.len()..].fill(0.0);
        }
    }

    /// Copy frame `position` into `out`. Past the end reads as silence.
    pub fn playback(&self, position: usize, out: &mut [f32]) {
        let frames = self.frames_per_buffer;
        let start = position * frames;
        for (ch, row) in out.chunks_mut(frames.max(1)).enumerate() {
            let src = self
                .channels
                .get(ch)
                .and_then(|s| s.get(start.min(s.len())..(start + frames).min(s.len())))
                .unwrap_or(&[]);
            row[..src.len()].copy_from_slice(src);
            row[src.len()..].fill(0.0);
        }
    }

    pub fn clear(&mut self) {
        for samples in &mut self.channels {
            samples.clear();
        }
    }
}
