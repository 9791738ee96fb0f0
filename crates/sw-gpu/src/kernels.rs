//! CPU kernels standing in for fragment shaders on the software backend.
//!
//! A kernel sees the program's uniforms, bound samplers and uniform
//! blocks through [`KernelContext`] and writes every texel of the bound
//! draw targets. Texel `(x, y)` lives at `y * width + x`, one row per
//! audio channel.

use std::collections::HashMap;
use std::f32::consts::TAU;
use std::sync::Arc;

use sw_ir::ParamValue;

use crate::builtin::paths;

/// A fragment program executed on the CPU.
pub type Kernel = Arc<dyn Fn(&KernelContext<'_>, &mut KernelTargets) + Send + Sync>;

/// Read-only inputs of one kernel invocation.
pub struct KernelContext<'a> {
    /// Target width in texels (frames per buffer).
    pub width: usize,
    /// Target height in texels (channels).
    pub height: usize,
    pub(crate) uniforms: &'a HashMap<String, ParamValue>,
    pub(crate) samplers: Vec<(&'a str, &'a [f32])>,
    pub(crate) blocks: Vec<(&'a str, &'a [u8])>,
}

impl<'a> KernelContext<'a> {
    pub fn uniform(&self, name: &str) -> Option<&ParamValue> {
        self.uniforms.get(name)
    }

    /// Float uniform, or `default` when unset.
    pub fn float(&self, name: &str, default: f32) -> f32 {
        self.uniform(name).and_then(ParamValue::as_float).unwrap_or(default)
    }

    /// Int (or bool) uniform, or `default` when unset.
    pub fn int(&self, name: &str, default: i32) -> i32 {
        self.uniform(name).and_then(ParamValue::as_int).unwrap_or(default)
    }

    /// Texels of the texture bound to sampler `name`.
    pub fn sampler(&self, name: &str) -> Option<&'a [f32]> {
        self.samplers
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, data)| *data)
    }

    /// Texels of every bound sampler whose name starts with `prefix`.
    pub fn samplers_with_prefix<'s>(
        &'s self,
        prefix: &'s str,
    ) -> impl Iterator<Item = &'a [f32]> + 's {
        self.samplers
            .iter()
            .filter(move |(n, _)| n.starts_with(prefix))
            .map(|(_, data)| *data)
    }

    /// Raw bytes of the uniform block `name`.
    pub fn block(&self, name: &str) -> Option<&'a [u8]> {
        self.blocks
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, data)| *data)
    }

    /// First 32-bit int of the uniform block `name`.
    pub fn block_int(&self, name: &str) -> Option<i32> {
        let bytes = self.block(name)?.get(..4)?;
        Some(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

/// Draw targets of one kernel invocation, indexed by output location.
#[derive(Debug, Default)]
pub struct KernelTargets {
    pub(crate) slots: Vec<Option<Vec<f32>>>,
}

impl KernelTargets {
    /// Texels of output location `location`, if bound.
    pub fn target(&mut self, location: usize) -> Option<&mut [f32]> {
        self.slots.get_mut(location)?.as_deref_mut()
    }

    /// Number of output locations, bound or not.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Kernels for the built-in stage shaders, keyed by program label.
pub fn builtin_kernels() -> Vec<(&'static str, Kernel)> {
    vec![
        (paths::SINE_GENERATOR, Arc::new(sine_generator) as Kernel),
        (paths::CONSTANT_GENERATOR, Arc::new(constant_generator)),
        (paths::GAIN_EFFECT, Arc::new(gain_effect)),
        (paths::MULTITRACK_JOIN, Arc::new(multitrack_join)),
        (paths::ECHO_EFFECT, Arc::new(echo_effect)),
        (paths::FREQUENCY_FILTER_EFFECT, Arc::new(frequency_filter)),
        (paths::TAPE_RECORD, Arc::new(final_render)),
        (paths::TAPE_PLAYBACK, Arc::new(tape_playback)),
        (paths::FINAL_RENDER, Arc::new(final_render)),
    ]
}

/// `gain * sin(2π · tone · t)` with `t` continuing across frames via the
/// `global_time` block.
pub fn sine_generator(ctx: &KernelContext<'_>, out: &mut KernelTargets) {
    let tone = ctx.float("tone", 0.0);
    let gain = ctx.float("gain", 0.0);
    let sample_rate = ctx.int("sample_rate", 44_100).max(1) as f32;
    let buffer_size = ctx.int("buffer_size", ctx.width as i32) as i64;
    let time = ctx.block_int("global_time").unwrap_or(0) as i64;
    let width = ctx.width;
    let Some(target) = out.target(0) else {
        return;
    };
    for row in target.chunks_mut(width) {
        for (x, texel) in row.iter_mut().enumerate() {
            let frame = (time * buffer_size + x as i64) as f64;
            let phase = (frame * tone as f64 / sample_rate as f64).fract() as f32;
            *texel = gain * (TAU * phase).sin();
        }
    }
}

/// Every texel equals the `value` uniform.
pub fn constant_generator(ctx: &KernelContext<'_>, out: &mut KernelTargets) {
    let value = ctx.float("value", 0.0);
    if let Some(target) = out.target(0) {
        target.fill(value);
    }
}

/// Stream input scaled by `gain` and panned by `balance` (0 = left,
/// 0.5 = center, 1 = right). Channels past the second are only scaled.
pub fn gain_effect(ctx: &KernelContext<'_>, out: &mut KernelTargets) {
    let gain = ctx.float("gain", 1.0);
    let balance = ctx.float("balance", 0.5).clamp(0.0, 1.0);
    let stream = ctx.sampler("stream_audio_texture").unwrap_or(&[]);
    let width = ctx.width;
    let Some(target) = out.target(0) else {
        return;
    };
    for (ch, row) in target.chunks_mut(width).enumerate() {
        let pan = match ch {
            0 => (2.0 * (1.0 - balance)).min(1.0),
            1 => (2.0 * balance).min(1.0),
            _ => 1.0,
        };
        for (x, texel) in row.iter_mut().enumerate() {
            let sample = stream.get(ch * width + x).copied().unwrap_or(0.0);
            *texel = sample * gain * pan;
        }
    }
}

/// Sum of every bound `stream_audio_texture_N` slot.
pub fn multitrack_join(ctx: &KernelContext<'_>, out: &mut KernelTargets) {
    let Some(target) = out.target(0) else {
        return;
    };
    for track in ctx.samplers_with_prefix("stream_audio_texture_") {
        for (texel, sample) in target.iter_mut().zip(track) {
            *texel += *sample;
        }
    }
}

/// Sample of `channel`, `age` samples before the newest one, in a history
/// texture `width` wide with `channels` rows per buffer, oldest buffer
/// first. Reads before the start of the history are silent.
fn history_sample(
    history: &[f32],
    width: usize,
    channels: usize,
    channel: usize,
    age: usize,
) -> f32 {
    if width == 0 || channels == 0 {
        return 0.0;
    }
    let len = width * (history.len() / width / channels);
    let Some(s) = len.checked_sub(age + 1) else {
        return 0.0;
    };
    let row = s / width;
    history
        .get((row * channels + channel) * width + s % width)
        .copied()
        .unwrap_or(0.0)
}

/// Stream input plus `num_echos` copies, echo `k` delayed `k * delay`
/// seconds and scaled by `decay^k`.
pub fn echo_effect(ctx: &KernelContext<'_>, out: &mut KernelTargets) {
    let num_echos = ctx.int("num_echos", 0).max(0) as usize;
    let decay = ctx.float("decay", 0.0);
    let sample_rate = ctx.int("sample_rate", 44_100).max(1) as f32;
    let step = (ctx.float("delay", 0.0) * sample_rate).round().max(0.0) as usize;
    let stream = ctx.sampler("stream_audio_texture").unwrap_or(&[]);
    let history = ctx.sampler("audio_history_texture").unwrap_or(&[]);
    let (width, channels) = (ctx.width, ctx.height);
    let Some(target) = out.target(0) else {
        return;
    };
    for (ch, row) in target.chunks_mut(width).enumerate() {
        for (x, texel) in row.iter_mut().enumerate() {
            let age = width - 1 - x;
            let mut sample = stream.get(ch * width + x).copied().unwrap_or(0.0);
            let mut gain = 1.0;
            for k in 1..=num_echos {
                gain *= decay;
                sample += gain * history_sample(history, width, channels, ch, age + k * step);
            }
            *texel = sample;
        }
    }
}

/// FIR filter: `b_coeff_texture` convolved with the history, tap `j`
/// reaching `j` samples back.
pub fn frequency_filter(ctx: &KernelContext<'_>, out: &mut KernelTargets) {
    let b = ctx.sampler("b_coeff_texture").unwrap_or(&[]);
    let taps = (ctx.int("num_taps", b.len() as i32).max(0) as usize).min(b.len());
    let history = ctx.sampler("audio_history_texture").unwrap_or(&[]);
    let (width, channels) = (ctx.width, ctx.height);
    let Some(target) = out.target(0) else {
        return;
    };
    for (ch, row) in target.chunks_mut(width).enumerate() {
        for (x, texel) in row.iter_mut().enumerate() {
            let age = width - 1 - x;
            *texel = b[..taps]
                .iter()
                .enumerate()
                .map(|(j, c)| c * history_sample(history, width, channels, ch, age + j))
                .sum();
        }
    }
}

/// Copies the current tape frame to the output.
pub fn tape_playback(ctx: &KernelContext<'_>, out: &mut KernelTargets) {
    let tape = ctx.sampler("tape_audio_texture").unwrap_or(&[]);
    if let Some(target) = out.target(0) {
        let n = target.len().min(tape.len());
        target[..n].copy_from_slice(&tape[..n]);
    }
}

/// Copies the stream input through unchanged.
pub fn final_render(ctx: &KernelContext<'_>, out: &mut KernelTargets) {
    let stream = ctx.sampler("stream_audio_texture").unwrap_or(&[]);
    if let Some(target) = out.target(0) {
        let n = target.len().min(stream.len());
        target[..n].copy_from_slice(&stream[..n]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context<'a>(
        uniforms: &'a HashMap<String, ParamValue>,
        samplers: Vec<(&'a str, &'a [f32])>,
    ) -> KernelContext<'a> {
        KernelContext {
            width: 2,
            height: 2,
            uniforms,
            samplers,
            blocks: Vec::new(),
        }
    }

    fn targets() -> KernelTargets {
        KernelTargets {
            slots: vec![Some(vec![0.0; 4])],
        }
    }

    #[test]
    fn gain_centered_balance_scales_both_channels() {
        let mut uniforms = HashMap::new();
        uniforms.insert("gain".to_string(), ParamValue::Float(2.0));
        let stream = [1.0, 0.5, -1.0, 0.25];
        let ctx = context(&uniforms, vec![("stream_audio_texture", &stream[..])]);
        let mut out = targets();
        gain_effect(&ctx, &mut out);
        assert_eq!(out.target(0).unwrap(), &[2.0, 1.0, -2.0, 0.5]);
    }

    #[test]
    fn gain_hard_left_mutes_right() {
        let mut uniforms = HashMap::new();
        uniforms.insert("balance".to_string(), ParamValue::Float(0.0));
        let stream = [1.0, 1.0, 1.0, 1.0];
        let ctx = context(&uniforms, vec![("stream_audio_texture", &stream[..])]);
        let mut out = targets();
        gain_effect(&ctx, &mut out);
        assert_eq!(out.target(0).unwrap(), &[1.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn join_sums_slots_only() {
        let uniforms = HashMap::new();
        let a = [0.25; 4];
        let b = [0.75; 4];
        let other = [9.0; 4];
        let ctx = context(
            &uniforms,
            vec![
                ("stream_audio_texture_0", &a[..]),
                ("stream_audio_texture_1", &b[..]),
                ("stream_audio_texture", &other[..]),
            ],
        );
        let mut out = targets();
        multitrack_join(&ctx, &mut out);
        assert!(out.target(0).unwrap().iter().all(|&s| (s - 1.0).abs() < 1e-6));
    }

    #[test]
    fn sine_starts_at_zero_and_follows_time() {
        let mut uniforms = HashMap::new();
        uniforms.insert("tone".to_string(), ParamValue::Float(1.0));
        uniforms.insert("gain".to_string(), ParamValue::Float(1.0));
        uniforms.insert("sample_rate".to_string(), ParamValue::Int(4));
        uniforms.insert("buffer_size".to_string(), ParamValue::Int(2));
        let time = 1i32.to_le_bytes();
        let ctx = KernelContext {
            width: 2,
            height: 1,
            uniforms: &uniforms,
            samplers: Vec::new(),
            blocks: vec![("global_time", &time[..])],
        };
        let mut out = KernelTargets {
            slots: vec![Some(vec![0.0; 2])],
        };
        sine_generator(&ctx, &mut out);
        // Frames 2 and 3 of a 1 Hz tone at 4 Hz sample rate.
        let t = out.target(0).unwrap();
        assert!(t[0].abs() < 1e-5);
        assert!((t[1] + 1.0).abs() < 1e-5);
    }

    /// Two buffers of history for a 2x2 frame: the previous frame, then
    /// the current one.
    const HISTORY: [f32; 8] = [1.0, 2.0, 3.0, 4.0, 10.0, 20.0, 30.0, 40.0];
    const CURRENT: [f32; 4] = [10.0, 20.0, 30.0, 40.0];

    #[test]
    fn history_lookup_walks_back_across_buffers() {
        assert_eq!(history_sample(&HISTORY, 2, 2, 0, 0), 20.0);
        assert_eq!(history_sample(&HISTORY, 2, 2, 1, 2), 4.0);
        assert_eq!(history_sample(&HISTORY, 2, 2, 1, 3), 3.0);
        assert_eq!(history_sample(&HISTORY, 2, 2, 0, 4), 0.0);
    }

    #[test]
    fn echo_adds_decayed_past_frames() {
        let mut uniforms = HashMap::new();
        uniforms.insert("num_echos".to_string(), ParamValue::Int(1));
        uniforms.insert("delay".to_string(), ParamValue::Float(0.5));
        uniforms.insert("decay".to_string(), ParamValue::Float(0.5));
        uniforms.insert("sample_rate".to_string(), ParamValue::Int(4));
        let ctx = context(
            &uniforms,
            vec![
                ("stream_audio_texture", &CURRENT[..]),
                ("audio_history_texture", &HISTORY[..]),
            ],
        );
        let mut out = targets();
        echo_effect(&ctx, &mut out);
        assert_eq!(out.target(0).unwrap(), &[10.5, 21.0, 31.5, 42.0]);
    }

    #[test]
    fn echo_past_the_history_is_dry() {
        let mut uniforms = HashMap::new();
        uniforms.insert("num_echos".to_string(), ParamValue::Int(3));
        uniforms.insert("delay".to_string(), ParamValue::Float(2.0));
        uniforms.insert("decay".to_string(), ParamValue::Float(0.5));
        uniforms.insert("sample_rate".to_string(), ParamValue::Int(4));
        let ctx = context(
            &uniforms,
            vec![
                ("stream_audio_texture", &CURRENT[..]),
                ("audio_history_texture", &HISTORY[..]),
            ],
        );
        let mut out = targets();
        echo_effect(&ctx, &mut out);
        assert_eq!(out.target(0).unwrap(), &CURRENT);
    }

    #[test]
    fn filter_convolves_taps_with_history() {
        let mut uniforms = HashMap::new();
        uniforms.insert("num_taps".to_string(), ParamValue::Int(2));
        let b = [0.5, 0.25];
        let ctx = context(
            &uniforms,
            vec![
                ("b_coeff_texture", &b[..]),
                ("audio_history_texture", &HISTORY[..]),
            ],
        );
        let mut out = targets();
        frequency_filter(&ctx, &mut out);
        assert_eq!(out.target(0).unwrap(), &[5.5, 12.5, 16.0, 27.5]);
    }

    #[test]
    fn filter_taps_are_capped_by_the_coefficients() {
        let mut uniforms = HashMap::new();
        uniforms.insert("num_taps".to_string(), ParamValue::Int(9));
        let b = [1.0];
        let ctx = context(
            &uniforms,
            vec![
                ("b_coeff_texture", &b[..]),
                ("audio_history_texture", &HISTORY[..]),
            ],
        );
        let mut out = targets();
        frequency_filter(&ctx, &mut out);
        assert_eq!(out.target(0).unwrap(), &CURRENT);
    }

    #[test]
    fn unbound_target_is_skipped() {
        let uniforms = HashMap::new();
        let ctx = context(&uniforms, Vec::new());
        let mut out = KernelTargets { slots: vec![None] };
        constant_generator(&ctx, &mut out);
        assert!(out.target(0).is_none());
    }
}
