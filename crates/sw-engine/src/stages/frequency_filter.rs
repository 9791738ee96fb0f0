//! FIR band filter with a resonant peak at the low-pass cutoff.
//!
//! The pass band runs from `high_pass` to `low_pass` (both in Hz). The
//! coefficients are Hamming-windowed sinc kernels, recomputed on the host
//! whenever a cutoff, the resonance or the follower-driven cutoff shift
//! changes, and uploaded as `b_coeff_texture` (one row, `num_taps` wide).
//! The kernel convolves them with the stage's history texture.

use std::f32::consts::{PI, TAU};

use sw_gpu::{paths, GpuBackend, ShaderSource};
use sw_ir::{ConnectionRole, ParamValue};

use super::load_program_with;
use crate::error::Result;
use crate::history::AudioHistory;
use crate::parameter::{Parameter, TextureSpec};
use crate::stage::{set_parameter, ParameterMap, RenderStage, StageConfig, StageKind};

/// Upper edge of the pass band, Hz.
pub const LOW_PASS: &str = "low_pass";
/// Lower edge of the pass band, Hz. Zero makes a plain low-pass.
pub const HIGH_PASS: &str = "high_pass";
/// Extra gain at the low-pass cutoff, 0 for none.
pub const RESONANCE: &str = "resonance";
/// How far the input level pushes the low-pass cutoff up.
pub const FILTER_FOLLOWER: &str = "filter_follower";
pub const NUM_TAPS: &str = "num_taps";
pub const B_COEFF_TEXTURE: &str = "b_coeff_texture";

/// Taps of the built-in filter. Odd, so the kernel has a center tap.
pub const DEFAULT_TAPS: u32 = 63;

/// Inputs the current coefficients were computed from.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FilterDesign {
    pub low_pass: f32,
    pub high_pass: f32,
    pub resonance: f32,
}

/// Host-side state of a frequency filter stage.
#[derive(Debug)]
pub(crate) struct FrequencyFilter {
    pub history: AudioHistory,
    pub taps: usize,
    pub sample_rate: u32,
    design: Option<FilterDesign>,
}

impl FrequencyFilter {
    /// Take the new stream frame and refresh the coefficients if the
    /// design moved.
    pub fn before_draw(
        &mut self,
        parameters: &mut ParameterMap,
        gpu: &mut dyn GpuBackend,
        time: u32,
    ) -> Result<()> {
        if !self.history.capture(parameters, gpu, time)? {
            return Ok(());
        }
        let design = {
            let float = |name: &str| {
                parameters
                    .get(name)
                    .and_then(Parameter::value)
                    .and_then(ParamValue::as_float)
                    .unwrap_or(0.0)
            };
            let follower = float(FILTER_FOLLOWER);
            FilterDesign {
                low_pass: float(LOW_PASS) * (1.0 + follower * self.level()),
                high_pass: float(HIGH_PASS),
                resonance: float(RESONANCE),
            }
        };
        if let Some(coefficients) = self.redesign(design) {
            set_parameter(parameters, B_COEFF_TEXTURE, coefficients)?;
        }
        Ok(())
    }

    /// New coefficients when `design` differs from the uploaded one.
    pub fn redesign(&mut self, design: FilterDesign) -> Option<ParamValue> {
        if self.design == Some(design) {
            return None;
        }
        self.design = Some(design);
        Some(ParamValue::FloatArray(fir_coefficients(
            design,
            self.sample_rate,
            self.taps,
        )))
    }

    /// Forget the uploaded design so the next frame recomputes it.
    pub fn reset(&mut self) {
        self.history.clear();
        self.design = None;
    }

    /// Mean absolute level of the newest frame.
    pub fn level(&self) -> f32 {
        let frames = self.history.frames();
        let channels = self.history.channels();
        if frames == 0 || channels == 0 {
            return 0.0;
        }
        let sum: f32 = (0..channels)
            .flat_map(|ch| (0..frames).map(move |age| (ch, age)))
            .map(|(ch, age)| self.history.sample(ch, age).abs())
            .sum();
        sum / (frames * channels) as f32
    }
}

/// Windowed-sinc low-pass with unity gain at DC. `cutoff` is in cycles
/// per sample, at most 0.5.
fn low_pass_kernel(cutoff: f32, window: &[f32]) -> Vec<f32> {
    let center = (window.len() as f32 - 1.0) / 2.0;
    let mut h: Vec<f32> = window
        .iter()
        .enumerate()
        .map(|(n, w)| {
            let t = n as f32 - center;
            let sinc = if t == 0.0 {
                2.0 * cutoff
            } else {
                (TAU * cutoff * t).sin() / (PI * t)
            };
            sinc * w
        })
        .collect();
    let sum: f32 = h.iter().sum();
    if sum.abs() > f32::EPSILON {
        for c in &mut h {
            *c /= sum;
        }
    }
    h
}

/// Coefficients passing `high_pass..low_pass` with a resonant bump of
/// height `resonance` at `low_pass`.
pub fn fir_coefficients(design: FilterDesign, sample_rate: u32, taps: usize) -> Vec<f32> {
    let nyquist = sample_rate.max(1) as f32 / 2.0;
    let norm = |hz: f32| hz.clamp(0.0, nyquist) / sample_rate.max(1) as f32;
    let denom = (taps.max(2) - 1) as f32;
    let window: Vec<f32> = (0..taps)
        .map(|n| 0.54 - 0.46 * (TAU * n as f32 / denom).cos())
        .collect();
    let upper = norm(design.low_pass);
    let lower = norm(design.high_pass);
    let mut b = low_pass_kernel(upper, &window);
    if lower > 0.0 {
        let below = low_pass_kernel(lower, &window);
        for (c, l) in b.iter_mut().zip(below) {
            *c -= l;
        }
    }
    if design.resonance > 0.0 {
        let center = (taps as f32 - 1.0) / 2.0;
        let weight: f32 = window.iter().sum();
        let scale = 2.0 * design.resonance / weight.max(f32::EPSILON);
        for (n, (c, w)) in b.iter_mut().zip(&window).enumerate() {
            *c += scale * w * (TAU * upper * (n as f32 - center)).cos();
        }
    }
    b
}

/// Low-pass at a quarter of the sample rate, no resonance.
pub fn frequency_filter(config: StageConfig, shaders: &dyn ShaderSource) -> Result<RenderStage> {
    let program =
        load_program_with(shaders, paths::HISTORY_IMPORTS, paths::FREQUENCY_FILTER_EFFECT)?;
    let mut stage = RenderStage::new("filter", config, program)?;
    let taps = DEFAULT_TAPS as usize;
    let low_pass = config.sample_rate as f32 / 4.0;
    stage.add_parameter(Parameter::uniform(LOW_PASS, ConnectionRole::Input, low_pass)?)?;
    stage.add_parameter(Parameter::uniform(HIGH_PASS, ConnectionRole::Input, 0.0f32)?)?;
    stage.add_parameter(Parameter::uniform(RESONANCE, ConnectionRole::Input, 0.0f32)?)?;
    stage.add_parameter(Parameter::uniform(FILTER_FOLLOWER, ConnectionRole::Input, 0.0f32)?)?;
    stage.add_parameter(Parameter::uniform(
        NUM_TAPS,
        ConnectionRole::Input,
        DEFAULT_TAPS as i32,
    )?)?;
    stage.add_parameter(Parameter::texture(
        B_COEFF_TEXTURE,
        ConnectionRole::Input,
        TextureSpec::new(DEFAULT_TAPS, 1),
    )?)?;
    let buffers = (DEFAULT_TAPS - 1).div_ceil(config.frames_per_buffer) + 1;
    let history = AudioHistory::new(&config, buffers);
    stage.add_parameter(history.parameter()?)?;
    stage.set_kind(StageKind::Filter(Box::new(FrequencyFilter {
        history,
        taps,
        sample_rate: config.sample_rate,
        design: None,
    })));
    Ok(stage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::AUDIO_HISTORY_TEXTURE;
    use crate::stage::names;
    use crate::stages::constant;
    use crate::stages::testing::render;
    use sw_gpu::{builtin_shaders, SoftwareBackend};

    fn dc_config() -> StageConfig {
        StageConfig {
            frames_per_buffer: 4,
            sample_rate: 64,
            channels: 2,
        }
    }

    struct Chain {
        gpu: SoftwareBackend,
        src: RenderStage,
        filter: RenderStage,
    }

    /// constant(1.0) -> filter, initialized.
    fn dc_chain() -> Chain {
        let lib = builtin_shaders();
        let mut gpu = SoftwareBackend::new();
        let mut src = constant(dc_config(), &lib, 1.0).unwrap();
        let mut filter = frequency_filter(dc_config(), &lib).unwrap();
        src.connect_render_stage(&mut filter).unwrap();
        src.initialize(&mut gpu).unwrap();
        filter.initialize(&mut gpu).unwrap();
        Chain { gpu, src, filter }
    }

    impl Chain {
        /// Render frames `from..to` and return the last output.
        fn run(&mut self, from: u32, to: u32) -> Vec<f32> {
            for time in from..to {
                render(&mut self.gpu, &mut [&mut self.src, &mut self.filter], time);
            }
            self.filter
                .read_parameter(&mut self.gpu, names::OUTPUT_AUDIO_TEXTURE)
                .unwrap()
        }

        fn set(&mut self, name: &str, value: f32) {
            let p = self.filter.find_parameter_mut(name).unwrap();
            p.set_value(value).unwrap();
        }
    }

    fn all_near(samples: &[f32], expected: f32) -> bool {
        samples.iter().all(|s| (s - expected).abs() < 1e-4)
    }

    #[test]
    fn low_pass_settles_on_dc_and_band_pass_removes_it() {
        let mut chain = dc_chain();
        let first = chain.run(0, 1);
        assert!(first.iter().all(|&s| s < 0.5), "{first:?}");
        assert!(all_near(&chain.run(1, 20), 1.0));

        chain.set(HIGH_PASS, 8.0);
        assert!(all_near(&chain.run(20, 21), 0.0));
    }

    #[test]
    fn follower_opens_the_cutoff_with_input_level() {
        let mut chain = dc_chain();
        chain.set(FILTER_FOLLOWER, 1.0);
        chain.run(0, 1);
        let b = chain.filter.find_parameter(B_COEFF_TEXTURE).unwrap();
        let b = b.value().and_then(|v| v.as_floats()).unwrap();
        // Level 1.0 doubles the cutoff to Nyquist: a pass-through kernel.
        let center = b.len() / 2;
        assert!((b[center] - 1.0).abs() < 1e-4);
        assert!(b
            .iter()
            .enumerate()
            .all(|(n, c)| n == center || c.abs() < 1e-4));
    }

    #[test]
    fn disconnect_clears_history() {
        let mut chain = dc_chain();
        chain.run(0, 20);
        chain.src.disconnect_render_stage(&mut chain.filter).unwrap();

        let StageKind::Filter(filter) = chain.filter.kind() else {
            panic!("filter stage");
        };
        assert_eq!(filter.history.sample(0, 0), 0.0);
        assert_eq!(filter.level(), 0.0);
        let texels = chain
            .filter
            .find_parameter(AUDIO_HISTORY_TEXTURE)
            .unwrap()
            .value()
            .and_then(|v| v.as_floats())
            .unwrap();
        assert!(texels.iter().all(|&s| s == 0.0));

        // Reconnected, the filter starts over as on its first frame.
        chain.src.connect_render_stage(&mut chain.filter).unwrap();
        let restarted = chain.run(20, 21);
        let fresh = dc_chain().run(0, 1);
        assert_eq!(restarted, fresh);
    }

    fn design(low_pass: f32, high_pass: f32, resonance: f32) -> FilterDesign {
        FilterDesign {
            low_pass,
            high_pass,
            resonance,
        }
    }

    /// Gain of `b` for a sinusoid at `hz`.
    fn response(b: &[f32], hz: f32, sample_rate: f32) -> f32 {
        let w = TAU * hz / sample_rate;
        let (re, im) = b.iter().enumerate().fold((0.0f32, 0.0f32), |(re, im), (n, c)| {
            (re + c * (w * n as f32).cos(), im - c * (w * n as f32).sin())
        });
        (re * re + im * im).sqrt()
    }

    #[test]
    fn low_pass_keeps_dc_and_cuts_high_tones() {
        let b = fir_coefficients(design(1_000.0, 0.0, 0.0), 16_000, 63);
        assert_eq!(b.len(), 63);
        assert!((b.iter().sum::<f32>() - 1.0).abs() < 1e-4);
        assert!(response(&b, 6_000.0, 16_000.0) < 0.01);
    }

    #[test]
    fn band_pass_rejects_dc() {
        let b = fir_coefficients(design(4_000.0, 1_000.0, 0.0), 16_000, 63);
        assert!(b.iter().sum::<f32>().abs() < 1e-4);
        assert!((response(&b, 2_500.0, 16_000.0) - 1.0).abs() < 0.05);
    }

    #[test]
    fn resonance_lifts_the_cutoff() {
        let plain = fir_coefficients(design(2_000.0, 0.0, 0.0), 16_000, 63);
        let peaked = fir_coefficients(design(2_000.0, 0.0, 0.8), 16_000, 63);
        assert!(response(&peaked, 2_000.0, 16_000.0) > response(&plain, 2_000.0, 16_000.0) + 0.5);
    }

    #[test]
    fn redesign_only_on_change() {
        let config = StageConfig::default();
        let mut filter = FrequencyFilter {
            history: AudioHistory::new(&config, 2),
            taps: 15,
            sample_rate: config.sample_rate,
            design: None,
        };
        let d = design(1_000.0, 0.0, 0.0);
        assert!(filter.redesign(d).is_some());
        assert!(filter.redesign(d).is_none());
        assert!(filter.redesign(design(2_000.0, 0.0, 0.0)).is_some());
        filter.reset();
        assert!(filter.redesign(design(2_000.0, 0.0, 0.0)).is_some());
    }

    #[test]
    fn history_covers_every_tap() {
        let config = StageConfig {
            frames_per_buffer: 16,
            sample_rate: 64,
            channels: 2,
        };
        let stage = frequency_filter(config, &builtin_shaders()).unwrap();
        let spec = *stage
            .find_parameter(crate::history::AUDIO_HISTORY_TEXTURE)
            .unwrap()
            .texture_spec()
            .unwrap();
        // 62 past samples need four frames, plus the current one.
        assert_eq!((spec.width, spec.height), (16, 10));
        let coeffs = stage.find_parameter(B_COEFF_TEXTURE).unwrap();
        assert_eq!(coeffs.texture_spec().unwrap().width, DEFAULT_TAPS);
    }
}
