//! Multi-tap echo over the stream input.
//!
//! Each echo `k` (1-based) replays the input `k * delay` seconds late,
//! scaled by `decay^k`. Past input comes from the stage's history texture.

use sw_gpu::{paths, ShaderSource};
use sw_ir::ConnectionRole;

use super::load_program_with;
use crate::error::Result;
use crate::history::AudioHistory;
use crate::parameter::Parameter;
use crate::stage::{RenderStage, StageConfig, StageKind};

pub const NUM_ECHOS: &str = "num_echos";
/// Seconds between echoes.
pub const DELAY: &str = "delay";
/// Gain applied once per echo.
pub const DECAY: &str = "decay";

/// Seconds of input the history keeps.
pub const MAX_ECHO_SECONDS: f32 = 2.0;

/// Frames of history needed to reach back [`MAX_ECHO_SECONDS`].
fn history_buffers(config: &StageConfig) -> u32 {
    let samples = (MAX_ECHO_SECONDS * config.sample_rate as f32).ceil() as u32;
    samples.div_ceil(config.frames_per_buffer) + 1
}

/// Five echoes, half a second apart, each half as loud as the last.
pub fn echo_effect(config: StageConfig, shaders: &dyn ShaderSource) -> Result<RenderStage> {
    let program = load_program_with(shaders, paths::HISTORY_IMPORTS, paths::ECHO_EFFECT)?;
    let mut stage = RenderStage::new("echo", config, program)?;
    stage.add_parameter(Parameter::uniform(NUM_ECHOS, ConnectionRole::Input, 5i32)?)?;
    stage.add_parameter(Parameter::uniform(DELAY, ConnectionRole::Input, 0.5f32)?)?;
    stage.add_parameter(Parameter::uniform(DECAY, ConnectionRole::Input, 0.5f32)?)?;
    let history = AudioHistory::new(&config, history_buffers(&config));
    stage.add_parameter(history.parameter()?)?;
    stage.set_kind(StageKind::Echo(history));
    Ok(stage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::AUDIO_HISTORY_TEXTURE;
    use crate::parameter::ParameterKind;
    use crate::stage::names;
    use crate::stages::constant;
    use crate::stages::testing::{config, render};
    use sw_gpu::{builtin_shaders, SoftwareBackend};
    use sw_ir::ParamValue;

    /// One-frame delay, two echoes.
    fn echo() -> RenderStage {
        let mut stage = echo_effect(config(), &builtin_shaders()).unwrap();
        for (name, value) in [(NUM_ECHOS, ParamValue::Int(2)), (DELAY, ParamValue::Float(0.5))] {
            stage.find_parameter_mut(name).unwrap().set_value(value).unwrap();
        }
        stage
    }

    fn output(gpu: &mut SoftwareBackend, stage: &RenderStage) -> Vec<f32> {
        stage
            .read_parameter(gpu, names::OUTPUT_AUDIO_TEXTURE)
            .unwrap()
    }

    #[test]
    fn echoes_build_up_frame_by_frame() {
        let mut gpu = SoftwareBackend::new();
        let mut src = constant(config(), &builtin_shaders(), 1.0).unwrap();
        let mut fx = echo();
        src.connect_render_stage(&mut fx).unwrap();
        src.initialize(&mut gpu).unwrap();
        fx.initialize(&mut gpu).unwrap();

        let mut levels = Vec::new();
        for time in 0..4 {
            render(&mut gpu, &mut [&mut src, &mut fx], time);
            let out = output(&mut gpu, &fx);
            assert!(out.iter().all(|&s| s == out[0]), "frame {time}: {out:?}");
            levels.push(out[0]);
        }
        assert_eq!(levels, [1.0, 1.5, 1.75, 1.75]);
    }

    #[test]
    fn rerendering_a_frame_does_not_shift_history() {
        let mut gpu = SoftwareBackend::new();
        let mut src = constant(config(), &builtin_shaders(), 1.0).unwrap();
        let mut fx = echo();
        src.connect_render_stage(&mut fx).unwrap();
        src.initialize(&mut gpu).unwrap();
        fx.initialize(&mut gpu).unwrap();
        for _ in 0..3 {
            render(&mut gpu, &mut [&mut src, &mut fx], 0);
        }
        assert!(output(&mut gpu, &fx).iter().all(|&s| s == 1.0));
    }

    #[test]
    fn disconnect_clears_history() {
        let mut gpu = SoftwareBackend::new();
        let mut src = constant(config(), &builtin_shaders(), 1.0).unwrap();
        let mut fx = echo();
        src.connect_render_stage(&mut fx).unwrap();
        src.initialize(&mut gpu).unwrap();
        fx.initialize(&mut gpu).unwrap();
        for time in 0..3 {
            render(&mut gpu, &mut [&mut src, &mut fx], time);
        }

        src.disconnect_render_stage(&mut fx).unwrap();
        let texture = fx.find_parameter(AUDIO_HISTORY_TEXTURE).unwrap();
        let texels = texture.value().and_then(|v| v.as_floats()).unwrap();
        assert!(texels.iter().all(|&s| s == 0.0));

        src.connect_render_stage(&mut fx).unwrap();
        render(&mut gpu, &mut [&mut src, &mut fx], 3);
        assert!(output(&mut gpu, &fx).iter().all(|&s| s == 1.0));
    }

    #[test]
    fn history_reaches_back_two_seconds() {
        let config = StageConfig {
            frames_per_buffer: 16,
            sample_rate: 16,
            channels: 2,
        };
        assert_eq!(history_buffers(&config), 3);
        let stage = echo_effect(config, &builtin_shaders()).unwrap();
        let history = stage.find_parameter(AUDIO_HISTORY_TEXTURE).unwrap();
        let ParameterKind::Texture2D(spec) = history.kind() else {
            panic!("history is a texture");
        };
        assert_eq!((spec.width, spec.height), (16, 6));
        assert_eq!(history.role(), ConnectionRole::Input);
    }

    #[test]
    fn echo_defaults() {
        let stage = echo_effect(StageConfig::default(), &builtin_shaders()).unwrap();
        let int = |n| stage.find_parameter(n).unwrap().value().unwrap().as_int();
        let float = |n| stage.find_parameter(n).unwrap().value().unwrap().as_float();
        assert_eq!(int(NUM_ECHOS), Some(5));
        assert_eq!(float(DELAY), Some(0.5));
        assert_eq!(float(DECAY), Some(0.5));
        assert_eq!(stage.stream_interface().len(), 1);
    }
}
