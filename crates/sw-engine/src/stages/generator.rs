//! Sine generator: a source stage driven by `tone` and `gain`.

use sw_gpu::{paths, ShaderSource};
use sw_ir::ConnectionRole;

use super::load_program;
use crate::error::{Error, Result};
use crate::parameter::Parameter;
use crate::stage::{RenderStage, StageConfig};

pub const TONE: &str = "tone";
pub const GAIN: &str = "gain";

/// A silent sine generator; call [`RenderStage::play_note`] to start it.
pub fn generator(config: StageConfig, shaders: &dyn ShaderSource) -> Result<RenderStage> {
    let mut stage = RenderStage::new(
        "generator",
        config,
        load_program(shaders, paths::SINE_GENERATOR)?,
    )?;
    stage.add_parameter(Parameter::uniform(TONE, ConnectionRole::Input, 0.0f32)?)?;
    stage.add_parameter(Parameter::uniform(GAIN, ConnectionRole::Input, 0.0f32)?)?;
    Ok(stage)
}

impl RenderStage {
    /// Set the generator's frequency in Hz and its amplitude.
    pub fn play_note(&mut self, tone: f32, gain: f32) -> Result<()> {
        self.set_float(TONE, tone)?;
        self.set_float(GAIN, gain)
    }

    /// Silence the generator.
    pub fn stop_note(&mut self) -> Result<()> {
        self.set_float(GAIN, 0.0)
    }

    fn set_float(&mut self, name: &str, value: f32) -> Result<()> {
        let gid = self.gid();
        self.find_parameter_mut(name)
            .ok_or_else(|| Error::ParameterNotFound {
                stage: gid,
                name: name.to_string(),
            })?
            .set_value(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sw_gpu::builtin_shaders;
    use sw_ir::ParamValue;

    #[test]
    fn play_and_stop_note() {
        let mut g = generator(StageConfig::default(), &builtin_shaders()).unwrap();
        g.play_note(440.0, 0.5).unwrap();
        assert_eq!(g.find_parameter(TONE).unwrap().value(), Some(&ParamValue::Float(440.0)));
        assert_eq!(g.find_parameter(GAIN).unwrap().value(), Some(&ParamValue::Float(0.5)));
        g.stop_note().unwrap();
        assert_eq!(g.find_parameter(GAIN).unwrap().value(), Some(&ParamValue::Float(0.0)));
        assert_eq!(g.find_parameter(TONE).unwrap().value(), Some(&ParamValue::Float(440.0)));
    }

    #[test]
    fn play_note_on_other_stage_fails() {
        let mut s = super::super::final_stage(StageConfig::default(), &builtin_shaders()).unwrap();
        assert!(matches!(
            s.play_note(440.0, 1.0),
            Err(Error::ParameterNotFound { .. })
        ));
    }
}
