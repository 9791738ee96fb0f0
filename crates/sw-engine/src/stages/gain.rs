//! Gain and stereo balance applied to the stream input.

use sw_gpu::{paths, ShaderSource};
use sw_ir::ConnectionRole;

use super::load_program;
use crate::error::Result;
use crate::parameter::Parameter;
use crate::stage::{RenderStage, StageConfig};

pub const GAIN: &str = "gain";
/// 0.0 is hard left, 0.5 center, 1.0 hard right.
pub const BALANCE: &str = "balance";

/// Unity gain, centered.
pub fn gain_effect(config: StageConfig, shaders: &dyn ShaderSource) -> Result<RenderStage> {
    let mut stage = RenderStage::new("gain", config, load_program(shaders, paths::GAIN_EFFECT)?)?;
    stage.add_parameter(Parameter::uniform(GAIN, ConnectionRole::Input, 1.0f32)?)?;
    stage.add_parameter(Parameter::uniform(BALANCE, ConnectionRole::Input, 0.5f32)?)?;
    Ok(stage)
}
