//! Emits one value on every sample.

use sw_gpu::{paths, ShaderSource};
use sw_ir::ConnectionRole;

use super::load_program;
use crate::error::Result;
use crate::parameter::Parameter;
use crate::stage::{RenderStage, StageConfig};

pub const VALUE: &str = "value";

pub fn constant(config: StageConfig, shaders: &dyn ShaderSource, value: f32) -> Result<RenderStage> {
    let mut stage = RenderStage::new(
        "constant",
        config,
        load_program(shaders, paths::CONSTANT_GENERATOR)?,
    )?;
    stage.add_parameter(Parameter::uniform(VALUE, ConnectionRole::Input, value)?)?;
    Ok(stage)
}
