//! Terminal stage that reads its output back to host memory.

use sw_gpu::{paths, ShaderSource};
use sw_ir::AudioBuffer;

use super::load_program;
use crate::error::Result;
use crate::stage::{RenderStage, StageConfig, StageKind};

pub fn final_stage(config: StageConfig, shaders: &dyn ShaderSource) -> Result<RenderStage> {
    let mut stage = RenderStage::new("final", config, load_program(shaders, paths::FINAL_RENDER)?)?;
    // `RenderStage::new` has validated both against the `u16` range.
    stage.set_kind(StageKind::Final(AudioBuffer::new(
        config.channels as u16,
        config.frames_per_buffer as u16,
    )));
    Ok(stage)
}
