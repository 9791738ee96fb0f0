//! Built-in render stages.
//!
//! Each constructor loads its shader from a [`ShaderSource`] (usually
//! [`sw_gpu::builtin_shaders`]) and adds the stage's own parameters on top
//! of the defaults every [`RenderStage`] carries.

pub mod constant;
pub mod echo;
mod final_stage;
pub mod frequency_filter;
pub mod gain;
pub mod generator;
pub mod multitrack_join;
pub mod tape;

pub use constant::constant;
pub use echo::echo_effect;
pub use final_stage::final_stage;
pub use frequency_filter::frequency_filter;
pub use gain::gain_effect;
pub use generator::generator;
pub use multitrack_join::{multitrack_join, MAX_TRACKS};
pub use tape::{playback_stage, record_stage};

use sw_gpu::{paths, ShaderProgramSource, ShaderSource};

use crate::error::Result;
use crate::stage::{RenderStage, StageConfig};

/// Load `fragment_path` with the standard vertex shader and fragment imports.
pub fn load_program(shaders: &dyn ShaderSource, fragment_path: &str) -> Result<ShaderProgramSource> {
    load_program_with(shaders, paths::FRAG_IMPORTS, fragment_path)
}

/// Load `fragment_path` on top of `imports`.
pub fn load_program_with(
    shaders: &dyn ShaderSource,
    imports: &[&str],
    fragment_path: &str,
) -> Result<ShaderProgramSource> {
    Ok(ShaderProgramSource::load(
        shaders,
        &[],
        paths::VERTEX,
        imports,
        fragment_path,
    )?)
}

/// A stage running `fragment_path` with only the default parameters.
pub fn custom(
    name: &str,
    config: StageConfig,
    shaders: &dyn ShaderSource,
    fragment_path: &str,
) -> Result<RenderStage> {
    RenderStage::new(name, config, load_program(shaders, fragment_path)?)
}

/// Create a built-in stage by name.
///
/// Returns `None` for names without a built-in implementation.
pub fn create_stage(
    name: &str,
    config: StageConfig,
    shaders: &dyn ShaderSource,
) -> Option<Result<RenderStage>> {
    Some(match name {
        "generator" | "sine" => generator(config, shaders),
        "constant" => constant(config, shaders, 0.0),
        "gain" => gain_effect(config, shaders),
        "echo" => echo_effect(config, shaders),
        "filter" => frequency_filter(config, shaders),
        "record" => record_stage(config, shaders),
        "playback" => playback_stage(config, shaders),
        "final" => final_stage(config, shaders),
        _ => return None,
    })
}


#[cfg(test)]
mod tests {
    use super::*;
    use sw_gpu::builtin_shaders;

    #[test]
    fn create_stage_knows_builtins() {
        let lib = builtin_shaders();
        let config = StageConfig::default();
        for name in [
            "generator", "constant", "gain", "echo", "filter", "record", "playback", "final",
        ] {
            let stage = create_stage(name, config, &lib).unwrap().unwrap();
            assert_eq!(stage.name(), name);
        }
        assert!(create_stage("reverb", config, &lib).is_none());
    }

    #[test]
    fn missing_shader_is_reported() {
        let lib = sw_gpu::MemorySource::new();
        let err = custom("x", StageConfig::default(), &lib, paths::FINAL_RENDER).unwrap_err();
        assert!(matches!(err, crate::Error::Shader(_)));
    }
}
