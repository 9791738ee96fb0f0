//! Sums several producers into one stream.
//!
//! The base stream parameter is replaced by a pool of
//! `stream_audio_texture_{i}` slots. Each connection claims the lowest free
//! slot; disconnecting returns it to the pool.

use sw_gpu::{paths, ShaderSource};
use sw_ir::ConnectionRole;

use super::load_program;
use crate::error::{param_name, Error, Result};
use crate::parameter::Parameter;
use crate::stage::{names, JoinSlots, RenderStage, StageConfig, StageKind};

/// Slots declared by the built-in join shader.
pub const MAX_TRACKS: usize = 8;

pub const NUM_TRACKS: &str = "num_tracks";

pub fn multitrack_join(
    config: StageConfig,
    shaders: &dyn ShaderSource,
    tracks: usize,
) -> Result<RenderStage> {
    if tracks == 0 || tracks > MAX_TRACKS {
        return Err(Error::TrackCount {
            requested: tracks,
            max: MAX_TRACKS,
        });
    }
    let mut stage = RenderStage::new(
        "multitrack_join",
        config,
        load_program(shaders, paths::MULTITRACK_JOIN)?,
    )?;
    stage.remove_parameter(names::STREAM_AUDIO_TEXTURE)?;

    let mut slots = Vec::with_capacity(tracks);
    for i in 0..tracks {
        let name = format!("{}_{}", names::STREAM_AUDIO_TEXTURE, i);
        stage.add_parameter(Parameter::texture(
            &name,
            ConnectionRole::Passthrough,
            config.texture(),
        )?)?;
        slots.push(param_name(&name)?);
    }
    stage.add_parameter(Parameter::uniform(
        NUM_TRACKS,
        ConnectionRole::Initialization,
        tracks as i32,
    )?)?;
    stage.set_kind(StageKind::Join(JoinSlots::new(slots)));
    Ok(stage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::constant;
    use sw_gpu::builtin_shaders;

    #[test]
    fn track_count_is_bounded() {
        let lib = builtin_shaders();
        let config = StageConfig::default();
        assert!(matches!(
            multitrack_join(config, &lib, 0),
            Err(Error::TrackCount { .. })
        ));
        assert!(multitrack_join(config, &lib, MAX_TRACKS + 1).is_err());
        let join = multitrack_join(config, &lib, MAX_TRACKS).unwrap();
        assert!(join.find_parameter(names::STREAM_AUDIO_TEXTURE).is_none());
        assert!(join.find_parameter("stream_audio_texture_7").is_some());
    }

    #[test]
    fn slots_are_claimed_lowest_first_and_recycled() {
        let lib = builtin_shaders();
        let config = StageConfig::default();
        let mut join = multitrack_join(config, &lib, 2).unwrap();
        let mut a = constant(config, &lib, 0.1).unwrap();
        let mut b = constant(config, &lib, 0.2).unwrap();
        let mut c = constant(config, &lib, 0.3).unwrap();

        assert_eq!(join.stream_interface()[0].as_str(), "stream_audio_texture_0");
        a.connect_render_stage(&mut join).unwrap();
        assert_eq!(join.stream_interface()[0].as_str(), "stream_audio_texture_1");
        b.connect_render_stage(&mut join).unwrap();
        assert!(join.stream_interface().is_empty());
        assert!(!join.has_free_stream());

        // Full: the interfaces no longer line up.
        assert!(c.connect_render_stage(&mut join).is_err());

        a.disconnect_render_stage(&mut join).unwrap();
        assert_eq!(join.stream_interface()[0].as_str(), "stream_audio_texture_0");
        c.connect_render_stage(&mut join).unwrap();
        assert_eq!(join.producers().len(), 2);
    }
}
