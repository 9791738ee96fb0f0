//! Record a stream onto a host tape and play a tape back into a graph.

use sw_gpu::{paths, GpuBackend, ShaderSource};
use sw_ir::{ConnectionRole, ParamValue};

use super::load_program;
use crate::error::{Error, Result};
use crate::parameter::Parameter;
use crate::stage::{read_stream, set_parameter, ParameterMap, RenderStage, StageConfig, StageKind};
use crate::tape::Tape;

/// Frame index the next recorded frame lands on. Advances while recording.
pub const RECORD_POSITION: &str = "record_position";
pub const RECORDING: &str = "recording";
/// Frame of the tape played this render.
pub const TAPE_AUDIO_TEXTURE: &str = "tape_audio_texture";

fn int(parameters: &ParameterMap, name: &str) -> i32 {
    parameters
        .get(name)
        .and_then(Parameter::value)
        .and_then(ParamValue::as_int)
        .unwrap_or(0)
}

/// Host side of a recording stage.
#[derive(Debug)]
pub(crate) struct TapeRecorder {
    tape: Tape,
    scratch: Vec<f32>,
    last_time: Option<u32>,
}

impl TapeRecorder {
    pub fn before_draw(
        &mut self,
        parameters: &mut ParameterMap,
        gpu: &mut dyn GpuBackend,
        time: u32,
    ) -> Result<()> {
        if self.last_time == Some(time) {
            return Ok(());
        }
        self.last_time = Some(time);
        if int(parameters, RECORDING) == 0 {
            return Ok(());
        }
        let position = int(parameters, RECORD_POSITION).max(0);
        read_stream(parameters, gpu, &mut self.scratch)?;
        self.tape.record(&self.scratch, position as usize);
        set_parameter(parameters, RECORD_POSITION, position.saturating_add(1))?;
        tracing::trace!(position, "frame recorded");
        Ok(())
    }
}

/// Host side of a playback stage.
#[derive(Debug, Default)]
pub(crate) struct TapePlayer {
    tape: Option<Tape>,
    /// Next frame to play; `None` when stopped.
    cursor: Option<usize>,
    last_time: Option<u32>,
}

impl TapePlayer {
    pub fn before_draw(&mut self, parameters: &mut ParameterMap, time: u32) -> Result<()> {
        if self.last_time == Some(time) {
            return Ok(());
        }
        self.last_time = Some(time);
        let Some(position) = self.cursor else {
            return Ok(());
        };
        match &self.tape {
            Some(tape) if position < tape.frames() => {
                let len = parameters
                    .get(TAPE_AUDIO_TEXTURE)
                    .and_then(Parameter::texture_spec)
                    .map_or(0, |spec| (spec.width * spec.height) as usize);
                let mut frame = vec![0.0; len];
                tape.playback(position, &mut frame);
                set_parameter(parameters, TAPE_AUDIO_TEXTURE, frame)?;
                self.cursor = Some(position + 1);
            }
            _ => {
                tracing::debug!(position, "tape ended");
                self.cursor = None;
                silence(parameters);
            }
        }
        Ok(())
    }
}

fn silence(parameters: &mut ParameterMap) {
    if let Some(texture) = parameters.get_mut(TAPE_AUDIO_TEXTURE) {
        texture.clear_value();
    }
}

fn position_value(position: u32) -> i32 {
    i32::try_from(position).unwrap_or(i32::MAX)
}

/// Passes its stream through and, while recording, copies every frame
/// onto its tape.
pub fn record_stage(config: StageConfig, shaders: &dyn ShaderSource) -> Result<RenderStage> {
    let mut stage = RenderStage::new("record", config, load_program(shaders, paths::TAPE_RECORD)?)?;
    stage.add_parameter(Parameter::uniform(RECORD_POSITION, ConnectionRole::Input, 0i32)?)?;
    stage.add_parameter(Parameter::uniform(RECORDING, ConnectionRole::Input, false)?)?;
    stage.set_kind(StageKind::Record(TapeRecorder {
        tape: Tape::new(&config),
        scratch: vec![0.0; (config.frames_per_buffer * config.channels) as usize],
        last_time: None,
    }));
    Ok(stage)
}

/// Outputs one frame of a loaded tape per render while playing, silence
/// otherwise.
pub fn playback_stage(config: StageConfig, shaders: &dyn ShaderSource) -> Result<RenderStage> {
    let mut stage =
        RenderStage::new("playback", config, load_program(shaders, paths::TAPE_PLAYBACK)?)?;
    stage.add_parameter(Parameter::texture(
        TAPE_AUDIO_TEXTURE,
        ConnectionRole::Input,
        config.texture(),
    )?)?;
    stage.set_kind(StageKind::Playback(TapePlayer::default()));
    Ok(stage)
}

/// Transport of the record and playback stages.
impl RenderStage {
    /// Start recording at frame `position`.
    pub fn record(&mut self, position: u32) -> Result<()> {
        let gid = self.gid();
        let (kind, parameters) = self.kind_and_parameters_mut();
        let StageKind::Record(_) = kind else {
            return Err(Error::NotATape(gid));
        };
        set_parameter(parameters, RECORD_POSITION, position_value(position))?;
        set_parameter(parameters, RECORDING, true)?;
        tracing::debug!(stage = %gid, position, "recording");
        Ok(())
    }

    pub fn is_recording(&self) -> bool {
        matches!(self.kind(), StageKind::Record(_))
            && self
                .find_parameter(RECORDING)
                .and_then(Parameter::value)
                .and_then(ParamValue::as_int)
                .is_some_and(|r| r != 0)
    }

    /// Hand a tape to a playback stage. Playback stops.
    pub fn load_tape(&mut self, tape: Tape) -> Result<()> {
        let gid = self.gid();
        let (kind, parameters) = self.kind_and_parameters_mut();
        let StageKind::Playback(player) = kind else {
            return Err(Error::NotATape(gid));
        };
        player.tape = Some(tape);
        player.cursor = None;
        silence(parameters);
        Ok(())
    }

    /// Play the loaded tape from frame `position`, one frame per render.
    pub fn play(&mut self, position: u32) -> Result<()> {
        let gid = self.gid();
        let StageKind::Playback(player) = self.kind_and_parameters_mut().0 else {
            return Err(Error::NotATape(gid));
        };
        player.cursor = Some(position as usize);
        tracing::debug!(stage = %gid, position, "playing");
        Ok(())
    }

    pub fn is_playing(&self) -> bool {
        match self.kind() {
            StageKind::Playback(player) => match (&player.tape, player.cursor) {
                (Some(tape), Some(position)) => position < tape.frames(),
                _ => false,
            },
            _ => false,
        }
    }

    /// Stop recording or playing.
    pub fn stop(&mut self) -> Result<()> {
        let gid = self.gid();
        let (kind, parameters) = self.kind_and_parameters_mut();
        match kind {
            StageKind::Record(_) => set_parameter(parameters, RECORDING, false),
            StageKind::Playback(player) => {
                player.cursor = None;
                silence(parameters);
                Ok(())
            }
            _ => Err(Error::NotATape(gid)),
        }
    }

    /// Tape recorded by, or loaded into, this stage.
    pub fn tape(&self) -> Option<&Tape> {
        match self.kind() {
            StageKind::Record(recorder) => Some(&recorder.tape),
            StageKind::Playback(player) => player.tape.as_ref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::names;
    use crate::stages::constant;
    use crate::stages::testing::{config, render};
    use sw_gpu::{builtin_shaders, SoftwareBackend};

    #[test]
    fn recorder_copies_frames_while_recording() {
        let lib = builtin_shaders();
        let mut gpu = SoftwareBackend::new();
        let mut src = constant(config(), &lib, 0.5).unwrap();
        let mut rec = record_stage(config(), &lib).unwrap();
        src.connect_render_stage(&mut rec).unwrap();
        src.initialize(&mut gpu).unwrap();
        rec.initialize(&mut gpu).unwrap();

        render(&mut gpu, &mut [&mut src, &mut rec], 0);
        assert!(rec.tape().unwrap().is_empty());

        rec.record(2).unwrap();
        assert!(rec.is_recording());
        render(&mut gpu, &mut [&mut src, &mut rec], 1);
        render(&mut gpu, &mut [&mut src, &mut rec], 1);
        render(&mut gpu, &mut [&mut src, &mut rec], 2);
        rec.stop().unwrap();
        assert!(!rec.is_recording());
        render(&mut gpu, &mut [&mut src, &mut rec], 3);

        let tape = rec.tape().unwrap();
        assert_eq!(tape.frames(), 4);
        let left = tape.channel(0).unwrap();
        assert!(left[..8].iter().all(|&s| s == 0.0));
        assert!(left[8..].iter().all(|&s| s == 0.5));
        let position = rec.find_parameter(RECORD_POSITION).unwrap().value().unwrap();
        assert_eq!(position.as_int(), Some(4));

        // Recording passes the stream through.
        let out = rec.read_parameter(&mut gpu, names::OUTPUT_AUDIO_TEXTURE).unwrap();
        assert!(out.iter().all(|&s| s == 0.5));
        src.release(&mut gpu);
        rec.release(&mut gpu);
    }

    #[test]
    fn player_plays_tape_then_falls_silent() {
        let lib = builtin_shaders();
        let mut gpu = SoftwareBackend::new();
        let mut tape = Tape::new(&config());
        tape.record(&[1.0; 8], 0);
        tape.record(&[2.0; 8], 1);
        let mut player = playback_stage(config(), &lib).unwrap();
        player.initialize(&mut gpu).unwrap();
        player.load_tape(tape).unwrap();
        assert!(!player.is_playing());
        player.play(1).unwrap();
        assert!(player.is_playing());

        let mut frame = |player: &mut RenderStage, time| {
            render(&mut gpu, &mut [&mut *player], time);
            player
                .read_parameter(&mut gpu, names::OUTPUT_AUDIO_TEXTURE)
                .unwrap()
        };
        assert!(frame(&mut player, 0).iter().all(|&s| s == 2.0));
        assert!(!player.is_playing());
        assert!(frame(&mut player, 1).iter().all(|&s| s == 0.0));

        player.play(0).unwrap();
        assert!(frame(&mut player, 2).iter().all(|&s| s == 1.0));
        player.stop().unwrap();
        assert!(frame(&mut player, 3).iter().all(|&s| s == 0.0));
        player.release(&mut gpu);
    }

    #[test]
    fn transport_needs_a_tape_stage() {
        let mut stage = constant(config(), &builtin_shaders(), 0.0).unwrap();
        assert!(matches!(stage.record(0), Err(Error::NotATape(_))));
        assert!(matches!(stage.play(0), Err(Error::NotATape(_))));
        assert!(matches!(stage.stop(), Err(Error::NotATape(_))));
        assert!(stage.tape().is_none());
        assert!(!stage.is_playing());
    }
}
