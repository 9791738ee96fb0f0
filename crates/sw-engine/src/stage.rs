//! One shader pass and its parameters.
//!
//! A [`RenderStage`] owns a program, a private framebuffer and a map of
//! [`Parameter`]s. Stages wire to each other by pairing the producer's
//! output interface with the consumer's stream interface; the graph owns
//! the stages and resolves the resulting links by id.

use std::collections::{BTreeMap, BTreeSet};

use sw_gpu::{FramebufferId, GpuBackend, ProgramId, ShaderProgramSource};
use sw_ir::{AudioBuffer, ConnectionRole, ParamName, ParamRef, ParamValue, StageId, MAX_CHANNELS};

use crate::error::{param_name, Error, InitError, LinkError, Result, StructureError};
use crate::history::{AudioHistory, AUDIO_HISTORY_TEXTURE};
use crate::parameter::{Parameter, ParameterKind, ParameterLookup, TextureSpec};
use crate::stages::frequency_filter::FrequencyFilter;
use crate::stages::tape::{TapePlayer, TapeRecorder};

/// Maximum color attachments a stage can draw to.
pub const MAX_DRAW_BUFFERS: usize = 8;

/// Names of the parameters every stage starts with.
pub mod names {
    pub const STREAM_AUDIO_TEXTURE: &str = "stream_audio_texture";
    pub const OUTPUT_AUDIO_TEXTURE: &str = "output_audio_texture";
    pub const BUFFER_SIZE: &str = "buffer_size";
    pub const NUM_CHANNELS: &str = "num_channels";
    pub const SAMPLE_RATE: &str = "sample_rate";
}

/// Audio dimensions shared by the stages of a graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StageConfig {
    pub frames_per_buffer: u32,
    pub sample_rate: u32,
    pub channels: u32,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            frames_per_buffer: 512,
            sample_rate: 44_100,
            channels: 2,
        }
    }
}

impl StageConfig {
    /// Check that one frame fits an [`AudioBuffer`].
    pub fn validate(&self) -> Result<()> {
        if self.frames_per_buffer == 0 || self.frames_per_buffer > u32::from(u16::MAX) {
            return Err(Error::InvalidConfig(format!(
                "frames_per_buffer must be in 1..={}, got {}",
                u16::MAX,
                self.frames_per_buffer
            )));
        }
        if self.channels == 0 || self.channels > u32::from(MAX_CHANNELS) {
            return Err(Error::InvalidConfig(format!(
                "channels must be in 1..={}, got {}",
                MAX_CHANNELS, self.channels
            )));
        }
        if self.sample_rate == 0 {
            return Err(Error::InvalidConfig("sample_rate must be positive".into()));
        }
        Ok(())
    }

    /// Texture shape of one audio frame.
    pub fn texture(&self) -> TextureSpec {
        TextureSpec::new(self.frames_per_buffer, self.channels)
    }
}

/// Initialization progress of a stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum StageState {
    Uninitialized,
    ShaderCompiled,
    FramebufferAllocated,
    ParametersInitialized,
    Initialized,
}

/// Pool of stream slots of a multitrack join.
#[derive(Debug)]
pub(crate) struct JoinSlots {
    slots: Vec<ParamName>,
    free: BTreeSet<usize>,
}

impl JoinSlots {
    pub(crate) fn new(slots: Vec<ParamName>) -> Self {
        let free = (0..slots.len()).collect();
        Self { slots, free }
    }
}

/// Stage-specific behavior layered on the common pass.
#[derive(Debug)]
pub(crate) enum StageKind {
    Plain,
    Join(JoinSlots),
    /// Reads the output texture back to host memory after every render.
    Final(AudioBuffer),
    /// Pushes each new stream frame into its history texture before drawing.
    Echo(AudioHistory),
    Filter(Box<FrequencyFilter>),
    Record(TapeRecorder),
    Playback(TapePlayer),
}

impl StageKind {
    fn clear_history(&mut self) -> bool {
        match self {
            StageKind::Echo(history) => history.clear(),
            StageKind::Filter(filter) => filter.reset(),
            _ => return false,
        }
        true
    }
}

/// Parameters of one stage, by name.
pub(crate) type ParameterMap = BTreeMap<ParamName, Parameter>;

/// Read this frame's stream input into `out`. An unfed stream reads as
/// silence.
pub(crate) fn read_stream(
    parameters: &ParameterMap,
    gpu: &mut dyn GpuBackend,
    out: &mut [f32],
) -> Result<()> {
    match parameters.get(names::STREAM_AUDIO_TEXTURE) {
        Some(stream) if stream.previous().is_some() => stream.read_back(gpu, out),
        _ => {
            out.fill(0.0);
            Ok(())
        }
    }
}

/// Replace the host value of `name` if the stage has it.
pub(crate) fn set_parameter(
    parameters: &mut ParameterMap,
    name: &str,
    value: impl Into<ParamValue>,
) -> Result<()> {
    match parameters.get_mut(name) {
        Some(parameter) => parameter.set_value(value),
        None => Ok(()),
    }
}

/// One GPU pass: program, framebuffer and parameters.
#[derive(Debug)]
pub struct RenderStage {
    gid: StageId,
    name: String,
    config: StageConfig,
    kind: StageKind,
    shader: ShaderProgramSource,
    parameters: ParameterMap,
    inputs: Vec<ParamName>,
    outputs: Vec<ParamName>,
    draw_buffers: heapless::Vec<Option<u32>, MAX_DRAW_BUFFERS>,
    texture_units: u32,
    state: StageState,
    program: Option<ProgramId>,
    framebuffer: Option<FramebufferId>,
    producers: BTreeSet<StageId>,
    consumers: BTreeSet<StageId>,
    time: u32,
}

impl RenderStage {
    /// Create a stage with the default stream, output and dimension
    /// parameters.
    pub fn new(
        name: impl Into<String>,
        config: StageConfig,
        shader: ShaderProgramSource,
    ) -> Result<Self> {
        config.validate()?;
        let mut stage = Self {
            gid: StageId::next(),
            name: name.into(),
            config,
            kind: StageKind::Plain,
            shader,
            parameters: BTreeMap::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            draw_buffers: heapless::Vec::new(),
            texture_units: 0,
            state: StageState::Uninitialized,
            program: None,
            framebuffer: None,
            producers: BTreeSet::new(),
            consumers: BTreeSet::new(),
            time: 0,
        };
        stage.add_default_parameters()?;
        Ok(stage)
    }

    fn add_default_parameters(&mut self) -> Result<()> {
        let texture = self.config.texture();
        self.add_parameter(Parameter::texture(
            names::STREAM_AUDIO_TEXTURE,
            ConnectionRole::Passthrough,
            texture,
        )?)?;
        self.add_parameter(Parameter::texture(
            names::OUTPUT_AUDIO_TEXTURE,
            ConnectionRole::Output,
            texture.with_attachment(0),
        )?)?;
        let dims = [
            (names::BUFFER_SIZE, self.config.frames_per_buffer),
            (names::NUM_CHANNELS, self.config.channels),
            (names::SAMPLE_RATE, self.config.sample_rate),
        ];
        for (name, value) in dims {
            self.add_parameter(Parameter::uniform(
                name,
                ConnectionRole::Initialization,
                value as i32,
            )?)?;
        }
        Ok(())
    }

    pub(crate) fn set_kind(&mut self, kind: StageKind) {
        self.kind = kind;
    }

    pub(crate) fn kind(&self) -> &StageKind {
        &self.kind
    }

    pub(crate) fn kind_and_parameters_mut(&mut self) -> (&mut StageKind, &mut ParameterMap) {
        (&mut self.kind, &mut self.parameters)
    }

    /// Stable numeric id.
    pub fn gid(&self) -> StageId {
        self.gid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &StageConfig {
        &self.config
    }

    pub fn shader(&self) -> &ShaderProgramSource {
        &self.shader
    }

    pub fn state(&self) -> StageState {
        self.state
    }

    pub fn is_initialized(&self) -> bool {
        self.state == StageState::Initialized
    }

    /// Time passed to the most recent render.
    pub fn time(&self) -> u32 {
        self.time
    }

    /// Stages feeding this stage's stream interface.
    pub fn producers(&self) -> &BTreeSet<StageId> {
        &self.producers
    }

    /// Stages fed by this stage's output interface.
    pub fn consumers(&self) -> &BTreeSet<StageId> {
        &self.consumers
    }

    /// Names of the non-output parameters, in insertion order.
    pub fn inputs(&self) -> &[ParamName] {
        &self.inputs
    }

    /// Names of the output parameters, in insertion order.
    pub fn outputs(&self) -> &[ParamName] {
        &self.outputs
    }

    /// Draw-buffer table: entry `i` is `Some(i)` when an output parameter
    /// holds color attachment `i`.
    pub fn draw_buffers(&self) -> &[Option<u32>] {
        &self.draw_buffers
    }

    pub fn parameters(&self) -> impl Iterator<Item = &Parameter> {
        self.parameters.values()
    }

    /// Host copy of the frame read back by a final stage.
    pub fn output_buffer(&self) -> Option<&AudioBuffer> {
        match &self.kind {
            StageKind::Final(buffer) => Some(buffer),
            _ => None,
        }
    }

    pub fn find_parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.get(name)
    }

    pub fn find_parameter_mut(&mut self, name: &str) -> Option<&mut Parameter> {
        self.parameters.get_mut(name)
    }

    fn parameter_or_err(&self, name: &str) -> Result<&Parameter> {
        self.parameters
            .get(name)
            .ok_or_else(|| Error::ParameterNotFound {
                stage: self.gid,
                name: name.to_string(),
            })
    }

    /// Add a parameter to the stage.
    ///
    /// Output textures take the requested color attachment or the first
    /// free one, growing the draw-buffer table with `None` holes as needed.
    /// Sampled textures take the next texture unit.
    pub fn add_parameter(&mut self, mut parameter: Parameter) -> Result<()> {
        let name = param_name(parameter.name())?;
        if self.parameters.contains_key(&name) {
            return Err(Error::DuplicateParameter(name));
        }
        let role = parameter.role();
        if let Some(spec) = parameter.texture_spec_mut() {
            if role == ConnectionRole::Output {
                let attachment = match spec.attachment {
                    Some(a) => a,
                    None => self.free_attachment(),
                };
                self.claim_attachment(attachment)?;
                spec.attachment = Some(attachment);
            } else if spec.unit.is_none() {
                spec.unit = Some(self.texture_units);
                self.texture_units += 1;
            }
        }
        parameter.set_owner(self.gid);
        if role == ConnectionRole::Output {
            self.outputs.push(name);
        } else {
            self.inputs.push(name);
        }
        self.parameters.insert(name, parameter);
        Ok(())
    }

    fn free_attachment(&self) -> u32 {
        self.draw_buffers
            .iter()
            .position(Option::is_none)
            .unwrap_or(self.draw_buffers.len()) as u32
    }

    fn claim_attachment(&mut self, attachment: u32) -> Result<()> {
        let index = attachment as usize;
        if index >= MAX_DRAW_BUFFERS {
            return Err(Error::AttachmentUnavailable(attachment));
        }
        while self.draw_buffers.len() <= index {
            self.draw_buffers
                .push(None)
                .map_err(|_| Error::AttachmentUnavailable(attachment))?;
        }
        if self.draw_buffers[index].is_some() {
            return Err(Error::AttachmentUnavailable(attachment));
        }
        self.draw_buffers[index] = Some(attachment);
        Ok(())
    }

    /// Remove a parameter and hand it back.
    ///
    /// Linked parameters must be disconnected first. The caller releases
    /// any GPU resource the parameter still holds.
    pub fn remove_parameter(&mut self, name: &str) -> Result<Parameter> {
        let parameter = self.parameter_or_err(name)?;
        if parameter.linked().is_some() || parameter.previous().is_some() {
            return Err(LinkError::AlreadyLinked(param_name(name)?).into());
        }
        let attachment = match parameter.role() {
            ConnectionRole::Output => parameter.texture_spec().and_then(|s| s.attachment),
            _ => None,
        };
        if let Some(a) = attachment {
            if let Some(slot) = self.draw_buffers.get_mut(a as usize) {
                *slot = None;
            }
            while self.draw_buffers.last() == Some(&None) {
                self.draw_buffers.pop();
            }
        }
        self.inputs.retain(|n| n.as_str() != name);
        self.outputs.retain(|n| n.as_str() != name);
        self.parameters
            .remove(name)
            .ok_or_else(|| Error::ParameterNotFound {
                stage: self.gid,
                name: name.to_string(),
            })
    }

    /// Parameters exposing this stage's result to a consumer.
    pub fn output_interface(&self) -> Vec<ParamName> {
        match &self.kind {
            StageKind::Final(_) => Vec::new(),
            _ => self
                .outputs
                .iter()
                .filter(|n| n.as_str() == names::OUTPUT_AUDIO_TEXTURE)
                .copied()
                .collect(),
        }
    }

    /// Parameters accepting a producer's output.
    ///
    /// A join exposes its lowest free slot, or nothing once every slot is
    /// taken.
    pub fn stream_interface(&self) -> Vec<ParamName> {
        match &self.kind {
            StageKind::Join(join) => join
                .free
                .first()
                .map(|&i| join.slots[i])
                .into_iter()
                .collect(),
            _ => self
                .inputs
                .iter()
                .filter(|n| n.as_str() == names::STREAM_AUDIO_TEXTURE)
                .copied()
                .collect(),
        }
    }

    /// True if a new producer could connect without displacing one.
    pub fn has_free_stream(&self) -> bool {
        let streams = self.stream_interface();
        !streams.is_empty()
            && streams.iter().all(|n| {
                self.parameters
                    .get(n)
                    .is_some_and(|p| p.previous().is_none())
            })
    }

    /// Wire this stage's output interface into `next`'s stream interface.
    pub fn connect_render_stage(&mut self, next: &mut RenderStage) -> Result<()> {
        if self.gid == next.gid {
            return Err(StructureError::SelfConnection(self.gid).into());
        }
        let outputs = self.output_interface();
        let streams = next.stream_interface();
        if outputs.is_empty() || outputs.len() != streams.len() {
            return Err(LinkError::InterfaceMismatch {
                outputs: outputs.len(),
                streams: streams.len(),
            }
            .into());
        }
        for (out, stream) in outputs.iter().zip(&streams) {
            self.parameter_or_err(out)?
                .can_link(next.parameter_or_err(stream)?)?;
        }
        for (out, stream) in outputs.iter().zip(&streams) {
            if let (Some(o), Some(s)) = (
                self.parameters.get_mut(out),
                next.parameters.get_mut(stream),
            ) {
                o.link(s)?;
            }
        }
        next.claim_streams(&streams);
        self.consumers.insert(next.gid);
        next.producers.insert(self.gid);
        tracing::debug!(from = %self.gid, to = %next.gid, "connected stages");
        Ok(())
    }

    /// Undo [`RenderStage::connect_render_stage`] between `self` and `next`.
    ///
    /// Both sides' values are cleared so the next producer starts from
    /// silence.
    pub fn disconnect_render_stage(&mut self, next: &mut RenderStage) -> Result<()> {
        if !self.consumers.contains(&next.gid) {
            return Err(StructureError::NotConnected {
                from: self.gid,
                to: next.gid,
            }
            .into());
        }
        let pairs: Vec<(ParamName, ParamName)> = self
            .outputs
            .iter()
            .filter_map(|out| {
                let target = self.parameters.get(out)?.linked()?;
                (target.stage == next.gid).then_some((*out, target.name))
            })
            .collect();
        for (out, stream) in &pairs {
            if let (Some(o), Some(s)) = (
                self.parameters.get_mut(out),
                next.parameters.get_mut(stream),
            ) {
                o.unlink(s)?;
                o.clear_value();
                s.clear_value();
            }
            next.release_stream(stream);
        }
        self.consumers.remove(&next.gid);
        next.producers.remove(&self.gid);
        self.clear_history();
        next.clear_history();
        tracing::debug!(from = %self.gid, to = %next.gid, "disconnected stages");
        Ok(())
    }

    /// Forget past input of an echo or filter, host copy and texture alike.
    fn clear_history(&mut self) {
        if self.kind.clear_history() {
            if let Some(texture) = self.parameters.get_mut(AUDIO_HISTORY_TEXTURE) {
                texture.clear_value();
            }
        }
    }

    fn claim_streams(&mut self, streams: &[ParamName]) {
        if let StageKind::Join(join) = &mut self.kind {
            for name in streams {
                if let Some(i) = join.slots.iter().position(|s| s == name) {
                    join.free.remove(&i);
                }
            }
        }
    }

    fn release_stream(&mut self, stream: &ParamName) {
        if let StageKind::Join(join) = &mut self.kind {
            if let Some(i) = join.slots.iter().position(|s| s == stream) {
                join.free.insert(i);
            }
        }
    }

    /// The single consumer, if any. Fails when there are several.
    pub fn sole_consumer(&self) -> Result<Option<StageId>> {
        match self.consumers.len() {
            0 => Ok(None),
            1 => Ok(self.consumers.first().copied()),
            _ => Err(StructureError::AmbiguousConsumer(self.gid).into()),
        }
    }

    /// The single producer, if any. Fails when there are several.
    pub fn sole_producer(&self) -> Result<Option<StageId>> {
        match self.producers.len() {
            0 => Ok(None),
            1 => Ok(self.producers.first().copied()),
            _ => Err(StructureError::AmbiguousProducer(self.gid).into()),
        }
    }

    /// Compile the program, allocate the framebuffer and initialize every
    /// parameter, in that order. Each step runs only if the previous one
    /// succeeded; a failed stage can be retried.
    pub fn initialize(&mut self, gpu: &mut dyn GpuBackend) -> Result<()> {
        if self.state == StageState::Initialized {
            return Ok(());
        }
        let program = match self.program {
            Some(program) => program,
            None => {
                let shader = &self.shader;
                let program = gpu
                    .create_program(&shader.label, &shader.vertex, &shader.fragment)
                    .map_err(|source| InitError::ShaderCompile {
                        stage: self.name.clone(),
                        source,
                    })?;
                self.program = Some(program);
                self.state = StageState::ShaderCompiled;
                program
            }
        };
        if self.framebuffer.is_none() {
            self.framebuffer = Some(gpu.create_framebuffer()?);
            self.state = StageState::FramebufferAllocated;
        }
        let framebuffer = self
            .framebuffer
            .ok_or_else(|| InitError::MissingFramebuffer(self.name.clone()))?;
        if self.parameters.is_empty() {
            return Err(InitError::NoParameters(self.name.clone()).into());
        }
        for parameter in self.parameters.values_mut() {
            parameter.initialize(gpu, framebuffer, program, &self.shader.fragment)?;
        }
        self.state = StageState::ParametersInitialized;
        self.state = StageState::Initialized;
        tracing::debug!(stage = %self.gid, name = %self.name, "stage initialized");
        Ok(())
    }

    /// Initialize the stage, or only the parameters added since it was.
    pub fn prepare(&mut self, gpu: &mut dyn GpuBackend) -> Result<()> {
        if self.state != StageState::Initialized {
            return self.initialize(gpu);
        }
        if self.parameters.values().all(Parameter::is_initialized) {
            return Ok(());
        }
        let (Some(program), Some(framebuffer)) = (self.program, self.framebuffer) else {
            return Err(InitError::NotInitialized(self.name.clone()).into());
        };
        for parameter in self.parameters.values_mut() {
            if !parameter.is_initialized() {
                parameter.initialize(gpu, framebuffer, program, &self.shader.fragment)?;
                tracing::debug!(stage = %self.gid, parameter = parameter.name(), "late parameter initialized");
            }
        }
        Ok(())
    }

    /// Re-associate every parameter with the framebuffer and its links.
    pub fn bind<L>(&self, gpu: &mut dyn GpuBackend, lookup: &L) -> Result<()>
    where
        L: ParameterLookup + ?Sized,
    {
        if self.state != StageState::Initialized {
            return Err(InitError::NotInitialized(self.name.clone()).into());
        }
        for parameter in self.parameters.values() {
            parameter.bind(gpu, lookup)?;
        }
        Ok(())
    }

    /// Bind a shared uniform block into this stage's program if the program
    /// declares it. Returns whether it was bound.
    pub fn bind_global_block(&self, gpu: &mut dyn GpuBackend, block: &Parameter) -> Result<bool> {
        let (Some(program), Some(binding_point)) = (self.program, block.binding_point()) else {
            return Ok(false);
        };
        if !gpu.has_uniform_block(program, block.name()) {
            return Ok(false);
        }
        gpu.bind_uniform_block(program, block.name(), binding_point)?;
        Ok(true)
    }

    /// Upload parameters and run the pass.
    pub fn render(&mut self, gpu: &mut dyn GpuBackend, time: u32) -> Result<()> {
        let (Some(program), Some(framebuffer)) = (self.program, self.framebuffer) else {
            return Err(InitError::NotInitialized(self.name.clone()).into());
        };
        if self.state != StageState::Initialized {
            return Err(InitError::NotInitialized(self.name.clone()).into());
        }
        self.time = time;
        self.before_draw(gpu, time)?;
        for parameter in self.parameters.values_mut() {
            parameter.render(gpu)?;
        }
        gpu.draw(program, framebuffer, &self.draw_buffers)?;
        if let StageKind::Final(buffer) = &mut self.kind {
            if let Some(output) = self.parameters.get(names::OUTPUT_AUDIO_TEXTURE) {
                output.read_back(gpu, buffer.as_mut_slice())?;
            }
        }
        Ok(())
    }

    /// Host work of stateful stages, once per new `time`, ahead of the
    /// parameter uploads.
    fn before_draw(&mut self, gpu: &mut dyn GpuBackend, time: u32) -> Result<()> {
        let parameters = &mut self.parameters;
        match &mut self.kind {
            StageKind::Echo(history) => {
                history.capture(parameters, gpu, time)?;
            }
            StageKind::Filter(filter) => filter.before_draw(parameters, gpu, time)?,
            StageKind::Record(recorder) => recorder.before_draw(parameters, gpu, time)?,
            StageKind::Playback(player) => player.before_draw(parameters, time)?,
            StageKind::Plain | StageKind::Join(_) | StageKind::Final(_) => {}
        }
        Ok(())
    }

    /// Read the GPU contents of texture parameter `name`.
    pub fn read_parameter(&self, gpu: &mut dyn GpuBackend, name: &str) -> Result<Vec<f32>> {
        let parameter = self.parameter_or_err(name)?;
        let len = match parameter.kind() {
            ParameterKind::Texture2D(spec) => spec.width as usize * spec.height as usize,
            _ => return Err(InitError::NotInitialized(name.to_string()).into()),
        };
        let mut out = vec![0.0; len];
        parameter.read_back(gpu, &mut out)?;
        Ok(out)
    }

    /// Free GPU resources: parameters, then the framebuffer, then the
    /// program. Wiring is kept, so the stage can be initialized again.
    pub fn release(&mut self, gpu: &mut dyn GpuBackend) {
        for parameter in self.parameters.values_mut() {
            parameter.release(gpu);
        }
        if let Some(framebuffer) = self.framebuffer.take() {
            gpu.delete_framebuffer(framebuffer);
        }
        if let Some(program) = self.program.take() {
            gpu.delete_program(program);
        }
        if self.state != StageState::Uninitialized {
            tracing::debug!(stage = %self.gid, name = %self.name, "stage released");
        }
        self.state = StageState::Uninitialized;
    }
}

impl ParameterLookup for BTreeMap<StageId, RenderStage> {
    fn parameter(&self, reference: &ParamRef) -> Option<&Parameter> {
        self.get(&reference.stage)?.find_parameter(&reference.name)
    }
}

impl ParameterLookup for [&RenderStage] {
    fn parameter(&self, reference: &ParamRef) -> Option<&Parameter> {
        self.iter()
            .find(|s| s.gid == reference.stage)?
            .find_parameter(&reference.name)
    }
}
