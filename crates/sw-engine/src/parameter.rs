//! Named, typed bindings between a stage and its shader program.
//!
//! A [`Parameter`] is one of three kinds: a plain uniform, a uniform
//! block backed by a buffer, or a 2D audio texture. Output textures link
//! to passthrough textures on a downstream stage; links are stored on both
//! ends as [`ParamRef`]s and resolved through a [`ParameterLookup`].

use std::collections::BTreeSet;

use parking_lot::Mutex;
use sw_gpu::{
    declares_output, BufferId, FramebufferId, GpuBackend, ProgramId, TextureDesc, TextureFilter,
    TextureId,
};
use sw_ir::{ConnectionRole, ParamName, ParamRef, ParamValue, StageId, ValueKind};

use crate::error::{param_name, Error, InitError, LinkError, Result};

static BINDING_POINTS: Mutex<BindingPoints> = Mutex::new(BindingPoints::new());

/// Uniform block binding points in use. A point returns to the pool when
/// the parameter holding it is dropped, so the live count stays bounded by
/// the number of live uniform blocks.
#[derive(Debug)]
struct BindingPoints {
    next: u32,
    free: BTreeSet<u32>,
}

impl BindingPoints {
    const fn new() -> Self {
        Self {
            next: 0,
            free: BTreeSet::new(),
        }
    }

    /// Lowest free point.
    fn acquire(&mut self) -> u32 {
        if let Some(point) = self.free.pop_first() {
            return point;
        }
        self.next += 1;
        self.next - 1
    }

    fn release(&mut self, point: u32) {
        if point + 1 == self.next {
            self.next -= 1;
            while let Some(&last) = self.free.last() {
                if last + 1 != self.next {
                    break;
                }
                self.free.pop_last();
                self.next -= 1;
            }
        } else if point < self.next {
            self.free.insert(point);
        }
    }
}

/// Shape and placement of a texture parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureSpec {
    /// Frames per buffer.
    pub width: u32,
    /// Channels.
    pub height: u32,
    pub filter: TextureFilter,
    /// Sampler unit; assigned by the stage when `None`.
    pub unit: Option<u32>,
    /// Color attachment of an output texture; assigned by the stage when `None`.
    pub attachment: Option<u32>,
}

impl TextureSpec {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            filter: TextureFilter::Nearest,
            unit: None,
            attachment: None,
        }
    }

    pub fn with_attachment(mut self, attachment: u32) -> Self {
        self.attachment = Some(attachment);
        self
    }

    pub fn with_filter(mut self, filter: TextureFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn desc(&self) -> TextureDesc {
        TextureDesc {
            width: self.width,
            height: self.height,
            filter: self.filter,
        }
    }

    fn len(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// What a parameter binds to on the GPU.
#[derive(Clone, Debug, PartialEq)]
pub enum ParameterKind {
    Uniform(ValueKind),
    UniformBuffer { kind: ValueKind, binding_point: u32 },
    Texture2D(TextureSpec),
}

impl ParameterKind {
    fn label(&self) -> &'static str {
        match self {
            ParameterKind::Uniform(_) => "uniform",
            ParameterKind::UniformBuffer { .. } => "uniform buffer",
            ParameterKind::Texture2D(_) => "texture",
        }
    }

    /// Kind of value accepted by `set_value`.
    pub fn value_kind(&self) -> ValueKind {
        match self {
            ParameterKind::Uniform(kind) | ParameterKind::UniformBuffer { kind, .. } => *kind,
            ParameterKind::Texture2D(spec) => ValueKind::FloatArray(spec.len()),
        }
    }
}

/// GPU resources held by an initialized parameter.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
enum GpuBinding {
    #[default]
    None,
    Uniform {
        program: ProgramId,
    },
    Buffer {
        buffer: BufferId,
        program: Option<ProgramId>,
    },
    Texture {
        texture: TextureId,
        framebuffer: FramebufferId,
        program: ProgramId,
    },
}

/// Resolves link references to the parameters they name.
pub trait ParameterLookup {
    fn parameter(&self, reference: &ParamRef) -> Option<&Parameter>;
}

/// A named, typed binding of a render stage.
#[derive(Debug)]
pub struct Parameter {
    name: ParamName,
    role: ConnectionRole,
    kind: ParameterKind,
    value: Option<ParamValue>,
    owner: Option<StageId>,
    linked: Option<ParamRef>,
    previous: Option<ParamRef>,
    binding: GpuBinding,
    dirty: bool,
    uploaded: bool,
    pending_clear: bool,
}

impl Parameter {
    fn with_kind(name: &str, role: ConnectionRole, kind: ParameterKind) -> Result<Self> {
        Ok(Self {
            name: param_name(name)?,
            role,
            kind,
            value: None,
            owner: None,
            linked: None,
            previous: None,
            binding: GpuBinding::None,
            dirty: false,
            uploaded: false,
            pending_clear: false,
        })
    }

    /// A plain uniform holding `value`.
    pub fn uniform(name: &str, role: ConnectionRole, value: impl Into<ParamValue>) -> Result<Self> {
        let value = value.into();
        let mut p = Self::with_kind(name, role, ParameterKind::Uniform(value.kind()))?;
        p.value = Some(value);
        p.dirty = true;
        Ok(p)
    }

    /// A plain uniform of `kind` without a value yet.
    pub fn uniform_decl(name: &str, role: ConnectionRole, kind: ValueKind) -> Result<Self> {
        Self::with_kind(name, role, ParameterKind::Uniform(kind))
    }

    /// A uniform block holding `value`, bound at the lowest free binding
    /// point. The point is returned when the parameter is dropped.
    pub fn uniform_buffer(
        name: &str,
        role: ConnectionRole,
        value: impl Into<ParamValue>,
    ) -> Result<Self> {
        let value = value.into();
        let kind = ParameterKind::UniformBuffer {
            kind: value.kind(),
            binding_point: BINDING_POINTS.lock().acquire(),
        };
        let mut p = Self::with_kind(name, role, kind)?;
        p.value = Some(value);
        Ok(p)
    }

    /// A 2D audio texture.
    pub fn texture(name: &str, role: ConnectionRole, spec: TextureSpec) -> Result<Self> {
        Self::with_kind(name, role, ParameterKind::Texture2D(spec))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> ConnectionRole {
        self.role
    }

    pub fn kind(&self) -> &ParameterKind {
        &self.kind
    }

    pub fn texture_spec(&self) -> Option<&TextureSpec> {
        match &self.kind {
            ParameterKind::Texture2D(spec) => Some(spec),
            _ => None,
        }
    }

    /// Host-side value. Output and passthrough textures live on the GPU;
    /// use [`Parameter::read_back`] for those.
    pub fn value(&self) -> Option<&ParamValue> {
        self.value.as_ref()
    }

    /// Stage that owns this parameter.
    pub fn owner(&self) -> Option<StageId> {
        self.owner
    }

    /// This parameter as a link reference, once owned by a stage.
    pub fn reference(&self) -> Option<ParamRef> {
        self.owner.map(|stage| ParamRef::new(stage, self.name))
    }

    /// Forward link to a downstream parameter.
    pub fn linked(&self) -> Option<&ParamRef> {
        self.linked.as_ref()
    }

    /// Reverse link to the upstream parameter feeding this one.
    pub fn previous(&self) -> Option<&ParamRef> {
        self.previous.as_ref()
    }

    pub fn is_initialized(&self) -> bool {
        self.binding != GpuBinding::None
    }

    /// GPU texture of an initialized texture parameter.
    pub fn gpu_texture(&self) -> Option<TextureId> {
        match self.binding {
            GpuBinding::Texture { texture, .. } => Some(texture),
            _ => None,
        }
    }

    pub(crate) fn set_owner(&mut self, owner: StageId) {
        self.owner = Some(owner);
    }

    pub(crate) fn texture_spec_mut(&mut self) -> Option<&mut TextureSpec> {
        match &mut self.kind {
            ParameterKind::Texture2D(spec) => Some(spec),
            _ => None,
        }
    }

    /// Replace the host value.
    ///
    /// Fails for output and passthrough roles and when the value's kind
    /// differs from the declared one.
    pub fn set_value(&mut self, value: impl Into<ParamValue>) -> Result<()> {
        if self.role.is_computed() {
            return Err(Error::ReadOnly(self.name));
        }
        let value = value.into();
        let expected = self.kind.value_kind();
        if value.kind() != expected {
            return Err(Error::ValueKind {
                name: self.name,
                expected,
                actual: value.kind(),
            });
        }
        self.value = Some(value);
        self.dirty = true;
        Ok(())
    }

    /// Reset the payload to the deterministic default of its kind.
    pub fn clear_value(&mut self) {
        if self.role.is_computed() {
            self.pending_clear = self.texture_spec().is_some();
            return;
        }
        self.value = Some(self.kind.value_kind().default_value());
        self.dirty = true;
    }

    /// Check that `self` could link forward to `other`.
    pub fn can_link(&self, other: &Parameter) -> std::result::Result<(), LinkError> {
        if self.owner.is_none() {
            return Err(LinkError::Detached(self.name));
        }
        if other.owner.is_none() {
            return Err(LinkError::Detached(other.name));
        }
        if self.linked.is_some() {
            return Err(LinkError::AlreadyLinked(self.name));
        }
        if other.previous.is_some() {
            return Err(LinkError::AlreadyLinked(other.name));
        }
        let mismatch = |reason| LinkError::KindMismatch {
            from: self.name,
            to: other.name,
            reason,
        };
        let (ParameterKind::Texture2D(from), ParameterKind::Texture2D(to)) =
            (&self.kind, &other.kind)
        else {
            return Err(mismatch("only texture parameters link"));
        };
        if self.role != ConnectionRole::Output {
            return Err(mismatch("source must have the OUTPUT role"));
        }
        if other.role != ConnectionRole::Passthrough {
            return Err(mismatch("target must have the PASSTHROUGH role"));
        }
        if (from.width, from.height) != (to.width, to.height) {
            return Err(LinkError::SizeMismatch {
                from: self.name,
                to: other.name,
                from_size: (from.width, from.height),
                to_size: (to.width, to.height),
            });
        }
        Ok(())
    }

    /// Link `self` forward to `other`, recording the reverse link on `other`.
    pub fn link(&mut self, other: &mut Parameter) -> std::result::Result<(), LinkError> {
        self.can_link(other)?;
        self.linked = other.reference();
        other.previous = self.reference();
        Ok(())
    }

    /// Clear the link between `self` and `other` in both directions.
    pub fn unlink(&mut self, other: &mut Parameter) -> std::result::Result<(), LinkError> {
        if self.linked.is_none() || self.linked != other.reference() {
            return Err(LinkError::NotLinked(self.name));
        }
        if other.previous != self.reference() {
            return Err(LinkError::NotLinked(other.name));
        }
        self.linked = None;
        other.previous = None;
        Ok(())
    }

    /// Allocate the GPU resource for this parameter's kind.
    ///
    /// Idempotent once the parameter holds a resource.
    pub fn initialize(
        &mut self,
        gpu: &mut dyn GpuBackend,
        framebuffer: FramebufferId,
        program: ProgramId,
        fragment_source: &str,
    ) -> Result<()> {
        if self.is_initialized() {
            return Ok(());
        }
        match self.kind.clone() {
            ParameterKind::Uniform(_) => {
                self.check_host_role()?;
                if !gpu.has_uniform(program, &self.name) {
                    tracing::warn!(parameter = %self.name, "uniform not active in program");
                }
                self.binding = GpuBinding::Uniform { program };
                self.dirty = self.value.is_some();
            }
            ParameterKind::UniformBuffer { binding_point, .. } => {
                self.check_host_role()?;
                if !gpu.has_uniform_block(program, &self.name) {
                    return Err(InitError::MissingBinding(self.name).into());
                }
                let buffer = self.create_buffer(gpu, binding_point)?;
                gpu.bind_uniform_block(program, &self.name, binding_point)?;
                self.binding = GpuBinding::Buffer {
                    buffer,
                    program: Some(program),
                };
            }
            ParameterKind::Texture2D(spec) => {
                if self.role == ConnectionRole::Output {
                    if !declares_output(fragment_source, &self.name) {
                        return Err(InitError::MissingBinding(self.name).into());
                    }
                } else if !gpu.has_uniform(program, &self.name) {
                    // Still allocated: an upstream output may render into it.
                    tracing::warn!(parameter = %self.name, "sampler not active in program");
                }
                if self.role == ConnectionRole::Output && spec.attachment.is_none() {
                    return Err(InitError::Unattached(self.name).into());
                }
                let data = match self.role {
                    ConnectionRole::Input | ConnectionRole::Initialization => {
                        self.value.as_ref().and_then(ParamValue::as_floats)
                    }
                    _ => None,
                };
                let texture = gpu.create_texture(&spec.desc(), data)?;
                self.binding = GpuBinding::Texture {
                    texture,
                    framebuffer,
                    program,
                };
                self.dirty = false;
                self.pending_clear = false;
            }
        }
        tracing::trace!(parameter = %self.name, role = %self.role, "parameter initialized");
        Ok(())
    }

    /// Allocate a uniform block not tied to one program.
    ///
    /// Programs pick it up through [`GpuBackend::bind_uniform_block`] with
    /// this parameter's binding point.
    pub fn initialize_global(&mut self, gpu: &mut dyn GpuBackend) -> Result<()> {
        if self.is_initialized() {
            return Ok(());
        }
        let ParameterKind::UniformBuffer { binding_point, .. } = self.kind else {
            return Err(InitError::InvalidRole {
                name: self.name,
                role: self.role,
                kind: self.kind.label(),
            }
            .into());
        };
        self.check_host_role()?;
        let buffer = self.create_buffer(gpu, binding_point)?;
        self.binding = GpuBinding::Buffer {
            buffer,
            program: None,
        };
        Ok(())
    }

    /// Binding point of a uniform block parameter.
    pub fn binding_point(&self) -> Option<u32> {
        match self.kind {
            ParameterKind::UniformBuffer { binding_point, .. } => Some(binding_point),
            _ => None,
        }
    }

    fn check_host_role(&self) -> Result<()> {
        if self.role.is_computed() {
            return Err(InitError::InvalidRole {
                name: self.name,
                role: self.role,
                kind: self.kind.label(),
            }
            .into());
        }
        Ok(())
    }

    fn create_buffer(&mut self, gpu: &mut dyn GpuBackend, binding_point: u32) -> Result<BufferId> {
        let bytes = match &self.value {
            Some(v) => v.to_bytes(),
            None => self.kind.value_kind().default_value().to_bytes(),
        };
        let buffer = gpu.create_uniform_buffer(&bytes)?;
        gpu.bind_buffer_base(binding_point, buffer)?;
        self.dirty = false;
        Ok(buffer)
    }

    /// Re-associate GPU resources after structural changes.
    ///
    /// An output texture attaches its link target's texture (or its own when
    /// unlinked) to its color attachment, so the shader writes straight into
    /// the downstream stage's input.
    pub fn bind<L>(&self, gpu: &mut dyn GpuBackend, lookup: &L) -> Result<()>
    where
        L: ParameterLookup + ?Sized,
    {
        match self.binding {
            GpuBinding::Texture {
                texture,
                framebuffer,
                ..
            } if self.role == ConnectionRole::Output => {
                let attachment = self
                    .texture_spec()
                    .and_then(|s| s.attachment)
                    .ok_or(InitError::Unattached(self.name))?;
                let target = match &self.linked {
                    Some(reference) => lookup
                        .parameter(reference)
                        .ok_or_else(|| Error::ParameterNotFound {
                            stage: reference.stage,
                            name: reference.name.to_string(),
                        })?
                        .gpu_texture()
                        .ok_or_else(|| InitError::NotInitialized(reference.to_string()))?,
                    None => texture,
                };
                gpu.attach_texture(framebuffer, attachment, target)?;
            }
            GpuBinding::Buffer {
                program: Some(program),
                ..
            } => {
                if let ParameterKind::UniformBuffer { binding_point, .. } = self.kind {
                    gpu.bind_uniform_block(program, &self.name, binding_point)?;
                }
            }
            GpuBinding::None => return Err(InitError::NotInitialized(self.name.to_string()).into()),
            _ => {}
        }
        Ok(())
    }

    /// Upload the host value ahead of the stage's draw call.
    pub fn render(&mut self, gpu: &mut dyn GpuBackend) -> Result<()> {
        match self.binding {
            GpuBinding::None => {
                return Err(InitError::NotInitialized(self.name.to_string()).into());
            }
            GpuBinding::Texture {
                texture, program, ..
            } => {
                if self.role == ConnectionRole::Output {
                    return Ok(());
                }
                // A fed stream was already rewritten by its producer this frame.
                if self.pending_clear {
                    if let (None, Some(spec)) = (&self.previous, self.texture_spec()) {
                        gpu.upload_texture(texture, &vec![0.0; spec.len()])?;
                    }
                    self.pending_clear = false;
                }
                if self.role == ConnectionRole::Input && self.dirty {
                    if let Some(data) = self.value.as_ref().and_then(ParamValue::as_floats) {
                        gpu.upload_texture(texture, data)?;
                    }
                    self.dirty = false;
                }
                let unit = self.texture_spec().and_then(|s| s.unit).unwrap_or(0);
                gpu.bind_sampler(program, &self.name, unit, texture)?;
            }
            GpuBinding::Uniform { program } => {
                let upload = match self.role {
                    ConnectionRole::Input => self.dirty,
                    ConnectionRole::Initialization => !self.uploaded,
                    _ => false,
                };
                if upload {
                    if let Some(value) = &self.value {
                        gpu.set_uniform(program, &self.name, value)?;
                        self.uploaded = true;
                    }
                    self.dirty = false;
                }
            }
            GpuBinding::Buffer { buffer, .. } => {
                if self.role == ConnectionRole::Input && self.dirty {
                    if let Some(value) = &self.value {
                        gpu.update_uniform_buffer(buffer, &value.to_bytes())?;
                    }
                    self.dirty = false;
                }
            }
        }
        Ok(())
    }

    /// Read the GPU contents of a texture parameter into `out`.
    pub fn read_back(&self, gpu: &mut dyn GpuBackend, out: &mut [f32]) -> Result<()> {
        let texture = self
            .gpu_texture()
            .ok_or_else(|| InitError::NotInitialized(self.name.to_string()))?;
        gpu.read_texture(texture, out)?;
        Ok(())
    }

    /// Free the GPU resource. Links are left untouched.
    pub fn release(&mut self, gpu: &mut dyn GpuBackend) {
        match std::mem::take(&mut self.binding) {
            GpuBinding::Texture { texture, .. } => gpu.delete_texture(texture),
            GpuBinding::Buffer { buffer, .. } => gpu.delete_uniform_buffer(buffer),
            GpuBinding::Uniform { .. } | GpuBinding::None => {}
        }
        self.uploaded = false;
        self.dirty = self.value.is_some();
    }
}

impl Drop for Parameter {
    fn drop(&mut self) {
        if matches!(
            self.binding,
            GpuBinding::Texture { .. } | GpuBinding::Buffer { .. }
        ) {
            tracing::warn!(parameter = %self.name, "parameter dropped while holding GPU resources");
        }
        if let ParameterKind::UniformBuffer { binding_point, .. } = self.kind {
            BINDING_POINTS.lock().release(binding_point);
        }
    }
}
