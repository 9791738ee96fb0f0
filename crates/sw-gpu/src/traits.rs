//! GPU backend trait and error types.

use std::fmt;

use sw_ir::ParamValue;
use thiserror::Error;

slotmap::new_key_type! {
    /// Handle to a linked shader program.
    pub struct ProgramId;
    /// Handle to a framebuffer object.
    pub struct FramebufferId;
    /// Handle to a single-component float 2D texture.
    pub struct TextureId;
    /// Handle to a uniform buffer object.
    pub struct BufferId;
}

/// Error type for GPU operations.
#[derive(Debug, Error)]
pub enum GpuError {
    #[error("shader compile failed for {label}: {log}")]
    ShaderCompile { label: String, log: String },

    #[error("program link failed for {label}: {log}")]
    ProgramLink { label: String, log: String },

    #[error("unknown {0} handle")]
    UnknownHandle(&'static str),

    #[error("program has no uniform or block named {0}")]
    UnknownUniform(String),

    #[error("texture data holds {actual} samples, expected {expected}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("framebuffer incomplete: {0}")]
    Framebuffer(String),

    #[error("backend error: {0}")]
    Backend(String),
}

/// Sampling filter of an audio texture.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TextureFilter {
    #[default]
    Nearest,
    Linear,
}

/// Shape of an audio texture: `width` frames by `height` channels of f32.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub filter: TextureFilter,
}

impl TextureDesc {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            filter: TextureFilter::Nearest,
        }
    }

    /// Number of f32 texels.
    pub fn len(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for TextureDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Primitives the render graph needs from a GPU.
///
/// Every texture is a single-component 32-bit float image. Resources are
/// addressed by slotmap handles; deleting an unknown handle is a no-op.
pub trait GpuBackend {
    /// Compile and link a program. `label` names the program in logs and
    /// selects the kernel on CPU backends.
    fn create_program(
        &mut self,
        label: &str,
        vertex: &str,
        fragment: &str,
    ) -> Result<ProgramId, GpuError>;

    fn delete_program(&mut self, program: ProgramId);

    /// True if `program` exposes a uniform named `name`.
    fn has_uniform(&self, program: ProgramId, name: &str) -> bool;

    /// True if `program` declares a uniform block named `name`.
    fn has_uniform_block(&self, program: ProgramId, name: &str) -> bool;

    fn create_framebuffer(&mut self) -> Result<FramebufferId, GpuError>;

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId);

    /// Attach `texture` as color attachment `attachment` of `framebuffer`.
    fn attach_texture(
        &mut self,
        framebuffer: FramebufferId,
        attachment: u32,
        texture: TextureId,
    ) -> Result<(), GpuError>;

    /// Create a texture, optionally filled with planar sample data.
    fn create_texture(
        &mut self,
        desc: &TextureDesc,
        data: Option<&[f32]>,
    ) -> Result<TextureId, GpuError>;

    fn upload_texture(&mut self, texture: TextureId, data: &[f32]) -> Result<(), GpuError>;

    /// Copy the texture contents into `out` (planar, row per channel).
    fn read_texture(&mut self, texture: TextureId, out: &mut [f32]) -> Result<(), GpuError>;

    fn delete_texture(&mut self, texture: TextureId);

    /// Bind `texture` to sampler unit `unit` and point the sampler uniform
    /// `name` of `program` at it.
    fn bind_sampler(
        &mut self,
        program: ProgramId,
        name: &str,
        unit: u32,
        texture: TextureId,
    ) -> Result<(), GpuError>;

    fn create_uniform_buffer(&mut self, data: &[u8]) -> Result<BufferId, GpuError>;

    fn update_uniform_buffer(&mut self, buffer: BufferId, data: &[u8]) -> Result<(), GpuError>;

    /// Bind `buffer` to the indexed uniform-buffer binding point.
    fn bind_buffer_base(&mut self, binding_point: u32, buffer: BufferId) -> Result<(), GpuError>;

    fn delete_uniform_buffer(&mut self, buffer: BufferId);

    /// Associate the uniform block `name` of `program` with a binding point.
    fn bind_uniform_block(
        &mut self,
        program: ProgramId,
        name: &str,
        binding_point: u32,
    ) -> Result<(), GpuError>;

    fn set_uniform(
        &mut self,
        program: ProgramId,
        name: &str,
        value: &ParamValue,
    ) -> Result<(), GpuError>;

    /// Run one full-screen pass of `program` into `framebuffer`.
    ///
    /// `draw_buffers[i]` names the color attachment written by fragment
    /// output location `i`, or `None` to leave the location unbound. Bound
    /// attachments are cleared before the draw.
    fn draw(
        &mut self,
        program: ProgramId,
        framebuffer: FramebufferId,
        draw_buffers: &[Option<u32>],
    ) -> Result<(), GpuError>;
}
