//! GPU side of the shaderwave render graph.
//!
//! The engine drives every pass through the [`GpuBackend`] trait. Two
//! backends ship with the crate:
//!
//! - [`SoftwareBackend`] runs each program as a Rust kernel registered
//!   under the program's label. Used by the CLI and the test suites.
//! - `GlowBackend` (feature `glow`) drives OpenGL through `glow`.
//!
//! Shader text is loaded through [`ShaderSource`] and assembled from
//! shared imports plus a main file.

mod builtin;
pub mod kernels;
mod shader_source;
mod software;
mod traits;

#[cfg(feature = "glow")]
mod glow_backend;

pub use builtin::{builtin_shaders, paths};
pub use kernels::{Kernel, KernelContext, KernelTargets};
pub use shader_source::{
    assemble, contains_identifier, declares_output, DirectorySource, MemorySource,
    ShaderError, ShaderProgramSource, ShaderSource,
};
pub use software::SoftwareBackend;
pub use traits::{
    BufferId, FramebufferId, GpuBackend, GpuError, ProgramId, TextureDesc, TextureFilter,
    TextureId,
};

#[cfg(feature = "glow")]
pub use glow_backend::GlowBackend;
