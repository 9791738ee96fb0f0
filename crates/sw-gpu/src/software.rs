//! CPU implementation of [`GpuBackend`].
//!
//! Programs are matched to [`Kernel`]s by label at link time. Uniform and
//! block queries answer from the fragment text, so a program only exposes
//! what its source declares.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use slotmap::SlotMap;
use sw_ir::ParamValue;

use crate::kernels::{builtin_kernels, Kernel, KernelContext, KernelTargets};
use crate::shader_source::contains_identifier;
use crate::traits::{
    BufferId, FramebufferId, GpuBackend, GpuError, ProgramId, TextureDesc, TextureId,
};

struct Program {
    label: String,
    fragment: String,
    kernel: Kernel,
    uniforms: HashMap<String, ParamValue>,
    samplers: BTreeMap<String, TextureId>,
    blocks: HashMap<String, u32>,
}

struct Texture {
    desc: TextureDesc,
    data: Vec<f32>,
}

#[derive(Default)]
struct Framebuffer {
    attachments: BTreeMap<u32, TextureId>,
}

/// GPU backend that renders on the CPU.
pub struct SoftwareBackend {
    kernels: HashMap<String, Kernel>,
    programs: SlotMap<ProgramId, Program>,
    framebuffers: SlotMap<FramebufferId, Framebuffer>,
    textures: SlotMap<TextureId, Texture>,
    buffers: SlotMap<BufferId, Vec<u8>>,
    binding_points: HashMap<u32, BufferId>,
    draw_calls: u64,
}

impl SoftwareBackend {
    /// Backend with the built-in stage kernels registered.
    pub fn new() -> Self {
        let mut backend = Self::empty();
        for (label, kernel) in builtin_kernels() {
            backend.kernels.insert(label.to_string(), kernel);
        }
        backend
    }

    /// Backend with no kernels registered.
    pub fn empty() -> Self {
        Self {
            kernels: HashMap::new(),
            programs: SlotMap::with_key(),
            framebuffers: SlotMap::with_key(),
            textures: SlotMap::with_key(),
            buffers: SlotMap::with_key(),
            binding_points: HashMap::new(),
            draw_calls: 0,
        }
    }

    /// Register the kernel run by programs labelled `label`.
    pub fn register_kernel<F>(&mut self, label: impl Into<String>, kernel: F)
    where
        F: Fn(&KernelContext<'_>, &mut KernelTargets) + Send + Sync + 'static,
    {
        self.kernels.insert(label.into(), Arc::new(kernel));
    }

    /// Number of live programs, framebuffers, textures and buffers.
    pub fn live_resources(&self) -> usize {
        self.programs.len() + self.framebuffers.len() + self.textures.len() + self.buffers.len()
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    /// Total draw calls issued.
    pub fn draw_calls(&self) -> u64 {
        self.draw_calls
    }

    fn program(&self, program: ProgramId) -> Result<&Program, GpuError> {
        self.programs
            .get(program)
            .ok_or(GpuError::UnknownHandle("program"))
    }

    fn program_mut(&mut self, program: ProgramId) -> Result<&mut Program, GpuError> {
        self.programs
            .get_mut(program)
            .ok_or(GpuError::UnknownHandle("program"))
    }

    fn texture_mut(&mut self, texture: TextureId) -> Result<&mut Texture, GpuError> {
        self.textures
            .get_mut(texture)
            .ok_or(GpuError::UnknownHandle("texture"))
    }
}

impl Default for SoftwareBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuBackend for SoftwareBackend {
    fn create_program(
        &mut self,
        label: &str,
        vertex: &str,
        fragment: &str,
    ) -> Result<ProgramId, GpuError> {
        for (stage, text) in [("vertex", vertex), ("fragment", fragment)] {
            if !contains_identifier(text, "main") {
                return Err(GpuError::ShaderCompile {
                    label: label.to_string(),
                    log: format!("{} shader has no main()", stage),
                });
            }
        }
        let kernel = self
            .kernels
            .get(label)
            .cloned()
            .ok_or_else(|| GpuError::ProgramLink {
                label: label.to_string(),
                log: "no kernel registered for this program".to_string(),
            })?;
        Ok(self.programs.insert(Program {
            label: label.to_string(),
            fragment: fragment.to_string(),
            kernel,
            uniforms: HashMap::new(),
            samplers: BTreeMap::new(),
            blocks: HashMap::new(),
        }))
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.programs.remove(program);
    }

    fn has_uniform(&self, program: ProgramId, name: &str) -> bool {
        self.programs
            .get(program)
            .is_some_and(|p| contains_identifier(&p.fragment, name))
    }

    fn has_uniform_block(&self, program: ProgramId, name: &str) -> bool {
        self.has_uniform(program, name)
    }

    fn create_framebuffer(&mut self) -> Result<FramebufferId, GpuError> {
        Ok(self.framebuffers.insert(Framebuffer::default()))
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        self.framebuffers.remove(framebuffer);
    }

    fn attach_texture(
        &mut self,
        framebuffer: FramebufferId,
        attachment: u32,
        texture: TextureId,
    ) -> Result<(), GpuError> {
        if !self.textures.contains_key(texture) {
            return Err(GpuError::UnknownHandle("texture"));
        }
        let fb = self
            .framebuffers
            .get_mut(framebuffer)
            .ok_or(GpuError::UnknownHandle("framebuffer"))?;
        fb.attachments.insert(attachment, texture);
        Ok(())
    }

    fn create_texture(
        &mut self,
        desc: &TextureDesc,
        data: Option<&[f32]>,
    ) -> Result<TextureId, GpuError> {
        let mut texels = vec![0.0; desc.len()];
        if let Some(data) = data {
            if data.len() != texels.len() {
                return Err(GpuError::SizeMismatch {
                    expected: texels.len(),
                    actual: data.len(),
                });
            }
            texels.copy_from_slice(data);
        }
        Ok(self.textures.insert(Texture {
            desc: *desc,
            data: texels,
        }))
    }

    fn upload_texture(&mut self, texture: TextureId, data: &[f32]) -> Result<(), GpuError> {
        let tex = self.texture_mut(texture)?;
        if data.len() != tex.data.len() {
            return Err(GpuError::SizeMismatch {
                expected: tex.data.len(),
                actual: data.len(),
            });
        }
        tex.data.copy_from_slice(data);
        Ok(())
    }

    fn read_texture(&mut self, texture: TextureId, out: &mut [f32]) -> Result<(), GpuError> {
        let tex = self.texture_mut(texture)?;
        if out.len() != tex.data.len() {
            return Err(GpuError::SizeMismatch {
                expected: tex.data.len(),
                actual: out.len(),
            });
        }
        out.copy_from_slice(&tex.data);
        Ok(())
    }

    fn delete_texture(&mut self, texture: TextureId) {
        self.textures.remove(texture);
        for fb in self.framebuffers.values_mut() {
            fb.attachments.retain(|_, t| *t != texture);
        }
    }

    fn bind_sampler(
        &mut self,
        program: ProgramId,
        name: &str,
        _unit: u32,
        texture: TextureId,
    ) -> Result<(), GpuError> {
        if !self.textures.contains_key(texture) {
            return Err(GpuError::UnknownHandle("texture"));
        }
        let program = self.program_mut(program)?;
        program.samplers.insert(name.to_string(), texture);
        Ok(())
    }

    fn create_uniform_buffer(&mut self, data: &[u8]) -> Result<BufferId, GpuError> {
        Ok(self.buffers.insert(data.to_vec()))
    }

    fn update_uniform_buffer(&mut self, buffer: BufferId, data: &[u8]) -> Result<(), GpuError> {
        let buf = self
            .buffers
            .get_mut(buffer)
            .ok_or(GpuError::UnknownHandle("buffer"))?;
        buf.clear();
        buf.extend_from_slice(data);
        Ok(())
    }

    fn bind_buffer_base(&mut self, binding_point: u32, buffer: BufferId) -> Result<(), GpuError> {
        if !self.buffers.contains_key(buffer) {
            return Err(GpuError::UnknownHandle("buffer"));
        }
        self.binding_points.insert(binding_point, buffer);
        Ok(())
    }

    fn delete_uniform_buffer(&mut self, buffer: BufferId) {
        self.buffers.remove(buffer);
        self.binding_points.retain(|_, b| *b != buffer);
    }

    fn bind_uniform_block(
        &mut self,
        program: ProgramId,
        name: &str,
        binding_point: u32,
    ) -> Result<(), GpuError> {
        if !self.has_uniform_block(program, name) {
            return Err(GpuError::UnknownUniform(name.to_string()));
        }
        let program = self.program_mut(program)?;
        program.blocks.insert(name.to_string(), binding_point);
        Ok(())
    }

    fn set_uniform(
        &mut self,
        program: ProgramId,
        name: &str,
        value: &ParamValue,
    ) -> Result<(), GpuError> {
        let program = self.program_mut(program)?;
        program.uniforms.insert(name.to_string(), value.clone());
        Ok(())
    }

    fn draw(
        &mut self,
        program: ProgramId,
        framebuffer: FramebufferId,
        draw_buffers: &[Option<u32>],
    ) -> Result<(), GpuError> {
        let fb = self
            .framebuffers
            .get(framebuffer)
            .ok_or(GpuError::UnknownHandle("framebuffer"))?;
        let count = draw_buffers
            .iter()
            .rposition(Option::is_some)
            .map_or(0, |i| i + 1);

        // Take the bound targets out of the texture table so the kernel can
        // write them while sampling the rest.
        let mut bound = Vec::with_capacity(count);
        let mut slots = Vec::with_capacity(count);
        let mut shape = None;
        for slot in &draw_buffers[..count] {
            let target = slot.and_then(|att| fb.attachments.get(&att).copied());
            match target.and_then(|id| self.textures.get_mut(id).map(|t| (id, t))) {
                Some((id, tex)) => {
                    shape.get_or_insert((tex.desc.width as usize, tex.desc.height as usize));
                    let mut data = std::mem::take(&mut tex.data);
                    data.fill(0.0);
                    bound.push(Some(id));
                    slots.push(Some(data));
                }
                None => {
                    bound.push(None);
                    slots.push(None);
                }
            }
        }

        let program = self.program(program)?;
        let (width, height) = shape.unwrap_or((0, 0));
        let ctx = KernelContext {
            width,
            height,
            uniforms: &program.uniforms,
            samplers: program
                .samplers
                .iter()
                .filter_map(|(name, id)| {
                    self.textures
                        .get(*id)
                        .filter(|t| !t.data.is_empty())
                        .map(|t| (name.as_str(), t.data.as_slice()))
                })
                .collect(),
            blocks: program
                .blocks
                .iter()
                .filter_map(|(name, point)| {
                    let buffer = self.binding_points.get(point)?;
                    self.buffers
                        .get(*buffer)
                        .map(|b| (name.as_str(), b.as_slice()))
                })
                .collect(),
        };
        let mut targets = KernelTargets { slots };
        (program.kernel)(&ctx, &mut targets);
        tracing::trace!(program = %program.label, targets = count, "software draw");

        for (id, data) in bound.into_iter().zip(targets.slots) {
            if let (Some(id), Some(data)) = (id, data) {
                if let Some(tex) = self.textures.get_mut(id) {
                    tex.data = data;
                }
            }
        }
        self.draw_calls += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VERT: &str = "void main() {}";

    #[test]
    fn program_needs_registered_kernel() {
        let mut gpu = SoftwareBackend::empty();
        let err = gpu.create_program("missing", VERT, "void main() {}").unwrap_err();
        assert!(matches!(err, GpuError::ProgramLink { .. }));
    }

    #[test]
    fn program_without_main_fails_compile() {
        let mut gpu = SoftwareBackend::new();
        let err = gpu
            .create_program(crate::paths::FINAL_RENDER, VERT, "uniform float x;")
            .unwrap_err();
        assert!(matches!(err, GpuError::ShaderCompile { .. }));
    }

    #[test]
    fn draw_runs_kernel_into_attachment() {
        let mut gpu = SoftwareBackend::empty();
        gpu.register_kernel("fill", |ctx, out| {
            let v = ctx.float("v", 0.0);
            if let Some(t) = out.target(1) {
                t.fill(v);
            }
        });
        let program = gpu
            .create_program("fill", VERT, "uniform float v; void main() {}")
            .unwrap();
        let fb = gpu.create_framebuffer().unwrap();
        let tex = gpu.create_texture(&TextureDesc::new(4, 2), None).unwrap();
        gpu.attach_texture(fb, 3, tex).unwrap();
        gpu.set_uniform(program, "v", &ParamValue::Float(0.5)).unwrap();
        gpu.draw(program, fb, &[None, Some(3)]).unwrap();

        let mut out = vec![0.0; 8];
        gpu.read_texture(tex, &mut out).unwrap();
        assert!(out.iter().all(|&s| s == 0.5));
        assert_eq!(gpu.draw_calls(), 1);
    }

    #[test]
    fn draw_clears_targets_first() {
        let mut gpu = SoftwareBackend::empty();
        gpu.register_kernel("noop", |_, _| {});
        let program = gpu.create_program("noop", VERT, VERT).unwrap();
        let fb = gpu.create_framebuffer().unwrap();
        let tex = gpu
            .create_texture(&TextureDesc::new(2, 1), Some(&[1.0, 1.0][..]))
            .unwrap();
        gpu.attach_texture(fb, 0, tex).unwrap();
        gpu.draw(program, fb, &[Some(0)]).unwrap();
        let mut out = [9.0; 2];
        gpu.read_texture(tex, &mut out).unwrap();
        assert_eq!(out, [0.0, 0.0]);
    }

    #[test]
    fn uniform_block_reads_bound_buffer() {
        let mut gpu = SoftwareBackend::empty();
        gpu.register_kernel("time", |ctx, out| {
            let t = ctx.block_int("global_time").unwrap_or(-1) as f32;
            if let Some(target) = out.target(0) {
                target.fill(t);
            }
        });
        let program = gpu
            .create_program("time", VERT, "uniform global_time { int t; }; void main() {}")
            .unwrap();
        let buffer = gpu.create_uniform_buffer(&7i32.to_le_bytes()).unwrap();
        gpu.bind_buffer_base(2, buffer).unwrap();
        gpu.bind_uniform_block(program, "global_time", 2).unwrap();
        assert!(gpu.bind_uniform_block(program, "missing_block", 2).is_err());

        let fb = gpu.create_framebuffer().unwrap();
        let tex = gpu.create_texture(&TextureDesc::new(1, 1), None).unwrap();
        gpu.attach_texture(fb, 0, tex).unwrap();
        gpu.draw(program, fb, &[Some(0)]).unwrap();
        let mut out = [0.0];
        gpu.read_texture(tex, &mut out).unwrap();
        assert_eq!(out, [7.0]);
    }

    #[test]
    fn delete_releases_handles() {
        let mut gpu = SoftwareBackend::new();
        let tex = gpu.create_texture(&TextureDesc::new(2, 2), None).unwrap();
        let fb = gpu.create_framebuffer().unwrap();
        assert_eq!(gpu.live_resources(), 2);
        gpu.delete_texture(tex);
        gpu.delete_framebuffer(fb);
        assert_eq!(gpu.live_resources(), 0);
        assert!(gpu.upload_texture(tex, &[0.0; 4]).is_err());
    }

    #[test]
    fn texture_size_is_checked() {
        let mut gpu = SoftwareBackend::new();
        let err = gpu
            .create_texture(&TextureDesc::new(2, 2), Some(&[0.0; 3][..]))
            .unwrap_err();
        assert!(matches!(err, GpuError::SizeMismatch { expected: 4, actual: 3 }));
    }
}
