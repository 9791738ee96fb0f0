//! OpenGL implementation of [`GpuBackend`] on top of `glow`.
//!
//! Textures are `R32F` images, one row per channel. Passes draw a single
//! full-screen triangle generated from `gl_VertexID`, so the backend owns
//! one empty vertex array and no vertex buffers.

use std::collections::BTreeMap;

use glow::HasContext;
use slotmap::SlotMap;
use sw_ir::ParamValue;

use crate::traits::{
    BufferId, FramebufferId, GpuBackend, GpuError, ProgramId, TextureDesc, TextureFilter,
    TextureId,
};

struct TextureEntry {
    texture: glow::NativeTexture,
    desc: TextureDesc,
}

struct FramebufferEntry {
    framebuffer: glow::NativeFramebuffer,
    attachments: BTreeMap<u32, TextureId>,
}

/// GPU backend driving a `glow` OpenGL (ES 3.0+) context.
pub struct GlowBackend {
    gl: glow::Context,
    programs: SlotMap<ProgramId, glow::NativeProgram>,
    framebuffers: SlotMap<FramebufferId, FramebufferEntry>,
    textures: SlotMap<TextureId, TextureEntry>,
    buffers: SlotMap<BufferId, glow::NativeBuffer>,
    vertex_array: glow::NativeVertexArray,
    readback: glow::NativeFramebuffer,
}

impl GlowBackend {
    /// Wrap a current GL context.
    pub fn new(gl: glow::Context) -> Result<Self, GpuError> {
        let (vertex_array, readback) = unsafe {
            let vao = gl.create_vertex_array().map_err(GpuError::Backend)?;
            let fb = gl.create_framebuffer().map_err(GpuError::Backend)?;
            (vao, fb)
        };
        Ok(Self {
            gl,
            programs: SlotMap::with_key(),
            framebuffers: SlotMap::with_key(),
            textures: SlotMap::with_key(),
            buffers: SlotMap::with_key(),
            vertex_array,
            readback,
        })
    }

    pub fn context(&self) -> &glow::Context {
        &self.gl
    }

    fn program(&self, program: ProgramId) -> Result<glow::NativeProgram, GpuError> {
        self.programs
            .get(program)
            .copied()
            .ok_or(GpuError::UnknownHandle("program"))
    }

    fn texture(&self, texture: TextureId) -> Result<&TextureEntry, GpuError> {
        self.textures
            .get(texture)
            .ok_or(GpuError::UnknownHandle("texture"))
    }

    fn buffer(&self, buffer: BufferId) -> Result<glow::NativeBuffer, GpuError> {
        self.buffers
            .get(buffer)
            .copied()
            .ok_or(GpuError::UnknownHandle("buffer"))
    }

    unsafe fn compile_shader(
        &self,
        label: &str,
        kind: u32,
        source: &str,
    ) -> Result<glow::NativeShader, GpuError> {
        let shader = self.gl.create_shader(kind).map_err(GpuError::Backend)?;
        self.gl.shader_source(shader, source);
        self.gl.compile_shader(shader);
        if !self.gl.get_shader_compile_status(shader) {
            let log = self.gl.get_shader_info_log(shader);
            self.gl.delete_shader(shader);
            return Err(GpuError::ShaderCompile {
                label: label.to_string(),
                log,
            });
        }
        Ok(shader)
    }
}

impl Drop for GlowBackend {
    fn drop(&mut self) {
        if !self.textures.is_empty() || !self.programs.is_empty() {
            tracing::warn!(
                textures = self.textures.len(),
                programs = self.programs.len(),
                "GL backend dropped with live resources"
            );
        }
        unsafe {
            self.gl.delete_vertex_array(self.vertex_array);
            self.gl.delete_framebuffer(self.readback);
        }
    }
}

fn filter_enum(filter: TextureFilter) -> i32 {
    match filter {
        TextureFilter::Nearest => glow::NEAREST as i32,
        TextureFilter::Linear => glow::LINEAR as i32,
    }
}

impl GpuBackend for GlowBackend {
    fn create_program(
        &mut self,
        label: &str,
        vertex: &str,
        fragment: &str,
    ) -> Result<ProgramId, GpuError> {
        unsafe {
            let vs = self.compile_shader(label, glow::VERTEX_SHADER, vertex)?;
            let fs = match self.compile_shader(label, glow::FRAGMENT_SHADER, fragment) {
                Ok(fs) => fs,
                Err(e) => {
                    self.gl.delete_shader(vs);
                    return Err(e);
                }
            };
            let program = self.gl.create_program().map_err(GpuError::Backend)?;
            self.gl.attach_shader(program, vs);
            self.gl.attach_shader(program, fs);
            self.gl.link_program(program);
            for shader in [vs, fs] {
                self.gl.detach_shader(program, shader);
                self.gl.delete_shader(shader);
            }
            if !self.gl.get_program_link_status(program) {
                let log = self.gl.get_program_info_log(program);
                self.gl.delete_program(program);
                return Err(GpuError::ProgramLink {
                    label: label.to_string(),
                    log,
                });
            }
            tracing::debug!(label, "linked GL program");
            Ok(self.programs.insert(program))
        }
    }

    fn delete_program(&mut self, program: ProgramId) {
        if let Some(p) = self.programs.remove(program) {
            unsafe { self.gl.delete_program(p) };
        }
    }

    fn has_uniform(&self, program: ProgramId, name: &str) -> bool {
        self.programs
            .get(program)
            .is_some_and(|p| unsafe { self.gl.get_uniform_location(*p, name).is_some() })
    }

    fn has_uniform_block(&self, program: ProgramId, name: &str) -> bool {
        self.programs
            .get(program)
            .is_some_and(|p| unsafe { self.gl.get_uniform_block_index(*p, name).is_some() })
    }

    fn create_framebuffer(&mut self) -> Result<FramebufferId, GpuError> {
        let framebuffer = unsafe { self.gl.create_framebuffer().map_err(GpuError::Backend)? };
        Ok(self.framebuffers.insert(FramebufferEntry {
            framebuffer,
            attachments: BTreeMap::new(),
        }))
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        if let Some(entry) = self.framebuffers.remove(framebuffer) {
            unsafe { self.gl.delete_framebuffer(entry.framebuffer) };
        }
    }

    fn attach_texture(
        &mut self,
        framebuffer: FramebufferId,
        attachment: u32,
        texture: TextureId,
    ) -> Result<(), GpuError> {
        let tex = self.texture(texture)?.texture;
        let entry = self
            .framebuffers
            .get_mut(framebuffer)
            .ok_or(GpuError::UnknownHandle("framebuffer"))?;
        unsafe {
            self.gl
                .bind_framebuffer(glow::FRAMEBUFFER, Some(entry.framebuffer));
            self.gl.framebuffer_texture_2d(
                glow::FRAMEBUFFER,
                glow::COLOR_ATTACHMENT0 + attachment,
                glow::TEXTURE_2D,
                Some(tex),
                0,
            );
            let status = self.gl.check_framebuffer_status(glow::FRAMEBUFFER);
            self.gl.bind_framebuffer(glow::FRAMEBUFFER, None);
            if status != glow::FRAMEBUFFER_COMPLETE {
                return Err(GpuError::Framebuffer(format!("status 0x{:x}", status)));
            }
        }
        entry.attachments.insert(attachment, texture);
        Ok(())
    }

    fn create_texture(
        &mut self,
        desc: &TextureDesc,
        data: Option<&[f32]>,
    ) -> Result<TextureId, GpuError> {
        if let Some(data) = data {
            if data.len() != desc.len() {
                return Err(GpuError::SizeMismatch {
                    expected: desc.len(),
                    actual: data.len(),
                });
            }
        }
        let texture = unsafe {
            let tex = self.gl.create_texture().map_err(GpuError::Backend)?;
            self.gl.bind_texture(glow::TEXTURE_2D, Some(tex));
            let filter = filter_enum(desc.filter);
            self.gl
                .tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MIN_FILTER, filter);
            self.gl
                .tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MAG_FILTER, filter);
            self.gl.tex_parameter_i32(
                glow::TEXTURE_2D,
                glow::TEXTURE_WRAP_S,
                glow::CLAMP_TO_EDGE as i32,
            );
            self.gl.tex_parameter_i32(
                glow::TEXTURE_2D,
                glow::TEXTURE_WRAP_T,
                glow::CLAMP_TO_EDGE as i32,
            );
            self.gl.tex_image_2d(
                glow::TEXTURE_2D,
                0,
                glow::R32F as i32,
                desc.width as i32,
                desc.height as i32,
                0,
                glow::RED,
                glow::FLOAT,
                data.map(bytemuck::cast_slice),
            );
            self.gl.bind_texture(glow::TEXTURE_2D, None);
            tex
        };
        Ok(self.textures.insert(TextureEntry {
            texture,
            desc: *desc,
        }))
    }

    fn upload_texture(&mut self, texture: TextureId, data: &[f32]) -> Result<(), GpuError> {
        let entry = self.texture(texture)?;
        if data.len() != entry.desc.len() {
            return Err(GpuError::SizeMismatch {
                expected: entry.desc.len(),
                actual: data.len(),
            });
        }
        unsafe {
            self.gl.bind_texture(glow::TEXTURE_2D, Some(entry.texture));
            self.gl.tex_sub_image_2d(
                glow::TEXTURE_2D,
                0,
                0,
                0,
                entry.desc.width as i32,
                entry.desc.height as i32,
                glow::RED,
                glow::FLOAT,
                glow::PixelUnpackData::Slice(bytemuck::cast_slice(data)),
            );
            self.gl.bind_texture(glow::TEXTURE_2D, None);
        }
        Ok(())
    }

    fn read_texture(&mut self, texture: TextureId, out: &mut [f32]) -> Result<(), GpuError> {
        let entry = self.texture(texture)?;
        if out.len() != entry.desc.len() {
            return Err(GpuError::SizeMismatch {
                expected: entry.desc.len(),
                actual: out.len(),
            });
        }
        unsafe {
            self.gl
                .bind_framebuffer(glow::READ_FRAMEBUFFER, Some(self.readback));
            self.gl.framebuffer_texture_2d(
                glow::READ_FRAMEBUFFER,
                glow::COLOR_ATTACHMENT0,
                glow::TEXTURE_2D,
                Some(entry.texture),
                0,
            );
            self.gl.read_buffer(glow::COLOR_ATTACHMENT0);
            self.gl.read_pixels(
                0,
                0,
                entry.desc.width as i32,
                entry.desc.height as i32,
                glow::RED,
                glow::FLOAT,
                glow::PixelPackData::Slice(bytemuck::cast_slice_mut(out)),
            );
            self.gl.bind_framebuffer(glow::READ_FRAMEBUFFER, None);
        }
        Ok(())
    }

    fn delete_texture(&mut self, texture: TextureId) {
        if let Some(entry) = self.textures.remove(texture) {
            unsafe { self.gl.delete_texture(entry.texture) };
            for fb in self.framebuffers.values_mut() {
                fb.attachments.retain(|_, t| *t != texture);
            }
        }
    }

    fn bind_sampler(
        &mut self,
        program: ProgramId,
        name: &str,
        unit: u32,
        texture: TextureId,
    ) -> Result<(), GpuError> {
        let program = self.program(program)?;
        let tex = self.texture(texture)?.texture;
        unsafe {
            self.gl.use_program(Some(program));
            self.gl.active_texture(glow::TEXTURE0 + unit);
            self.gl.bind_texture(glow::TEXTURE_2D, Some(tex));
            let location = self.gl.get_uniform_location(program, name);
            self.gl.uniform_1_i32(location.as_ref(), unit as i32);
        }
        Ok(())
    }

    fn create_uniform_buffer(&mut self, data: &[u8]) -> Result<BufferId, GpuError> {
        let buffer = unsafe {
            let buffer = self.gl.create_buffer().map_err(GpuError::Backend)?;
            self.gl.bind_buffer(glow::UNIFORM_BUFFER, Some(buffer));
            self.gl
                .buffer_data_u8_slice(glow::UNIFORM_BUFFER, data, glow::DYNAMIC_DRAW);
            self.gl.bind_buffer(glow::UNIFORM_BUFFER, None);
            buffer
        };
        Ok(self.buffers.insert(buffer))
    }

    fn update_uniform_buffer(&mut self, buffer: BufferId, data: &[u8]) -> Result<(), GpuError> {
        let buffer = self.buffer(buffer)?;
        unsafe {
            self.gl.bind_buffer(glow::UNIFORM_BUFFER, Some(buffer));
            self.gl.buffer_sub_data_u8_slice(glow::UNIFORM_BUFFER, 0, data);
            self.gl.bind_buffer(glow::UNIFORM_BUFFER, None);
        }
        Ok(())
    }

    fn bind_buffer_base(&mut self, binding_point: u32, buffer: BufferId) -> Result<(), GpuError> {
        let buffer = self.buffer(buffer)?;
        unsafe {
            self.gl
                .bind_buffer_base(glow::UNIFORM_BUFFER, binding_point, Some(buffer));
        }
        Ok(())
    }

    fn delete_uniform_buffer(&mut self, buffer: BufferId) {
        if let Some(b) = self.buffers.remove(buffer) {
            unsafe { self.gl.delete_buffer(b) };
        }
    }

    fn bind_uniform_block(
        &mut self,
        program: ProgramId,
        name: &str,
        binding_point: u32,
    ) -> Result<(), GpuError> {
        let program = self.program(program)?;
        unsafe {
            let index = self
                .gl
                .get_uniform_block_index(program, name)
                .ok_or_else(|| GpuError::UnknownUniform(name.to_string()))?;
            self.gl.uniform_block_binding(program, index, binding_point);
        }
        Ok(())
    }

    fn set_uniform(
        &mut self,
        program: ProgramId,
        name: &str,
        value: &ParamValue,
    ) -> Result<(), GpuError> {
        let program = self.program(program)?;
        unsafe {
            self.gl.use_program(Some(program));
            let location = self.gl.get_uniform_location(program, name);
            match value {
                ParamValue::Bool(b) => self.gl.uniform_1_i32(location.as_ref(), *b as i32),
                ParamValue::Int(i) => self.gl.uniform_1_i32(location.as_ref(), *i),
                ParamValue::Float(x) => self.gl.uniform_1_f32(location.as_ref(), *x),
                ParamValue::FloatArray(v) => self.gl.uniform_1_f32_slice(location.as_ref(), v),
            }
        }
        Ok(())
    }

    fn draw(
        &mut self,
        program: ProgramId,
        framebuffer: FramebufferId,
        draw_buffers: &[Option<u32>],
    ) -> Result<(), GpuError> {
        let program = self.program(program)?;
        let entry = self
            .framebuffers
            .get(framebuffer)
            .ok_or(GpuError::UnknownHandle("framebuffer"))?;
        let count = draw_buffers
            .iter()
            .rposition(Option::is_some)
            .map_or(0, |i| i + 1);
        let buffers: Vec<u32> = draw_buffers[..count]
            .iter()
            .map(|slot| slot.map_or(glow::NONE, |a| glow::COLOR_ATTACHMENT0 + a))
            .collect();
        let (width, height) = draw_buffers[..count]
            .iter()
            .flatten()
            .find_map(|a| entry.attachments.get(a))
            .and_then(|t| self.textures.get(*t))
            .map_or((0, 0), |t| (t.desc.width as i32, t.desc.height as i32));

        unsafe {
            self.gl
                .bind_framebuffer(glow::FRAMEBUFFER, Some(entry.framebuffer));
            self.gl.draw_buffers(&buffers);
            self.gl.viewport(0, 0, width, height);
            self.gl.clear_color(0.0, 0.0, 0.0, 0.0);
            self.gl.clear(glow::COLOR_BUFFER_BIT);
            self.gl.use_program(Some(program));
            self.gl.bind_vertex_array(Some(self.vertex_array));
            self.gl.draw_arrays(glow::TRIANGLES, 0, 3);
            self.gl.bind_vertex_array(None);
            self.gl.bind_framebuffer(glow::FRAMEBUFFER, None);
        }
        Ok(())
    }
}
