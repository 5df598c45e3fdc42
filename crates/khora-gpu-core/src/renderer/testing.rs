// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! An in-memory [`GraphicsDriver`] that records every call.
//!
//! [`RecordingDriver`] hands out unique names, tracks live objects, buffer
//! contents and framebuffer attachments, and can be scripted to reject
//! formats, fail links or refuse program binaries. It backs the unit and
//! integration tests of the caching layers.

use crate::renderer::api::*;
use crate::renderer::error::DriverError;
use crate::renderer::traits::{ActiveUniform, GraphicsDriver};
use ahash::{AHashMap, AHashSet};

/// Binary format token reported by [`RecordingDriver::program_binary`].
pub const RECORDING_BINARY_FORMAT: u32 = 0x8741;

/// One recorded driver call.
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum DriverCall {
    MakeCurrent(ContextId),
    CreateBuffer(BufferHandle),
    BindBuffer(BufferTarget, BufferHandle),
    BufferData { target: BufferTarget, len: usize },
    BufferSubData { target: BufferTarget, offset: usize, len: usize },
    DeleteBuffer(BufferHandle),
    CreateTexture(TextureHandle),
    ActiveTexture(u32),
    BindTexture(TextureTarget, TextureHandle),
    TexParameterI(TextureTarget, TextureParameter, i32),
    TexParameterF(TextureTarget, TextureParameter, f32),
    TexStorage2D { format: PixelFormat, width: u32, height: u32 },
    CopyTexSubImage2D { width: u32, height: u32 },
    DeleteTexture(TextureHandle),
    Enable(Capability),
    Disable(Capability),
    BlendFunc(BlendFactor, BlendFactor),
    BlendFuncSeparate(BlendFactor, BlendFactor, BlendFactor, BlendFactor),
    BlendEquation(BlendEquation),
    BlendEquationSeparate(BlendEquation, BlendEquation),
    DepthMask(bool),
    DepthFunc(CompareFunction),
    StencilMask(u32),
    ClearColour([f32; 4]),
    ClearDepth(f32),
    ColourMask([bool; 4]),
    CullFace(CullFace),
    PolygonMode(PolygonMode),
    PointSize(f32),
    Viewport(Rect),
    Clear(ClearBuffers),
    CreateFramebuffer(FramebufferHandle),
    BindFramebuffer(BufferTarget, FramebufferHandle),
    FramebufferTexture { attachment: Attachment, texture: TextureHandle },
    FramebufferRenderbuffer { attachment: Attachment, renderbuffer: RenderbufferHandle },
    CheckFramebufferStatus(FramebufferStatus),
    DrawBuffers(Vec<Attachment>),
    ReadBuffer(Attachment),
    BlitFramebuffer { mask: ClearBuffers, filter: BlitFilter },
    DeleteFramebuffer(FramebufferHandle),
    CreateRenderbuffer(RenderbufferHandle),
    BindRenderbuffer(RenderbufferHandle),
    RenderbufferStorage { format: RenderbufferFormat, width: u32, height: u32, samples: u32 },
    DeleteRenderbuffer(RenderbufferHandle),
    IsFormatRenderable(RenderbufferFormat),
    CreateProgram(ProgramHandle),
    SetProgramSeparable(ProgramHandle, bool),
    AttachShader(ProgramHandle, ShaderHandle),
    LinkProgram(ProgramHandle),
    ProgramBinary(ProgramHandle),
    LoadProgramBinary(ProgramHandle),
    UseProgram(ProgramHandle),
    DeleteProgram(ProgramHandle),
    CreateProgramPipeline(ProgramPipelineHandle),
    UseProgramStages(ProgramPipelineHandle, ShaderStage, ProgramHandle),
    BindProgramPipeline(ProgramPipelineHandle),
    DeleteProgramPipeline(ProgramPipelineHandle),
    SetUniform { location: i32, bytes: Vec<u8> },
    SetProgramUniform { program: ProgramHandle, location: i32, bytes: Vec<u8> },
    CreateVertexArray(VertexArrayHandle),
    BindVertexArray(VertexArrayHandle),
    DeleteVertexArray(VertexArrayHandle),
    DrawArrays { primitive: PrimitiveType, first: u32, count: u32, instances: u32 },
    DrawElements { primitive: PrimitiveType, count: u32, format: IndexFormat, instances: u32 },
}

/// An image attached to a framebuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachedImage {
    /// A texture level.
    Texture(TextureHandle),
    /// A renderbuffer.
    Renderbuffer(RenderbufferHandle),
}

#[derive(Debug, Default)]
struct ProgramRecord {
    shaders: Vec<ShaderHandle>,
    linked: bool,
}

/// A scriptable in-memory driver. See the module docs.
#[derive(Debug)]
pub struct RecordingDriver {
    caps: DriverCapabilities,
    current_context: Option<ContextId>,
    next_name: u32,
    calls: Vec<DriverCall>,
    live: AHashSet<DriverObject>,

    draw_framebuffer: FramebufferHandle,
    read_framebuffer: FramebufferHandle,
    renderbuffer: RenderbufferHandle,
    active_unit: u32,
    buffers: AHashMap<BufferTarget, BufferHandle>,
    textures: AHashMap<(u32, TextureTarget), TextureHandle>,
    current_program: ProgramHandle,

    buffer_contents: AHashMap<BufferHandle, Vec<u8>>,
    texture_formats: AHashMap<TextureHandle, PixelFormat>,
    renderbuffer_formats: AHashMap<RenderbufferHandle, RenderbufferFormat>,
    attachments: AHashMap<FramebufferHandle, AHashMap<Attachment, AttachedImage>>,
    programs: AHashMap<ProgramHandle, ProgramRecord>,

    unrenderable_colour: AHashSet<PixelFormat>,
    depthless_colour: AHashSet<PixelFormat>,
    unsupported_depth: AHashSet<DepthFormat>,
    unsupported_stencil: AHashSet<StencilFormat>,
    reject_separate_stencil: bool,
    failing_shaders: AHashSet<ShaderHandle>,
    shader_uniforms: AHashMap<ShaderHandle, Vec<(String, u32)>>,
    reject_binaries: bool,
}

impl Default for RecordingDriver {
    fn default() -> Self {
        Self::new(DriverCapabilities::default())
    }
}

impl RecordingDriver {
    /// Creates a driver reporting `caps`.
    pub fn new(caps: DriverCapabilities) -> Self {
        Self {
            caps,
            current_context: None,
            next_name: 1,
            calls: Vec::new(),
            live: AHashSet::new(),
            draw_framebuffer: FramebufferHandle::NONE,
            read_framebuffer: FramebufferHandle::NONE,
            renderbuffer: RenderbufferHandle::NONE,
            active_unit: 0,
            buffers: AHashMap::new(),
            textures: AHashMap::new(),
            current_program: ProgramHandle::NONE,
            buffer_contents: AHashMap::new(),
            texture_formats: AHashMap::new(),
            renderbuffer_formats: AHashMap::new(),
            attachments: AHashMap::new(),
            programs: AHashMap::new(),
            unrenderable_colour: AHashSet::new(),
            depthless_colour: AHashSet::new(),
            unsupported_depth: AHashSet::new(),
            unsupported_stencil: AHashSet::new(),
            reject_separate_stencil: false,
            failing_shaders: AHashSet::new(),
            shader_uniforms: AHashMap::new(),
            reject_binaries: false,
        }
    }

    // --- Scripting ---

    /// Replaces the reported capabilities.
    pub fn set_capabilities(&mut self, caps: DriverCapabilities) {
        self.caps = caps;
    }

    /// Framebuffers with a colour attachment of `format` are never complete.
    pub fn reject_colour_format(&mut self, format: PixelFormat) {
        self.unrenderable_colour.insert(format);
    }

    /// `format` renders, but never together with a depth or stencil attachment.
    pub fn reject_depth_with(&mut self, format: PixelFormat) {
        self.depthless_colour.insert(format);
    }

    /// Framebuffers using `format` as depth are never complete.
    pub fn reject_depth_format(&mut self, format: DepthFormat) {
        self.unsupported_depth.insert(format);
    }

    /// Framebuffers using `format` as standalone stencil are never complete.
    pub fn reject_stencil_format(&mut self, format: StencilFormat) {
        self.unsupported_stencil.insert(format);
    }

    /// Rejects unpacked depth combined with a standalone stencil buffer.
    pub fn set_reject_separate_stencil(&mut self, reject: bool) {
        self.reject_separate_stencil = reject;
    }

    /// Any program with `shader` attached fails to link.
    pub fn fail_link_with(&mut self, shader: ShaderHandle) {
        self.failing_shaders.insert(shader);
    }

    /// Lets programs with `shader` attached link again.
    pub fn allow_link_with(&mut self, shader: ShaderHandle) {
        self.failing_shaders.remove(&shader);
    }

    /// Declares the uniforms a shader exposes once linked, as `(name, array size)`.
    pub fn register_uniforms(&mut self, shader: ShaderHandle, uniforms: &[(&str, u32)]) {
        self.shader_uniforms.insert(
            shader,
            uniforms
                .iter()
                .map(|(name, size)| (name.to_string(), *size))
                .collect(),
        );
    }

    /// Makes `load_program_binary` fail.
    pub fn set_reject_binaries(&mut self, reject: bool) {
        self.reject_binaries = reject;
    }

    /// Simulates context loss: every object and binding vanishes.
    pub fn lose_context(&mut self) {
        self.live.clear();
        self.draw_framebuffer = FramebufferHandle::NONE;
        self.read_framebuffer = FramebufferHandle::NONE;
        self.renderbuffer = RenderbufferHandle::NONE;
        self.active_unit = 0;
        self.buffers.clear();
        self.textures.clear();
        self.current_program = ProgramHandle::NONE;
        self.buffer_contents.clear();
        self.texture_formats.clear();
        self.renderbuffer_formats.clear();
        self.attachments.clear();
        self.programs.clear();
    }

    // --- Inspection ---

    /// Every call since creation or the last [`clear_calls`](Self::clear_calls).
    pub fn calls(&self) -> &[DriverCall] {
        &self.calls
    }

    /// Forgets recorded calls.
    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    /// Number of recorded calls matching `predicate`.
    pub fn count_calls(&self, predicate: impl Fn(&DriverCall) -> bool) -> usize {
        self.calls.iter().filter(|call| predicate(call)).count()
    }

    /// Returns `true` if `object` was created and not deleted.
    pub fn is_live(&self, object: DriverObject) -> bool {
        self.live.contains(&object)
    }

    /// Number of live renderbuffers.
    pub fn live_renderbuffers(&self) -> usize {
        self.live
            .iter()
            .filter(|o| matches!(o, DriverObject::Renderbuffer(_)))
            .count()
    }

    /// Number of live framebuffers.
    pub fn live_framebuffers(&self) -> usize {
        self.live
            .iter()
            .filter(|o| matches!(o, DriverObject::Framebuffer(_)))
            .count()
    }

    /// Number of live programs.
    pub fn live_programs(&self) -> usize {
        self.live
            .iter()
            .filter(|o| matches!(o, DriverObject::Program(_)))
            .count()
    }

    /// Current contents of a buffer.
    pub fn buffer_contents(&self, buffer: BufferHandle) -> Option<&[u8]> {
        self.buffer_contents.get(&buffer).map(Vec::as_slice)
    }

    /// Storage format of a renderbuffer.
    pub fn renderbuffer_format(&self, renderbuffer: RenderbufferHandle) -> Option<RenderbufferFormat> {
        self.renderbuffer_formats.get(&renderbuffer).copied()
    }

    /// Image attached to `framebuffer` at `attachment`.
    pub fn attachment(&self, framebuffer: FramebufferHandle, attachment: Attachment) -> Option<AttachedImage> {
        self.attachments
            .get(&framebuffer)
            .and_then(|points| points.get(&attachment))
            .copied()
    }

    /// The context last made current through the driver.
    pub fn current_context(&self) -> Option<ContextId> {
        self.current_context
    }

    /// The framebuffer bound for drawing.
    pub fn bound_draw_framebuffer(&self) -> FramebufferHandle {
        self.draw_framebuffer
    }

    /// The program made current by `use_program`.
    pub fn current_program(&self) -> ProgramHandle {
        self.current_program
    }

    // --- Internals ---

    fn next_name(&mut self) -> u32 {
        let name = self.next_name;
        self.next_name += 1;
        name
    }

    fn framebuffer_at(&self, target: BufferTarget) -> FramebufferHandle {
        match target {
            BufferTarget::ReadFramebuffer => self.read_framebuffer,
            _ => self.draw_framebuffer,
        }
    }

    fn attach(&mut self, target: BufferTarget, attachment: Attachment, image: Option<AttachedImage>) {
        let framebuffer = self.framebuffer_at(target);
        if framebuffer.is_none() {
            return;
        }
        let points = self.attachments.entry(framebuffer).or_default();
        match image {
            Some(image) => {
                points.insert(attachment, image);
            }
            None => {
                points.remove(&attachment);
            }
        }
    }

    fn image_format(&self, image: AttachedImage) -> Option<RenderbufferFormat> {
        match image {
            AttachedImage::Texture(texture) => {
                self.texture_formats.get(&texture).map(|f| RenderbufferFormat::Colour(*f))
            }
            AttachedImage::Renderbuffer(rb) => self.renderbuffer_formats.get(&rb).copied(),
        }
    }

    fn evaluate_status(&self, framebuffer: FramebufferHandle) -> FramebufferStatus {
        if framebuffer.is_none() {
            return FramebufferStatus::Complete;
        }
        let Some(points) = self.attachments.get(&framebuffer) else {
            return FramebufferStatus::MissingAttachment;
        };
        if points.is_empty() {
            return FramebufferStatus::MissingAttachment;
        }

        let mut colour_formats = Vec::new();
        let mut depth = None;
        let mut stencil = None;
        for (point, image) in points {
            let Some(format) = self.image_format(*image) else {
                return FramebufferStatus::IncompleteAttachment;
            };
            match point {
                Attachment::Colour(_) => match format {
                    RenderbufferFormat::Colour(pixel) => colour_formats.push(pixel),
                    _ => return FramebufferStatus::IncompleteAttachment,
                },
                Attachment::Depth => depth = Some(format),
                Attachment::Stencil => stencil = Some(format),
                Attachment::None | Attachment::Back => {}
            }
        }

        if colour_formats
            .iter()
            .any(|f| self.unrenderable_colour.contains(f))
        {
            return FramebufferStatus::Unsupported;
        }
        let has_depth_or_stencil = depth.is_some() || stencil.is_some();
        if has_depth_or_stencil
            && colour_formats.iter().any(|f| self.depthless_colour.contains(f))
        {
            return FramebufferStatus::Unsupported;
        }
        match depth {
            Some(RenderbufferFormat::Depth(d)) if self.unsupported_depth.contains(&d) => {
                return FramebufferStatus::Unsupported
            }
            Some(RenderbufferFormat::Depth(_)) | None => {}
            Some(_) => return FramebufferStatus::IncompleteAttachment,
        }
        match stencil {
            Some(RenderbufferFormat::Stencil(s)) => {
                if self.unsupported_stencil.contains(&s) {
                    return FramebufferStatus::Unsupported;
                }
                let unpacked_depth =
                    matches!(depth, Some(RenderbufferFormat::Depth(d)) if !d.is_packed());
                if self.reject_separate_stencil && unpacked_depth {
                    return FramebufferStatus::Unsupported;
                }
            }
            Some(RenderbufferFormat::Depth(d)) if d.is_packed() => {
                if self.unsupported_depth.contains(&d) {
                    return FramebufferStatus::Unsupported;
                }
            }
            None => {}
            Some(_) => return FramebufferStatus::IncompleteAttachment,
        }
        FramebufferStatus::Complete
    }
}

fn uniform_bytes(data: &UniformData<'_>) -> Vec<u8> {
    data.as_bytes().to_vec()
}

impl GraphicsDriver for RecordingDriver {
    fn capabilities(&self) -> &DriverCapabilities {
        &self.caps
    }

    fn make_current(&mut self, context: ContextId) {
        self.current_context = Some(context);
        self.calls.push(DriverCall::MakeCurrent(context));
    }

    fn create_buffer(&mut self) -> Result<BufferHandle, DriverError> {
        let handle = BufferHandle(self.next_name());
        self.live.insert(DriverObject::Buffer(handle));
        self.calls.push(DriverCall::CreateBuffer(handle));
        Ok(handle)
    }

    fn bind_buffer(&mut self, target: BufferTarget, buffer: BufferHandle) {
        self.buffers.insert(target, buffer);
        self.calls.push(DriverCall::BindBuffer(target, buffer));
    }

    fn buffer_data(&mut self, target: BufferTarget, data: &[u8], _usage: BufferUsage) {
        if let Some(buffer) = self.buffers.get(&target).copied().filter(|b| !b.is_none()) {
            self.buffer_contents.insert(buffer, data.to_vec());
        }
        self.calls.push(DriverCall::BufferData {
            target,
            len: data.len(),
        });
    }

    fn buffer_sub_data(&mut self, target: BufferTarget, offset: usize, data: &[u8]) {
        if let Some(buffer) = self.buffers.get(&target).copied() {
            if let Some(contents) = self.buffer_contents.get_mut(&buffer) {
                let end = (offset + data.len()).min(contents.len());
                if offset < end {
                    contents[offset..end].copy_from_slice(&data[..end - offset]);
                }
            }
        }
        self.calls.push(DriverCall::BufferSubData {
            target,
            offset,
            len: data.len(),
        });
    }

    fn delete_buffer(&mut self, buffer: BufferHandle) {
        self.live.remove(&DriverObject::Buffer(buffer));
        self.buffer_contents.remove(&buffer);
        self.buffers.retain(|_, bound| *bound != buffer);
        self.calls.push(DriverCall::DeleteBuffer(buffer));
    }

    fn create_texture(&mut self) -> Result<TextureHandle, DriverError> {
        let handle = TextureHandle(self.next_name());
        self.live.insert(DriverObject::Texture(handle));
        self.calls.push(DriverCall::CreateTexture(handle));
        Ok(handle)
    }

    fn active_texture(&mut self, unit: u32) {
        self.active_unit = unit;
        self.calls.push(DriverCall::ActiveTexture(unit));
    }

    fn bind_texture(&mut self, target: TextureTarget, texture: TextureHandle) {
        self.textures.insert((self.active_unit, target), texture);
        self.calls.push(DriverCall::BindTexture(target, texture));
    }

    fn tex_parameter_i(&mut self, target: TextureTarget, parameter: TextureParameter, value: i32) {
        self.calls.push(DriverCall::TexParameterI(target, parameter, value));
    }

    fn tex_parameter_f(&mut self, target: TextureTarget, parameter: TextureParameter, value: f32) {
        self.calls.push(DriverCall::TexParameterF(target, parameter, value));
    }

    fn tex_storage_2d(&mut self, target: TextureTarget, format: PixelFormat, width: u32, height: u32) {
        if let Some(texture) = self.textures.get(&(self.active_unit, target)).copied() {
            self.texture_formats.insert(texture, format);
        }
        self.calls.push(DriverCall::TexStorage2D {
            format,
            width,
            height,
        });
    }

    fn copy_tex_sub_image_2d(&mut self, _target: TextureTarget, _level: u32, width: u32, height: u32) {
        self.calls.push(DriverCall::CopyTexSubImage2D { width, height });
    }

    fn delete_texture(&mut self, texture: TextureHandle) {
        self.live.remove(&DriverObject::Texture(texture));
        self.texture_formats.remove(&texture);
        self.textures.retain(|_, bound| *bound != texture);
        self.calls.push(DriverCall::DeleteTexture(texture));
    }

    fn enable(&mut self, capability: Capability) {
        self.calls.push(DriverCall::Enable(capability));
    }

    fn disable(&mut self, capability: Capability) {
        self.calls.push(DriverCall::Disable(capability));
    }

    fn blend_func(&mut self, source: BlendFactor, dest: BlendFactor) {
        self.calls.push(DriverCall::BlendFunc(source, dest));
    }

    fn blend_func_separate(
        &mut self,
        source_rgb: BlendFactor,
        dest_rgb: BlendFactor,
        source_alpha: BlendFactor,
        dest_alpha: BlendFactor,
    ) {
        self.calls.push(DriverCall::BlendFuncSeparate(
            source_rgb,
            dest_rgb,
            source_alpha,
            dest_alpha,
        ));
    }

    fn blend_equation(&mut self, equation: BlendEquation) {
        self.calls.push(DriverCall::BlendEquation(equation));
    }

    fn blend_equation_separate(&mut self, rgb: BlendEquation, alpha: BlendEquation) {
        self.calls.push(DriverCall::BlendEquationSeparate(rgb, alpha));
    }

    fn depth_mask(&mut self, enabled: bool) {
        self.calls.push(DriverCall::DepthMask(enabled));
    }

    fn depth_func(&mut self, func: CompareFunction) {
        self.calls.push(DriverCall::DepthFunc(func));
    }

    fn stencil_mask(&mut self, mask: u32) {
        self.calls.push(DriverCall::StencilMask(mask));
    }

    fn clear_colour(&mut self, colour: [f32; 4]) {
        self.calls.push(DriverCall::ClearColour(colour));
    }

    fn clear_depth(&mut self, depth: f32) {
        self.calls.push(DriverCall::ClearDepth(depth));
    }

    fn colour_mask(&mut self, mask: [bool; 4]) {
        self.calls.push(DriverCall::ColourMask(mask));
    }

    fn cull_face(&mut self, face: CullFace) {
        self.calls.push(DriverCall::CullFace(face));
    }

    fn polygon_mode(&mut self, mode: PolygonMode) {
        self.calls.push(DriverCall::PolygonMode(mode));
    }

    fn point_size(&mut self, size: f32) {
        self.calls.push(DriverCall::PointSize(size));
    }

    fn viewport(&mut self, rect: Rect) {
        self.calls.push(DriverCall::Viewport(rect));
    }

    fn clear(&mut self, buffers: ClearBuffers) {
        self.calls.push(DriverCall::Clear(buffers));
    }

    fn create_framebuffer(&mut self) -> Result<FramebufferHandle, DriverError> {
        let handle = FramebufferHandle(self.next_name());
        self.live.insert(DriverObject::Framebuffer(handle));
        self.calls.push(DriverCall::CreateFramebuffer(handle));
        Ok(handle)
    }

    fn bind_framebuffer(&mut self, target: BufferTarget, framebuffer: FramebufferHandle) {
        match target {
            BufferTarget::DrawFramebuffer => self.draw_framebuffer = framebuffer,
            BufferTarget::ReadFramebuffer => self.read_framebuffer = framebuffer,
            _ => {
                self.draw_framebuffer = framebuffer;
                self.read_framebuffer = framebuffer;
            }
        }
        self.calls.push(DriverCall::BindFramebuffer(target, framebuffer));
    }

    fn framebuffer_texture(
        &mut self,
        target: BufferTarget,
        attachment: Attachment,
        _texture_target: TextureTarget,
        texture: TextureHandle,
        _level: u32,
    ) {
        let image = (!texture.is_none()).then_some(AttachedImage::Texture(texture));
        self.attach(target, attachment, image);
        self.calls.push(DriverCall::FramebufferTexture { attachment, texture });
    }

    fn framebuffer_renderbuffer(
        &mut self,
        target: BufferTarget,
        attachment: Attachment,
        renderbuffer: RenderbufferHandle,
    ) {
        let image = (!renderbuffer.is_none()).then_some(AttachedImage::Renderbuffer(renderbuffer));
        self.attach(target, attachment, image);
        self.calls.push(DriverCall::FramebufferRenderbuffer {
            attachment,
            renderbuffer,
        });
    }

    fn check_framebuffer_status(&mut self, target: BufferTarget) -> FramebufferStatus {
        let status = self.evaluate_status(self.framebuffer_at(target));
        self.calls.push(DriverCall::CheckFramebufferStatus(status));
        status
    }

    fn draw_buffers(&mut self, attachments: &[Attachment]) {
        self.calls.push(DriverCall::DrawBuffers(attachments.to_vec()));
    }

    fn read_buffer(&mut self, attachment: Attachment) {
        self.calls.push(DriverCall::ReadBuffer(attachment));
    }

    fn blit_framebuffer(&mut self, _source: Rect, _dest: Rect, mask: ClearBuffers, filter: BlitFilter) {
        self.calls.push(DriverCall::BlitFramebuffer { mask, filter });
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        self.live.remove(&DriverObject::Framebuffer(framebuffer));
        self.attachments.remove(&framebuffer);
        if self.draw_framebuffer == framebuffer {
            self.draw_framebuffer = FramebufferHandle::NONE;
        }
        if self.read_framebuffer == framebuffer {
            self.read_framebuffer = FramebufferHandle::NONE;
        }
        self.calls.push(DriverCall::DeleteFramebuffer(framebuffer));
    }

    fn create_renderbuffer(&mut self) -> Result<RenderbufferHandle, DriverError> {
        let handle = RenderbufferHandle(self.next_name());
        self.live.insert(DriverObject::Renderbuffer(handle));
        self.calls.push(DriverCall::CreateRenderbuffer(handle));
        Ok(handle)
    }

    fn bind_renderbuffer(&mut self, renderbuffer: RenderbufferHandle) {
        self.renderbuffer = renderbuffer;
        self.calls.push(DriverCall::BindRenderbuffer(renderbuffer));
    }

    fn renderbuffer_storage(&mut self, format: RenderbufferFormat, width: u32, height: u32, samples: u32) {
        if !self.renderbuffer.is_none() {
            self.renderbuffer_formats.insert(self.renderbuffer, format);
        }
        self.calls.push(DriverCall::RenderbufferStorage {
            format,
            width,
            height,
            samples,
        });
    }

    fn delete_renderbuffer(&mut self, renderbuffer: RenderbufferHandle) {
        self.live.remove(&DriverObject::Renderbuffer(renderbuffer));
        self.renderbuffer_formats.remove(&renderbuffer);
        if self.renderbuffer == renderbuffer {
            self.renderbuffer = RenderbufferHandle::NONE;
        }
        self.calls.push(DriverCall::DeleteRenderbuffer(renderbuffer));
    }

    fn is_format_renderable(&mut self, format: RenderbufferFormat) -> bool {
        self.calls.push(DriverCall::IsFormatRenderable(format));
        match format {
            RenderbufferFormat::Colour(f) => !self.unrenderable_colour.contains(&f),
            RenderbufferFormat::Depth(d) => !self.unsupported_depth.contains(&d),
            RenderbufferFormat::Stencil(s) => !self.unsupported_stencil.contains(&s),
        }
    }

    fn create_program(&mut self) -> Result<ProgramHandle, DriverError> {
        let handle = ProgramHandle(self.next_name());
        self.live.insert(DriverObject::Program(handle));
        self.programs.insert(handle, ProgramRecord::default());
        self.calls.push(DriverCall::CreateProgram(handle));
        Ok(handle)
    }

    fn set_program_separable(&mut self, program: ProgramHandle, separable: bool) {
        self.calls.push(DriverCall::SetProgramSeparable(program, separable));
    }

    fn attach_shader(&mut self, program: ProgramHandle, shader: ShaderHandle) {
        if let Some(record) = self.programs.get_mut(&program) {
            record.shaders.push(shader);
        }
        self.calls.push(DriverCall::AttachShader(program, shader));
    }

    fn link_program(&mut self, program: ProgramHandle) -> bool {
        self.calls.push(DriverCall::LinkProgram(program));
        let failing = &self.failing_shaders;
        match self.programs.get_mut(&program) {
            Some(record) => {
                record.linked = !record.shaders.iter().any(|s| failing.contains(s));
                record.linked
            }
            None => false,
        }
    }

    fn program_info_log(&mut self, program: ProgramHandle) -> String {
        match self.programs.get(&program) {
            Some(record) if !record.linked => {
                format!("program {} failed to link", program.0)
            }
            _ => String::new(),
        }
    }

    fn program_binary(&mut self, program: ProgramHandle) -> Option<(u32, Vec<u8>)> {
        self.calls.push(DriverCall::ProgramBinary(program));
        if !self.caps.has(DriverFeatures::PROGRAM_BINARY) {
            return None;
        }
        let record = self.programs.get(&program).filter(|r| r.linked)?;
        let blob = record
            .shaders
            .iter()
            .flat_map(|s| s.0.to_le_bytes())
            .collect();
        Some((RECORDING_BINARY_FORMAT, blob))
    }

    fn load_program_binary(&mut self, program: ProgramHandle, format: u32, binary: &[u8]) -> bool {
        self.calls.push(DriverCall::LoadProgramBinary(program));
        if self.reject_binaries || format != RECORDING_BINARY_FORMAT || binary.len() % 4 != 0 {
            return false;
        }
        let Some(record) = self.programs.get_mut(&program) else {
            return false;
        };
        record.shaders = binary
            .chunks_exact(4)
            .map(|c| ShaderHandle(u32::from_le_bytes([c[0], c[1], c[2], c[3]])))
            .collect();
        record.linked = true;
        true
    }

    fn active_uniforms(&mut self, program: ProgramHandle) -> Vec<ActiveUniform> {
        let Some(record) = self.programs.get(&program).filter(|r| r.linked) else {
            return Vec::new();
        };
        let mut uniforms: Vec<ActiveUniform> = Vec::new();
        for shader in &record.shaders {
            for (name, size) in self.shader_uniforms.get(shader).into_iter().flatten() {
                if uniforms.iter().any(|u| &u.name == name) {
                    continue;
                }
                uniforms.push(ActiveUniform {
                    name: name.clone(),
                    location: uniforms.len() as i32,
                    array_size: *size,
                });
            }
        }
        uniforms
    }

    fn use_program(&mut self, program: ProgramHandle) {
        self.current_program = program;
        self.calls.push(DriverCall::UseProgram(program));
    }

    fn delete_program(&mut self, program: ProgramHandle) {
        self.live.remove(&DriverObject::Program(program));
        self.programs.remove(&program);
        if self.current_program == program {
            self.current_program = ProgramHandle::NONE;
        }
        self.calls.push(DriverCall::DeleteProgram(program));
    }

    fn create_program_pipeline(&mut self) -> Result<ProgramPipelineHandle, DriverError> {
        let handle = ProgramPipelineHandle(self.next_name());
        self.live.insert(DriverObject::ProgramPipeline(handle));
        self.calls.push(DriverCall::CreateProgramPipeline(handle));
        Ok(handle)
    }

    fn use_program_stages(&mut self, pipeline: ProgramPipelineHandle, stage: ShaderStage, program: ProgramHandle) {
        self.calls.push(DriverCall::UseProgramStages(pipeline, stage, program));
    }

    fn bind_program_pipeline(&mut self, pipeline: ProgramPipelineHandle) {
        self.calls.push(DriverCall::BindProgramPipeline(pipeline));
    }

    fn delete_program_pipeline(&mut self, pipeline: ProgramPipelineHandle) {
        self.live.remove(&DriverObject::ProgramPipeline(pipeline));
        self.calls.push(DriverCall::DeleteProgramPipeline(pipeline));
    }

    fn set_uniform(&mut self, location: i32, data: UniformData<'_>) {
        self.calls.push(DriverCall::SetUniform {
            location,
            bytes: uniform_bytes(&data),
        });
    }

    fn set_program_uniform(&mut self, program: ProgramHandle, location: i32, data: UniformData<'_>) {
        self.calls.push(DriverCall::SetProgramUniform {
            program,
            location,
            bytes: uniform_bytes(&data),
        });
    }

    fn create_vertex_array(&mut self) -> Result<VertexArrayHandle, DriverError> {
        let handle = VertexArrayHandle(self.next_name());
        self.live.insert(DriverObject::VertexArray(handle));
        self.calls.push(DriverCall::CreateVertexArray(handle));
        Ok(handle)
    }

    fn bind_vertex_array(&mut self, vertex_array: VertexArrayHandle) {
        self.calls.push(DriverCall::BindVertexArray(vertex_array));
    }

    fn delete_vertex_array(&mut self, vertex_array: VertexArrayHandle) {
        self.live.remove(&DriverObject::VertexArray(vertex_array));
        self.calls.push(DriverCall::DeleteVertexArray(vertex_array));
    }

    fn draw_arrays(&mut self, primitive: PrimitiveType, first: u32, count: u32, instances: u32) {
        self.calls.push(DriverCall::DrawArrays {
            primitive,
            first,
            count,
            instances,
        });
    }

    fn draw_elements(
        &mut self,
        primitive: PrimitiveType,
        count: u32,
        format: IndexFormat,
        _byte_offset: usize,
        instances: u32,
    ) {
        self.calls.push(DriverCall::DrawElements {
            primitive,
            count,
            format,
            instances,
        });
    }
}
