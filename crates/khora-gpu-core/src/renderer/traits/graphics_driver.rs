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

use crate::renderer::api::*;
use crate::renderer::error::DriverError;
use std::fmt::Debug;

/// A uniform reported by the driver after a program links.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveUniform {
    /// Name as reported, possibly with a `[0]` suffix for arrays.
    pub name: String,
    /// Driver location.
    pub location: i32,
    /// Array length; 1 for non-arrays.
    pub array_size: u32,
}

/// The stateful, handle-based graphics driver of one context.
///
/// Every call acts on whatever context is current on the calling thread. The
/// trait is a thin mirror of the driver's entry points; deduplication,
/// pooling and context affinity are handled by the layers above it.
pub trait GraphicsDriver: Debug {
    /// Limits and features of the current context.
    fn capabilities(&self) -> &DriverCapabilities;

    // --- Contexts ---

    /// Makes `context` current on the calling thread. Issued only when the
    /// current context actually changes.
    fn make_current(&mut self, context: ContextId);

    // --- Buffers ---

    /// Creates a new buffer object.
    /// ## Errors
    /// * `DriverError` - If the driver could not allocate a name.
    fn create_buffer(&mut self) -> Result<BufferHandle, DriverError>;

    /// Binds a buffer (or the reserved name 0) to a non-framebuffer target.
    fn bind_buffer(&mut self, target: BufferTarget, buffer: BufferHandle);

    /// (Re)allocates the storage of the buffer bound at `target` and fills it.
    fn buffer_data(&mut self, target: BufferTarget, data: &[u8], usage: BufferUsage);

    /// Writes into the storage of the buffer bound at `target`.
    fn buffer_sub_data(&mut self, target: BufferTarget, offset: usize, data: &[u8]);

    /// Deletes a buffer object.
    fn delete_buffer(&mut self, buffer: BufferHandle);

    // --- Textures ---

    /// Creates a new texture object.
    /// ## Errors
    /// * `DriverError` - If the driver could not allocate a name.
    fn create_texture(&mut self) -> Result<TextureHandle, DriverError>;

    /// Selects the texture unit subsequent texture calls act on.
    fn active_texture(&mut self, unit: u32);

    /// Binds a texture on the active unit.
    fn bind_texture(&mut self, target: TextureTarget, texture: TextureHandle);

    /// Sets an integer parameter on the texture bound at `target`.
    fn tex_parameter_i(&mut self, target: TextureTarget, parameter: TextureParameter, value: i32);

    /// Sets a float parameter on the texture bound at `target`.
    fn tex_parameter_f(&mut self, target: TextureTarget, parameter: TextureParameter, value: f32);

    /// Allocates immutable storage for the texture bound at `target`.
    fn tex_storage_2d(&mut self, target: TextureTarget, format: PixelFormat, width: u32, height: u32);

    /// Copies the read framebuffer into the texture bound at `target`.
    fn copy_tex_sub_image_2d(&mut self, target: TextureTarget, level: u32, width: u32, height: u32);

    /// Deletes a texture object.
    fn delete_texture(&mut self, texture: TextureHandle);

    // --- Fixed-function state ---

    /// Enables a capability.
    fn enable(&mut self, capability: Capability);
    /// Disables a capability.
    fn disable(&mut self, capability: Capability);
    /// Sets one blend function for colour and alpha.
    fn blend_func(&mut self, source: BlendFactor, dest: BlendFactor);
    /// Sets separate colour and alpha blend functions.
    fn blend_func_separate(
        &mut self,
        source_rgb: BlendFactor,
        dest_rgb: BlendFactor,
        source_alpha: BlendFactor,
        dest_alpha: BlendFactor,
    );
    /// Sets one blend equation for colour and alpha.
    fn blend_equation(&mut self, equation: BlendEquation);
    /// Sets separate colour and alpha blend equations.
    fn blend_equation_separate(&mut self, rgb: BlendEquation, alpha: BlendEquation);
    /// Enables or disables depth writes.
    fn depth_mask(&mut self, enabled: bool);
    /// Sets the depth comparison.
    fn depth_func(&mut self, func: CompareFunction);
    /// Sets the stencil write mask.
    fn stencil_mask(&mut self, mask: u32);
    /// Sets the colour used by `clear`.
    fn clear_colour(&mut self, colour: [f32; 4]);
    /// Sets the depth used by `clear`.
    fn clear_depth(&mut self, depth: f32);
    /// Sets per-channel colour write masks.
    fn colour_mask(&mut self, mask: [bool; 4]);
    /// Selects culled faces.
    fn cull_face(&mut self, face: CullFace);
    /// Sets polygon rasterisation mode.
    fn polygon_mode(&mut self, mode: PolygonMode);
    /// Sets rasterised point size.
    fn point_size(&mut self, size: f32);
    /// Sets the viewport.
    fn viewport(&mut self, rect: Rect);
    /// Clears planes of the bound draw framebuffer.
    fn clear(&mut self, buffers: ClearBuffers);

    // --- Framebuffers ---

    /// Creates a new framebuffer object.
    /// ## Errors
    /// * `DriverError` - If the driver could not allocate a name.
    fn create_framebuffer(&mut self) -> Result<FramebufferHandle, DriverError>;

    /// Binds a framebuffer. `target` is one of the framebuffer [`BufferTarget`]s.
    fn bind_framebuffer(&mut self, target: BufferTarget, framebuffer: FramebufferHandle);

    /// Attaches a texture level to the framebuffer bound at `target`.
    /// `TextureHandle::NONE` detaches.
    fn framebuffer_texture(
        &mut self,
        target: BufferTarget,
        attachment: Attachment,
        texture_target: TextureTarget,
        texture: TextureHandle,
        level: u32,
    );

    /// Attaches a renderbuffer to the framebuffer bound at `target`.
    /// `RenderbufferHandle::NONE` detaches.
    fn framebuffer_renderbuffer(
        &mut self,
        target: BufferTarget,
        attachment: Attachment,
        renderbuffer: RenderbufferHandle,
    );

    /// Reads the completeness of the framebuffer bound at `target`.
    fn check_framebuffer_status(&mut self, target: BufferTarget) -> FramebufferStatus;

    /// Selects the colour attachments written by fragment outputs.
    fn draw_buffers(&mut self, attachments: &[Attachment]);

    /// Selects the colour attachment read by blits and copies.
    fn read_buffer(&mut self, attachment: Attachment);

    /// Copies a rectangle from the read framebuffer to the draw framebuffer.
    fn blit_framebuffer(&mut self, source: Rect, dest: Rect, mask: ClearBuffers, filter: BlitFilter);

    /// Deletes a framebuffer object.
    fn delete_framebuffer(&mut self, framebuffer: FramebufferHandle);

    // --- Renderbuffers ---

    /// Creates a new renderbuffer object.
    /// ## Errors
    /// * `DriverError` - If the driver could not allocate a name.
    fn create_renderbuffer(&mut self) -> Result<RenderbufferHandle, DriverError>;

    /// Binds a renderbuffer.
    fn bind_renderbuffer(&mut self, renderbuffer: RenderbufferHandle);

    /// Allocates storage for the bound renderbuffer. `samples == 0` means single-sampled.
    fn renderbuffer_storage(&mut self, format: RenderbufferFormat, width: u32, height: u32, samples: u32);

    /// Deletes a renderbuffer object.
    fn delete_renderbuffer(&mut self, renderbuffer: RenderbufferHandle);

    /// Asks the driver whether `format` can be used as a framebuffer attachment.
    /// Only meaningful with [`DriverFeatures::INTERNAL_FORMAT_QUERY`].
    fn is_format_renderable(&mut self, format: RenderbufferFormat) -> bool;

    // --- Programs ---

    /// Creates a new program object.
    /// ## Errors
    /// * `DriverError` - If the driver could not allocate a name.
    fn create_program(&mut self) -> Result<ProgramHandle, DriverError>;

    /// Marks a program as separable before linking.
    fn set_program_separable(&mut self, program: ProgramHandle, separable: bool);

    /// Attaches a compiled stage to a program.
    fn attach_shader(&mut self, program: ProgramHandle, shader: ShaderHandle);

    /// Links a program. Returns the link status.
    fn link_program(&mut self, program: ProgramHandle) -> bool;

    /// Returns the info log of the last link.
    fn program_info_log(&mut self, program: ProgramHandle) -> String;

    /// Retrieves the linked binary and its format token, if the driver supports it.
    fn program_binary(&mut self, program: ProgramHandle) -> Option<(u32, Vec<u8>)>;

    /// Loads a previously retrieved binary. Returns the resulting link status.
    fn load_program_binary(&mut self, program: ProgramHandle, format: u32, binary: &[u8]) -> bool;

    /// Lists the active uniforms of a linked program.
    fn active_uniforms(&mut self, program: ProgramHandle) -> Vec<ActiveUniform>;

    /// Makes a monolithic program current.
    fn use_program(&mut self, program: ProgramHandle);

    /// Deletes a program object.
    fn delete_program(&mut self, program: ProgramHandle);

    /// Creates a program pipeline object.
    /// ## Errors
    /// * `DriverError` - If the driver could not allocate a name.
    fn create_program_pipeline(&mut self) -> Result<ProgramPipelineHandle, DriverError>;

    /// Installs a separable program for one stage of a pipeline.
    fn use_program_stages(&mut self, pipeline: ProgramPipelineHandle, stage: ShaderStage, program: ProgramHandle);

    /// Makes a program pipeline current.
    fn bind_program_pipeline(&mut self, pipeline: ProgramPipelineHandle);

    /// Deletes a program pipeline object.
    fn delete_program_pipeline(&mut self, pipeline: ProgramPipelineHandle);

    /// Uploads a uniform to the current monolithic program.
    fn set_uniform(&mut self, location: i32, data: UniformData<'_>);

    /// Uploads a uniform to a specific program (separable stage programs).
    fn set_program_uniform(&mut self, program: ProgramHandle, location: i32, data: UniformData<'_>);

    // --- Vertex arrays and draws ---

    /// Creates a vertex array object.
    /// ## Errors
    /// * `DriverError` - If the driver could not allocate a name.
    fn create_vertex_array(&mut self) -> Result<VertexArrayHandle, DriverError>;

    /// Binds a vertex array object.
    fn bind_vertex_array(&mut self, vertex_array: VertexArrayHandle);

    /// Deletes a vertex array object.
    fn delete_vertex_array(&mut self, vertex_array: VertexArrayHandle);

    /// Draws non-indexed primitives.
    fn draw_arrays(&mut self, primitive: PrimitiveType, first: u32, count: u32, instances: u32);

    /// Draws indexed primitives from the bound element buffer.
    fn draw_elements(
        &mut self,
        primitive: PrimitiveType,
        count: u32,
        format: IndexFormat,
        byte_offset: usize,
        instances: u32,
    );
}
