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

//! The backend facade the engine drives.

use crate::context::ContextRegistry;
use crate::fbo::{RenderTargetManager, SurfaceDesc};
use crate::hardware_buffer::ShadowedBufferManager;
use crate::program::{LinkStrategy, ProgramCache, ProgramKey};
use crate::settings::GlBackendSettings;
use khora_gpu_core::renderer::api::{
    BufferId, BufferTarget, BufferUsage, ContextId, DrawDescriptor, DriverCapabilities,
    DriverFeatures, IndexFormat, ProgramParameters, RenderTargetId, ShaderStage,
    ShaderStageHandle, StageId, Variability,
};
use khora_gpu_core::renderer::{ConfigurationError, GraphicsDriver, MicrocodeCache, RenderError};

/// Counters of the current frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    /// Frames started with [`GlRenderSystem::begin_frame`].
    pub frame_number: u64,
    /// Draw calls issued.
    pub draw_calls: u32,
    /// Uniform uploads that reached the driver.
    pub uniform_uploads: usize,
}

/// Owns every cache of the backend and routes engine requests through them.
///
/// Methods take the driver explicitly; the facade holds no driver reference.
#[derive(Debug)]
pub struct GlRenderSystem {
    primary: ContextId,
    contexts: ContextRegistry,
    programs: ProgramCache,
    program_context: Option<ContextId>,
    microcode: MicrocodeCache,
    targets: RenderTargetManager,
    buffers: ShadowedBufferManager,
    stats: RenderStats,
}

impl GlRenderSystem {
    /// Initialises the backend on `context`, the first context created by
    /// the windowing layer. Programs are shared by every context and live
    /// on this one.
    ///
    /// # Errors
    ///
    /// Fails if the render-target manager cannot create its framebuffers.
    pub fn new(
        driver: &mut dyn GraphicsDriver,
        context: ContextId,
        capabilities: DriverCapabilities,
        settings: &GlBackendSettings,
    ) -> Result<Self, RenderError> {
        let strategy = LinkStrategy::select(&capabilities, settings.link_strategy);
        let mut contexts = ContextRegistry::new();
        contexts.register(context, capabilities);
        contexts
            .make_current(driver, context)?
            .state_cache_mut()
            .initialize_cache(driver);
        let targets = RenderTargetManager::new(driver, &mut contexts, settings)?;
        log::info!(
            "GL backend initialised on {:?}: {:?} programs, {:?} render textures",
            context,
            strategy,
            targets.mode()
        );

        Ok(Self {
            primary: context,
            contexts,
            programs: ProgramCache::new(strategy, settings.save_microcode_to_cache),
            program_context: Some(context),
            microcode: MicrocodeCache::new(),
            targets,
            buffers: ShadowedBufferManager::new(),
            stats: RenderStats::default(),
        })
    }

    /// Registers another context, e.g. for a secondary window. The current
    /// context does not change.
    pub fn add_context(&mut self, id: ContextId, capabilities: DriverCapabilities) {
        self.contexts.register(id, capabilities);
    }

    /// Every registered context.
    pub fn contexts(&self) -> &ContextRegistry {
        &self.contexts
    }

    /// The linked program cache.
    pub fn programs(&self) -> &ProgramCache {
        &self.programs
    }

    /// Windows and render textures.
    pub fn render_targets(&self) -> &RenderTargetManager {
        &self.targets
    }

    /// Vertex and index buffers with their shadows.
    pub fn buffers(&self) -> &ShadowedBufferManager {
        &self.buffers
    }

    /// The program binaries cache, for persistence between runs.
    pub fn microcode(&self) -> &MicrocodeCache {
        &self.microcode
    }

    /// The program binaries cache, for loading a saved one.
    pub fn microcode_mut(&mut self) -> &mut MicrocodeCache {
        &mut self.microcode
    }

    // --- Frame ---

    /// Starts a new frame and returns the counters of the previous one.
    pub fn begin_frame(&mut self) -> RenderStats {
        let finished = self.stats;
        self.stats = RenderStats {
            frame_number: finished.frame_number + 1,
            ..Default::default()
        };
        finished
    }

    /// Counters of the frame in progress.
    pub fn stats(&self) -> &RenderStats {
        &self.stats
    }

    // --- Programs ---

    /// Selects the vertex stage of the next draws.
    pub fn set_vertex_stage(&mut self, stage: Option<ShaderStageHandle>) {
        self.programs.set_vertex_stage(stage);
    }

    /// Selects the fragment stage of the next draws.
    pub fn set_fragment_stage(&mut self, stage: Option<ShaderStageHandle>) {
        self.programs.set_fragment_stage(stage);
    }

    /// Uploads the constants of one stage of the active program whose
    /// variability intersects `mask`. Returns the number of uploads issued.
    ///
    /// # Errors
    ///
    /// Propagates link failures of the active program.
    pub fn bind_program_parameters(
        &mut self,
        driver: &mut dyn GraphicsDriver,
        stage: ShaderStage,
        params: &ProgramParameters,
        mask: Variability,
    ) -> Result<usize, RenderError> {
        self.sync_program_context();
        let Some(program) = self.programs.active_program(driver, &mut self.microcode)? else {
            return Ok(0);
        };
        let uploads = program.update_uniforms(driver, params, mask, stage);
        self.stats.uniform_uploads += uploads;
        Ok(uploads)
    }

    /// Uploads the pass iteration counter of the active program.
    pub fn bind_pass_iteration(
        &mut self,
        driver: &mut dyn GraphicsDriver,
        params: &ProgramParameters,
    ) -> Result<bool, RenderError> {
        self.sync_program_context();
        let Some(program) = self.programs.active_program(driver, &mut self.microcode)? else {
            return Ok(false);
        };
        let written = program.update_pass_iteration_uniforms(driver, params);
        if written {
            self.stats.uniform_uploads += 1;
        }
        Ok(written)
    }

    /// Allows one more link attempt of a program that failed to link.
    pub fn retry_link(&mut self, key: ProgramKey) -> bool {
        self.programs.retry_link(key)
    }

    /// Destroys every program built from an unloaded stage.
    pub fn unload_stage(&mut self, driver: &mut dyn GraphicsDriver, stage: StageId) -> usize {
        self.programs.destroy_programs_using(driver, stage)
    }

    // --- Buffers ---

    /// Creates a vertex buffer on the current context.
    pub fn create_vertex_buffer(
        &mut self,
        driver: &mut dyn GraphicsDriver,
        usage: BufferUsage,
        data: &[u8],
    ) -> Result<BufferId, RenderError> {
        self.buffers
            .create(driver, &mut self.contexts, BufferTarget::Array, usage, data)
    }

    /// Creates an index buffer on the current context.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::Index32Unsupported`] for 32-bit indices
    /// on drivers without [`DriverFeatures::INDEX_UINT32`].
    pub fn create_index_buffer(
        &mut self,
        driver: &mut dyn GraphicsDriver,
        format: IndexFormat,
        usage: BufferUsage,
        data: &[u8],
    ) -> Result<BufferId, RenderError> {
        let capabilities = self.contexts.current_mut()?.capabilities();
        if format == IndexFormat::Uint32 && !capabilities.has(DriverFeatures::INDEX_UINT32) {
            return Err(ConfigurationError::Index32Unsupported.into());
        }
        self.buffers
            .create_index(driver, &mut self.contexts, format, usage, data)
    }

    /// Writes into a buffer. The current context is unchanged afterwards,
    /// even when the buffer lives on another one.
    pub fn write_buffer(
        &mut self,
        driver: &mut dyn GraphicsDriver,
        id: BufferId,
        offset: usize,
        data: &[u8],
    ) -> Result<(), RenderError> {
        self.buffers.write(driver, &mut self.contexts, id, offset, data)
    }

    /// Destroys a buffer now or when its context is next current.
    pub fn destroy_buffer(&mut self, driver: &mut dyn GraphicsDriver, id: BufferId) -> bool {
        self.buffers.destroy(driver, &mut self.contexts, id)
    }

    // --- Render targets ---

    /// Registers the default framebuffer of a window on `context`.
    pub fn register_window(&mut self, name: &str, context: ContextId, width: u32, height: u32) -> RenderTargetId {
        self.targets.register_window(name, context, width, height)
    }

    /// Creates a render texture on the current context.
    ///
    /// The depth buffer is attached the first time the target is bound, so a
    /// colour format without any depth/stencil mode fails in
    /// [`set_render_target`](Self::set_render_target) with
    /// [`ConfigurationError::NoDepthStencilFormat`], not here.
    pub fn create_render_texture(
        &mut self,
        driver: &mut dyn GraphicsDriver,
        name: &str,
        surface: SurfaceDesc,
        gamma: bool,
        samples: u32,
    ) -> Result<RenderTargetId, RenderError> {
        self.targets
            .create_render_texture(driver, &mut self.contexts, name, surface, gamma, samples)
    }

    /// Binds a colour surface at `slot` of a render texture.
    pub fn bind_surface(
        &mut self,
        driver: &mut dyn GraphicsDriver,
        id: RenderTargetId,
        slot: usize,
        surface: SurfaceDesc,
    ) -> Result<(), RenderError> {
        self.targets
            .bind_surface(driver, &mut self.contexts, id, slot, surface)
    }

    /// Clears `slot` of a render texture.
    pub fn unbind_surface(
        &mut self,
        driver: &mut dyn GraphicsDriver,
        id: RenderTargetId,
        slot: usize,
    ) -> Result<(), RenderError> {
        self.targets.unbind_surface(driver, &mut self.contexts, id, slot)
    }

    /// Destroys a render texture. Returns `false` for unknown ids.
    pub fn destroy_render_target(&mut self, driver: &mut dyn GraphicsDriver, id: RenderTargetId) -> bool {
        self.targets.destroy_render_target(driver, &mut self.contexts, id)
    }

    /// Moves a target to another depth pool. `POOL_NO_DEPTH` renders it
    /// without a depth buffer.
    pub fn set_depth_buffer_pool(&mut self, id: RenderTargetId, pool_id: u16) -> bool {
        self.targets.set_depth_buffer_pool(id, pool_id)
    }

    /// Makes a target current, switching contexts if it lives on another one.
    pub fn set_render_target(&mut self, driver: &mut dyn GraphicsDriver, id: RenderTargetId) -> Result<(), RenderError> {
        self.targets.set_render_target(driver, &mut self.contexts, id)
    }

    /// Programs are bound per context, so a context switch by any path makes
    /// the next activation bind again.
    fn sync_program_context(&mut self) {
        let current = self.contexts.current_id();
        if self.program_context != current {
            self.programs.forget_active();
            self.program_context = current;
        }
    }

    /// Finishes the frame of a render texture.
    pub fn swap_buffers(&mut self, driver: &mut dyn GraphicsDriver, id: RenderTargetId) -> Result<(), RenderError> {
        self.targets.swap_buffers(driver, &mut self.contexts, id)
    }

    // --- Drawing ---

    /// Issues one draw: resolves and binds the active program, uploads
    /// `params` to each of its stages, binds textures, vertex and index
    /// buffers through the state cache, then calls the driver.
    ///
    /// Texture bindings on units the context lacks are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Fails on link errors, unknown buffers, or an index range whose buffer
    /// was not created as an index buffer.
    pub fn render(
        &mut self,
        driver: &mut dyn GraphicsDriver,
        draw: &DrawDescriptor,
        params: &ProgramParameters,
    ) -> Result<(), RenderError> {
        self.sync_program_context();
        if let Some(program) = self.programs.active_program(driver, &mut self.microcode)? {
            for stage in ShaderStage::ALL {
                self.stats.uniform_uploads += program.update_uniforms(driver, params, Variability::ALL, stage);
            }
        }

        let context = self.contexts.current_mut()?;
        if let Some(vertex_array) = context.vertex_array(driver)? {
            context.state_cache_mut().bind_vertex_array(driver, vertex_array);
        }
        let cache = context.state_cache_mut();
        for binding in &draw.textures {
            if !cache.activate_texture_unit(driver, binding.unit) {
                log::warn!("Texture unit {} is not available; binding skipped", binding.unit);
                continue;
            }
            cache.bind_texture(driver, binding.target, binding.texture);
        }

        self.buffers.bind(driver, &mut self.contexts, draw.vertex_buffer)?;
        match draw.indices {
            Some(range) => {
                let format = self
                    .buffers
                    .bind(driver, &mut self.contexts, range.buffer)?
                    .index_format()
                    .ok_or_else(|| RenderError::InvalidHandle(format!("buffer {} holds no indices", range.buffer.0)))?;
                driver.draw_elements(
                    draw.primitive,
                    range.count,
                    format,
                    range.start as usize * format.size(),
                    draw.instance_count,
                );
            }
            None => driver.draw_arrays(draw.primitive, draw.vertex_start, draw.vertex_count, draw.instance_count),
        }
        self.stats.draw_calls += 1;
        Ok(())
    }

    // --- Context lifecycle ---

    /// Drops every driver handle owned by a lost context. Logical handles
    /// stay valid.
    pub fn notify_context_lost(&mut self, id: ContextId) {
        log::warn!("Graphics context {:?} lost", id);
        self.contexts.notify_context_lost(id);
        if id == self.primary {
            self.programs.notify_context_lost();
        }
        self.targets.notify_context_lost(id);
        self.buffers.notify_context_lost(id);
    }

    /// Rebuilds a reset context: state mirror, render targets, the format
    /// table and buffer contents. Programs relink on their next use.
    ///
    /// # Errors
    ///
    /// Returns the first failure after attempting every target.
    pub fn notify_context_reset(&mut self, driver: &mut dyn GraphicsDriver, id: ContextId) -> Result<(), RenderError> {
        self.contexts.make_current(driver, id)?;
        self.contexts.notify_context_reset(driver, id);
        self.programs.forget_active();
        let targets = self.targets.notify_context_reset(driver, &mut self.contexts, id);
        self.buffers.notify_context_reset(driver, &mut self.contexts, id)?;
        log::info!("Graphics context {:?} restored", id);
        targets
    }

    /// Destroys every driver object the backend created.
    pub fn shutdown(&mut self, driver: &mut dyn GraphicsDriver) {
        log::info!("GL backend shutting down");
        if let Err(err) = self.contexts.make_current(driver, self.primary) {
            log::warn!("Primary context unavailable at shutdown: {}", err);
        }
        self.programs.destroy_all(driver);
        self.targets.destroy_all(driver, &mut self.contexts);
        self.buffers.destroy_all(driver, &mut self.contexts);
    }
}
