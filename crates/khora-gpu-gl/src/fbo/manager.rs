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

use super::depth_buffer::{DepthBufferId, DepthBufferPool, DepthBufferRecord, DepthTarget, POOL_DEFAULT, POOL_NO_DEPTH};
use super::format_table::FormatCompatibilityTable;
use super::frame_buffer::FrameBufferObject;
use super::render_buffer::RenderBufferPool;
use super::surface::SurfaceDesc;
use crate::context::ContextRegistry;
use crate::settings::{GlBackendSettings, RttPreference};
use ahash::AHashMap;
use khora_gpu_core::renderer::api::{
    BufferTarget, Capability, ContextId, DepthStencilMode, DriverCapabilities, DriverFeatures,
    DriverObject, FramebufferHandle, PixelFormat, Rect, RenderTargetId,
};
use khora_gpu_core::renderer::{ConfigurationError, DriverError, GraphicsDriver, RenderError};

/// Number of scratch framebuffers kept for pixel transfers.
pub const TEMPORARY_FBOS: usize = 2;

/// How render textures receive their pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RttMode {
    /// Render straight into the texture through a framebuffer object.
    Fbo,
    /// Render into the back buffer and copy into the texture on swap.
    Copy,
}

impl RttMode {
    /// Picks the mode once per backend.
    pub fn select(capabilities: &DriverCapabilities, preference: RttPreference) -> Self {
        match preference {
            RttPreference::Copy => RttMode::Copy,
            RttPreference::Auto if capabilities.has(DriverFeatures::FRAMEBUFFER_OBJECTS) => RttMode::Fbo,
            RttPreference::Auto => {
                log::warn!("Framebuffer objects unsupported; render textures copy from the back buffer");
                RttMode::Copy
            }
        }
    }
}

#[derive(Debug)]
enum TargetKind {
    Window { width: u32, height: u32 },
    Fbo(FrameBufferObject),
    Copy { surface: SurfaceDesc },
}

#[derive(Debug)]
struct RenderTarget {
    name: String,
    context: ContextId,
    kind: TargetKind,
    gamma: bool,
    depth_pool: u16,
    depth: Option<DepthBufferId>,
}

impl RenderTarget {
    fn size(&self) -> (u32, u32) {
        match &self.kind {
            TargetKind::Window { width, height } => (*width, *height),
            TargetKind::Fbo(fbo) => (fbo.width(), fbo.height()),
            TargetKind::Copy { surface } => surface.size(),
        }
    }
}

fn invalid_target(id: RenderTargetId) -> RenderError {
    RenderError::InvalidHandle(format!("render target {}", id.0))
}

fn create_temporary(driver: &mut dyn GraphicsDriver) -> Result<[FramebufferHandle; TEMPORARY_FBOS], DriverError> {
    let mut handles = [FramebufferHandle::NONE; TEMPORARY_FBOS];
    for i in 0..TEMPORARY_FBOS {
        match driver.create_framebuffer() {
            Ok(handle) => handles[i] = handle,
            Err(err) => {
                for handle in &handles[..i] {
                    driver.delete_framebuffer(*handle);
                }
                return Err(err);
            }
        }
    }
    Ok(handles)
}

/// Window surfaces and render textures, their depth buffers and the pools
/// behind them.
///
/// All methods take the context registry: a target is always used on the
/// context that created it, and calls switch to that context when needed.
#[derive(Debug)]
pub struct RenderTargetManager {
    mode: RttMode,
    settings: GlBackendSettings,
    relaxed_depth_size: bool,
    formats: FormatCompatibilityTable,
    buffers: RenderBufferPool,
    depth_buffers: DepthBufferPool,
    targets: AHashMap<RenderTargetId, RenderTarget>,
    next_id: usize,
    temporary_owner: Option<ContextId>,
    temporary: [FramebufferHandle; TEMPORARY_FBOS],
    active: Option<RenderTargetId>,
}

impl RenderTargetManager {
    /// Creates the manager on the current context: selects the RTT mode,
    /// probes the format table and creates the temporary framebuffers.
    ///
    /// # Errors
    ///
    /// Fails without a current context or if the temporary framebuffers
    /// cannot be created.
    pub fn new(
        driver: &mut dyn GraphicsDriver,
        contexts: &mut ContextRegistry,
        settings: &GlBackendSettings,
    ) -> Result<Self, RenderError> {
        let context = contexts.current_mut()?;
        let owner = context.id();
        let capabilities = context.capabilities().clone();
        let mode = RttMode::select(&capabilities, settings.render_to_texture);
        let relaxed_depth_size = settings
            .relaxed_depth_size
            .unwrap_or_else(|| capabilities.has(DriverFeatures::RELAXED_DEPTH_SIZE));

        let cache = context.state_cache_mut();
        let formats = if mode == RttMode::Fbo && settings.probe_render_target_formats {
            FormatCompatibilityTable::probe(driver, cache)
        } else {
            FormatCompatibilityTable::new()
        };
        let (temporary_owner, temporary) = match mode {
            RttMode::Fbo => (Some(owner), create_temporary(driver)?),
            RttMode::Copy => (None, [FramebufferHandle::NONE; TEMPORARY_FBOS]),
        };
        log::info!("Render-target manager ready in {:?} mode", mode);

        Ok(Self {
            mode,
            settings: settings.clone(),
            relaxed_depth_size,
            formats,
            buffers: RenderBufferPool::new(),
            depth_buffers: DepthBufferPool::new(),
            targets: AHashMap::new(),
            next_id: 0,
            temporary_owner,
            temporary,
            active: None,
        })
    }

    /// How render textures are produced.
    pub fn mode(&self) -> RttMode {
        self.mode
    }

    /// The probed depth/stencil compatibility of every colour format.
    pub fn format_table(&self) -> &FormatCompatibilityTable {
        &self.formats
    }

    /// Shared multisample colour buffers.
    pub fn render_buffers(&self) -> &RenderBufferPool {
        &self.buffers
    }

    /// Pooled depth buffers.
    pub fn depth_buffers(&self) -> &DepthBufferPool {
        &self.depth_buffers
    }

    /// Scratch framebuffer `i` for pixel transfers, while its context is alive.
    pub fn temporary_fbo(&self, i: usize) -> Option<FramebufferHandle> {
        self.temporary.get(i).copied().filter(|handle| !handle.is_none())
    }

    /// The target bound by the last [`set_render_target`](Self::set_render_target).
    pub fn active(&self) -> Option<RenderTargetId> {
        self.active
    }

    /// Number of live targets.
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// The framebuffer object behind a render texture, if it has one.
    pub fn fbo(&self, id: RenderTargetId) -> Option<&FrameBufferObject> {
        match &self.targets.get(&id)?.kind {
            TargetKind::Fbo(fbo) => Some(fbo),
            _ => None,
        }
    }

    /// The context a target renders on.
    pub fn context(&self, id: RenderTargetId) -> Option<ContextId> {
        self.targets.get(&id).map(|target| target.context)
    }

    /// The debug name of a target.
    pub fn name(&self, id: RenderTargetId) -> Option<&str> {
        self.targets.get(&id).map(|target| target.name.as_str())
    }

    /// The depth buffer currently serving a target.
    pub fn depth_buffer(&self, id: RenderTargetId) -> Option<&DepthBufferRecord> {
        let depth = self.targets.get(&id)?.depth?;
        self.depth_buffers.get(depth)
    }

    /// Moves a target to another depth pool. The new pool is consulted the
    /// next time the target is bound.
    pub fn set_depth_buffer_pool(&mut self, id: RenderTargetId, pool_id: u16) -> bool {
        match self.targets.get_mut(&id) {
            Some(target) => {
                if target.depth_pool != pool_id {
                    target.depth_pool = pool_id;
                    target.depth = None;
                }
                true
            }
            None => false,
        }
    }

    fn insert(&mut self, target: RenderTarget) -> RenderTargetId {
        let id = RenderTargetId(self.next_id);
        self.next_id += 1;
        self.targets.insert(id, target);
        id
    }

    fn take_target(&mut self, id: RenderTargetId) -> Result<RenderTarget, RenderError> {
        self.targets.remove(&id).ok_or_else(|| invalid_target(id))
    }

    /// Registers the window surface of `context`. Its depth buffer belongs to
    /// the window itself, so a dummy record marks it in the default pool.
    pub fn register_window(
        &mut self,
        name: impl Into<String>,
        context: ContextId,
        width: u32,
        height: u32,
    ) -> RenderTargetId {
        let marker = DepthTarget {
            context,
            has_fbo: false,
            width,
            height,
            samples: 0,
            mode: DepthStencilMode::NONE,
        };
        let depth = self
            .depth_buffers
            .find_compatible(POOL_DEFAULT, &marker, false)
            .unwrap_or_else(|| self.depth_buffers.add_dummy(POOL_DEFAULT, context));
        self.insert(RenderTarget {
            name: name.into(),
            context,
            kind: TargetKind::Window { width, height },
            gamma: false,
            depth_pool: POOL_DEFAULT,
            depth: Some(depth),
        })
    }

    /// Updates the size of a window surface after the windowing layer resized it.
    pub fn resize_window(&mut self, id: RenderTargetId, width: u32, height: u32) -> bool {
        match self.targets.get_mut(&id).map(|target| &mut target.kind) {
            Some(TargetKind::Window {
                width: w,
                height: h,
            }) => {
                *w = width;
                *h = height;
                true
            }
            _ => false,
        }
    }

    /// Creates a render texture on the current context with `surface` in
    /// colour slot 0.
    ///
    /// `samples` is clamped to the driver limit and the configured override.
    /// A multisampled target also gets a multisample framebuffer with pooled
    /// colour storage of the same format, size and sample count.
    ///
    /// # Errors
    ///
    /// - [`ConfigurationError::UnsupportedRenderTargetFormat`] if the format
    ///   cannot be rendered to.
    /// - [`ConfigurationError::IncompleteFramebuffer`] if the driver rejects
    ///   the attachments.
    /// - [`RenderError::Driver`] if a driver object cannot be created.
    ///
    /// No depth buffer is chosen here. It is attached when the target is
    /// first bound, so [`ConfigurationError::NoDepthStencilFormat`] surfaces
    /// from [`set_render_target`](Self::set_render_target).
    pub fn create_render_texture(
        &mut self,
        driver: &mut dyn GraphicsDriver,
        contexts: &mut ContextRegistry,
        name: impl Into<String>,
        surface: SurfaceDesc,
        gamma: bool,
        samples: u32,
    ) -> Result<RenderTargetId, RenderError> {
        let name = name.into();
        let context = contexts.current_mut()?;
        let owner = context.id();
        let capabilities = context.capabilities();
        let driver_max = if capabilities.has(DriverFeatures::MULTISAMPLE_RENDERBUFFER) {
            capabilities.max_samples
        } else {
            0
        };
        let samples = self.settings.clamp_samples(samples, driver_max);

        let kind = match self.mode {
            RttMode::Copy => TargetKind::Copy { surface },
            RttMode::Fbo => TargetKind::Fbo(self.create_fbo(driver, contexts, owner, &name, surface, samples)?),
        };
        log::debug!(
            "Created render texture '{}' ({:?} {}x{}, {} samples)",
            name,
            surface.format,
            surface.width,
            surface.height,
            samples
        );
        Ok(self.insert(RenderTarget {
            name,
            context: owner,
            kind,
            gamma,
            depth_pool: POOL_DEFAULT,
            depth: None,
        }))
    }

    fn create_fbo(
        &mut self,
        driver: &mut dyn GraphicsDriver,
        contexts: &mut ContextRegistry,
        owner: ContextId,
        name: &str,
        surface: SurfaceDesc,
        samples: u32,
    ) -> Result<FrameBufferObject, RenderError> {
        let cache = contexts.state_cache()?;
        if !self.formats.ensure_probed(driver, cache, surface.format).valid {
            return Err(ConfigurationError::UnsupportedRenderTargetFormat {
                format: surface.format,
            }
            .into());
        }

        let mut fbo = FrameBufferObject::new(driver, owner, name, samples)?;
        match self.apply_surface(driver, contexts, &mut fbo, 0, Some(surface)) {
            Ok(()) => Ok(fbo),
            Err(err) => {
                self.release_fbo(driver, contexts, fbo);
                Err(err)
            }
        }
    }

    /// Stores a slot change, keeps the multisample storage in step with
    /// slot 0 and rebuilds the attachments. The owner must be current.
    fn apply_surface(
        &mut self,
        driver: &mut dyn GraphicsDriver,
        contexts: &mut ContextRegistry,
        fbo: &mut FrameBufferObject,
        slot: usize,
        surface: Option<SurfaceDesc>,
    ) -> Result<(), RenderError> {
        fbo.set_surface(slot, surface)?;
        self.sync_multisample(driver, contexts, fbo)?;
        if fbo.surface(0).is_some() {
            fbo.initialise(driver, contexts.state_cache()?)?;
        }
        Ok(())
    }

    fn sync_multisample(
        &mut self,
        driver: &mut dyn GraphicsDriver,
        contexts: &mut ContextRegistry,
        fbo: &mut FrameBufferObject,
    ) -> Result<(), RenderError> {
        let required = fbo.required_multisample_colour();
        if fbo.multisample_colour().map(|(key, _)| key) == required {
            return Ok(());
        }
        let next = match required {
            Some(key) => {
                let cache = contexts.state_cache()?;
                Some((key, self.buffers.request(driver, cache, fbo.context(), key)?))
            }
            None => None,
        };
        if let Some((key, _)) = fbo.set_multisample_colour(next) {
            self.buffers.release(driver, contexts, fbo.context(), key);
        }
        Ok(())
    }

    fn release_fbo(&mut self, driver: &mut dyn GraphicsDriver, contexts: &mut ContextRegistry, fbo: FrameBufferObject) {
        let owner = fbo.context();
        if let Some((key, _)) = fbo.destroy(driver, contexts) {
            self.buffers.release(driver, contexts, owner, key);
        }
    }

    /// Destroys a target. Pooled storage is released and framebuffers are
    /// deleted on their owning context, now or the next time it is current.
    /// Depth buffers stay pooled for other targets.
    pub fn destroy_render_target(
        &mut self,
        driver: &mut dyn GraphicsDriver,
        contexts: &mut ContextRegistry,
        id: RenderTargetId,
    ) -> bool {
        let Some(target) = self.targets.remove(&id) else {
            return false;
        };
        if self.active == Some(id) {
            self.active = None;
        }
        if let TargetKind::Fbo(fbo) = target.kind {
            self.release_fbo(driver, contexts, fbo);
        }
        log::debug!("Destroyed render target '{}'", target.name);
        true
    }

    /// Binds `surface` to colour slot `slot` of a render texture.
    ///
    /// # Errors
    ///
    /// Fails for unknown ids, window targets, invalid slots and attachment
    /// errors reported by [`FrameBufferObject::initialise`]. Copy-mode
    /// targets only have slot 0.
    pub fn bind_surface(
        &mut self,
        driver: &mut dyn GraphicsDriver,
        contexts: &mut ContextRegistry,
        id: RenderTargetId,
        slot: usize,
        surface: SurfaceDesc,
    ) -> Result<(), RenderError> {
        self.change_surface(driver, contexts, id, slot, Some(surface))
    }

    /// Clears colour slot `slot` of a render texture.
    pub fn unbind_surface(
        &mut self,
        driver: &mut dyn GraphicsDriver,
        contexts: &mut ContextRegistry,
        id: RenderTargetId,
        slot: usize,
    ) -> Result<(), RenderError> {
        self.change_surface(driver, contexts, id, slot, None)
    }

    fn change_surface(
        &mut self,
        driver: &mut dyn GraphicsDriver,
        contexts: &mut ContextRegistry,
        id: RenderTargetId,
        slot: usize,
        surface: Option<SurfaceDesc>,
    ) -> Result<(), RenderError> {
        let mut target = self.take_target(id)?;
        let result = self.change_target_surface(driver, contexts, &mut target, slot, surface);
        self.targets.insert(id, target);
        result
    }

    fn change_target_surface(
        &mut self,
        driver: &mut dyn GraphicsDriver,
        contexts: &mut ContextRegistry,
        target: &mut RenderTarget,
        slot: usize,
        surface: Option<SurfaceDesc>,
    ) -> Result<(), RenderError> {
        match &mut target.kind {
            TargetKind::Window { .. } => Err(RenderError::InvalidHandle(format!(
                "window '{}' has no colour slots",
                target.name
            ))),
            TargetKind::Copy { surface: current } => match (slot, surface) {
                (0, Some(surface)) => {
                    *current = surface;
                    Ok(())
                }
                (0, None) => Err(ConfigurationError::MissingColourSurface.into()),
                (slot, _) => Err(ConfigurationError::InvalidColourSlot { slot }.into()),
            },
            TargetKind::Fbo(fbo) => {
                contexts.state_cache_for(driver, target.context)?;
                self.apply_surface(driver, contexts, fbo, slot, surface)?;
                let stale = target.depth.and_then(|id| self.depth_buffers.get(id)).is_some_and(|record| {
                    let desired = self.depth_target_for(target.context, fbo);
                    !record.is_compatible(&desired, self.relaxed_depth_size)
                });
                if stale {
                    fbo.detach_depth_buffer(driver, contexts.state_cache()?);
                    target.depth = None;
                }
                Ok(())
            }
        }
    }

    fn depth_target_for(&self, context: ContextId, fbo: &FrameBufferObject) -> DepthTarget {
        DepthTarget {
            context,
            has_fbo: true,
            width: fbo.width(),
            height: fbo.height(),
            samples: fbo.samples(),
            mode: fbo
                .format()
                .map_or(DepthStencilMode::NONE, |format| self.formats.best_depth_stencil(format)),
        }
    }

    fn depth_target(&self, target: &RenderTarget) -> DepthTarget {
        match &target.kind {
            TargetKind::Fbo(fbo) => self.depth_target_for(target.context, fbo),
            TargetKind::Window { .. } | TargetKind::Copy { .. } => {
                let (width, height) = target.size();
                DepthTarget {
                    context: target.context,
                    has_fbo: false,
                    width,
                    height,
                    samples: 0,
                    mode: DepthStencilMode::NONE,
                }
            }
        }
    }

    /// Finds or creates the depth buffer of a target in its pool and
    /// attaches it. Targets in [`POOL_NO_DEPTH`] lose their depth buffer.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::NoDepthStencilFormat`] if the target's
    /// colour format cannot be paired with any depth or stencil format.
    pub fn set_depth_buffer_for(
        &mut self,
        driver: &mut dyn GraphicsDriver,
        contexts: &mut ContextRegistry,
        id: RenderTargetId,
    ) -> Result<(), RenderError> {
        let mut target = self.take_target(id)?;
        let result = self.assign_depth(driver, contexts, &mut target);
        self.targets.insert(id, target);
        result
    }

    fn assign_depth(
        &mut self,
        driver: &mut dyn GraphicsDriver,
        contexts: &mut ContextRegistry,
        target: &mut RenderTarget,
    ) -> Result<(), RenderError> {
        let cache = contexts.state_cache_for(driver, target.context)?;
        if target.depth_pool == POOL_NO_DEPTH {
            if let TargetKind::Fbo(fbo) = &mut target.kind {
                if fbo.depth_buffer().is_some() {
                    fbo.detach_depth_buffer(driver, cache);
                }
            }
            target.depth = None;
            return Ok(());
        }

        let desired = self.depth_target(target);
        let colour_format = match &target.kind {
            TargetKind::Fbo(fbo) => fbo.format(),
            TargetKind::Window { .. } | TargetKind::Copy { .. } => None,
        };
        let pool_id = target.depth_pool;
        let id = match self
            .depth_buffers
            .find_compatible(pool_id, &desired, self.relaxed_depth_size)
        {
            Some(id) => id,
            None => match colour_format {
                Some(format) if desired.mode.is_none() => {
                    return Err(ConfigurationError::NoDepthStencilFormat { format }.into());
                }
                Some(_) => self.depth_buffers.create(driver, cache, pool_id, &desired)?,
                None => self.depth_buffers.add_dummy(pool_id, target.context),
            },
        };

        if let TargetKind::Fbo(fbo) = &mut target.kind {
            fbo.attach_depth_buffer(driver, cache, self.depth_buffers.get(id));
        }
        target.depth = Some(id);
        Ok(())
    }

    /// Makes a target current for rendering.
    ///
    /// Switches to the target's context, attaches a depth buffer if the
    /// target has none on that context, binds its framebuffer (the default
    /// framebuffer for windows and copy-mode textures), toggles sRGB writes
    /// and sets the viewport to the full target.
    pub fn set_render_target(
        &mut self,
        driver: &mut dyn GraphicsDriver,
        contexts: &mut ContextRegistry,
        id: RenderTargetId,
    ) -> Result<(), RenderError> {
        let target = self.targets.get(&id).ok_or_else(|| invalid_target(id))?;
        let context = target.context;
        contexts.state_cache_for(driver, context)?;

        let needs_depth = target.depth_pool != POOL_NO_DEPTH
            && target
                .depth
                .and_then(|depth| self.depth_buffers.get(depth))
                .map_or(true, |record| record.context() != context);
        if needs_depth {
            self.set_depth_buffer_for(driver, contexts, id)?;
        }

        let target = self.targets.get(&id).ok_or_else(|| invalid_target(id))?;
        let cache = contexts.state_cache()?;
        match &target.kind {
            TargetKind::Fbo(fbo) => fbo.bind(driver, cache),
            TargetKind::Window { .. } | TargetKind::Copy { .. } => {
                cache.bind_framebuffer(driver, BufferTarget::Framebuffer, FramebufferHandle::NONE, false)
            }
        }
        if target.gamma {
            cache.set_enabled(driver, Capability::FramebufferSrgb);
        } else {
            cache.set_disabled(driver, Capability::FramebufferSrgb);
        }
        let (width, height) = target.size();
        cache.set_viewport(driver, Rect::from_size(width, height));
        self.active = Some(id);
        Ok(())
    }

    /// Finishes a frame of a render texture: resolves multisampled
    /// framebuffers, or copies the back buffer into the texture in copy mode.
    pub fn swap_buffers(
        &mut self,
        driver: &mut dyn GraphicsDriver,
        contexts: &mut ContextRegistry,
        id: RenderTargetId,
    ) -> Result<(), RenderError> {
        let target = self.targets.get(&id).ok_or_else(|| invalid_target(id))?;
        let cache = contexts.state_cache_for(driver, target.context)?;
        match &target.kind {
            TargetKind::Window { .. } => {}
            TargetKind::Fbo(fbo) => fbo.swap_buffers(driver, cache),
            TargetKind::Copy { surface } => {
                let Some((texture, texture_target, level)) = surface.texture_handle() else {
                    log::warn!("Copy-mode target '{}' has no texture to copy into", target.name);
                    return Ok(());
                };
                cache.bind_framebuffer(driver, BufferTarget::ReadFramebuffer, FramebufferHandle::NONE, false);
                cache.bind_texture(driver, texture_target, texture);
                driver.copy_tex_sub_image_2d(texture_target, level, surface.width, surface.height);
            }
        }
        Ok(())
    }

    /// Drops every driver handle of a lost context. Targets, surfaces and
    /// pool assignments are kept for [`notify_context_reset`](Self::notify_context_reset).
    pub fn notify_context_lost(&mut self, context: ContextId) {
        for target in self.targets.values_mut().filter(|t| t.context == context) {
            target.depth = None;
            if let TargetKind::Fbo(fbo) = &mut target.kind {
                fbo.notify_context_lost();
            }
        }
        self.buffers.notify_context_lost(context);
        self.depth_buffers.notify_context_lost(context);
        if self.temporary_owner == Some(context) {
            self.temporary = [FramebufferHandle::NONE; TEMPORARY_FBOS];
        }
        if self
            .active
            .and_then(|id| self.targets.get(&id))
            .is_some_and(|t| t.context == context)
        {
            self.active = None;
        }
    }

    /// Rebuilds after a context reset: re-probes the format table, recreates
    /// the temporary framebuffers and every framebuffer owned by `context`.
    /// Depth buffers are reattached the next time each target is bound.
    ///
    /// # Errors
    ///
    /// Every target is attempted; the first failure is returned.
    pub fn notify_context_reset(
        &mut self,
        driver: &mut dyn GraphicsDriver,
        contexts: &mut ContextRegistry,
        context: ContextId,
    ) -> Result<(), RenderError> {
        let cache = contexts.state_cache_for(driver, context)?;
        if self.mode == RttMode::Fbo {
            self.formats = if self.settings.probe_render_target_formats {
                FormatCompatibilityTable::probe(driver, cache)
            } else {
                let probed: Vec<PixelFormat> = self.formats.probed_formats().collect();
                let mut formats = FormatCompatibilityTable::new();
                for format in probed {
                    formats.probe_format(driver, cache, format);
                }
                formats
            };
            if self.temporary_owner == Some(context) {
                self.temporary = create_temporary(driver)?;
            }
        }
        let mut ids: Vec<RenderTargetId> = self
            .targets
            .iter()
            .filter(|(_, t)| t.context == context && matches!(t.kind, TargetKind::Fbo(_)))
            .map(|(id, _)| *id)
            .collect();
        ids.sort();

        let mut first_error = None;
        for id in ids {
            let mut target = self.take_target(id)?;
            if let Err(err) = self.restore_fbo(driver, contexts, &mut target) {
                log::warn!("Could not restore render target '{}': {}", target.name, err);
                first_error.get_or_insert(err);
            }
            self.targets.insert(id, target);
        }
        first_error.map_or(Ok(()), Err)
    }

    fn restore_fbo(
        &mut self,
        driver: &mut dyn GraphicsDriver,
        contexts: &mut ContextRegistry,
        target: &mut RenderTarget,
    ) -> Result<(), RenderError> {
        let TargetKind::Fbo(fbo) = &mut target.kind else {
            return Ok(());
        };
        fbo.forget_depth_buffer();
        fbo.recreate(driver)?;
        self.sync_multisample(driver, contexts, fbo)?;
        fbo.initialise(driver, contexts.state_cache()?)?;
        Ok(())
    }

    /// Destroys every target, depth buffer and temporary framebuffer.
    pub fn destroy_all(&mut self, driver: &mut dyn GraphicsDriver, contexts: &mut ContextRegistry) {
        let ids: Vec<RenderTargetId> = self.targets.keys().copied().collect();
        for id in ids {
            self.destroy_render_target(driver, contexts, id);
        }
        self.depth_buffers.destroy_all(driver, contexts);
        if let Some(owner) = self.temporary_owner {
            for handle in std::mem::replace(&mut self.temporary, [FramebufferHandle::NONE; TEMPORARY_FBOS]) {
                contexts.destroy_or_defer(driver, owner, DriverObject::Framebuffer(handle));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use khora_gpu_core::renderer::api::{DepthFormat, TextureTarget};
    use khora_gpu_core::renderer::testing::{DriverCall, RecordingDriver};

    const MAIN: ContextId = ContextId(1);
    const SECONDARY: ContextId = ContextId(2);

    struct Fixture {
        driver: RecordingDriver,
        contexts: ContextRegistry,
        manager: RenderTargetManager,
    }

    impl Fixture {
        fn new(mut driver: RecordingDriver, settings: GlBackendSettings) -> Self {
            let mut contexts = ContextRegistry::new();
            contexts.register(MAIN, DriverCapabilities::default());
            contexts.register(SECONDARY, DriverCapabilities::default());
            contexts.make_current(&mut driver, MAIN).unwrap();
            let manager = RenderTargetManager::new(&mut driver, &mut contexts, &settings).unwrap();
            Self {
                driver,
                contexts,
                manager,
            }
        }

        fn texture(&mut self, format: PixelFormat, width: u32, height: u32) -> SurfaceDesc {
            let texture = self.driver.create_texture().unwrap();
            self.driver.bind_texture(TextureTarget::D2, texture);
            self.driver.tex_storage_2d(TextureTarget::D2, format, width, height);
            SurfaceDesc::texture(texture, format, width, height)
        }

        fn render_texture(&mut self, name: &str, format: PixelFormat, samples: u32) -> Result<RenderTargetId, RenderError> {
            let surface = self.texture(format, 64, 64);
            self.manager
                .create_render_texture(&mut self.driver, &mut self.contexts, name, surface, false, samples)
        }

        fn bind(&mut self, id: RenderTargetId) -> Result<(), RenderError> {
            self.manager.set_render_target(&mut self.driver, &mut self.contexts, id)
        }

        fn shutdown(&mut self) {
            self.manager.destroy_all(&mut self.driver, &mut self.contexts);
        }
    }

    fn fixture() -> Fixture {
        Fixture::new(RecordingDriver::default(), GlBackendSettings::default())
    }

    #[test]
    fn test_mode_selection() {
        let plain = DriverCapabilities {
            features: DriverFeatures::empty(),
            ..Default::default()
        };
        let full = DriverCapabilities::default();
        assert_eq!(RttMode::select(&full, RttPreference::Auto), RttMode::Fbo);
        assert_eq!(RttMode::select(&plain, RttPreference::Auto), RttMode::Copy);
        assert_eq!(RttMode::select(&full, RttPreference::Copy), RttMode::Copy);
    }

    #[test]
    fn test_same_sized_targets_share_one_packed_depth_buffer() {
        let mut f = fixture();
        let a = f.render_texture("a", PixelFormat::Rgba8Unorm, 0).unwrap();
        let b = f.render_texture("b", PixelFormat::Rgba8Unorm, 0).unwrap();
        f.bind(a).unwrap();
        f.bind(b).unwrap();

        let depth_a = f.manager.depth_buffer(a).unwrap();
        let depth_b = f.manager.depth_buffer(b).unwrap();
        assert_eq!(depth_a.id(), depth_b.id());
        assert!(depth_a.is_packed());
        assert_eq!(depth_a.mode().depth, Some(DepthFormat::Depth24Stencil8));
        assert_eq!(f.driver.live_renderbuffers(), 1);
        assert_eq!(f.manager.active(), Some(b));

        f.shutdown();
        assert_eq!(f.driver.live_renderbuffers(), 0);
    }

    #[test]
    fn test_multisample_colour_storage_is_shared_and_freed_once() {
        let mut f = fixture();
        let a = f.render_texture("a", PixelFormat::Rgba8Unorm, 4).unwrap();
        let b = f.render_texture("b", PixelFormat::Rgba8Unorm, 4).unwrap();
        let (key, _) = f.manager.fbo(a).unwrap().multisample_colour().unwrap();

        assert_eq!(f.manager.render_buffers().len(), 1);
        assert_eq!(f.manager.render_buffers().refcount(MAIN, key), Some(2));
        f.driver.clear_calls();

        assert!(f.manager.destroy_render_target(&mut f.driver, &mut f.contexts, a));
        assert_eq!(f.manager.render_buffers().refcount(MAIN, key), Some(1));
        assert!(f.manager.destroy_render_target(&mut f.driver, &mut f.contexts, b));
        assert!(f.manager.render_buffers().is_empty());
        assert_eq!(
            f.driver.count_calls(|c| matches!(c, DriverCall::DeleteRenderbuffer(_))),
            1
        );
        assert!(!f.manager.destroy_render_target(&mut f.driver, &mut f.contexts, a));
        f.shutdown();
    }

    #[test]
    fn test_depthless_format_reports_no_depth_stencil_format() {
        let mut driver = RecordingDriver::default();
        driver.reject_depth_with(PixelFormat::Rgba32Float);
        let mut f = Fixture::new(driver, GlBackendSettings::default());
        let id = f.render_texture("hdr", PixelFormat::Rgba32Float, 0).unwrap();

        assert!(matches!(
            f.bind(id),
            Err(RenderError::Configuration(ConfigurationError::NoDepthStencilFormat {
                format: PixelFormat::Rgba32Float
            }))
        ));

        f.manager.set_depth_buffer_pool(id, POOL_NO_DEPTH);
        f.bind(id).unwrap();
        assert!(f.manager.depth_buffer(id).is_none());
        f.shutdown();
    }

    #[test]
    fn test_unrenderable_format_is_rejected_without_leaks() {
        let mut driver = RecordingDriver::default();
        driver.reject_colour_format(PixelFormat::Rgba16Float);
        let mut f = Fixture::new(driver, GlBackendSettings::default());
        let framebuffers = f.driver.live_framebuffers();

        assert!(matches!(
            f.render_texture("bad", PixelFormat::Rgba16Float, 0),
            Err(RenderError::Configuration(ConfigurationError::UnsupportedRenderTargetFormat { .. }))
        ));
        assert!(f.manager.is_empty());
        assert_eq!(f.driver.live_framebuffers(), framebuffers);
        f.shutdown();
    }

    #[test]
    fn test_copy_mode_renders_to_back_buffer_and_copies_on_swap() {
        let settings = GlBackendSettings {
            render_to_texture: RttPreference::Copy,
            ..Default::default()
        };
        let mut f = Fixture::new(RecordingDriver::default(), settings);
        assert_eq!(f.manager.mode(), RttMode::Copy);
        assert!(f.manager.temporary_fbo(0).is_none());

        let id = f.render_texture("reflection", PixelFormat::Rgba8Unorm, 0).unwrap();
        f.bind(id).unwrap();
        assert!(f.driver.bound_draw_framebuffer().is_none());
        assert!(f.manager.depth_buffer(id).unwrap().is_dummy());

        f.manager.swap_buffers(&mut f.driver, &mut f.contexts, id).unwrap();
        assert_eq!(
            f.driver.count_calls(|c| *c == DriverCall::CopyTexSubImage2D { width: 64, height: 64 }),
            1
        );
        f.shutdown();
    }

    #[test]
    fn test_binding_switches_to_the_owning_context() {
        let mut f = fixture();
        let window = f.manager.register_window("second", SECONDARY, 320, 200);
        assert_eq!(f.contexts.current_id(), Some(MAIN));

        f.bind(window).unwrap();
        assert_eq!(f.contexts.current_id(), Some(SECONDARY));
        assert!(f.driver.bound_draw_framebuffer().is_none());
        assert!(f.driver.calls().contains(&DriverCall::Viewport(Rect::from_size(320, 200))));
        assert!(f.manager.depth_buffer(window).unwrap().is_dummy());
        f.shutdown();
    }

    #[test]
    fn test_windows_on_one_context_share_the_dummy_record() {
        let mut f = fixture();
        let a = f.manager.register_window("a", MAIN, 800, 600);
        let b = f.manager.register_window("b", MAIN, 1024, 768);
        assert_eq!(
            f.manager.depth_buffer(a).map(DepthBufferRecord::id),
            f.manager.depth_buffer(b).map(DepthBufferRecord::id)
        );
        assert_eq!(f.manager.depth_buffers().len(), 1);
        f.shutdown();
    }

    #[test]
    fn test_sample_count_is_clamped() {
        let mut f = Fixture::new(
            RecordingDriver::default(),
            GlBackendSettings {
                max_fsaa_override: Some(2),
                ..Default::default()
            },
        );
        let id = f.render_texture("msaa", PixelFormat::Rgba8Unorm, 16).unwrap();
        assert_eq!(f.manager.fbo(id).unwrap().samples(), 2);
        f.shutdown();
    }

    #[test]
    fn test_context_reset_rebuilds_framebuffers() {
        let mut f = fixture();
        let surface = f.texture(PixelFormat::Rgba8Unorm, 64, 64);
        let id = f
            .manager
            .create_render_texture(&mut f.driver, &mut f.contexts, "scene", surface, true, 4)
            .unwrap();
        f.bind(id).unwrap();
        assert!(f.driver.calls().contains(&DriverCall::Enable(Capability::FramebufferSrgb)));

        f.contexts.notify_context_lost(MAIN);
        f.manager.notify_context_lost(MAIN);
        f.driver.lose_context();
        assert!(f.manager.fbo(id).unwrap().fbo().is_none());
        assert!(f.manager.temporary_fbo(0).is_none());
        assert!(f.manager.render_buffers().is_empty());
        assert!(f.manager.active().is_none());

        let (texture, target, _) = surface.texture_handle().unwrap();
        f.driver.bind_texture(target, texture);
        f.driver.tex_storage_2d(target, PixelFormat::Rgba8Unorm, 64, 64);
        f.contexts.notify_context_reset(&mut f.driver, MAIN);
        f.manager
            .notify_context_reset(&mut f.driver, &mut f.contexts, MAIN)
            .unwrap();

        let fbo = f.manager.fbo(id).unwrap();
        assert!(!fbo.fbo().is_none());
        assert!(fbo.multisample_colour().is_some());
        assert!(f.manager.temporary_fbo(1).is_some());
        assert_eq!(f.manager.render_buffers().len(), 1);

        f.bind(id).unwrap();
        assert!(f.manager.depth_buffer(id).is_some());
        f.shutdown();
    }
}
