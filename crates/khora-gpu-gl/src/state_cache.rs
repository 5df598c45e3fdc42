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

//! Driver State Cache.
//!
//! [`StateCache`] mirrors the mutable state of one graphics context and
//! drops any setter call whose value already matches the mirror. It does no
//! validity checking; capability gating happens in the callers.
//!
//! Each context owns exactly one cache. The mirror is wiped with
//! [`StateCache::clear_cache`] when the context is lost and pushed back to the
//! driver with [`StateCache::initialize_cache`] once it is reset.

use ahash::{AHashMap, AHashSet};
use khora_gpu_core::renderer::api::*;
use khora_gpu_core::renderer::GraphicsDriver;

/// A mirrored driver value. `None` means unknown, which forces the next set.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Cached<T>(Option<T>);

impl<T: PartialEq + Copy> Cached<T> {
    fn known(value: T) -> Self {
        Cached(Some(value))
    }

    fn unknown() -> Self {
        Cached(None)
    }

    /// Stores `value`. Returns `true` if it differs from the mirror.
    fn update(&mut self, value: T) -> bool {
        if self.0 == Some(value) {
            false
        } else {
            self.0 = Some(value);
            true
        }
    }

    fn get(&self) -> Option<T> {
        self.0
    }
}

/// Counts of driver calls issued and elided by a [`StateCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateCacheStats {
    /// Calls forwarded to the driver.
    pub issued: u64,
    /// Calls dropped because the mirror already held the value.
    pub elided: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct BlendFunc {
    source_rgb: BlendFactor,
    dest_rgb: BlendFactor,
    source_alpha: BlendFactor,
    dest_alpha: BlendFactor,
}

impl Default for BlendFunc {
    fn default() -> Self {
        Self {
            source_rgb: BlendFactor::One,
            dest_rgb: BlendFactor::Zero,
            source_alpha: BlendFactor::One,
            dest_alpha: BlendFactor::Zero,
        }
    }
}

/// Per-context mirror of driver state.
#[derive(Debug)]
pub struct StateCache {
    max_texture_units: u32,

    bindings: AHashMap<BufferTarget, u32>,
    vertex_array: Cached<VertexArrayHandle>,
    active_unit: Cached<u32>,
    textures: AHashMap<(u32, TextureTarget), TextureHandle>,
    tex_parameters: AHashMap<TextureHandle, AHashMap<TextureParameter, TexParameterValue>>,
    capabilities: AHashMap<Capability, bool>,

    blend_func: Cached<BlendFunc>,
    blend_equation: Cached<(BlendEquation, BlendEquation)>,
    depth_mask: Cached<bool>,
    depth_func: Cached<CompareFunction>,
    stencil_mask: Cached<u32>,
    clear_colour: Cached<[f32; 4]>,
    clear_depth: Cached<f32>,
    colour_mask: Cached<[bool; 4]>,
    cull_face: Cached<CullFace>,
    polygon_mode: Cached<PolygonMode>,
    point_size: Cached<f32>,
    viewport: Cached<Rect>,

    stats: StateCacheStats,
}

impl StateCache {
    /// Creates a cache for a context with `max_texture_units` units. The
    /// mirror starts at the defaults of a freshly created context.
    pub fn new(max_texture_units: u32) -> Self {
        let mut cache = Self {
            max_texture_units,
            bindings: AHashMap::new(),
            vertex_array: Cached::unknown(),
            active_unit: Cached::unknown(),
            textures: AHashMap::new(),
            tex_parameters: AHashMap::new(),
            capabilities: AHashMap::new(),
            blend_func: Cached::unknown(),
            blend_equation: Cached::unknown(),
            depth_mask: Cached::unknown(),
            depth_func: Cached::unknown(),
            stencil_mask: Cached::unknown(),
            clear_colour: Cached::unknown(),
            clear_depth: Cached::unknown(),
            colour_mask: Cached::unknown(),
            cull_face: Cached::unknown(),
            polygon_mode: Cached::unknown(),
            point_size: Cached::unknown(),
            viewport: Cached::unknown(),
            stats: StateCacheStats::default(),
        };
        cache.clear_cache();
        cache
    }

    /// Resets the mirror to the defaults of a fresh context without any
    /// driver call. Object bindings become unknown.
    pub fn clear_cache(&mut self) {
        self.bindings.clear();
        self.vertex_array = Cached::unknown();
        self.active_unit = Cached::known(0);
        self.textures.clear();
        self.tex_parameters.clear();
        self.capabilities = Capability::ALL
            .iter()
            .map(|&cap| (cap, cap.enabled_by_default()))
            .collect();

        self.blend_func = Cached::known(BlendFunc::default());
        self.blend_equation = Cached::known((BlendEquation::Add, BlendEquation::Add));
        self.depth_mask = Cached::known(true);
        self.depth_func = Cached::known(CompareFunction::Less);
        self.stencil_mask = Cached::known(u32::MAX);
        self.clear_colour = Cached::known([0.0; 4]);
        self.clear_depth = Cached::known(1.0);
        self.colour_mask = Cached::known([true; 4]);
        self.cull_face = Cached::known(CullFace::Back);
        self.polygon_mode = Cached::known(PolygonMode::Fill);
        self.point_size = Cached::known(1.0);
        self.viewport = Cached::unknown();
    }

    /// Pushes the cached defaults to the driver so mirror and driver agree.
    /// Used at context creation and after a context reset.
    pub fn initialize_cache(&mut self, driver: &mut dyn GraphicsDriver) {
        self.clear_cache();

        for (&cap, &enabled) in &self.capabilities {
            if enabled {
                driver.enable(cap);
            } else {
                driver.disable(cap);
            }
        }
        let blend = BlendFunc::default();
        driver.blend_func(blend.source_rgb, blend.dest_rgb);
        driver.blend_equation(BlendEquation::Add);
        driver.depth_mask(true);
        driver.depth_func(CompareFunction::Less);
        driver.stencil_mask(u32::MAX);
        driver.clear_colour([0.0; 4]);
        driver.clear_depth(1.0);
        driver.colour_mask([true; 4]);
        driver.cull_face(CullFace::Back);
        driver.polygon_mode(PolygonMode::Fill);
        driver.point_size(1.0);
        driver.active_texture(0);

        for target in [BufferTarget::Array, BufferTarget::ElementArray] {
            driver.bind_buffer(target, BufferHandle::NONE);
            self.bindings.insert(target, 0);
        }
        driver.bind_framebuffer(BufferTarget::Framebuffer, FramebufferHandle::NONE);
        self.bindings.insert(BufferTarget::DrawFramebuffer, 0);
        self.bindings.insert(BufferTarget::ReadFramebuffer, 0);
        driver.bind_renderbuffer(RenderbufferHandle::NONE);
        self.bindings.insert(BufferTarget::Renderbuffer, 0);

        self.stats.issued += Capability::ALL.len() as u64 + 16;
        log::debug!("State cache initialised ({} texture units)", self.max_texture_units);
    }

    /// Marks every mirrored value as unknown, so the next set of each is
    /// forwarded. Use after foreign code touched the driver directly.
    pub fn invalidate_all(&mut self) {
        self.bindings.clear();
        self.vertex_array = Cached::unknown();
        self.active_unit = Cached::unknown();
        self.textures.clear();
        self.tex_parameters.clear();
        self.capabilities.clear();
        self.blend_func = Cached::unknown();
        self.blend_equation = Cached::unknown();
        self.depth_mask = Cached::unknown();
        self.depth_func = Cached::unknown();
        self.stencil_mask = Cached::unknown();
        self.clear_colour = Cached::unknown();
        self.clear_depth = Cached::unknown();
        self.colour_mask = Cached::unknown();
        self.cull_face = Cached::unknown();
        self.polygon_mode = Cached::unknown();
        self.point_size = Cached::unknown();
        self.viewport = Cached::unknown();
    }

    /// Issued/elided call counters.
    pub fn stats(&self) -> StateCacheStats {
        self.stats
    }

    /// Zeroes the counters.
    pub fn reset_stats(&mut self) {
        self.stats = StateCacheStats::default();
    }

    fn note(&mut self, changed: bool, what: &'static str) -> bool {
        if changed {
            self.stats.issued += 1;
        } else {
            self.stats.elided += 1;
            log::trace!("State cache elided redundant {what}");
        }
        changed
    }

    // --- Object bindings ---

    /// Binds a buffer to `target`, unless it is already bound there.
    /// `force` always issues the call and resynchronises the mirror.
    pub fn bind_buffer(
        &mut self,
        driver: &mut dyn GraphicsDriver,
        target: BufferTarget,
        buffer: BufferHandle,
        force: bool,
    ) {
        self.bind_name(driver, target, buffer.0, force);
    }

    /// Binds a framebuffer. [`BufferTarget::Framebuffer`] sets both the draw
    /// and read points.
    pub fn bind_framebuffer(
        &mut self,
        driver: &mut dyn GraphicsDriver,
        target: BufferTarget,
        framebuffer: FramebufferHandle,
        force: bool,
    ) {
        debug_assert!(target.is_framebuffer());
        self.bind_name(driver, target, framebuffer.0, force);
    }

    /// Binds a renderbuffer.
    pub fn bind_renderbuffer(
        &mut self,
        driver: &mut dyn GraphicsDriver,
        renderbuffer: RenderbufferHandle,
        force: bool,
    ) {
        self.bind_name(driver, BufferTarget::Renderbuffer, renderbuffer.0, force);
    }

    fn bind_name(&mut self, driver: &mut dyn GraphicsDriver, target: BufferTarget, name: u32, force: bool) {
        let current = match target {
            BufferTarget::Framebuffer => {
                let draw = self.bindings.get(&BufferTarget::DrawFramebuffer);
                let read = self.bindings.get(&BufferTarget::ReadFramebuffer);
                (draw == read).then_some(draw).flatten().copied()
            }
            _ => self.bindings.get(&target).copied(),
        };
        let changed = force || current != Some(name);
        if !self.note(changed, "bind") {
            return;
        }

        match target {
            BufferTarget::Framebuffer => {
                self.bindings.insert(BufferTarget::DrawFramebuffer, name);
                self.bindings.insert(BufferTarget::ReadFramebuffer, name);
                driver.bind_framebuffer(target, FramebufferHandle(name));
            }
            BufferTarget::DrawFramebuffer | BufferTarget::ReadFramebuffer => {
                self.bindings.insert(target, name);
                driver.bind_framebuffer(target, FramebufferHandle(name));
            }
            BufferTarget::Renderbuffer => {
                self.bindings.insert(target, name);
                driver.bind_renderbuffer(RenderbufferHandle(name));
            }
            _ => {
                self.bindings.insert(target, name);
                driver.bind_buffer(target, BufferHandle(name));
            }
        }
    }

    /// The framebuffer the mirror believes is bound for drawing.
    pub fn bound_framebuffer(&self) -> Option<FramebufferHandle> {
        self.bindings
            .get(&BufferTarget::DrawFramebuffer)
            .map(|&name| FramebufferHandle(name))
    }

    /// The buffer the mirror believes is bound at `target`.
    pub fn bound_buffer(&self, target: BufferTarget) -> Option<BufferHandle> {
        self.bindings.get(&target).map(|&name| BufferHandle(name))
    }

    /// Deletes a buffer and forgets every association to it. The reserved
    /// name 0 is never deleted.
    pub fn delete_buffer(&mut self, driver: &mut dyn GraphicsDriver, buffer: BufferHandle) {
        if buffer.is_none() {
            return;
        }
        driver.delete_buffer(buffer);
        self.invalidate(DriverObject::Buffer(buffer));
    }

    /// Deletes any driver object and forgets every association to it.
    pub fn delete_object(&mut self, driver: &mut dyn GraphicsDriver, object: DriverObject) {
        if object.is_none() {
            return;
        }
        match object {
            DriverObject::Buffer(h) => driver.delete_buffer(h),
            DriverObject::Texture(h) => driver.delete_texture(h),
            DriverObject::Framebuffer(h) => driver.delete_framebuffer(h),
            DriverObject::Renderbuffer(h) => driver.delete_renderbuffer(h),
            DriverObject::Program(h) => driver.delete_program(h),
            DriverObject::ProgramPipeline(h) => driver.delete_program_pipeline(h),
            DriverObject::VertexArray(h) => driver.delete_vertex_array(h),
        }
        self.invalidate(object);
    }

    /// Removes every cached association referencing a destroyed object, so a
    /// recycled name is never mistaken for the old object.
    pub fn invalidate(&mut self, object: DriverObject) {
        match object {
            DriverObject::Buffer(h) => self.bindings.retain(|target, name| {
                target.is_framebuffer() || *target == BufferTarget::Renderbuffer || *name != h.0
            }),
            DriverObject::Framebuffer(h) => self
                .bindings
                .retain(|target, name| !target.is_framebuffer() || *name != h.0),
            DriverObject::Renderbuffer(h) => self
                .bindings
                .retain(|target, name| *target != BufferTarget::Renderbuffer || *name != h.0),
            DriverObject::Texture(h) => {
                self.textures.retain(|_, bound| *bound != h);
                self.tex_parameters.remove(&h);
            }
            DriverObject::VertexArray(h) => {
                if self.vertex_array.get() == Some(h) {
                    self.vertex_array = Cached::unknown();
                }
            }
            DriverObject::Program(_) | DriverObject::ProgramPipeline(_) => {}
        }
    }

    /// Binds a vertex array object.
    pub fn bind_vertex_array(&mut self, driver: &mut dyn GraphicsDriver, vertex_array: VertexArrayHandle) {
        let changed = self.vertex_array.update(vertex_array);
        if self.note(changed, "vertex array bind") {
            driver.bind_vertex_array(vertex_array);
        }
    }

    // --- Textures ---

    /// Selects the active texture unit. Returns `false`, without touching
    /// the driver, if `unit` is beyond the context's unit count. Unit 0 is
    /// always available.
    pub fn activate_texture_unit(&mut self, driver: &mut dyn GraphicsDriver, unit: u32) -> bool {
        if self.active_unit.get() == Some(unit) {
            self.note(false, "texture unit activation");
            return true;
        }
        if unit != 0 && unit >= self.max_texture_units {
            return false;
        }
        self.active_unit.update(unit);
        self.note(true, "texture unit activation");
        driver.active_texture(unit);
        true
    }

    /// The unit the mirror believes is active.
    pub fn active_texture_unit(&self) -> Option<u32> {
        self.active_unit.get()
    }

    /// Binds a texture on the active unit.
    pub fn bind_texture(&mut self, driver: &mut dyn GraphicsDriver, target: TextureTarget, texture: TextureHandle) {
        let changed = match self.active_unit.get() {
            Some(unit) => self.textures.insert((unit, target), texture) != Some(texture),
            None => true,
        };
        if self.note(changed, "texture bind") {
            driver.bind_texture(target, texture);
        }
    }

    fn bound_texture(&self, target: TextureTarget) -> Option<TextureHandle> {
        let unit = self.active_unit.get()?;
        self.textures
            .get(&(unit, target))
            .copied()
            .filter(|t| !t.is_none())
    }

    fn update_tex_parameter(
        &mut self,
        target: TextureTarget,
        parameter: TextureParameter,
        value: TexParameterValue,
    ) -> bool {
        match self.bound_texture(target) {
            Some(texture) => {
                let params = self.tex_parameters.entry(texture).or_default();
                params.insert(parameter, value) != Some(value)
            }
            None => true,
        }
    }

    /// Sets an integer parameter on the texture bound to `target` on the active unit.
    pub fn set_tex_parameter_i(
        &mut self,
        driver: &mut dyn GraphicsDriver,
        target: TextureTarget,
        parameter: TextureParameter,
        value: i32,
    ) {
        let changed = self.update_tex_parameter(target, parameter, TexParameterValue::Int(value));
        if self.note(changed, "texture parameter") {
            driver.tex_parameter_i(target, parameter, value);
        }
    }

    /// Sets a float parameter on the texture bound to `target` on the active unit.
    pub fn set_tex_parameter_f(
        &mut self,
        driver: &mut dyn GraphicsDriver,
        target: TextureTarget,
        parameter: TextureParameter,
        value: f32,
    ) {
        let changed = self.update_tex_parameter(target, parameter, TexParameterValue::float(value));
        if self.note(changed, "texture parameter") {
            driver.tex_parameter_f(target, parameter, value);
        }
    }

    // --- Capabilities ---

    /// Enables a capability.
    pub fn set_enabled(&mut self, driver: &mut dyn GraphicsDriver, capability: Capability) {
        let changed = self.capabilities.insert(capability, true) != Some(true);
        if self.note(changed, "enable") {
            driver.enable(capability);
        }
    }

    /// Disables a capability.
    pub fn set_disabled(&mut self, driver: &mut dyn GraphicsDriver, capability: Capability) {
        let changed = self.capabilities.insert(capability, false) != Some(false);
        if self.note(changed, "disable") {
            driver.disable(capability);
        }
    }

    /// Returns `true` if the mirror holds the capability as enabled.
    pub fn is_enabled(&self, capability: Capability) -> bool {
        self.capabilities.get(&capability) == Some(&true)
    }

    /// The set of capabilities the mirror holds as enabled.
    pub fn enabled_capabilities(&self) -> AHashSet<Capability> {
        self.capabilities
            .iter()
            .filter(|(_, on)| **on)
            .map(|(&cap, _)| cap)
            .collect()
    }

    // --- Scalar state ---

    /// Sets one blend function for colour and alpha.
    pub fn set_blend_func(&mut self, driver: &mut dyn GraphicsDriver, source: BlendFactor, dest: BlendFactor) {
        let changed = self.blend_func.update(BlendFunc {
            source_rgb: source,
            dest_rgb: dest,
            source_alpha: source,
            dest_alpha: dest,
        });
        if self.note(changed, "blend func") {
            driver.blend_func(source, dest);
        }
    }

    /// Sets separate colour and alpha blend functions.
    pub fn set_blend_func_separate(
        &mut self,
        driver: &mut dyn GraphicsDriver,
        source_rgb: BlendFactor,
        dest_rgb: BlendFactor,
        source_alpha: BlendFactor,
        dest_alpha: BlendFactor,
    ) {
        let changed = self.blend_func.update(BlendFunc {
            source_rgb,
            dest_rgb,
            source_alpha,
            dest_alpha,
        });
        if self.note(changed, "blend func") {
            driver.blend_func_separate(source_rgb, dest_rgb, source_alpha, dest_alpha);
        }
    }

    /// Sets one blend equation for colour and alpha.
    pub fn set_blend_equation(&mut self, driver: &mut dyn GraphicsDriver, equation: BlendEquation) {
        let changed = self.blend_equation.update((equation, equation));
        if self.note(changed, "blend equation") {
            driver.blend_equation(equation);
        }
    }

    /// Sets separate colour and alpha blend equations.
    pub fn set_blend_equation_separate(
        &mut self,
        driver: &mut dyn GraphicsDriver,
        rgb: BlendEquation,
        alpha: BlendEquation,
    ) {
        let changed = self.blend_equation.update((rgb, alpha));
        if self.note(changed, "blend equation") {
            driver.blend_equation_separate(rgb, alpha);
        }
    }

    /// Enables or disables depth writes.
    pub fn set_depth_mask(&mut self, driver: &mut dyn GraphicsDriver, enabled: bool) {
        let changed = self.depth_mask.update(enabled);
        if self.note(changed, "depth mask") {
            driver.depth_mask(enabled);
        }
    }

    /// Sets the depth comparison.
    pub fn set_depth_func(&mut self, driver: &mut dyn GraphicsDriver, func: CompareFunction) {
        let changed = self.depth_func.update(func);
        if self.note(changed, "depth func") {
            driver.depth_func(func);
        }
    }

    /// Sets the stencil write mask.
    pub fn set_stencil_mask(&mut self, driver: &mut dyn GraphicsDriver, mask: u32) {
        let changed = self.stencil_mask.update(mask);
        if self.note(changed, "stencil mask") {
            driver.stencil_mask(mask);
        }
    }

    /// Sets the clear colour.
    pub fn set_clear_colour(&mut self, driver: &mut dyn GraphicsDriver, colour: [f32; 4]) {
        let changed = self.clear_colour.update(colour);
        if self.note(changed, "clear colour") {
            driver.clear_colour(colour);
        }
    }

    /// Sets the clear depth.
    pub fn set_clear_depth(&mut self, driver: &mut dyn GraphicsDriver, depth: f32) {
        let changed = self.clear_depth.update(depth);
        if self.note(changed, "clear depth") {
            driver.clear_depth(depth);
        }
    }

    /// Sets per-channel colour write masks.
    pub fn set_colour_mask(&mut self, driver: &mut dyn GraphicsDriver, mask: [bool; 4]) {
        let changed = self.colour_mask.update(mask);
        if self.note(changed, "colour mask") {
            driver.colour_mask(mask);
        }
    }

    /// Selects culled faces.
    pub fn set_cull_face(&mut self, driver: &mut dyn GraphicsDriver, face: CullFace) {
        let changed = self.cull_face.update(face);
        if self.note(changed, "cull face") {
            driver.cull_face(face);
        }
    }

    /// Sets the polygon rasterisation mode.
    pub fn set_polygon_mode(&mut self, driver: &mut dyn GraphicsDriver, mode: PolygonMode) {
        let changed = self.polygon_mode.update(mode);
        if self.note(changed, "polygon mode") {
            driver.polygon_mode(mode);
        }
    }

    /// Sets the rasterised point size.
    pub fn set_point_size(&mut self, driver: &mut dyn GraphicsDriver, size: f32) {
        let changed = self.point_size.update(size);
        if self.note(changed, "point size") {
            driver.point_size(size);
        }
    }

    /// Sets the viewport.
    pub fn set_viewport(&mut self, driver: &mut dyn GraphicsDriver, rect: Rect) {
        let changed = self.viewport.update(rect);
        if self.note(changed, "viewport") {
            driver.viewport(rect);
        }
    }

    /// The viewport last set, if known.
    pub fn viewport(&self) -> Option<Rect> {
        self.viewport.get()
    }
}
