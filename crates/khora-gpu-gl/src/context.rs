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

//! Graphics contexts and per-context deferred destruction.
//!
//! Framebuffers, renderbuffers and vertex arrays are not shared between
//! contexts, so they can only be deleted while their owning context is
//! current. [`ContextRegistry::destroy_or_defer`] deletes right away when
//! possible and otherwise queues the object on its owner; the queue is
//! drained the next time that context becomes current.

use crate::state_cache::StateCache;
use ahash::AHashMap;
use khora_gpu_core::renderer::api::{
    ContextId, DriverCapabilities, DriverFeatures, DriverObject, VertexArrayHandle,
};
use khora_gpu_core::renderer::{ConfigurationError, DriverError, GraphicsDriver};
use std::collections::hash_map::Entry;

/// One graphics context known to the backend.
#[derive(Debug)]
pub struct RenderContext {
    id: ContextId,
    capabilities: DriverCapabilities,
    state_cache: StateCache,
    pending_destroy: Vec<DriverObject>,
    vertex_array: Option<VertexArrayHandle>,
    lost: bool,
}

impl RenderContext {
    fn new(id: ContextId, capabilities: DriverCapabilities) -> Self {
        Self {
            id,
            state_cache: StateCache::new(capabilities.max_texture_units),
            capabilities,
            pending_destroy: Vec::new(),
            vertex_array: None,
            lost: false,
        }
    }

    /// The context's identity.
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Limits and features reported for this context.
    pub fn capabilities(&self) -> &DriverCapabilities {
        &self.capabilities
    }

    /// The context's state mirror.
    pub fn state_cache(&self) -> &StateCache {
        &self.state_cache
    }

    /// Mutable access to the state mirror.
    pub fn state_cache_mut(&mut self) -> &mut StateCache {
        &mut self.state_cache
    }

    /// Objects queued for deletion the next time this context is current.
    pub fn pending_destroy(&self) -> &[DriverObject] {
        &self.pending_destroy
    }

    /// Returns `true` between a loss notification and the matching reset.
    pub fn is_lost(&self) -> bool {
        self.lost
    }

    /// The context's global vertex array object, created on first use.
    pub fn vertex_array(
        &mut self,
        driver: &mut dyn GraphicsDriver,
    ) -> Result<Option<VertexArrayHandle>, DriverError> {
        if !self.capabilities.has(DriverFeatures::VERTEX_ARRAY_OBJECTS) {
            return Ok(None);
        }
        if self.vertex_array.is_none() {
            self.vertex_array = Some(driver.create_vertex_array()?);
        }
        Ok(self.vertex_array)
    }

    fn drain_pending(&mut self, driver: &mut dyn GraphicsDriver) -> usize {
        let pending = std::mem::take(&mut self.pending_destroy);
        for object in &pending {
            self.state_cache.delete_object(driver, *object);
        }
        pending.len()
    }
}

/// Every context the backend renders with, plus which one is current.
#[derive(Debug, Default)]
pub struct ContextRegistry {
    contexts: AHashMap<ContextId, RenderContext>,
    current: Option<ContextId>,
}

impl ContextRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a context created by the windowing layer. Registering an id
    /// twice replaces the previous record.
    pub fn register(&mut self, id: ContextId, capabilities: DriverCapabilities) -> &mut RenderContext {
        log::debug!("Registering graphics context {:?}", id);
        let context = RenderContext::new(id, capabilities);
        match self.contexts.entry(id) {
            Entry::Occupied(mut slot) => {
                slot.insert(context);
                slot.into_mut()
            }
            Entry::Vacant(slot) => slot.insert(context),
        }
    }

    /// Forgets a context destroyed by the windowing layer. Its queued
    /// objects died with it.
    pub fn unregister(&mut self, id: ContextId) -> Option<RenderContext> {
        let context = self.contexts.remove(&id)?;
        if !context.pending_destroy.is_empty() {
            log::debug!(
                "Discarding {} queued deletions of destroyed context {:?}",
                context.pending_destroy.len(),
                id
            );
        }
        if self.current == Some(id) {
            self.current = None;
        }
        Some(context)
    }

    /// Makes `id` current and deletes everything queued on it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::UnknownContext`] if `id` was never registered.
    pub fn make_current(
        &mut self,
        driver: &mut dyn GraphicsDriver,
        id: ContextId,
    ) -> Result<&mut RenderContext, ConfigurationError> {
        let context = self
            .contexts
            .get_mut(&id)
            .ok_or(ConfigurationError::UnknownContext(id))?;
        if self.current != Some(id) {
            log::trace!("Switching to graphics context {:?}", id);
            driver.make_current(id);
            self.current = Some(id);
        }
        let drained = context.drain_pending(driver);
        if drained > 0 {
            log::debug!("Destroyed {} deferred objects on context {:?}", drained, id);
        }
        Ok(context)
    }

    /// Makes `id` current when it is not and returns its state cache.
    pub fn state_cache_for(
        &mut self,
        driver: &mut dyn GraphicsDriver,
        id: ContextId,
    ) -> Result<&mut StateCache, ConfigurationError> {
        Ok(self.make_current(driver, id)?.state_cache_mut())
    }

    /// Runs `f` with `id` current, then switches back to the context that was
    /// current before. Deferred deletions of both contexts are drained on the way.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::UnknownContext`] if `id` was never registered.
    pub fn with_context<R>(
        &mut self,
        driver: &mut dyn GraphicsDriver,
        id: ContextId,
        f: impl FnOnce(&mut dyn GraphicsDriver, &mut StateCache) -> R,
    ) -> Result<R, ConfigurationError> {
        let previous = self.current;
        let cache = self.state_cache_for(driver, id)?;
        let result = f(&mut *driver, cache);
        if let Some(previous) = previous.filter(|previous| *previous != id) {
            self.make_current(driver, previous)?;
        }
        Ok(result)
    }

    /// The current context id, if any.
    pub fn current_id(&self) -> Option<ContextId> {
        self.current
    }

    /// The current context.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::NoCurrentContext`] before the first
    /// [`make_current`](Self::make_current).
    pub fn current_mut(&mut self) -> Result<&mut RenderContext, ConfigurationError> {
        let id = self.current.ok_or(ConfigurationError::NoCurrentContext)?;
        self.contexts
            .get_mut(&id)
            .ok_or(ConfigurationError::UnknownContext(id))
    }

    /// The state cache of the current context.
    pub fn state_cache(&mut self) -> Result<&mut StateCache, ConfigurationError> {
        Ok(self.current_mut()?.state_cache_mut())
    }

    /// Looks up a context.
    pub fn get(&self, id: ContextId) -> Option<&RenderContext> {
        self.contexts.get(&id)
    }

    /// Looks up a context mutably.
    pub fn get_mut(&mut self, id: ContextId) -> Option<&mut RenderContext> {
        self.contexts.get_mut(&id)
    }

    /// Iterates registered contexts.
    pub fn iter(&self) -> impl Iterator<Item = &RenderContext> {
        self.contexts.values()
    }

    /// Deletes `object` now if `owner` is current, otherwise queues it on
    /// `owner`. Objects of an unknown or lost owner are dropped, since the
    /// driver already discarded them.
    pub fn destroy_or_defer(&mut self, driver: &mut dyn GraphicsDriver, owner: ContextId, object: DriverObject) {
        if object.is_none() {
            return;
        }
        let is_current = self.current == Some(owner);
        let Some(context) = self.contexts.get_mut(&owner) else {
            log::warn!("Dropping {:?}: owning context {:?} is gone", object, owner);
            return;
        };
        if context.lost {
            return;
        }
        if is_current {
            context.state_cache.delete_object(driver, object);
        } else {
            log::trace!("Deferring deletion of {:?} to context {:?}", object, owner);
            context.pending_destroy.push(object);
        }
    }

    /// Wipes every driver-side record of a lost context. The queue is
    /// emptied without driver calls.
    pub fn notify_context_lost(&mut self, id: ContextId) {
        if let Some(context) = self.contexts.get_mut(&id) {
            context.lost = true;
            context.pending_destroy.clear();
            context.vertex_array = None;
            context.state_cache.clear_cache();
        }
    }

    /// Marks a context usable again and resynchronises its state mirror if it is current.
    pub fn notify_context_reset(&mut self, driver: &mut dyn GraphicsDriver, id: ContextId) {
        let is_current = self.current == Some(id);
        if let Some(context) = self.contexts.get_mut(&id) {
            context.lost = false;
            if is_current {
                context.state_cache.initialize_cache(driver);
            }
        }
    }
}
