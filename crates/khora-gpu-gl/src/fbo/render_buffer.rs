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

use crate::context::ContextRegistry;
use crate::state_cache::StateCache;
use ahash::AHashMap;
use khora_gpu_core::renderer::api::{ContextId, DriverObject, RenderbufferFormat, RenderbufferHandle};
use khora_gpu_core::renderer::{DriverError, GraphicsDriver};

/// Identity of pooled renderbuffer storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RenderBufferKey {
    /// Storage format.
    pub format: RenderbufferFormat,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Sample count; 0 for single-sampled storage.
    pub samples: u32,
}

impl RenderBufferKey {
    /// Builds a key.
    pub fn new(format: RenderbufferFormat, width: u32, height: u32, samples: u32) -> Self {
        Self {
            format,
            width,
            height,
            samples,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct RenderBufferEntry {
    handle: RenderbufferHandle,
    refcount: usize,
}

/// Creates and allocates a renderbuffer on the current context.
pub(crate) fn create_renderbuffer(
    driver: &mut dyn GraphicsDriver,
    cache: &mut StateCache,
    key: RenderBufferKey,
) -> Result<RenderbufferHandle, DriverError> {
    let handle = driver.create_renderbuffer()?;
    if handle.is_none() {
        return Err(DriverError::ObjectCreationFailed {
            kind: "renderbuffer",
        });
    }
    cache.bind_renderbuffer(driver, handle, false);
    driver.renderbuffer_storage(key.format, key.width, key.height, key.samples);
    Ok(handle)
}

/// Reference-counted renderbuffers shared by render targets that need
/// identical storage.
///
/// Renderbuffers cannot be shared between contexts, so entries are keyed by
/// their owning context as well.
#[derive(Debug, Default)]
pub struct RenderBufferPool {
    entries: AHashMap<(ContextId, RenderBufferKey), RenderBufferEntry>,
}

impl RenderBufferPool {
    /// Creates an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the storage for `key` on `owner`, creating it on the first
    /// request and adding a reference otherwise. `owner` must be current.
    ///
    /// # Errors
    ///
    /// Returns a [`DriverError`] if a new renderbuffer could not be created.
    pub fn request(
        &mut self,
        driver: &mut dyn GraphicsDriver,
        cache: &mut StateCache,
        owner: ContextId,
        key: RenderBufferKey,
    ) -> Result<RenderbufferHandle, DriverError> {
        if let Some(entry) = self.entries.get_mut(&(owner, key)) {
            entry.refcount += 1;
            return Ok(entry.handle);
        }
        let handle = create_renderbuffer(driver, cache, key)?;
        log::debug!("Created pooled renderbuffer {:?} for {:?}", handle, key);
        self.entries
            .insert((owner, key), RenderBufferEntry { handle, refcount: 1 });
        Ok(handle)
    }

    /// Adds a reference to existing storage. Returns `false` if there is none.
    pub fn add_ref(&mut self, owner: ContextId, key: RenderBufferKey) -> bool {
        match self.entries.get_mut(&(owner, key)) {
            Some(entry) => {
                entry.refcount += 1;
                true
            }
            None => false,
        }
    }

    /// Drops a reference. The storage is destroyed, through the owner's
    /// deferred queue, when the last reference goes. Returns `true` if it was.
    pub fn release(
        &mut self,
        driver: &mut dyn GraphicsDriver,
        contexts: &mut ContextRegistry,
        owner: ContextId,
        key: RenderBufferKey,
    ) -> bool {
        let Some(entry) = self.entries.get_mut(&(owner, key)) else {
            log::warn!("Released unknown renderbuffer {:?} on {:?}", key, owner);
            return false;
        };
        entry.refcount -= 1;
        if entry.refcount > 0 {
            return false;
        }
        let handle = entry.handle;
        self.entries.remove(&(owner, key));
        contexts.destroy_or_defer(driver, owner, DriverObject::Renderbuffer(handle));
        log::debug!("Destroyed pooled renderbuffer {:?}", handle);
        true
    }

    /// Current reference count of `key` on `owner`.
    pub fn refcount(&self, owner: ContextId, key: RenderBufferKey) -> Option<usize> {
        self.entries.get(&(owner, key)).map(|entry| entry.refcount)
    }

    /// Number of distinct pooled buffers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is pooled.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forgets every buffer of a lost context without driver calls. Owners
    /// request their storage again after the reset.
    pub fn notify_context_lost(&mut self, id: ContextId) {
        self.entries.retain(|(owner, _), _| *owner != id);
    }
}

impl Drop for RenderBufferPool {
    fn drop(&mut self) {
        if !self.entries.is_empty() {
            log::warn!(
                "RenderBufferPool dropped with {} renderbuffers still referenced",
                self.entries.len()
            );
        }
    }
}
