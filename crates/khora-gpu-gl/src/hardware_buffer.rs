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

//! Hardware buffers with a system-memory shadow.
//!
//! The driver discards every buffer when its context is lost. Each buffer
//! keeps a copy of its contents so it can be recreated bit-identically on
//! reset, under the same [`BufferId`].

use crate::context::ContextRegistry;
use crate::state_cache::StateCache;
use ahash::AHashMap;
use khora_gpu_core::renderer::api::{
    BufferHandle, BufferId, BufferTarget, BufferUsage, ContextId, DriverObject, IndexFormat,
};
use khora_gpu_core::renderer::{GraphicsDriver, RenderError};

/// One logical buffer.
#[derive(Debug)]
pub struct ShadowedBuffer {
    handle: BufferHandle,
    target: BufferTarget,
    usage: BufferUsage,
    owner: ContextId,
    index_format: Option<IndexFormat>,
    shadow: Vec<u8>,
}

impl ShadowedBuffer {
    /// The driver buffer, or [`BufferHandle::NONE`] while the owner is lost.
    pub fn handle(&self) -> BufferHandle {
        self.handle
    }

    pub fn target(&self) -> BufferTarget {
        self.target
    }

    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    /// The context the driver buffer lives on.
    pub fn owner(&self) -> ContextId {
        self.owner
    }

    /// The element type of an index buffer.
    pub fn index_format(&self) -> Option<IndexFormat> {
        self.index_format
    }

    /// Size in bytes.
    pub fn size(&self) -> usize {
        self.shadow.len()
    }

    /// The shadowed contents.
    pub fn contents(&self) -> &[u8] {
        &self.shadow
    }

    /// Uploads the whole shadow. `cache` belongs to the owning context, which
    /// must be current.
    fn upload(&self, driver: &mut dyn GraphicsDriver, cache: &mut StateCache) {
        cache.bind_buffer(driver, self.target, self.handle, false);
        driver.buffer_data(self.target, &self.shadow, self.usage);
    }
}

/// Logical buffers keyed by stable [`BufferId`]s.
#[derive(Debug, Default)]
pub struct ShadowedBufferManager {
    buffers: AHashMap<BufferId, ShadowedBuffer>,
    next_id: usize,
}

fn unknown(id: BufferId) -> RenderError {
    RenderError::InvalidHandle(format!("buffer {}", id.0))
}

impl ShadowedBufferManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a buffer on the current context holding a copy of `data`.
    ///
    /// # Errors
    ///
    /// Fails without a current context or if the driver cannot create the buffer.
    pub fn create(
        &mut self,
        driver: &mut dyn GraphicsDriver,
        contexts: &mut ContextRegistry,
        target: BufferTarget,
        usage: BufferUsage,
        data: &[u8],
    ) -> Result<BufferId, RenderError> {
        self.insert(driver, contexts, target, usage, None, data)
    }

    /// Creates an index buffer. The caller checks that the driver supports
    /// `format`.
    pub fn create_index(
        &mut self,
        driver: &mut dyn GraphicsDriver,
        contexts: &mut ContextRegistry,
        format: IndexFormat,
        usage: BufferUsage,
        data: &[u8],
    ) -> Result<BufferId, RenderError> {
        self.insert(driver, contexts, BufferTarget::ElementArray, usage, Some(format), data)
    }

    fn insert(
        &mut self,
        driver: &mut dyn GraphicsDriver,
        contexts: &mut ContextRegistry,
        target: BufferTarget,
        usage: BufferUsage,
        index_format: Option<IndexFormat>,
        data: &[u8],
    ) -> Result<BufferId, RenderError> {
        let owner = contexts.current_mut()?.id();
        let buffer = ShadowedBuffer {
            handle: driver.create_buffer()?,
            target,
            usage,
            owner,
            index_format,
            shadow: data.to_vec(),
        };
        buffer.upload(driver, contexts.state_cache()?);

        let id = BufferId(self.next_id);
        self.next_id += 1;
        log::debug!("Created {:?} buffer {:?} ({} bytes)", target, id, data.len());
        self.buffers.insert(id, buffer);
        Ok(id)
    }

    /// Looks up a buffer.
    pub fn get(&self, id: BufferId) -> Option<&ShadowedBuffer> {
        self.buffers.get(&id)
    }

    /// Number of live buffers.
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Writes `data` at `offset`. The shadow is always updated; the driver
    /// copy only while the owning context is alive.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::OutOfBounds`] if the write would grow the
    /// buffer, and [`RenderError::InvalidHandle`] for unknown ids.
    ///
    /// A buffer owned by another context is written with that context made
    /// current for the upload only.
    pub fn write(
        &mut self,
        driver: &mut dyn GraphicsDriver,
        contexts: &mut ContextRegistry,
        id: BufferId,
        offset: usize,
        data: &[u8],
    ) -> Result<(), RenderError> {
        let buffer = self.buffers.get_mut(&id).ok_or_else(|| unknown(id))?;
        let size = buffer.shadow.len();
        let end = offset
            .checked_add(data.len())
            .filter(|end| *end <= size)
            .ok_or(RenderError::OutOfBounds {
                end: offset.saturating_add(data.len()),
                size,
            })?;
        buffer.shadow[offset..end].copy_from_slice(data);
        if buffer.handle.is_none() {
            return Ok(());
        }
        let (target, handle) = (buffer.target, buffer.handle);
        contexts.with_context(driver, buffer.owner, |driver, cache| {
            cache.bind_buffer(driver, target, handle, false);
            driver.buffer_sub_data(target, offset, data);
        })?;
        Ok(())
    }

    /// Replaces the whole contents, possibly changing the size.
    pub fn replace(
        &mut self,
        driver: &mut dyn GraphicsDriver,
        contexts: &mut ContextRegistry,
        id: BufferId,
        data: &[u8],
    ) -> Result<(), RenderError> {
        let buffer = self.buffers.get_mut(&id).ok_or_else(|| unknown(id))?;
        buffer.shadow.clear();
        buffer.shadow.extend_from_slice(data);
        if buffer.handle.is_none() {
            return Ok(());
        }
        let buffer = &*buffer;
        contexts.with_context(driver, buffer.owner, |driver, cache| buffer.upload(driver, cache))?;
        Ok(())
    }

    /// Binds a buffer at its target on the current context.
    pub fn bind(
        &self,
        driver: &mut dyn GraphicsDriver,
        contexts: &mut ContextRegistry,
        id: BufferId,
    ) -> Result<&ShadowedBuffer, RenderError> {
        let buffer = self.buffers.get(&id).ok_or_else(|| unknown(id))?;
        contexts
            .state_cache()?
            .bind_buffer(driver, buffer.target, buffer.handle, false);
        Ok(buffer)
    }

    /// Destroys a buffer on its owning context, now or when it next becomes
    /// current. Returns `false` for unknown ids.
    pub fn destroy(&mut self, driver: &mut dyn GraphicsDriver, contexts: &mut ContextRegistry, id: BufferId) -> bool {
        match self.buffers.remove(&id) {
            Some(buffer) => {
                contexts.destroy_or_defer(driver, buffer.owner, DriverObject::Buffer(buffer.handle));
                true
            }
            None => false,
        }
    }

    /// Destroys every buffer.
    pub fn destroy_all(&mut self, driver: &mut dyn GraphicsDriver, contexts: &mut ContextRegistry) {
        for (_, buffer) in self.buffers.drain() {
            contexts.destroy_or_defer(driver, buffer.owner, DriverObject::Buffer(buffer.handle));
        }
    }

    /// Drops the driver handles of every buffer owned by `context`.
    pub fn notify_context_lost(&mut self, context: ContextId) {
        for buffer in self.buffers.values_mut().filter(|b| b.owner == context) {
            buffer.handle = BufferHandle::NONE;
        }
    }

    /// Recreates every buffer owned by `context` from its shadow.
    ///
    /// # Errors
    ///
    /// Stops at the first buffer the driver cannot create; the remaining
    /// ones keep no handle until the next reset.
    pub fn notify_context_reset(
        &mut self,
        driver: &mut dyn GraphicsDriver,
        contexts: &mut ContextRegistry,
        context: ContextId,
    ) -> Result<(), RenderError> {
        let buffers = &mut self.buffers;
        let restored = contexts.with_context(driver, context, |driver, cache| {
            let mut restored = 0;
            for buffer in buffers.values_mut().filter(|b| b.owner == context) {
                buffer.handle = driver.create_buffer()?;
                buffer.upload(driver, cache);
                restored += 1;
            }
            Ok::<_, RenderError>(restored)
        })??;
        log::debug!("Restored {} buffers on context {:?}", restored, context);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use khora_gpu_core::renderer::api::DriverCapabilities;
    use khora_gpu_core::renderer::testing::{DriverCall, RecordingDriver};

    const MAIN: ContextId = ContextId(1);
    const SECONDARY: ContextId = ContextId(2);

    fn setup() -> (RecordingDriver, ContextRegistry) {
        let mut driver = RecordingDriver::default();
        let mut contexts = ContextRegistry::new();
        contexts.register(MAIN, DriverCapabilities::default());
        contexts.register(SECONDARY, DriverCapabilities::default());
        contexts.make_current(&mut driver, MAIN).unwrap();
        (driver, contexts)
    }

    #[test]
    fn test_writes_reach_shadow_and_driver() {
        let (mut driver, mut contexts) = setup();
        let mut buffers = ShadowedBufferManager::new();
        let id = buffers
            .create(&mut driver, &mut contexts, BufferTarget::Array, BufferUsage::Dynamic, &[0; 8])
            .unwrap();

        buffers.write(&mut driver, &mut contexts, id, 2, &[7, 7]).unwrap();
        let buffer = buffers.get(id).unwrap();
        assert_eq!(buffer.contents(), &[0, 0, 7, 7, 0, 0, 0, 0]);
        assert_eq!(driver.buffer_contents(buffer.handle()), Some(buffer.contents()));

        assert!(matches!(
            buffers.write(&mut driver, &mut contexts, id, 6, &[1, 2, 3]),
            Err(RenderError::OutOfBounds { end: 9, size: 8 })
        ));
        assert!(matches!(
            buffers.write(&mut driver, &mut contexts, BufferId(99), 0, &[1]),
            Err(RenderError::InvalidHandle(_))
        ));
    }

    #[test]
    fn test_write_near_usize_max_is_out_of_bounds() {
        let (mut driver, mut contexts) = setup();
        let mut buffers = ShadowedBufferManager::new();
        let id = buffers
            .create(&mut driver, &mut contexts, BufferTarget::Array, BufferUsage::Dynamic, &[0; 8])
            .unwrap();
        driver.clear_calls();

        assert!(matches!(
            buffers.write(&mut driver, &mut contexts, id, usize::MAX, &[1; 4]),
            Err(RenderError::OutOfBounds { end: usize::MAX, size: 8 })
        ));
        assert!(matches!(
            buffers.write(&mut driver, &mut contexts, id, usize::MAX - 1, &[1]),
            Err(RenderError::OutOfBounds { .. })
        ));
        assert_eq!(buffers.get(id).unwrap().contents(), &[0; 8]);
        assert!(driver.calls().is_empty());
    }

    #[test]
    fn test_writing_another_contexts_buffer_keeps_current_context() {
        let (mut driver, mut contexts) = setup();
        let mut buffers = ShadowedBufferManager::new();
        contexts.make_current(&mut driver, SECONDARY).unwrap();
        let id = buffers
            .create(&mut driver, &mut contexts, BufferTarget::Array, BufferUsage::Dynamic, &[0; 4])
            .unwrap();
        contexts.make_current(&mut driver, MAIN).unwrap();
        driver.clear_calls();

        buffers.write(&mut driver, &mut contexts, id, 0, &[5, 6]).unwrap();
        assert_eq!(contexts.current_id(), Some(MAIN));
        assert_eq!(driver.current_context(), Some(MAIN));
        assert_eq!(
            driver.calls().first(),
            Some(&DriverCall::MakeCurrent(SECONDARY))
        );
        assert_eq!(driver.calls().last(), Some(&DriverCall::MakeCurrent(MAIN)));

        buffers.replace(&mut driver, &mut contexts, id, &[1; 6]).unwrap();
        assert_eq!(contexts.current_id(), Some(MAIN));
        let buffer = buffers.get(id).unwrap();
        assert_eq!(driver.buffer_contents(buffer.handle()), Some(buffer.contents()));
    }

    #[test]
    fn test_loss_and_reset_restore_identical_contents() {
        let (mut driver, mut contexts) = setup();
        let mut buffers = ShadowedBufferManager::new();
        let data: Vec<u8> = (0..=255).collect();
        let id = buffers
            .create(&mut driver, &mut contexts, BufferTarget::Array, BufferUsage::Static, &data)
            .unwrap();

        contexts.notify_context_lost(MAIN);
        buffers.notify_context_lost(MAIN);
        driver.lose_context();
        assert!(buffers.get(id).unwrap().handle().is_none());

        buffers.write(&mut driver, &mut contexts, id, 0, &[42]).unwrap();
        assert!(driver.calls().iter().all(|c| !matches!(c, DriverCall::BufferSubData { .. })));

        contexts.notify_context_reset(&mut driver, MAIN);
        buffers.notify_context_reset(&mut driver, &mut contexts, MAIN).unwrap();

        let buffer = buffers.get(id).unwrap();
        let mut expected = data.clone();
        expected[0] = 42;
        assert!(!buffer.handle().is_none());
        assert_eq!(driver.buffer_contents(buffer.handle()), Some(expected.as_slice()));
    }

    #[test]
    fn test_destroy_from_another_context_is_deferred() {
        let (mut driver, mut contexts) = setup();
        let mut buffers = ShadowedBufferManager::new();
        let id = buffers
            .create(&mut driver, &mut contexts, BufferTarget::Uniform, BufferUsage::Stream, &[1; 16])
            .unwrap();
        let handle = buffers.get(id).unwrap().handle();

        contexts.make_current(&mut driver, SECONDARY).unwrap();
        assert!(buffers.destroy(&mut driver, &mut contexts, id));
        assert!(driver.is_live(DriverObject::Buffer(handle)));

        contexts.make_current(&mut driver, MAIN).unwrap();
        assert!(!driver.is_live(DriverObject::Buffer(handle)));
        assert!(buffers.is_empty());
    }
}
