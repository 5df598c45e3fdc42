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

use super::render_buffer::{create_renderbuffer, RenderBufferKey};
use crate::context::ContextRegistry;
use crate::state_cache::StateCache;
use ahash::AHashMap;
use khora_gpu_core::renderer::api::{
    ContextId, DepthStencilMode, DriverObject, RenderbufferFormat, RenderbufferHandle,
};
use khora_gpu_core::renderer::{DriverError, GraphicsDriver};

/// Pool id of targets that never get a depth buffer.
pub const POOL_NO_DEPTH: u16 = 0;
/// Pool id targets start in.
pub const POOL_DEFAULT: u16 = 1;

/// Identity of a pooled depth buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DepthBufferId(pub usize);

/// A render target as seen by the depth pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthTarget {
    /// Context the target renders on.
    pub context: ContextId,
    /// `false` for window surfaces and copy-mode render textures.
    pub has_fbo: bool,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Sample count.
    pub samples: u32,
    /// The depth/stencil pairing chosen for the target's colour format.
    pub mode: DepthStencilMode,
}

/// A depth/stencil attachment shared by compatible render targets.
///
/// A record with neither depth nor stencil storage is a dummy: it only marks
/// that a window surface of its context has a depth buffer of its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepthBufferRecord {
    id: DepthBufferId,
    pool_id: u16,
    context: ContextId,
    depth: Option<RenderbufferHandle>,
    stencil: Option<RenderbufferHandle>,
    mode: DepthStencilMode,
    width: u32,
    height: u32,
    samples: u32,
}

impl DepthBufferRecord {
    pub fn id(&self) -> DepthBufferId {
        self.id
    }

    pub fn pool_id(&self) -> u16 {
        self.pool_id
    }

    pub fn context(&self) -> ContextId {
        self.context
    }

    /// Depth storage. Packed formats also provide stencil.
    pub fn depth_buffer(&self) -> Option<RenderbufferHandle> {
        self.depth
    }

    /// Stencil storage; the depth storage again for packed formats.
    pub fn stencil_buffer(&self) -> Option<RenderbufferHandle> {
        self.stencil
    }

    pub fn mode(&self) -> DepthStencilMode {
        self.mode
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn samples(&self) -> u32 {
        self.samples
    }

    pub fn is_dummy(&self) -> bool {
        self.depth.is_none() && self.stencil.is_none()
    }

    pub fn is_packed(&self) -> bool {
        self.mode.is_packed()
    }

    /// Whether this record may serve `target`.
    ///
    /// Contexts must match. A window target only accepts a dummy record. An
    /// off-screen target needs real storage of the same depth and stencil
    /// formats, the same sample count and the same size, or a size at least
    /// as large when `relaxed_size` is set.
    pub fn is_compatible(&self, target: &DepthTarget, relaxed_size: bool) -> bool {
        if self.context != target.context {
            return false;
        }
        if !target.has_fbo {
            return self.is_dummy();
        }
        if self.is_dummy() {
            return false;
        }

        let same_format = self.mode.depth == target.mode.depth
            && self.mode.stencil == target.mode.stencil
            && self.is_packed() == target.mode.is_packed();
        let size_ok = if relaxed_size {
            self.width >= target.width && self.height >= target.height
        } else {
            self.width == target.width && self.height == target.height
        };
        same_format && size_ok && self.samples == target.samples
    }

    fn destroy(self, driver: &mut dyn GraphicsDriver, contexts: &mut ContextRegistry) {
        if let Some(depth) = self.depth {
            contexts.destroy_or_defer(driver, self.context, DriverObject::Renderbuffer(depth));
        }
        if let Some(stencil) = self.stencil.filter(|s| Some(*s) != self.depth) {
            contexts.destroy_or_defer(driver, self.context, DriverObject::Renderbuffer(stencil));
        }
    }
}

/// Depth buffers grouped by pool id.
#[derive(Debug, Default)]
pub struct DepthBufferPool {
    pools: AHashMap<u16, Vec<DepthBufferRecord>>,
    next_id: usize,
}

impl DepthBufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, record_for: impl FnOnce(DepthBufferId) -> DepthBufferRecord) -> DepthBufferId {
        let id = DepthBufferId(self.next_id);
        self.next_id += 1;
        let record = record_for(id);
        self.pools.entry(record.pool_id).or_default().push(record);
        id
    }

    /// Registers the storage-less record of a window surface.
    pub fn add_dummy(&mut self, pool_id: u16, context: ContextId) -> DepthBufferId {
        self.push(|id| DepthBufferRecord {
            id,
            pool_id,
            context,
            depth: None,
            stencil: None,
            mode: DepthStencilMode::NONE,
            width: 0,
            height: 0,
            samples: 0,
        })
    }

    /// Allocates storage for `target` on the current context and pools it
    /// under `pool_id`. Packed formats share one renderbuffer between the
    /// depth and stencil points.
    ///
    /// # Errors
    ///
    /// Returns a [`DriverError`] if a renderbuffer could not be created.
    pub fn create(
        &mut self,
        driver: &mut dyn GraphicsDriver,
        cache: &mut StateCache,
        pool_id: u16,
        target: &DepthTarget,
    ) -> Result<DepthBufferId, DriverError> {
        let key = |format| RenderBufferKey::new(format, target.width, target.height, target.samples);
        let depth = match target.mode.depth {
            Some(format) => Some(create_renderbuffer(driver, cache, key(RenderbufferFormat::Depth(format)))?),
            None => None,
        };
        let stencil = match target.mode.stencil {
            _ if target.mode.is_packed() => depth,
            Some(format) => match create_renderbuffer(driver, cache, key(RenderbufferFormat::Stencil(format))) {
                Ok(handle) => Some(handle),
                Err(err) => {
                    if let Some(depth) = depth {
                        cache.delete_object(driver, DriverObject::Renderbuffer(depth));
                    }
                    return Err(err);
                }
            },
            None => None,
        };

        log::debug!(
            "Created depth buffer D{}S{} {}x{} ({} samples) in pool {}",
            target.mode.depth_bits(),
            target.mode.stencil_bits(),
            target.width,
            target.height,
            target.samples,
            pool_id
        );
        Ok(self.push(|id| DepthBufferRecord {
            id,
            pool_id,
            context: target.context,
            depth,
            stencil,
            mode: target.mode,
            width: target.width,
            height: target.height,
            samples: target.samples,
        }))
    }

    /// The first record in `pool_id` compatible with `target`.
    pub fn find_compatible(&self, pool_id: u16, target: &DepthTarget, relaxed_size: bool) -> Option<DepthBufferId> {
        self.pools
            .get(&pool_id)?
            .iter()
            .find(|record| record.is_compatible(target, relaxed_size))
            .map(DepthBufferRecord::id)
    }

    /// Looks up a pooled record.
    pub fn get(&self, id: DepthBufferId) -> Option<&DepthBufferRecord> {
        self.pools.values().flatten().find(|record| record.id == id)
    }

    /// Records in one pool.
    pub fn records(&self, pool_id: u16) -> &[DepthBufferRecord] {
        self.pools.get(&pool_id).map_or(&[], Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.pools.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forgets the records of a lost context without driver calls.
    pub fn notify_context_lost(&mut self, context: ContextId) {
        for records in self.pools.values_mut() {
            records.retain(|record| record.context != context);
        }
    }

    /// Destroys the records of one context, e.g. when its window closes.
    pub fn destroy_context(&mut self, driver: &mut dyn GraphicsDriver, contexts: &mut ContextRegistry, context: ContextId) {
        for records in self.pools.values_mut() {
            let (doomed, kept): (Vec<_>, Vec<_>) = std::mem::take(records)
                .into_iter()
                .partition(|record| record.context == context);
            *records = kept;
            for record in doomed {
                record.destroy(driver, contexts);
            }
        }
    }

    /// Destroys every record.
    pub fn destroy_all(&mut self, driver: &mut dyn GraphicsDriver, contexts: &mut ContextRegistry) {
        for (_, records) in self.pools.drain() {
            for record in records {
                record.destroy(driver, contexts);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use khora_gpu_core::renderer::api::{DepthFormat, DriverCapabilities, StencilFormat};
    use khora_gpu_core::renderer::testing::RecordingDriver;

    const MAIN: ContextId = ContextId(1);
    const OTHER: ContextId = ContextId(2);

    fn packed() -> DepthStencilMode {
        DepthStencilMode {
            depth: Some(DepthFormat::Depth24Stencil8),
            stencil: None,
            score: 7524,
        }
    }

    fn fbo_target(width: u32, height: u32) -> DepthTarget {
        DepthTarget {
            context: MAIN,
            has_fbo: true,
            width,
            height,
            samples: 0,
            mode: packed(),
        }
    }

    fn record(mode: DepthStencilMode, width: u32, height: u32) -> DepthBufferRecord {
        DepthBufferRecord {
            id: DepthBufferId(0),
            pool_id: POOL_DEFAULT,
            context: MAIN,
            depth: Some(RenderbufferHandle(5)),
            stencil: mode.is_packed().then_some(RenderbufferHandle(5)),
            mode,
            width,
            height,
            samples: 0,
        }
    }

    #[test]
    fn test_context_mismatch_is_never_compatible() {
        let mut target = fbo_target(64, 64);
        target.context = OTHER;
        assert!(!record(packed(), 64, 64).is_compatible(&target, true));
    }

    #[test]
    fn test_window_targets_accept_only_dummies() {
        let mut pool = DepthBufferPool::new();
        let dummy = pool.add_dummy(POOL_DEFAULT, MAIN);
        let window = DepthTarget {
            has_fbo: false,
            ..fbo_target(800, 600)
        };

        assert_eq!(pool.find_compatible(POOL_DEFAULT, &window, false), Some(dummy));
        assert!(!record(packed(), 800, 600).is_compatible(&window, false));
        assert!(!pool.get(dummy).unwrap().is_compatible(&fbo_target(800, 600), false));
    }

    #[test]
    fn test_size_rule_follows_relaxed_flag() {
        let big = record(packed(), 128, 128);
        assert!(!big.is_compatible(&fbo_target(64, 64), false));
        assert!(big.is_compatible(&fbo_target(64, 64), true));
        assert!(!big.is_compatible(&fbo_target(256, 64), true));
        assert!(big.is_compatible(&fbo_target(128, 128), false));
    }

    #[test]
    fn test_packed_and_unpacked_do_not_mix() {
        let split = DepthStencilMode {
            depth: Some(DepthFormat::Depth24),
            stencil: Some(StencilFormat::Stencil8),
            score: 3532,
        };
        assert!(!record(split, 64, 64).is_compatible(&fbo_target(64, 64), false));

        let mut target = fbo_target(64, 64);
        target.samples = 4;
        assert!(!record(packed(), 64, 64).is_compatible(&target, false));
    }

    #[test]
    fn test_create_shares_packed_storage_and_destroys_once() {
        let mut driver = RecordingDriver::default();
        let mut contexts = ContextRegistry::new();
        contexts.register(MAIN, DriverCapabilities::default());
        contexts.make_current(&mut driver, MAIN).unwrap();
        let mut pool = DepthBufferPool::new();

        let cache = contexts.state_cache().unwrap();
        let id = pool.create(&mut driver, cache, 3, &fbo_target(64, 64)).unwrap();
        let rec = pool.get(id).unwrap().clone();
        assert_eq!(rec.depth_buffer(), rec.stencil_buffer());
        assert_eq!(rec.pool_id(), 3);
        assert_eq!(driver.live_renderbuffers(), 1);
        assert_eq!(pool.find_compatible(3, &fbo_target(64, 64), false), Some(id));
        assert_eq!(pool.find_compatible(POOL_DEFAULT, &fbo_target(64, 64), false), None);

        pool.destroy_all(&mut driver, &mut contexts);
        assert_eq!(driver.live_renderbuffers(), 0);
        assert!(pool.is_empty());
    }
}
