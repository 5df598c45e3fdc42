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

use super::depth_buffer::{DepthBufferId, DepthBufferRecord};
use super::render_buffer::RenderBufferKey;
use super::surface::{self, SurfaceDesc};
use crate::context::ContextRegistry;
use crate::state_cache::StateCache;
use khora_gpu_core::renderer::api::{
    Attachment, BlitFilter, BufferTarget, ClearBuffers, ContextId, DriverObject, FramebufferHandle,
    PixelFormat, Rect, RenderbufferFormat, RenderbufferHandle,
};
use khora_gpu_core::renderer::{ConfigurationError, DriverError, GraphicsDriver};

/// Number of colour slots of a render target.
pub const MAX_COLOUR_ATTACHMENTS: usize = 8;

const TARGET: BufferTarget = BufferTarget::DrawFramebuffer;

#[derive(Debug, Clone, Copy)]
struct Multisample {
    framebuffer: FramebufferHandle,
    colour: Option<(RenderBufferKey, RenderbufferHandle)>,
}

/// The framebuffer object behind an off-screen render target.
///
/// Multisampled targets render into a second framebuffer whose colour is a
/// pooled multisample renderbuffer, and resolve into the surfaces of this one
/// on [`swap_buffers`](Self::swap_buffers). Depth and stencil are attached
/// to whichever framebuffer is rendered into.
#[derive(Debug)]
pub struct FrameBufferObject {
    name: String,
    context: ContextId,
    framebuffer: FramebufferHandle,
    multisample: Option<Multisample>,
    samples: u32,
    colour: [Option<SurfaceDesc>; MAX_COLOUR_ATTACHMENTS],
    depth: Option<DepthBufferId>,
}

fn create_framebuffer(driver: &mut dyn GraphicsDriver) -> Result<FramebufferHandle, DriverError> {
    let framebuffer = driver.create_framebuffer()?;
    if framebuffer.is_none() {
        return Err(DriverError::ObjectCreationFailed {
            kind: "framebuffer",
        });
    }
    Ok(framebuffer)
}

impl FrameBufferObject {
    /// Creates the framebuffer, plus the multisample one when `samples > 0`,
    /// on the current context `context`.
    pub fn new(
        driver: &mut dyn GraphicsDriver,
        context: ContextId,
        name: impl Into<String>,
        samples: u32,
    ) -> Result<Self, DriverError> {
        let framebuffer = create_framebuffer(driver)?;
        let multisample = if samples > 0 {
            match create_framebuffer(driver) {
                Ok(framebuffer) => Some(Multisample {
                    framebuffer,
                    colour: None,
                }),
                Err(err) => {
                    driver.delete_framebuffer(framebuffer);
                    return Err(err);
                }
            }
        } else {
            None
        };
        Ok(Self {
            name: name.into(),
            context,
            framebuffer,
            multisample,
            samples,
            colour: [None; MAX_COLOUR_ATTACHMENTS],
            depth: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The context owning the framebuffer objects.
    pub fn context(&self) -> ContextId {
        self.context
    }

    /// The resolve framebuffer holding the colour surfaces.
    pub fn fbo(&self) -> FramebufferHandle {
        self.framebuffer
    }

    pub fn multisample_fbo(&self) -> Option<FramebufferHandle> {
        self.multisample.map(|ms| ms.framebuffer)
    }

    /// The framebuffer draws go to.
    pub fn render_fbo(&self) -> FramebufferHandle {
        self.multisample_fbo().unwrap_or(self.framebuffer)
    }

    pub fn samples(&self) -> u32 {
        self.samples
    }

    pub fn surface(&self, slot: usize) -> Option<&SurfaceDesc> {
        self.colour.get(slot).and_then(Option::as_ref)
    }

    /// Populated slots with their surfaces.
    pub fn surfaces(&self) -> impl Iterator<Item = (usize, &SurfaceDesc)> {
        self.colour
            .iter()
            .enumerate()
            .filter_map(|(slot, surface)| surface.as_ref().map(|s| (slot, s)))
    }

    /// Colour format of slot 0.
    pub fn format(&self) -> Option<PixelFormat> {
        self.colour[0].map(|s| s.format)
    }

    pub fn width(&self) -> u32 {
        self.colour[0].map_or(0, |s| s.width)
    }

    pub fn height(&self) -> u32 {
        self.colour[0].map_or(0, |s| s.height)
    }

    /// The attached depth buffer.
    pub fn depth_buffer(&self) -> Option<DepthBufferId> {
        self.depth
    }

    /// The pooled multisample colour storage this target needs for its
    /// current slot 0, if it is multisampled.
    pub fn required_multisample_colour(&self) -> Option<RenderBufferKey> {
        let surface = self.colour[0]?;
        self.multisample.map(|_| {
            RenderBufferKey::new(
                RenderbufferFormat::Colour(surface.format),
                surface.width,
                surface.height,
                self.samples,
            )
        })
    }

    /// The pooled multisample colour storage currently in use.
    pub fn multisample_colour(&self) -> Option<(RenderBufferKey, RenderbufferHandle)> {
        self.multisample.and_then(|ms| ms.colour)
    }

    /// Swaps the multisample colour storage, returning the previous one for
    /// release. Ignored on single-sampled targets.
    pub fn set_multisample_colour(
        &mut self,
        colour: Option<(RenderBufferKey, RenderbufferHandle)>,
    ) -> Option<(RenderBufferKey, RenderbufferHandle)> {
        let ms = self.multisample.as_mut()?;
        std::mem::replace(&mut ms.colour, colour)
    }

    /// Stores `surface` in `slot` without touching the driver.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::InvalidColourSlot`] for slots past
    /// [`MAX_COLOUR_ATTACHMENTS`].
    pub fn set_surface(&mut self, slot: usize, surface: Option<SurfaceDesc>) -> Result<(), ConfigurationError> {
        let entry = self
            .colour
            .get_mut(slot)
            .ok_or(ConfigurationError::InvalidColourSlot { slot })?;
        *entry = surface;
        Ok(())
    }

    /// Binds `surface` to `slot` and reinitialises the attachments.
    pub fn bind_surface(
        &mut self,
        driver: &mut dyn GraphicsDriver,
        cache: &mut StateCache,
        slot: usize,
        surface: SurfaceDesc,
    ) -> Result<(), ConfigurationError> {
        self.set_surface(slot, Some(surface))?;
        self.initialise(driver, cache)
    }

    /// Clears `slot`. Attachments are rebuilt while slot 0 still holds a surface.
    pub fn unbind_surface(
        &mut self,
        driver: &mut dyn GraphicsDriver,
        cache: &mut StateCache,
        slot: usize,
    ) -> Result<(), ConfigurationError> {
        self.set_surface(slot, None)?;
        if self.colour[0].is_some() {
            self.initialise(driver, cache)?;
        }
        Ok(())
    }

    /// Attaches every populated slot, selects draw and read buffers and
    /// checks completeness. The owning context must be current.
    ///
    /// # Errors
    ///
    /// - [`ConfigurationError::MissingColourSurface`] if slot 0 is empty.
    /// - [`ConfigurationError::AttachmentSizeMismatch`] if a slot differs in
    ///   size from slot 0. Nothing is attached in that case.
    /// - [`ConfigurationError::IncompleteFramebuffer`] if the driver rejects
    ///   the result.
    pub fn initialise(&mut self, driver: &mut dyn GraphicsDriver, cache: &mut StateCache) -> Result<(), ConfigurationError> {
        let first = self.colour[0].ok_or(ConfigurationError::MissingColourSurface)?;
        let expected = first.size();
        for (slot, surface) in self.surfaces() {
            if surface.size() != expected {
                return Err(ConfigurationError::AttachmentSizeMismatch {
                    slot,
                    expected,
                    found: surface.size(),
                });
            }
        }

        cache.bind_framebuffer(driver, TARGET, self.framebuffer, false);
        let mut draw_buffers = Vec::with_capacity(MAX_COLOUR_ATTACHMENTS);
        for (slot, surface) in self.colour.iter().enumerate() {
            let attachment = Attachment::Colour(slot as u8);
            match surface {
                Some(surface) => {
                    surface.attach(driver, TARGET, attachment);
                    draw_buffers.push(attachment);
                }
                None => {
                    surface::detach(driver, TARGET, attachment);
                    draw_buffers.push(Attachment::None);
                }
            }
        }
        let used = self.surfaces().map(|(slot, _)| slot + 1).max().unwrap_or(1);
        draw_buffers.truncate(used);
        driver.draw_buffers(&draw_buffers);
        driver.read_buffer(Attachment::Colour(0));
        self.check_status(driver)?;

        if let Some(ms) = self.multisample {
            cache.bind_framebuffer(driver, TARGET, ms.framebuffer, false);
            let colour = ms.colour.map_or(RenderbufferHandle::NONE, |(_, handle)| handle);
            driver.framebuffer_renderbuffer(TARGET, Attachment::Colour(0), colour);
            driver.draw_buffers(&[Attachment::Colour(0)]);
            driver.read_buffer(Attachment::Colour(0));
            self.check_status(driver)?;
        }
        Ok(())
    }

    fn check_status(&self, driver: &mut dyn GraphicsDriver) -> Result<(), ConfigurationError> {
        let status = driver.check_framebuffer_status(TARGET);
        if status.is_complete() {
            Ok(())
        } else {
            Err(ConfigurationError::IncompleteFramebuffer {
                name: self.name.clone(),
                status: format!("{status:?}"),
            })
        }
    }

    /// Makes the target current for drawing and reading.
    pub fn bind(&self, driver: &mut dyn GraphicsDriver, cache: &mut StateCache) {
        cache.bind_framebuffer(driver, BufferTarget::Framebuffer, self.render_fbo(), false);
    }

    /// Resolves the multisample colour into slot 0. No-op when single-sampled.
    pub fn swap_buffers(&self, driver: &mut dyn GraphicsDriver, cache: &mut StateCache) {
        let Some(ms) = self.multisample else {
            return;
        };
        let rect = Rect::from_size(self.width(), self.height());
        cache.bind_framebuffer(driver, BufferTarget::ReadFramebuffer, ms.framebuffer, false);
        cache.bind_framebuffer(driver, BufferTarget::DrawFramebuffer, self.framebuffer, false);
        driver.blit_framebuffer(rect, rect, ClearBuffers::COLOUR, BlitFilter::Nearest);
    }

    /// Attaches `record` at the depth and stencil points, or detaches both
    /// for `None`.
    pub fn attach_depth_buffer(
        &mut self,
        driver: &mut dyn GraphicsDriver,
        cache: &mut StateCache,
        record: Option<&DepthBufferRecord>,
    ) {
        cache.bind_framebuffer(driver, TARGET, self.render_fbo(), false);
        let depth = record.and_then(DepthBufferRecord::depth_buffer);
        let stencil = record.and_then(DepthBufferRecord::stencil_buffer);
        driver.framebuffer_renderbuffer(TARGET, Attachment::Depth, depth.unwrap_or_default());
        driver.framebuffer_renderbuffer(TARGET, Attachment::Stencil, stencil.unwrap_or_default());
        self.depth = record.map(DepthBufferRecord::id);
    }

    /// Detaches the depth buffer.
    pub fn detach_depth_buffer(&mut self, driver: &mut dyn GraphicsDriver, cache: &mut StateCache) {
        self.attach_depth_buffer(driver, cache, None);
    }

    /// Forgets the depth buffer without driver calls.
    pub(crate) fn forget_depth_buffer(&mut self) {
        self.depth = None;
    }

    /// Drops every driver handle of a lost context.
    pub(crate) fn notify_context_lost(&mut self) {
        self.framebuffer = FramebufferHandle::NONE;
        if let Some(ms) = self.multisample.as_mut() {
            ms.framebuffer = FramebufferHandle::NONE;
            ms.colour = None;
        }
        self.depth = None;
    }

    /// Creates fresh framebuffer names after a context reset. The caller
    /// restores the multisample colour and reinitialises.
    pub(crate) fn recreate(&mut self, driver: &mut dyn GraphicsDriver) -> Result<(), DriverError> {
        self.framebuffer = create_framebuffer(driver)?;
        if let Some(ms) = self.multisample.as_mut() {
            ms.framebuffer = create_framebuffer(driver)?;
        }
        Ok(())
    }

    /// Queues both framebuffers for deletion on the owning context and
    /// returns the multisample colour storage to release.
    pub fn destroy(
        mut self,
        driver: &mut dyn GraphicsDriver,
        contexts: &mut ContextRegistry,
    ) -> Option<(RenderBufferKey, RenderbufferHandle)> {
        contexts.destroy_or_defer(driver, self.context, DriverObject::Framebuffer(self.framebuffer));
        let ms = self.multisample.take()?;
        contexts.destroy_or_defer(driver, self.context, DriverObject::Framebuffer(ms.framebuffer));
        ms.colour
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fbo::depth_buffer::{DepthBufferPool, DepthTarget};
    use khora_gpu_core::renderer::api::{
        DepthFormat, DepthStencilMode, DriverCapabilities, TextureTarget,
    };
    use khora_gpu_core::renderer::testing::{AttachedImage, DriverCall, RecordingDriver};

    const MAIN: ContextId = ContextId(1);

    fn texture(driver: &mut RecordingDriver, format: PixelFormat, width: u32, height: u32) -> SurfaceDesc {
        let texture = driver.create_texture().unwrap();
        driver.bind_texture(TextureTarget::D2, texture);
        driver.tex_storage_2d(TextureTarget::D2, format, width, height);
        SurfaceDesc::texture(texture, format, width, height)
    }

    #[test]
    fn test_initialise_attaches_slots_and_draw_buffers() {
        let mut driver = RecordingDriver::default();
        let mut cache = StateCache::new(16);
        let mut fbo = FrameBufferObject::new(&mut driver, MAIN, "gbuffer", 0).unwrap();
        let albedo = texture(&mut driver, PixelFormat::Rgba8Unorm, 64, 64);
        let normals = texture(&mut driver, PixelFormat::Rgba16Float, 64, 64);

        fbo.set_surface(2, Some(normals)).unwrap();
        fbo.bind_surface(&mut driver, &mut cache, 0, albedo).unwrap();

        assert_eq!(
            driver.attachment(fbo.fbo(), Attachment::Colour(2)),
            normals.texture_handle().map(|(t, _, _)| AttachedImage::Texture(t))
        );
        assert!(driver.calls().contains(&DriverCall::DrawBuffers(vec![
            Attachment::Colour(0),
            Attachment::None,
            Attachment::Colour(2),
        ])));
        assert_eq!(fbo.format(), Some(PixelFormat::Rgba8Unorm));
        assert_eq!((fbo.width(), fbo.height()), (64, 64));
    }

    #[test]
    fn test_mismatched_slot_size_is_a_configuration_error() {
        let mut driver = RecordingDriver::default();
        let mut cache = StateCache::new(16);
        let mut fbo = FrameBufferObject::new(&mut driver, MAIN, "mrt", 0).unwrap();
        let big = texture(&mut driver, PixelFormat::Rgba8Unorm, 256, 256);
        let small = texture(&mut driver, PixelFormat::Rgba8Unorm, 128, 256);
        fbo.bind_surface(&mut driver, &mut cache, 0, big).unwrap();
        driver.clear_calls();

        let err = fbo.bind_surface(&mut driver, &mut cache, 1, small).unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::AttachmentSizeMismatch {
                slot: 1,
                expected: (256, 256),
                found: (128, 256),
            }
        );
        assert_eq!(driver.count_calls(|c| matches!(c, DriverCall::FramebufferTexture { .. })), 0);
    }

    #[test]
    fn test_slot_zero_is_required_and_slots_are_bounded() {
        let mut driver = RecordingDriver::default();
        let mut cache = StateCache::new(16);
        let mut fbo = FrameBufferObject::new(&mut driver, MAIN, "empty", 0).unwrap();
        assert_eq!(
            fbo.initialise(&mut driver, &mut cache),
            Err(ConfigurationError::MissingColourSurface)
        );
        let surface = texture(&mut driver, PixelFormat::Rgba8Unorm, 8, 8);
        assert_eq!(
            fbo.set_surface(MAX_COLOUR_ATTACHMENTS, Some(surface)),
            Err(ConfigurationError::InvalidColourSlot {
                slot: MAX_COLOUR_ATTACHMENTS
            })
        );
        assert!(fbo.unbind_surface(&mut driver, &mut cache, 0).is_ok());
    }

    #[test]
    fn test_incomplete_framebuffer_is_reported() {
        let mut driver = RecordingDriver::default();
        driver.reject_colour_format(PixelFormat::Rgb565Unorm);
        let mut cache = StateCache::new(16);
        let mut fbo = FrameBufferObject::new(&mut driver, MAIN, "bad", 0).unwrap();
        let surface = texture(&mut driver, PixelFormat::Rgb565Unorm, 8, 8);

        let err = fbo.bind_surface(&mut driver, &mut cache, 0, surface).unwrap_err();
        assert!(matches!(err, ConfigurationError::IncompleteFramebuffer { ref name, .. } if name == "bad"));
    }

    #[test]
    fn test_swap_blits_only_when_multisampled() {
        let mut driver = RecordingDriver::default();
        let mut cache = StateCache::new(16);
        let single = FrameBufferObject::new(&mut driver, MAIN, "single", 0).unwrap();
        single.swap_buffers(&mut driver, &mut cache);
        assert_eq!(driver.count_calls(|c| matches!(c, DriverCall::BlitFramebuffer { .. })), 0);

        let mut multi = FrameBufferObject::new(&mut driver, MAIN, "multi", 4).unwrap();
        let surface = texture(&mut driver, PixelFormat::Rgba8Unorm, 32, 32);
        multi.set_surface(0, Some(surface)).unwrap();
        multi.swap_buffers(&mut driver, &mut cache);
        assert!(driver.calls().contains(&DriverCall::BlitFramebuffer {
            mask: ClearBuffers::COLOUR,
            filter: BlitFilter::Nearest,
        }));
        assert_ne!(multi.render_fbo(), multi.fbo());
    }

    #[test]
    fn test_depth_attaches_to_render_framebuffer() {
        let mut driver = RecordingDriver::new(DriverCapabilities::default());
        let mut contexts = ContextRegistry::new();
        contexts.register(MAIN, DriverCapabilities::default());
        contexts.make_current(&mut driver, MAIN).unwrap();
        let cache = contexts.state_cache().unwrap();

        let mut fbo = FrameBufferObject::new(&mut driver, MAIN, "shadow", 0).unwrap();
        let surface = texture(&mut driver, PixelFormat::R32Float, 512, 512);
        fbo.bind_surface(&mut driver, cache, 0, surface).unwrap();

        let mut pool = DepthBufferPool::new();
        let target = DepthTarget {
            context: MAIN,
            has_fbo: true,
            width: 512,
            height: 512,
            samples: 0,
            mode: DepthStencilMode {
                depth: Some(DepthFormat::Depth24Stencil8),
                stencil: None,
                score: 0,
            },
        };
        let id = pool.create(&mut driver, cache, 1, &target).unwrap();
        let record = pool.get(id).unwrap();
        fbo.attach_depth_buffer(&mut driver, cache, Some(record));

        let rb = record.depth_buffer().unwrap();
        assert_eq!(driver.attachment(fbo.fbo(), Attachment::Depth), Some(AttachedImage::Renderbuffer(rb)));
        assert_eq!(driver.attachment(fbo.fbo(), Attachment::Stencil), Some(AttachedImage::Renderbuffer(rb)));
        assert_eq!(fbo.depth_buffer(), Some(id));

        fbo.detach_depth_buffer(&mut driver, cache);
        assert_eq!(driver.attachment(fbo.fbo(), Attachment::Depth), None);
        assert_eq!(fbo.depth_buffer(), None);
    }
}
