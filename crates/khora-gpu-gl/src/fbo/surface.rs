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

use khora_gpu_core::renderer::api::{
    Attachment, BufferTarget, PixelFormat, RenderbufferHandle, TextureHandle, TextureTarget,
};
use khora_gpu_core::renderer::GraphicsDriver;

/// Where the pixels of a colour surface live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SurfaceSource {
    /// One mip level of a texture owned by the asset manager.
    Texture {
        /// The texture.
        texture: TextureHandle,
        /// Its binding target.
        target: TextureTarget,
        /// Mip level rendered into.
        level: u32,
    },
    /// A renderbuffer, usually from the [`RenderBufferPool`](super::RenderBufferPool).
    Renderbuffer(RenderbufferHandle),
}

/// A colour surface bound to one slot of a render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceDesc {
    /// Backing storage.
    pub source: SurfaceSource,
    /// Pixel format of the storage.
    pub format: PixelFormat,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl SurfaceDesc {
    /// Level 0 of a 2D texture.
    pub fn texture(texture: TextureHandle, format: PixelFormat, width: u32, height: u32) -> Self {
        Self {
            source: SurfaceSource::Texture {
                texture,
                target: TextureTarget::D2,
                level: 0,
            },
            format,
            width,
            height,
        }
    }

    /// A renderbuffer surface.
    pub fn renderbuffer(
        renderbuffer: RenderbufferHandle,
        format: PixelFormat,
        width: u32,
        height: u32,
    ) -> Self {
        Self {
            source: SurfaceSource::Renderbuffer(renderbuffer),
            format,
            width,
            height,
        }
    }

    /// `(width, height)`.
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// The texture behind the surface, if it is one.
    pub fn texture_handle(&self) -> Option<(TextureHandle, TextureTarget, u32)> {
        match self.source {
            SurfaceSource::Texture {
                texture,
                target,
                level,
            } => Some((texture, target, level)),
            SurfaceSource::Renderbuffer(_) => None,
        }
    }

    /// Attaches the surface to the framebuffer bound at `target`.
    pub(crate) fn attach(&self, driver: &mut dyn GraphicsDriver, target: BufferTarget, attachment: Attachment) {
        match self.source {
            SurfaceSource::Texture {
                texture,
                target: texture_target,
                level,
            } => driver.framebuffer_texture(target, attachment, texture_target, texture, level),
            SurfaceSource::Renderbuffer(renderbuffer) => {
                driver.framebuffer_renderbuffer(target, attachment, renderbuffer)
            }
        }
    }
}

/// Clears whatever image is attached at `attachment`.
pub(crate) fn detach(driver: &mut dyn GraphicsDriver, target: BufferTarget, attachment: Attachment) {
    driver.framebuffer_renderbuffer(target, attachment, RenderbufferHandle::NONE);
}
