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

//! The capability descriptor supplied by the windowing layer with each context.

use bitflags::bitflags;

bitflags! {
    /// Optional driver features, from extensions or core versions.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DriverFeatures: u32 {
        /// Framebuffer objects are available for render-to-texture.
        const FRAMEBUFFER_OBJECTS = 1 << 0;
        /// Framebuffer blits (multisample resolve).
        const FRAMEBUFFER_BLIT = 1 << 1;
        /// Separately linked stage programs combined in a pipeline object.
        const SEPARATE_SHADER_OBJECTS = 1 << 2;
        /// Linked program binaries can be retrieved and reloaded.
        const PROGRAM_BINARY = 1 << 3;
        /// The driver answers "is this format renderable" without probing.
        const INTERNAL_FORMAT_QUERY = 1 << 4;
        /// 32-bit index buffers.
        const INDEX_UINT32 = 1 << 5;
        /// Depth buffers may be larger than the colour target they serve.
        const RELAXED_DEPTH_SIZE = 1 << 6;
        /// Separate RGB/alpha blend equations.
        const BLEND_EQUATION_SEPARATE = 1 << 7;
        /// Multisampled renderbuffer storage.
        const MULTISAMPLE_RENDERBUFFER = 1 << 8;
        /// Packed depth/stencil formats.
        const PACKED_DEPTH_STENCIL = 1 << 9;
        /// Vertex array objects.
        const VERTEX_ARRAY_OBJECTS = 1 << 10;
    }
}

impl Default for DriverFeatures {
    fn default() -> Self {
        DriverFeatures::FRAMEBUFFER_OBJECTS
            | DriverFeatures::FRAMEBUFFER_BLIT
            | DriverFeatures::INDEX_UINT32
            | DriverFeatures::BLEND_EQUATION_SEPARATE
            | DriverFeatures::MULTISAMPLE_RENDERBUFFER
            | DriverFeatures::PACKED_DEPTH_STENCIL
            | DriverFeatures::VERTEX_ARRAY_OBJECTS
    }
}

/// Limits and features of one graphics context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverCapabilities {
    /// Number of texture image units the fragment stage can sample from.
    pub max_texture_units: u32,
    /// Maximum number of simultaneous draw buffers.
    pub max_draw_buffers: u32,
    /// Maximum multisample count for renderbuffers.
    pub max_samples: u32,
    /// Optional features.
    pub features: DriverFeatures,
}

impl DriverCapabilities {
    /// Returns `true` if every feature in `features` is supported.
    pub fn has(&self, features: DriverFeatures) -> bool {
        self.features.contains(features)
    }
}

impl Default for DriverCapabilities {
    fn default() -> Self {
        Self {
            max_texture_units: 16,
            max_draw_buffers: 8,
            max_samples: 8,
            features: DriverFeatures::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_capabilities_do_not_claim_optional_program_features() {
        let caps = DriverCapabilities::default();
        assert!(caps.has(DriverFeatures::FRAMEBUFFER_OBJECTS));
        assert!(!caps.has(DriverFeatures::SEPARATE_SHADER_OBJECTS));
        assert!(!caps.has(DriverFeatures::PROGRAM_BINARY));
        assert!(!caps.has(DriverFeatures::INDEX_UINT32 | DriverFeatures::PROGRAM_BINARY));
    }
}
