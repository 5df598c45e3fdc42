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

//! Pixel, depth and stencil formats, and the depth/stencil pairings a colour
//! format can be rendered with.

use serde::{Deserialize, Serialize};

/// A colour pixel format the driver's format catalogue defines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 8-bit red, normalized.
    R8Unorm,
    /// 8-bit red/green, normalized.
    Rg8Unorm,
    /// 8-bit RGB, normalized.
    Rgb8Unorm,
    /// 8-bit RGBA, normalized.
    Rgba8Unorm,
    /// 8-bit RGBA, sRGB-encoded.
    Rgba8UnormSrgb,
    /// 8-bit BGRA, normalized.
    Bgra8Unorm,
    /// 16-bit float red.
    R16Float,
    /// 16-bit float red/green.
    Rg16Float,
    /// 16-bit float RGBA.
    Rgba16Float,
    /// 32-bit float red.
    R32Float,
    /// 32-bit float red/green.
    Rg32Float,
    /// 32-bit float RGBA.
    Rgba32Float,
    /// 10-bit RGB with 2-bit alpha.
    Rgb10A2Unorm,
    /// Packed 11/11/10-bit float RGB.
    Rg11B10Float,
    /// 32-bit unsigned integer red.
    R32Uint,
    /// 5/6/5-bit RGB.
    Rgb565Unorm,
}

impl PixelFormat {
    /// Every colour format in catalogue order. The format table probes each one.
    pub const ALL: [PixelFormat; 16] = [
        PixelFormat::R8Unorm,
        PixelFormat::Rg8Unorm,
        PixelFormat::Rgb8Unorm,
        PixelFormat::Rgba8Unorm,
        PixelFormat::Rgba8UnormSrgb,
        PixelFormat::Bgra8Unorm,
        PixelFormat::R16Float,
        PixelFormat::Rg16Float,
        PixelFormat::Rgba16Float,
        PixelFormat::R32Float,
        PixelFormat::Rg32Float,
        PixelFormat::Rgba32Float,
        PixelFormat::Rgb10A2Unorm,
        PixelFormat::Rg11B10Float,
        PixelFormat::R32Uint,
        PixelFormat::Rgb565Unorm,
    ];

    /// Size of one pixel in bytes.
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            PixelFormat::R8Unorm => 1,
            PixelFormat::Rg8Unorm | PixelFormat::R16Float | PixelFormat::Rgb565Unorm => 2,
            PixelFormat::Rgb8Unorm => 3,
            PixelFormat::Rgba8Unorm
            | PixelFormat::Rgba8UnormSrgb
            | PixelFormat::Bgra8Unorm
            | PixelFormat::Rg16Float
            | PixelFormat::R32Float
            | PixelFormat::Rgb10A2Unorm
            | PixelFormat::Rg11B10Float
            | PixelFormat::R32Uint => 4,
            PixelFormat::Rgba16Float | PixelFormat::Rg32Float => 8,
            PixelFormat::Rgba32Float => 16,
        }
    }

    /// Returns `true` if the format stores sRGB-encoded colour.
    pub fn is_srgb(self) -> bool {
        matches!(self, PixelFormat::Rgba8UnormSrgb)
    }

    /// Returns the sRGB-encoded variant if one exists. Used for gamma-corrected targets.
    pub fn to_srgb(self) -> PixelFormat {
        match self {
            PixelFormat::Rgba8Unorm => PixelFormat::Rgba8UnormSrgb,
            other => other,
        }
    }
}

/// A depth storage format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DepthFormat {
    /// 16-bit normalized depth.
    Depth16,
    /// 24-bit normalized depth.
    Depth24,
    /// 32-bit normalized depth.
    Depth32,
    /// 32-bit float depth.
    Depth32Float,
    /// Packed 24-bit depth with 8-bit stencil.
    Depth24Stencil8,
    /// Packed 32-bit float depth with 8-bit stencil.
    Depth32FloatStencil8,
}

impl DepthFormat {
    /// Every depth format, in probe order.
    pub const ALL: [DepthFormat; 6] = [
        DepthFormat::Depth16,
        DepthFormat::Depth24,
        DepthFormat::Depth32,
        DepthFormat::Depth32Float,
        DepthFormat::Depth24Stencil8,
        DepthFormat::Depth32FloatStencil8,
    ];

    /// Number of depth bits.
    pub fn bits(self) -> u32 {
        match self {
            DepthFormat::Depth16 => 16,
            DepthFormat::Depth24 | DepthFormat::Depth24Stencil8 => 24,
            DepthFormat::Depth32 | DepthFormat::Depth32Float | DepthFormat::Depth32FloatStencil8 => 32,
        }
    }

    /// Returns `true` if the format carries its own stencil plane.
    pub fn is_packed(self) -> bool {
        matches!(
            self,
            DepthFormat::Depth24Stencil8 | DepthFormat::Depth32FloatStencil8
        )
    }

    /// The stencil plane of a packed format.
    pub fn packed_stencil(self) -> Option<StencilFormat> {
        self.is_packed().then_some(StencilFormat::Stencil8)
    }

    /// The non-packed depth format with the same depth precision.
    pub fn unpacked(self) -> DepthFormat {
        match self {
            DepthFormat::Depth24Stencil8 => DepthFormat::Depth24,
            DepthFormat::Depth32FloatStencil8 => DepthFormat::Depth32Float,
            other => other,
        }
    }
}

/// A stencil storage format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StencilFormat {
    /// 1-bit stencil.
    Stencil1,
    /// 4-bit stencil.
    Stencil4,
    /// 8-bit stencil.
    Stencil8,
    /// 16-bit stencil.
    Stencil16,
}

impl StencilFormat {
    /// Every standalone stencil format, in probe order.
    pub const ALL: [StencilFormat; 4] = [
        StencilFormat::Stencil1,
        StencilFormat::Stencil4,
        StencilFormat::Stencil8,
        StencilFormat::Stencil16,
    ];

    /// Number of stencil bits.
    pub fn bits(self) -> u32 {
        match self {
            StencilFormat::Stencil1 => 1,
            StencilFormat::Stencil4 => 4,
            StencilFormat::Stencil8 => 8,
            StencilFormat::Stencil16 => 16,
        }
    }
}

/// Storage format of a renderbuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RenderbufferFormat {
    /// Colour storage.
    Colour(PixelFormat),
    /// Depth storage (packed formats also provide stencil).
    Depth(DepthFormat),
    /// Standalone stencil storage.
    Stencil(StencilFormat),
}

/// One depth/stencil pairing accepted by the driver for a colour format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthStencilMode {
    /// Depth storage, if any.
    pub depth: Option<DepthFormat>,
    /// Separate stencil storage, if any. `None` for packed depth formats.
    pub stencil: Option<StencilFormat>,
    /// Desirability score; higher is better.
    pub score: i32,
}

impl DepthStencilMode {
    /// The "no attachment" sentinel. A colour format whose best mode is this
    /// can only be used as a pure colour target.
    pub const NONE: DepthStencilMode = DepthStencilMode {
        depth: None,
        stencil: None,
        score: 0,
    };

    /// Returns `true` if this is the "no attachment" sentinel.
    pub fn is_none(&self) -> bool {
        self.depth.is_none() && self.stencil.is_none()
    }

    /// Returns `true` if depth and stencil share one packed object.
    pub fn is_packed(&self) -> bool {
        self.depth.is_some_and(DepthFormat::is_packed)
    }

    /// Depth bits, or 0.
    pub fn depth_bits(&self) -> u32 {
        self.depth.map_or(0, DepthFormat::bits)
    }

    /// Stencil bits from the packed depth format or the separate stencil format.
    pub fn stencil_bits(&self) -> u32 {
        match (self.depth.and_then(DepthFormat::packed_stencil), self.stencil) {
            (Some(packed), _) => packed.bits(),
            (None, Some(stencil)) => stencil.bits(),
            (None, None) => 0,
        }
    }

    /// Returns `true` if the pairing provides a stencil plane.
    pub fn has_stencil(&self) -> bool {
        self.stencil_bits() > 0
    }
}
