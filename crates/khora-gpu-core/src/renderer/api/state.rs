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

//! Driver state tokens: binding targets, capabilities and fixed-function
//! parameters. Defaults mirror the initial state of a freshly created context.

use bitflags::bitflags;

/// A binding point for buffer-like objects.
///
/// Framebuffer and renderbuffer targets are included so that every bind goes
/// through one cached entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BufferTarget {
    /// Vertex attribute data.
    Array,
    /// Index data.
    ElementArray,
    /// Uniform block data.
    Uniform,
    /// Pixel read-back destination.
    PixelPack,
    /// Pixel upload source.
    PixelUnpack,
    /// Copy source.
    CopyRead,
    /// Copy destination.
    CopyWrite,
    /// Both draw and read framebuffer points.
    Framebuffer,
    /// Draw framebuffer point only.
    DrawFramebuffer,
    /// Read framebuffer point only.
    ReadFramebuffer,
    /// The renderbuffer binding point.
    Renderbuffer,
}

impl BufferTarget {
    /// Returns `true` for the three framebuffer binding points.
    pub fn is_framebuffer(self) -> bool {
        matches!(
            self,
            BufferTarget::Framebuffer | BufferTarget::DrawFramebuffer | BufferTarget::ReadFramebuffer
        )
    }
}

/// A texture binding target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TextureTarget {
    /// One-dimensional texture.
    D1,
    /// Two-dimensional texture.
    D2,
    /// Array of two-dimensional layers.
    D2Array,
    /// Three-dimensional texture.
    D3,
    /// Cube map.
    Cube,
    /// Multisampled two-dimensional texture.
    D2Multisample,
}

/// A per-texture sampling parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TextureParameter {
    /// Minification filter.
    MinFilter,
    /// Magnification filter.
    MagFilter,
    /// Wrap mode along S.
    WrapS,
    /// Wrap mode along T.
    WrapT,
    /// Wrap mode along R.
    WrapR,
    /// Lowest mip level.
    BaseLevel,
    /// Highest mip level.
    MaxLevel,
    /// Depth comparison mode.
    CompareMode,
    /// Depth comparison function.
    CompareFunc,
    /// Maximum anisotropy.
    MaxAnisotropy,
    /// Minimum level of detail.
    MinLod,
    /// Maximum level of detail.
    MaxLod,
}

/// A toggleable driver capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Capability {
    /// Colour blending.
    Blend,
    /// Back/front face culling.
    CullFace,
    /// Depth testing.
    DepthTest,
    /// Stencil testing.
    StencilTest,
    /// Scissor testing.
    ScissorTest,
    /// Polygon offset for filled primitives.
    PolygonOffsetFill,
    /// Multisample rasterisation.
    Multisample,
    /// Alpha-to-coverage.
    SampleAlphaToCoverage,
    /// Primitive restart with a fixed index.
    PrimitiveRestartFixedIndex,
    /// sRGB conversion on framebuffer writes.
    FramebufferSrgb,
    /// Depth clamping.
    DepthClamp,
    /// Shader-controlled point size.
    ProgramPointSize,
    /// Seamless filtering across cube map faces.
    TextureCubeMapSeamless,
}

impl Capability {
    /// Every capability, in declaration order.
    pub const ALL: [Capability; 13] = [
        Capability::Blend,
        Capability::CullFace,
        Capability::DepthTest,
        Capability::StencilTest,
        Capability::ScissorTest,
        Capability::PolygonOffsetFill,
        Capability::Multisample,
        Capability::SampleAlphaToCoverage,
        Capability::PrimitiveRestartFixedIndex,
        Capability::FramebufferSrgb,
        Capability::DepthClamp,
        Capability::ProgramPointSize,
        Capability::TextureCubeMapSeamless,
    ];

    /// Whether the capability is enabled in a freshly created context.
    pub fn enabled_by_default(self) -> bool {
        matches!(self, Capability::Multisample)
    }
}

/// A blend factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendFactor {
    /// `0`.
    Zero,
    /// `1`.
    #[default]
    One,
    /// Source colour.
    SrcColor,
    /// `1 - source colour`.
    OneMinusSrcColor,
    /// Destination colour.
    DstColor,
    /// `1 - destination colour`.
    OneMinusDstColor,
    /// Source alpha.
    SrcAlpha,
    /// `1 - source alpha`.
    OneMinusSrcAlpha,
    /// Destination alpha.
    DstAlpha,
    /// `1 - destination alpha`.
    OneMinusDstAlpha,
}

/// A blend equation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendEquation {
    /// `src + dst`.
    #[default]
    Add,
    /// `src - dst`.
    Subtract,
    /// `dst - src`.
    ReverseSubtract,
    /// `min(src, dst)`.
    Min,
    /// `max(src, dst)`.
    Max,
}

/// A comparison function for depth and stencil tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompareFunction {
    /// Never passes.
    Never,
    /// Passes if the new value is less than the stored one.
    #[default]
    Less,
    /// Passes on equality.
    Equal,
    /// Passes if less or equal.
    LessEqual,
    /// Passes if greater.
    Greater,
    /// Passes on inequality.
    NotEqual,
    /// Passes if greater or equal.
    GreaterEqual,
    /// Always passes.
    Always,
}

/// Which faces are culled when [`Capability::CullFace`] is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CullFace {
    /// Cull front faces.
    Front,
    /// Cull back faces.
    #[default]
    Back,
    /// Cull everything.
    FrontAndBack,
}

/// Polygon rasterisation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PolygonMode {
    /// Filled polygons.
    #[default]
    Fill,
    /// Wireframe.
    Line,
    /// Vertices only.
    Point,
}

/// A pixel rectangle, used for viewports and blits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    /// Left edge.
    pub x: i32,
    /// Bottom edge.
    pub y: i32,
    /// Width in pixels.
    pub width: i32,
    /// Height in pixels.
    pub height: i32,
}

impl Rect {
    /// A rectangle anchored at the origin.
    pub fn from_size(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width: width as i32,
            height: height as i32,
        }
    }
}

/// The value of a texture parameter, as last pushed to the driver.
///
/// Floats are stored by bit pattern so the value can be compared and hashed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TexParameterValue {
    /// An integer parameter.
    Int(i32),
    /// A float parameter, by bit pattern.
    Float(u32),
}

impl TexParameterValue {
    /// Wraps a float parameter.
    pub fn float(value: f32) -> Self {
        TexParameterValue::Float(value.to_bits())
    }
}

/// An attachment point on a framebuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attachment {
    /// Colour attachment `n`.
    Colour(u8),
    /// The depth attachment.
    Depth,
    /// The stencil attachment.
    Stencil,
    /// No attachment (for `draw_buffers`/`read_buffer`).
    None,
    /// The default framebuffer's back buffer.
    Back,
}

/// The completeness status reported for a framebuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FramebufferStatus {
    /// The framebuffer can be rendered to.
    Complete,
    /// An attachment is not renderable.
    IncompleteAttachment,
    /// No image is attached.
    MissingAttachment,
    /// Draw buffers reference missing attachments.
    IncompleteDrawBuffer,
    /// Attachments disagree on sample count.
    IncompleteMultisample,
    /// The combination of formats is unsupported.
    Unsupported,
    /// The default framebuffer does not exist.
    Undefined,
}

impl FramebufferStatus {
    /// Returns `true` for [`FramebufferStatus::Complete`].
    pub fn is_complete(self) -> bool {
        self == FramebufferStatus::Complete
    }
}

/// Filter applied by a framebuffer blit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlitFilter {
    /// Nearest-neighbour.
    Nearest,
    /// Bilinear.
    Linear,
}

bitflags! {
    /// A set of framebuffer planes, used for clears and blits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ClearBuffers: u32 {
        /// Colour attachments.
        const COLOUR = 1 << 0;
        /// Depth attachment.
        const DEPTH = 1 << 1;
        /// Stencil attachment.
        const STENCIL = 1 << 2;
    }
}

/// Expected usage pattern of a buffer's contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BufferUsage {
    /// Written once, drawn many times.
    #[default]
    Static,
    /// Rewritten often.
    Dynamic,
    /// Rewritten every use.
    Stream,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framebuffer_targets_are_recognised() {
        assert!(BufferTarget::Framebuffer.is_framebuffer());
        assert!(BufferTarget::ReadFramebuffer.is_framebuffer());
        assert!(!BufferTarget::Renderbuffer.is_framebuffer());
        assert!(!BufferTarget::Array.is_framebuffer());
    }

    #[test]
    fn float_parameters_compare_by_bits() {
        assert_eq!(TexParameterValue::float(4.0), TexParameterValue::float(4.0));
        assert_ne!(TexParameterValue::float(0.0), TexParameterValue::float(-0.0));
    }
}
