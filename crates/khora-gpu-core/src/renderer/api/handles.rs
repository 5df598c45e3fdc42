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

//! Opaque handles to driver-side objects.
//!
//! Driver names are plain `u32`s where `0` is reserved: it names the default
//! framebuffer, "no buffer bound", and so on. Every handle type exposes that
//! reserved value as `NONE`.

macro_rules! driver_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name(pub u32);

        impl $name {
            /// The reserved driver name `0`.
            pub const NONE: Self = Self(0);

            /// Returns `true` if this is the reserved name `0`.
            pub fn is_none(self) -> bool {
                self.0 == 0
            }
        }
    };
}

driver_handle!(
    /// A driver buffer object (vertex, index, uniform, pixel transfer).
    BufferHandle
);
driver_handle!(
    /// A driver texture object.
    TextureHandle
);
driver_handle!(
    /// A driver framebuffer object. `NONE` is the window's default framebuffer.
    FramebufferHandle
);
driver_handle!(
    /// A driver renderbuffer: pixel storage usable only as an attachment.
    RenderbufferHandle
);
driver_handle!(
    /// A compiled shader stage object, supplied by the material system.
    ShaderHandle
);
driver_handle!(
    /// A driver program object.
    ProgramHandle
);
driver_handle!(
    /// A driver program pipeline combining separable stage programs.
    ProgramPipelineHandle
);
driver_handle!(
    /// A driver vertex array object.
    VertexArrayHandle
);

/// An opaque identifier for one graphics context, supplied by the windowing layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(pub u32);

/// A logical buffer handle that stays valid across context loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub usize);

/// A logical render-target handle that stays valid across context loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RenderTargetId(pub usize);

/// Any driver object that can be destroyed, tagged by kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverObject {
    /// A buffer object.
    Buffer(BufferHandle),
    /// A texture object.
    Texture(TextureHandle),
    /// A framebuffer object.
    Framebuffer(FramebufferHandle),
    /// A renderbuffer object.
    Renderbuffer(RenderbufferHandle),
    /// A program object.
    Program(ProgramHandle),
    /// A program pipeline object.
    ProgramPipeline(ProgramPipelineHandle),
    /// A vertex array object.
    VertexArray(VertexArrayHandle),
}

impl DriverObject {
    /// Returns `true` if the wrapped handle is the reserved name `0`.
    pub fn is_none(self) -> bool {
        match self {
            DriverObject::Buffer(h) => h.is_none(),
            DriverObject::Texture(h) => h.is_none(),
            DriverObject::Framebuffer(h) => h.is_none(),
            DriverObject::Renderbuffer(h) => h.is_none(),
            DriverObject::Program(h) => h.is_none(),
            DriverObject::ProgramPipeline(h) => h.is_none(),
            DriverObject::VertexArray(h) => h.is_none(),
        }
    }
}
