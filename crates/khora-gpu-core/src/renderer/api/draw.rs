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

//! Draw submissions from the scene graph.

use super::handles::{BufferId, TextureHandle};
use super::state::TextureTarget;

/// Primitive assembly topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveType {
    /// Isolated points.
    PointList,
    /// Isolated line segments.
    LineList,
    /// Connected line segments.
    LineStrip,
    /// Isolated triangles.
    #[default]
    TriangleList,
    /// Connected triangles.
    TriangleStrip,
    /// Triangles sharing the first vertex.
    TriangleFan,
}

/// Specifies the data type of indices in an index buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexFormat {
    /// Indices are 16-bit unsigned integers.
    Uint16,
    /// Indices are 32-bit unsigned integers.
    Uint32,
}

impl IndexFormat {
    /// Size of one index in bytes.
    pub fn size(self) -> usize {
        match self {
            IndexFormat::Uint16 => 2,
            IndexFormat::Uint32 => 4,
        }
    }
}

/// A texture bound to one unit for a draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureBinding {
    /// Texture unit index.
    pub unit: u32,
    /// Binding target.
    pub target: TextureTarget,
    /// The texture.
    pub texture: TextureHandle,
}

/// Index range of an indexed draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexRange {
    /// Logical index buffer.
    pub buffer: BufferId,
    /// First index.
    pub start: u32,
    /// Number of indices.
    pub count: u32,
}

/// Everything the backend needs to issue one draw call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrawDescriptor {
    /// Primitive topology.
    pub primitive: PrimitiveType,
    /// Logical vertex buffer.
    pub vertex_buffer: BufferId,
    /// First vertex for non-indexed draws.
    pub vertex_start: u32,
    /// Vertex count for non-indexed draws.
    pub vertex_count: u32,
    /// Index range for indexed draws.
    pub indices: Option<IndexRange>,
    /// Textures bound per unit.
    pub textures: Vec<TextureBinding>,
    /// Number of instances; 1 for non-instanced draws.
    pub instance_count: u32,
}

impl DrawDescriptor {
    /// A non-indexed, non-instanced draw of `vertex_count` vertices.
    pub fn new(primitive: PrimitiveType, vertex_buffer: BufferId, vertex_count: u32) -> Self {
        Self {
            primitive,
            vertex_buffer,
            vertex_start: 0,
            vertex_count,
            indices: None,
            textures: Vec::new(),
            instance_count: 1,
        }
    }

    /// Switches to an indexed draw.
    pub fn with_indices(mut self, buffer: BufferId, start: u32, count: u32) -> Self {
        self.indices = Some(IndexRange {
            buffer,
            start,
            count,
        });
        self
    }

    /// Binds a texture to a unit.
    pub fn with_texture(mut self, unit: u32, target: TextureTarget, texture: TextureHandle) -> Self {
        self.textures.push(TextureBinding {
            unit,
            target,
            texture,
        });
        self
    }

    /// Sets the instance count.
    pub fn with_instances(mut self, instance_count: u32) -> Self {
        self.instance_count = instance_count.max(1);
        self
    }
}
