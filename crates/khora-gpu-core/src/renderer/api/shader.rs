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

//! Compiled shader stages and the constants they reflect.
//!
//! Stages are compiled by the material system; this module only describes
//! them. A [`ShaderStageHandle`] is shared between the material that owns the
//! stage and every linked program built from it.

use super::handles::ShaderHandle;
use ahash::AHashMap;
use bitflags::bitflags;
use std::sync::Arc;

/// The pipeline stage a shader runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShaderStage {
    /// The vertex stage.
    Vertex,
    /// The fragment stage.
    Fragment,
}

impl ShaderStage {
    /// Both stages, in pipeline order.
    pub const ALL: [ShaderStage; 2] = [ShaderStage::Vertex, ShaderStage::Fragment];

    /// Dense index for per-stage arrays.
    pub fn index(self) -> usize {
        match self {
            ShaderStage::Vertex => 0,
            ShaderStage::Fragment => 1,
        }
    }
}

/// Stable numeric identity of a compiled stage. Never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StageId(pub u32);

/// The data type of a reflected constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuConstantType {
    /// `float`.
    Float1,
    /// `vec2`.
    Float2,
    /// `vec3`.
    Float3,
    /// `vec4`.
    Float4,
    /// `int`.
    Int1,
    /// `ivec2`.
    Int2,
    /// `ivec3`.
    Int3,
    /// `ivec4`.
    Int4,
    /// `uint`.
    Uint1,
    /// `uvec2`.
    Uint2,
    /// `uvec3`.
    Uint3,
    /// `uvec4`.
    Uint4,
    /// `bool`, uploaded as an unsigned integer.
    Bool1,
    /// `mat2`.
    Matrix2x2,
    /// `mat3`.
    Matrix3x3,
    /// `mat4`.
    Matrix4x4,
    /// `mat2x3`.
    Matrix2x3,
    /// `mat2x4`.
    Matrix2x4,
    /// `mat3x2`.
    Matrix3x2,
    /// `mat3x4`.
    Matrix3x4,
    /// `mat4x2`.
    Matrix4x2,
    /// `mat4x3`.
    Matrix4x3,
    /// A 2D sampler, bound to a texture unit index.
    Sampler2D,
    /// A 3D sampler.
    Sampler3D,
    /// A cube sampler.
    SamplerCube,
    /// A 2D array sampler.
    Sampler2DArray,
    /// A 2D depth-comparison sampler.
    Sampler2DShadow,
}

/// Which scalar buffer in [`ProgramParameters`](super::ProgramParameters) a constant lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstantClass {
    /// Stored in the float buffer.
    Float,
    /// Stored in the int buffer (includes samplers).
    Int,
    /// Stored in the uint buffer (includes bools).
    Uint,
}

impl GpuConstantType {
    /// Number of scalar elements in one value of this type.
    pub fn element_count(self) -> usize {
        use GpuConstantType::*;
        match self {
            Float1 | Int1 | Uint1 | Bool1 => 1,
            Float2 | Int2 | Uint2 => 2,
            Float3 | Int3 | Uint3 => 3,
            Float4 | Int4 | Uint4 | Matrix2x2 => 4,
            Matrix2x3 | Matrix3x2 => 6,
            Matrix2x4 | Matrix4x2 => 8,
            Matrix3x3 => 9,
            Matrix3x4 | Matrix4x3 => 12,
            Matrix4x4 => 16,
            Sampler2D | Sampler3D | SamplerCube | Sampler2DArray | Sampler2DShadow => 1,
        }
    }

    /// Storage class of the scalar elements.
    pub fn class(self) -> ConstantClass {
        use GpuConstantType::*;
        match self {
            Int1 | Int2 | Int3 | Int4 => ConstantClass::Int,
            Sampler2D | Sampler3D | SamplerCube | Sampler2DArray | Sampler2DShadow => {
                ConstantClass::Int
            }
            Uint1 | Uint2 | Uint3 | Uint4 | Bool1 => ConstantClass::Uint,
            _ => ConstantClass::Float,
        }
    }

    /// `(columns, rows)` for matrix types.
    pub fn matrix_dimensions(self) -> Option<(u8, u8)> {
        use GpuConstantType::*;
        match self {
            Matrix2x2 => Some((2, 2)),
            Matrix3x3 => Some((3, 3)),
            Matrix4x4 => Some((4, 4)),
            Matrix2x3 => Some((2, 3)),
            Matrix2x4 => Some((2, 4)),
            Matrix3x2 => Some((3, 2)),
            Matrix3x4 => Some((3, 4)),
            Matrix4x2 => Some((4, 2)),
            Matrix4x3 => Some((4, 3)),
            _ => None,
        }
    }

    /// Returns `true` for sampler types.
    pub fn is_sampler(self) -> bool {
        use GpuConstantType::*;
        matches!(
            self,
            Sampler2D | Sampler3D | SamplerCube | Sampler2DArray | Sampler2DShadow
        )
    }
}

bitflags! {
    /// How often a constant's value changes. Uniform uploads are filtered by
    /// intersecting this with the caller's mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Variability: u16 {
        /// Changes once per frame or less.
        const GLOBAL = 1 << 0;
        /// Changes per renderable.
        const PER_OBJECT = 1 << 1;
        /// Depends on the lights affecting the renderable.
        const LIGHTS = 1 << 2;
        /// The pass iteration counter.
        const PASS_ITERATION_NUMBER = 1 << 3;
        /// Every kind.
        const ALL = 0xFFFF;
    }
}

/// One reflected constant of a shader stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstantDefinition {
    /// Name as declared in the shader source, without any `[0]` suffix.
    pub name: String,
    /// Data type of one element.
    pub const_type: GpuConstantType,
    /// Offset into the parameter buffer of [`GpuConstantType::class`].
    pub physical_index: usize,
    /// Number of array elements; 1 for non-arrays.
    pub array_size: usize,
    /// How often the value changes.
    pub variability: Variability,
}

impl ConstantDefinition {
    /// Creates a non-array constant.
    pub fn new(
        name: impl Into<String>,
        const_type: GpuConstantType,
        physical_index: usize,
        variability: Variability,
    ) -> Self {
        Self {
            name: name.into(),
            const_type,
            physical_index,
            array_size: 1,
            variability,
        }
    }

    /// Sets the array size.
    pub fn with_array_size(mut self, array_size: usize) -> Self {
        self.array_size = array_size.max(1);
        self
    }

    /// Total scalar element count across the array.
    pub fn element_count(&self) -> usize {
        self.const_type.element_count() * self.array_size
    }
}

/// The constants reflected from one stage, looked up by name.
#[derive(Debug, Clone, Default)]
pub struct ConstantDefinitions {
    definitions: Vec<Arc<ConstantDefinition>>,
    by_name: AHashMap<String, usize>,
}

impl ConstantDefinitions {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a constant, replacing any constant with the same name.
    pub fn insert(&mut self, definition: ConstantDefinition) {
        let definition = Arc::new(definition);
        match self.by_name.get(&definition.name) {
            Some(&index) => self.definitions[index] = definition,
            None => {
                self.by_name
                    .insert(definition.name.clone(), self.definitions.len());
                self.definitions.push(definition);
            }
        }
    }

    /// Looks up a constant by name. A trailing `[0]` is ignored.
    pub fn find(&self, name: &str) -> Option<&Arc<ConstantDefinition>> {
        let name = name.strip_suffix("[0]").unwrap_or(name);
        self.by_name.get(name).map(|&index| &self.definitions[index])
    }

    /// Iterates in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<ConstantDefinition>> {
        self.definitions.iter()
    }

    /// Number of constants.
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Returns `true` if no constant was reflected.
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

impl FromIterator<ConstantDefinition> for ConstantDefinitions {
    fn from_iter<I: IntoIterator<Item = ConstantDefinition>>(iter: I) -> Self {
        let mut definitions = ConstantDefinitions::new();
        for definition in iter {
            definitions.insert(definition);
        }
        definitions
    }
}

/// A compiled shader stage as handed over by the material system.
#[derive(Debug)]
pub struct ShaderStageObject {
    id: StageId,
    stage: ShaderStage,
    shader: ShaderHandle,
    name: String,
    constants: ConstantDefinitions,
    column_major_matrices: bool,
}

/// Shared identity of a compiled stage.
pub type ShaderStageHandle = Arc<ShaderStageObject>;

impl ShaderStageObject {
    /// Describes a compiled stage with no reflected constants.
    pub fn new(id: StageId, stage: ShaderStage, shader: ShaderHandle, name: impl Into<String>) -> Self {
        debug_assert!(id.0 != 0, "stage id 0 is reserved for an empty slot");
        Self {
            id,
            stage,
            shader,
            name: name.into(),
            constants: ConstantDefinitions::new(),
            column_major_matrices: false,
        }
    }

    /// Attaches reflected constants.
    pub fn with_constants(mut self, constants: ConstantDefinitions) -> Self {
        self.constants = constants;
        self
    }

    /// Declares that matrices in this stage are stored column-major, so they
    /// are uploaded without transposition.
    pub fn with_column_major_matrices(mut self, column_major: bool) -> Self {
        self.column_major_matrices = column_major;
        self
    }

    /// Wraps the stage in a shared handle.
    pub fn into_handle(self) -> ShaderStageHandle {
        Arc::new(self)
    }

    /// Stable identity used for program keys.
    pub fn id(&self) -> StageId {
        self.id
    }

    /// The pipeline stage.
    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    /// The compiled driver shader.
    pub fn shader(&self) -> ShaderHandle {
        self.shader
    }

    /// Human-readable name, used in link error messages.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reflected constants.
    pub fn constants(&self) -> &ConstantDefinitions {
        &self.constants
    }

    /// Whether matrices are column-major.
    pub fn column_major_matrices(&self) -> bool {
        self.column_major_matrices
    }
}
