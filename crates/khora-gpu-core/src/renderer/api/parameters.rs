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

//! CPU-side constant values and the uniform payloads derived from them.

use super::shader::{ConstantClass, ConstantDefinition, ConstantDefinitions};

/// Values for the constants of one stage, stored in three flat scalar buffers
/// addressed by [`ConstantDefinition::physical_index`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgramParameters {
    floats: Vec<f32>,
    ints: Vec<i32>,
    uints: Vec<u32>,
    pass_iteration: Option<usize>,
}

impl ProgramParameters {
    /// Creates empty parameter buffers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sizes the buffers to hold every constant of `definitions`.
    pub fn for_definitions(definitions: &ConstantDefinitions) -> Self {
        let mut params = Self::new();
        for def in definitions.iter() {
            let end = def.physical_index + def.element_count();
            match def.const_type.class() {
                ConstantClass::Float => grow(&mut params.floats, end),
                ConstantClass::Int => grow(&mut params.ints, end),
                ConstantClass::Uint => grow(&mut params.uints, end),
            }
        }
        params
    }

    /// Writes floats starting at `physical_index`, growing the buffer as needed.
    pub fn write_floats(&mut self, physical_index: usize, values: &[f32]) {
        write(&mut self.floats, physical_index, values);
    }

    /// Writes ints starting at `physical_index`.
    pub fn write_ints(&mut self, physical_index: usize, values: &[i32]) {
        write(&mut self.ints, physical_index, values);
    }

    /// Writes uints starting at `physical_index`.
    pub fn write_uints(&mut self, physical_index: usize, values: &[u32]) {
        write(&mut self.uints, physical_index, values);
    }

    /// Writes a float constant by name. Returns `false` if the name is unknown.
    pub fn set_named_floats(
        &mut self,
        definitions: &ConstantDefinitions,
        name: &str,
        values: &[f32],
    ) -> bool {
        match definitions.find(name) {
            Some(def) if def.const_type.class() == ConstantClass::Float => {
                self.write_floats(def.physical_index, values);
                true
            }
            _ => false,
        }
    }

    /// Marks the float at `physical_index` as the pass iteration counter.
    pub fn set_pass_iteration_index(&mut self, physical_index: usize) {
        self.pass_iteration = Some(physical_index);
    }

    /// Float index of the pass iteration counter, if one is tracked.
    pub fn pass_iteration_index(&self) -> Option<usize> {
        self.pass_iteration
    }

    /// Increments the pass iteration counter.
    pub fn increment_pass_iteration(&mut self) {
        if let Some(index) = self.pass_iteration {
            grow(&mut self.floats, index + 1);
            self.floats[index] += 1.0;
        }
    }

    /// Builds the upload payload for a constant, or `None` if the buffers
    /// don't hold enough values.
    pub fn uniform_data(&self, def: &ConstantDefinition, transpose: bool) -> Option<UniformData<'_>> {
        let start = def.physical_index;
        let end = start + def.element_count();
        let count = def.array_size as u32;
        let components = def.const_type.element_count() as u8;
        match def.const_type.class() {
            ConstantClass::Float => {
                let values = self.floats.get(start..end)?;
                Some(match def.const_type.matrix_dimensions() {
                    Some((columns, rows)) => UniformData::Matrix {
                        columns,
                        rows,
                        count,
                        transpose,
                        values,
                    },
                    None => UniformData::Float {
                        components,
                        count,
                        values,
                    },
                })
            }
            ConstantClass::Int => Some(UniformData::Int {
                components,
                count,
                values: self.ints.get(start..end)?,
            }),
            ConstantClass::Uint => Some(UniformData::Uint {
                components,
                count,
                values: self.uints.get(start..end)?,
            }),
        }
    }
}

fn grow<T: Default + Clone>(buffer: &mut Vec<T>, len: usize) {
    if buffer.len() < len {
        buffer.resize(len, T::default());
    }
}

fn write<T: Default + Copy>(buffer: &mut Vec<T>, start: usize, values: &[T]) {
    grow(buffer, start + values.len());
    buffer[start..start + values.len()].copy_from_slice(values);
}

/// A uniform upload, borrowed from [`ProgramParameters`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformData<'a> {
    /// `count` float vectors of `components` elements.
    Float {
        /// Elements per value.
        components: u8,
        /// Array length.
        count: u32,
        /// Scalar data.
        values: &'a [f32],
    },
    /// `count` int vectors (also samplers).
    Int {
        /// Elements per value.
        components: u8,
        /// Array length.
        count: u32,
        /// Scalar data.
        values: &'a [i32],
    },
    /// `count` uint vectors (also bools).
    Uint {
        /// Elements per value.
        components: u8,
        /// Array length.
        count: u32,
        /// Scalar data.
        values: &'a [u32],
    },
    /// `count` matrices.
    Matrix {
        /// Column count.
        columns: u8,
        /// Row count.
        rows: u8,
        /// Array length.
        count: u32,
        /// Whether the driver should transpose on upload.
        transpose: bool,
        /// Scalar data.
        values: &'a [f32],
    },
}

impl UniformData<'_> {
    /// Raw bytes of the payload, used to compare against the uniform shadow.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            UniformData::Float { values, .. } | UniformData::Matrix { values, .. } => {
                bytemuck::cast_slice(values)
            }
            UniformData::Int { values, .. } => bytemuck::cast_slice(values),
            UniformData::Uint { values, .. } => bytemuck::cast_slice(values),
        }
    }
}
