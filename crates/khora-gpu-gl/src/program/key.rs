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

use khora_gpu_core::renderer::api::{ShaderStage, StageId};
use std::fmt;

/// Identity of a linked program: the vertex stage id in the high 32 bits,
/// the fragment stage id in the low 32 bits, 0 for an empty slot.
///
/// The packing is injective, so distinct ordered pairs never share a key.
/// The same value keys the microcode cache.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ProgramKey(u64);

impl ProgramKey {
    /// The key of "no stage bound in either slot".
    pub const NONE: ProgramKey = ProgramKey(0);

    /// Combines the ids of the two slots.
    pub fn combine(vertex: Option<StageId>, fragment: Option<StageId>) -> Self {
        let v = vertex.map_or(0, |id| id.0) as u64;
        let f = fragment.map_or(0, |id| id.0) as u64;
        ProgramKey((v << 32) | f)
    }

    /// The key of a single separately linked stage.
    pub fn single(stage: ShaderStage, id: StageId) -> Self {
        match stage {
            ShaderStage::Vertex => Self::combine(Some(id), None),
            ShaderStage::Fragment => Self::combine(None, Some(id)),
        }
    }

    /// Returns `true` if both slots are empty.
    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    /// The raw 64-bit value.
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// The vertex stage id, if any.
    pub fn vertex(self) -> Option<StageId> {
        let id = (self.0 >> 32) as u32;
        (id != 0).then_some(StageId(id))
    }

    /// The fragment stage id, if any.
    pub fn fragment(self) -> Option<StageId> {
        let id = self.0 as u32;
        (id != 0).then_some(StageId(id))
    }

    /// Returns `true` if either slot holds `id`.
    pub fn uses(self, id: StageId) -> bool {
        self.vertex() == Some(id) || self.fragment() == Some(id)
    }
}

impl fmt::Debug for ProgramKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProgramKey({:#018x})", self.0)
    }
}
