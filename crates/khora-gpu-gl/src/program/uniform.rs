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

use ahash::AHashMap;
use khora_gpu_core::renderer::api::{ConstantDefinition, ShaderStage, ShaderStageObject};
use khora_gpu_core::renderer::ActiveUniform;
use std::sync::Arc;

/// A driver uniform location tied to the reflected constant that feeds it.
#[derive(Debug, Clone)]
pub struct UniformBinding {
    /// Driver location.
    pub location: i32,
    /// The stage whose parameters supply the value.
    pub stage: ShaderStage,
    /// The reflected constant.
    pub definition: Arc<ConstantDefinition>,
}

/// Matches active uniforms against the constants of `stages`, in order. The
/// first stage declaring a name owns it; unknown names are skipped.
pub(crate) fn resolve_bindings(
    active: &[ActiveUniform],
    stages: &[&ShaderStageObject],
) -> Vec<UniformBinding> {
    active
        .iter()
        .filter_map(|uniform| {
            stages.iter().find_map(|stage| {
                stage.constants().find(&uniform.name).map(|def| UniformBinding {
                    location: uniform.location,
                    stage: stage.stage(),
                    definition: Arc::clone(def),
                })
            })
        })
        .collect()
}

/// The bytes last uploaded to each uniform location of one stage.
#[derive(Debug, Default)]
pub struct UniformShadow {
    values: AHashMap<i32, Vec<u8>>,
}

impl UniformShadow {
    /// Records `bytes` for `location`. Returns `false` if they match the
    /// previous upload, in which case the upload can be skipped.
    pub fn update(&mut self, location: i32, bytes: &[u8]) -> bool {
        match self.values.get_mut(&location) {
            Some(previous) if previous.as_slice() == bytes => false,
            Some(previous) => {
                previous.clear();
                previous.extend_from_slice(bytes);
                true
            }
            None => {
                self.values.insert(location, bytes.to_vec());
                true
            }
        }
    }

    /// Forgets every recorded value.
    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// Number of locations with a recorded value.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
