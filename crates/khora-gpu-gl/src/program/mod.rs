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

//! Shader Program Linkage Cache.
//!
//! The material system selects one vertex and one fragment stage at a time.
//! [`ProgramCache`] maps each pair to a [`LinkedProgram`], links it once and
//! re-binds it with a single driver call afterwards. Uniform uploads go
//! through a per-stage shadow so unchanged values never reach the driver.

mod cache;
mod key;
mod linked;
mod uniform;

pub use self::cache::ProgramCache;
pub use self::key::ProgramKey;
pub use self::linked::LinkedProgram;
pub use self::uniform::{UniformBinding, UniformShadow};

use crate::settings::LinkStrategyPreference;
use khora_gpu_core::renderer::api::{DriverCapabilities, DriverFeatures};

/// How a stage pair becomes a usable program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkStrategy {
    /// Both stages linked into one program object.
    Monolithic,
    /// Each stage linked on its own, combined in a program pipeline.
    Separable,
}

impl LinkStrategy {
    /// Picks the strategy once per backend from the driver features and the
    /// configured preference.
    pub fn select(capabilities: &DriverCapabilities, preference: LinkStrategyPreference) -> Self {
        let separable = capabilities.has(DriverFeatures::SEPARATE_SHADER_OBJECTS);
        match preference {
            LinkStrategyPreference::Monolithic => LinkStrategy::Monolithic,
            LinkStrategyPreference::Auto | LinkStrategyPreference::Separable if separable => {
                LinkStrategy::Separable
            }
            LinkStrategyPreference::Separable => {
                log::warn!("Separable programs requested but unsupported; linking monolithically");
                LinkStrategy::Monolithic
            }
            LinkStrategyPreference::Auto => LinkStrategy::Monolithic,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_follows_driver_support() {
        let plain = DriverCapabilities::default();
        let sso = DriverCapabilities {
            features: DriverFeatures::default() | DriverFeatures::SEPARATE_SHADER_OBJECTS,
            ..Default::default()
        };

        assert_eq!(
            LinkStrategy::select(&plain, LinkStrategyPreference::Auto),
            LinkStrategy::Monolithic
        );
        assert_eq!(
            LinkStrategy::select(&sso, LinkStrategyPreference::Auto),
            LinkStrategy::Separable
        );
        assert_eq!(
            LinkStrategy::select(&plain, LinkStrategyPreference::Separable),
            LinkStrategy::Monolithic
        );
        assert_eq!(
            LinkStrategy::select(&sso, LinkStrategyPreference::Monolithic),
            LinkStrategy::Monolithic
        );
    }
}
