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

//! Backend configuration, loaded from RON.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// How vertex and fragment stages are linked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LinkStrategyPreference {
    /// Separable when the driver supports it, monolithic otherwise.
    #[default]
    Auto,
    /// Always link both stages into one program object.
    Monolithic,
    /// Link each stage on its own and combine them in a pipeline object.
    /// Falls back to monolithic if the driver lacks support.
    Separable,
}

/// How render textures are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RttPreference {
    /// Framebuffer objects when available, back-buffer copies otherwise.
    #[default]
    Auto,
    /// Always render into the back buffer and copy into the texture.
    Copy,
}

/// Tunables for the GL backend core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlBackendSettings {
    /// Program linking strategy.
    pub link_strategy: LinkStrategyPreference,
    /// Render-to-texture strategy.
    pub render_to_texture: RttPreference,
    /// Write freshly linked program binaries back to the microcode cache.
    pub save_microcode_to_cache: bool,
    /// Caps the sample count of multisampled render targets below the driver limit.
    pub max_fsaa_override: Option<u32>,
    /// Forces the "depth buffer may be larger than its target" rule on or off.
    pub relaxed_depth_size: Option<bool>,
    /// Probe the render-target format table at startup. When disabled only
    /// the default colour format is probed, lazily.
    pub probe_render_target_formats: bool,
}

impl Default for GlBackendSettings {
    fn default() -> Self {
        Self {
            link_strategy: LinkStrategyPreference::Auto,
            render_to_texture: RttPreference::Auto,
            save_microcode_to_cache: true,
            max_fsaa_override: None,
            relaxed_depth_size: None,
            probe_render_target_formats: true,
        }
    }
}

impl GlBackendSettings {
    /// Parses settings from RON text. Missing fields keep their defaults.
    pub fn from_ron_str(text: &str) -> Result<Self> {
        ron::from_str(text).context("Failed to parse GL backend settings")
    }

    /// Reads settings from a RON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read GL backend settings from {}", path.display()))?;
        let settings = Self::from_ron_str(&text)
            .with_context(|| format!("Invalid GL backend settings in {}", path.display()))?;
        log::info!("Loaded GL backend settings from {}", path.display());
        Ok(settings)
    }

    /// Serializes to pretty-printed RON.
    pub fn to_ron_string(&self) -> Result<String> {
        ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .context("Failed to serialize GL backend settings")
    }

    /// Writes the settings to a RON file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let text = self.to_ron_string()?;
        std::fs::write(path, text)
            .with_context(|| format!("Failed to write GL backend settings to {}", path.display()))
    }

    /// Clamps a requested sample count to the driver limit and the override.
    pub fn clamp_samples(&self, requested: u32, driver_max: u32) -> u32 {
        let limit = self
            .max_fsaa_override
            .map_or(driver_max, |cap| cap.min(driver_max));
        requested.min(limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_ron_keeps_defaults() {
        let settings = GlBackendSettings::from_ron_str(
            "(link_strategy: Monolithic, max_fsaa_override: Some(4))",
        )
        .unwrap();
        assert_eq!(settings.link_strategy, LinkStrategyPreference::Monolithic);
        assert_eq!(settings.max_fsaa_override, Some(4));
        assert!(settings.save_microcode_to_cache);
        assert!(settings.probe_render_target_formats);
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gl_backend.ron");
        let settings = GlBackendSettings {
            render_to_texture: RttPreference::Copy,
            relaxed_depth_size: Some(true),
            ..Default::default()
        };
        settings.save(&path).unwrap();
        assert_eq!(GlBackendSettings::load(&path).unwrap(), settings);
    }

    #[test]
    fn test_malformed_settings_report_context() {
        let err = GlBackendSettings::from_ron_str("(link_strategy: Sideways)").unwrap_err();
        assert!(err.to_string().contains("GL backend settings"));
    }

    #[test]
    fn test_sample_clamping() {
        let mut settings = GlBackendSettings::default();
        assert_eq!(settings.clamp_samples(16, 8), 8);
        settings.max_fsaa_override = Some(2);
        assert_eq!(settings.clamp_samples(4, 8), 2);
        assert_eq!(settings.clamp_samples(0, 8), 0);
    }
}
