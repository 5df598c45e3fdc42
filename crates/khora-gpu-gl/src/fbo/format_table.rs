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

use super::render_buffer::{create_renderbuffer, RenderBufferKey};
use crate::state_cache::StateCache;
use ahash::AHashMap;
use khora_gpu_core::renderer::api::{
    Attachment, BufferTarget, DepthFormat, DepthStencilMode, DriverFeatures, DriverObject,
    FramebufferHandle, PixelFormat, RenderbufferFormat, RenderbufferHandle, StencilFormat,
    TextureHandle, TextureParameter, TextureTarget,
};
use khora_gpu_core::renderer::{DriverError, GraphicsDriver};
use std::fmt::Write;

/// Edge length of the scratch attachments used while probing.
pub const PROBE_SIZE: u32 = 16;

const TARGET: BufferTarget = BufferTarget::DrawFramebuffer;

/// What the driver accepted for one colour format.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormatProperties {
    /// The format can be rendered to at all.
    pub valid: bool,
    /// Accepted depth/stencil pairings, in probe order.
    pub modes: Vec<DepthStencilMode>,
}

impl FormatProperties {
    /// The highest-scored mode; the first one wins ties. Returns
    /// [`DepthStencilMode::NONE`] when there are no modes.
    pub fn best_mode(&self) -> DepthStencilMode {
        self.modes
            .iter()
            .fold(None::<DepthStencilMode>, |best, mode| match best {
                Some(best) if best.score >= mode.score => Some(best),
                _ => Some(*mode),
            })
            .unwrap_or(DepthStencilMode::NONE)
    }
}

/// Desirability of a depth/stencil pairing. Any depth beats stencil only,
/// packed 24/8 beats everything, and the total bit count breaks ties.
pub fn score(depth: Option<DepthFormat>, stencil: Option<StencilFormat>) -> i32 {
    let mut score = 0;
    if stencil.is_some() {
        score += 1000;
    }
    if depth.is_some() {
        score += 2000;
    }
    if depth.map(DepthFormat::bits) == Some(24) {
        score += 500;
    }
    if depth == Some(DepthFormat::Depth24Stencil8) {
        score += 5000;
    }
    let bits = depth.map_or(0, DepthFormat::bits) + stencil.map_or(0, StencilFormat::bits);
    score + bits as i32
}

fn mode(depth: Option<DepthFormat>, stencil: Option<StencilFormat>) -> DepthStencilMode {
    DepthStencilMode {
        depth,
        stencil,
        score: score(depth, stencil),
    }
}

fn describe(modes: &[DepthStencilMode]) -> String {
    let mut text = String::new();
    for mode in modes {
        let prefix = if mode.is_packed() { "Packed-" } else { "" };
        let _ = write!(text, "{prefix}D{}S{} ", mode.depth_bits(), mode.stencil_bits());
    }
    text
}

/// Which depth/stencil pairings each colour format can be rendered with.
///
/// Built by probing the driver once per context and rebuilt after a context
/// reset. Formats never probed report no modes.
#[derive(Debug, Clone, Default)]
pub struct FormatCompatibilityTable {
    formats: AHashMap<PixelFormat, FormatProperties>,
    depth_only: FormatProperties,
}

impl FormatCompatibilityTable {
    /// An empty table. Formats are added with [`probe_format`](Self::probe_format).
    pub fn new() -> Self {
        Self::default()
    }

    /// Probes every colour format plus the colour-less case.
    ///
    /// Each attempt builds a [`PROBE_SIZE`] scratch framebuffer on the
    /// current context and deletes it afterwards. When the driver can answer
    /// renderability directly, no scratch objects are created. A failed
    /// attempt only marks that combination unsupported.
    pub fn probe(driver: &mut dyn GraphicsDriver, cache: &mut StateCache) -> Self {
        let mut table = Self::new();
        table.depth_only = probe_target(driver, cache, None);
        for format in PixelFormat::ALL {
            table.probe_format(driver, cache, format);
        }

        let valid: Vec<String> = PixelFormat::ALL
            .iter()
            .filter(|format| table.is_renderable(**format))
            .map(|format| format!("{format:?}"))
            .collect();
        log::info!("Valid render-target formats: {}", valid.join(" "));
        table
    }

    /// Probes one colour format, replacing any previous result.
    pub fn probe_format(
        &mut self,
        driver: &mut dyn GraphicsDriver,
        cache: &mut StateCache,
        format: PixelFormat,
    ) -> &FormatProperties {
        let properties = probe_target(driver, cache, Some(format));
        self.formats.insert(format, properties);
        &self.formats[&format]
    }

    /// Probes `format` unless it already has a result.
    pub fn ensure_probed(
        &mut self,
        driver: &mut dyn GraphicsDriver,
        cache: &mut StateCache,
        format: PixelFormat,
    ) -> &FormatProperties {
        if !self.formats.contains_key(&format) {
            self.probe_format(driver, cache, format);
        }
        &self.formats[&format]
    }

    /// Returns `true` if `format` has been probed.
    pub fn is_probed(&self, format: PixelFormat) -> bool {
        self.formats.contains_key(&format)
    }

    /// Every colour format probed so far.
    pub fn probed_formats(&self) -> impl Iterator<Item = PixelFormat> + '_ {
        self.formats.keys().copied()
    }

    /// Returns `true` if `format` was probed and can be rendered to.
    pub fn is_renderable(&self, format: PixelFormat) -> bool {
        self.formats.get(&format).is_some_and(|p| p.valid)
    }

    /// Probe results of one colour format.
    pub fn properties(&self, format: PixelFormat) -> Option<&FormatProperties> {
        self.formats.get(&format)
    }

    /// Pairings usable without any colour attachment.
    pub fn depth_only_modes(&self) -> &[DepthStencilMode] {
        &self.depth_only.modes
    }

    /// The best pairing for `format`, or [`DepthStencilMode::NONE`] if the
    /// format accepts no depth or stencil at all.
    pub fn best_depth_stencil(&self, format: PixelFormat) -> DepthStencilMode {
        self.formats
            .get(&format)
            .map_or(DepthStencilMode::NONE, FormatProperties::best_mode)
    }

    /// The pairing that realises `depth` for `format`: the exact format
    /// first, then its unpacked equivalent with an 8-bit stencil buffer.
    pub fn best_depth_stencil_for(&self, depth: DepthFormat, format: PixelFormat) -> Option<DepthStencilMode> {
        let modes = &self.formats.get(&format)?.modes;
        if let Some(exact) = modes.iter().find(|m| m.depth == Some(depth)) {
            return Some(*exact);
        }
        if !depth.is_packed() {
            return None;
        }
        modes
            .iter()
            .find(|m| m.depth == Some(depth.unpacked()) && m.stencil == Some(StencilFormat::Stencil8))
            .copied()
    }
}

struct Scratch {
    framebuffer: FramebufferHandle,
    texture: Option<TextureHandle>,
}

impl Scratch {
    fn create(
        driver: &mut dyn GraphicsDriver,
        cache: &mut StateCache,
        colour: Option<PixelFormat>,
    ) -> Result<Self, DriverError> {
        let framebuffer = driver.create_framebuffer()?;
        cache.bind_framebuffer(driver, TARGET, framebuffer, false);
        let Some(format) = colour else {
            driver.draw_buffers(&[Attachment::None]);
            driver.read_buffer(Attachment::None);
            return Ok(Self {
                framebuffer,
                texture: None,
            });
        };

        let texture = match driver.create_texture() {
            Ok(texture) => texture,
            Err(err) => {
                cache.delete_object(driver, DriverObject::Framebuffer(framebuffer));
                return Err(err);
            }
        };
        cache.bind_texture(driver, TextureTarget::D2, texture);
        cache.set_tex_parameter_i(driver, TextureTarget::D2, TextureParameter::BaseLevel, 0);
        cache.set_tex_parameter_i(driver, TextureTarget::D2, TextureParameter::MaxLevel, 0);
        driver.tex_storage_2d(TextureTarget::D2, format, PROBE_SIZE, PROBE_SIZE);
        driver.framebuffer_texture(TARGET, Attachment::Colour(0), TextureTarget::D2, texture, 0);
        Ok(Self {
            framebuffer,
            texture: Some(texture),
        })
    }

    fn destroy(self, driver: &mut dyn GraphicsDriver, cache: &mut StateCache) {
        cache.bind_framebuffer(driver, TARGET, FramebufferHandle::NONE, false);
        cache.delete_object(driver, DriverObject::Framebuffer(self.framebuffer));
        if let Some(texture) = self.texture {
            cache.delete_object(driver, DriverObject::Texture(texture));
        }
    }
}

fn probe_target(
    driver: &mut dyn GraphicsDriver,
    cache: &mut StateCache,
    colour: Option<PixelFormat>,
) -> FormatProperties {
    let query = driver.capabilities().has(DriverFeatures::INTERNAL_FORMAT_QUERY);
    let packed = driver.capabilities().has(DriverFeatures::PACKED_DEPTH_STENCIL);
    let mut properties = FormatProperties::default();

    let scratch = if query {
        None
    } else {
        match Scratch::create(driver, cache, colour) {
            Ok(scratch) => Some(scratch),
            Err(err) => {
                log::warn!("Could not probe render target {:?}: {}", colour, err);
                return properties;
            }
        }
    };

    properties.valid = match colour {
        None => true,
        Some(format) if query => driver.is_format_renderable(RenderbufferFormat::Colour(format)),
        Some(_) => driver.check_framebuffer_status(TARGET).is_complete(),
    };

    if properties.valid {
        let depths = std::iter::once(None).chain(DepthFormat::ALL.into_iter().map(Some));
        for depth in depths {
            match depth {
                Some(depth) if depth.is_packed() => {
                    if !packed {
                        continue;
                    }
                    let supported = if query {
                        driver.is_format_renderable(RenderbufferFormat::Depth(depth))
                    } else {
                        try_packed(driver, cache, depth)
                    };
                    if supported {
                        properties.modes.push(mode(Some(depth), None));
                    }
                }
                _ => {
                    if query {
                        if let Some(depth) = depth {
                            if !driver.is_format_renderable(RenderbufferFormat::Depth(depth)) {
                                continue;
                            }
                        }
                    }
                    let stencils = std::iter::once(None).chain(StencilFormat::ALL.into_iter().map(Some));
                    for stencil in stencils {
                        if colour.is_none() && depth.is_none() && stencil.is_none() {
                            continue;
                        }
                        let supported = if query {
                            stencil.map_or(true, |s| {
                                driver.is_format_renderable(RenderbufferFormat::Stencil(s))
                            })
                        } else {
                            try_format(driver, cache, depth, stencil)
                        };
                        if supported {
                            properties.modes.push(mode(depth, stencil));
                        }
                    }
                }
            }
        }
        let name = colour.map_or_else(|| "depth-only".to_string(), |f| format!("{f:?}"));
        log::info!(
            "Render target {} depth/stencil support: {}",
            name,
            describe(&properties.modes)
        );
    }

    if let Some(scratch) = scratch {
        scratch.destroy(driver, cache);
    }
    properties
}

fn scratch_renderbuffer(
    driver: &mut dyn GraphicsDriver,
    cache: &mut StateCache,
    format: RenderbufferFormat,
) -> Option<RenderbufferHandle> {
    let key = RenderBufferKey::new(format, PROBE_SIZE, PROBE_SIZE, 0);
    match create_renderbuffer(driver, cache, key) {
        Ok(handle) => Some(handle),
        Err(err) => {
            log::debug!("Probe renderbuffer {:?} failed: {}", format, err);
            None
        }
    }
}

fn try_format(
    driver: &mut dyn GraphicsDriver,
    cache: &mut StateCache,
    depth: Option<DepthFormat>,
    stencil: Option<StencilFormat>,
) -> bool {
    let mut created = Vec::with_capacity(2);
    let mut complete = true;
    if let Some(depth) = depth {
        match scratch_renderbuffer(driver, cache, RenderbufferFormat::Depth(depth)) {
            Some(rb) => {
                driver.framebuffer_renderbuffer(TARGET, Attachment::Depth, rb);
                created.push(rb);
            }
            None => complete = false,
        }
    }
    if let (true, Some(stencil)) = (complete, stencil) {
        match scratch_renderbuffer(driver, cache, RenderbufferFormat::Stencil(stencil)) {
            Some(rb) => {
                driver.framebuffer_renderbuffer(TARGET, Attachment::Stencil, rb);
                created.push(rb);
            }
            None => complete = false,
        }
    }

    if complete {
        complete = driver.check_framebuffer_status(TARGET).is_complete();
    }
    release_probe(driver, cache, &created);
    complete
}

fn try_packed(driver: &mut dyn GraphicsDriver, cache: &mut StateCache, depth: DepthFormat) -> bool {
    let Some(rb) = scratch_renderbuffer(driver, cache, RenderbufferFormat::Depth(depth)) else {
        return false;
    };
    driver.framebuffer_renderbuffer(TARGET, Attachment::Depth, rb);
    driver.framebuffer_renderbuffer(TARGET, Attachment::Stencil, rb);
    let complete = driver.check_framebuffer_status(TARGET).is_complete();
    release_probe(driver, cache, &[rb]);
    complete
}

fn release_probe(driver: &mut dyn GraphicsDriver, cache: &mut StateCache, renderbuffers: &[RenderbufferHandle]) {
    driver.framebuffer_renderbuffer(TARGET, Attachment::Depth, RenderbufferHandle::NONE);
    driver.framebuffer_renderbuffer(TARGET, Attachment::Stencil, RenderbufferHandle::NONE);
    for rb in renderbuffers {
        cache.delete_object(driver, DriverObject::Renderbuffer(*rb));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use khora_gpu_core::renderer::api::{DriverCapabilities, FramebufferHandle};
    use khora_gpu_core::renderer::testing::{DriverCall, RecordingDriver};

    fn probe(driver: &mut RecordingDriver) -> FormatCompatibilityTable {
        let mut cache = StateCache::new(16);
        FormatCompatibilityTable::probe(driver, &mut cache)
    }

    #[test]
    fn test_packed_24_8_wins_when_supported() {
        let mut driver = RecordingDriver::default();
        let table = probe(&mut driver);

        let best = table.best_depth_stencil(PixelFormat::Rgba8Unorm);
        assert_eq!(best.depth, Some(DepthFormat::Depth24Stencil8));
        assert_eq!(best.stencil, None);
        assert_eq!(best.score, 2000 + 500 + 5000 + 24);
    }

    #[test]
    fn test_unpacked_fallback_prefers_24_bit_depth_with_stencil() {
        let mut driver = RecordingDriver::default();
        driver.reject_depth_format(DepthFormat::Depth24Stencil8);
        let table = probe(&mut driver);

        let best = table.best_depth_stencil(PixelFormat::Rgba8Unorm);
        assert_eq!(best.depth, Some(DepthFormat::Depth24));
        assert_eq!(best.stencil, Some(StencilFormat::Stencil16));
    }

    #[test]
    fn test_depthless_format_reports_sentinel() {
        let mut driver = RecordingDriver::default();
        driver.reject_depth_with(PixelFormat::Rgba32Float);
        let table = probe(&mut driver);

        assert!(table.is_renderable(PixelFormat::Rgba32Float));
        assert!(table.best_depth_stencil(PixelFormat::Rgba32Float).is_none());
        assert!(!table.best_depth_stencil(PixelFormat::Rgba8Unorm).is_none());
    }

    #[test]
    fn test_unrenderable_format_is_invalid() {
        let mut driver = RecordingDriver::default();
        driver.reject_colour_format(PixelFormat::Rgb565Unorm);
        let table = probe(&mut driver);

        assert!(table.is_probed(PixelFormat::Rgb565Unorm));
        assert!(!table.is_renderable(PixelFormat::Rgb565Unorm));
        assert!(table.properties(PixelFormat::Rgb565Unorm).unwrap().modes.is_empty());
    }

    #[test]
    fn test_probe_leaves_no_objects_behind() {
        let mut driver = RecordingDriver::default();
        let mut cache = StateCache::new(16);
        FormatCompatibilityTable::probe(&mut driver, &mut cache);

        assert_eq!(driver.live_renderbuffers(), 0);
        assert_eq!(driver.live_framebuffers(), 0);
        assert_eq!(driver.bound_draw_framebuffer(), FramebufferHandle::NONE);
        assert!(driver.count_calls(|c| matches!(c, DriverCall::CheckFramebufferStatus(_))) > 0);
    }

    #[test]
    fn test_format_query_skips_scratch_objects() {
        let mut caps = DriverCapabilities::default();
        caps.features |= DriverFeatures::INTERNAL_FORMAT_QUERY;
        let mut driver = RecordingDriver::new(caps);
        driver.reject_stencil_format(StencilFormat::Stencil1);
        let table = probe(&mut driver);

        assert_eq!(driver.count_calls(|c| matches!(c, DriverCall::CreateFramebuffer(_))), 0);
        let modes = &table.properties(PixelFormat::Rgba8Unorm).unwrap().modes;
        assert!(!modes.iter().any(|m| m.stencil == Some(StencilFormat::Stencil1)));
        assert!(modes.iter().any(|m| m.stencil == Some(StencilFormat::Stencil4)));
    }

    #[test]
    fn test_explicit_depth_request_falls_back_to_unpacked() {
        let mut driver = RecordingDriver::default();
        driver.reject_depth_format(DepthFormat::Depth24Stencil8);
        let table = probe(&mut driver);

        let mode = table
            .best_depth_stencil_for(DepthFormat::Depth24Stencil8, PixelFormat::Rgba8Unorm)
            .unwrap();
        assert_eq!(mode.depth, Some(DepthFormat::Depth24));
        assert_eq!(mode.stencil, Some(StencilFormat::Stencil8));
        assert_eq!(
            table
                .best_depth_stencil_for(DepthFormat::Depth16, PixelFormat::Rgba8Unorm)
                .and_then(|m| m.depth),
            Some(DepthFormat::Depth16)
        );
    }

    #[test]
    fn test_lazy_probe_only_touches_requested_format() {
        let mut driver = RecordingDriver::default();
        let mut cache = StateCache::new(16);
        let mut table = FormatCompatibilityTable::new();
        assert!(table.best_depth_stencil(PixelFormat::Rgba8Unorm).is_none());

        assert!(table.ensure_probed(&mut driver, &mut cache, PixelFormat::Rgba8Unorm).valid);
        driver.clear_calls();
        table.ensure_probed(&mut driver, &mut cache, PixelFormat::Rgba8Unorm);
        assert!(driver.calls().is_empty());
        assert!(!table.is_probed(PixelFormat::R8Unorm));
    }
}
