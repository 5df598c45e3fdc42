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

//! # Khora GPU GL
//!
//! The caching core of the stateful GPU backend:
//!
//! - [`StateCache`]: a per-context mirror of driver state that elides redundant calls.
//! - [`ProgramCache`]: links vertex/fragment stage pairs into cached programs.
//! - [`RenderTargetManager`]: probes render-target formats and pools
//!   renderbuffers and depth buffers for off-screen targets.
//! - [`ContextRegistry`]: per-context deferred destruction.
//! - [`ShadowedBufferManager`]: buffers that survive context loss.
//! - [`GlRenderSystem`]: the facade wiring them together for the engine.

pub mod context;
pub mod fbo;
pub mod hardware_buffer;
pub mod program;
pub mod render_system;
pub mod settings;
pub mod state_cache;

pub use context::{ContextRegistry, RenderContext};
pub use fbo::{RenderTargetManager, RttMode};
pub use hardware_buffer::ShadowedBufferManager;
pub use program::{LinkStrategy, LinkedProgram, ProgramCache, ProgramKey};
pub use render_system::GlRenderSystem;
pub use settings::GlBackendSettings;
pub use state_cache::{StateCache, StateCacheStats};
