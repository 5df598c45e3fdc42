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

//! Provides the public, backend-agnostic contracts of the GPU backend.
//!
//! This module defines the vocabulary shared by every caching layer: the
//! abstract [`GraphicsDriver`] trait, the handle and state types it speaks in,
//! and the error types surfaced to the engine. A concrete driver binding
//! implements the trait; the caches in `khora-gpu-gl` consume it without
//! knowing which API sits underneath.

pub mod api;
pub mod error;
pub mod microcode;
pub mod traits;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export the most important traits and types for easier use.
pub use self::api::*;
pub use self::error::{ConfigurationError, DriverError, MicrocodeError, ProgramError, RenderError};
pub use self::microcode::{Microcode, MicrocodeCache};
pub use self::traits::{ActiveUniform, GraphicsDriver};
