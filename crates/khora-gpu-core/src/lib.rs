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

//! # Khora GPU Core
//!
//! Backend-agnostic contracts for the stateful GPU backend: the
//! [`GraphicsDriver`] trait, driver object handles, formats, driver state
//! enums, shader reflection types and the error hierarchy.
//!
//! The caching layers built on top of these contracts live in `khora-gpu-gl`.

#![warn(missing_docs)]

pub mod renderer;

pub use renderer::{GraphicsDriver, RenderError};
