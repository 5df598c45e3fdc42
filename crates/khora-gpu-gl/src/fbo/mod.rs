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

//! Render-Target Manager and its pools.
//!
//! Off-screen targets are framebuffer objects whose colour slots hold
//! [`SurfaceDesc`]s. The [`FormatCompatibilityTable`] records which depth and
//! stencil pairings each colour format accepts, the [`DepthBufferPool`]
//! shares depth attachments between compatible targets, and the
//! [`RenderBufferPool`] shares multisample storage between targets of the
//! same format, size and sample count.

mod depth_buffer;
mod format_table;
mod frame_buffer;
mod manager;
mod render_buffer;
mod surface;

pub use self::depth_buffer::{
    DepthBufferId, DepthBufferPool, DepthBufferRecord, DepthTarget, POOL_DEFAULT, POOL_NO_DEPTH,
};
pub use self::format_table::{FormatCompatibilityTable, FormatProperties, PROBE_SIZE};
pub use self::frame_buffer::{FrameBufferObject, MAX_COLOUR_ATTACHMENTS};
pub use self::manager::{RenderTargetManager, RttMode, TEMPORARY_FBOS};
pub use self::render_buffer::{RenderBufferKey, RenderBufferPool};
pub use self::surface::{SurfaceDesc, SurfaceSource};
