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

//! Data types spoken by the [`GraphicsDriver`](crate::renderer::GraphicsDriver) contract.

pub mod capabilities;
pub mod draw;
pub mod format;
pub mod handles;
pub mod parameters;
pub mod shader;
pub mod state;

pub use self::capabilities::*;
pub use self::draw::*;
pub use self::format::*;
pub use self::handles::*;
pub use self::parameters::*;
pub use self::shader::*;
pub use self::state::*;
