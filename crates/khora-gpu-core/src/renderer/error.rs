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

//! Defines the hierarchy of error types for the GPU backend.
//!
//! Configuration and link errors are fatal to the caller. Context loss is a
//! lifecycle event and deliberately has no variant here.

use crate::renderer::api::{ContextId, DepthFormat, PixelFormat};
use std::fmt;

/// A render target, buffer or format request the driver cannot satisfy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// A colour attachment does not share the size of colour slot 0.
    AttachmentSizeMismatch {
        /// The offending colour slot.
        slot: usize,
        /// Size of slot 0.
        expected: (u32, u32),
        /// Size of the offending slot.
        found: (u32, u32),
    },
    /// A 32-bit index buffer was requested but the driver only supports 16-bit indices.
    Index32Unsupported,
    /// The colour format has no valid depth/stencil combination.
    NoDepthStencilFormat {
        /// The colour format of the render target.
        format: PixelFormat,
    },
    /// The requested depth format cannot be paired with the colour format.
    UnsupportedDepthFormat {
        /// The colour format of the render target.
        format: PixelFormat,
        /// The depth format that was asked for.
        depth: DepthFormat,
    },
    /// The colour format cannot be rendered to at all.
    UnsupportedRenderTargetFormat {
        /// The colour format that failed the probe.
        format: PixelFormat,
    },
    /// The driver reported an incomplete framebuffer after attachment.
    IncompleteFramebuffer {
        /// Name of the render target being initialised.
        name: String,
        /// The raw status reported by the driver.
        status: String,
    },
    /// A colour slot index outside `0..MAX_COLOUR_ATTACHMENTS`.
    InvalidColourSlot {
        /// The slot that was requested.
        slot: usize,
    },
    /// Slot 0 of a render target must always hold a surface.
    MissingColourSurface,
    /// The context is not registered with the backend.
    UnknownContext(ContextId),
    /// An operation that needs a current context ran without one.
    NoCurrentContext,
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigurationError::AttachmentSizeMismatch {
                slot,
                expected,
                found,
            } => write!(
                f,
                "Colour attachment {slot} is {}x{}, expected {}x{} to match slot 0",
                found.0, found.1, expected.0, expected.1
            ),
            ConfigurationError::Index32Unsupported => {
                write!(f, "32-bit index buffers are not supported by this driver")
            }
            ConfigurationError::NoDepthStencilFormat { format } => {
                write!(f, "No depth/stencil format is renderable with {format:?}")
            }
            ConfigurationError::UnsupportedDepthFormat { format, depth } => {
                write!(f, "Depth format {depth:?} cannot be paired with {format:?}")
            }
            ConfigurationError::UnsupportedRenderTargetFormat { format } => {
                write!(f, "Pixel format {format:?} is not renderable")
            }
            ConfigurationError::IncompleteFramebuffer { name, status } => {
                write!(f, "Framebuffer '{name}' is incomplete: {status}")
            }
            ConfigurationError::InvalidColourSlot { slot } => {
                write!(f, "Invalid colour attachment slot {slot}")
            }
            ConfigurationError::MissingColourSurface => {
                write!(f, "Colour slot 0 must be bound before initialisation")
            }
            ConfigurationError::UnknownContext(id) => {
                write!(f, "Unknown graphics context {id:?}")
            }
            ConfigurationError::NoCurrentContext => {
                write!(f, "No graphics context is current")
            }
        }
    }
}

impl std::error::Error for ConfigurationError {}

/// A failure while creating a driver object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// The driver returned the reserved name 0 for a new object.
    ObjectCreationFailed {
        /// Kind of object that was requested (e.g. `"framebuffer"`).
        kind: &'static str,
    },
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverError::ObjectCreationFailed { kind } => {
                write!(f, "The driver failed to create a {kind} object")
            }
        }
    }
}

impl std::error::Error for DriverError {}

/// An error raised while linking or activating a shader program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgramError {
    /// The driver rejected the link of the combined stages.
    LinkFailed {
        /// Descriptive name of the program (its stage names).
        name: String,
        /// The driver's program info log.
        log: String,
    },
    /// The program failed to link earlier and has not been retried.
    PreviouslyFailed {
        /// Descriptive name of the program.
        name: String,
    },
    /// A program or pipeline object could not be created.
    DriverObjectCreation(DriverError),
}

impl fmt::Display for ProgramError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgramError::LinkFailed { name, log } => {
                write!(f, "Program link failed for '{name}': {log}")
            }
            ProgramError::PreviouslyFailed { name } => {
                write!(
                    f,
                    "Program '{name}' failed to link earlier and must be retried explicitly"
                )
            }
            ProgramError::DriverObjectCreation(err) => {
                write!(f, "Program object creation failed: {err}")
            }
        }
    }
}

impl std::error::Error for ProgramError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProgramError::DriverObjectCreation(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DriverError> for ProgramError {
    fn from(err: DriverError) -> Self {
        ProgramError::DriverObjectCreation(err)
    }
}

/// An error while persisting or restoring the microcode cache.
#[derive(Debug)]
pub enum MicrocodeError {
    /// Reading or writing the backing stream failed.
    Io(std::io::Error),
    /// The cache could not be encoded.
    Encode(String),
    /// The stream held data that is not a microcode cache.
    Corrupt(String),
    /// The stream was written by an incompatible cache version.
    VersionMismatch {
        /// Version this build reads.
        expected: u32,
        /// Version found in the stream.
        found: u32,
    },
}

impl fmt::Display for MicrocodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MicrocodeError::Io(err) => write!(f, "Microcode cache I/O failed: {err}"),
            MicrocodeError::Encode(msg) => write!(f, "Failed to encode microcode cache: {msg}"),
            MicrocodeError::Corrupt(msg) => write!(f, "Microcode cache is corrupt: {msg}"),
            MicrocodeError::VersionMismatch { expected, found } => write!(
                f,
                "Microcode cache version {found} does not match expected version {expected}"
            ),
        }
    }
}

impl std::error::Error for MicrocodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MicrocodeError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for MicrocodeError {
    fn from(err: std::io::Error) -> Self {
        MicrocodeError::Io(err)
    }
}

/// A high-level error surfaced by the backend to the engine.
#[derive(Debug)]
pub enum RenderError {
    /// A configuration error (formats, sizes, capabilities).
    Configuration(ConfigurationError),
    /// A shader program failed to link or activate.
    Program(ProgramError),
    /// A driver object could not be created.
    Driver(DriverError),
    /// The logical handle does not name a live resource.
    InvalidHandle(String),
    /// A write past the end of a buffer.
    OutOfBounds {
        /// End of the attempted write in bytes.
        end: usize,
        /// Size of the buffer in bytes.
        size: usize,
    },
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderError::Configuration(err) => write!(f, "Invalid render configuration: {err}"),
            RenderError::Program(err) => write!(f, "Shader program error: {err}"),
            RenderError::Driver(err) => write!(f, "Driver error: {err}"),
            RenderError::InvalidHandle(msg) => write!(f, "Invalid handle: {msg}"),
            RenderError::OutOfBounds { end, size } => {
                write!(f, "Write ending at byte {end} overflows a {size}-byte buffer")
            }
        }
    }
}

impl std::error::Error for RenderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RenderError::Configuration(err) => Some(err),
            RenderError::Program(err) => Some(err),
            RenderError::Driver(err) => Some(err),
            RenderError::InvalidHandle(_) | RenderError::OutOfBounds { .. } => None,
        }
    }
}

impl From<ConfigurationError> for RenderError {
    fn from(err: ConfigurationError) -> Self {
        RenderError::Configuration(err)
    }
}

impl From<ProgramError> for RenderError {
    fn from(err: ProgramError) -> Self {
        RenderError::Program(err)
    }
}

impl From<DriverError> for RenderError {
    fn from(err: DriverError) -> Self {
        RenderError::Driver(err)
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use super::*;

    #[test]
    fn configuration_error_display() {
        let err = ConfigurationError::AttachmentSizeMismatch {
            slot: 2,
            expected: (256, 256),
            found: (128, 256),
        };
        assert_eq!(
            format!("{err}"),
            "Colour attachment 2 is 128x256, expected 256x256 to match slot 0"
        );
        assert_eq!(
            format!("{}", ConfigurationError::Index32Unsupported),
            "32-bit index buffers are not supported by this driver"
        );
    }

    #[test]
    fn program_error_names_the_program() {
        let err = ProgramError::LinkFailed {
            name: "Shadow_VS+Shadow_FS".to_string(),
            log: "varying mismatch".to_string(),
        };
        assert_eq!(
            format!("{err}"),
            "Program link failed for 'Shadow_VS+Shadow_FS': varying mismatch"
        );
    }

    #[test]
    fn render_error_wraps_program_error() {
        let program_err: ProgramError = DriverError::ObjectCreationFailed { kind: "program" }.into();
        let render_err: RenderError = program_err.into();
        assert_eq!(
            format!("{render_err}"),
            "Shader program error: Program object creation failed: The driver failed to create a program object"
        );
        assert!(render_err.source().is_some());
        assert!(render_err.source().unwrap().source().is_some());
    }

    #[test]
    fn render_error_from_configuration() {
        let err: RenderError = ConfigurationError::NoDepthStencilFormat {
            format: PixelFormat::Rgba16Float,
        }
        .into();
        assert!(matches!(
            err,
            RenderError::Configuration(ConfigurationError::NoDepthStencilFormat { .. })
        ));
    }
}
