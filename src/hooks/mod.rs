//! Hook generation: reads hook descriptors and emits, per hooked member, the
//! delegate, event and dispatch method that let handlers intercept it.

pub mod manifest;
pub mod templates;

use thiserror::Error;

use crate::error::AssemblerError;

pub use manifest::{HookDescriptor, HookKind, HookManifest, ManifestError};
pub use templates::{GeneratedHook, HookGenerator, generate};

#[derive(Debug, Error)]
pub enum HookError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Assembler(#[from] AssemblerError),
}
