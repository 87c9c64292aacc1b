//! # hookgen
//!
//! Generates hook shims for a managed program: for every hooked member, a
//! delegate type, an event to subscribe to, and a dispatch method that routes
//! calls through the subscribers.
//!
//! - [`metadata`]: signatures, generics, member definitions and references.
//! - [`bytecode`]: instruction streams, branch resolution, stack checking.
//! - [`hooks`]: the hook manifest and the code templates built on the above.
//! - [`image`]: the serialized module handed to downstream tooling.

pub mod bytecode;
pub mod config;
pub mod error;
pub mod hooks;
pub mod image;
pub mod metadata;

pub use config::GeneratorConfig;
pub use error::{AssemblerError, Result};
pub use hooks::{HookError, HookManifest, generate};
pub use image::{ImageError, ModuleImage};
