//! # Metadata model
//!
//! Types, members and signatures that instruction operands point at.
//!
//! - [`signature`]: structural type and method signatures.
//! - [`generics`]: generic parameters, constraints and instantiation.
//! - [`reference`]: immutable handles usable as operands.
//! - [`registry`]: the definition arena with owner/member bookkeeping.
//! - [`import`]: the per-run cache of handles imported from the extended program.

pub mod generics;
pub mod import;
pub mod reference;
pub mod registry;
pub mod signature;

pub use generics::{GenericConstraints, GenericInstance, GenericOwner, GenericParam, TypeResolver};
pub use import::{Importer, RuntimeFlavor};
pub use reference::{FieldRef, MethodRef, TypeKind, TypeRef, TypeRefData};
pub use registry::{FieldId, MemberId, MethodId, Registry, TypeId};
pub use signature::{MethodSig, PrimitiveType, TypeSig};
