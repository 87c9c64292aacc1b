//! Serialized form of a finished registry.
//!
//! The image is what downstream tooling loads: every generated type with its
//! members, and every body flattened to byte offsets. Layout is a 4-byte
//! magic, a format version byte, then the postcard-encoded [`ModuleImage`].

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::bytecode::body::{HandlerKind, MethodBody};
use crate::bytecode::ir::{InstrId, Label, Operand, Token};
use crate::bytecode::op::OpCode;
use crate::error::AssemblerError;
use crate::metadata::import::RuntimeFlavor;
use crate::metadata::reference::{FieldRef, MethodRef, TypeKind};
use crate::metadata::registry::{MemberId, MethodAttributes, MethodId, Registry};
use crate::metadata::signature::{MethodSig, TypeSig};

pub const MAGIC: [u8; 4] = *b"HKIM";
pub const FORMAT_VERSION: u8 = 1;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("method '{method}' has a body that was never finalized")]
    NotFinalized { method: String },

    #[error("not a hook image")]
    BadMagic,

    #[error("unsupported image format version {0}")]
    UnsupportedVersion(u8),

    #[error("image encoding failed: {0}")]
    Encode(#[from] postcard::Error),

    #[error("image i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Assembler(#[from] AssemblerError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleImage {
    pub name: String,
    pub flavor: RuntimeFlavor,
    pub core_library: String,
    /// Types in definition order. Nested types point at their enclosing
    /// type by index into this list.
    pub types: Vec<TypeImage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeImage {
    pub namespace: String,
    pub name: String,
    pub kind: TypeKind,
    pub is_public: bool,
    pub is_abstract: bool,
    pub is_sealed: bool,
    pub base: Option<TypeSig>,
    pub nested_in: Option<u32>,
    pub fields: Vec<FieldImage>,
    pub methods: Vec<MethodImage>,
    pub properties: Vec<PropertyImage>,
    pub events: Vec<EventImage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldImage {
    pub name: String,
    pub field_type: TypeSig,
    pub is_static: bool,
    pub is_public: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodImage {
    pub name: String,
    pub sig: MethodSig,
    pub param_names: Vec<String>,
    pub attributes: MethodAttributes,
    pub body: Option<EncodedBody>,
}

/// Accessors are named; they appear among the owning type's methods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyImage {
    pub name: String,
    pub property_type: TypeSig,
    pub getter: Option<String>,
    pub setter: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventImage {
    pub name: String,
    pub handler_type: TypeSig,
    pub adder: Option<String>,
    pub remover: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodedBody {
    pub max_stack: u16,
    pub init_locals: bool,
    pub locals: Vec<TypeSig>,
    pub code_size: u32,
    pub instructions: Vec<EncodedInstr>,
    pub regions: Vec<EncodedRegion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodedInstr {
    pub offset: u32,
    pub opcode: OpCode,
    pub operand: EncodedOperand,
}

/// Operand with every handle flattened: branch targets become byte offsets
/// from the start of the body, locals become their positional index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EncodedOperand {
    None,
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    String(String),
    Local(u16),
    Param(u16),
    Branch(u32),
    Switch(Vec<u32>),
    Method(MethodRef),
    Field(FieldRef),
    Type(TypeSig),
    Token(Token),
    Signature(MethodSig),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodedRegion {
    pub try_offset: u32,
    pub try_length: u32,
    pub handlers: Vec<EncodedHandler>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EncodedHandlerKind {
    Catch(TypeSig),
    Filter { filter_offset: u32 },
    Finally,
    Fault,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodedHandler {
    pub kind: EncodedHandlerKind,
    pub offset: u32,
    pub length: u32,
}

impl ModuleImage {
    pub fn build(registry: &Registry, flavor: RuntimeFlavor) -> Result<Self, ImageError> {
        let mut types = Vec::new();

        for (_, def) in registry.types() {
            let mut image = TypeImage {
                namespace: def.namespace.clone(),
                name: def.name.clone(),
                kind: def.kind,
                is_public: def.is_public,
                is_abstract: def.is_abstract,
                is_sealed: def.is_sealed,
                base: def.base.clone(),
                nested_in: def.owner().map(|o| o.0),
                fields: Vec::new(),
                methods: Vec::new(),
                properties: Vec::new(),
                events: Vec::new(),
            };

            let accessor_name = |id: MethodId| registry.method(id).map(|m| m.name.clone());

            for member in def.members() {
                match *member {
                    MemberId::Field(id) => {
                        let field = registry.field(id)?;
                        image.fields.push(FieldImage {
                            name: field.name.clone(),
                            field_type: field.field_type.clone(),
                            is_static: field.is_static,
                            is_public: field.is_public,
                        });
                    }
                    MemberId::Method(id) => {
                        let method = registry.method(id)?;
                        let body = match &method.body {
                            Some(body) => Some(encode_body(body).map_err(|e| match e {
                                ImageError::NotFinalized { .. } => ImageError::NotFinalized {
                                    method: format!("{}::{}", def.full_name(), method.name),
                                },
                                other => other,
                            })?),
                            None => None,
                        };
                        image.methods.push(MethodImage {
                            name: method.name.clone(),
                            sig: method.sig.clone(),
                            param_names: method.param_names.clone(),
                            attributes: method.attributes,
                            body,
                        });
                    }
                    MemberId::Property(id) => {
                        let property = registry.property(id)?;
                        image.properties.push(PropertyImage {
                            name: property.name.clone(),
                            property_type: property.property_type.clone(),
                            getter: property.getter.map(accessor_name).transpose()?,
                            setter: property.setter.map(accessor_name).transpose()?,
                        });
                    }
                    MemberId::Event(id) => {
                        let event = registry.event(id)?;
                        image.events.push(EventImage {
                            name: event.name.clone(),
                            handler_type: event.handler_type.clone(),
                            adder: event.adder.map(accessor_name).transpose()?,
                            remover: event.remover.map(accessor_name).transpose()?,
                        });
                    }
                    MemberId::NestedType(_) => {}
                }
            }
            types.push(image);
        }

        debug!(module = %registry.module_name, types = types.len(), "built module image");
        Ok(ModuleImage {
            name: registry.module_name.clone(),
            flavor,
            core_library: flavor.core_library().to_string(),
            types,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ImageError> {
        let mut bytes = Vec::with_capacity(64);
        bytes.extend_from_slice(&MAGIC);
        bytes.push(FORMAT_VERSION);
        bytes.extend(postcard::to_allocvec(self)?);
        Ok(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ImageError> {
        let Some(rest) = bytes.strip_prefix(&MAGIC[..]) else {
            return Err(ImageError::BadMagic);
        };
        match rest.split_first() {
            Some((&FORMAT_VERSION, payload)) => Ok(postcard::from_bytes(payload)?),
            Some((&version, _)) => Err(ImageError::UnsupportedVersion(version)),
            None => Err(ImageError::BadMagic),
        }
    }

    pub fn write(&self, path: &Path) -> Result<(), ImageError> {
        fs::write(path, self.to_bytes()?)?;
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self, ImageError> {
        Self::from_bytes(&fs::read(path)?)
    }

    pub fn find_type(&self, namespace: &str, name: &str) -> Option<&TypeImage> {
        self.types
            .iter()
            .find(|t| t.namespace == namespace && t.name == name)
    }
}

impl TypeImage {
    pub fn method(&self, name: &str) -> Option<&MethodImage> {
        self.methods.iter().find(|m| m.name == name)
    }
}

fn encode_body(body: &MethodBody) -> Result<EncodedBody, ImageError> {
    let max_stack = body.max_stack().ok_or_else(|| ImageError::NotFinalized {
        method: String::new(),
    })?;
    let offsets = body.offsets();
    let positions = body.positions();
    let code_size = body.code_size();

    let offset_of = |index: usize, id: InstrId| {
        positions
            .get(id.index())
            .copied()
            .flatten()
            .map(|pos| offsets[pos])
            .ok_or_else(|| AssemblerError::dangling(index, "branch target is not in the stream"))
    };
    // End boundaries are exclusive; a missing end means the end of the body.
    let end_of = |label: Option<Label>| match label {
        Some(l) => offset_of(0, l.id()),
        None => Ok(code_size),
    };

    let mut instructions = Vec::with_capacity(body.len());
    for (index, instr) in body.instructions().enumerate() {
        let operand = match &instr.operand {
            Operand::None => EncodedOperand::None,
            Operand::Int32(v) => EncodedOperand::Int32(*v),
            Operand::Int64(v) => EncodedOperand::Int64(*v),
            Operand::Float32(v) => EncodedOperand::Float32(*v),
            Operand::Float64(v) => EncodedOperand::Float64(*v),
            Operand::String(s) => EncodedOperand::String(s.clone()),
            Operand::Local(l) => EncodedOperand::Local(
                body.locals()
                    .index_of(*l)
                    .ok_or_else(|| AssemblerError::UnregisteredLocal {
                        index,
                        local: format!("V_{}", l.0),
                    })?,
            ),
            Operand::Param(p) => EncodedOperand::Param(*p),
            Operand::Branch(t) => EncodedOperand::Branch(offset_of(index, *t)?),
            Operand::Switch(ts) => EncodedOperand::Switch(
                ts.iter()
                    .map(|t| offset_of(index, *t))
                    .collect::<Result<_, _>>()?,
            ),
            Operand::Method(m) => EncodedOperand::Method(m.clone()),
            Operand::Field(f) => EncodedOperand::Field(f.clone()),
            Operand::Type(t) => EncodedOperand::Type(t.clone()),
            Operand::Token(t) => EncodedOperand::Token(t.clone()),
            Operand::Signature(s) => EncodedOperand::Signature(s.clone()),
        };
        instructions.push(EncodedInstr {
            offset: offsets[index],
            opcode: instr.opcode,
            operand,
        });
    }

    let mut regions = Vec::with_capacity(body.regions().len());
    for region in body.regions() {
        let try_offset = offset_of(0, region.try_start.id())?;
        let try_end = end_of(region.try_end)?;
        let mut handlers = Vec::with_capacity(region.handlers.len());
        for handler in &region.handlers {
            let kind = match &handler.kind {
                HandlerKind::Catch(ty) => EncodedHandlerKind::Catch(ty.clone()),
                HandlerKind::Filter { filter_start } => EncodedHandlerKind::Filter {
                    filter_offset: offset_of(0, filter_start.id())?,
                },
                HandlerKind::Finally => EncodedHandlerKind::Finally,
                HandlerKind::Fault => EncodedHandlerKind::Fault,
            };
            let offset = offset_of(0, handler.start.id())?;
            handlers.push(EncodedHandler {
                kind,
                offset,
                length: end_of(handler.end)?.saturating_sub(offset),
            });
        }
        regions.push(EncodedRegion {
            try_offset,
            try_length: try_end.saturating_sub(try_offset),
            handlers,
        });
    }

    Ok(EncodedBody {
        max_stack,
        init_locals: body.init_locals,
        locals: body.locals().iter().map(|l| l.ty.clone()).collect(),
        code_size,
        instructions,
        regions,
    })
}
