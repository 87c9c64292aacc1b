use std::fmt;

use serde::{Deserialize, Serialize};

use crate::metadata::reference::{TypeKind, TypeRef};

// =============================================================================
// Primitive types
// =============================================================================

/// Built-in element types that have a dedicated signature encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimitiveType {
    Void,
    Boolean,
    Char,
    I1,
    U1,
    I2,
    U2,
    I4,
    U4,
    I8,
    U8,
    R4,
    R8,
    /// Pointer-sized signed integer.
    I,
    /// Pointer-sized unsigned integer.
    U,
    String,
    Object,
}

impl PrimitiveType {
    /// Keyword used in listings and manifests.
    pub fn keyword(self) -> &'static str {
        match self {
            PrimitiveType::Void => "void",
            PrimitiveType::Boolean => "bool",
            PrimitiveType::Char => "char",
            PrimitiveType::I1 => "int8",
            PrimitiveType::U1 => "uint8",
            PrimitiveType::I2 => "int16",
            PrimitiveType::U2 => "uint16",
            PrimitiveType::I4 => "int32",
            PrimitiveType::U4 => "uint32",
            PrimitiveType::I8 => "int64",
            PrimitiveType::U8 => "uint64",
            PrimitiveType::R4 => "float32",
            PrimitiveType::R8 => "float64",
            PrimitiveType::I => "native int",
            PrimitiveType::U => "native uint",
            PrimitiveType::String => "string",
            PrimitiveType::Object => "object",
        }
    }

    pub fn from_keyword(keyword: &str) -> Option<Self> {
        Some(match keyword {
            "void" => PrimitiveType::Void,
            "bool" | "boolean" => PrimitiveType::Boolean,
            "char" => PrimitiveType::Char,
            "int8" | "sbyte" => PrimitiveType::I1,
            "uint8" | "byte" => PrimitiveType::U1,
            "int16" | "short" => PrimitiveType::I2,
            "uint16" | "ushort" => PrimitiveType::U2,
            "int32" | "int" => PrimitiveType::I4,
            "uint32" | "uint" => PrimitiveType::U4,
            "int64" | "long" => PrimitiveType::I8,
            "uint64" | "ulong" => PrimitiveType::U8,
            "float32" | "float" => PrimitiveType::R4,
            "float64" | "double" => PrimitiveType::R8,
            "native int" | "nint" => PrimitiveType::I,
            "native uint" | "nuint" => PrimitiveType::U,
            "string" => PrimitiveType::String,
            "object" => PrimitiveType::Object,
            _ => return None,
        })
    }

    /// `System.*` name of the runtime type backing this primitive.
    pub fn system_name(self) -> &'static str {
        match self {
            PrimitiveType::Void => "Void",
            PrimitiveType::Boolean => "Boolean",
            PrimitiveType::Char => "Char",
            PrimitiveType::I1 => "SByte",
            PrimitiveType::U1 => "Byte",
            PrimitiveType::I2 => "Int16",
            PrimitiveType::U2 => "UInt16",
            PrimitiveType::I4 => "Int32",
            PrimitiveType::U4 => "UInt32",
            PrimitiveType::I8 => "Int64",
            PrimitiveType::U8 => "UInt64",
            PrimitiveType::R4 => "Single",
            PrimitiveType::R8 => "Double",
            PrimitiveType::I => "IntPtr",
            PrimitiveType::U => "UIntPtr",
            PrimitiveType::String => "String",
            PrimitiveType::Object => "Object",
        }
    }

    pub fn is_value_type(self) -> bool {
        !matches!(
            self,
            PrimitiveType::String | PrimitiveType::Object | PrimitiveType::Void
        )
    }
}

// =============================================================================
// Type signatures
// =============================================================================

/// Structural description of a type as it appears inside other signatures.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeSig {
    Primitive(PrimitiveType),
    /// A non-generic (or open) named type.
    Named(TypeRef),
    /// A generic type bound to concrete arguments.
    GenericInst { generic: TypeRef, args: Vec<TypeSig> },
    /// Type-level generic parameter `!n`.
    Var(u16),
    /// Method-level generic parameter `!!n`.
    MVar(u16),
    SzArray(Box<TypeSig>),
    ByRef(Box<TypeSig>),
    Ptr(Box<TypeSig>),
}

impl TypeSig {
    pub fn void() -> Self {
        TypeSig::Primitive(PrimitiveType::Void)
    }

    pub fn object() -> Self {
        TypeSig::Primitive(PrimitiveType::Object)
    }

    pub fn named(ty: &TypeRef) -> Self {
        TypeSig::Named(ty.clone())
    }

    pub fn array_of(element: TypeSig) -> Self {
        TypeSig::SzArray(Box::new(element))
    }

    pub fn by_ref(inner: TypeSig) -> Self {
        TypeSig::ByRef(Box::new(inner))
    }

    pub fn is_void(&self) -> bool {
        matches!(self, TypeSig::Primitive(PrimitiveType::Void))
    }

    /// Whether values of this type are value types. `None` for generic
    /// variables, whose nature is only known after substitution.
    pub fn is_value_type(&self) -> Option<bool> {
        match self {
            TypeSig::Primitive(p) => Some(p.is_value_type()),
            TypeSig::Named(ty) => Some(ty.kind == TypeKind::ValueType),
            TypeSig::GenericInst { generic, .. } => Some(generic.kind == TypeKind::ValueType),
            TypeSig::Var(_) | TypeSig::MVar(_) => None,
            TypeSig::SzArray(_) => Some(false),
            TypeSig::ByRef(_) | TypeSig::Ptr(_) => Some(false),
        }
    }

    /// Whether values of this type are references to heap objects.
    pub fn is_reference_type(&self) -> Option<bool> {
        match self {
            TypeSig::ByRef(_) | TypeSig::Ptr(_) => Some(false),
            TypeSig::Primitive(PrimitiveType::Void) => Some(false),
            other => other.is_value_type().map(|v| !v),
        }
    }

    /// The named type at the head of this signature, if any.
    pub fn head(&self) -> Option<&TypeRef> {
        match self {
            TypeSig::Named(ty) => Some(ty),
            TypeSig::GenericInst { generic, .. } => Some(generic),
            _ => None,
        }
    }

    /// Replace `!n` with `type_args[n]` and `!!n` with `method_args[n]`.
    /// Variables without a matching argument are left untouched.
    pub fn substitute(&self, type_args: &[TypeSig], method_args: &[TypeSig]) -> TypeSig {
        match self {
            TypeSig::Var(n) => type_args
                .get(*n as usize)
                .cloned()
                .unwrap_or(TypeSig::Var(*n)),
            TypeSig::MVar(n) => method_args
                .get(*n as usize)
                .cloned()
                .unwrap_or(TypeSig::MVar(*n)),
            TypeSig::GenericInst { generic, args } => TypeSig::GenericInst {
                generic: generic.clone(),
                args: args
                    .iter()
                    .map(|a| a.substitute(type_args, method_args))
                    .collect(),
            },
            TypeSig::SzArray(inner) => {
                TypeSig::SzArray(Box::new(inner.substitute(type_args, method_args)))
            }
            TypeSig::ByRef(inner) => {
                TypeSig::ByRef(Box::new(inner.substitute(type_args, method_args)))
            }
            TypeSig::Ptr(inner) => TypeSig::Ptr(Box::new(inner.substitute(type_args, method_args))),
            TypeSig::Primitive(_) | TypeSig::Named(_) => self.clone(),
        }
    }
}

impl From<PrimitiveType> for TypeSig {
    fn from(p: PrimitiveType) -> Self {
        TypeSig::Primitive(p)
    }
}

impl fmt::Display for TypeSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeSig::Primitive(p) => write!(f, "{}", p.keyword()),
            TypeSig::Named(ty) => write!(f, "{} {}", ty.kind.keyword(), ty),
            TypeSig::GenericInst { generic, args } => {
                write!(f, "{} {}<", generic.kind.keyword(), generic)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ">")
            }
            TypeSig::Var(n) => write!(f, "!{}", n),
            TypeSig::MVar(n) => write!(f, "!!{}", n),
            TypeSig::SzArray(inner) => write!(f, "{}[]", inner),
            TypeSig::ByRef(inner) => write!(f, "{}&", inner),
            TypeSig::Ptr(inner) => write!(f, "{}*", inner),
        }
    }
}

// =============================================================================
// Method signatures
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CallingConvention {
    #[default]
    Default,
    VarArg,
    /// Unmanaged cdecl, only meaningful for `calli`.
    C,
    /// Unmanaged stdcall, only meaningful for `calli`.
    StdCall,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodSig {
    pub convention: CallingConvention,
    /// Instance methods receive `this` as an implicit first argument.
    pub has_this: bool,
    pub generic_param_count: u16,
    pub params: Vec<TypeSig>,
    pub ret: TypeSig,
}

impl MethodSig {
    /// A static method signature.
    pub fn new(ret: TypeSig, params: Vec<TypeSig>) -> Self {
        Self {
            convention: CallingConvention::Default,
            has_this: false,
            generic_param_count: 0,
            params,
            ret,
        }
    }

    /// An instance method signature.
    pub fn instance(ret: TypeSig, params: Vec<TypeSig>) -> Self {
        Self {
            has_this: true,
            ..Self::new(ret, params)
        }
    }

    pub fn with_generic_params(mut self, count: u16) -> Self {
        self.generic_param_count = count;
        self
    }

    pub fn with_convention(mut self, convention: CallingConvention) -> Self {
        self.convention = convention;
        self
    }

    pub fn returns_value(&self) -> bool {
        !self.ret.is_void()
    }

    /// Number of argument slots, counting `this`.
    pub fn arg_slots(&self) -> u32 {
        self.params.len() as u32 + u32::from(self.has_this)
    }

    /// Same arity, same generic arity, same parameter types in order, same
    /// return type. Calling convention and `this` are not compared.
    pub fn structurally_eq(&self, other: &MethodSig) -> bool {
        self.params.len() == other.params.len()
            && self.generic_param_count == other.generic_param_count
            && self.params.iter().zip(&other.params).all(|(a, b)| a == b)
            && self.ret == other.ret
    }

    pub fn substitute(&self, type_args: &[TypeSig], method_args: &[TypeSig]) -> MethodSig {
        MethodSig {
            params: self
                .params
                .iter()
                .map(|p| p.substitute(type_args, method_args))
                .collect(),
            ret: self.ret.substitute(type_args, method_args),
            ..self.clone()
        }
    }
}

impl fmt::Display for MethodSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.has_this {
            write!(f, "instance ")?;
        }
        write!(f, "{} (", self.ret)?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", p)?;
        }
        write!(f, ")")
    }
}
