//! Generic parameters, constraints and instantiation.
//!
//! Instantiation validates eagerly: the argument count is compared with the
//! formal arity first, then each argument is checked against its parameter's
//! constraints in order. Nothing is deferred to emission or verification.

use serde::{Deserialize, Serialize};

use crate::error::{AssemblerError, Result};
use crate::metadata::reference::{FieldRef, FieldRefData, MethodRef, MethodRefData, TypeKind, TypeRef};
use crate::metadata::signature::{PrimitiveType, TypeSig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GenericOwner {
    Type,
    Method,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GenericConstraints {
    /// `class`: the argument must be a reference type.
    pub reference_type: bool,
    /// `struct`: the argument must be a non-nullable value type.
    pub value_type: bool,
    /// `new()`: the argument must have a public parameterless constructor.
    pub default_ctor: bool,
    /// The argument must be assignable to each of these. May mention other
    /// formal parameters as `!n` / `!!n`.
    pub types: Vec<TypeSig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GenericParam {
    pub name: String,
    pub position: u16,
    pub owner: GenericOwner,
    pub constraints: GenericConstraints,
}

impl GenericParam {
    pub fn new(name: &str, position: u16, owner: GenericOwner) -> Self {
        Self {
            name: name.to_string(),
            position,
            owner,
            constraints: GenericConstraints::default(),
        }
    }

    pub fn reference_type(mut self) -> Self {
        self.constraints.reference_type = true;
        self
    }

    pub fn value_type(mut self) -> Self {
        self.constraints.value_type = true;
        self
    }

    pub fn default_ctor(mut self) -> Self {
        self.constraints.default_ctor = true;
        self
    }

    pub fn constrained_to(mut self, ty: TypeSig) -> Self {
        self.constraints.types.push(ty);
        self
    }

    /// The signature that refers to this parameter from inside its owner.
    pub fn as_sig(&self) -> TypeSig {
        match self.owner {
            GenericOwner::Type => TypeSig::Var(self.position),
            GenericOwner::Method => TypeSig::MVar(self.position),
        }
    }
}

/// Answers assignability questions for arbitrary type constraints.
pub trait TypeResolver {
    fn is_assignable_to(&self, from: &TypeSig, to: &TypeSig) -> bool;

    /// Whether `ty` satisfies a `new()` constraint. `None` when unknown.
    fn has_default_ctor(&self, ty: &TypeSig) -> Option<bool> {
        has_default_ctor(ty)
    }
}

/// Assignability by identity only, plus `object` accepting every reference
/// type. Used when no hierarchy information is available.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralResolver;

impl TypeResolver for StructuralResolver {
    fn is_assignable_to(&self, from: &TypeSig, to: &TypeSig) -> bool {
        from == to
            || (matches!(to, TypeSig::Primitive(PrimitiveType::Object))
                && from.is_reference_type() != Some(false))
    }
}

// =============================================================================
// Constraint checking
// =============================================================================

fn violation(
    generic: &str,
    index: usize,
    param: &GenericParam,
    constraint: impl Into<String>,
    argument: &TypeSig,
) -> AssemblerError {
    AssemblerError::ConstraintViolation {
        generic: generic.to_string(),
        index,
        parameter: param.name.clone(),
        constraint: constraint.into(),
        argument: argument.to_string(),
    }
}

fn is_nullable(arg: &TypeSig) -> bool {
    matches!(arg, TypeSig::GenericInst { generic, .. }
        if generic.namespace == "System" && generic.name == "Nullable`1")
}

pub(crate) fn has_default_ctor(arg: &TypeSig) -> Option<bool> {
    match arg {
        TypeSig::Primitive(PrimitiveType::String) | TypeSig::Primitive(PrimitiveType::Void) => {
            Some(false)
        }
        TypeSig::Primitive(_) => Some(true),
        TypeSig::Named(ty) | TypeSig::GenericInst { generic: ty, .. } => Some(
            ty.kind == TypeKind::ValueType || (ty.has_default_ctor && !ty.is_abstract),
        ),
        TypeSig::Var(_) | TypeSig::MVar(_) => None,
        TypeSig::SzArray(_) | TypeSig::ByRef(_) | TypeSig::Ptr(_) => Some(false),
    }
}

/// Check `args` against `params`. `type_args`/`method_args` are used to
/// substitute constraint types that mention other formal parameters.
fn check_arguments(
    generic: &str,
    params: &[GenericParam],
    args: &[TypeSig],
    outer_type_args: &[TypeSig],
    resolver: &dyn TypeResolver,
) -> Result<()> {
    if params.len() != args.len() {
        return Err(AssemblerError::Arity {
            generic: generic.to_string(),
            expected: params.len(),
            actual: args.len(),
        });
    }

    for (index, (param, arg)) in params.iter().zip(args).enumerate() {
        // Generic variables are checked where they are bound.
        if matches!(arg, TypeSig::Var(_) | TypeSig::MVar(_)) {
            continue;
        }

        // Byrefs and pointers are never valid generic arguments.
        if matches!(arg, TypeSig::ByRef(_) | TypeSig::Ptr(_) | TypeSig::Primitive(PrimitiveType::Void))
        {
            return Err(violation(generic, index, param, "valid type argument", arg));
        }

        let c = &param.constraints;
        if c.reference_type && arg.is_value_type() == Some(true) {
            return Err(violation(generic, index, param, "class", arg));
        }
        if c.value_type && (arg.is_value_type() == Some(false) || is_nullable(arg)) {
            return Err(violation(generic, index, param, "struct", arg));
        }
        if c.default_ctor && resolver.has_default_ctor(arg) == Some(false) {
            return Err(violation(generic, index, param, "new()", arg));
        }
        for bound in &c.types {
            let bound = match param.owner {
                GenericOwner::Type => bound.substitute(args, &[]),
                GenericOwner::Method => bound.substitute(outer_type_args, args),
            };
            if !resolver.is_assignable_to(arg, &bound) {
                return Err(violation(generic, index, param, bound.to_string(), arg));
            }
        }
    }

    Ok(())
}

// =============================================================================
// Instantiation
// =============================================================================

/// A generic type bound to concrete arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GenericInstance {
    generic: TypeRef,
    args: Vec<TypeSig>,
}

impl GenericInstance {
    pub fn new(generic: &TypeRef, args: Vec<TypeSig>, resolver: &dyn TypeResolver) -> Result<Self> {
        check_arguments(
            &generic.full_name(),
            &generic.generic_params,
            &args,
            &[],
            resolver,
        )?;
        Ok(Self {
            generic: generic.clone(),
            args,
        })
    }

    pub fn generic(&self) -> &TypeRef {
        &self.generic
    }

    pub fn args(&self) -> &[TypeSig] {
        &self.args
    }

    /// Signature form, for use inside other signatures.
    pub fn signature(&self) -> TypeSig {
        TypeSig::GenericInst {
            generic: self.generic.clone(),
            args: self.args.clone(),
        }
    }

    /// Re-declare a member of the open generic on this instantiation, usable
    /// as an instruction operand.
    pub fn method(&self, open: &MethodRef) -> MethodRef {
        MethodRefData {
            declaring: self.signature(),
            ..(**open).clone()
        }
        .into()
    }

    pub fn field(&self, open: &FieldRef) -> FieldRef {
        FieldRefData {
            declaring: self.signature(),
            ..(**open).clone()
        }
        .into()
    }
}

/// Bind method-level type arguments to a generic method.
pub fn instantiate_method(
    method: &MethodRef,
    args: Vec<TypeSig>,
    resolver: &dyn TypeResolver,
) -> Result<MethodRef> {
    check_arguments(
        &method.to_string(),
        &method.generic_params,
        &args,
        method.declaring_args(),
        resolver,
    )?;
    Ok(MethodRefData {
        generic_args: args,
        ..(**method).clone()
    }
    .into())
}
