//! Reference handles.
//!
//! A reference is an immutable, cheaply cloned handle that points at a member
//! declared either in the module being generated (it then carries the arena id
//! of its definition) or in some other assembly. References are what
//! instruction operands hold; definitions never appear in an instruction.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::metadata::generics::GenericParam;
use crate::metadata::registry::{FieldId, MethodId, TypeId};
use crate::metadata::signature::{MethodSig, TypeSig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TypeKind {
    #[default]
    Class,
    ValueType,
    Interface,
}

impl TypeKind {
    pub fn keyword(self) -> &'static str {
        match self {
            TypeKind::ValueType => "valuetype",
            TypeKind::Class | TypeKind::Interface => "class",
        }
    }
}

// =============================================================================
// Types
// =============================================================================

/// Equality and hashing look only at the identity of the type: scope, full
/// name, kind and local definition. The remaining fields are descriptive and
/// may be refreshed as the definition gains members.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeRefData {
    /// Assembly or module the type lives in.
    pub scope: String,
    pub namespace: String,
    pub name: String,
    pub kind: TypeKind,
    pub is_abstract: bool,
    pub has_default_ctor: bool,
    pub generic_params: Vec<GenericParam>,
    /// Set when the type is declared in the module being generated.
    pub definition: Option<TypeId>,
}

impl TypeRefData {
    pub fn class(scope: &str, namespace: &str, name: &str) -> Self {
        Self {
            scope: scope.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
            kind: TypeKind::Class,
            is_abstract: false,
            has_default_ctor: true,
            generic_params: Vec::new(),
            definition: None,
        }
    }

    pub fn value_type(scope: &str, namespace: &str, name: &str) -> Self {
        Self {
            kind: TypeKind::ValueType,
            ..Self::class(scope, namespace, name)
        }
    }

    pub fn interface(scope: &str, namespace: &str, name: &str) -> Self {
        Self {
            kind: TypeKind::Interface,
            is_abstract: true,
            has_default_ctor: false,
            ..Self::class(scope, namespace, name)
        }
    }

    pub fn with_generic_params(mut self, params: Vec<GenericParam>) -> Self {
        self.generic_params = params;
        self
    }

    pub fn without_default_ctor(mut self) -> Self {
        self.has_default_ctor = false;
        self
    }

    pub fn abstract_type(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    pub fn into_ref(self) -> TypeRef {
        TypeRef(Arc::new(self))
    }

    fn identity(&self) -> (&str, &str, &str, TypeKind, Option<TypeId>) {
        (&self.scope, &self.namespace, &self.name, self.kind, self.definition)
    }
}

impl PartialEq for TypeRefData {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for TypeRefData {}

impl Hash for TypeRefData {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

/// Shared handle to a type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeRef(Arc<TypeRefData>);

impl TypeRef {
    /// Whether both handles are the same interned instance.
    pub fn same_instance(a: &TypeRef, b: &TypeRef) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }

    pub fn full_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }

    pub fn is_generic(&self) -> bool {
        !self.generic_params.is_empty()
    }
}

impl Deref for TypeRef {
    type Target = TypeRefData;

    fn deref(&self) -> &TypeRefData {
        &self.0
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]{}", self.scope, self.full_name())
    }
}

// =============================================================================
// Methods
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodRefData {
    /// Declaring type, possibly a generic instantiation.
    pub declaring: TypeSig,
    pub name: String,
    /// Signature as declared, generic variables left open.
    pub sig: MethodSig,
    pub generic_params: Vec<GenericParam>,
    /// Method-level type arguments once instantiated.
    pub generic_args: Vec<TypeSig>,
    pub definition: Option<MethodId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodRef(Arc<MethodRefData>);

impl MethodRef {
    pub fn new(declaring: TypeSig, name: &str, sig: MethodSig) -> Self {
        MethodRefData {
            declaring,
            name: name.to_string(),
            sig,
            generic_params: Vec::new(),
            generic_args: Vec::new(),
            definition: None,
        }
        .into()
    }

    pub fn same_instance(a: &MethodRef, b: &MethodRef) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }

    /// Declaring type arguments when the declaring type is an instantiation.
    pub fn declaring_args(&self) -> &[TypeSig] {
        match &self.declaring {
            TypeSig::GenericInst { args, .. } => args,
            _ => &[],
        }
    }

    /// Signature with every bound generic variable replaced.
    pub fn resolved_sig(&self) -> MethodSig {
        self.sig
            .substitute(self.declaring_args(), &self.generic_args)
    }

    pub fn is_constructor(&self) -> bool {
        self.name == ".ctor" || self.name == ".cctor"
    }
}

impl From<MethodRefData> for MethodRef {
    fn from(data: MethodRefData) -> Self {
        MethodRef(Arc::new(data))
    }
}

impl Deref for MethodRef {
    type Target = MethodRefData;

    fn deref(&self) -> &MethodRefData {
        &self.0
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let owner = match self.declaring.head() {
            Some(head) => head.full_name(),
            None => self.declaring.to_string(),
        };
        write!(f, "{}::{}", owner, self.name)?;
        if !self.generic_args.is_empty() {
            write!(f, "<")?;
            for (i, arg) in self.generic_args.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", arg)?;
            }
            write!(f, ">")?;
        }
        Ok(())
    }
}

// =============================================================================
// Fields
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldRefData {
    pub declaring: TypeSig,
    pub name: String,
    pub field_type: TypeSig,
    pub is_static: bool,
    pub definition: Option<FieldId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldRef(Arc<FieldRefData>);

impl FieldRef {
    pub fn new(declaring: TypeSig, name: &str, field_type: TypeSig, is_static: bool) -> Self {
        FieldRefData {
            declaring,
            name: name.to_string(),
            field_type,
            is_static,
            definition: None,
        }
        .into()
    }

    pub fn same_instance(a: &FieldRef, b: &FieldRef) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }

    pub fn resolved_type(&self) -> TypeSig {
        match &self.declaring {
            TypeSig::GenericInst { args, .. } => self.field_type.substitute(args, &[]),
            _ => self.field_type.clone(),
        }
    }
}

impl From<FieldRefData> for FieldRef {
    fn from(data: FieldRefData) -> Self {
        FieldRef(Arc::new(data))
    }
}

impl Deref for FieldRef {
    type Target = FieldRefData;

    fn deref(&self) -> &FieldRefData {
        &self.0
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let owner = match self.declaring.head() {
            Some(head) => head.full_name(),
            None => self.declaring.to_string(),
        };
        write!(f, "{}::{}", owner, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::signature::PrimitiveType;

    #[test]
    fn test_clones_share_instance() {
        let a = TypeRefData::class("Game", "Game", "Player").into_ref();
        let b = a.clone();
        let c = TypeRefData::class("Game", "Game", "Player").into_ref();

        assert!(TypeRef::same_instance(&a, &b));
        assert!(!TypeRef::same_instance(&a, &c));
        assert_eq!(a, c);
    }

    #[test]
    fn test_descriptive_flags_do_not_change_identity() {
        let plain = TypeRefData::class("Game", "Game", "Entity").into_ref();
        let flagged = TypeRefData::class("Game", "Game", "Entity")
            .without_default_ctor()
            .abstract_type()
            .into_ref();
        let as_struct = TypeRefData::value_type("Game", "Game", "Entity").into_ref();

        assert_eq!(plain, flagged);
        assert_eq!(TypeSig::Named(plain.clone()), TypeSig::Named(flagged));
        assert_ne!(plain, as_struct);
    }

    #[test]
    fn test_type_display() {
        let a = TypeRefData::class("Game", "Game.Entities", "Player").into_ref();
        assert_eq!(a.to_string(), "[Game]Game.Entities.Player");
        assert_eq!(a.full_name(), "Game.Entities.Player");
    }

    #[test]
    fn test_method_resolved_sig_substitutes_declaring_args() {
        let list = TypeRefData::class("mscorlib", "System.Collections.Generic", "List`1").into_ref();
        let declaring = TypeSig::GenericInst {
            generic: list,
            args: vec![PrimitiveType::String.into()],
        };
        let add = MethodRef::new(
            declaring,
            "Add",
            MethodSig::instance(TypeSig::void(), vec![TypeSig::Var(0)]),
        );

        assert_eq!(
            add.resolved_sig().params,
            vec![TypeSig::Primitive(PrimitiveType::String)]
        );
        assert_eq!(add.sig.params, vec![TypeSig::Var(0)]);
        assert_eq!(add.to_string(), "System.Collections.Generic.List`1::Add");
    }
}
