//! Importing handles from the program being extended.
//!
//! The importer is the per-run cache that turns foreign type and member
//! descriptions into local references. Repeated imports of the same foreign
//! handle return the same interned instance. One importer is created per
//! generation run and passed explicitly to whatever needs it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::metadata::generics::GenericParam;
use crate::metadata::reference::{FieldRef, FieldRefData, MethodRef, MethodRefData, TypeKind, TypeRef, TypeRefData};
use crate::metadata::signature::{MethodSig, PrimitiveType, TypeSig};

/// Which base class library generated code binds against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RuntimeFlavor {
    #[default]
    Framework,
    Core,
}

impl RuntimeFlavor {
    pub fn core_library(self) -> &'static str {
        match self {
            RuntimeFlavor::Framework => "mscorlib",
            RuntimeFlavor::Core => "System.Runtime",
        }
    }
}

/// A type as described by the program being extended.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForeignType {
    pub assembly: String,
    pub namespace: String,
    pub name: String,
    pub kind: TypeKind,
    pub is_abstract: bool,
    pub has_default_ctor: bool,
    pub generic_params: Vec<GenericParam>,
}

impl ForeignType {
    pub fn class(assembly: &str, namespace: &str, name: &str) -> Self {
        Self {
            assembly: assembly.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
            kind: TypeKind::Class,
            is_abstract: false,
            has_default_ctor: true,
            generic_params: Vec::new(),
        }
    }

    pub fn value_type(assembly: &str, namespace: &str, name: &str) -> Self {
        Self {
            kind: TypeKind::ValueType,
            ..Self::class(assembly, namespace, name)
        }
    }

    fn key(&self) -> TypeKey {
        (
            self.assembly.clone(),
            self.namespace.clone(),
            self.name.clone(),
            self.kind,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForeignMethod {
    pub declaring: ForeignType,
    pub name: String,
    pub sig: MethodSig,
    pub generic_params: Vec<GenericParam>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForeignField {
    pub declaring: ForeignType,
    pub name: String,
    pub field_type: TypeSig,
    pub is_static: bool,
}

type TypeKey = (String, String, String, TypeKind);
type MemberKey = (TypeKey, String, MethodSig);

#[derive(Debug, Default)]
pub struct Importer {
    flavor: RuntimeFlavor,
    types: HashMap<TypeKey, TypeRef>,
    methods: HashMap<MemberKey, MethodRef>,
    fields: HashMap<(TypeKey, String), FieldRef>,
}

impl Importer {
    pub fn new(flavor: RuntimeFlavor) -> Self {
        Self {
            flavor,
            ..Self::default()
        }
    }

    pub fn flavor(&self) -> RuntimeFlavor {
        self.flavor
    }

    /// Number of interned handles.
    pub fn len(&self) -> usize {
        self.types.len() + self.methods.len() + self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn import_type(&mut self, foreign: &ForeignType) -> TypeRef {
        self.types
            .entry(foreign.key())
            .or_insert_with(|| {
                trace!(ty = %foreign.name, assembly = %foreign.assembly, "import type");
                TypeRefData {
                    scope: foreign.assembly.clone(),
                    namespace: foreign.namespace.clone(),
                    name: foreign.name.clone(),
                    kind: foreign.kind,
                    is_abstract: foreign.is_abstract,
                    has_default_ctor: foreign.has_default_ctor,
                    generic_params: foreign.generic_params.clone(),
                    definition: None,
                }
                .into_ref()
            })
            .clone()
    }

    /// Import a method. The declaring type is imported (and interned) too.
    pub fn import_method(&mut self, foreign: &ForeignMethod) -> MethodRef {
        let key = (foreign.declaring.key(), foreign.name.clone(), foreign.sig.clone());
        if let Some(existing) = self.methods.get(&key) {
            return existing.clone();
        }

        let declaring = self.declaring_sig(&foreign.declaring);
        let method: MethodRef = MethodRefData {
            declaring,
            name: foreign.name.clone(),
            sig: foreign.sig.clone(),
            generic_params: foreign.generic_params.clone(),
            generic_args: Vec::new(),
            definition: None,
        }
        .into();
        self.methods.insert(key, method.clone());
        method
    }

    pub fn import_field(&mut self, foreign: &ForeignField) -> FieldRef {
        let key = (foreign.declaring.key(), foreign.name.clone());
        if let Some(existing) = self.fields.get(&key) {
            return existing.clone();
        }

        let declaring = self.declaring_sig(&foreign.declaring);
        let field: FieldRef = FieldRefData {
            declaring,
            name: foreign.name.clone(),
            field_type: foreign.field_type.clone(),
            is_static: foreign.is_static,
            definition: None,
        }
        .into();
        self.fields.insert(key, field.clone());
        field
    }

    fn declaring_sig(&mut self, declaring: &ForeignType) -> TypeSig {
        let ty = self.import_type(declaring);
        if ty.is_generic() {
            let args = ty.generic_params.iter().map(GenericParam::as_sig).collect();
            TypeSig::GenericInst { generic: ty, args }
        } else {
            TypeSig::Named(ty)
        }
    }

    // -------------------------------------------------------------------------
    // Base class library
    // -------------------------------------------------------------------------

    pub fn primitive(&self, p: PrimitiveType) -> TypeSig {
        TypeSig::Primitive(p)
    }

    pub fn void(&self) -> TypeSig {
        self.primitive(PrimitiveType::Void)
    }

    pub fn boolean(&self) -> TypeSig {
        self.primitive(PrimitiveType::Boolean)
    }

    pub fn int32(&self) -> TypeSig {
        self.primitive(PrimitiveType::I4)
    }

    pub fn int64(&self) -> TypeSig {
        self.primitive(PrimitiveType::I8)
    }

    pub fn string(&self) -> TypeSig {
        self.primitive(PrimitiveType::String)
    }

    pub fn object(&self) -> TypeSig {
        self.primitive(PrimitiveType::Object)
    }

    pub fn native_int(&self) -> TypeSig {
        self.primitive(PrimitiveType::I)
    }

    /// A class from the core library of the selected flavor.
    pub fn core_class(&mut self, namespace: &str, name: &str) -> TypeRef {
        let assembly = self.flavor.core_library();
        self.import_type(&ForeignType::class(assembly, namespace, name))
    }

    /// A method on a core library type.
    pub fn core_method(&mut self, namespace: &str, type_name: &str, name: &str, sig: MethodSig) -> MethodRef {
        let declaring = ForeignType::class(self.flavor.core_library(), namespace, type_name);
        self.import_method(&ForeignMethod {
            declaring,
            name: name.to_string(),
            sig,
            generic_params: Vec::new(),
        })
    }

    pub fn delegate_type(&mut self) -> TypeRef {
        self.core_class("System", "Delegate")
    }

    pub fn multicast_delegate_type(&mut self) -> TypeRef {
        let data = ForeignType {
            is_abstract: true,
            has_default_ctor: false,
            ..ForeignType::class(self.flavor.core_library(), "System", "MulticastDelegate")
        };
        self.import_type(&data)
    }

    /// `Delegate.Combine(Delegate, Delegate)` or `Delegate.Remove(Delegate, Delegate)`.
    pub fn delegate_method(&mut self, name: &str) -> MethodRef {
        let delegate = TypeSig::Named(self.delegate_type());
        self.core_method(
            "System",
            "Delegate",
            name,
            MethodSig::new(delegate.clone(), vec![delegate.clone(), delegate]),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_type_import_is_interned() {
        let mut importer = Importer::new(RuntimeFlavor::Framework);
        let player = ForeignType::class("Game", "Game", "Player");

        let a = importer.import_type(&player);
        let b = importer.import_type(&player.clone());

        assert!(TypeRef::same_instance(&a, &b));
        assert_eq!(importer.len(), 1);
    }

    #[test]
    fn test_kind_is_part_of_import_identity() {
        let mut importer = Importer::new(RuntimeFlavor::Framework);
        let class = importer.import_type(&ForeignType::class("Game", "Game", "Vector"));
        let value = importer.import_type(&ForeignType::value_type("Game", "Game", "Vector"));

        assert_eq!(class.kind, TypeKind::Class);
        assert_eq!(value.kind, TypeKind::ValueType);
        assert_ne!(class, value);
        assert!(TypeRef::same_instance(
            &value,
            &importer.import_type(&ForeignType::value_type("Game", "Game", "Vector"))
        ));
    }

    #[test]
    fn test_repeated_method_import_is_interned() {
        let mut importer = Importer::new(RuntimeFlavor::Framework);
        let update = ForeignMethod {
            declaring: ForeignType::class("Game", "Game", "Player"),
            name: "Update".to_string(),
            sig: MethodSig::instance(TypeSig::void(), vec![PrimitiveType::R4.into()]),
            generic_params: Vec::new(),
        };

        let a = importer.import_method(&update);
        let b = importer.import_method(&update);
        assert!(MethodRef::same_instance(&a, &b));

        let declaring = a.declaring.head().unwrap().clone();
        let player = importer.import_type(&update.declaring);
        assert!(TypeRef::same_instance(&declaring, &player));
    }

    #[test]
    fn test_overloads_are_distinct() {
        let mut importer = Importer::new(RuntimeFlavor::Framework);
        let base = ForeignMethod {
            declaring: ForeignType::class("Game", "Game", "Player"),
            name: "Hit".to_string(),
            sig: MethodSig::instance(TypeSig::void(), vec![]),
            generic_params: Vec::new(),
        };
        let overload = ForeignMethod {
            sig: MethodSig::instance(TypeSig::void(), vec![PrimitiveType::I4.into()]),
            ..base.clone()
        };

        let a = importer.import_method(&base);
        let b = importer.import_method(&overload);
        assert!(!MethodRef::same_instance(&a, &b));
    }

    #[test]
    fn test_field_import_is_interned() {
        let mut importer = Importer::new(RuntimeFlavor::Framework);
        let hp = ForeignField {
            declaring: ForeignType::class("Game", "Game", "Player"),
            name: "hp".to_string(),
            field_type: PrimitiveType::I4.into(),
            is_static: false,
        };
        let a = importer.import_field(&hp);
        let b = importer.import_field(&hp);
        assert!(FieldRef::same_instance(&a, &b));
    }

    #[test]
    fn test_flavor_selects_core_library() {
        let mut framework = Importer::new(RuntimeFlavor::Framework);
        let mut core = Importer::new(RuntimeFlavor::Core);

        assert_eq!(framework.delegate_type().scope, "mscorlib");
        assert_eq!(core.delegate_type().scope, "System.Runtime");
        assert!(core.multicast_delegate_type().is_abstract);
    }

    #[test]
    fn test_delegate_combine_shape() {
        let mut importer = Importer::new(RuntimeFlavor::Framework);
        let combine = importer.delegate_method("Combine");
        assert_eq!(combine.sig.params.len(), 2);
        assert!(!combine.sig.has_this);
        assert!(MethodRef::same_instance(&combine, &importer.delegate_method("Combine")));
    }
}
