//! Definition arena.
//!
//! Every declared member lives in one arena slot and is addressed by a stable
//! id. A type's member list stores those ids and each member stores the id of
//! its owning type. The two sides are only ever changed together, by
//! [`Registry::add_member`] and [`Registry::remove_member`].

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::bytecode::body::MethodBody;
use crate::bytecode::finalize::{FinalizeOptions, finalize_with};
use crate::error::{AssemblerError, Result};
use crate::metadata::generics::{self, GenericParam, TypeResolver};
use crate::metadata::reference::{
    FieldRef, FieldRefData, MethodRef, MethodRefData, TypeKind, TypeRef, TypeRefData,
};
use crate::metadata::signature::{MethodSig, PrimitiveType, TypeSig};

macro_rules! arena_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub u32);

        impl $name {
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

arena_id!(TypeId);
arena_id!(MethodId);
arena_id!(FieldId);
arena_id!(PropertyId);
arena_id!(EventId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemberId {
    Method(MethodId),
    Field(FieldId),
    Property(PropertyId),
    Event(EventId),
    NestedType(TypeId),
}

// =============================================================================
// Definitions
// =============================================================================

#[derive(Debug, Clone)]
pub struct TypeDefinition {
    pub namespace: String,
    pub name: String,
    pub kind: TypeKind,
    pub is_public: bool,
    pub is_abstract: bool,
    pub is_sealed: bool,
    pub base: Option<TypeSig>,
    pub interfaces: Vec<TypeSig>,
    pub generic_params: Vec<GenericParam>,
    members: Vec<MemberId>,
    /// Enclosing type for nested types.
    owner: Option<TypeId>,
}

impl TypeDefinition {
    pub fn class(namespace: &str, name: &str, base: Option<TypeSig>) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            kind: TypeKind::Class,
            is_public: true,
            is_abstract: false,
            is_sealed: false,
            base,
            interfaces: Vec::new(),
            generic_params: Vec::new(),
            members: Vec::new(),
            owner: None,
        }
    }

    /// `abstract sealed`, the metadata shape of a static class.
    pub fn static_class(namespace: &str, name: &str, base: TypeSig) -> Self {
        Self {
            is_abstract: true,
            is_sealed: true,
            ..Self::class(namespace, name, Some(base))
        }
    }

    pub fn members(&self) -> &[MemberId] {
        &self.members
    }

    pub fn owner(&self) -> Option<TypeId> {
        self.owner
    }

    pub fn full_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodAttributes {
    pub is_public: bool,
    pub is_static: bool,
    pub is_virtual: bool,
    pub is_abstract: bool,
    pub is_hide_by_sig: bool,
    pub is_special_name: bool,
    pub is_rt_special_name: bool,
    /// Body supplied by the runtime (delegate `Invoke`, `.ctor`).
    pub is_runtime_impl: bool,
}

#[derive(Debug, Clone)]
pub struct MethodDefinition {
    pub name: String,
    pub sig: MethodSig,
    pub param_names: Vec<String>,
    pub generic_params: Vec<GenericParam>,
    pub attributes: MethodAttributes,
    pub body: Option<MethodBody>,
    owner: Option<TypeId>,
}

impl MethodDefinition {
    pub fn new(name: &str, sig: MethodSig, attributes: MethodAttributes) -> Self {
        let param_names = (0..sig.params.len()).map(|i| format!("arg{}", i)).collect();
        Self {
            name: name.to_string(),
            sig,
            param_names,
            generic_params: Vec::new(),
            attributes,
            body: None,
            owner: None,
        }
    }

    pub fn with_param_names(mut self, names: Vec<String>) -> Self {
        self.param_names = names;
        self
    }

    pub fn with_body(mut self, body: MethodBody) -> Self {
        self.body = Some(body);
        self
    }

    pub fn owner(&self) -> Option<TypeId> {
        self.owner
    }
}

#[derive(Debug, Clone)]
pub struct FieldDefinition {
    pub name: String,
    pub field_type: TypeSig,
    pub is_static: bool,
    pub is_public: bool,
    owner: Option<TypeId>,
}

impl FieldDefinition {
    pub fn new(name: &str, field_type: TypeSig, is_static: bool) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            is_static,
            is_public: false,
            owner: None,
        }
    }

    pub fn owner(&self) -> Option<TypeId> {
        self.owner
    }
}

#[derive(Debug, Clone)]
pub struct PropertyDefinition {
    pub name: String,
    pub property_type: TypeSig,
    pub getter: Option<MethodId>,
    pub setter: Option<MethodId>,
    owner: Option<TypeId>,
}

impl PropertyDefinition {
    pub fn new(name: &str, property_type: TypeSig) -> Self {
        Self {
            name: name.to_string(),
            property_type,
            getter: None,
            setter: None,
            owner: None,
        }
    }

    pub fn owner(&self) -> Option<TypeId> {
        self.owner
    }
}

#[derive(Debug, Clone)]
pub struct EventDefinition {
    pub name: String,
    pub handler_type: TypeSig,
    pub adder: Option<MethodId>,
    pub remover: Option<MethodId>,
    owner: Option<TypeId>,
}

impl EventDefinition {
    pub fn new(name: &str, handler_type: TypeSig) -> Self {
        Self {
            name: name.to_string(),
            handler_type,
            adder: None,
            remover: None,
            owner: None,
        }
    }

    pub fn owner(&self) -> Option<TypeId> {
        self.owner
    }
}

// =============================================================================
// Registry
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct Registry {
    pub module_name: String,
    types: Vec<TypeDefinition>,
    methods: Vec<MethodDefinition>,
    fields: Vec<FieldDefinition>,
    properties: Vec<PropertyDefinition>,
    events: Vec<EventDefinition>,
}

fn unknown(kind: &'static str, id: u32) -> AssemblerError {
    AssemblerError::UnknownMember { kind, id }
}

impl Registry {
    pub fn new(module_name: &str) -> Self {
        Self {
            module_name: module_name.to_string(),
            ..Self::default()
        }
    }

    // -------------------------------------------------------------------------
    // Creation
    // -------------------------------------------------------------------------

    /// Declare a top-level type. Ownership fields passed in are ignored.
    pub fn define_type(&mut self, mut def: TypeDefinition) -> TypeId {
        def.members.clear();
        def.owner = None;
        self.types.push(def);
        TypeId(self.types.len() as u32 - 1)
    }

    /// Create an unattached method. Attach it with [`Registry::add_member`].
    pub fn define_method(&mut self, mut def: MethodDefinition) -> MethodId {
        def.owner = None;
        self.methods.push(def);
        MethodId(self.methods.len() as u32 - 1)
    }

    pub fn define_field(&mut self, mut def: FieldDefinition) -> FieldId {
        def.owner = None;
        self.fields.push(def);
        FieldId(self.fields.len() as u32 - 1)
    }

    pub fn define_property(&mut self, mut def: PropertyDefinition) -> PropertyId {
        def.owner = None;
        self.properties.push(def);
        PropertyId(self.properties.len() as u32 - 1)
    }

    pub fn define_event(&mut self, mut def: EventDefinition) -> EventId {
        def.owner = None;
        self.events.push(def);
        EventId(self.events.len() as u32 - 1)
    }

    // -------------------------------------------------------------------------
    // Access
    // -------------------------------------------------------------------------

    pub fn type_def(&self, id: TypeId) -> Result<&TypeDefinition> {
        self.types.get(id.index()).ok_or(unknown("type", id.0))
    }

    pub fn type_def_mut(&mut self, id: TypeId) -> Result<&mut TypeDefinition> {
        self.types.get_mut(id.index()).ok_or(unknown("type", id.0))
    }

    pub fn method(&self, id: MethodId) -> Result<&MethodDefinition> {
        self.methods.get(id.index()).ok_or(unknown("method", id.0))
    }

    pub fn method_mut(&mut self, id: MethodId) -> Result<&mut MethodDefinition> {
        self.methods.get_mut(id.index()).ok_or(unknown("method", id.0))
    }

    pub fn field(&self, id: FieldId) -> Result<&FieldDefinition> {
        self.fields.get(id.index()).ok_or(unknown("field", id.0))
    }

    pub fn property(&self, id: PropertyId) -> Result<&PropertyDefinition> {
        self.properties.get(id.index()).ok_or(unknown("property", id.0))
    }

    pub fn property_mut(&mut self, id: PropertyId) -> Result<&mut PropertyDefinition> {
        self.properties
            .get_mut(id.index())
            .ok_or(unknown("property", id.0))
    }

    pub fn event(&self, id: EventId) -> Result<&EventDefinition> {
        self.events.get(id.index()).ok_or(unknown("event", id.0))
    }

    pub fn event_mut(&mut self, id: EventId) -> Result<&mut EventDefinition> {
        self.events.get_mut(id.index()).ok_or(unknown("event", id.0))
    }

    pub fn types(&self) -> impl Iterator<Item = (TypeId, &TypeDefinition)> {
        self.types
            .iter()
            .enumerate()
            .map(|(i, def)| (TypeId(i as u32), def))
    }

    pub fn methods(&self) -> impl Iterator<Item = (MethodId, &MethodDefinition)> {
        self.methods
            .iter()
            .enumerate()
            .map(|(i, def)| (MethodId(i as u32), def))
    }

    pub fn owner_of(&self, member: MemberId) -> Result<Option<TypeId>> {
        Ok(match member {
            MemberId::Method(id) => self.method(id)?.owner,
            MemberId::Field(id) => self.field(id)?.owner,
            MemberId::Property(id) => self.property(id)?.owner,
            MemberId::Event(id) => self.event(id)?.owner,
            MemberId::NestedType(id) => self.type_def(id)?.owner,
        })
    }

    fn set_owner(&mut self, member: MemberId, owner: Option<TypeId>) -> Result<()> {
        match member {
            MemberId::Method(id) => self.method_mut(id)?.owner = owner,
            MemberId::Field(id) => {
                self.fields
                    .get_mut(id.index())
                    .ok_or(unknown("field", id.0))?
                    .owner = owner
            }
            MemberId::Property(id) => self.property_mut(id)?.owner = owner,
            MemberId::Event(id) => self.event_mut(id)?.owner = owner,
            MemberId::NestedType(id) => self.type_def_mut(id)?.owner = owner,
        }
        Ok(())
    }

    /// Accessor methods that travel with a property-like member.
    fn accessors(&self, member: MemberId) -> Result<Vec<MemberId>> {
        Ok(match member {
            MemberId::Property(id) => {
                let p = self.property(id)?;
                [p.getter, p.setter]
                    .into_iter()
                    .flatten()
                    .map(MemberId::Method)
                    .collect()
            }
            MemberId::Event(id) => {
                let e = self.event(id)?;
                [e.adder, e.remover]
                    .into_iter()
                    .flatten()
                    .map(MemberId::Method)
                    .collect()
            }
            _ => Vec::new(),
        })
    }

    pub fn member_name(&self, member: MemberId) -> String {
        let name = match member {
            MemberId::Method(id) => self.method(id).map(|m| m.name.clone()),
            MemberId::Field(id) => self.field(id).map(|f| f.name.clone()),
            MemberId::Property(id) => self.property(id).map(|p| p.name.clone()),
            MemberId::Event(id) => self.event(id).map(|e| e.name.clone()),
            MemberId::NestedType(id) => self.type_def(id).map(|t| t.full_name()),
        };
        let name = name.unwrap_or_else(|_| format!("{:?}", member));

        match self.owner_of(member).ok().flatten() {
            Some(owner) => match self.type_def(owner) {
                Ok(t) => format!("{}::{}", t.full_name(), name),
                Err(_) => name,
            },
            None => name,
        }
    }

    // -------------------------------------------------------------------------
    // Ownership
    // -------------------------------------------------------------------------

    /// Attach `member` to `ty`, detaching it from its current owner first.
    /// Property and event accessors follow their member.
    pub fn add_member(&mut self, ty: TypeId, member: MemberId) -> Result<()> {
        self.type_def(ty)?;
        if let MemberId::NestedType(nested) = member {
            let mut cursor = Some(ty);
            while let Some(current) = cursor {
                if current == nested {
                    let reason = if current == ty {
                        "a type cannot contain itself"
                    } else {
                        "a type cannot be nested inside its own nested type"
                    };
                    return Err(AssemblerError::ownership(self.member_name(member), reason));
                }
                cursor = self.type_def(current)?.owner;
            }
        }

        match self.owner_of(member)? {
            Some(current) if current == ty => return Ok(()),
            Some(current) => self.detach(current, member)?,
            None => {}
        }

        trace!(member = %self.member_name(member), ty = ty.0, "add member");
        self.types[ty.index()].members.push(member);
        self.set_owner(member, Some(ty))?;

        for accessor in self.accessors(member)? {
            self.add_member(ty, accessor)?;
        }
        Ok(())
    }

    /// Detach `member` from `ty`. Fails if `ty` does not own it.
    pub fn remove_member(&mut self, ty: TypeId, member: MemberId) -> Result<()> {
        self.type_def(ty)?;
        match self.owner_of(member)? {
            Some(current) if current == ty => {}
            Some(_) => {
                return Err(AssemblerError::ownership(
                    self.member_name(member),
                    format!(
                        "cannot remove from '{}': owned by another type",
                        self.types[ty.index()].full_name()
                    ),
                ));
            }
            None => {
                return Err(AssemblerError::ownership(
                    self.member_name(member),
                    format!(
                        "cannot remove from '{}': member is not attached",
                        self.types[ty.index()].full_name()
                    ),
                ));
            }
        }

        self.detach(ty, member)?;

        for accessor in self.accessors(member)? {
            if self.owner_of(accessor)? == Some(ty) {
                self.detach(ty, accessor)?;
            }
        }
        Ok(())
    }

    /// Remove one member from `ty`'s collection and clear its owner.
    fn detach(&mut self, ty: TypeId, member: MemberId) -> Result<()> {
        let members = &mut self.type_def_mut(ty)?.members;
        let Some(pos) = members.iter().position(|m| *m == member) else {
            return Err(AssemblerError::ownership(
                self.member_name(member),
                "owner back-pointer names a type whose member list does not contain it",
            ));
        };
        members.remove(pos);
        self.set_owner(member, None)
    }

    /// Verify every collection entry points back at its type and every owned
    /// member appears exactly once in its owner's collection.
    pub fn check_consistency(&self) -> Result<()> {
        for (ty, def) in self.types() {
            for (i, member) in def.members.iter().enumerate() {
                if self.owner_of(*member)? != Some(ty) {
                    return Err(AssemblerError::ownership(
                        self.member_name(*member),
                        format!("listed in '{}' but owned elsewhere", def.full_name()),
                    ));
                }
                if def.members[..i].contains(member) {
                    return Err(AssemblerError::ownership(
                        self.member_name(*member),
                        format!("listed twice in '{}'", def.full_name()),
                    ));
                }
            }
        }

        let owned = self
            .methods()
            .filter_map(|(id, m)| m.owner.map(|o| (o, MemberId::Method(id))))
            .chain(
                self.fields
                    .iter()
                    .enumerate()
                    .filter_map(|(i, f)| f.owner.map(|o| (o, MemberId::Field(FieldId(i as u32))))),
            )
            .chain(self.properties.iter().enumerate().filter_map(|(i, p)| {
                p.owner
                    .map(|o| (o, MemberId::Property(PropertyId(i as u32))))
            }))
            .chain(
                self.events
                    .iter()
                    .enumerate()
                    .filter_map(|(i, e)| e.owner.map(|o| (o, MemberId::Event(EventId(i as u32))))),
            )
            .chain(
                self.types()
                    .filter_map(|(id, t)| t.owner.map(|o| (o, MemberId::NestedType(id)))),
            );

        for (owner, member) in owned {
            if !self.type_def(owner)?.members.contains(&member) {
                return Err(AssemblerError::ownership(
                    self.member_name(member),
                    "owner back-pointer names a type whose member list does not contain it",
                ));
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // References
    // -------------------------------------------------------------------------

    pub fn type_ref(&self, id: TypeId) -> Result<TypeRef> {
        let def = self.type_def(id)?;
        let mut data = match def.kind {
            TypeKind::Class => TypeRefData::class(&self.module_name, &def.namespace, &def.name),
            TypeKind::ValueType => {
                TypeRefData::value_type(&self.module_name, &def.namespace, &def.name)
            }
            TypeKind::Interface => {
                TypeRefData::interface(&self.module_name, &def.namespace, &def.name)
            }
        };
        if def.is_abstract {
            data = data.abstract_type();
        }
        if def.kind == TypeKind::Class && self.find_method(id, ".ctor", &MethodSig::instance(TypeSig::void(), vec![])).is_none() {
            data = data.without_default_ctor();
        }
        data.generic_params = def.generic_params.clone();
        data.definition = Some(id);
        Ok(data.into_ref())
    }

    /// Signature used to refer to `id` from inside itself: generic types are
    /// instantiated over their own parameters.
    pub fn type_sig(&self, id: TypeId) -> Result<TypeSig> {
        let ty = self.type_ref(id)?;
        if ty.is_generic() {
            let args = ty.generic_params.iter().map(GenericParam::as_sig).collect();
            Ok(TypeSig::GenericInst { generic: ty, args })
        } else {
            Ok(TypeSig::Named(ty))
        }
    }

    pub fn method_ref(&self, id: MethodId) -> Result<MethodRef> {
        let def = self.method(id)?;
        let owner = def.owner.ok_or_else(|| {
            AssemblerError::ownership(&def.name, "cannot reference a method with no declaring type")
        })?;
        Ok(MethodRefData {
            declaring: self.type_sig(owner)?,
            name: def.name.clone(),
            sig: def.sig.clone(),
            generic_params: def.generic_params.clone(),
            generic_args: Vec::new(),
            definition: Some(id),
        }
        .into())
    }

    pub fn field_ref(&self, id: FieldId) -> Result<FieldRef> {
        let def = self.field(id)?;
        let owner = def.owner.ok_or_else(|| {
            AssemblerError::ownership(&def.name, "cannot reference a field with no declaring type")
        })?;
        Ok(FieldRefData {
            declaring: self.type_sig(owner)?,
            name: def.name.clone(),
            field_type: def.field_type.clone(),
            is_static: def.is_static,
            definition: Some(id),
        }
        .into())
    }

    // -------------------------------------------------------------------------
    // Lookups
    // -------------------------------------------------------------------------

    pub fn find_method(&self, ty: TypeId, name: &str, sig: &MethodSig) -> Option<MethodId> {
        self.types.get(ty.index())?.members.iter().find_map(|m| match m {
            MemberId::Method(id) => {
                let def = self.methods.get(id.index())?;
                (def.name == name && def.sig.structurally_eq(sig)).then_some(*id)
            }
            _ => None,
        })
    }

    pub fn find_field(&self, ty: TypeId, name: &str) -> Option<FieldId> {
        self.types.get(ty.index())?.members.iter().find_map(|m| match m {
            MemberId::Field(id) => (self.fields.get(id.index())?.name == name).then_some(*id),
            _ => None,
        })
    }

    pub fn find_nested_type(&self, ty: TypeId, name: &str) -> Option<TypeId> {
        self.types.get(ty.index())?.members.iter().find_map(|m| match m {
            MemberId::NestedType(id) => (self.types.get(id.index())?.name == name).then_some(*id),
            _ => None,
        })
    }

    pub fn property_getter(&self, id: PropertyId) -> Option<MethodId> {
        self.properties.get(id.index())?.getter
    }

    pub fn property_setter(&self, id: PropertyId) -> Option<MethodId> {
        self.properties.get(id.index())?.setter
    }

    pub fn event_adder(&self, id: EventId) -> Option<MethodId> {
        self.events.get(id.index())?.adder
    }

    pub fn event_remover(&self, id: EventId) -> Option<MethodId> {
        self.events.get(id.index())?.remover
    }

    /// Base types and interfaces of a locally defined type.
    fn supertypes(&self, sig: &TypeSig) -> Vec<TypeSig> {
        let Some(id) = sig.head().and_then(|h| h.definition) else {
            return Vec::new();
        };
        let Some(def) = self.types.get(id.index()) else {
            return Vec::new();
        };
        let args = match sig {
            TypeSig::GenericInst { args, .. } => args.as_slice(),
            _ => &[],
        };
        def.base
            .iter()
            .chain(&def.interfaces)
            .map(|s| s.substitute(args, &[]))
            .collect()
    }

    // -------------------------------------------------------------------------
    // Finalization
    // -------------------------------------------------------------------------

    /// Finalize the body of `id`, tagging any defect with the method's name.
    pub fn finalize_method(&mut self, id: MethodId, options: &FinalizeOptions) -> Result<Option<u16>> {
        let name = self.member_name(MemberId::Method(id));
        let def = self.method_mut(id)?;
        match def.body.as_mut() {
            Some(body) => finalize_with(body, options)
                .map(Some)
                .map_err(|e| e.in_method(name)),
            None => Ok(None),
        }
    }

    /// Finalize every body that has not been finalized yet.
    pub fn finalize_all(&mut self, options: &FinalizeOptions) -> Result<()> {
        for i in 0..self.methods.len() {
            let pending = self.methods[i]
                .body
                .as_ref()
                .is_some_and(|b| !b.is_finalized());
            if pending {
                self.finalize_method(MethodId(i as u32), options)?;
            }
        }
        Ok(())
    }
}

impl TypeResolver for Registry {
    fn is_assignable_to(&self, from: &TypeSig, to: &TypeSig) -> bool {
        if from == to {
            return true;
        }
        if matches!(to, TypeSig::Primitive(PrimitiveType::Object)) {
            return from.is_reference_type() != Some(false);
        }

        let mut pending = self.supertypes(from);
        let mut seen: Vec<TypeSig> = Vec::new();
        while let Some(next) = pending.pop() {
            if &next == to {
                return true;
            }
            if seen.contains(&next) {
                continue;
            }
            pending.extend(self.supertypes(&next));
            seen.push(next);
        }
        false
    }

    fn has_default_ctor(&self, ty: &TypeSig) -> Option<bool> {
        let local = ty
            .head()
            .and_then(|h| h.definition)
            .and_then(|id| Some((id, self.types.get(id.index())?)));
        match local {
            Some((id, def)) => Some(
                def.kind == TypeKind::ValueType
                    || (!def.is_abstract
                        && self
                            .find_method(id, ".ctor", &MethodSig::instance(TypeSig::void(), vec![]))
                            .is_some()),
            ),
            None => generics::has_default_ctor(ty),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::generics::{GenericInstance, GenericOwner};

    fn registry_with_two_types() -> (Registry, TypeId, TypeId) {
        let mut registry = Registry::new("Hooks");
        let a = registry.define_type(TypeDefinition::class("Hooks", "A", Some(TypeSig::object())));
        let b = registry.define_type(TypeDefinition::class("Hooks", "B", Some(TypeSig::object())));
        (registry, a, b)
    }

    fn static_method(name: &str) -> MethodDefinition {
        MethodDefinition::new(
            name,
            MethodSig::new(TypeSig::void(), vec![]),
            MethodAttributes {
                is_static: true,
                ..MethodAttributes::default()
            },
        )
    }

    #[test]
    fn test_add_field_to_second_type_transfers_ownership() {
        let (mut registry, a, b) = registry_with_two_types();
        let field = registry.define_field(FieldDefinition::new("count", PrimitiveType::I4.into(), false));

        registry.add_member(a, MemberId::Field(field)).unwrap();
        registry.add_member(b, MemberId::Field(field)).unwrap();

        assert!(!registry.type_def(a).unwrap().members().contains(&MemberId::Field(field)));
        assert_eq!(registry.type_def(b).unwrap().members(), &[MemberId::Field(field)]);
        assert_eq!(registry.field(field).unwrap().owner(), Some(b));
        registry.check_consistency().unwrap();
    }

    #[test]
    fn test_add_twice_to_same_type_is_noop() {
        let (mut registry, a, _) = registry_with_two_types();
        let m = registry.define_method(static_method("Run"));

        registry.add_member(a, MemberId::Method(m)).unwrap();
        registry.add_member(a, MemberId::Method(m)).unwrap();

        assert_eq!(registry.type_def(a).unwrap().members().len(), 1);
    }

    #[test]
    fn test_remove_from_non_owner_fails() {
        let (mut registry, a, b) = registry_with_two_types();
        let m = registry.define_method(static_method("Run"));
        registry.add_member(a, MemberId::Method(m)).unwrap();

        let err = registry.remove_member(b, MemberId::Method(m)).unwrap_err();
        assert!(matches!(err, AssemblerError::Ownership { .. }));
        assert_eq!(registry.method(m).unwrap().owner(), Some(a));

        let detached = registry.define_method(static_method("Loose"));
        assert!(registry.remove_member(a, MemberId::Method(detached)).is_err());
    }

    #[test]
    fn test_remove_clears_owner() {
        let (mut registry, a, _) = registry_with_two_types();
        let m = registry.define_method(static_method("Run"));
        registry.add_member(a, MemberId::Method(m)).unwrap();
        registry.remove_member(a, MemberId::Method(m)).unwrap();

        assert!(registry.type_def(a).unwrap().members().is_empty());
        assert_eq!(registry.method(m).unwrap().owner(), None);
        assert!(registry.method_ref(m).is_err());
    }

    #[test]
    fn test_property_accessors_follow_property() {
        let (mut registry, a, b) = registry_with_two_types();
        let getter = registry.define_method(static_method("get_Value"));
        let setter = registry.define_method(static_method("set_Value"));
        let mut prop = PropertyDefinition::new("Value", PrimitiveType::I4.into());
        prop.getter = Some(getter);
        prop.setter = Some(setter);
        let prop = registry.define_property(prop);

        registry.add_member(a, MemberId::Property(prop)).unwrap();
        assert_eq!(registry.type_def(a).unwrap().members().len(), 3);
        assert_eq!(registry.method(getter).unwrap().owner(), Some(a));

        registry.add_member(b, MemberId::Property(prop)).unwrap();
        assert!(registry.type_def(a).unwrap().members().is_empty());
        assert_eq!(registry.method(setter).unwrap().owner(), Some(b));

        registry.remove_member(b, MemberId::Property(prop)).unwrap();
        assert!(registry.type_def(b).unwrap().members().is_empty());
        assert_eq!(registry.method(getter).unwrap().owner(), None);
        registry.check_consistency().unwrap();
    }

    #[test]
    fn test_missing_getter_is_none() {
        let mut registry = Registry::new("Hooks");
        let prop = registry.define_property(PropertyDefinition::new("Only", TypeSig::object()));
        assert_eq!(registry.property_getter(prop), None);
        assert_eq!(registry.property_getter(PropertyId(42)), None);
    }

    #[test]
    fn test_find_method_uses_structural_signature() {
        let (mut registry, a, _) = registry_with_two_types();
        let sig = MethodSig::new(PrimitiveType::I4.into(), vec![TypeSig::object()]);
        let m = registry.define_method(MethodDefinition::new(
            "Run",
            sig.clone(),
            MethodAttributes::default(),
        ));
        registry.add_member(a, MemberId::Method(m)).unwrap();

        assert_eq!(registry.find_method(a, "Run", &sig), Some(m));
        let other = MethodSig::new(TypeSig::void(), vec![TypeSig::object()]);
        assert_eq!(registry.find_method(a, "Run", &other), None);
    }

    #[test]
    fn test_nested_type_ownership() {
        let (mut registry, a, b) = registry_with_two_types();
        assert!(registry.add_member(a, MemberId::NestedType(a)).is_err());

        registry.add_member(a, MemberId::NestedType(b)).unwrap();
        assert_eq!(registry.type_def(b).unwrap().owner(), Some(a));
        assert_eq!(registry.find_nested_type(a, "B"), Some(b));
        registry.check_consistency().unwrap();
    }

    #[test]
    fn test_nesting_under_descendant_rejected() {
        let (mut registry, a, b) = registry_with_two_types();
        let c = registry.define_type(TypeDefinition::class("", "C", Some(TypeSig::object())));
        registry.add_member(a, MemberId::NestedType(b)).unwrap();
        registry.add_member(b, MemberId::NestedType(c)).unwrap();

        let err = registry.add_member(c, MemberId::NestedType(a)).unwrap_err();
        assert!(err.to_string().contains("its own nested type"));
        assert_eq!(registry.type_def(a).unwrap().owner(), None);
        assert!(registry.type_def(c).unwrap().members().is_empty());
        registry.check_consistency().unwrap();
    }

    #[test]
    fn test_method_ref_of_generic_owner_is_open_instantiation() {
        let mut registry = Registry::new("Hooks");
        let mut def = TypeDefinition::class("Hooks", "Box`1", Some(TypeSig::object()));
        def.generic_params = vec![GenericParam::new("T", 0, GenericOwner::Type)];
        let ty = registry.define_type(def);
        let m = registry.define_method(static_method("Run"));
        registry.add_member(ty, MemberId::Method(m)).unwrap();

        let r = registry.method_ref(m).unwrap();
        assert!(matches!(&r.declaring, TypeSig::GenericInst { args, .. } if args == &vec![TypeSig::Var(0)]));
        assert_eq!(r.definition, Some(m));
    }

    #[test]
    fn test_registry_resolves_base_chain() {
        let mut registry = Registry::new("Game");
        let entity = registry.define_type(TypeDefinition::class("Game", "Entity", Some(TypeSig::object())));
        let entity_sig = registry.type_sig(entity).unwrap();
        let player = registry.define_type(TypeDefinition::class("Game", "Player", Some(entity_sig.clone())));
        let player_sig = registry.type_sig(player).unwrap();

        assert!(registry.is_assignable_to(&player_sig, &entity_sig));
        assert!(!registry.is_assignable_to(&entity_sig, &player_sig));
        assert!(registry.is_assignable_to(&player_sig, &TypeSig::object()));

        let store = TypeRefData::class("Game", "Game", "Store`1")
            .with_generic_params(vec![
                GenericParam::new("T", 0, GenericOwner::Type).constrained_to(entity_sig),
            ])
            .into_ref();
        assert!(GenericInstance::new(&store, vec![player_sig], &registry).is_ok());
    }

    #[test]
    fn test_type_identity_survives_added_ctor() {
        let mut registry = Registry::new("Game");
        let entity = registry.define_type(TypeDefinition::class("Game", "Entity", Some(TypeSig::object())));
        let before = registry.type_sig(entity).unwrap();
        let player = registry.define_type(TypeDefinition::class("Game", "Player", Some(before.clone())));

        let ctor = registry.define_method(MethodDefinition::new(
            ".ctor",
            MethodSig::instance(TypeSig::void(), vec![]),
            MethodAttributes {
                is_public: true,
                is_special_name: true,
                is_rt_special_name: true,
                ..MethodAttributes::default()
            },
        ));
        registry.add_member(entity, MemberId::Method(ctor)).unwrap();
        let after = registry.type_sig(entity).unwrap();

        assert_eq!(before, after);
        let player_sig = registry.type_sig(player).unwrap();
        assert!(registry.is_assignable_to(&player_sig, &after));

        let takes_before = MethodSig::new(TypeSig::void(), vec![before]);
        let takes_after = MethodSig::new(TypeSig::void(), vec![after.clone()]);
        assert!(takes_before.structurally_eq(&takes_after));

        // new() is judged on the definition as it is now
        let factory = TypeRefData::class("Game", "Game", "Factory`1")
            .with_generic_params(vec![GenericParam::new("T", 0, GenericOwner::Type).default_ctor()])
            .into_ref();
        assert!(GenericInstance::new(&factory, vec![after], &registry).is_ok());
        assert!(GenericInstance::new(&factory, vec![player_sig], &registry).is_err());
    }
}
