//! Hook descriptors.
//!
//! Which members of the target program get hooks is decided elsewhere; this
//! module only reads the resulting list. Type names use a small IL-like
//! syntax: primitive keywords (`int32`, `string`, ...), `Ns.Name` for classes
//! of the target assembly, `valuetype Ns.Name` for structs, an optional
//! `[Assembly]` scope prefix, and `[]` / `&` suffixes.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::metadata::import::{ForeignType, Importer};
use crate::metadata::signature::{MethodSig, PrimitiveType, TypeSig};

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid manifest: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid type name '{name}': {reason}")]
    TypeName { name: String, reason: &'static str },

    #[error("hook {index} has an empty {field}")]
    MissingField { index: usize, field: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookKind {
    Method,
    /// Property getter; `member` names the property.
    Getter,
    /// Property setter; `member` names the property.
    Setter,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HookDescriptor {
    /// Full name of the declaring type, `Ns.Name`.
    pub declaring_type: String,
    pub member: String,
    #[serde(default = "default_kind")]
    pub kind: HookKind,
    #[serde(default)]
    pub is_static: bool,
    /// Declaring type is a struct; the receiver is passed by reference.
    #[serde(default)]
    pub value_type_declaring: bool,
    #[serde(default)]
    pub parameters: Vec<String>,
    #[serde(default = "default_returns")]
    pub returns: String,
}

fn default_kind() -> HookKind {
    HookKind::Method
}

fn default_returns() -> String {
    "void".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookManifest {
    /// Assembly the hooked members live in.
    pub target_assembly: String,
    pub hooks: Vec<HookDescriptor>,
}

impl HookManifest {
    pub fn from_json(text: &str) -> Result<Self, ManifestError> {
        let manifest: HookManifest = serde_json::from_str(text)?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    fn validate(&self) -> Result<(), ManifestError> {
        for (index, hook) in self.hooks.iter().enumerate() {
            if hook.declaring_type.trim().is_empty() {
                return Err(ManifestError::MissingField {
                    index,
                    field: "declaring_type",
                });
            }
            if hook.member.trim().is_empty() {
                return Err(ManifestError::MissingField {
                    index,
                    field: "member",
                });
            }
        }
        Ok(())
    }
}

/// Split `Ns.Name` at the last dot.
pub fn split_full_name(full: &str) -> (&str, &str) {
    match full.rfind('.') {
        Some(dot) => (&full[..dot], &full[dot + 1..]),
        None => ("", full),
    }
}

/// Parse a manifest type name, importing named types through `importer`.
pub fn parse_type(
    name: &str,
    default_assembly: &str,
    importer: &mut Importer,
) -> Result<TypeSig, ManifestError> {
    let trimmed = name.trim();
    let invalid = |reason| ManifestError::TypeName {
        name: name.to_string(),
        reason,
    };

    if trimmed.is_empty() {
        return Err(invalid("empty"));
    }
    if let Some(inner) = trimmed.strip_suffix("[]") {
        return Ok(TypeSig::array_of(parse_type(inner, default_assembly, importer)?));
    }
    if let Some(inner) = trimmed.strip_suffix('&') {
        return Ok(TypeSig::by_ref(parse_type(inner, default_assembly, importer)?));
    }
    if let Some(p) = PrimitiveType::from_keyword(trimmed) {
        return Ok(TypeSig::Primitive(p));
    }

    let (is_value_type, rest) = match trimmed.strip_prefix("valuetype ") {
        Some(rest) => (true, rest.trim_start()),
        None => (false, trimmed),
    };
    let (assembly, full) = match rest.strip_prefix('[') {
        Some(scoped) => {
            let close = scoped.find(']').ok_or_else(|| invalid("unterminated assembly scope"))?;
            (&scoped[..close], &scoped[close + 1..])
        }
        None => (default_assembly, rest),
    };
    if full.is_empty() || full.contains(char::is_whitespace) {
        return Err(invalid("expected Namespace.Name"));
    }

    let (namespace, type_name) = split_full_name(full);
    let foreign = if is_value_type {
        ForeignType::value_type(assembly, namespace, type_name)
    } else {
        ForeignType::class(assembly, namespace, type_name)
    };
    Ok(TypeSig::Named(importer.import_type(&foreign)))
}

impl HookDescriptor {
    /// Name of the member the hook intercepts.
    pub fn target_name(&self) -> String {
        match self.kind {
            HookKind::Method => self.member.clone(),
            HookKind::Getter => format!("get_{}", self.member),
            HookKind::Setter => format!("set_{}", self.member),
        }
    }

    /// Name the generated members are derived from.
    pub fn hook_name(&self) -> String {
        match self.kind {
            HookKind::Method => self.member.clone(),
            HookKind::Getter => format!("Get{}", self.member),
            HookKind::Setter => format!("Set{}", self.member),
        }
    }

    pub fn declaring(&self, default_assembly: &str, importer: &mut Importer) -> Result<TypeSig, ManifestError> {
        let name = if self.value_type_declaring {
            format!("valuetype {}", self.declaring_type)
        } else {
            self.declaring_type.clone()
        };
        parse_type(&name, default_assembly, importer)
    }

    /// Signature of the intercepted member as declared.
    pub fn target_sig(&self, default_assembly: &str, importer: &mut Importer) -> Result<MethodSig, ManifestError> {
        let mut params = self
            .parameters
            .iter()
            .map(|p| parse_type(p, default_assembly, importer))
            .collect::<Result<Vec<_>, _>>()?;
        let mut ret = parse_type(&self.returns, default_assembly, importer)?;

        match self.kind {
            HookKind::Method => {}
            HookKind::Getter => params.clear(),
            HookKind::Setter => {
                params = vec![ret];
                ret = TypeSig::void();
            }
        }

        Ok(if self.is_static {
            MethodSig::new(ret, params)
        } else {
            MethodSig::instance(ret, params)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::import::RuntimeFlavor;
    use crate::metadata::reference::TypeKind;

    const MANIFEST: &str = r#"{
        "target_assembly": "Game",
        "hooks": [
            { "declaring_type": "Game.Player", "member": "TakeDamage",
              "parameters": ["int32", "Game.Weapon"], "returns": "bool" },
            { "declaring_type": "Game.Player", "member": "Health", "kind": "setter",
              "returns": "int32" },
            { "declaring_type": "Game.World", "member": "Tick", "is_static": true }
        ]
    }"#;

    #[test]
    fn test_parse_manifest_defaults() {
        let manifest = HookManifest::from_json(MANIFEST).unwrap();
        assert_eq!(manifest.target_assembly, "Game");
        assert_eq!(manifest.hooks.len(), 3);
        assert_eq!(manifest.hooks[2].kind, HookKind::Method);
        assert_eq!(manifest.hooks[2].returns, "void");
        assert!(manifest.hooks[2].is_static);
        assert_eq!(manifest.hooks[1].target_name(), "set_Health");
        assert_eq!(manifest.hooks[1].hook_name(), "SetHealth");
    }

    #[test]
    fn test_empty_member_rejected() {
        let err = HookManifest::from_json(
            r#"{ "target_assembly": "Game", "hooks": [ { "declaring_type": "Game.A", "member": " " } ] }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ManifestError::MissingField { index: 0, field: "member" }));
    }

    #[test]
    fn test_parse_type_names() {
        let mut importer = Importer::new(RuntimeFlavor::Framework);

        assert_eq!(parse_type("int32", "Game", &mut importer).unwrap(), PrimitiveType::I4.into());
        assert!(matches!(
            parse_type("string[]", "Game", &mut importer).unwrap(),
            TypeSig::SzArray(_)
        ));

        let TypeSig::Named(weapon) = parse_type("Game.Weapon", "Game", &mut importer).unwrap() else {
            panic!("expected named type");
        };
        assert_eq!(weapon.scope, "Game");
        assert_eq!(weapon.namespace, "Game");
        assert_eq!(weapon.name, "Weapon");

        let TypeSig::Named(vec) = parse_type("valuetype [UnityEngine]UnityEngine.Vector3", "Game", &mut importer).unwrap() else {
            panic!("expected named type");
        };
        assert_eq!(vec.scope, "UnityEngine");
        assert_eq!(vec.kind, TypeKind::ValueType);

        assert!(parse_type("[Broken", "Game", &mut importer).is_err());
        assert!(parse_type("", "Game", &mut importer).is_err());
    }

    #[test]
    fn test_target_signatures() {
        let manifest = HookManifest::from_json(MANIFEST).unwrap();
        let mut importer = Importer::new(RuntimeFlavor::Framework);

        let take_damage = manifest.hooks[0].target_sig("Game", &mut importer).unwrap();
        assert!(take_damage.has_this);
        assert_eq!(take_damage.params.len(), 2);
        assert_eq!(take_damage.ret, PrimitiveType::Boolean.into());

        let setter = manifest.hooks[1].target_sig("Game", &mut importer).unwrap();
        assert_eq!(setter.params, vec![PrimitiveType::I4.into()]);
        assert!(setter.ret.is_void());

        let tick = manifest.hooks[2].target_sig("Game", &mut importer).unwrap();
        assert!(!tick.has_this);
    }
}
