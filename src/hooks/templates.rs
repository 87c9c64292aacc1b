//! Code templates that turn hook descriptors into generated members.
//!
//! For every hook the generator adds, inside a static `<Type>Hooks` host:
//!
//! - a sealed delegate type deriving from `System.MulticastDelegate`,
//! - a private static field holding the subscribed handlers,
//! - a public static event whose accessors combine into that field,
//! - a static dispatch method calling the handlers when any are subscribed
//!   and the original member otherwise.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info, warn};

use crate::bytecode::body::MethodBody;
use crate::bytecode::op::{OpCode, VarAccess};
use crate::config::GeneratorConfig;
use crate::error::Result;
use crate::hooks::HookError;
use crate::hooks::manifest::{HookDescriptor, HookManifest, split_full_name};
use crate::metadata::import::{ForeignMethod, ForeignType, Importer};
use crate::metadata::reference::{FieldRef, MethodRef};
use crate::metadata::registry::{
    EventDefinition, EventId, FieldDefinition, FieldId, MemberId, MethodAttributes,
    MethodDefinition, MethodId, Registry, TypeDefinition, TypeId,
};
use crate::metadata::signature::{MethodSig, TypeSig};

/// Everything generated for one hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneratedHook {
    pub host: TypeId,
    pub delegate: TypeId,
    pub invoke: MethodId,
    pub field: FieldId,
    pub event: EventId,
    pub dispatch: MethodId,
}

/// Declaring type, target member name and resolved target signature.
type HookKey = (String, String, MethodSig);

pub struct HookGenerator<'c> {
    config: &'c GeneratorConfig,
    target_assembly: String,
    importer: Importer,
    registry: Registry,
    hosts: HashMap<String, TypeId>,
    seen: HashSet<HookKey>,
    names: HashMap<(TypeId, String), u32>,
}

impl<'c> HookGenerator<'c> {
    pub fn new(config: &'c GeneratorConfig, target_assembly: &str) -> Self {
        Self {
            config,
            target_assembly: target_assembly.to_string(),
            importer: Importer::new(config.flavor),
            registry: Registry::new(&config.module_name_for(target_assembly)),
            hosts: HashMap::new(),
            seen: HashSet::new(),
            names: HashMap::new(),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn importer(&self) -> &Importer {
        &self.importer
    }

    /// Generate members for `hook`. A descriptor repeating an earlier one is
    /// skipped and yields `None`.
    pub fn add_hook(&mut self, hook: &HookDescriptor) -> std::result::Result<Option<GeneratedHook>, HookError> {
        let assembly = self.target_assembly.clone();
        let target_sig = hook.target_sig(&assembly, &mut self.importer)?;
        let key = (hook.declaring_type.clone(), hook.target_name(), target_sig.clone());
        if !self.seen.insert(key) {
            warn!(ty = %hook.declaring_type, member = %hook.target_name(), sig = %target_sig, "skipping duplicate hook");
            return Ok(None);
        }

        let declaring = hook.declaring(&assembly, &mut self.importer)?;
        let original = self.original_member(hook, &target_sig);

        let receiver = match (target_sig.has_this, hook.value_type_declaring) {
            (false, _) => None,
            (true, true) => Some(TypeSig::by_ref(declaring)),
            (true, false) => Some(declaring),
        };
        let params: Vec<TypeSig> = receiver
            .into_iter()
            .chain(target_sig.params.iter().cloned())
            .collect();
        let dispatch_sig = MethodSig::new(target_sig.ret.clone(), params.clone());

        let host = self.host_for(&hook.declaring_type)?;
        let name = self.unique_name(host, &hook.hook_name());

        let (delegate, invoke) = self.delegate_type(host, &name, &dispatch_sig)?;
        let handler_type = self.registry.type_sig(delegate)?;

        let field = self
            .registry
            .define_field(FieldDefinition::new(&format!("s_{}", name), handler_type.clone(), true));
        self.registry.add_member(host, MemberId::Field(field))?;
        let field_ref = self.registry.field_ref(field)?;

        let event = self.event(host, &name, &handler_type, &field_ref)?;

        let invoke_ref = self.registry.method_ref(invoke)?;
        let call = if target_sig.has_this && !hook.value_type_declaring {
            OpCode::Callvirt
        } else {
            OpCode::Call
        };
        let body = dispatch_body(&dispatch_sig, &field_ref, &handler_type, &invoke_ref, &original, call)?;
        let dispatch = self.registry.define_method(
            MethodDefinition::new(
                &format!("Dispatch{}", name),
                dispatch_sig,
                MethodAttributes {
                    is_public: true,
                    is_static: true,
                    is_hide_by_sig: true,
                    ..MethodAttributes::default()
                },
            )
            .with_body(body),
        );
        self.registry.add_member(host, MemberId::Method(dispatch))?;

        debug!(hook = %name, host = host.0, "generated hook");
        Ok(Some(GeneratedHook {
            host,
            delegate,
            invoke,
            field,
            event,
            dispatch,
        }))
    }

    /// Finalize every generated body and hand back the finished registry.
    pub fn finish(mut self) -> Result<Registry> {
        self.registry.finalize_all(&self.config.finalize_options())?;
        self.registry.check_consistency()?;
        info!(
            module = %self.registry.module_name,
            hosts = self.hosts.len(),
            hooks = self.seen.len(),
            imported = self.importer.len(),
            "generation finished"
        );
        Ok(self.registry)
    }

    fn original_member(&mut self, hook: &HookDescriptor, sig: &MethodSig) -> MethodRef {
        let (namespace, name) = split_full_name(&hook.declaring_type);
        let declaring = if hook.value_type_declaring {
            ForeignType::value_type(&self.target_assembly, namespace, name)
        } else {
            ForeignType::class(&self.target_assembly, namespace, name)
        };
        self.importer.import_method(&ForeignMethod {
            declaring,
            name: hook.target_name(),
            sig: sig.clone(),
            generic_params: Vec::new(),
        })
    }

    fn host_for(&mut self, declaring_type: &str) -> Result<TypeId> {
        if let Some(host) = self.hosts.get(declaring_type) {
            return Ok(*host);
        }
        let (_, short) = split_full_name(declaring_type);
        let host = self.registry.define_type(TypeDefinition::static_class(
            &self.config.namespace,
            &format!("{}Hooks", short),
            TypeSig::object(),
        ));
        self.hosts.insert(declaring_type.to_string(), host);
        Ok(host)
    }

    /// `name`, or `name_N` when an earlier hook on the same host took it.
    fn unique_name(&mut self, host: TypeId, name: &str) -> String {
        let count = self.names.entry((host, name.to_string())).or_insert(0);
        let unique = if *count == 0 {
            name.to_string()
        } else {
            format!("{}_{}", name, count)
        };
        *count += 1;
        unique
    }

    fn delegate_type(&mut self, host: TypeId, name: &str, sig: &MethodSig) -> Result<(TypeId, MethodId)> {
        let base = TypeSig::Named(self.importer.multicast_delegate_type());
        let mut def = TypeDefinition::class("", &format!("{}Handler", name), Some(base));
        def.is_sealed = true;
        let delegate = self.registry.define_type(def);
        self.registry.add_member(host, MemberId::NestedType(delegate))?;

        let runtime = MethodAttributes {
            is_public: true,
            is_hide_by_sig: true,
            is_runtime_impl: true,
            ..MethodAttributes::default()
        };
        let ctor = self.registry.define_method(
            MethodDefinition::new(
                ".ctor",
                MethodSig::instance(
                    TypeSig::void(),
                    vec![self.importer.object(), self.importer.native_int()],
                ),
                MethodAttributes {
                    is_special_name: true,
                    is_rt_special_name: true,
                    ..runtime
                },
            )
            .with_param_names(vec!["object".to_string(), "method".to_string()]),
        );
        self.registry.add_member(delegate, MemberId::Method(ctor))?;

        let invoke = self.registry.define_method(MethodDefinition::new(
            "Invoke",
            MethodSig::instance(sig.ret.clone(), sig.params.clone()),
            MethodAttributes {
                is_virtual: true,
                ..runtime
            },
        ));
        self.registry.add_member(delegate, MemberId::Method(invoke))?;
        Ok((delegate, invoke))
    }

    fn event(&mut self, host: TypeId, name: &str, handler_type: &TypeSig, field: &FieldRef) -> Result<EventId> {
        let accessor = |method: &str| {
            MethodDefinition::new(
                &format!("{}_On{}", method, name),
                MethodSig::new(TypeSig::void(), vec![handler_type.clone()]),
                MethodAttributes {
                    is_public: true,
                    is_static: true,
                    is_hide_by_sig: true,
                    is_special_name: true,
                    ..MethodAttributes::default()
                },
            )
            .with_param_names(vec!["value".to_string()])
        };

        let combine = self.importer.delegate_method("Combine");
        let remove = self.importer.delegate_method("Remove");

        let adder = accessor("add").with_body(accessor_body(field, handler_type, &combine)?);
        let remover = accessor("remove").with_body(accessor_body(field, handler_type, &remove)?);
        let adder = self.registry.define_method(adder);
        let remover = self.registry.define_method(remover);

        let mut event = EventDefinition::new(&format!("On{}", name), handler_type.clone());
        event.adder = Some(adder);
        event.remover = Some(remover);
        let event = self.registry.define_event(event);
        self.registry.add_member(host, MemberId::Event(event))?;
        Ok(event)
    }
}

/// `field = (Handler)Delegate.Combine(field, value)`, or `Remove`.
fn accessor_body(field: &FieldRef, handler_type: &TypeSig, op: &MethodRef) -> Result<MethodBody> {
    let mut body = MethodBody::new(&MethodSig::new(TypeSig::void(), vec![handler_type.clone()]))?;
    body.emit_field(OpCode::Ldsfld, field)?;
    body.emit_arg(VarAccess::Load, 0)?;
    body.emit_method(OpCode::Call, op)?;
    body.emit_type(OpCode::Castclass, handler_type.clone())?;
    body.emit_field(OpCode::Stsfld, field)?;
    body.emit(OpCode::Ret)?;
    Ok(body)
}

fn dispatch_body(
    sig: &MethodSig,
    field: &FieldRef,
    handler_type: &TypeSig,
    invoke: &MethodRef,
    original: &MethodRef,
    call: OpCode,
) -> Result<MethodBody> {
    let mut body = MethodBody::new(sig)?;
    let args = body.arg_count();
    let handler = body.new_local(handler_type.clone(), "handler")?;
    let call_original = body.placeholder()?;

    body.emit_field(OpCode::Ldsfld, field)?;
    body.emit_local(VarAccess::Store, handler)?;
    body.emit_local(VarAccess::Load, handler)?;
    body.emit_branch(OpCode::Brfalse, call_original)?;

    body.emit_local(VarAccess::Load, handler)?;
    body.load_args(0, args)?;
    body.emit_method(OpCode::Callvirt, invoke)?;
    body.emit(OpCode::Ret)?;

    body.emit_label(call_original)?;
    body.load_args(0, args)?;
    body.emit_method(call, original)?;
    body.emit(OpCode::Ret)?;
    Ok(body)
}

/// Run every hook of `manifest` through the templates.
pub fn generate(manifest: &HookManifest, config: &GeneratorConfig) -> std::result::Result<Registry, HookError> {
    info!(
        target_assembly = %manifest.target_assembly,
        hooks = manifest.hooks.len(),
        flavor = ?config.flavor,
        "generating hooks"
    );
    let mut generator = HookGenerator::new(config, &manifest.target_assembly);
    for hook in &manifest.hooks {
        generator.add_hook(hook)?;
    }
    Ok(generator.finish()?)
}
