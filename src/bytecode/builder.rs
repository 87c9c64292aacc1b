//! Instruction stream construction.
//!
//! Every append goes through [`MethodBody::create`], which checks the
//! operand against the opcode and picks the most compact encoding for
//! constants and variable accesses. Branches are always stored in their long
//! form; shrinking them is a finalize-time pass.

use crate::bytecode::body::{ExceptionRegion, MethodBody};
use crate::bytecode::ir::{InstrId, Instruction, Label, LocalId, Operand, Token};
use crate::bytecode::op::{OpCode, VarAccess, VarSlot};
use crate::error::{AssemblerError, Result};
use crate::metadata::reference::{FieldRef, MethodRef};
use crate::metadata::signature::{MethodSig, TypeSig};

impl MethodBody {
    fn ensure_open(&self) -> Result<()> {
        if self.is_finalized() {
            Err(AssemblerError::BodyFinalized)
        } else {
            Ok(())
        }
    }

    fn check_label(&self, label: Label) -> Result<InstrId> {
        if label.stream != self.stream || label.id.index() >= self.instrs.len() {
            return Err(AssemblerError::ForeignLabel { label: label.id.0 });
        }
        Ok(label.id)
    }

    fn argument_out_of_range(&self, slot: u32) -> AssemblerError {
        AssemblerError::ArgumentOutOfRange {
            index: self.order.len(),
            slot,
            count: u32::from(self.arg_count()),
        }
    }

    /// Compact opcode for `opcode` given its operand and the current local
    /// indices.
    fn pick_encoding(&self, opcode: OpCode, operand: &Operand) -> OpCode {
        match operand {
            Operand::Int32(v) if opcode.is_ldc_i4() => OpCode::ldc_i4(*v),
            Operand::Local(id) => match opcode.variable_form() {
                Some((slot, access)) => OpCode::variable(slot, access, self.locals.index_of(*id)),
                None => opcode,
            },
            Operand::Param(slot) => match opcode.variable_form() {
                Some((kind, access)) => OpCode::variable(kind, access, Some(*slot)),
                None => opcode,
            },
            Operand::Branch(_) => opcode.long_branch(),
            _ => opcode,
        }
    }

    /// Create an instruction without placing it. The returned label can be
    /// used as a branch target before [`MethodBody::emit_label`] places it.
    pub fn create(&mut self, opcode: OpCode, operand: Operand) -> Result<Label> {
        self.ensure_open()?;

        let expected = opcode.operand_kind();
        let found = operand.kind();
        if expected != found {
            return Err(AssemblerError::operand_mismatch(
                opcode.name(),
                expected.describe(),
                found.describe(),
            ));
        }

        match &operand {
            Operand::Branch(t) => {
                self.check_label(Label {
                    stream: self.stream,
                    id: *t,
                })?;
            }
            Operand::Switch(ts) => {
                for t in ts {
                    self.check_label(Label {
                        stream: self.stream,
                        id: *t,
                    })?;
                }
            }
            Operand::Param(slot) if *slot >= self.arg_count() => {
                return Err(self.argument_out_of_range(u32::from(*slot)));
            }
            Operand::Local(id) if !self.locals.is_declared(*id) => {
                return Err(AssemblerError::UnregisteredLocal {
                    index: self.order.len(),
                    local: format!("V_{}", id.0),
                });
            }
            _ => {}
        }

        let opcode = self.pick_encoding(opcode, &operand);
        self.instrs.push(Instruction::new(opcode, operand));
        self.placed.push(false);
        Ok(Label {
            stream: self.stream,
            id: InstrId(self.instrs.len() as u32 - 1),
        })
    }

    /// A fresh unplaced placeholder bound to this stream.
    pub fn placeholder(&mut self) -> Result<Label> {
        self.create(OpCode::Placeholder, Operand::None)
    }

    /// Place a previously created instruction at the current position.
    pub fn emit_label(&mut self, label: Label) -> Result<Label> {
        self.ensure_open()?;
        let id = self.check_label(label)?;
        if self.placed[id.index()] {
            return Err(AssemblerError::AlreadyPlaced { label: id.0 });
        }
        self.placed[id.index()] = true;
        self.order.push(id);
        Ok(label)
    }

    pub fn emit_with(&mut self, opcode: OpCode, operand: Operand) -> Result<Label> {
        let label = self.create(opcode, operand)?;
        self.emit_label(label)
    }

    pub fn emit(&mut self, opcode: OpCode) -> Result<Label> {
        self.emit_with(opcode, Operand::None)
    }

    // -------------------------------------------------------------------------
    // Constants
    // -------------------------------------------------------------------------

    pub fn emit_ldc_i4(&mut self, value: i32) -> Result<Label> {
        self.emit_with(OpCode::LdcI4, Operand::Int32(value))
    }

    pub fn emit_ldc_i8(&mut self, value: i64) -> Result<Label> {
        self.emit_with(OpCode::LdcI8, Operand::Int64(value))
    }

    pub fn emit_ldc_r4(&mut self, value: f32) -> Result<Label> {
        self.emit_with(OpCode::LdcR4, Operand::Float32(value))
    }

    pub fn emit_ldc_r8(&mut self, value: f64) -> Result<Label> {
        self.emit_with(OpCode::LdcR8, Operand::Float64(value))
    }

    pub fn emit_ldstr(&mut self, value: &str) -> Result<Label> {
        self.emit_with(OpCode::Ldstr, Operand::String(value.to_string()))
    }

    // -------------------------------------------------------------------------
    // Variables
    // -------------------------------------------------------------------------

    pub fn emit_local(&mut self, access: VarAccess, local: LocalId) -> Result<Label> {
        let opcode = OpCode::variable(VarSlot::Local, access, None);
        self.emit_with(opcode, Operand::Local(local))
    }

    /// `slot` counts `this` as slot 0 on instance methods. Slots past the
    /// method's argument list are rejected.
    pub fn emit_arg(&mut self, access: VarAccess, slot: u16) -> Result<Label> {
        let opcode = OpCode::variable(VarSlot::Arg, access, None);
        self.emit_with(opcode, Operand::Param(slot))
    }

    /// Create a local handle. It gets an index once added to the variable set.
    pub fn declare_local(&mut self, ty: TypeSig, name: &str) -> LocalId {
        self.locals.declare(ty, name)
    }

    /// Register a declared local and re-pick every variable encoding.
    pub fn add_local(&mut self, local: LocalId) -> Result<u16> {
        self.ensure_open()?;
        if !self.locals.is_declared(local) {
            return Err(AssemblerError::UnregisteredLocal {
                index: self.order.len(),
                local: format!("V_{}", local.0),
            });
        }
        let index = self.locals.register(local);
        self.recanonicalize_locals();
        Ok(index)
    }

    /// Declare and register in one step.
    pub fn new_local(&mut self, ty: TypeSig, name: &str) -> Result<LocalId> {
        let local = self.declare_local(ty, name);
        self.add_local(local)?;
        Ok(local)
    }

    /// Replace the whole variable set. Indices follow the given order.
    pub fn set_locals(&mut self, locals: Vec<LocalId>) -> Result<()> {
        self.ensure_open()?;
        if let Some(bad) = locals.iter().find(|l| !self.locals.is_declared(**l)) {
            return Err(AssemblerError::UnregisteredLocal {
                index: self.order.len(),
                local: format!("V_{}", bad.0),
            });
        }
        self.locals.replace(locals);
        self.recanonicalize_locals();
        Ok(())
    }

    fn recanonicalize_locals(&mut self) {
        for i in 0..self.instrs.len() {
            if let Operand::Local(id) = self.instrs[i].operand {
                let opcode = self.instrs[i].opcode;
                if let Some((slot, access)) = opcode.variable_form() {
                    self.instrs[i].opcode =
                        OpCode::variable(slot, access, self.locals.index_of(id));
                }
            }
        }
    }

    /// Re-derive every compact encoding from final indices. Fails on an
    /// instruction whose local was never added to the variable set.
    pub fn canonicalize(&mut self) -> Result<()> {
        for (pos, id) in self.order.iter().enumerate() {
            let instr = &self.instrs[id.index()];
            if let Operand::Local(local) = instr.operand
                && self.locals.index_of(local).is_none()
            {
                let name = self
                    .locals
                    .get(local)
                    .map(|l| l.name.clone())
                    .unwrap_or_else(|| format!("V_{}", local.0));
                return Err(AssemblerError::UnregisteredLocal { index: pos, local: name });
            }
        }

        for i in 0..self.instrs.len() {
            let opcode = self.pick_encoding(self.instrs[i].opcode, &self.instrs[i].operand);
            // branch forms are owned by the compaction pass
            if !self.instrs[i].opcode.is_branch() {
                self.instrs[i].opcode = opcode;
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Branches
    // -------------------------------------------------------------------------

    pub fn emit_branch(&mut self, opcode: OpCode, target: Label) -> Result<Label> {
        let target = self.check_label(target)?;
        self.emit_with(opcode, Operand::Branch(target))
    }

    pub fn emit_switch(&mut self, targets: &[Label]) -> Result<Label> {
        let targets = targets
            .iter()
            .map(|t| self.check_label(*t))
            .collect::<Result<Vec<_>>>()?;
        self.emit_with(OpCode::Switch, Operand::Switch(targets))
    }

    // -------------------------------------------------------------------------
    // Members
    // -------------------------------------------------------------------------

    pub fn emit_method(&mut self, opcode: OpCode, method: &MethodRef) -> Result<Label> {
        self.emit_with(opcode, Operand::Method(method.clone()))
    }

    pub fn emit_field(&mut self, opcode: OpCode, field: &FieldRef) -> Result<Label> {
        self.emit_with(opcode, Operand::Field(field.clone()))
    }

    pub fn emit_type(&mut self, opcode: OpCode, ty: TypeSig) -> Result<Label> {
        self.emit_with(opcode, Operand::Type(ty))
    }

    pub fn emit_token(&mut self, token: Token) -> Result<Label> {
        self.emit_with(OpCode::Ldtoken, Operand::Token(token))
    }

    pub fn emit_calli(&mut self, sig: MethodSig) -> Result<Label> {
        self.emit_with(OpCode::Calli, Operand::Signature(sig))
    }

    // -------------------------------------------------------------------------
    // Regions
    // -------------------------------------------------------------------------

    pub fn add_region(&mut self, region: ExceptionRegion) -> Result<()> {
        self.ensure_open()?;
        for label in region.labels() {
            self.check_label(label)?;
        }
        self.regions.push(region);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Multi-instruction helpers
    // -------------------------------------------------------------------------

    /// Load `count` consecutive argument slots starting at `first`. Returns
    /// the first emitted instruction.
    pub fn load_args(&mut self, first: u16, count: u16) -> Result<Option<Label>> {
        let end = first
            .checked_add(count)
            .ok_or_else(|| self.argument_out_of_range(u32::from(first) + u32::from(count) - 1))?;
        let mut head = None;
        for slot in first..end {
            let label = self.emit_arg(VarAccess::Load, slot)?;
            head.get_or_insert(label);
        }
        Ok(head)
    }

    /// Push every element of the `object[]` held in `array`, converted to the
    /// matching entry of `element_types`. Returns the first emitted
    /// instruction.
    pub fn unpack_array(&mut self, array: LocalId, element_types: &[TypeSig]) -> Result<Option<Label>> {
        let mut head = None;
        for (i, ty) in element_types.iter().enumerate() {
            let label = self.emit_local(VarAccess::Load, array)?;
            head.get_or_insert(label);
            self.emit_ldc_i4(i as i32)?;
            self.emit(OpCode::LdelemRef)?;
            match ty.is_value_type() {
                Some(true) => {
                    self.emit_type(OpCode::UnboxAny, ty.clone())?;
                }
                _ if *ty == TypeSig::object() => {}
                _ => {
                    self.emit_type(OpCode::Castclass, ty.clone())?;
                }
            }
        }
        Ok(head)
    }

    /// Pack argument slots `first..first + count` into a fresh `object[]`
    /// stored in a new local. Returns the local and the first emitted
    /// instruction.
    pub fn pack_args(&mut self, first: u16, params: &[TypeSig]) -> Result<(LocalId, Label)> {
        let array = self.new_local(TypeSig::array_of(TypeSig::object()), "args")?;
        let head = self.emit_ldc_i4(params.len() as i32)?;
        self.emit_type(OpCode::Newarr, TypeSig::object())?;
        self.emit_local(VarAccess::Store, array)?;
        for (i, ty) in params.iter().enumerate() {
            self.emit_local(VarAccess::Load, array)?;
            self.emit_ldc_i4(i as i32)?;
            let slot = u16::try_from(i)
                .ok()
                .and_then(|i| first.checked_add(i))
                .ok_or_else(|| self.argument_out_of_range(u32::from(first) + i as u32))?;
            self.emit_arg(VarAccess::Load, slot)?;
            if ty.is_value_type() == Some(true) {
                self.emit_type(OpCode::Box, ty.clone())?;
            }
            self.emit(OpCode::StelemRef)?;
        }
        Ok((array, head))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::signature::PrimitiveType;

    fn body() -> MethodBody {
        MethodBody::new(&MethodSig::new(TypeSig::void(), vec![TypeSig::object(); 6])).unwrap()
    }

    fn opcodes(body: &MethodBody) -> Vec<OpCode> {
        body.instructions().map(|i| i.opcode).collect()
    }

    #[test]
    fn test_ldc_picks_compact_form() {
        let mut b = body();
        b.emit_ldc_i4(3).unwrap();
        b.emit_ldc_i4(-1).unwrap();
        b.emit_ldc_i4(100).unwrap();
        b.emit_ldc_i4(100_000).unwrap();
        b.emit_with(OpCode::LdcI4S, Operand::Int32(2)).unwrap();

        assert_eq!(
            opcodes(&b),
            vec![OpCode::LdcI4_3, OpCode::LdcI4M1, OpCode::LdcI4S, OpCode::LdcI4, OpCode::LdcI4_2]
        );
    }

    #[test]
    fn test_args_pick_compact_form() {
        let mut b = body();
        b.emit_arg(VarAccess::Load, 1).unwrap();
        b.emit_arg(VarAccess::Load, 5).unwrap();
        b.emit_arg(VarAccess::Store, 0).unwrap();
        assert_eq!(opcodes(&b), vec![OpCode::Ldarg1, OpCode::LdargS, OpCode::StargS]);
    }

    #[test]
    fn test_local_encoding_follows_registration() {
        let mut b = body();
        let x = b.declare_local(PrimitiveType::I4.into(), "x");
        let y = b.declare_local(PrimitiveType::I4.into(), "y");

        b.emit_local(VarAccess::Load, y).unwrap();
        assert_eq!(opcodes(&b), vec![OpCode::Ldloc]);

        b.add_local(x).unwrap();
        b.add_local(y).unwrap();
        assert_eq!(opcodes(&b), vec![OpCode::Ldloc1]);

        b.set_locals(vec![y, x]).unwrap();
        assert_eq!(opcodes(&b), vec![OpCode::Ldloc0]);
    }

    #[test]
    fn test_canonicalize_rejects_unregistered_local() {
        let mut b = body();
        b.emit(OpCode::Nop).unwrap();
        let x = b.declare_local(PrimitiveType::I4.into(), "x");
        b.emit_local(VarAccess::Store, x).unwrap();

        let err = b.canonicalize().unwrap_err();
        assert!(matches!(err, AssemblerError::UnregisteredLocal { index: 1, ref local } if local == "x"));
    }

    #[test]
    fn test_operand_mismatch() {
        let mut b = body();
        let err = b.emit_with(OpCode::Add, Operand::Int32(1)).unwrap_err();
        assert!(matches!(err, AssemblerError::OperandMismatch { .. }));
        assert!(err.to_string().contains("'add'"));
    }

    #[test]
    fn test_placeholder_is_not_placed_until_emitted() {
        let mut b = body();
        let label = b.placeholder().unwrap();
        assert!(b.is_empty());
        b.emit_label(label).unwrap();
        assert_eq!(b.len(), 1);

        let err = b.emit_label(label).unwrap_err();
        assert!(matches!(err, AssemblerError::AlreadyPlaced { .. }));
    }

    #[test]
    fn test_foreign_label_rejected() {
        let mut a = body();
        let mut b = body();
        let label = a.placeholder().unwrap();

        assert!(matches!(
            b.emit_branch(OpCode::Br, label),
            Err(AssemblerError::ForeignLabel { .. })
        ));
        assert!(matches!(b.emit_label(label), Err(AssemblerError::ForeignLabel { .. })));
    }

    #[test]
    fn test_branches_stored_long() {
        let mut b = body();
        let target = b.placeholder().unwrap();
        b.emit_branch(OpCode::BrS, target).unwrap();
        assert_eq!(opcodes(&b), vec![OpCode::Br]);
    }

    #[test]
    fn test_helpers_return_first_instruction() {
        let mut b = body();
        b.emit(OpCode::Nop).unwrap();
        let head = b.load_args(2, 3).unwrap().unwrap();
        assert_eq!(b.position_of(head.id()), Some(1));
        assert_eq!(
            opcodes(&b)[1..],
            [OpCode::Ldarg2, OpCode::Ldarg3, OpCode::LdargS]
        );
        assert_eq!(b.load_args(0, 0).unwrap(), None);

        let arr = b.new_local(TypeSig::array_of(TypeSig::object()), "arr").unwrap();
        let head = b
            .unpack_array(arr, &[PrimitiveType::I4.into(), TypeSig::object(), PrimitiveType::String.into()])
            .unwrap()
            .unwrap();
        assert_eq!(b.position_of(head.id()), Some(4));
        assert_eq!(
            opcodes(&b)[4..],
            [
                OpCode::Ldloc0,
                OpCode::LdcI4_0,
                OpCode::LdelemRef,
                OpCode::UnboxAny,
                OpCode::Ldloc0,
                OpCode::LdcI4_1,
                OpCode::LdelemRef,
                OpCode::Ldloc0,
                OpCode::LdcI4_2,
                OpCode::LdelemRef,
                OpCode::Castclass,
            ]
        );
    }

    #[test]
    fn test_arg_slot_checked_against_signature() {
        let mut b = body();
        b.emit_arg(VarAccess::Load, 5).unwrap();

        let err = b.emit_arg(VarAccess::Load, 6).unwrap_err();
        assert!(matches!(
            err,
            AssemblerError::ArgumentOutOfRange { index: 1, slot: 6, count: 6 }
        ));
        assert!(matches!(
            b.emit_with(OpCode::Starg, Operand::Param(40)),
            Err(AssemblerError::ArgumentOutOfRange { slot: 40, .. })
        ));
        assert_eq!(b.len(), 1);

        let mut inst = MethodBody::new(&MethodSig::instance(TypeSig::void(), vec![TypeSig::object()])).unwrap();
        inst.emit_arg(VarAccess::Load, 1).unwrap();
        assert!(inst.emit_arg(VarAccess::Load, 2).is_err());
    }

    #[test]
    fn test_arg_helpers_reject_wrapping_ranges() {
        let mut b = body();
        let err = b.load_args(u16::MAX, 2).unwrap_err();
        assert!(matches!(err, AssemblerError::ArgumentOutOfRange { slot: 65536, .. }));
        assert!(matches!(
            b.load_args(4, 3),
            Err(AssemblerError::ArgumentOutOfRange { slot: 6, count: 6, .. })
        ));

        let mut b = body();
        let err = b.pack_args(u16::MAX, &[TypeSig::object(), TypeSig::object()]).unwrap_err();
        assert!(matches!(err, AssemblerError::ArgumentOutOfRange { .. }));
    }

    #[test]
    fn test_finalized_body_rejects_emission() {
        let mut b = body();
        b.emit(OpCode::Ret).unwrap();
        b.max_stack = Some(0);
        assert!(matches!(b.emit(OpCode::Nop), Err(AssemblerError::BodyFinalized)));
    }
}
