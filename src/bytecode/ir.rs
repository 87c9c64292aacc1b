use std::fmt;

use serde::{Deserialize, Serialize};

use crate::bytecode::op::{OpCode, OperandKind};
use crate::metadata::reference::{FieldRef, MethodRef};
use crate::metadata::signature::{MethodSig, TypeSig};

/// Stable handle of an instruction within its body's arena. Survives
/// reordering and deletion of other instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstrId(pub u32);

impl InstrId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Identity of one instruction stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamId(pub u32);

/// Handle to a created instruction, usable as a branch target. Bound to the
/// stream that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Label {
    pub(crate) stream: StreamId,
    pub(crate) id: InstrId,
}

impl Label {
    pub fn id(self) -> InstrId {
        self.id
    }

    pub fn stream(self) -> StreamId {
        self.stream
    }
}

/// Handle to a local variable. Its positional index is assigned by the
/// body's local set, not by the handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocalId(pub u32);

/// `ldtoken` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Token {
    Type(TypeSig),
    Method(MethodRef),
    Field(FieldRef),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    None,
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    String(String),
    Local(LocalId),
    /// Argument slot, counting `this` as slot 0 for instance methods.
    Param(u16),
    Branch(InstrId),
    Switch(Vec<InstrId>),
    Method(MethodRef),
    Field(FieldRef),
    Type(TypeSig),
    Token(Token),
    Signature(MethodSig),
}

impl Operand {
    pub fn kind(&self) -> OperandKind {
        match self {
            Operand::None => OperandKind::None,
            Operand::Int32(_) => OperandKind::Int32,
            Operand::Int64(_) => OperandKind::Int64,
            Operand::Float32(_) => OperandKind::Float32,
            Operand::Float64(_) => OperandKind::Float64,
            Operand::String(_) => OperandKind::String,
            Operand::Local(_) => OperandKind::Local,
            Operand::Param(_) => OperandKind::Param,
            Operand::Branch(_) => OperandKind::Branch,
            Operand::Switch(_) => OperandKind::Switch,
            Operand::Method(_) => OperandKind::Method,
            Operand::Field(_) => OperandKind::Field,
            Operand::Type(_) => OperandKind::Type,
            Operand::Token(_) => OperandKind::Token,
            Operand::Signature(_) => OperandKind::Signature,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub opcode: OpCode,
    pub operand: Operand,
}

impl Instruction {
    pub fn new(opcode: OpCode, operand: Operand) -> Self {
        Self { opcode, operand }
    }

    pub fn is_placeholder(&self) -> bool {
        self.opcode.is_placeholder()
    }

    /// Branch destinations named by the operand.
    pub fn targets(&self) -> &[InstrId] {
        match &self.operand {
            Operand::Branch(t) => std::slice::from_ref(t),
            Operand::Switch(ts) => ts,
            _ => &[],
        }
    }

    pub fn targets_mut(&mut self) -> &mut [InstrId] {
        match &mut self.operand {
            Operand::Branch(t) => std::slice::from_mut(t),
            Operand::Switch(ts) => ts,
            _ => &mut [],
        }
    }

    /// Encoded size in bytes, opcode plus operand.
    pub fn size(&self) -> u32 {
        let switch_targets = match &self.operand {
            Operand::Switch(ts) => ts.len(),
            _ => 0,
        };
        self.opcode.size() + self.opcode.operand_size(switch_targets)
    }

    /// Values popped, given the enclosing method's shape.
    pub fn pops(&self, returns_value: bool, current: u32) -> u32 {
        use crate::bytecode::op::StackPop;

        match self.opcode.info().pop {
            StackPop::Fixed(n) => u32::from(n),
            StackPop::All => current,
            StackPop::Ret => u32::from(returns_value),
            StackPop::Call => match &self.operand {
                Operand::Method(m) if self.opcode == OpCode::Newobj => m.sig.params.len() as u32,
                Operand::Method(m) => m.sig.arg_slots(),
                // function pointer on top of the arguments
                Operand::Signature(sig) => sig.arg_slots() + 1,
                _ => 0,
            },
        }
    }

    pub fn pushes(&self) -> u32 {
        use crate::bytecode::op::StackPush;

        match self.opcode.info().push {
            StackPush::Fixed(n) => u32::from(n),
            StackPush::Call => match &self.operand {
                Operand::Method(m) => u32::from(m.sig.returns_value()),
                Operand::Signature(sig) => u32::from(sig.returns_value()),
                _ => 0,
            },
        }
    }

    /// Callee description for call-shaped instructions.
    pub fn callee(&self) -> Option<String> {
        match &self.operand {
            Operand::Method(m) => Some(m.to_string()),
            Operand::Signature(sig) => Some(sig.to_string()),
            _ => None,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::None => Ok(()),
            Operand::Int32(v) => write!(f, "{}", v),
            Operand::Int64(v) => write!(f, "{}", v),
            Operand::Float32(v) => write!(f, "{}", v),
            Operand::Float64(v) => write!(f, "{}", v),
            Operand::String(s) => write!(f, "{:?}", s),
            Operand::Local(l) => write!(f, "V_{}", l.0),
            Operand::Param(p) => write!(f, "{}", p),
            Operand::Branch(t) => write!(f, "IL_#{}", t.0),
            Operand::Switch(ts) => {
                write!(f, "(")?;
                for (i, t) in ts.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "IL_#{}", t.0)?;
                }
                write!(f, ")")
            }
            Operand::Method(m) => write!(f, "{}", m),
            Operand::Field(fr) => write!(f, "{}", fr),
            Operand::Type(t) => write!(f, "{}", t),
            Operand::Token(Token::Type(t)) => write!(f, "{}", t),
            Operand::Token(Token::Method(m)) => write!(f, "method {}", m),
            Operand::Token(Token::Field(fr)) => write!(f, "field {}", fr),
            Operand::Signature(sig) => write!(f, "{}", sig),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::signature::PrimitiveType;

    fn method(sig: MethodSig) -> MethodRef {
        MethodRef::new(TypeSig::object(), "M", sig)
    }

    #[test]
    fn test_call_pops_include_this() {
        let m = method(MethodSig::instance(TypeSig::void(), vec![TypeSig::object(); 2]));
        let call = Instruction::new(OpCode::Callvirt, Operand::Method(m.clone()));
        assert_eq!(call.pops(false, 0), 3);
        assert_eq!(call.pushes(), 0);

        let ctor = Instruction::new(OpCode::Newobj, Operand::Method(m));
        assert_eq!(ctor.pops(false, 0), 2);
        assert_eq!(ctor.pushes(), 1);
    }

    #[test]
    fn test_calli_pops_function_pointer() {
        let sig = MethodSig::new(PrimitiveType::I4.into(), vec![TypeSig::object()]);
        let calli = Instruction::new(OpCode::Calli, Operand::Signature(sig));
        assert_eq!(calli.pops(false, 0), 2);
        assert_eq!(calli.pushes(), 1);
    }

    #[test]
    fn test_ret_and_leave_pops() {
        let ret = Instruction::new(OpCode::Ret, Operand::None);
        assert_eq!(ret.pops(true, 4), 1);
        assert_eq!(ret.pops(false, 4), 0);

        let leave = Instruction::new(OpCode::Leave, Operand::Branch(InstrId(0)));
        assert_eq!(leave.pops(false, 3), 3);
    }

    #[test]
    fn test_targets() {
        let mut switch = Instruction::new(OpCode::Switch, Operand::Switch(vec![InstrId(1), InstrId(2)]));
        assert_eq!(switch.targets(), &[InstrId(1), InstrId(2)]);
        switch.targets_mut()[0] = InstrId(7);
        assert_eq!(switch.targets()[0], InstrId(7));
        assert_eq!(switch.size(), 1 + 4 + 8);

        let add = Instruction::new(OpCode::Add, Operand::None);
        assert!(add.targets().is_empty());
    }
}
