use serde::{Deserialize, Serialize};

// =============================================================================
// OP - Instruction catalogue
// =============================================================================

#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpCode {
    Nop,

    // arguments
    Ldarg0,
    Ldarg1,
    Ldarg2,
    Ldarg3,
    LdargS,
    Ldarg,
    LdargaS,
    Ldarga,
    StargS,
    Starg,

    // locals
    Ldloc0,
    Ldloc1,
    Ldloc2,
    Ldloc3,
    LdlocS,
    Ldloc,
    LdlocaS,
    Ldloca,
    Stloc0,
    Stloc1,
    Stloc2,
    Stloc3,
    StlocS,
    Stloc,

    // constants
    Ldnull,
    LdcI4M1,
    LdcI4_0,
    LdcI4_1,
    LdcI4_2,
    LdcI4_3,
    LdcI4_4,
    LdcI4_5,
    LdcI4_6,
    LdcI4_7,
    LdcI4_8,
    LdcI4S,
    LdcI4,
    LdcI8,
    LdcR4,
    LdcR8,
    Ldstr,

    // stack
    Dup,
    Pop,

    // calls
    Call,
    Callvirt,
    Calli,
    Newobj,
    Ret,

    // branches
    Br,
    BrS,
    Brfalse,
    BrfalseS,
    Brtrue,
    BrtrueS,
    Beq,
    BeqS,
    BneUn,
    BneUnS,
    Bge,
    BgeS,
    Bgt,
    BgtS,
    Ble,
    BleS,
    Blt,
    BltS,
    Switch,

    // exception handling
    Leave,
    LeaveS,
    Endfinally,
    Endfilter,
    Throw,
    Rethrow,

    // arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Neg,
    Not,

    // comparison
    Ceq,
    Cgt,
    Clt,

    // conversion
    ConvI4,
    ConvI8,
    ConvI,

    // fields
    Ldfld,
    Ldflda,
    Stfld,
    Ldsfld,
    Ldsflda,
    Stsfld,

    // objects
    Ldftn,
    Ldvirtftn,
    Ldtoken,
    Box,
    UnboxAny,
    Castclass,
    Isinst,
    Initobj,
    Ldobj,
    LdindRef,
    StindRef,

    // arrays
    Newarr,
    Ldlen,
    Ldelema,
    LdelemRef,
    StelemRef,
    Ldelem,
    Stelem,

    /// Synthetic branch destination. Never reaches a finalized body.
    Placeholder,
}

/// How many values an instruction pops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackPop {
    Fixed(u8),
    /// Depends on the callee's signature.
    Call,
    /// Empties the stack.
    All,
    /// One value if the enclosing method returns one, otherwise none.
    Ret,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackPush {
    Fixed(u8),
    /// One value if the callee returns one.
    Call,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowControl {
    Next,
    Call,
    Branch,
    CondBranch,
    Return,
    Throw,
    /// Pseudo-instructions with no runtime behaviour.
    Meta,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    None,
    Int32,
    Int64,
    Float32,
    Float64,
    String,
    Local,
    Param,
    Branch,
    Switch,
    Method,
    Field,
    Type,
    /// `ldtoken`: a type, method or field.
    Token,
    /// `calli`: a stand-alone method signature.
    Signature,
}

impl OperandKind {
    pub fn describe(self) -> &'static str {
        match self {
            OperandKind::None => "no",
            OperandKind::Int32 => "int32",
            OperandKind::Int64 => "int64",
            OperandKind::Float32 => "float32",
            OperandKind::Float64 => "float64",
            OperandKind::String => "string",
            OperandKind::Local => "local variable",
            OperandKind::Param => "parameter",
            OperandKind::Branch => "branch target",
            OperandKind::Switch => "switch target list",
            OperandKind::Method => "method",
            OperandKind::Field => "field",
            OperandKind::Type => "type",
            OperandKind::Token => "metadata token",
            OperandKind::Signature => "signature",
        }
    }
}

/// Which kind of variable a variable-access instruction touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarSlot {
    Local,
    Arg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarAccess {
    Load,
    Store,
    Address,
}

/// Static properties of one opcode.
#[derive(Debug, Clone, Copy)]
pub struct OpInfo {
    pub name: &'static str,
    /// `0xFEnn` for two-byte opcodes.
    pub encoding: u16,
    pub operand: OperandKind,
    pub pop: StackPop,
    pub push: StackPush,
    pub flow: FlowControl,
}

const fn row(
    name: &'static str,
    encoding: u16,
    operand: OperandKind,
    pop: StackPop,
    push: StackPush,
    flow: FlowControl,
) -> OpInfo {
    OpInfo {
        name,
        encoding,
        operand,
        pop,
        push,
        flow,
    }
}

impl OpCode {
    pub fn info(self) -> OpInfo {
        use FlowControl as F;
        use OpCode::*;
        use OperandKind as K;

        const P0: StackPop = StackPop::Fixed(0);
        const P1: StackPop = StackPop::Fixed(1);
        const P2: StackPop = StackPop::Fixed(2);
        const P3: StackPop = StackPop::Fixed(3);
        const U0: StackPush = StackPush::Fixed(0);
        const U1: StackPush = StackPush::Fixed(1);
        const U2: StackPush = StackPush::Fixed(2);

        match self {
            Nop => row("nop", 0x00, K::None, P0, U0, F::Next),

            Ldarg0 => row("ldarg.0", 0x02, K::Param, P0, U1, F::Next),
            Ldarg1 => row("ldarg.1", 0x03, K::Param, P0, U1, F::Next),
            Ldarg2 => row("ldarg.2", 0x04, K::Param, P0, U1, F::Next),
            Ldarg3 => row("ldarg.3", 0x05, K::Param, P0, U1, F::Next),
            LdargS => row("ldarg.s", 0x0E, K::Param, P0, U1, F::Next),
            Ldarg => row("ldarg", 0xFE09, K::Param, P0, U1, F::Next),
            LdargaS => row("ldarga.s", 0x0F, K::Param, P0, U1, F::Next),
            Ldarga => row("ldarga", 0xFE0A, K::Param, P0, U1, F::Next),
            StargS => row("starg.s", 0x10, K::Param, P1, U0, F::Next),
            Starg => row("starg", 0xFE0B, K::Param, P1, U0, F::Next),

            Ldloc0 => row("ldloc.0", 0x06, K::Local, P0, U1, F::Next),
            Ldloc1 => row("ldloc.1", 0x07, K::Local, P0, U1, F::Next),
            Ldloc2 => row("ldloc.2", 0x08, K::Local, P0, U1, F::Next),
            Ldloc3 => row("ldloc.3", 0x09, K::Local, P0, U1, F::Next),
            LdlocS => row("ldloc.s", 0x11, K::Local, P0, U1, F::Next),
            Ldloc => row("ldloc", 0xFE0C, K::Local, P0, U1, F::Next),
            LdlocaS => row("ldloca.s", 0x12, K::Local, P0, U1, F::Next),
            Ldloca => row("ldloca", 0xFE0D, K::Local, P0, U1, F::Next),
            Stloc0 => row("stloc.0", 0x0A, K::Local, P1, U0, F::Next),
            Stloc1 => row("stloc.1", 0x0B, K::Local, P1, U0, F::Next),
            Stloc2 => row("stloc.2", 0x0C, K::Local, P1, U0, F::Next),
            Stloc3 => row("stloc.3", 0x0D, K::Local, P1, U0, F::Next),
            StlocS => row("stloc.s", 0x13, K::Local, P1, U0, F::Next),
            Stloc => row("stloc", 0xFE0E, K::Local, P1, U0, F::Next),

            Ldnull => row("ldnull", 0x14, K::None, P0, U1, F::Next),
            LdcI4M1 => row("ldc.i4.m1", 0x15, K::Int32, P0, U1, F::Next),
            LdcI4_0 => row("ldc.i4.0", 0x16, K::Int32, P0, U1, F::Next),
            LdcI4_1 => row("ldc.i4.1", 0x17, K::Int32, P0, U1, F::Next),
            LdcI4_2 => row("ldc.i4.2", 0x18, K::Int32, P0, U1, F::Next),
            LdcI4_3 => row("ldc.i4.3", 0x19, K::Int32, P0, U1, F::Next),
            LdcI4_4 => row("ldc.i4.4", 0x1A, K::Int32, P0, U1, F::Next),
            LdcI4_5 => row("ldc.i4.5", 0x1B, K::Int32, P0, U1, F::Next),
            LdcI4_6 => row("ldc.i4.6", 0x1C, K::Int32, P0, U1, F::Next),
            LdcI4_7 => row("ldc.i4.7", 0x1D, K::Int32, P0, U1, F::Next),
            LdcI4_8 => row("ldc.i4.8", 0x1E, K::Int32, P0, U1, F::Next),
            LdcI4S => row("ldc.i4.s", 0x1F, K::Int32, P0, U1, F::Next),
            LdcI4 => row("ldc.i4", 0x20, K::Int32, P0, U1, F::Next),
            LdcI8 => row("ldc.i8", 0x21, K::Int64, P0, U1, F::Next),
            LdcR4 => row("ldc.r4", 0x22, K::Float32, P0, U1, F::Next),
            LdcR8 => row("ldc.r8", 0x23, K::Float64, P0, U1, F::Next),
            Ldstr => row("ldstr", 0x72, K::String, P0, U1, F::Next),

            Dup => row("dup", 0x25, K::None, P1, U2, F::Next),
            Pop => row("pop", 0x26, K::None, P1, U0, F::Next),

            Call => row("call", 0x28, K::Method, StackPop::Call, StackPush::Call, F::Call),
            Callvirt => row("callvirt", 0x6F, K::Method, StackPop::Call, StackPush::Call, F::Call),
            Calli => row("calli", 0x29, K::Signature, StackPop::Call, StackPush::Call, F::Call),
            Newobj => row("newobj", 0x73, K::Method, StackPop::Call, U1, F::Call),
            Ret => row("ret", 0x2A, K::None, StackPop::Ret, U0, F::Return),

            Br => row("br", 0x38, K::Branch, P0, U0, F::Branch),
            BrS => row("br.s", 0x2B, K::Branch, P0, U0, F::Branch),
            Brfalse => row("brfalse", 0x39, K::Branch, P1, U0, F::CondBranch),
            BrfalseS => row("brfalse.s", 0x2C, K::Branch, P1, U0, F::CondBranch),
            Brtrue => row("brtrue", 0x3A, K::Branch, P1, U0, F::CondBranch),
            BrtrueS => row("brtrue.s", 0x2D, K::Branch, P1, U0, F::CondBranch),
            Beq => row("beq", 0x3B, K::Branch, P2, U0, F::CondBranch),
            BeqS => row("beq.s", 0x2E, K::Branch, P2, U0, F::CondBranch),
            BneUn => row("bne.un", 0x40, K::Branch, P2, U0, F::CondBranch),
            BneUnS => row("bne.un.s", 0x33, K::Branch, P2, U0, F::CondBranch),
            Bge => row("bge", 0x3C, K::Branch, P2, U0, F::CondBranch),
            BgeS => row("bge.s", 0x2F, K::Branch, P2, U0, F::CondBranch),
            Bgt => row("bgt", 0x3D, K::Branch, P2, U0, F::CondBranch),
            BgtS => row("bgt.s", 0x30, K::Branch, P2, U0, F::CondBranch),
            Ble => row("ble", 0x3E, K::Branch, P2, U0, F::CondBranch),
            BleS => row("ble.s", 0x31, K::Branch, P2, U0, F::CondBranch),
            Blt => row("blt", 0x3F, K::Branch, P2, U0, F::CondBranch),
            BltS => row("blt.s", 0x32, K::Branch, P2, U0, F::CondBranch),
            Switch => row("switch", 0x45, K::Switch, P1, U0, F::CondBranch),

            Leave => row("leave", 0xDD, K::Branch, StackPop::All, U0, F::Branch),
            LeaveS => row("leave.s", 0xDE, K::Branch, StackPop::All, U0, F::Branch),
            Endfinally => row("endfinally", 0xDC, K::None, P0, U0, F::Return),
            Endfilter => row("endfilter", 0xFE11, K::None, P1, U0, F::Return),
            Throw => row("throw", 0x7A, K::None, P1, U0, F::Throw),
            Rethrow => row("rethrow", 0xFE1A, K::None, P0, U0, F::Throw),

            Add => row("add", 0x58, K::None, P2, U1, F::Next),
            Sub => row("sub", 0x59, K::None, P2, U1, F::Next),
            Mul => row("mul", 0x5A, K::None, P2, U1, F::Next),
            Div => row("div", 0x5B, K::None, P2, U1, F::Next),
            Rem => row("rem", 0x5D, K::None, P2, U1, F::Next),
            And => row("and", 0x5F, K::None, P2, U1, F::Next),
            Or => row("or", 0x60, K::None, P2, U1, F::Next),
            Xor => row("xor", 0x61, K::None, P2, U1, F::Next),
            Shl => row("shl", 0x62, K::None, P2, U1, F::Next),
            Shr => row("shr", 0x63, K::None, P2, U1, F::Next),
            Neg => row("neg", 0x65, K::None, P1, U1, F::Next),
            Not => row("not", 0x66, K::None, P1, U1, F::Next),

            Ceq => row("ceq", 0xFE01, K::None, P2, U1, F::Next),
            Cgt => row("cgt", 0xFE02, K::None, P2, U1, F::Next),
            Clt => row("clt", 0xFE04, K::None, P2, U1, F::Next),

            ConvI4 => row("conv.i4", 0x69, K::None, P1, U1, F::Next),
            ConvI8 => row("conv.i8", 0x6A, K::None, P1, U1, F::Next),
            ConvI => row("conv.i", 0xD3, K::None, P1, U1, F::Next),

            Ldfld => row("ldfld", 0x7B, K::Field, P1, U1, F::Next),
            Ldflda => row("ldflda", 0x7C, K::Field, P1, U1, F::Next),
            Stfld => row("stfld", 0x7D, K::Field, P2, U0, F::Next),
            Ldsfld => row("ldsfld", 0x7E, K::Field, P0, U1, F::Next),
            Ldsflda => row("ldsflda", 0x7F, K::Field, P0, U1, F::Next),
            Stsfld => row("stsfld", 0x80, K::Field, P1, U0, F::Next),

            Ldftn => row("ldftn", 0xFE06, K::Method, P0, U1, F::Next),
            Ldvirtftn => row("ldvirtftn", 0xFE07, K::Method, P1, U1, F::Next),
            Ldtoken => row("ldtoken", 0xD0, K::Token, P0, U1, F::Next),
            Box => row("box", 0x8C, K::Type, P1, U1, F::Next),
            UnboxAny => row("unbox.any", 0xA5, K::Type, P1, U1, F::Next),
            Castclass => row("castclass", 0x74, K::Type, P1, U1, F::Next),
            Isinst => row("isinst", 0x75, K::Type, P1, U1, F::Next),
            Initobj => row("initobj", 0xFE15, K::Type, P1, U0, F::Next),
            Ldobj => row("ldobj", 0x71, K::Type, P1, U1, F::Next),
            LdindRef => row("ldind.ref", 0x50, K::None, P1, U1, F::Next),
            StindRef => row("stind.ref", 0x51, K::None, P2, U0, F::Next),

            Newarr => row("newarr", 0x8D, K::Type, P1, U1, F::Next),
            Ldlen => row("ldlen", 0x8E, K::None, P1, U1, F::Next),
            Ldelema => row("ldelema", 0x8F, K::Type, P2, U1, F::Next),
            LdelemRef => row("ldelem.ref", 0x9A, K::None, P2, U1, F::Next),
            StelemRef => row("stelem.ref", 0xA2, K::None, P3, U0, F::Next),
            Ldelem => row("ldelem", 0xA3, K::Type, P2, U1, F::Next),
            Stelem => row("stelem", 0xA4, K::Type, P3, U0, F::Next),

            Placeholder => row("<label>", 0x00, K::None, P0, U0, F::Meta),
        }
    }

    pub fn name(self) -> &'static str {
        self.info().name
    }

    pub fn flow(self) -> FlowControl {
        self.info().flow
    }

    pub fn operand_kind(self) -> OperandKind {
        self.info().operand
    }

    pub fn is_placeholder(self) -> bool {
        self == OpCode::Placeholder
    }

    pub fn is_branch(self) -> bool {
        matches!(self.flow(), FlowControl::Branch | FlowControl::CondBranch)
    }

    /// Pops depend on a callee signature.
    pub fn is_call_shaped(self) -> bool {
        self.info().pop == StackPop::Call
    }

    /// The stack must be empty once this instruction has popped its operands.
    pub fn requires_empty_stack(self) -> bool {
        matches!(self, OpCode::Ret | OpCode::Endfinally | OpCode::Endfilter)
    }

    /// Control never falls through to the next instruction.
    pub fn ends_flow(self) -> bool {
        matches!(
            self.flow(),
            FlowControl::Branch | FlowControl::Return | FlowControl::Throw
        )
    }

    /// Encoded size of the opcode itself, without operand.
    pub fn size(self) -> u32 {
        match self {
            OpCode::Placeholder => 0,
            op if op.info().encoding > 0xFF => 2,
            _ => 1,
        }
    }

    /// Encoded operand size. `switch_targets` is only used by `switch`.
    pub fn operand_size(self, switch_targets: usize) -> u32 {
        use OpCode::*;
        match self {
            Ldarg0 | Ldarg1 | Ldarg2 | Ldarg3 | Ldloc0 | Ldloc1 | Ldloc2 | Ldloc3 | Stloc0
            | Stloc1 | Stloc2 | Stloc3 => 0,
            LdcI4M1 | LdcI4_0 | LdcI4_1 | LdcI4_2 | LdcI4_3 | LdcI4_4 | LdcI4_5 | LdcI4_6
            | LdcI4_7 | LdcI4_8 => 0,
            LdargS | LdargaS | StargS | LdlocS | LdlocaS | StlocS | LdcI4S => 1,
            Ldarg | Ldarga | Starg | Ldloc | Ldloca | Stloc => 2,
            Switch => 4 + 4 * switch_targets as u32,
            op if op.short_form_of().is_some() => 1,
            op => match op.operand_kind() {
                OperandKind::None => 0,
                OperandKind::Int64 | OperandKind::Float64 => 8,
                _ => 4,
            },
        }
    }

    // -------------------------------------------------------------------------
    // Compact forms
    // -------------------------------------------------------------------------

    /// Most compact `ldc.i4` variant able to hold `value`.
    pub fn ldc_i4(value: i32) -> OpCode {
        use OpCode::*;
        match value {
            -1 => LdcI4M1,
            0 => LdcI4_0,
            1 => LdcI4_1,
            2 => LdcI4_2,
            3 => LdcI4_3,
            4 => LdcI4_4,
            5 => LdcI4_5,
            6 => LdcI4_6,
            7 => LdcI4_7,
            8 => LdcI4_8,
            v if (-128..=127).contains(&v) => LdcI4S,
            _ => LdcI4,
        }
    }

    pub fn is_ldc_i4(self) -> bool {
        self.operand_kind() == OperandKind::Int32
    }

    /// Slot and access performed by a variable instruction.
    pub fn variable_form(self) -> Option<(VarSlot, VarAccess)> {
        use OpCode::*;
        Some(match self {
            Ldarg0 | Ldarg1 | Ldarg2 | Ldarg3 | LdargS | Ldarg => (VarSlot::Arg, VarAccess::Load),
            StargS | Starg => (VarSlot::Arg, VarAccess::Store),
            LdargaS | Ldarga => (VarSlot::Arg, VarAccess::Address),
            Ldloc0 | Ldloc1 | Ldloc2 | Ldloc3 | LdlocS | Ldloc => {
                (VarSlot::Local, VarAccess::Load)
            }
            Stloc0 | Stloc1 | Stloc2 | Stloc3 | StlocS | Stloc => {
                (VarSlot::Local, VarAccess::Store)
            }
            LdlocaS | Ldloca => (VarSlot::Local, VarAccess::Address),
            _ => return None,
        })
    }

    /// Most compact variant for a variable access at `index`. `None` selects
    /// the long form, used while a local's index is not yet known.
    pub fn variable(slot: VarSlot, access: VarAccess, index: Option<u16>) -> OpCode {
        use OpCode::*;
        let index = index.unwrap_or(u16::MAX);
        let short = index <= 255;
        match (slot, access) {
            (VarSlot::Local, VarAccess::Load) => match index {
                0 => Ldloc0,
                1 => Ldloc1,
                2 => Ldloc2,
                3 => Ldloc3,
                _ if short => LdlocS,
                _ => Ldloc,
            },
            (VarSlot::Local, VarAccess::Store) => match index {
                0 => Stloc0,
                1 => Stloc1,
                2 => Stloc2,
                3 => Stloc3,
                _ if short => StlocS,
                _ => Stloc,
            },
            (VarSlot::Local, VarAccess::Address) => {
                if short {
                    LdlocaS
                } else {
                    Ldloca
                }
            }
            (VarSlot::Arg, VarAccess::Load) => match index {
                0 => Ldarg0,
                1 => Ldarg1,
                2 => Ldarg2,
                3 => Ldarg3,
                _ if short => LdargS,
                _ => Ldarg,
            },
            (VarSlot::Arg, VarAccess::Store) => {
                if short {
                    StargS
                } else {
                    Starg
                }
            }
            (VarSlot::Arg, VarAccess::Address) => {
                if short {
                    LdargaS
                } else {
                    Ldarga
                }
            }
        }
    }

    /// Short (`i8` displacement) form of a long branch.
    pub fn short_branch(self) -> Option<OpCode> {
        use OpCode::*;
        Some(match self {
            Br => BrS,
            Brfalse => BrfalseS,
            Brtrue => BrtrueS,
            Beq => BeqS,
            BneUn => BneUnS,
            Bge => BgeS,
            Bgt => BgtS,
            Ble => BleS,
            Blt => BltS,
            Leave => LeaveS,
            _ => return None,
        })
    }

    /// Long form of a short branch.
    pub fn short_form_of(self) -> Option<OpCode> {
        use OpCode::*;
        Some(match self {
            BrS => Br,
            BrfalseS => Brfalse,
            BrtrueS => Brtrue,
            BeqS => Beq,
            BneUnS => BneUn,
            BgeS => Bge,
            BgtS => Bgt,
            BleS => Ble,
            BltS => Blt,
            LeaveS => Leave,
            _ => return None,
        })
    }

    /// Long form for branches, the opcode itself otherwise.
    pub fn long_branch(self) -> OpCode {
        self.short_form_of().unwrap_or(self)
    }
}

impl std::fmt::Display for OpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
