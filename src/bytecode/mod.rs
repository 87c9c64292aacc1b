pub mod body;
pub mod builder;
pub mod disasm;
pub mod finalize;
pub mod ir;
pub mod op;
pub mod resolve;
pub mod stack_check;

pub use body::{ExceptionRegion, Handler, HandlerKind, Local, LocalSet, MethodBody};
pub use finalize::{FinalizeOptions, finalize, finalize_with};
pub use ir::{InstrId, Instruction, Label, LocalId, Operand, StreamId, Token};
pub use op::{FlowControl, OpCode, OperandKind, StackPop, StackPush, VarAccess, VarSlot};
