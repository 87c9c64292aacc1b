//! The single entry point that turns a built body into a finished one.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::bytecode::body::MethodBody;
use crate::bytecode::ir::Operand;
use crate::bytecode::resolve::resolve_branches;
use crate::bytecode::stack_check::check_stack;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizeOptions {
    /// Shrink branches whose displacement fits in a signed byte.
    pub compact_branches: bool,
}

impl Default for FinalizeOptions {
    fn default() -> Self {
        Self {
            compact_branches: true,
        }
    }
}

/// Finalize with default options.
pub fn finalize(body: &mut MethodBody) -> Result<u16> {
    finalize_with(body, &FinalizeOptions::default())
}

/// Resolve branches, canonicalize encodings, optionally compact branches,
/// then verify the stack. Returns the maximum stack height. A finalized body
/// is frozen; finalizing it again returns the stored value.
pub fn finalize_with(body: &mut MethodBody, options: &FinalizeOptions) -> Result<u16> {
    if let Some(max) = body.max_stack {
        return Ok(max);
    }

    resolve_branches(body)?;
    body.canonicalize()?;
    if options.compact_branches {
        compact_branches(body);
    }
    let max = check_stack(body)?;

    body.max_stack = Some(max);
    debug!(
        instructions = body.len(),
        code_size = body.code_size(),
        max_stack = max,
        "finalized method body"
    );
    Ok(max)
}

/// Rewrite long branches to their short form wherever the displacement fits,
/// repeating until nothing changes. Returns how many branches were shrunk.
pub fn compact_branches(body: &mut MethodBody) -> usize {
    let mut shrunk = 0;
    loop {
        let offsets = body.offsets();
        let positions = body.positions();
        let mut changed = false;

        for (pos, id) in body.order.iter().enumerate() {
            let instr = &mut body.instrs[id.index()];
            let Some(short) = instr.opcode.short_branch() else {
                continue;
            };
            let Operand::Branch(target) = instr.operand else {
                continue;
            };
            let Some(target_pos) = positions[target.index()] else {
                continue;
            };

            let next = i64::from(offsets[pos]) + i64::from(short.size() + short.operand_size(0));
            let displacement = i64::from(offsets[target_pos]) - next;
            if i8::try_from(displacement).is_ok() {
                trace!(at = pos, displacement, "shrink {} to {}", instr.opcode, short);
                instr.opcode = short;
                shrunk += 1;
                changed = true;
            }
        }

        if !changed {
            return shrunk;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::op::OpCode;
    use crate::error::AssemblerError;
    use crate::metadata::signature::{MethodSig, TypeSig};

    fn body() -> MethodBody {
        MethodBody::new(&MethodSig::new(TypeSig::void(), vec![])).unwrap()
    }

    #[test]
    fn test_finalize_returns_max_stack_and_freezes() {
        let mut b = body();
        b.emit_ldc_i4(5).unwrap();
        b.emit_ldc_i4(1).unwrap();
        b.emit(OpCode::Add).unwrap();
        b.emit(OpCode::Pop).unwrap();
        b.emit(OpCode::Ret).unwrap();

        assert_eq!(finalize(&mut b).unwrap(), 2);
        assert!(b.is_finalized());
        assert_eq!(b.max_stack(), Some(2));
        assert_eq!(finalize(&mut b).unwrap(), 2);
        assert!(matches!(b.emit(OpCode::Nop), Err(AssemblerError::BodyFinalized)));
    }

    #[test]
    fn test_failed_finalize_leaves_body_open() {
        let mut b = body();
        b.emit(OpCode::Add).unwrap();
        assert!(finalize(&mut b).is_err());
        assert!(!b.is_finalized());
    }

    #[test]
    fn test_near_branch_is_shrunk() {
        let mut b = body();
        let end = b.placeholder().unwrap();
        b.emit_branch(OpCode::Br, end).unwrap();
        b.emit(OpCode::Nop).unwrap();
        b.emit_label(end).unwrap();
        b.emit(OpCode::Ret).unwrap();

        finalize(&mut b).unwrap();
        assert_eq!(b.at(0).unwrap().opcode, OpCode::BrS);
        assert_eq!(b.code_size(), 2 + 1 + 1);
    }

    #[test]
    fn test_far_branch_stays_long() {
        let mut b = body();
        let end = b.placeholder().unwrap();
        b.emit_branch(OpCode::Br, end).unwrap();
        for _ in 0..200 {
            b.emit(OpCode::Nop).unwrap();
        }
        b.emit_label(end).unwrap();
        b.emit(OpCode::Ret).unwrap();

        finalize(&mut b).unwrap();
        assert_eq!(b.at(0).unwrap().opcode, OpCode::Br);
    }

    #[test]
    fn test_backward_branch_at_i8_limit() {
        let mut b = body();
        let top = b.emit(OpCode::Nop).unwrap();
        // 125 more bytes of nops, then a 2-byte short branch ends at 128
        for _ in 0..125 {
            b.emit(OpCode::Nop).unwrap();
        }
        b.emit_branch(OpCode::Br, top).unwrap();

        assert_eq!(compact_branches(&mut b), 1);
        assert_eq!(b.at(126).unwrap().opcode, OpCode::BrS);

        let mut b = body();
        let top = b.emit(OpCode::Nop).unwrap();
        for _ in 0..126 {
            b.emit(OpCode::Nop).unwrap();
        }
        b.emit_branch(OpCode::Br, top).unwrap();
        assert_eq!(compact_branches(&mut b), 0);
    }

    #[test]
    fn test_compaction_disabled() {
        let mut b = body();
        let end = b.placeholder().unwrap();
        b.emit_branch(OpCode::Br, end).unwrap();
        b.emit_label(end).unwrap();
        b.emit(OpCode::Ret).unwrap();

        finalize_with(&mut b, &FinalizeOptions { compact_branches: false }).unwrap();
        assert_eq!(b.at(0).unwrap().opcode, OpCode::Br);
    }
}
