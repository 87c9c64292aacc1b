use crate::bytecode::body::{HandlerKind, MethodBody};
use crate::bytecode::ir::{Instruction, Label};
use crate::error::{AssemblerError, Result};

/// Record `height` for position `index`, or check it against what is there.
fn record(recorded: &mut [Option<u32>], index: usize, height: u32) -> Result<()> {
    match recorded[index] {
        Some(existing) if existing != height => Err(AssemblerError::StackHeightMismatch {
            index,
            recorded: existing,
            incoming: height,
        }),
        _ => {
            recorded[index] = Some(height);
            Ok(())
        }
    }
}

fn position(positions: &[Option<usize>], label: Label, order_len: usize) -> Result<usize> {
    positions
        .get(label.id().index())
        .copied()
        .flatten()
        .ok_or_else(|| {
            AssemblerError::dangling(order_len, "exception region boundary is not in the stream")
        })
}

/// Heights fixed by the runtime at region entry points.
fn seed_regions(body: &MethodBody, positions: &[Option<usize>], recorded: &mut [Option<u32>]) -> Result<()> {
    let len = body.order.len();
    for region in &body.regions {
        record(recorded, position(positions, region.try_start, len)?, 0)?;
        for handler in &region.handlers {
            let start = position(positions, handler.start, len)?;
            match &handler.kind {
                HandlerKind::Catch(_) => record(recorded, start, 1)?,
                HandlerKind::Filter { filter_start } => {
                    record(recorded, position(positions, *filter_start, len)?, 1)?;
                    record(recorded, start, 1)?;
                }
                HandlerKind::Finally | HandlerKind::Fault => record(recorded, start, 0)?,
            }
        }
    }
    Ok(())
}

fn underflow(index: usize, instr: &Instruction, needed: u32, available: u32) -> AssemblerError {
    let opcode = instr.opcode.name().to_string();
    match instr.callee() {
        Some(callee) if instr.opcode.is_call_shaped() => AssemblerError::CallArity {
            index,
            opcode,
            callee,
            needed,
            available,
        },
        _ => AssemblerError::StackUnderflow {
            index,
            opcode,
            needed,
            available,
        },
    }
}

/// Verify evaluation-stack use of a resolved body and return its maximum
/// height.
///
/// Region entry points are seeded first. The walk then follows program
/// order; where control does not fall through, the next instruction takes
/// whatever height a branch or region recorded for it, or 0 if none did.
pub fn check_stack(body: &MethodBody) -> Result<u16> {
    let positions = body.positions();
    let mut recorded: Vec<Option<u32>> = vec![None; body.order.len()];
    seed_regions(body, &positions, &mut recorded)?;

    let mut height: Option<u32> = Some(0);
    let mut max: u32 = 0;

    for (index, id) in body.order.iter().enumerate() {
        let instr = &body.instrs[id.index()];

        let current = match (height, recorded[index]) {
            (Some(h), Some(r)) if h != r => {
                return Err(AssemblerError::StackHeightMismatch {
                    index,
                    recorded: r,
                    incoming: h,
                });
            }
            (Some(h), _) => h,
            (None, Some(r)) => r,
            (None, None) => 0,
        };
        recorded[index] = Some(current);
        max = max.max(current);

        let pops = instr.pops(body.returns_value, current);
        if pops > current {
            return Err(underflow(index, instr, pops, current));
        }
        let mut after = current - pops;

        if instr.opcode.requires_empty_stack() && after != 0 {
            return Err(AssemblerError::EmptyStackRequired {
                index,
                opcode: instr.opcode.name().to_string(),
                height: after,
            });
        }

        after += instr.pushes();
        max = max.max(after);

        for target in instr.targets() {
            let Some(target_pos) = positions[target.index()] else {
                return Err(AssemblerError::dangling(
                    index,
                    "branch target is not in the stream",
                ));
            };
            record(&mut recorded, target_pos, after)?;
        }

        height = if instr.opcode.ends_flow() || instr.opcode.requires_empty_stack() {
            None
        } else {
            Some(after)
        };
    }

    u16::try_from(max).map_err(|_| AssemblerError::StackTooDeep {
        height: max,
        max: u16::MAX,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::body::ExceptionRegion;
    use crate::bytecode::op::{OpCode, VarAccess};
    use crate::metadata::reference::MethodRef;
    use crate::metadata::signature::{MethodSig, PrimitiveType, TypeSig};

    fn body() -> MethodBody {
        MethodBody::new(&MethodSig::new(TypeSig::void(), vec![TypeSig::object()])).unwrap()
    }

    fn body_returning() -> MethodBody {
        MethodBody::new(&MethodSig::new(PrimitiveType::I4.into(), vec![TypeSig::object()])).unwrap()
    }

    // ==========================================================================
    // Straight-line code
    // ==========================================================================

    #[test]
    fn test_max_stack_is_max_prefix_sum() {
        let mut b = body();
        b.emit_ldc_i4(5).unwrap();
        b.emit_ldc_i4(1).unwrap();
        b.emit(OpCode::Add).unwrap();
        b.emit(OpCode::Pop).unwrap();

        assert_eq!(check_stack(&b).unwrap(), 2);
    }

    #[test]
    fn test_height_past_u16_rejected() {
        let mut b = body();
        for _ in 0..=u32::from(u16::MAX) {
            b.emit(OpCode::Ldnull).unwrap();
        }

        let err = check_stack(&b).unwrap_err();
        assert_eq!(
            err,
            AssemblerError::StackTooDeep {
                height: 65536,
                max: u16::MAX
            }
        );
    }

    #[test]
    fn test_add_on_empty_stack_underflows_at_zero() {
        let mut b = body();
        b.emit(OpCode::Add).unwrap();

        let err = check_stack(&b).unwrap_err();
        assert!(matches!(
            err,
            AssemblerError::StackUnderflow {
                index: 0,
                needed: 2,
                available: 0,
                ..
            }
        ));
        assert!(err.to_string().contains("not enough values"));
    }

    #[test]
    fn test_call_underflow_reports_call_arity() {
        let mut b = body();
        let callee = MethodRef::new(
            TypeSig::object(),
            "Combine",
            MethodSig::new(TypeSig::object(), vec![TypeSig::object(), TypeSig::object()]),
        );
        b.emit_arg(VarAccess::Load, 0).unwrap();
        b.emit_method(OpCode::Call, &callee).unwrap();

        let err = check_stack(&b).unwrap_err();
        assert!(matches!(
            err,
            AssemblerError::CallArity {
                index: 1,
                needed: 2,
                available: 1,
                ..
            }
        ));
        assert!(err.to_string().contains("Combine"));
    }

    #[test]
    fn test_ret_requires_empty_stack() {
        let mut b = body();
        b.emit_ldc_i4(1).unwrap();
        b.emit(OpCode::Ret).unwrap();

        let err = check_stack(&b).unwrap_err();
        assert!(matches!(err, AssemblerError::EmptyStackRequired { index: 1, height: 1, .. }));
    }

    #[test]
    fn test_ret_pops_return_value() {
        let mut b = body_returning();
        b.emit_ldc_i4(1).unwrap();
        b.emit(OpCode::Ret).unwrap();
        assert_eq!(check_stack(&b).unwrap(), 1);

        let mut b = body_returning();
        b.emit(OpCode::Ret).unwrap();
        assert!(matches!(
            check_stack(&b),
            Err(AssemblerError::StackUnderflow { index: 0, .. })
        ));
    }

    // ==========================================================================
    // Control flow
    // ==========================================================================

    #[test]
    fn test_branch_merge_with_equal_heights() {
        let mut b = body_returning();
        let else_branch = b.placeholder().unwrap();
        let join = b.placeholder().unwrap();

        b.emit_arg(VarAccess::Load, 0).unwrap();
        b.emit_branch(OpCode::Brfalse, else_branch).unwrap();
        b.emit_ldc_i4(1).unwrap();
        b.emit_branch(OpCode::Br, join).unwrap();
        b.emit_label(else_branch).unwrap();
        b.emit_ldc_i4(2).unwrap();
        b.emit_label(join).unwrap();
        b.emit(OpCode::Ret).unwrap();

        crate::bytecode::resolve::resolve_branches(&mut b).unwrap();
        assert_eq!(check_stack(&b).unwrap(), 1);
    }

    #[test]
    fn test_branch_merge_with_different_heights() {
        let mut b = body();
        let join = b.placeholder().unwrap();

        b.emit_ldc_i4(1).unwrap();
        b.emit_branch(OpCode::Brtrue, join).unwrap();
        b.emit_ldc_i4(7).unwrap();
        b.emit_label(join).unwrap();
        b.emit(OpCode::Pop).unwrap();
        b.emit(OpCode::Ret).unwrap();

        crate::bytecode::resolve::resolve_branches(&mut b).unwrap();
        let err = check_stack(&b).unwrap_err();
        assert!(matches!(
            err,
            AssemblerError::StackHeightMismatch {
                index: 3,
                recorded: 0,
                incoming: 1,
            }
        ));
    }

    #[test]
    fn test_backward_branch_mismatch() {
        let mut b = body();
        let top = b.emit(OpCode::Nop).unwrap();
        b.emit_ldc_i4(1).unwrap();
        b.emit_branch(OpCode::Br, top).unwrap();

        let err = check_stack(&b).unwrap_err();
        assert!(matches!(err, AssemblerError::StackHeightMismatch { index: 0, .. }));
    }

    #[test]
    fn test_switch_propagates_to_every_target() {
        let mut b = body();
        let a = b.placeholder().unwrap();
        let c = b.placeholder().unwrap();
        b.emit_ldc_i4(3).unwrap();
        b.emit_ldc_i4(0).unwrap();
        b.emit_switch(&[a, c]).unwrap();
        b.emit(OpCode::Pop).unwrap();
        b.emit(OpCode::Ret).unwrap();
        b.emit_label(a).unwrap();
        b.emit(OpCode::Pop).unwrap();
        b.emit(OpCode::Ret).unwrap();
        b.emit_label(c).unwrap();
        b.emit(OpCode::Ret).unwrap();

        crate::bytecode::resolve::resolve_branches(&mut b).unwrap();
        // the second target is reached with one value still on the stack
        let err = check_stack(&b).unwrap_err();
        assert!(matches!(err, AssemblerError::EmptyStackRequired { index: 7, height: 1, .. }));
    }

    #[test]
    fn test_code_after_throw_restarts_from_recorded_height() {
        let mut b = body();
        b.emit(OpCode::Ldnull).unwrap();
        b.emit(OpCode::Throw).unwrap();
        b.emit(OpCode::Ret).unwrap();
        assert_eq!(check_stack(&b).unwrap(), 1);
    }

    // ==========================================================================
    // Exception regions
    // ==========================================================================

    #[test]
    fn test_catch_region_seeds_handler_height() {
        let mut b = body();
        let end = b.placeholder().unwrap();

        let try_start = b.emit(OpCode::Nop).unwrap();
        for _ in 0..8 {
            b.emit(OpCode::Nop).unwrap();
        }
        b.emit_branch(OpCode::Leave, end).unwrap();
        let handler = b.emit(OpCode::Pop).unwrap();
        b.emit_branch(OpCode::Leave, end).unwrap();
        b.emit_label(end).unwrap();
        b.emit(OpCode::Ret).unwrap();

        b.add_region(ExceptionRegion::new(try_start, Some(handler)).catch(
            TypeSig::object(),
            handler,
            Some(end),
        ))
        .unwrap();
        crate::bytecode::resolve::resolve_branches(&mut b).unwrap();

        assert_eq!(b.position_of(handler.id()), Some(10));
        assert_eq!(check_stack(&b).unwrap(), 1);

        let positions = b.positions();
        let mut recorded = vec![None; b.len()];
        seed_regions(&b, &positions, &mut recorded).unwrap();
        assert_eq!(recorded[0], Some(0));
        assert_eq!(recorded[10], Some(1));
        assert!(recorded[1..10].iter().all(Option::is_none));
    }

    #[test]
    fn test_finally_handler_starts_empty() {
        let mut b = body();
        let end = b.placeholder().unwrap();
        let try_start = b.emit_ldc_i4(1).unwrap();
        b.emit(OpCode::Pop).unwrap();
        b.emit_branch(OpCode::Leave, end).unwrap();
        let handler = b.emit(OpCode::Pop).unwrap();
        b.emit(OpCode::Endfinally).unwrap();
        b.emit_label(end).unwrap();
        b.emit(OpCode::Ret).unwrap();

        b.add_region(ExceptionRegion::new(try_start, Some(handler)).finally(handler, Some(end)))
            .unwrap();
        crate::bytecode::resolve::resolve_branches(&mut b).unwrap();

        let err = check_stack(&b).unwrap_err();
        assert!(matches!(err, AssemblerError::StackUnderflow { index: 3, .. }));
    }

    #[test]
    fn test_leave_empties_stack() {
        let mut b = body();
        let end = b.placeholder().unwrap();
        let try_start = b.emit_ldc_i4(1).unwrap();
        b.emit_ldc_i4(2).unwrap();
        b.emit_branch(OpCode::Leave, end).unwrap();
        let handler = b.emit(OpCode::Endfinally).unwrap();
        b.emit_label(end).unwrap();
        b.emit(OpCode::Ret).unwrap();

        b.add_region(ExceptionRegion::new(try_start, Some(handler)).finally(handler, Some(end)))
            .unwrap();
        crate::bytecode::resolve::resolve_branches(&mut b).unwrap();

        assert_eq!(check_stack(&b).unwrap(), 2);
    }

    /// try: nop, leave | filter: `filter` then endfilter | handler: pop, leave | ret
    fn filtered(b: &mut MethodBody, filter: &[OpCode]) -> (Label, Label) {
        let end = b.placeholder().unwrap();
        let try_start = b.emit(OpCode::Nop).unwrap();
        b.emit_branch(OpCode::Leave, end).unwrap();
        let filter_start = b.emit(filter[0]).unwrap();
        for op in &filter[1..] {
            b.emit(*op).unwrap();
        }
        b.emit(OpCode::Endfilter).unwrap();
        let handler = b.emit(OpCode::Pop).unwrap();
        b.emit_branch(OpCode::Leave, end).unwrap();
        b.emit_label(end).unwrap();
        b.emit(OpCode::Ret).unwrap();

        b.add_region(ExceptionRegion::new(try_start, Some(filter_start)).filter(
            filter_start,
            handler,
            Some(end),
        ))
        .unwrap();
        crate::bytecode::resolve::resolve_branches(b).unwrap();
        (filter_start, handler)
    }

    #[test]
    fn test_filter_seeds_one() {
        let mut b = body();
        let (filter_start, handler) = filtered(&mut b, &[OpCode::Pop, OpCode::LdcI4_1]);
        assert_eq!(b.position_of(filter_start.id()), Some(2));
        assert_eq!(b.position_of(handler.id()), Some(5));

        let positions = b.positions();
        let mut recorded = vec![None; b.len()];
        seed_regions(&b, &positions, &mut recorded).unwrap();
        assert_eq!(recorded[0], Some(0));
        assert_eq!(recorded[2], Some(1));
        assert_eq!(recorded[5], Some(1));
        assert_eq!(recorded[3], None);

        assert_eq!(check_stack(&b).unwrap(), 1);
    }

    #[test]
    fn test_endfilter_requires_single_value() {
        // exception object plus the verdict
        let mut b = body();
        filtered(&mut b, &[OpCode::LdcI4_1]);
        let err = check_stack(&b).unwrap_err();
        assert_eq!(
            err,
            AssemblerError::EmptyStackRequired {
                index: 3,
                opcode: "endfilter".to_string(),
                height: 1,
            }
        );

        // exception object dropped with no verdict pushed
        let mut b = body();
        filtered(&mut b, &[OpCode::Pop]);
        let err = check_stack(&b).unwrap_err();
        assert!(matches!(
            err,
            AssemblerError::StackUnderflow { index: 3, needed: 1, available: 0, .. }
        ));
    }

    #[test]
    fn test_fault_handler_starts_empty() {
        let mut b = body();
        let end = b.placeholder().unwrap();
        let try_start = b.emit(OpCode::Nop).unwrap();
        b.emit_branch(OpCode::Leave, end).unwrap();
        let handler = b.emit(OpCode::Endfinally).unwrap();
        b.emit_label(end).unwrap();
        b.emit(OpCode::Ret).unwrap();
        b.add_region(ExceptionRegion::new(try_start, Some(handler)).fault(handler, Some(end)))
            .unwrap();
        crate::bytecode::resolve::resolve_branches(&mut b).unwrap();

        let positions = b.positions();
        let mut recorded = vec![None; b.len()];
        seed_regions(&b, &positions, &mut recorded).unwrap();
        assert_eq!(recorded[2], Some(0));
        assert_eq!(check_stack(&b).unwrap(), 0);

        let mut b = body();
        let end = b.placeholder().unwrap();
        let try_start = b.emit(OpCode::Nop).unwrap();
        b.emit_branch(OpCode::Leave, end).unwrap();
        let handler = b.emit(OpCode::Pop).unwrap();
        b.emit(OpCode::Endfinally).unwrap();
        b.emit_label(end).unwrap();
        b.emit(OpCode::Ret).unwrap();
        b.add_region(ExceptionRegion::new(try_start, Some(handler)).fault(handler, Some(end)))
            .unwrap();
        crate::bytecode::resolve::resolve_branches(&mut b).unwrap();

        let err = check_stack(&b).unwrap_err();
        assert!(matches!(err, AssemblerError::StackUnderflow { index: 2, .. }));
    }
}
