use std::fmt::Write;

use crate::bytecode::body::{HandlerKind, MethodBody};
use crate::bytecode::ir::{InstrId, Operand};

/// Render a body as an IL-style listing.
///
/// Before finalization, branch operands show arena ids (`IL_#n`); positions
/// are printed once every target is in the stream.
pub fn disassemble(name: &str, body: &MethodBody) -> String {
    let mut out = String::new();
    let offsets = body.offsets();
    let positions = body.positions();
    let jump_targets = collect_jump_targets(body);

    let _ = writeln!(out, "════════════════════════════════════════");
    let _ = writeln!(out, " {}", name);
    let _ = writeln!(
        out,
        " {} instructions, {} bytes, maxstack {}",
        body.len(),
        offsets.last().copied().unwrap_or(0),
        body.max_stack()
            .map(|m| m.to_string())
            .unwrap_or_else(|| "?".to_string())
    );
    let _ = writeln!(out, "════════════════════════════════════════");

    for local in body.locals().iter() {
        let index = body.locals().index_of(local.id).unwrap_or_default();
        let _ = writeln!(out, "  .local [{}] {} {}", index, local.ty, local.name);
    }

    let target_label = |id: &InstrId| match positions.get(id.index()).copied().flatten() {
        Some(pos) => format!("IL_{:04x}", offsets[pos]),
        None => format!("IL_#{}", id.0),
    };

    for (pos, instr) in body.instructions().enumerate() {
        if jump_targets.contains(&pos) {
            let _ = writeln!(out, "      ┌──────────────────────────────────");
        }
        let marker = if jump_targets.contains(&pos) { "► " } else { "  " };
        let operand = match &instr.operand {
            Operand::Branch(t) => target_label(t),
            Operand::Switch(ts) => format!(
                "({})",
                ts.iter().map(target_label).collect::<Vec<_>>().join(", ")
            ),
            Operand::Local(l) => match body.locals().index_of(*l) {
                Some(i) => i.to_string(),
                None => format!("V_{}", l.0),
            },
            other => other.to_string(),
        };
        let _ = writeln!(
            out,
            "{:04} {}IL_{:04x}: {:<12}{}",
            pos,
            marker,
            offsets[pos],
            instr.opcode.name(),
            operand
        );
    }

    for region in body.regions() {
        let start = target_label(&region.try_start.id());
        let end = region
            .try_end
            .map(|l| target_label(&l.id()))
            .unwrap_or_else(|| "end".to_string());
        let _ = writeln!(out, "  .try {} to {}", start, end);
        for handler in &region.handlers {
            let kind = match &handler.kind {
                HandlerKind::Catch(ty) => format!("catch {}", ty),
                HandlerKind::Filter { filter_start } => {
                    format!("filter {}", target_label(&filter_start.id()))
                }
                HandlerKind::Finally => "finally".to_string(),
                HandlerKind::Fault => "fault".to_string(),
            };
            let end = handler
                .end
                .map(|l| target_label(&l.id()))
                .unwrap_or_else(|| "end".to_string());
            let _ = writeln!(
                out,
                "    {} handler {} to {}",
                kind,
                target_label(&handler.start.id()),
                end
            );
        }
    }

    out
}

/// Program positions that some branch lands on.
fn collect_jump_targets(body: &MethodBody) -> Vec<usize> {
    let positions = body.positions();
    let mut targets = Vec::new();

    for instr in body.instructions() {
        for t in instr.targets() {
            if let Some(pos) = positions.get(t.index()).copied().flatten()
                && !targets.contains(&pos)
            {
                targets.push(pos);
            }
        }
    }

    targets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::finalize::finalize;
    use crate::bytecode::op::{OpCode, VarAccess};
    use crate::metadata::signature::{MethodSig, PrimitiveType, TypeSig};

    #[test]
    fn test_listing_marks_jump_targets() {
        let mut b = MethodBody::new(&MethodSig::new(TypeSig::void(), vec![PrimitiveType::I4.into()])).unwrap();
        let end = b.placeholder().unwrap();
        b.emit_arg(VarAccess::Load, 0).unwrap();
        b.emit_branch(OpCode::Brfalse, end).unwrap();
        b.emit_ldstr("hit").unwrap();
        b.emit(OpCode::Pop).unwrap();
        b.emit_label(end).unwrap();
        b.emit(OpCode::Ret).unwrap();
        finalize(&mut b).unwrap();

        let listing = disassemble("Hooks.Player::OnHit", &b);
        assert!(listing.contains("Hooks.Player::OnHit"));
        assert!(listing.contains("maxstack 1"));
        assert!(listing.contains("brfalse.s"));
        assert!(listing.contains("► IL_0009: ret"));
        assert!(listing.contains("\"hit\""));
    }

    #[test]
    fn test_listing_shows_locals_and_regions() {
        let mut b = MethodBody::new(&MethodSig::new(TypeSig::void(), vec![])).unwrap();
        let x = b.new_local(TypeSig::object(), "handler").unwrap();
        let end = b.placeholder().unwrap();
        let start = b.emit(OpCode::Ldnull).unwrap();
        b.emit_local(VarAccess::Store, x).unwrap();
        b.emit_branch(OpCode::Leave, end).unwrap();
        let handler = b.emit(OpCode::Endfinally).unwrap();
        b.emit_label(end).unwrap();
        b.emit(OpCode::Ret).unwrap();
        b.add_region(
            crate::bytecode::body::ExceptionRegion::new(start, Some(handler)).finally(handler, Some(end)),
        )
        .unwrap();
        finalize(&mut b).unwrap();

        let listing = disassemble("M", &b);
        assert!(listing.contains(".local [0] object handler"));
        assert!(listing.contains("stloc.0"));
        assert!(listing.contains(".try IL_0000 to IL_0004"));
        assert!(listing.contains("finally handler IL_0004 to IL_0005"));
    }
}
