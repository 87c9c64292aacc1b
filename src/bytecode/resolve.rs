//! Branch resolution.
//!
//! Moves every branch and region boundary off placeholders onto the next real
//! instruction, then drops the placeholders from the program order.

use tracing::trace;

use crate::bytecode::body::{ExceptionRegion, HandlerKind, MethodBody};
use crate::bytecode::ir::{InstrId, Label};
use crate::error::{AssemblerError, Result};

/// Where a placeholder chain starting at some target ends up.
enum Landing {
    Real(InstrId),
    /// The chain runs off the end of the body.
    End,
    NeverPlaced,
    /// Dropped by an earlier resolution.
    Removed,
}

fn land(body: &MethodBody, positions: &[Option<usize>], mut id: InstrId) -> Landing {
    loop {
        if !body.placed[id.index()] {
            return Landing::NeverPlaced;
        }
        if !body.instrs[id.index()].is_placeholder() {
            return Landing::Real(id);
        }
        let Some(pos) = positions[id.index()] else {
            return Landing::Removed;
        };
        match body.order.get(pos + 1) {
            Some(next) => id = *next,
            None => return Landing::End,
        }
    }
}

fn dangling_reason(landing: &Landing) -> &'static str {
    match landing {
        Landing::NeverPlaced => "branch target was created but never placed in the stream",
        Landing::End => "label is not followed by any instruction",
        Landing::Removed => "branch target was a label already removed by an earlier resolution",
        Landing::Real(_) => "",
    }
}

/// Errors are reported at the boundary's own position when it has one.
fn resolve_start(body: &MethodBody, positions: &[Option<usize>], label: &mut Label) -> Result<()> {
    match land(body, positions, label.id) {
        Landing::Real(id) => {
            label.id = id;
            Ok(())
        }
        other => {
            let index = positions[label.id.index()].unwrap_or(body.order.len());
            Err(AssemblerError::dangling(
                index,
                format!("exception region boundary: {}", dangling_reason(&other)),
            ))
        }
    }
}

fn resolve_end(
    body: &MethodBody,
    positions: &[Option<usize>],
    end: &mut Option<Label>,
) -> Result<()> {
    let Some(label) = end else {
        return Ok(());
    };
    match land(body, positions, label.id) {
        Landing::Real(id) => label.id = id,
        Landing::End => *end = None,
        other => {
            let index = positions[label.id.index()].unwrap_or(body.order.len());
            return Err(AssemblerError::dangling(
                index,
                format!("exception region boundary: {}", dangling_reason(&other)),
            ));
        }
    }
    Ok(())
}

fn resolve_regions(
    body: &MethodBody,
    positions: &[Option<usize>],
    regions: &mut [ExceptionRegion],
    end_markers: &mut Vec<Label>,
) -> Result<()> {
    for region in regions {
        resolve_start(body, positions, &mut region.try_start)?;
        end_markers.extend(region.try_end);
        resolve_end(body, positions, &mut region.try_end)?;
        for handler in &mut region.handlers {
            if let HandlerKind::Filter { filter_start } = &mut handler.kind {
                resolve_start(body, positions, filter_start)?;
            }
            resolve_start(body, positions, &mut handler.start)?;
            end_markers.extend(handler.end);
            resolve_end(body, positions, &mut handler.end)?;
        }
    }
    Ok(())
}

/// Retarget branches and region boundaries away from placeholders and delete
/// the placeholders. A second run on a resolved body changes nothing.
pub fn resolve_branches(body: &mut MethodBody) -> Result<()> {
    let positions = body.positions();

    for pos in 0..body.order.len() {
        let id = body.order[pos];
        let targets = body.instrs[id.index()].targets().to_vec();
        if targets.is_empty() {
            continue;
        }

        let mut resolved = Vec::with_capacity(targets.len());
        for target in targets {
            match land(body, &positions, target) {
                Landing::Real(real) => {
                    if real != target {
                        trace!(at = pos, from = target.0, to = real.0, "retarget branch");
                    }
                    resolved.push(real);
                }
                other => return Err(AssemblerError::dangling(pos, dangling_reason(&other))),
            }
        }
        body.instrs[id.index()]
            .targets_mut()
            .copy_from_slice(&resolved);
    }

    let mut regions = std::mem::take(&mut body.regions);
    let mut end_markers = Vec::new();
    let outcome = resolve_regions(body, &positions, &mut regions, &mut end_markers);
    body.regions = regions;
    outcome?;

    // A trailing label nothing lands on is a template defect unless it only
    // marked the end of a region.
    for (pos, id) in body.order.iter().enumerate() {
        if body.instrs[id.index()].is_placeholder()
            && matches!(land(body, &positions, *id), Landing::End)
            && !end_markers.iter().any(|l| l.id == *id)
        {
            return Err(AssemblerError::dangling(
                pos,
                "label is not followed by any instruction",
            ));
        }
    }

    let before = body.order.len();
    let instrs = &body.instrs;
    body.order.retain(|id| !instrs[id.index()].is_placeholder());
    let removed = before - body.order.len();
    if removed > 0 {
        trace!(removed, "removed placeholders");
    }
    Ok(())
}
