//! Method bodies.
//!
//! A body owns an arena of instructions addressed by [`InstrId`] and a
//! separate program order. Instructions are created into the arena and only
//! become part of the stream once placed; placeholders are dropped from the
//! order by branch resolution but keep their arena slot, so ids never move.

use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

use crate::bytecode::ir::{InstrId, Instruction, Label, LocalId, StreamId};
use crate::error::{AssemblerError, Result};
use crate::metadata::signature::{MethodSig, TypeSig};

static NEXT_STREAM: AtomicU32 = AtomicU32::new(0);

// =============================================================================
// Locals
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Local {
    pub id: LocalId,
    pub ty: TypeSig,
    pub name: String,
}

/// Declared local handles plus the registered variable set.
///
/// Indices follow registration order and are recomputed whenever the set
/// changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalSet {
    declared: Vec<Local>,
    registered: Vec<LocalId>,
}

impl LocalSet {
    pub(crate) fn declare(&mut self, ty: TypeSig, name: &str) -> LocalId {
        let id = LocalId(self.declared.len() as u32);
        self.declared.push(Local {
            id,
            ty,
            name: name.to_string(),
        });
        id
    }

    /// Append `id` to the registered set. Returns its index.
    pub(crate) fn register(&mut self, id: LocalId) -> u16 {
        if let Some(index) = self.index_of(id) {
            return index;
        }
        self.registered.push(id);
        (self.registered.len() - 1) as u16
    }

    pub(crate) fn replace(&mut self, ids: Vec<LocalId>) {
        self.registered.clear();
        for id in ids {
            self.register(id);
        }
    }

    pub fn is_declared(&self, id: LocalId) -> bool {
        (id.0 as usize) < self.declared.len()
    }

    pub fn get(&self, id: LocalId) -> Option<&Local> {
        self.declared.get(id.0 as usize)
    }

    /// Positional index, `None` until registered.
    pub fn index_of(&self, id: LocalId) -> Option<u16> {
        self.registered
            .iter()
            .position(|l| *l == id)
            .map(|i| i as u16)
    }

    /// Registered locals in index order.
    pub fn iter(&self) -> impl Iterator<Item = &Local> {
        self.registered
            .iter()
            .filter_map(|id| self.declared.get(id.0 as usize))
    }

    pub fn len(&self) -> usize {
        self.registered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registered.is_empty()
    }
}

// =============================================================================
// Exception regions
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HandlerKind {
    /// Catches exceptions assignable to the given type.
    Catch(TypeSig),
    /// Runs the filter block starting at `filter_start` to decide.
    Filter { filter_start: Label },
    Finally,
    Fault,
}

/// Ranges are half-open: `end` is the first instruction after the range,
/// `None` meaning the end of the body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Handler {
    pub kind: HandlerKind,
    pub start: Label,
    pub end: Option<Label>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptionRegion {
    pub try_start: Label,
    pub try_end: Option<Label>,
    pub handlers: Vec<Handler>,
}

impl ExceptionRegion {
    pub fn new(try_start: Label, try_end: Option<Label>) -> Self {
        Self {
            try_start,
            try_end,
            handlers: Vec::new(),
        }
    }

    pub fn catch(mut self, ty: TypeSig, start: Label, end: Option<Label>) -> Self {
        self.handlers.push(Handler {
            kind: HandlerKind::Catch(ty),
            start,
            end,
        });
        self
    }

    pub fn filter(mut self, filter_start: Label, start: Label, end: Option<Label>) -> Self {
        self.handlers.push(Handler {
            kind: HandlerKind::Filter { filter_start },
            start,
            end,
        });
        self
    }

    pub fn finally(mut self, start: Label, end: Option<Label>) -> Self {
        self.handlers.push(Handler {
            kind: HandlerKind::Finally,
            start,
            end,
        });
        self
    }

    pub fn fault(mut self, start: Label, end: Option<Label>) -> Self {
        self.handlers.push(Handler {
            kind: HandlerKind::Fault,
            start,
            end,
        });
        self
    }

    /// Every boundary label, starts and ends alike.
    pub fn labels(&self) -> Vec<Label> {
        let mut labels = vec![self.try_start];
        labels.extend(self.try_end);
        for h in &self.handlers {
            if let HandlerKind::Filter { filter_start } = &h.kind {
                labels.push(*filter_start);
            }
            labels.push(h.start);
            labels.extend(h.end);
        }
        labels
    }
}

// =============================================================================
// Body
// =============================================================================

#[derive(Debug, Clone)]
pub struct MethodBody {
    pub(crate) stream: StreamId,
    pub(crate) instrs: Vec<Instruction>,
    pub(crate) placed: Vec<bool>,
    pub(crate) order: Vec<InstrId>,
    pub(crate) locals: LocalSet,
    pub(crate) regions: Vec<ExceptionRegion>,
    pub(crate) has_this: bool,
    pub(crate) param_count: u16,
    pub(crate) returns_value: bool,
    pub init_locals: bool,
    pub(crate) max_stack: Option<u16>,
}

impl MethodBody {
    /// Empty body for a method with signature `sig`. Fails when the
    /// argument slots do not fit a `u16`.
    pub fn new(sig: &MethodSig) -> Result<Self> {
        let slots = sig.arg_slots();
        let arg_count = u16::try_from(slots).map_err(|_| AssemblerError::TooManyParameters {
            count: slots,
            max: u16::MAX,
        })?;
        Ok(Self {
            stream: StreamId(NEXT_STREAM.fetch_add(1, Ordering::Relaxed)),
            instrs: Vec::new(),
            placed: Vec::new(),
            order: Vec::new(),
            locals: LocalSet::default(),
            regions: Vec::new(),
            has_this: sig.has_this,
            param_count: arg_count - u16::from(sig.has_this),
            returns_value: sig.returns_value(),
            init_locals: true,
            max_stack: None,
        })
    }

    pub fn stream(&self) -> StreamId {
        self.stream
    }

    /// Number of placed instructions.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Instructions in program order.
    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.order.iter().map(|id| &self.instrs[id.index()])
    }

    pub fn instruction(&self, id: InstrId) -> Option<&Instruction> {
        self.instrs.get(id.index())
    }

    /// Instruction at program position `index`.
    pub fn at(&self, index: usize) -> Option<&Instruction> {
        self.order.get(index).map(|id| &self.instrs[id.index()])
    }

    pub fn order(&self) -> &[InstrId] {
        &self.order
    }

    /// Program position of every arena slot, `None` for instructions not in
    /// the stream.
    pub fn positions(&self) -> Vec<Option<usize>> {
        let mut positions = vec![None; self.instrs.len()];
        for (pos, id) in self.order.iter().enumerate() {
            positions[id.index()] = Some(pos);
        }
        positions
    }

    pub fn position_of(&self, id: InstrId) -> Option<usize> {
        self.order.iter().position(|i| *i == id)
    }

    pub fn locals(&self) -> &LocalSet {
        &self.locals
    }

    pub fn regions(&self) -> &[ExceptionRegion] {
        &self.regions
    }

    pub fn returns_value(&self) -> bool {
        self.returns_value
    }

    /// Argument slots, counting `this`.
    pub fn arg_count(&self) -> u16 {
        self.param_count + u16::from(self.has_this)
    }

    pub fn max_stack(&self) -> Option<u16> {
        self.max_stack
    }

    pub fn is_finalized(&self) -> bool {
        self.max_stack.is_some()
    }

    /// Byte offset of every instruction in program order, followed by the
    /// total code size.
    pub fn offsets(&self) -> Vec<u32> {
        let mut offsets = Vec::with_capacity(self.order.len() + 1);
        let mut offset = 0;
        for instr in self.instructions() {
            offsets.push(offset);
            offset += instr.size();
        }
        offsets.push(offset);
        offsets
    }

    pub fn code_size(&self) -> u32 {
        self.instructions().map(Instruction::size).sum()
    }
}
