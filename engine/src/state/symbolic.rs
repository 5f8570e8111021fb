use std::collections::{BTreeMap, HashMap};

use crate::{
    arch::{MemoryAccess, RegisterId},
    expr::{ExpressionOrigin, SharedSymbolicExpression},
};

/// A memory byte bound to byte `index` (least significant first) of a memory
/// expression.
#[derive(Debug, Clone)]
pub(crate) struct MemoryCell {
    pub expr: SharedSymbolicExpression,
    pub index: u32,
}

/// Bindings of registers and memory bytes to symbolic expressions.
#[derive(Default)]
pub(crate) struct SymbolicState {
    pub(super) registers: HashMap<RegisterId, SharedSymbolicExpression>,
    pub(super) memory: BTreeMap<u64, MemoryCell>,
    /// Stores by start address, for loads that match them exactly.
    pub(super) aligned: BTreeMap<u64, SharedSymbolicExpression>,
}

impl SymbolicState {
    pub(crate) fn register(&self, parent: RegisterId) -> Option<&SharedSymbolicExpression> {
        self.registers.get(&parent)
    }

    pub(crate) fn memory(&self, address: u64) -> Option<&MemoryCell> {
        self.memory.get(&address)
    }

    /// The store expression covering exactly `access`, if any.
    pub(crate) fn aligned(&self, access: &MemoryAccess) -> Option<&SharedSymbolicExpression> {
        self.aligned
            .get(&access.address())
            .filter(|expr| stored_access(expr) == Some(*access))
    }

    /// Start addresses of the aligned stores overlapping `access`.
    pub(crate) fn overlapping_aligned(&self, access: &MemoryAccess) -> Vec<u64> {
        let start = access
            .address()
            .saturating_sub(u64::from(crate::arch::MAX_ACCESS_SIZE) - 1);
        self.aligned
            .range(start..=access.end())
            .filter(|(_, expr)| stored_access(expr).is_some_and(|a| a.overlaps(access)))
            .map(|(address, _)| *address)
            .collect()
    }

    pub(crate) fn registers(&self) -> impl Iterator<Item = (&RegisterId, &SharedSymbolicExpression)> {
        self.registers.iter()
    }

    pub(crate) fn memory_cells(&self) -> impl Iterator<Item = (&u64, &MemoryCell)> {
        self.memory.iter()
    }
}

fn stored_access(expr: &SharedSymbolicExpression) -> Option<MemoryAccess> {
    match expr.origin() {
        Some(ExpressionOrigin::Memory(access)) => Some(access),
        _ => None,
    }
}
