//! The dual concrete/symbolic machine state.
//!
//! Writes made while processing an instruction are journaled so that a
//! failing instruction can be rolled back as a whole.

mod concrete;
mod symbolic;

pub use concrete::ConcreteState;
pub(crate) use symbolic::{MemoryCell, SymbolicState};

use std::rc::Rc;

use crate::{
    arch::{ArchitectureKind, MemoryAccess, Register, RegisterId},
    ast::{context::AstContext, SharedAstNode},
    error::{Error, Result},
    expr::SharedSymbolicExpression,
};

enum Undo {
    Register {
        parent: RegisterId,
        value: Option<u64>,
    },
    Memory {
        address: u64,
        value: Option<u8>,
    },
    SymbolicRegister {
        parent: RegisterId,
        expr: Option<SharedSymbolicExpression>,
    },
    SymbolicMemory {
        address: u64,
        cell: Option<MemoryCell>,
    },
    Aligned {
        address: u64,
        expr: Option<SharedSymbolicExpression>,
    },
}

pub(crate) struct MachineState {
    concrete: ConcreteState,
    symbolic: SymbolicState,
    journal: Option<Vec<Undo>>,
}

impl MachineState {
    pub(crate) fn new(arch: ArchitectureKind) -> Self {
        Self {
            concrete: ConcreteState::new(arch),
            symbolic: SymbolicState::default(),
            journal: None,
        }
    }

    pub(crate) fn concrete(&self) -> &ConcreteState {
        &self.concrete
    }

    /// Direct access for callbacks. Writes made through it are not journaled.
    pub(crate) fn concrete_mut(&mut self) -> &mut ConcreteState {
        &mut self.concrete
    }

    pub(crate) fn symbolic(&self) -> &SymbolicState {
        &self.symbolic
    }

    pub(crate) fn begin(&mut self) {
        self.journal = Some(Vec::new());
    }

    pub(crate) fn commit(&mut self) {
        self.journal = None;
    }

    pub(crate) fn rollback(&mut self) {
        let Some(journal) = self.journal.take() else {
            return;
        };
        for undo in journal.into_iter().rev() {
            match undo {
                Undo::Register { parent, value } => {
                    self.concrete.restore_parent_value(parent, value)
                }
                Undo::Memory { address, value } => {
                    self.concrete.restore_memory_byte(address, value)
                }
                Undo::SymbolicRegister { parent, expr } => {
                    restore(&mut self.symbolic.registers, parent, expr)
                }
                Undo::SymbolicMemory { address, cell } => {
                    restore(&mut self.symbolic.memory, address, cell)
                }
                Undo::Aligned { address, expr } => {
                    restore(&mut self.symbolic.aligned, address, expr)
                }
            }
        }
    }

    fn record(&mut self, undo: impl FnOnce(&Self) -> Undo) {
        if self.journal.is_some() {
            let undo = undo(self);
            if let Some(journal) = self.journal.as_mut() {
                journal.push(undo);
            }
        }
    }

    pub(crate) fn set_register_value(&mut self, reg: &Register, value: u64) {
        let parent = reg.parent();
        self.record(|s| Undo::Register {
            parent,
            value: s.concrete.parent_value(parent),
        });
        self.concrete.set_register_value(reg, value);
    }

    pub(crate) fn set_memory_value(&mut self, access: &MemoryAccess, value: u64) {
        for address in access.byte_addresses() {
            self.record(|s| Undo::Memory {
                address,
                value: s.concrete.memory_byte(address),
            });
        }
        self.concrete.set_memory_value(access, value);
    }

    pub(crate) fn bind_register(
        &mut self,
        parent: RegisterId,
        expr: Option<SharedSymbolicExpression>,
    ) {
        self.record(|s| Undo::SymbolicRegister {
            parent,
            expr: s.symbolic.registers.get(&parent).cloned(),
        });
        restore(&mut self.symbolic.registers, parent, expr);
    }

    pub(crate) fn bind_memory(&mut self, address: u64, cell: Option<MemoryCell>) {
        self.record(|s| Undo::SymbolicMemory {
            address,
            cell: s.symbolic.memory.get(&address).cloned(),
        });
        restore(&mut self.symbolic.memory, address, cell);
    }

    /// Binds the bytes of `access` to `expr` and forgets aligned stores that
    /// the write overlaps. With `aligned`, `expr` becomes the aligned store
    /// of `access`.
    pub(crate) fn bind_memory_access(
        &mut self,
        access: &MemoryAccess,
        expr: Option<&SharedSymbolicExpression>,
        aligned: bool,
    ) {
        for (index, address) in access.byte_addresses().enumerate() {
            let cell = expr.map(|expr| MemoryCell {
                expr: expr.clone(),
                index: index as u32,
            });
            self.bind_memory(address, cell);
        }
        for address in self.symbolic.overlapping_aligned(access) {
            self.set_aligned(address, None);
        }
        if aligned {
            self.set_aligned(access.address(), expr.cloned());
        }
    }

    /// The AST of `reg`: a slice of its parent's expression if there is one,
    /// its concrete value otherwise.
    pub(crate) fn register_ast(&self, ast: &AstContext, reg: &Register) -> Result<SharedAstNode> {
        match self.symbolic.register(reg.parent()) {
            Some(expr) => {
                let node = ast.reference(expr);
                if reg.is_parent() {
                    Ok(node)
                } else {
                    ast.extract(reg.high(), reg.low(), &node)
                }
            }
            None => ast.bv(self.concrete.register_value(reg), reg.size()),
        }
    }

    /// The AST of the parent of `reg` once `node` is assigned to `reg`. The
    /// other bits of the parent are kept, or cleared with `clear_upper`.
    pub(crate) fn assigned_register_ast(
        &self,
        ast: &AstContext,
        reg: &Register,
        node: &SharedAstNode,
        clear_upper: bool,
    ) -> Result<SharedAstNode> {
        if reg.is_parent() {
            return Ok(node.clone());
        }
        let parent = self.concrete.register(reg.parent())?;
        if clear_upper && reg.low() == 0 {
            return ast.zx(parent.size() - reg.size(), node);
        }

        let previous = self.register_ast(ast, &parent)?;
        let mut parts = Vec::with_capacity(3);
        if reg.high() < parent.high() {
            parts.push(ast.extract(parent.high(), reg.high() + 1, &previous)?);
        }
        parts.push(node.clone());
        if reg.low() > 0 {
            parts.push(ast.extract(reg.low() - 1, 0, &previous)?);
        }
        ast.concat(&parts)
    }

    /// The AST of the bytes of `access`, most significant first. Runs of bytes
    /// bound to the same expression become a single slice of it, runs of
    /// unbound bytes a constant.
    pub(crate) fn memory_ast(&self, ast: &AstContext, access: &MemoryAccess) -> Result<SharedAstNode> {
        // Reports the lowest unmapped byte.
        if let Some(address) = access
            .byte_addresses()
            .find(|a| self.symbolic.memory(*a).is_none() && !self.concrete.is_mapped(*a))
        {
            return Err(Error::UnmappedMemory { address });
        }

        let mut parts = Vec::new();
        let mut addresses = access.byte_addresses().rev().peekable();
        while let Some(address) = addresses.next() {
            match self.symbolic.memory(address) {
                Some(cell) => {
                    let mut low = cell.index;
                    while let Some(c) = addresses.peek().and_then(|a| self.symbolic.memory(*a)) {
                        if !Rc::ptr_eq(&c.expr, &cell.expr) || c.index + 1 != low {
                            break;
                        }
                        low = c.index;
                        addresses.next();
                    }
                    let node = ast.reference(&cell.expr);
                    let (high, low) = (cell.index * 8 + 7, low * 8);
                    parts.push(if low == 0 && high + 1 == node.width() {
                        node
                    } else {
                        ast.extract(high, low, &node)?
                    });
                }
                None => {
                    let mut value = self.concrete_byte(address)?;
                    let mut bytes = 1;
                    while let Some(next) = addresses.next_if(|a| self.symbolic.memory(*a).is_none()) {
                        value = (value << 8) | self.concrete_byte(next)?;
                        bytes += 1;
                    }
                    parts.push(ast.bv(value, bytes * 8)?);
                }
            }
        }

        if parts.len() == 1 {
            Ok(parts.remove(0))
        } else {
            ast.concat(&parts)
        }
    }

    fn concrete_byte(&self, address: u64) -> Result<u64> {
        self.concrete
            .memory_byte(address)
            .map(u64::from)
            .ok_or(Error::UnmappedMemory { address })
    }

    fn set_aligned(&mut self, address: u64, expr: Option<SharedSymbolicExpression>) {
        self.record(|s| Undo::Aligned {
            address,
            expr: s.symbolic.aligned.get(&address).cloned(),
        });
        restore(&mut self.symbolic.aligned, address, expr);
    }
}

fn restore<K, V>(map: &mut impl Slot<K, V>, key: K, value: Option<V>) {
    match value {
        Some(value) => map.put(key, value),
        None => map.take(&key),
    }
}

/// The map operations `restore` needs, over both hash and B-tree maps.
trait Slot<K, V> {
    fn put(&mut self, key: K, value: V);
    fn take(&mut self, key: &K);
}

impl<K: Eq + std::hash::Hash, V> Slot<K, V> for std::collections::HashMap<K, V> {
    fn put(&mut self, key: K, value: V) {
        self.insert(key, value);
    }

    fn take(&mut self, key: &K) {
        self.remove(key);
    }
}

impl<K: Ord, V> Slot<K, V> for std::collections::BTreeMap<K, V> {
    fn put(&mut self, key: K, value: V) {
        self.insert(key, value);
    }

    fn take(&mut self, key: &K) {
        self.remove(key);
    }
}
