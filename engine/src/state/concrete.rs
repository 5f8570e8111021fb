use std::collections::{BTreeMap, HashMap};

use common::utils::low_mask;

use crate::{
    arch::{ArchitectureKind, MemoryAccess, Register, RegisterId},
    error::{Error, Result},
};

/// Concrete register file and byte-addressed memory.
///
/// Registers are stored by parent and always exist (defaulting to zero).
/// Memory bytes exist only once written.
#[derive(Debug, Clone)]
pub struct ConcreteState {
    arch: ArchitectureKind,
    registers: HashMap<RegisterId, u64>,
    memory: BTreeMap<u64, u8>,
}

impl ConcreteState {
    pub(crate) fn new(arch: ArchitectureKind) -> Self {
        Self {
            arch,
            registers: HashMap::new(),
            memory: BTreeMap::new(),
        }
    }

    pub fn arch(&self) -> ArchitectureKind {
        self.arch
    }

    /// Resolves a register of the state's architecture.
    pub fn register(&self, id: RegisterId) -> Result<Register> {
        self.arch.register(id)
    }

    pub fn register_value(&self, reg: &Register) -> u64 {
        let parent = self.registers.get(&reg.parent()).copied().unwrap_or(0);
        (parent >> reg.low()) & low_mask(reg.size())
    }

    /// Writes the bits of `reg` in its parent, keeping the other bits.
    /// Extra bits of `value` are ignored.
    pub fn set_register_value(&mut self, reg: &Register, value: u64) {
        let mask = low_mask(reg.size()) << reg.low();
        let parent = self.registers.entry(reg.parent()).or_insert(0);
        *parent = (*parent & !mask) | ((value << reg.low()) & mask);
    }

    pub(crate) fn parent_value(&self, parent: RegisterId) -> Option<u64> {
        self.registers.get(&parent).copied()
    }

    pub(crate) fn restore_parent_value(&mut self, parent: RegisterId, value: Option<u64>) {
        match value {
            Some(value) => self.registers.insert(parent, value),
            None => self.registers.remove(&parent),
        };
    }

    pub fn is_mapped(&self, address: u64) -> bool {
        self.memory.contains_key(&address)
    }

    /// Whether every byte of `access` has a value.
    pub fn is_access_mapped(&self, access: &MemoryAccess) -> bool {
        access.byte_addresses().all(|a| self.is_mapped(a))
    }

    pub fn memory_byte(&self, address: u64) -> Option<u8> {
        self.memory.get(&address).copied()
    }

    pub fn set_memory_byte(&mut self, address: u64, value: u8) {
        self.memory.insert(address, value);
    }

    pub(crate) fn restore_memory_byte(&mut self, address: u64, value: Option<u8>) {
        match value {
            Some(value) => self.memory.insert(address, value),
            None => self.memory.remove(&address),
        };
    }

    /// Little-endian value of `access`.
    pub fn memory_value(&self, access: &MemoryAccess) -> Result<u64> {
        access
            .byte_addresses()
            .enumerate()
            .try_fold(0u64, |acc, (i, address)| {
                self.memory_byte(address)
                    .map(|byte| acc | (u64::from(byte) << (8 * i)))
                    .ok_or(Error::UnmappedMemory { address })
            })
    }

    pub fn set_memory_value(&mut self, access: &MemoryAccess, value: u64) {
        for (i, address) in access.byte_addresses().enumerate() {
            self.set_memory_byte(address, (value >> (8 * i)) as u8);
        }
    }

    /// The bytes from `address`, failing at the first unmapped one.
    pub fn memory_area(&self, address: u64, size: usize) -> Result<Vec<u8>> {
        (0..size as u64)
            .map(|i| {
                let address = address.wrapping_add(i);
                self.memory_byte(address)
                    .ok_or(Error::UnmappedMemory { address })
            })
            .collect()
    }

    pub fn set_memory_area(&mut self, address: u64, bytes: &[u8]) {
        for (i, byte) in bytes.iter().enumerate() {
            self.set_memory_byte(address.wrapping_add(i as u64), *byte);
        }
    }

    /// Removes the values of the bytes in `address..address + size`.
    pub fn unmap_memory(&mut self, address: u64, size: usize) {
        for i in 0..size as u64 {
            self.memory.remove(&address.wrapping_add(i));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_registers_share_storage() {
        let mut state = ConcreteState::new(ArchitectureKind::X86_64);
        let rax = state.register(RegisterId::Rax).unwrap();
        let ah = state.register(RegisterId::Ah).unwrap();
        let eax = state.register(RegisterId::Eax).unwrap();

        state.set_register_value(&rax, 0x1122_3344_5566_7788);
        assert_eq!(state.register_value(&ah), 0x77);
        state.set_register_value(&ah, 0xff);
        assert_eq!(state.register_value(&rax), 0x1122_3344_5566_ff88);
        assert_eq!(state.register_value(&eax), 0x5566_ff88);
    }

    #[test]
    fn memory_is_little_endian_and_strict() {
        let mut state = ConcreteState::new(ArchitectureKind::X86);
        let access = MemoryAccess::new(0x1000, 4).unwrap();
        assert!(matches!(
            state.memory_value(&access),
            Err(Error::UnmappedMemory { address: 0x1000 })
        ));

        state.set_memory_value(&access, 0xdead_beef);
        assert_eq!(state.memory_area(0x1000, 4).unwrap(), [0xef, 0xbe, 0xad, 0xde]);
        assert_eq!(state.memory_value(&access).unwrap(), 0xdead_beef);

        state.unmap_memory(0x1002, 1);
        assert!(!state.is_access_mapped(&access));
    }
}
