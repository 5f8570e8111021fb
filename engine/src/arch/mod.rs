mod registers;
pub mod x86;

use std::fmt;

use derive_more as dm;
use serde::Deserialize;

use crate::error::{Error, Result};

pub use registers::{Register, RegisterId};

#[derive(Debug, dm::Display, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchitectureKind {
    #[display("x86")]
    #[serde(alias = "i386", alias = "ia32")]
    X86,
    #[display("x86-64")]
    #[serde(alias = "x86-64", alias = "x64", alias = "amd64")]
    X86_64,
}

impl ArchitectureKind {
    pub fn bitness(self) -> u32 {
        match self {
            Self::X86 => 32,
            Self::X86_64 => 64,
        }
    }

    /// Size of a stack slot and of a pointer in bytes.
    pub fn pointer_size(self) -> u32 {
        self.bitness() / 8
    }

    pub fn program_counter(self) -> RegisterId {
        match self {
            Self::X86 => RegisterId::Eip,
            Self::X86_64 => RegisterId::Rip,
        }
    }

    pub fn stack_pointer(self) -> RegisterId {
        match self {
            Self::X86 => RegisterId::Esp,
            Self::X86_64 => RegisterId::Rsp,
        }
    }

    pub fn register(self, id: RegisterId) -> Result<Register> {
        Register::resolve(id, self).ok_or_else(|| {
            Error::configuration(format!("register `{id}` is not available in {self}"))
        })
    }

    /// All registers available in the architecture.
    pub fn registers(self) -> impl Iterator<Item = Register> {
        RegisterId::ALL
            .iter()
            .filter_map(move |id| Register::resolve(*id, self))
    }

    /// The registers that hold their own storage.
    pub fn parent_registers(self) -> impl Iterator<Item = Register> {
        self.registers().filter(Register::is_parent)
    }
}

/// A contiguous little-endian memory cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryAccess {
    address: u64,
    size: u32,
}

pub const MAX_ACCESS_SIZE: u32 = 8;

impl MemoryAccess {
    /// `size` is in bytes and must be between 1 and 8.
    pub fn new(address: u64, size: u32) -> Result<Self> {
        if !(1..=MAX_ACCESS_SIZE).contains(&size) {
            return Err(Error::range(format!(
                "memory access size must be between 1 and {MAX_ACCESS_SIZE} bytes, got {size}"
            )));
        }
        if address.checked_add(u64::from(size) - 1).is_none() {
            return Err(Error::range(format!(
                "memory access at {address:#x} of {size} bytes wraps around the address space"
            )));
        }
        Ok(Self { address, size })
    }

    pub fn address(&self) -> u64 {
        self.address
    }

    /// Size in bytes.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Width in bits.
    pub fn bits(&self) -> u32 {
        self.size * 8
    }

    /// Addresses of the bytes, least significant first.
    pub fn byte_addresses(&self) -> impl DoubleEndedIterator<Item = u64> {
        let address = self.address;
        (0..u64::from(self.size)).map(move |i| address + i)
    }

    /// Address of the last byte.
    pub fn end(&self) -> u64 {
        self.address + u64::from(self.size) - 1
    }

    pub fn overlaps(&self, other: &Self) -> bool {
        self.address <= other.end() && other.address <= self.end()
    }
}

impl fmt::Display for MemoryAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[@{:#x}]:{} bv[{}..0]",
            self.address,
            self.bits(),
            self.bits() - 1
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_access_bounds() {
        assert!(MemoryAccess::new(0x1000, 0).is_err());
        assert!(MemoryAccess::new(0x1000, 9).is_err());
        assert!(MemoryAccess::new(u64::MAX, 2).is_err());
        let access = MemoryAccess::new(0x1000, 8).unwrap();
        assert_eq!(access.to_string(), "[@0x1000]:64 bv[63..0]");
        assert!(access.overlaps(&MemoryAccess::new(0x1007, 1).unwrap()));
        assert!(!access.overlaps(&MemoryAccess::new(0x1008, 4).unwrap()));
    }

    #[test]
    fn register_availability() {
        assert!(ArchitectureKind::X86.register(RegisterId::Rax).is_err());
        assert_eq!(
            ArchitectureKind::X86_64
                .register(RegisterId::Eax)
                .map(|r| r.parent())
                .ok(),
            Some(RegisterId::Rax)
        );
        assert!(ArchitectureKind::X86
            .parent_registers()
            .all(|r| r.size() == 32 || r.is_flag()));
    }
}
