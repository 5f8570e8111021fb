use std::fmt;

use derive_more as dm;

use crate::{
    arch::{ArchitectureKind, MemoryAccess, Register},
    error::Result,
    expr::SharedSymbolicExpression,
};

/// Turns the opcode of an instruction into its mnemonic and operands.
///
/// Implementations report the result through [`Instruction::set_decoding`],
/// or fail with [`crate::Error::Decode`] for invalid bytes.
pub trait InstructionDecoder {
    fn decode(&self, arch: ArchitectureKind, inst: &mut Instruction) -> Result<()>;
}

/// Processing stages, in order.
#[derive(Debug, dm::Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Stage {
    #[default]
    Pending,
    Decoded,
    SemanticsApplied,
    Classified,
    Done,
}

/// Jump conditions, named after the `jcc` suffixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Condition {
    O,
    No,
    B,
    Ae,
    E,
    Ne,
    Be,
    A,
    S,
    Ns,
    P,
    Np,
    L,
    Ge,
    Le,
    G,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mnemonic {
    Mov,
    Movzx,
    Movsx,
    Movsxd,
    Lea,
    Xchg,
    Add,
    Adc,
    Sub,
    Sbb,
    Cmp,
    Inc,
    Dec,
    Neg,
    And,
    Or,
    Xor,
    Test,
    Not,
    Rol,
    Ror,
    Shl,
    Shr,
    Sar,
    Push,
    Pop,
    Call,
    Ret,
    Jmp,
    Jcc(Condition),
    Nop,
    Clc,
    Stc,
    Cmc,
    Cld,
    Std,
    /// Decoded but without modelled semantics.
    Other(String),
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", format!("{self:?}").to_lowercase())
    }
}

impl fmt::Display for Mnemonic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Jcc(condition) => write!(f, "j{condition}"),
            Self::Other(name) => write!(f, "{name}"),
            other => write!(f, "{}", format!("{other:?}").to_lowercase()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryOperand {
    pub base: Option<Register>,
    pub index: Option<Register>,
    pub scale: u32,
    /// Absolute target for program counter relative operands.
    pub displacement: u64,
    /// In bytes, zero when the operand is not accessed (e.g., `lea`).
    pub size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Register(Register),
    /// `value` is already sign-extended to `size` bits where the encoding
    /// asks for it.
    Immediate { value: u64, size: u32 },
    Memory(MemoryOperand),
}

impl Operand {
    /// Width in bits.
    pub fn size(&self) -> u32 {
        match self {
            Self::Register(reg) => reg.size(),
            Self::Immediate { size, .. } => *size,
            Self::Memory(mem) => mem.size * 8,
        }
    }
}

/// An instruction and, once processed, what it did.
#[derive(Debug, Clone, Default)]
pub struct Instruction {
    address: u64,
    opcode: Vec<u8>,

    pub(crate) size: usize,
    pub(crate) disassembly: String,
    pub(crate) mnemonic: Option<Mnemonic>,
    pub(crate) operands: Vec<Operand>,
    pub(crate) stage: Stage,

    pub(crate) read_registers: Vec<Register>,
    pub(crate) written_registers: Vec<Register>,
    pub(crate) undefined_registers: Vec<Register>,
    pub(crate) loads: Vec<MemoryAccess>,
    pub(crate) stores: Vec<MemoryAccess>,
    pub(crate) symbolic_expressions: Vec<SharedSymbolicExpression>,
    pub(crate) next_address: Option<u64>,
}

impl Instruction {
    /// An instruction at address zero.
    pub fn new(opcode: impl Into<Vec<u8>>) -> Self {
        Self::with_address(0, opcode)
    }

    pub fn with_address(address: u64, opcode: impl Into<Vec<u8>>) -> Self {
        Self {
            address,
            opcode: opcode.into(),
            ..Default::default()
        }
    }

    pub fn address(&self) -> u64 {
        self.address
    }

    pub fn set_address(&mut self, address: u64) {
        self.address = address;
    }

    pub fn opcode(&self) -> &[u8] {
        &self.opcode
    }

    pub fn set_opcode(&mut self, opcode: impl Into<Vec<u8>>) {
        self.opcode = opcode.into();
    }

    /// Length in bytes of the decoded instruction.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn disassembly(&self) -> &str {
        &self.disassembly
    }

    pub fn mnemonic(&self) -> Option<&Mnemonic> {
        self.mnemonic.as_ref()
    }

    pub fn operands(&self) -> &[Operand] {
        &self.operands
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Registers whose value was consulted.
    pub fn read_registers(&self) -> &[Register] {
        &self.read_registers
    }

    pub fn written_registers(&self) -> &[Register] {
        &self.written_registers
    }

    /// Registers whose value is architecturally unspecified afterwards.
    pub fn undefined_registers(&self) -> &[Register] {
        &self.undefined_registers
    }

    pub fn loads(&self) -> &[MemoryAccess] {
        &self.loads
    }

    pub fn stores(&self) -> &[MemoryAccess] {
        &self.stores
    }

    /// One expression per side effect, in creation order.
    pub fn symbolic_expressions(&self) -> &[SharedSymbolicExpression] {
        &self.symbolic_expressions
    }

    /// The address of the next instruction to execute.
    pub fn next_address(&self) -> Option<u64> {
        self.next_address
    }

    /// Records the decoding of the opcode and moves to [`Stage::Decoded`].
    pub fn set_decoding(
        &mut self,
        size: usize,
        mnemonic: Mnemonic,
        operands: Vec<Operand>,
        disassembly: String,
    ) {
        self.size = size;
        self.mnemonic = Some(mnemonic);
        self.operands = operands;
        self.disassembly = disassembly;
        self.stage = Stage::Decoded;
    }

    pub fn is_symbolized(&self) -> bool {
        self.symbolic_expressions.iter().any(|e| e.is_symbolized())
    }

    /// Forgets the results of an earlier processing.
    pub(crate) fn reset(&mut self) {
        *self = Self::with_address(self.address, std::mem::take(&mut self.opcode));
    }

    /// Forgets the effects recorded by a failed processing, keeping the
    /// decoding.
    pub(crate) fn discard_effects(&mut self) {
        self.read_registers.clear();
        self.written_registers.clear();
        self.undefined_registers.clear();
        self.loads.clear();
        self.stores.clear();
        self.symbolic_expressions.clear();
        self.next_address = None;
        self.stage = self.stage.min(Stage::Decoded);
    }

    pub(crate) fn record_read(&mut self, reg: Register) {
        push_unique(&mut self.read_registers, reg);
    }

    pub(crate) fn record_write(&mut self, reg: Register) {
        push_unique(&mut self.written_registers, reg);
    }

    pub(crate) fn record_undefined(&mut self, reg: Register) {
        push_unique(&mut self.undefined_registers, reg);
    }
}

fn push_unique(registers: &mut Vec<Register>, reg: Register) {
    if !registers.iter().any(|r| r.id() == reg.id()) {
        registers.push(reg);
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}: {}", self.address, self.disassembly)
    }
}
