//! Decoding of raw x86 bytes with iced-x86 into the engine's operand model.

use iced_x86::{self as iced, Decoder, DecoderOptions, Formatter, IntelFormatter, OpKind};

use common::log_trace;

use crate::{
    arch::{ArchitectureKind, RegisterId},
    error::{Error, Result},
    instruction::{Condition, Instruction, InstructionDecoder, MemoryOperand, Mnemonic, Operand},
};

/// The default decoder, backed by iced-x86 and its Intel formatter.
#[derive(Debug, Default, Clone, Copy)]
pub struct IcedDecoder;

impl InstructionDecoder for IcedDecoder {
    fn decode(&self, arch: ArchitectureKind, inst: &mut Instruction) -> Result<()> {
        decode(arch, inst)
    }
}

/// Decodes the opcode of `inst` at its address and fills in the mnemonic,
/// operands, size and disassembly.
fn decode(arch: ArchitectureKind, inst: &mut Instruction) -> Result<()> {
    let address = inst.address();
    let mut decoder = Decoder::with_ip(
        arch.bitness(),
        inst.opcode(),
        address,
        DecoderOptions::NONE,
    );
    if !decoder.can_decode() {
        return Err(Error::Decode {
            address,
            reason: "no instruction bytes".to_string(),
        });
    }

    let decoded = decoder.decode();
    if decoded.is_invalid() {
        return Err(Error::Decode {
            address,
            reason: format!("{:?}", decoder.last_error()),
        });
    }

    let mut disassembly = String::new();
    IntelFormatter::new().format(&decoded, &mut disassembly);

    let operands = (0..decoded.op_count())
        .map(|i| convert_operand(arch, &decoded, i))
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| Error::UnsupportedInstruction {
            mnemonic: disassembly.clone(),
        })?;

    log_trace!("Decoded `{}` at {:#x}", disassembly, address);
    inst.set_decoding(
        decoded.len(),
        convert_mnemonic(decoded.mnemonic()),
        operands,
        disassembly,
    );
    Ok(())
}

fn convert_operand(arch: ArchitectureKind, decoded: &iced::Instruction, index: u32) -> Option<Operand> {
    let immediate = |size| {
        Some(Operand::Immediate {
            value: decoded.immediate(index),
            size,
        })
    };
    let branch = |size| {
        Some(Operand::Immediate {
            value: decoded.near_branch_target(),
            size,
        })
    };

    match decoded.op_kind(index) {
        OpKind::Register => {
            let id = convert_register(decoded.op_register(index))?;
            arch.register(id).ok().map(Operand::Register)
        }
        OpKind::Immediate8 | OpKind::Immediate8_2nd => immediate(8),
        OpKind::Immediate16 | OpKind::Immediate8to16 => immediate(16),
        OpKind::Immediate32 | OpKind::Immediate8to32 => immediate(32),
        OpKind::Immediate64 | OpKind::Immediate8to64 | OpKind::Immediate32to64 => immediate(64),
        OpKind::NearBranch16 => branch(16),
        OpKind::NearBranch32 => branch(32),
        OpKind::NearBranch64 => branch(64),
        OpKind::Memory => convert_memory(arch, decoded).map(Operand::Memory),
        _ => None,
    }
}

fn convert_memory(arch: ArchitectureKind, decoded: &iced::Instruction) -> Option<MemoryOperand> {
    // Segment bases other than the flat ones are not modelled.
    if matches!(decoded.memory_segment(), iced::Register::FS | iced::Register::GS) {
        return None;
    }

    let register = |reg: iced::Register| match reg {
        iced::Register::None => Some(None),
        other => convert_register(other)
            .and_then(|id| arch.register(id).ok())
            .map(Some),
    };

    // The displacement of a program counter relative operand is already
    // the absolute address.
    let base = match decoded.memory_base() {
        iced::Register::RIP | iced::Register::EIP => None,
        other => register(other)?,
    };
    Some(MemoryOperand {
        base,
        index: register(decoded.memory_index())?,
        scale: decoded.memory_index_scale(),
        displacement: decoded.memory_displacement64(),
        size: decoded.memory_size().size() as u32,
    })
}

fn convert_mnemonic(mnemonic: iced::Mnemonic) -> Mnemonic {
    use iced::Mnemonic as M;
    match mnemonic {
        M::Mov => Mnemonic::Mov,
        M::Movzx => Mnemonic::Movzx,
        M::Movsx => Mnemonic::Movsx,
        M::Movsxd => Mnemonic::Movsxd,
        M::Lea => Mnemonic::Lea,
        M::Xchg => Mnemonic::Xchg,
        M::Add => Mnemonic::Add,
        M::Adc => Mnemonic::Adc,
        M::Sub => Mnemonic::Sub,
        M::Sbb => Mnemonic::Sbb,
        M::Cmp => Mnemonic::Cmp,
        M::Inc => Mnemonic::Inc,
        M::Dec => Mnemonic::Dec,
        M::Neg => Mnemonic::Neg,
        M::And => Mnemonic::And,
        M::Or => Mnemonic::Or,
        M::Xor => Mnemonic::Xor,
        M::Test => Mnemonic::Test,
        M::Not => Mnemonic::Not,
        M::Rol => Mnemonic::Rol,
        M::Ror => Mnemonic::Ror,
        M::Shl | M::Sal => Mnemonic::Shl,
        M::Shr => Mnemonic::Shr,
        M::Sar => Mnemonic::Sar,
        M::Push => Mnemonic::Push,
        M::Pop => Mnemonic::Pop,
        M::Call => Mnemonic::Call,
        M::Ret => Mnemonic::Ret,
        M::Jmp => Mnemonic::Jmp,
        M::Jo => Mnemonic::Jcc(Condition::O),
        M::Jno => Mnemonic::Jcc(Condition::No),
        M::Jb => Mnemonic::Jcc(Condition::B),
        M::Jae => Mnemonic::Jcc(Condition::Ae),
        M::Je => Mnemonic::Jcc(Condition::E),
        M::Jne => Mnemonic::Jcc(Condition::Ne),
        M::Jbe => Mnemonic::Jcc(Condition::Be),
        M::Ja => Mnemonic::Jcc(Condition::A),
        M::Js => Mnemonic::Jcc(Condition::S),
        M::Jns => Mnemonic::Jcc(Condition::Ns),
        M::Jp => Mnemonic::Jcc(Condition::P),
        M::Jnp => Mnemonic::Jcc(Condition::Np),
        M::Jl => Mnemonic::Jcc(Condition::L),
        M::Jge => Mnemonic::Jcc(Condition::Ge),
        M::Jle => Mnemonic::Jcc(Condition::Le),
        M::Jg => Mnemonic::Jcc(Condition::G),
        M::Nop => Mnemonic::Nop,
        M::Clc => Mnemonic::Clc,
        M::Stc => Mnemonic::Stc,
        M::Cmc => Mnemonic::Cmc,
        M::Cld => Mnemonic::Cld,
        M::Std => Mnemonic::Std,
        other => Mnemonic::Other(format!("{other:?}").to_lowercase()),
    }
}

fn convert_register(reg: iced::Register) -> Option<RegisterId> {
    use iced::Register as R;
    let id = match reg {
        R::RAX => RegisterId::Rax,
        R::EAX => RegisterId::Eax,
        R::AX => RegisterId::Ax,
        R::AH => RegisterId::Ah,
        R::AL => RegisterId::Al,
        R::RBX => RegisterId::Rbx,
        R::EBX => RegisterId::Ebx,
        R::BX => RegisterId::Bx,
        R::BH => RegisterId::Bh,
        R::BL => RegisterId::Bl,
        R::RCX => RegisterId::Rcx,
        R::ECX => RegisterId::Ecx,
        R::CX => RegisterId::Cx,
        R::CH => RegisterId::Ch,
        R::CL => RegisterId::Cl,
        R::RDX => RegisterId::Rdx,
        R::EDX => RegisterId::Edx,
        R::DX => RegisterId::Dx,
        R::DH => RegisterId::Dh,
        R::DL => RegisterId::Dl,
        R::RSI => RegisterId::Rsi,
        R::ESI => RegisterId::Esi,
        R::SI => RegisterId::Si,
        R::SIL => RegisterId::Sil,
        R::RDI => RegisterId::Rdi,
        R::EDI => RegisterId::Edi,
        R::DI => RegisterId::Di,
        R::DIL => RegisterId::Dil,
        R::RBP => RegisterId::Rbp,
        R::EBP => RegisterId::Ebp,
        R::BP => RegisterId::Bp,
        R::BPL => RegisterId::Bpl,
        R::RSP => RegisterId::Rsp,
        R::ESP => RegisterId::Esp,
        R::SP => RegisterId::Sp,
        R::SPL => RegisterId::Spl,
        R::R8 => RegisterId::R8,
        R::R8D => RegisterId::R8d,
        R::R8W => RegisterId::R8w,
        R::R8L => RegisterId::R8b,
        R::R9 => RegisterId::R9,
        R::R9D => RegisterId::R9d,
        R::R9W => RegisterId::R9w,
        R::R9L => RegisterId::R9b,
        R::R10 => RegisterId::R10,
        R::R10D => RegisterId::R10d,
        R::R10W => RegisterId::R10w,
        R::R10L => RegisterId::R10b,
        R::R11 => RegisterId::R11,
        R::R11D => RegisterId::R11d,
        R::R11W => RegisterId::R11w,
        R::R11L => RegisterId::R11b,
        R::R12 => RegisterId::R12,
        R::R12D => RegisterId::R12d,
        R::R12W => RegisterId::R12w,
        R::R12L => RegisterId::R12b,
        R::R13 => RegisterId::R13,
        R::R13D => RegisterId::R13d,
        R::R13W => RegisterId::R13w,
        R::R13L => RegisterId::R13b,
        R::R14 => RegisterId::R14,
        R::R14D => RegisterId::R14d,
        R::R14W => RegisterId::R14w,
        R::R14L => RegisterId::R14b,
        R::R15 => RegisterId::R15,
        R::R15D => RegisterId::R15d,
        R::R15W => RegisterId::R15w,
        R::R15L => RegisterId::R15b,
        R::RIP => RegisterId::Rip,
        R::EIP => RegisterId::Eip,
        _ => return None,
    };
    Some(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::Stage;

    fn decoded(arch: ArchitectureKind, bytes: &[u8]) -> Instruction {
        let mut inst = Instruction::with_address(0x400000, bytes);
        decode(arch, &mut inst).unwrap();
        inst
    }

    #[test]
    fn decodes_register_operands() {
        let inst = decoded(ArchitectureKind::X86_64, b"\x89\xd8");
        assert_eq!(inst.size(), 2);
        assert_eq!(inst.mnemonic(), Some(&Mnemonic::Mov));
        assert_eq!(inst.disassembly(), "mov eax,ebx");
        assert_eq!(inst.stage(), Stage::Decoded);
        let ids = inst
            .operands()
            .iter()
            .map(|op| match op {
                Operand::Register(reg) => reg.id(),
                other => panic!("unexpected operand {other:?}"),
            })
            .collect::<Vec<_>>();
        assert_eq!(ids, [RegisterId::Eax, RegisterId::Ebx]);
    }

    #[test]
    fn decodes_absolute_memory_operand() {
        let inst = decoded(
            ArchitectureKind::X86_64,
            b"\x48\xa1\x00\x10\x00\x00\x00\x00\x00\x00",
        );
        assert_eq!(inst.size(), 10);
        match inst.operands()[1] {
            Operand::Memory(mem) => {
                assert_eq!(mem.base, None);
                assert_eq!(mem.index, None);
                assert_eq!(mem.displacement, 0x1000);
                assert_eq!(mem.size, 8);
            }
            other => panic!("unexpected operand {other:?}"),
        }
    }

    #[test]
    fn resolves_branch_targets_and_conditions() {
        // je +0x10
        let inst = decoded(ArchitectureKind::X86, b"\x74\x10");
        assert_eq!(inst.mnemonic(), Some(&Mnemonic::Jcc(Condition::E)));
        assert_eq!(
            inst.operands(),
            [Operand::Immediate {
                value: 0x400012,
                size: 32
            }]
        );
    }

    #[test]
    fn rejects_invalid_bytes() {
        let mut inst = Instruction::new(b"\x48".to_vec());
        assert!(matches!(
            decode(ArchitectureKind::X86_64, &mut inst),
            Err(Error::Decode { address: 0, .. })
        ));
        let mut empty = Instruction::new(Vec::new());
        assert!(decode(ArchitectureKind::X86_64, &mut empty).is_err());
    }

    #[test]
    fn unmodelled_mnemonics_are_kept() {
        // cpuid
        let inst = decoded(ArchitectureKind::X86_64, b"\x0f\xa2");
        assert_eq!(inst.mnemonic(), Some(&Mnemonic::Other("cpuid".to_string())));
    }
}
