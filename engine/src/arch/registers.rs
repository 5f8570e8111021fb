use std::fmt;

use derive_more as dm;

use super::ArchitectureKind;

macro_rules! define_registers {
    (@parent32 -) => { None };
    (@parent32 $parent:ident) => { Some(RegisterId::$parent) };
    (
        $(
            $id:ident: $name:literal, $parent64:ident, $parent32:tt, $high:literal..$low:literal;
        )*
    ) => {
        /// Identifiers of the x86 family registers.
        #[derive(Debug, dm::Display, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum RegisterId {
            $(
                #[display($name)]
                $id,
            )*
        }

        impl RegisterId {
            pub const ALL: &'static [RegisterId] = &[$(RegisterId::$id),*];

            pub const fn name(self) -> &'static str {
                match self {
                    $(RegisterId::$id => $name,)*
                }
            }

            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $($name => Some(RegisterId::$id),)*
                    _ => None,
                }
            }

            /// Parent in 64-bit mode, parent in 32-bit mode (if available),
            /// and the bit range in the parent.
            const fn layout(self) -> (RegisterId, Option<RegisterId>, u32, u32) {
                match self {
                    $(
                        RegisterId::$id => (
                            RegisterId::$parent64,
                            define_registers!(@parent32 $parent32),
                            $high,
                            $low,
                        ),
                    )*
                }
            }
        }
    };
}

define_registers! {
    Rax: "rax", Rax, -, 63..0;
    Eax: "eax", Rax, Eax, 31..0;
    Ax: "ax", Rax, Eax, 15..0;
    Ah: "ah", Rax, Eax, 15..8;
    Al: "al", Rax, Eax, 7..0;

    Rbx: "rbx", Rbx, -, 63..0;
    Ebx: "ebx", Rbx, Ebx, 31..0;
    Bx: "bx", Rbx, Ebx, 15..0;
    Bh: "bh", Rbx, Ebx, 15..8;
    Bl: "bl", Rbx, Ebx, 7..0;

    Rcx: "rcx", Rcx, -, 63..0;
    Ecx: "ecx", Rcx, Ecx, 31..0;
    Cx: "cx", Rcx, Ecx, 15..0;
    Ch: "ch", Rcx, Ecx, 15..8;
    Cl: "cl", Rcx, Ecx, 7..0;

    Rdx: "rdx", Rdx, -, 63..0;
    Edx: "edx", Rdx, Edx, 31..0;
    Dx: "dx", Rdx, Edx, 15..0;
    Dh: "dh", Rdx, Edx, 15..8;
    Dl: "dl", Rdx, Edx, 7..0;

    Rsi: "rsi", Rsi, -, 63..0;
    Esi: "esi", Rsi, Esi, 31..0;
    Si: "si", Rsi, Esi, 15..0;
    Sil: "sil", Rsi, -, 7..0;

    Rdi: "rdi", Rdi, -, 63..0;
    Edi: "edi", Rdi, Edi, 31..0;
    Di: "di", Rdi, Edi, 15..0;
    Dil: "dil", Rdi, -, 7..0;

    Rbp: "rbp", Rbp, -, 63..0;
    Ebp: "ebp", Rbp, Ebp, 31..0;
    Bp: "bp", Rbp, Ebp, 15..0;
    Bpl: "bpl", Rbp, -, 7..0;

    Rsp: "rsp", Rsp, -, 63..0;
    Esp: "esp", Rsp, Esp, 31..0;
    Sp: "sp", Rsp, Esp, 15..0;
    Spl: "spl", Rsp, -, 7..0;

    R8: "r8", R8, -, 63..0;
    R8d: "r8d", R8, -, 31..0;
    R8w: "r8w", R8, -, 15..0;
    R8b: "r8b", R8, -, 7..0;
    R9: "r9", R9, -, 63..0;
    R9d: "r9d", R9, -, 31..0;
    R9w: "r9w", R9, -, 15..0;
    R9b: "r9b", R9, -, 7..0;
    R10: "r10", R10, -, 63..0;
    R10d: "r10d", R10, -, 31..0;
    R10w: "r10w", R10, -, 15..0;
    R10b: "r10b", R10, -, 7..0;
    R11: "r11", R11, -, 63..0;
    R11d: "r11d", R11, -, 31..0;
    R11w: "r11w", R11, -, 15..0;
    R11b: "r11b", R11, -, 7..0;
    R12: "r12", R12, -, 63..0;
    R12d: "r12d", R12, -, 31..0;
    R12w: "r12w", R12, -, 15..0;
    R12b: "r12b", R12, -, 7..0;
    R13: "r13", R13, -, 63..0;
    R13d: "r13d", R13, -, 31..0;
    R13w: "r13w", R13, -, 15..0;
    R13b: "r13b", R13, -, 7..0;
    R14: "r14", R14, -, 63..0;
    R14d: "r14d", R14, -, 31..0;
    R14w: "r14w", R14, -, 15..0;
    R14b: "r14b", R14, -, 7..0;
    R15: "r15", R15, -, 63..0;
    R15d: "r15d", R15, -, 31..0;
    R15w: "r15w", R15, -, 15..0;
    R15b: "r15b", R15, -, 7..0;

    Rip: "rip", Rip, -, 63..0;
    Eip: "eip", Rip, Eip, 31..0;
    Ip: "ip", Rip, Eip, 15..0;

    Af: "af", Af, Af, 0..0;
    Cf: "cf", Cf, Cf, 0..0;
    Df: "df", Df, Df, 0..0;
    If: "if", If, If, 0..0;
    Of: "of", Of, Of, 0..0;
    Pf: "pf", Pf, Pf, 0..0;
    Sf: "sf", Sf, Sf, 0..0;
    Tf: "tf", Tf, Tf, 0..0;
    Zf: "zf", Zf, Zf, 0..0;
}

/// A register as seen in a given architecture: its bit range inside the
/// parent register that holds its storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Register {
    id: RegisterId,
    parent: RegisterId,
    high: u32,
    low: u32,
}

impl Register {
    /// `None` if the register does not exist in `arch`.
    pub(crate) fn resolve(id: RegisterId, arch: ArchitectureKind) -> Option<Self> {
        let (parent64, parent32, high, low) = id.layout();
        let parent = match arch {
            ArchitectureKind::X86_64 => Some(parent64),
            ArchitectureKind::X86 => parent32,
        }?;
        Some(Self {
            id,
            parent,
            high,
            low,
        })
    }

    pub fn id(&self) -> RegisterId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.id.name()
    }

    pub fn parent(&self) -> RegisterId {
        self.parent
    }

    pub fn high(&self) -> u32 {
        self.high
    }

    pub fn low(&self) -> u32 {
        self.low
    }

    /// Width in bits.
    pub fn size(&self) -> u32 {
        self.high - self.low + 1
    }

    pub fn is_parent(&self) -> bool {
        self.id == self.parent
    }

    pub fn is_flag(&self) -> bool {
        use RegisterId::*;
        matches!(self.id, Af | Cf | Df | If | Of | Pf | Sf | Tf | Zf)
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} bv[{}..{}]", self.name(), self.size(), self.high, self.low)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layouts_per_mode() {
        let eax64 = Register::resolve(RegisterId::Eax, ArchitectureKind::X86_64).unwrap();
        assert_eq!(eax64.parent(), RegisterId::Rax);
        let eax32 = Register::resolve(RegisterId::Eax, ArchitectureKind::X86).unwrap();
        assert!(eax32.is_parent());
        assert!(Register::resolve(RegisterId::R8, ArchitectureKind::X86).is_none());
        assert!(Register::resolve(RegisterId::Sil, ArchitectureKind::X86).is_none());

        let ah = Register::resolve(RegisterId::Ah, ArchitectureKind::X86_64).unwrap();
        assert_eq!((ah.high(), ah.low(), ah.size()), (15, 8, 8));
        assert_eq!(ah.to_string(), "ah:8 bv[15..8]");
    }

    #[test]
    fn every_parent_is_its_own_parent() {
        for arch in [ArchitectureKind::X86, ArchitectureKind::X86_64] {
            for id in RegisterId::ALL {
                if let Some(reg) = Register::resolve(*id, arch) {
                    let parent = Register::resolve(reg.parent(), arch).unwrap();
                    assert!(parent.is_parent(), "{id} in {arch}");
                    assert!(parent.high() >= reg.high());
                }
            }
        }
    }

    #[test]
    fn names_round_trip() {
        for id in RegisterId::ALL {
            assert_eq!(RegisterId::from_name(id.name()), Some(*id));
        }
    }
}
