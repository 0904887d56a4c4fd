//! Core register identifiers.

use std::fmt;

/// The location of a CPU register. This is not an actual memory address, but the
/// selector the debug logic uses for a specific core register.
#[derive(Debug, Copy, Clone, PartialEq, PartialOrd, Ord, Eq, Hash)]
pub struct RegisterId(pub u16);

impl RegisterId {
    pub const R0: RegisterId = RegisterId(0);
    pub const R1: RegisterId = RegisterId(1);
    pub const R2: RegisterId = RegisterId(2);
    pub const R3: RegisterId = RegisterId(3);
    pub const R9: RegisterId = RegisterId(9);
    /// Stack pointer
    pub const SP: RegisterId = RegisterId(13);
    /// Link register
    pub const LR: RegisterId = RegisterId(14);
    /// Program counter
    pub const PC: RegisterId = RegisterId(15);
    /// Program status register
    pub const XPSR: RegisterId = RegisterId(0x10);
    /// Main stack pointer
    pub const MSP: RegisterId = RegisterId(0x11);
    /// Process stack pointer
    pub const PSP: RegisterId = RegisterId(0x12);

    /// General purpose register `Rn`.
    pub fn r(n: u16) -> RegisterId {
        RegisterId(n)
    }
}

impl From<RegisterId> for u32 {
    fn from(value: RegisterId) -> Self {
        u32::from(value.0)
    }
}

impl From<u16> for RegisterId {
    fn from(value: u16) -> Self {
        RegisterId(value)
    }
}

impl fmt::Display for RegisterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            RegisterId::SP => write!(f, "SP"),
            RegisterId::LR => write!(f, "LR"),
            RegisterId::PC => write!(f, "PC"),
            RegisterId::XPSR => write!(f, "XPSR"),
            RegisterId::MSP => write!(f, "MSP"),
            RegisterId::PSP => write!(f, "PSP"),
            RegisterId(n) if n < 13 => write!(f, "R{n}"),
            RegisterId(n) => write!(f, "reg{n:#x}"),
        }
    }
}
