//! Architecture independent core types.

mod core_status;
pub mod registers;

pub use core_status::{CoreState, HaltReason};
pub use registers::RegisterId;

/// A memory mapped register, for instance ARM debug registers (DHCSR, etc).
pub trait MemoryMappedRegister: Clone + From<u32> + Into<u32> + Sized + std::fmt::Debug {
    /// The register's address in the target memory.
    const ADDRESS: u64;
    /// The register's name.
    const NAME: &'static str;
}

/// Basic information about a halted core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreInformation {
    /// The current program counter.
    pub pc: u64,
}

/// Which part of the target a reset applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResetKind {
    /// Resets the core only (AIRCR.VECTRESET).
    Core,
    /// Requests a system reset (AIRCR.SYSRESETREQ).
    System,
    /// Pulls the nRESET line of the probe.
    Hardware,
}

/// What the core does once the reset is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResetBehavior {
    /// Halt on the first instruction.
    Halt,
    /// Run the application.
    Run,
}

/// Opaque handle of a breakpoint or watchpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BreakpointHandle(pub(crate) u32);

/// How an instruction breakpoint is implemented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BreakpointKind {
    /// An FPB comparator.
    Hardware,
    /// A `BKPT` instruction patched into memory.
    Software,
}

/// The access a watchpoint triggers on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchpointKind {
    Read,
    Write,
    Access,
}

/// The resource backing an active breakpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakpointUnit {
    /// FPB comparator index.
    Hardware { comparator: usize },
    /// Patched instruction, with the halfword it replaced.
    Software { original: u16 },
    /// DWT comparator index.
    Watchpoint {
        comparator: usize,
        kind: WatchpointKind,
        len: u32,
    },
}

/// An active breakpoint or watchpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Breakpoint {
    pub handle: BreakpointHandle,
    pub address: u64,
    pub unit: BreakpointUnit,
    pub enabled: bool,
}

impl Breakpoint {
    pub fn is_watchpoint(&self) -> bool {
        matches!(self.unit, BreakpointUnit::Watchpoint { .. })
    }

    /// The instruction breakpoint kind, `None` for watchpoints.
    pub fn kind(&self) -> Option<BreakpointKind> {
        match self.unit {
            BreakpointUnit::Hardware { .. } => Some(BreakpointKind::Hardware),
            BreakpointUnit::Software { .. } => Some(BreakpointKind::Software),
            BreakpointUnit::Watchpoint { .. } => None,
        }
    }
}
