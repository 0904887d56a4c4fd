//! Cortex-M core control.

pub mod armv7m;
pub mod cortex_m;

pub use armv7m::Armv7m;

use crate::core::{Breakpoint, BreakpointHandle, BreakpointUnit, CoreState};

/// What was read from FP_CTRL when the unit was first used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FpbInfo {
    pub(crate) revision: u32,
    /// Usable comparators, after applying the configured limit.
    pub(crate) comparators: usize,
}

/// The state of a core which is kept across calls to [`Armv7m`].
#[derive(Debug, Default)]
pub struct CortexMState {
    current_state: CoreState,
    fpb: Option<FpbInfo>,
    dwt_comparators: Option<usize>,
    breakpoints: Vec<Breakpoint>,
    next_handle: u32,
}

impl CortexMState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_state(&self) -> CoreState {
        self.current_state
    }

    /// Forgets the core state, e.g. after the probe reconnected.
    pub(crate) fn invalidate(&mut self) {
        self.current_state = CoreState::Unknown;
    }

    pub fn breakpoints(&self) -> &[Breakpoint] {
        &self.breakpoints
    }

    fn insert(&mut self, address: u64, unit: BreakpointUnit) -> BreakpointHandle {
        let handle = BreakpointHandle(self.next_handle);
        self.next_handle = self.next_handle.wrapping_add(1);
        self.breakpoints.push(Breakpoint {
            handle,
            address,
            unit,
            enabled: true,
        });
        handle
    }

    fn hardware_breakpoints(&self) -> impl Iterator<Item = (usize, u64)> + '_ {
        self.breakpoints.iter().filter_map(|bp| match bp.unit {
            BreakpointUnit::Hardware { comparator } => Some((comparator, bp.address)),
            _ => None,
        })
    }

    fn fpb_comparator_in_use(&self, index: usize) -> bool {
        self.hardware_breakpoints().any(|(comparator, _)| comparator == index)
    }

    fn dwt_comparator_in_use(&self, index: usize) -> bool {
        self.breakpoints.iter().any(|bp| {
            matches!(bp.unit, BreakpointUnit::Watchpoint { comparator, .. } if comparator == index)
        })
    }

    fn instruction_breakpoint_at(&self, address: u64) -> Option<&Breakpoint> {
        self.breakpoints
            .iter()
            .find(|bp| bp.enabled && !bp.is_watchpoint() && bp.address == address)
    }

    fn has_instruction_breakpoints(&self) -> bool {
        self.breakpoints
            .iter()
            .any(|bp| bp.enabled && !bp.is_watchpoint())
    }
}
