//! Core control for ARMv6-M and ARMv7-M/ARMv8-M mainline cores.

use std::time::Duration;

use anyhow::anyhow;

use super::cortex_m::{
    dwt_address, fp_comp_address, Aircr, Dcrdr, Dcrsr, Demcr, Dfsr, Dhcsr, DwtComp, DwtCtrl,
    DwtFunction, DwtMask, FpCtrl, FpRev1CompX, FpRev2CompX,
};
use super::{CortexMState, FpbInfo};
use crate::architecture::arm::memory::ArmMemory;
use crate::architecture::arm::ArmError;
use crate::config::SessionConfig;
use crate::core::{
    Breakpoint, BreakpointHandle, BreakpointKind, BreakpointUnit, CoreInformation, CoreState,
    HaltReason, MemoryMappedRegister, RegisterId, ResetBehavior, ResetKind, WatchpointKind,
};
use crate::deadline::Deadline;
use crate::error::{Error, StateError};
use crate::memory::MemoryInterface;

/// `BKPT #0`
pub const BKPT_INSTRUCTION: u16 = 0xBE00;

const XPSR_THUMB: u32 = 1 << 24;

const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Control of a Cortex-M core through its debug registers.
///
/// Any [`Error::TransferFault`] or [`Error::ResourceTimeout`] returned by an
/// operation leaves the core in [`CoreState::Unknown`]. A new `halt` or
/// `reset` brings it back into a known state.
#[derive(Debug)]
pub struct Armv7m<'probe> {
    memory: ArmMemory<'probe>,
    state: &'probe mut CortexMState,
    config: &'probe SessionConfig,
}

impl<'probe> Armv7m<'probe> {
    pub(crate) fn new(
        memory: ArmMemory<'probe>,
        state: &'probe mut CortexMState,
        config: &'probe SessionConfig,
    ) -> Self {
        Self {
            memory,
            state,
            config,
        }
    }

    /// The last known state, without talking to the target.
    pub fn state(&self) -> CoreState {
        self.state.current_state
    }

    pub fn breakpoints(&self) -> &[Breakpoint] {
        self.state.breakpoints()
    }

    /// The memory of the target, as seen by this core.
    pub fn memory(&mut self) -> &mut ArmMemory<'probe> {
        &mut self.memory
    }

    fn track<T>(&mut self, result: Result<T, Error>) -> Result<T, Error> {
        if let Err(error) = &result {
            if error.leaves_core_unknown() {
                tracing::warn!("Core state is unknown after error: {}", error);
                self.state.current_state = CoreState::Unknown;
            }
        }
        result
    }

    fn read_register<R: MemoryMappedRegister>(&mut self) -> Result<R, ArmError> {
        Ok(R::from(self.memory.read_word_32(R::ADDRESS)?))
    }

    /// Queues a register write, it is sent with the next flush or read.
    fn write_register<R: MemoryMappedRegister>(&mut self, value: R) -> Result<(), ArmError> {
        self.memory.write_word_32(R::ADDRESS, value.into())
    }

    /// Reads DHCSR, and DFSR on halt, and updates the tracked state.
    pub fn status(&mut self) -> Result<CoreState, Error> {
        let result = self.read_status();
        self.track(result)
    }

    fn read_status(&mut self) -> Result<CoreState, Error> {
        let dhcsr: Dhcsr = self.read_register()?;

        if dhcsr.s_lockup() {
            tracing::warn!(
                "The core is in locked up status as a result of an unrecoverable exception"
            );
            self.state.current_state = CoreState::Unknown;
            return Ok(CoreState::Unknown);
        }

        if dhcsr.s_halt() {
            let dfsr: Dfsr = self.read_register()?;
            self.write_register(Dfsr::clear_all())?;
            self.memory.flush()?;

            let reason = match (self.state.current_state, dfsr.halt_reason()) {
                (CoreState::Stepping, HaltReason::Request) => HaltReason::Step,
                // The reason was cleared when the halt was first observed.
                (CoreState::Halted(previous), HaltReason::Unknown) => previous,
                (_, reason) => reason,
            };

            self.state.current_state = CoreState::Halted(reason);
            return Ok(self.state.current_state);
        }

        if self.state.current_state.is_halted() {
            tracing::warn!("Core is running, but we expected it to be halted");
        }

        if self.state.current_state != CoreState::Stepping {
            self.state.current_state = CoreState::Running;
        }

        Ok(self.state.current_state)
    }

    fn wait_for_halt(&mut self, deadline: &Deadline, what: &'static str) -> Result<CoreState, Error> {
        deadline
            .poll(POLL_INTERVAL, || {
                let state = self.read_status()?;
                Ok::<_, Error>(state.is_halted().then_some(state))
            })?
            .ok_or(Error::ResourceTimeout(what))
    }

    /// Halts the core. Does nothing if the core is known to be halted.
    pub fn halt(&mut self, timeout: Duration) -> Result<CoreState, Error> {
        if self.state.current_state.is_halted() {
            return Ok(self.state.current_state);
        }

        let deadline = Deadline::after(timeout);
        let result = self
            .write_register(Dhcsr::control(true, false, false))
            .map_err(Error::from)
            .and_then(|_| self.wait_for_halt(&deadline, "core halt"));
        self.track(result)
    }

    /// Lets a halted core run.
    ///
    /// Reads queued before this call must have been flushed, their results
    /// are meaningless once the core runs.
    pub fn resume(&mut self) -> Result<(), Error> {
        match self.state.current_state {
            CoreState::Running => return Ok(()),
            CoreState::Halted(_) | CoreState::Stepping => {}
            other => return Err(StateError::Core(other).into()),
        }

        let result = self.run();
        self.track(result)
    }

    fn run(&mut self) -> Result<(), Error> {
        // Step off the current instruction, a breakpoint there would halt again immediately.
        if self.state.has_instruction_breakpoints() {
            self.single_step()?;
        }

        self.write_register(Dhcsr::control(false, false, false))?;
        self.memory.flush()?;

        self.state.current_state = CoreState::Running;
        Ok(())
    }

    /// Executes a single instruction.
    pub fn step(&mut self) -> Result<CoreInformation, Error> {
        let state = self.state.current_state;
        if !state.is_halted() {
            return Err(StateError::Core(state).into());
        }

        let result = self.single_step().and_then(|_| self.read_pc());
        self.track(result)
    }

    fn read_pc(&mut self) -> Result<CoreInformation, Error> {
        let pc = self.read_core_reg(RegisterId::PC)?;
        Ok(CoreInformation { pc: pc.into() })
    }

    fn single_step(&mut self) -> Result<(), Error> {
        let pc = u64::from(self.read_core_reg(RegisterId::PC)?);

        let at_pc = self.state.instruction_breakpoint_at(pc).map(|bp| bp.unit);
        match at_pc {
            Some(BreakpointUnit::Software { original }) => self.write_halfword(pc, original)?,
            Some(BreakpointUnit::Hardware { .. }) => self.write_register(FpCtrl::enabled(false))?,
            _ => {}
        }

        // C_MASKINTS may only change while the core is halted.
        self.write_register(Dhcsr::control(true, false, true))?;
        self.write_register(Dhcsr::control(false, true, true))?;
        self.memory.flush()?;
        self.state.current_state = CoreState::Stepping;

        let deadline = Deadline::after(self.config.step_timeout);
        self.wait_for_halt(&deadline, "single step")?;

        self.write_register(Dhcsr::control(true, false, false))?;
        match at_pc {
            Some(BreakpointUnit::Software { .. }) => self.write_halfword(pc, BKPT_INSTRUCTION)?,
            Some(BreakpointUnit::Hardware { .. }) => self.write_register(FpCtrl::enabled(true))?,
            _ => {}
        }
        self.memory.flush()?;

        Ok(())
    }

    /// Resets the core or the whole system and waits for the result.
    pub fn reset(&mut self, kind: ResetKind, behavior: ResetBehavior) -> Result<CoreState, Error> {
        let result = self.run_reset(kind, behavior);
        self.track(result)
    }

    fn run_reset(&mut self, kind: ResetKind, behavior: ResetBehavior) -> Result<CoreState, Error> {
        tracing::debug!("Reset ({:?}) and {:?}", kind, behavior);
        self.state.current_state = CoreState::Reset;
        let deadline = Deadline::after(self.config.reset_timeout);

        let mut demcr: Demcr = self.read_register()?;
        demcr.set_vc_corereset(behavior == ResetBehavior::Halt);
        self.write_register(demcr)?;
        self.memory.flush()?;

        match kind {
            ResetKind::Core | ResetKind::System => {
                let mut aircr = Aircr(0);
                aircr.vectkey();
                if kind == ResetKind::Core {
                    aircr.set_vectreset(true);
                } else {
                    aircr.set_sysresetreq(true);
                }
                self.write_register(aircr)?;

                // The target may reset before it acknowledges the write.
                match self.memory.flush() {
                    Ok(()) => {}
                    Err(ArmError::TransferFault(error)) => {
                        tracing::debug!("AIRCR write was not acknowledged: {}", error)
                    }
                    Err(error) => return Err(error.into()),
                }
            }
            ResetKind::Hardware => self.memory.interface().target_reset()?,
        }

        let released = deadline.poll(POLL_INTERVAL, || {
            let dhcsr = match self.read_register::<Dhcsr>() {
                Ok(dhcsr) => dhcsr,
                // Still in reset.
                Err(ArmError::TransferFault(_)) => return Ok(None),
                Err(error) => return Err(error),
            };
            let done = match behavior {
                ResetBehavior::Halt => dhcsr.s_halt(),
                ResetBehavior::Run => !dhcsr.s_reset_st(),
            };
            Ok(done.then_some(()))
        })?;
        if released.is_none() {
            return Err(Error::ResourceTimeout("reset"));
        }

        if behavior == ResetBehavior::Halt {
            demcr.set_vc_corereset(false);
            self.write_register(demcr)?;
        }

        let state = self.read_status()?;

        if state.is_halted() {
            let xpsr = self.read_core_reg(RegisterId::XPSR)?;
            if xpsr & XPSR_THUMB == 0 {
                self.write_core_reg(RegisterId::XPSR, xpsr | XPSR_THUMB)?;
            }
        }

        self.restore_hw_breakpoints()?;

        Ok(state)
    }

    fn restore_hw_breakpoints(&mut self) -> Result<(), Error> {
        let Some(fpb) = self.state.fpb else {
            return Ok(());
        };
        let active: Vec<(usize, u64)> = self.state.hardware_breakpoints().collect();
        if active.is_empty() {
            return Ok(());
        }

        for (comparator, address) in active {
            let value = comparator_value(fpb, address)?;
            self.memory
                .write_word_32(fp_comp_address(comparator), value)?;
        }
        self.write_register(FpCtrl::enabled(true))?;
        self.memory.flush()?;
        Ok(())
    }

    fn check_register_access(&self) -> Result<(), Error> {
        let state = self.state.current_state;
        if state.allows_register_access() {
            Ok(())
        } else {
            Err(StateError::Core(state).into())
        }
    }

    /// Reads a core register. The core must be halted.
    pub fn read_core_register(&mut self, id: RegisterId) -> Result<u32, Error> {
        self.check_register_access()?;
        let result = self.read_core_reg(id);
        self.track(result)
    }

    /// Writes a core register. The core must be halted.
    pub fn write_core_register(&mut self, id: RegisterId, value: u32) -> Result<(), Error> {
        self.check_register_access()?;
        let result = self.write_core_reg(id, value);
        self.track(result)
    }

    fn read_core_reg(&mut self, id: RegisterId) -> Result<u32, Error> {
        let mut dcrsr = Dcrsr(0);
        dcrsr.set_regwnr(false);
        dcrsr.set_regsel(id.into());
        self.write_register(dcrsr)?;

        self.wait_for_core_register_transfer()?;

        let value: Dcrdr = self.read_register()?;
        Ok(value.0)
    }

    fn write_core_reg(&mut self, id: RegisterId, value: u32) -> Result<(), Error> {
        self.write_register(Dcrdr(value))?;

        let mut dcrsr = Dcrsr(0);
        dcrsr.set_regwnr(true);
        dcrsr.set_regsel(id.into());
        self.write_register(dcrsr)?;

        self.wait_for_core_register_transfer()
    }

    fn wait_for_core_register_transfer(&mut self) -> Result<(), Error> {
        let deadline = Deadline::after(self.config.register_timeout);
        deadline
            .poll(Duration::ZERO, || {
                let dhcsr: Dhcsr = self.read_register()?;
                Ok::<_, Error>(dhcsr.s_regrdy().then_some(()))
            })?
            .ok_or(Error::ResourceTimeout("core register transfer"))
    }

    fn fpb(&mut self) -> Result<FpbInfo, Error> {
        if let Some(info) = self.state.fpb {
            return Ok(info);
        }

        let ctrl: FpCtrl = self.read_register()?;
        let mut comparators = ctrl.num_code() as usize;
        if let Some(limit) = self.config.hw_breakpoint_limit {
            comparators = comparators.min(limit);
        }
        let info = FpbInfo {
            revision: ctrl.rev(),
            comparators,
        };
        tracing::debug!("FPB revision {} with {} usable comparators", info.revision, comparators);

        self.state.fpb = Some(info);
        Ok(info)
    }

    /// Number of hardware breakpoints which can be active at the same time.
    pub fn available_breakpoint_units(&mut self) -> Result<usize, Error> {
        let result = self.fpb();
        Ok(self.track(result)?.comparators)
    }

    /// Sets an instruction breakpoint.
    pub fn set_breakpoint(
        &mut self,
        address: u64,
        kind: BreakpointKind,
    ) -> Result<BreakpointHandle, Error> {
        if self
            .state
            .breakpoints
            .iter()
            .any(|bp| !bp.is_watchpoint() && bp.address == address)
        {
            return Err(Error::BreakpointExists(address));
        }
        if address % 2 != 0 || address > u64::from(u32::MAX) {
            return Err(Error::UnsupportedBreakpointAddress(address));
        }

        let result = match kind {
            BreakpointKind::Hardware => self.set_hw_breakpoint(address),
            BreakpointKind::Software => self.set_sw_breakpoint(address),
        };
        let unit = self.track(result)?;

        let handle = self.state.insert(address, unit);
        tracing::debug!("Breakpoint {:?} at {:#010x}: {:?}", handle, address, unit);
        Ok(handle)
    }

    fn set_hw_breakpoint(&mut self, address: u64) -> Result<BreakpointUnit, Error> {
        let fpb = self.fpb()?;
        let comparator = (0..fpb.comparators)
            .find(|index| !self.state.fpb_comparator_in_use(*index))
            .ok_or(Error::ResourceExhausted {
                resource: "hardware breakpoint comparators",
                available: fpb.comparators,
            })?;

        let value = comparator_value(fpb, address)?;
        self.memory
            .write_word_32(fp_comp_address(comparator), value)?;
        self.write_register(FpCtrl::enabled(true))?;
        self.memory.flush()?;

        Ok(BreakpointUnit::Hardware { comparator })
    }

    fn set_sw_breakpoint(&mut self, address: u64) -> Result<BreakpointUnit, Error> {
        let original = self.read_halfword(address)?;
        self.write_halfword(address, BKPT_INSTRUCTION)?;

        // Flash and ROM ignore the write.
        if self.read_halfword(address)? != BKPT_INSTRUCTION {
            return Err(Error::UnsupportedBreakpointAddress(address));
        }

        Ok(BreakpointUnit::Software { original })
    }

    fn read_halfword(&mut self, address: u64) -> Result<u16, Error> {
        let word = self.memory.read_word_32(address & !0b11)?;
        Ok((word >> (8 * (address & 0b10))) as u16)
    }

    fn write_halfword(&mut self, address: u64, value: u16) -> Result<(), Error> {
        let aligned = address & !0b11;
        let shift = 8 * (address & 0b10);

        let word = self.memory.read_word_32(aligned)?;
        let word = (word & !(0xFFFF << shift)) | (u32::from(value) << shift);
        self.memory.write_word_32(aligned, word)?;
        self.memory.flush()?;
        Ok(())
    }

    /// Sets a data watchpoint on `len` bytes at `address`.
    ///
    /// `len` must be a power of two and `address` aligned to it.
    pub fn set_watchpoint(
        &mut self,
        address: u64,
        len: u32,
        kind: WatchpointKind,
    ) -> Result<BreakpointHandle, Error> {
        if !len.is_power_of_two()
            || address % u64::from(len) != 0
            || address > u64::from(u32::MAX)
        {
            return Err(Error::InvalidWatchpoint { address, len });
        }

        let result = self.set_dwt_comparator(address as u32, len, kind);
        let unit = self.track(result)?;

        let handle = self.state.insert(address, unit);
        tracing::debug!("Watchpoint {:?} at {:#010x}: {:?}", handle, address, unit);
        Ok(handle)
    }

    fn dwt_comparators(&mut self) -> Result<usize, Error> {
        if let Some(count) = self.state.dwt_comparators {
            return Ok(count);
        }

        // The DWT is only accessible with trace enabled.
        let mut demcr: Demcr = self.read_register()?;
        if !demcr.trcena() {
            demcr.set_trcena(true);
            self.write_register(demcr)?;
        }

        let ctrl: DwtCtrl = self.read_register()?;
        let count = ctrl.numcomp() as usize;
        self.state.dwt_comparators = Some(count);
        Ok(count)
    }

    fn set_dwt_comparator(
        &mut self,
        address: u32,
        len: u32,
        kind: WatchpointKind,
    ) -> Result<BreakpointUnit, Error> {
        let available = self.dwt_comparators()?;
        let comparator = (0..available)
            .find(|index| !self.state.dwt_comparator_in_use(*index))
            .ok_or(Error::ResourceExhausted {
                resource: "watchpoint comparators",
                available,
            })?;

        let mut mask = DwtMask(0);
        mask.set_mask(len.trailing_zeros());

        self.memory
            .write_word_32(dwt_address::<DwtComp>(comparator), address)?;
        self.memory
            .write_word_32(dwt_address::<DwtMask>(comparator), mask.into())?;
        self.memory.write_word_32(
            dwt_address::<DwtFunction>(comparator),
            DwtFunction::watchpoint(kind).into(),
        )?;
        self.memory.flush()?;

        Ok(BreakpointUnit::Watchpoint {
            comparator,
            kind,
            len,
        })
    }

    /// Removes a breakpoint or watchpoint and releases its resources.
    pub fn remove_breakpoint(&mut self, handle: BreakpointHandle) -> Result<(), Error> {
        let index = self
            .state
            .breakpoints
            .iter()
            .position(|bp| bp.handle == handle)
            .ok_or(Error::UnknownBreakpoint(handle))?;
        let breakpoint = self.state.breakpoints[index];

        let result = self.release(&breakpoint);
        self.track(result)?;

        self.state.breakpoints.remove(index);
        Ok(())
    }

    fn release(&mut self, breakpoint: &Breakpoint) -> Result<(), Error> {
        match breakpoint.unit {
            BreakpointUnit::Hardware { comparator } => {
                self.memory.write_word_32(fp_comp_address(comparator), 0)?;
            }
            BreakpointUnit::Software { original } => {
                self.write_halfword(breakpoint.address, original)?;
            }
            BreakpointUnit::Watchpoint { comparator, .. } => {
                self.memory
                    .write_word_32(dwt_address::<DwtFunction>(comparator), 0)?;
            }
        }
        self.memory.flush()?;
        Ok(())
    }
}

fn comparator_value(fpb: FpbInfo, address: u64) -> Result<u32, Error> {
    let address = u32::try_from(address).map_err(|_| Error::UnsupportedBreakpointAddress(address))?;
    match fpb.revision {
        0 => Ok(FpRev1CompX::breakpoint_configuration(address)?.into()),
        1 => Ok(FpRev2CompX::breakpoint_configuration(address).into()),
        revision => Err(anyhow!("FPB revision {} is not supported", revision).into()),
    }
}
