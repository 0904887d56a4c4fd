use std::fmt;
use std::time::{Duration, Instant};

use super::{
    FlashAlgorithm, FlashError, FlashPlan, FlashProgress, PlannedSector, ProgramReport,
    SectorFailure, SectorReport, SectorStatus, VerifySummary,
};
use crate::architecture::arm::core::Armv7m;
use crate::architecture::arm::ArmError;
use crate::config::FlashConfig;
use crate::core::{CoreState, RegisterId, ResetBehavior, ResetKind};
use crate::deadline::Deadline;
use crate::error::Error;
use crate::memory::MemoryInterface;

const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// The operation argument of `Init()` and `UnInit()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Erase = 1,
    Program = 2,
    Verify = 3,
}

impl Operation {
    fn code(self) -> u32 {
        self as u32
    }
}

/// Register values written before an entry point of the flash algorithm is called.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Registers(Vec<(RegisterId, u32)>);

impl Registers {
    /// The calling convention: arguments in R0-R3, static base in R9, a
    /// fresh stack and a return address inside the `BKPT` header.
    pub fn for_call(
        algorithm: &FlashAlgorithm,
        entry: u64,
        arguments: &[u32],
    ) -> Result<Self, Error> {
        let mut registers: Vec<(RegisterId, u32)> = arguments
            .iter()
            .take(4)
            .enumerate()
            .map(|(index, value)| (RegisterId::r(index as u16), *value))
            .collect();

        registers.push((RegisterId::R9, into_reg(algorithm.static_base)?));
        registers.push((RegisterId::SP, into_reg(algorithm.begin_stack)?));
        // The return address has the Thumb bit set.
        registers.push((RegisterId::LR, into_reg(algorithm.load_address + 1)?));
        registers.push((RegisterId::PC, into_reg(entry)?));

        Ok(Self(registers))
    }

    pub fn iter(&self) -> impl Iterator<Item = (RegisterId, u32)> + '_ {
        self.0.iter().copied()
    }

    pub fn get(&self, id: RegisterId) -> Option<u32> {
        self.iter().find(|(reg, _)| *reg == id).map(|(_, value)| value)
    }
}

impl fmt::Debug for Registers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.0.iter().map(|(id, value)| (id.to_string(), format!("{value:#010x}"))))
            .finish()
    }
}

fn into_reg(value: u64) -> Result<u32, Error> {
    u32::try_from(value).map_err(|_| Error::Arm(ArmError::OutOfBounds(value)))
}

/// How a failed attempt at a sector continues.
enum Attempt {
    /// The sector can be retried.
    Failed(SectorFailure),
    /// Flashing cannot continue.
    Fatal(Error),
}

fn classify(error: Error, operation: Operation) -> Attempt {
    match (error, operation) {
        (Error::AlgorithmTimeout { .. }, Operation::Erase) => {
            Attempt::Failed(SectorFailure::EraseTimeout)
        }
        (Error::AlgorithmTimeout { .. }, _) => Attempt::Failed(SectorFailure::ProgramTimeout),
        (Error::AlgorithmError { code, .. }, Operation::Erase) => {
            Attempt::Failed(SectorFailure::EraseError(code))
        }
        (Error::AlgorithmError { code, .. }, _) => Attempt::Failed(SectorFailure::ProgramError(code)),
        (Error::TransferFault(error), _) => Attempt::Failed(SectorFailure::Transfer(error)),
        (other, _) => Attempt::Fatal(other),
    }
}

/// Programs flash through a flash algorithm running on the target core.
#[derive(Debug)]
pub struct Flasher<'probe> {
    core: Armv7m<'probe>,
    algorithm: FlashAlgorithm,
    config: FlashConfig,
    halt_timeout: Duration,
    progress: FlashProgress,
    active: Option<Operation>,
}

impl<'probe> Flasher<'probe> {
    pub fn new(
        core: Armv7m<'probe>,
        algorithm: FlashAlgorithm,
        config: FlashConfig,
        halt_timeout: Duration,
    ) -> Self {
        Self {
            core,
            algorithm,
            config,
            halt_timeout,
            progress: FlashProgress::default(),
            active: None,
        }
    }

    pub fn with_progress(mut self, progress: FlashProgress) -> Self {
        self.progress = progress;
        self
    }

    pub fn algorithm(&self) -> &FlashAlgorithm {
        &self.algorithm
    }

    /// The core the algorithm runs on.
    pub fn core(&mut self) -> &mut Armv7m<'probe> {
        &mut self.core
    }

    /// Programs all sectors of `plan`.
    ///
    /// An `Err` means the flash was not touched. Once sectors are being
    /// processed, failures are recorded in the report instead; use
    /// [`ProgramReport::into_result`] to treat them as an error.
    #[tracing::instrument(skip_all, fields(sectors = plan.len()))]
    pub fn program(&mut self, plan: FlashPlan) -> Result<ProgramReport, FlashError> {
        let start = Instant::now();

        if self.core.state() == CoreState::Unknown {
            return Err(FlashError::CoreStateUnknown);
        }
        self.core.halt(self.halt_timeout)?;
        self.load()?;

        tracing::info!("Programming {} sectors", plan.len());
        let mut report = ProgramReport::default();

        let mut sectors = plan.sectors().iter();
        for sector in sectors.by_ref() {
            let (entry, fatal) = self.program_sector(sector);
            report.sectors.push(entry);
            if let Some(error) = fatal {
                tracing::error!("Flashing aborted: {}", error);
                report.fatal = Some(error);
                break;
            }
        }
        for sector in sectors {
            report.sectors.push(SectorReport {
                address_range: sector.address_range(),
                status: SectorStatus::NotAttempted,
                bytes_written: 0,
                attempts: 0,
                elapsed: Duration::ZERO,
            });
        }

        if report.fatal.is_none() {
            if let Err(error) = self.deactivate() {
                report.fatal = Some(error);
            }
        }

        if self.config.verify && report.fatal.is_none() {
            match self.verify(&plan, &report) {
                Ok(summary) => {
                    self.progress.verify_finished(summary);
                    report.verify = Some(summary);
                }
                Err(error) => report.fatal = Some(error),
            }
        }

        if self.config.run_after && report.fatal.is_none() {
            if let Err(error) = self.core.reset(ResetKind::System, ResetBehavior::Run) {
                report.fatal = Some(error);
            }
        }

        report.elapsed = start.elapsed();
        tracing::info!(
            "Flashing finished in {:?}: {} programmed, {} unchanged, {} failed",
            report.elapsed,
            report.programmed_sectors(),
            report.unchanged_sectors(),
            report.failed_sectors()
        );

        Ok(report)
    }

    /// Uploads the algorithm and checks that it arrived intact.
    ///
    /// Runs on every [`Self::program`] call. The RAM region is released after each run.
    fn load(&mut self) -> Result<(), FlashError> {
        let address = self.algorithm.load_address;
        let span = tracing::debug_span!("Loading algorithm into RAM", address).entered();

        self.core
            .memory()
            .write_32(address, &self.algorithm.instructions)?;

        let mut data = vec![0; self.algorithm.instructions.len()];
        self.core.memory().read_32(address, &mut data)?;

        drop(span);

        if let Some(offset) = self
            .algorithm
            .instructions
            .iter()
            .zip(&data)
            .position(|(original, read_back)| original != read_back)
        {
            tracing::error!(
                "Failed to verify flash algorithm. Data mismatch at address {:#010x}",
                address + (4 * offset) as u64
            );
            return Err(FlashError::AlgorithmNotLoaded { address });
        }

        tracing::debug!("RAM contents match flashing algo blob.");
        Ok(())
    }

    /// Erases and programs one sector, with retries.
    ///
    /// Returns the error which aborts flashing next to the sector entry.
    fn program_sector(&mut self, sector: &PlannedSector) -> (SectorReport, Option<Error>) {
        let start = Instant::now();
        let range = sector.address_range();
        let address = range.start;
        let size = range.end - range.start;
        self.progress.sector_started(address, size);

        let mut entry = SectorReport {
            address_range: range,
            status: SectorStatus::NotAttempted,
            bytes_written: 0,
            attempts: 0,
            elapsed: Duration::ZERO,
        };

        if self.config.skip_unchanged {
            match self.sector_matches(sector) {
                Ok(true) => {
                    tracing::debug!("Sector {:#010x} is unchanged", address);
                    self.progress.sector_unchanged(address, size);
                    entry.status = SectorStatus::Unchanged;
                    entry.elapsed = start.elapsed();
                    return (entry, None);
                }
                Ok(false) => {}
                Err(error @ Error::TransferFault(_)) => {
                    tracing::debug!("Reading sector {:#010x} failed: {}", address, error);
                    if let Err(fatal) = self.recover() {
                        return (entry, Some(fatal));
                    }
                }
                Err(fatal) => return (entry, Some(fatal)),
            }
        }

        let mut failure = None;
        let mut erased = false;
        while entry.attempts <= self.config.sector_retries {
            entry.attempts += 1;

            match self.write_sector(sector, &mut erased) {
                Ok(bytes) => {
                    entry.status = SectorStatus::Programmed;
                    entry.bytes_written = bytes;
                    entry.elapsed = start.elapsed();
                    self.progress.sector_finished(address, size, entry.elapsed);
                    return (entry, None);
                }
                Err(Attempt::Failed(reason)) => {
                    tracing::warn!(
                        "Attempt {} at sector {:#010x} failed: {:?}",
                        entry.attempts,
                        address,
                        reason
                    );
                    failure = Some(reason);
                    if let Err(fatal) = self.recover() {
                        entry.status = SectorStatus::Failed(reason);
                        entry.elapsed = start.elapsed();
                        return (entry, Some(fatal));
                    }
                }
                Err(Attempt::Fatal(error)) => {
                    // An erased sector no longer holds its old contents.
                    let reason = failure.or(erased.then_some(SectorFailure::Aborted));
                    if let Some(reason) = reason {
                        entry.status = SectorStatus::Failed(reason);
                        self.progress.sector_failed(address, reason, entry.attempts);
                    }
                    entry.elapsed = start.elapsed();
                    return (entry, Some(error));
                }
            }
        }

        entry.elapsed = start.elapsed();
        if let Some(reason) = failure {
            entry.status = SectorStatus::Failed(reason);
            self.progress.sector_failed(address, reason, entry.attempts);
        }
        (entry, None)
    }

    /// Brings the core back into a halted state after a failed call.
    ///
    /// The interrupted routine leaves the algorithm in an unknown state, so
    /// it is initialized again before the next call.
    fn recover(&mut self) -> Result<(), Error> {
        if !self.core.state().is_halted() {
            self.core.halt(self.halt_timeout)?;
        }
        self.active = None;
        Ok(())
    }

    /// Sets `erased` once `EraseSector()` was called for the sector.
    fn write_sector(&mut self, sector: &PlannedSector, erased: &mut bool) -> Result<u64, Attempt> {
        let address = into_reg(sector.sector.base_address).map_err(Attempt::Fatal)?;

        self.activate(Operation::Erase).map_err(Attempt::Fatal)?;
        let timeout = self.erase_timeout();
        *erased = true;
        let result = self
            .call("erase_sector", self.algorithm.pc_erase_sector, &[address], timeout)
            .map_err(|error| classify(error, Operation::Erase))?;
        if result != 0 {
            return Err(Attempt::Failed(SectorFailure::EraseError(result)));
        }

        self.activate(Operation::Program).map_err(Attempt::Fatal)?;
        let mut written = 0;
        for (index, (page, data)) in sector.pages().enumerate() {
            self.program_page(index, page.base_address, data)
                .map_err(|error| classify(error, Operation::Program))?;
            written += data.len() as u64;
        }

        Ok(written)
    }

    fn program_page(&mut self, index: usize, address: u64, data: &[u8]) -> Result<(), Error> {
        let buffers = &self.algorithm.page_buffers;
        let buffer = *buffers
            .get(index % buffers.len().max(1))
            .ok_or_else(|| anyhow::anyhow!("The flash algorithm has no page buffer"))?;

        self.core.memory().write_8(buffer, data)?;

        let timeout = self.program_timeout();
        let result = self.call(
            "program_page",
            self.algorithm.pc_program_page,
            &[into_reg(address)?, data.len() as u32, into_reg(buffer)?],
            timeout,
        )?;
        if result != 0 {
            return Err(Error::AlgorithmError {
                routine: "program_page",
                code: result,
            });
        }
        Ok(())
    }

    fn erase_timeout(&self) -> Duration {
        self.config.erase_timeout.unwrap_or_else(|| {
            routine_timeout(self.algorithm.flash_properties.erase_sector_timeout, self.config.init_timeout)
        })
    }

    fn program_timeout(&self) -> Duration {
        self.config.program_timeout.unwrap_or_else(|| {
            routine_timeout(self.algorithm.flash_properties.program_page_timeout, self.config.init_timeout)
        })
    }

    /// Runs `Init()` for `operation`, after `UnInit()` of another active operation.
    fn activate(&mut self, operation: Operation) -> Result<(), Error> {
        if self.active == Some(operation) {
            return Ok(());
        }
        self.deactivate()?;

        if let Some(pc_init) = self.algorithm.pc_init {
            let base = into_reg(self.algorithm.flash_properties.address_range.start)?;
            let result = self.call(
                "init",
                pc_init,
                &[base, 0, operation.code()],
                self.config.init_timeout,
            )?;
            if result != 0 {
                return Err(Error::AlgorithmError {
                    routine: "init",
                    code: result,
                });
            }
        }

        tracing::debug!("Flash algorithm initialized for {:?}", operation);
        self.active = Some(operation);
        Ok(())
    }

    fn deactivate(&mut self) -> Result<(), Error> {
        let Some(operation) = self.active.take() else {
            return Ok(());
        };

        if let Some(pc_uninit) = self.algorithm.pc_uninit {
            let result = self.call(
                "uninit",
                pc_uninit,
                &[operation.code()],
                self.config.init_timeout,
            )?;
            if result != 0 {
                return Err(Error::AlgorithmError {
                    routine: "uninit",
                    code: result,
                });
            }
        }
        Ok(())
    }

    /// Calls an entry point and waits for it to return. Returns R0.
    fn call(
        &mut self,
        routine: &'static str,
        entry: u64,
        arguments: &[u32],
        timeout: Duration,
    ) -> Result<u32, Error> {
        let deadline = Deadline::after(timeout);
        let registers = Registers::for_call(&self.algorithm, entry, arguments)?;
        tracing::debug!("Calling {} {:?}", routine, registers);

        for (id, value) in registers.iter() {
            self.core.write_core_register(id, value)?;
        }
        self.core.resume()?;

        let core = &mut self.core;
        let halted = deadline.poll(POLL_INTERVAL, || {
            Ok::<_, Error>(core.status()?.is_halted().then_some(()))
        })?;
        if halted.is_none() {
            tracing::warn!("{} did not return within {:?}", routine, timeout);
            return Err(Error::AlgorithmTimeout { routine, timeout });
        }

        self.core.read_core_register(RegisterId::R0)
    }

    fn read_sector(&mut self, sector: &PlannedSector) -> Result<Vec<u8>, Error> {
        let mut data = vec![0; sector.data.len()];
        self.core
            .memory()
            .read_8(sector.sector.base_address, &mut data)?;
        Ok(data)
    }

    fn sector_matches(&mut self, sector: &PlannedSector) -> Result<bool, Error> {
        Ok(self.read_sector(sector)? == sector.data)
    }

    /// Reads back every sector which should hold the planned data.
    fn verify(&mut self, plan: &FlashPlan, report: &ProgramReport) -> Result<VerifySummary, Error> {
        let mut summary = VerifySummary::default();

        for (sector, entry) in plan.sectors().iter().zip(&report.sectors) {
            if !matches!(entry.status, SectorStatus::Programmed | SectorStatus::Unchanged) {
                continue;
            }

            let data = self.read_sector(sector)?;
            let mismatched = data
                .iter()
                .zip(&sector.data)
                .filter(|(read, planned)| read != planned)
                .count() as u64;
            if mismatched > 0 {
                tracing::warn!(
                    "Sector {:#010x} differs in {} bytes",
                    sector.sector.base_address,
                    mismatched
                );
            }

            summary.sectors_checked += 1;
            summary.bytes_checked += data.len() as u64;
            summary.mismatched_bytes += mismatched;
        }

        Ok(summary)
    }
}

/// Timeout of a routine from the flash properties, in milliseconds.
fn routine_timeout(millis: u32, fallback: Duration) -> Duration {
    if millis == 0 {
        fallback
    } else {
        Duration::from_millis(millis.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn calling_convention() {
        let algorithm = FlashAlgorithm {
            load_address: 0x2000_0000,
            static_base: 0x2000_0100,
            begin_stack: 0x2000_0400,
            ..Default::default()
        };

        let registers = Registers::for_call(&algorithm, 0x2000_0021, &[0x0800_0000, 0, 2]).unwrap();

        assert_eq!(registers.get(RegisterId::PC), Some(0x2000_0021));
        assert_eq!(registers.get(RegisterId::R0), Some(0x0800_0000));
        assert_eq!(registers.get(RegisterId::R2), Some(2));
        assert_eq!(registers.get(RegisterId::R3), None);
        assert_eq!(registers.get(RegisterId::R9), Some(0x2000_0100));
        assert_eq!(registers.get(RegisterId::SP), Some(0x2000_0400));
        assert_eq!(registers.get(RegisterId::LR), Some(0x2000_0001));
        // PC is written last, right before the core is resumed.
        assert_eq!(registers.iter().last(), Some((RegisterId::PC, 0x2000_0021)));
    }

    #[test]
    fn addresses_must_fit_into_registers() {
        let algorithm = FlashAlgorithm {
            load_address: 0x1_0000_0000,
            ..Default::default()
        };
        assert!(Registers::for_call(&algorithm, 0, &[]).is_err());
    }

    #[test]
    fn failures_are_classified_by_operation() {
        let timeout = Error::AlgorithmTimeout {
            routine: "erase_sector",
            timeout: Duration::from_millis(1),
        };
        assert!(matches!(
            classify(timeout, Operation::Erase),
            Attempt::Failed(SectorFailure::EraseTimeout)
        ));
        assert!(matches!(
            classify(
                Error::AlgorithmError {
                    routine: "program_page",
                    code: 5
                },
                Operation::Program
            ),
            Attempt::Failed(SectorFailure::ProgramError(5))
        ));
        assert!(matches!(
            classify(Error::ConcurrentAccess, Operation::Program),
            Attempt::Fatal(Error::ConcurrentAccess)
        ));
    }
}
