use std::ops::Range;
use std::time::Duration;

use super::FlashError;
use crate::error::Error;
use crate::probe::cmsisdap::commands::transfer::TransferError;

/// Why a sector could not be programmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectorFailure {
    EraseTimeout,
    ProgramTimeout,
    /// Non-zero return value of `EraseSector()`.
    EraseError(u32),
    /// Non-zero return value of `ProgramPage()`.
    ProgramError(u32),
    Transfer(TransferError),
    /// Flashing was aborted after the sector was erased.
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectorStatus {
    /// Erased and programmed.
    Programmed,
    /// Already held the planned data and was skipped.
    Unchanged,
    /// Failed on the last attempt.
    Failed(SectorFailure),
    /// Not touched because flashing was aborted before.
    NotAttempted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectorReport {
    pub address_range: Range<u64>,
    pub status: SectorStatus,
    pub bytes_written: u64,
    pub attempts: u32,
    pub elapsed: Duration,
}

/// The outcome of reading back the flash after programming.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerifySummary {
    pub sectors_checked: usize,
    pub bytes_checked: u64,
    pub mismatched_bytes: u64,
}

/// The audit log of one [`Flasher::program`](super::Flasher::program) run.
#[derive(Debug, Default)]
pub struct ProgramReport {
    pub sectors: Vec<SectorReport>,
    pub verify: Option<VerifySummary>,
    /// The error which aborted flashing after the target was touched.
    pub fatal: Option<Error>,
    pub elapsed: Duration,
}

impl ProgramReport {
    pub fn total_sectors(&self) -> usize {
        self.sectors.len()
    }

    pub fn failed_sectors(&self) -> usize {
        self.count(|status| matches!(status, SectorStatus::Failed(_)))
    }

    pub fn programmed_sectors(&self) -> usize {
        self.count(|status| status == SectorStatus::Programmed)
    }

    pub fn unchanged_sectors(&self) -> usize {
        self.count(|status| status == SectorStatus::Unchanged)
    }

    pub fn not_attempted_sectors(&self) -> usize {
        self.count(|status| status == SectorStatus::NotAttempted)
    }

    fn count(&self, predicate: impl Fn(SectorStatus) -> bool) -> usize {
        self.sectors.iter().filter(|s| predicate(s.status)).count()
    }

    pub fn bytes_written(&self) -> u64 {
        self.sectors.iter().map(|s| s.bytes_written).sum()
    }

    /// All sectors are programmed or unchanged and the verification found no difference.
    pub fn is_success(&self) -> bool {
        self.fatal.is_none()
            && self
                .sectors
                .iter()
                .all(|s| matches!(s.status, SectorStatus::Programmed | SectorStatus::Unchanged))
            && self.verify.map_or(true, |v| v.mismatched_bytes == 0)
    }

    /// Turns a partial failure into an error.
    pub fn into_result(self) -> Result<Self, FlashError> {
        if let Some(error) = self.fatal {
            return Err(FlashError::Core(error));
        }

        let failed = self.failed_sectors() + self.not_attempted_sectors();
        if failed > 0 {
            return Err(FlashError::SectorsFailed {
                failed,
                total: self.total_sectors(),
            });
        }

        if let Some(verify) = self.verify.filter(|v| v.mismatched_bytes > 0) {
            return Err(FlashError::VerifyFailed {
                mismatched_bytes: verify.mismatched_bytes,
            });
        }

        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sector(status: SectorStatus) -> SectorReport {
        SectorReport {
            address_range: 0..0x400,
            status,
            bytes_written: 0x400,
            attempts: 1,
            elapsed: Duration::ZERO,
        }
    }

    #[test]
    fn partial_failure_becomes_sectors_failed() {
        let report = ProgramReport {
            sectors: vec![
                sector(SectorStatus::Programmed),
                sector(SectorStatus::Failed(SectorFailure::EraseTimeout)),
                sector(SectorStatus::Unchanged),
            ],
            ..Default::default()
        };

        assert_eq!(report.failed_sectors(), 1);
        assert!(!report.is_success());
        assert!(matches!(
            report.into_result(),
            Err(FlashError::SectorsFailed {
                failed: 1,
                total: 3
            })
        ));
    }

    #[test]
    fn verify_mismatch_is_an_error() {
        let report = ProgramReport {
            sectors: vec![sector(SectorStatus::Programmed)],
            verify: Some(VerifySummary {
                sectors_checked: 1,
                bytes_checked: 0x400,
                mismatched_bytes: 3,
            }),
            ..Default::default()
        };

        assert!(matches!(
            report.into_result(),
            Err(FlashError::VerifyFailed { mismatched_bytes: 3 })
        ));
    }

    #[test]
    fn clean_report_passes() {
        let report = ProgramReport {
            sectors: vec![sector(SectorStatus::Programmed), sector(SectorStatus::Unchanged)],
            verify: Some(VerifySummary::default()),
            ..Default::default()
        };
        assert!(report.is_success());
        assert_eq!(report.into_result().unwrap().bytes_written(), 0x800);
    }
}
