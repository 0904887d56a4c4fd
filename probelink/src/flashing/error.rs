use thiserror::Error;

use crate::architecture::arm::ArmError;
use crate::error;

/// Describes any error that happened during the or in preparation for the flashing procedure.
///
/// Errors returned by [`Flasher::program`](super::Flasher::program) mean that
/// no flash sector was touched. Failures after that point are collected in
/// the [`ProgramReport`](super::ProgramReport).
#[derive(Error, Debug)]
pub enum FlashError {
    #[error("The state of the core is unknown, reset the target before flashing")]
    CoreStateUnknown,
    #[error("The RAM contents at {address:#010x} did not match the flash algorithm after loading it")]
    AlgorithmNotLoaded { address: u64 },
    #[error("The page size {size} of the flash algorithm is not a multiple of 4")]
    InvalidPageSize { size: u32 },
    #[error("The flash algorithm does not describe any sectors")]
    NoSectors,
    #[error("The flash algorithm cannot be loaded to {address:#010x}")]
    InvalidLoadAddress { address: u64 },
    #[error("The flash algorithm needs {required} bytes of RAM, but only {available} are available")]
    NotEnoughRam { required: u64, available: u64 },
    #[error("The range {start:#010x}..{end:#010x} is not inside the flash")]
    AddressNotInFlash { start: u64, end: u64 },
    #[error("The data at {address:#010x} overlaps data which was added before")]
    DataOverlaps { address: u64 },
    #[error("{failed} of {total} sectors failed to program")]
    SectorsFailed { failed: usize, total: usize },
    #[error("Verification found {mismatched_bytes} differing bytes")]
    VerifyFailed { mismatched_bytes: u64 },
    #[error("Something during the interaction with the core went wrong")]
    Core(#[from] error::Error),
}

impl From<ArmError> for FlashError {
    fn from(error: ArmError) -> Self {
        FlashError::Core(error.into())
    }
}
