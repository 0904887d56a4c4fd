use std::time::Duration;

use crate::architecture::arm::ArmError;
use crate::core::{BreakpointHandle, CoreState};
use crate::probe::cmsisdap::commands::transfer::TransferError;
use crate::DebugProbeError;
use thiserror::Error;

/// Why an operation is not possible in the current state.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateError {
    #[error("the core is {0:?}")]
    Core(CoreState),
    #[error("{0} transfers are pending in the queue")]
    BatchInFlight(usize),
    #[error("the read result was taken before the queue was flushed")]
    NotFlushed,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("A transfer failed: {0}")]
    TransferFault(TransferError),
    #[error("Timeout while waiting for {0}")]
    ResourceTimeout(&'static str),
    #[error("Operation not possible: {0}")]
    InvalidState(#[from] StateError),
    #[error("All {available} {resource} are in use")]
    ResourceExhausted {
        resource: &'static str,
        available: usize,
    },
    #[error("The flash algorithm did not return from {routine} within {timeout:?}")]
    AlgorithmTimeout {
        routine: &'static str,
        timeout: Duration,
    },
    #[error("The flash algorithm returned {code:#x} from {routine}")]
    AlgorithmError { routine: &'static str, code: u32 },
    #[error("The session is in use by another thread")]
    ConcurrentAccess,
    #[error("An error with the usage of the probe occurred")]
    Probe(#[from] DebugProbeError),
    #[error("An ARM specific error occurred")]
    Arm(#[source] ArmError),
    #[error("A breakpoint is already set at {0:#010x}")]
    BreakpointExists(u64),
    #[error("No breakpoint with handle {0:?} exists")]
    UnknownBreakpoint(BreakpointHandle),
    #[error("A breakpoint cannot be set at {0:#010x}")]
    UnsupportedBreakpointAddress(u64),
    #[error("A watchpoint of {len} bytes cannot be placed at {address:#010x}")]
    InvalidWatchpoint { address: u64, len: u32 },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Errors after which the state of the core can no longer be trusted.
    pub fn leaves_core_unknown(&self) -> bool {
        matches!(self, Error::TransferFault(_) | Error::ResourceTimeout(_))
    }
}

impl From<ArmError> for Error {
    fn from(error: ArmError) -> Self {
        match error {
            ArmError::TransferFault(e) => Error::TransferFault(e),
            ArmError::Timeout(what) => Error::ResourceTimeout(what),
            ArmError::NotFlushed => Error::InvalidState(StateError::NotFlushed),
            ArmError::BatchInFlight(n) => Error::InvalidState(StateError::BatchInFlight(n)),
            ArmError::Probe(e) => Error::Probe(e),
            other => Error::Arm(other),
        }
    }
}
