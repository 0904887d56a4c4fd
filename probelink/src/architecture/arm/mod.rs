//! All the interface bits for ARM.

pub mod ap;
pub mod communication_interface;
pub mod core;
pub mod dp;
pub mod memory;

pub use communication_interface::{ArmCommunicationInterface, DeferredRead};
pub use memory::MemoryAp;

use crate::probe::{
    cmsisdap::commands::transfer::TransferError, CmsisDapError, DebugProbeError,
};

/// Selects the DP or an AP as target of a transfer.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PortType {
    DebugPort,
    AccessPort,
}

/// A typed view of a DP or AP register.
pub trait Register: Clone + From<u32> + Into<u32> + Sized + std::fmt::Debug {
    /// Address within the port. For AP registers bits 7:4 select the bank.
    const ADDRESS: u8;
    const NAME: &'static str;
}

#[derive(Debug, thiserror::Error)]
pub enum ArmError {
    #[error("The target reported a fault during a transfer: {0}")]
    TransferFault(TransferError),
    #[error("The result of a read was taken before the queue was flushed")]
    NotFlushed,
    #[error("Timeout while waiting for {0}")]
    Timeout(&'static str),
    #[error("Failed to access address {address:#010x} as it is not aligned to the requirement of {alignment} bytes")]
    MemoryNotAligned { address: u64, alignment: usize },
    #[error("Address {0:#x} is outside the 32-bit address space of the access port")]
    OutOfBounds(u64),
    #[error("{0} transfers are pending, flush the queue first")]
    BatchInFlight(usize),
    #[error("An error occurred in the communication with the probe")]
    Probe(#[from] DebugProbeError),
}

impl ArmError {
    pub fn alignment_error(address: u64, alignment: usize) -> Self {
        ArmError::MemoryNotAligned { address, alignment }
    }
}

impl From<CmsisDapError> for ArmError {
    fn from(error: CmsisDapError) -> Self {
        ArmError::Probe(error.into())
    }
}

impl From<TransferError> for ArmError {
    fn from(error: TransferError) -> Self {
        ArmError::TransferFault(error)
    }
}
