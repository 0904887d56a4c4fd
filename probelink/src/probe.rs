//! Probe side of the stack: the packet transport boundary and the CMSIS-DAP engine.
pub mod cmsisdap;
#[cfg(any(test, feature = "test"))]
pub mod fake_probe;
pub(crate) mod queue;

use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};

pub use cmsisdap::commands::CmsisDapError;

/// The protocol that is to be used by the probe when communicating with the target.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireProtocol {
    Swd,
    Jtag,
}

impl fmt::Display for WireProtocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            WireProtocol::Swd => write!(f, "SWD"),
            WireProtocol::Jtag => write!(f, "JTAG"),
        }
    }
}

impl std::str::FromStr for WireProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match &s.to_ascii_lowercase()[..] {
            "swd" => Ok(WireProtocol::Swd),
            "jtag" => Ok(WireProtocol::Jtag),
            _ => Err(format!(
                "'{s}' is not a valid protocol. Choose from [swd, jtag]."
            )),
        }
    }
}

/// Errors reported by a [`Transport`].
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("Timeout in probe communication.")]
    Timeout,
    #[error("The probe is no longer connected.")]
    Disconnected,
    #[error("I/O error in probe communication")]
    Io(#[from] std::io::Error),
    #[error("An error specific to the transport occurred")]
    Other(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// A byte-oriented packet link to a physical probe.
///
/// Implementations wrap a concrete device (HID report, bulk endpoint, network
/// socket, ...). Packets start with the CMSIS-DAP command byte; any framing
/// the device itself needs, like a HID report id, is added by the transport.
pub trait Transport: Send + fmt::Debug {
    /// Sends one request packet.
    fn write_packet(&mut self, data: &[u8], timeout: Duration) -> Result<(), TransportError>;

    /// Receives one response packet.
    fn read_packet(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError>;

    /// Largest packet the transport can carry in one direction.
    fn packet_size(&self) -> usize;

    /// Discards stale responses, so the next response belongs to the next request.
    fn drain(&mut self) {
        tracing::debug!("Draining probe of any pending data.");
        while let Ok(packet) = self.read_packet(Duration::from_millis(1)) {
            if packet.is_empty() {
                break;
            }
        }
    }
}

/// This error occurs whenever the debug probe logic encounters an error while operating the relevant debug probe.
#[derive(thiserror::Error, Debug)]
pub enum DebugProbeError {
    #[error("Error in the probe transport")]
    Transport(#[from] TransportError),
    #[error("CMSIS-DAP error")]
    CmsisDap(#[from] CmsisDapError),
    #[error("Probe does not support protocol {0}")]
    UnsupportedProtocol(WireProtocol),
    #[error("The requested speed setting ({0} kHz) is not supported by the probe")]
    UnsupportedSpeed(u32),
    #[error("You need to be attached to the target to perform this action")]
    NotAttached,
}
