//! CMSIS-DAP command framing.
//!
//! Every command is a [`Request`] that serializes itself after the command
//! byte and parses the response after the echoed command byte.
pub mod general;
pub mod swd;
pub mod swj;
pub mod transfer;

use crate::probe::{Transport, TransportError};
use general::info::PacketSizeCommand;
use std::{str::Utf8Error, time::Duration};

#[derive(Debug, thiserror::Error)]
pub enum CmsisDapError {
    #[error("Error handling CMSIS-DAP command {command_id:?}")]
    Send {
        command_id: CommandId,
        source: SendError,
    },
    #[error("Error handling raw CMSIS-DAP command {command_id:#04x}")]
    RawSend { command_id: u8, source: SendError },
    #[error("CMSIS-DAP responded with an error to {0:?}")]
    ErrorResponse(CommandId),
    #[error("Connecting to the target with {0} failed")]
    InitFailed(String),
    #[error("Too much data provided for SWJ Sequence command")]
    TooMuchData,
    #[error("Could not determine a suitable packet size for this probe")]
    NoPacketSize,
    #[error("The probe reported a protocol error, the target connection is in an unknown state")]
    ProtocolError,
    #[error("The probe must be reconnected after a protocol error")]
    ReconnectRequired,
}

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("Error in the probe transport")]
    Transport(#[from] TransportError),
    #[error("Not enough data in response from probe")]
    NotEnoughData,
    #[error("Request does not fit into a packet of {0} bytes")]
    PacketTooLarge(usize),
    #[error("Status can only be 0x00 or 0xFF")]
    InvalidResponseStatus,
    #[error("Connecting to target failed, received: {0:x}")]
    ConnectResponseError(u8),
    #[error("Command ID in response ({0:#04x}) does not match sent command ID")]
    CommandIdMismatch(u8),
    /// String in response is not valid UTF-8.
    ///
    /// Strings are required to be UTF-8 encoded by the
    /// CMSIS-DAP specification.
    #[error("String in response is not valid UTF-8.")]
    InvalidString(#[from] Utf8Error),
    #[error("Unexpected answer to command")]
    UnexpectedAnswer,
}

impl CmsisDapError {
    /// Whether the error is a transport timeout while sending or receiving.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            CmsisDapError::Send {
                source: SendError::Transport(TransportError::Timeout),
                ..
            } | CmsisDapError::RawSend {
                source: SendError::Transport(TransportError::Timeout),
                ..
            }
        )
    }
}

/// A CMSIS-DAP device reached through a [`Transport`].
#[derive(Debug)]
pub struct CmsisDapDevice {
    transport: Box<dyn Transport>,
    packet_size: usize,
    timeout: Duration,
}

impl CmsisDapDevice {
    pub fn new(transport: Box<dyn Transport>, timeout: Duration) -> Self {
        let packet_size = transport.packet_size();
        Self {
            transport,
            packet_size,
            timeout,
        }
    }

    pub fn packet_size(&self) -> usize {
        self.packet_size
    }

    pub(super) fn drain(&mut self) {
        self.transport.drain();
    }

    /// Attempt to determine the correct packet size for this device.
    ///
    /// Some probes only answer once they received a full packet, so a few
    /// timeouts are tolerated. The negotiated size never exceeds what the
    /// transport can carry.
    pub(super) fn find_packet_size(&mut self) -> Result<usize, CmsisDapError> {
        for repeat in 0..16 {
            tracing::debug!("Attempt {} to find packet size", repeat + 1);
            match send_command(self, &PacketSizeCommand {}) {
                Ok(size) => {
                    let size = (size as usize).min(self.transport.packet_size());
                    tracing::debug!("Success: packet size is {}", size);
                    self.packet_size = size;
                    return Ok(size);
                }

                // Ignore timeouts and retry.
                Err(e) if e.is_timeout() => (),

                // Raise other errors.
                Err(e) => return Err(e),
            }
        }

        // If we didn't return early, no sizes worked, report an error.
        Err(CmsisDapError::NoPacketSize)
    }

    /// Sends one packet and returns the response after its echoed command byte.
    fn exchange(&mut self, packet: &[u8]) -> Result<Vec<u8>, SendError> {
        trace_buffer("Transmit buffer", packet);
        self.transport.write_packet(packet, self.timeout)?;

        let response = self.transport.read_packet(self.timeout)?;
        trace_buffer("Receive buffer", &response);

        match response.first() {
            None => Err(SendError::NotEnoughData),
            Some(&id) if id == packet[0] => Ok(response[1..].to_vec()),
            Some(&id) => Err(SendError::CommandIdMismatch(id)),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Status {
    DapOk = 0x00,
    DapError = 0xFF,
}

impl Status {
    pub fn from_byte(value: u8) -> Result<Self, SendError> {
        match value {
            0x00 => Ok(Status::DapOk),
            0xFF => Ok(Status::DapError),
            _ => Err(SendError::InvalidResponseStatus),
        }
    }

    /// Parses the status byte at the start of a response.
    pub(crate) fn from_response(buffer: &[u8]) -> Result<Self, SendError> {
        Self::from_byte(*buffer.first().ok_or(SendError::NotEnoughData)?)
    }
}

/// Command ID for CMSIS-DAP commands.
///
/// The command ID is always sent as the first byte for every command,
/// and also is the first byte of every response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandId {
    Info = 0x00,
    HostStatus = 0x01,
    Connect = 0x02,
    Disconnect = 0x03,
    TransferConfigure = 0x04,
    Transfer = 0x05,
    TransferBlock = 0x06,
    ResetTarget = 0x0A,
    SwjClock = 0x11,
    SwjSequence = 0x12,
    SwdConfigure = 0x13,
}

pub(crate) trait Request {
    const COMMAND_ID: CommandId;

    type Response;

    /// Convert the request to bytes, which can be sent to the probe.
    /// Returns the amount of bytes written to the buffer.
    fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, SendError>;

    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, SendError>;
}

pub(crate) fn send_command<Req: Request>(
    device: &mut CmsisDapDevice,
    request: &Req,
) -> Result<Req::Response, CmsisDapError> {
    send_command_inner(device, request).map_err(|e| CmsisDapError::Send {
        command_id: Req::COMMAND_ID,
        source: e,
    })
}

fn send_command_inner<Req: Request>(
    device: &mut CmsisDapDevice,
    request: &Req,
) -> Result<Req::Response, SendError> {
    // Size the buffer for the maximum packet size.
    let mut buffer = vec![0; device.packet_size.max(1)];

    buffer[0] = Req::COMMAND_ID as u8;
    let size = request.to_bytes(&mut buffer[1..])? + 1;

    let response = device.exchange(&buffer[..size])?;
    request.parse_response(&response)
}

/// Sends an arbitrary command and returns the response payload.
pub(crate) fn send_raw(
    device: &mut CmsisDapDevice,
    command_id: u8,
    payload: &[u8],
) -> Result<Vec<u8>, CmsisDapError> {
    let mut raw = || {
        if payload.len() + 1 > device.packet_size {
            return Err(SendError::PacketTooLarge(device.packet_size));
        }
        let mut packet = Vec::with_capacity(payload.len() + 1);
        packet.push(command_id);
        packet.extend_from_slice(payload);
        device.exchange(&packet)
    };

    raw().map_err(|source| CmsisDapError::RawSend { command_id, source })
}

/// Fails with [`SendError::PacketTooLarge`] unless `buffer` holds `needed` bytes.
pub(crate) fn ensure_capacity(buffer: &[u8], needed: usize) -> Result<(), SendError> {
    if buffer.len() < needed {
        Err(SendError::PacketTooLarge(buffer.len() + 1))
    } else {
        Ok(())
    }
}

/// Trace log a buffer, including only the first trailing zero.
///
/// Responses often carry many trailing zeros, which make the trace output
/// very long and difficult to read.
fn trace_buffer(name: &str, buf: &[u8]) {
    if tracing::enabled!(tracing::Level::TRACE) {
        let len = buf.len();
        let cut = len + 1 - buf.iter().rev().position(|&x| x != 0).unwrap_or(len);
        let end = std::cmp::min(len, std::cmp::max(1, cut));
        tracing::trace!("{}: {:02X?}...", name, &buf[..end]);
    }
}
