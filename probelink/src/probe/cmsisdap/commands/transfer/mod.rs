pub mod configure;

use super::{ensure_capacity, CommandId, Request, SendError};
use crate::architecture::arm::PortType;
use scroll::{Pread, Pwrite, LE};

/// Maximum number of transfers a single DAP_Transfer command can carry.
pub const MAX_TRANSFERS_PER_PACKET: usize = 255;

/// Direction and payload of a single register access.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TransferKind {
    Read,
    Write(u32),
}

/// One DP or AP register access.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Transfer {
    pub port: PortType,
    /// Register address, only bits A[3:2] are transmitted.
    pub address: u8,
    pub kind: TransferKind,
}

impl Transfer {
    pub fn read(port: PortType, address: u8) -> Self {
        Transfer {
            port,
            address,
            kind: TransferKind::Read,
        }
    }

    pub fn write(port: PortType, address: u8, value: u32) -> Self {
        Transfer {
            port,
            address,
            kind: TransferKind::Write(value),
        }
    }

    pub fn is_read(&self) -> bool {
        self.kind == TransferKind::Read
    }

    /// The request byte: APnDP, RnW, A2, A3.
    fn request_byte(&self) -> u8 {
        request_byte(self.port, self.address, self.is_read())
    }

    fn request_len(&self) -> usize {
        match self.kind {
            TransferKind::Read => 1,
            TransferKind::Write(_) => 5,
        }
    }

    fn response_len(&self) -> usize {
        match self.kind {
            TransferKind::Read => 4,
            TransferKind::Write(_) => 0,
        }
    }
}

fn request_byte(port: PortType, address: u8, read: bool) -> u8 {
    (port == PortType::AccessPort) as u8 | (read as u8) << 1 | (address & 0b1100)
}

/// Outcome of a transfer that did not complete.
#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TransferError {
    #[error("The target kept answering WAIT")]
    Wait,
    #[error("The target answered FAULT")]
    Fault,
    #[error("The target did not answer")]
    NoAck,
    #[error("The transfer was not executed because an earlier transfer failed")]
    Aborted,
}

/// The acknowledge of the last executed transfer.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Ack {
    Ok = 1,
    Wait = 2,
    Fault = 4,
    NoAck = 7,
}

impl Ack {
    fn from_byte(byte: u8) -> Self {
        match byte & 0x7 {
            1 => Ack::Ok,
            2 => Ack::Wait,
            4 => Ack::Fault,
            _ => Ack::NoAck,
        }
    }

    /// The error a transfer resolves to when it received this acknowledge.
    pub fn error(self) -> Option<TransferError> {
        match self {
            Ack::Ok => None,
            Ack::Wait => Some(TransferError::Wait),
            Ack::Fault => Some(TransferError::Fault),
            Ack::NoAck => Some(TransferError::NoAck),
        }
    }
}

/// Number of leading transfers that fit into one packet of `packet_size` bytes.
///
/// Both the request (3 header bytes, 1 per read, 5 per write) and the
/// response (3 header bytes, 4 per read) have to fit.
pub fn transfers_per_packet(transfers: &[Transfer], packet_size: usize) -> usize {
    let mut request = 3;
    let mut response = 3;

    for (count, transfer) in transfers.iter().enumerate() {
        request += transfer.request_len();
        response += transfer.response_len();

        if count == MAX_TRANSFERS_PER_PACKET || request > packet_size || response > packet_size {
            return count;
        }
    }

    transfers.len()
}

/// Read/write single and multiple registers.
///
/// The response carries the number of executed transfers, the acknowledge
/// of the last one and the read data in request order. Execution stops at
/// the first transfer which does not get an OK acknowledge.
#[derive(Debug)]
pub struct TransferRequest<'a> {
    /// Zero based device index of the selected JTAG device. For SWD mode the value is ignored.
    pub dap_index: u8,
    pub transfers: &'a [Transfer],
}

impl Request for TransferRequest<'_> {
    const COMMAND_ID: CommandId = CommandId::Transfer;

    type Response = TransferResponse;

    fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, SendError> {
        let size = 2 + self
            .transfers
            .iter()
            .map(Transfer::request_len)
            .sum::<usize>();
        ensure_capacity(buffer, size)?;

        buffer[0] = self.dap_index;
        buffer[1] = self.transfers.len() as u8;

        let mut offset = 2;
        for transfer in self.transfers {
            buffer[offset] = transfer.request_byte();
            offset += 1;
            if let TransferKind::Write(value) = transfer.kind {
                buffer
                    .pwrite_with(value, offset, LE)
                    .map_err(|_| SendError::PacketTooLarge(buffer.len() + 1))?;
                offset += 4;
            }
        }

        Ok(offset)
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, SendError> {
        if buffer.len() < 2 {
            return Err(SendError::NotEnoughData);
        }
        let count = buffer[0] as usize;
        if count > self.transfers.len() {
            tracing::error!("Transfer count larger than requested number of transfers");
            return Err(SendError::UnexpectedAnswer);
        }

        let mut data = Vec::new();
        let mut offset = 2;
        for _ in self.transfers[..count].iter().filter(|t| t.is_read()) {
            let value: u32 = buffer
                .pread_with(offset, LE)
                .map_err(|_| SendError::NotEnoughData)?;
            data.push(value);
            offset += 4;
        }

        Ok(TransferResponse {
            count,
            ack: Ack::from_byte(buffer[1]),
            protocol_error: buffer[1] & 0x8 != 0,
            data,
        })
    }
}

#[derive(Debug)]
pub struct TransferResponse {
    /// Number of transfers executed successfully.
    pub count: usize,
    pub ack: Ack,
    pub protocol_error: bool,
    /// Read data of the executed reads, in request order.
    pub data: Vec<u32>,
}

/// Repeated access to a single register.
#[derive(Debug)]
pub(crate) struct TransferBlockRequest<'a> {
    /// Zero-based device index of the selected JTAG device. For SWD mode the
    /// value is ignored.
    pub dap_index: u8,
    pub port: PortType,
    pub address: u8,
    pub kind: BlockKind<'a>,
}

#[derive(Debug)]
pub(crate) enum BlockKind<'a> {
    Read(u16),
    Write(&'a [u32]),
}

impl Request for TransferBlockRequest<'_> {
    const COMMAND_ID: CommandId = CommandId::TransferBlock;

    type Response = TransferBlockResponse;

    fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, SendError> {
        let (count, words) = match self.kind {
            BlockKind::Read(count) => (count, &[][..]),
            BlockKind::Write(data) => (data.len() as u16, data),
        };
        let size = 4 + words.len() * 4;
        ensure_capacity(buffer, size)?;

        buffer[0] = self.dap_index;
        buffer
            .pwrite_with(count, 1, LE)
            .map_err(|_| SendError::PacketTooLarge(buffer.len() + 1))?;
        buffer[3] = request_byte(
            self.port,
            self.address,
            matches!(self.kind, BlockKind::Read(_)),
        );

        for (i, word) in words.iter().enumerate() {
            buffer
                .pwrite_with(*word, 4 + i * 4, LE)
                .map_err(|_| SendError::PacketTooLarge(buffer.len() + 1))?;
        }

        Ok(size)
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, SendError> {
        let count: u16 = buffer
            .pread_with(0, LE)
            .map_err(|_| SendError::NotEnoughData)?;
        let response: u8 = buffer
            .pread_with(2, LE)
            .map_err(|_| SendError::NotEnoughData)?;

        let mut data = Vec::new();
        if let BlockKind::Read(requested) = self.kind {
            if count > requested {
                return Err(SendError::UnexpectedAnswer);
            }
            data.reserve(count as usize);
            for i in 0..count as usize {
                data.push(
                    buffer
                        .pread_with(3 + i * 4, LE)
                        .map_err(|_| SendError::NotEnoughData)?,
                );
            }
        }

        Ok(TransferBlockResponse {
            count: count as usize,
            ack: Ack::from_byte(response),
            protocol_error: response & 0x8 != 0,
            data,
        })
    }
}

#[derive(Debug)]
pub(crate) struct TransferBlockResponse {
    pub count: usize,
    pub ack: Ack,
    pub protocol_error: bool,
    pub data: Vec<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn encode_mixed_transfers() {
        let transfers = [
            Transfer::write(PortType::DebugPort, 0x8, 0x0100_00f0),
            Transfer::read(PortType::AccessPort, 0xC),
        ];
        let mut buffer = [0u8; 64];
        let n = TransferRequest {
            dap_index: 0,
            transfers: &transfers,
        }
        .to_bytes(&mut buffer)
        .unwrap();

        assert_eq!(
            &buffer[..n],
            &[0, 2, 0b1000, 0xf0, 0x00, 0x00, 0x01, 0b1111]
        );
    }

    #[test]
    fn parse_response_stops_at_count() {
        let transfers = [
            Transfer::read(PortType::AccessPort, 0xC),
            Transfer::read(PortType::AccessPort, 0xC),
        ];
        let request = TransferRequest {
            dap_index: 0,
            transfers: &transfers,
        };
        let response = request
            .parse_response(&[1, 4, 0x78, 0x56, 0x34, 0x12])
            .unwrap();

        assert_eq!(response.count, 1);
        assert_eq!(response.ack, Ack::Fault);
        assert_eq!(response.data, vec![0x1234_5678]);
    }

    #[test]
    fn protocol_error_bit() {
        let transfers = [Transfer::read(PortType::DebugPort, 0x0)];
        let request = TransferRequest {
            dap_index: 0,
            transfers: &transfers,
        };
        let response = request.parse_response(&[0, 0x8 | 0x7]).unwrap();
        assert!(response.protocol_error);
        assert_eq!(response.ack, Ack::NoAck);
    }

    #[test]
    fn packet_limits() {
        let writes = vec![Transfer::write(PortType::AccessPort, 0xC, 0); 200];
        // (64 - 3) / 5
        assert_eq!(transfers_per_packet(&writes, 64), 12);

        let reads = vec![Transfer::read(PortType::AccessPort, 0xC); 300];
        // (64 - 3) / 4 limited by the response
        assert_eq!(transfers_per_packet(&reads, 64), 15);
        assert_eq!(transfers_per_packet(&reads, 4096), 255);
    }

    #[test]
    fn block_write_layout() {
        let data = [1u32, 2];
        let request = TransferBlockRequest {
            dap_index: 0,
            port: PortType::AccessPort,
            address: 0xC,
            kind: BlockKind::Write(&data),
        };
        let mut buffer = [0u8; 32];
        let n = request.to_bytes(&mut buffer).unwrap();
        assert_eq!(&buffer[..n], &[0, 2, 0, 0b1101, 1, 0, 0, 0, 2, 0, 0, 0]);
    }
}
