use super::super::{ensure_capacity, CommandId, Request, SendError, Status};
use scroll::{Pwrite, LE};

/// The DAP_TransferConfigure command sets parameters for DAP_Transfer and DAP_TransferBlock.
#[derive(Debug)]
pub struct ConfigureRequest {
    /// Number of extra idle cycles after each transfer.
    pub idle_cycles: u8,
    /// Number of transfer retries after a WAIT response, done by the probe itself.
    pub wait_retry: u16,
    /// Number of retries on reads with value match.
    pub match_retry: u16,
}

impl Request for ConfigureRequest {
    const COMMAND_ID: CommandId = CommandId::TransferConfigure;

    type Response = Status;

    fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, SendError> {
        ensure_capacity(buffer, 5)?;
        buffer[0] = self.idle_cycles;
        buffer
            .pwrite_with(self.wait_retry, 1, LE)
            .and_then(|_| buffer.pwrite_with(self.match_retry, 3, LE))
            .map_err(|_| SendError::PacketTooLarge(buffer.len() + 1))?;
        Ok(5)
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, SendError> {
        Status::from_response(buffer)
    }
}
