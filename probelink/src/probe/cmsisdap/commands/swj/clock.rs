use super::super::{ensure_capacity, CommandId, Request, SendError, Status};
use scroll::{Pwrite, LE};

/// Sets the SWD/JTAG clock frequency in Hz.
#[derive(Debug)]
pub struct SwjClockRequest(pub(crate) u32);

impl SwjClockRequest {
    pub fn from_khz(speed_khz: u32) -> Self {
        SwjClockRequest(speed_khz.saturating_mul(1000))
    }
}

impl Request for SwjClockRequest {
    const COMMAND_ID: CommandId = CommandId::SwjClock;

    type Response = Status;

    fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, SendError> {
        ensure_capacity(buffer, 4)?;
        buffer
            .pwrite_with(self.0, 0, LE)
            .map_err(|_| SendError::PacketTooLarge(buffer.len() + 1))?;
        Ok(4)
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, SendError> {
        Status::from_response(buffer)
    }
}
