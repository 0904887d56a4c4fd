use super::super::{ensure_capacity, CommandId, Request, SendError, Status};

/// Sets the SWD turnaround period and data phase behaviour.
#[derive(Debug, Default)]
pub struct ConfigureRequest {
    /// Turnaround clock cycles minus one (0 means one cycle).
    pub turnaround: u8,
    /// Always generate a data phase, also on WAIT and FAULT.
    pub data_phase: bool,
}

impl Request for ConfigureRequest {
    const COMMAND_ID: CommandId = CommandId::SwdConfigure;

    type Response = Status;

    fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, SendError> {
        ensure_capacity(buffer, 1)?;
        buffer[0] = (self.turnaround & 0b11) | ((self.data_phase as u8) << 2);
        Ok(1)
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, SendError> {
        Status::from_response(buffer)
    }
}
