use super::super::{CommandId, Request, SendError, Status};

/// Hardware reset of the target through the probe's nRESET line.
#[derive(Debug)]
pub struct ResetRequest;

impl Request for ResetRequest {
    const COMMAND_ID: CommandId = CommandId::ResetTarget;

    type Response = ResetResponse;

    fn to_bytes(&self, _buffer: &mut [u8]) -> Result<usize, SendError> {
        Ok(0)
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, SendError> {
        let status = Status::from_response(buffer)?;
        let execute = match buffer.get(1) {
            Some(1) => Execute::DeviceSpecific,
            _ => Execute::NoDeviceSpecific,
        };
        Ok(ResetResponse { status, execute })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Execute {
    NoDeviceSpecific = 0,
    DeviceSpecific = 1,
}

#[derive(Debug)]
pub struct ResetResponse {
    pub status: Status,
    pub execute: Execute,
}
