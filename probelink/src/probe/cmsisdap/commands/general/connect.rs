use super::super::{ensure_capacity, CommandId, Request, SendError};
use crate::probe::WireProtocol;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectRequest {
    UseDefaultPort = 0x00,
    UseSwd = 0x01,
    UseJtag = 0x02,
}

impl From<WireProtocol> for ConnectRequest {
    fn from(protocol: WireProtocol) -> Self {
        match protocol {
            WireProtocol::Swd => ConnectRequest::UseSwd,
            WireProtocol::Jtag => ConnectRequest::UseJtag,
        }
    }
}

impl Request for ConnectRequest {
    const COMMAND_ID: CommandId = CommandId::Connect;

    type Response = ConnectResponse;

    fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, SendError> {
        ensure_capacity(buffer, 1)?;
        buffer[0] = *self as u8;
        Ok(1)
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, SendError> {
        match buffer.first().ok_or(SendError::NotEnoughData)? {
            0 => Ok(ConnectResponse::InitFailed),
            1 => Ok(ConnectResponse::SuccessfulInitForSwd),
            2 => Ok(ConnectResponse::SuccessfulInitForJtag),
            &other => Err(SendError::ConnectResponseError(other)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectResponse {
    InitFailed = 0x00,
    SuccessfulInitForSwd = 0x01,
    SuccessfulInitForJtag = 0x02,
}

impl ConnectResponse {
    /// Whether the probe connected with the requested protocol.
    pub fn matches(self, protocol: WireProtocol) -> bool {
        matches!(
            (self, protocol),
            (ConnectResponse::SuccessfulInitForSwd, WireProtocol::Swd)
                | (ConnectResponse::SuccessfulInitForJtag, WireProtocol::Jtag)
        )
    }
}
