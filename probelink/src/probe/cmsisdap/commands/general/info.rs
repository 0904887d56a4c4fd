use super::super::{ensure_capacity, CommandId, Request, SendError};

use scroll::{Pread, LE};

macro_rules! info_command {
    ($id:expr, $name:ident, $response_type:ty) => {
        #[derive(Clone, Default, Debug)]
        pub struct $name {}

        impl Request for $name {
            const COMMAND_ID: CommandId = CommandId::Info;

            type Response = $response_type;

            fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, SendError> {
                ensure_capacity(buffer, 1)?;
                buffer[0] = $id;
                Ok(1)
            }

            fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, SendError> {
                ParseFromResponse::from_response(buffer)
            }
        }
    };
}

info_command!(0x01, VendorCommand, Option<String>);
info_command!(0x02, ProductIdCommand, Option<String>);
info_command!(0x03, SerialNumberCommand, Option<String>);
info_command!(0x04, FirmwareVersionCommand, Option<String>);
info_command!(0xF0, CapabilitiesCommand, Capabilities);
info_command!(0xFE, PacketCountCommand, u8);
info_command!(0xFF, PacketSizeCommand, u16);

trait ParseFromResponse: Sized {
    fn from_response(buffer: &[u8]) -> Result<Self, SendError>;
}

impl ParseFromResponse for Option<String> {
    /// Create a String out of the received buffer.
    ///
    /// The length of the string, including the zero terminator, is in the
    /// first byte. A length of zero means the probe has no such string.
    fn from_response(buffer: &[u8]) -> Result<Self, SendError> {
        let string_len = *buffer.first().ok_or(SendError::NotEnoughData)? as usize;

        match string_len {
            0 => Ok(None),
            n => {
                let raw = buffer.get(1..1 + n).ok_or(SendError::NotEnoughData)?;
                let res = std::str::from_utf8(raw)?;
                Ok(Some(res.trim_end_matches('\0').to_owned()))
            }
        }
    }
}

macro_rules! parse_int {
    ($ty:ty) => {
        impl ParseFromResponse for $ty {
            fn from_response(buffer: &[u8]) -> Result<Self, SendError> {
                if buffer.first() != Some(&(std::mem::size_of::<$ty>() as u8)) {
                    return Err(SendError::UnexpectedAnswer);
                }
                buffer
                    .pread_with(1, LE)
                    .map_err(|_| SendError::NotEnoughData)
            }
        }
    };
}

parse_int!(u8);
parse_int!(u16);

/// The subset of DAP_Info capabilities relevant to this driver.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub swd_implemented: bool,
    pub jtag_implemented: bool,
}

impl Capabilities {
    pub fn supports(&self, protocol: crate::probe::WireProtocol) -> bool {
        match protocol {
            crate::probe::WireProtocol::Swd => self.swd_implemented,
            crate::probe::WireProtocol::Jtag => self.jtag_implemented,
        }
    }
}

impl ParseFromResponse for Capabilities {
    fn from_response(buffer: &[u8]) -> Result<Self, SendError> {
        // Only the first info byte is evaluated.
        match buffer {
            [len, info, ..] if *len > 0 => Ok(Capabilities {
                swd_implemented: info & 0x01 > 0,
                jtag_implemented: info & 0x02 > 0,
            }),
            _ => Err(SendError::UnexpectedAnswer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_packet_size() {
        let size = PacketSizeCommand {}
            .parse_response(&[2, 0x40, 0x00])
            .unwrap();
        assert_eq!(size, 64);
    }

    #[test]
    fn packet_size_with_wrong_length() {
        assert!(matches!(
            PacketSizeCommand {}.parse_response(&[1, 0x40]),
            Err(SendError::UnexpectedAnswer)
        ));
    }

    #[test]
    fn parse_firmware_version() {
        let version = FirmwareVersionCommand {}
            .parse_response(&[6, b'2', b'.', b'1', b'.', b'0', 0])
            .unwrap();
        assert_eq!(version.as_deref(), Some("2.1.0"));
    }

    #[test]
    fn parse_capabilities() {
        let caps = CapabilitiesCommand {}.parse_response(&[1, 0x01]).unwrap();
        assert!(caps.swd_implemented);
        assert!(!caps.jtag_implemented);
    }
}
