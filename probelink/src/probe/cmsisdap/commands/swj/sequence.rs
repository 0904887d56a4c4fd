use super::super::{ensure_capacity, CmsisDapError, CommandId, Request, SendError, Status};

/// Clocks out a raw bit sequence on SWDIO/TMS.
#[derive(Debug)]
pub struct SequenceRequest {
    bit_count: u8,
    data: [u8; 32],
}

impl SequenceRequest {
    pub fn new(data: &[u8], bit_count: usize) -> Result<SequenceRequest, CmsisDapError> {
        if bit_count > 256 || bit_count.div_ceil(8) > data.len() {
            return Err(CmsisDapError::TooMuchData);
        }

        let mut owned_data = [0u8; 32];
        let bytes = bit_count.div_ceil(8);
        owned_data[..bytes].copy_from_slice(&data[..bytes]);

        // A count of 0 encodes 256 bits.
        Ok(SequenceRequest {
            bit_count: (bit_count % 256) as u8,
            data: owned_data,
        })
    }

    /// The SWD line reset and JTAG-to-SWD switch used on attach.
    ///
    /// At least 50 cycles with SWDIO high, the 16 bit switch sequence
    /// `0xE79E`, another line reset and a few idle cycles.
    pub fn jtag_to_swd() -> Vec<SequenceRequest> {
        let line_reset = [0xffu8; 7];
        let mut requests = Vec::with_capacity(4);
        // Infallible: the sequences below all fit into one request.
        if let Ok(r) = SequenceRequest::new(&line_reset, 51) {
            requests.push(r);
        }
        if let Ok(r) = SequenceRequest::new(&0xE79Eu16.to_le_bytes(), 16) {
            requests.push(r);
        }
        if let Ok(r) = SequenceRequest::new(&line_reset, 51) {
            requests.push(r);
        }
        if let Ok(r) = SequenceRequest::new(&[0x00], 8) {
            requests.push(r);
        }
        requests
    }

    fn byte_count(&self) -> usize {
        match self.bit_count {
            0 => 32,
            n => (n as usize).div_ceil(8),
        }
    }
}

impl Request for SequenceRequest {
    const COMMAND_ID: CommandId = CommandId::SwjSequence;

    type Response = Status;

    fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, SendError> {
        let bytes = self.byte_count();
        ensure_capacity(buffer, bytes + 1)?;
        buffer[0] = self.bit_count;
        buffer[1..1 + bytes].copy_from_slice(&self.data[..bytes]);
        Ok(bytes + 1)
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, SendError> {
        Status::from_response(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn switch_sequence_layout() {
        let requests = SequenceRequest::jtag_to_swd();
        assert_eq!(requests.len(), 4);

        let mut buffer = [0u8; 64];
        let n = requests[1].to_bytes(&mut buffer).unwrap();
        assert_eq!(&buffer[..n], &[16, 0x9E, 0xE7]);

        let n = requests[0].to_bytes(&mut buffer).unwrap();
        assert_eq!(n, 8);
        assert_eq!(buffer[0], 51);
    }

    #[test]
    fn rejects_oversized_sequence() {
        assert!(matches!(
            SequenceRequest::new(&[0u8; 40], 300),
            Err(CmsisDapError::TooMuchData)
        ));
    }
}
