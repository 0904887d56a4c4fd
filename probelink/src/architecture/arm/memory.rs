//! Memory access through a MEM-AP.

use std::ops::Range;

use scroll::{Pread, Pwrite, LE};

use super::{
    ap::{AddressIncrement, DataSize, CSW, DRW, TAR},
    ArmCommunicationInterface, ArmError, Register,
};
use crate::memory::MemoryInterface;

/// TAR auto-increment is only guaranteed within 1 KiB.
const AUTO_INCREMENT_BOUNDARY: u64 = 0x400;

/// Index of a memory access port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MemoryAp(pub u8);

/// [`MemoryInterface`] over a MEM-AP of an [`ArmCommunicationInterface`].
///
/// All accesses are 32 bit wide. Byte accesses read, modify and write the
/// containing words.
#[derive(Debug)]
pub struct ArmMemory<'iface> {
    interface: &'iface mut ArmCommunicationInterface,
    ap: MemoryAp,
}

impl<'iface> ArmMemory<'iface> {
    pub fn new(interface: &'iface mut ArmCommunicationInterface, ap: MemoryAp) -> Self {
        Self { interface, ap }
    }

    pub fn interface(&mut self) -> &mut ArmCommunicationInterface {
        &mut *self.interface
    }

    fn set_csw(&mut self) {
        let csw: u32 = CSW::new(DataSize::U32, AddressIncrement::Single).into();
        if self.interface.cached_csw(self.ap.0) != Some(csw) {
            self.interface.write_ap(self.ap.0, CSW::ADDRESS, csw);
            self.interface.remember_csw(self.ap.0, csw);
        }
    }

    fn set_tar(&mut self, address: u64) -> Result<(), ArmError> {
        let address = u32::try_from(address).map_err(|_| ArmError::OutOfBounds(address))?;
        self.interface
            .write_ap(self.ap.0, TAR::ADDRESS, TAR(address).into());
        Ok(())
    }
}

fn check_word_access(address: u64, words: usize) -> Result<(), ArmError> {
    if address % 4 != 0 {
        return Err(ArmError::alignment_error(address, 4));
    }
    let end = address + 4 * words as u64;
    if end > 1 << 32 {
        return Err(ArmError::OutOfBounds(end));
    }
    Ok(())
}

/// Splits a word access into chunks which do not cross an auto-increment boundary.
///
/// Yields `(address, word offset, word count)`.
fn chunks(address: u64, words: usize) -> impl Iterator<Item = (u64, usize, usize)> {
    let mut offset = 0;
    std::iter::from_fn(move || {
        if offset == words {
            return None;
        }
        let chunk_address = address + 4 * offset as u64;
        let room = (AUTO_INCREMENT_BOUNDARY - chunk_address % AUTO_INCREMENT_BOUNDARY) / 4;
        let len = (room as usize).min(words - offset);
        let chunk = (chunk_address, offset, len);
        offset += len;
        Some(chunk)
    })
}

/// Calculates a 32-bit word aligned range from an address/length pair.
fn aligned_range(address: u64, len: usize) -> Range<u64> {
    let start = address - (address % 4);
    let unaligned_end = address + len as u64;
    let end = unaligned_end + (4 - (unaligned_end % 4)) % 4;
    start..end
}

impl MemoryInterface for ArmMemory<'_> {
    fn read_word_32(&mut self, address: u64) -> Result<u32, ArmError> {
        check_word_access(address, 1)?;
        self.set_csw();
        self.set_tar(address)?;
        let read = self.interface.read_ap(self.ap.0, DRW::ADDRESS);
        self.interface.flush()?;
        self.interface.take(read)
    }

    fn read_32(&mut self, address: u64, data: &mut [u32]) -> Result<(), ArmError> {
        check_word_access(address, data.len())?;

        for (chunk_address, offset, len) in chunks(address, data.len()) {
            tracing::debug!("Reading {} words at {:#010x}", len, chunk_address);
            self.set_csw();
            self.set_tar(chunk_address)?;
            self.interface
                .read_ap_block(self.ap.0, DRW::ADDRESS, &mut data[offset..offset + len])?;
        }

        Ok(())
    }

    fn read_8(&mut self, address: u64, data: &mut [u8]) -> Result<(), ArmError> {
        if data.is_empty() {
            return Ok(());
        }

        let aligned = aligned_range(address, data.len());
        let mut words = vec![0u32; ((aligned.end - aligned.start) / 4) as usize];
        self.read_32(aligned.start, &mut words)?;

        let start = (address - aligned.start) as usize;
        for (i, byte) in data.iter_mut().enumerate() {
            let index = start + i;
            *byte = words[index / 4].to_le_bytes()[index % 4];
        }

        Ok(())
    }

    /// Queues the write, it is sent with the next flush.
    fn write_word_32(&mut self, address: u64, data: u32) -> Result<(), ArmError> {
        check_word_access(address, 1)?;
        self.set_csw();
        self.set_tar(address)?;
        self.interface.write_ap(self.ap.0, DRW::ADDRESS, data);
        Ok(())
    }

    fn write_32(&mut self, address: u64, data: &[u32]) -> Result<(), ArmError> {
        check_word_access(address, data.len())?;

        for (chunk_address, offset, len) in chunks(address, data.len()) {
            tracing::debug!("Writing {} words at {:#010x}", len, chunk_address);
            self.set_csw();
            self.set_tar(chunk_address)?;
            self.interface
                .write_ap_block(self.ap.0, DRW::ADDRESS, &data[offset..offset + len])?;
        }

        Ok(())
    }

    fn write_8(&mut self, address: u64, data: &[u8]) -> Result<(), ArmError> {
        if data.is_empty() {
            return Ok(());
        }

        let aligned = aligned_range(address, data.len());
        let mut buf8 = vec![0u8; (aligned.end - aligned.start) as usize];
        let last = buf8.len() - 4;

        // Partial words at either end are read first to avoid clobbering.
        if address != aligned.start {
            let word = self.read_word_32(aligned.start)?;
            buf8.pwrite_with(word, 0, LE)
                .map_err(|_| ArmError::OutOfBounds(address))?;
        }
        if address + data.len() as u64 != aligned.end {
            let word = self.read_word_32(aligned.end - 4)?;
            buf8.pwrite_with(word, last, LE)
                .map_err(|_| ArmError::OutOfBounds(address))?;
        }

        let start = (address - aligned.start) as usize;
        buf8[start..start + data.len()].copy_from_slice(data);

        let mut words = Vec::with_capacity(buf8.len() / 4);
        for offset in (0..buf8.len()).step_by(4) {
            let word: u32 = buf8
                .pread_with(offset, LE)
                .map_err(|_| ArmError::OutOfBounds(address))?;
            words.push(word);
        }

        self.write_32(aligned.start, &words)
    }

    fn flush(&mut self) -> Result<(), ArmError> {
        self.interface.flush()
    }
}
