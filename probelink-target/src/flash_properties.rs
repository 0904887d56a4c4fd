use super::memory::{SectorDescription, SectorInfo};
use crate::serialize::{hex_range, hex_u_int};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Properties of flash memory, which
/// are used when programming Flash memory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct FlashProperties {
    /// The range of the device flash.
    #[serde(serialize_with = "hex_range")]
    pub address_range: Range<u64>,
    /// The page size of the device flash.
    #[serde(serialize_with = "hex_u_int")]
    pub page_size: u32,
    /// The value of a byte in flash that was just erased.
    #[serde(serialize_with = "hex_u_int")]
    pub erased_byte_value: u8,
    /// The approximative time it takes to program a page, in milliseconds.
    pub program_page_timeout: u32,
    /// The approximative time it takes to erase a sector, in milliseconds.
    pub erase_sector_timeout: u32,
    /// The available sectors of the device flash.
    #[serde(default)]
    pub sectors: Vec<SectorDescription>,
}

impl Default for FlashProperties {
    fn default() -> Self {
        FlashProperties {
            address_range: 0..0,
            page_size: 0,
            erased_byte_value: 0xff,
            program_page_timeout: 0,
            erase_sector_timeout: 0,
            sectors: vec![],
        }
    }
}

impl FlashProperties {
    /// The smallest sector size of the flash, if any sectors are described.
    pub fn min_sector_size(&self) -> Option<u64> {
        self.sectors.iter().map(|s| s.size).min()
    }

    /// Try to retrieve the information about the flash sector
    /// which contains `address`.
    ///
    /// If the `address` is not part of the flash, None will
    /// be returned.
    pub fn sector_info(&self, address: u64) -> Option<SectorInfo> {
        if !self.address_range.contains(&address) {
            return None;
        }

        let offset_address = address - self.address_range.start;

        let containing_sector = self
            .sectors
            .iter()
            .rfind(|s| s.address <= offset_address)?;

        if containing_sector.size == 0 {
            return None;
        }

        let sector_index = (offset_address - containing_sector.address) / containing_sector.size;

        let base_address =
            self.address_range.start + containing_sector.address + sector_index * containing_sector.size;

        // The last sector may be cut short by the end of the flash.
        let size = containing_sector
            .size
            .min(self.address_range.end - base_address);

        Some(SectorInfo { base_address, size })
    }
}

#[cfg(test)]
mod test {
    use super::FlashProperties;
    use crate::{SectorDescription, SectorInfo};
    use pretty_assertions::assert_eq;

    fn mixed() -> FlashProperties {
        FlashProperties {
            address_range: 0x800_0000..0x800_0000 + 0x1_0000,
            page_size: 0x100,
            sectors: vec![
                SectorDescription {
                    size: 0x1000,
                    address: 0x0,
                },
                SectorDescription {
                    size: 0x4000,
                    address: 0x4000,
                },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn sector_lookup_across_descriptions() {
        let props = mixed();

        assert_eq!(props.sector_info(0x7ff_ffff), None);
        assert_eq!(
            props.sector_info(0x800_1234),
            Some(SectorInfo {
                base_address: 0x800_1000,
                size: 0x1000
            })
        );
        assert_eq!(
            props.sector_info(0x800_9000),
            Some(SectorInfo {
                base_address: 0x800_8000,
                size: 0x4000
            })
        );
        assert_eq!(props.sector_info(0x801_0000), None);
    }

    #[test]
    fn min_sector_size() {
        assert_eq!(mixed().min_sector_size(), Some(0x1000));
        assert_eq!(FlashProperties::default().min_sector_size(), None);
    }
}
