use std::collections::BTreeMap;
use std::ops::Range;

use probelink_target::{PageInfo, SectorInfo};

use super::{FlashAlgorithm, FlashError};

/// The data to write into one flash sector.
///
/// `data` covers the whole sector. Bytes which were not added to the plan
/// hold the erased byte value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedSector {
    pub sector: SectorInfo,
    pub data: Vec<u8>,
    page_size: u32,
}

impl PlannedSector {
    pub fn address_range(&self) -> Range<u64> {
        self.sector.address_range()
    }

    /// The pages of the sector, with their data.
    pub fn pages(&self) -> impl Iterator<Item = (PageInfo, &[u8])> + '_ {
        self.data
            .chunks(self.page_size as usize)
            .enumerate()
            .map(move |(index, data)| {
                let page = PageInfo {
                    base_address: self.sector.base_address + index as u64 * u64::from(self.page_size),
                    size: data.len() as u32,
                };
                (page, data)
            })
    }
}

/// Sorted, non-overlapping sectors to program.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlashPlan {
    sectors: Vec<PlannedSector>,
}

impl FlashPlan {
    pub fn builder(algorithm: &FlashAlgorithm) -> FlashPlanBuilder<'_> {
        FlashPlanBuilder {
            algorithm,
            blocks: BTreeMap::new(),
        }
    }

    pub fn sectors(&self) -> &[PlannedSector] {
        &self.sectors
    }

    pub fn len(&self) -> usize {
        self.sectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sectors.is_empty()
    }
}

/// Collects data blocks and turns them into a [`FlashPlan`].
#[derive(Debug)]
pub struct FlashPlanBuilder<'algo> {
    algorithm: &'algo FlashAlgorithm,
    /// Data blocks keyed by their start address.
    blocks: BTreeMap<u64, Vec<u8>>,
}

impl FlashPlanBuilder<'_> {
    /// Stages `data` to be written at `address`.
    ///
    /// The data must lie inside the flash and must not overlap data added before.
    pub fn add_data(&mut self, address: u64, data: &[u8]) -> Result<&mut Self, FlashError> {
        if data.is_empty() {
            return Ok(self);
        }

        let end = address + data.len() as u64;
        let flash = &self.algorithm.flash_properties.address_range;
        if address < flash.start || end > flash.end {
            return Err(FlashError::AddressNotInFlash {
                start: address,
                end,
            });
        }

        // Only the closest blocks on either side can overlap.
        if let Some((&before, block)) = self.blocks.range(..=address).next_back() {
            if before + block.len() as u64 > address {
                return Err(FlashError::DataOverlaps { address });
            }
        }
        if let Some((&after, _)) = self.blocks.range(address..).next() {
            if after < end {
                return Err(FlashError::DataOverlaps { address: after });
            }
        }

        self.blocks.insert(address, data.to_vec());
        Ok(self)
    }

    pub fn build(&self) -> Result<FlashPlan, FlashError> {
        let properties = &self.algorithm.flash_properties;
        let mut sectors: BTreeMap<u64, PlannedSector> = BTreeMap::new();

        for (&address, data) in &self.blocks {
            let mut offset = 0;
            while offset < data.len() {
                let current = address + offset as u64;
                let info = self
                    .algorithm
                    .sector_info(current)
                    .ok_or(FlashError::AddressNotInFlash {
                        start: current,
                        end: address + data.len() as u64,
                    })?;

                let planned = sectors
                    .entry(info.base_address)
                    .or_insert_with(|| PlannedSector {
                        sector: info,
                        data: vec![properties.erased_byte_value; info.size as usize],
                        page_size: properties.page_size,
                    });

                let start = (current - info.base_address) as usize;
                let len = (info.size as usize - start).min(data.len() - offset);
                planned.data[start..start + len].copy_from_slice(&data[offset..offset + len]);
                offset += len;
            }
        }

        Ok(FlashPlan {
            sectors: sectors.into_values().collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use probelink_target::{FlashProperties, SectorDescription};

    fn algorithm() -> FlashAlgorithm {
        FlashAlgorithm {
            flash_properties: FlashProperties {
                address_range: 0x0800_0000..0x0800_1000,
                page_size: 0x100,
                erased_byte_value: 0xFF,
                sectors: vec![SectorDescription {
                    size: 0x400,
                    address: 0,
                }],
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn data_spanning_sectors_fills_gaps_with_erased_value() {
        let algo = algorithm();
        let mut builder = FlashPlan::builder(&algo);
        builder.add_data(0x0800_0800, &[7; 4]).unwrap();
        builder.add_data(0x0800_03FE, &[1, 2, 3, 4]).unwrap();
        let plan = builder.build().unwrap();

        let ranges: Vec<_> = plan.sectors().iter().map(|s| s.address_range()).collect();
        assert_eq!(
            ranges,
            vec![
                0x0800_0000..0x0800_0400,
                0x0800_0400..0x0800_0800,
                0x0800_0800..0x0800_0C00
            ]
        );

        let first = &plan.sectors()[0];
        assert_eq!(first.data[0x3FD], 0xFF);
        assert_eq!(&first.data[0x3FE..], &[1, 2]);
        assert_eq!(&plan.sectors()[1].data[..3], &[3, 4, 0xFF]);
        assert_eq!(&plan.sectors()[2].data[..5], &[7, 7, 7, 7, 0xFF]);
    }

    #[test]
    fn pages_cover_the_sector() {
        let algo = algorithm();
        let mut builder = FlashPlan::builder(&algo);
        builder.add_data(0x0800_0000, &[0; 16]).unwrap();
        let plan = builder.build().unwrap();

        let pages: Vec<_> = plan.sectors()[0].pages().map(|(page, _)| page.base_address).collect();
        assert_eq!(pages, vec![0x0800_0000, 0x0800_0100, 0x0800_0200, 0x0800_0300]);
    }

    #[test]
    fn overlapping_data_is_rejected() {
        let algo = algorithm();
        let mut builder = FlashPlan::builder(&algo);
        builder.add_data(0x0800_0010, &[0; 0x10]).unwrap();

        assert!(matches!(
            builder.add_data(0x0800_0008, &[0; 0x10]),
            Err(FlashError::DataOverlaps { address: 0x0800_0010 })
        ));
        assert!(matches!(
            builder.add_data(0x0800_001F, &[0; 2]),
            Err(FlashError::DataOverlaps { .. })
        ));
        // Adjacent blocks are fine.
        builder.add_data(0x0800_0020, &[0; 4]).unwrap();
    }

    #[test]
    fn data_outside_flash_is_rejected() {
        let algo = algorithm();
        let mut builder = FlashPlan::builder(&algo);
        assert!(matches!(
            builder.add_data(0x0800_0FFE, &[0; 4]),
            Err(FlashError::AddressNotInFlash { .. })
        ));
        assert!(matches!(
            builder.add_data(0x2000_0000, &[0; 4]),
            Err(FlashError::AddressNotInFlash { .. })
        ));
    }
}
