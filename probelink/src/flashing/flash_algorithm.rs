use super::FlashError;
use probelink_target::{FlashProperties, RamRegion, RawFlashAlgorithm, SectorInfo};
use std::mem::{size_of, size_of_val};

/// A flash algorithm, which has been assembled for a specific
/// RAM region.
///
/// To create a [FlashAlgorithm], call [`FlashAlgorithm::assemble`].
#[derive(Debug, Default, Clone)]
pub struct FlashAlgorithm {
    /// The name of the flash algorithm.
    pub name: String,
    /// Memory address where the flash algo instructions will be loaded to.
    pub load_address: u64,
    /// List of 32-bit words containing the header and the position-independent code for the algo.
    pub instructions: Vec<u32>,
    /// Address of the `Init()` entry point. Optional.
    pub pc_init: Option<u64>,
    /// Address of the `UnInit()` entry point. Optional.
    pub pc_uninit: Option<u64>,
    /// Address of the `ProgramPage()` entry point.
    pub pc_program_page: u64,
    /// Address of the `EraseSector()` entry point.
    pub pc_erase_sector: u64,
    /// Initial value of the R9 register for calling flash algo entry points, which
    /// determines where the position-independent data resides.
    pub static_base: u64,
    /// Initial value of the stack pointer when calling any flash algo API.
    pub begin_stack: u64,
    /// Base addresses of the page buffers. Two buffers are laid out when
    /// they fit into the RAM region.
    pub page_buffers: Vec<u64>,
    /// The properties of the flash on the device, with the page size used
    /// for programming.
    pub flash_properties: FlashProperties,
}

impl FlashAlgorithm {
    const FLASH_ALGO_MIN_STACK_SIZE: u32 = 512;

    /// Returning from an entry point into this header executes `BKPT`, which halts the core.
    const ARM_FLASH_BLOB_HEADER: [u32; 8] = [
        0xE00A_BE00,
        0x062D_780D,
        0x2408_4068,
        0xD300_0040,
        0x1E64_4058,
        0x1C49_D1FA,
        0x2A00_1E52,
        0x0477_0D1F,
    ];

    /// Try to retrieve the information about the flash sector
    /// which contains `address`.
    pub fn sector_info(&self, address: u64) -> Option<SectorInfo> {
        self.flash_properties.sector_info(address)
    }

    /// Iterate over all the sectors of the flash.
    pub fn iter_sectors(&self) -> impl Iterator<Item = SectorInfo> + '_ {
        let props = &self.flash_properties;

        let mut addr = props.address_range.start;
        std::iter::from_fn(move || {
            let sector = props.sector_info(addr)?;
            addr = sector.base_address + sector.size;
            Some(sector)
        })
    }

    fn page_size(properties: &FlashProperties) -> Result<u32, FlashError> {
        let min_sector_size = properties.min_sector_size().ok_or(FlashError::NoSectors)?;

        // Some algorithms report their phrase size instead of a page size.
        let mut page_size = u64::from(properties.page_size);
        if page_size <= 32 {
            page_size = min_sector_size;
        }
        if page_size > min_sector_size {
            tracing::warn!(
                "Page size ({}) is larger than the smallest sector size ({}), reducing it",
                page_size,
                min_sector_size
            );
            page_size = min_sector_size;
        }

        let page_size = u32::try_from(page_size).map_err(|_| FlashError::InvalidPageSize {
            size: properties.page_size,
        })?;
        if page_size % 4 != 0 {
            return Err(FlashError::InvalidPageSize { size: page_size });
        }

        Ok(page_size)
    }

    /// Constructs a complete flash algorithm, tailored to the flash and RAM sizes given.
    ///
    /// Memory layout, from the load address upwards:
    /// header, code, stack, page buffer(s).
    pub fn assemble(raw: &RawFlashAlgorithm, ram_region: &RamRegion) -> Result<Self, FlashError> {
        let page_size = Self::page_size(&raw.flash_properties)?;

        let assembled_instructions = raw.instructions.chunks(size_of::<u32>()).map(|bytes| {
            let mut word = [0u8; 4];
            word[..bytes.len()].copy_from_slice(bytes);
            u32::from_le_bytes(word)
        });

        let header = &Self::ARM_FLASH_BLOB_HEADER;
        let instructions: Vec<u32> = header
            .iter()
            .copied()
            .chain(assembled_instructions)
            .collect();

        let header_size = size_of_val(header) as u64;

        // The start address where we try to load the flash algorithm.
        let addr_load = match raw.load_address {
            Some(address) => address
                .checked_sub(header_size)
                .ok_or(FlashError::InvalidLoadAddress { address })?,
            None => ram_region.range.start,
        };

        if addr_load < ram_region.range.start || addr_load >= ram_region.range.end {
            return Err(FlashError::InvalidLoadAddress { address: addr_load });
        }

        let code_start = addr_load + header_size;
        let code_end = addr_load + (instructions.len() * size_of::<u32>()) as u64;

        let stack_size = u64::from(
            raw.stack_size
                .unwrap_or(Self::FLASH_ALGO_MIN_STACK_SIZE)
                .max(Self::FLASH_ALGO_MIN_STACK_SIZE),
        );

        // The stack pointer has to be 8 byte aligned.
        let stack_top = (code_end + stack_size + 7) & !7;

        let buffer_size = u64::from(page_size);
        let required = stack_top + buffer_size - addr_load;
        if stack_top + buffer_size > ram_region.range.end {
            return Err(FlashError::NotEnoughRam {
                required,
                available: ram_region.range.end - addr_load,
            });
        }

        let page_buffers = if stack_top + 2 * buffer_size <= ram_region.range.end {
            vec![stack_top, stack_top + buffer_size]
        } else {
            vec![stack_top]
        };

        tracing::debug!(
            "Flash algorithm '{}': load {:#010x}, stack top {:#010x}, page buffers {:#010x?}",
            raw.name,
            addr_load,
            stack_top,
            page_buffers
        );

        let mut flash_properties = raw.flash_properties.clone();
        flash_properties.page_size = page_size;

        Ok(FlashAlgorithm {
            name: raw.name.clone(),
            load_address: addr_load,
            instructions,
            pc_init: raw.pc_init.map(|v| code_start + v),
            pc_uninit: raw.pc_uninit.map(|v| code_start + v),
            pc_program_page: code_start + raw.pc_program_page,
            pc_erase_sector: code_start + raw.pc_erase_sector,
            static_base: code_start + raw.data_section_offset,
            begin_stack: stack_top,
            page_buffers,
            flash_properties,
        })
    }
}

#[cfg(test)]
mod test {
    use probelink_target::{FlashProperties, RamRegion, RawFlashAlgorithm, SectorDescription, SectorInfo};
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    use crate::flashing::{FlashAlgorithm, FlashError};

    fn raw(page_size: u32, sectors: Vec<SectorDescription>) -> RawFlashAlgorithm {
        RawFlashAlgorithm {
            name: "test".to_string(),
            instructions: vec![0x70, 0x47, 0x00, 0xBF, 0x70, 0x47],
            pc_init: Some(0),
            pc_uninit: Some(0),
            pc_program_page: 0,
            pc_erase_sector: 0,
            data_section_offset: 4,
            flash_properties: FlashProperties {
                address_range: 0x0800_0000..0x0801_0000,
                page_size,
                sectors,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn sectors(size: u64) -> Vec<SectorDescription> {
        vec![SectorDescription { size, address: 0 }]
    }

    #[test]
    fn layout() {
        let ram = RamRegion::new(0x2000_0000..0x2000_4000);
        let algo = FlashAlgorithm::assemble(&raw(0x400, sectors(0x1000)), &ram).unwrap();

        assert_eq!(algo.load_address, 0x2000_0000);
        // 8 header words followed by the padded code.
        assert_eq!(algo.instructions.len(), 10);
        assert_eq!(algo.instructions[0], 0xE00A_BE00);
        assert_eq!(algo.instructions[8], 0xBF00_4770);
        assert_eq!(algo.instructions[9], 0x0000_4770);
        assert_eq!(algo.pc_init, Some(0x2000_0020));
        assert_eq!(algo.static_base, 0x2000_0024);
        // code end 0x2000_0028 + 512 bytes of stack
        assert_eq!(algo.begin_stack, 0x2000_0228);
        assert_eq!(algo.page_buffers, vec![0x2000_0228, 0x2000_0628]);
    }

    #[test]
    fn single_page_buffer_when_ram_is_tight() {
        let ram = RamRegion::new(0x2000_0000..0x2000_0700);
        let algo = FlashAlgorithm::assemble(&raw(0x400, sectors(0x1000)), &ram).unwrap();
        assert_eq!(algo.page_buffers, vec![0x2000_0228]);
    }

    #[test]
    fn not_enough_ram() {
        let ram = RamRegion::new(0x2000_0000..0x2000_0400);
        assert!(matches!(
            FlashAlgorithm::assemble(&raw(0x400, sectors(0x1000)), &ram),
            Err(FlashError::NotEnoughRam { .. })
        ));
    }

    #[test_case(16, 0x800; "tiny page is replaced by the sector size")]
    #[test_case(0x2000, 0x800; "page larger than a sector is clamped")]
    #[test_case(0x100, 0x100; "regular page is kept")]
    fn page_size_rules(page_size: u32, expected: u32) {
        let ram = RamRegion::new(0x2000_0000..0x2000_8000);
        let algo = FlashAlgorithm::assemble(&raw(page_size, sectors(0x800)), &ram).unwrap();
        assert_eq!(algo.flash_properties.page_size, expected);
    }

    #[test]
    fn page_size_must_be_word_multiple() {
        let ram = RamRegion::new(0x2000_0000..0x2000_8000);
        assert!(matches!(
            FlashAlgorithm::assemble(&raw(0x102, sectors(0x800)), &ram),
            Err(FlashError::InvalidPageSize { size: 0x102 })
        ));
    }

    #[test]
    fn pinned_load_address() {
        let ram = RamRegion::new(0x2000_0000..0x2000_8000);
        let mut raw = raw(0x400, sectors(0x1000));
        raw.load_address = Some(0x2000_1020);

        let algo = FlashAlgorithm::assemble(&raw, &ram).unwrap();
        assert_eq!(algo.load_address, 0x2000_1000);
        assert_eq!(algo.pc_program_page, 0x2000_1020);

        raw.load_address = Some(0x1000_0000);
        assert!(matches!(
            FlashAlgorithm::assemble(&raw, &ram),
            Err(FlashError::InvalidLoadAddress { .. })
        ));
    }

    #[test]
    fn flash_sector_multiple_sizes_iter() {
        let config = FlashAlgorithm {
            flash_properties: FlashProperties {
                sectors: vec![
                    SectorDescription {
                        size: 0x4000,
                        address: 0x0,
                    },
                    SectorDescription {
                        size: 0x1_0000,
                        address: 0x1_0000,
                    },
                ],
                address_range: 0x800_0000..0x800_0000 + 0x3_0000,
                page_size: 0x10,
                ..Default::default()
            },
            ..Default::default()
        };

        let got: Vec<SectorInfo> = config.iter_sectors().collect();
        let bases: Vec<u64> = got.iter().map(|s| s.base_address).collect();

        assert_eq!(
            bases,
            vec![0x800_0000, 0x800_4000, 0x800_8000, 0x800_c000, 0x801_0000, 0x802_0000]
        );
        assert_eq!(got[4].size, 0x1_0000);
    }
}
