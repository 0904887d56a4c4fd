#![allow(dead_code)]

use probelink::flashing::FlashAlgorithm;
use probelink::{FakeProbe, Session, SessionConfig};
use probelink_target::{FlashProperties, RamRegion, RawFlashAlgorithm, SectorDescription};

pub const FLASH_START: u64 = 0x0800_0000;
pub const SECTOR_SIZE: u64 = 0x400;
pub const RAM_START: u32 = 0x2000_0000;

pub fn attach(probe: &FakeProbe) -> Session {
    attach_with(probe, SessionConfig::default())
}

pub fn attach_with(probe: &FakeProbe, config: SessionConfig) -> Session {
    let _ = pretty_env_logger::try_init();
    Session::attach(Box::new(probe.clone()), config).expect("Failed to attach with 'fake' probe.")
}

/// An algorithm for 8 KiB of flash in 1 KiB sectors, loaded into the probe.
pub fn flash_algorithm(probe: &FakeProbe) -> FlashAlgorithm {
    let raw = RawFlashAlgorithm {
        name: "fake".to_owned(),
        instructions: vec![0x00, 0xBE, 0x70, 0x47].repeat(0x12),
        pc_init: Some(0x01),
        pc_uninit: Some(0x11),
        pc_program_page: 0x21,
        pc_erase_sector: 0x31,
        data_section_offset: 0x40,
        flash_properties: FlashProperties {
            address_range: FLASH_START..FLASH_START + 0x2000,
            page_size: 0x100,
            erased_byte_value: 0xFF,
            program_page_timeout: 100,
            erase_sector_timeout: 200,
            sectors: vec![SectorDescription {
                size: SECTOR_SIZE,
                address: 0,
            }],
        },
        ..Default::default()
    };

    let algorithm = FlashAlgorithm::assemble(&raw, &RamRegion::new(0x2000_0000..0x2000_4000))
        .expect("assembling the test algorithm");
    probe.load_flash_algorithm(&algorithm);
    algorithm
}

pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(7).wrapping_add(seed))
        .collect()
}
