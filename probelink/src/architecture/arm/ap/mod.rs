//! Access port registers, limited to what a MEM-AP needs.

use super::Register;
use bitfield::bitfield;
use jep106::JEP106Code;

/// A register of an access port.
pub trait ApRegister: Register {}

macro_rules! ap_register {
    ($name:ident, $address:expr, $display:expr) => {
        impl From<u32> for $name {
            fn from(raw: u32) -> Self {
                $name(raw)
            }
        }

        impl From<$name> for u32 {
            fn from(raw: $name) -> Self {
                raw.0
            }
        }

        impl Register for $name {
            const ADDRESS: u8 = $address;
            const NAME: &'static str = $display;
        }

        impl ApRegister for $name {}
    };
}

/// Size of a single MEM-AP access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSize {
    U8 = 0b000,
    U16 = 0b001,
    U32 = 0b010,
}

/// TAR auto-increment mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressIncrement {
    Off = 0b00,
    Single = 0b01,
    Packed = 0b10,
}

bitfield! {
    /// Control and status word, configures accesses through the MEM-AP.
    #[derive(Clone, Copy, Default, PartialEq, Eq)]
    pub struct CSW(u32);
    impl Debug;
    pub dbg_sw_enable, set_dbg_sw_enable: 31;
    pub u8, prot, set_prot: 30, 28;
    pub u8, cache, set_cache: 27, 24;
    pub spiden, _: 23;
    pub u8, mode, set_mode: 11, 8;
    pub tr_in_prog, _: 7;
    pub device_en, _: 6;
    pub u8, addr_inc, set_addr_inc: 5, 4;
    pub u8, size, set_size: 2, 0;
}

ap_register!(CSW, 0x00, "CSW");

impl CSW {
    /// Debug software access with the given size and auto-increment.
    pub fn new(size: DataSize, increment: AddressIncrement) -> Self {
        let mut csw = CSW(0);
        csw.set_dbg_sw_enable(true);
        // Privileged data access.
        csw.set_prot(0b010);
        csw.set_addr_inc(increment as u8);
        csw.set_size(size as u8);
        csw
    }
}

/// Transfer address register.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TAR(pub u32);

ap_register!(TAR, 0x04, "TAR");

/// Data read/write register, accesses memory at TAR.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DRW(pub u32);

ap_register!(DRW, 0x0C, "DRW");

bitfield! {
    /// Identification register.
    #[derive(Clone, Copy, Default)]
    pub struct IDR(u32);
    impl Debug;
    pub u8, revision, _: 31, 28;
    u8, jep_cc, _: 27, 24;
    u8, jep_id, _: 23, 17;
    pub u8, class, _: 16, 13;
    pub u8, variant, _: 7, 4;
    pub u8, ap_type, _: 3, 0;
}

ap_register!(IDR, 0xFC, "IDR");

impl IDR {
    pub fn designer(&self) -> JEP106Code {
        JEP106Code::new(self.jep_cc(), self.jep_id())
    }

    /// Whether this AP is a memory access port.
    pub fn is_memory_ap(&self) -> bool {
        self.class() == 0b1000
    }
}
