//! System control space registers used for Cortex-M debugging.

use bitfield::bitfield;

use crate::core::{HaltReason, MemoryMappedRegister, WatchpointKind};
use crate::error::Error;

macro_rules! memory_mapped_register {
    ($reg:ident, $address:expr, $name:expr) => {
        impl From<u32> for $reg {
            fn from(value: u32) -> Self {
                Self(value)
            }
        }

        impl From<$reg> for u32 {
            fn from(value: $reg) -> Self {
                value.0
            }
        }

        impl MemoryMappedRegister for $reg {
            const ADDRESS: u64 = $address;
            const NAME: &'static str = $name;
        }
    };
}

bitfield! {
    /// Debug Halting Control and Status Register, DHCSR (see armv7-M Architecture Reference Manual C1.6.2)
    #[derive(Copy, Clone)]
    pub struct Dhcsr(u32);
    impl Debug;
    /// Set to 1 when the core has been reset since the last read. Cleared on read.
    pub s_reset_st, _: 25;
    pub s_retire_st, _: 24;
    pub s_lockup, _: 19;
    pub s_sleep, _: 18;
    pub s_halt, _: 17;
    pub s_regrdy, _: 16;
    pub c_maskints, set_c_maskints: 3;
    pub c_step, set_c_step: 2;
    pub c_halt, set_c_halt: 1;
    pub c_debugen, set_c_debugen: 0;
}

impl Dhcsr {
    /// This function sets the bit to enable writes to this register.
    ///
    /// Debug key:
    /// Software must write 0xA05F to this field to enable write accesses to bits
    /// [15:0], otherwise the processor ignores the write access.
    pub fn enable_write(&mut self) {
        self.0 &= !(0xffff << 16);
        self.0 |= 0xa05f << 16;
    }

    /// A writable value with debugging enabled and the given control bits.
    pub fn control(halt: bool, step: bool, maskints: bool) -> Self {
        let mut value = Dhcsr(0);
        value.enable_write();
        value.set_c_debugen(true);
        value.set_c_halt(halt);
        value.set_c_step(step);
        value.set_c_maskints(maskints);
        value
    }
}

memory_mapped_register!(Dhcsr, 0xE000_EDF0, "DHCSR");

bitfield! {
    /// Debug Core Register Selector Register, DCRSR
    #[derive(Copy, Clone)]
    pub struct Dcrsr(u32);
    impl Debug;
    pub _, set_regwnr: 16;
    pub _, set_regsel: 4,0;
}

memory_mapped_register!(Dcrsr, 0xE000_EDF4, "DCRSR");

#[derive(Debug, Copy, Clone)]
pub struct Dcrdr(pub u32);

memory_mapped_register!(Dcrdr, 0xE000_EDF8, "DCRDR");

bitfield! {
    /// Debug Exception and Monitor Control Register, DEMCR (see armv7-M Architecture Reference Manual C1.6.5)
    #[derive(Copy, Clone)]
    pub struct Demcr(u32);
    impl Debug;
    /// Global enable for DWT and ITM features
    pub trcena, set_trcena: 24;
    /// Enable halting debug trap on a HardFault exception
    pub vc_harderr, set_vc_harderr: 10;
    /// Enable Reset Vector Catch
    pub vc_corereset, set_vc_corereset: 0;
}

memory_mapped_register!(Demcr, 0xE000_EDFC, "DEMCR");

bitfield! {
    /// Application Interrupt and Reset Control Register, AIRCR (see armv7-M Architecture Reference Manual B3.2.6)
    ///
    /// [`Aircr::vectkey`] must be called before this register can effectively be written!
    #[derive(Copy, Clone)]
    pub struct Aircr(u32);
    impl Debug;
    get_vectkeystat, set_vectkey: 31,16;
    pub endianness, set_endianness: 15;
    /// System Reset Request. The system components that are reset by this
    /// request are IMPLEMENTATION DEFINED.
    pub sysresetreq, set_sysresetreq: 2;
    pub vectclractive, set_vectclractive: 1;
    /// Local reset of the core. Self-clearing, write only.
    pub vectreset, set_vectreset: 0;
}

impl Aircr {
    /// Must be called before writing the register.
    pub fn vectkey(&mut self) {
        self.set_vectkey(0x05FA);
    }

    /// Verifies that the vector key is correct (see [`Aircr::vectkey`])
    pub fn vectkeystat(&self) -> bool {
        self.get_vectkeystat() == 0xFA05
    }
}

memory_mapped_register!(Aircr, 0xE000_ED0C, "AIRCR");

bitfield! {
    /// Debug Fault Status Register, DFSR. Bits are cleared by writing 1.
    #[derive(Copy, Clone)]
    pub struct Dfsr(u32);
    impl Debug;
    pub external, set_external: 4;
    pub vcatch, set_vcatch: 3;
    pub dwttrap, set_dwttrap: 2;
    pub bkpt, set_bkpt: 1;
    pub halted, set_halted: 0;
}

impl Dfsr {
    pub fn clear_all() -> Self {
        Dfsr(0b11111)
    }

    /// The reason of the last halt. `HALTED` is reported for both halt
    /// requests and completed steps, the caller tells them apart.
    pub fn halt_reason(&self) -> HaltReason {
        if self.0 == 0 {
            HaltReason::Unknown
        } else if self.0.count_ones() > 1 {
            HaltReason::Multiple
        } else if self.bkpt() {
            HaltReason::Breakpoint
        } else if self.external() {
            HaltReason::External
        } else if self.dwttrap() {
            HaltReason::Watchpoint
        } else if self.halted() {
            HaltReason::Request
        } else {
            HaltReason::VectorCatch
        }
    }
}

impl From<u32> for Dfsr {
    fn from(val: u32) -> Self {
        // Unused bits are masked so count_ones() only sees reason bits.
        Dfsr(val & 0b11111)
    }
}

impl From<Dfsr> for u32 {
    fn from(register: Dfsr) -> Self {
        register.0
    }
}

impl MemoryMappedRegister for Dfsr {
    const ADDRESS: u64 = 0xE000_ED30;
    const NAME: &'static str = "DFSR";
}

bitfield! {
    /// Flash Patch Control Register, FP_CTRL (see armv7-M Architecture Reference Manual C1.11.3)
    #[derive(Copy,Clone)]
    pub struct FpCtrl(u32);
    impl Debug;
    /// Flash Patch breakpoint architecture revision:
    ///
    /// `0b0000` Flash Patch breakpoint version 1.\
    /// `0b0001` Flash Patch breakpoint version 2. Supports breakpoints on any location in the 4GB address range.
    pub rev, _: 31, 28;
    num_code_1, _: 14, 12;
    pub num_lit, _: 11, 8;
    num_code_0, _: 7, 4;
    /// Writes are ignored unless this bit is `1`.
    pub _, set_key: 1;
    pub enable, set_enable: 0;
}

impl FpCtrl {
    /// The number of instruction address comparators.
    pub fn num_code(&self) -> u32 {
        (self.num_code_1() << 4) | self.num_code_0()
    }

    /// A writable value which enables or disables the unit.
    pub fn enabled(enable: bool) -> Self {
        let mut value = FpCtrl(0);
        value.set_key(true);
        value.set_enable(enable);
        value
    }
}

memory_mapped_register!(FpCtrl, 0xE000_2000, "FP_CTRL");

/// Address of the comparator register with the given index.
pub fn fp_comp_address(index: usize) -> u64 {
    FpRev1CompX::ADDRESS + 4 * index as u64
}

bitfield! {
    /// Flash Patch Comparator register, FP_COMPn, revision 1 layout.
    #[derive(Copy,Clone)]
    pub struct FpRev1CompX(u32);
    impl Debug;
    /// `01`: Breakpoint on the lower halfword, `10`: on the upper halfword.
    pub replace, set_replace: 31, 30;
    /// Bits[28:2] of the address. Bits[31:29] are zero.
    pub comp, set_comp: 28, 2;
    pub enable, set_enable: 0;
}

memory_mapped_register!(FpRev1CompX, 0xE000_2008, "FP_COMP");

impl FpRev1CompX {
    /// The register value which enables a hardware breakpoint at the given address.
    pub fn breakpoint_configuration(address: u32) -> Result<Self, Error> {
        let mut reg = FpRev1CompX::from(0);

        // Only the code region is reachable by a revision 1 comparator.
        if address >= 0x2000_0000 {
            return Err(Error::UnsupportedBreakpointAddress(address.into()));
        }

        let comp_val = (address & 0x1f_ff_ff_fc) >> 2;

        let replace_val = if (address & 0x3) == 0 {
            0b01 // lower half word
        } else {
            0b10 // upper half word
        };

        reg.set_replace(replace_val);
        reg.set_comp(comp_val);
        reg.set_enable(true);

        Ok(reg)
    }
}

bitfield! {
    /// FP_COMPn for FPB revision 2.
    #[derive(Copy,Clone)]
    pub struct FpRev2CompX(u32);
    impl Debug;
    /// Bits[31:1] of the breakpoint instruction address.
    pub bpaddr, set_bpaddr: 31, 1;
    pub enable, set_enable: 0;
}

memory_mapped_register!(FpRev2CompX, 0xE000_2008, "FP_COMP");

impl FpRev2CompX {
    pub fn breakpoint_configuration(address: u32) -> Self {
        let mut reg = FpRev2CompX::from(0);

        reg.set_bpaddr(address >> 1);
        reg.set_enable(true);

        reg
    }
}

bitfield! {
    /// DWT Control Register, DWT_CTRL
    #[derive(Copy, Clone)]
    pub struct DwtCtrl(u32);
    impl Debug;
    /// Number of comparators implemented.
    pub numcomp, _: 31, 28;
    pub cyccntena, set_cyccntena: 0;
}

memory_mapped_register!(DwtCtrl, 0xE000_1000, "DWT_CTRL");

#[derive(Debug, Copy, Clone)]
pub struct DwtComp(pub u32);

memory_mapped_register!(DwtComp, 0xE000_1020, "DWT_COMP");

bitfield! {
    /// DWT Mask Register. The comparison ignores the low `mask` address bits.
    #[derive(Copy, Clone)]
    pub struct DwtMask(u32);
    impl Debug;
    pub mask, set_mask: 4, 0;
}

memory_mapped_register!(DwtMask, 0xE000_1024, "DWT_MASK");

bitfield! {
    #[derive(Copy, Clone)]
    pub struct DwtFunction(u32);
    impl Debug;
    pub matched, _: 24;
    pub datavsize, set_datavsize: 11, 10;
    pub function, set_function: 3, 0;
}

memory_mapped_register!(DwtFunction, 0xE000_1028, "DWT_FUNCTION");

impl DwtFunction {
    pub fn watchpoint(kind: WatchpointKind) -> Self {
        let mut value = DwtFunction(0);
        value.set_function(match kind {
            WatchpointKind::Read => 0b0101,
            WatchpointKind::Write => 0b0110,
            WatchpointKind::Access => 0b0111,
        });
        value
    }
}

/// Address of a DWT register of the comparator with the given index.
pub fn dwt_address<R: MemoryMappedRegister>(index: usize) -> u64 {
    R::ADDRESS + 0x10 * index as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test]
    fn breakpoint_register_value() {
        // See ARMv7 Architecture Reference Manual, Section C1.11.5
        let reg = FpRev1CompX::breakpoint_configuration(0x0800_09A4).unwrap();
        assert_eq!(u32::from(reg), 0x4800_09A5);

        let upper = FpRev1CompX::breakpoint_configuration(0x0800_09A6).unwrap();
        assert_eq!(upper.replace(), 0b10);
    }

    #[test]
    fn unsupported_breakpoint_address() {
        assert!(matches!(
            FpRev1CompX::breakpoint_configuration(0x2000_0000),
            Err(Error::UnsupportedBreakpointAddress(0x2000_0000))
        ));
    }

    #[test]
    fn revision_2_breakpoints_cover_all_addresses() {
        let reg = FpRev2CompX::breakpoint_configuration(0x2000_0102);
        assert_eq!(u32::from(reg), 0x2000_0103);
    }

    #[test_case(0b00001, HaltReason::Request; "request")]
    #[test_case(0b00010, HaltReason::Breakpoint; "breakpoint")]
    #[test_case(0b00100, HaltReason::Watchpoint; "watchpoint")]
    #[test_case(0b01000, HaltReason::VectorCatch; "vector catch")]
    #[test_case(0b10000, HaltReason::External; "external")]
    #[test_case(0b00011, HaltReason::Multiple; "multiple")]
    #[test_case(0, HaltReason::Unknown; "none")]
    fn halt_reasons(value: u32, reason: HaltReason) {
        assert_eq!(Dfsr::from(value).halt_reason(), reason);
    }

    #[test]
    fn control_values_carry_the_debug_key() {
        assert_eq!(u32::from(Dhcsr::control(true, false, false)), 0xA05F_0003);
        assert_eq!(u32::from(Dhcsr::control(false, true, true)), 0xA05F_000D);
    }

    #[test]
    fn fpb_comparator_count() {
        // NUM_CODE[6:4] in bits 14:12, NUM_CODE[3:0] in bits 7:4
        assert_eq!(FpCtrl(0x1000_1060).num_code(), 0x16);
        assert_eq!(FpCtrl(0x0000_0260).num_code(), 6);
    }

    #[test]
    fn dwt_comparator_registers_are_strided() {
        assert_eq!(dwt_address::<DwtFunction>(2), 0xE000_1048);
        assert_eq!(fp_comp_address(3), 0xE000_2014);
        assert_eq!(u32::from(DwtFunction::watchpoint(WatchpointKind::Write)), 6);
    }
}
