//! Debug port registers.

use super::Register;
use bitfield::bitfield;
use jep106::JEP106Code;

/// A debug port register.
pub trait DpRegister: Register {
    /// The DPBANKSEL value the register needs, `None` if the bank does not matter.
    const DP_BANK: Option<u8>;
}

macro_rules! raw_conversions {
    ($name:ident) => {
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
    };
}

bitfield! {
    #[derive(Clone, Default)]
    pub struct Abort(u32);
    impl Debug;
    pub _, set_orunerrclr: 4;
    pub _, set_wderrclr: 3;
    pub _, set_stkerrclr: 2;
    pub _, set_stkcmpclr: 1;
    pub _, set_dapabort: 0;
}

raw_conversions!(Abort);

impl Abort {
    /// Clears all sticky error flags, and aborts a stalled AP transaction if `dapabort` is set.
    pub fn clear_sticky(dapabort: bool) -> Self {
        let mut abort = Abort(0);
        abort.set_orunerrclr(true);
        abort.set_wderrclr(true);
        abort.set_stkerrclr(true);
        abort.set_stkcmpclr(true);
        abort.set_dapabort(dapabort);
        abort
    }
}

impl DpRegister for Abort {
    const DP_BANK: Option<u8> = None;
}

impl Register for Abort {
    const ADDRESS: u8 = 0x0;
    const NAME: &'static str = "ABORT";
}

bitfield! {
    #[derive(Clone, Default)]
    pub struct Ctrl(u32);
    impl Debug;
    pub csyspwrupack, _: 31;
    pub csyspwrupreq, set_csyspwrupreq: 30;
    pub cdbgpwrupack, _: 29;
    pub cdbgpwrupreq, set_cdbgpwrupreq: 28;
    pub cdbgrstack, _: 27;
    pub c_dbg_rst_req, set_c_dbg_rst_req: 26;
    pub u16, trn_cnt, set_trn_cnt: 23, 12;
    pub u8, mask_lane, set_mask_lane: 11, 8;
    pub w_data_err, _ : 7;
    pub read_ok, _ : 6;
    pub sticky_err, _: 5;
    pub stick_cmp, _: 4;
    pub u8, trn_mode, _: 3, 2;
    pub sticky_orun, _: 1;
    pub orun_detect, set_orun_detect: 0;
}

raw_conversions!(Ctrl);

impl DpRegister for Ctrl {
    const DP_BANK: Option<u8> = Some(0);
}

impl Register for Ctrl {
    const ADDRESS: u8 = 0x4;
    const NAME: &'static str = "CTRL/STAT";
}

bitfield! {
    #[derive(Clone, Copy, Default, PartialEq, Eq)]
    pub struct Select(u32);
    impl Debug;
    pub u8, ap_sel, set_ap_sel: 31, 24;
    pub u8, ap_bank_sel, set_ap_bank_sel: 7, 4;
    pub u8, dp_bank_sel, set_dp_bank_sel: 3, 0;
}

raw_conversions!(Select);

impl DpRegister for Select {
    const DP_BANK: Option<u8> = None;
}

impl Register for Select {
    const ADDRESS: u8 = 0x8;
    const NAME: &'static str = "SELECT";
}

bitfield! {
    #[derive(Clone)]
    pub struct DPIDR(u32);
    impl Debug;
    pub u8, revision, _: 31, 28;
    pub u8, part_no, _: 27, 20;
    pub min, _: 16;
    pub u8, version, _: 15, 12;
    pub designer, _: 11, 1;
    u8, jep_cc, _: 11, 8;
    u8, jep_id, _: 7, 1;
}

raw_conversions!(DPIDR);

impl DpRegister for DPIDR {
    const DP_BANK: Option<u8> = None;
}

impl Register for DPIDR {
    const ADDRESS: u8 = 0x0;
    const NAME: &'static str = "DPIDR";
}

/// Read buffer, returns the result of the last posted AP read.
#[derive(Debug, Clone, Copy, Default)]
pub struct RdBuff(pub u32);

raw_conversions!(RdBuff);

impl DpRegister for RdBuff {
    const DP_BANK: Option<u8> = None;
}

impl Register for RdBuff {
    const ADDRESS: u8 = 0xC;
    const NAME: &'static str = "RDBUFF";
}

#[derive(Debug, PartialEq, Eq)]
pub struct DebugPortId {
    pub revision: u8,
    pub part_no: u8,
    pub version: DebugPortVersion,
    pub min_dp_support: bool,
    pub designer: JEP106Code,
}

impl From<DPIDR> for DebugPortId {
    fn from(dpidr: DPIDR) -> DebugPortId {
        DebugPortId {
            revision: dpidr.revision(),
            part_no: dpidr.part_no(),
            version: dpidr.version().into(),
            min_dp_support: dpidr.min(),
            designer: JEP106Code::new(dpidr.jep_cc(), dpidr.jep_id()),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum DebugPortVersion {
    DPv0,
    DPv1,
    DPv2,
    Unsupported(u8),
}

impl From<u8> for DebugPortVersion {
    fn from(value: u8) -> Self {
        match value {
            0 => DebugPortVersion::DPv0,
            1 => DebugPortVersion::DPv1,
            2 => DebugPortVersion::DPv2,
            other => DebugPortVersion::Unsupported(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_dpidr_of_cortex_m4() {
        let id = DebugPortId::from(DPIDR(0x2BA0_1477));

        assert_eq!(id.version, DebugPortVersion::DPv1);
        assert_eq!(id.designer, JEP106Code::new(4, 0x3B));
        assert_eq!(id.designer.get(), Some("ARM Ltd"));
        assert_eq!(id.part_no, 0xBA);
    }

    #[test]
    fn abort_clears_all_sticky_flags() {
        assert_eq!(u32::from(Abort::clear_sticky(false)), 0b1_1110);
        assert_eq!(u32::from(Abort::clear_sticky(true)), 0b1_1111);
    }

    #[test]
    fn abort_bits_match_the_register_layout() {
        let mut abort = Abort(0);
        abort.set_dapabort(true);
        assert_eq!(u32::from(abort), 1);

        let mut abort = Abort(0);
        abort.set_stkerrclr(true);
        assert_eq!(u32::from(abort), 1 << 2);

        let mut abort = Abort(0);
        abort.set_orunerrclr(true);
        assert_eq!(u32::from(abort), 1 << 4);
    }
}
