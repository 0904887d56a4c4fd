#![allow(missing_docs)] // Don't require docs for test code
//! An emulated CMSIS-DAP probe with a Cortex-M target behind it.
//!
//! The probe answers the CMSIS-DAP commands the engine sends, runs DP and
//! MEM-AP transfers against an emulated bus (RAM, flash and the debug
//! registers of the core) and executes the routines of a flash algorithm
//! when the core is resumed at one of their entry points.
use std::{
    collections::{HashMap, VecDeque},
    fmt,
    ops::Range,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use probelink_target::FlashProperties;

use crate::{
    architecture::arm::PortType,
    flashing::FlashAlgorithm,
    probe::{Transport, TransportError},
};

const DPIDR: u32 = 0x2BA0_1477;
const AHB_AP_IDR: u32 = 0x2477_0011;

const ACK_OK: u8 = 1;
const ACK_WAIT: u8 = 2;
const ACK_FAULT: u8 = 4;
const ACK_NO_ACK: u8 = 7;
const PROTOCOL_ERROR: u8 = 0x08;

const DHCSR: u32 = 0xE000_EDF0;
const DCRSR: u32 = 0xE000_EDF4;
const DCRDR: u32 = 0xE000_EDF8;
const DEMCR: u32 = 0xE000_EDFC;
const AIRCR: u32 = 0xE000_ED0C;
const DFSR: u32 = 0xE000_ED30;
const FP_CTRL: u32 = 0xE000_2000;
const FP_COMP0: u32 = 0xE000_2008;
const DWT_CTRL: u32 = 0xE000_1000;
const DWT_COMP0: u32 = 0xE000_1020;

const DFSR_HALTED: u32 = 1 << 0;
const DFSR_BKPT: u32 = 1 << 1;
const DFSR_VCATCH: u32 = 1 << 3;

const REGISTER_COUNT: usize = 0x13;
const PC: usize = 15;
const LR: usize = 14;
const RESET_PC: u32 = 0x0800_0100;

/// What the emulated target answers to the next transfer attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Injected {
    /// Execute the transfer normally.
    Ok,
    Wait,
    Fault,
    NoAck,
    /// Report an SWD protocol error.
    ProtocolError,
}

/// The entry points of a flash algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Routine {
    Init,
    UnInit,
    EraseSector,
    ProgramPage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutineBehavior {
    /// Return this value without touching the flash.
    Return(u32),
    /// Never return, the core keeps running until it is halted.
    Hang,
}

/// A call of a flash algorithm routine, with R0-R2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutineCall {
    pub routine: Routine,
    pub args: [u32; 3],
}

/// A transfer executed by the emulated debug port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoggedTransfer {
    pub port: PortType,
    /// A[3:2] of the register, AP registers include the bank in bits 7:4.
    pub address: u8,
    /// The value written, `None` for reads.
    pub write: Option<u32>,
}

#[derive(Debug, Clone, Copy)]
struct Override {
    routine: Routine,
    address: Option<u32>,
    behavior: RoutineBehavior,
}

#[derive(Debug)]
struct Core {
    registers: [u32; REGISTER_COUNT],
    halted: bool,
    maskints: bool,
    debugen: bool,
    dfsr: u32,
    reset_st: bool,
    dcrdr: u32,
    demcr: u32,
    fp_enabled: bool,
    fp_comparators: Vec<u32>,
    dwt: Vec<[u32; 3]>,
}

impl Core {
    fn new(fp_comparators: usize, dwt_comparators: usize) -> Self {
        let mut core = Self {
            registers: [0; REGISTER_COUNT],
            halted: false,
            maskints: false,
            debugen: false,
            dfsr: 0,
            reset_st: false,
            dcrdr: 0,
            demcr: 0,
            fp_enabled: false,
            fp_comparators: vec![0; fp_comparators],
            dwt: vec![[0; 3]; dwt_comparators],
        };
        core.reset_registers();
        core
    }

    fn reset_registers(&mut self) {
        self.registers = [0; REGISTER_COUNT];
        self.registers[PC] = RESET_PC;
        self.registers[13] = 0x2000_8000;
        self.registers[0x10] = 1 << 24;
    }

    fn dhcsr(&mut self) -> u32 {
        let value = u32::from(self.debugen)
            | u32::from(self.halted) << 1
            | u32::from(self.maskints) << 3
            | 1 << 16
            | u32::from(self.halted) << 17
            | u32::from(self.reset_st) << 25;
        self.reset_st = false;
        value
    }

    /// Whether an enabled FPB comparator matches `pc`.
    fn breakpoint_at(&self, pc: u32) -> bool {
        self.fp_enabled
            && self.fp_comparators.iter().any(|&comp| {
                if comp & 1 == 0 {
                    return false;
                }
                let base = comp & 0x1FFF_FFFC;
                match comp >> 30 {
                    0b01 => base == pc,
                    0b10 => base + 2 == pc,
                    _ => false,
                }
            })
    }
}

struct Target {
    packet_size: usize,
    packet_count: u8,
    requests: Vec<Vec<u8>>,
    responses: VecDeque<Vec<u8>>,
    injected: VecDeque<Injected>,
    transfers: Vec<LoggedTransfer>,
    clock_hz: u32,
    connected: bool,

    select: u32,
    ctrl: u32,
    sticky_error: bool,
    aborts: Vec<u32>,
    rdbuff: u32,
    csw: u32,
    tar: u32,

    ram: Vec<u8>,
    ram_start: u32,
    flash: Vec<u8>,
    flash_properties: FlashProperties,

    core: Core,
    routines: HashMap<u32, Routine>,
    overrides: Vec<Override>,
    calls: Vec<RoutineCall>,
}

impl Target {
    fn handle(&mut self, packet: &[u8]) -> Vec<u8> {
        let Some((&command, payload)) = packet.split_first() else {
            return vec![0xFF];
        };

        match command {
            0x00 => self.info(payload.first().copied().unwrap_or(0)),
            0x02 => {
                let port = payload.first().copied().unwrap_or(0);
                // SWD only.
                let connected = if port <= 1 { 1 } else { 0 };
                self.connected = connected == 1;
                vec![command, connected]
            }
            0x03 => {
                self.connected = false;
                vec![command, 0]
            }
            0x05 => self.transfer(payload),
            0x06 => self.transfer_block(payload),
            0x0A => {
                self.reset(true);
                vec![command, 0, 0]
            }
            0x11 => {
                self.clock_hz = read_u32(payload, 0).unwrap_or(0);
                vec![command, 0]
            }
            0x01 | 0x04 | 0x12 | 0x13 => vec![command, 0],
            _ => vec![0xFF],
        }
    }

    fn info(&self, id: u8) -> Vec<u8> {
        match id {
            0x04 => {
                let mut response = vec![0x00, 6];
                response.extend_from_slice(b"2.1.0\0");
                response
            }
            0xF0 => vec![0x00, 1, 0x01],
            0xFE => vec![0x00, 1, self.packet_count],
            0xFF => {
                let [lo, hi] = (self.packet_size as u16).to_le_bytes();
                vec![0x00, 2, lo, hi]
            }
            _ => vec![0x00, 0],
        }
    }

    /// Consumes the next injected acknowledge. `Some` stops the packet with that acknowledge.
    fn next_injected(&mut self) -> Option<u8> {
        match self.injected.pop_front().unwrap_or(Injected::Ok) {
            Injected::Ok => None,
            Injected::Wait => Some(ACK_WAIT),
            Injected::Fault => {
                self.sticky_error = true;
                Some(ACK_FAULT)
            }
            Injected::NoAck => Some(ACK_NO_ACK),
            Injected::ProtocolError => Some(PROTOCOL_ERROR | ACK_NO_ACK),
        }
    }

    fn transfer(&mut self, payload: &[u8]) -> Vec<u8> {
        let count = payload.get(1).copied().unwrap_or(0) as usize;
        let mut offset = 2;
        let mut executed = 0u8;
        let mut ack = ACK_OK;
        let mut data = Vec::new();

        for _ in 0..count {
            let Some(&request) = payload.get(offset) else {
                ack = ACK_NO_ACK;
                break;
            };
            offset += 1;

            let port = port_of(request);
            let read = request & 0b10 != 0;
            let write = if read {
                None
            } else {
                let Some(value) = read_u32(payload, offset) else {
                    ack = ACK_NO_ACK;
                    break;
                };
                offset += 4;
                Some(value)
            };

            if let Some(injected) = self.next_injected() {
                ack = injected;
                break;
            }

            match self.execute(port, request & 0xC, write) {
                Ok(value) => {
                    if let Some(value) = value {
                        data.extend_from_slice(&value.to_le_bytes());
                    }
                    executed += 1;
                }
                Err(code) => {
                    ack = code;
                    break;
                }
            }
        }

        let mut response = vec![0x05, executed, ack];
        response.extend_from_slice(&data);
        response
    }

    fn transfer_block(&mut self, payload: &[u8]) -> Vec<u8> {
        let count = payload
            .get(1..3)
            .map_or(0, |c| u16::from_le_bytes([c[0], c[1]])) as usize;
        let request = payload.get(3).copied().unwrap_or(0);
        let port = port_of(request);
        let read = request & 0b10 != 0;

        let mut executed = 0u16;
        let mut ack = ACK_OK;
        let mut data = Vec::new();

        for index in 0..count {
            let write = if read {
                None
            } else {
                match read_u32(payload, 4 + 4 * index) {
                    Some(value) => Some(value),
                    None => {
                        ack = ACK_NO_ACK;
                        break;
                    }
                }
            };

            if let Some(injected) = self.next_injected() {
                ack = injected;
                break;
            }

            match self.execute(port, request & 0xC, write) {
                Ok(value) => {
                    if let Some(value) = value {
                        data.extend_from_slice(&value.to_le_bytes());
                    }
                    executed += 1;
                }
                Err(code) => {
                    ack = code;
                    break;
                }
            }
        }

        let [lo, hi] = executed.to_le_bytes();
        let mut response = vec![0x06, lo, hi, ack];
        response.extend_from_slice(&data);
        response
    }

    /// Executes one DP or AP access. `Err` carries the acknowledge.
    fn execute(&mut self, port: PortType, a: u8, write: Option<u32>) -> Result<Option<u32>, u8> {
        let address = match port {
            PortType::DebugPort => a,
            PortType::AccessPort => (((self.select >> 4) & 0xF) as u8) << 4 | a,
        };

        let result = match port {
            PortType::DebugPort => Ok(self.debug_port(a, write)),
            PortType::AccessPort if self.sticky_error => Err(ACK_FAULT),
            PortType::AccessPort => self.access_port(address, write),
        };

        if result.is_ok() {
            self.transfers.push(LoggedTransfer {
                port,
                address,
                write,
            });
        }
        result
    }

    fn debug_port(&mut self, a: u8, write: Option<u32>) -> Option<u32> {
        match (a, write) {
            (0x0, None) => Some(DPIDR),
            (0x0, Some(abort)) => {
                if abort & (1 << 2) != 0 {
                    self.sticky_error = false;
                }
                self.aborts.push(abort);
                None
            }
            (0x4, None) => {
                // Power-up requests are acknowledged right away.
                let acks = (self.ctrl & (1 << 28)) << 1 | (self.ctrl & (1 << 30)) << 1;
                Some(self.ctrl | acks | u32::from(self.sticky_error) << 5)
            }
            (0x4, Some(value)) => {
                self.ctrl = value & 0x5000_0F00;
                None
            }
            (0x8, Some(value)) => {
                self.select = value;
                None
            }
            (0xC, None) => Some(self.rdbuff),
            (_, None) => Some(0),
            (_, Some(_)) => None,
        }
    }

    fn access_port(&mut self, address: u8, write: Option<u32>) -> Result<Option<u32>, u8> {
        // Only AP 0 exists.
        if self.select >> 24 != 0 {
            return Ok(write.is_none().then_some(0));
        }

        let value = match (address, write) {
            (0x00, None) => Some(self.csw),
            (0x00, Some(value)) => {
                self.csw = value;
                None
            }
            (0x04, None) => Some(self.tar),
            (0x04, Some(value)) => {
                self.tar = value;
                None
            }
            (0x0C, write) => {
                let result = match write {
                    None => self.bus_read(self.tar).map(Some),
                    Some(value) => self.bus_write(self.tar, value).map(|_| None),
                };
                let Ok(value) = result else {
                    self.sticky_error = true;
                    return Err(ACK_FAULT);
                };
                if (self.csw >> 4) & 0b11 == 0b01 {
                    self.tar = self.tar.wrapping_add(4);
                }
                value
            }
            (0xFC, None) => Some(AHB_AP_IDR),
            (_, None) => Some(0),
            (_, Some(_)) => None,
        };

        if let Some(value) = value {
            self.rdbuff = value;
        }
        Ok(value)
    }

    fn ram_range(&self) -> Range<u32> {
        self.ram_start..self.ram_start + self.ram.len() as u32
    }

    fn flash_range(&self) -> Range<u32> {
        let range = &self.flash_properties.address_range;
        range.start as u32..range.end as u32
    }

    fn bus_read(&mut self, address: u32) -> Result<u32, ()> {
        if address % 4 != 0 {
            return Err(());
        }
        if self.ram_range().contains(&address) {
            return Ok(word_at(&self.ram, (address - self.ram_start) as usize));
        }
        if self.flash_range().contains(&address) {
            return Ok(word_at(&self.flash, (address - self.flash_range().start) as usize));
        }

        let core = &mut self.core;
        let value = match address {
            DHCSR => core.dhcsr(),
            DCRDR => core.dcrdr,
            DEMCR => core.demcr,
            AIRCR => 0xFA05_0000,
            DFSR => core.dfsr,
            FP_CTRL => {
                let count = core.fp_comparators.len() as u32;
                (count & 0x70) << 8 | (count & 0xF) << 4 | u32::from(core.fp_enabled)
            }
            a if (FP_COMP0..FP_COMP0 + 4 * core.fp_comparators.len() as u32).contains(&a) => {
                core.fp_comparators[((a - FP_COMP0) / 4) as usize]
            }
            DWT_CTRL => {
                if core.demcr & (1 << 24) != 0 {
                    (core.dwt.len() as u32) << 28
                } else {
                    0
                }
            }
            a if (DWT_COMP0..DWT_COMP0 + 0x10 * core.dwt.len() as u32).contains(&a) => {
                let offset = a - DWT_COMP0;
                core.dwt[(offset / 0x10) as usize]
                    .get(((offset % 0x10) / 4) as usize)
                    .copied()
                    .unwrap_or(0)
            }
            _ => return Err(()),
        };
        Ok(value)
    }

    fn bus_write(&mut self, address: u32, value: u32) -> Result<(), ()> {
        if address % 4 != 0 {
            return Err(());
        }
        if self.ram_range().contains(&address) {
            let offset = (address - self.ram_start) as usize;
            self.ram[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
            return Ok(());
        }
        // Flash can only be changed by the flash algorithm.
        if self.flash_range().contains(&address) {
            return Ok(());
        }

        match address {
            DHCSR => self.write_dhcsr(value),
            DCRSR => {
                let register = (value & 0x7F) as usize;
                if register < REGISTER_COUNT {
                    if value & (1 << 16) != 0 {
                        self.core.registers[register] = self.core.dcrdr;
                    } else {
                        self.core.dcrdr = self.core.registers[register];
                    }
                }
            }
            DCRDR => self.core.dcrdr = value,
            DEMCR => self.core.demcr = value,
            AIRCR => {
                if value >> 16 == 0x05FA {
                    if value & (1 << 2) != 0 {
                        self.reset(true);
                    } else if value & 1 != 0 {
                        self.reset(false);
                    }
                }
            }
            DFSR => self.core.dfsr &= !value,
            FP_CTRL => {
                if value & 0b10 != 0 {
                    self.core.fp_enabled = value & 1 != 0;
                }
            }
            a if (FP_COMP0..FP_COMP0 + 4 * self.core.fp_comparators.len() as u32).contains(&a) => {
                self.core.fp_comparators[((a - FP_COMP0) / 4) as usize] = value;
            }
            a if (DWT_COMP0..DWT_COMP0 + 0x10 * self.core.dwt.len() as u32).contains(&a) => {
                let offset = a - DWT_COMP0;
                if let Some(slot) = self.core.dwt[(offset / 0x10) as usize]
                    .get_mut(((offset % 0x10) / 4) as usize)
                {
                    *slot = value;
                }
            }
            _ => return Err(()),
        }
        Ok(())
    }

    fn write_dhcsr(&mut self, value: u32) {
        if value >> 16 != 0xA05F {
            return;
        }
        let core = &mut self.core;
        core.debugen = value & 1 != 0;
        core.maskints = value & (1 << 3) != 0;
        let halt = value & (1 << 1) != 0;
        let step = value & (1 << 2) != 0;

        if halt {
            if !core.halted {
                core.halted = true;
                core.dfsr |= DFSR_HALTED;
            }
        } else if core.halted && step {
            core.registers[PC] = core.registers[PC].wrapping_add(2);
            core.dfsr |= DFSR_HALTED;
        } else if core.halted {
            core.halted = false;
            self.run();
        }
    }

    /// The core starts executing at PC.
    fn run(&mut self) {
        let pc = self.core.registers[PC] & !1;

        if self.core.breakpoint_at(pc) {
            self.core.halted = true;
            self.core.dfsr |= DFSR_BKPT;
            return;
        }

        let Some(&routine) = self.routines.get(&pc) else {
            // Free running application code.
            return;
        };

        let args = [
            self.core.registers[0],
            self.core.registers[1],
            self.core.registers[2],
        ];
        self.calls.push(RoutineCall { routine, args });

        let behavior = self
            .overrides
            .iter()
            .rev()
            .find(|o| o.routine == routine && o.address.map_or(true, |a| a == args[0]))
            .map(|o| o.behavior);

        let result = match behavior {
            Some(RoutineBehavior::Hang) => return,
            Some(RoutineBehavior::Return(value)) => value,
            None => self.execute_routine(routine, args),
        };

        // Return into the BKPT of the algorithm header.
        self.core.registers[0] = result;
        self.core.registers[PC] = self.core.registers[LR] & !1;
        self.core.halted = true;
        self.core.dfsr |= DFSR_BKPT;
    }

    fn execute_routine(&mut self, routine: Routine, args: [u32; 3]) -> u32 {
        let flash = self.flash_range();
        match routine {
            Routine::Init | Routine::UnInit => 0,
            Routine::EraseSector => {
                let Some(sector) = self.flash_properties.sector_info(args[0].into()) else {
                    return 1;
                };
                let start = (sector.base_address - u64::from(flash.start)) as usize;
                let erased = self.flash_properties.erased_byte_value;
                self.flash[start..start + sector.size as usize].fill(erased);
                0
            }
            Routine::ProgramPage => {
                let [address, len, buffer] = args;
                if !flash.contains(&address)
                    || address + len > flash.end
                    || !self.ram_range().contains(&buffer)
                    || buffer + len > self.ram_range().end
                {
                    return 1;
                }
                let target = (address - flash.start) as usize;
                let source = (buffer - self.ram_start) as usize;
                for i in 0..len as usize {
                    // Programming can only clear bits.
                    self.flash[target + i] &= self.ram[source + i];
                }
                0
            }
        }
    }

    fn reset(&mut self, system: bool) {
        let core = &mut self.core;
        core.reset_registers();
        core.reset_st = true;
        core.dfsr = 0;
        if system {
            core.fp_enabled = false;
            core.fp_comparators.iter_mut().for_each(|c| *c = 0);
        }

        if core.demcr & 1 != 0 {
            core.halted = true;
            core.dfsr |= DFSR_VCATCH;
        } else {
            core.halted = false;
        }
        self.sticky_error = false;
    }
}

fn port_of(request: u8) -> PortType {
    if request & 1 != 0 {
        PortType::AccessPort
    } else {
        PortType::DebugPort
    }
}

fn read_u32(buffer: &[u8], offset: usize) -> Option<u32> {
    let bytes = buffer.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn word_at(memory: &[u8], offset: usize) -> u32 {
    read_u32(memory, offset).unwrap_or(0)
}

/// This is a mock probe which can be used for mocking things in tests.
///
/// Clones share the emulated target, so a test can keep a handle to
/// inspect and manipulate it after handing the probe to a session.
#[derive(Clone)]
pub struct FakeProbe {
    target: Arc<Mutex<Target>>,
}

impl fmt::Debug for FakeProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FakeProbe").finish_non_exhaustive()
    }
}

impl Default for FakeProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeProbe {
    /// A probe with 64 byte packets, 32 KiB of RAM at `0x2000_0000` and
    /// 64 KiB of flash at `0x0800_0000` in 1 KiB sectors.
    pub fn new() -> Self {
        let flash_properties = FlashProperties {
            address_range: 0x0800_0000..0x0801_0000,
            page_size: 0x100,
            erased_byte_value: 0xFF,
            program_page_timeout: 100,
            erase_sector_timeout: 100,
            sectors: vec![probelink_target::SectorDescription {
                size: 0x400,
                address: 0,
            }],
        };

        let target = Target {
            packet_size: 64,
            packet_count: 4,
            requests: Vec::new(),
            responses: VecDeque::new(),
            injected: VecDeque::new(),
            transfers: Vec::new(),
            clock_hz: 0,
            connected: false,
            select: 0,
            ctrl: 0,
            sticky_error: false,
            aborts: Vec::new(),
            rdbuff: 0,
            csw: 0,
            tar: 0,
            ram: vec![0; 0x8000],
            ram_start: 0x2000_0000,
            flash: vec![0xFF; 0x1_0000],
            flash_properties,
            core: Core::new(6, 4),
            routines: HashMap::new(),
            overrides: Vec::new(),
            calls: Vec::new(),
        };

        Self {
            target: Arc::new(Mutex::new(target)),
        }
    }

    fn target(&self) -> MutexGuard<'_, Target> {
        self.target.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn with_packet_size(self, packet_size: usize) -> Self {
        self.target().packet_size = packet_size;
        self
    }

    pub fn with_breakpoint_comparators(self, count: usize) -> Self {
        self.target().core.fp_comparators = vec![0; count];
        self
    }

    /// Places the routines of `algorithm` and adopts its flash geometry.
    pub fn load_flash_algorithm(&self, algorithm: &FlashAlgorithm) {
        let mut target = self.target();
        let properties = algorithm.flash_properties.clone();
        let size = (properties.address_range.end - properties.address_range.start) as usize;
        target.flash = vec![properties.erased_byte_value; size];
        target.flash_properties = properties;

        target.routines.clear();
        let entries = [
            (algorithm.pc_init, Routine::Init),
            (algorithm.pc_uninit, Routine::UnInit),
            (Some(algorithm.pc_erase_sector), Routine::EraseSector),
            (Some(algorithm.pc_program_page), Routine::ProgramPage),
        ];
        for (pc, routine) in entries {
            if let Some(pc) = pc {
                target.routines.insert(pc as u32 & !1, routine);
            }
        }
    }

    /// Changes what `routine` does, for calls with R0 equal to `address` or for all calls.
    pub fn override_routine(
        &self,
        routine: Routine,
        address: Option<u32>,
        behavior: RoutineBehavior,
    ) {
        self.target().overrides.push(Override {
            routine,
            address,
            behavior,
        });
    }

    pub fn clear_overrides(&self) {
        self.target().overrides.clear();
    }

    /// Answers the next transfer attempts with `acks`, one per transfer.
    pub fn inject(&self, acks: &[Injected]) {
        self.target().injected.extend(acks.iter().copied());
    }

    /// All request packets sent to the probe.
    pub fn requests(&self) -> Vec<Vec<u8>> {
        self.target().requests.clone()
    }

    /// Number of request packets with the given command byte.
    pub fn command_count(&self, command: u8) -> usize {
        self.target()
            .requests
            .iter()
            .filter(|r| r.first() == Some(&command))
            .count()
    }

    pub fn transfers(&self) -> Vec<LoggedTransfer> {
        self.target().transfers.clone()
    }

    /// Values written to ABORT.
    pub fn aborts(&self) -> Vec<u32> {
        self.target().aborts.clone()
    }

    pub fn clear_log(&self) {
        let mut target = self.target();
        target.requests.clear();
        target.transfers.clear();
        target.aborts.clear();
        target.calls.clear();
    }

    pub fn routine_calls(&self) -> Vec<RoutineCall> {
        self.target().calls.clone()
    }

    /// Whether the probe was connected to the target with DAP_Connect.
    pub fn is_connected(&self) -> bool {
        self.target().connected
    }

    pub fn clock_khz(&self) -> u32 {
        self.target().clock_hz / 1000
    }

    pub fn is_halted(&self) -> bool {
        self.target().core.halted
    }

    /// Halts the core, as if a debugger or a breakpoint stopped it.
    pub fn halt(&self) {
        let mut target = self.target();
        target.core.halted = true;
        target.core.dfsr |= DFSR_HALTED;
    }

    pub fn register(&self, index: usize) -> u32 {
        self.target().core.registers[index]
    }

    pub fn set_register(&self, index: usize, value: u32) {
        self.target().core.registers[index] = value;
    }

    pub fn fp_comparators(&self) -> Vec<u32> {
        self.target().core.fp_comparators.clone()
    }

    pub fn dwt_comparator(&self, index: usize) -> [u32; 3] {
        self.target().core.dwt[index]
    }

    pub fn read_flash(&self, address: u64, len: usize) -> Vec<u8> {
        let target = self.target();
        let start = (address - target.flash_properties.address_range.start) as usize;
        target.flash[start..start + len].to_vec()
    }

    pub fn write_flash(&self, address: u64, data: &[u8]) {
        let mut target = self.target();
        let start = (address - target.flash_properties.address_range.start) as usize;
        target.flash[start..start + data.len()].copy_from_slice(data);
    }

    pub fn read_ram(&self, address: u32, len: usize) -> Vec<u8> {
        let target = self.target();
        let start = (address - target.ram_start) as usize;
        target.ram[start..start + len].to_vec()
    }

    pub fn write_ram(&self, address: u32, data: &[u8]) {
        let mut target = self.target();
        let start = (address - target.ram_start) as usize;
        target.ram[start..start + data.len()].copy_from_slice(data);
    }
}

impl Transport for FakeProbe {
    fn write_packet(&mut self, data: &[u8], _timeout: Duration) -> Result<(), TransportError> {
        let mut target = self.target();
        if data.len() > target.packet_size {
            return Err(TransportError::Other(
                format!("packet of {} bytes exceeds the packet size", data.len()).into(),
            ));
        }
        target.requests.push(data.to_vec());
        let response = target.handle(data);
        target.responses.push_back(response);
        Ok(())
    }

    fn read_packet(&mut self, _timeout: Duration) -> Result<Vec<u8>, TransportError> {
        self.target()
            .responses
            .pop_front()
            .ok_or(TransportError::Timeout)
    }

    fn packet_size(&self) -> usize {
        self.target().packet_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answers_packet_size() {
        let mut probe = FakeProbe::new();
        probe
            .write_packet(&[0x00, 0xFF], Duration::from_millis(1))
            .unwrap();
        assert_eq!(
            probe.read_packet(Duration::from_millis(1)).unwrap(),
            vec![0x00, 2, 64, 0]
        );
        assert!(probe.read_packet(Duration::from_millis(1)).is_err());
    }

    #[test]
    fn ram_through_the_memory_ap() {
        let probe = FakeProbe::new();
        let mut target = probe.target();

        // CSW for word access with auto increment, then two writes.
        target.execute(PortType::AccessPort, 0x0, Some(0xA000_0012)).unwrap();
        target.execute(PortType::AccessPort, 0x4, Some(0x2000_0000)).unwrap();
        target.execute(PortType::AccessPort, 0xC, Some(0x1122_3344)).unwrap();
        target.execute(PortType::AccessPort, 0xC, Some(0x5566_7788)).unwrap();
        assert_eq!(target.tar, 0x2000_0008);
        assert_eq!(word_at(&target.ram, 4), 0x5566_7788);

        target.execute(PortType::AccessPort, 0x4, Some(0x4000_0000)).unwrap();
        assert_eq!(target.execute(PortType::AccessPort, 0xC, None), Err(ACK_FAULT));
        // Sticky until cleared through ABORT.
        assert_eq!(target.execute(PortType::AccessPort, 0x4, None), Err(ACK_FAULT));
        target.execute(PortType::DebugPort, 0x0, Some(0b1_1110)).unwrap();
        assert!(target.execute(PortType::AccessPort, 0x4, None).is_ok());
    }
}
