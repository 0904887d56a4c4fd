//! # Debug probe driver and flash programming engine for Cortex-M targets
//!
//! probelink drives a CMSIS-DAP debug probe through any packet [`Transport`](probe::Transport),
//! queues DP/AP register accesses, controls a Cortex-M core and programs
//! flash with a flash algorithm running on the target.
//!
//! # Examples
//!
//! ## Halting the attached chip
//! ```no_run
//! # use probelink::Error;
//! use probelink::{Session, SessionConfig};
//!
//! # fn open_transport() -> Box<dyn probelink::probe::Transport> { unimplemented!() }
//! let transport = open_transport();
//!
//! // Attach to the target.
//! let mut session = Session::attach(transport, SessionConfig::default())?;
//!
//! // Halt the core.
//! let mut core = session.core();
//! core.halt(std::time::Duration::from_millis(10))?;
//! # Ok::<(), Error>(())
//! ```
//!
//! ## Reading from RAM
//!
//! ```no_run
//! # use probelink::Error;
//! use probelink::{MemoryInterface, Session, SessionConfig};
//!
//! # fn open_transport() -> Box<dyn probelink::probe::Transport> { unimplemented!() }
//! let mut session = Session::attach(open_transport(), SessionConfig::default())?;
//! let mut memory = session.memory();
//!
//! // Read a block of 50 32 bit words.
//! let mut buff = [0u32; 50];
//! memory.read_32(0x2000_0000, &mut buff)?;
//!
//! // Read a single 32 bit word.
//! let word = memory.read_word_32(0x2000_0000)?;
//!
//! // Writing is just as simple.
//! let buff = [0u32; 50];
//! memory.write_32(0x2000_0000, &buff)?;
//!
//! // of course we can also write 8bit words.
//! let buff = [0u8; 50];
//! memory.write_8(0x2000_0000, &buff)?;
//!
//! # Ok::<(), Error>(())
//! ```
//!
//! probelink is built around 4 main interfaces: the [`CmsisDap`](probe::cmsisdap::CmsisDap)
//! engine, the [`ArmCommunicationInterface`](architecture::arm::ArmCommunicationInterface)
//! queue, the [`Armv7m`](architecture::arm::core::Armv7m) core and the
//! [`Flasher`](flashing::Flasher), tied together by a [`Session`].

pub mod architecture;
pub mod config;

#[warn(missing_docs)]
mod core;
mod deadline;
mod error;
pub mod flashing;
#[warn(missing_docs)]
mod memory;
pub mod probe;
mod session;

pub use crate::config::{FlashConfig, SessionConfig};
pub use crate::core::{
    Breakpoint, BreakpointHandle, BreakpointKind, BreakpointUnit, CoreInformation, CoreState,
    HaltReason, MemoryMappedRegister, RegisterId, ResetBehavior, ResetKind, WatchpointKind,
};
pub use crate::deadline::Deadline;
pub use crate::error::{Error, StateError};
pub use crate::memory::MemoryInterface;
pub use crate::probe::{
    cmsisdap::commands::transfer::TransferError, DebugProbeError, Transport, TransportError,
    WireProtocol,
};
pub use crate::session::{Session, SharedSession};

// Exports only used in tests
#[cfg(feature = "test")]
pub use crate::probe::fake_probe::FakeProbe;
