//! Flash programming operations.
//!
//! Flash is written by a flash algorithm: a small, position independent
//! program which is loaded into target RAM and called through its entry
//! points `Init()`, `UnInit()`, `EraseSector()` and `ProgramPage()`.
//!
//! ## Example
//!
//! ```no_run
//! use probelink::flashing::{FlashAlgorithm, FlashPlan};
//! use probelink::{FlashConfig, Session};
//! # use probelink_target::{RamRegion, RawFlashAlgorithm};
//!
//! # fn run(session: &mut Session, raw: &RawFlashAlgorithm) -> anyhow::Result<()> {
//! let ram = RamRegion::new(0x2000_0000..0x2000_4000);
//! let algorithm = FlashAlgorithm::assemble(raw, &ram)?;
//!
//! let mut builder = FlashPlan::builder(&algorithm);
//! builder.add_data(0x0800_0000, &[0x1, 0x2, 0x3])?;
//! let plan = builder.build()?;
//!
//! let report = session
//!     .flasher(algorithm, FlashConfig::default())
//!     .program(plan)?;
//! report.into_result()?;
//! # Ok(())
//! # }
//! ```

mod error;
mod flash_algorithm;
mod flasher;
mod plan;
mod progress;
mod report;

pub use error::*;
pub use flash_algorithm::*;
pub use flasher::*;
pub use plan::*;
pub use progress::*;
pub use report::*;
