//! Flash algorithm and memory description schema
//!
//! Flashing a target requires a small amount of chip specific data: the
//! flash algorithm blob with its entry points, the geometry of the flash
//! (pages and sectors), and a RAM region the algorithm can run from.
//!
//! This crate contains the serde structs for that data. It is consumed by
//! `probelink`, which assembles a [`RawFlashAlgorithm`] for a [`RamRegion`]
//! before running it on the target.
#![warn(missing_docs)]

mod flash_algorithm;
mod flash_properties;
mod memory;
pub(crate) mod serialize;

pub use flash_algorithm::RawFlashAlgorithm;
pub use flash_properties::FlashProperties;
pub use memory::{PageInfo, RamRegion, SectorDescription, SectorInfo};
