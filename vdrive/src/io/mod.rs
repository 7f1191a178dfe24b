//! Sector I/O
//!
//! Block devices and the NAND backend that adds partition crypto and
//! EmuNAND/image redirection on top of them.

pub mod block;
pub mod nand;
pub mod ramdisk;

pub use block::{BlockStatus, SectorDevice, SharedDevice, SECTOR_SIZE};
pub use nand::{NandBackend, NandSource, SectorBackend};
pub use ramdisk::RamDisk;
