//! Sector Device Abstraction
//!
//! Every medium this crate touches (internal NAND, the SD card, a mounted
//! disk image, the RAM drive) is reached through the same sector interface.
//! Transfers are whole 512-byte sectors; byte-granular access is layered on
//! top by the virtual I/O adapter.
//!
//! # Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │            Virtual File Layer / FAT volumes                  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 NAND Sector Backend                          │
//! │   source select · EmuNAND offset · CTR keystream            │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!          ┌───────────────────┼───────────────────┐
//!          ▼                   ▼                   ▼
//! ┌─────────────────┐ ┌─────────────────┐ ┌─────────────────┐
//! │   eMMC (NAND)   │ │    SD card      │ │   Disk image    │
//! └─────────────────┘ └─────────────────┘ └─────────────────┘
//! ```

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, Ordering};
use spin::Mutex;

/// Sector size shared by all media
pub const SECTOR_SIZE: usize = 512;

/// Block device status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BlockStatus {
    /// Device or source not present
    NotFound = 1,
    /// I/O error
    IoError = 2,
    /// Invalid parameter (range outside the device, unaligned buffer)
    InvalidParameter = 3,
    /// Media not present
    NoMedia = 5,
    /// Write protected
    WriteProtected = 6,
    /// Keyslot required by the transfer holds no key
    KeyUnavailable = 10,
}

/// A device addressed in 512-byte sectors.
pub trait SectorDevice: Send {
    /// Total number of sectors
    fn sector_count(&self) -> u64;

    /// Read `buf.len() / SECTOR_SIZE` sectors starting at `sector`
    fn read_sectors(&mut self, sector: u64, buf: &mut [u8]) -> Result<(), BlockStatus>;

    /// Write `buf.len() / SECTOR_SIZE` sectors starting at `sector`
    fn write_sectors(&mut self, sector: u64, buf: &[u8]) -> Result<(), BlockStatus>;

    /// Whether writes are refused by the medium itself
    fn is_read_only(&self) -> bool {
        false
    }
}

/// Device handle shared between the NAND backend and FAT volumes
pub type SharedDevice = Arc<Mutex<dyn SectorDevice>>;

/// Wrap a device for sharing
pub fn share<D: SectorDevice + 'static>(device: D) -> SharedDevice {
    Arc::new(Mutex::new(device))
}

/// Validate a transfer against a device and return its sector count.
pub fn check_range(total_sectors: u64, sector: u64, len: usize) -> Result<u64, BlockStatus> {
    if len % SECTOR_SIZE != 0 {
        return Err(BlockStatus::InvalidParameter);
    }
    let count = (len / SECTOR_SIZE) as u64;
    match sector.checked_add(count) {
        Some(end) if end <= total_sectors => Ok(count),
        _ => Err(BlockStatus::InvalidParameter),
    }
}

/// Per-device transfer counters
#[derive(Debug, Default)]
pub struct DeviceStats {
    /// Total read operations
    reads: AtomicU64,
    /// Total write operations
    writes: AtomicU64,
    /// Total sectors read
    sectors_read: AtomicU64,
    /// Total sectors written
    sectors_written: AtomicU64,
    /// Total errors
    errors: AtomicU64,
}

impl DeviceStats {
    pub const fn new() -> Self {
        Self {
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            sectors_read: AtomicU64::new(0),
            sectors_written: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    pub fn record_read(&self, sectors: u64) {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.sectors_read.fetch_add(sectors, Ordering::Relaxed);
    }

    pub fn record_write(&self, sectors: u64) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.sectors_written.fetch_add(sectors, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of the counters
    pub fn snapshot(&self) -> BlockStats {
        BlockStats {
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            sectors_read: self.sectors_read.load(Ordering::Relaxed),
            sectors_written: self.sectors_written.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Block device statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockStats {
    pub reads: u64,
    pub writes: u64,
    pub sectors_read: u64,
    pub sectors_written: u64,
    pub errors: u64,
}

impl BlockStats {
    /// Number of calls of either kind
    pub fn operations(&self) -> u64 {
        self.reads + self.writes
    }
}
