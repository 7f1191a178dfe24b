//! RAM Disk
//!
//! In-memory sector device. Backs the RAM drive (`9:`) and stands in for
//! NAND, SD and image media wherever real hardware is not available.
//!
//! # Features
//! - Heap-backed store sized in whole sectors
//! - Optional write protection
//! - Transfer statistics for call-count checks

use alloc::vec;
use alloc::vec::Vec;

use super::block::{check_range, BlockStats, BlockStatus, DeviceStats, SectorDevice, SECTOR_SIZE};

/// Default RAM drive size (4MB)
pub const DEFAULT_RAMDISK_SIZE: usize = 4 * 1024 * 1024;

/// RAM disk instance
pub struct RamDisk {
    data: Vec<u8>,
    read_only: bool,
    stats: DeviceStats,
}

impl RamDisk {
    /// Zero-filled disk of `sectors` sectors
    pub fn new(sectors: u64) -> Self {
        Self {
            data: vec![0u8; sectors as usize * SECTOR_SIZE],
            read_only: false,
            stats: DeviceStats::new(),
        }
    }

    /// Disk holding `bytes`, padded with zeroes to a sector boundary
    pub fn from_bytes(mut bytes: Vec<u8>) -> Self {
        let rem = bytes.len() % SECTOR_SIZE;
        if rem != 0 {
            bytes.resize(bytes.len() + SECTOR_SIZE - rem, 0);
        }
        Self {
            data: bytes,
            read_only: false,
            stats: DeviceStats::new(),
        }
    }

    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Direct access to the backing store, bypassing the counters
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn stats(&self) -> BlockStats {
        self.stats.snapshot()
    }
}

impl SectorDevice for RamDisk {
    fn sector_count(&self) -> u64 {
        (self.data.len() / SECTOR_SIZE) as u64
    }

    fn read_sectors(&mut self, sector: u64, buf: &mut [u8]) -> Result<(), BlockStatus> {
        let count = match check_range(self.sector_count(), sector, buf.len()) {
            Ok(count) => count,
            Err(e) => {
                self.stats.record_error();
                return Err(e);
            }
        };
        let offset = sector as usize * SECTOR_SIZE;
        buf.copy_from_slice(&self.data[offset..offset + buf.len()]);
        self.stats.record_read(count);
        Ok(())
    }

    fn write_sectors(&mut self, sector: u64, buf: &[u8]) -> Result<(), BlockStatus> {
        if self.read_only {
            self.stats.record_error();
            return Err(BlockStatus::WriteProtected);
        }
        let count = match check_range(self.sector_count(), sector, buf.len()) {
            Ok(count) => count,
            Err(e) => {
                self.stats.record_error();
                return Err(e);
            }
        };
        let offset = sector as usize * SECTOR_SIZE;
        self.data[offset..offset + buf.len()].copy_from_slice(buf);
        self.stats.record_write(count);
        Ok(())
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ramdisk_read_write() {
        let mut disk = RamDisk::new(8);
        assert_eq!(disk.sector_count(), 8);

        let data = [0xA5u8; SECTOR_SIZE * 2];
        disk.write_sectors(3, &data).unwrap();

        let mut out = [0u8; SECTOR_SIZE * 2];
        disk.read_sectors(3, &mut out).unwrap();
        assert_eq!(out, data);

        let stats = disk.stats();
        assert_eq!(stats.writes, 1);
        assert_eq!(stats.sectors_read, 2);
    }

    #[test]
    fn test_ramdisk_bounds() {
        let mut disk = RamDisk::new(2);
        let mut out = [0u8; SECTOR_SIZE * 2];
        assert_eq!(disk.read_sectors(1, &mut out), Err(BlockStatus::InvalidParameter));
        assert_eq!(disk.stats().errors, 1);
    }

    #[test]
    fn test_ramdisk_read_only() {
        let mut disk = RamDisk::from_bytes(vec![1u8; 700]);
        assert_eq!(disk.sector_count(), 2);
        assert_eq!(disk.as_bytes()[699], 1);
        assert_eq!(disk.as_bytes()[700], 0);

        disk.set_read_only(true);
        assert_eq!(disk.write_sectors(0, &[0u8; SECTOR_SIZE]), Err(BlockStatus::WriteProtected));
        assert_eq!(disk.as_bytes()[0], 1);
    }
}
