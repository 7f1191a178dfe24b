//! FAT filesystem seam
//!
//! The façade talks to the FAT driver only through [`FatFs`]. Paths handed
//! to it are already dealiased, so they always start with a numbered drive
//! (`0:` to `9:`). Handles are opaque to the façade.

use alloc::string::String;
use alloc::vec::Vec;

use super::vfs::FsStatus;

/// FAT driver handle
pub type FatHandle = usize;

/// Date stamp of 1980-01-01 in FAT format
pub const FAT_DATE_EPOCH: u16 = (1 << 5) | 1;

bitflags::bitflags! {
    /// Open mode
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct OpenMode: u32 {
        const READ = 0x01;
        const WRITE = 0x02;
        /// Fail if the file exists
        const CREATE_NEW = 0x04;
        /// Create or truncate
        const CREATE_ALWAYS = 0x08;
        /// Create if missing
        const OPEN_ALWAYS = 0x10;
        /// Like OPEN_ALWAYS, starting at the end
        const OPEN_APPEND = 0x30;
    }
}

bitflags::bitflags! {
    /// File attributes
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FileAttributes: u8 {
        const READONLY = 0x01;
        const HIDDEN = 0x02;
        const SYSTEM = 0x04;
        const VOLUME = 0x08;
        const DIRECTORY = 0x10;
        const ARCHIVE = 0x20;
        /// Served by the virtual layer
        const VIRTUAL = 0x40;
    }
}

/// File information
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileInfo {
    /// Entry name (last path segment)
    pub name: String,
    pub size: u64,
    pub attributes: FileAttributes,
    /// FAT date stamp
    pub fdate: u16,
    /// FAT time stamp
    pub ftime: u16,
}

impl FileInfo {
    pub fn is_directory(&self) -> bool {
        self.attributes.contains(FileAttributes::DIRECTORY)
    }

    pub fn is_readonly(&self) -> bool {
        self.attributes.contains(FileAttributes::READONLY)
    }
}

/// FAT filesystem driver
pub trait FatFs {
    /// Mount the volume of numbered slot `slot`
    fn mount_volume(&mut self, slot: usize) -> Result<(), FsStatus>;

    /// Unmount the volume of `slot`. Handles on it become invalid.
    fn unmount_volume(&mut self, slot: usize) -> Result<(), FsStatus>;

    fn open(&mut self, path: &str, mode: OpenMode) -> Result<FatHandle, FsStatus>;
    fn close(&mut self, handle: FatHandle) -> Result<(), FsStatus>;

    /// Read at the handle position and advance it
    fn read(&mut self, handle: FatHandle, buf: &mut [u8]) -> Result<usize, FsStatus>;

    /// Write at the handle position and advance it
    fn write(&mut self, handle: FatHandle, buf: &[u8]) -> Result<usize, FsStatus>;

    /// Move the handle position; positions past the end are allowed
    fn seek(&mut self, handle: FatHandle, pos: u64) -> Result<(), FsStatus>;
    fn tell(&self, handle: FatHandle) -> Result<u64, FsStatus>;
    fn size(&self, handle: FatHandle) -> Result<u64, FsStatus>;
    fn sync(&mut self, handle: FatHandle) -> Result<(), FsStatus>;

    fn stat(&self, path: &str) -> Result<FileInfo, FsStatus>;

    /// Delete a file or an empty directory
    fn unlink(&mut self, path: &str) -> Result<(), FsStatus>;
    fn rename(&mut self, old: &str, new: &str) -> Result<(), FsStatus>;
    fn mkdir(&mut self, path: &str) -> Result<(), FsStatus>;

    /// Entries of a directory, in on-disk order
    fn read_dir(&self, path: &str) -> Result<Vec<FileInfo>, FsStatus>;

    fn volume_label(&self, drive: &str) -> Option<String>;
    fn total_space(&self, drive: &str) -> u64;
    fn free_space(&self, drive: &str) -> u64;
}
