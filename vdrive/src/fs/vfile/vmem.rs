//! Memory virtual files (`M:`)
//!
//! Each file maps a fixed region of the ARM9 address space. The extension
//! RAM regions only exist on new consoles.

use alloc::string::String;
use alloc::vec::Vec;
use spin::Mutex;

use crate::crypto::KEYSLOT_NONE;
use crate::fs::drive::VirtualSource;
use crate::fs::mount::ConsoleType;
use crate::io::block::BlockStatus;

use super::{VirtualFile, VirtualFlags};

/// Access to the physical address space
pub trait MemoryBus: Send {
    fn read(&self, address: u32, buf: &mut [u8]) -> Result<(), BlockStatus>;
    fn write(&self, address: u32, buf: &[u8]) -> Result<(), BlockStatus>;
}

struct MemTemplate {
    name: &'static str,
    address: u32,
    size: u32,
    new_only: bool,
}

const fn region(name: &'static str, address: u32, size: u32) -> MemTemplate {
    MemTemplate { name, address, size, new_only: false }
}

static MEM_TEMPLATES: [MemTemplate; 9] = [
    region("itcm.mem", 0x01FF_8000, 0x0000_8000),
    region("arm9.mem", 0x0800_0000, 0x0010_0000),
    MemTemplate { new_only: true, ..region("arm9ext.mem", 0x0810_0000, 0x0008_0000) },
    region("vram.mem", 0x1800_0000, 0x0060_0000),
    region("dsp.mem", 0x1FF0_0000, 0x0008_0000),
    region("axiwram.mem", 0x1FF8_0000, 0x0008_0000),
    region("fcram.mem", 0x2000_0000, 0x0800_0000),
    MemTemplate { new_only: true, ..region("fcramext.mem", 0x2800_0000, 0x0800_0000) },
    region("dtcm.mem", 0xFFF0_0000, 0x0000_4000),
];

/// Regions present on this console, in table order
pub fn applicable(console: ConsoleType) -> Vec<VirtualFile> {
    MEM_TEMPLATES
        .iter()
        .filter(|t| !t.new_only || console == ConsoleType::New)
        .map(|t| VirtualFile {
            name: String::from(t.name),
            offset: t.address as u64,
            size: t.size as u64,
            keyslot: KEYSLOT_NONE,
            source: VirtualSource::Memory,
            flags: VirtualFlags::empty(),
        })
        .collect()
}

pub fn find(console: ConsoleType, name: &str) -> Option<VirtualFile> {
    applicable(console).into_iter().find(|f| f.name == name)
}

/// Sparse RAM standing in for the address space
pub struct RamBus {
    regions: Mutex<Vec<(u32, Vec<u8>)>>,
}

impl RamBus {
    pub fn new() -> Self {
        Self { regions: Mutex::new(Vec::new()) }
    }

    /// Back `[address, address + size)` with zeroed RAM
    pub fn map(&self, address: u32, size: usize) {
        self.regions.lock().push((address, alloc::vec![0u8; size]));
    }

    fn with_region<R>(&self, address: u32, len: usize, f: impl FnOnce(&mut [u8]) -> R) -> Result<R, BlockStatus> {
        let mut regions = self.regions.lock();
        let (base, data) = regions
            .iter_mut()
            .find(|(base, data)| address >= *base && (address - *base) as usize + len <= data.len())
            .ok_or(BlockStatus::InvalidParameter)?;
        let start = (address - *base) as usize;
        Ok(f(&mut data[start..start + len]))
    }
}

impl Default for RamBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBus for RamBus {
    fn read(&self, address: u32, buf: &mut [u8]) -> Result<(), BlockStatus> {
        self.with_region(address, buf.len(), |src| buf.copy_from_slice(src))
    }

    fn write(&self, address: u32, buf: &[u8]) -> Result<(), BlockStatus> {
        self.with_region(address, buf.len(), |dst| dst.copy_from_slice(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_console_regions() {
        let old = applicable(ConsoleType::Old);
        let new = applicable(ConsoleType::New);
        assert_eq!(old.len(), 7);
        assert_eq!(new.len(), 9);
        assert!(find(ConsoleType::Old, "fcramext.mem").is_none());
        let ext = find(ConsoleType::New, "arm9ext.mem").unwrap();
        assert_eq!((ext.offset, ext.size), (0x0810_0000, 0x8_0000));
    }

    #[test]
    fn test_ram_bus() {
        let bus = RamBus::new();
        bus.map(0x01FF_8000, 0x8000);
        bus.write(0x01FF_8010, &[1, 2, 3]).unwrap();
        let mut back = [0u8; 4];
        bus.read(0x01FF_800F, &mut back).unwrap();
        assert_eq!(back, [0, 1, 2, 3]);
        assert_eq!(bus.read(0x01FF_FFFF, &mut back), Err(BlockStatus::InvalidParameter));
        assert_eq!(bus.read(0x0800_0000, &mut back), Err(BlockStatus::InvalidParameter));
    }
}
