//! Virtual Files
//!
//! Virtual drives have a flat root whose entries are views onto raw
//! regions: NAND partitions (`S:`, `E:`, `I:`), their keystreams (`X:`)
//! and memory (`M:`). A [`VirtualFile`] is built from a static template on
//! every lookup and dropped afterwards; nothing is cached.
//!
//! Transfers are clamped to the file: a range reaching past the end is cut
//! short and a start at or after the end moves nothing.

pub mod adapter;
pub mod vmem;
pub mod vnand;

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use crate::crypto::KEYSLOT_NONE;
use crate::io::block::SECTOR_SIZE;
use crate::io::nand::SectorBackend;

use super::drive::{classify, virtual_source, DriveType, VirtualSource};
use super::mount::MountContext;
use super::path;
use super::vfs::FsStatus;

pub use vmem::{MemoryBus, RamBus};

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct VirtualFlags: u32 {
        /// Drive root
        const ROOT = 1 << 0;
        const DIR = 1 << 1;
        const READONLY = 1 << 2;
        /// Deleting zero-fills the region
        const DELETABLE = 1 << 3;
    }
}

/// A resolved virtual file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualFile {
    pub name: String,
    /// Byte offset on the medium (address for memory files)
    pub offset: u64,
    pub size: u64,
    pub keyslot: u8,
    pub source: VirtualSource,
    pub flags: VirtualFlags,
}

impl VirtualFile {
    pub fn is_dir(&self) -> bool {
        self.flags.contains(VirtualFlags::DIR)
    }
}

/// The media virtual files are served from
#[derive(Clone, Copy)]
pub struct VirtualMedia<'a> {
    pub nand: &'a dyn SectorBackend,
    pub memory: Option<&'a dyn MemoryBus>,
}

/// Size of a virtual drive in bytes
pub fn drive_size(source: VirtualSource, media: &VirtualMedia) -> u64 {
    match vnand::nand_source(source) {
        Some(src) => media.nand.size_sectors(src) * SECTOR_SIZE as u64,
        None => 0,
    }
}

fn source_of(path: &str, ctx: &MountContext) -> Result<VirtualSource, FsStatus> {
    if !classify(path, ctx).contains(DriveType::VIRTUAL) {
        return Err(FsStatus::NotFound);
    }
    virtual_source(path).ok_or(FsStatus::NotFound)
}

/// All files of the virtual drive of `path`
pub fn list(path: &str, ctx: &MountContext, media: &VirtualMedia) -> Result<Vec<VirtualFile>, FsStatus> {
    let source = source_of(path, ctx)?;
    Ok(match source {
        VirtualSource::Memory => vmem::applicable(ctx.console),
        _ => vnand::applicable(media.nand, source, ctx.console),
    })
}

/// Resolve `path` on a virtual drive.
///
/// Only the header probe touches the medium. Unknown names and names that
/// do not exist on this hardware are both `NotFound`.
pub fn resolve(path: &str, ctx: &MountContext, media: &VirtualMedia) -> Result<VirtualFile, FsStatus> {
    let source = source_of(path, ctx)?;
    let (prefix, rest) = path::split_drive(path).ok_or(FsStatus::NotFound)?;

    let mut segments = path::segments(rest);
    let Some(name) = segments.next() else {
        return Ok(VirtualFile {
            name: String::from(prefix),
            offset: 0,
            size: drive_size(source, media),
            keyslot: KEYSLOT_NONE,
            source,
            flags: VirtualFlags::ROOT | VirtualFlags::DIR,
        });
    };
    if segments.next().is_some() {
        return Err(FsStatus::NotFound);
    }

    let found = match source {
        VirtualSource::Memory => vmem::find(ctx.console, name),
        VirtualSource::Game | VirtualSource::Cart | VirtualSource::Vram => None,
        _ => vnand::find(media.nand, source, ctx.console, name),
    };
    found.ok_or_else(|| {
        log::debug!("[VFS] no virtual file {}", path);
        FsStatus::NotFound
    })
}

/// Bytes that can be moved at `offset`
fn clamp(file: &VirtualFile, offset: u64, len: usize) -> usize {
    if offset >= file.size {
        0
    } else {
        (len as u64).min(file.size - offset) as usize
    }
}

/// Read from `file` at `offset`; returns the clamped count
pub fn read(file: &VirtualFile, offset: u64, buf: &mut [u8], media: &VirtualMedia) -> Result<usize, FsStatus> {
    if file.is_dir() {
        return Err(FsStatus::IsDirectory);
    }
    let count = clamp(file, offset, buf.len());
    if count == 0 {
        return Ok(0);
    }
    let buf = &mut buf[..count];
    match vnand::nand_source(file.source) {
        Some(src) => adapter::read_bytes(media.nand, src, file.keyslot, file.offset + offset, buf)?,
        None => {
            let bus = media.memory.ok_or(FsStatus::NotSupported)?;
            bus.read((file.offset + offset) as u32, buf)?;
        }
    }
    Ok(count)
}

/// Write to `file` at `offset`; returns the clamped count
pub fn write(file: &VirtualFile, offset: u64, buf: &[u8], media: &VirtualMedia) -> Result<usize, FsStatus> {
    if file.is_dir() {
        return Err(FsStatus::IsDirectory);
    }
    let count = clamp(file, offset, buf.len());
    if count == 0 {
        return Ok(0);
    }
    if file.flags.contains(VirtualFlags::READONLY) {
        return Err(FsStatus::Denied);
    }
    let buf = &buf[..count];
    match vnand::nand_source(file.source) {
        Some(src) => adapter::write_bytes(media.nand, src, file.keyslot, file.offset + offset, buf)?,
        None => {
            let bus = media.memory.ok_or(FsStatus::NotSupported)?;
            bus.write((file.offset + offset) as u32, buf)?;
        }
    }
    Ok(count)
}

/// Zero-fill a deletable file in chunks of `chunk_size`
pub fn delete(file: &VirtualFile, media: &VirtualMedia, chunk_size: usize) -> Result<(), FsStatus> {
    if !file.flags.contains(VirtualFlags::DELETABLE) {
        return Err(FsStatus::Denied);
    }
    let chunk_size = chunk_size.max(SECTOR_SIZE);
    let zeroes = vec![0u8; (file.size as usize).min(chunk_size)];
    let mut pos = 0;
    while pos < file.size {
        let n = zeroes.len().min((file.size - pos) as usize);
        write(file, pos, &zeroes[..n], media)?;
        pos += n as u64;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto;
    use crate::io::block::{self, SharedDevice};
    use crate::io::nand::tests::{o3ds_nand_image, test_engine};
    use crate::io::nand::{NandBackend, NandCounters};
    use crate::io::ramdisk::RamDisk;
    use alloc::sync::Arc;
    use spin::Mutex;

    fn sysnand(sectors: u64) -> (NandBackend, Arc<Mutex<RamDisk>>) {
        let disk = Arc::new(Mutex::new(o3ds_nand_image(sectors)));
        let shared: SharedDevice = disk.clone();
        let nand = NandBackend::new(shared, crypto::share(test_engine()), NandCounters::new([3; 16], [4; 16]));
        (nand, disk)
    }

    #[test]
    fn test_nand_hdr_is_sector_zero() {
        let (nand, disk) = sysnand(64);
        disk.lock().as_bytes_mut()[..4].copy_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
        let media = VirtualMedia { nand: &nand, memory: None };
        let ctx = MountContext::default();

        let hdr = resolve("S:/nand_hdr.bin", &ctx, &media).unwrap();
        assert_eq!((hdr.offset, hdr.size, hdr.keyslot), (0, 512, KEYSLOT_NONE));

        let mut buf = [0u8; 512];
        assert_eq!(read(&hdr, 0, &mut buf, &media), Ok(512));
        assert_eq!(&buf[..], &disk.lock().as_bytes()[..512]);
    }

    #[test]
    fn test_resolved_files_are_aligned() {
        let (nand, _) = sysnand(64);
        let media = VirtualMedia { nand: &nand, memory: None };
        for console in [crate::fs::mount::ConsoleType::Old, crate::fs::mount::ConsoleType::New] {
            let ctx = MountContext::new(console);
            for file in list("S:", &ctx, &media).unwrap() {
                assert_eq!(file.offset % 512, 0, "{}", file.name);
                assert_eq!(file.size % 512, 0, "{}", file.name);
                assert_eq!(resolve(&alloc::format!("S:/{}", file.name), &ctx, &media), Ok(file));
            }
        }
    }

    #[test]
    fn test_root_and_misses() {
        let (nand, _) = sysnand(64);
        let media = VirtualMedia { nand: &nand, memory: None };
        let ctx = MountContext::default();
        let root = resolve("S:", &ctx, &media).unwrap();
        assert!(root.flags.contains(VirtualFlags::ROOT | VirtualFlags::DIR));
        assert_eq!(root.size, 64 * 512);
        assert_eq!(resolve("S:/", &ctx, &media).map(|f| f.name), Ok(String::from("S:")));

        assert_eq!(resolve("S:/nope.bin", &ctx, &media), Err(FsStatus::NotFound));
        assert_eq!(resolve("S:/a/nand.bin", &ctx, &media), Err(FsStatus::NotFound));
        assert_eq!(resolve("E:/nand.bin", &ctx, &media), Err(FsStatus::NotFound));
        assert_eq!(resolve("0:/nand.bin", &ctx, &media), Err(FsStatus::NotFound));
        let mut buf = [0u8; 4];
        assert_eq!(read(&root, 0, &mut buf, &media), Err(FsStatus::IsDirectory));
    }

    #[test]
    fn test_clamping() {
        let (nand, _) = sysnand(64);
        let media = VirtualMedia { nand: &nand, memory: None };
        let hdr = resolve("S:/nand_hdr.bin", &MountContext::default(), &media).unwrap();
        let mut buf = [0u8; 100];
        assert_eq!(read(&hdr, 500, &mut buf, &media), Ok(12));
        assert_eq!(read(&hdr, 512, &mut buf, &media), Ok(0));
        assert_eq!(read(&hdr, 9999, &mut buf, &media), Ok(0));
        assert_eq!(write(&hdr, 480, &buf, &media), Ok(32));
        assert_eq!(write(&hdr, 512, &buf, &media), Ok(0));
    }

    #[test]
    fn test_round_trip_through_cipher() {
        let (nand, disk) = sysnand(256);
        let media = VirtualMedia { nand: &nand, memory: None };
        let twln = resolve("S:/twln.bin", &MountContext::default(), &media).unwrap();
        assert_eq!(twln.keyslot, 0x03);

        let data: Vec<u8> = (0..1000u32).map(|i| (i * 7) as u8).collect();
        assert_eq!(write(&twln, 300, &data, &media), Ok(1000));
        let mut back = vec![0u8; 1000];
        assert_eq!(read(&twln, 300, &mut back, &media), Ok(1000));
        assert_eq!(back, data);

        let at = (twln.offset + 300) as usize;
        assert_ne!(&disk.lock().as_bytes()[at..at + 1000], &data[..]);
    }

    #[test]
    fn test_readonly_and_delete() {
        let (nand, _) = sysnand(64);
        let media = VirtualMedia { nand: &nand, memory: None };
        let ctx = MountContext::default();
        let pad = resolve("X:/agbsave.bin.xorpad", &ctx, &media).unwrap();
        assert_eq!(write(&pad, 0, &[1, 2], &media), Err(FsStatus::Denied));
        assert_eq!(delete(&pad, &media, 0x10000), Err(FsStatus::Denied));
        assert!(resolve("S:/agbsave.bin", &ctx, &media).unwrap().flags.contains(VirtualFlags::DELETABLE));

        let wipe = VirtualFile {
            name: String::from("wipe.bin"),
            offset: 0x2000,
            size: 0x1800,
            keyslot: 0x04,
            source: VirtualSource::SysNand,
            flags: VirtualFlags::DELETABLE,
        };
        assert_eq!(write(&wipe, 0, &[0x55; 0x1800], &media), Ok(0x1800));
        delete(&wipe, &media, 0x1000).unwrap();
        let mut back = vec![0xFFu8; 0x1800];
        read(&wipe, 0, &mut back, &media).unwrap();
        assert!(back.iter().all(|&b| b == 0));

        let hdr = resolve("S:/nand_hdr.bin", &ctx, &media).unwrap();
        assert_eq!(delete(&hdr, &media, 0x10000), Err(FsStatus::Denied));
    }

    #[test]
    fn test_memory_files() {
        let (nand, _) = sysnand(8);
        let bus = RamBus::new();
        bus.map(0xFFF0_0000, 0x4000);
        let media = VirtualMedia { nand: &nand, memory: Some(&bus) };
        let ctx = MountContext::default();

        let dtcm = resolve("M:/dtcm.mem", &ctx, &media).unwrap();
        assert_eq!(write(&dtcm, 0x3FFE, &[1, 2, 3, 4], &media), Ok(2));
        let mut back = [0u8; 2];
        assert_eq!(read(&dtcm, 0x3FFE, &mut back, &media), Ok(2));
        assert_eq!(back, [1, 2]);

        let no_bus = VirtualMedia { nand: &nand, memory: None };
        assert_eq!(read(&dtcm, 0, &mut back, &no_bus), Err(FsStatus::NotSupported));
        assert_eq!(list("M:", &ctx, &media).map(|l| l.len()), Ok(7));
        assert_eq!(drive_size(VirtualSource::Memory, &media), 0);
    }

    #[test]
    fn test_unavailable_sources() {
        let nand = NandBackend::new(block::share(RamDisk::new(8)), crypto::share(test_engine()), NandCounters::default());
        let media = VirtualMedia { nand: &nand, memory: None };
        let mut ctx = MountContext::default();
        ctx.vram_available = true;
        assert_eq!(resolve("V:/anything", &ctx, &media), Err(FsStatus::NotFound));
        // no NCSD header, nothing applies
        assert_eq!(list("S:", &ctx, &media).map(|l| l.len()), Ok(0));
    }
}
