//! NAND virtual files
//!
//! Fixed table of the regions of a NAND image that are exposed as files on
//! `S:`, `E:` and `I:` (and as keystreams on `X:`). Offsets and sizes
//! depend on the console generation and on what the NAND header says, so
//! every entry carries the NAND types it applies to. The same name may
//! appear several times; the first entry that applies wins.

use alloc::string::String;
use alloc::vec::Vec;

use crate::crypto::{uses_crypto, KEYSLOT_CTRNAND_N3DS, KEYSLOT_NONE};
use crate::fs::drive::VirtualSource;
use crate::fs::mount::ConsoleType;
use crate::io::block::SECTOR_SIZE;
use crate::io::nand::{
    ncsd_min_sectors, NandSource, SectorBackend, NCSD_MAGIC_LEN, NCSD_MAGIC_N3DS, NCSD_MAGIC_O3DS, NCSD_MAGIC_OFFSET,
};

use super::{VirtualFile, VirtualFlags};

/// Name suffix of XORpad files
pub const XORPAD_SUFFIX: &str = ".xorpad";

bitflags::bitflags! {
    /// NAND types a template applies to
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Applicability: u8 {
        const O3DS = 1 << 0;
        const N3DS = 1 << 1;
        /// Old console NAND layout on a new console
        const NO3DS = 1 << 2;
        const ALL = Self::O3DS.bits() | Self::N3DS.bits() | Self::NO3DS.bits();
    }
}

/// NAND layout as identified from its header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NandType {
    O3ds,
    N3ds,
    No3ds,
}

impl NandType {
    fn mask(&self) -> Applicability {
        match self {
            NandType::O3ds => Applicability::O3DS,
            NandType::N3ds => Applicability::N3DS,
            NandType::No3ds => Applicability::NO3DS,
        }
    }
}

/// Length of a template
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateSize {
    Fixed(u64),
    /// Whole medium
    NandSize,
    /// From the offset to the end of the medium
    Remainder,
}

bitflags::bitflags! {
    /// Special handling of a template
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TemplateFlags: u8 {
        /// Deleting zero-fills the region
        const DELETABLE = 1 << 0;
        /// Only the partition table at the end of the sector
        const MBR = 1 << 1;
        /// Present only if the essential backup magic is found
        const ESSENTIAL = 1 << 2;
        /// Starts where the NCSD partitions end
        const BONUS = 1 << 3;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NandTemplate {
    pub name: &'static str,
    pub offset: u64,
    pub size: TemplateSize,
    pub keyslot: u8,
    pub applies: Applicability,
    pub flags: TemplateFlags,
}

const fn entry(name: &'static str, offset: u64, size: u64, keyslot: u8, applies: Applicability) -> NandTemplate {
    NandTemplate { name, offset, size: TemplateSize::Fixed(size), keyslot, applies, flags: TemplateFlags::empty() }
}

/// Size of the MBR partition table plus signature
pub const MBR_SIZE: u64 = 0x42;

/// Start of the essential backup (sector 1)
const ESSENTIAL_OFFSET: u64 = 0x200;

/// Size of the essential backup ExeFS
pub const ESSENTIAL_SIZE: u64 = 0x2400;

/// First ExeFS header entry of an essential backup: `nand_hdr` at 0, 0x200 bytes
pub const ESSENTIAL_MAGIC: [u8; 16] = *b"nand_hdr\0\0\0\0\0\x02\0\0";

pub static NAND_TEMPLATES: [NandTemplate; 19] = [
    entry("nand_hdr.bin", 0, 0x0000_0200, KEYSLOT_NONE, Applicability::ALL),
    NandTemplate { flags: TemplateFlags::MBR, ..entry("twlmbr.bin", 0, 0x0000_0200, 0x03, Applicability::ALL) },
    NandTemplate {
        flags: TemplateFlags::DELETABLE.union(TemplateFlags::ESSENTIAL),
        ..entry("essential.exefs", ESSENTIAL_OFFSET, ESSENTIAL_SIZE, KEYSLOT_NONE, Applicability::ALL)
    },
    entry("sector0x96.bin", 0x0001_2C00, 0x0000_0200, KEYSLOT_NONE, Applicability::ALL),
    entry("twln.bin", 0x0001_2E00, 0x08FB_5200, 0x03, Applicability::ALL),
    entry("twlp.bin", 0x0901_1A00, 0x020B_6600, 0x03, Applicability::ALL),
    NandTemplate { flags: TemplateFlags::DELETABLE, ..entry("agbsave.bin", 0x0B10_0000, 0x0003_0000, 0x07, Applicability::ALL) },
    entry("firm0.bin", 0x0B13_0000, 0x0040_0000, 0x06, Applicability::ALL),
    entry("firm1.bin", 0x0B53_0000, 0x0040_0000, 0x06, Applicability::ALL),
    entry("ctrnand_full.bin", 0x0B93_0000, 0x2F5D_0000, 0x04, Applicability::O3DS),
    entry("ctrnand_full.bin", 0x0B93_0000, 0x41ED_0000, 0x05, Applicability::N3DS),
    entry("ctrnand_full.bin", 0x0B93_0000, 0x41ED_0000, 0x04, Applicability::NO3DS),
    entry("ctrnand_fat.bin", 0x0B95_CA00, 0x2F3E_3600, 0x04, Applicability::O3DS),
    entry("ctrnand_fat.bin", 0x0B95_AE00, 0x41D2_D200, 0x05, Applicability::N3DS),
    entry("ctrnand_fat.bin", 0x0B95_AE00, 0x41D2_D200, 0x04, Applicability::NO3DS),
    NandTemplate {
        size: TemplateSize::Remainder,
        flags: TemplateFlags::DELETABLE.union(TemplateFlags::BONUS),
        ..entry("bonus.bin", 0, 0, KEYSLOT_NONE, Applicability::ALL)
    },
    NandTemplate { size: TemplateSize::NandSize, ..entry("nand.bin", 0, 0, KEYSLOT_NONE, Applicability::ALL) },
    entry("nand_minsize.bin", 0, 0x3AF0_0000, KEYSLOT_NONE, Applicability::O3DS),
    entry("nand_minsize.bin", 0, 0x4D80_0000, KEYSLOT_NONE, Applicability::N3DS.union(Applicability::NO3DS)),
];

/// NAND medium behind a virtual drive
pub fn nand_source(source: VirtualSource) -> Option<NandSource> {
    match source {
        VirtualSource::SysNand => Some(NandSource::SysNand),
        VirtualSource::EmuNand => Some(NandSource::EmuNand),
        VirtualSource::ImgNand => Some(NandSource::ImgNand),
        VirtualSource::XorPad => Some(NandSource::ZeroNand),
        _ => None,
    }
}

fn read_header(backend: &dyn SectorBackend, src: NandSource) -> Option<[u8; SECTOR_SIZE]> {
    // XORpads are generated for the console's own NAND
    let src = if src == NandSource::ZeroNand { NandSource::SysNand } else { src };
    let mut sector0 = [0u8; SECTOR_SIZE];
    backend.read_sectors(src, 0, KEYSLOT_NONE, &mut sector0).ok()?;
    Some(sector0)
}

fn nand_type_of(sector0: &[u8; SECTOR_SIZE], console: ConsoleType) -> Option<NandType> {
    let magic = &sector0[NCSD_MAGIC_OFFSET..NCSD_MAGIC_OFFSET + NCSD_MAGIC_LEN];
    if magic == NCSD_MAGIC_N3DS {
        Some(NandType::N3ds)
    } else if magic == NCSD_MAGIC_O3DS {
        Some(match console {
            ConsoleType::Old => NandType::O3ds,
            ConsoleType::New => NandType::No3ds,
        })
    } else {
        None
    }
}

/// Identify the NAND layout from the raw header sector.
pub fn probe_nand_type(backend: &dyn SectorBackend, src: NandSource, console: ConsoleType) -> Option<NandType> {
    nand_type_of(&read_header(backend, src)?, console)
}

fn has_essential(backend: &dyn SectorBackend, src: NandSource) -> bool {
    let mut sector = [0u8; SECTOR_SIZE];
    let at = ESSENTIAL_OFFSET / SECTOR_SIZE as u64;
    backend.read_sectors(src, at, KEYSLOT_NONE, &mut sector).is_ok() && sector[..ESSENTIAL_MAGIC.len()] == ESSENTIAL_MAGIC
}

/// Place `template` on a medium of `medium_bytes`; `None` if it ends up empty.
fn build(template: &NandTemplate, source: VirtualSource, sector0: &[u8; SECTOR_SIZE], medium_bytes: u64) -> Option<VirtualFile> {
    let mut offset = template.offset;
    if template.flags.contains(TemplateFlags::BONUS) {
        offset = ncsd_min_sectors(sector0)? * SECTOR_SIZE as u64;
    }
    let mut size = match template.size {
        TemplateSize::Fixed(size) => size,
        TemplateSize::NandSize => medium_bytes,
        TemplateSize::Remainder => medium_bytes.saturating_sub(offset),
    };
    if template.flags.contains(TemplateFlags::MBR) {
        offset += SECTOR_SIZE as u64 - MBR_SIZE;
        size = MBR_SIZE;
    }
    if size == 0 {
        return None;
    }

    let xorpad = source == VirtualSource::XorPad;
    let mut name = String::from(template.name);
    if xorpad {
        name.push_str(XORPAD_SUFFIX);
    }
    let mut flags = VirtualFlags::empty();
    if xorpad {
        flags |= VirtualFlags::READONLY;
    } else if template.flags.contains(TemplateFlags::DELETABLE) {
        flags |= VirtualFlags::DELETABLE;
    }
    Some(VirtualFile { name, offset, size, keyslot: template.keyslot, source, flags })
}

/// Templates that exist for `source` on this hardware, in table order.
/// Only the first applicable entry of each name is kept.
pub fn applicable(backend: &dyn SectorBackend, source: VirtualSource, console: ConsoleType) -> Vec<VirtualFile> {
    let Some(src) = nand_source(source) else {
        return Vec::new();
    };
    let medium_bytes = backend.size_sectors(src) * SECTOR_SIZE as u64;
    if medium_bytes == 0 {
        return Vec::new();
    }
    let Some(sector0) = read_header(backend, src) else {
        return Vec::new();
    };
    let Some(nand_type) = nand_type_of(&sector0, console) else {
        log::debug!("[NAND] unknown NAND type on {:?}", src);
        return Vec::new();
    };

    let mut seen: Vec<&'static str> = Vec::new();
    let mut files = Vec::new();
    for template in NAND_TEMPLATES.iter() {
        if !template.applies.contains(nand_type.mask()) || seen.contains(&template.name) {
            continue;
        }
        if template.keyslot == KEYSLOT_CTRNAND_N3DS && !backend.has_key(KEYSLOT_CTRNAND_N3DS) {
            continue;
        }
        if source == VirtualSource::XorPad && !uses_crypto(template.keyslot) {
            continue;
        }
        if template.flags.contains(TemplateFlags::ESSENTIAL) && !has_essential(backend, src) {
            continue;
        }
        let Some(file) = build(template, source, &sector0, medium_bytes) else {
            continue;
        };
        seen.push(template.name);
        files.push(file);
    }
    files
}

/// Resolve one file name of a NAND virtual drive.
pub fn find(backend: &dyn SectorBackend, source: VirtualSource, console: ConsoleType, name: &str) -> Option<VirtualFile> {
    applicable(backend, source, console)
        .into_iter()
        .find(|file| file.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto;
    use crate::io::block;
    use crate::io::nand::tests::{o3ds_nand_image, test_engine};
    use crate::io::nand::{NandBackend, NandCounters};
    use crate::io::block::{BlockStatus, SectorDevice};
    use crate::io::ramdisk::RamDisk;
    use alloc::collections::BTreeMap;

    fn backend(disk: impl SectorDevice + 'static) -> NandBackend {
        NandBackend::new(block::share(disk), crypto::share(test_engine()), NandCounters::default())
    }

    /// Full sized NAND that only stores the sectors written to it
    struct SparseNand {
        sectors: u64,
        data: BTreeMap<u64, [u8; SECTOR_SIZE]>,
    }

    impl SparseNand {
        fn o3ds(sectors: u64) -> Self {
            let mut sector0 = [0u8; SECTOR_SIZE];
            sector0[NCSD_MAGIC_OFFSET..NCSD_MAGIC_OFFSET + NCSD_MAGIC_LEN].copy_from_slice(&NCSD_MAGIC_O3DS);
            let mut data = BTreeMap::new();
            data.insert(0, sector0);
            Self { sectors, data }
        }
    }

    impl SectorDevice for SparseNand {
        fn sector_count(&self) -> u64 {
            self.sectors
        }

        fn read_sectors(&mut self, sector: u64, buf: &mut [u8]) -> Result<(), BlockStatus> {
            block::check_range(self.sectors, sector, buf.len())?;
            for (i, chunk) in buf.chunks_mut(SECTOR_SIZE).enumerate() {
                match self.data.get(&(sector + i as u64)) {
                    Some(stored) => chunk.copy_from_slice(stored),
                    None => chunk.fill(0),
                }
            }
            Ok(())
        }

        fn write_sectors(&mut self, sector: u64, buf: &[u8]) -> Result<(), BlockStatus> {
            block::check_range(self.sectors, sector, buf.len())?;
            for (i, chunk) in buf.chunks(SECTOR_SIZE).enumerate() {
                let mut stored = [0u8; SECTOR_SIZE];
                stored.copy_from_slice(chunk);
                self.data.insert(sector + i as u64, stored);
            }
            Ok(())
        }
    }

    #[test]
    fn test_at_most_one_entry_per_context() {
        for nand_type in [NandType::O3ds, NandType::N3ds, NandType::No3ds] {
            for template in NAND_TEMPLATES.iter() {
                let hits = NAND_TEMPLATES
                    .iter()
                    .filter(|t| t.name == template.name && t.applies.contains(nand_type.mask()))
                    .count();
                assert!(hits <= 1, "{} on {:?}", template.name, nand_type);
            }
        }
    }

    #[test]
    fn test_sector_aligned() {
        for template in NAND_TEMPLATES.iter() {
            assert_eq!(template.offset % SECTOR_SIZE as u64, 0, "{}", template.name);
            if let TemplateSize::Fixed(size) = template.size {
                assert_eq!(size % SECTOR_SIZE as u64, 0, "{}", template.name);
            }
        }
    }

    #[test]
    fn test_probe() {
        let nand = backend(o3ds_nand_image(16));
        assert_eq!(probe_nand_type(&nand, NandSource::SysNand, ConsoleType::Old), Some(NandType::O3ds));
        assert_eq!(probe_nand_type(&nand, NandSource::SysNand, ConsoleType::New), Some(NandType::No3ds));
        assert_eq!(probe_nand_type(&nand, NandSource::ZeroNand, ConsoleType::Old), Some(NandType::O3ds));

        let blank = backend(RamDisk::new(16));
        assert_eq!(probe_nand_type(&blank, NandSource::SysNand, ConsoleType::Old), None);
    }

    #[test]
    fn test_console_picks_entry() {
        let nand = backend(o3ds_nand_image(16));
        let old = find(&nand, VirtualSource::SysNand, ConsoleType::Old, "ctrnand_fat.bin").unwrap();
        assert_eq!((old.offset, old.keyslot), (0x0B95_CA00, 0x04));
        let new = find(&nand, VirtualSource::SysNand, ConsoleType::New, "ctrnand_fat.bin").unwrap();
        assert_eq!((new.offset, new.size, new.keyslot), (0x0B95_AE00, 0x41D2_D200, 0x04));

        let mbr = find(&nand, VirtualSource::SysNand, ConsoleType::Old, "twlmbr.bin").unwrap();
        assert_eq!((mbr.offset, mbr.size, mbr.keyslot), (0x1BE, MBR_SIZE, 0x03));
        // neither an essential backup nor room behind the partitions
        assert!(find(&nand, VirtualSource::SysNand, ConsoleType::Old, "essential.exefs").is_none());
        assert!(find(&nand, VirtualSource::SysNand, ConsoleType::Old, "bonus.bin").is_none());
    }

    #[test]
    fn test_essential_backup() {
        let mut disk = o3ds_nand_image(32);
        disk.as_bytes_mut()[SECTOR_SIZE..SECTOR_SIZE + ESSENTIAL_MAGIC.len()].copy_from_slice(&ESSENTIAL_MAGIC);
        let nand = backend(disk);
        let essential = find(&nand, VirtualSource::SysNand, ConsoleType::Old, "essential.exefs").unwrap();
        assert_eq!((essential.offset, essential.size), (0x200, ESSENTIAL_SIZE));
        assert_eq!(essential.keyslot, KEYSLOT_NONE);
        assert!(essential.flags.contains(VirtualFlags::DELETABLE));
        assert!(find(&nand, VirtualSource::XorPad, ConsoleType::Old, "essential.exefs.xorpad").is_none());
    }

    #[test]
    fn test_bonus_region() {
        let min_sectors = 0x3AF0_0000 / SECTOR_SIZE as u64;
        let nand = backend(SparseNand::o3ds(min_sectors + 0x100));
        let bonus = find(&nand, VirtualSource::SysNand, ConsoleType::Old, "bonus.bin").unwrap();
        assert_eq!(bonus.offset, 0x3AF0_0000);
        assert_eq!(bonus.size, 0x100 * SECTOR_SIZE as u64);
        assert!(bonus.flags.contains(VirtualFlags::DELETABLE));
        assert!(find(&nand, VirtualSource::XorPad, ConsoleType::Old, "bonus.bin.xorpad").is_none());

        // exactly minimum sized
        let nand = backend(SparseNand::o3ds(min_sectors));
        assert!(find(&nand, VirtualSource::SysNand, ConsoleType::Old, "bonus.bin").is_none());
        assert!(find(&nand, VirtualSource::SysNand, ConsoleType::Old, "nand_minsize.bin").is_some());
    }

    #[test]
    fn test_nand_size_and_case() {
        let nand = backend(o3ds_nand_image(16));
        let whole = find(&nand, VirtualSource::SysNand, ConsoleType::Old, "nand.bin").unwrap();
        assert_eq!(whole.size, 16 * SECTOR_SIZE as u64);
        assert!(find(&nand, VirtualSource::SysNand, ConsoleType::Old, "NAND.BIN").is_none());
        assert!(find(&nand, VirtualSource::SysNand, ConsoleType::Old, "missing.bin").is_none());
        // no EmuNAND configured
        assert!(find(&nand, VirtualSource::EmuNand, ConsoleType::Old, "nand.bin").is_none());
    }

    #[test]
    fn test_xorpads() {
        let nand = backend(o3ds_nand_image(16));
        let pads = applicable(&nand, VirtualSource::XorPad, ConsoleType::Old);
        assert!(pads.iter().all(|f| f.name.ends_with(XORPAD_SUFFIX)));
        assert!(pads.iter().all(|f| uses_crypto(f.keyslot)));
        assert!(pads.iter().all(|f| f.flags.contains(VirtualFlags::READONLY)));
        assert!(pads.iter().any(|f| f.name == "firm0.bin.xorpad"));
        assert!(pads.iter().any(|f| f.name == "twlmbr.bin.xorpad"));
        for plain in ["nand_hdr", "essential", "bonus", "sector0x96"] {
            assert!(!pads.iter().any(|f| f.name.starts_with(plain)), "{}", plain);
        }

        assert!(find(&nand, VirtualSource::XorPad, ConsoleType::Old, "twln.bin.xorpad").is_some());
        assert!(find(&nand, VirtualSource::XorPad, ConsoleType::Old, "twln.bin").is_none());
        assert!(find(&nand, VirtualSource::XorPad, ConsoleType::Old, "nand.bin.xorpad").is_none());
    }

    #[test]
    fn test_keyslot5_needs_key() {
        let mut disk = RamDisk::new(16);
        disk.as_bytes_mut()[NCSD_MAGIC_OFFSET..NCSD_MAGIC_OFFSET + NCSD_MAGIC_LEN].copy_from_slice(&NCSD_MAGIC_N3DS);
        let nand = backend(disk);
        assert!(find(&nand, VirtualSource::SysNand, ConsoleType::New, "ctrnand_full.bin").is_none());
        let min = find(&nand, VirtualSource::SysNand, ConsoleType::New, "nand_minsize.bin").unwrap();
        assert_eq!(min.size, 0x4D80_0000);
    }

    #[test]
    fn test_deterministic() {
        let nand = backend(o3ds_nand_image(16));
        let a = find(&nand, VirtualSource::SysNand, ConsoleType::Old, "agbsave.bin").unwrap();
        let b = find(&nand, VirtualSource::SysNand, ConsoleType::Old, "agbsave.bin").unwrap();
        assert_eq!(a, b);
        assert!(a.flags.contains(VirtualFlags::DELETABLE));
    }
}
