//! Drive Classification
//!
//! Maps the prefix of a path to a [`DriveType`] from the mount context
//! alone. Nothing here touches a device; the answer is recomputed on every
//! call, so a changed mount state is picked up immediately.
//!
//! Priority order: alias drive, last search (`Z:`), mounted numbered slot,
//! fixed virtual drive letter.

use super::mount::{ImageKind, MountContext};
use super::path;

bitflags::bitflags! {
    /// Drive descriptor. Empty means unknown.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DriveType: u32 {
        /// Backed by a FAT volume
        const FAT = 1 << 0;
        /// Backed by virtual files
        const VIRTUAL = 1 << 1;
        const SDCARD = 1 << 2;
        const SYSNAND = 1 << 3;
        const EMUNAND = 1 << 4;
        const CTRNAND = 1 << 5;
        const TWLNAND = 1 << 6;
        const IMAGE = 1 << 7;
        const XORPAD = 1 << 8;
        const RAMDRIVE = 1 << 9;
        const MEMORY = 1 << 10;
        const GAME = 1 << 11;
        const CART = 1 << 12;
        const VRAM = 1 << 13;
        const ALIAS = 1 << 14;
        /// Spare FAT volume in unused SysNAND space
        const BONUS = 1 << 15;
        const SEARCH = 1 << 17;
        /// Standard FAT drive without limitations
        const STDFAT = 1 << 18;
    }
}

/// Source behind a virtual drive letter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VirtualSource {
    SysNand,
    EmuNand,
    ImgNand,
    XorPad,
    Memory,
    Game,
    Cart,
    Vram,
}

/// Virtual drive letters
const VIRTUAL_DRIVES: [(u8, VirtualSource); 8] = [
    (b'S', VirtualSource::SysNand),
    (b'E', VirtualSource::EmuNand),
    (b'I', VirtualSource::ImgNand),
    (b'X', VirtualSource::XorPad),
    (b'M', VirtualSource::Memory),
    (b'G', VirtualSource::Game),
    (b'C', VirtualSource::Cart),
    (b'V', VirtualSource::Vram),
];

/// Drives in root listing order
pub const DRIVE_NUMBERS: [&str; 20] = [
    "0:", "1:", "2:", "3:", "A:", "S:", "4:", "5:", "6:", "B:", "E:", "7:", "8:", "9:",
    "I:", "C:", "G:", "M:", "V:", "Z:",
];

/// Virtual source addressed by `path`, without checking availability.
/// The prefix must be followed by nothing or by `/`.
pub fn virtual_source(path: &str) -> Option<VirtualSource> {
    let (_, rest) = path::split_drive(path)?;
    if !(rest.is_empty() || rest.starts_with('/')) {
        return None;
    }
    let letter = path::drive_letter(path)?;
    VIRTUAL_DRIVES
        .iter()
        .find(|(drive, _)| *drive == letter)
        .map(|&(_, source)| source)
}

fn virtual_available(source: VirtualSource, ctx: &MountContext) -> bool {
    match source {
        VirtualSource::SysNand | VirtualSource::XorPad | VirtualSource::Memory => true,
        VirtualSource::EmuNand => ctx.emunand,
        VirtualSource::ImgNand => ctx.image() == Some(ImageKind::Nand),
        VirtualSource::Game => ctx.game_mounted,
        VirtualSource::Cart => ctx.cart_inserted,
        VirtualSource::Vram => ctx.vram_available,
    }
}

fn slot_type(slot: usize, ctx: &MountContext) -> DriveType {
    let nand_image = ctx.image() == Some(ImageKind::Nand);
    let std = DriveType::FAT | DriveType::STDFAT;
    match slot {
        0 => std | DriveType::SDCARD,
        8 if !nand_image => std | DriveType::SYSNAND | DriveType::BONUS,
        9 if !nand_image => std | DriveType::RAMDRIVE,
        1 => std | DriveType::SYSNAND | DriveType::CTRNAND,
        2 | 3 => std | DriveType::SYSNAND | DriveType::TWLNAND,
        4 => std | DriveType::EMUNAND | DriveType::CTRNAND,
        5 | 6 => std | DriveType::EMUNAND | DriveType::TWLNAND,
        7..=9 if ctx.image().is_some() => std | DriveType::IMAGE,
        _ => DriveType::empty(),
    }
}

/// Classify the drive of `path` under the given mount state.
pub fn classify(path: &str, ctx: &MountContext) -> DriveType {
    let Some((prefix, rest)) = path::split_drive(path) else {
        return DriveType::empty();
    };

    if let Some(binding) = ctx.aliases.lookup(path) {
        let nand = if binding.drive == b'A' { DriveType::SYSNAND } else { DriveType::EMUNAND };
        return DriveType::FAT | DriveType::ALIAS | nand;
    }

    if prefix == "Z:" && path::is_drive_root(rest) && ctx.search().is_some() {
        return DriveType::SEARCH;
    }

    if let Some(slot) = ctx.mounted_slot(path) {
        return slot_type(slot, ctx);
    }

    match virtual_source(path) {
        Some(source) if virtual_available(source, ctx) => {
            DriveType::VIRTUAL
                | match source {
                    VirtualSource::SysNand => DriveType::SYSNAND,
                    VirtualSource::EmuNand => DriveType::EMUNAND,
                    VirtualSource::ImgNand => DriveType::IMAGE,
                    VirtualSource::XorPad => DriveType::XORPAD,
                    VirtualSource::Memory => DriveType::MEMORY,
                    VirtualSource::Game => DriveType::GAME | DriveType::IMAGE,
                    VirtualSource::Cart => DriveType::CART,
                    VirtualSource::Vram => DriveType::VRAM,
                }
        }
        _ => DriveType::empty(),
    }
}

/// Display name of a drive in the root listing
pub fn drive_label(drive: &str, ctx: &MountContext) -> &'static str {
    let nand_image = ctx.image() == Some(ImageKind::Nand);
    match drive.as_bytes().first() {
        Some(b'0') => "SDCARD",
        Some(b'1') => "SYSNAND CTRNAND",
        Some(b'2') => "SYSNAND TWLN",
        Some(b'3') => "SYSNAND TWLP",
        Some(b'A') => "SYSNAND SD",
        Some(b'S') => "SYSNAND VIRTUAL",
        Some(b'4') => "EMUNAND CTRNAND",
        Some(b'5') => "EMUNAND TWLN",
        Some(b'6') => "EMUNAND TWLP",
        Some(b'B') => "EMUNAND SD",
        Some(b'E') => "EMUNAND VIRTUAL",
        Some(b'7') if nand_image => "IMGNAND CTRNAND",
        Some(b'8') if nand_image => "IMGNAND TWLN",
        Some(b'9') if nand_image => "IMGNAND TWLP",
        Some(b'7') => "FAT IMAGE",
        Some(b'8') => "BONUS DRIVE",
        Some(b'9') => "RAMDRIVE",
        Some(b'I') => "IMGNAND VIRTUAL",
        Some(b'C') => "GAMECART",
        Some(b'G') => "GAME IMAGE",
        Some(b'M') => "MEMORY VIRTUAL",
        Some(b'V') => "VRAM VIRTUAL",
        Some(b'Z') => "LAST SEARCH",
        _ => "UNKNOWN",
    }
}
