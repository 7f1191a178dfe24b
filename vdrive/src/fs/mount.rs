//! Mount Context
//!
//! Everything the classifier, resolver and permission checks need to know
//! about the current mount state, gathered in one value that is passed
//! around explicitly:
//! - which numbered FAT slots (`0:`..`9:`) are mounted
//! - what kind of image occupies slots 7..9
//! - EmuNAND, game, cart and VRAM availability
//! - alias drive bindings and the last search
//!
//! # Slot Layout
//! `0:` SD card, `1:`-`3:` SysNAND CTR/TWLN/TWLP, `4:`-`6:` EmuNAND,
//! `7:` FAT image or NAND image CTRNAND, `8:` bonus drive or NAND image
//! TWLN, `9:` RAM drive or NAND image TWLP.

use alloc::string::String;

use super::alias::AliasTable;
use super::path;
use super::vfs::FsStatus;

/// Number of numbered FAT slots
pub const NORM_FS: usize = 10;

/// Slots occupied by a mounted image
pub const IMAGE_FAT_SLOTS: &[usize] = &[7];
pub const IMAGE_NAND_SLOTS: &[usize] = &[7, 8, 9];

/// Console generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConsoleType {
    #[default]
    Old,
    New,
}

/// Kind of the mounted image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    /// Plain FAT filesystem image
    Fat,
    /// Full NAND dump
    Nand,
}

impl ImageKind {
    pub fn slots(&self) -> &'static [usize] {
        match self {
            ImageKind::Fat => IMAGE_FAT_SLOTS,
            ImageKind::Nand => IMAGE_NAND_SLOTS,
        }
    }
}

/// Pattern and base path of the last search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchSpec {
    pub pattern: String,
    pub path: String,
}

/// Mount state consulted by every path operation
#[derive(Debug, Clone, Default)]
pub struct MountContext {
    /// Console generation
    pub console: ConsoleType,
    /// Full write unlock available (boot9 access)
    pub unlocked: bool,
    /// EmuNAND present on the SD card
    pub emunand: bool,
    /// Game image mounted
    pub game_mounted: bool,
    /// Game cart inserted
    pub cart_inserted: bool,
    /// VRAM drive available
    pub vram_available: bool,
    /// SD card write protect switch engaged
    pub sd_write_protected: bool,
    /// Alias drive bindings
    pub aliases: AliasTable,
    image: Option<ImageKind>,
    image_path: Option<String>,
    mounted: [bool; NORM_FS],
    search: Option<SearchSpec>,
}

impl MountContext {
    pub fn new(console: ConsoleType) -> Self {
        Self { console, ..Self::default() }
    }

    pub fn mount_slot(&mut self, slot: usize) -> Result<(), FsStatus> {
        let entry = self.mounted.get_mut(slot).ok_or(FsStatus::InvalidParameter)?;
        *entry = true;
        Ok(())
    }

    pub fn unmount_slot(&mut self, slot: usize) -> Result<(), FsStatus> {
        let entry = self.mounted.get_mut(slot).ok_or(FsStatus::InvalidParameter)?;
        *entry = false;
        Ok(())
    }

    pub fn is_mounted(&self, slot: usize) -> bool {
        self.mounted.get(slot).copied().unwrap_or(false)
    }

    /// Mounted slot numbers in ascending order
    pub fn mounted_slots(&self) -> impl Iterator<Item = usize> + '_ {
        (0..NORM_FS).filter(|&slot| self.mounted[slot])
    }

    /// Slot addressed by a numbered drive prefix, if that slot is mounted
    pub fn mounted_slot(&self, path: &str) -> Option<usize> {
        let letter = path::drive_letter(path)?;
        if !letter.is_ascii_digit() {
            return None;
        }
        let slot = (letter - b'0') as usize;
        self.is_mounted(slot).then_some(slot)
    }

    pub fn image(&self) -> Option<ImageKind> {
        self.image
    }

    pub fn image_path(&self) -> Option<&str> {
        self.image_path.as_deref()
    }

    /// Record a mounted image. Slot mount state is tracked separately.
    pub fn set_image(&mut self, kind: ImageKind, image_path: &str) {
        self.image = Some(kind);
        self.image_path = Some(String::from(image_path));
    }

    pub fn clear_image(&mut self) {
        self.image = None;
        self.image_path = None;
    }

    pub fn search(&self) -> Option<&SearchSpec> {
        self.search.as_ref()
    }

    /// Store the search used by `Z:`; empty parts clear it
    pub fn set_search(&mut self, pattern: &str, base: &str) {
        self.search = if pattern.is_empty() || base.is_empty() {
            None
        } else {
            Some(SearchSpec { pattern: String::from(pattern), path: String::from(base) })
        };
    }

    pub fn clear_search(&mut self) {
        self.search = None;
    }
}
