//! Alias Drives
//!
//! An alias drive is a one-letter drive that stands for a directory on
//! another drive. `A:` and `B:` alias the SysNAND and EmuNAND data folders
//! on the SD card (`0:/Nintendo 3DS/<id0>/<id1>`); files reached through
//! them are transparently en-/decrypted with the binding's key Y.

use alloc::string::String;

use super::path;
use super::vfs::FsStatus;

/// Number of alias drive slots
pub const NUM_ALIAS_DRV: usize = 2;

/// One alias drive binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasBinding {
    /// Drive letter of the alias drive
    pub drive: u8,
    /// Path the drive prefix resolves to
    pub base: String,
    /// SD key Y for files under this drive
    pub key_y: Option<[u8; 16]>,
}

/// Fixed table of alias drive bindings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliasTable {
    slots: [Option<AliasBinding>; NUM_ALIAS_DRV],
}

impl AliasTable {
    pub const fn new() -> Self {
        Self { slots: [const { None }; NUM_ALIAS_DRV] }
    }

    /// Bind slot `num`, or clear it when `binding` is `None`.
    ///
    /// A letter bound in another slot is released from there first so
    /// that each letter has at most one binding.
    pub fn bind(&mut self, num: usize, binding: Option<AliasBinding>) -> Result<(), FsStatus> {
        if num >= NUM_ALIAS_DRV {
            return Err(FsStatus::InvalidParameter);
        }
        self.slots[num] = None;
        if let Some(binding) = binding {
            if !binding.drive.is_ascii_alphabetic() {
                return Err(FsStatus::InvalidPath);
            }
            for slot in self.slots.iter_mut() {
                if slot.as_ref().map_or(false, |b| b.drive == binding.drive) {
                    *slot = None;
                }
            }
            log::info!("[ALIAS] {}: -> {}", binding.drive as char, binding.base);
            self.slots[num] = Some(binding);
        }
        Ok(())
    }

    /// Binding for the drive of `path`, if it is an alias drive
    pub fn lookup(&self, path: &str) -> Option<&AliasBinding> {
        let letter = path::drive_letter(path)?;
        self.slots.iter().flatten().find(|b| b.drive == letter)
    }

    pub fn is_alias(&self, path: &str) -> bool {
        self.lookup(path).is_some()
    }

    pub fn get(&self, num: usize) -> Option<&AliasBinding> {
        self.slots.get(num)?.as_ref()
    }

    /// Replace the alias prefix of `path` with its base path.
    /// Paths on other drives come back unchanged.
    pub fn dealias(&self, path: &str) -> String {
        match self.lookup(path) {
            Some(binding) => {
                let mut out = binding.base.clone();
                out.push_str(&path[2..]);
                out
            }
            None => String::from(path),
        }
    }
}
