//! Directory Listings
//!
//! Builds the listing shown for a path: the drive list for the empty path,
//! the templates of a virtual drive, the flattened results of the last
//! search on `Z:`, or a FAT directory. Every listing but the drive list
//! starts with `..` and is sorted directories first.

use alloc::string::String;
use alloc::vec::Vec;
use core::cmp::Ordering;

use crate::io::nand::SectorBackend;

use super::drive::{drive_label, DriveType, DRIVE_NUMBERS};
use super::fat::{FatFs, FileAttributes, FileInfo};
use super::path;
use super::vfs::{FsStatus, VirtualFs};

/// Kind of a listing entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    /// A drive in the drive list
    Root,
    Dir,
    File,
    /// Link to the parent
    DotDot,
}

impl EntryType {
    fn rank(&self) -> u8 {
        match self {
            EntryType::DotDot => 0,
            EntryType::Root => 1,
            EntryType::Dir => 2,
            EntryType::File => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Full path of the entry
    pub path: String,
    /// Display name
    pub name: String,
    pub size: u64,
    pub entry_type: EntryType,
    pub marked: bool,
}

impl DirEntry {
    fn new(path: String, name: String, size: u64, entry_type: EntryType) -> Self {
        Self { path, name, size, entry_type, marked: false }
    }
}

/// A directory listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirStruct {
    pub entries: Vec<DirEntry>,
}

impl DirStruct {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DirEntry> {
        self.entries.iter()
    }

    /// `..` first, then directories before files, then name without case
    pub fn sort(&mut self) {
        self.entries.sort_by(|a, b| match a.entry_type.rank().cmp(&b.entry_type.rank()) {
            Ordering::Equal => a
                .name
                .bytes()
                .map(|c| c.to_ascii_lowercase())
                .cmp(b.name.bytes().map(|c| c.to_ascii_lowercase())),
            other => other,
        });
    }

    fn push(&mut self, entry: DirEntry, limit: usize) -> bool {
        if self.entries.len() >= limit {
            return false;
        }
        self.entries.push(entry);
        true
    }
}

/// Listing for `path`; the empty path lists the drives.
pub fn get_dir_contents<F: FatFs, B: SectorBackend>(vfs: &VirtualFs<F, B>, path: &str) -> Result<DirStruct, FsStatus> {
    let limit = vfs.config().max_dir_entries;
    let mut contents = DirStruct::default();
    if path.is_empty() {
        list_drives(vfs, &mut contents, limit);
        return Ok(contents);
    }

    let (_, rest) = path::split_drive(path).ok_or(FsStatus::InvalidPath)?;
    let up = if path::is_drive_root(rest) {
        String::new()
    } else {
        String::from(path::parent(path.trim_end_matches('/')).unwrap_or(""))
    };
    contents.push(DirEntry::new(up, String::from(".."), 0, EntryType::DotDot), limit);

    if vfs.classify(path).contains(DriveType::SEARCH) {
        if let Some(search) = vfs.context().search() {
            log::debug!("[DIR] search {} in {}", search.pattern, search.path);
            scan(vfs, &search.path, &search.pattern, &mut contents, limit)?;
        }
    } else {
        for info in vfs.read_dir(path)? {
            if hidden(vfs, &info) {
                continue;
            }
            let entry_path = path::join(path, &info.name);
            if !contents.push(entry(entry_path, info), limit) {
                log::debug!("[DIR] {} truncated at {} entries", path, limit);
                break;
            }
        }
    }
    contents.sort();
    Ok(contents)
}

fn hidden<F: FatFs, B: SectorBackend>(vfs: &VirtualFs<F, B>, info: &FileInfo) -> bool {
    vfs.config().hide_hidden && info.attributes.contains(FileAttributes::HIDDEN)
}

fn entry(path: String, info: FileInfo) -> DirEntry {
    let entry_type = if info.is_directory() { EntryType::Dir } else { EntryType::File };
    DirEntry::new(path, info.name, info.size, entry_type)
}

fn list_drives<F: FatFs, B: SectorBackend>(vfs: &VirtualFs<F, B>, contents: &mut DirStruct, limit: usize) {
    for drive in DRIVE_NUMBERS {
        let drv = vfs.classify(drive);
        if drv.is_empty() {
            continue;
        }
        let label = drive_label(drive, vfs.context());
        let name = if drv.contains(DriveType::FAT) {
            let volume = vfs.volume_label(drive).unwrap_or_else(|| String::from("NO LABEL"));
            alloc::format!("[{}] {} ({})", drive, label, volume)
        } else {
            alloc::format!("[{}] {}", drive, label)
        };
        let size = vfs.total_space(drive);
        contents.push(DirEntry::new(String::from(drive), name, size, EntryType::Root), limit);
    }
}

/// Files below `dir` matching `pattern`, depth first
fn scan<F: FatFs, B: SectorBackend>(
    vfs: &VirtualFs<F, B>,
    dir: &str,
    pattern: &str,
    contents: &mut DirStruct,
    limit: usize,
) -> Result<(), FsStatus> {
    for info in vfs.read_dir(dir)? {
        if contents.len() >= limit {
            break;
        }
        if hidden(vfs, &info) {
            continue;
        }
        let entry_path = path::join(dir, &info.name);
        if info.is_directory() {
            scan(vfs, &entry_path, pattern, contents, limit)?;
        } else if path::match_name(pattern, &info.name) {
            contents.push(entry(entry_path, info), limit);
        }
    }
    Ok(())
}
