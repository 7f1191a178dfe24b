//! In-memory FAT volumes
//!
//! A [`FatFs`] that keeps every numbered volume in RAM. Backs the RAM drive
//! (`9:`) and stands in for the FAT driver off device. Names are compared
//! without ASCII case, like FAT does; the case of the name given at creation
//! is kept for listings.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

use super::fat::{FatFs, FatHandle, FileAttributes, FileInfo, OpenMode, FAT_DATE_EPOCH};
use super::mount::NORM_FS;
use super::path;
use super::vfs::FsStatus;

/// Maximum number of open files
pub const MAX_FAT_FILES: usize = 32;

/// Default capacity of a volume (64MB)
pub const DEFAULT_VOLUME_SIZE: u64 = 64 * 1024 * 1024;

/// Shared log of mount state changes ("mount 1", "unmount 1")
pub type Journal = Arc<Mutex<Vec<String>>>;

#[derive(Debug, Clone)]
struct Node {
    name: String,
    data: Vec<u8>,
    attributes: FileAttributes,
}

impl Node {
    fn is_dir(&self) -> bool {
        self.attributes.contains(FileAttributes::DIRECTORY)
    }

    fn info(&self) -> FileInfo {
        FileInfo {
            name: self.name.clone(),
            size: if self.is_dir() { 0 } else { self.data.len() as u64 },
            attributes: self.attributes,
            fdate: FAT_DATE_EPOCH,
            ftime: 0,
        }
    }
}

#[derive(Debug, Clone)]
struct OpenFile {
    key: String,
    slot: usize,
    pos: u64,
    mode: OpenMode,
}

pub struct MemFat {
    nodes: BTreeMap<String, Node>,
    handles: [Option<OpenFile>; MAX_FAT_FILES],
    mounted: [bool; NORM_FS],
    labels: [Option<String>; NORM_FS],
    capacity: [u64; NORM_FS],
    journal: Option<Journal>,
}

impl Default for MemFat {
    fn default() -> Self {
        Self::new()
    }
}

fn parent_key(key: &str) -> Option<&str> {
    key.rfind('/').map(|at| &key[..at])
}

fn is_child(dir: &str, key: &str) -> bool {
    key.len() > dir.len() + 1
        && key.starts_with(dir)
        && key.as_bytes()[dir.len()] == b'/'
        && !key[dir.len() + 1..].contains('/')
}

impl MemFat {
    pub fn new() -> Self {
        Self {
            nodes: BTreeMap::new(),
            handles: [const { None }; MAX_FAT_FILES],
            mounted: [false; NORM_FS],
            labels: [const { None }; NORM_FS],
            capacity: [DEFAULT_VOLUME_SIZE; NORM_FS],
            journal: None,
        }
    }

    /// Record mount and unmount calls in `journal`
    pub fn with_journal(journal: Journal) -> Self {
        Self { journal: Some(journal), ..Self::new() }
    }

    pub fn set_label(&mut self, slot: usize, label: &str) {
        if let Some(entry) = self.labels.get_mut(slot) {
            *entry = Some(String::from(label));
        }
    }

    pub fn set_capacity(&mut self, slot: usize, bytes: u64) {
        if let Some(entry) = self.capacity.get_mut(slot) {
            *entry = bytes;
        }
    }

    pub fn is_mounted(&self, slot: usize) -> bool {
        self.mounted.get(slot).copied().unwrap_or(false)
    }

    /// Replace the attributes of an existing entry; the directory bit is kept
    pub fn set_attributes(&mut self, path: &str, attributes: FileAttributes) -> Result<(), FsStatus> {
        let (_, key) = self.key(path)?;
        let node = self.nodes.get_mut(&key).ok_or(FsStatus::NotFound)?;
        let dir = node.attributes & FileAttributes::DIRECTORY;
        node.attributes = (attributes - FileAttributes::DIRECTORY) | dir;
        Ok(())
    }

    /// Number of open handles
    pub fn open_count(&self) -> usize {
        self.handles.iter().flatten().count()
    }

    fn note(&self, event: String) {
        if let Some(journal) = &self.journal {
            journal.lock().push(event);
        }
    }

    fn slot_of(drive: &str) -> Option<usize> {
        path::drive_letter(drive)
            .filter(u8::is_ascii_digit)
            .map(|d| (d - b'0') as usize)
    }

    /// Lookup key of `path`: lower-case, single separators, no trailing one
    fn key(&self, path: &str) -> Result<(usize, String), FsStatus> {
        let (prefix, rest) = path::split_drive(path).ok_or(FsStatus::InvalidPath)?;
        let slot = Self::slot_of(path).ok_or(FsStatus::InvalidPath)?;
        if !self.mounted[slot] {
            return Err(FsStatus::NotMounted);
        }
        let mut key = String::from(prefix);
        for segment in path::segments(rest) {
            key.push('/');
            key.push_str(&segment.to_ascii_lowercase());
        }
        Ok((slot, key))
    }

    fn is_dir_key(&self, key: &str) -> bool {
        !key.contains('/') || self.nodes.get(key).map_or(false, Node::is_dir)
    }

    fn used(&self, slot: usize) -> u64 {
        let prefix = alloc::format!("{}:", slot);
        self.nodes
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .map(|(_, node)| node.data.len() as u64)
            .sum()
    }

    fn handle(&self, handle: FatHandle) -> Result<&OpenFile, FsStatus> {
        self.handles
            .get(handle)
            .and_then(Option::as_ref)
            .ok_or(FsStatus::InvalidHandle)
    }

    fn handle_mut(&mut self, handle: FatHandle) -> Result<&mut OpenFile, FsStatus> {
        self.handles
            .get_mut(handle)
            .and_then(Option::as_mut)
            .ok_or(FsStatus::InvalidHandle)
    }

    fn is_open(&self, key: &str) -> bool {
        self.handles.iter().flatten().any(|h| h.key == key)
    }
}

impl FatFs for MemFat {
    fn mount_volume(&mut self, slot: usize) -> Result<(), FsStatus> {
        let entry = self.mounted.get_mut(slot).ok_or(FsStatus::InvalidParameter)?;
        *entry = true;
        self.note(alloc::format!("mount {}", slot));
        Ok(())
    }

    fn unmount_volume(&mut self, slot: usize) -> Result<(), FsStatus> {
        let entry = self.mounted.get_mut(slot).ok_or(FsStatus::InvalidParameter)?;
        *entry = false;
        for handle in self.handles.iter_mut() {
            if handle.as_ref().map_or(false, |h| h.slot == slot) {
                *handle = None;
            }
        }
        self.note(alloc::format!("unmount {}", slot));
        Ok(())
    }

    fn open(&mut self, path: &str, mode: OpenMode) -> Result<FatHandle, FsStatus> {
        let (slot, key) = self.key(path)?;
        if !key.contains('/') {
            return Err(FsStatus::IsDirectory);
        }

        let exists = match self.nodes.get_mut(&key) {
            Some(node) if node.is_dir() => return Err(FsStatus::IsDirectory),
            Some(_) if mode.contains(OpenMode::CREATE_NEW) => return Err(FsStatus::AlreadyExists),
            Some(node) => {
                if mode.contains(OpenMode::CREATE_ALWAYS) {
                    node.data.clear();
                }
                true
            }
            None => false,
        };
        if !exists {
            let create = OpenMode::CREATE_NEW | OpenMode::CREATE_ALWAYS | OpenMode::OPEN_ALWAYS;
            if !mode.intersects(create) {
                return Err(FsStatus::NotFound);
            }
            let parent = parent_key(&key).ok_or(FsStatus::InvalidPath)?;
            if !self.is_dir_key(parent) {
                return Err(FsStatus::NotFound);
            }
            let name = String::from(path::file_name(path.trim_end_matches('/')));
            self.nodes.insert(key.clone(), Node { name, data: Vec::new(), attributes: FileAttributes::ARCHIVE });
        }

        let index = self
            .handles
            .iter()
            .position(Option::is_none)
            .ok_or(FsStatus::TooManyFiles)?;
        let pos = if mode.contains(OpenMode::OPEN_APPEND) {
            self.nodes.get(&key).map_or(0, |n| n.data.len() as u64)
        } else {
            0
        };
        self.handles[index] = Some(OpenFile { key, slot, pos, mode });
        Ok(index)
    }

    fn close(&mut self, handle: FatHandle) -> Result<(), FsStatus> {
        self.handle(handle)?;
        self.handles[handle] = None;
        Ok(())
    }

    fn read(&mut self, handle: FatHandle, buf: &mut [u8]) -> Result<usize, FsStatus> {
        let file = self.handle(handle)?.clone();
        if !file.mode.contains(OpenMode::READ) {
            return Err(FsStatus::AccessDenied);
        }
        let node = self.nodes.get(&file.key).ok_or(FsStatus::NotFound)?;
        let start = (file.pos as usize).min(node.data.len());
        let n = buf.len().min(node.data.len() - start);
        buf[..n].copy_from_slice(&node.data[start..start + n]);
        self.handle_mut(handle)?.pos += n as u64;
        Ok(n)
    }

    fn write(&mut self, handle: FatHandle, buf: &[u8]) -> Result<usize, FsStatus> {
        let file = self.handle(handle)?.clone();
        if !file.mode.contains(OpenMode::WRITE) {
            return Err(FsStatus::AccessDenied);
        }
        let free = self.free_space(&alloc::format!("{}:", file.slot));
        let node = self.nodes.get_mut(&file.key).ok_or(FsStatus::NotFound)?;
        let start = file.pos as usize;
        let end = start + buf.len();
        let growth = end.saturating_sub(node.data.len()) as u64;
        if growth > free {
            return Err(FsStatus::DiskFull);
        }
        if end > node.data.len() {
            node.data.resize(end, 0);
        }
        node.data[start..end].copy_from_slice(buf);
        self.handle_mut(handle)?.pos = end as u64;
        Ok(buf.len())
    }

    fn seek(&mut self, handle: FatHandle, pos: u64) -> Result<(), FsStatus> {
        self.handle_mut(handle)?.pos = pos;
        Ok(())
    }

    fn tell(&self, handle: FatHandle) -> Result<u64, FsStatus> {
        Ok(self.handle(handle)?.pos)
    }

    fn size(&self, handle: FatHandle) -> Result<u64, FsStatus> {
        let file = self.handle(handle)?;
        Ok(self.nodes.get(&file.key).map_or(0, |n| n.data.len() as u64))
    }

    fn sync(&mut self, handle: FatHandle) -> Result<(), FsStatus> {
        self.handle(handle).map(|_| ())
    }

    fn stat(&self, path: &str) -> Result<FileInfo, FsStatus> {
        let (_, key) = self.key(path)?;
        if !key.contains('/') {
            return Ok(FileInfo {
                name: key,
                attributes: FileAttributes::DIRECTORY,
                fdate: FAT_DATE_EPOCH,
                ..FileInfo::default()
            });
        }
        self.nodes.get(&key).map(Node::info).ok_or(FsStatus::NotFound)
    }

    fn unlink(&mut self, path: &str) -> Result<(), FsStatus> {
        let (_, key) = self.key(path)?;
        let node = self.nodes.get(&key).ok_or(FsStatus::NotFound)?;
        if node.is_dir() && self.nodes.keys().any(|k| is_child(&key, k)) {
            return Err(FsStatus::DirectoryNotEmpty);
        }
        if self.is_open(&key) {
            return Err(FsStatus::DeviceBusy);
        }
        self.nodes.remove(&key);
        Ok(())
    }

    fn rename(&mut self, old: &str, new: &str) -> Result<(), FsStatus> {
        let (old_slot, old_key) = self.key(old)?;
        let (new_slot, new_key) = self.key(new)?;
        if old_slot != new_slot {
            return Err(FsStatus::CrossDevice);
        }
        if !self.nodes.contains_key(&old_key) {
            return Err(FsStatus::NotFound);
        }
        if self.nodes.contains_key(&new_key) {
            return Err(FsStatus::AlreadyExists);
        }
        let parent = parent_key(&new_key).ok_or(FsStatus::InvalidPath)?;
        if !self.is_dir_key(parent) || parent.starts_with(&old_key) && parent.len() >= old_key.len() {
            return Err(FsStatus::InvalidPath);
        }

        let moved: Vec<String> = self
            .nodes
            .keys()
            .filter(|k| *k == &old_key || k.starts_with(&alloc::format!("{}/", old_key)))
            .cloned()
            .collect();
        for key in moved {
            if let Some(mut node) = self.nodes.remove(&key) {
                let renamed = alloc::format!("{}{}", new_key, &key[old_key.len()..]);
                if key == old_key {
                    node.name = String::from(path::file_name(new.trim_end_matches('/')));
                }
                for handle in self.handles.iter_mut().flatten() {
                    if handle.key == key {
                        handle.key = renamed.clone();
                    }
                }
                self.nodes.insert(renamed, node);
            }
        }
        Ok(())
    }

    fn mkdir(&mut self, path: &str) -> Result<(), FsStatus> {
        let (_, key) = self.key(path)?;
        if !key.contains('/') || self.nodes.contains_key(&key) {
            return Err(FsStatus::AlreadyExists);
        }
        let parent = parent_key(&key).ok_or(FsStatus::InvalidPath)?;
        if !self.is_dir_key(parent) {
            return Err(FsStatus::NotFound);
        }
        let name = String::from(path::file_name(path.trim_end_matches('/')));
        self.nodes.insert(key, Node { name, data: Vec::new(), attributes: FileAttributes::DIRECTORY });
        Ok(())
    }

    fn read_dir(&self, path: &str) -> Result<Vec<FileInfo>, FsStatus> {
        let (_, key) = self.key(path)?;
        if key.contains('/') {
            match self.nodes.get(&key) {
                Some(node) if node.is_dir() => {}
                Some(_) => return Err(FsStatus::NotDirectory),
                None => return Err(FsStatus::NotFound),
            }
        }
        Ok(self
            .nodes
            .iter()
            .filter(|(k, _)| is_child(&key, k))
            .map(|(_, node)| node.info())
            .collect())
    }

    fn volume_label(&self, drive: &str) -> Option<String> {
        let slot = Self::slot_of(drive)?;
        if !self.mounted[slot] {
            return None;
        }
        self.labels[slot].clone()
    }

    fn total_space(&self, drive: &str) -> u64 {
        match Self::slot_of(drive) {
            Some(slot) if self.mounted[slot] => self.capacity[slot],
            _ => 0,
        }
    }

    fn free_space(&self, drive: &str) -> u64 {
        match Self::slot_of(drive) {
            Some(slot) if self.mounted[slot] => self.capacity[slot].saturating_sub(self.used(slot)),
            _ => 0,
        }
    }
}
