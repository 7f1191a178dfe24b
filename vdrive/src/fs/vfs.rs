//! Unified File Façade
//!
//! Every path operation goes through [`VirtualFs`]. A call first classifies
//! its path, then takes one of three routes:
//!
//! ```text
//!   path ──classify──┬── VIRTUAL ──► vfile::resolve ──► adapter ──► SectorBackend
//!                    ├── ALIAS ────► dealias ──► FatFs  (+ per-file AES-CTR)
//!                    └── FAT ──────► FatFs
//! ```
//!
//! Write permission is checked before resolution, so a denied write never
//! touches a medium. Raw writes to large NAND regions unmount the FAT
//! volumes living on that medium for the duration of the write.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use crate::crypto::{CryptoError, SharedEngine, AES_BLOCK_SIZE};
use crate::crypto::sd::{id0_from_key_y, is_id1_name, MOVABLE_KEY_Y_OFFSET};
use crate::io::block::BlockStatus;
use crate::io::nand::{SectorBackend, STD_BUFFER_SIZE};

use super::alias::AliasBinding;
use super::crypt::{CryptPool, CryptScheme, FileCrypto};
use super::drive::{classify, DriveType, VirtualSource};
use super::fat::{FatFs, FatHandle, FileAttributes, FileInfo, OpenMode, FAT_DATE_EPOCH};
use super::mount::{ImageKind, MountContext};
use super::path;
use super::perm::{PermissionOracle, WriteGuard};
use super::vfile::{self, MemoryBus, VirtualFile, VirtualFlags, VirtualMedia};

/// Maximum number of open files
pub const MAX_OPEN_FILES: usize = 32;

/// Maximum number of `?` placeholders in [`VirtualFs::find_no_path`]
pub const MAX_PLACEHOLDERS: usize = 16;

/// File system status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum FsStatus {
    /// File not found
    NotFound = -1,
    /// Access denied
    AccessDenied = -2,
    /// File already exists
    AlreadyExists = -3,
    /// Not a directory
    NotDirectory = -4,
    /// Is a directory
    IsDirectory = -5,
    /// Directory not empty
    DirectoryNotEmpty = -6,
    /// Disk full
    DiskFull = -7,
    /// Invalid parameter
    InvalidParameter = -8,
    /// No more entries
    NoMoreEntries = -10,
    /// I/O error
    IoError = -13,
    /// Not mounted
    NotMounted = -15,
    /// Too many open files
    TooManyFiles = -16,
    /// Cross-device link
    CrossDevice = -18,
    /// Not supported
    NotSupported = -19,
    /// Invalid path
    InvalidPath = -20,
    /// Device busy
    DeviceBusy = -21,
    /// Invalid handle
    InvalidHandle = -22,
    /// Operation not possible on this drive or file
    Denied = -23,
    /// Aborted by the caller
    Cancelled = -24,
}

impl From<BlockStatus> for FsStatus {
    fn from(status: BlockStatus) -> Self {
        log::debug!("[VFS] backend error {:?}", status);
        FsStatus::IoError
    }
}

impl From<CryptoError> for FsStatus {
    fn from(err: CryptoError) -> Self {
        log::debug!("[VFS] crypto error {:?}", err);
        FsStatus::IoError
    }
}

/// Seek origin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SeekFrom {
    /// From beginning of file
    Start = 0,
    /// From current position
    Current = 1,
    /// From end of file
    End = 2,
}

/// Selection rule of [`VirtualFs::find_path`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindMode {
    /// First match in directory order
    First,
    /// Greatest matching name
    Highest,
    /// Smallest matching name
    Lowest,
}

/// Runtime parameters of the façade
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsConfig {
    /// Listing size limit
    pub max_dir_entries: usize,
    /// Virtual NAND files at least this large are written with their
    /// medium's FAT volumes unmounted
    pub force_unmount_threshold: u64,
    /// Buffer size for encrypted writes, copies and wipes
    pub crypt_chunk_size: usize,
    /// Leave entries with the hidden attribute out of listings
    pub hide_hidden: bool,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            max_dir_entries: 1024,
            force_unmount_threshold: 4 * 1024 * 1024,
            crypt_chunk_size: STD_BUFFER_SIZE,
            hide_hidden: false,
        }
    }
}

/// Façade file handle
pub type FileHandle = usize;

/// How an operation reaches its data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Virtual,
    Aliased,
    PlainFat,
}

impl Route {
    fn of(drv: DriveType) -> Result<Self, FsStatus> {
        if drv.contains(DriveType::VIRTUAL) {
            Ok(Route::Virtual)
        } else if drv.contains(DriveType::ALIAS) {
            Ok(Route::Aliased)
        } else if drv.contains(DriveType::FAT) {
            Ok(Route::PlainFat)
        } else {
            Err(FsStatus::NotFound)
        }
    }
}

#[derive(Debug)]
enum OpenFile {
    Virtual { file: VirtualFile, pos: u64, mode: OpenMode },
    Fat { fh: FatHandle, slot: Option<usize> },
}

/// Directory listing returned by [`VirtualFs::opendir`]
#[derive(Debug)]
pub struct DirReader {
    entries: vec::IntoIter<FileInfo>,
}

impl DirReader {
    /// Next entry, `NoMoreEntries` at the end
    pub fn readdir(&mut self) -> Result<FileInfo, FsStatus> {
        self.entries.next().ok_or(FsStatus::NoMoreEntries)
    }
}

impl Iterator for DirReader {
    type Item = FileInfo;

    fn next(&mut self) -> Option<FileInfo> {
        self.entries.next()
    }
}

fn media<'a, B: SectorBackend>(nand: &'a B, memory: &'a Option<Box<dyn MemoryBus>>) -> VirtualMedia<'a> {
    VirtualMedia { nand, memory: memory.as_deref() }
}

fn slot_prefix(slot: usize) -> String {
    alloc::format!("{}:", slot)
}

fn virtual_info(file: &VirtualFile) -> FileInfo {
    let mut attributes = FileAttributes::VIRTUAL;
    if file.is_dir() {
        attributes |= FileAttributes::DIRECTORY;
    }
    if file.flags.contains(VirtualFlags::READONLY) {
        attributes |= FileAttributes::READONLY;
    }
    FileInfo {
        name: file.name.clone(),
        size: file.size,
        attributes,
        fdate: FAT_DATE_EPOCH,
        ftime: 0,
    }
}

/// Medium flag of a virtual NAND source
fn nand_medium(source: VirtualSource) -> Option<DriveType> {
    match source {
        VirtualSource::SysNand => Some(DriveType::SYSNAND),
        VirtualSource::EmuNand => Some(DriveType::EMUNAND),
        VirtualSource::ImgNand => Some(DriveType::IMAGE),
        _ => None,
    }
}

const WRITE_MODES: OpenMode = OpenMode::WRITE
    .union(OpenMode::CREATE_NEW)
    .union(OpenMode::CREATE_ALWAYS)
    .union(OpenMode::OPEN_ALWAYS);

/// The unified file layer
pub struct VirtualFs<F: FatFs, B: SectorBackend> {
    ctx: MountContext,
    fat: F,
    nand: B,
    memory: Option<Box<dyn MemoryBus>>,
    engine: SharedEngine,
    guard: WriteGuard,
    crypt: CryptPool,
    config: FsConfig,
    handles: [Option<OpenFile>; MAX_OPEN_FILES],
}

impl<F: FatFs, B: SectorBackend> VirtualFs<F, B> {
    pub fn new(
        ctx: MountContext,
        fat: F,
        nand: B,
        engine: SharedEngine,
        oracle: Box<dyn PermissionOracle + Send>,
    ) -> Self {
        Self {
            ctx,
            fat,
            nand,
            memory: None,
            engine,
            guard: WriteGuard::new(oracle),
            crypt: CryptPool::new(),
            config: FsConfig::default(),
            handles: [const { None }; MAX_OPEN_FILES],
        }
    }

    pub fn with_config(mut self, config: FsConfig) -> Self {
        self.config = config;
        self
    }

    /// Serve `M:` from `bus`
    pub fn set_memory(&mut self, bus: Box<dyn MemoryBus>) {
        self.memory = Some(bus);
    }

    pub fn config(&self) -> &FsConfig {
        &self.config
    }

    pub fn context(&self) -> &MountContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut MountContext {
        &mut self.ctx
    }

    pub fn fat(&self) -> &F {
        &self.fat
    }

    pub fn fat_mut(&mut self) -> &mut F {
        &mut self.fat
    }

    pub fn backend(&self) -> &B {
        &self.nand
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.nand
    }

    pub fn guard_mut(&mut self) -> &mut WriteGuard {
        &mut self.guard
    }

    /// Drive type of `path` under the current mount state
    pub fn classify(&self, path: &str) -> DriveType {
        classify(path, &self.ctx)
    }

    /// Number of open façade handles
    pub fn open_count(&self) -> usize {
        self.handles.iter().flatten().count()
    }

    /// Number of crypto slots in use
    pub fn crypt_in_use(&self) -> usize {
        self.crypt.in_use()
    }

    // ---------------------------------------------------------------
    // Mount state
    // ---------------------------------------------------------------

    /// Mount numbered slot `slot`
    pub fn mount(&mut self, slot: usize) -> Result<(), FsStatus> {
        self.fat.mount_volume(slot)?;
        self.ctx.mount_slot(slot)?;
        log::info!("[VFS] mounted {}:", slot);
        Ok(())
    }

    /// Unmount `slot`, closing every façade handle on it
    pub fn unmount(&mut self, slot: usize) -> Result<(), FsStatus> {
        self.drop_handles_on(slot);
        let result = self.fat.unmount_volume(slot);
        self.ctx.unmount_slot(slot)?;
        log::info!("[VFS] unmounted {}:", slot);
        result
    }

    /// Mount an image file. A NAND image takes slots 7 to 9; whatever
    /// occupied them is unmounted first.
    pub fn mount_image(&mut self, kind: ImageKind, image_path: &str) -> Result<(), FsStatus> {
        if self.stat(image_path)?.is_directory() {
            return Err(FsStatus::IsDirectory);
        }
        self.unmount_image()?;
        for &slot in kind.slots() {
            if self.ctx.is_mounted(slot) {
                self.unmount(slot)?;
            }
        }
        self.ctx.set_image(kind, image_path);
        for &slot in kind.slots() {
            self.mount(slot)?;
        }
        Ok(())
    }

    pub fn unmount_image(&mut self) -> Result<(), FsStatus> {
        if let Some(kind) = self.ctx.image() {
            for &slot in kind.slots() {
                if self.ctx.is_mounted(slot) {
                    self.unmount(slot)?;
                }
            }
            self.ctx.clear_image();
        }
        Ok(())
    }

    fn drop_handles_on(&mut self, slot: usize) {
        for index in 0..MAX_OPEN_FILES {
            if let Some(OpenFile::Fat { slot: Some(s), .. }) = self.handles[index] {
                if s == slot {
                    log::warn!("[VFS] handle {} closed by unmount of {}:", index, slot);
                    self.handles[index] = None;
                    self.crypt.release(index);
                }
            }
        }
    }

    /// FAT slots on `medium` that a raw write would corrupt
    fn slots_on(&self, medium: DriveType) -> Vec<usize> {
        self.ctx
            .mounted_slots()
            .filter(|&slot| {
                let drv = classify(&slot_prefix(slot), &self.ctx);
                drv.contains(DriveType::FAT) && drv.intersects(medium)
            })
            .collect()
    }

    /// Medium whose volumes must be unmounted to write `file`
    fn unmount_medium(&self, file: &VirtualFile) -> Option<DriveType> {
        if file.size < self.config.force_unmount_threshold {
            return None;
        }
        nand_medium(file.source)
    }

    fn unmount_all(&mut self, medium: DriveType) -> Vec<usize> {
        let slots = self.slots_on(medium);
        for &slot in &slots {
            if let Err(status) = self.unmount(slot) {
                log::warn!("[VFS] unmount of {}: failed: {:?}", slot, status);
            }
        }
        slots
    }

    fn remount_all(&mut self, slots: &[usize]) {
        for &slot in slots {
            if let Err(status) = self.mount(slot) {
                log::warn!("[VFS] remount of {}: failed: {:?}", slot, status);
            }
        }
    }

    // ---------------------------------------------------------------
    // File operations
    // ---------------------------------------------------------------

    /// Open `path`. Any mode that may modify the file needs write permission.
    pub fn open(&mut self, path: &str, mode: OpenMode) -> Result<FileHandle, FsStatus> {
        let route = Route::of(classify(path, &self.ctx))?;
        if mode.intersects(WRITE_MODES) {
            self.guard.check(path, &self.ctx)?;
        }
        let index = self
            .handles
            .iter()
            .position(Option::is_none)
            .ok_or(FsStatus::TooManyFiles)?;

        let open = match route {
            Route::Virtual => {
                let file = vfile::resolve(path, &self.ctx, &media(&self.nand, &self.memory))?;
                if file.is_dir() {
                    return Err(FsStatus::IsDirectory);
                }
                if mode.contains(OpenMode::CREATE_NEW) {
                    return Err(FsStatus::AlreadyExists);
                }
                let pos = if mode.contains(OpenMode::OPEN_APPEND) { file.size } else { 0 };
                OpenFile::Virtual { file, pos, mode }
            }
            Route::Aliased | Route::PlainFat => {
                let real = self.ctx.aliases.dealias(path);
                let crypto = match route {
                    Route::Aliased => self
                        .ctx
                        .aliases
                        .lookup(path)
                        .and_then(|binding| binding.key_y)
                        .map(|key_y| FileCrypto::for_path(index, &path[2..], key_y)),
                    _ => None,
                };
                let fh = self.fat.open(&real, mode)?;
                if let Some(crypto) = crypto {
                    if let Err(status) = self.crypt.acquire(crypto) {
                        let _ = self.fat.close(fh);
                        return Err(status);
                    }
                }
                let slot = self.ctx.mounted_slot(&real);
                OpenFile::Fat { fh, slot }
            }
        };
        log::debug!("[VFS] open {} -> {} ({:?})", path, index, route);
        self.handles[index] = Some(open);
        Ok(index)
    }

    /// Close `handle`; its crypto slot is released even if the FAT driver
    /// reports an error.
    pub fn close(&mut self, handle: FileHandle) -> Result<(), FsStatus> {
        let open = self
            .handles
            .get_mut(handle)
            .and_then(Option::take)
            .ok_or(FsStatus::InvalidHandle)?;
        self.crypt.release(handle);
        match open {
            OpenFile::Virtual { .. } => Ok(()),
            OpenFile::Fat { fh, .. } => self.fat.close(fh),
        }
    }

    fn open_file(&mut self, handle: FileHandle) -> Result<&mut OpenFile, FsStatus> {
        self.handles
            .get_mut(handle)
            .and_then(Option::as_mut)
            .ok_or(FsStatus::InvalidHandle)
    }

    /// Read at the handle position
    pub fn read(&mut self, handle: FileHandle, buf: &mut [u8]) -> Result<usize, FsStatus> {
        let media = media(&self.nand, &self.memory);
        match self.handles.get_mut(handle).and_then(Option::as_mut) {
            None => Err(FsStatus::InvalidHandle),
            Some(OpenFile::Virtual { file, pos, .. }) => {
                let n = vfile::read(file, *pos, buf, &media)?;
                *pos += n as u64;
                Ok(n)
            }
            Some(OpenFile::Fat { fh, .. }) => {
                let fh = *fh;
                let offset = self.fat.tell(fh)?;
                let n = self.fat.read(fh, buf)?;
                if let Some(crypto) = self.crypt.find(handle) {
                    crypto.apply(&mut *self.engine.lock(), offset, &mut buf[..n])?;
                }
                Ok(n)
            }
        }
    }

    /// Write at the handle position
    pub fn write(&mut self, handle: FileHandle, buf: &[u8]) -> Result<usize, FsStatus> {
        match self.open_file(handle)? {
            OpenFile::Virtual { file, pos, mode } => {
                if !mode.contains(OpenMode::WRITE) {
                    return Err(FsStatus::AccessDenied);
                }
                let (file, start) = (file.clone(), *pos);
                let n = self.write_virtual(&file, start, buf)?;
                if let Some(OpenFile::Virtual { pos, .. }) = self.handles[handle].as_mut() {
                    *pos += n as u64;
                }
                Ok(n)
            }
            OpenFile::Fat { fh, .. } => {
                let fh = *fh;
                match self.crypt.find(handle).copied() {
                    None => self.fat.write(fh, buf),
                    Some(crypto) if crypto.scheme == CryptScheme::DsiWare => {
                        log::warn!("[VFS] writing DSiWare exports is not supported");
                        Err(FsStatus::Denied)
                    }
                    Some(crypto) => self.write_encrypted(fh, &crypto, buf),
                }
            }
        }
    }

    /// Raw write to a virtual file, bracketed by an unmount of the FAT
    /// volumes on its medium when the file is large
    fn write_virtual(&mut self, file: &VirtualFile, offset: u64, buf: &[u8]) -> Result<usize, FsStatus> {
        let unmounted = match self.unmount_medium(file) {
            Some(medium) => self.unmount_all(medium),
            None => Vec::new(),
        };
        let result = vfile::write(file, offset, buf, &media(&self.nand, &self.memory));
        self.remount_all(&unmounted);
        result
    }

    fn write_encrypted(&mut self, fh: FatHandle, crypto: &FileCrypto, buf: &[u8]) -> Result<usize, FsStatus> {
        let chunk = self.config.crypt_chunk_size.max(AES_BLOCK_SIZE).min(buf.len().max(1));
        let mut scratch = vec![0u8; chunk];
        let mut offset = self.fat.tell(fh)?;
        let mut total = 0;
        for part in buf.chunks(chunk) {
            let scratch = &mut scratch[..part.len()];
            scratch.copy_from_slice(part);
            crypto.apply(&mut *self.engine.lock(), offset, scratch)?;
            let n = self.fat.write(fh, scratch)?;
            total += n;
            offset += n as u64;
            if n < part.len() {
                break;
            }
        }
        Ok(total)
    }

    /// Move the handle position. Virtual files cannot be seeked past
    /// their end.
    pub fn seek(&mut self, handle: FileHandle, offset: i64, whence: SeekFrom) -> Result<u64, FsStatus> {
        let current = self.tell(handle)?;
        let size = self.size(handle)?;
        let base = match whence {
            SeekFrom::Start => 0,
            SeekFrom::Current => current as i64,
            SeekFrom::End => size as i64,
        };
        let target = base.checked_add(offset).ok_or(FsStatus::InvalidParameter)?;
        if target < 0 {
            return Err(FsStatus::InvalidParameter);
        }
        let target = target as u64;
        match self.open_file(handle)? {
            OpenFile::Virtual { file, pos, .. } => {
                if target > file.size {
                    return Err(FsStatus::Denied);
                }
                *pos = target;
            }
            OpenFile::Fat { fh, .. } => {
                let fh = *fh;
                self.fat.seek(fh, target)?;
            }
        }
        Ok(target)
    }

    pub fn tell(&self, handle: FileHandle) -> Result<u64, FsStatus> {
        match self.handles.get(handle).and_then(Option::as_ref) {
            None => Err(FsStatus::InvalidHandle),
            Some(OpenFile::Virtual { pos, .. }) => Ok(*pos),
            Some(OpenFile::Fat { fh, .. }) => self.fat.tell(*fh),
        }
    }

    pub fn size(&self, handle: FileHandle) -> Result<u64, FsStatus> {
        match self.handles.get(handle).and_then(Option::as_ref) {
            None => Err(FsStatus::InvalidHandle),
            Some(OpenFile::Virtual { file, .. }) => Ok(file.size),
            Some(OpenFile::Fat { fh, .. }) => self.fat.size(*fh),
        }
    }

    pub fn sync(&mut self, handle: FileHandle) -> Result<(), FsStatus> {
        match self.open_file(handle)? {
            OpenFile::Virtual { .. } => Ok(()),
            OpenFile::Fat { fh, .. } => {
                let fh = *fh;
                self.fat.sync(fh)
            }
        }
    }

    // ---------------------------------------------------------------
    // Path operations
    // ---------------------------------------------------------------

    pub fn stat(&self, path: &str) -> Result<FileInfo, FsStatus> {
        match Route::of(classify(path, &self.ctx))? {
            Route::Virtual => {
                let file = vfile::resolve(path, &self.ctx, &media(&self.nand, &self.memory))?;
                Ok(virtual_info(&file))
            }
            _ => self.fat.stat(&self.ctx.aliases.dealias(path)),
        }
    }

    /// Delete a file or an empty directory. Deleting a virtual file wipes
    /// it if that is allowed.
    pub fn unlink(&mut self, path: &str) -> Result<(), FsStatus> {
        let route = Route::of(classify(path, &self.ctx))?;
        self.guard.check(path, &self.ctx)?;
        match route {
            Route::Virtual => {
                let file = vfile::resolve(path, &self.ctx, &media(&self.nand, &self.memory))?;
                if !file.flags.contains(VirtualFlags::DELETABLE) {
                    return Err(FsStatus::Denied);
                }
                let unmounted = match self.unmount_medium(&file) {
                    Some(medium) => self.unmount_all(medium),
                    None => Vec::new(),
                };
                let chunk = self.config.crypt_chunk_size;
                let result = vfile::delete(&file, &media(&self.nand, &self.memory), chunk);
                self.remount_all(&unmounted);
                result
            }
            _ => self.fat.unlink(&self.ctx.aliases.dealias(path)),
        }
    }

    /// Rename within a plain FAT drive
    pub fn rename(&mut self, old: &str, new: &str) -> Result<(), FsStatus> {
        for path in [old, new] {
            if Route::of(classify(path, &self.ctx))? != Route::PlainFat {
                return Err(FsStatus::Denied);
            }
        }
        self.guard.check(old, &self.ctx)?;
        self.guard.check(new, &self.ctx)?;
        self.fat.rename(old, new)
    }

    pub fn mkdir(&mut self, path: &str) -> Result<(), FsStatus> {
        if Route::of(classify(path, &self.ctx))? == Route::Virtual {
            return Err(FsStatus::Denied);
        }
        self.guard.check_dir(path, &self.ctx)?;
        self.fat.mkdir(&self.ctx.aliases.dealias(path))
    }

    /// Entries of the directory at `path`
    pub fn read_dir(&self, path: &str) -> Result<Vec<FileInfo>, FsStatus> {
        match Route::of(classify(path, &self.ctx))? {
            Route::Virtual => {
                let media = media(&self.nand, &self.memory);
                if !vfile::resolve(path, &self.ctx, &media)?.is_dir() {
                    return Err(FsStatus::NotDirectory);
                }
                Ok(vfile::list(path, &self.ctx, &media)?.iter().map(virtual_info).collect())
            }
            _ => self.fat.read_dir(&self.ctx.aliases.dealias(path)),
        }
    }

    pub fn opendir(&self, path: &str) -> Result<DirReader, FsStatus> {
        Ok(DirReader { entries: self.read_dir(path)?.into_iter() })
    }

    // ---------------------------------------------------------------
    // Convenience operations
    // ---------------------------------------------------------------

    /// Read exactly `buf.len()` bytes at `offset` of `path`
    pub fn qread(&mut self, path: &str, buf: &mut [u8], offset: u64) -> Result<(), FsStatus> {
        let handle = self.open(path, OpenMode::READ)?;
        let result = self
            .seek(handle, offset as i64, SeekFrom::Start)
            .and_then(|_| self.read(handle, buf));
        let closed = self.close(handle);
        match result? {
            n if n == buf.len() => closed,
            _ => Err(FsStatus::Denied),
        }
    }

    /// Write all of `buf` at `offset` of `path`, creating the file if needed
    pub fn qwrite(&mut self, path: &str, buf: &[u8], offset: u64) -> Result<(), FsStatus> {
        let handle = self.open(path, OpenMode::WRITE | OpenMode::OPEN_ALWAYS)?;
        let result = self
            .seek(handle, offset as i64, SeekFrom::Start)
            .and_then(|_| self.write(handle, buf));
        let closed = self.close(handle);
        match result? {
            n if n == buf.len() => closed,
            _ => Err(FsStatus::Denied),
        }
    }

    /// Size of `path`, 0 if it cannot be stat'ed
    pub fn qsize(&self, path: &str) -> u64 {
        self.stat(path).map_or(0, |info| info.size)
    }

    /// Create `path` and any missing parents
    pub fn rmkdir(&mut self, path: &str) -> Result<(), FsStatus> {
        let (_, rest) = path::split_drive(path).ok_or(FsStatus::InvalidPath)?;
        if path::is_drive_root(rest) {
            return Ok(());
        }
        match self.stat(path) {
            Ok(info) if info.is_directory() => return Ok(()),
            Ok(_) => return Err(FsStatus::AlreadyExists),
            Err(_) => {}
        }
        if let Some(parent) = path::parent(path.trim_end_matches('/')) {
            self.rmkdir(parent)?;
        }
        self.mkdir(path)
    }

    /// Create the parent directories of the file `path`
    pub fn rmkpath(&mut self, path: &str) -> Result<(), FsStatus> {
        match path::parent(path) {
            Some(parent) => self.rmkdir(parent),
            None => Err(FsStatus::InvalidPath),
        }
    }

    /// Delete `path` and, for a directory, everything below it
    pub fn runlink(&mut self, path: &str) -> Result<(), FsStatus> {
        if self.stat(path)?.is_directory() {
            for entry in self.read_dir(path)? {
                self.runlink(&path::join(path, &entry.name))?;
            }
        }
        self.unlink(path)
    }

    /// Copy `src` to `dst`. `progress(done, total)` returning false aborts
    /// the copy with `Cancelled`.
    pub fn copy_file(
        &mut self,
        src: &str,
        dst: &str,
        progress: &mut dyn FnMut(u64, u64) -> bool,
    ) -> Result<(), FsStatus> {
        let src_drv = classify(src, &self.ctx);
        let dst_route = Route::of(classify(dst, &self.ctx))?;
        self.guard.check(dst, &self.ctx)?;

        let mut unmounted = Vec::new();
        if dst_route == Route::Virtual {
            let file = vfile::resolve(dst, &self.ctx, &media(&self.nand, &self.memory))?;
            if let Some(medium) = self.unmount_medium(&file) {
                if src_drv.contains(DriveType::FAT) && src_drv.intersects(medium) {
                    log::warn!("[VFS] cannot copy {} onto its own medium", src);
                    return Err(FsStatus::Denied);
                }
                unmounted = self.unmount_all(medium);
            }
        }
        let result = self.copy_inner(src, dst, dst_route, progress);
        self.remount_all(&unmounted);
        result
    }

    fn copy_inner(
        &mut self,
        src: &str,
        dst: &str,
        dst_route: Route,
        progress: &mut dyn FnMut(u64, u64) -> bool,
    ) -> Result<(), FsStatus> {
        let src_handle = self.open(src, OpenMode::READ)?;
        let dst_handle = match self.open(dst, OpenMode::WRITE | OpenMode::CREATE_ALWAYS) {
            Ok(handle) => handle,
            Err(status) => {
                let _ = self.close(src_handle);
                return Err(status);
            }
        };

        let result = self.copy_data(src_handle, dst_handle, progress);
        let closed_src = self.close(src_handle);
        let closed_dst = self.close(dst_handle);

        if result.is_err() && dst_route != Route::Virtual {
            if let Err(status) = self.unlink(dst) {
                log::warn!("[VFS] partial copy {} left behind: {:?}", dst, status);
            }
        }
        result.and(closed_src).and(closed_dst)
    }

    fn copy_data(
        &mut self,
        src: FileHandle,
        dst: FileHandle,
        progress: &mut dyn FnMut(u64, u64) -> bool,
    ) -> Result<(), FsStatus> {
        let total = self.size(src)?;
        let chunk = (self.config.crypt_chunk_size as u64).min(total).max(1) as usize;
        let mut buf = vec![0u8; chunk];
        let mut done = 0u64;
        while done < total {
            let want = chunk.min((total - done) as usize);
            let n = self.read(src, &mut buf[..want])?;
            if n != want || self.write(dst, &buf[..n])? != n {
                return Err(FsStatus::Denied);
            }
            done += n as u64;
            if !progress(done, total) {
                log::info!("[VFS] copy cancelled at {}/{}", done, total);
                return Err(FsStatus::Cancelled);
            }
        }
        Ok(())
    }

    /// Path of the entry matching the wildcard file name of `pattern`
    pub fn find_path(&self, pattern: &str, mode: FindMode) -> Result<String, FsStatus> {
        let dir = path::parent(pattern).ok_or(FsStatus::InvalidPath)?;
        let name_pattern = path::file_name(pattern);
        let mut matches = self
            .read_dir(dir)?
            .into_iter()
            .map(|entry| entry.name)
            .filter(|name| path::match_name(name_pattern, name));
        let found = match mode {
            FindMode::First => matches.next(),
            FindMode::Highest => matches.max(),
            FindMode::Lowest => matches.min(),
        };
        found
            .map(|name| path::join(dir, &name))
            .ok_or(FsStatus::NotFound)
    }

    /// First path from `pattern` that does not exist yet; the `?`
    /// placeholders of the file name are counted up as decimal digits.
    pub fn find_no_path(&self, pattern: &str) -> Result<String, FsStatus> {
        let name_start = pattern.rfind('/').map(|at| at + 1).ok_or(FsStatus::Denied)?;
        let slots: Vec<usize> = pattern
            .bytes()
            .enumerate()
            .skip(name_start)
            .filter(|&(_, b)| b == b'?')
            .map(|(i, _)| i)
            .collect();
        if slots.len() >= MAX_PLACEHOLDERS {
            return Err(FsStatus::InvalidParameter);
        }

        let mut candidate = pattern.as_bytes().to_vec();
        let limit = 10u64.pow(slots.len() as u32);
        for mut n in 0..limit {
            for &at in slots.iter().rev() {
                candidate[at] = b'0' + (n % 10) as u8;
                n /= 10;
            }
            let path = core::str::from_utf8(&candidate).map_err(|_| FsStatus::InvalidPath)?;
            match self.stat(path) {
                Err(FsStatus::NotFound) => return Ok(String::from(path)),
                Err(status) => return Err(status),
                Ok(_) => {}
            }
        }
        Err(FsStatus::AlreadyExists)
    }

    // ---------------------------------------------------------------
    // Alias drives and search
    // ---------------------------------------------------------------

    /// Bind alias slot `num` to the SD data folder of a console.
    ///
    /// Key Y comes from `movable_path`; the folder is
    /// `<sd_path>/<id0>/<first id1>`. The slot is cleared first, so a
    /// failure leaves it unbound.
    pub fn mount_sd_data(&mut self, num: usize, drive: u8, sd_path: &str, movable_path: &str) -> Result<(), FsStatus> {
        self.unbind_alias(num)?;
        let mut key_y = [0u8; 16];
        self.qread(movable_path, &mut key_y, MOVABLE_KEY_Y_OFFSET)?;

        let id0_path = path::join(sd_path, &id0_from_key_y(&key_y));
        let id1 = self
            .read_dir(&id0_path)?
            .into_iter()
            .find(|entry| entry.is_directory() && is_id1_name(&entry.name))
            .ok_or(FsStatus::NotFound)?;

        let base = path::join(&id0_path, &id1.name);
        self.ctx.aliases.bind(num, Some(AliasBinding { drive, base, key_y: Some(key_y) }))
    }

    /// Bind alias slot `num` without encryption
    pub fn bind_alias(&mut self, num: usize, drive: u8, base: &str) -> Result<(), FsStatus> {
        let binding = AliasBinding { drive, base: String::from(base), key_y: None };
        self.ctx.aliases.bind(num, Some(binding))
    }

    pub fn unbind_alias(&mut self, num: usize) -> Result<(), FsStatus> {
        self.ctx.aliases.bind(num, None)
    }

    /// Store the search shown on `Z:`
    pub fn set_search(&mut self, pattern: &str, base: &str) {
        self.ctx.set_search(pattern, base);
    }

    pub fn clear_search(&mut self) {
        self.ctx.clear_search();
    }

    // ---------------------------------------------------------------
    // Space
    // ---------------------------------------------------------------

    pub fn total_space(&self, drive: &str) -> u64 {
        let drv = classify(drive, &self.ctx);
        if drv.contains(DriveType::VIRTUAL) {
            vfile::resolve(drive, &self.ctx, &media(&self.nand, &self.memory)).map_or(0, |root| root.size)
        } else if drv.contains(DriveType::FAT) {
            self.fat.total_space(&self.ctx.aliases.dealias(drive))
        } else {
            0
        }
    }

    /// Label of a FAT volume
    pub fn volume_label(&self, drive: &str) -> Option<String> {
        if !classify(drive, &self.ctx).contains(DriveType::FAT) {
            return None;
        }
        self.fat.volume_label(&self.ctx.aliases.dealias(drive))
    }

    pub fn free_space(&self, drive: &str) -> u64 {
        let drv = classify(drive, &self.ctx);
        if drv.contains(DriveType::FAT) {
            self.fat.free_space(&self.ctx.aliases.dealias(drive))
        } else {
            0
        }
    }
}
