//! File System Layer
//!
//! Drive classification, virtual files and the file façade on top of a
//! FAT driver.
//!
//! # Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  VirtualFs (vfs) + dir                      │
//! └─────────────────────────────────────────────────────────────┘
//!          │                   │                   │
//!          ▼                   ▼                   ▼
//! ┌─────────────────┐ ┌─────────────────┐ ┌─────────────────┐
//! │  drive / perm   │ │  alias / crypt  │ │      vfile      │
//! │  (classify)     │ │  (SD data)      │ │  (NAND, memory) │
//! └─────────────────┘ └─────────────────┘ └─────────────────┘
//!                              │                   │
//!                              ▼                   ▼
//! ┌─────────────────────────────────┐ ┌─────────────────────────┐
//! │          FatFs (fat)            │ │   SectorBackend (io)    │
//! └─────────────────────────────────┘ └─────────────────────────┘
//! ```
//!
//! # Drives
//! - `0:` to `9:` numbered FAT volumes (SD card, NAND partitions, images)
//! - `A:`, `B:` alias drives for the SD data folders
//! - `S:`, `E:`, `I:`, `X:`, `M:` virtual drives
//! - `Z:` results of the last search

pub mod alias;
pub mod crypt;
pub mod dir;
pub mod drive;
pub mod fat;
pub mod memfat;
pub mod mount;
pub mod path;
pub mod perm;
pub mod vfile;
pub mod vfs;

pub use dir::{get_dir_contents, DirEntry, DirStruct, EntryType};
pub use drive::{classify, DriveType};
pub use fat::{FatFs, FileAttributes, FileInfo, OpenMode};
pub use memfat::MemFat;
pub use mount::{ConsoleType, ImageKind, MountContext};
pub use perm::{Permission, PermissionOracle};
pub use vfs::{FindMode, FsConfig, FsStatus, SeekFrom, VirtualFs};
