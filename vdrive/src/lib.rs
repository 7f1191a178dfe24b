//! vdrive
//!
//! Virtual drive layer for a handheld's NAND and SD storage. Paths like
//! `S:/firm0.bin` or `A:/private/movable.sed` are classified, resolved to a
//! medium and served with on-the-fly AES, next to ordinary FAT volumes.
//!
//! - **io** - sector devices and the NAND backend
//! - **crypto** - AES engine seam, SD data hashing
//! - **fs** - drive classifier, virtual files, file façade, listings

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod crypto;
pub mod fs;
pub mod io;

pub use fs::{FsStatus, MountContext, VirtualFs};
