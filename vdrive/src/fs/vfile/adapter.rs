//! Byte range to sector translation
//!
//! ```text
//!   byte range      |----[=======================]-----|
//!   sectors     |  head  |  middle  |  middle  |  tail  |
//!                  ^ staged                       ^ staged
//! ```
//!
//! The sector backend only moves whole sectors. A range that starts or ends
//! inside a sector goes through one scratch sector; partial writes read
//! that sector first and write it back patched. Aligned middles are passed
//! to the backend in one call.

use crate::io::block::{BlockStatus, SECTOR_SIZE};
use crate::io::nand::{NandSource, SectorBackend};

const SECTOR: u64 = SECTOR_SIZE as u64;

/// Read `buf.len()` bytes at byte `pos` of `src`
pub fn read_bytes(
    backend: &dyn SectorBackend,
    src: NandSource,
    keyslot: u8,
    pos: u64,
    buf: &mut [u8],
) -> Result<(), BlockStatus> {
    let mut scratch = [0u8; SECTOR_SIZE];
    let mut pos = pos;
    let mut done = 0;

    let skip = (pos % SECTOR) as usize;
    if skip != 0 && !buf.is_empty() {
        let n = (SECTOR_SIZE - skip).min(buf.len());
        backend.read_sectors(src, pos / SECTOR, keyslot, &mut scratch)?;
        buf[..n].copy_from_slice(&scratch[skip..skip + n]);
        pos += n as u64;
        done = n;
    }

    let middle = (buf.len() - done) / SECTOR_SIZE * SECTOR_SIZE;
    if middle > 0 {
        backend.read_sectors(src, pos / SECTOR, keyslot, &mut buf[done..done + middle])?;
        pos += middle as u64;
        done += middle;
    }

    let tail = buf.len() - done;
    if tail > 0 {
        backend.read_sectors(src, pos / SECTOR, keyslot, &mut scratch)?;
        buf[done..].copy_from_slice(&scratch[..tail]);
    }
    Ok(())
}

/// Write `buf` at byte `pos` of `dst`
pub fn write_bytes(
    backend: &dyn SectorBackend,
    dst: NandSource,
    keyslot: u8,
    pos: u64,
    buf: &[u8],
) -> Result<(), BlockStatus> {
    let mut scratch = [0u8; SECTOR_SIZE];
    let mut pos = pos;
    let mut done = 0;

    let skip = (pos % SECTOR) as usize;
    if skip != 0 && !buf.is_empty() {
        let n = (SECTOR_SIZE - skip).min(buf.len());
        let sector = pos / SECTOR;
        backend.read_sectors(dst, sector, keyslot, &mut scratch)?;
        scratch[skip..skip + n].copy_from_slice(&buf[..n]);
        backend.write_sectors(dst, sector, keyslot, &scratch)?;
        pos += n as u64;
        done = n;
    }

    let middle = (buf.len() - done) / SECTOR_SIZE * SECTOR_SIZE;
    if middle > 0 {
        backend.write_sectors(dst, pos / SECTOR, keyslot, &buf[done..done + middle])?;
        pos += middle as u64;
        done += middle;
    }

    let tail = buf.len() - done;
    if tail > 0 {
        let sector = pos / SECTOR;
        backend.read_sectors(dst, sector, keyslot, &mut scratch)?;
        scratch[..tail].copy_from_slice(&buf[done..]);
        backend.write_sectors(dst, sector, keyslot, &scratch)?;
    }
    Ok(())
}
