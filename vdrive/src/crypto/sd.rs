//! SD data hashing
//!
//! Files below `Nintendo 3DS/<id0>/<id1>` on the SD card are AES-CTR
//! encrypted with a per-file counter derived from the file's own path, and
//! the `id0` directory name is derived from the console's SD key Y.

use alloc::string::String;
use alloc::vec::Vec;
use sha2::{Digest, Sha256};

/// Offset of key Y inside `movable.sed`
pub const MOVABLE_KEY_Y_OFFSET: u64 = 0x110;

/// Length of an `id1` directory name
pub const ID1_LEN: usize = 32;

/// Counter for an SD data file.
///
/// `suffix` is the path below the `<id0>/<id1>` directory, starting with
/// `/`. It is hashed lower-cased as UTF-16LE including the terminating NUL;
/// the two digest halves are folded together.
pub fn sd_path_ctr(suffix: &str) -> [u8; 16] {
    let utf16: Vec<u8> = suffix
        .bytes()
        .map(|b| b.to_ascii_lowercase())
        .chain(core::iter::once(0))
        .flat_map(|b| [b, 0])
        .collect();

    let hash = Sha256::digest(&utf16);
    let mut ctr = [0u8; 16];
    for (i, c) in ctr.iter_mut().enumerate() {
        *c = hash[i] ^ hash[i + 16];
    }
    ctr
}

/// `id0` directory name for an SD key Y.
///
/// The first 16 bytes of SHA-256(key Y) are printed as four little-endian
/// 32-bit words in upper-case hex.
pub fn id0_from_key_y(key_y: &[u8; 16]) -> String {
    let hash = Sha256::digest(key_y);
    let mut words = [0u8; 16];
    for (dst, src) in words.chunks_mut(4).zip(hash[..16].chunks(4)) {
        for (d, s) in dst.iter_mut().zip(src.iter().rev()) {
            *d = *s;
        }
    }
    hex::encode_upper(words)
}

/// Whether a directory name looks like an `id1`
pub fn is_id1_name(name: &str) -> bool {
    name.len() == ID1_LEN
}
