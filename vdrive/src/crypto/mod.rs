//! AES Engine Interface
//!
//! The console's AES unit is addressed by keyslot. NAND partitions and SD
//! data files are AES-CTR streams; the virtual layer only ever asks for a
//! keystream XOR at a counter, so that is all the engine has to provide.
//!
//! Keyslots at or above [`KEYSLOT_LIMIT`] (in practice [`KEYSLOT_NONE`])
//! mean "stored in the clear" and never reach the engine.

pub mod sd;
pub mod soft;

use alloc::sync::Arc;
use spin::Mutex;

pub use soft::SoftAes;

/// AES block size
pub const AES_BLOCK_SIZE: usize = 16;

/// Keyslot marker for unencrypted regions
pub const KEYSLOT_NONE: u8 = 0xFF;

/// First keyslot value that is not a real keyslot
pub const KEYSLOT_LIMIT: u8 = 0x40;

/// TWL NAND partitions (DSi mode)
pub const KEYSLOT_TWLNAND: u8 = 0x03;

/// New console CTR NAND partition
pub const KEYSLOT_CTRNAND_N3DS: u8 = 0x05;

/// SD card data under `Nintendo 3DS/<id0>/<id1>`
pub const KEYSLOT_SD: u8 = 0x34;

/// Whether data under `keyslot` is encrypted at all
pub fn uses_crypto(keyslot: u8) -> bool {
    keyslot < KEYSLOT_LIMIT
}

/// Counter layout of a keystream request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtrMode {
    /// Big-endian counter, natural byte order
    Ctr,
    /// DSi mode: every 16-byte block is processed byte-reversed
    Twl,
}

impl CtrMode {
    pub fn for_keyslot(keyslot: u8) -> Self {
        if keyslot == KEYSLOT_TWLNAND {
            CtrMode::Twl
        } else {
            CtrMode::Ctr
        }
    }
}

/// Crypto engine status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CryptoError {
    /// Keyslot has no normal key
    NoKey = 1,
    /// Keyslot out of range
    InvalidKeyslot = 2,
}

/// Keyslot based AES-CTR engine.
pub trait AesEngine: Send {
    /// Whether `keyslot` currently holds a usable key
    fn has_key(&self, keyslot: u8) -> bool;

    /// Load key Y into `keyslot`, regenerating its normal key
    fn set_key_y(&mut self, keyslot: u8, key_y: &[u8; 16]) -> Result<(), CryptoError>;

    /// XOR the keystream starting at block counter `ctr` into `data`.
    /// A trailing partial block consumes part of one keystream block.
    fn ctr_crypt(
        &mut self,
        keyslot: u8,
        ctr: &[u8; 16],
        mode: CtrMode,
        data: &mut [u8],
    ) -> Result<(), CryptoError>;
}

/// Engine handle shared between the NAND backend and the file façade
pub type SharedEngine = Arc<Mutex<dyn AesEngine>>;

pub fn share<E: AesEngine + 'static>(engine: E) -> SharedEngine {
    Arc::new(Mutex::new(engine))
}

/// Add `blocks` to a 128-bit big-endian counter
pub fn add_ctr(ctr: &mut [u8; 16], blocks: u64) {
    let value = u128::from_be_bytes(*ctr).wrapping_add(blocks as u128);
    *ctr = value.to_be_bytes();
}

/// Apply the keystream for byte position `offset` of a stream whose first
/// block uses `base_ctr`.
pub fn ctr_crypt_at(
    engine: &mut dyn AesEngine,
    keyslot: u8,
    base_ctr: &[u8; 16],
    mode: CtrMode,
    offset: u64,
    data: &mut [u8],
) -> Result<(), CryptoError> {
    let mut ctr = *base_ctr;
    add_ctr(&mut ctr, offset / AES_BLOCK_SIZE as u64);

    let skip = (offset % AES_BLOCK_SIZE as u64) as usize;
    let mut head = 0;
    if skip != 0 {
        head = (AES_BLOCK_SIZE - skip).min(data.len());
        let mut block = [0u8; AES_BLOCK_SIZE];
        block[skip..skip + head].copy_from_slice(&data[..head]);
        engine.ctr_crypt(keyslot, &ctr, mode, &mut block)?;
        data[..head].copy_from_slice(&block[skip..skip + head]);
        add_ctr(&mut ctr, 1);
    }

    let rest = &mut data[head..];
    if !rest.is_empty() {
        engine.ctr_crypt(keyslot, &ctr, mode, rest)?;
    }
    Ok(())
}
