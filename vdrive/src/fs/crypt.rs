//! Per-file crypto contexts for alias drives.
//!
//! Files opened through an alias drive with a key Y get one slot of a
//! fixed pool. The slot is keyed by the façade handle and released on
//! close no matter how the handle is closed.

use crate::crypto::{ctr_crypt_at, AesEngine, CryptoError, CtrMode, KEYSLOT_SD};
use crate::crypto::sd::sd_path_ctr;

use super::vfs::FsStatus;

/// Number of per-file crypto slots
pub const NUM_FILE_CRYPTO: usize = 16;

/// Marker folder for exported DSiWare (must be exactly 16 chars)
pub const DSIWARE_MAGIC: &str = "Nintendo DSiWare";

/// How the content of a file is protected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptScheme {
    /// AES-CTR over the whole file, counter from the path
    SdCtr,
    /// Exported DSiWare container, passed through raw and never written
    DsiWare,
}

/// Crypto state of one open file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileCrypto {
    pub handle: usize,
    pub ctr: [u8; 16],
    pub key_y: [u8; 16],
    pub scheme: CryptScheme,
}

impl FileCrypto {
    /// Context for `suffix`, the path after the alias drive prefix
    pub fn for_path(handle: usize, suffix: &str, key_y: [u8; 16]) -> Self {
        let dsiware = suffix
            .strip_prefix('/')
            .map_or(false, |rest| rest.starts_with(DSIWARE_MAGIC));
        if dsiware {
            Self { handle, ctr: [0; 16], key_y, scheme: CryptScheme::DsiWare }
        } else {
            Self { handle, ctr: sd_path_ctr(suffix), key_y, scheme: CryptScheme::SdCtr }
        }
    }

    /// En-/decrypt `data` found at byte `offset` of the file. DSiWare data
    /// is left untouched.
    pub fn apply(&self, engine: &mut dyn AesEngine, offset: u64, data: &mut [u8]) -> Result<(), CryptoError> {
        if self.scheme == CryptScheme::DsiWare {
            return Ok(());
        }
        engine.set_key_y(KEYSLOT_SD, &self.key_y)?;
        ctr_crypt_at(engine, KEYSLOT_SD, &self.ctr, CtrMode::Ctr, offset, data)
    }
}

/// Fixed pool of [`FileCrypto`] slots
#[derive(Debug)]
pub struct CryptPool {
    slots: [Option<FileCrypto>; NUM_FILE_CRYPTO],
}

impl Default for CryptPool {
    fn default() -> Self {
        Self::new()
    }
}

impl CryptPool {
    pub const fn new() -> Self {
        Self { slots: [None; NUM_FILE_CRYPTO] }
    }

    /// Store `crypto` in the first free slot. A slot still held by the same
    /// handle is reused.
    pub fn acquire(&mut self, crypto: FileCrypto) -> Result<(), FsStatus> {
        self.release(crypto.handle);
        let slot = self
            .slots
            .iter_mut()
            .find(|slot| slot.is_none())
            .ok_or(FsStatus::TooManyFiles)?;
        *slot = Some(crypto);
        Ok(())
    }

    pub fn find(&self, handle: usize) -> Option<&FileCrypto> {
        self.slots.iter().flatten().find(|c| c.handle == handle)
    }

    pub fn release(&mut self, handle: usize) {
        for slot in self.slots.iter_mut() {
            if slot.map_or(false, |c| c.handle == handle) {
                *slot = None;
            }
        }
    }

    /// Number of slots in use
    pub fn in_use(&self) -> usize {
        self.slots.iter().flatten().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SoftAes;

    #[test]
    fn test_scheme_from_path() {
        let c = FileCrypto::for_path(0, "/Nintendo DSiWare/00000000.bin", [0; 16]);
        assert_eq!(c.scheme, CryptScheme::DsiWare);
        let c = FileCrypto::for_path(0, "/title/00040000/x.sav", [0; 16]);
        assert_eq!(c.scheme, CryptScheme::SdCtr);
        assert_eq!(c.ctr, sd_path_ctr("/title/00040000/x.sav"));
        // the magic is matched case-sensitively
        let c = FileCrypto::for_path(0, "/nintendo dsiware/x", [0; 16]);
        assert_eq!(c.scheme, CryptScheme::SdCtr);
    }

    #[test]
    fn test_pool_capacity() {
        let mut pool = CryptPool::new();
        for handle in 0..NUM_FILE_CRYPTO {
            pool.acquire(FileCrypto::for_path(handle, "/a", [1; 16])).unwrap();
        }
        assert_eq!(
            pool.acquire(FileCrypto::for_path(99, "/a", [1; 16])),
            Err(FsStatus::TooManyFiles)
        );
        // the first entries are untouched
        assert_eq!(pool.in_use(), NUM_FILE_CRYPTO);
        assert!(pool.find(0).is_some());
        assert!(pool.find(99).is_none());

        // reacquiring a held handle does not need a free slot
        pool.acquire(FileCrypto::for_path(3, "/b", [2; 16])).unwrap();
        assert_eq!(pool.find(3).map(|c| c.key_y), Some([2; 16]));
    }

    #[test]
    fn test_release_any_order() {
        let mut pool = CryptPool::new();
        for handle in [5, 1, 9, 2] {
            pool.acquire(FileCrypto::for_path(handle, "/f", [0; 16])).unwrap();
        }
        for handle in [9, 5, 2, 1] {
            pool.release(handle);
            assert!(pool.find(handle).is_none());
        }
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn test_apply_is_symmetric() {
        let mut engine = SoftAes::new();
        engine.set_key_x(KEYSLOT_SD, &[0x5A; 16]).unwrap();
        let crypto = FileCrypto::for_path(0, "/dbs/title.db", [0x33; 16]);

        let plain: [u8; 40] = core::array::from_fn(|i| i as u8);
        let mut data = plain;
        crypto.apply(&mut engine, 7, &mut data).unwrap();
        assert_ne!(data, plain);
        crypto.apply(&mut engine, 7, &mut data).unwrap();
        assert_eq!(data, plain);

        let raw = FileCrypto::for_path(0, "/Nintendo DSiWare/x.bin", [0x33; 16]);
        raw.apply(&mut engine, 0, &mut data).unwrap();
        assert_eq!(data, plain);
    }
}
