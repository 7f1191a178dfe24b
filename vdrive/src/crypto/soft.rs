//! Software AES engine
//!
//! Keyslot table plus the console key scramblers, backed by the `aes`
//! crate. Used when the hardware engine is not reachable (tools, tests).

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes128;

use super::{AesEngine, CryptoError, CtrMode, AES_BLOCK_SIZE, KEYSLOT_LIMIT};

/// Number of keyslots
pub const NUM_KEYSLOTS: usize = KEYSLOT_LIMIT as usize;

/// Keyslots below this use the DSi key scrambler
const TWL_KEYSLOT_END: u8 = 0x04;

const CTR_SCRAMBLER: u128 = 0x1FF9_E9AA_C5FE_0408_0245_91DC_5D52_768A;
const TWL_SCRAMBLER: u128 = 0xFFFE_FB4E_2959_0258_2A68_0F5F_1A4F_3E79;

#[derive(Debug, Clone, Copy)]
struct KeySlot {
    key_x: Option<[u8; 16]>,
    key_y: Option<[u8; 16]>,
    normal: Option<[u8; 16]>,
}

impl KeySlot {
    const EMPTY: Self = Self { key_x: None, key_y: None, normal: None };
}

/// Normal key for a console keyslot
fn scramble_ctr(key_x: &[u8; 16], key_y: &[u8; 16]) -> [u8; 16] {
    let x = u128::from_be_bytes(*key_x);
    let y = u128::from_be_bytes(*key_y);
    (x.rotate_left(2) ^ y)
        .wrapping_add(CTR_SCRAMBLER)
        .rotate_left(87)
        .to_be_bytes()
}

/// Normal key for a DSi keyslot; X and Y are little-endian words there
fn scramble_twl(key_x: &[u8; 16], key_y: &[u8; 16]) -> [u8; 16] {
    let x = u128::from_le_bytes(*key_x);
    let y = u128::from_le_bytes(*key_y);
    (x ^ y).wrapping_add(TWL_SCRAMBLER).rotate_left(42).to_be_bytes()
}

pub struct SoftAes {
    slots: [KeySlot; NUM_KEYSLOTS],
}

impl SoftAes {
    pub fn new() -> Self {
        Self { slots: [KeySlot::EMPTY; NUM_KEYSLOTS] }
    }

    fn slot_mut(&mut self, keyslot: u8) -> Result<&mut KeySlot, CryptoError> {
        self.slots
            .get_mut(keyslot as usize)
            .ok_or(CryptoError::InvalidKeyslot)
    }

    /// Install a normal key directly
    pub fn set_normal_key(&mut self, keyslot: u8, key: [u8; 16]) {
        if let Ok(slot) = self.slot_mut(keyslot) {
            slot.normal = Some(key);
        }
    }

    /// Load key X; the normal key is derived once key Y is known
    pub fn set_key_x(&mut self, keyslot: u8, key_x: &[u8; 16]) -> Result<(), CryptoError> {
        let slot = self.slot_mut(keyslot)?;
        slot.key_x = Some(*key_x);
        Self::derive(keyslot, slot);
        Ok(())
    }

    fn derive(keyslot: u8, slot: &mut KeySlot) {
        if let (Some(x), Some(y)) = (slot.key_x, slot.key_y) {
            slot.normal = Some(if keyslot < TWL_KEYSLOT_END {
                scramble_twl(&x, &y)
            } else {
                scramble_ctr(&x, &y)
            });
        }
    }
}

impl Default for SoftAes {
    fn default() -> Self {
        Self::new()
    }
}

impl AesEngine for SoftAes {
    fn has_key(&self, keyslot: u8) -> bool {
        self.slots
            .get(keyslot as usize)
            .map_or(false, |slot| slot.normal.is_some())
    }

    fn set_key_y(&mut self, keyslot: u8, key_y: &[u8; 16]) -> Result<(), CryptoError> {
        let slot = self.slot_mut(keyslot)?;
        slot.key_y = Some(*key_y);
        Self::derive(keyslot, slot);
        Ok(())
    }

    fn ctr_crypt(
        &mut self,
        keyslot: u8,
        ctr: &[u8; 16],
        mode: CtrMode,
        data: &mut [u8],
    ) -> Result<(), CryptoError> {
        let key = self
            .slots
            .get(keyslot as usize)
            .ok_or(CryptoError::InvalidKeyslot)?
            .normal
            .ok_or(CryptoError::NoKey)?;
        let cipher = Aes128::new(GenericArray::from_slice(&key));

        let mut counter = u128::from_be_bytes(*ctr);
        for chunk in data.chunks_mut(AES_BLOCK_SIZE) {
            let mut block: aes::Block = GenericArray::clone_from_slice(&counter.to_be_bytes());
            cipher.encrypt_block(&mut block);
            if mode == CtrMode::Twl {
                block.reverse();
            }
            for (byte, pad) in chunk.iter_mut().zip(block.iter()) {
                *byte ^= pad;
            }
            counter = counter.wrapping_add(1);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ctr_is_involution() {
        let mut aes = SoftAes::new();
        aes.set_normal_key(0x04, [7u8; 16]);
        let plain: [u8; 40] = core::array::from_fn(|i| i as u8);
        let mut data = plain;
        aes.ctr_crypt(0x04, &[0u8; 16], CtrMode::Ctr, &mut data).unwrap();
        assert_ne!(data, plain);
        aes.ctr_crypt(0x04, &[0u8; 16], CtrMode::Ctr, &mut data).unwrap();
        assert_eq!(data, plain);
    }

    #[test]
    fn test_twl_mode_reverses_keystream_blocks() {
        let mut aes = SoftAes::new();
        aes.set_normal_key(0x03, [9u8; 16]);
        let mut ctr_pad = [0u8; 16];
        let mut twl_pad = [0u8; 16];
        aes.ctr_crypt(0x03, &[1u8; 16], CtrMode::Ctr, &mut ctr_pad).unwrap();
        aes.ctr_crypt(0x03, &[1u8; 16], CtrMode::Twl, &mut twl_pad).unwrap();
        ctr_pad.reverse();
        assert_eq!(ctr_pad, twl_pad);
    }

    #[test]
    fn test_missing_key() {
        let mut aes = SoftAes::new();
        let mut data = [0u8; 16];
        assert_eq!(
            aes.ctr_crypt(0x05, &[0u8; 16], CtrMode::Ctr, &mut data),
            Err(CryptoError::NoKey)
        );
        assert_eq!(
            aes.ctr_crypt(0x40, &[0u8; 16], CtrMode::Ctr, &mut data),
            Err(CryptoError::InvalidKeyslot)
        );
    }

    #[test]
    fn test_key_y_derives_normal_key() {
        let mut aes = SoftAes::new();
        aes.set_key_y(0x34, &[2u8; 16]).unwrap();
        assert!(!aes.has_key(0x34));
        aes.set_key_x(0x34, &[1u8; 16]).unwrap();
        assert!(aes.has_key(0x34));

        let mut a = [0u8; 16];
        aes.ctr_crypt(0x34, &[0u8; 16], CtrMode::Ctr, &mut a).unwrap();

        // a different key Y yields a different stream
        aes.set_key_y(0x34, &[3u8; 16]).unwrap();
        let mut b = [0u8; 16];
        aes.ctr_crypt(0x34, &[0u8; 16], CtrMode::Ctr, &mut b).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_scramblers_differ() {
        let x = [0x10u8; 16];
        let y = [0x20u8; 16];
        assert_ne!(scramble_ctr(&x, &y), scramble_twl(&x, &y));
    }
}
