//! NAND Sector Backend
//!
//! Sector-granular access to the four NAND sources, with the partition
//! cipher applied on the way in and out:
//!
//! - **SysNAND** - the console's internal eMMC
//! - **EmuNAND** - a NAND copy stored in raw sectors on the SD card
//! - **ImgNAND** - a NAND dump mounted as a disk image
//! - **ZeroNAND** - an endless run of zeroes; reading it through a keyslot
//!   yields the bare keystream (XORpads)
//!
//! The counter for sector `n` is the per-console base counter plus
//! `n * 0x20` AES blocks. Keyslot 0x03 uses the TWL counter and block
//! order, every other keyslot the CTR counter.
//!
//! GW-style EmuNAND (base sector aligned to 0x200000) keeps its NCSD header
//! after the NAND image instead of in front of it; sector 0 is redirected
//! there transparently.

use alloc::vec;
use sha2::{Digest, Sha256};

use super::block::{BlockStatus, SharedDevice, SECTOR_SIZE};
use crate::crypto::{add_ctr, uses_crypto, CryptoError, CtrMode, SharedEngine, AES_BLOCK_SIZE, KEYSLOT_TWLNAND};

/// Default size of the private buffer used for write encryption (1MB)
pub const STD_BUFFER_SIZE: usize = 0x100000;

/// GW EmuNAND base alignment (sectors)
pub const GW_EMUNAND_ALIGN: u64 = 0x200000;

/// EmuNAND base alignment that implies a full SysNAND sized copy (sectors)
pub const EMUNAND_FULL_ALIGN: u64 = 0x2000;

/// Bytes of the NCSD header compared by the console type probe
pub const NCSD_MAGIC_LEN: usize = 0x60;

/// Offset of the probed NCSD header bytes inside sector 0
pub const NCSD_MAGIC_OFFSET: usize = 0x100;

/// NCSD partition type of a FIRM partition
const NP_TYPE_FIRM: u8 = 3;

/// Header of an unmodified old console NAND
pub const NCSD_MAGIC_O3DS: [u8; NCSD_MAGIC_LEN] = [
    0x4E, 0x43, 0x53, 0x44, 0x00, 0x00, 0x20, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x01, 0x04, 0x03, 0x03, 0x01, 0x00, 0x00, 0x00, 0x01, 0x02, 0x02, 0x02, 0x02, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x88, 0x05, 0x00, 0x00, 0x88, 0x05, 0x00, 0x80, 0x01, 0x00, 0x00,
    0x80, 0x89, 0x05, 0x00, 0x00, 0x20, 0x00, 0x00, 0x80, 0xA9, 0x05, 0x00, 0x00, 0x20, 0x00, 0x00,
    0x80, 0xC9, 0x05, 0x00, 0x80, 0xAE, 0x17, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// Header of an unmodified new console NAND
pub const NCSD_MAGIC_N3DS: [u8; NCSD_MAGIC_LEN] = [
    0x4E, 0x43, 0x53, 0x44, 0x00, 0x00, 0x28, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x01, 0x04, 0x03, 0x03, 0x01, 0x00, 0x00, 0x00, 0x01, 0x02, 0x02, 0x02, 0x03, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x88, 0x05, 0x00, 0x00, 0x88, 0x05, 0x00, 0x80, 0x01, 0x00, 0x00,
    0x80, 0x89, 0x05, 0x00, 0x00, 0x20, 0x00, 0x00, 0x80, 0xA9, 0x05, 0x00, 0x00, 0x20, 0x00, 0x00,
    0x80, 0xC9, 0x05, 0x00, 0x80, 0xF6, 0x20, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// NAND source selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NandSource {
    SysNand,
    EmuNand,
    ImgNand,
    ZeroNand,
}

impl From<CryptoError> for BlockStatus {
    fn from(_: CryptoError) -> Self {
        BlockStatus::KeyUnavailable
    }
}

/// Per-console base counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NandCounters {
    /// CTR NAND base counter (first half of SHA-256 over the eMMC CID)
    pub ctrnand: [u8; 16],
    /// TWL NAND base counter (byte-reversed SHA-1 over the eMMC CID)
    pub twlnand: [u8; 16],
}

impl NandCounters {
    pub fn new(ctrnand: [u8; 16], twlnand: [u8; 16]) -> Self {
        Self { ctrnand, twlnand }
    }

    /// Derive the CTR counter from the eMMC CID. The TWL counter comes
    /// from the boot environment.
    pub fn from_cid(cid: &[u8; 16], twlnand: [u8; 16]) -> Self {
        let hash = Sha256::digest(cid);
        let mut ctrnand = [0u8; 16];
        ctrnand.copy_from_slice(&hash[..16]);
        Self { ctrnand, twlnand }
    }

    pub fn for_keyslot(&self, keyslot: u8) -> [u8; 16] {
        if keyslot == KEYSLOT_TWLNAND {
            self.twlnand
        } else {
            self.ctrnand
        }
    }
}

/// Sector level access to the NAND sources.
pub trait SectorBackend {
    /// Read whole sectors from `src`, decrypting with `keyslot`
    fn read_sectors(&self, src: NandSource, sector: u64, keyslot: u8, buf: &mut [u8]) -> Result<(), BlockStatus>;

    /// Encrypt with `keyslot` and write whole sectors to `dst`. `buf` is
    /// left untouched.
    fn write_sectors(&self, dst: NandSource, sector: u64, keyslot: u8, buf: &[u8]) -> Result<(), BlockStatus>;

    /// Usable size of `src` in sectors, 0 if not available
    fn size_sectors(&self, src: NandSource) -> u64;

    /// Whether the cipher can serve `keyslot`
    fn has_key(&self, keyslot: u8) -> bool;
}

/// EmuNAND placement on the SD card
#[derive(Clone)]
pub struct EmuNandConfig {
    /// Raw SD card device
    pub device: SharedDevice,
    /// First sector of the EmuNAND
    pub base_sector: u64,
    /// First sector of the SD card's FAT partition; EmuNAND must end below it
    pub partition_sector: u64,
}

impl EmuNandConfig {
    fn is_gw(&self) -> bool {
        self.base_sector % GW_EMUNAND_ALIGN == 0
    }
}

/// Validate an NCSD header sector and return the end of its last partition.
pub fn ncsd_min_sectors(sector0: &[u8]) -> Option<u64> {
    if sector0.len() < SECTOR_SIZE || &sector0[0x100..0x104] != b"NCSD" {
        return None;
    }
    let le32 = |at: usize| u32::from_le_bytes([sector0[at], sector0[at + 1], sector0[at + 2], sector0[at + 3]]) as u64;

    let media_id = &sector0[0x108..0x110];
    let fs_types = &sector0[0x110..0x118];
    // cart images carry a media id and no fs types
    if media_id.iter().any(|&b| b != 0) || fs_types.iter().all(|&b| b == 0) {
        return None;
    }

    let mut data_units = 0;
    let mut firm_count = 0;
    let mut min_size = 0;
    for (i, &np_type) in fs_types.iter().enumerate() {
        let offset = le32(0x120 + i * 8);
        let size = le32(0x124 + i * 8);
        if size == 0 {
            if i == 0 {
                return None;
            }
            continue;
        }
        if np_type == 0 || offset < data_units {
            return None;
        }
        data_units = offset + size;
        min_size = min_size.max(data_units);
        if np_type == NP_TYPE_FIRM {
            firm_count += 1;
        }
    }

    if data_units > le32(0x104) || firm_count == 0 {
        return None;
    }
    Some(min_size)
}

/// Backend over real (or RAM-backed) sector devices.
pub struct NandBackend {
    sysnand: SharedDevice,
    emunand: Option<EmuNandConfig>,
    image: Option<SharedDevice>,
    engine: SharedEngine,
    counters: NandCounters,
    chunk_size: usize,
}

impl NandBackend {
    pub fn new(sysnand: SharedDevice, engine: SharedEngine, counters: NandCounters) -> Self {
        Self {
            sysnand,
            emunand: None,
            image: None,
            engine,
            counters,
            chunk_size: STD_BUFFER_SIZE,
        }
    }

    pub fn set_emunand(&mut self, emunand: Option<EmuNandConfig>) {
        if let Some(emu) = &emunand {
            log::info!("[NAND] EmuNAND at sector {:#x}{}", emu.base_sector,
                if emu.is_gw() { " (GW header)" } else { "" });
        }
        self.emunand = emunand;
    }

    pub fn emunand_base(&self) -> Option<u64> {
        self.emunand.as_ref().map(|emu| emu.base_sector)
    }

    pub fn set_image(&mut self, image: Option<SharedDevice>) {
        self.image = image;
    }

    /// Bound the private write buffer; rounded down to whole sectors
    pub fn set_chunk_size(&mut self, bytes: usize) {
        self.chunk_size = (bytes / SECTOR_SIZE).max(1) * SECTOR_SIZE;
    }

    pub fn engine(&self) -> &SharedEngine {
        &self.engine
    }

    fn sysnand_sectors(&self) -> u64 {
        self.sysnand.lock().sector_count()
    }

    fn image_device(&self) -> Result<&SharedDevice, BlockStatus> {
        self.image.as_ref().ok_or(BlockStatus::NoMedia)
    }

    fn emunand_config(&self) -> Result<&EmuNandConfig, BlockStatus> {
        self.emunand.as_ref().ok_or(BlockStatus::NoMedia)
    }

    fn crypt(&self, buf: &mut [u8], sector: u64, keyslot: u8) -> Result<(), BlockStatus> {
        let mut ctr = self.counters.for_keyslot(keyslot);
        add_ctr(&mut ctr, sector * (SECTOR_SIZE / AES_BLOCK_SIZE) as u64);
        self.engine
            .lock()
            .ctr_crypt(keyslot, &ctr, CtrMode::for_keyslot(keyslot), buf)?;
        Ok(())
    }

    fn read_raw(&self, src: NandSource, sector: u64, buf: &mut [u8]) -> Result<(), BlockStatus> {
        match src {
            NandSource::SysNand => self.sysnand.lock().read_sectors(sector, buf),
            NandSource::ImgNand => self.image_device()?.lock().read_sectors(sector, buf),
            NandSource::ZeroNand => {
                buf.fill(0);
                Ok(())
            }
            NandSource::EmuNand => {
                let emu = self.emunand_config()?;
                let header_sector = emu.base_sector + self.sysnand_sectors();
                let mut device = emu.device.lock();
                let mut start = sector;
                let mut done = 0;
                if sector == 0 && emu.is_gw() {
                    device.read_sectors(header_sector, &mut buf[..SECTOR_SIZE])?;
                    start = 1;
                    done = SECTOR_SIZE;
                }
                if done < buf.len() {
                    device.read_sectors(emu.base_sector + start, &mut buf[done..])?;
                }
                Ok(())
            }
        }
    }

    fn write_raw(&self, dst: NandSource, sector: u64, buf: &[u8]) -> Result<(), BlockStatus> {
        match dst {
            NandSource::SysNand => self.sysnand.lock().write_sectors(sector, buf),
            NandSource::ImgNand => self.image_device()?.lock().write_sectors(sector, buf),
            NandSource::ZeroNand => Err(BlockStatus::WriteProtected),
            NandSource::EmuNand => {
                let emu = self.emunand_config()?;
                let header_sector = emu.base_sector + self.sysnand_sectors();
                let mut device = emu.device.lock();
                if sector == 0 && emu.is_gw() {
                    device.write_sectors(header_sector, &buf[..SECTOR_SIZE])?;
                    if buf.len() > SECTOR_SIZE {
                        device.write_sectors(emu.base_sector + 1, &buf[SECTOR_SIZE..])?;
                    }
                    Ok(())
                } else {
                    device.write_sectors(emu.base_sector + sector, buf)
                }
            }
        }
    }

    /// End of the last NCSD partition of `src`, 0 if the header is invalid
    pub fn min_size_sectors(&self, src: NandSource) -> u64 {
        let mut header = [0u8; SECTOR_SIZE];
        if self.read_raw(src, 0, &mut header).is_err() {
            return 0;
        }
        ncsd_min_sectors(&header).unwrap_or(0)
    }
}

impl SectorBackend for NandBackend {
    fn read_sectors(&self, src: NandSource, sector: u64, keyslot: u8, buf: &mut [u8]) -> Result<(), BlockStatus> {
        if buf.len() % SECTOR_SIZE != 0 {
            return Err(BlockStatus::InvalidParameter);
        }
        if buf.is_empty() {
            return Ok(());
        }
        self.read_raw(src, sector, buf)?;
        if uses_crypto(keyslot) {
            self.crypt(buf, sector, keyslot)?;
        }
        Ok(())
    }

    fn write_sectors(&self, dst: NandSource, sector: u64, keyslot: u8, buf: &[u8]) -> Result<(), BlockStatus> {
        if buf.len() % SECTOR_SIZE != 0 {
            return Err(BlockStatus::InvalidParameter);
        }
        if dst == NandSource::ZeroNand {
            return Err(BlockStatus::WriteProtected);
        }
        if buf.is_empty() {
            return Ok(());
        }

        let mut scratch = vec![0u8; self.chunk_size.min(buf.len())];
        let chunk_sectors = (self.chunk_size / SECTOR_SIZE) as u64;
        for (i, chunk) in buf.chunks(self.chunk_size).enumerate() {
            let at = sector + i as u64 * chunk_sectors;
            let work = &mut scratch[..chunk.len()];
            work.copy_from_slice(chunk);
            if uses_crypto(keyslot) {
                self.crypt(work, at, keyslot)?;
            }
            self.write_raw(dst, at, work)?;
        }
        Ok(())
    }

    fn size_sectors(&self, src: NandSource) -> u64 {
        let sysnand_sectors = self.sysnand_sectors();
        match src {
            NandSource::SysNand | NandSource::ZeroNand => sysnand_sectors,
            NandSource::EmuNand => {
                let Some(emu) = self.emunand.as_ref() else {
                    return 0;
                };
                let max_sectors = emu.partition_sector.saturating_sub(emu.base_sector + 1);
                let mut min_sectors = if emu.base_sector % EMUNAND_FULL_ALIGN == 0 {
                    sysnand_sectors
                } else {
                    self.min_size_sectors(NandSource::EmuNand)
                };
                if min_sectors == 0 {
                    min_sectors = self.min_size_sectors(NandSource::SysNand);
                }
                if min_sectors > max_sectors {
                    0
                } else {
                    min_sectors
                }
            }
            NandSource::ImgNand => {
                let Some(image) = self.image.as_ref() else {
                    return 0;
                };
                let image_sectors = image.lock().sector_count();
                if image_sectors >= self.min_size_sectors(NandSource::ImgNand) {
                    image_sectors
                } else {
                    0
                }
            }
        }
    }

    fn has_key(&self, keyslot: u8) -> bool {
        !uses_crypto(keyslot) || self.engine.lock().has_key(keyslot)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::crypto::{self, AesEngine, SoftAes, KEYSLOT_NONE};
    use crate::io::block::{self, SectorDevice};
    use crate::io::ramdisk::RamDisk;
    use alloc::sync::Arc;
    use spin::Mutex;

    /// NAND with an old console header in sector 0
    pub(crate) fn o3ds_nand_image(sectors: u64) -> RamDisk {
        let mut disk = RamDisk::new(sectors);
        let bytes = disk.as_bytes_mut();
        bytes[NCSD_MAGIC_OFFSET..NCSD_MAGIC_OFFSET + NCSD_MAGIC_LEN].copy_from_slice(&NCSD_MAGIC_O3DS);
        disk
    }

    pub(crate) fn test_engine() -> SoftAes {
        let mut aes = SoftAes::new();
        for slot in [0x03u8, 0x04, 0x06, 0x07] {
            aes.set_normal_key(slot, [slot; 16]);
        }
        aes
    }

    fn backend(sysnand: SharedDevice) -> NandBackend {
        NandBackend::new(sysnand, crypto::share(test_engine()), NandCounters::new([1; 16], [2; 16]))
    }

    #[test]
    fn test_ncsd_min_sectors() {
        let mut sector = [0u8; SECTOR_SIZE];
        sector[NCSD_MAGIC_OFFSET..NCSD_MAGIC_OFFSET + NCSD_MAGIC_LEN].copy_from_slice(&NCSD_MAGIC_O3DS);
        assert_eq!(ncsd_min_sectors(&sector), Some(0x3AF00000 / SECTOR_SIZE as u64));
        sector[NCSD_MAGIC_OFFSET..NCSD_MAGIC_OFFSET + NCSD_MAGIC_LEN].copy_from_slice(&NCSD_MAGIC_N3DS);
        assert_eq!(ncsd_min_sectors(&sector), Some(0x4D800000 / SECTOR_SIZE as u64));

        // cart style header with a media id
        sector[0x108] = 1;
        assert_eq!(ncsd_min_sectors(&sector), None);
        assert_eq!(ncsd_min_sectors(&[0u8; SECTOR_SIZE]), None);
    }

    #[test]
    fn test_plain_read_is_raw() {
        let disk = Arc::new(Mutex::new(RamDisk::new(8)));
        disk.lock().as_bytes_mut()[512..1024].fill(0x5A);
        let nand = backend(disk.clone());

        let mut buf = [0u8; SECTOR_SIZE];
        nand.read_sectors(NandSource::SysNand, 1, KEYSLOT_NONE, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0x5A));
    }

    #[test]
    fn test_encrypted_round_trip_and_counter() {
        let disk = Arc::new(Mutex::new(RamDisk::new(8)));
        let mut nand = backend(disk.clone());
        nand.set_chunk_size(SECTOR_SIZE);

        let plain: [u8; SECTOR_SIZE * 3] = core::array::from_fn(|i| (i % 251) as u8);
        nand.write_sectors(NandSource::SysNand, 2, 0x04, &plain).unwrap();
        assert_ne!(&disk.lock().as_bytes()[1024..2560], &plain[..]);
        // three chunks of one sector
        assert_eq!(disk.lock().stats().writes, 3);

        let mut back = [0u8; SECTOR_SIZE * 3];
        nand.read_sectors(NandSource::SysNand, 2, 0x04, &mut back).unwrap();
        assert_eq!(back, plain);

        // sector 3 alone decrypts with the same counter offset
        let mut one = [0u8; SECTOR_SIZE];
        nand.read_sectors(NandSource::SysNand, 3, 0x04, &mut one).unwrap();
        assert_eq!(&one[..], &plain[SECTOR_SIZE..SECTOR_SIZE * 2]);
    }

    #[test]
    fn test_xorpad_is_keystream() {
        let disk = block::share(RamDisk::new(4));
        let nand = backend(disk);
        let mut pad = [0u8; SECTOR_SIZE];
        nand.read_sectors(NandSource::ZeroNand, 1, 0x04, &mut pad).unwrap();

        let mut expected = [0u8; SECTOR_SIZE];
        let mut ctr = [1u8; 16];
        add_ctr(&mut ctr, 0x20);
        test_engine().ctr_crypt(0x04, &ctr, CtrMode::Ctr, &mut expected).unwrap();
        assert_eq!(pad, expected);
        assert_eq!(
            nand.write_sectors(NandSource::ZeroNand, 0, 0x04, &pad),
            Err(BlockStatus::WriteProtected)
        );
    }

    #[test]
    fn test_gw_emunand_header_redirect() {
        let sysnand = block::share(RamDisk::new(16));
        let sd = Arc::new(Mutex::new(RamDisk::new(64)));
        sd.lock().as_bytes_mut()[16 * SECTOR_SIZE] = 0xEE; // header after the image
        sd.lock().as_bytes_mut()[SECTOR_SIZE] = 0x11; // sector 1 of the image

        let mut nand = backend(sysnand);
        nand.set_emunand(Some(EmuNandConfig { device: sd.clone(), base_sector: 0, partition_sector: 64 }));

        let mut buf = [0u8; SECTOR_SIZE * 2];
        nand.read_sectors(NandSource::EmuNand, 0, KEYSLOT_NONE, &mut buf).unwrap();
        assert_eq!(buf[0], 0xEE);
        assert_eq!(buf[SECTOR_SIZE], 0x11);

        let header = [0x77u8; SECTOR_SIZE];
        nand.write_sectors(NandSource::EmuNand, 0, KEYSLOT_NONE, &header).unwrap();
        assert_eq!(sd.lock().as_bytes()[16 * SECTOR_SIZE], 0x77);
        assert_eq!(sd.lock().as_bytes()[0], 0);
    }

    #[test]
    fn test_rednand_offset() {
        let sysnand = block::share(RamDisk::new(16));
        let sd = Arc::new(Mutex::new(RamDisk::new(64)));
        sd.lock().as_bytes_mut()[SECTOR_SIZE] = 0x42;

        let mut nand = backend(sysnand);
        nand.set_emunand(Some(EmuNandConfig { device: sd, base_sector: 1, partition_sector: 64 }));
        let mut buf = [0u8; SECTOR_SIZE];
        nand.read_sectors(NandSource::EmuNand, 0, KEYSLOT_NONE, &mut buf).unwrap();
        assert_eq!(buf[0], 0x42);
    }

    #[test]
    fn test_source_sizes() {
        let sysnand = block::share(RamDisk::new(32));
        let mut nand = backend(sysnand);
        assert_eq!(nand.size_sectors(NandSource::SysNand), 32);
        assert_eq!(nand.size_sectors(NandSource::ZeroNand), 32);
        assert_eq!(nand.size_sectors(NandSource::EmuNand), 0);
        assert_eq!(nand.size_sectors(NandSource::ImgNand), 0);

        // aligned base: same size as SysNAND, if it fits below the partition
        let sd = block::share(RamDisk::new(128));
        nand.set_emunand(Some(EmuNandConfig { device: sd.clone(), base_sector: 0, partition_sector: 64 }));
        assert_eq!(nand.size_sectors(NandSource::EmuNand), 32);
        nand.set_emunand(Some(EmuNandConfig { device: sd, base_sector: 0, partition_sector: 20 }));
        assert_eq!(nand.size_sectors(NandSource::EmuNand), 0);

        // image without a valid header still has a size
        nand.set_image(Some(block::share(RamDisk::new(24))));
        assert_eq!(nand.size_sectors(NandSource::ImgNand), 24);
    }

    #[test]
    fn test_image_smaller_than_header_claims() {
        let sysnand = block::share(RamDisk::new(8));
        let mut nand = backend(sysnand);
        nand.set_image(Some(block::share(o3ds_nand_image(64))));
        assert_eq!(nand.size_sectors(NandSource::ImgNand), 0);
    }

    #[test]
    fn test_has_key() {
        let nand = backend(block::share(RamDisk::new(1)));
        assert!(nand.has_key(KEYSLOT_NONE));
        assert!(nand.has_key(0x04));
        assert!(!nand.has_key(0x05));
        assert_eq!(nand.sysnand.lock().sector_count(), 1);
    }
}
