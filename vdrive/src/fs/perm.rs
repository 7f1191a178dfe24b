//! Write Permissions
//!
//! Every mutating operation first maps its path to a permission class and
//! checks it against the set granted so far. A class that is missing may be
//! unlocked by asking a [`PermissionOracle`] (on the console, a confirmation
//! prompt); some classes can never be unlocked at all.
//!
//! SysNAND writes escalate by path: sensitive system files and whole-NAND
//! virtual files need higher levels than ordinary CTRNAND data.

use alloc::boxed::Box;
use alloc::string::String;

use super::drive::{classify, DriveType};
use super::mount::MountContext;
use super::path;
use super::vfs::FsStatus;

bitflags::bitflags! {
    /// Write permission classes. Higher levels include the lower ones.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Permission: u32 {
        const SDCARD = 1 << 0;
        const IMAGE = 1 << 1;
        const RAMDRIVE = 1 << 2;
        const EMU_LVL0 = 1 << 3;
        const EMU_LVL1 = Self::EMU_LVL0.bits() | (1 << 4);
        const SYS_LVL0 = 1 << 5;
        const SYS_LVL1 = Self::SYS_LVL0.bits() | (1 << 6);
        const SYS_LVL2 = Self::SYS_LVL1.bits() | (1 << 7);
        const SYS_LVL3 = Self::SYS_LVL2.bits() | (1 << 8);
        const SDDATA = Self::SDCARD.bits() | (1 << 9);
        const MEMORY = 1 << 10;
        const GAME = 1 << 11;
        const XORPAD = 1 << 12;
        const CART = 1 << 13;
        const VRAM = 1 << 14;
        /// Granted at start
        const BASE = Self::SDCARD.bits() | Self::IMAGE.bits() | Self::RAMDRIVE.bits()
            | Self::EMU_LVL0.bits() | Self::SYS_LVL0.bits();
        /// Classes that can never be unlocked
        const NEVER = Self::GAME.bits() | Self::XORPAD.bits() | Self::VRAM.bits();
    }
}

const PATH_SYS_LVL1: &[&str] = &["S:/twln.bin", "S:/twlp.bin"];

const PATH_SYS_LVL2: &[&str] = &[
    "1:/rw/sys/LocalFriendCodeSeed_B",
    "1:/rw/sys/LocalFriendCodeSeed_A",
    "1:/rw/sys/SecureInfo_A",
    "1:/rw/sys/SecureInfo_B",
    "1:/private/movable.sed",
    "1:/ro/sys/HWCAL0.dat",
    "1:/ro/sys/HWCAL1.dat",
    "S:/ctrnand_fat.bin",
    "S:/ctrnand_full.bin",
];

const PATH_SYS_LVL3: &[&str] = &[
    "S:/firm0.bin",
    "S:/firm1.bin",
    "S:/nand.bin",
    "S:/nand_minsize.bin",
    "S:/nand_hdr.bin",
    "S:/sector0x96.bin",
    "S:/twlmbr.bin",
];

const PATH_EMU_LVL1: &[&str] = &[
    "E:/ctrnand_fat.bin",
    "E:/ctrnand_full.bin",
    "E:/nand.bin",
    "E:/nand_minsize.bin",
    "E:/nand_hdr.bin",
];

/// SD card system data folder
const SDDATA_PREFIX: &str = "0:/Nintendo 3DS";

/// Asked before a missing permission class is granted.
pub trait PermissionOracle {
    fn confirm_unlock(&mut self, perm: Permission, area: &str) -> bool;
}

/// Oracle with a fixed answer
#[derive(Debug, Clone, Copy)]
pub struct FixedAnswer(pub bool);

impl PermissionOracle for FixedAnswer {
    fn confirm_unlock(&mut self, _perm: Permission, _area: &str) -> bool {
        self.0
    }
}

fn in_list(list: &[&str], path: &str) -> bool {
    list.iter().any(|p| p.eq_ignore_ascii_case(path))
}

/// Permission class needed to write `path`, `None` if the drive can never
/// be written.
pub fn required_permission(path: &str, ctx: &MountContext) -> Option<Permission> {
    let path_f = path::collapse_separators(path);
    let drv = classify(path, ctx);

    if drv.contains(DriveType::SYSNAND) {
        const LEVELS: [Permission; 4] =
            [Permission::SYS_LVL0, Permission::SYS_LVL1, Permission::SYS_LVL2, Permission::SYS_LVL3];
        let mut lvl = if drv.intersects(DriveType::TWLNAND | DriveType::ALIAS | DriveType::CTRNAND) { 1 } else { 0 };
        if drv.intersects(DriveType::CTRNAND | DriveType::VIRTUAL) {
            if in_list(PATH_SYS_LVL3, &path_f) {
                lvl = 3;
            } else if lvl < 2 && in_list(PATH_SYS_LVL2, &path_f) {
                lvl = 2;
            } else if lvl < 1 && in_list(PATH_SYS_LVL1, &path_f) {
                lvl = 1;
            }
        }
        if !ctx.unlocked && (drv.contains(DriveType::CTRNAND) || lvl == 2) {
            lvl = 3;
        }
        Some(LEVELS[lvl])
    } else if drv.contains(DriveType::EMUNAND) {
        let lvl1 = drv.intersects(DriveType::ALIAS | DriveType::CTRNAND)
            || (drv.contains(DriveType::VIRTUAL) && in_list(PATH_EMU_LVL1, &path_f));
        Some(if lvl1 { Permission::EMU_LVL1 } else { Permission::EMU_LVL0 })
    } else if drv.contains(DriveType::GAME) {
        Some(Permission::GAME)
    } else if drv.contains(DriveType::CART) {
        Some(Permission::CART)
    } else if drv.contains(DriveType::VRAM) {
        Some(Permission::VRAM)
    } else if drv.contains(DriveType::XORPAD) {
        Some(Permission::XORPAD)
    } else if drv.contains(DriveType::IMAGE) {
        Some(Permission::IMAGE)
    } else if drv.contains(DriveType::MEMORY) {
        Some(Permission::MEMORY)
    } else if path::starts_with_ignore_case(&path_f, SDDATA_PREFIX) {
        Some(Permission::SDDATA)
    } else if drv.contains(DriveType::SDCARD) {
        Some(Permission::SDCARD)
    } else if drv.contains(DriveType::RAMDRIVE) {
        Some(Permission::RAMDRIVE)
    } else {
        None
    }
}

/// Human readable name of a permission class
pub fn area_name(perm: Permission) -> String {
    let levels = [
        (Permission::SYS_LVL3, "SysNAND (lvl3)"),
        (Permission::SYS_LVL2, "SysNAND (lvl2)"),
        (Permission::SYS_LVL1, "SysNAND (lvl1)"),
        (Permission::SYS_LVL0, "SysNAND (lvl0)"),
        (Permission::EMU_LVL1, "EmuNAND (lvl1)"),
        (Permission::EMU_LVL0, "EmuNAND (lvl0)"),
        (Permission::SDDATA, "SD system data"),
        (Permission::SDCARD, "SD card"),
        (Permission::IMAGE, "images"),
        (Permission::RAMDRIVE, "RAM drive"),
        (Permission::MEMORY, "memory areas"),
        (Permission::GAME, "game images"),
        (Permission::XORPAD, "XORpads"),
        (Permission::CART, "gamecart saves"),
        (Permission::VRAM, "vram0"),
    ];
    levels
        .iter()
        .find(|(p, _)| *p == perm)
        .map_or_else(|| alloc::format!("{:#x}", perm.bits()), |(_, name)| String::from(*name))
}

/// Granted write permissions plus the oracle that may extend them.
pub struct WriteGuard {
    granted: Permission,
    oracle: Box<dyn PermissionOracle + Send>,
}

impl WriteGuard {
    /// Start with [`Permission::BASE`]
    pub fn new(oracle: Box<dyn PermissionOracle + Send>) -> Self {
        Self { granted: Permission::BASE, oracle }
    }

    pub fn granted(&self) -> Permission {
        self.granted
    }

    /// Add `perm` to the granted set, or replace the set when `add` is false
    pub fn set(&mut self, perm: Permission, add: bool) {
        if add {
            self.granted |= perm;
        } else {
            self.granted = perm;
        }
    }

    /// Check (and possibly unlock) write access to `path`.
    pub fn check(&mut self, path: &str, ctx: &MountContext) -> Result<(), FsStatus> {
        self.check_inner(path, ctx, true)
    }

    fn check_inner(&mut self, path: &str, ctx: &MountContext, follow_image: bool) -> Result<(), FsStatus> {
        let drv = classify(path, ctx);

        if drv.contains(DriveType::IMAGE) {
            let image_path = ctx.image_path().ok_or(FsStatus::AccessDenied)?;
            if !follow_image {
                return Err(FsStatus::AccessDenied);
            }
            self.check_inner(image_path, ctx, false)?;
        }

        if drv.intersects(DriveType::SDCARD | DriveType::EMUNAND | DriveType::ALIAS) && ctx.sd_write_protected {
            log::warn!("[VFS] SD card is write protected: {}", path);
            return Err(FsStatus::AccessDenied);
        }

        let perm = required_permission(path, ctx).ok_or(FsStatus::AccessDenied)?;
        if self.granted.contains(perm) {
            return Ok(());
        }
        if perm.intersects(Permission::NEVER) {
            log::warn!("[VFS] writing {} is not allowed", area_name(perm));
            return Err(FsStatus::AccessDenied);
        }
        if !self.oracle.confirm_unlock(perm, &area_name(perm)) {
            return Err(FsStatus::AccessDenied);
        }
        self.granted |= perm;
        log::info!("[VFS] write access unlocked: {}", area_name(perm));
        Ok(())
    }

    /// Like [`check`](Self::check), but a directory that contains one of
    /// the escalated paths is checked as that path.
    pub fn check_dir(&mut self, path: &str, ctx: &MountContext) -> Result<(), FsStatus> {
        let special = [PATH_SYS_LVL3, PATH_SYS_LVL2, PATH_SYS_LVL1, PATH_EMU_LVL1]
            .into_iter()
            .flatten()
            .find(|special| special.len() > path.len()
                && special.starts_with(path)
                && special.as_bytes()[path.len()] == b'/');
        match special {
            Some(special) => self.check(special, ctx),
            None => self.check(path, ctx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mount::ImageKind;
    use alloc::vec::Vec;
    use alloc::sync::Arc;
    use spin::Mutex;

    fn context() -> MountContext {
        let mut ctx = MountContext::default();
        for slot in 0..=9 {
            ctx.mount_slot(slot).unwrap();
        }
        ctx.emunand = true;
        ctx
    }

    /// Records every question and answers with a fixed value
    struct Recorder {
        asked: Arc<Mutex<Vec<Permission>>>,
        answer: bool,
    }

    impl PermissionOracle for Recorder {
        fn confirm_unlock(&mut self, perm: Permission, _area: &str) -> bool {
            self.asked.lock().push(perm);
            self.answer
        }
    }

    fn guard(answer: bool) -> (WriteGuard, Arc<Mutex<Vec<Permission>>>) {
        let asked = Arc::new(Mutex::new(Vec::new()));
        (WriteGuard::new(Box::new(Recorder { asked: asked.clone(), answer })), asked)
    }

    #[test]
    fn test_sysnand_levels() {
        let mut ctx = context();
        ctx.unlocked = true;
        assert_eq!(required_permission("S:/twln.bin", &ctx), Some(Permission::SYS_LVL1));
        assert_eq!(required_permission("S:/ctrnand_fat.bin", &ctx), Some(Permission::SYS_LVL2));
        assert_eq!(required_permission("S:/NAND.bin", &ctx), Some(Permission::SYS_LVL3));
        assert_eq!(required_permission("S:/agbsave.bin", &ctx), Some(Permission::SYS_LVL0));
        assert_eq!(required_permission("S:/twlmbr.bin", &ctx), Some(Permission::SYS_LVL3));
        assert_eq!(required_permission("S:/bonus.bin", &ctx), Some(Permission::SYS_LVL0));
        assert_eq!(required_permission("1:/data/x", &ctx), Some(Permission::SYS_LVL1));
        assert_eq!(required_permission("1://private//movable.sed", &ctx), Some(Permission::SYS_LVL2));
        assert_eq!(required_permission("2:/x", &ctx), Some(Permission::SYS_LVL1));

        // locked consoles escalate CTRNAND and lvl2
        ctx.unlocked = false;
        assert_eq!(required_permission("1:/data/x", &ctx), Some(Permission::SYS_LVL3));
        assert_eq!(required_permission("S:/ctrnand_full.bin", &ctx), Some(Permission::SYS_LVL3));
        assert_eq!(required_permission("2:/x", &ctx), Some(Permission::SYS_LVL1));
    }

    #[test]
    fn test_other_classes() {
        let mut ctx = context();
        ctx.set_image(ImageKind::Fat, "0:/fat.img");
        ctx.game_mounted = true;
        assert_eq!(required_permission("E:/nand.bin", &ctx), Some(Permission::EMU_LVL1));
        assert_eq!(required_permission("E:/twln.bin", &ctx), Some(Permission::EMU_LVL0));
        assert_eq!(required_permission("4:/x", &ctx), Some(Permission::EMU_LVL1));
        assert_eq!(required_permission("0:/Nintendo 3DS/x", &ctx), Some(Permission::SDDATA));
        assert_eq!(required_permission("0:/nintendo 3ds", &ctx), Some(Permission::SDDATA));
        assert_eq!(required_permission("0:/x", &ctx), Some(Permission::SDCARD));
        assert_eq!(required_permission("9:/x", &ctx), Some(Permission::RAMDRIVE));
        assert_eq!(required_permission("7:/x", &ctx), Some(Permission::IMAGE));
        assert_eq!(required_permission("M:/itcm.mem", &ctx), Some(Permission::MEMORY));
        assert_eq!(required_permission("X:/twln.bin.xorpad", &ctx), Some(Permission::XORPAD));
        assert_eq!(required_permission("G:/x", &ctx), Some(Permission::GAME));
        assert_eq!(required_permission("Q:/x", &ctx), None);
    }

    #[test]
    fn test_base_needs_no_prompt() {
        let ctx = context();
        let (mut guard, asked) = guard(false);
        assert_eq!(guard.check("0:/file.txt", &ctx), Ok(()));
        assert_eq!(guard.check("S:/agbsave.bin", &ctx), Ok(()));
        assert!(asked.lock().is_empty());
    }

    #[test]
    fn test_unlock_via_oracle() {
        let ctx = context();
        let (mut guard, asked) = guard(true);
        assert_eq!(guard.check("M:/itcm.mem", &ctx), Ok(()));
        assert!(guard.granted().contains(Permission::MEMORY));
        // granted once, not asked again
        assert_eq!(guard.check("M:/dtcm.mem", &ctx), Ok(()));
        assert_eq!(asked.lock().as_slice(), &[Permission::MEMORY]);

        let (mut guard, _) = self::guard(false);
        assert_eq!(guard.check("M:/itcm.mem", &ctx), Err(FsStatus::AccessDenied));
        assert!(!guard.granted().contains(Permission::MEMORY));
    }

    #[test]
    fn test_never_grantable() {
        let mut ctx = context();
        ctx.vram_available = true;
        let (mut guard, asked) = guard(true);
        assert_eq!(guard.check("X:/firm0.bin.xorpad", &ctx), Err(FsStatus::AccessDenied));
        assert_eq!(guard.check("V:/x", &ctx), Err(FsStatus::AccessDenied));
        assert_eq!(guard.check("Q:/x", &ctx), Err(FsStatus::AccessDenied));
        assert!(asked.lock().is_empty());

        // cart saves can be unlocked
        ctx.cart_inserted = true;
        assert_eq!(guard.check("C:/save.bin", &ctx), Ok(()));
    }

    #[test]
    fn test_write_protect_and_image_recursion() {
        let mut ctx = context();
        ctx.sd_write_protected = true;
        let (mut guard, _) = guard(true);
        assert_eq!(guard.check("0:/x", &ctx), Err(FsStatus::AccessDenied));
        assert_eq!(guard.check("E:/twln.bin", &ctx), Err(FsStatus::AccessDenied));
        assert_eq!(guard.check("9:/x", &ctx), Ok(()));

        // image lives on the protected card
        ctx.set_image(ImageKind::Fat, "0:/fat.img");
        assert_eq!(guard.check("7:/x", &ctx), Err(FsStatus::AccessDenied));
        ctx.sd_write_protected = false;
        assert_eq!(guard.check("7:/x", &ctx), Ok(()));
        // image recorded on an image drive
        ctx.set_image(ImageKind::Fat, "7:/inner.img");
        assert_eq!(guard.check("7:/x", &ctx), Err(FsStatus::AccessDenied));
    }

    #[test]
    fn test_dir_checks_contained_special_path() {
        let mut ctx = context();
        ctx.unlocked = true;
        let (mut guard, asked) = guard(false);
        // "S:" contains firm0.bin, so it is checked at lvl3
        assert_eq!(guard.check_dir("S:", &ctx), Err(FsStatus::AccessDenied));
        assert_eq!(asked.lock().as_slice(), &[Permission::SYS_LVL3]);
        assert_eq!(guard.check_dir("0:/dir", &ctx), Ok(()));
    }

    #[test]
    fn test_set_replaces_or_adds() {
        let (mut guard, _) = guard(false);
        guard.set(Permission::MEMORY, true);
        assert!(guard.granted().contains(Permission::BASE | Permission::MEMORY));
        guard.set(Permission::SDCARD, false);
        assert_eq!(guard.granted(), Permission::SDCARD);
        assert_eq!(area_name(Permission::SYS_LVL2), "SysNAND (lvl2)");
    }
}
