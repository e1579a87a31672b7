/*++

Licensed under the Apache-2.0 license.

File Name:

    partitions.rs

Abstract:

    File contains the OTP partition map and the location of the items the
    controller exports to its peers.

--*/

/// Size of the OTP data array in bytes.
pub const OTP_DATA_SIZE: usize = 0x800;

/// Size of a partition digest in bytes.
pub const DIGEST_SIZE: usize = 8;

/// Static description of an OTP partition.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Partition {
    pub name: &'static str,
    pub offset: usize,
    pub size: usize,
    /// Digest offset, `None` for partitions without a digest
    pub digest_offset: Option<usize>,
    pub hw_digest: bool,
    pub sw_digest: bool,
    pub secret: bool,
    pub buffered: bool,
    /// Reads are blocked once the digest is set
    pub read_lock: bool,
    /// Reads are gated by a `<PART>_READ_LOCK` register
    pub read_lock_csr: bool,
    pub integrity: bool,
    pub iskeymgr: bool,
}

impl Partition {
    const fn new(name: &'static str, offset: usize, size: usize) -> Self {
        Self {
            name,
            offset,
            size,
            digest_offset: Some(offset + size - DIGEST_SIZE),
            hw_digest: false,
            sw_digest: false,
            secret: false,
            buffered: false,
            read_lock: false,
            read_lock_csr: false,
            integrity: false,
            iskeymgr: false,
        }
    }

    const fn sw(mut self) -> Self {
        self.sw_digest = true;
        self.read_lock_csr = true;
        self
    }

    const fn hw(mut self) -> Self {
        self.hw_digest = true;
        self.buffered = true;
        self.integrity = true;
        self
    }

    const fn secret(mut self) -> Self {
        self.secret = true;
        self.read_lock = true;
        self
    }

    const fn keymgr(mut self) -> Self {
        self.iskeymgr = true;
        self
    }

    const fn no_digest(mut self) -> Self {
        self.digest_offset = None;
        self.buffered = true;
        self.integrity = true;
        self
    }

    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.offset && addr < self.offset + self.size
    }

    pub fn is_digest(&self, addr: usize) -> bool {
        matches!(self.digest_offset, Some(d) if addr >= d && addr < d + DIGEST_SIZE)
    }
}

pub const VENDOR_TEST: usize = 0;
pub const CREATOR_SW_CFG: usize = 1;
pub const OWNER_SW_CFG: usize = 2;
pub const HW_CFG0: usize = 3;
pub const HW_CFG1: usize = 4;
pub const SECRET0: usize = 5;
pub const SECRET1: usize = 6;
pub const SECRET2: usize = 7;
pub const LIFE_CYCLE: usize = 8;
pub const PARTITION_COUNT: usize = 9;

pub static PARTITIONS: [Partition; PARTITION_COUNT] = [
    Partition::new("VENDOR_TEST", 0x000, 0x040).sw(),
    Partition::new("CREATOR_SW_CFG", 0x040, 0x360).sw(),
    Partition::new("OWNER_SW_CFG", 0x3a0, 0x2a0).sw(),
    Partition::new("HW_CFG0", 0x640, 0x048).hw(),
    Partition::new("HW_CFG1", 0x688, 0x010).hw(),
    Partition::new("SECRET0", 0x698, 0x028).hw().secret(),
    Partition::new("SECRET1", 0x6c0, 0x058).hw().secret(),
    Partition::new("SECRET2", 0x718, 0x078).hw().secret().keymgr(),
    Partition::new("LIFE_CYCLE", 0x790, 0x058).no_digest(),
];

/// Byte offsets of individual items.
pub mod item {
    pub const DEVICE_ID: usize = 0x640;
    pub const DEVICE_ID_SIZE: usize = 32;
    pub const MANUF_STATE: usize = 0x660;
    pub const MANUF_STATE_SIZE: usize = 32;
    pub const EN_SRAM_IFETCH: usize = 0x688;
    pub const EN_CSRNG_SW_APP_READ: usize = 0x689;
    pub const EN_ENTROPY_SRC_FW_READ: usize = 0x68a;
    pub const EN_ENTROPY_SRC_FW_OVER: usize = 0x68b;
    pub const SOC_DBG_STATE: usize = 0x68c;
    pub const TEST_UNLOCK_TOKEN: usize = 0x698;
    pub const TEST_EXIT_TOKEN: usize = 0x6a8;
    pub const TOKEN_SIZE: usize = 16;
    pub const FLASH_ADDR_KEY_SEED: usize = 0x6c0;
    pub const FLASH_DATA_KEY_SEED: usize = 0x6e0;
    pub const FLASH_KEY_SEED_SIZE: usize = 32;
    pub const SRAM_DATA_KEY_SEED: usize = 0x700;
    pub const SRAM_KEY_SEED_SIZE: usize = 16;
    pub const RMA_TOKEN: usize = 0x718;
    pub const CREATOR_ROOT_KEY_SHARE0: usize = 0x728;
    pub const CREATOR_ROOT_KEY_SHARE1: usize = 0x748;
    pub const CREATOR_SEED: usize = 0x768;
    pub const LC_TRANSITION_CNT: usize = 0x790;
    pub const LC_TRANSITION_CNT_SIZE: usize = 48;
    pub const LC_STATE: usize = 0x7c0;
    pub const LC_STATE_SIZE: usize = 40;
}

/// Index of the partition holding `addr`.
pub fn partition_of(addr: usize) -> Option<usize> {
    PARTITIONS.iter().position(|p| p.contains(addr))
}
