/*++

Licensed under the Apache-2.0 license.

File Name:

    cmd_info.rs

Abstract:

    File contains the flash command slot descriptors.

--*/

use bitfield::bitfield;

pub const SLOT_COUNT: usize = 24;
/// First slot handed to firmware for uploaded commands
pub const SLOT_SW_FIRST: usize = 11;

bitfield! {
    /// Layout of a CMD_INFO register
    #[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
    pub struct CmdInfo(u32);

    pub u8, opcode, set_opcode: 7, 0;
    pub u8, addr_mode, set_addr_mode: 9, 8;
    pub addr_swap_en, set_addr_swap_en: 10;
    pub mbyte_en, set_mbyte_en: 11;
    pub u8, dummy_size, set_dummy_size: 14, 12;
    pub dummy_en, set_dummy_en: 15;
    pub u8, payload_en, set_payload_en: 19, 16;
    pub payload_dir, set_payload_dir: 20;
    pub payload_swap_en, set_payload_swap_en: 21;
    pub u8, read_pipeline_mode, set_read_pipeline_mode: 23, 22;
    pub upload, set_upload: 24;
    pub busy, set_busy: 25;
    pub valid, set_valid: 31;
}

pub const ADDR_MODE_DISABLED: u8 = 0;
pub const ADDR_MODE_CFG: u8 = 1;
pub const ADDR_MODE_3B: u8 = 2;
pub const ADDR_MODE_4B: u8 = 3;

/// Special slots only carry an opcode and a valid bit.
pub const SPECIAL_MASK: u32 = 0x8000_00ff;

impl CmdInfo {
    /// Address bytes the command carries.
    pub fn addr_bytes(&self, addr_4b: bool) -> usize {
        match self.addr_mode() {
            ADDR_MODE_CFG if addr_4b => 4,
            ADDR_MODE_CFG => 3,
            ADDR_MODE_3B => 3,
            ADDR_MODE_4B => 4,
            _ => 0,
        }
    }

    fn hw(opcode: u8, addr_mode: u8, dummy: bool, mbyte: bool, lanes: u8) -> Self {
        let mut info = CmdInfo(0);
        info.set_opcode(opcode);
        info.set_addr_mode(addr_mode);
        info.set_dummy_en(dummy);
        info.set_dummy_size(7);
        info.set_mbyte_en(mbyte);
        info.set_payload_en(lanes);
        info.set_payload_dir(true);
        info.set_valid(true);
        info
    }

    fn special(opcode: u8) -> Self {
        let mut info = CmdInfo(0);
        info.set_opcode(opcode);
        info.set_valid(true);
        info
    }
}

/// What the engine does with a decoded command.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CmdKind {
    /// READ_STATUS1..3; the byte index into FLASH_STATUS
    ReadStatus(usize),
    ReadJedec,
    ReadSfdp,
    ReadData,
    /// Firmware handled command
    Upload,
    En4b,
    Ex4b,
    Wren,
    Wrdi,
}

impl CmdKind {
    /// Kind of command configured in slot `slot`.
    pub fn for_slot(slot: usize) -> Self {
        match slot {
            0..=2 => CmdKind::ReadStatus(slot),
            3 => CmdKind::ReadJedec,
            4 => CmdKind::ReadSfdp,
            s if s < SLOT_SW_FIRST => CmdKind::ReadData,
            _ => CmdKind::Upload,
        }
    }
}

/// Reset programming of the slots: the usual SPI NOR opcodes for the
/// hardware-handled commands, nothing for the firmware slots.
pub fn default_slots() -> [u32; SLOT_COUNT] {
    let mut slots = [0u32; SLOT_COUNT];
    let table = [
        CmdInfo::hw(0x05, ADDR_MODE_DISABLED, false, false, 0x2),
        CmdInfo::hw(0x35, ADDR_MODE_DISABLED, false, false, 0x2),
        CmdInfo::hw(0x15, ADDR_MODE_DISABLED, false, false, 0x2),
        CmdInfo::hw(0x9f, ADDR_MODE_DISABLED, false, false, 0x2),
        CmdInfo::hw(0x5a, ADDR_MODE_3B, true, false, 0x2),
        CmdInfo::hw(0x03, ADDR_MODE_CFG, false, false, 0x2),
        CmdInfo::hw(0x0b, ADDR_MODE_CFG, true, false, 0x2),
        CmdInfo::hw(0x3b, ADDR_MODE_CFG, true, false, 0x3),
        CmdInfo::hw(0x6b, ADDR_MODE_CFG, true, false, 0xf),
        CmdInfo::hw(0xbb, ADDR_MODE_CFG, false, true, 0x3),
        CmdInfo::hw(0xeb, ADDR_MODE_CFG, true, true, 0xf),
    ];
    for (slot, info) in slots.iter_mut().zip(table) {
        *slot = info.0;
    }
    slots
}

/// Reset programming of EN4B, EX4B, WREN and WRDI.
pub fn default_special_slots() -> [u32; 4] {
    [
        CmdInfo::special(0xb7).0,
        CmdInfo::special(0xe9).0,
        CmdInfo::special(0x06).0,
        CmdInfo::special(0x04).0,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fast_read_slot() {
        let info = CmdInfo(default_slots()[6]);
        assert_eq!(info.opcode(), 0x0b);
        assert!(info.valid());
        assert!(info.dummy_en());
        assert!(!info.upload());
        assert_eq!(info.addr_bytes(false), 3);
        assert_eq!(info.addr_bytes(true), 4);
        assert_eq!(CmdKind::for_slot(6), CmdKind::ReadData);
    }

    #[test]
    fn test_special_slots() {
        let slots = default_special_slots();
        assert_eq!(slots[0], 0x8000_00b7);
        assert!(slots.iter().all(|s| s & !SPECIAL_MASK == 0));
        assert_eq!(CmdKind::for_slot(SLOT_SW_FIRST), CmdKind::Upload);
    }
}
