/*++

Licensed under the Apache-2.0 license.

File Name:

    lifecycle.rs

Abstract:

    File contains the encodings of the life cycle state and transition
    counter stored in the LIFE_CYCLE partition, and their decoding into
    canonical values.

--*/

use lazy_static::lazy_static;
use ot_emu_types::emu_enum;

use super::partitions::item::{LC_STATE_SIZE, LC_TRANSITION_CNT_SIZE};

emu_enum!(
    /// Canonical life cycle state
    #[derive(Debug, Eq, PartialEq, Copy, Clone)]
    pub LcState;
    u32;
    {
        Raw = 0,
        TestUnlocked0 = 1,
        TestLocked0 = 2,
        TestUnlocked1 = 3,
        TestLocked1 = 4,
        TestUnlocked2 = 5,
        TestLocked2 = 6,
        TestUnlocked3 = 7,
        TestLocked3 = 8,
        TestUnlocked4 = 9,
        TestLocked4 = 10,
        TestUnlocked5 = 11,
        TestLocked5 = 12,
        TestUnlocked6 = 13,
        TestLocked6 = 14,
        TestUnlocked7 = 15,
        Dev = 16,
        Prod = 17,
        ProdEnd = 18,
        Rma = 19,
        Scrap = 20,
    };
    Invalid
);

/// 5-bit canonical value reported for undecodable states.
pub const LC_STATE_INVALID: u32 = 23;

/// Largest transition count.
pub const LC_TRANSITION_COUNT_MAX: u32 = 24;

const LC_STATE_WORDS: usize = LC_STATE_SIZE / 2;
const LC_CNT_WORDS: usize = LC_TRANSITION_CNT_SIZE / 2;

pub(crate) const LC_STATE_A: [u16; 20] = [
    0x0eff, 0xcccf, 0x4768, 0xe6fb, 0xe08d, 0xefc2, 0x8c6a, 0x4f5f,
    0x4878, 0xf596, 0xa3b7, 0x1ee4, 0x80e2, 0x6a93, 0x18ec, 0x1875,
    0xc320, 0x75fa, 0x0300, 0x1dd6,
];

pub(crate) const LC_STATE_B: [u16; 20] = [
    0x7fff, 0xddff, 0xd77f, 0xffff, 0xfbed, 0xfff3, 0xdf7b, 0xff7f,
    0xf978, 0xffbf, 0xeff7, 0xdfee, 0xf5f6, 0x7af7, 0x3cfe, 0xb9f7,
    0xd76d, 0xffff, 0x33b3, 0x5ff7,
];

pub(crate) const LC_CNT_C: [u16; 24] = [
    0xb5dc, 0xa6aa, 0xc056, 0x4ca2, 0x204b, 0x2cb2, 0x0869, 0xe0ca,
    0xfa98, 0xaced, 0x6a19, 0xc0a4, 0xf345, 0xa873, 0x612a, 0x661e,
    0x2e33, 0x604f, 0x09b5, 0x51e8, 0xc537, 0x8234, 0x7fca, 0xc980,
];

pub(crate) const LC_CNT_D: [u16; 24] = [
    0xbdff, 0xeeee, 0xceff, 0xfee6, 0xaceb, 0x7fb6, 0x2eed, 0xffeb,
    0xffdc, 0xbdff, 0xfbbb, 0xfca5, 0xf7ef, 0xedf7, 0xe76e, 0xf7bf,
    0x3fb7, 0xe5ff, 0xbfff, 0xd7fe, 0xd7f7, 0xb63e, 0xfffe, 0xeb95,
];

fn encode_words<const N: usize>(k: usize, lo: &[u16], hi: &[u16]) -> Vec<u8> {
    let mut out = vec![0u8; 2 * N];
    if k == 0 {
        return out;
    }
    for (i, chunk) in out.chunks_exact_mut(2).enumerate() {
        let word = if i < k { hi[i] } else { lo[i] };
        chunk.copy_from_slice(&word.to_le_bytes());
    }
    out
}

lazy_static! {
    static ref LC_STATE_ENCODINGS: Vec<Vec<u8>> = LcState::ALL
        .iter()
        .map(|s| encode_words::<LC_STATE_WORDS>(u32::from(*s) as usize, &LC_STATE_A, &LC_STATE_B))
        .collect();
    static ref LC_CNT_ENCODINGS: Vec<Vec<u8>> = (0..=LC_TRANSITION_COUNT_MAX as usize)
        .map(|k| encode_words::<LC_CNT_WORDS>(k, &LC_CNT_C, &LC_CNT_D))
        .collect();
}

/// Replicates a 5-bit state six times into a 30-bit word.
pub fn replicate_state(state: u32) -> u32 {
    (0..6).fold(0, |acc, i| acc | ((state & 0x1f) << (5 * i)))
}

/// Storage encoding of `state`.
pub fn encode_state(state: LcState) -> Vec<u8> {
    match state.value() {
        Some(v) => LC_STATE_ENCODINGS[v as usize].clone(),
        None => vec![0xff; LC_STATE_SIZE],
    }
}

/// Storage encoding of transition count `count` (at most 24).
pub fn encode_count(count: u32) -> Vec<u8> {
    let count = count.min(LC_TRANSITION_COUNT_MAX) as usize;
    LC_CNT_ENCODINGS[count].clone()
}

/// Decodes a state by exact match against the known encodings.
pub fn decode_state(raw: &[u8]) -> LcState {
    LC_STATE_ENCODINGS
        .iter()
        .position(|e| e.as_slice() == raw)
        .map(|i| LcState::from(i as u32))
        .unwrap_or(LcState::Invalid)
}

/// Decodes a transition count by exact match against the known encodings.
pub fn decode_count(raw: &[u8]) -> Option<u32> {
    LC_CNT_ENCODINGS
        .iter()
        .position(|e| e.as_slice() == raw)
        .map(|i| i as u32)
}
