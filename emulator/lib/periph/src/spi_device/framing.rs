/*++

Licensed under the Apache-2.0 license.

File Name:

    framing.rs

Abstract:

    File contains the chip-select framing of the SPI byte stream.

--*/

use bitfield::bitfield;

pub const HEADER_SIZE: usize = 8;
pub const HEADER_MAGIC: [u8; 3] = *b"/CS";
pub const HEADER_VERSION: u8 = 0;

bitfield! {
    /// Transaction control word following the magic
    #[derive(Default, PartialEq, Eq, Clone, Copy)]
    pub struct CsWord(u32);

    /// CPOL, CPHA, TX and RX bit order of the host
    pub u8, mode, set_mode: 3, 0;

    /// Raise chip select after the last payload byte
    pub release, set_release: 7;

    /// Number of payload bytes following the header
    pub u16, byte_count, set_byte_count: 31, 16;
}

impl std::fmt::Debug for CsWord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsWord")
            .field("mode", &self.mode())
            .field("release", &self.release())
            .field("byte_count", &self.byte_count())
            .finish()
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum HeaderError {
    BadMagic([u8; 4]),
}

/// Accumulates header bytes until a full header is available.
#[derive(Default)]
pub struct HeaderParser {
    buf: Vec<u8>,
}

impl HeaderParser {
    /// Bytes still missing to complete the header.
    pub fn missing(&self) -> usize {
        HEADER_SIZE - self.buf.len()
    }

    /// Feeds one byte. Returns the control word once the header completes.
    pub fn push(&mut self, byte: u8) -> Result<Option<CsWord>, HeaderError> {
        self.buf.push(byte);
        if self.buf.len() < HEADER_SIZE {
            return Ok(None);
        }
        let magic = [self.buf[0], self.buf[1], self.buf[2], self.buf[3]];
        let word = u32::from_le_bytes([self.buf[4], self.buf[5], self.buf[6], self.buf[7]]);
        self.buf.clear();
        if magic[..3] != HEADER_MAGIC || magic[3] != HEADER_VERSION {
            return Err(HeaderError::BadMagic(magic));
        }
        Ok(Some(CsWord(word)))
    }
}

/// Encodes a transaction header, as sent by the host side.
pub fn encode_header(byte_count: u16, release: bool, mode: u8) -> [u8; HEADER_SIZE] {
    let mut word = CsWord(0);
    word.set_byte_count(byte_count);
    word.set_release(release);
    word.set_mode(mode & 0xf);
    let mut hdr = [0u8; HEADER_SIZE];
    hdr[..3].copy_from_slice(&HEADER_MAGIC);
    hdr[3] = HEADER_VERSION;
    hdr[4..].copy_from_slice(&word.0.to_le_bytes());
    hdr
}
