/*++

Licensed under the Apache-2.0 license.

File Name:

    image.rs

Abstract:

    File contains the parser and writer of OTP backend images ("vOTP"
    header, partition data, ECC bits).

--*/

use std::path::Path;
use thiserror::Error;

pub const OTP_IMAGE_MAGIC: &[u8; 4] = b"vOTP";
pub const OTP_IMAGE_VERSION: u32 = 1;
pub const OTP_IMAGE_HEADER_SIZE: usize = 32;
const OTP_IMAGE_ALIGN: usize = 4096;

#[derive(Debug, Error)]
pub enum OtpImageError {
    #[error("OTP image is truncated: {0} bytes")]
    Truncated(usize),
    #[error("bad OTP image magic {0:02x?}")]
    BadMagic([u8; 4]),
    #[error("unsupported OTP image version {0}")]
    BadVersion(u32),
    #[error("OTP image holds {found} data bytes, expected {expected}")]
    SizeMismatch { found: usize, expected: usize },
    #[error("cannot access OTP image: {0}")]
    Io(#[from] std::io::Error),
}

/// Decoded OTP backend image.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct OtpImage {
    pub ecc_bits: u16,
    pub ecc_granule: u16,
    pub data: Vec<u8>,
    pub ecc: Vec<u8>,
}

fn le_u16(b: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([b[off], b[off + 1]])
}

fn le_u32(b: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([b[off], b[off + 1], b[off + 2], b[off + 3]])
}

impl OtpImage {
    /// Blank image of `data_size` bytes without ECC.
    pub fn blank(data_size: usize) -> Self {
        Self {
            ecc_bits: 0,
            ecc_granule: 0,
            data: vec![0; data_size],
            ecc: Vec::new(),
        }
    }

    /// Parses an image whose data section must hold `data_size` bytes.
    pub fn parse(bytes: &[u8], data_size: usize) -> Result<Self, OtpImageError> {
        if bytes.len() < OTP_IMAGE_HEADER_SIZE {
            return Err(OtpImageError::Truncated(bytes.len()));
        }
        let magic = [bytes[0], bytes[1], bytes[2], bytes[3]];
        if &magic != OTP_IMAGE_MAGIC {
            return Err(OtpImageError::BadMagic(magic));
        }
        let hlength = le_u32(bytes, 4) as usize;
        let version = le_u32(bytes, 8);
        if version != OTP_IMAGE_VERSION {
            return Err(OtpImageError::BadVersion(version));
        }
        let ecc_bits = le_u16(bytes, 12);
        let ecc_granule = le_u16(bytes, 14);
        let data_len = le_u32(bytes, 16) as usize;
        let ecc_len = le_u32(bytes, 20) as usize;
        if data_len != data_size {
            return Err(OtpImageError::SizeMismatch {
                found: data_len,
                expected: data_size,
            });
        }
        let data_start = (8 + hlength).max(OTP_IMAGE_HEADER_SIZE);
        let end = data_start + data_len + ecc_len;
        if bytes.len() < end {
            return Err(OtpImageError::Truncated(bytes.len()));
        }
        Ok(Self {
            ecc_bits,
            ecc_granule,
            data: bytes[data_start..data_start + data_len].to_vec(),
            ecc: bytes[data_start + data_len..end].to_vec(),
        })
    }

    pub fn load(path: &Path, data_size: usize) -> Result<Self, OtpImageError> {
        let bytes = std::fs::read(path)?;
        Self::parse(&bytes, data_size)
    }

    /// Serializes the image, padded to a 4 KiB multiple.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(OTP_IMAGE_HEADER_SIZE + self.data.len());
        out.extend_from_slice(OTP_IMAGE_MAGIC);
        out.extend_from_slice(&((OTP_IMAGE_HEADER_SIZE - 8) as u32).to_le_bytes());
        out.extend_from_slice(&OTP_IMAGE_VERSION.to_le_bytes());
        out.extend_from_slice(&self.ecc_bits.to_le_bytes());
        out.extend_from_slice(&self.ecc_granule.to_le_bytes());
        out.extend_from_slice(&(self.data.len() as u32).to_le_bytes());
        out.extend_from_slice(&(self.ecc.len() as u32).to_le_bytes());
        out.resize(OTP_IMAGE_HEADER_SIZE, 0);
        out.extend_from_slice(&self.data);
        out.extend_from_slice(&self.ecc);
        let padded = out.len().div_ceil(OTP_IMAGE_ALIGN) * OTP_IMAGE_ALIGN;
        out.resize(padded, 0);
        out
    }

    pub fn save(&self, path: &Path) -> Result<(), OtpImageError> {
        std::fs::write(path, self.to_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let mut image = OtpImage::blank(0x800);
        image.data[0] = 0xa5;
        image.ecc = vec![0x3c; 0x100];
        image.ecc_bits = 6;
        image.ecc_granule = 16;
        let bytes = image.to_bytes();
        assert_eq!(bytes.len(), 4096);
        assert_eq!(&bytes[0..4], b"vOTP");
        assert_eq!(le_u32(&bytes, 4), 24);
        assert_eq!(le_u32(&bytes, 8), 1);
        assert_eq!(le_u32(&bytes, 16), 0x800);
        assert_eq!(le_u32(&bytes, 20), 0x100);
        assert_eq!(bytes[32], 0xa5);
        assert_eq!(OtpImage::parse(&bytes, 0x800).unwrap(), image);
    }

    #[test]
    fn test_rejects_bad_images() {
        let bytes = OtpImage::blank(0x800).to_bytes();
        assert!(matches!(
            OtpImage::parse(&bytes[..16], 0x800),
            Err(OtpImageError::Truncated(16))
        ));
        let mut bad_magic = bytes.clone();
        bad_magic[0] = b'x';
        assert!(matches!(
            OtpImage::parse(&bad_magic, 0x800),
            Err(OtpImageError::BadMagic(_))
        ));
        let mut bad_version = bytes.clone();
        bad_version[8] = 2;
        assert!(matches!(
            OtpImage::parse(&bad_version, 0x800),
            Err(OtpImageError::BadVersion(2))
        ));
        assert!(matches!(
            OtpImage::parse(&bytes, 0x400),
            Err(OtpImageError::SizeMismatch { found: 0x800, expected: 0x400 })
        ));
        assert_eq!(
            OtpImage::parse(&bytes[..0x100], 0x800).unwrap_err().to_string(),
            "OTP image is truncated: 256 bytes"
        );
    }
}
