/*++

Licensed under the Apache-2.0 license.

File Name:

    memtx.rs

Abstract:

    File contains the attributes and results of address-space transactions.

--*/

/// Attributes attached to a memory transaction.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct MemTxAttrs {
    /// Initiator role, forwarded to watchers and role-aware devices.
    pub role: u8,

    /// Secure (privileged) access
    pub secure: bool,

    /// Set when the initiator did not provide attributes.
    pub unspecified: bool,
}

impl MemTxAttrs {
    pub const UNSPECIFIED: MemTxAttrs = MemTxAttrs {
        role: 0xf,
        secure: false,
        unspecified: true,
    };

    pub fn with_role(role: u8) -> Self {
        Self {
            role,
            ..Default::default()
        }
    }
}

/// Failure of a memory transaction.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum MemTxError {
    /// No region decodes the address
    Decode,

    /// The region rejected the access
    Access,
}

pub type MemTxResult = Result<(), MemTxError>;
