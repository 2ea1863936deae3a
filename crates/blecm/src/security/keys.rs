//! Keys kept for a bonded device
//!
//! The connection manager never derives keys itself; it stores what the
//! security manager distributed during pairing and hands it back when the
//! link is re-encrypted.

use crate::types::SecurityLevel;

/// Long Term Key (LTK) information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LongTermKey {
    /// Key value
    pub key: [u8; 16],
    /// EDIV (Encrypted Diversifier)
    pub ediv: u16,
    /// RAND (Random number)
    pub rand: [u8; 8],
}

impl LongTermKey {
    pub fn new(key: [u8; 16], ediv: u16, rand: [u8; 8]) -> Self {
        Self { key, ediv, rand }
    }

    /// Whether an LTK request with this EDIV/Rand pair refers to this key
    pub fn matches(&self, ediv: u16, rand: &[u8; 8]) -> bool {
        self.ediv == ediv && &self.rand == rand
    }
}

/// Identity Resolving Key (IRK)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentityResolvingKey {
    pub key: [u8; 16],
}

impl IdentityResolvingKey {
    pub fn new(key: [u8; 16]) -> Self {
        Self { key }
    }
}

/// Keys negotiated with a bonded peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BondKeys {
    pub ltk: LongTermKey,
    /// Diversifier the local LTK was generated from
    pub div: u16,
    pub irk: Option<IdentityResolvingKey>,
    /// Negotiated encryption key size in octets (7..=16)
    pub key_size: u8,
    pub level: SecurityLevel,
}

impl BondKeys {
    pub fn new(ltk: LongTermKey, div: u16, level: SecurityLevel) -> Self {
        Self {
            ltk,
            div,
            irk: None,
            key_size: 16,
            level,
        }
    }

    pub fn with_irk(mut self, irk: IdentityResolvingKey) -> Self {
        self.irk = Some(irk);
        self
    }
}
