//! Persisted bonding table
//!
//! Layout in NVM, starting at the configured word offset:
//!
//! ```text
//! [sanity word][record 0][record 1]...[record n-1]
//! ```
//!
//! Each record is `BOND_RECORD_WORDS` little-endian words. A record whose
//! flags octet lacks the bonded bit is a free slot. If the sanity word does
//! not match, the region is treated as uninitialised and erased.

use super::keys::{BondKeys, IdentityResolvingKey, LongTermKey};
use crate::error::{CmError, CmResult};
use crate::nvm::{Nvm, NvmError};
use crate::types::{AddressType, BdAddr, BondId, Role, SecurityLevel, TypedBdAddr};
use byteorder::{ByteOrder, LittleEndian};
use log::{debug, info, warn};

/// Marker stored in front of the bonding records
pub const NVM_SANITY: u16 = 0xB0D5;

/// Size of one persisted bonding record
pub const BOND_RECORD_WORDS: usize = 28;
const BOND_RECORD_BYTES: usize = BOND_RECORD_WORDS * 2;

const FLAG_BONDED: u8 = 0x01;
const FLAG_HAS_IRK: u8 = 0x02;

// Byte offsets inside an encoded record
const OFF_FLAGS: usize = 0;
const OFF_ROLE: usize = 1;
const OFF_ADDR_TYPE: usize = 2;
const OFF_ADDR: usize = 3;
const OFF_LEVEL: usize = 9;
const OFF_KEY_SIZE: usize = 10;
const OFF_LTK: usize = 12;
const OFF_EDIV: usize = 28;
const OFF_RAND: usize = 30;
const OFF_DIV: usize = 38;
const OFF_IRK: usize = 40;

/// A bonded peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BondRecord {
    pub peer: TypedBdAddr,
    pub peer_role: Role,
    pub keys: BondKeys,
}

impl BondRecord {
    /// Whether `addr` identifies this peer.
    ///
    /// A resolvable private address can only match through the record's
    /// IRK; any other address must be identical to the stored one.
    pub fn matches_address<R>(&self, addr: &TypedBdAddr, resolve: R) -> bool
    where
        R: Fn(&BdAddr, &[u8; 16]) -> bool,
    {
        if addr.is_resolvable_private() {
            self.keys
                .irk
                .map_or(false, |irk| resolve(&addr.addr, &irk.key))
        } else {
            self.peer == *addr
        }
    }

    fn encode(&self) -> [u8; BOND_RECORD_BYTES] {
        let mut bytes = [0u8; BOND_RECORD_BYTES];
        let mut flags = FLAG_BONDED;
        if self.keys.irk.is_some() {
            flags |= FLAG_HAS_IRK;
        }
        bytes[OFF_FLAGS] = flags;
        bytes[OFF_ROLE] = match self.peer_role {
            Role::Central => 0,
            Role::Peripheral => 1,
        };
        bytes[OFF_ADDR_TYPE] = self.peer.addr_type.into();
        bytes[OFF_ADDR..OFF_ADDR + 6].copy_from_slice(self.peer.addr.as_slice());
        bytes[OFF_LEVEL] = self.keys.level.to_u8();
        bytes[OFF_KEY_SIZE] = self.keys.key_size;
        bytes[OFF_LTK..OFF_LTK + 16].copy_from_slice(&self.keys.ltk.key);
        LittleEndian::write_u16(&mut bytes[OFF_EDIV..OFF_EDIV + 2], self.keys.ltk.ediv);
        bytes[OFF_RAND..OFF_RAND + 8].copy_from_slice(&self.keys.ltk.rand);
        LittleEndian::write_u16(&mut bytes[OFF_DIV..OFF_DIV + 2], self.keys.div);
        if let Some(irk) = &self.keys.irk {
            bytes[OFF_IRK..OFF_IRK + 16].copy_from_slice(&irk.key);
        }
        bytes
    }

    fn decode(bytes: &[u8; BOND_RECORD_BYTES]) -> Option<Self> {
        let flags = bytes[OFF_FLAGS];
        // Erased storage reads back as all ones
        if flags & FLAG_BONDED == 0 || flags == 0xFF {
            return None;
        }
        let peer_role = match bytes[OFF_ROLE] {
            0 => Role::Central,
            1 => Role::Peripheral,
            _ => return None,
        };
        let level = SecurityLevel::from_u8(bytes[OFF_LEVEL])?;
        let peer = TypedBdAddr {
            addr_type: AddressType::from(bytes[OFF_ADDR_TYPE]),
            addr: BdAddr::from_slice(&bytes[OFF_ADDR..OFF_ADDR + 6])?,
        };

        let mut key = [0u8; 16];
        key.copy_from_slice(&bytes[OFF_LTK..OFF_LTK + 16]);
        let mut rand = [0u8; 8];
        rand.copy_from_slice(&bytes[OFF_RAND..OFF_RAND + 8]);
        let ltk = LongTermKey::new(key, LittleEndian::read_u16(&bytes[OFF_EDIV..]), rand);

        let irk = if flags & FLAG_HAS_IRK != 0 {
            let mut irk = [0u8; 16];
            irk.copy_from_slice(&bytes[OFF_IRK..OFF_IRK + 16]);
            Some(IdentityResolvingKey::new(irk))
        } else {
            None
        };

        Some(BondRecord {
            peer,
            peer_role,
            keys: BondKeys {
                ltk,
                div: LittleEndian::read_u16(&bytes[OFF_DIV..]),
                irk,
                key_size: bytes[OFF_KEY_SIZE],
                level,
            },
        })
    }
}

fn record_to_words(record: Option<&BondRecord>) -> [u16; BOND_RECORD_WORDS] {
    let bytes = record.map_or([0u8; BOND_RECORD_BYTES], BondRecord::encode);
    let mut words = [0u16; BOND_RECORD_WORDS];
    LittleEndian::read_u16_into(&bytes, &mut words);
    words
}

fn record_from_words(words: &[u16; BOND_RECORD_WORDS]) -> Option<BondRecord> {
    let mut bytes = [0u8; BOND_RECORD_BYTES];
    LittleEndian::write_u16_into(words, &mut bytes);
    BondRecord::decode(&bytes)
}

/// Fixed-capacity bonding table mirrored to NVM
#[derive(Debug)]
pub struct BondStore {
    slots: Vec<Option<BondRecord>>,
    nvm_offset: u16,
}

impl BondStore {
    pub fn new(capacity: usize, nvm_offset: u16) -> Self {
        Self {
            slots: vec![None; capacity],
            nvm_offset,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of words the store occupies in NVM
    pub fn nvm_words(&self) -> usize {
        1 + self.slots.len() * BOND_RECORD_WORDS
    }

    /// Word offset of a record; `CmConfig::validate` keeps the region
    /// inside the NVM word space
    fn record_offset(&self, id: BondId) -> u16 {
        (self.nvm_offset as usize + 1 + id.0 * BOND_RECORD_WORDS) as u16
    }

    /// Read every record from NVM, erasing the region if it was never
    /// initialised
    pub fn load<N: Nvm>(&mut self, nvm: &mut N) -> Result<(), NvmError> {
        let mut sanity = [0u16; 1];
        nvm.read(self.nvm_offset, &mut sanity)?;

        if sanity[0] != NVM_SANITY {
            warn!(
                "Bonding region at word {} not initialised (0x{:04X}), erasing",
                self.nvm_offset, sanity[0]
            );
            for index in 0..self.slots.len() {
                self.slots[index] = None;
                self.persist(nvm, BondId(index))?;
            }
            return nvm.write(self.nvm_offset, &[NVM_SANITY]);
        }

        for index in 0..self.slots.len() {
            let mut words = [0u16; BOND_RECORD_WORDS];
            nvm.read(self.record_offset(BondId(index)), &mut words)?;
            self.slots[index] = record_from_words(&words);
            if let Some(record) = &self.slots[index] {
                debug!("Loaded bond {} for {}", index, record.peer);
            }
        }
        info!("Loaded {} bonded device(s)", self.len());
        Ok(())
    }

    /// Rewrite one record in NVM
    pub fn persist<N: Nvm>(&self, nvm: &mut N, id: BondId) -> Result<(), NvmError> {
        let words = record_to_words(self.slots[id.0].as_ref());
        nvm.write(self.record_offset(id), &words)
    }

    pub fn get(&self, id: BondId) -> Option<&BondRecord> {
        self.slots.get(id.0).and_then(Option::as_ref)
    }

    pub fn is_bonded(&self, id: BondId) -> bool {
        self.get(id).is_some()
    }

    /// Find the bond a peer address belongs to
    pub fn find<R>(&self, addr: &TypedBdAddr, resolve: R) -> Option<BondId>
    where
        R: Fn(&BdAddr, &[u8; 16]) -> bool,
    {
        self.iter()
            .find(|(_, record)| record.matches_address(addr, &resolve))
            .map(|(id, _)| id)
    }

    /// Store keys for a peer, overwriting the record already held for the
    /// same address
    pub fn store<N, R>(
        &mut self,
        nvm: &mut N,
        peer: TypedBdAddr,
        peer_role: Role,
        keys: BondKeys,
        resolve: R,
    ) -> CmResult<BondId>
    where
        N: Nvm,
        R: Fn(&BdAddr, &[u8; 16]) -> bool,
    {
        // An RPA stored without an IRK can only be found again by equality
        let existing = self
            .iter()
            .find(|(_, record)| record.peer == peer)
            .map(|(id, _)| id)
            .or_else(|| self.find(&peer, resolve));
        let id = match existing {
            Some(id) => id,
            None => self
                .slots
                .iter()
                .position(Option::is_none)
                .map(BondId)
                .ok_or(CmError::BondTableFull)?,
        };

        self.slots[id.0] = Some(BondRecord {
            peer,
            peer_role,
            keys,
        });
        self.persist(nvm, id)?;
        info!("Stored bond {} for {}", id, peer);
        Ok(id)
    }

    /// Clear a record and rewrite it in NVM
    pub fn remove<N: Nvm>(&mut self, nvm: &mut N, id: BondId) -> CmResult<BondRecord> {
        let record = self
            .slots
            .get_mut(id.0)
            .and_then(Option::take)
            .ok_or(CmError::BondNotFound(id))?;
        self.persist(nvm, id)?;
        info!("Removed bond {} for {}", id, record.peer);
        Ok(record)
    }

    /// Iterate over bonded records
    pub fn iter(&self) -> impl Iterator<Item = (BondId, &BondRecord)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|record| (BondId(index), record)))
    }

    /// Number of bonded records
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
