//! Device table
//!
//! One [`ConnectionRecord`] per slot, `max_connections` slots. The slot
//! index is the [`DeviceId`]; a slot without a link identifier is free and
//! is handed to the next incoming connection.

use crate::security::BondKeys;
use crate::types::{BondId, Cid, ConnParams, DeviceId, Role, SecurityLevel, TypedBdAddr};
use log::debug;

/// Lifecycle of a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Init,
    Connected,
    Disconnecting,
    Disconnected,
}

/// State kept for one link
#[derive(Debug, Clone)]
pub struct ConnectionRecord {
    /// Link identifier; `None` marks a free slot
    pub cid: Option<Cid>,
    pub peer: TypedBdAddr,
    /// Role of the peer on this link
    pub peer_role: Role,
    pub state: DeviceState,
    pub bond_id: Option<BondId>,
    pub params: ConnParams,
    pub encrypted: bool,
    pub security_level: SecurityLevel,
    /// Keys distributed during pairing, kept until pairing completes
    pub pending_keys: Option<BondKeys>,
    /// Unbond requested while connected; performed on disconnect
    pub pending_unbond: bool,
    /// Handle of the outstanding characteristic read
    pub ongoing_read: Option<u16>,
    /// Handle of the outstanding characteristic write
    pub ongoing_write: Option<u16>,
}

impl ConnectionRecord {
    fn empty() -> Self {
        Self {
            cid: None,
            peer: TypedBdAddr::public([0; 6]),
            peer_role: Role::Central,
            state: DeviceState::Init,
            bond_id: None,
            params: ConnParams::default(),
            encrypted: false,
            security_level: SecurityLevel::None,
            pending_keys: None,
            pending_unbond: false,
            ongoing_read: None,
            ongoing_write: None,
        }
    }

    pub fn is_free(&self) -> bool {
        self.cid.is_none()
    }

    /// Connected or on its way down
    pub fn is_live(&self) -> bool {
        matches!(
            self.state,
            DeviceState::Connected | DeviceState::Disconnecting
        ) && self.cid.is_some()
    }
}

/// Fixed-capacity table of connection records
#[derive(Debug)]
pub struct DeviceTable {
    slots: Vec<ConnectionRecord>,
}

impl DeviceTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| ConnectionRecord::empty()).collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn check(&self, id: DeviceId) {
        assert!(
            id.0 < self.slots.len(),
            "device id {} out of range (max_connections {})",
            id.0,
            self.slots.len()
        );
    }

    /// Claim the first free slot for a new link
    ///
    /// Returns `None` when every slot is in use.
    pub fn claim(
        &mut self,
        cid: Cid,
        peer: TypedBdAddr,
        peer_role: Role,
        params: ConnParams,
    ) -> Option<DeviceId> {
        if let Some(existing) = self.find_by_cid(cid) {
            panic!("link {} already owned by device {}", cid, existing);
        }

        let index = self.slots.iter().position(ConnectionRecord::is_free)?;
        self.slots[index] = ConnectionRecord {
            cid: Some(cid),
            peer,
            peer_role,
            state: DeviceState::Connected,
            params,
            ..ConnectionRecord::empty()
        };
        debug!("Device {} claimed for {} on link {}", index, peer, cid);
        Some(DeviceId(index))
    }

    /// Access a slot; panics if `id` is out of range
    pub fn get(&self, id: DeviceId) -> &ConnectionRecord {
        self.check(id);
        &self.slots[id.0]
    }

    pub fn get_mut(&mut self, id: DeviceId) -> &mut ConnectionRecord {
        self.check(id);
        &mut self.slots[id.0]
    }

    pub fn find_by_cid(&self, cid: Cid) -> Option<DeviceId> {
        self.slots
            .iter()
            .position(|record| record.cid == Some(cid))
            .map(DeviceId)
    }

    /// Linear lookup of a live device by peer address
    pub fn find_by_addr(&self, addr: &TypedBdAddr) -> Option<DeviceId> {
        self.slots
            .iter()
            .position(|record| record.is_live() && record.peer == *addr)
            .map(DeviceId)
    }

    pub fn find_by_bond(&self, bond: BondId) -> Option<DeviceId> {
        self.slots
            .iter()
            .position(|record| record.is_live() && record.bond_id == Some(bond))
            .map(DeviceId)
    }

    pub fn state(&self, id: DeviceId) -> DeviceState {
        self.get(id).state
    }

    pub fn is_connected(&self, id: DeviceId) -> bool {
        self.get(id).state == DeviceState::Connected
    }

    /// Move a slot to `state`. Entering `Disconnected` frees the slot.
    pub fn set_state(&mut self, id: DeviceId, state: DeviceState) {
        let record = self.get_mut(id);
        debug!("Device {} {:?} -> {:?}", id, record.state, state);
        record.state = state;
        if state == DeviceState::Disconnected {
            record.cid = None;
            record.encrypted = false;
            record.security_level = SecurityLevel::None;
            record.pending_keys = None;
            record.ongoing_read = None;
            record.ongoing_write = None;
        }
    }

    /// Devices currently in the `Connected` state
    pub fn connected(&self) -> impl Iterator<Item = (DeviceId, &ConnectionRecord)> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, record)| record.state == DeviceState::Connected && record.cid.is_some())
            .map(|(index, record)| (DeviceId(index), record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(last: u8) -> TypedBdAddr {
        TypedBdAddr::public([last, 0x22, 0x33, 0x44, 0x55, 0x66])
    }

    #[test]
    fn test_claim_fills_first_free_slot() {
        let mut table = DeviceTable::new(2);
        let first = table
            .claim(Cid(0x40), peer(1), Role::Central, ConnParams::default())
            .unwrap();
        let second = table
            .claim(Cid(0x41), peer(2), Role::Peripheral, ConnParams::default())
            .unwrap();
        assert_eq!(first.index(), 0);
        assert_eq!(second.index(), 1);

        // Table full
        assert!(table
            .claim(Cid(0x42), peer(3), Role::Central, ConnParams::default())
            .is_none());

        table.set_state(first, DeviceState::Disconnected);
        assert!(table.get(first).is_free());
        let reused = table
            .claim(Cid(0x42), peer(3), Role::Central, ConnParams::default())
            .unwrap();
        assert_eq!(reused, first);
        assert_eq!(table.find_by_cid(Cid(0x42)), Some(first));
        assert_eq!(table.find_by_cid(Cid(0x40)), None);
    }

    #[test]
    fn test_disconnected_resets_link_state() {
        let mut table = DeviceTable::new(1);
        let id = table
            .claim(Cid(0x40), peer(1), Role::Central, ConnParams::default())
            .unwrap();
        {
            let record = table.get_mut(id);
            record.encrypted = true;
            record.ongoing_read = Some(0x10);
            record.bond_id = Some(BondId(0));
        }
        assert_eq!(table.find_by_bond(BondId(0)), Some(id));
        assert_eq!(table.find_by_addr(&peer(1)), Some(id));

        table.set_state(id, DeviceState::Disconnecting);
        assert_eq!(table.connected().count(), 0);
        assert_eq!(table.find_by_addr(&peer(1)), Some(id));

        table.set_state(id, DeviceState::Disconnected);
        let record = table.get(id);
        assert_eq!(record.cid, None);
        assert!(!record.encrypted);
        assert_eq!(record.ongoing_read, None);
        assert_eq!(table.find_by_addr(&peer(1)), None);
        assert_eq!(table.find_by_bond(BondId(0)), None);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_out_of_range_id_panics() {
        let table = DeviceTable::new(2);
        table.get(DeviceId(2));
    }

    #[test]
    #[should_panic(expected = "already owned")]
    fn test_duplicate_cid_panics() {
        let mut table = DeviceTable::new(2);
        table.claim(Cid(0x40), peer(1), Role::Central, ConnParams::default());
        table.claim(Cid(0x40), peer(2), Role::Central, ConnParams::default());
    }
}
