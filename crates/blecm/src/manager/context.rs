//! State shared by every connection manager component

use crate::config::CmConfig;
use crate::device::DeviceTable;
use crate::event::EventQueue;
use crate::hal::Hal;
use crate::nvm::Nvm;
use crate::security::BondStore;
use crate::types::{BondId, Cid, DeviceId, TypedBdAddr};
use log::debug;

/// Collaborators and tables handed to the role controllers, the discovery
/// engine and the security manager
pub struct Context<H: Hal, N: Nvm> {
    pub hal: H,
    pub nvm: N,
    pub config: CmConfig,
    pub devices: DeviceTable,
    pub bonds: BondStore,
    pub events: EventQueue,
}

impl<H: Hal, N: Nvm> Context<H, N> {
    pub fn new(config: CmConfig, hal: H, nvm: N) -> Self {
        Self {
            devices: DeviceTable::new(config.max_connections),
            bonds: BondStore::new(config.max_bonded_devices, config.nvm_offset),
            events: EventQueue::new(),
            hal,
            nvm,
            config,
        }
    }

    /// Device owning a link, if the link is still known.
    ///
    /// Events for a link that has already been torn down are a harmless
    /// race with disconnection; they are logged and dropped by the caller.
    pub fn device_for(&self, cid: Cid) -> Option<DeviceId> {
        let device = self.devices.find_by_cid(cid);
        if device.is_none() {
            debug!("Dropping event for unknown link {}", cid);
        }
        device
    }

    /// Link of a connected device
    pub fn connected_cid(&self, device: DeviceId) -> Option<Cid> {
        let record = self.devices.get(device);
        if self.devices.is_connected(device) {
            record.cid
        } else {
            None
        }
    }

    /// Bond a peer address belongs to
    pub fn find_bond(&self, addr: &TypedBdAddr) -> Option<BondId> {
        self.bonds
            .find(addr, |a, irk| self.hal.resolve_private_address(a, irk))
    }
}
