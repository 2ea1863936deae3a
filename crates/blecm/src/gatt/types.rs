//! Common types for GATT client discovery and server dispatch

use crate::types::{BondId, DeviceId};
use crate::uuid::Uuid;
use bitflags::bitflags;
use std::fmt;

bitflags! {
    /// Characteristic properties as defined by the Bluetooth Core
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CharacteristicProperty: u8 {
        const BROADCAST = 0x01;
        const READ = 0x02;
        const WRITE_WITHOUT_RESPONSE = 0x04;
        const WRITE = 0x08;
        const NOTIFY = 0x10;
        const INDICATE = 0x20;
        const AUTHENTICATED_SIGNED_WRITES = 0x40;
        const EXTENDED_PROPERTIES = 0x80;
    }
}

impl CharacteristicProperty {
    pub fn can_read(&self) -> bool {
        self.contains(Self::READ)
    }

    pub fn can_write(&self) -> bool {
        self.contains(Self::WRITE)
    }

    pub fn can_write_without_response(&self) -> bool {
        self.contains(Self::WRITE_WITHOUT_RESPONSE)
    }

    pub fn can_notify(&self) -> bool {
        self.contains(Self::NOTIFY)
    }

    pub fn can_indicate(&self) -> bool {
        self.contains(Self::INDICATE)
    }
}

/// Identifier of a registered GATT client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(pub(crate) usize);

impl ClientId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a registered GATT server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServerId(pub(crate) usize);

impl ServerId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Characteristic a client wants discovered, with the descriptors it needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicTemplate {
    pub uuid: Uuid,
    pub descriptors: Vec<Uuid>,
}

impl CharacteristicTemplate {
    pub fn new(uuid: Uuid) -> Self {
        Self {
            uuid,
            descriptors: Vec::new(),
        }
    }

    pub fn with_descriptor(mut self, uuid: Uuid) -> Self {
        self.descriptors.push(uuid);
        self
    }
}

/// Service type a client registers for discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceTemplate {
    pub uuid: Uuid,
    /// Discovery fails unless at least one mandatory service is found
    pub mandatory: bool,
    /// Number of instance slots, shared across all peers
    pub instances: usize,
    pub characteristics: Vec<CharacteristicTemplate>,
}

impl ServiceTemplate {
    pub fn new(uuid: Uuid) -> Self {
        Self {
            uuid,
            mandatory: false,
            instances: 1,
            characteristics: Vec::new(),
        }
    }

    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    pub fn with_instances(mut self, instances: usize) -> Self {
        self.instances = instances;
        self
    }

    pub fn with_characteristic(mut self, characteristic: CharacteristicTemplate) -> Self {
        self.characteristics.push(characteristic);
        self
    }
}

/// A descriptor found during discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDescriptor {
    pub uuid: Uuid,
    pub handle: u16,
}

/// A characteristic found during discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredCharacteristic {
    pub uuid: Uuid,
    /// Index of the matching entry in the service template
    pub template: usize,
    pub declaration_handle: u16,
    pub value_handle: u16,
    pub properties: CharacteristicProperty,
    /// Last handle belonging to this characteristic
    pub end_handle: u16,
    pub descriptors: Vec<DiscoveredDescriptor>,
}

impl DiscoveredCharacteristic {
    pub fn descriptor(&self, uuid: &Uuid) -> Option<u16> {
        self.descriptors
            .iter()
            .find(|descriptor| descriptor.uuid == *uuid)
            .map(|descriptor| descriptor.handle)
    }
}

/// One discovered occurrence of a registered service type
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceInstance {
    /// Device the instance was discovered on, while it is connected
    pub device: Option<DeviceId>,
    /// Bond the instance belongs to; reserved for that peer across links
    pub bond: Option<BondId>,
    pub start_handle: u16,
    pub end_handle: u16,
    pub characteristics: Vec<DiscoveredCharacteristic>,
}

impl ServiceInstance {
    /// Neither in use by a link nor reserved for a bonded peer
    pub fn is_free(&self) -> bool {
        self.device.is_none() && self.bond.is_none()
    }

    pub fn contains(&self, handle: u16) -> bool {
        (self.start_handle..=self.end_handle).contains(&handle)
    }

    pub fn characteristic(&self, uuid: &Uuid) -> Option<&DiscoveredCharacteristic> {
        self.characteristics.iter().find(|c| c.uuid == *uuid)
    }

    pub(crate) fn reset(&mut self) {
        self.start_handle = 0;
        self.end_handle = 0;
        self.characteristics.clear();
    }
}

/// Outcome of a discovery session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryStatus {
    Success,
    MandatoryServiceNotFound,
    ServiceDiscoveryFailed,
    CharDiscoveryFailed,
    DescDiscoveryFailed,
}

impl DiscoveryStatus {
    pub fn is_success(self) -> bool {
        self == DiscoveryStatus::Success
    }
}
