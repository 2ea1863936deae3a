//! GATT client discovery and server dispatch
//!
//! Attribute transport is provided by the HAL. This module matches
//! discovered services against registered client templates and routes
//! accesses to local attributes to the server owning them.

pub mod client;
pub mod server;
pub mod types;


pub use client::GattClient;
pub use server::GattServer;
pub use types::{
    CharacteristicProperty, CharacteristicTemplate, ClientId, DiscoveredCharacteristic,
    DiscoveredDescriptor, DiscoveryStatus, ServerId, ServiceInstance, ServiceTemplate,
};
