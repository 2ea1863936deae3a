//! blecm - A Bluetooth Low Energy connection manager
//!
//! This library sits between an application and a BLE controller. It keeps
//! track of connected devices, runs the central, peripheral and observer
//! roles, discovers remote GATT services for registered clients, dispatches
//! local attribute accesses to registered servers, and persists bonding
//! information to non-volatile memory.
//!
//! The controller is reached through the [`Hal`] trait and storage through
//! the [`Nvm`] trait, so the same manager runs on any chip family that
//! implements them. [`RecordingHal`] and [`MemoryNvm`] implement both
//! without hardware for tests and simulation.

pub mod config;
pub mod device;
pub mod error;
pub mod event;
pub mod gap;
pub mod gatt;
pub mod hal;
pub mod manager;
pub mod nvm;
pub mod security;
pub mod types;
pub mod uuid;

#[cfg(test)]
mod test_util;

// Re-export common types for convenience
pub use config::CmConfig;
pub use device::{ConnectionRecord, DeviceState};
pub use error::{CmError, CmResult};
pub use event::{CmEvent, CmHandler};
pub use gap::{AdvertContent, AdvertType, ScanFilter, ScanReport};
pub use gatt::{CharacteristicTemplate, ClientId, DiscoveryStatus, ServerId, ServiceTemplate};
pub use hal::{Hal, HalEvent, RecordingHal};
pub use manager::ConnectionManager;
pub use nvm::{MemoryNvm, Nvm};
pub use security::{BondKeys, UnbondOutcome};
pub use types::{BdAddr, BondId, Cid, DeviceId, Role, SecurityLevel, Status, TypedBdAddr};
pub use uuid::Uuid;
