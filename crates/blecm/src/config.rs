//! Connection manager configuration
//!
//! Table capacities are fixed for the lifetime of a [`ConnectionManager`]
//! and bound every linear lookup the manager performs.
//!
//! [`ConnectionManager`]: crate::manager::ConnectionManager

use crate::error::{CmError, CmResult};
use crate::gap::constants::MAX_ADVERT_TYPES;
use crate::gap::{AdvertContent, AdvertType, ScanParams};
use crate::security::BOND_RECORD_WORDS;
use crate::types::ConnectParams;
use std::time::Duration;

/// How long a central connection attempt may stay unconfirmed
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub const DEFAULT_MAX_CONNECTIONS: usize = 2;
pub const DEFAULT_MAX_BONDED_DEVICES: usize = 4;
pub const DEFAULT_MAX_CLIENTS: usize = 4;
pub const DEFAULT_MAX_SERVERS: usize = 8;

/// Central role parameters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CentralParams {
    pub scan: ScanParams,
    pub connection: ConnectParams,
}

/// Peripheral role parameters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeripheralConfig {
    /// Advert types cycled through by one advertising campaign
    pub adverts: Vec<AdvertType>,
    pub content: AdvertContent,
}

/// Connection manager configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmConfig {
    /// Capacity of the device table
    pub max_connections: usize,
    /// Capacity of the persisted bonding table
    pub max_bonded_devices: usize,
    /// Maximum number of registered GATT clients
    pub max_clients: usize,
    /// Maximum number of registered GATT servers
    pub max_servers: usize,
    pub connect_timeout: Duration,
    /// Word offset of the bonding region in NVM
    pub nvm_offset: u16,
    pub central: CentralParams,
    pub peripheral: PeripheralConfig,
}

impl Default for CmConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            max_bonded_devices: DEFAULT_MAX_BONDED_DEVICES,
            max_clients: DEFAULT_MAX_CLIENTS,
            max_servers: DEFAULT_MAX_SERVERS,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            nvm_offset: 0,
            central: CentralParams::default(),
            peripheral: PeripheralConfig {
                adverts: vec![AdvertType::undirected(None)],
                content: AdvertContent::default(),
            },
        }
    }
}

impl CmConfig {
    /// Check the configuration before the manager is built from it
    pub fn validate(&self) -> CmResult<()> {
        if self.max_connections == 0 {
            return Err(CmError::InvalidParameter(
                "max_connections must be non-zero".into(),
            ));
        }
        if self.max_bonded_devices == 0 {
            return Err(CmError::InvalidParameter(
                "max_bonded_devices must be non-zero".into(),
            ));
        }
        // Sanity word plus one record per bond, addressed by u16 word offsets
        let nvm_end = self.nvm_offset as usize + 1 + self.max_bonded_devices * BOND_RECORD_WORDS;
        if nvm_end > u16::MAX as usize + 1 {
            return Err(CmError::InvalidParameter(format!(
                "bonding region at word 0x{:04X} for {} bond(s) exceeds the NVM word space",
                self.nvm_offset, self.max_bonded_devices
            )));
        }
        if self.connect_timeout.is_zero() {
            return Err(CmError::InvalidParameter(
                "connect_timeout must be non-zero".into(),
            ));
        }
        let scan = &self.central.scan;
        if scan.window > scan.interval {
            return Err(CmError::InvalidParameter(format!(
                "scan window 0x{:04X} exceeds interval 0x{:04X}",
                scan.window, scan.interval
            )));
        }
        validate_adverts(&self.peripheral.adverts)
    }
}

/// Check an advertisement type list
pub fn validate_adverts(adverts: &[AdvertType]) -> CmResult<()> {
    if adverts.is_empty() || adverts.len() > MAX_ADVERT_TYPES {
        return Err(CmError::InvalidParameter(format!(
            "advert type list must hold 1..={} entries, got {}",
            MAX_ADVERT_TYPES,
            adverts.len()
        )));
    }
    for advert in adverts {
        if advert.interval_min > advert.interval_max {
            return Err(CmError::InvalidParameter(format!(
                "advert interval min 0x{:04X} exceeds max 0x{:04X}",
                advert.interval_min, advert.interval_max
            )));
        }
    }
    Ok(())
}
