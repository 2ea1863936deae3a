use crate::gap::constants::*;
use crate::types::TypedBdAddr;
use crate::uuid::Uuid;
use bitflags::bitflags;
use std::time::Duration;

bitflags! {
    /// Contents of the Flags AD structure
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AdFlags: u8 {
        const LE_LIMITED_DISCOVERABLE = 0x01;
        const LE_GENERAL_DISCOVERABLE = 0x02;
        const BR_EDR_NOT_SUPPORTED = 0x04;
        const SIMULTANEOUS_LE_BR_EDR_CONTROLLER = 0x08;
        const SIMULTANEOUS_LE_BR_EDR_HOST = 0x10;
    }
}

/// Kind of advertisement a configured advert type produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvertKind {
    /// Connectable undirected advertising
    Undirected,
    /// Connectable directed advertising towards a fixed peer
    Directed(TypedBdAddr),
    /// Broadcast-only advertising, no connections and no scan responses
    NonConnectable,
}

/// One entry of the advertisement type list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertType {
    pub kind: AdvertKind,
    /// Only accept connections and scan requests from whitelisted devices
    pub use_whitelist: bool,
    /// Advertising interval (0.625 ms units)
    pub interval_min: u16,
    pub interval_max: u16,
    /// How long to advertise this type before moving on; `None` advertises
    /// until stopped or connected
    pub timeout: Option<Duration>,
}

impl AdvertType {
    pub fn undirected(timeout: Option<Duration>) -> Self {
        Self {
            kind: AdvertKind::Undirected,
            use_whitelist: false,
            interval_min: LE_ADV_INTERVAL_MIN,
            interval_max: LE_ADV_INTERVAL_MAX,
            timeout,
        }
    }

    pub fn directed(peer: TypedBdAddr, timeout: Option<Duration>) -> Self {
        Self {
            kind: AdvertKind::Directed(peer),
            ..Self::undirected(timeout)
        }
    }

    pub fn non_connectable() -> Self {
        Self {
            kind: AdvertKind::NonConnectable,
            ..Self::undirected(None)
        }
    }

    pub fn with_whitelist(mut self) -> Self {
        self.use_whitelist = true;
        self
    }
}

/// Parameters handed to the HAL before advertising starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvertisingParams {
    pub interval_min: u16,
    pub interval_max: u16,
    pub use_whitelist: bool,
}

/// Fields placed in advertisement and scan response payloads
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdvertContent {
    pub service_uuids: Vec<Uuid>,
    pub appearance: Option<u16>,
    pub tx_power: Option<i8>,
    /// Company identifier followed by the manufacturer payload
    pub manufacturer_data: Option<Vec<u8>>,
    pub device_name: Option<String>,
}

/// Scan configuration for the central and observer roles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanParams {
    pub active: bool,
    /// Scan interval and window (0.625 ms units)
    pub interval: u16,
    pub window: u16,
    pub use_whitelist: bool,
    pub filter_duplicates: bool,
}

impl Default for ScanParams {
    fn default() -> Self {
        Self {
            active: true,
            interval: LE_SCAN_INTERVAL,
            window: LE_SCAN_WINDOW,
            use_whitelist: false,
            filter_duplicates: true,
        }
    }
}

/// Report filtering requested when the central starts scanning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanFilter {
    /// Forward every parsed report
    #[default]
    All,
    /// Forward only reports advertising this service
    Service(Uuid),
    /// Forward reports without parsing or filtering
    Raw,
}

/// Advertising report received from the HAL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisingReport {
    pub event_type: u8,
    pub address: TypedBdAddr,
    pub rssi: i8,
    pub data: Vec<u8>,
}

/// Advertising report forwarded to handlers.
///
/// Parsed fields are filled only when the report was parsed; raw reports
/// carry just `data`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanReport {
    pub address: TypedBdAddr,
    pub event_type: u8,
    pub rssi: i8,
    pub name: Option<String>,
    pub tx_power: Option<i8>,
    pub manufacturer_data: Option<Vec<u8>>,
    pub service_uuids: Vec<Uuid>,
    pub appearance: Option<u16>,
    pub flags: Option<AdFlags>,
    pub data: Vec<u8>,
}

impl ScanReport {
    pub fn raw(report: &AdvertisingReport) -> Self {
        Self {
            address: report.address,
            event_type: report.event_type,
            rssi: report.rssi,
            name: None,
            tx_power: None,
            manufacturer_data: None,
            service_uuids: Vec::new(),
            appearance: None,
            flags: None,
            data: report.data.clone(),
        }
    }
}

/// Central scanning state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Scanning,
}

/// Central connection-attempt state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectState {
    Idle,
    Connecting,
    CancelConnecting,
}

/// Peripheral advertising state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvertisingState {
    Idle,
    Advertising,
    DirectedAdvertising,
    Broadcasting,
    /// Waiting for the HAL to confirm the advert was cancelled
    Stopping,
}

/// Observer state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserveState {
    Idle,
    Observing,
}
