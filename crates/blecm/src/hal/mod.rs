//! Hardware abstraction boundary
//!
//! The connection manager does not talk to a radio. Everything below it
//! (link layer, ATT transport, security manager cryptography, timers) sits
//! behind the [`Hal`] trait, and everything coming back up arrives as a
//! normalized [`HalEvent`]. A chip family is supported by implementing
//! [`Hal`] for its firmware API and translating its native events into
//! [`HalEvent`] values before handing them to
//! [`ConnectionManager::process_event`].
//!
//! Every asynchronous primitive is expected to produce exactly one matching
//! confirmation event later.
//!
//! [`ConnectionManager::process_event`]: crate::manager::ConnectionManager::process_event

pub mod constants;
mod recording;

pub use recording::{HalCall, RecordingHal};

use crate::gap::{AdvertKind, AdvertisingParams, AdvertisingReport, ScanParams};
use crate::gatt::CharacteristicProperty;
use crate::security::BondKeys;
use crate::types::{BdAddr, Cid, ConnParams, ConnectParams, Role, SecurityLevel, Status, TypedBdAddr};
use crate::uuid::Uuid;
use bitflags::bitflags;
use std::time::Duration;
use thiserror::Error;

/// Errors a HAL primitive can report synchronously
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HalError {
    #[error("Controller busy")]
    Busy,

    #[error("Invalid parameter: {0}")]
    InvalidParameter(&'static str),

    #[error("Primitive failed with status {0}")]
    Failed(Status),
}

/// Result type for HAL primitives
pub type HalResult<T> = Result<T, HalError>;

/// Handle of a single-shot timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub u32);

/// Answer to a diversifier approval request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DivApproval {
    Approved,
    Revoked,
}

/// Radio activity reported for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioEventKind {
    ConnectionEvent,
    Tx,
    Rx,
}

bitflags! {
    /// Kind of access a peer makes to a local attribute
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AccessFlags: u8 {
        const READ = 0x01;
        const WRITE = 0x02;
        const WRITE_COMMAND = 0x04;
    }
}

/// Normalized events delivered by the HAL
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HalEvent {
    /// A link was established or a connection attempt failed. `role` is
    /// the local role on the link.
    ConnectionComplete {
        status: Status,
        cid: Cid,
        peer: TypedBdAddr,
        role: Role,
        params: ConnParams,
    },
    DisconnectComplete {
        cid: Cid,
        reason: u8,
    },
    ConnectionUpdate {
        cid: Cid,
        params: ConnParams,
    },
    ConnParamUpdateCfm {
        cid: Cid,
        status: Status,
    },
    /// Central connection attempt cancelled
    CancelConnectCfm {
        status: Status,
    },
    /// Connectable or directed advertising stopped
    AdvertisingCancelCfm {
        status: Status,
    },
    AdvertisingReport(AdvertisingReport),
    EncryptionChange {
        cid: Cid,
        status: Status,
        enabled: bool,
    },
    /// Keys distributed during pairing, ahead of the pairing-complete event
    KeysInd {
        cid: Cid,
        keys: BondKeys,
    },
    PairingComplete {
        cid: Cid,
        status: Status,
    },
    DivApproveRequest {
        cid: Cid,
        div: u16,
    },
    /// The security manager asks for the stored keys of the peer
    KeyRequest {
        cid: Cid,
    },
    LongTermKeyRequest {
        cid: Cid,
        ediv: u16,
        rand: [u8; 8],
    },
    PasskeyDisplay {
        cid: Cid,
        passkey: u32,
    },
    PasskeyInput {
        cid: Cid,
    },
    PairingAuthRequest {
        cid: Cid,
        bonding: bool,
    },
    ServiceDiscovered {
        cid: Cid,
        uuid: Uuid,
        start_handle: u16,
        end_handle: u16,
    },
    ServiceDiscoveryCfm {
        cid: Cid,
        status: Status,
    },
    CharacteristicDiscovered {
        cid: Cid,
        uuid: Uuid,
        declaration_handle: u16,
        value_handle: u16,
        properties: CharacteristicProperty,
    },
    CharacteristicDiscoveryCfm {
        cid: Cid,
        status: Status,
    },
    DescriptorDiscovered {
        cid: Cid,
        uuid: Uuid,
        handle: u16,
    },
    DescriptorDiscoveryCfm {
        cid: Cid,
        status: Status,
    },
    ReadCfm {
        cid: Cid,
        status: Status,
        handle: u16,
        value: Vec<u8>,
    },
    WriteCfm {
        cid: Cid,
        status: Status,
        handle: u16,
    },
    Notification {
        cid: Cid,
        handle: u16,
        value: Vec<u8>,
    },
    Indication {
        cid: Cid,
        handle: u16,
        value: Vec<u8>,
    },
    /// A peer reads or writes a local attribute
    AccessInd {
        cid: Cid,
        handle: u16,
        flags: AccessFlags,
        offset: u16,
        value: Vec<u8>,
    },
    NotificationCfm {
        cid: Cid,
        status: Status,
        handle: u16,
    },
    IndicationCfm {
        cid: Cid,
        status: Status,
        handle: u16,
    },
    RssiCfm {
        cid: Cid,
        status: Status,
        rssi: i8,
    },
    RadioEvent {
        cid: Option<Cid>,
        kind: RadioEventKind,
    },
    TimerExpired(TimerId),
}

/// Primitive operations the connection manager needs from the controller
pub trait Hal {
    /// Create a connection to `peer` as central
    fn connect(&mut self, peer: TypedBdAddr, params: &ConnectParams) -> HalResult<()>;

    /// Abort a pending connection attempt; confirmed by `CancelConnectCfm`
    fn cancel_connect(&mut self) -> HalResult<()>;

    fn disconnect(&mut self, cid: Cid) -> HalResult<()>;

    fn set_scan_params(&mut self, params: &ScanParams) -> HalResult<()>;

    fn start_scan(&mut self) -> HalResult<()>;

    fn stop_scan(&mut self) -> HalResult<()>;

    fn set_advertising_params(&mut self, params: &AdvertisingParams) -> HalResult<()>;

    fn set_advertising_data(&mut self, adv_data: &[u8], scan_rsp: &[u8]) -> HalResult<()>;

    fn start_advertising(&mut self, kind: &AdvertKind) -> HalResult<()>;

    /// Stop advertising. Connectable adverts are confirmed by
    /// `AdvertisingCancelCfm`; non-connectable ones stop synchronously.
    fn stop_advertising(&mut self) -> HalResult<()>;

    fn discover_primary_services(&mut self, cid: Cid) -> HalResult<()>;

    fn discover_characteristics(&mut self, cid: Cid, start: u16, end: u16) -> HalResult<()>;

    fn discover_descriptors(&mut self, cid: Cid, start: u16, end: u16) -> HalResult<()>;

    fn read_characteristic(&mut self, cid: Cid, handle: u16) -> HalResult<()>;

    fn write_characteristic(
        &mut self,
        cid: Cid,
        handle: u16,
        value: &[u8],
        with_response: bool,
    ) -> HalResult<()>;

    /// Answer an `AccessInd`
    fn access_response(
        &mut self,
        cid: Cid,
        handle: u16,
        status: Status,
        value: &[u8],
    ) -> HalResult<()>;

    fn send_notification(&mut self, cid: Cid, handle: u16, value: &[u8]) -> HalResult<()>;

    fn send_indication(&mut self, cid: Cid, handle: u16, value: &[u8]) -> HalResult<()>;

    /// Start pairing or encryption up to `level`
    fn request_security(&mut self, cid: Cid, level: SecurityLevel) -> HalResult<()>;

    /// `None` rejects the passkey entry
    fn passkey_response(&mut self, cid: Cid, passkey: Option<u32>) -> HalResult<()>;

    fn authorization_response(&mut self, cid: Cid, accept: bool) -> HalResult<()>;

    fn div_approval(&mut self, cid: Cid, approval: DivApproval) -> HalResult<()>;

    /// `None` tells the security manager there are no stored keys
    fn key_request_response(&mut self, cid: Cid, keys: Option<&BondKeys>) -> HalResult<()>;

    /// `None` is a negative reply
    fn ltk_response(&mut self, cid: Cid, ltk: Option<&[u8; 16]>) -> HalResult<()>;

    /// Check whether a resolvable private address was generated from `irk`
    fn resolve_private_address(&self, addr: &BdAddr, irk: &[u8; 16]) -> bool;

    fn read_rssi(&mut self, cid: Cid) -> HalResult<()>;

    fn whitelist_add(&mut self, addr: &TypedBdAddr) -> HalResult<()>;

    fn whitelist_remove(&mut self, addr: &TypedBdAddr) -> HalResult<()>;

    fn update_connection_params(&mut self, cid: Cid, params: &ConnectParams) -> HalResult<()>;

    /// Start a single-shot timer; expiry arrives as `TimerExpired`
    fn start_timer(&mut self, timeout: Duration) -> TimerId;

    fn cancel_timer(&mut self, timer: TimerId);
}
