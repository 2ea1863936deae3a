//! A HAL that records every primitive instead of driving a radio
//!
//! Used by the unit tests and for host-side simulation: feed `HalEvent`s
//! into the manager by hand and inspect which primitives it issued.

use super::{DivApproval, Hal, HalError, HalResult, TimerId};
use crate::gap::{AdvertKind, AdvertisingParams, ScanParams};
use crate::security::BondKeys;
use crate::types::{BdAddr, Cid, ConnectParams, SecurityLevel, Status, TypedBdAddr};
use log::trace;
use std::time::Duration;

/// One recorded primitive call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HalCall {
    Connect(TypedBdAddr, ConnectParams),
    CancelConnect,
    Disconnect(Cid),
    SetScanParams(ScanParams),
    StartScan,
    StopScan,
    SetAdvertisingParams(AdvertisingParams),
    SetAdvertisingData { adv_data: Vec<u8>, scan_rsp: Vec<u8> },
    StartAdvertising(AdvertKind),
    StopAdvertising,
    DiscoverPrimaryServices(Cid),
    DiscoverCharacteristics { cid: Cid, start: u16, end: u16 },
    DiscoverDescriptors { cid: Cid, start: u16, end: u16 },
    ReadCharacteristic { cid: Cid, handle: u16 },
    WriteCharacteristic { cid: Cid, handle: u16, value: Vec<u8>, with_response: bool },
    AccessResponse { cid: Cid, handle: u16, status: Status, value: Vec<u8> },
    SendNotification { cid: Cid, handle: u16, value: Vec<u8> },
    SendIndication { cid: Cid, handle: u16, value: Vec<u8> },
    RequestSecurity(Cid, SecurityLevel),
    PasskeyResponse(Cid, Option<u32>),
    AuthorizationResponse(Cid, bool),
    DivApproval(Cid, DivApproval),
    KeyRequestResponse(Cid, Option<BondKeys>),
    LtkResponse(Cid, Option<[u8; 16]>),
    ReadRssi(Cid),
    WhitelistAdd(TypedBdAddr),
    WhitelistRemove(TypedBdAddr),
    UpdateConnectionParams(Cid, ConnectParams),
    StartTimer(TimerId, Duration),
    CancelTimer(TimerId),
}

/// Recording HAL implementation
#[derive(Debug, Default)]
pub struct RecordingHal {
    calls: Vec<HalCall>,
    next_timer: u32,
    active_timers: Vec<TimerId>,
    resolvable: Vec<(BdAddr, [u8; 16])>,
    fail_next: Option<HalError>,
}

impl RecordingHal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls recorded so far
    pub fn calls(&self) -> &[HalCall] {
        &self.calls
    }

    /// Drain the recorded calls
    pub fn take_calls(&mut self) -> Vec<HalCall> {
        std::mem::take(&mut self.calls)
    }

    /// Timers started and neither cancelled nor expired
    pub fn active_timers(&self) -> &[TimerId] {
        &self.active_timers
    }

    /// Mark a timer as fired; pair with feeding `HalEvent::TimerExpired`
    pub fn expire_timer(&mut self, timer: TimerId) -> bool {
        let before = self.active_timers.len();
        self.active_timers.retain(|t| *t != timer);
        before != self.active_timers.len()
    }

    /// Declare that `addr` resolves against `irk`
    pub fn add_resolvable(&mut self, addr: BdAddr, irk: [u8; 16]) {
        self.resolvable.push((addr, irk));
    }

    /// Make the next fallible primitive fail with `error`
    pub fn fail_next(&mut self, error: HalError) {
        self.fail_next = Some(error);
    }

    fn record(&mut self, call: HalCall) -> HalResult<()> {
        if let Some(error) = self.fail_next.take() {
            trace!("HAL primitive {:?} failed: {}", call, error);
            return Err(error);
        }
        trace!("HAL primitive {:?}", call);
        self.calls.push(call);
        Ok(())
    }
}

impl Hal for RecordingHal {
    fn connect(&mut self, peer: TypedBdAddr, params: &ConnectParams) -> HalResult<()> {
        self.record(HalCall::Connect(peer, *params))
    }

    fn cancel_connect(&mut self) -> HalResult<()> {
        self.record(HalCall::CancelConnect)
    }

    fn disconnect(&mut self, cid: Cid) -> HalResult<()> {
        self.record(HalCall::Disconnect(cid))
    }

    fn set_scan_params(&mut self, params: &ScanParams) -> HalResult<()> {
        self.record(HalCall::SetScanParams(*params))
    }

    fn start_scan(&mut self) -> HalResult<()> {
        self.record(HalCall::StartScan)
    }

    fn stop_scan(&mut self) -> HalResult<()> {
        self.record(HalCall::StopScan)
    }

    fn set_advertising_params(&mut self, params: &AdvertisingParams) -> HalResult<()> {
        self.record(HalCall::SetAdvertisingParams(*params))
    }

    fn set_advertising_data(&mut self, adv_data: &[u8], scan_rsp: &[u8]) -> HalResult<()> {
        self.record(HalCall::SetAdvertisingData {
            adv_data: adv_data.to_vec(),
            scan_rsp: scan_rsp.to_vec(),
        })
    }

    fn start_advertising(&mut self, kind: &AdvertKind) -> HalResult<()> {
        self.record(HalCall::StartAdvertising(*kind))
    }

    fn stop_advertising(&mut self) -> HalResult<()> {
        self.record(HalCall::StopAdvertising)
    }

    fn discover_primary_services(&mut self, cid: Cid) -> HalResult<()> {
        self.record(HalCall::DiscoverPrimaryServices(cid))
    }

    fn discover_characteristics(&mut self, cid: Cid, start: u16, end: u16) -> HalResult<()> {
        self.record(HalCall::DiscoverCharacteristics { cid, start, end })
    }

    fn discover_descriptors(&mut self, cid: Cid, start: u16, end: u16) -> HalResult<()> {
        self.record(HalCall::DiscoverDescriptors { cid, start, end })
    }

    fn read_characteristic(&mut self, cid: Cid, handle: u16) -> HalResult<()> {
        self.record(HalCall::ReadCharacteristic { cid, handle })
    }

    fn write_characteristic(
        &mut self,
        cid: Cid,
        handle: u16,
        value: &[u8],
        with_response: bool,
    ) -> HalResult<()> {
        self.record(HalCall::WriteCharacteristic {
            cid,
            handle,
            value: value.to_vec(),
            with_response,
        })
    }

    fn access_response(
        &mut self,
        cid: Cid,
        handle: u16,
        status: Status,
        value: &[u8],
    ) -> HalResult<()> {
        self.record(HalCall::AccessResponse {
            cid,
            handle,
            status,
            value: value.to_vec(),
        })
    }

    fn send_notification(&mut self, cid: Cid, handle: u16, value: &[u8]) -> HalResult<()> {
        self.record(HalCall::SendNotification {
            cid,
            handle,
            value: value.to_vec(),
        })
    }

    fn send_indication(&mut self, cid: Cid, handle: u16, value: &[u8]) -> HalResult<()> {
        self.record(HalCall::SendIndication {
            cid,
            handle,
            value: value.to_vec(),
        })
    }

    fn request_security(&mut self, cid: Cid, level: SecurityLevel) -> HalResult<()> {
        self.record(HalCall::RequestSecurity(cid, level))
    }

    fn passkey_response(&mut self, cid: Cid, passkey: Option<u32>) -> HalResult<()> {
        self.record(HalCall::PasskeyResponse(cid, passkey))
    }

    fn authorization_response(&mut self, cid: Cid, accept: bool) -> HalResult<()> {
        self.record(HalCall::AuthorizationResponse(cid, accept))
    }

    fn div_approval(&mut self, cid: Cid, approval: DivApproval) -> HalResult<()> {
        self.record(HalCall::DivApproval(cid, approval))
    }

    fn key_request_response(&mut self, cid: Cid, keys: Option<&BondKeys>) -> HalResult<()> {
        self.record(HalCall::KeyRequestResponse(cid, keys.cloned()))
    }

    fn ltk_response(&mut self, cid: Cid, ltk: Option<&[u8; 16]>) -> HalResult<()> {
        self.record(HalCall::LtkResponse(cid, ltk.copied()))
    }

    fn resolve_private_address(&self, addr: &BdAddr, irk: &[u8; 16]) -> bool {
        self.resolvable
            .iter()
            .any(|(candidate, key)| candidate == addr && key == irk)
    }

    fn read_rssi(&mut self, cid: Cid) -> HalResult<()> {
        self.record(HalCall::ReadRssi(cid))
    }

    fn whitelist_add(&mut self, addr: &TypedBdAddr) -> HalResult<()> {
        self.record(HalCall::WhitelistAdd(*addr))
    }

    fn whitelist_remove(&mut self, addr: &TypedBdAddr) -> HalResult<()> {
        self.record(HalCall::WhitelistRemove(*addr))
    }

    fn update_connection_params(&mut self, cid: Cid, params: &ConnectParams) -> HalResult<()> {
        self.record(HalCall::UpdateConnectionParams(cid, *params))
    }

    fn start_timer(&mut self, timeout: Duration) -> TimerId {
        self.next_timer += 1;
        let timer = TimerId(self.next_timer);
        self.active_timers.push(timer);
        self.calls.push(HalCall::StartTimer(timer, timeout));
        timer
    }

    fn cancel_timer(&mut self, timer: TimerId) {
        self.active_timers.retain(|t| *t != timer);
        self.calls.push(HalCall::CancelTimer(timer));
    }
}
