//! The connection manager
//!
//! [`ConnectionManager`] owns the shared [`Context`], the role controllers
//! and the handler registries. Applications drive it from two directions:
//! API calls made on behalf of the application, and [`HalEvent`]s fed in
//! through [`ConnectionManager::process_event`]. Both run to completion;
//! events they produce are delivered to handlers before the call returns.
//!
//! [`HalEvent`]: crate::hal::HalEvent

mod context;
mod router;

#[cfg(test)]
mod tests;

pub use context::Context;

use crate::config::CmConfig;
use crate::device::{ConnectionRecord, DeviceState};
use crate::error::{CmError, CmResult};
use crate::event::CmHandler;
use crate::gap::{Central, Observer, Peripheral, ScanFilter};
use crate::gatt::{client, server, ClientId, GattClient, GattServer, ServerId, ServiceTemplate};
use crate::hal::Hal;
use crate::nvm::Nvm;
use crate::security::manager::unbond_or_defer;
use crate::security::{BondRecord, UnbondOutcome};
use crate::types::{BondId, Cid, ConnectParams, DeviceId, SecurityLevel, Status, TypedBdAddr};
use log::{debug, info, warn};
use std::ops::RangeInclusive;

/// BLE connection manager
pub struct ConnectionManager<H: Hal, N: Nvm> {
    ctx: Context<H, N>,
    central: Central,
    peripheral: Peripheral,
    observer: Observer,
    client: GattClient,
    server: GattServer,
    app: Option<Box<dyn CmHandler>>,
}

impl<H: Hal, N: Nvm> ConnectionManager<H, N> {
    /// Build a manager, loading persisted bonds and whitelisting their
    /// identity addresses
    pub fn new(config: CmConfig, hal: H, nvm: N) -> CmResult<Self> {
        config.validate()?;
        let client = GattClient::new(config.max_clients);
        let server = GattServer::new(config.max_servers);

        let mut ctx = Context::new(config, hal, nvm);
        ctx.bonds.load(&mut ctx.nvm)?;
        for (bond, record) in ctx.bonds.iter() {
            if record.peer.is_resolvable_private() {
                continue;
            }
            if let Err(e) = ctx.hal.whitelist_add(&record.peer) {
                warn!("Failed to whitelist {} ({}): {}", record.peer, bond, e);
            }
        }
        info!(
            "Connection manager ready: {} bond(s), {} device slot(s)",
            ctx.bonds.len(),
            ctx.devices.capacity()
        );

        Ok(Self {
            ctx,
            central: Central::new(),
            peripheral: Peripheral::new(),
            observer: Observer::new(),
            client,
            server,
            app: None,
        })
    }

    /// Register a server for a range of local attribute handles
    pub fn register_server(
        &mut self,
        handles: RangeInclusive<u16>,
        handler: impl CmHandler + 'static,
    ) -> ServerId {
        self.server.register(handles, Box::new(handler))
    }

    /// Register a client for one service template
    pub fn register_client(
        &mut self,
        template: ServiceTemplate,
        handler: impl CmHandler + 'static,
    ) -> ClientId {
        self.client.register(template, Box::new(handler))
    }

    /// Register the application handler; there is only one
    pub fn register_app(&mut self, handler: impl CmHandler + 'static) {
        assert!(self.app.is_none(), "application handler already registered");
        self.app = Some(Box::new(handler));
    }

    pub fn context(&self) -> &Context<H, N> {
        &self.ctx
    }

    pub fn hal(&self) -> &H {
        &self.ctx.hal
    }

    pub fn hal_mut(&mut self) -> &mut H {
        &mut self.ctx.hal
    }

    pub fn nvm(&self) -> &N {
        &self.ctx.nvm
    }

    pub fn config(&self) -> &CmConfig {
        &self.ctx.config
    }

    pub fn central(&self) -> &Central {
        &self.central
    }

    pub fn peripheral(&self) -> &Peripheral {
        &self.peripheral
    }

    pub fn observer(&self) -> &Observer {
        &self.observer
    }

    pub fn client(&self) -> &GattClient {
        &self.client
    }

    pub fn server(&self) -> &GattServer {
        &self.server
    }

    /// Connection record of a device slot; panics if `device` is out of
    /// range
    pub fn device(&self, device: DeviceId) -> &ConnectionRecord {
        self.ctx.devices.get(device)
    }

    pub fn device_state(&self, device: DeviceId) -> DeviceState {
        self.ctx.devices.state(device)
    }

    /// Connected device with the given peer address
    pub fn find_device(&self, peer: &TypedBdAddr) -> Option<DeviceId> {
        self.ctx.devices.find_by_addr(peer)
    }

    pub fn bond(&self, bond: BondId) -> Option<&BondRecord> {
        self.ctx.bonds.get(bond)
    }

    /// Bond of a peer, resolving private addresses against stored IRKs
    pub fn find_bond(&self, peer: &TypedBdAddr) -> Option<BondId> {
        self.ctx.find_bond(peer)
    }

    /// Run an operation and deliver whatever events it queued
    fn run<T>(&mut self, op: impl FnOnce(&mut Self) -> CmResult<T>) -> CmResult<T> {
        let result = op(self);
        self.flush_events();
        result
    }

    fn cid(&self, device: DeviceId) -> CmResult<Cid> {
        self.ctx
            .connected_cid(device)
            .ok_or(CmError::NotConnected(device))
    }

    /// Tear down a link; `Disconnected` follows the HAL confirmation
    pub fn disconnect(&mut self, device: DeviceId) -> CmResult<()> {
        let cid = self.cid(device)?;
        self.ctx.hal.disconnect(cid)?;
        info!("Disconnecting device {}", device);
        self.ctx.devices.set_state(device, DeviceState::Disconnecting);
        Ok(())
    }

    pub fn start_scan(&mut self, filter: ScanFilter) -> CmResult<()> {
        self.run(|cm| {
            if cm.observer.is_observing() {
                return Err(CmError::Busy);
            }
            cm.central.start_scan(&mut cm.ctx, filter)
        })
    }

    pub fn stop_scan(&mut self) -> CmResult<()> {
        self.run(|cm| cm.central.stop_scan(&mut cm.ctx))
    }

    pub fn connect(&mut self, peer: TypedBdAddr) -> CmResult<()> {
        self.run(|cm| cm.central.connect(&mut cm.ctx, peer))
    }

    pub fn cancel_connect(&mut self) -> CmResult<()> {
        self.run(|cm| cm.central.cancel_connect(&mut cm.ctx))
    }

    pub fn start_advertising(&mut self) -> CmResult<()> {
        self.run(|cm| cm.peripheral.start_advertising(&mut cm.ctx))
    }

    pub fn stop_advertising(&mut self) -> CmResult<()> {
        self.run(|cm| cm.peripheral.stop(&mut cm.ctx))
    }

    pub fn start_observing(&mut self) -> CmResult<()> {
        self.run(|cm| {
            let scanning = cm.central.is_scanning();
            cm.observer.start(&mut cm.ctx, scanning)
        })
    }

    pub fn stop_observing(&mut self) -> CmResult<()> {
        self.run(|cm| cm.observer.stop(&mut cm.ctx))
    }

    /// Discover the registered services on a connected device
    pub fn start_discovery(&mut self, device: DeviceId) -> CmResult<()> {
        self.run(|cm| cm.client.start_discovery(&mut cm.ctx, device))
    }

    pub fn read(&mut self, device: DeviceId, handle: u16) -> CmResult<()> {
        client::read_characteristic(&mut self.ctx, device, handle)
    }

    pub fn write(&mut self, device: DeviceId, handle: u16, value: &[u8]) -> CmResult<()> {
        client::write_characteristic(&mut self.ctx, device, handle, value, true)
    }

    pub fn write_without_response(
        &mut self,
        device: DeviceId,
        handle: u16,
        value: &[u8],
    ) -> CmResult<()> {
        client::write_characteristic(&mut self.ctx, device, handle, value, false)
    }

    /// Answer a server read or write
    pub fn access_response(
        &mut self,
        device: DeviceId,
        handle: u16,
        status: Status,
        value: &[u8],
    ) -> CmResult<()> {
        server::access_response(&mut self.ctx, device, handle, status, value)
    }

    pub fn notify(&mut self, device: DeviceId, handle: u16, value: &[u8]) -> CmResult<()> {
        server::notify(&mut self.ctx, device, handle, value)
    }

    pub fn indicate(&mut self, device: DeviceId, handle: u16, value: &[u8]) -> CmResult<()> {
        server::indicate(&mut self.ctx, device, handle, value)
    }

    /// Pair or encrypt the link up to `level`
    pub fn request_security(&mut self, device: DeviceId, level: SecurityLevel) -> CmResult<()> {
        let cid = self.cid(device)?;
        debug!("Requesting {} on device {}", level, device);
        self.ctx.hal.request_security(cid, level)?;
        Ok(())
    }

    /// Answer a `PasskeyInput` event; `None` rejects pairing
    pub fn passkey_response(&mut self, device: DeviceId, passkey: Option<u32>) -> CmResult<()> {
        let cid = self.cid(device)?;
        self.ctx.hal.passkey_response(cid, passkey)?;
        Ok(())
    }

    /// Answer a `PairingAuth` event
    pub fn authorization_response(&mut self, device: DeviceId, accept: bool) -> CmResult<()> {
        let cid = self.cid(device)?;
        self.ctx.hal.authorization_response(cid, accept)?;
        Ok(())
    }

    pub fn read_rssi(&mut self, device: DeviceId) -> CmResult<()> {
        let cid = self.cid(device)?;
        self.ctx.hal.read_rssi(cid)?;
        Ok(())
    }

    pub fn update_connection_params(
        &mut self,
        device: DeviceId,
        params: ConnectParams,
    ) -> CmResult<()> {
        if params.interval_min > params.interval_max {
            return Err(CmError::InvalidParameter(format!(
                "connection interval min 0x{:04X} exceeds max 0x{:04X}",
                params.interval_min, params.interval_max
            )));
        }
        let cid = self.cid(device)?;
        self.ctx.hal.update_connection_params(cid, &params)?;
        Ok(())
    }

    /// Remove a bond. The removal waits for the peer to disconnect if it
    /// is connected, and for the current advert to be cancelled while a
    /// connectable advert is on air.
    pub fn unbond(&mut self, bond: BondId) -> CmResult<UnbondOutcome> {
        self.run(|cm| {
            if cm.ctx.bonds.get(bond).is_none() {
                return Err(CmError::BondNotFound(bond));
            }
            if cm.ctx.devices.find_by_bond(bond).is_none() && cm.peripheral.is_advertising() {
                info!("Advertising, unbond of {} latched", bond);
                cm.peripheral.latch_unbond(&mut cm.ctx, bond)?;
                return Ok(UnbondOutcome::DeferredUntilAdvertStopped);
            }
            unbond_or_defer(&mut cm.ctx, bond)
        })
    }
}
