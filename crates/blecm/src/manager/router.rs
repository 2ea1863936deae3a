//! HAL event dispatch and handler fan-out

use super::ConnectionManager;
use crate::device::DeviceState;
use crate::event::{CmEvent, Route};
use crate::hal::{Hal, HalEvent};
use crate::nvm::Nvm;
use crate::security::manager as security;
use crate::types::{Cid, ConnParams, Role, Status, TypedBdAddr};
use log::{debug, info, trace, warn};

impl<H: Hal, N: Nvm> ConnectionManager<H, N> {
    /// Handle one event from the HAL and deliver the events it produces
    pub fn process_event(&mut self, event: HalEvent) {
        trace!("HAL event {:?}", event);
        match event {
            HalEvent::ConnectionComplete {
                status,
                cid,
                peer,
                role,
                params,
            } => self.on_connection_complete(status, cid, peer, role, params),
            HalEvent::DisconnectComplete { cid, reason } => self.on_disconnect_complete(cid, reason),
            HalEvent::ConnectionUpdate { cid, params } => {
                if let Some(device) = self.ctx.device_for(cid) {
                    self.ctx.devices.get_mut(device).params = params;
                    self.ctx
                        .events
                        .broadcast(CmEvent::ConnectionUpdated { device, params });
                }
            }
            HalEvent::ConnParamUpdateCfm { cid, status } => {
                if let Some(device) = self.ctx.device_for(cid) {
                    self.ctx
                        .events
                        .broadcast(CmEvent::ConnParamUpdateCfm { device, status });
                }
            }
            HalEvent::CancelConnectCfm { status } => self.central.on_cancel_cfm(&mut self.ctx, status),
            HalEvent::AdvertisingCancelCfm { status } => {
                self.peripheral.on_cancel_cfm(&mut self.ctx, status)
            }
            HalEvent::AdvertisingReport(report) => {
                if !self.central.on_report(&mut self.ctx, &report)
                    && !self.observer.on_report(&mut self.ctx, &report)
                {
                    debug!("Advertising report from {} while not scanning", report.address);
                }
            }
            HalEvent::EncryptionChange {
                cid,
                status,
                enabled,
            } => security::on_encryption_change(&mut self.ctx, cid, status, enabled),
            HalEvent::KeysInd { cid, keys } => security::on_keys(&mut self.ctx, cid, keys),
            HalEvent::PairingComplete { cid, status } => {
                security::on_pairing_complete(&mut self.ctx, cid, status);
                if let Some(device) = self.ctx.devices.find_by_cid(cid) {
                    if let (true, Some(bond)) =
                        (status.is_success(), self.ctx.devices.get(device).bond_id)
                    {
                        self.client.on_bonded(device, bond);
                    }
                }
            }
            HalEvent::DivApproveRequest { cid, div } => security::on_div_approve(&mut self.ctx, cid, div),
            HalEvent::KeyRequest { cid } => security::on_key_request(&mut self.ctx, cid),
            HalEvent::LongTermKeyRequest { cid, ediv, rand } => {
                security::on_ltk_request(&mut self.ctx, cid, ediv, rand)
            }
            HalEvent::PasskeyDisplay { cid, passkey } => {
                security::on_passkey_display(&mut self.ctx, cid, passkey)
            }
            HalEvent::PasskeyInput { cid } => security::on_passkey_input(&mut self.ctx, cid),
            HalEvent::PairingAuthRequest { cid, bonding } => {
                security::on_pairing_auth(&mut self.ctx, cid, bonding)
            }
            HalEvent::ServiceDiscovered {
                cid,
                uuid,
                start_handle,
                end_handle,
            } => self
                .client
                .on_service(&mut self.ctx, cid, uuid, start_handle, end_handle),
            HalEvent::ServiceDiscoveryCfm { cid, status } => {
                self.client.on_service_cfm(&mut self.ctx, cid, status)
            }
            HalEvent::CharacteristicDiscovered {
                cid,
                uuid,
                declaration_handle,
                value_handle,
                properties,
            } => self.client.on_characteristic(
                &mut self.ctx,
                cid,
                uuid,
                declaration_handle,
                value_handle,
                properties,
            ),
            HalEvent::CharacteristicDiscoveryCfm { cid, status } => {
                self.client.on_characteristic_cfm(&mut self.ctx, cid, status)
            }
            HalEvent::DescriptorDiscovered { cid, uuid, handle } => {
                self.client.on_descriptor(&mut self.ctx, cid, uuid, handle)
            }
            HalEvent::DescriptorDiscoveryCfm { cid, status } => {
                self.client.on_descriptor_cfm(&mut self.ctx, cid, status)
            }
            HalEvent::ReadCfm {
                cid,
                status,
                handle,
                value,
            } => self.client.on_read_cfm(&mut self.ctx, cid, status, handle, value),
            HalEvent::WriteCfm {
                cid,
                status,
                handle,
            } => self.client.on_write_cfm(&mut self.ctx, cid, status, handle),
            HalEvent::Notification { cid, handle, value } => {
                self.client
                    .on_notification(&mut self.ctx, cid, handle, value, false)
            }
            HalEvent::Indication { cid, handle, value } => {
                self.client
                    .on_notification(&mut self.ctx, cid, handle, value, true)
            }
            HalEvent::AccessInd {
                cid,
                handle,
                flags,
                offset,
                value,
            } => self
                .server
                .on_access(&mut self.ctx, cid, handle, flags, offset, value),
            HalEvent::NotificationCfm {
                cid,
                status,
                handle,
            } => self
                .server
                .on_value_cfm(&mut self.ctx, cid, status, handle, false),
            HalEvent::IndicationCfm {
                cid,
                status,
                handle,
            } => self
                .server
                .on_value_cfm(&mut self.ctx, cid, status, handle, true),
            HalEvent::RssiCfm { cid, status, rssi } => {
                if let Some(device) = self.ctx.device_for(cid) {
                    self.ctx
                        .events
                        .push(Route::App, CmEvent::Rssi { device, status, rssi });
                }
            }
            HalEvent::RadioEvent { cid, kind } => {
                let device = cid.and_then(|cid| self.ctx.devices.find_by_cid(cid));
                self.ctx.events.broadcast(CmEvent::Radio { device, kind });
            }
            HalEvent::TimerExpired(timer) => {
                if !self.central.on_timer(&mut self.ctx, timer)
                    && !self.peripheral.on_timer(&mut self.ctx, timer)
                {
                    debug!("Expiry of unknown timer {:?}", timer);
                }
            }
        }
        self.flush_events();
    }

    fn on_connection_complete(
        &mut self,
        status: Status,
        cid: Cid,
        peer: TypedBdAddr,
        role: Role,
        params: ConnParams,
    ) {
        if !status.is_success() {
            warn!("Connection to {} failed: {}", peer, status);
            match role {
                Role::Central => self.central.on_connection_complete(&mut self.ctx, status, peer),
                Role::Peripheral => self.peripheral.on_connect_failed(&mut self.ctx, status),
            }
            return;
        }

        // The bond association must exist before the peripheral runs any
        // latched unbond for this peer
        let device = self.ctx.devices.claim(cid, peer, role.opposite(), params);
        if let Some(device) = device {
            security::on_connected(&mut self.ctx, device);
        }
        match role {
            Role::Central => self.central.on_connection_complete(&mut self.ctx, status, peer),
            Role::Peripheral => self.peripheral.on_connected(&mut self.ctx),
        }

        let Some(device) = device else {
            warn!("Device table full, dropping link {} to {}", cid, peer);
            if let Err(e) = self.ctx.hal.disconnect(cid) {
                warn!("Failed to disconnect link {}: {}", cid, e);
            }
            return;
        };

        info!("Device {} connected: {} as {:?} on link {}", device, peer, role, cid);
        self.ctx.events.broadcast(CmEvent::Connected {
            device,
            peer,
            role: role.opposite(),
            params,
        });
    }

    fn on_disconnect_complete(&mut self, cid: Cid, reason: u8) {
        let Some(device) = self.ctx.device_for(cid) else {
            return;
        };
        let peer = self.ctx.devices.get(device).peer;
        self.ctx.devices.set_state(device, DeviceState::Disconnected);

        info!("Device {} ({}) disconnected, reason 0x{:02X}", device, peer, reason);
        self.ctx.events.broadcast(CmEvent::Disconnected {
            device,
            peer,
            reason,
        });
        self.client.on_disconnected(device);
        security::on_disconnected(&mut self.ctx, device);
    }

    /// Deliver queued events in order
    pub(super) fn flush_events(&mut self) {
        while let Some((route, event)) = self.ctx.events.pop() {
            self.dispatch(route, &event);
        }
    }

    fn dispatch(&mut self, route: Route, event: &CmEvent) {
        match route {
            Route::All => {
                for handler in self.server.handlers_mut() {
                    handler.handle(event);
                }
                for handler in self.client.handlers_mut() {
                    handler.handle(event);
                }
            }
            Route::Server(handle) => {
                for handler in self.server.owners_mut(handle) {
                    handler.handle(event);
                }
                for handler in self.client.handlers_mut() {
                    handler.handle(event);
                }
            }
            Route::Client(client) => self.client.handler_mut(client).handle(event),
            Route::ClientOnly(client) => {
                self.client.handler_mut(client).handle(event);
                return;
            }
            Route::App => {}
        }
        if let Some(app) = self.app.as_mut() {
            app.handle(event);
        }
    }
}
