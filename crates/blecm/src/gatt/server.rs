//! GATT server dispatch
//!
//! Attribute storage and the ATT protocol live below the HAL. Servers only
//! claim a range of local attribute handles; accesses to those handles are
//! turned into events and answered through [`access_response`].

use crate::error::{CmError, CmResult};
use crate::event::{CmEvent, CmHandler, Route};
use crate::gatt::types::ServerId;
use crate::hal::constants::ATT_STATUS_INVALID_HANDLE;
use crate::hal::{AccessFlags, Hal};
use crate::manager::Context;
use crate::nvm::Nvm;
use crate::types::{Cid, DeviceId, Status};
use log::{debug, trace, warn};
use std::ops::RangeInclusive;

/// A registered server
struct ServerEntry {
    handles: RangeInclusive<u16>,
    handler: Box<dyn CmHandler>,
}

/// Registered GATT servers
pub struct GattServer {
    servers: Vec<ServerEntry>,
    capacity: usize,
}

impl std::fmt::Debug for GattServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GattServer")
            .field(
                "ranges",
                &self
                    .servers
                    .iter()
                    .map(|entry| entry.handles.clone())
                    .collect::<Vec<_>>(),
            )
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl GattServer {
    pub fn new(capacity: usize) -> Self {
        Self {
            servers: Vec::new(),
            capacity,
        }
    }

    /// Register a handle range; panics beyond the configured capacity
    pub fn register(&mut self, handles: RangeInclusive<u16>, handler: Box<dyn CmHandler>) -> ServerId {
        assert!(
            self.servers.len() < self.capacity,
            "server registration exceeds max_servers ({})",
            self.capacity
        );
        assert!(
            !handles.is_empty(),
            "empty server handle range {:?}",
            handles
        );
        debug!(
            "Registered server {} for handles 0x{:04X}..=0x{:04X}",
            self.servers.len(),
            handles.start(),
            handles.end()
        );
        self.servers.push(ServerEntry { handles, handler });
        ServerId(self.servers.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Whether any server owns `handle`
    pub fn owns(&self, handle: u16) -> bool {
        self.servers.iter().any(|entry| entry.handles.contains(&handle))
    }

    /// Handlers of the servers owning `handle`
    pub(crate) fn owners_mut(&mut self, handle: u16) -> impl Iterator<Item = &mut Box<dyn CmHandler>> {
        self.servers
            .iter_mut()
            .filter(move |entry| entry.handles.contains(&handle))
            .map(|entry| &mut entry.handler)
    }

    pub(crate) fn handlers_mut(&mut self) -> impl Iterator<Item = &mut Box<dyn CmHandler>> {
        self.servers.iter_mut().map(|entry| &mut entry.handler)
    }

    /// A peer accessed a local attribute
    pub(crate) fn on_access<H: Hal, N: Nvm>(
        &self,
        ctx: &mut Context<H, N>,
        cid: Cid,
        handle: u16,
        flags: AccessFlags,
        offset: u16,
        value: Vec<u8>,
    ) {
        let Some(device) = ctx.device_for(cid) else {
            return;
        };

        if !self.owns(handle) {
            debug!("Access to unowned handle 0x{:04X} from device {}", handle, device);
            if let Err(e) = ctx
                .hal
                .access_response(cid, handle, ATT_STATUS_INVALID_HANDLE, &[])
            {
                warn!("Failed to reject access to 0x{:04X}: {}", handle, e);
            }
            return;
        }

        let event = if flags.contains(AccessFlags::READ) {
            CmEvent::ServerRead {
                device,
                handle,
                offset,
            }
        } else {
            trace!("Write to 0x{:04X}: {}", handle, hex::encode(&value));
            CmEvent::ServerWrite {
                device,
                handle,
                offset,
                value,
                with_response: !flags.contains(AccessFlags::WRITE_COMMAND),
            }
        };
        ctx.events.push(Route::Server(handle), event);
    }

    pub(crate) fn on_value_cfm<H: Hal, N: Nvm>(
        &self,
        ctx: &mut Context<H, N>,
        cid: Cid,
        status: Status,
        handle: u16,
        indication: bool,
    ) {
        let Some(device) = ctx.device_for(cid) else {
            return;
        };
        let event = if indication {
            CmEvent::IndicationCfm {
                device,
                status,
                handle,
            }
        } else {
            CmEvent::NotificationCfm {
                device,
                status,
                handle,
            }
        };
        ctx.events.push(Route::Server(handle), event);
    }
}

/// Answer a `ServerRead` or `ServerWrite`
pub fn access_response<H: Hal, N: Nvm>(
    ctx: &mut Context<H, N>,
    device: DeviceId,
    handle: u16,
    status: Status,
    value: &[u8],
) -> CmResult<()> {
    let cid = ctx
        .connected_cid(device)
        .ok_or(CmError::NotConnected(device))?;
    ctx.hal.access_response(cid, handle, status, value)?;
    Ok(())
}

/// Send a notification of a local attribute
pub fn notify<H: Hal, N: Nvm>(
    ctx: &mut Context<H, N>,
    device: DeviceId,
    handle: u16,
    value: &[u8],
) -> CmResult<()> {
    let cid = ctx
        .connected_cid(device)
        .ok_or(CmError::NotConnected(device))?;
    trace!("Notify 0x{:04X} to device {}: {}", handle, device, hex::encode(value));
    ctx.hal.send_notification(cid, handle, value)?;
    Ok(())
}

/// Send an indication of a local attribute; confirmed by `IndicationCfm`
pub fn indicate<H: Hal, N: Nvm>(
    ctx: &mut Context<H, N>,
    device: DeviceId,
    handle: u16,
    value: &[u8],
) -> CmResult<()> {
    let cid = ctx
        .connected_cid(device)
        .ok_or(CmError::NotConnected(device))?;
    trace!("Indicate 0x{:04X} to device {}: {}", handle, device, hex::encode(value));
    ctx.hal.send_indication(cid, handle, value)?;
    Ok(())
}
