//! GATT client registry and discovery engine
//!
//! Clients register one service template each. Discovery on a device walks
//! primary services, then the characteristics of every matching service
//! instance, then the descriptors the templates ask for. Only one discovery
//! session runs at a time.

use crate::error::{CmError, CmResult};
use crate::event::{CmEvent, CmHandler, Route};
use crate::gatt::types::{
    CharacteristicProperty, ClientId, DiscoveredCharacteristic, DiscoveredDescriptor,
    DiscoveryStatus, ServiceInstance, ServiceTemplate,
};
use crate::hal::Hal;
use crate::manager::Context;
use crate::nvm::Nvm;
use crate::security::BondStore;
use crate::types::{BondId, Cid, DeviceId, Status};
use crate::uuid::Uuid;
use log::{debug, info, trace, warn};

/// A registered client
struct ClientEntry {
    template: ServiceTemplate,
    instances: Vec<ServiceInstance>,
    handler: Box<dyn CmHandler>,
}

/// A service instance found during the current session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct InstanceRef {
    client: usize,
    instance: usize,
}

/// Represents the state of the discovery process
#[derive(Debug, Clone, PartialEq, Eq)]
enum DiscoveryState {
    Idle,
    DiscoveringServices {
        device: DeviceId,
        found: Vec<InstanceRef>,
        mandatory_found: bool,
    },
    DiscoveringChars {
        device: DeviceId,
        found: Vec<InstanceRef>,
        cursor: usize,
        /// Last recorded characteristic whose end handle is not yet known
        open: Option<usize>,
    },
    DiscoveringDescriptors {
        device: DeviceId,
        found: Vec<InstanceRef>,
        cursor: usize,
        characteristic: usize,
    },
}

impl DiscoveryState {
    fn device(&self) -> Option<DeviceId> {
        match self {
            DiscoveryState::Idle => None,
            DiscoveryState::DiscoveringServices { device, .. }
            | DiscoveryState::DiscoveringChars { device, .. }
            | DiscoveryState::DiscoveringDescriptors { device, .. } => Some(*device),
        }
    }
}

/// Registered GATT clients and the discovery session
pub struct GattClient {
    clients: Vec<ClientEntry>,
    capacity: usize,
    state: DiscoveryState,
}

impl std::fmt::Debug for GattClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GattClient")
            .field("clients", &self.clients.len())
            .field("capacity", &self.capacity)
            .field("state", &self.state)
            .finish()
    }
}

/// Pick the instance slot a newly found service goes into: the slot already
/// reserved for the device's bond, else a slot nobody holds
fn select_slot(
    instances: &[ServiceInstance],
    bond: Option<BondId>,
    bonds: &BondStore,
) -> Option<usize> {
    let reserved = bond.and_then(|bond| {
        instances
            .iter()
            .position(|instance| instance.device.is_none() && instance.bond == Some(bond))
    });
    reserved.or_else(|| {
        instances.iter().position(|instance| {
            instance.device.is_none()
                && instance.bond.map_or(true, |other| !bonds.is_bonded(other))
        })
    })
}

impl GattClient {
    pub fn new(capacity: usize) -> Self {
        Self {
            clients: Vec::new(),
            capacity,
            state: DiscoveryState::Idle,
        }
    }

    /// Register a client; panics beyond the configured capacity
    pub fn register(&mut self, template: ServiceTemplate, handler: Box<dyn CmHandler>) -> ClientId {
        assert!(
            self.clients.len() < self.capacity,
            "client registration exceeds max_clients ({})",
            self.capacity
        );
        assert!(
            template.instances > 0,
            "service template {} has no instance slots",
            template.uuid
        );
        let instances = vec![ServiceInstance::default(); template.instances];
        debug!(
            "Registered client {} for service {}{}",
            self.clients.len(),
            template.uuid,
            if template.mandatory { " (mandatory)" } else { "" }
        );
        self.clients.push(ClientEntry {
            template,
            instances,
            handler,
        });
        ClientId(self.clients.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn template(&self, client: ClientId) -> &ServiceTemplate {
        &self.clients[client.0].template
    }

    pub fn instance(&self, client: ClientId, index: usize) -> Option<&ServiceInstance> {
        self.clients
            .get(client.0)
            .and_then(|entry| entry.instances.get(index))
    }

    /// Instances of a client discovered on a connected device
    pub fn instances_on(
        &self,
        client: ClientId,
        device: DeviceId,
    ) -> impl Iterator<Item = (usize, &ServiceInstance)> {
        self.clients[client.0]
            .instances
            .iter()
            .enumerate()
            .filter(move |(_, instance)| instance.device == Some(device))
    }

    pub fn is_discovering(&self) -> bool {
        self.state != DiscoveryState::Idle
    }

    /// Device the running session is discovering
    pub fn discovering_device(&self) -> Option<DeviceId> {
        self.state.device()
    }

    /// Client owning `handle` on `device`
    pub fn owner_of(&self, device: DeviceId, handle: u16) -> Option<ClientId> {
        self.clients
            .iter()
            .position(|entry| {
                entry
                    .instances
                    .iter()
                    .any(|instance| instance.device == Some(device) && instance.contains(handle))
            })
            .map(ClientId)
    }

    pub(crate) fn handler_mut(&mut self, client: ClientId) -> &mut dyn CmHandler {
        self.clients[client.0].handler.as_mut()
    }

    pub(crate) fn handlers_mut(&mut self) -> impl Iterator<Item = &mut Box<dyn CmHandler>> {
        self.clients.iter_mut().map(|entry| &mut entry.handler)
    }

    /// Start discovering the registered services on a device
    pub fn start_discovery<H: Hal, N: Nvm>(
        &mut self,
        ctx: &mut Context<H, N>,
        device: DeviceId,
    ) -> CmResult<()> {
        if let Some(busy) = self.state.device() {
            debug!("Discovery on device {} rejected: device {} in progress", device, busy);
            return Err(CmError::DiscoveryInProgress);
        }
        let cid = ctx
            .connected_cid(device)
            .ok_or(CmError::NotConnected(device))?;

        ctx.hal.discover_primary_services(cid)?;

        // Forget what an earlier session found on this device
        for entry in &mut self.clients {
            for instance in &mut entry.instances {
                if instance.device == Some(device) {
                    instance.device = None;
                    instance.reset();
                }
            }
        }

        info!("Starting service discovery on device {}", device);
        self.state = DiscoveryState::DiscoveringServices {
            device,
            found: Vec::new(),
            mandatory_found: false,
        };
        Ok(())
    }

    /// Session device for an event on `cid`, if the event belongs to the
    /// running session
    fn session_device<H: Hal, N: Nvm>(&self, ctx: &Context<H, N>, cid: Cid) -> Option<DeviceId> {
        let device = self.state.device()?;
        if ctx.devices.get(device).cid == Some(cid) {
            Some(device)
        } else {
            debug!("Discovery event on link {} outside the running session", cid);
            None
        }
    }

    pub(crate) fn on_service<H: Hal, N: Nvm>(
        &mut self,
        ctx: &mut Context<H, N>,
        cid: Cid,
        uuid: Uuid,
        start_handle: u16,
        end_handle: u16,
    ) {
        if self.session_device(ctx, cid).is_none() {
            return;
        }
        let DiscoveryState::DiscoveringServices {
            device,
            found,
            mandatory_found,
        } = &mut self.state
        else {
            debug!("Service {} reported outside the service sweep", uuid);
            return;
        };
        trace!(
            "Service {} at 0x{:04X}..0x{:04X} on device {}",
            uuid,
            start_handle,
            end_handle,
            device
        );

        let bond = ctx.devices.get(*device).bond_id;
        for (index, entry) in self.clients.iter_mut().enumerate() {
            if entry.template.uuid != uuid {
                continue;
            }
            let Some(slot) = select_slot(&entry.instances, bond, &ctx.bonds) else {
                // Known limitation: with every slot held by other devices
                // or bonds, the service is skipped
                debug!(
                    "No free instance of service {} for device {}, skipping",
                    uuid, device
                );
                continue;
            };

            let instance = &mut entry.instances[slot];
            instance.reset();
            instance.device = Some(*device);
            instance.bond = bond;
            instance.start_handle = start_handle;
            instance.end_handle = end_handle;

            found.push(InstanceRef {
                client: index,
                instance: slot,
            });
            if entry.template.mandatory {
                *mandatory_found = true;
            }
        }
    }

    pub(crate) fn on_service_cfm<H: Hal, N: Nvm>(
        &mut self,
        ctx: &mut Context<H, N>,
        cid: Cid,
        status: Status,
    ) {
        if self.session_device(ctx, cid).is_none() {
            return;
        }
        let (device, found, mandatory_found) =
            match std::mem::replace(&mut self.state, DiscoveryState::Idle) {
                DiscoveryState::DiscoveringServices {
                    device,
                    found,
                    mandatory_found,
                } => (device, found, mandatory_found),
                other => {
                    warn!("Unexpected service discovery confirmation on link {}", cid);
                    self.state = other;
                    return;
                }
            };

        if !status.is_success() {
            warn!("Service discovery on device {} failed: {}", device, status);
            return self.complete(ctx, device, DiscoveryStatus::ServiceDiscoveryFailed);
        }

        let mandatory_registered = self.clients.iter().any(|entry| entry.template.mandatory);
        if found.is_empty() || (mandatory_registered && !mandatory_found) {
            info!(
                "Device {}: {} service(s) found, mandatory found: {}",
                device,
                found.len(),
                mandatory_found
            );
            return self.complete(ctx, device, DiscoveryStatus::MandatoryServiceNotFound);
        }

        self.discover_characteristics(ctx, device, found, 0);
    }

    /// Discover characteristics of the instance at `cursor`, skipping
    /// instances that cannot hold any
    fn discover_characteristics<H: Hal, N: Nvm>(
        &mut self,
        ctx: &mut Context<H, N>,
        device: DeviceId,
        found: Vec<InstanceRef>,
        cursor: usize,
    ) {
        let Some(cid) = ctx.connected_cid(device) else {
            return self.complete(ctx, device, DiscoveryStatus::CharDiscoveryFailed);
        };

        let next = found.iter().enumerate().skip(cursor).find(|(_, at)| {
            let entry = &self.clients[at.client];
            let instance = &entry.instances[at.instance];
            !entry.template.characteristics.is_empty()
                && instance.end_handle > instance.start_handle
        });
        let Some((next, at)) = next.map(|(index, at)| (index, *at)) else {
            return self.complete(ctx, device, DiscoveryStatus::Success);
        };

        let entry = &self.clients[at.client];
        let instance = &entry.instances[at.instance];
        let (start, end) = (instance.start_handle, instance.end_handle);
        debug!(
            "Discovering characteristics of {} on device {} (0x{:04X}..0x{:04X})",
            entry.template.uuid, device, start, end
        );
        if let Err(e) = ctx.hal.discover_characteristics(cid, start, end) {
            warn!("Characteristic discovery could not start: {}", e);
            return self.complete(ctx, device, DiscoveryStatus::CharDiscoveryFailed);
        }
        self.state = DiscoveryState::DiscoveringChars {
            device,
            found,
            cursor: next,
            open: None,
        };
    }

    pub(crate) fn on_characteristic<H: Hal, N: Nvm>(
        &mut self,
        ctx: &mut Context<H, N>,
        cid: Cid,
        uuid: Uuid,
        declaration_handle: u16,
        value_handle: u16,
        properties: CharacteristicProperty,
    ) {
        if self.session_device(ctx, cid).is_none() {
            return;
        }
        let DiscoveryState::DiscoveringChars {
            found, cursor, open, ..
        } = &mut self.state
        else {
            debug!("Characteristic {} reported outside the sweep", uuid);
            return;
        };

        let at = found[*cursor];
        let entry = &mut self.clients[at.client];
        let instance = &mut entry.instances[at.instance];

        // A new declaration ends the previous characteristic
        if let Some(previous) = open.take() {
            instance.characteristics[previous].end_handle = declaration_handle.saturating_sub(1);
        }

        let Some(template) = entry
            .template
            .characteristics
            .iter()
            .position(|characteristic| characteristic.uuid == uuid)
        else {
            return;
        };

        trace!(
            "Characteristic {} value 0x{:04X} properties {:?}",
            uuid,
            value_handle,
            properties
        );
        instance.characteristics.push(DiscoveredCharacteristic {
            uuid,
            template,
            declaration_handle,
            value_handle,
            properties,
            end_handle: instance.end_handle,
            descriptors: Vec::new(),
        });
        *open = Some(instance.characteristics.len() - 1);
    }

    pub(crate) fn on_characteristic_cfm<H: Hal, N: Nvm>(
        &mut self,
        ctx: &mut Context<H, N>,
        cid: Cid,
        status: Status,
    ) {
        if self.session_device(ctx, cid).is_none() {
            return;
        }
        let (device, found, cursor) =
            match std::mem::replace(&mut self.state, DiscoveryState::Idle) {
                DiscoveryState::DiscoveringChars {
                    device,
                    found,
                    cursor,
                    ..
                } => (device, found, cursor),
                other => {
                    warn!("Unexpected characteristic discovery confirmation on link {}", cid);
                    self.state = other;
                    return;
                }
            };

        if !status.is_success() {
            warn!("Characteristic discovery on device {} failed: {}", device, status);
            return self.complete(ctx, device, DiscoveryStatus::CharDiscoveryFailed);
        }
        self.discover_descriptors(ctx, device, found, cursor, 0);
    }

    /// Discover descriptors for the first characteristic of the current
    /// instance, at or after `from`, whose template asks for any. Moves to
    /// the next instance when none is left.
    fn discover_descriptors<H: Hal, N: Nvm>(
        &mut self,
        ctx: &mut Context<H, N>,
        device: DeviceId,
        found: Vec<InstanceRef>,
        cursor: usize,
        from: usize,
    ) {
        let at = found[cursor];
        let entry = &self.clients[at.client];
        let instance = &entry.instances[at.instance];

        let next = instance
            .characteristics
            .iter()
            .enumerate()
            .skip(from)
            .find(|(_, characteristic)| {
                !entry.template.characteristics[characteristic.template]
                    .descriptors
                    .is_empty()
                    && characteristic.end_handle > characteristic.value_handle
            })
            .map(|(index, characteristic)| {
                (
                    index,
                    characteristic.value_handle + 1,
                    characteristic.end_handle,
                )
            });

        let Some((characteristic, start, end)) = next else {
            return self.discover_characteristics(ctx, device, found, cursor + 1);
        };
        let Some(cid) = ctx.connected_cid(device) else {
            return self.complete(ctx, device, DiscoveryStatus::DescDiscoveryFailed);
        };

        debug!(
            "Discovering descriptors on device {} (0x{:04X}..0x{:04X})",
            device, start, end
        );
        if let Err(e) = ctx.hal.discover_descriptors(cid, start, end) {
            warn!("Descriptor discovery could not start: {}", e);
            return self.complete(ctx, device, DiscoveryStatus::DescDiscoveryFailed);
        }
        self.state = DiscoveryState::DiscoveringDescriptors {
            device,
            found,
            cursor,
            characteristic,
        };
    }

    pub(crate) fn on_descriptor<H: Hal, N: Nvm>(
        &mut self,
        ctx: &mut Context<H, N>,
        cid: Cid,
        uuid: Uuid,
        handle: u16,
    ) {
        if self.session_device(ctx, cid).is_none() {
            return;
        }
        let DiscoveryState::DiscoveringDescriptors {
            found,
            cursor,
            characteristic,
            ..
        } = &self.state
        else {
            debug!("Descriptor {} reported outside the sweep", uuid);
            return;
        };

        let at = found[*cursor];
        let entry = &mut self.clients[at.client];
        let discovered = &mut entry.instances[at.instance].characteristics[*characteristic];
        if entry.template.characteristics[discovered.template]
            .descriptors
            .contains(&uuid)
        {
            trace!("Descriptor {} at 0x{:04X}", uuid, handle);
            discovered
                .descriptors
                .push(DiscoveredDescriptor { uuid, handle });
        }
    }

    pub(crate) fn on_descriptor_cfm<H: Hal, N: Nvm>(
        &mut self,
        ctx: &mut Context<H, N>,
        cid: Cid,
        status: Status,
    ) {
        if self.session_device(ctx, cid).is_none() {
            return;
        }
        let (device, found, cursor, characteristic) =
            match std::mem::replace(&mut self.state, DiscoveryState::Idle) {
                DiscoveryState::DiscoveringDescriptors {
                    device,
                    found,
                    cursor,
                    characteristic,
                } => (device, found, cursor, characteristic),
                other => {
                    warn!("Unexpected descriptor discovery confirmation on link {}", cid);
                    self.state = other;
                    return;
                }
            };

        if !status.is_success() {
            warn!("Descriptor discovery on device {} failed: {}", device, status);
            return self.complete(ctx, device, DiscoveryStatus::DescDiscoveryFailed);
        }
        self.discover_descriptors(ctx, device, found, cursor, characteristic + 1);
    }

    /// End the session and tell the clients with an instance on the
    /// device, then the application
    fn complete<H: Hal, N: Nvm>(
        &mut self,
        ctx: &mut Context<H, N>,
        device: DeviceId,
        status: DiscoveryStatus,
    ) {
        self.state = DiscoveryState::Idle;
        info!("Discovery on device {} complete: {:?}", device, status);

        for (client, entry) in self.clients.iter().enumerate() {
            for (index, instance) in entry.instances.iter().enumerate() {
                if instance.device == Some(device) {
                    ctx.events.push(
                        Route::ClientOnly(ClientId(client)),
                        CmEvent::DiscoveryComplete {
                            device,
                            status,
                            instance: Some(index),
                        },
                    );
                }
            }
        }
        ctx.events.push(
            Route::App,
            CmEvent::DiscoveryComplete {
                device,
                status,
                instance: None,
            },
        );
    }

    /// Drop a device's session and instances once it has disconnected.
    /// Instances of bonded peers keep their handles for the next link.
    pub(crate) fn on_disconnected(&mut self, device: DeviceId) {
        if self.state.device() == Some(device) {
            debug!("Device {} disconnected, aborting discovery", device);
            self.state = DiscoveryState::Idle;
        }
        for entry in &mut self.clients {
            for instance in &mut entry.instances {
                if instance.device == Some(device) {
                    instance.device = None;
                    if instance.bond.is_none() {
                        instance.reset();
                    }
                }
            }
        }
    }

    /// Reserve a device's instances for its new bond
    pub(crate) fn on_bonded(&mut self, device: DeviceId, bond: BondId) {
        for entry in &mut self.clients {
            for instance in &mut entry.instances {
                if instance.device == Some(device) {
                    instance.bond = Some(bond);
                }
            }
        }
    }

    /// Route of a confirmation or value for `handle`: its owning client,
    /// else only the application
    fn route_for(&self, device: DeviceId, handle: u16) -> Route {
        self.owner_of(device, handle)
            .map_or(Route::App, Route::Client)
    }

    pub(crate) fn on_read_cfm<H: Hal, N: Nvm>(
        &self,
        ctx: &mut Context<H, N>,
        cid: Cid,
        status: Status,
        handle: u16,
        value: Vec<u8>,
    ) {
        let Some(device) = ctx.device_for(cid) else {
            return;
        };
        trace!("Read 0x{:04X} on device {}: {}", handle, device, hex::encode(&value));
        ctx.devices.get_mut(device).ongoing_read = None;
        ctx.events.push(
            self.route_for(device, handle),
            CmEvent::ReadCfm {
                device,
                status,
                handle,
                value,
            },
        );
    }

    pub(crate) fn on_write_cfm<H: Hal, N: Nvm>(
        &self,
        ctx: &mut Context<H, N>,
        cid: Cid,
        status: Status,
        handle: u16,
    ) {
        let Some(device) = ctx.device_for(cid) else {
            return;
        };
        ctx.devices.get_mut(device).ongoing_write = None;
        ctx.events.push(
            self.route_for(device, handle),
            CmEvent::WriteCfm {
                device,
                status,
                handle,
            },
        );
    }

    pub(crate) fn on_notification<H: Hal, N: Nvm>(
        &self,
        ctx: &mut Context<H, N>,
        cid: Cid,
        handle: u16,
        value: Vec<u8>,
        indication: bool,
    ) {
        let Some(device) = ctx.device_for(cid) else {
            return;
        };
        trace!("Value 0x{:04X} from device {}: {}", handle, device, hex::encode(&value));
        let event = if indication {
            CmEvent::Indication {
                device,
                handle,
                value,
            }
        } else {
            CmEvent::Notification {
                device,
                handle,
                value,
            }
        };
        ctx.events.push(self.route_for(device, handle), event);
    }
}

/// Read a remote characteristic; one read may be outstanding per device
pub fn read_characteristic<H: Hal, N: Nvm>(
    ctx: &mut Context<H, N>,
    device: DeviceId,
    handle: u16,
) -> CmResult<()> {
    let cid = ctx
        .connected_cid(device)
        .ok_or(CmError::NotConnected(device))?;
    if let Some(pending) = ctx.devices.get(device).ongoing_read {
        debug!("Read of 0x{:04X} rejected, 0x{:04X} pending", handle, pending);
        return Err(CmError::Busy);
    }
    ctx.hal.read_characteristic(cid, handle)?;
    ctx.devices.get_mut(device).ongoing_read = Some(handle);
    Ok(())
}

/// Write a remote characteristic. Writes with a response are limited to one
/// outstanding per device; commands are not tracked.
pub fn write_characteristic<H: Hal, N: Nvm>(
    ctx: &mut Context<H, N>,
    device: DeviceId,
    handle: u16,
    value: &[u8],
    with_response: bool,
) -> CmResult<()> {
    let cid = ctx
        .connected_cid(device)
        .ok_or(CmError::NotConnected(device))?;
    if with_response {
        if let Some(pending) = ctx.devices.get(device).ongoing_write {
            debug!("Write of 0x{:04X} rejected, 0x{:04X} pending", handle, pending);
            return Err(CmError::Busy);
        }
    }
    trace!("Write 0x{:04X} on device {}: {}", handle, device, hex::encode(value));
    ctx.hal.write_characteristic(cid, handle, value, with_response)?;
    if with_response {
        ctx.devices.get_mut(device).ongoing_write = Some(handle);
    }
    Ok(())
}
