//! High-level events delivered to registered handlers
//!
//! Components never call handlers directly. They push a [`CmEvent`] with a
//! [`Route`] onto the [`EventQueue`] held by the manager context, and the
//! router delivers the queue once the triggering operation has finished.

use crate::gap::{AdvertisingState, ConnectState, ObserveState, ScanReport, ScanState};
use crate::gatt::{ClientId, DiscoveryStatus};
use crate::hal::RadioEventKind;
use crate::types::{BondId, ConnParams, DeviceId, Role, SecurityLevel, Status, TypedBdAddr};
use std::collections::VecDeque;

/// Events produced by the connection manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CmEvent {
    /// A link was established and a device slot claimed
    Connected {
        device: DeviceId,
        peer: TypedBdAddr,
        /// Role of the peer on the link
        role: Role,
        params: ConnParams,
    },
    /// A central connection attempt failed or was cancelled
    ConnectFailed {
        peer: Option<TypedBdAddr>,
        status: Status,
    },
    Disconnected {
        device: DeviceId,
        peer: TypedBdAddr,
        reason: u8,
    },
    BondingNotify {
        device: DeviceId,
        bond: Option<BondId>,
        status: Status,
    },
    BondRemoved {
        bond: BondId,
        peer: TypedBdAddr,
    },
    EncryptionNotify {
        device: DeviceId,
        status: Status,
        enabled: bool,
        level: SecurityLevel,
    },
    AdvertisingState(AdvertisingState),
    ScanState(ScanState),
    ObserveState(ObserveState),
    ConnectState(ConnectState),
    AdvertReport(ScanReport),
    /// Discovery finished. Clients receive the index of their instance on
    /// the device; the application receives `None`.
    DiscoveryComplete {
        device: DeviceId,
        status: DiscoveryStatus,
        instance: Option<usize>,
    },
    ReadCfm {
        device: DeviceId,
        status: Status,
        handle: u16,
        value: Vec<u8>,
    },
    WriteCfm {
        device: DeviceId,
        status: Status,
        handle: u16,
    },
    Notification {
        device: DeviceId,
        handle: u16,
        value: Vec<u8>,
    },
    Indication {
        device: DeviceId,
        handle: u16,
        value: Vec<u8>,
    },
    /// A peer reads a local attribute; answer with `access_response`
    ServerRead {
        device: DeviceId,
        handle: u16,
        offset: u16,
    },
    /// A peer writes a local attribute. Requests with a response expect an
    /// `access_response`.
    ServerWrite {
        device: DeviceId,
        handle: u16,
        offset: u16,
        value: Vec<u8>,
        with_response: bool,
    },
    NotificationCfm {
        device: DeviceId,
        status: Status,
        handle: u16,
    },
    IndicationCfm {
        device: DeviceId,
        status: Status,
        handle: u16,
    },
    PasskeyDisplay {
        device: DeviceId,
        passkey: u32,
    },
    PasskeyInput {
        device: DeviceId,
    },
    PairingAuth {
        device: DeviceId,
        bonding: bool,
    },
    ConnectionUpdated {
        device: DeviceId,
        params: ConnParams,
    },
    ConnParamUpdateCfm {
        device: DeviceId,
        status: Status,
    },
    Rssi {
        device: DeviceId,
        status: Status,
        rssi: i8,
    },
    Radio {
        device: Option<DeviceId>,
        kind: RadioEventKind,
    },
}

/// Receiver of connection manager events
pub trait CmHandler {
    fn handle(&mut self, event: &CmEvent);
}

impl<F> CmHandler for F
where
    F: FnMut(&CmEvent),
{
    fn handle(&mut self, event: &CmEvent) {
        self(event)
    }
}

/// Which handlers an event is delivered to, in delivery order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Every server, every client, then the application
    All,
    /// Servers owning the handle, every client, then the application
    Server(u16),
    /// The owning client, then the application
    Client(ClientId),
    /// Only the given client
    ClientOnly(ClientId),
    /// Only the application
    App,
}

/// Events waiting for delivery
#[derive(Debug, Default)]
pub struct EventQueue {
    queue: VecDeque<(Route, CmEvent)>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, route: Route, event: CmEvent) {
        self.queue.push_back((route, event));
    }

    /// Queue an event for every handler
    pub fn broadcast(&mut self, event: CmEvent) {
        self.push(Route::All, event);
    }

    pub fn pop(&mut self) -> Option<(Route, CmEvent)> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_closure_is_a_handler() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let mut handler: Box<dyn CmHandler> = Box::new(move |event: &CmEvent| {
            sink.borrow_mut().push(event.clone());
        });

        handler.handle(&CmEvent::ScanState(ScanState::Scanning));
        assert_eq!(*seen.borrow(), vec![CmEvent::ScanState(ScanState::Scanning)]);
    }

    #[test]
    fn test_queue_preserves_order() {
        let mut queue = EventQueue::new();
        queue.broadcast(CmEvent::ScanState(ScanState::Scanning));
        queue.push(Route::App, CmEvent::ScanState(ScanState::Idle));
        assert_eq!(queue.len(), 2);

        assert_eq!(
            queue.pop(),
            Some((Route::All, CmEvent::ScanState(ScanState::Scanning)))
        );
        assert_eq!(
            queue.pop(),
            Some((Route::App, CmEvent::ScanState(ScanState::Idle)))
        );
        assert!(queue.is_empty());
    }
}
