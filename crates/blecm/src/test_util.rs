//! Helpers shared by the unit tests

use crate::config::CmConfig;
use crate::event::CmEvent;
use crate::hal::{HalCall, HalEvent, RecordingHal};
use crate::manager::ConnectionManager;
use crate::nvm::MemoryNvm;
use crate::security::BondStore;
use crate::types::{Cid, ConnParams, DeviceId, Role, Status, TypedBdAddr};
use std::cell::RefCell;
use std::rc::Rc;

pub(crate) type TestManager = ConnectionManager<RecordingHal, MemoryNvm>;

pub(crate) const OK: Status = Status::SUCCESS;

/// Collects the events delivered to the handlers it hands out
#[derive(Clone, Default)]
pub(crate) struct Recorder(Rc<RefCell<Vec<CmEvent>>>);

impl Recorder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn handler(&self) -> impl FnMut(&CmEvent) + 'static {
        let sink = self.0.clone();
        move |event: &CmEvent| sink.borrow_mut().push(event.clone())
    }

    pub(crate) fn take(&self) -> Vec<CmEvent> {
        std::mem::take(&mut *self.0.borrow_mut())
    }
}

pub(crate) fn manager_with(config: CmConfig) -> TestManager {
    let words = config.nvm_offset as usize
        + BondStore::new(config.max_bonded_devices, 0).nvm_words();
    ConnectionManager::new(config, RecordingHal::new(), MemoryNvm::new(words)).unwrap()
}

pub(crate) fn manager() -> TestManager {
    manager_with(CmConfig::default())
}

pub(crate) fn peer(last: u8) -> TypedBdAddr {
    TypedBdAddr::public([last, 0x22, 0x33, 0x44, 0x55, 0x66])
}

pub(crate) fn params() -> ConnParams {
    ConnParams {
        interval: 0x0018,
        latency: 0,
        supervision_timeout: 0x0190,
    }
}

/// Bring up a link; `role` is the local role
pub(crate) fn connect(cm: &mut TestManager, cid: u16, peer: TypedBdAddr, role: Role) -> DeviceId {
    cm.process_event(HalEvent::ConnectionComplete {
        status: OK,
        cid: Cid(cid),
        peer,
        role,
        params: params(),
    });
    cm.find_device(&peer).unwrap()
}

pub(crate) fn disconnect(cm: &mut TestManager, cid: u16) {
    cm.process_event(HalEvent::DisconnectComplete {
        cid: Cid(cid),
        reason: crate::hal::constants::HCI_ERROR_REMOTE_USER_TERMINATED,
    });
}

pub(crate) fn take_calls(cm: &mut TestManager) -> Vec<HalCall> {
    cm.hal_mut().take_calls()
}
