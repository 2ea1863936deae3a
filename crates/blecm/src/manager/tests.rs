//! End-to-end tests of the connection manager against the recording HAL

use crate::config::CmConfig;
use crate::device::DeviceState;
use crate::error::CmError;
use crate::event::CmEvent;
use crate::gap::{AdvertKind, AdvertType, AdvertisingState};
use crate::gatt::{DiscoveryStatus, ServiceTemplate};
use crate::hal::constants::{SM_STATUS_REPEATED_ATTEMPTS, SM_STATUS_UNSPECIFIED};
use crate::hal::{DivApproval, HalCall, HalEvent, RecordingHal};
use crate::manager::ConnectionManager;
use crate::nvm::MemoryNvm;
use crate::security::{BondKeys, IdentityResolvingKey, LongTermKey, UnbondOutcome};
use crate::test_util::*;
use crate::types::{BondId, Cid, DeviceId, Role, SecurityLevel, Status, TypedBdAddr};
use crate::uuid::Uuid;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

const HEART_RATE: Uuid = Uuid::from_u16(0x180D);
const BATTERY: Uuid = Uuid::from_u16(0x180F);
const EDIV: u16 = 0x2A2A;
const RAND: [u8; 8] = [8, 7, 6, 5, 4, 3, 2, 1];

fn keys() -> BondKeys {
    BondKeys::new(
        LongTermKey::new([0x5C; 16], EDIV, RAND),
        0x0B0B,
        SecurityLevel::EncryptionWithAuthentication,
    )
}

/// Distribute keys and complete pairing on `cid`
fn pair(cm: &mut TestManager, cid: u16, keys: BondKeys) {
    cm.process_event(HalEvent::KeysInd {
        cid: Cid(cid),
        keys,
    });
    cm.process_event(HalEvent::PairingComplete {
        cid: Cid(cid),
        status: OK,
    });
}

fn bonded(cm: &mut TestManager, cid: u16, peer: TypedBdAddr) -> (DeviceId, BondId) {
    let device = connect(cm, cid, peer, Role::Central);
    pair(cm, cid, keys());
    let bond = cm.device(device).bond_id.unwrap();
    (device, bond)
}

#[test]
fn test_connect_discover_bond_disconnect() {
    let mut cm = manager();
    let app = Recorder::new();
    cm.register_client(ServiceTemplate::new(HEART_RATE).mandatory(), |_: &CmEvent| {});
    let battery = cm.register_client(ServiceTemplate::new(BATTERY), |_: &CmEvent| {});
    cm.register_app(app.handler());

    let device = connect(&mut cm, 0x40, peer(1), Role::Central);
    assert_eq!(device.index(), 0);
    assert_eq!(cm.device_state(device), DeviceState::Connected);

    cm.start_discovery(device).unwrap();
    for (uuid, start) in [(HEART_RATE, 0x0010), (BATTERY, 0x0020)] {
        cm.process_event(HalEvent::ServiceDiscovered {
            cid: Cid(0x40),
            uuid,
            start_handle: start,
            end_handle: start + 0x0F,
        });
    }
    cm.process_event(HalEvent::ServiceDiscoveryCfm {
        cid: Cid(0x40),
        status: OK,
    });
    assert!(!cm.client().is_discovering());

    pair(&mut cm, 0x40, keys());
    let bond = cm.device(device).bond_id.unwrap();
    assert_eq!(cm.bond(bond).unwrap().keys, keys());
    assert_eq!(cm.client().instance(battery, 0).unwrap().bond, Some(bond));
    assert!(cm.hal().calls().contains(&HalCall::WhitelistAdd(peer(1))));

    disconnect(&mut cm, 0x40);
    assert_eq!(cm.device_state(device), DeviceState::Disconnected);
    assert!(cm.device(device).is_free());
    assert_eq!(cm.find_device(&peer(1)), None);

    let events = app.take();
    let position = |wanted: &CmEvent| events.iter().position(|event| event == wanted).unwrap();
    let connected = position(&CmEvent::Connected {
        device,
        peer: peer(1),
        role: Role::Peripheral,
        params: params(),
    });
    let discovered = position(&CmEvent::DiscoveryComplete {
        device,
        status: DiscoveryStatus::Success,
        instance: None,
    });
    let bonding = position(&CmEvent::BondingNotify {
        device,
        bond: Some(bond),
        status: OK,
    });
    let disconnected = position(&CmEvent::Disconnected {
        device,
        peer: peer(1),
        reason: crate::hal::constants::HCI_ERROR_REMOTE_USER_TERMINATED,
    });
    assert!(connected < discovered && discovered < bonding && bonding < disconnected);
}

#[test]
fn test_bonds_persist_across_restart() {
    let mut cm = manager();
    let (_, bond) = bonded(&mut cm, 0x40, peer(1));

    let nvm = cm.nvm().clone();
    let restarted =
        ConnectionManager::new(CmConfig::default(), RecordingHal::new(), nvm).unwrap();
    assert_eq!(restarted.bond(bond).unwrap().peer, peer(1));
    assert_eq!(restarted.bond(bond).unwrap().keys, keys());
    assert_eq!(restarted.hal().calls(), &[HalCall::WhitelistAdd(peer(1))]);
}

#[test]
fn test_bonding_region_must_fit_nvm() {
    let config = CmConfig {
        nvm_offset: 0xFFF0,
        ..CmConfig::default()
    };
    let result = ConnectionManager::new(config, RecordingHal::new(), MemoryNvm::new(16));
    assert!(matches!(result, Err(CmError::InvalidParameter(_))));
}

#[test]
fn test_unbond_connected_device_waits_for_disconnect() {
    let mut cm = manager();
    let app = Recorder::new();
    cm.register_app(app.handler());
    let (_, bond) = bonded(&mut cm, 0x40, peer(1));
    app.take();

    assert_eq!(cm.unbond(bond).unwrap(), UnbondOutcome::DeferredUntilDisconnect);
    assert!(cm.bond(bond).is_some());
    assert!(app.take().is_empty());

    disconnect(&mut cm, 0x40);
    assert!(cm.bond(bond).is_none());
    assert!(app.take().contains(&CmEvent::BondRemoved {
        bond,
        peer: peer(1),
    }));
    assert!(cm.hal().calls().contains(&HalCall::WhitelistRemove(peer(1))));

    // The cleared record is gone from NVM too
    let restarted = ConnectionManager::new(
        CmConfig::default(),
        RecordingHal::new(),
        cm.nvm().clone(),
    )
    .unwrap();
    assert!(restarted.bond(bond).is_none());
}

#[test]
fn test_unbond_disconnected_device_is_immediate() {
    let mut cm = manager();
    let (_, bond) = bonded(&mut cm, 0x40, peer(1));
    disconnect(&mut cm, 0x40);

    assert_eq!(cm.unbond(bond).unwrap(), UnbondOutcome::Removed);
    assert!(cm.bond(bond).is_none());
    assert!(matches!(cm.unbond(bond), Err(CmError::BondNotFound(_))));
}

#[test]
fn test_unbond_while_advertising_waits_for_cancel() {
    let mut config = CmConfig::default();
    config.peripheral.adverts = vec![
        AdvertType::undirected(Some(Duration::from_secs(30))),
        AdvertType::undirected(None).with_whitelist(),
    ];
    let mut cm = manager_with(config);
    let (_, bond) = bonded(&mut cm, 0x40, peer(1));
    disconnect(&mut cm, 0x40);

    cm.start_advertising().unwrap();
    take_calls(&mut cm);
    assert_eq!(cm.unbond(bond).unwrap(), UnbondOutcome::DeferredUntilAdvertStopped);
    assert_eq!(cm.peripheral().state(), AdvertisingState::Stopping);
    assert!(cm.bond(bond).is_some());

    cm.process_event(HalEvent::AdvertisingCancelCfm { status: OK });
    assert!(cm.bond(bond).is_none());
    // The campaign restarts from the first type
    assert_eq!(cm.peripheral().state(), AdvertisingState::Advertising);
    assert_eq!(cm.peripheral().current_advert(), 0);
    let calls = take_calls(&mut cm);
    assert!(calls.contains(&HalCall::WhitelistRemove(peer(1))));
    assert!(calls.contains(&HalCall::StartAdvertising(AdvertKind::Undirected)));
}

#[test]
fn test_reconnect_resolves_private_address() {
    let mut cm = manager();
    let identity = peer(1);
    let irk = [0x1D; 16];
    let device = connect(&mut cm, 0x40, identity, Role::Peripheral);
    pair(&mut cm, 0x40, keys().with_irk(IdentityResolvingKey::new(irk)));
    let bond = cm.device(device).bond_id.unwrap();
    disconnect(&mut cm, 0x40);

    let rpa = TypedBdAddr::random([0x01, 0x02, 0x03, 0x04, 0x05, 0x47]);
    cm.hal_mut().add_resolvable(rpa.addr, irk);
    let device = connect(&mut cm, 0x41, rpa, Role::Peripheral);
    assert_eq!(cm.device(device).bond_id, Some(bond));

    // An unknown private address stays unbonded
    let stranger = TypedBdAddr::random([0x09, 0x09, 0x09, 0x09, 0x09, 0x48]);
    let other = connect(&mut cm, 0x42, stranger, Role::Peripheral);
    assert_eq!(cm.device(other).bond_id, None);
}

#[test]
fn test_repairing_private_address_without_irk_keeps_one_bond() {
    let mut cm = manager();
    let rpa = TypedBdAddr::random([0x11, 0x22, 0x33, 0x44, 0x55, 0x4A]);
    let device = connect(&mut cm, 0x40, rpa, Role::Central);
    pair(&mut cm, 0x40, keys());
    pair(&mut cm, 0x40, keys());

    let bond = cm.device(device).bond_id.unwrap();
    assert_eq!(cm.context().bonds.len(), 1);
    assert_eq!(cm.bond(bond).unwrap().peer, rpa);
}

#[test]
fn test_reconnect_answers_key_requests_from_bond() {
    let mut cm = manager();
    bonded(&mut cm, 0x40, peer(1));
    disconnect(&mut cm, 0x40);
    connect(&mut cm, 0x41, peer(1), Role::Central);
    connect(&mut cm, 0x42, peer(2), Role::Central);
    take_calls(&mut cm);

    cm.process_event(HalEvent::LongTermKeyRequest {
        cid: Cid(0x41),
        ediv: EDIV,
        rand: RAND,
    });
    cm.process_event(HalEvent::LongTermKeyRequest {
        cid: Cid(0x41),
        ediv: EDIV + 1,
        rand: RAND,
    });
    cm.process_event(HalEvent::KeyRequest { cid: Cid(0x41) });
    cm.process_event(HalEvent::KeyRequest { cid: Cid(0x42) });
    cm.process_event(HalEvent::DivApproveRequest {
        cid: Cid(0x41),
        div: 0x0B0B,
    });
    cm.process_event(HalEvent::DivApproveRequest {
        cid: Cid(0x42),
        div: 0x0B0B,
    });

    assert_eq!(
        take_calls(&mut cm),
        vec![
            HalCall::LtkResponse(Cid(0x41), Some([0x5C; 16])),
            HalCall::LtkResponse(Cid(0x41), None),
            HalCall::KeyRequestResponse(Cid(0x41), Some(keys())),
            HalCall::KeyRequestResponse(Cid(0x42), None),
            HalCall::DivApproval(Cid(0x41), DivApproval::Approved),
            HalCall::DivApproval(Cid(0x42), DivApproval::Revoked),
        ]
    );
}

#[test]
fn test_encryption_change_updates_link() {
    let mut cm = manager();
    let app = Recorder::new();
    cm.register_app(app.handler());
    let (device, _) = bonded(&mut cm, 0x40, peer(1));
    app.take();

    cm.process_event(HalEvent::EncryptionChange {
        cid: Cid(0x40),
        status: OK,
        enabled: true,
    });
    assert!(cm.device(device).encrypted);
    assert_eq!(
        app.take(),
        vec![CmEvent::EncryptionNotify {
            device,
            status: OK,
            enabled: true,
            level: SecurityLevel::EncryptionWithAuthentication,
        }]
    );
}

#[test]
#[should_panic(expected = "without a connected device")]
fn test_encryption_change_for_unknown_link_panics() {
    let mut cm = manager();
    cm.process_event(HalEvent::EncryptionChange {
        cid: Cid(0x77),
        status: OK,
        enabled: true,
    });
}

#[test]
fn test_repeated_pairing_attempts_disconnect() {
    let mut cm = manager();
    let app = Recorder::new();
    cm.register_app(app.handler());
    let device = connect(&mut cm, 0x40, peer(1), Role::Peripheral);
    take_calls(&mut cm);
    app.take();

    cm.process_event(HalEvent::PairingComplete {
        cid: Cid(0x40),
        status: SM_STATUS_REPEATED_ATTEMPTS,
    });
    assert_eq!(take_calls(&mut cm), vec![HalCall::Disconnect(Cid(0x40))]);
    assert_eq!(cm.device_state(device), DeviceState::Disconnecting);
    assert_eq!(
        app.take(),
        vec![CmEvent::BondingNotify {
            device,
            bond: None,
            status: SM_STATUS_REPEATED_ATTEMPTS,
        }]
    );
    assert!(matches!(cm.read(device, 0x0003), Err(CmError::NotConnected(_))));
}

#[test]
fn test_full_bonding_table_reported() {
    let config = CmConfig {
        max_bonded_devices: 1,
        ..CmConfig::default()
    };
    let mut cm = manager_with(config);
    let app = Recorder::new();
    cm.register_app(app.handler());
    bonded(&mut cm, 0x40, peer(1));
    let second = connect(&mut cm, 0x41, peer(2), Role::Central);
    app.take();

    pair(&mut cm, 0x41, keys());
    assert_eq!(cm.device(second).bond_id, None);
    assert!(app.take().contains(&CmEvent::BondingNotify {
        device: second,
        bond: None,
        status: SM_STATUS_UNSPECIFIED,
    }));
}

#[test]
fn test_device_table_capacity() {
    let mut cm = manager();
    let capacity = cm.config().max_connections;
    let mut ids = Vec::new();
    for n in 0..capacity {
        ids.push(connect(&mut cm, 0x40 + n as u16, peer(n as u8), Role::Central));
    }
    assert!(ids.iter().all(|id| id.index() < capacity));
    take_calls(&mut cm);

    // No slot left: the link is dropped again
    cm.process_event(HalEvent::ConnectionComplete {
        status: OK,
        cid: Cid(0x50),
        peer: peer(0x50),
        role: Role::Peripheral,
        params: params(),
    });
    assert_eq!(take_calls(&mut cm), vec![HalCall::Disconnect(Cid(0x50))]);
    assert_eq!(cm.find_device(&peer(0x50)), None);

    // A freed slot is reused
    disconnect(&mut cm, 0x40);
    let reused = connect(&mut cm, 0x51, peer(0x51), Role::Central);
    assert_eq!(reused, ids[0]);
}

#[test]
#[should_panic(expected = "already owned")]
fn test_duplicate_link_panics() {
    let mut cm = manager();
    connect(&mut cm, 0x40, peer(1), Role::Central);
    connect(&mut cm, 0x40, peer(2), Role::Central);
}

#[test]
fn test_bonded_instance_reserved_across_links() {
    let mut cm = manager();
    let client = cm.register_client(ServiceTemplate::new(BATTERY), |_: &CmEvent| {});
    let discover = |cm: &mut TestManager, device: DeviceId, cid: u16, start: u16| {
        cm.start_discovery(device).unwrap();
        cm.process_event(HalEvent::ServiceDiscovered {
            cid: Cid(cid),
            uuid: BATTERY,
            start_handle: start,
            end_handle: start + 4,
        });
        cm.process_event(HalEvent::ServiceDiscoveryCfm {
            cid: Cid(cid),
            status: OK,
        });
    };

    let (device, bond) = bonded(&mut cm, 0x40, peer(1));
    discover(&mut cm, device, 0x40, 0x0020);
    assert_eq!(cm.client().instance(client, 0).unwrap().bond, Some(bond));
    disconnect(&mut cm, 0x40);

    // Handles are kept for the bonded peer, and the slot is not handed out
    let kept = cm.client().instance(client, 0).unwrap();
    assert_eq!((kept.device, kept.start_handle), (None, 0x0020));
    let stranger = connect(&mut cm, 0x41, peer(2), Role::Central);
    discover(&mut cm, stranger, 0x41, 0x0030);
    assert_eq!(cm.client().instance(client, 0).unwrap().start_handle, 0x0020);

    let device = connect(&mut cm, 0x42, peer(1), Role::Central);
    discover(&mut cm, device, 0x42, 0x0020);
    assert_eq!(cm.client().instance(client, 0).unwrap().device, Some(device));

    // Once the bond is gone the slot is free for anyone
    disconnect(&mut cm, 0x42);
    cm.unbond(bond).unwrap();
    discover(&mut cm, stranger, 0x41, 0x0030);
    let taken = cm.client().instance(client, 0).unwrap();
    assert_eq!((taken.device, taken.start_handle), (Some(stranger), 0x0030));
}

#[test]
fn test_pairing_prompts_reach_only_the_application() {
    let mut cm = manager();
    let (server, app) = (Recorder::new(), Recorder::new());
    cm.register_server(0x0001..=0x0010, server.handler());
    cm.register_app(app.handler());
    let device = connect(&mut cm, 0x40, peer(1), Role::Peripheral);
    server.take();
    app.take();

    cm.process_event(HalEvent::PasskeyInput { cid: Cid(0x40) });
    cm.process_event(HalEvent::PairingAuthRequest {
        cid: Cid(0x40),
        bonding: true,
    });
    assert!(server.take().is_empty());
    assert_eq!(
        app.take(),
        vec![
            CmEvent::PasskeyInput { device },
            CmEvent::PairingAuth {
                device,
                bonding: true
            },
        ]
    );

    cm.passkey_response(device, Some(123456)).unwrap();
    cm.authorization_response(device, true).unwrap();
    assert!(take_calls(&mut cm).ends_with(&[
        HalCall::PasskeyResponse(Cid(0x40), Some(123456)),
        HalCall::AuthorizationResponse(Cid(0x40), true),
    ]));
}

#[test]
fn test_generic_events_fan_out_in_order() {
    let mut cm = manager();
    let order = Rc::new(RefCell::new(Vec::new()));
    let tagged = |tag: &'static str| {
        let order = order.clone();
        move |event: &CmEvent| {
            if matches!(event, CmEvent::Connected { .. }) {
                order.borrow_mut().push(tag);
            }
        }
    };
    cm.register_app(tagged("app"));
    cm.register_client(ServiceTemplate::new(BATTERY), tagged("client"));
    cm.register_server(0x0001..=0x0010, tagged("server"));

    connect(&mut cm, 0x40, peer(1), Role::Central);
    assert_eq!(*order.borrow(), vec!["server", "client", "app"]);
}

#[test]
fn test_link_operations_need_connection() {
    let mut cm = manager();
    let device = connect(&mut cm, 0x40, peer(1), Role::Central);
    cm.read_rssi(device).unwrap();
    cm.request_security(device, SecurityLevel::EncryptionOnly).unwrap();
    cm.process_event(HalEvent::RssiCfm {
        cid: Cid(0x40),
        status: OK,
        rssi: -42,
    });

    cm.disconnect(device).unwrap();
    assert_eq!(cm.device_state(device), DeviceState::Disconnecting);
    assert!(matches!(cm.disconnect(device), Err(CmError::NotConnected(_))));
    assert!(matches!(cm.notify(device, 0x0003, &[1]), Err(CmError::NotConnected(_))));

    // Events for a link that is already gone are dropped
    disconnect(&mut cm, 0x40);
    cm.process_event(HalEvent::ReadCfm {
        cid: Cid(0x40),
        status: Status(0x0001),
        handle: 0x0003,
        value: Vec::new(),
    });
    assert_eq!(cm.device_state(device), DeviceState::Disconnected);
}
