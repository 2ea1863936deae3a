//! Unit tests for advertising payloads and the GAP role controllers

use super::*;
use crate::config::CmConfig;
use crate::error::CmError;
use crate::event::CmEvent;
use crate::hal::constants::{HCI_STATUS_ADVERTISING_TIMEOUT, HCI_STATUS_CONNECTION_TIMEOUT};
use crate::hal::{HalCall, HalEvent, TimerId};
use crate::test_util::*;
use crate::types::{Cid, Role, TypedBdAddr};
use crate::uuid::Uuid;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

const THERMOMETER: &str = "Thermometer";

fn content(uuids: usize, manufacturer: usize) -> AdvertContent {
    AdvertContent {
        service_uuids: (0..uuids as u16).map(|n| Uuid::from_u16(0x1800 + n)).collect(),
        manufacturer_data: (manufacturer > 0).then(|| vec![0x5A; manufacturer]),
        device_name: Some(THERMOMETER.to_string()),
        ..AdvertContent::default()
    }
}

fn field(data: &[u8], ad_type: u8) -> Option<&[u8]> {
    parse_advertising_data(data)
        .into_iter()
        .find(|(t, _)| *t == ad_type)
        .map(|(_, value)| value)
}

/// Every octet of a payload belongs to a well-formed AD structure
fn assert_well_formed(data: &[u8]) {
    assert!(data.len() <= MAX_ADVERT_LEN, "payload of {} octets", data.len());
    let used: usize = parse_advertising_data(data)
        .iter()
        .map(|(_, value)| value.len() + AD_HEADER_LEN)
        .sum();
    assert_eq!(used, data.len());
}

#[test]
fn test_name_in_advert_when_it_fits() {
    let payloads = build_payloads(&content(2, 0), true);
    assert_eq!(
        field(&payloads.adv_data, ADV_TYPE_COMPLETE_LOCAL_NAME),
        Some(THERMOMETER.as_bytes())
    );
    assert_eq!(
        field(&payloads.adv_data, ADV_TYPE_FLAGS),
        Some(&[(AdFlags::LE_GENERAL_DISCOVERABLE | AdFlags::BR_EDR_NOT_SUPPORTED).bits()][..])
    );
    assert!(payloads.scan_rsp.is_empty());
}

#[test]
fn test_name_fallback_chain() {
    // Flags and ten UUIDs leave four octets in the advert
    let payloads = build_payloads(&content(10, 0), true);
    assert_eq!(field(&payloads.adv_data, ADV_TYPE_COMPLETE_LOCAL_NAME), None);
    assert_eq!(
        field(&payloads.scan_rsp, ADV_TYPE_COMPLETE_LOCAL_NAME),
        Some(THERMOMETER.as_bytes())
    );

    // Manufacturer data fills the scan response, the name is shortened
    // into the advert
    let payloads = build_payloads(&content(10, 27), true);
    assert_eq!(
        field(&payloads.scan_rsp, ADV_TYPE_MANUFACTURER_SPECIFIC).map(<[u8]>::len),
        Some(27)
    );
    assert_eq!(field(&payloads.adv_data, ADV_TYPE_SHORT_LOCAL_NAME), Some(&b"Ther"[..]));

    // Thirteen UUIDs fill the advert, the shortened name goes last into
    // the scan response
    let payloads = build_payloads(&content(13, 20), true);
    assert_eq!(payloads.adv_data.len(), MAX_ADVERT_LEN);
    assert_eq!(field(&payloads.scan_rsp, ADV_TYPE_SHORT_LOCAL_NAME), Some(&b"Thermom"[..]));
    assert_well_formed(&payloads.scan_rsp);
}

#[test]
fn test_uuid_list_spills_into_scan_response() {
    // 14 UUIDs are one too many for the advert but fit the scan response
    let payloads = build_payloads(&content(14, 0), true);
    assert_eq!(field(&payloads.adv_data, ADV_TYPE_16BIT_SERVICE_UUID_COMPLETE), None);
    assert_eq!(
        field(&payloads.scan_rsp, ADV_TYPE_16BIT_SERVICE_UUID_COMPLETE).map(<[u8]>::len),
        Some(28)
    );
}

#[test]
fn test_non_connectable_has_no_scan_response() {
    let payloads = build_payloads(&content(14, 0), false);
    assert!(payloads.scan_rsp.is_empty());
    assert_eq!(
        field(&payloads.adv_data, ADV_TYPE_FLAGS),
        Some(&[AdFlags::BR_EDR_NOT_SUPPORTED.bits()][..])
    );
    // Only part of the list fits, marked incomplete
    assert_eq!(
        field(&payloads.adv_data, ADV_TYPE_16BIT_SERVICE_UUID_PARTIAL).map(<[u8]>::len),
        Some(26)
    );
}

#[test]
fn test_random_payloads_stay_within_budget() {
    let mut rng = StdRng::seed_from_u64(0x0B1E);
    for _ in 0..500 {
        let name_len = rng.gen_range(0..40);
        let content = AdvertContent {
            service_uuids: (0..rng.gen_range(0..6))
                .map(|_| {
                    if rng.gen_bool(0.3) {
                        Uuid::from_u128(rng.gen())
                    } else {
                        Uuid::from_u16(rng.gen())
                    }
                })
                .collect(),
            appearance: rng.gen_bool(0.5).then(|| rng.gen()),
            tx_power: rng.gen_bool(0.5).then(|| rng.gen()),
            manufacturer_data: rng
                .gen_bool(0.5)
                .then(|| (0..rng.gen_range(2..30)).map(|_| rng.gen()).collect()),
            device_name: Some((0..name_len).map(|_| rng.gen_range('a'..='z')).collect()),
        };
        let connectable = rng.gen_bool(0.7);
        let payloads = build_payloads(&content, connectable);

        assert_well_formed(&payloads.adv_data);
        assert_well_formed(&payloads.scan_rsp);
        if !connectable {
            assert!(payloads.scan_rsp.is_empty());
        }

        let name = content.device_name.as_deref().unwrap_or_default();
        for data in [&payloads.adv_data, &payloads.scan_rsp] {
            if let Some(complete) = field(data, ADV_TYPE_COMPLETE_LOCAL_NAME) {
                assert_eq!(complete, name.as_bytes());
            }
            if let Some(short) = field(data, ADV_TYPE_SHORT_LOCAL_NAME) {
                assert!(name.as_bytes().starts_with(short));
            }
        }
    }
}

#[test]
fn test_parse_stops_at_malformed_structure() {
    let data = [0x02, 0x01, 0x06, 0x03, 0x03, 0x0D, 0x18, 0x00, 0x05, 0x09];
    let parsed = parse_advertising_data(&data);
    assert_eq!(parsed, vec![(0x01, &[0x06][..]), (0x03, &[0x0D, 0x18][..])]);

    // Length runs past the end
    let parsed = parse_advertising_data(&[0x02, 0x01, 0x06, 0x09, 0x09, b'a']);
    assert_eq!(parsed.len(), 1);
}

#[test]
fn test_report_parsing_prefers_complete_name() {
    let mut data = vec![0x04, ADV_TYPE_SHORT_LOCAL_NAME, b'T', b'h', b'e'];
    data.extend([0x03, ADV_TYPE_COMPLETE_LOCAL_NAME, b'T', b'h']);
    data.extend([0x02, ADV_TYPE_TX_POWER_LEVEL, 0xF8]);
    let report = AdvertisingReport {
        event_type: 0,
        address: peer(1),
        rssi: -60,
        data,
    };

    let parsed = advert::parse_report(&report);
    assert_eq!(parsed.name.as_deref(), Some("Th"));
    assert_eq!(parsed.tx_power, Some(-8));
}

fn report(data: Vec<u8>) -> HalEvent {
    HalEvent::AdvertisingReport(AdvertisingReport {
        event_type: 0,
        address: peer(9),
        rssi: -70,
        data,
    })
}

fn reports(events: Vec<CmEvent>) -> Vec<ScanReport> {
    events
        .into_iter()
        .filter_map(|event| match event {
            CmEvent::AdvertReport(report) => Some(report),
            _ => None,
        })
        .collect()
}

#[test]
fn test_scan_filter_by_service() {
    let mut cm = manager();
    let app = Recorder::new();
    cm.register_app(app.handler());

    let wanted = Uuid::from_u128(0x6E400001_B5A3_F393_E0A9_E50E24DCCA9E);
    cm.start_scan(ScanFilter::Service(wanted)).unwrap();
    assert!(matches!(cm.start_scan(ScanFilter::All), Err(CmError::Busy)));

    // On air the 128-bit UUID is little-endian
    let mut matching = vec![0x11, ADV_TYPE_128BIT_SERVICE_UUID_COMPLETE];
    matching.extend(wanted.to_le_bytes());
    let mut reversed = vec![0x11, ADV_TYPE_128BIT_SERVICE_UUID_COMPLETE];
    reversed.extend(wanted.to_le_bytes().into_iter().rev());

    cm.process_event(report(reversed));
    cm.process_event(report(vec![0x03, ADV_TYPE_16BIT_SERVICE_UUID_COMPLETE, 0x0D, 0x18]));
    cm.process_event(report(matching));

    let forwarded = reports(app.take());
    assert_eq!(forwarded.len(), 1);
    assert_eq!(forwarded[0].service_uuids, vec![wanted]);
}

#[test]
fn test_raw_scan_skips_parsing() {
    let mut cm = manager();
    let app = Recorder::new();
    cm.register_app(app.handler());
    cm.start_scan(ScanFilter::Raw).unwrap();

    let data = vec![0x03, ADV_TYPE_COMPLETE_LOCAL_NAME, b'h', b'i'];
    cm.process_event(report(data.clone()));

    let forwarded = reports(app.take());
    assert_eq!(forwarded.len(), 1);
    assert_eq!(forwarded[0].name, None);
    assert_eq!(forwarded[0].data, data);
}

fn active_timer(cm: &TestManager) -> TimerId {
    *cm.hal().active_timers().last().unwrap()
}

fn fire(cm: &mut TestManager, timer: TimerId) {
    assert!(cm.hal_mut().expire_timer(timer));
    cm.process_event(HalEvent::TimerExpired(timer));
}

#[test]
fn test_connect_timeout_cancels_attempt() {
    let mut cm = manager();
    let app = Recorder::new();
    cm.register_app(app.handler());
    cm.start_scan(ScanFilter::All).unwrap();
    take_calls(&mut cm);

    let target = peer(7);
    cm.connect(target).unwrap();
    assert_eq!(cm.central().connect_state(), ConnectState::Connecting);
    // Connecting stops the scan first
    assert_eq!(cm.central().scan_state(), ScanState::Idle);
    let timer = active_timer(&cm);
    assert_eq!(
        take_calls(&mut cm),
        vec![
            HalCall::StopScan,
            HalCall::Connect(target, cm.config().central.connection),
            HalCall::StartTimer(timer, Duration::from_secs(5)),
        ]
    );
    assert!(matches!(cm.connect(peer(8)), Err(CmError::Busy)));

    fire(&mut cm, timer);
    assert_eq!(cm.central().connect_state(), ConnectState::CancelConnecting);
    assert_eq!(take_calls(&mut cm), vec![HalCall::CancelConnect]);

    cm.process_event(HalEvent::CancelConnectCfm { status: OK });
    assert_eq!(cm.central().connect_state(), ConnectState::Idle);
    assert!(app.take().contains(&CmEvent::ConnectFailed {
        peer: Some(target),
        status: OK,
    }));
    assert!(cm.hal().active_timers().is_empty());
}

#[test]
fn test_connect_confirmation_clears_timer() {
    let mut cm = manager();
    cm.connect(peer(7)).unwrap();
    let timer = active_timer(&cm);

    let device = connect(&mut cm, 0x40, peer(7), Role::Central);
    assert_eq!(cm.central().connect_state(), ConnectState::Idle);
    assert!(cm.hal().active_timers().is_empty());
    assert!(take_calls(&mut cm).contains(&HalCall::CancelTimer(timer)));
    assert_eq!(cm.device(device).peer_role, Role::Peripheral);

    // A later expiry of the cancelled timer is ignored
    cm.process_event(HalEvent::TimerExpired(timer));
    assert_eq!(cm.central().connect_state(), ConnectState::Idle);
}

#[test]
fn test_failed_cancel_still_reports_failure() {
    let mut cm = manager();
    let app = Recorder::new();
    cm.register_app(app.handler());
    cm.connect(peer(7)).unwrap();
    let timer = active_timer(&cm);

    cm.hal_mut().fail_next(crate::hal::HalError::Busy);
    fire(&mut cm, timer);
    assert_eq!(cm.central().connect_state(), ConnectState::Idle);
    assert!(app.take().contains(&CmEvent::ConnectFailed {
        peer: Some(peer(7)),
        status: HCI_STATUS_CONNECTION_TIMEOUT,
    }));
}

fn two_type_config(directed: TypedBdAddr) -> CmConfig {
    let mut config = CmConfig::default();
    config.peripheral.adverts = vec![
        AdvertType::undirected(Some(Duration::from_secs(30))),
        AdvertType::directed(directed, Some(Duration::from_secs(2))).with_whitelist(),
    ];
    config.peripheral.content.device_name = Some("blecm".into());
    config
}

fn advertising_states(events: Vec<CmEvent>) -> Vec<AdvertisingState> {
    events
        .into_iter()
        .filter_map(|event| match event {
            CmEvent::AdvertisingState(state) => Some(state),
            _ => None,
        })
        .collect()
}

#[test]
fn test_advert_types_cycle_on_timeout() {
    let directed = peer(3);
    let mut cm = manager_with(two_type_config(directed));
    let app = Recorder::new();
    cm.register_app(app.handler());

    cm.start_advertising().unwrap();
    assert!(matches!(cm.start_advertising(), Err(CmError::Busy)));
    let calls = take_calls(&mut cm);
    assert!(calls.contains(&HalCall::StartAdvertising(AdvertKind::Undirected)));
    assert!(calls.contains(&HalCall::SetAdvertisingParams(AdvertisingParams {
        interval_min: LE_ADV_INTERVAL_MIN,
        interval_max: LE_ADV_INTERVAL_MAX,
        use_whitelist: false,
    })));

    let timer = active_timer(&cm);
    fire(&mut cm, timer);
    assert_eq!(take_calls(&mut cm), vec![HalCall::StopAdvertising]);
    cm.process_event(HalEvent::AdvertisingCancelCfm { status: OK });

    assert_eq!(cm.peripheral().state(), AdvertisingState::DirectedAdvertising);
    assert_eq!(cm.peripheral().current_advert(), 1);
    let calls = take_calls(&mut cm);
    assert!(calls.contains(&HalCall::StartAdvertising(AdvertKind::Directed(directed))));
    assert!(calls.contains(&HalCall::StartTimer(active_timer(&cm), Duration::from_secs(2))));

    let timer = active_timer(&cm);
    fire(&mut cm, timer);
    cm.process_event(HalEvent::AdvertisingCancelCfm { status: OK });
    assert_eq!(cm.peripheral().state(), AdvertisingState::Idle);

    assert_eq!(
        advertising_states(app.take()),
        vec![
            AdvertisingState::Advertising,
            AdvertisingState::Stopping,
            AdvertisingState::DirectedAdvertising,
            AdvertisingState::Stopping,
            AdvertisingState::Idle,
        ]
    );
}

#[test]
fn test_stop_is_honoured_at_cancel_confirmation() {
    let mut cm = manager_with(two_type_config(peer(3)));
    assert!(matches!(cm.stop_advertising(), Err(CmError::InvalidState(_))));

    cm.start_advertising().unwrap();
    cm.stop_advertising().unwrap();
    assert_eq!(cm.peripheral().state(), AdvertisingState::Stopping);
    assert!(cm.hal().active_timers().is_empty());
    // A second request while stopping is absorbed
    cm.stop_advertising().unwrap();

    cm.process_event(HalEvent::AdvertisingCancelCfm { status: OK });
    assert_eq!(cm.peripheral().state(), AdvertisingState::Idle);
    assert!(!take_calls(&mut cm)
        .iter()
        .any(|call| matches!(call, HalCall::StartAdvertising(AdvertKind::Directed(_)))));
}

#[test]
fn test_broadcast_starts_without_timer_and_stops_at_once() {
    let mut config = CmConfig::default();
    config.peripheral.adverts = vec![AdvertType::non_connectable()];
    let mut cm = manager_with(config);

    cm.start_advertising().unwrap();
    assert_eq!(cm.peripheral().state(), AdvertisingState::Broadcasting);
    assert!(!cm.peripheral().is_advertising());
    assert!(cm.hal().active_timers().is_empty());
    let calls = take_calls(&mut cm);
    assert!(calls.contains(&HalCall::StartAdvertising(AdvertKind::NonConnectable)));
    assert!(calls.iter().any(|call| matches!(
        call,
        HalCall::SetAdvertisingData { scan_rsp, .. } if scan_rsp.is_empty()
    )));

    cm.stop_advertising().unwrap();
    assert_eq!(cm.peripheral().state(), AdvertisingState::Idle);
    assert_eq!(take_calls(&mut cm), vec![HalCall::StopAdvertising]);
}

#[test]
fn test_connection_ends_advertising() {
    let mut cm = manager_with(two_type_config(peer(3)));
    cm.start_advertising().unwrap();
    let timer = active_timer(&cm);

    let device = connect(&mut cm, 0x40, peer(4), Role::Peripheral);
    assert_eq!(cm.peripheral().state(), AdvertisingState::Idle);
    assert!(take_calls(&mut cm).contains(&HalCall::CancelTimer(timer)));
    assert_eq!(cm.device(device).peer_role, Role::Central);
}

fn failed_link(peer: TypedBdAddr, role: Role) -> HalEvent {
    HalEvent::ConnectionComplete {
        status: HCI_STATUS_ADVERTISING_TIMEOUT,
        cid: Cid(0),
        peer,
        role,
        params: params(),
    }
}

#[test]
fn test_directed_advert_ended_by_failed_link() {
    let directed = peer(3);
    let mut config = CmConfig::default();
    config.peripheral.adverts = vec![
        AdvertType::directed(directed, None),
        AdvertType::undirected(None),
    ];
    let mut cm = manager_with(config);
    let app = Recorder::new();
    cm.register_app(app.handler());
    cm.start_advertising().unwrap();
    assert_eq!(cm.peripheral().state(), AdvertisingState::DirectedAdvertising);
    assert!(cm.hal().active_timers().is_empty());
    take_calls(&mut cm);

    cm.process_event(failed_link(directed, Role::Peripheral));
    assert_eq!(cm.peripheral().state(), AdvertisingState::Advertising);
    assert_eq!(cm.peripheral().current_advert(), 1);
    assert!(take_calls(&mut cm).contains(&HalCall::StartAdvertising(AdvertKind::Undirected)));

    cm.process_event(failed_link(directed, Role::Peripheral));
    assert_eq!(cm.peripheral().state(), AdvertisingState::Idle);

    // The central role is not involved
    assert_eq!(cm.central().connect_state(), ConnectState::Idle);
    assert!(!app
        .take()
        .iter()
        .any(|event| matches!(event, CmEvent::ConnectFailed { .. })));
}

#[test]
fn test_observer_and_central_scan_exclusive() {
    let mut cm = manager();
    let app = Recorder::new();
    cm.register_app(app.handler());

    cm.start_observing().unwrap();
    assert_eq!(cm.observer().state(), ObserveState::Observing);
    assert!(take_calls(&mut cm).iter().any(|call| matches!(
        call,
        HalCall::SetScanParams(ScanParams { active: false, .. })
    )));
    assert!(matches!(cm.start_scan(ScanFilter::All), Err(CmError::Busy)));
    assert!(matches!(cm.start_observing(), Err(CmError::Busy)));

    // Observed reports are never parsed
    cm.process_event(report(vec![0x03, ADV_TYPE_COMPLETE_LOCAL_NAME, b'h', b'i']));
    let observed = reports(app.take());
    assert_eq!(observed.len(), 1);
    assert_eq!(observed[0].name, None);

    cm.stop_observing().unwrap();
    cm.start_scan(ScanFilter::All).unwrap();
    assert!(matches!(cm.start_observing(), Err(CmError::Busy)));

    cm.process_event(report(vec![0x03, ADV_TYPE_COMPLETE_LOCAL_NAME, b'h', b'i']));
    assert_eq!(reports(app.take())[0].name.as_deref(), Some("hi"));
}

#[test]
fn test_reports_dropped_when_idle() {
    let mut cm = manager();
    let app = Recorder::new();
    cm.register_app(app.handler());
    cm.process_event(report(vec![0x02, ADV_TYPE_FLAGS, 0x06]));
    assert!(app.take().is_empty());
}
