use blecm::config::PeripheralConfig;
use blecm::hal::AccessFlags;
use blecm::security::BondStore;
use blecm::types::ConnParams;
use blecm::{
    AdvertContent, AdvertType, Cid, CmConfig, CmEvent, ConnectionManager, HalEvent, MemoryNvm,
    RecordingHal, Role, Status, TypedBdAddr, Uuid,
};
use std::time::Duration;

const BATTERY_SERVICE: Uuid = Uuid::from_u16(0x180F);
const BATTERY_LEVEL_HANDLE: u16 = 0x0012;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = CmConfig {
        peripheral: PeripheralConfig {
            adverts: vec![
                AdvertType::undirected(Some(Duration::from_secs(30))),
                AdvertType::undirected(None).with_whitelist(),
            ],
            content: AdvertContent {
                service_uuids: vec![BATTERY_SERVICE],
                device_name: Some("Battery Sensor".to_string()),
                ..AdvertContent::default()
            },
        },
        ..CmConfig::default()
    };
    let nvm = MemoryNvm::new(BondStore::new(config.max_bonded_devices, 0).nvm_words());
    let mut cm = ConnectionManager::new(config, RecordingHal::new(), nvm)?;

    cm.register_server(0x0010..=0x0014, |event: &CmEvent| {
        if let CmEvent::ServerRead { device, handle, .. } = event {
            println!("Battery level read by device {} (handle 0x{:04X})", device, handle);
        }
    });
    cm.register_app(|event: &CmEvent| println!("Event: {:?}", event));

    cm.start_advertising()?;
    println!("Started advertising");

    // A central connects while the first advert type is on air
    let peer = TypedBdAddr::public([0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
    cm.process_event(HalEvent::ConnectionComplete {
        status: Status::SUCCESS,
        cid: Cid(0x0040),
        peer,
        role: Role::Peripheral,
        params: ConnParams {
            interval: 0x0018,
            latency: 0,
            supervision_timeout: 0x0190,
        },
    });
    let device = cm.find_device(&peer).ok_or("peer did not connect")?;

    cm.process_event(HalEvent::AccessInd {
        cid: Cid(0x0040),
        handle: BATTERY_LEVEL_HANDLE,
        flags: AccessFlags::READ,
        offset: 0,
        value: Vec::new(),
    });
    cm.access_response(device, BATTERY_LEVEL_HANDLE, Status::SUCCESS, &[87])?;
    cm.notify(device, BATTERY_LEVEL_HANDLE, &[86])?;

    cm.process_event(HalEvent::DisconnectComplete {
        cid: Cid(0x0040),
        reason: 0x13,
    });

    println!("Controller calls:");
    for call in cm.hal().calls() {
        println!("  {:?}", call);
    }
    Ok(())
}
