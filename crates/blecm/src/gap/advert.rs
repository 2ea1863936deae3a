//! Advertising payload encoding and advertising report parsing

use crate::gap::constants::*;
use crate::gap::types::{AdFlags, AdvertContent, AdvertisingReport, ScanReport};
use crate::uuid::Uuid;
use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use log::{trace, warn};

/// Advertising data and scan response data for one advert
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdvertPayloads {
    pub adv_data: Vec<u8>,
    pub scan_rsp: Vec<u8>,
}

/// One PDU payload being filled with AD structures
struct PayloadBuilder {
    data: Vec<u8>,
    enabled: bool,
}

impl PayloadBuilder {
    fn new(enabled: bool) -> Self {
        Self {
            data: Vec::with_capacity(MAX_ADVERT_LEN),
            enabled,
        }
    }

    /// Octets left for the value of one more AD structure
    fn available(&self) -> usize {
        if !self.enabled {
            return 0;
        }
        (MAX_ADVERT_LEN - self.data.len()).saturating_sub(AD_HEADER_LEN)
    }

    fn push(&mut self, ad_type: u8, value: &[u8]) -> bool {
        if !self.enabled || value.len() > self.available() {
            return false;
        }
        self.data.push((value.len() + 1) as u8);
        self.data.push(ad_type);
        self.data.extend_from_slice(value);
        true
    }
}

/// Longest prefix of `name` that fits in `max` octets without splitting a
/// character
fn truncate_name(name: &str, max: usize) -> Option<&str> {
    let mut end = max.min(name.len());
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    (end > 0).then(|| &name[..end])
}

fn encode_uuids(uuids: &[Uuid]) -> Vec<u8> {
    let mut encoded = Vec::new();
    for uuid in uuids {
        match uuid {
            Uuid::Uuid16(value) => {
                // Writing to a Vec cannot fail
                let _ = encoded.write_u16::<LittleEndian>(*value);
            }
            Uuid::Uuid128(_) => encoded.extend(uuid.to_le_bytes()),
        }
    }
    encoded
}

/// Place a service UUID list: complete in the advert, else complete in the
/// scan response, else as many as fit in the advert marked incomplete
fn push_uuid_list(
    adv: &mut PayloadBuilder,
    rsp: &mut PayloadBuilder,
    uuids: &[Uuid],
    complete: u8,
    partial: u8,
) {
    if uuids.is_empty() {
        return;
    }
    let encoded = encode_uuids(uuids);
    if adv.push(complete, &encoded) || rsp.push(complete, &encoded) {
        return;
    }

    let width = uuids[0].encoded_len();
    let fit = adv.available() / width;
    if fit == 0 || !adv.push(partial, &encoded[..fit * width]) {
        warn!("No room for {} service UUID(s)", uuids.len());
    }
}

/// Build advert and scan response payloads, each within the 31 octet
/// budget. Non-connectable adverts carry no scan response.
///
/// The device name goes in last through a fallback chain: complete name in
/// the advert, complete name in the scan response, shortened name in the
/// advert, shortened name in the scan response.
pub fn build_payloads(content: &AdvertContent, connectable: bool) -> AdvertPayloads {
    let mut adv = PayloadBuilder::new(true);
    let mut rsp = PayloadBuilder::new(connectable);

    let flags = if connectable {
        AdFlags::LE_GENERAL_DISCOVERABLE | AdFlags::BR_EDR_NOT_SUPPORTED
    } else {
        AdFlags::BR_EDR_NOT_SUPPORTED
    };
    adv.push(ADV_TYPE_FLAGS, &[flags.bits()]);

    let (short, long): (Vec<Uuid>, Vec<Uuid>) = content
        .service_uuids
        .iter()
        .copied()
        .partition(|uuid| uuid.is_16bit());
    push_uuid_list(
        &mut adv,
        &mut rsp,
        &short,
        ADV_TYPE_16BIT_SERVICE_UUID_COMPLETE,
        ADV_TYPE_16BIT_SERVICE_UUID_PARTIAL,
    );
    push_uuid_list(
        &mut adv,
        &mut rsp,
        &long,
        ADV_TYPE_128BIT_SERVICE_UUID_COMPLETE,
        ADV_TYPE_128BIT_SERVICE_UUID_PARTIAL,
    );

    let mut place = |ad_type: u8, value: &[u8]| {
        if !adv.push(ad_type, value) && !rsp.push(ad_type, value) {
            warn!("AD type 0x{:02X} ({} octets) does not fit", ad_type, value.len());
        }
    };
    if let Some(appearance) = content.appearance {
        let mut value = [0u8; 2];
        LittleEndian::write_u16(&mut value, appearance);
        place(ADV_TYPE_APPEARANCE, &value);
    }
    if let Some(tx_power) = content.tx_power {
        place(ADV_TYPE_TX_POWER_LEVEL, &[tx_power as u8]);
    }
    if let Some(manufacturer) = &content.manufacturer_data {
        place(ADV_TYPE_MANUFACTURER_SPECIFIC, manufacturer);
    }

    if let Some(name) = content.device_name.as_deref().filter(|name| !name.is_empty()) {
        let placed = adv.push(ADV_TYPE_COMPLETE_LOCAL_NAME, name.as_bytes())
            || rsp.push(ADV_TYPE_COMPLETE_LOCAL_NAME, name.as_bytes())
            || truncate_name(name, adv.available())
                .map_or(false, |short| adv.push(ADV_TYPE_SHORT_LOCAL_NAME, short.as_bytes()))
            || truncate_name(name, rsp.available())
                .map_or(false, |short| rsp.push(ADV_TYPE_SHORT_LOCAL_NAME, short.as_bytes()));
        if !placed {
            warn!("No room for device name");
        }
    }

    trace!(
        "Advert payload {} / scan response {}",
        hex::encode(&adv.data),
        hex::encode(&rsp.data)
    );
    AdvertPayloads {
        adv_data: adv.data,
        scan_rsp: rsp.data,
    }
}

/// Split advertisement data into (type, value) pairs.
///
/// Parsing stops at the first zero-length or truncated structure.
pub fn parse_advertising_data(data: &[u8]) -> Vec<(u8, &[u8])> {
    let mut result = Vec::new();
    let mut i = 0;

    while i < data.len() {
        let length = data[i] as usize;
        if length == 0 || i + length >= data.len() {
            break;
        }

        result.push((data[i + 1], &data[i + 2..i + 1 + length]));
        i += 1 + length;
    }

    result
}

/// Whether an advertisement lists `uuid` among its services. Values are
/// compared exactly as they appear on air.
pub fn advertises_service(data: &[u8], uuid: &Uuid) -> bool {
    let width = uuid.encoded_len();
    parse_advertising_data(data)
        .into_iter()
        .filter(|(ad_type, _)| match width {
            2 => matches!(
                *ad_type,
                ADV_TYPE_16BIT_SERVICE_UUID_PARTIAL | ADV_TYPE_16BIT_SERVICE_UUID_COMPLETE
            ),
            _ => matches!(
                *ad_type,
                ADV_TYPE_128BIT_SERVICE_UUID_PARTIAL | ADV_TYPE_128BIT_SERVICE_UUID_COMPLETE
            ),
        })
        .any(|(_, value)| value.chunks_exact(width).any(|on_air| uuid.matches_le(on_air)))
}

/// Decode the fields of an advertising report
pub fn parse_report(report: &AdvertisingReport) -> ScanReport {
    let mut parsed = ScanReport::raw(report);
    let mut short_name = None;

    for (ad_type, value) in parse_advertising_data(&report.data) {
        match ad_type {
            ADV_TYPE_FLAGS if !value.is_empty() => {
                parsed.flags = Some(AdFlags::from_bits_truncate(value[0]));
            }
            ADV_TYPE_16BIT_SERVICE_UUID_PARTIAL | ADV_TYPE_16BIT_SERVICE_UUID_COMPLETE => {
                parsed.service_uuids.extend(
                    value
                        .chunks_exact(2)
                        .map(|chunk| Uuid::from_u16(LittleEndian::read_u16(chunk))),
                );
            }
            ADV_TYPE_128BIT_SERVICE_UUID_PARTIAL | ADV_TYPE_128BIT_SERVICE_UUID_COMPLETE => {
                parsed
                    .service_uuids
                    .extend(value.chunks_exact(16).filter_map(Uuid::from_le_bytes));
            }
            ADV_TYPE_COMPLETE_LOCAL_NAME => {
                parsed.name = Some(String::from_utf8_lossy(value).into_owned());
            }
            ADV_TYPE_SHORT_LOCAL_NAME => {
                short_name = Some(String::from_utf8_lossy(value).into_owned());
            }
            ADV_TYPE_TX_POWER_LEVEL if !value.is_empty() => {
                parsed.tx_power = Some(value[0] as i8);
            }
            ADV_TYPE_APPEARANCE if value.len() >= 2 => {
                parsed.appearance = Some(LittleEndian::read_u16(value));
            }
            ADV_TYPE_MANUFACTURER_SPECIFIC => {
                parsed.manufacturer_data = Some(value.to_vec());
            }
            _ => {}
        }
    }

    if parsed.name.is_none() {
        parsed.name = short_name;
    }
    parsed
}
