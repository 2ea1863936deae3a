// Advertising Data Types
pub const ADV_TYPE_FLAGS: u8 = 0x01;
pub const ADV_TYPE_16BIT_SERVICE_UUID_PARTIAL: u8 = 0x02;
pub const ADV_TYPE_16BIT_SERVICE_UUID_COMPLETE: u8 = 0x03;
pub const ADV_TYPE_128BIT_SERVICE_UUID_PARTIAL: u8 = 0x06;
pub const ADV_TYPE_128BIT_SERVICE_UUID_COMPLETE: u8 = 0x07;
pub const ADV_TYPE_SHORT_LOCAL_NAME: u8 = 0x08;
pub const ADV_TYPE_COMPLETE_LOCAL_NAME: u8 = 0x09;
pub const ADV_TYPE_TX_POWER_LEVEL: u8 = 0x0A;
pub const ADV_TYPE_APPEARANCE: u8 = 0x19;
pub const ADV_TYPE_MANUFACTURER_SPECIFIC: u8 = 0xFF;

/// Maximum payload of an advertising or scan response PDU
pub const MAX_ADVERT_LEN: usize = 31;

/// Length octet plus AD type octet preceding every AD structure
pub const AD_HEADER_LEN: usize = 2;

// LE Scan parameters
pub const LE_SCAN_INTERVAL: u16 = 0x0012; // 11.25 ms
pub const LE_SCAN_WINDOW: u16 = 0x0012; // 11.25 ms

// LE Advertising intervals (0.625 ms units)
pub const LE_ADV_INTERVAL_MIN: u16 = 0x00A0; // 100 ms
pub const LE_ADV_INTERVAL_MAX: u16 = 0x00F0; // 150 ms

/// Maximum number of entries in the advertisement type list
pub const MAX_ADVERT_TYPES: usize = 4;
