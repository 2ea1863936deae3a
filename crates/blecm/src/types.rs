//! Common types shared by the connection manager components

use std::fmt;

/// Address types
pub const PUBLIC_DEVICE_ADDRESS: u8 = 0x00;
pub const RANDOM_DEVICE_ADDRESS: u8 = 0x01;

/// Bluetooth device address, least significant byte first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BdAddr {
    pub bytes: [u8; 6],
}

impl BdAddr {
    pub fn new(bytes: [u8; 6]) -> Self {
        Self { bytes }
    }

    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        if slice.len() >= 6 {
            let mut bytes = [0u8; 6];
            bytes.copy_from_slice(&slice[0..6]);
            Some(Self { bytes })
        } else {
            None
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Display for BdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.bytes[5],
            self.bytes[4],
            self.bytes[3],
            self.bytes[2],
            self.bytes[1],
            self.bytes[0]
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressType {
    Public,
    Random,
}

impl From<u8> for AddressType {
    fn from(value: u8) -> Self {
        match value {
            RANDOM_DEVICE_ADDRESS => AddressType::Random,
            _ => AddressType::Public,
        }
    }
}

impl From<AddressType> for u8 {
    fn from(value: AddressType) -> Self {
        match value {
            AddressType::Public => PUBLIC_DEVICE_ADDRESS,
            AddressType::Random => RANDOM_DEVICE_ADDRESS,
        }
    }
}

/// A device address together with its type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypedBdAddr {
    pub addr_type: AddressType,
    pub addr: BdAddr,
}

impl TypedBdAddr {
    pub fn public(bytes: [u8; 6]) -> Self {
        Self {
            addr_type: AddressType::Public,
            addr: BdAddr::new(bytes),
        }
    }

    pub fn random(bytes: [u8; 6]) -> Self {
        Self {
            addr_type: AddressType::Random,
            addr: BdAddr::new(bytes),
        }
    }

    /// Random address whose two most significant bits are `01`
    pub fn is_resolvable_private(&self) -> bool {
        self.addr_type == AddressType::Random && (self.addr.bytes[5] & 0xC0) == 0x40
    }

    /// Random address whose two most significant bits are `11`
    pub fn is_random_static(&self) -> bool {
        self.addr_type == AddressType::Random && (self.addr.bytes[5] & 0xC0) == 0xC0
    }
}

impl fmt::Display for TypedBdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.addr_type {
            AddressType::Public => write!(f, "{} (public)", self.addr),
            AddressType::Random => write!(f, "{} (random)", self.addr),
        }
    }
}

/// Link identifier assigned by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cid(pub u16);

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

/// Index into the device table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub(crate) usize);

impl DeviceId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index into the bonding table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BondId(pub(crate) usize);

impl BondId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for BondId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Link-layer role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Central,
    Peripheral,
}

impl Role {
    /// The role taken by the other end of a link
    pub fn opposite(self) -> Self {
        match self {
            Role::Central => Role::Peripheral,
            Role::Peripheral => Role::Central,
        }
    }
}

/// Status code reported by the HAL for an asynchronous procedure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status(pub u16);

impl Status {
    pub const SUCCESS: Status = Status(0x0000);

    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

/// Parameters of an established connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnParams {
    /// Connection interval (1.25 ms units)
    pub interval: u16,
    /// Peripheral latency (connection events)
    pub latency: u16,
    /// Supervision timeout (10 ms units)
    pub supervision_timeout: u16,
}

/// Requested connection parameters, used when connecting and when updating
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectParams {
    pub interval_min: u16,
    pub interval_max: u16,
    pub latency: u16,
    pub supervision_timeout: u16,
}

impl Default for ConnectParams {
    fn default() -> Self {
        Self {
            interval_min: 0x0018, // 30 ms
            interval_max: 0x0028, // 50 ms
            latency: 0,
            supervision_timeout: 0x0190, // 4 s
        }
    }
}

/// Security level of a link or of a stored key
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum SecurityLevel {
    /// No security (no encryption, no authentication)
    #[default]
    None,
    /// Encryption only (no authentication)
    EncryptionOnly,
    /// Encryption with authentication (MITM protection)
    EncryptionWithAuthentication,
    /// Secure Connections (highest level)
    SecureConnections,
}

impl SecurityLevel {
    pub fn to_u8(self) -> u8 {
        match self {
            SecurityLevel::None => 0,
            SecurityLevel::EncryptionOnly => 1,
            SecurityLevel::EncryptionWithAuthentication => 2,
            SecurityLevel::SecureConnections => 3,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(SecurityLevel::None),
            1 => Some(SecurityLevel::EncryptionOnly),
            2 => Some(SecurityLevel::EncryptionWithAuthentication),
            3 => Some(SecurityLevel::SecureConnections),
            _ => None,
        }
    }
}

impl fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecurityLevel::None => write!(f, "None"),
            SecurityLevel::EncryptionOnly => write!(f, "Encryption Only"),
            SecurityLevel::EncryptionWithAuthentication => {
                write!(f, "Encryption with Authentication")
            }
            SecurityLevel::SecureConnections => write!(f, "Secure Connections"),
        }
    }
}
