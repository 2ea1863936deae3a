//! Error types for the blecm library
//!
//! Recoverable failures are reported through [`CmError`]. Invariant
//! violations caused by a misbehaving collaborator (out-of-range device ids,
//! registrations beyond the configured capacity, events that cannot occur in
//! the current state) are not errors: they panic.

use crate::hal::HalError;
use crate::nvm::NvmError;
use crate::types::{BondId, DeviceId};
use thiserror::Error;

/// Errors returned by connection manager operations
#[derive(Error, Debug)]
pub enum CmError {
    #[error("Procedure already in progress")]
    Busy,

    #[error("Service discovery already in progress")]
    DiscoveryInProgress,

    #[error("Device {0} is not connected")]
    NotConnected(DeviceId),

    #[error("No connected device matches the request")]
    DeviceNotFound,

    #[error("Bond {0} not found")]
    BondNotFound(BondId),

    #[error("Bonding table is full")]
    BondTableFull,

    #[error("Operation not valid in state {0}")]
    InvalidState(&'static str),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("HAL error: {0}")]
    Hal(#[from] HalError),

    #[error("NVM error: {0}")]
    Nvm(#[from] NvmError),
}

/// Result type for connection manager operations
pub type CmResult<T> = Result<T, CmError>;
