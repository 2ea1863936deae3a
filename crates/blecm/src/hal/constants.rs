//! Status and reason codes exchanged across the HAL boundary

use crate::types::Status;

// HCI disconnect reason codes
pub const HCI_ERROR_CONNECTION_TIMEOUT: u8 = 0x08;
pub const HCI_ERROR_REMOTE_USER_TERMINATED: u8 = 0x13;
/// Directed advertising ended without a connection
pub const HCI_ERROR_ADVERTISING_TIMEOUT: u8 = 0x3C;

pub const HCI_STATUS_CONNECTION_TIMEOUT: Status = Status(HCI_ERROR_CONNECTION_TIMEOUT as u16);
pub const HCI_STATUS_ADVERTISING_TIMEOUT: Status = Status(HCI_ERROR_ADVERTISING_TIMEOUT as u16);

// Pairing Failed reason codes, reported as the pairing-complete status
pub const SMP_REASON_UNSPECIFIED_REASON: u8 = 0x08;
pub const SMP_REASON_REPEATED_ATTEMPTS: u8 = 0x09;

pub const SM_STATUS_REPEATED_ATTEMPTS: Status = Status(SMP_REASON_REPEATED_ATTEMPTS as u16);
pub const SM_STATUS_UNSPECIFIED: Status = Status(SMP_REASON_UNSPECIFIED_REASON as u16);

// ATT error codes used in server access responses and client confirmations
pub const ATT_ERROR_INVALID_HANDLE: u8 = 0x01;

pub const ATT_STATUS_INVALID_HANDLE: Status = Status(ATT_ERROR_INVALID_HANDLE as u16);
