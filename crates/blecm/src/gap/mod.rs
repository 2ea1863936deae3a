//! Generic Access Profile: advertising payloads and the central, peripheral
//! and observer role controllers

pub mod advert;
pub mod central;
pub mod constants;
pub mod observer;
pub mod peripheral;
pub mod types;

#[cfg(test)]
mod tests;

pub use advert::{build_payloads, parse_advertising_data, AdvertPayloads};
pub use central::Central;
pub use constants::*;
pub use observer::Observer;
pub use peripheral::Peripheral;
pub use types::*;
