//! Bonding store and security manager event handling
//!
//! Pairing cryptography runs below the HAL boundary. This module keeps the
//! keys it produces, persists them, and answers the key, LTK and
//! diversifier requests that come back when a bonded peer reconnects.

mod keys;
pub(crate) mod manager;
mod store;


pub use self::keys::{BondKeys, IdentityResolvingKey, LongTermKey};
pub use self::manager::UnbondOutcome;
pub use self::store::{BondRecord, BondStore, BOND_RECORD_WORDS, NVM_SANITY};
