//! Pairing and bonding event handling
//!
//! The security manager owns no state of its own: pending keys live on the
//! connection record and bonds in the [`BondStore`](super::BondStore).

use super::keys::BondKeys;
use crate::device::DeviceState;
use crate::error::{CmError, CmResult};
use crate::event::{CmEvent, Route};
use crate::hal::constants::{SM_STATUS_REPEATED_ATTEMPTS, SM_STATUS_UNSPECIFIED};
use crate::hal::{DivApproval, Hal};
use crate::manager::Context;
use crate::nvm::Nvm;
use crate::types::{BondId, Cid, DeviceId, SecurityLevel, Status};
use log::{debug, info, warn};

/// What an unbond request did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnbondOutcome {
    /// The record was cleared and rewritten in NVM
    Removed,
    /// The peer is connected; the record is cleared on disconnect
    DeferredUntilDisconnect,
    /// Advertising is active; the record is cleared once it has stopped
    DeferredUntilAdvertStopped,
}

/// Associate a new link with the bond of its peer, if any
pub(crate) fn on_connected<H: Hal, N: Nvm>(ctx: &mut Context<H, N>, device: DeviceId) {
    let peer = ctx.devices.get(device).peer;
    let bond = ctx.find_bond(&peer);
    if let Some(bond) = bond {
        debug!("Device {} ({}) is bonded as {}", device, peer, bond);
    }
    ctx.devices.get_mut(device).bond_id = bond;
}

/// Keys distributed during pairing; kept until pairing completes
pub(crate) fn on_keys<H: Hal, N: Nvm>(ctx: &mut Context<H, N>, cid: Cid, keys: BondKeys) {
    let Some(device) = ctx.device_for(cid) else {
        return;
    };
    debug!("Keys received for device {} ({})", device, keys.level);
    ctx.devices.get_mut(device).pending_keys = Some(keys);
}

pub(crate) fn on_pairing_complete<H: Hal, N: Nvm>(
    ctx: &mut Context<H, N>,
    cid: Cid,
    status: Status,
) {
    let Some(device) = ctx.device_for(cid) else {
        return;
    };

    if !status.is_success() {
        warn!("Pairing with device {} failed: {}", device, status);
        ctx.devices.get_mut(device).pending_keys = None;
        if status == SM_STATUS_REPEATED_ATTEMPTS {
            // The slot is released by the resulting disconnect-complete
            info!("Repeated pairing attempts from device {}, disconnecting", device);
            if let Err(e) = ctx.hal.disconnect(cid) {
                warn!("Failed to disconnect device {}: {}", device, e);
            }
            ctx.devices.set_state(device, DeviceState::Disconnecting);
        }
        ctx.events.broadcast(CmEvent::BondingNotify {
            device,
            bond: None,
            status,
        });
        return;
    }

    let (bond, status) = match ctx.devices.get_mut(device).pending_keys.take() {
        Some(keys) => match store_bond(ctx, device, keys) {
            Ok(bond) => (Some(bond), status),
            Err(e) => {
                warn!("Could not store bond for device {}: {}", device, e);
                (None, SM_STATUS_UNSPECIFIED)
            }
        },
        // Pairing without key distribution, or re-encryption of an
        // existing bond
        None => (ctx.devices.get(device).bond_id, status),
    };

    ctx.events.broadcast(CmEvent::BondingNotify {
        device,
        bond,
        status,
    });
}

fn store_bond<H: Hal, N: Nvm>(
    ctx: &mut Context<H, N>,
    device: DeviceId,
    keys: BondKeys,
) -> CmResult<BondId> {
    let record = ctx.devices.get(device);
    let (peer, peer_role) = (record.peer, record.peer_role);
    let level = keys.level;

    let hal = &ctx.hal;
    let bond = ctx.bonds.store(&mut ctx.nvm, peer, peer_role, keys, |addr, irk| {
        hal.resolve_private_address(addr, irk)
    })?;

    let record = ctx.devices.get_mut(device);
    record.bond_id = Some(bond);
    record.pending_unbond = false;
    record.security_level = record.security_level.max(level);

    if !peer.is_resolvable_private() {
        if let Err(e) = ctx.hal.whitelist_add(&peer) {
            warn!("Failed to whitelist {}: {}", peer, e);
        }
    }
    Ok(bond)
}

pub(crate) fn on_div_approve<H: Hal, N: Nvm>(ctx: &mut Context<H, N>, cid: Cid, div: u16) {
    let Some(device) = ctx.device_for(cid) else {
        return;
    };
    let known = ctx
        .devices
        .get(device)
        .bond_id
        .and_then(|bond| ctx.bonds.get(bond))
        .map_or(false, |record| record.keys.div == div);

    let approval = if known {
        DivApproval::Approved
    } else {
        info!("Diversifier 0x{:04X} of device {} revoked", div, device);
        DivApproval::Revoked
    };
    if let Err(e) = ctx.hal.div_approval(cid, approval) {
        warn!("Failed to answer diversifier approval: {}", e);
    }
}

pub(crate) fn on_key_request<H: Hal, N: Nvm>(ctx: &mut Context<H, N>, cid: Cid) {
    let Some(device) = ctx.device_for(cid) else {
        return;
    };
    let keys = ctx
        .devices
        .get(device)
        .bond_id
        .and_then(|bond| ctx.bonds.get(bond))
        .map(|record| &record.keys);
    debug!(
        "Key request from device {}: {}",
        device,
        if keys.is_some() { "bonded" } else { "no keys" }
    );
    if let Err(e) = ctx.hal.key_request_response(cid, keys) {
        warn!("Failed to answer key request: {}", e);
    }
}

pub(crate) fn on_ltk_request<H: Hal, N: Nvm>(
    ctx: &mut Context<H, N>,
    cid: Cid,
    ediv: u16,
    rand: [u8; 8],
) {
    let Some(device) = ctx.device_for(cid) else {
        return;
    };
    let ltk = ctx
        .devices
        .get(device)
        .bond_id
        .and_then(|bond| ctx.bonds.get(bond))
        .map(|record| &record.keys.ltk)
        .filter(|ltk| ltk.matches(ediv, &rand))
        .map(|ltk| &ltk.key);
    if ltk.is_none() {
        info!("No LTK for device {} (EDIV 0x{:04X}), rejecting", device, ediv);
    }
    if let Err(e) = ctx.hal.ltk_response(cid, ltk) {
        warn!("Failed to answer LTK request: {}", e);
    }
}

pub(crate) fn on_encryption_change<H: Hal, N: Nvm>(
    ctx: &mut Context<H, N>,
    cid: Cid,
    status: Status,
    enabled: bool,
) {
    let device = match ctx.devices.find_by_cid(cid) {
        Some(device) if ctx.devices.get(device).is_live() => device,
        _ => panic!("encryption change on link {} without a connected device", cid),
    };

    let bonded_level = ctx
        .devices
        .get(device)
        .bond_id
        .and_then(|bond| ctx.bonds.get(bond))
        .map(|record| record.keys.level);

    let record = ctx.devices.get_mut(device);
    if status.is_success() {
        record.encrypted = enabled;
        record.security_level = if enabled {
            bonded_level
                .or_else(|| record.pending_keys.as_ref().map(|keys| keys.level))
                .unwrap_or(SecurityLevel::EncryptionOnly)
        } else {
            SecurityLevel::None
        };
    } else {
        warn!("Encryption change on device {} failed: {}", device, status);
    }
    let level = record.security_level;

    ctx.events.broadcast(CmEvent::EncryptionNotify {
        device,
        status,
        enabled: enabled && status.is_success(),
        level,
    });
}

pub(crate) fn on_passkey_display<H: Hal, N: Nvm>(ctx: &mut Context<H, N>, cid: Cid, passkey: u32) {
    if let Some(device) = ctx.device_for(cid) {
        ctx.events
            .push(Route::App, CmEvent::PasskeyDisplay { device, passkey });
    }
}

pub(crate) fn on_passkey_input<H: Hal, N: Nvm>(ctx: &mut Context<H, N>, cid: Cid) {
    if let Some(device) = ctx.device_for(cid) {
        ctx.events.push(Route::App, CmEvent::PasskeyInput { device });
    }
}

pub(crate) fn on_pairing_auth<H: Hal, N: Nvm>(ctx: &mut Context<H, N>, cid: Cid, bonding: bool) {
    if let Some(device) = ctx.device_for(cid) {
        ctx.events
            .push(Route::App, CmEvent::PairingAuth { device, bonding });
    }
}

/// Run an unbond that was deferred while the device was connected
pub(crate) fn on_disconnected<H: Hal, N: Nvm>(ctx: &mut Context<H, N>, device: DeviceId) {
    let record = ctx.devices.get_mut(device);
    let pending = std::mem::take(&mut record.pending_unbond);
    let bond = record.bond_id.take();

    if let (true, Some(bond)) = (pending, bond) {
        info!("Performing deferred unbond of {} after disconnect", bond);
        if let Err(e) = remove_bond(ctx, bond) {
            warn!("Deferred unbond of {} failed: {}", bond, e);
        }
    }
}

/// Clear a bond record now
pub(crate) fn remove_bond<H: Hal, N: Nvm>(ctx: &mut Context<H, N>, bond: BondId) -> CmResult<()> {
    let record = ctx.bonds.remove(&mut ctx.nvm, bond)?;
    if !record.peer.is_resolvable_private() {
        if let Err(e) = ctx.hal.whitelist_remove(&record.peer) {
            warn!("Failed to remove {} from the whitelist: {}", record.peer, e);
        }
    }
    ctx.events.broadcast(CmEvent::BondRemoved {
        bond,
        peer: record.peer,
    });
    Ok(())
}

/// Remove a bond, or defer the removal while its peer is still connected
pub(crate) fn unbond_or_defer<H: Hal, N: Nvm>(
    ctx: &mut Context<H, N>,
    bond: BondId,
) -> CmResult<UnbondOutcome> {
    if ctx.bonds.get(bond).is_none() {
        return Err(CmError::BondNotFound(bond));
    }
    if let Some(device) = ctx.devices.find_by_bond(bond) {
        info!("Bond {} in use by device {}, unbonding on disconnect", bond, device);
        ctx.devices.get_mut(device).pending_unbond = true;
        return Ok(UnbondOutcome::DeferredUntilDisconnect);
    }
    remove_bond(ctx, bond)?;
    Ok(UnbondOutcome::Removed)
}
