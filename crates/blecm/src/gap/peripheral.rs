//! Peripheral role: advertising campaigns
//!
//! A campaign walks the configured advert type list in order. Each type
//! advertises until its timeout fires, the application stops the campaign
//! or a central connects. A timeout cancels the current advert and the next
//! type starts once the HAL confirms the cancellation.
//!
//! Requests that arrive while a cancellation is outstanding (stop, bond
//! removal) are latched and honoured at the confirmation.

use crate::config::validate_adverts;
use crate::error::{CmError, CmResult};
use crate::event::CmEvent;
use crate::gap::advert::build_payloads;
use crate::gap::types::{AdvertKind, AdvertisingParams, AdvertisingState};
use crate::hal::{Hal, TimerId};
use crate::manager::Context;
use crate::nvm::Nvm;
use crate::security::manager::unbond_or_defer;
use crate::security::UnbondOutcome;
use crate::types::{BondId, Status};
use log::{debug, info, warn};

/// Advertising state machine of the peripheral role
#[derive(Debug)]
pub struct Peripheral {
    state: AdvertisingState,
    /// Index into the advert type list
    current: usize,
    timer: Option<TimerId>,
    stop_requested: bool,
    pending_unbonds: Vec<BondId>,
}

impl Default for Peripheral {
    fn default() -> Self {
        Self::new()
    }
}

impl Peripheral {
    pub fn new() -> Self {
        Self {
            state: AdvertisingState::Idle,
            current: 0,
            timer: None,
            stop_requested: false,
            pending_unbonds: Vec::new(),
        }
    }

    pub fn state(&self) -> AdvertisingState {
        self.state
    }

    /// Index of the advert type being advertised
    pub fn current_advert(&self) -> usize {
        self.current
    }

    /// Whether a connectable advert is on air or being cancelled
    pub fn is_advertising(&self) -> bool {
        matches!(
            self.state,
            AdvertisingState::Advertising
                | AdvertisingState::DirectedAdvertising
                | AdvertisingState::Stopping
        )
    }

    fn set_state<H: Hal, N: Nvm>(&mut self, ctx: &mut Context<H, N>, state: AdvertisingState) {
        if self.state != state {
            debug!("Advertising state {:?} -> {:?}", self.state, state);
            self.state = state;
            ctx.events.broadcast(CmEvent::AdvertisingState(state));
        }
    }

    fn clear_timer<H: Hal>(&mut self, hal: &mut H) {
        if let Some(timer) = self.timer.take() {
            hal.cancel_timer(timer);
        }
    }

    /// Start a campaign at the first advert type
    pub fn start_advertising<H: Hal, N: Nvm>(&mut self, ctx: &mut Context<H, N>) -> CmResult<()> {
        if self.state != AdvertisingState::Idle {
            return Err(CmError::Busy);
        }
        validate_adverts(&ctx.config.peripheral.adverts)?;

        self.current = 0;
        self.stop_requested = false;
        self.advertise_current(ctx)
    }

    fn advertise_current<H: Hal, N: Nvm>(&mut self, ctx: &mut Context<H, N>) -> CmResult<()> {
        let advert = ctx
            .config
            .peripheral
            .adverts
            .get(self.current)
            .cloned()
            .ok_or(CmError::InvalidState("advert type list exhausted"))?;
        let connectable = advert.kind != AdvertKind::NonConnectable;
        let payloads = build_payloads(&ctx.config.peripheral.content, connectable);

        ctx.hal.set_advertising_params(&AdvertisingParams {
            interval_min: advert.interval_min,
            interval_max: advert.interval_max,
            use_whitelist: advert.use_whitelist,
        })?;
        ctx.hal
            .set_advertising_data(&payloads.adv_data, &payloads.scan_rsp)?;
        ctx.hal.start_advertising(&advert.kind)?;

        let state = match advert.kind {
            AdvertKind::Undirected => AdvertisingState::Advertising,
            AdvertKind::Directed(peer) => {
                info!("Directed advertising towards {}", peer);
                AdvertisingState::DirectedAdvertising
            }
            AdvertKind::NonConnectable => {
                info!("Broadcasting");
                self.set_state(ctx, AdvertisingState::Broadcasting);
                return Ok(());
            }
        };
        if let Some(timeout) = advert.timeout {
            self.timer = Some(ctx.hal.start_timer(timeout));
        }
        debug!(
            "Advertising type {} of {}",
            self.current + 1,
            ctx.config.peripheral.adverts.len()
        );
        self.set_state(ctx, state);
        Ok(())
    }

    /// Cancel the on-air advert and wait for the confirmation
    fn cancel<H: Hal, N: Nvm>(&mut self, ctx: &mut Context<H, N>) -> CmResult<()> {
        self.clear_timer(&mut ctx.hal);
        ctx.hal.stop_advertising()?;
        self.set_state(ctx, AdvertisingState::Stopping);
        Ok(())
    }

    /// Stop the campaign. Connectable adverts reach `Idle` once the HAL
    /// confirms the cancellation; a broadcast stops at once.
    pub fn stop<H: Hal, N: Nvm>(&mut self, ctx: &mut Context<H, N>) -> CmResult<()> {
        match self.state {
            AdvertisingState::Idle => Err(CmError::InvalidState("advertising idle")),
            AdvertisingState::Broadcasting => {
                ctx.hal.stop_advertising()?;
                info!("Broadcast stopped");
                self.set_state(ctx, AdvertisingState::Idle);
                Ok(())
            }
            AdvertisingState::Stopping => {
                self.stop_requested = true;
                Ok(())
            }
            AdvertisingState::Advertising | AdvertisingState::DirectedAdvertising => {
                self.cancel(ctx)?;
                self.stop_requested = true;
                Ok(())
            }
        }
    }

    /// Hold a bond removal until the current advert has been cancelled.
    /// The campaign restarts from the first type afterwards.
    pub(crate) fn latch_unbond<H: Hal, N: Nvm>(
        &mut self,
        ctx: &mut Context<H, N>,
        bond: BondId,
    ) -> CmResult<()> {
        if !self.pending_unbonds.contains(&bond) {
            self.pending_unbonds.push(bond);
        }
        if self.state != AdvertisingState::Stopping {
            self.cancel(ctx)?;
        }
        Ok(())
    }

    /// Returns true if `timer` was the advert timer
    pub(crate) fn on_timer<H: Hal, N: Nvm>(&mut self, ctx: &mut Context<H, N>, timer: TimerId) -> bool {
        if self.timer != Some(timer) {
            return false;
        }
        self.timer = None;

        debug!("Advert type {} timed out", self.current + 1);
        if let Err(e) = ctx.hal.stop_advertising() {
            warn!("Failed to cancel advert: {}", e);
            self.set_state(ctx, AdvertisingState::Idle);
            return true;
        }
        self.set_state(ctx, AdvertisingState::Stopping);
        true
    }

    pub(crate) fn on_cancel_cfm<H: Hal, N: Nvm>(&mut self, ctx: &mut Context<H, N>, status: Status) {
        if self.state != AdvertisingState::Stopping {
            debug!("Advert cancel confirmation in state {:?}", self.state);
            return;
        }
        if !status.is_success() {
            warn!("Advert cancel confirmed with status {}", status);
        }
        self.advance(ctx);
    }

    /// The controller ended the advert with a failed connection, as a
    /// directed advert does when its peer never connects
    pub(crate) fn on_connect_failed<H: Hal, N: Nvm>(
        &mut self,
        ctx: &mut Context<H, N>,
        status: Status,
    ) {
        if !matches!(
            self.state,
            AdvertisingState::Advertising | AdvertisingState::DirectedAdvertising
        ) {
            return;
        }
        info!("Advert type {} ended: {}", self.current + 1, status);
        self.clear_timer(&mut ctx.hal);
        self.advance(ctx);
    }

    /// Move on once the current advert is off air: run latched unbonds,
    /// then restart, go to the next type or stop
    fn advance<H: Hal, N: Nvm>(&mut self, ctx: &mut Context<H, N>) {
        let removed = self.run_pending_unbonds(ctx);
        let next = if std::mem::take(&mut self.stop_requested) {
            None
        } else if removed {
            Some(0)
        } else if self.current + 1 < ctx.config.peripheral.adverts.len() {
            Some(self.current + 1)
        } else {
            None
        };

        match next {
            Some(index) => {
                self.current = index;
                if let Err(e) = self.advertise_current(ctx) {
                    warn!("Failed to start advert type {}: {}", index + 1, e);
                    self.set_state(ctx, AdvertisingState::Idle);
                }
            }
            None => {
                info!("Advertising stopped");
                self.set_state(ctx, AdvertisingState::Idle);
            }
        }
    }

    /// A central connected to the advert
    pub(crate) fn on_connected<H: Hal, N: Nvm>(&mut self, ctx: &mut Context<H, N>) {
        if !self.is_advertising() {
            return;
        }
        self.clear_timer(&mut ctx.hal);
        self.stop_requested = false;
        self.run_pending_unbonds(ctx);
        self.set_state(ctx, AdvertisingState::Idle);
    }

    /// Returns true if any latched bond was removed outright
    fn run_pending_unbonds<H: Hal, N: Nvm>(&mut self, ctx: &mut Context<H, N>) -> bool {
        let mut removed = false;
        for bond in std::mem::take(&mut self.pending_unbonds) {
            match unbond_or_defer(ctx, bond) {
                Ok(UnbondOutcome::Removed) => removed = true,
                Ok(outcome) => debug!("Latched unbond of {}: {:?}", bond, outcome),
                Err(e) => warn!("Latched unbond of {} failed: {}", bond, e),
            }
        }
        removed
    }
}
