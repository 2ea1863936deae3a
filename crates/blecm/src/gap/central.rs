//! Central role: scanning and connection establishment

use crate::error::{CmError, CmResult};
use crate::event::CmEvent;
use crate::gap::advert::{advertises_service, parse_report};
use crate::gap::types::{AdvertisingReport, ConnectState, ScanFilter, ScanReport, ScanState};
use crate::hal::constants::HCI_STATUS_CONNECTION_TIMEOUT;
use crate::hal::{Hal, TimerId};
use crate::manager::Context;
use crate::nvm::Nvm;
use crate::types::{Status, TypedBdAddr};
use log::{debug, info, warn};

/// Scan and connect state machines of the central role
#[derive(Debug)]
pub struct Central {
    scan_state: ScanState,
    connect_state: ConnectState,
    filter: ScanFilter,
    /// Connection attempt timer, running while `Connecting`
    timer: Option<TimerId>,
    target: Option<TypedBdAddr>,
}

impl Default for Central {
    fn default() -> Self {
        Self::new()
    }
}

impl Central {
    pub fn new() -> Self {
        Self {
            scan_state: ScanState::Idle,
            connect_state: ConnectState::Idle,
            filter: ScanFilter::All,
            timer: None,
            target: None,
        }
    }

    pub fn scan_state(&self) -> ScanState {
        self.scan_state
    }

    pub fn connect_state(&self) -> ConnectState {
        self.connect_state
    }

    pub fn is_scanning(&self) -> bool {
        self.scan_state == ScanState::Scanning
    }

    fn set_scan_state<H: Hal, N: Nvm>(&mut self, ctx: &mut Context<H, N>, state: ScanState) {
        if self.scan_state != state {
            debug!("Scan state {:?} -> {:?}", self.scan_state, state);
            self.scan_state = state;
            ctx.events.broadcast(CmEvent::ScanState(state));
        }
    }

    fn set_connect_state<H: Hal, N: Nvm>(&mut self, ctx: &mut Context<H, N>, state: ConnectState) {
        if self.connect_state != state {
            debug!("Connect state {:?} -> {:?}", self.connect_state, state);
            self.connect_state = state;
            ctx.events.broadcast(CmEvent::ConnectState(state));
        }
    }

    fn clear_timer<H: Hal>(&mut self, hal: &mut H) {
        if let Some(timer) = self.timer.take() {
            hal.cancel_timer(timer);
        }
    }

    /// Configure scan parameters, then enable scanning
    pub fn start_scan<H: Hal, N: Nvm>(
        &mut self,
        ctx: &mut Context<H, N>,
        filter: ScanFilter,
    ) -> CmResult<()> {
        if self.is_scanning() {
            return Err(CmError::Busy);
        }
        let params = ctx.config.central.scan;
        ctx.hal.set_scan_params(&params)?;
        ctx.hal.start_scan()?;

        info!("Scanning started ({:?})", filter);
        self.filter = filter;
        self.set_scan_state(ctx, ScanState::Scanning);
        Ok(())
    }

    pub fn stop_scan<H: Hal, N: Nvm>(&mut self, ctx: &mut Context<H, N>) -> CmResult<()> {
        if !self.is_scanning() {
            return Err(CmError::InvalidState("scan idle"));
        }
        ctx.hal.stop_scan()?;
        info!("Scanning stopped");
        self.set_scan_state(ctx, ScanState::Idle);
        Ok(())
    }

    /// Filter and forward a report. Returns false when not scanning.
    pub(crate) fn on_report<H: Hal, N: Nvm>(
        &mut self,
        ctx: &mut Context<H, N>,
        report: &AdvertisingReport,
    ) -> bool {
        if !self.is_scanning() {
            return false;
        }
        let forwarded = match &self.filter {
            ScanFilter::Raw => Some(ScanReport::raw(report)),
            ScanFilter::All => Some(parse_report(report)),
            ScanFilter::Service(uuid) => {
                if advertises_service(&report.data, uuid) {
                    Some(parse_report(report))
                } else {
                    None
                }
            }
        };
        if let Some(forwarded) = forwarded {
            ctx.events.broadcast(CmEvent::AdvertReport(forwarded));
        }
        true
    }

    /// Connect to a peer. An active scan is stopped first; the attempt is
    /// cancelled if it is not confirmed within the connect timeout.
    pub fn connect<H: Hal, N: Nvm>(
        &mut self,
        ctx: &mut Context<H, N>,
        peer: TypedBdAddr,
    ) -> CmResult<()> {
        if self.connect_state != ConnectState::Idle {
            return Err(CmError::Busy);
        }
        if self.is_scanning() {
            ctx.hal.stop_scan()?;
            self.set_scan_state(ctx, ScanState::Idle);
        }

        let params = ctx.config.central.connection;
        ctx.hal.connect(peer, &params)?;
        self.timer = Some(ctx.hal.start_timer(ctx.config.connect_timeout));
        self.target = Some(peer);

        info!("Connecting to {}", peer);
        self.set_connect_state(ctx, ConnectState::Connecting);
        Ok(())
    }

    /// Cancel the pending attempt; `Idle` follows the HAL confirmation
    pub fn cancel_connect<H: Hal, N: Nvm>(&mut self, ctx: &mut Context<H, N>) -> CmResult<()> {
        match self.connect_state {
            ConnectState::Idle => Err(CmError::InvalidState("no connection attempt")),
            ConnectState::CancelConnecting => Ok(()),
            ConnectState::Connecting => {
                ctx.hal.cancel_connect()?;
                self.clear_timer(&mut ctx.hal);
                self.set_connect_state(ctx, ConnectState::CancelConnecting);
                Ok(())
            }
        }
    }

    /// Returns true if `timer` was the connection attempt timer
    pub(crate) fn on_timer<H: Hal, N: Nvm>(&mut self, ctx: &mut Context<H, N>, timer: TimerId) -> bool {
        if self.timer != Some(timer) {
            return false;
        }
        self.timer = None;

        warn!("Connection attempt timed out, cancelling");
        if let Err(e) = self.cancel_connect(ctx) {
            warn!("Could not cancel connection attempt: {}", e);
            self.finish(ctx, HCI_STATUS_CONNECTION_TIMEOUT);
        }
        true
    }

    pub(crate) fn on_cancel_cfm<H: Hal, N: Nvm>(&mut self, ctx: &mut Context<H, N>, status: Status) {
        if self.connect_state == ConnectState::Idle {
            debug!("Connection cancel confirmation while idle");
            return;
        }
        if !status.is_success() {
            warn!("Connection cancel confirmed with status {}", status);
        }
        self.finish(ctx, status);
    }

    /// A connection attempt was confirmed, successfully or not
    pub(crate) fn on_connection_complete<H: Hal, N: Nvm>(
        &mut self,
        ctx: &mut Context<H, N>,
        status: Status,
        peer: TypedBdAddr,
    ) {
        if self.connect_state == ConnectState::Idle {
            return;
        }
        if status.is_success() {
            self.clear_timer(&mut ctx.hal);
            self.target = None;
            self.set_connect_state(ctx, ConnectState::Idle);
        } else {
            self.target = Some(peer);
            self.finish(ctx, status);
        }
    }

    /// Return to `Idle` after an attempt that did not produce a link
    fn finish<H: Hal, N: Nvm>(&mut self, ctx: &mut Context<H, N>, status: Status) {
        self.clear_timer(&mut ctx.hal);
        let peer = self.target.take();
        self.set_connect_state(ctx, ConnectState::Idle);
        ctx.events.broadcast(CmEvent::ConnectFailed { peer, status });
    }
}
