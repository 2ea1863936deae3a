//! Observer role: passive scanning with unfiltered report forwarding

use crate::error::{CmError, CmResult};
use crate::event::CmEvent;
use crate::gap::types::{AdvertisingReport, ObserveState, ScanParams, ScanReport};
use crate::hal::Hal;
use crate::manager::Context;
use crate::nvm::Nvm;
use log::info;

#[derive(Debug)]
pub struct Observer {
    state: ObserveState,
}

impl Default for Observer {
    fn default() -> Self {
        Self::new()
    }
}

impl Observer {
    pub fn new() -> Self {
        Self {
            state: ObserveState::Idle,
        }
    }

    pub fn state(&self) -> ObserveState {
        self.state
    }

    pub fn is_observing(&self) -> bool {
        self.state == ObserveState::Observing
    }

    fn set_state<H: Hal, N: Nvm>(&mut self, ctx: &mut Context<H, N>, state: ObserveState) {
        if self.state != state {
            self.state = state;
            ctx.events.broadcast(CmEvent::ObserveState(state));
        }
    }

    /// Start a passive scan. The radio runs one scan at a time, so this is
    /// refused while the central role is scanning.
    pub fn start<H: Hal, N: Nvm>(
        &mut self,
        ctx: &mut Context<H, N>,
        central_scanning: bool,
    ) -> CmResult<()> {
        if self.is_observing() || central_scanning {
            return Err(CmError::Busy);
        }
        let params = ScanParams {
            active: false,
            ..ctx.config.central.scan
        };
        ctx.hal.set_scan_params(&params)?;
        ctx.hal.start_scan()?;

        info!("Observing started");
        self.set_state(ctx, ObserveState::Observing);
        Ok(())
    }

    pub fn stop<H: Hal, N: Nvm>(&mut self, ctx: &mut Context<H, N>) -> CmResult<()> {
        if !self.is_observing() {
            return Err(CmError::InvalidState("observer idle"));
        }
        ctx.hal.stop_scan()?;
        info!("Observing stopped");
        self.set_state(ctx, ObserveState::Idle);
        Ok(())
    }

    /// Forward a report as is. Returns false when not observing.
    pub(crate) fn on_report<H: Hal, N: Nvm>(
        &mut self,
        ctx: &mut Context<H, N>,
        report: &AdvertisingReport,
    ) -> bool {
        if !self.is_observing() {
            return false;
        }
        ctx.events
            .broadcast(CmEvent::AdvertReport(ScanReport::raw(report)));
        true
    }
}
