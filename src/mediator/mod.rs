//! Tally mediator task
//!
//! Owns the [`Reconciler`] and executes the actions it returns against the pin
//! poller and the session pool. Pin events and remote frames arrive on two
//! channels; either may be absent depending on the mode.

mod reconciler;


use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::TallyMode;
use crate::gpio::{PinEvent, PinOutputs};
use crate::remote::{Broadcaster, InboundUpdate};
use crate::shutdown::ShutdownSignal;
use crate::tally::TallyReader;

pub use reconciler::{Action, Reconciler};

pub struct TallyMediator {
    reconciler: Reconciler,
    pins: Option<PinOutputs>,
    network: Option<Broadcaster>,
}

impl TallyMediator {
    /// Outputs are only mirrored when `pins` is present
    pub fn new(mode: TallyMode, pins: Option<PinOutputs>, network: Option<Broadcaster>) -> Self {
        Self {
            reconciler: Reconciler::new(mode, pins.is_some()),
            pins,
            network,
        }
    }

    /// Read handle for the renderer
    pub fn reader(&self) -> TallyReader {
        self.reconciler.reader()
    }

    pub fn spawn(
        self,
        pin_events: Option<mpsc::Receiver<PinEvent>>,
        inbound: Option<mpsc::Receiver<InboundUpdate>>,
        shutdown: ShutdownSignal,
    ) -> JoinHandle<()> {
        tokio::spawn(self.run(pin_events, inbound, shutdown))
    }

    /// Process events until shutdown or until both inputs are gone
    pub async fn run(
        mut self,
        mut pin_events: Option<mpsc::Receiver<PinEvent>>,
        mut inbound: Option<mpsc::Receiver<InboundUpdate>>,
        shutdown: ShutdownSignal,
    ) {
        info!(mode = %self.reconciler.mode(), "Tally mediator started");

        loop {
            if pin_events.is_none() && inbound.is_none() {
                debug!("No tally sources left");
                break;
            }

            tokio::select! {
                biased;

                _ = shutdown.wait() => break,

                event = recv_or_pending(&mut pin_events) => match event {
                    Some(PinEvent::Changed(changes)) => {
                        let actions = self.reconciler.on_local(&changes);
                        self.execute(actions);
                    }
                    Some(PinEvent::Disabled { reason }) => {
                        warn!("GPIO tally disabled: {}", reason);
                        self.reconciler.detach_outputs();
                        self.pins = None;
                        pin_events = None;
                    }
                    None => {
                        debug!("GPIO event channel closed");
                        pin_events = None;
                    }
                },

                update = recv_or_pending(&mut inbound) => match update {
                    Some(update) => {
                        debug!(
                            endpoint = %update.endpoint,
                            seq = update.seq,
                            snapshot = %update.snapshot,
                            "Remote tally frame"
                        );
                        let actions = self.reconciler.on_remote(&update);
                        self.execute(actions);
                    }
                    None => {
                        debug!("Remote update channel closed");
                        inbound = None;
                    }
                },
            }
        }

        info!(state = %self.reconciler.snapshot(), "Tally mediator stopped");
    }

    fn execute(&self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::WritePins(changes) => match &self.pins {
                    Some(pins) => pins.write(changes),
                    None => debug!("No pin bank attached; output write skipped"),
                },
                Action::Broadcast(snapshot) => match &self.network {
                    Some(network) => network.broadcast(snapshot),
                    None => debug!("No session pool; broadcast skipped"),
                },
            }
        }
    }
}

/// `recv` on an optional channel; a missing channel never yields
async fn recv_or_pending<T>(rx: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
