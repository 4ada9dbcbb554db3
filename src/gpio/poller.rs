//! Pin polling task
//!
//! One task owns the [`PinBridge`]: it polls inputs on a fixed interval,
//! forwards edges to the mediator and applies output writes sent back over a
//! command channel. Hardware calls go through `spawn_blocking`, since the
//! sysfs backend does plain file I/O.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::PinBridge;
use crate::shutdown::ShutdownSignal;

/// Consecutive failed reads before the GPIO side disables itself
pub const MAX_CONSECUTIVE_READ_FAILURES: u32 = 5;

/// Notifications from the poller to the mediator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinEvent {
    /// Input lines that changed since the previous poll
    Changed(Vec<(usize, bool)>),
    /// The bank faulted and the poller stopped
    Disabled { reason: String },
}

enum PinCommand {
    Write(Vec<(usize, bool)>),
}

/// Sends output updates to the poller
#[derive(Clone)]
pub struct PinOutputs {
    cmd_tx: mpsc::UnboundedSender<PinCommand>,
}

impl PinOutputs {
    /// Queue an output update. Dropped silently once the poller has stopped.
    pub fn write(&self, changes: Vec<(usize, bool)>) {
        if self.cmd_tx.send(PinCommand::Write(changes)).is_err() {
            debug!("GPIO poller stopped; output write dropped");
        }
    }
}

/// Handle to a running poller
pub struct PinHandle {
    outputs: PinOutputs,
    task: JoinHandle<()>,
}

impl PinHandle {
    pub fn outputs(&self) -> PinOutputs {
        self.outputs.clone()
    }

    pub fn write_outputs(&self, changes: Vec<(usize, bool)>) {
        self.outputs.write(changes);
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Wait for the poller to exit (it releases the hardware on the way out)
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            warn!("GPIO poller task failed: {}", e);
        }
    }
}

/// Start polling `bridge` every `interval`
pub fn spawn_poller(
    bridge: PinBridge,
    interval: Duration,
    events_tx: mpsc::Sender<PinEvent>,
    shutdown: ShutdownSignal,
) -> PinHandle {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(run(bridge, interval, events_tx, cmd_rx, shutdown));
    PinHandle {
        outputs: PinOutputs { cmd_tx },
        task,
    }
}

type Bank = Arc<Mutex<PinBridge>>;

async fn run(
    bridge: PinBridge,
    interval: Duration,
    events_tx: mpsc::Sender<PinEvent>,
    mut cmd_rx: mpsc::UnboundedReceiver<PinCommand>,
    shutdown: ShutdownSignal,
) {
    let bank: Bank = Arc::new(Mutex::new(bridge));
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut failures = 0u32;

    info!(interval_ms = interval.as_millis() as u64, "GPIO poller started");

    loop {
        tokio::select! {
            biased;

            _ = shutdown.wait() => {
                debug!("GPIO poller observed shutdown");
                break;
            }

            Some(cmd) = cmd_rx.recv() => match cmd {
                PinCommand::Write(changes) => {
                    on_bank(&bank, move |bridge| bridge.write_outputs(&changes)).await;
                }
            },

            _ = ticker.tick() => {
                let polled = match on_bank(&bank, |bridge| bridge.poll_inputs()).await {
                    Some(polled) => polled,
                    None => {
                        let reason = "GPIO hardware call panicked".to_string();
                        let _ = events_tx.send(PinEvent::Disabled { reason }).await;
                        break;
                    }
                };
                match polled {
                    Ok(changes) => {
                        failures = 0;
                        if changes.is_empty() {
                            continue;
                        }
                        debug!(?changes, "GPIO inputs changed");
                        if events_tx.send(PinEvent::Changed(changes)).await.is_err() {
                            debug!("Mediator gone, stopping GPIO poller");
                            break;
                        }
                    }
                    Err(e) => {
                        failures += 1;
                        warn!(failures, "GPIO read failed: {}", e);
                        if failures >= MAX_CONSECUTIVE_READ_FAILURES {
                            warn!("GPIO bank keeps failing, disabling GPIO tally");
                            let _ = events_tx
                                .send(PinEvent::Disabled { reason: e.to_string() })
                                .await;
                            break;
                        }
                    }
                }
            }
        }
    }

    on_bank(&bank, |bridge| bridge.release()).await;
    info!("GPIO poller stopped");
}

/// Run one hardware call on the blocking pool; `None` if it panicked
async fn on_bank<T, F>(bank: &Bank, op: F) -> Option<T>
where
    F: FnOnce(&mut PinBridge) -> T + Send + 'static,
    T: Send + 'static,
{
    let bank = Arc::clone(bank);
    match tokio::task::spawn_blocking(move || op(&mut bank.lock())).await {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("GPIO hardware call failed: {}", e);
            None
        }
    }
}
