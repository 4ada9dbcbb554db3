//! Reconciliation policy, free of I/O
//!
//! The reconciler is the single writer of [`TallyState`]. It turns pin edges
//! and accepted remote frames into state updates plus the actions the driver
//! must carry out.
//!
//! Loop prevention: a change only travels to the channel it did not come from,
//! and only when it differs from what that channel was last sent. The network
//! side only ever carries the local input image, so data received from a
//! controller is never sent back to a controller.

use tracing::{debug, trace};

use crate::config::TallyMode;
use crate::remote::InboundUpdate;
use crate::tally::{Provenance, TallyReader, TallySnapshot, TallyState, WireSnapshot};

/// Side effect requested by the reconciler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Drive these output lines
    WritePins(Vec<(usize, bool)>),
    /// Publish this image to every streaming session
    Broadcast(WireSnapshot),
}

pub struct Reconciler {
    mode: TallyMode,
    drive_outputs: bool,
    state: TallyState,
    /// Latest local input image
    local_inputs: WireSnapshot,
    /// Shadow of the last image handed to the network
    sent_network: Option<WireSnapshot>,
    /// Shadow of the last values handed to the output lines
    sent_pins: WireSnapshot,
}

impl Reconciler {
    /// `drive_outputs` is false when no pin bank is attached
    pub fn new(mode: TallyMode, drive_outputs: bool) -> Self {
        Self {
            mode,
            drive_outputs,
            state: TallyState::new(),
            local_inputs: WireSnapshot::default(),
            sent_network: None,
            sent_pins: WireSnapshot::default(),
        }
    }

    pub fn mode(&self) -> TallyMode {
        self.mode
    }

    pub fn reader(&self) -> TallyReader {
        self.state.reader()
    }

    pub fn snapshot(&self) -> TallySnapshot {
        self.state.snapshot()
    }

    /// Stop mirroring onto the output lines (pin bank went away)
    pub fn detach_outputs(&mut self) {
        self.drive_outputs = false;
    }

    /// Input lines changed on the local bank
    pub fn on_local(&mut self, changes: &[(usize, bool)]) -> Vec<Action> {
        match self.mode {
            TallyMode::Disabled | TallyMode::TcpOnly => {
                trace!(mode = %self.mode, "Ignoring local pin changes");
                return Vec::new();
            }
            TallyMode::GpioOnly | TallyMode::GpioTcpEcho => {}
        }

        for &(line, value) in changes {
            self.local_inputs = self.local_inputs.with(line, value);
            self.state.apply(line, value, Provenance::Local);
        }

        let mut actions = Vec::new();
        if self.mode == TallyMode::GpioTcpEcho && self.sent_network != Some(self.local_inputs) {
            debug!(image = %self.local_inputs, "Local tally change goes to network");
            self.sent_network = Some(self.local_inputs);
            actions.push(Action::Broadcast(self.local_inputs));
        }
        actions
    }

    /// A remote controller sent a fresh frame
    pub fn on_remote(&mut self, update: &InboundUpdate) -> Vec<Action> {
        match self.mode {
            TallyMode::Disabled | TallyMode::GpioOnly => {
                trace!(mode = %self.mode, endpoint = %update.endpoint, "Ignoring remote frame");
                return Vec::new();
            }
            TallyMode::TcpOnly | TallyMode::GpioTcpEcho => {}
        }

        let mut pin_changes = Vec::new();
        for (line, value) in update.snapshot.lines() {
            self.state.apply(line, value, Provenance::Remote);
            if self.drive_outputs && self.sent_pins.get(line) != Some(value) {
                self.sent_pins = self.sent_pins.with(line, value);
                pin_changes.push((line, value));
            }
        }

        if pin_changes.is_empty() {
            Vec::new()
        } else {
            debug!(endpoint = %update.endpoint, ?pin_changes, "Remote tally change goes to outputs");
            vec![Action::WritePins(pin_changes)]
        }
    }
}
