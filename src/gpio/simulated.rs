//! In-memory pin bank
//!
//! Cloning a `SimulatedPins` shares the same bank, so a test (or the demo
//! binary) can keep a handle to toggle inputs while the poller owns the driver.

use parking_lot::Mutex;
use std::sync::Arc;

use super::{PinConfig, PinDriver};
use crate::error::{Result, TallyError};
use crate::tally::LINE_COUNT;

#[derive(Default)]
struct SimBank {
    inputs: [bool; LINE_COUNT],
    outputs: [bool; LINE_COUNT],
    pulls: Option<PinConfig>,
    fail_reads: bool,
    fail_writes: bool,
    writes: usize,
    releases: usize,
}

#[derive(Clone, Default)]
pub struct SimulatedPins {
    bank: Arc<Mutex<SimBank>>,
}

impl SimulatedPins {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_input(&self, line: usize, value: bool) {
        if let Some(slot) = self.bank.lock().inputs.get_mut(line) {
            *slot = value;
        }
    }

    pub fn outputs(&self) -> [bool; LINE_COUNT] {
        self.bank.lock().outputs
    }

    pub fn pulls(&self) -> Option<PinConfig> {
        self.bank.lock().pulls
    }

    /// Make every subsequent read fail (bus fault)
    pub fn set_fail_reads(&self, fail: bool) {
        self.bank.lock().fail_reads = fail;
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.bank.lock().fail_writes = fail;
    }

    pub fn write_count(&self) -> usize {
        self.bank.lock().writes
    }

    pub fn release_count(&self) -> usize {
        self.bank.lock().releases
    }
}

impl PinDriver for SimulatedPins {
    fn name(&self) -> &str {
        "simulated"
    }

    fn set_pulls(&mut self, pins: &PinConfig) -> Result<()> {
        self.bank.lock().pulls = Some(*pins);
        Ok(())
    }

    fn read_inputs(&mut self) -> Result<[bool; LINE_COUNT]> {
        let bank = self.bank.lock();
        if bank.fail_reads {
            return Err(TallyError::hardware("simulated bus fault on read"));
        }
        Ok(bank.inputs)
    }

    fn write_outputs(&mut self, values: [bool; LINE_COUNT]) -> Result<()> {
        let mut bank = self.bank.lock();
        if bank.fail_writes {
            return Err(TallyError::hardware("simulated bus fault on write"));
        }
        bank.outputs = values;
        bank.writes += 1;
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        self.bank.lock().releases += 1;
        Ok(())
    }
}
