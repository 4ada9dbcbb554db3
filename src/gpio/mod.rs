//! Discrete I/O bank (8 inputs, 8 outputs)
//!
//! [`PinDriver`] is the hardware capability consumed from the board backend.
//! [`PinBridge`] wraps a driver with edge detection and best-effort output
//! writes, and [`spawn_poller`] runs it as the single task that owns the
//! hardware handle.

mod pins;
mod poller;
pub mod simulated;
pub mod sysfs;

use tracing::{debug, info, warn};

use crate::config::{AppConfig, GpioVariant};
use crate::error::{Result, TallyError};
use crate::tally::LINE_COUNT;

pub use pins::{PinConfig, PullMode};
pub use poller::{spawn_poller, PinEvent, PinHandle, PinOutputs, MAX_CONSECUTIVE_READ_FAILURES};
pub use simulated::SimulatedPins;
pub use sysfs::SysfsPins;

/// Hardware capability: 8 inputs, 8 outputs, per-line pulls
///
/// Implementations report every failure as [`TallyError::Hardware`]. Input
/// values are logical (true = tally on); any active-low inversion is the
/// backend's business.
pub trait PinDriver: Send {
    /// Backend name for logs
    fn name(&self) -> &str;

    fn set_pulls(&mut self, pins: &PinConfig) -> Result<()>;

    fn read_inputs(&mut self) -> Result<[bool; LINE_COUNT]>;

    fn write_outputs(&mut self, values: [bool; LINE_COUNT]) -> Result<()>;

    /// Give the lines back to the system
    fn release(&mut self) -> Result<()>;
}

/// Open the backend selected in the configuration
///
/// `simulated` is used when the variant is [`GpioVariant::Simulated`]; passing
/// a handle lets the caller keep driving the simulated inputs.
pub fn open_driver(
    config: &AppConfig,
    simulated: Option<SimulatedPins>,
) -> Result<Box<dyn PinDriver>> {
    match config.gpio_variant {
        GpioVariant::Simulated => Ok(Box::new(simulated.unwrap_or_default())),
        GpioVariant::RaspberryPi => Ok(Box::new(SysfsPins::open(&config.sysfs)?)),
        GpioVariant::Piface => Err(TallyError::hardware(
            "PiFace Digital backend is not available in this build; \
             use gpio_variant raspberry_pi or simulated",
        )),
    }
}

/// Edge-detecting wrapper around a [`PinDriver`]
pub struct PinBridge {
    driver: Box<dyn PinDriver>,
    last_inputs: Option<[bool; LINE_COUNT]>,
    outputs: [bool; LINE_COUNT],
    released: bool,
}

impl PinBridge {
    pub fn new(driver: Box<dyn PinDriver>) -> Self {
        Self {
            driver,
            last_inputs: None,
            outputs: [false; LINE_COUNT],
            released: false,
        }
    }

    /// Apply per-line pull modes
    pub fn configure(&mut self, pins: &PinConfig) -> Result<()> {
        self.driver.set_pulls(pins)?;
        info!(backend = self.driver.name(), pulls = %pins, "GPIO bank configured");
        Ok(())
    }

    /// Lines whose value changed since the previous poll
    ///
    /// The first successful poll reports every line so the mediator learns the
    /// initial state.
    pub fn poll_inputs(&mut self) -> Result<Vec<(usize, bool)>> {
        let current = self.driver.read_inputs()?;
        let changes = match self.last_inputs {
            None => current.iter().copied().enumerate().collect(),
            Some(previous) => current
                .iter()
                .zip(previous.iter())
                .enumerate()
                .filter(|(_, (now, before))| now != before)
                .map(|(line, (now, _))| (line, *now))
                .collect(),
        };
        self.last_inputs = Some(current);
        Ok(changes)
    }

    /// Best-effort output update
    ///
    /// Returns true when the hardware was written. On failure the error is
    /// logged and the previous output image is kept.
    pub fn write_outputs(&mut self, changes: &[(usize, bool)]) -> bool {
        let mut next = self.outputs;
        for &(line, value) in changes {
            if let Some(slot) = next.get_mut(line) {
                *slot = value;
            }
        }
        if next == self.outputs {
            return false;
        }

        match self.driver.write_outputs(next) {
            Ok(()) => {
                debug!(?changes, "GPIO outputs written");
                self.outputs = next;
                true
            }
            Err(e) => {
                warn!("Failed to write GPIO outputs (keeping previous values): {}", e);
                false
            }
        }
    }

    /// Last output image successfully written
    pub fn outputs(&self) -> [bool; LINE_COUNT] {
        self.outputs
    }

    /// Release the hardware handle. Failures are logged, not retried.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        match self.driver.release() {
            Ok(()) => info!(backend = self.driver.name(), "GPIO bank released"),
            Err(e) => warn!("Failed to release GPIO bank: {}", e),
        }
    }
}

impl Drop for PinBridge {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bridge_with_sim() -> (PinBridge, SimulatedPins) {
        let sim = SimulatedPins::new();
        (PinBridge::new(Box::new(sim.clone())), sim)
    }

    #[test]
    fn test_first_poll_reports_all_lines() {
        let (mut bridge, sim) = bridge_with_sim();
        sim.set_input(2, true);
        let changes = bridge.poll_inputs().unwrap();
        assert_eq!(changes.len(), LINE_COUNT);
        assert_eq!(changes[2], (2, true));
    }

    #[test]
    fn test_poll_is_edge_triggered() {
        let (mut bridge, sim) = bridge_with_sim();
        bridge.poll_inputs().unwrap();
        assert!(bridge.poll_inputs().unwrap().is_empty());

        sim.set_input(3, true);
        assert_eq!(bridge.poll_inputs().unwrap(), vec![(3, true)]);
        assert!(bridge.poll_inputs().unwrap().is_empty());

        sim.set_input(3, false);
        sim.set_input(6, true);
        assert_eq!(bridge.poll_inputs().unwrap(), vec![(3, false), (6, true)]);
    }

    #[test]
    fn test_read_failure_surfaces_as_hardware_error() {
        let (mut bridge, sim) = bridge_with_sim();
        sim.set_fail_reads(true);
        assert!(matches!(bridge.poll_inputs(), Err(TallyError::Hardware(_))));
    }

    #[test]
    fn test_write_failure_keeps_previous_outputs() {
        let (mut bridge, sim) = bridge_with_sim();
        assert!(bridge.write_outputs(&[(1, true)]));
        assert_eq!(sim.outputs()[1], true);

        sim.set_fail_writes(true);
        assert!(!bridge.write_outputs(&[(1, false), (4, true)]));
        assert_eq!(bridge.outputs()[1], true);
        assert_eq!(bridge.outputs()[4], false);
        assert_eq!(sim.outputs()[1], true);
    }

    #[test]
    fn test_unchanged_outputs_are_not_rewritten() {
        let (mut bridge, sim) = bridge_with_sim();
        assert!(bridge.write_outputs(&[(0, true)]));
        assert!(!bridge.write_outputs(&[(0, true)]));
        assert!(!bridge.write_outputs(&[(99, true)]));
        assert_eq!(sim.write_count(), 1);
    }

    #[test]
    fn test_configure_applies_pulls() {
        let (mut bridge, sim) = bridge_with_sim();
        let pins: PinConfig = "DDDDUUUU".parse().unwrap();
        bridge.configure(&pins).unwrap();
        assert_eq!(sim.pulls(), Some(pins));
    }

    #[test]
    fn test_release_once_on_drop() {
        let (mut bridge, sim) = bridge_with_sim();
        bridge.release();
        drop(bridge);
        assert_eq!(sim.release_count(), 1);
    }

    #[test]
    fn test_piface_is_reported_as_hardware_error() {
        let config = AppConfig::default();
        assert!(matches!(
            open_driver(&config, None),
            Err(TallyError::Hardware(_))
        ));
    }
}
