//! Raspberry Pi header lines through the sysfs GPIO interface
//!
//! Lines are exported on open and unexported on release. sysfs has no knob for
//! pull resistors, so pulls only decide polarity here: a pulled-up input is
//! read active-low (contact closed to ground = tally on).

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::{PinConfig, PinDriver, PullMode};
use crate::config::SysfsConfig;
use crate::error::{Result, TallyError};
use crate::tally::LINE_COUNT;

pub struct SysfsPins {
    root: PathBuf,
    inputs: [u32; LINE_COUNT],
    outputs: [u32; LINE_COUNT],
    active_low: [bool; LINE_COUNT],
    exported: Vec<u32>,
}

impl SysfsPins {
    /// Export and set direction on all 16 lines
    pub fn open(config: &SysfsConfig) -> Result<Self> {
        let inputs = to_lines(&config.input_lines, "input")?;
        let outputs = to_lines(&config.output_lines, "output")?;

        if !config.root.is_dir() {
            return Err(TallyError::hardware(format!(
                "GPIO sysfs root {} not found",
                config.root.display()
            )));
        }

        let mut pins = Self {
            root: config.root.clone(),
            inputs,
            outputs,
            active_low: [false; LINE_COUNT],
            exported: Vec::new(),
        };

        if let Err(e) = pins.export_all() {
            // Hand back whatever was exported before the failure
            if let Err(cleanup) = pins.unexport_all() {
                warn!("Failed to unexport GPIO lines after open error: {}", cleanup);
            }
            return Err(e);
        }

        info!(root = %pins.root.display(), "sysfs GPIO lines exported");
        Ok(pins)
    }

    fn export_all(&mut self) -> Result<()> {
        for line in self.inputs {
            self.export(line)?;
            self.write_attr(line, "direction", "in")?;
        }
        for line in self.outputs {
            self.export(line)?;
            self.write_attr(line, "direction", "out")?;
        }
        Ok(())
    }

    fn unexport_all(&mut self) -> Result<()> {
        let mut first_err = None;
        for line in self.exported.drain(..) {
            if let Err(e) = write_file(&self.root.join("unexport"), &line.to_string()) {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn line_dir(&self, line: u32) -> PathBuf {
        self.root.join(format!("gpio{}", line))
    }

    fn export(&mut self, line: u32) -> Result<()> {
        if !self.line_dir(line).exists() {
            write_file(&self.root.join("export"), &line.to_string())?;
            self.exported.push(line);
            debug!(line, "Exported GPIO line");
        }
        Ok(())
    }

    fn write_attr(&self, line: u32, attr: &str, value: &str) -> Result<()> {
        write_file(&self.line_dir(line).join(attr), value)
    }

    fn read_value(&self, line: u32) -> Result<bool> {
        let path = self.line_dir(line).join("value");
        let raw = fs::read_to_string(&path).map_err(|e| {
            TallyError::hardware(format!("read {}: {}", path.display(), e))
        })?;
        match raw.trim() {
            "0" => Ok(false),
            "1" => Ok(true),
            other => Err(TallyError::hardware(format!(
                "unexpected value '{}' in {}",
                other,
                path.display()
            ))),
        }
    }
}

impl PinDriver for SysfsPins {
    fn name(&self) -> &str {
        "sysfs"
    }

    fn set_pulls(&mut self, pins: &PinConfig) -> Result<()> {
        if pins.pulls().iter().any(|p| *p != PullMode::Off) {
            warn!(
                pulls = %pins,
                "sysfs cannot program pull resistors; relying on board/overlay defaults"
            );
        }
        for (line, pull) in pins.pulls().iter().enumerate() {
            self.active_low[line] = *pull == PullMode::Up;
        }
        Ok(())
    }

    fn read_inputs(&mut self) -> Result<[bool; LINE_COUNT]> {
        let mut values = [false; LINE_COUNT];
        for (idx, line) in self.inputs.iter().enumerate() {
            values[idx] = self.read_value(*line)? != self.active_low[idx];
        }
        Ok(values)
    }

    fn write_outputs(&mut self, values: [bool; LINE_COUNT]) -> Result<()> {
        for (line, value) in self.outputs.iter().zip(values.iter()) {
            self.write_attr(*line, "value", if *value { "1" } else { "0" })?;
        }
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        // Leave indicators dark before handing the lines back
        let mut first_err = None;
        for line in self.outputs {
            if let Err(e) = self.write_attr(line, "value", "0") {
                first_err.get_or_insert(e);
            }
        }
        if let Err(e) = self.unexport_all() {
            first_err.get_or_insert(e);
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn to_lines(lines: &[u32], what: &str) -> Result<[u32; LINE_COUNT]> {
    lines.try_into().map_err(|_| {
        TallyError::config(format!(
            "sysfs needs exactly {} {} lines, got {}",
            LINE_COUNT,
            what,
            lines.len()
        ))
    })
}

fn write_file(path: &Path, value: &str) -> Result<()> {
    fs::write(path, value)
        .map_err(|e| TallyError::hardware(format!("write {}: {}", path.display(), e)))
}
