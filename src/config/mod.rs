//! Configuration management for the tally core
//!
//! Loads and validates the YAML settings file. Option names and defaults follow
//! the legacy clock settings (`tally_mode`, `gpio_pulls`, `tally_remote_host`,
//! ...) so existing deployments can keep their values.

pub mod mode;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;

use crate::error::TallyError;
use crate::gpio::PinConfig;
use crate::remote::{BackoffPolicy, RemoteEndpoint, SessionSettings};

pub use mode::TallyMode;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Bitmask: bit0 = GPIO, bit1 = TCP
    #[serde(default)]
    pub tally_mode: u8,
    #[serde(default, alias = "gpio_mode")]
    pub gpio_variant: GpioVariant,
    #[serde(default = "default_gpio_pulls")]
    pub gpio_pulls: String,
    #[serde(default, alias = "tally_remote_host")]
    pub tally_remote_hosts: Vec<String>,
    #[serde(default = "default_remote_port")]
    pub tally_remote_port: ServiceSpec,
    #[serde(default = "default_shared_secret")]
    pub tally_shared_secret: String,
    /// Created on a clean (user requested) exit. Empty disables the marker.
    #[serde(default = "default_clean_exit_file")]
    pub clean_exit_file: String,
    /// In TCP-only mode, also drive the output bank as a local indicator
    #[serde(default)]
    pub mirror_outputs: bool,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub sysfs: SysfsConfig,
}

/// Which discrete I/O board backs the pin bank
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case", try_from = "RawGpioVariant")]
pub enum GpioVariant {
    /// PiFace Digital expansion board (legacy default)
    #[default]
    Piface,
    /// Raspberry Pi header lines through sysfs
    RaspberryPi,
    /// In-memory bank, for bench testing without hardware
    Simulated,
}

/// Accepts both the legacy integer selector and a name
#[derive(Deserialize)]
#[serde(untagged)]
enum RawGpioVariant {
    Code(u8),
    Name(String),
}

impl TryFrom<RawGpioVariant> for GpioVariant {
    type Error = String;

    fn try_from(raw: RawGpioVariant) -> std::result::Result<Self, Self::Error> {
        match raw {
            RawGpioVariant::Code(0) => Ok(GpioVariant::Piface),
            RawGpioVariant::Code(1) => Ok(GpioVariant::RaspberryPi),
            RawGpioVariant::Code(n) => Err(format!("unknown gpio variant {}", n)),
            RawGpioVariant::Name(name) => match name.to_ascii_lowercase().as_str() {
                "piface" => Ok(GpioVariant::Piface),
                "raspberry_pi" | "raspberrypi" | "rpi" => Ok(GpioVariant::RaspberryPi),
                "simulated" | "sim" => Ok(GpioVariant::Simulated),
                other => Err(format!("unknown gpio variant '{}'", other)),
            },
        }
    }
}

/// Port number or service name (`6254` or `"tally"`)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ServiceSpec {
    Port(u16),
    Name(String),
}

impl std::fmt::Display for ServiceSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceSpec::Port(port) => write!(f, "{}", port),
            ServiceSpec::Name(name) => write!(f, "{}", name),
        }
    }
}

/// Timers for polling, heartbeats and reconnects (all in milliseconds)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimingConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,
    /// Missing heartbeats tolerated before the link is declared dead
    #[serde(default = "default_idle_multiplier")]
    pub idle_multiplier: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_ms: u64,
    #[serde(default = "default_backoff_min")]
    pub backoff_min_ms: u64,
    #[serde(default = "default_backoff_max")]
    pub backoff_max_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            heartbeat_interval_ms: default_heartbeat_interval(),
            idle_multiplier: default_idle_multiplier(),
            connect_timeout_ms: default_connect_timeout(),
            handshake_timeout_ms: default_handshake_timeout(),
            backoff_min_ms: default_backoff_min(),
            backoff_max_ms: default_backoff_max(),
        }
    }
}

/// Line numbers for the sysfs backend (BCM numbering)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SysfsConfig {
    #[serde(default = "default_sysfs_root")]
    pub root: PathBuf,
    #[serde(default = "default_input_lines")]
    pub input_lines: Vec<u32>,
    #[serde(default = "default_output_lines")]
    pub output_lines: Vec<u32>,
}

impl Default for SysfsConfig {
    fn default() -> Self {
        Self {
            root: default_sysfs_root(),
            input_lines: default_input_lines(),
            output_lines: default_output_lines(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file with validation
    pub async fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config = Self::from_yaml(&contents)
            .with_context(|| format!("Failed to load config: {}", path))?;

        Ok(config)
    }

    /// Parse and validate a YAML document
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: AppConfig =
            serde_yaml::from_str(contents).context("Failed to parse YAML config")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration for correctness and consistency
    pub fn validate(&self) -> std::result::Result<(), TallyError> {
        let mode = self.mode()?;

        // Pulls are parsed even when GPIO is off so a typo surfaces early
        self.pin_config()?;

        if mode.uses_tcp() {
            if self.tally_remote_hosts.is_empty() {
                return Err(TallyError::config(format!(
                    "tally_mode {} needs at least one tally_remote_host",
                    self.tally_mode
                )));
            }
            if let Some(idx) = self.tally_remote_hosts.iter().position(|h| h.trim().is_empty()) {
                return Err(TallyError::config(format!(
                    "tally_remote_host #{} is empty",
                    idx
                )));
            }
            if self.tally_shared_secret.is_empty() {
                return Err(TallyError::config("tally_shared_secret cannot be empty"));
            }
            if let ServiceSpec::Name(name) = &self.tally_remote_port {
                if name.trim().is_empty() {
                    return Err(TallyError::config("tally_remote_port cannot be empty"));
                }
            }
        }

        let t = &self.timing;
        if t.poll_interval_ms == 0 || t.heartbeat_interval_ms == 0 {
            return Err(TallyError::config("poll and heartbeat intervals must be > 0"));
        }
        if t.idle_multiplier < 2 {
            return Err(TallyError::config(format!(
                "idle_multiplier {} is too small (must be >= 2)",
                t.idle_multiplier
            )));
        }
        if t.backoff_min_ms == 0 || t.backoff_min_ms > t.backoff_max_ms {
            return Err(TallyError::config(format!(
                "backoff range {}..{}ms is invalid",
                t.backoff_min_ms, t.backoff_max_ms
            )));
        }

        if mode.uses_gpio() && self.gpio_variant == GpioVariant::RaspberryPi {
            let lines = crate::tally::LINE_COUNT;
            if self.sysfs.input_lines.len() != lines || self.sysfs.output_lines.len() != lines {
                return Err(TallyError::config(format!(
                    "sysfs needs exactly {} input and {} output lines",
                    lines, lines
                )));
            }
        }

        Ok(())
    }

    pub fn mode(&self) -> std::result::Result<TallyMode, TallyError> {
        TallyMode::from_bits(self.tally_mode)
    }

    pub fn pin_config(&self) -> std::result::Result<PinConfig, TallyError> {
        self.gpio_pulls.parse()
    }

    /// One endpoint per configured remote host
    pub fn endpoints(&self) -> Vec<RemoteEndpoint> {
        self.tally_remote_hosts
            .iter()
            .map(|host| {
                RemoteEndpoint::new(
                    host.trim(),
                    self.tally_remote_port.to_string(),
                    self.tally_shared_secret.clone(),
                )
            })
            .collect()
    }

    pub fn session_settings(&self) -> SessionSettings {
        let t = &self.timing;
        let backoff_max = Duration::from_millis(t.backoff_max_ms);
        SessionSettings {
            connect_timeout: Duration::from_millis(t.connect_timeout_ms),
            handshake_timeout: Duration::from_millis(t.handshake_timeout_ms),
            heartbeat_interval: Duration::from_millis(t.heartbeat_interval_ms),
            idle_multiplier: t.idle_multiplier,
            backoff: BackoffPolicy::new(Duration::from_millis(t.backoff_min_ms), backoff_max),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.timing.poll_interval_ms)
    }

    /// Marker path, if enabled
    pub fn clean_exit_path(&self) -> Option<PathBuf> {
        if self.clean_exit_file.is_empty() {
            None
        } else {
            Some(PathBuf::from(&self.clean_exit_file))
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            tally_mode: 0,
            gpio_variant: GpioVariant::default(),
            gpio_pulls: default_gpio_pulls(),
            tally_remote_hosts: Vec::new(),
            tally_remote_port: default_remote_port(),
            tally_shared_secret: default_shared_secret(),
            clean_exit_file: default_clean_exit_file(),
            mirror_outputs: false,
            timing: TimingConfig::default(),
            sysfs: SysfsConfig::default(),
        }
    }
}

// Default value functions
fn default_gpio_pulls() -> String { "UUUUUUUU".to_string() }
fn default_remote_port() -> ServiceSpec { ServiceSpec::Port(6254) }
fn default_shared_secret() -> String { "SharedSecretGoesHere".to_string() }
fn default_clean_exit_file() -> String { "/tmp/piclock_clean_exit".to_string() }
fn default_poll_interval() -> u64 { 20 }
fn default_heartbeat_interval() -> u64 { 2_000 }
fn default_idle_multiplier() -> u32 { 3 }
fn default_connect_timeout() -> u64 { 5_000 }
fn default_handshake_timeout() -> u64 { 5_000 }
fn default_backoff_min() -> u64 { 500 }
fn default_backoff_max() -> u64 { 30_000 }
fn default_sysfs_root() -> PathBuf { PathBuf::from("/sys/class/gpio") }
fn default_input_lines() -> Vec<u32> { vec![4, 17, 27, 22, 5, 6, 13, 19] }
fn default_output_lines() -> Vec<u32> { vec![18, 23, 24, 25, 12, 16, 20, 21] }
