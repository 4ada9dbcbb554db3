//! Studio tally core
//!
//! Collects on-air tally state for a studio clock from a local discrete I/O bank
//! and from remote tally controllers over TCP, reconciles the two according to
//! the configured mode and publishes an 8-line snapshot the renderer can read
//! every frame without blocking.

pub mod config;
pub mod error;
pub mod gpio;
pub mod mediator;
pub mod remote;
pub mod shutdown;
pub mod status;
pub mod subsystem;
pub mod tally;

pub use config::{AppConfig, TallyMode};
pub use error::{Result, TallyError};
pub use shutdown::ShutdownSignal;
pub use subsystem::TallySubsystem;
pub use tally::{Provenance, TallyLine, TallyReader, TallySnapshot, LINE_COUNT};
