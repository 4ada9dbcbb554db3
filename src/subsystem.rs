//! Tally subsystem context
//!
//! Builds the pin poller, session pool and mediator from an [`AppConfig`] and
//! tears them down in order. Only configuration errors are fatal here: a pin
//! bank that fails to open disables the GPIO side and the rest keeps running.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::{AppConfig, TallyMode};
use crate::error::Result;
use crate::gpio::{open_driver, spawn_poller, PinBridge, PinEvent, PinHandle, SimulatedPins};
use crate::mediator::TallyMediator;
use crate::remote::{EndpointId, SessionPool, SessionState};
use crate::shutdown::ShutdownSignal;
use crate::status::LinkActivity;
use crate::tally::{TallyReader, TallySnapshot};

/// Time each component gets to stop before being abandoned
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

const PIN_EVENT_CAPACITY: usize = 64;

/// Everything the tally side needs, started and owned in one place
pub struct TallySubsystem {
    mode: TallyMode,
    reader: TallyReader,
    shutdown: ShutdownSignal,
    pins: Option<PinHandle>,
    pool: Option<SessionPool>,
    mediator: JoinHandle<()>,
}

impl TallySubsystem {
    /// Validate `config` and start every component the mode needs
    ///
    /// `simulated` supplies the pin bank when the variant is `simulated`, so
    /// the caller can keep driving its inputs.
    pub fn start(
        config: &AppConfig,
        simulated: Option<SimulatedPins>,
        shutdown: ShutdownSignal,
    ) -> Result<Self> {
        config.validate()?;
        let mode = config.mode()?;
        let pulls = config.pin_config()?;

        let mut pin_events = None;
        let wants_pins = mode.uses_gpio() || (mode == TallyMode::TcpOnly && config.mirror_outputs);
        let pins = if wants_pins {
            let opened = open_driver(config, simulated).and_then(|driver| {
                let mut bridge = PinBridge::new(driver);
                bridge.configure(&pulls)?;
                Ok(bridge)
            });
            match opened {
                Ok(bridge) => {
                    let (tx, rx) = mpsc::channel::<PinEvent>(PIN_EVENT_CAPACITY);
                    pin_events = Some(rx);
                    Some(spawn_poller(bridge, config.poll_interval(), tx, shutdown.clone()))
                }
                Err(e) => {
                    warn!("GPIO tally disabled: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let (pool, inbound) = if mode.uses_tcp() {
            let (pool, inbound) =
                SessionPool::start(config.endpoints(), config.session_settings(), shutdown.clone());
            (Some(pool), Some(inbound))
        } else {
            (None, None)
        };

        let mediator = TallyMediator::new(
            mode,
            pins.as_ref().map(PinHandle::outputs),
            pool.as_ref().map(SessionPool::broadcaster),
        );
        let reader = mediator.reader();
        let mediator = mediator.spawn(pin_events, inbound, shutdown.clone());

        info!(
            %mode,
            gpio = pins.is_some(),
            remotes = pool.as_ref().map(SessionPool::len).unwrap_or(0),
            "Tally subsystem started"
        );

        Ok(Self {
            mode,
            reader,
            shutdown,
            pins,
            pool,
            mediator,
        })
    }

    pub fn mode(&self) -> TallyMode {
        self.mode
    }

    /// Wait-free read handle for the renderer
    pub fn reader(&self) -> TallyReader {
        self.reader.clone()
    }

    pub fn current_snapshot(&self) -> TallySnapshot {
        self.reader.current_snapshot()
    }

    pub fn gpio_active(&self) -> bool {
        self.pins.as_ref().is_some_and(PinHandle::is_running)
    }

    /// Per-remote state for diagnostics; empty without TCP
    pub fn session_states(&self) -> Vec<(EndpointId, SessionState)> {
        self.pool
            .as_ref()
            .map(SessionPool::session_states)
            .unwrap_or_default()
    }

    pub fn link_activity(&self) -> Option<Arc<LinkActivity>> {
        self.pool.as_ref().map(SessionPool::activity)
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Stop every task; returns once hardware is released and sockets closed
    pub async fn shutdown(self) {
        self.shutdown.trigger();

        if let Some(pins) = self.pins {
            if tokio::time::timeout(SHUTDOWN_GRACE, pins.join()).await.is_err() {
                warn!("GPIO poller did not stop in time");
            }
        }
        if let Some(pool) = self.pool {
            pool.shutdown(SHUTDOWN_GRACE).await;
        }
        match tokio::time::timeout(SHUTDOWN_GRACE, self.mediator).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Tally mediator task failed: {}", e),
            Err(_) => warn!("Tally mediator did not stop in time"),
        }
        info!("Tally subsystem stopped");
    }
}
