//! Studio tally - headless runner
//!
//! Starts the tally core from a YAML config and stands in for the clock
//! renderer: it samples the tally snapshot at the display frame rate and logs
//! every change.

use std::io::{self, BufRead, BufReader};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use studio_tally::{AppConfig, ShutdownSignal, TallyReader, TallySubsystem};

const DEFAULT_CONFIG: &str = "/etc/studio-tally.yaml";

/// Display refresh the renderer samples at
const FRAME_INTERVAL: Duration = Duration::from_millis(40);

/// How often link states are written to the log
const STATUS_INTERVAL: Duration = Duration::from_secs(30);

/// Studio Tally - GPIO and network tally for studio clocks
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (legacy positional form)
    #[arg(value_name = "CONFIG")]
    config_file: Option<String>,

    /// Path to configuration file
    #[arg(short, long, env = "STUDIO_TALLY_CONFIG")]
    config: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Also write a daily rolling log file into this directory
    #[arg(long, env = "LOG_DIR")]
    log_dir: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

impl Args {
    fn config_path(&self) -> String {
        self.config
            .clone()
            .or_else(|| self.config_file.clone())
            .unwrap_or_else(|| DEFAULT_CONFIG.to_string())
    }
}

/// What ended the run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QuitReason {
    QuitKey,
    Interrupt,
    Terminate,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let _log_guard = init_logging(&args.log_level, args.log_dir.as_deref(), args.log_json)?;

    let config_path = args.config_path();
    info!("Starting studio-tally v{}...", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", config_path);

    let config = AppConfig::load(&config_path).await?;
    info!(mode = %config.mode()?, "Configuration loaded successfully");

    let shutdown = ShutdownSignal::new();
    let tally = TallySubsystem::start(&config, None, shutdown.clone())
        .context("Failed to start tally subsystem")?;

    let renderer = tokio::spawn(run_renderer(tally.reader(), shutdown.clone()));

    let quit = wait_for_quit(spawn_quit_reader(BufReader::new(io::stdin())));
    tokio::pin!(quit);
    let mut status = tokio::time::interval(STATUS_INTERVAL);
    status.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let reason = loop {
        tokio::select! {
            reason = &mut quit => break Some(reason),
            _ = shutdown.wait() => break None,
            _ = status.tick() => {
                for (endpoint, state) in tally.session_states() {
                    info!(%endpoint, %state, "Remote tally link");
                }
            }
        }
    };
    if let Some(reason) = reason {
        info!(?reason, "Shutdown requested");
    }

    tally.shutdown().await;
    if let Err(e) = renderer.await {
        warn!("Renderer task failed: {}", e);
    }

    if reason.is_some() {
        if let Some(path) = config.clean_exit_path() {
            tokio::fs::write(&path, b"")
                .await
                .with_context(|| format!("Failed to create clean exit marker {}", path.display()))?;
            debug!("Clean exit marker written to {}", path.display());
        }
    }

    info!("studio-tally shutdown complete");
    Ok(())
}

/// Console logging plus an optional rolling file
fn init_logging(level: &str, log_dir: Option<&str>, json: bool) -> Result<Option<WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir))?;
            let appender = tracing_appender::rolling::daily(dir, "studio-tally.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let text_layer = (!json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
    });
    let json_layer = json.then(|| tracing_subscriber::fmt::layer().json());

    tracing_subscriber::registry()
        .with(filter)
        .with(text_layer)
        .with(json_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}

/// Stand-in for the clock face: sample at frame rate, log changes
async fn run_renderer(reader: TallyReader, shutdown: ShutdownSignal) {
    let mut frame = tokio::time::interval(FRAME_INTERVAL);
    frame.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut shown = None;

    loop {
        tokio::select! {
            _ = shutdown.wait() => break,
            _ = frame.tick() => {
                let snapshot = reader.current_snapshot();
                if shown != Some(snapshot) {
                    let on_air: Vec<usize> =
                        (0..studio_tally::LINE_COUNT).filter(|&l| snapshot.is_on(l)).collect();
                    info!(
                        at = %chrono::Local::now().format("%H:%M:%S%.3f"),
                        lines = %snapshot,
                        ?on_air,
                        "Tally"
                    );
                    shown = Some(snapshot);
                }
            }
        }
    }
}

/// Resolves on the first of: `q` on stdin, Ctrl-C, SIGTERM
async fn wait_for_quit(quit_key: oneshot::Receiver<()>) -> QuitReason {
    tokio::select! {
        _ = quit_key_pressed(quit_key) => QuitReason::QuitKey,
        _ = interrupt() => QuitReason::Interrupt,
        _ = terminate() => QuitReason::Terminate,
    }
}

/// Watch `input` for a `q` line on a plain OS thread
///
/// A read parked on a console cannot be cancelled. Keeping it off tokio's
/// blocking pool lets the runtime drop while the thread is still waiting.
fn spawn_quit_reader<R>(input: R) -> oneshot::Receiver<()>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    let spawned = std::thread::Builder::new()
        .name("quit-key".into())
        .spawn(move || {
            if saw_quit_key(input) {
                let _ = tx.send(());
            }
        });
    if let Err(e) = spawned {
        warn!("Failed to start quit key reader: {}", e);
    }
    rx
}

fn saw_quit_key(input: impl BufRead) -> bool {
    for line in input.lines() {
        match line {
            Ok(line) if line.trim().eq_ignore_ascii_case("q") => return true,
            Ok(_) => continue,
            Err(e) => {
                warn!("Reading stdin failed: {}", e);
                return false;
            }
        }
    }
    // No console attached (service mode): only signals can stop us
    false
}

async fn quit_key_pressed(rx: oneshot::Receiver<()>) {
    if rx.await.is_err() {
        std::future::pending::<()>().await
    }
}

async fn interrupt() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to install CTRL+C handler: {}", e);
        std::future::pending::<()>().await
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {}", e);
            std::future::pending::<()>().await
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await
}
