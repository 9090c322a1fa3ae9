//! Servo ingestion server
//!
//! Usage:
//!   servo-server --config config/servo.toml
//!   servo-server --port 0 --log-level debug --run-for-secs 30
//!
//! Binds the listener, then drains the protocol facade once per tick,
//! keeping only the newest packet (the previous one is recycled). Stops on
//! SIGINT/SIGTERM, after `--run-for-secs`, or if the listener dies.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use crossbeam_channel::{after, never, select, tick, Receiver};
use network::ListenerWorker;
use nix::sys::signal::{SigSet, Signal};
use protocol::{PacketBox, ProtocolFacade};
use servo_config::{LoggingConfig, ServoConfig};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "servo-server")]
#[command(about = "Servo TCP ingestion server")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listening port, overrides the configuration (0 for ephemeral)
    #[arg(short, long)]
    port: Option<u16>,

    /// Log filter (trace, debug, info, warn, error or an EnvFilter directive)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Enable JSON logging format
    #[arg(long)]
    json_logs: bool,

    /// Consumer tick period in milliseconds
    #[arg(long, default_value_t = 16)]
    tick_ms: u64,

    /// Exit after this many seconds
    #[arg(long)]
    run_for_secs: Option<u64>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Must happen before any thread is spawned so every thread inherits the mask
    let signals = block_shutdown_signals()?;

    let mut config = ServoConfig::load(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.listener.port = port;
    }
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    if args.json_logs {
        config.logging.json = true;
    }

    init_logging(&config.logging)?;
    config.validate()?;

    info!("Starting servo server");
    let facade = ProtocolFacade::shared(config.protocol_settings());
    let listener = ListenerWorker::create(
        config.listener_settings()?,
        Arc::clone(&facade),
        config.connection_settings(),
    )
    .context("Failed to start listener")?;
    info!(addr = %listener.local_addr(), "Servo server ready");

    let shutdown = spawn_signal_waiter(signals)?;
    run_consumer(&facade, &listener, &shutdown, &args);

    listener.kill_thread();
    let stats = facade.recycle_stats();
    info!(
        drained = facade.close(),
        accepted = listener.next_rank_id(),
        recycle_hits = stats.hits.load(Ordering::Relaxed),
        recycle_misses = stats.misses.load(Ordering::Relaxed),
        "Servo server stopped"
    );
    Ok(())
}

/// Per-tick consumer: drain everything queued and keep the newest packet
fn run_consumer(
    facade: &ProtocolFacade,
    listener: &ListenerWorker,
    shutdown: &Receiver<Signal>,
    args: &Args,
) {
    let ticker = tick(Duration::from_millis(args.tick_ms.max(1)));
    let deadline = match args.run_for_secs {
        Some(secs) => after(Duration::from_secs(secs)),
        None => never(),
    };
    let mut held: Option<PacketBox> = None;

    loop {
        select! {
            recv(shutdown) -> signal => {
                info!(signal = ?signal.ok(), "Received shutdown signal");
                break;
            }
            recv(deadline) -> _ => {
                info!("Run time elapsed");
                break;
            }
            recv(ticker) -> _ => {
                let mut drained = 0usize;
                while facade.pop_with_recycle(&mut held) {
                    drained += 1;
                }
                if drained > 0 {
                    if let Some(packet) = &held {
                        debug!(
                            drained,
                            session = packet.session_id,
                            type_id = packet.header.type_id(),
                            body = packet.body.len(),
                            timestamp = packet.timestamp(),
                            connections = listener.connection_count(),
                            "Newest packet"
                        );
                    }
                }
                if listener.is_exited() {
                    error!("Listener exited unexpectedly");
                    break;
                }
            }
        }
    }

    if let Some(packet) = held.take() {
        facade.dealloc_net_packet(packet, false);
    }
}

fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_new(&logging.level)
        .with_context(|| format!("Invalid log filter '{}'", logging.level))?;

    let result = if logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_thread_names(true)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_thread_names(true)
            .try_init()
    };
    result.map_err(|e| anyhow!("Failed to initialise logging: {e}"))
}

fn shutdown_signals() -> SigSet {
    let mut set = SigSet::empty();
    set.add(Signal::SIGINT);
    set.add(Signal::SIGTERM);
    set
}

fn block_shutdown_signals() -> Result<SigSet> {
    let set = shutdown_signals();
    set.thread_block().context("Failed to block shutdown signals")?;
    Ok(set)
}

fn spawn_signal_waiter(signals: SigSet) -> Result<Receiver<Signal>> {
    let (tx, rx) = crossbeam_channel::bounded(1);
    thread::Builder::new()
        .name("servo-signals".to_string())
        .spawn(move || match signals.wait() {
            Ok(signal) => {
                let _ = tx.send(signal);
            }
            Err(e) => error!(error = %e, "Signal wait failed"),
        })
        .context("Failed to spawn signal thread")?;
    Ok(rx)
}
