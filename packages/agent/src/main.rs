//! Entry point.
//!
//! Argument parsing, `--check`, and `--daemon` all happen on plain `std`
//! before any Tokio runtime exists — daemonizing forks the process, and
//! forking a multi-threaded async runtime is unsound, so `main` cannot be
//! `#[tokio::main]`.

use std::process::ExitCode;
use std::sync::Arc;

use ngfw_agent::adapters::{self, SubsystemAdapter};
use ngfw_agent::config::{AgentConfig, DEFAULT_BASE_DIR};
use ngfw_agent::connection::{connection_loop, ConnectionOutcome, ConnectionState};
use ngfw_agent::dispatcher::{dispatcher_loop, Dispatcher};
use ngfw_agent::rollback::RollbackStore;
use ngfw_agent::{collector, daemon, mode, ControlEvent};
use ngfw_protocol::ConfigSection;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{error, info, warn};

const OUTBOUND_CAPACITY: usize = 256;
const INBOUND_CAPACITY: usize = 256;
const CONTROL_CAPACITY: usize = 256;

struct Args {
    config_path: Option<String>,
    check: bool,
    daemon: bool,
}

fn parse_args() -> Args {
    let raw: Vec<String> = std::env::args().collect();
    let config_path = raw
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| raw.get(i + 1))
        .cloned();
    let check = raw.iter().any(|a| a == "--check");
    let daemon = raw.iter().any(|a| a == "--daemon");
    Args { config_path, check, daemon }
}

fn main() -> ExitCode {
    let args = parse_args();
    let config_path = AgentConfig::resolve_path(args.config_path.as_deref());

    if args.check {
        return match AgentConfig::load(&config_path) {
            Ok(config) => {
                println!("config ok: device_id={}", config.agent.device_id);
                ExitCode::SUCCESS
            }
            Err(err) => {
                eprintln!("config invalid: {err}");
                ExitCode::from(2)
            }
        };
    }

    let config = match AgentConfig::load(&config_path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to load config from {config_path}: {err}");
            return ExitCode::from(2);
        }
    };

    let pid_file = format!("{DEFAULT_BASE_DIR}/agent.pid");

    if args.daemon {
        if let Err(err) = daemon::daemonize(&pid_file) {
            eprintln!("failed to daemonize: {err}");
            return ExitCode::from(1);
        }
    }

    init_tracing(&config);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("failed to start async runtime: {err}");
            return ExitCode::from(1);
        }
    };

    let outcome = runtime.block_on(run(config));

    if args.daemon {
        daemon::remove_pid_file(&pid_file);
    }

    match outcome {
        RunOutcome::Graceful => ExitCode::SUCCESS,
        RunOutcome::PermanentAuthFailure => ExitCode::from(3),
    }
}

fn init_tracing(config: &AgentConfig) {
    let default_level = config.agent.log_level.as_deref().unwrap_or("info");
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

enum RunOutcome {
    Graceful,
    PermanentAuthFailure,
}

async fn run(config: AgentConfig) -> RunOutcome {
    info!(
        version = %ngfw_agent::connection::agent_version(),
        built = env!("BUILD_TIMESTAMP"),
        device_id = %config.agent.device_id,
        "ngfw-agent starting"
    );

    let base_dir = std::path::PathBuf::from(DEFAULT_BASE_DIR);

    let (control_tx, _) = broadcast::channel::<ControlEvent>(CONTROL_CAPACITY);
    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
    let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

    let persisted_mode = match mode::load_persisted_mode(&base_dir).await {
        Ok(mode_config) => mode_config,
        Err(err) => {
            error!(error = %err, "failed to load persisted mode, starting in observe");
            ngfw_protocol::ModeConfig::default()
        }
    };
    let mode_engine = Arc::new(mode::ModeEngine::new(base_dir.clone(), persisted_mode, control_tx.clone()));

    let rollback = RollbackStore::new(base_dir.clone());
    let pending_sections = rollback.pending_sections().await;

    let adapters: Arc<std::collections::HashMap<ConfigSection, Box<dyn SubsystemAdapter>>> =
        Arc::new(adapters::build_registry(&config.adapters));

    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&adapters),
        rollback,
        Arc::clone(&mode_engine),
        outbound_tx.clone(),
    ));

    if !pending_sections.is_empty() {
        let dispatcher = Arc::clone(&dispatcher);
        let mut state_rx = state_rx.clone();
        tokio::spawn(async move {
            if state_rx.wait_for(|s| *s == ConnectionState::Connected).await.is_err() {
                return;
            }
            for section in pending_sections {
                dispatcher.alert_pending_rollback(section).await;
            }
        });
    }

    let metrics_interval = std::time::Duration::from_secs(config.agent.metrics_interval_secs);

    let connection_handle = tokio::spawn(connection_loop(
        config,
        outbound_rx,
        inbound_tx,
        state_tx,
        control_tx.subscribe(),
    ));

    let dispatcher_handle = tokio::spawn(dispatcher_loop(dispatcher, inbound_rx, control_tx.subscribe()));

    let collector_handle = tokio::spawn(collector::metrics_loop(
        adapters,
        metrics_interval,
        outbound_tx,
        state_rx,
        control_tx.subscribe(),
    ));

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, broadcasting to all subsystems");
    let _ = control_tx.send(ControlEvent::Shutdown);

    let connection_outcome = connection_handle.await.unwrap_or_else(|err| {
        warn!(error = %err, "connection task panicked");
        ConnectionOutcome::Stopped
    });

    if let Err(err) = dispatcher_handle.await {
        warn!(error = %err, "dispatcher task panicked");
    }
    if let Err(err) = collector_handle.await {
        warn!(error = %err, "collector task panicked");
    }

    info!("all subsystems joined, exiting");

    match connection_outcome {
        ConnectionOutcome::Stopped => RunOutcome::Graceful,
        ConnectionOutcome::PermanentAuthFailure => RunOutcome::PermanentAuthFailure,
    }
}

/// Wait for either Ctrl-C or SIGTERM, whichever arrives first.
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler, only Ctrl-C will trigger shutdown");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
