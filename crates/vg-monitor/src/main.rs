//! Vigil monitor daemon
//!
//! Registers the configured targets, keeps their connections alive and
//! reports state changes until interrupted.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vg_core::config::{self, MonitorConfig, TargetConfig};
use vg_core::settings::FileSettings;
use vg_core::traits::{CredentialPrompt, InsecureRetryPrompt};
use vg_monitor::prompt::{NonInteractivePrompt, TerminalPrompt};
use vg_monitor::{EventBus, MonitorEvent, MonitorState, TcpDescriptor};

#[derive(Parser)]
#[command(name = "vigil")]
#[command(about = "Keeps management connections to remote processes alive")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Additional target to monitor (host:port or service URL)
    #[arg(short, long = "target", value_name = "CONNECTION")]
    targets: Vec<String>,

    /// Prompt on the terminal for credentials and insecure retries
    #[arg(short, long)]
    interactive: bool,

    /// Print events as JSON lines on stdout
    #[arg(long)]
    json_events: bool,

    /// Run in foreground with verbose output
    #[arg(short, long)]
    foreground: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", env = "VIGIL_LOG")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.foreground { "debug" } else { &args.log_level };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("Vigil starting...");

    let mut config = load_config(args.config.as_ref())?;
    config.interactive |= args.interactive;
    config
        .targets
        .extend(args.targets.iter().map(|c| TargetConfig::new(c.as_str())));
    config.validate().context("Invalid configuration")?;

    if config.targets.is_empty() {
        tracing::warn!("No targets configured; add some with --target or in the config file");
    }

    let settings = FileSettings::open(&config.settings_path)
        .with_context(|| format!("Failed to open settings at {:?}", config.settings_path))?;

    let (credential_prompt, insecure_prompt): (
        Arc<dyn CredentialPrompt>,
        Arc<dyn InsecureRetryPrompt>,
    ) = if config.interactive {
        let prompt = Arc::new(TerminalPrompt::new());
        (Arc::clone(&prompt) as Arc<dyn CredentialPrompt>, prompt)
    } else {
        (Arc::new(NonInteractivePrompt), Arc::new(NonInteractivePrompt))
    };

    let descriptor = Arc::new(TcpDescriptor::new(config.connect_timeout));
    let state = MonitorState::new(
        config,
        Arc::new(settings),
        credential_prompt,
        insecure_prompt,
        descriptor,
    );

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let reporter = tokio::spawn(report_events(
        state.events.clone(),
        args.json_events,
        cancel.clone(),
    ));

    state.start().context("Failed to start heartbeat")?;
    tracing::info!("Monitoring {} targets", state.targets.len());

    cancel.cancelled().await;

    state.shutdown().await;
    let _ = reporter.await;

    tracing::info!("Vigil shutdown complete");
    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> Result<MonitorConfig> {
    if let Some(config_path) = path {
        return config::load_config(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path));
    }

    let default_path = config::default_config_path();
    if default_path.exists() {
        Ok(config::load_config(&default_path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config from {:?}: {}", default_path, e);
            MonitorConfig::default()
        }))
    } else {
        tracing::info!("Using default configuration");
        Ok(MonitorConfig::default())
    }
}

fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        cancel.cancel();
    });
}

/// Log every event, or print it as a JSON line
async fn report_events(events: EventBus, json: bool, cancel: CancellationToken) {
    let mut rx = events.subscribe();
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = rx.recv() => event,
        };

        match event {
            Ok(event) if json => match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => tracing::warn!("Failed to serialize event: {}", e),
            },
            Ok(event) => log_event(&event),
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!("Event reporter fell behind, skipped {} events", skipped);
            }
            Err(RecvError::Closed) => break,
        }
    }
}

fn log_event(event: &MonitorEvent) {
    match event {
        MonitorEvent::TargetStateChanged {
            target,
            old,
            new,
            explicit,
        } => {
            tracing::info!("Target {}: {} -> {} (explicit: {})", target, old, new, explicit);
        }
        MonitorEvent::ConnectionStateChanged { target, old, new } => {
            tracing::debug!("Connection {}: {} -> {}", target, old, new);
        }
        MonitorEvent::TargetRegistered { target } => {
            tracing::debug!("Target registered: {}", target);
        }
        MonitorEvent::TargetRemoved { target } => {
            tracing::debug!("Target removed: {}", target);
        }
        MonitorEvent::SweepStarted { targets } => {
            tracing::debug!("Sweep started over {} targets", targets.len());
        }
        MonitorEvent::SweepFinished { unresolved } => {
            tracing::debug!("Sweep finished, {} unresolved", unresolved.len());
        }
        MonitorEvent::FallbackScheduled { targets } => {
            tracing::debug!("{} targets handed to the lazy sweep", targets.len());
        }
    }
}
