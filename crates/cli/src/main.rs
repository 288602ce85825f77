mod config_commands;
mod credential_commands;

use {
    anyhow::Context,
    chatrelay_gateway::{AppState, BusLogLayer, Relay, build_router},
    clap::{Parser, Subcommand},
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "chatrelay", about = "chatrelay: one event bus for live chat platforms")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Address for the operator API (overrides config value).
    #[arg(long, global = true)]
    bind: Option<String>,
    /// Port for the operator API (overrides config value).
    #[arg(long, global = true)]
    port: Option<u16>,
    /// Custom config directory (overrides default ~/.config/chatrelay/).
    #[arg(long, global = true, env = "CHATRELAY_CONFIG_DIR")]
    config_dir: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay (default when no subcommand is provided).
    Run,
    /// Manage stored platform credentials.
    Credentials {
        #[command(subcommand)]
        action: credential_commands::CredentialAction,
    },
    /// Configuration helpers.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
}

/// Initialise tracing. `bus_layer` forwards warnings onto the event bus once
/// the relay attaches its sink.
fn init_telemetry(cli: &Cli, bus_layer: Option<BusLogLayer>) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .with(bus_layer)
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .with(bus_layer)
            .init();
    }
}

#[cfg(feature = "metrics")]
fn init_metrics(
    config: &chatrelay_config::RelayConfig,
) -> anyhow::Result<Option<chatrelay_metrics::MetricsHandle>> {
    let handle = chatrelay_metrics::init_metrics(chatrelay_metrics::MetricsRecorderConfig {
        enabled: config.metrics.enabled,
        global_labels: config
            .metrics
            .labels
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    })?;
    Ok((config.metrics.enabled && config.metrics.prometheus_endpoint).then_some(handle))
}

/// Resolves when the operator asks the relay to re-read its config file.
#[cfg(unix)]
async fn reload_requested(
    hangup: &mut Option<tokio::signal::unix::Signal>,
) -> Option<()> {
    match hangup {
        Some(signal) => signal.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(not(unix))]
async fn reload_requested(_hangup: &mut Option<()>) -> Option<()> {
    std::future::pending().await
}

async fn run(cli: Cli, sink: chatrelay_gateway::BusLogSink) -> anyhow::Result<()> {
    let config = chatrelay_config::discover_and_load();
    let bind = cli.bind.clone().unwrap_or_else(|| config.server.bind.clone());
    let port = cli.port.unwrap_or(config.server.port);

    #[cfg(feature = "metrics")]
    let metrics = init_metrics(&config)?;

    let relay = Relay::builder().log_sink(sink).build(config);
    let state = AppState::from_relay(&relay);
    #[cfg(feature = "metrics")]
    let state = match metrics {
        Some(handle) => state.with_metrics(handle),
        None => state,
    };

    let addr = format!("{bind}:{port}");
    let listener = chatrelay_gateway::bind(&addr).await?;
    let shutdown = CancellationToken::new();
    let server = tokio::spawn(chatrelay_gateway::serve(
        listener,
        build_router(state),
        shutdown.clone(),
    ));

    relay.autostart();

    #[cfg(unix)]
    let mut hangup =
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup()) {
            Ok(signal) => Some(signal),
            Err(e) => {
                warn!(error = %e, "config reload on SIGHUP unavailable");
                None
            },
        };
    #[cfg(not(unix))]
    let mut hangup: Option<()> = None;

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("failed to listen for ctrl-c")?;
                info!("shutdown requested");
                break;
            },
            Some(()) = reload_requested(&mut hangup) => match relay.reload() {
                Ok(keys) => info!(changed = keys.len(), "config reloaded"),
                Err(e) => warn!(error = %e, "config reload failed, keeping current config"),
            },
        }
    }

    shutdown.cancel();
    match server.await {
        Ok(Ok(())) => {},
        Ok(Err(e)) => warn!(error = %e, "operator api ended with an error"),
        Err(e) => warn!(error = %e, "operator api task failed"),
    }
    relay.teardown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let mut cli = Cli::parse();

    // Only a running relay has a bus to forward log records to.
    let (bus_layer, sink) = if matches!(cli.command, None | Some(Commands::Run)) {
        let (layer, sink) = BusLogLayer::new();
        (Some(layer), Some(sink))
    } else {
        (None, None)
    };
    init_telemetry(&cli, bus_layer);

    if let Some(ref dir) = cli.config_dir {
        chatrelay_config::set_config_dir(dir.clone());
    }

    match cli.command.take() {
        None | Some(Commands::Run) => {
            info!(version = env!("CARGO_PKG_VERSION"), "chatrelay starting");
            run(cli, sink.unwrap_or_default()).await
        },
        Some(Commands::Credentials { action }) => {
            credential_commands::handle_credentials(action).await
        },
        Some(Commands::Config { action }) => config_commands::handle_config(action),
    }
}
