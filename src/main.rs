use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tokengate::config::{CliArgs, GateConfig, LogFormat, LoggingConfig};
use tokengate::http::{ServerLifecycle, ShutdownOutcome};
use tokengate::ratelimit::TokenBucket;
use tokengate::shutdown::{spawn_input_watcher, wait_for_termination};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliArgs::parse();

    let mut config =
        GateConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    config.apply_cli(&cli);

    // Initialize tracing
    init_tracing(&config.logging);

    config.validate().context("Invalid configuration")?;

    info!("Starting Tokengate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        listen_addr = %config.server.listen_addr,
        rate = config.bucket.rate,
        capacity = config.bucket.capacity,
        "Configuration loaded"
    );

    let bucket = Arc::new(TokenBucket::new(config.bucket.capacity, config.bucket.rate)?);
    info!(
        capacity = bucket.capacity(),
        refill_rate = bucket.refill_rate(),
        "Rate limiter initialized"
    );

    let mut server = ServerLifecycle::new(config.server.listen_addr.clone(), Arc::clone(&bucket));
    let mut server_errors = server.start()?;

    let input = if config.server.interactive_cancel {
        info!("Press Enter or send SIGINT/SIGTERM to stop the server");
        Some(spawn_input_watcher(std::io::stdin()))
    } else {
        info!("Send SIGINT/SIGTERM to stop the server");
        None
    };

    tokio::select! {
        _ = wait_for_termination(input) => {}
        Some(err) = server_errors.recv() => {
            error!(error = %err, "Error starting the server");
            return Err(err).context("HTTP server failed");
        }
    }

    let outcome = server.shutdown().await;
    let snapshot = bucket.snapshot();
    match outcome {
        ShutdownOutcome::Clean => info!(
            tokens = snapshot.tokens,
            capacity = snapshot.capacity,
            "Tokengate stopped"
        ),
        ShutdownOutcome::Forced => warn!(
            tokens = snapshot.tokens,
            capacity = snapshot.capacity,
            "Tokengate stopped with requests still in flight"
        ),
    }

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}
