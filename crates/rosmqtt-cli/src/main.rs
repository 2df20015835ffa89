//! `mqtt_client` – bridges a ROS bus and an MQTT broker.
//!
//! ```text
//! mqtt_client [CONFIG]        run the bridge (default ~/.rosmqtt/config.toml)
//! mqtt_client --init [PATH]   write a starter config file
//! mqtt_client --schema        print the JSON schema of the config file
//! ```
//!
//! The bridge runs until Ctrl-C, then disconnects from the broker cleanly.

mod config;
mod telemetry;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use rosmqtt_bridge::{Bridge, BridgeConfig, mqtt};
use rosmqtt_middleware::RosBus;
use rosmqtt_types::BridgeError;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// How often missing bus and broker subscriptions are retried.
const SUBSCRIPTION_RETRY: Duration = Duration::from_secs(1);

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("--schema") => return print_schema(),
        Some("--init") => return write_starter_config(args.get(1).map(String::as_str)),
        Some("--help" | "-h") => {
            print_usage();
            return ExitCode::SUCCESS;
        }
        _ => {}
    }

    let _guard = telemetry::init_tracing("mqtt_client");

    let path = config::config_path(args.first().map(String::as_str));
    let cfg = match config::load(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(path = %path.display(), error = %e, "cannot load config");
            return ExitCode::FAILURE;
        }
    };
    info!(path = %path.display(), "config loaded");
    debug!(?cfg, "effective config");

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "failed to start Tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cfg)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "bridge stopped");
            ExitCode::FAILURE
        }
    }
}

async fn run(cfg: BridgeConfig) -> Result<(), BridgeError> {
    let bus = RosBus::new();
    let (transport, eventloop) = mqtt::connect(&cfg)?;
    let bridge = Bridge::new(&cfg, Arc::new(bus), Arc::new(transport))?;

    let (shutdown_tx, mut shutdown) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);
    let ctrlc_tx = Arc::clone(&shutdown_tx);
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = ctrlc_tx.send(true);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; shutdown on Ctrl-C will not be clean");
    }

    let connection = tokio::spawn(eventloop.run(bridge.clone(), bridge.clone(), shutdown.clone()));

    let mut retry = tokio::time::interval(SUBSCRIPTION_RETRY);
    let mut pending = usize::MAX;
    loop {
        tokio::select! {
            _ = retry.tick() => {
                let now_pending = bridge.setup_subscriptions();
                if now_pending != pending {
                    if now_pending == 0 {
                        info!("all topics subscribed");
                    } else {
                        info!(pending = now_pending, "waiting for subscriptions");
                    }
                }
                pending = now_pending;
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    info!("Ctrl-C received, shutting down");
    bridge.shutdown();
    if let Err(e) = connection.await {
        warn!(error = %e, "MQTT event loop ended abnormally");
    }
    Ok(())
}

fn print_schema() -> ExitCode {
    let schema = schemars::schema_for!(BridgeConfig);
    match serde_json::to_string_pretty(&schema) {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Failed to render schema: {e}");
            ExitCode::FAILURE
        }
    }
}

fn write_starter_config(explicit: Option<&str>) -> ExitCode {
    let path = config::config_path(explicit);
    if path.exists() {
        eprintln!("Config already exists at {}, not overwriting.", path.display());
        return ExitCode::FAILURE;
    }
    match config::save_to(&config::starter_config(), &path) {
        Ok(()) => {
            println!("Config written to {}", path.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn print_usage() {
    println!("mqtt_client v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Usage:");
    println!("  mqtt_client [CONFIG]        run the bridge");
    println!("  mqtt_client --init [PATH]   write a starter config file");
    println!("  mqtt_client --schema        print the config JSON schema");
    println!();
    println!(
        "CONFIG defaults to ${} or ~/.rosmqtt/config.toml.",
        config::CONFIG_ENV
    );
}
