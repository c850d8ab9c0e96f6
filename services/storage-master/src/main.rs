// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Storage Master Service
//!
//! The storage master keeps track of storage agents and the volumes they
//! serve, and places data bundles on them. It:
//!
//! - Accepts agent registrations and probes each agent's status endpoint
//! - Allocates bundles on local, shared or overflow volumes
//! - Resolves bundles and paths to the agent serving them right now
//! - Deletes bundles on their agent before dropping the metadata

use anyhow::{Context, Result};
use dropshot::{ConfigDropshot, ConfigLogging, ConfigLoggingLevel, HttpServerStarter};
use tokio::sync::watch;
use tracing::info;

use storage_master::StorageMasterImpl;
use storage_master::config::{DEFAULT_BIND_ADDRESS, MasterConfig};
use storage_master::context::ApiContext;

/// Default maximum request body size (bytes).
const DEFAULT_BODY_MAX_BYTES: usize = 1024 * 1024;

fn print_version() {
    let version = env!("CARGO_PKG_VERSION");
    let name = env!("CARGO_PKG_NAME");
    let buildstamp = option_env!("STAMP").unwrap_or("no-STAMP");
    println!("{} {} ({})", name, version, buildstamp);
}

#[tokio::main]
async fn main() -> Result<()> {
    // Handle --version and --help
    let args: Vec<String> = std::env::args().collect();
    #[allow(clippy::never_loop)] // Intentional: early return on first recognized arg
    for arg in &args[1..] {
        match arg.as_str() {
            "-V" | "--version" => {
                print_version();
                return Ok(());
            }
            "-h" | "--help" => {
                print_version();
                println!("Usage: {} [OPTIONS]", args[0]);
                println!();
                println!("Options:");
                println!("  -h, --help       Display this information");
                println!("  -V, --version    Display the program's version number");
                println!();
                println!("Environment variables:");
                println!(
                    "  BIND_ADDRESS                   Server bind address (default: {})",
                    DEFAULT_BIND_ADDRESS
                );
                println!("  AGENT_PING_PERIOD_SECS         Seconds between agent probes (default: 5)");
                println!(
                    "  AGENT_INITIAL_PING_DELAY_SECS  Delay before an agent's first probe (default: 0)"
                );
                println!(
                    "  AGENT_FAILURE_TRIP_THRESHOLD   Failed probes before disconnect (default: 3)"
                );
                println!("  AGENT_PROBE_TIMEOUT_SECS       Status probe timeout (default: 3)");
                println!("  AGENT_REQUEST_TIMEOUT_SECS     Agent delete timeout (default: 30)");
                println!(
                    "  OVERFLOW_ROOT_DIR              Overflow volume root (default: {})",
                    storage_master::config::DEFAULT_OVERFLOW_ROOT_DIR
                );
                println!("  BUNDLE_PATH_PREFIX             Prefix for bundle paths (default: empty)");
                println!("  ADMIN_SUBJECTS                 Comma-separated admin subject keys");
                println!(
                    "  CONFIG_FILE                    Path to JSON config file for SIGUSR1 reloading (optional)"
                );
                println!(
                    "  RUST_LOG                       Log filter (default: storage_master=info,dropshot=info)"
                );
                return Ok(());
            }
            _ => {
                eprintln!("Unknown option: {}", arg);
                std::process::exit(1);
            }
        }
    }

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "storage_master=info,dropshot=info".to_string()),
        ))
        .init();

    print_version();
    storage_master::agent_client::install_crypto_provider();
    storage_master::metrics::register_metrics();

    // Load configuration
    let config = MasterConfig::from_env().context("Failed to load configuration")?;
    info!(
        ping_period_secs = config.agent_ping_period_secs,
        trip_threshold = config.agent_failure_trip_threshold,
        overflow_root_dir = %config.overflow_root_dir,
        "Loaded configuration"
    );

    let (config_tx, config_rx) = watch::channel(config.clone());

    // Start config file watcher if CONFIG_FILE is set (Unix only)
    #[cfg(unix)]
    if let Ok(config_file) = std::env::var("CONFIG_FILE") {
        use std::path::PathBuf;

        let config_path = PathBuf::from(&config_file);
        if tokio::fs::try_exists(&config_path).await.unwrap_or(false) {
            tokio::spawn(MasterConfig::start_config_watcher(
                config_path,
                config.clone(),
                config_tx,
            ));
            info!(
                config_file = %config_file,
                "Config watcher started - send SIGUSR1 to reload"
            );
        } else {
            tracing::warn!(
                config_file = %config_file,
                "CONFIG_FILE specified but file does not exist, config reloading disabled"
            );
        }
    }

    // Create API context
    let api_context = ApiContext::new(config_rx).context("Failed to create API context")?;

    // Get API description from the trait implementation
    let api = storage_master_api::storage_master_api_mod::api_description::<StorageMasterImpl>()
        .map_err(|e| anyhow::anyhow!("Failed to create API description: {}", e))?;

    // Configure the server
    let bind_address = std::env::var("BIND_ADDRESS")
        .unwrap_or_else(|_| DEFAULT_BIND_ADDRESS.to_string())
        .parse()
        .context("Invalid BIND_ADDRESS")?;

    let config_dropshot = ConfigDropshot {
        bind_address,
        default_request_body_max_bytes: DEFAULT_BODY_MAX_BYTES,
        default_handler_task_mode: dropshot::HandlerTaskMode::Detached,
        ..Default::default()
    };

    let config_logging = ConfigLogging::StderrTerminal {
        level: ConfigLoggingLevel::Info,
    };

    let log = config_logging
        .to_logger("storage-master")
        .map_err(|error| anyhow::anyhow!("failed to create logger: {}", error))?;

    // Start the server
    let server = HttpServerStarter::new(&config_dropshot, api, api_context, &log)
        .map_err(|error| anyhow::anyhow!("failed to create server: {}", error))?
        .start();

    info!("Storage master running on http://{}", bind_address);

    server
        .await
        .map_err(|error| anyhow::anyhow!("server failed: {}", error))
}
