// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Configuration for the storage master

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio::sync::watch;

use crate::health::HealthCheckSettings;

/// Default bind address for the HTTP server.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8880";

/// Default root directory of the overflow volume.
pub const DEFAULT_OVERFLOW_ROOT_DIR: &str = "/data/jadestorage/overflow";

/// Master configuration loaded from environment variables or JSON file
///
/// Configuration can be loaded from:
/// 1. Environment variables (primary method, see `from_env()`)
/// 2. JSON config file (for SIGUSR1-based reloading, see `from_file()`)
///
/// Health check timing is fixed for the life of the process; only the
/// fields merged by `merge_reloadable()` change at runtime.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct MasterConfig {
    /// Seconds between agent status probes
    /// Note: This field is NOT reloadable - changes require restart
    #[serde(skip)]
    pub agent_ping_period_secs: u64,

    /// Seconds before the first probe of a newly registered agent
    #[serde(skip)]
    pub agent_initial_ping_delay_secs: u64,

    /// Consecutive failed probes before an agent is marked disconnected
    #[serde(skip)]
    pub agent_failure_trip_threshold: u32,

    /// Timeout of a single status probe in seconds
    #[serde(skip)]
    pub agent_probe_timeout_secs: u64,

    /// Root directory of the overflow volume when it is first created
    #[serde(skip)]
    pub overflow_root_dir: String,

    /// Timeout in seconds for requests forwarded to agents (bundle deletes)
    pub agent_request_timeout_secs: u64,

    /// Prefix prepended to every derived bundle path
    pub bundle_path_prefix: String,

    /// Subject keys allowed to read, change and delete any bundle
    ///
    /// Parsed from ADMIN_SUBJECTS env var (comma-separated list).
    pub admin_subjects: Vec<String>,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            agent_ping_period_secs: 5,
            agent_initial_ping_delay_secs: 0,
            agent_failure_trip_threshold: 3,
            agent_probe_timeout_secs: 3,
            overflow_root_dir: DEFAULT_OVERFLOW_ROOT_DIR.to_string(),
            agent_request_timeout_secs: 30,
            bundle_path_prefix: String::new(),
            admin_subjects: Vec::new(),
        }
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl MasterConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let agent_ping_period_secs = std::env::var("AGENT_PING_PERIOD_SECS")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .context("Invalid AGENT_PING_PERIOD_SECS")?;

        let agent_initial_ping_delay_secs = std::env::var("AGENT_INITIAL_PING_DELAY_SECS")
            .unwrap_or_else(|_| "0".to_string())
            .parse()
            .context("Invalid AGENT_INITIAL_PING_DELAY_SECS")?;

        let agent_failure_trip_threshold = std::env::var("AGENT_FAILURE_TRIP_THRESHOLD")
            .unwrap_or_else(|_| "3".to_string())
            .parse()
            .context("Invalid AGENT_FAILURE_TRIP_THRESHOLD")?;

        let agent_probe_timeout_secs = std::env::var("AGENT_PROBE_TIMEOUT_SECS")
            .unwrap_or_else(|_| "3".to_string())
            .parse()
            .context("Invalid AGENT_PROBE_TIMEOUT_SECS")?;

        let agent_request_timeout_secs = std::env::var("AGENT_REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .context("Invalid AGENT_REQUEST_TIMEOUT_SECS")?;

        let overflow_root_dir = std::env::var("OVERFLOW_ROOT_DIR")
            .unwrap_or_else(|_| DEFAULT_OVERFLOW_ROOT_DIR.to_string());

        let bundle_path_prefix = std::env::var("BUNDLE_PATH_PREFIX").unwrap_or_default();

        // Example: "admin,ops" -> vec!["admin", "ops"]
        let admin_subjects = std::env::var("ADMIN_SUBJECTS")
            .map(|v| parse_list(&v))
            .unwrap_or_default();

        Ok(Self {
            agent_ping_period_secs,
            agent_initial_ping_delay_secs,
            agent_failure_trip_threshold,
            agent_probe_timeout_secs,
            overflow_root_dir,
            agent_request_timeout_secs,
            bundle_path_prefix,
            admin_subjects,
        })
    }

    /// Load configuration from a JSON file
    ///
    /// This is used for runtime configuration reloading via SIGUSR1.
    /// Fields marked not reloadable keep their defaults in the result.
    pub async fn from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Merge runtime-reloadable fields from another config
    pub fn merge_reloadable(&mut self, other: &MasterConfig) {
        self.agent_request_timeout_secs = other.agent_request_timeout_secs;
        self.bundle_path_prefix = other.bundle_path_prefix.clone();
        self.admin_subjects = other.admin_subjects.clone();
    }

    /// Probe timing for agent health checkers
    pub fn health_settings(&self) -> HealthCheckSettings {
        HealthCheckSettings {
            period: Duration::from_secs(self.agent_ping_period_secs.max(1)),
            initial_delay: Duration::from_secs(self.agent_initial_ping_delay_secs),
            trip_threshold: self.agent_failure_trip_threshold.max(1),
        }
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.agent_probe_timeout_secs.max(1))
    }

    pub fn agent_request_timeout(&self) -> Duration {
        Duration::from_secs(self.agent_request_timeout_secs.max(1))
    }

    pub fn is_admin(&self, subject_key: &str) -> bool {
        self.admin_subjects.iter().any(|s| s == subject_key)
    }

    /// Start watching for SIGUSR1 to reload config from file
    ///
    /// When SIGUSR1 is received, the config file is re-read and the new
    /// configuration is sent to subscribers via the watch channel.
    #[cfg(unix)]
    pub async fn start_config_watcher(
        config_file: std::path::PathBuf,
        current_config: Self,
        config_tx: watch::Sender<Self>,
    ) {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigusr1 = match signal(SignalKind::user_defined1()) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "Failed to register SIGUSR1 handler");
                return;
            }
        };

        let mut config = current_config;

        loop {
            sigusr1.recv().await;
            tracing::info!(
                config_file = %config_file.display(),
                "Received SIGUSR1, reloading config"
            );

            match Self::from_file(&config_file).await {
                Ok(new_config) => {
                    config.merge_reloadable(&new_config);

                    if config_tx.send(config.clone()).is_err() {
                        tracing::warn!("No config subscribers, reload had no effect");
                    } else {
                        tracing::info!(
                            admin_subjects = config.admin_subjects.len(),
                            bundle_path_prefix = %config.bundle_path_prefix,
                            agent_request_timeout_secs = config.agent_request_timeout_secs,
                            "Config reloaded successfully"
                        );
                    }
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        config_file = %config_file.display(),
                        "Failed to reload config"
                    );
                }
            }
        }
    }
}
