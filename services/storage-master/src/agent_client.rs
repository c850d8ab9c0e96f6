// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! HTTP client for talking to storage agents
//!
//! The master only needs two agent calls: the status probe used by the
//! health checker and the bundle delete issued before metadata is dropped.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::AUTHORIZATION;
use thiserror::Error;

use storage_types::{AgentInfo, BundleId};

use crate::health::ConnectionTester;
use crate::metrics;

/// Agent client errors
#[derive(Debug, Error)]
pub enum AgentClientError {
    #[error("HTTP request to agent failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Agent {agent_url} responded with status {status}")]
    Status { agent_url: String, status: u16 },
}

/// Install the process-wide rustls crypto provider.
///
/// reqwest is built without a provider of its own and panics when a
/// `Client` is built before one is installed. Safe to call repeatedly.
pub fn install_crypto_provider() {
    // Err means a provider is already installed
    let _ = rustls::crypto::ring::default_provider().install_default();
}

/// Client for the agent protocol
pub struct AgentClient {
    client: Client,
    probe_timeout: Duration,
}

impl AgentClient {
    /// Create a new agent client
    ///
    /// `probe_timeout` bounds each status probe; other requests take their
    /// timeout per call.
    pub fn new(probe_timeout: Duration) -> Result<Self, AgentClientError> {
        install_crypto_provider();
        let client = Client::builder().build()?;
        Ok(Self {
            client,
            probe_timeout,
        })
    }

    fn endpoint(agent_url: &str, path: &str) -> String {
        format!("{}/{}", agent_url.trim_end_matches('/'), path)
    }

    /// `GET {agent}/status`; any 2xx means healthy
    pub async fn check_status(&self, agent_url: &str) -> Result<(), AgentClientError> {
        let response = self
            .client
            .get(Self::endpoint(agent_url, "status"))
            .timeout(self.probe_timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AgentClientError::Status {
                agent_url: agent_url.to_string(),
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }

    /// `DELETE {agent}/bundles/{id}`, forwarding the caller's authorization
    pub async fn delete_bundle(
        &self,
        agent_url: &str,
        bundle_id: BundleId,
        authorization: Option<&str>,
        timeout: Duration,
    ) -> Result<(), AgentClientError> {
        let mut request = self
            .client
            .delete(Self::endpoint(agent_url, &format!("bundles/{}", bundle_id)))
            .timeout(timeout);
        if let Some(authorization) = authorization {
            request = request.header(AUTHORIZATION, authorization);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            tracing::warn!(
                agent_url = %agent_url,
                bundle_id,
                status = %response.status(),
                "Agent refused bundle delete"
            );
            return Err(AgentClientError::Status {
                agent_url: agent_url.to_string(),
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ConnectionTester<AgentInfo> for AgentClient {
    type Error = AgentClientError;

    async fn test_connection(&self, agent: &AgentInfo) -> Result<(), AgentClientError> {
        let result = self.check_status(&agent.agent_url).await;
        if result.is_err() {
            metrics::record_probe_failure();
        }
        result
    }
}
