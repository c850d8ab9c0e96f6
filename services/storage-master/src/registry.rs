// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Registry of storage agents known to the master
//!
//! Every registered agent has one [`ConnectionHealthChecker`] probing its
//! status endpoint. The registry is in-memory only: agents re-register after
//! a master restart.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rand::{Rng, RngCore};
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

use storage_types::{AgentInfo, AgentRegistration, AgentSummary, ConnectionStatus};

use crate::agent_client::AgentClientError;
use crate::health::{
    BreakerState, ConnectionHealthChecker, ConnectionTester, HealthCheckSettings,
    TransitionCallback,
};
use crate::metrics;

/// Probe used for every registered agent
pub type AgentTester = dyn ConnectionTester<AgentInfo, Error = AgentClientError>;

/// Registry errors
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Invalid agent URL '{url}': {reason}")]
    InvalidAgentUrl { url: String, reason: String },

    #[error("Invalid registration token for agent {0}")]
    InvalidToken(String),
}

/// Normalized registry key for an agent URL
fn agent_key(agent_url: &str) -> String {
    agent_url.trim().trim_end_matches('/').to_string()
}

fn generate_token() -> SecretString {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    SecretString::from(URL_SAFE_NO_PAD.encode(bytes))
}

/// A registered agent and its health checker
struct AgentConnection {
    info: AgentInfo,
    token: SecretString,
    registered_at: DateTime<Utc>,
    checker: ConnectionHealthChecker,
}

impl AgentConnection {
    fn token_matches(&self, token: &str) -> bool {
        self.token.expose_secret() == token
    }

    /// Point-in-time record with the status label taken from the breaker
    fn summary(&self) -> AgentSummary {
        let connection_status = match self.checker.state() {
            BreakerState::Closed => ConnectionStatus::Connected,
            BreakerState::Open => ConnectionStatus::Disconnected,
        };
        AgentSummary {
            agent_url: self.info.agent_url.clone(),
            agent_host: self.info.agent_host.clone(),
            served_volumes: self.info.served_volumes.clone(),
            unavailable_volumes: self.info.unavailable_volumes.clone(),
            connection_status,
            last_checked: self.checker.last_checked(),
            registered_at: self.registered_at,
        }
    }

    fn registration(&self) -> AgentRegistration {
        AgentRegistration {
            agent: self.summary(),
            token: self.token.expose_secret().to_string(),
        }
    }
}

/// Concurrent registry of agents keyed by access URL.
///
/// Register and deregister for the same URL are serialized by the map's
/// entry lock; different URLs proceed independently and readers are never
/// blocked for the duration of a probe.
pub struct AgentRegistry {
    agents: DashMap<String, AgentConnection>,
    settings: HealthCheckSettings,
    tester: Arc<AgentTester>,
}

impl AgentRegistry {
    pub fn new(settings: HealthCheckSettings, tester: Arc<AgentTester>) -> Self {
        Self {
            agents: DashMap::new(),
            settings,
            tester,
        }
    }

    /// Register an agent and start its health checker.
    ///
    /// If the URL is already registered the existing registration (and
    /// token) is returned unchanged. Must be called from within a tokio
    /// runtime.
    pub fn register(&self, mut info: AgentInfo) -> Result<AgentRegistration, RegistryError> {
        let key = agent_key(&info.agent_url);
        let parsed = url::Url::parse(&key).map_err(|e| RegistryError::InvalidAgentUrl {
            url: info.agent_url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(RegistryError::InvalidAgentUrl {
                url: info.agent_url.clone(),
                reason: format!("unsupported scheme {}", parsed.scheme()),
            });
        }
        info.agent_url = key.clone();

        let (registration, created) = match self.agents.entry(key) {
            Entry::Occupied(existing) => (existing.get().registration(), false),
            Entry::Vacant(slot) => {
                let connection = AgentConnection {
                    info: info.clone(),
                    token: generate_token(),
                    registered_at: Utc::now(),
                    checker: ConnectionHealthChecker::new(self.settings, BreakerState::Closed),
                };
                connection.checker.initialize(
                    info,
                    self.tester.clone(),
                    reconnected_callback(),
                    disconnected_callback(),
                );
                let registration = connection.registration();
                slot.insert(connection);
                (registration, true)
            }
        };

        if created {
            metrics::set_registered_agents(self.agents.len());
            tracing::info!(
                agent_url = %registration.agent.agent_url,
                agent_host = %registration.agent.agent_host,
                served_volumes = ?registration.agent.served_volumes,
                "Registered agent"
            );
        } else {
            tracing::debug!(
                agent_url = %registration.agent.agent_url,
                "Agent already registered"
            );
        }
        Ok(registration)
    }

    /// Deregister an agent.
    ///
    /// Returns `Ok(None)` if the URL is unknown. A token mismatch leaves the
    /// registration in place.
    pub fn deregister(
        &self,
        agent_url: &str,
        token: &str,
    ) -> Result<Option<AgentSummary>, RegistryError> {
        let removed = match self.agents.entry(agent_key(agent_url)) {
            Entry::Vacant(_) => return Ok(None),
            Entry::Occupied(existing) => {
                if !existing.get().token_matches(token) {
                    tracing::warn!(agent_url = %agent_url, "Rejected deregistration with bad token");
                    return Err(RegistryError::InvalidToken(agent_url.to_string()));
                }
                let (_, connection) = existing.remove_entry();
                connection.checker.dispose();
                connection
            }
        };

        metrics::set_registered_agents(self.agents.len());
        tracing::info!(agent_url = %removed.info.agent_url, "Deregistered agent");
        Ok(Some(removed.summary()))
    }

    /// Snapshot of all agents matching `predicate`
    pub fn list_agents<P>(&self, predicate: P) -> Vec<AgentSummary>
    where
        P: Fn(&AgentSummary) -> bool,
    {
        self.agents
            .iter()
            .map(|entry| entry.value().summary())
            .filter(|summary| predicate(summary))
            .collect()
    }

    /// Snapshot of agents whose breaker is closed
    pub fn connected_agents(&self) -> Vec<AgentSummary> {
        self.list_agents(AgentSummary::is_connected)
    }

    pub fn find_by_url(&self, agent_url: &str) -> Option<AgentSummary> {
        self.agents
            .get(&agent_key(agent_url))
            .map(|entry| entry.value().summary())
    }

    /// Uniformly random agent among those matching `predicate`.
    ///
    /// `None` when nothing matches; an empty fleet is an expected state.
    pub fn pick_random<P>(&self, predicate: P) -> Option<AgentSummary>
    where
        P: Fn(&AgentSummary) -> bool,
    {
        let mut candidates = self.list_agents(predicate);
        if candidates.is_empty() {
            return None;
        }
        let index = rand::rng().random_range(0..candidates.len());
        Some(candidates.swap_remove(index))
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

fn reconnected_callback() -> TransitionCallback<AgentInfo> {
    Arc::new(|agent: &AgentInfo| {
        tracing::info!(agent_url = %agent.agent_url, "Master reconnected to agent");
        metrics::record_agent_transition(true);
    })
}

fn disconnected_callback() -> TransitionCallback<AgentInfo> {
    Arc::new(|agent: &AgentInfo| {
        tracing::warn!(agent_url = %agent.agent_url, "Master lost connection to agent");
        metrics::record_agent_transition(false);
    })
}
