// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Bundle allocation, update and deletion
//!
//! Allocation walks the selector chain, binds a connected agent to the chosen
//! volume and persists the bundle. Deletion goes through the serving agent
//! first; metadata is only dropped once the agent confirms.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::watch;

use storage_types::{
    AgentSummary, BundleId, BundleRequest, BundleUpdate, DataBundle, NewStorageVolume,
    OVERFLOW_VOLUME, StorageVolume, VolumeId, VolumeUpdate,
};

use crate::agent_client::{AgentClient, AgentClientError};
use crate::config::MasterConfig;
use crate::metrics;
use crate::permissions::{Credentials, PermissionOracle};
use crate::registry::AgentRegistry;
use crate::selector::VolumeSelector;
use crate::store::{MetadataStore, StoreError};

/// Allocation errors
#[derive(Debug, Error)]
pub enum AllocationError {
    #[error("No storage volume is available right now, try again later")]
    NoVolumeAvailable,

    #[error("Bundle {0} not found")]
    NotFound(BundleId),

    #[error("Bundle '{name}' already exists for {owner}")]
    AlreadyExists { owner: String, name: String },

    #[error("{subject} is not allowed to {action} bundle {bundle_id}")]
    Forbidden {
        subject: String,
        action: &'static str,
        bundle_id: BundleId,
    },

    #[error("No connected agent serves volume {0}, try again later")]
    AgentUnavailable(String),

    #[error("Agent {agent_url} did not delete bundle {bundle_id}: {source}")]
    AgentDeleteFailed {
        agent_url: String,
        bundle_id: BundleId,
        #[source]
        source: AgentClientError,
    },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Path of a bundle relative to its volume root.
///
/// Ids of seven or more digits are spread over two directory levels taken
/// from their trailing digits, e.g. `1234567` maps to `234/567/1234567`.
pub fn bundle_path(prefix: &str, id: BundleId) -> String {
    let id = id.to_string();
    let prefix = prefix.trim_end_matches('/');

    let mut parts: Vec<&str> = Vec::with_capacity(4);
    if !prefix.is_empty() {
        parts.push(prefix);
    }
    if id.len() >= 7 {
        let n = id.len();
        parts.push(&id[n - 6..n - 3]);
        parts.push(&id[n - 3..]);
    }
    parts.push(&id);
    parts.join("/")
}

pub struct StorageAllocator {
    store: Arc<dyn MetadataStore>,
    registry: Arc<AgentRegistry>,
    agents: Arc<AgentClient>,
    permissions: Arc<dyn PermissionOracle>,
    selectors: Vec<Box<dyn VolumeSelector>>,
    config: watch::Receiver<MasterConfig>,
}

impl StorageAllocator {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        registry: Arc<AgentRegistry>,
        agents: Arc<AgentClient>,
        permissions: Arc<dyn PermissionOracle>,
        selectors: Vec<Box<dyn VolumeSelector>>,
        config: watch::Receiver<MasterConfig>,
    ) -> Self {
        Self {
            store,
            registry,
            agents,
            permissions,
            selectors,
            config,
        }
    }

    /// Create a volume, or return the existing one with the same name
    pub async fn create_volume(
        &self,
        volume: NewStorageVolume,
    ) -> Result<StorageVolume, AllocationError> {
        if volume.name.trim().is_empty() {
            return Err(AllocationError::InvalidRequest(
                "volume name is required".to_string(),
            ));
        }
        if volume.name == OVERFLOW_VOLUME {
            return Err(AllocationError::InvalidRequest(format!(
                "{} is reserved",
                OVERFLOW_VOLUME
            )));
        }
        if volume.root_path.trim().is_empty() {
            return Err(AllocationError::InvalidRequest(
                "volume root path is required".to_string(),
            ));
        }
        if !volume.shared && volume.storage_host.as_deref().is_none_or(str::is_empty) {
            return Err(AllocationError::InvalidRequest(format!(
                "volume {} is not shared and needs a storage host",
                volume.name
            )));
        }
        Ok(self.store.insert_volume(volume).await?)
    }

    /// Apply `changes` to a stored volume
    pub async fn update_volume(
        &self,
        id: VolumeId,
        changes: VolumeUpdate,
    ) -> Result<StorageVolume, AllocationError> {
        let mut volume = self
            .store
            .get_volume(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("Volume {}", id)))?;

        if let Some(root_path) = changes.root_path {
            if root_path.trim().is_empty() {
                return Err(AllocationError::InvalidRequest(
                    "volume root path is required".to_string(),
                ));
            }
            volume.root_path = root_path;
        }
        if let Some(virtual_path) = changes.virtual_path {
            volume.virtual_path = Some(virtual_path).filter(|p| !p.trim().is_empty());
        }
        if let Some(active) = changes.active {
            volume.active = active;
        }
        if let Some(tags) = changes.tags {
            volume.tags = tags;
        }
        if let Some(space) = changes.available_space_bytes {
            volume.available_space_bytes = Some(space);
        }

        let volume = self.store.update_volume(volume).await?;
        tracing::info!(
            volume_id = volume.id,
            volume = %volume.name,
            active = volume.active,
            "Updated volume"
        );
        Ok(volume)
    }

    /// Allocate storage for a new bundle owned by the caller
    pub async fn allocate(
        &self,
        request: BundleRequest,
        credentials: &Credentials,
    ) -> Result<DataBundle, AllocationError> {
        let name = request.name.trim().to_string();
        if name.is_empty() {
            return Err(AllocationError::InvalidRequest(
                "bundle name is required".to_string(),
            ));
        }
        let owner = credentials.subject_key.clone();
        if self
            .store
            .find_bundle_by_owner_and_name(&owner, &name)
            .await?
            .is_some()
        {
            return Err(AllocationError::AlreadyExists { owner, name });
        }

        let live_agents = self.registry.connected_agents();
        let Some((selector, volume)) = self.select_volume(&request, &live_agents).await? else {
            metrics::record_allocation("no_volume");
            tracing::warn!(
                bundle = %name,
                live_agents = live_agents.len(),
                "No storage volume selected"
            );
            return Err(AllocationError::NoVolumeAvailable);
        };
        let Some(volume) = self.bind_agent(volume) else {
            metrics::record_allocation("no_volume");
            tracing::warn!(bundle = %name, "No connected agent can serve the selected volume");
            return Err(AllocationError::NoVolumeAvailable);
        };

        let now = Utc::now();
        let bundle = DataBundle {
            id: 0,
            name,
            owner_key: owner.clone(),
            path: String::new(),
            used_space_bytes: request.used_space_bytes.unwrap_or(0),
            checksum: None,
            tags: request.tags,
            metadata: request.metadata,
            volume_id: volume.id,
            created_by: owner,
            created_at: now,
            modified_at: now,
            storage_volume: None,
        };
        let mut bundle = self.store.insert_bundle(bundle).await.map_err(|e| match e {
            StoreError::Conflict(_) => AllocationError::AlreadyExists {
                owner: credentials.subject_key.clone(),
                name: request.name.trim().to_string(),
            },
            other => AllocationError::Store(other),
        })?;

        let prefix = self.config.borrow().bundle_path_prefix.clone();
        bundle.path = bundle_path(&prefix, bundle.id);
        let mut bundle = self.store.update_bundle(bundle).await?;

        metrics::record_allocation(selector);
        tracing::info!(
            bundle_id = bundle.id,
            bundle = %bundle.name,
            owner = %bundle.owner_key,
            volume = %volume.name,
            agent_url = volume.storage_service_url.as_deref().unwrap_or_default(),
            selector,
            "Allocated bundle"
        );
        bundle.storage_volume = Some(volume);
        Ok(bundle)
    }

    async fn select_volume(
        &self,
        request: &BundleRequest,
        live_agents: &[AgentSummary],
    ) -> Result<Option<(&'static str, StorageVolume)>, StoreError> {
        for selector in &self.selectors {
            if let Some(volume) = selector.select(request, live_agents).await? {
                return Ok(Some((selector.name(), volume)));
            }
        }
        Ok(None)
    }

    /// Attach a connected agent to `volume`.
    ///
    /// A volume that already carries an agent keeps it only while that agent
    /// is still connected.
    fn bind_agent(&self, volume: StorageVolume) -> Option<StorageVolume> {
        if let Some(agent_url) = volume.storage_service_url.clone() {
            return self
                .registry
                .find_by_url(&agent_url)
                .filter(AgentSummary::is_connected)
                .map(|_| volume);
        }

        let agent = self
            .registry
            .pick_random(|a| a.is_connected() && a.can_serve(&volume))?;
        Some(StorageVolume {
            storage_service_url: Some(agent.agent_url),
            ..volume
        })
    }

    /// Apply `changes` to a bundle the caller may write
    pub async fn update(
        &self,
        bundle_id: BundleId,
        changes: BundleUpdate,
        credentials: &Credentials,
    ) -> Result<DataBundle, AllocationError> {
        let mut bundle = self
            .store
            .get_bundle(bundle_id)
            .await?
            .ok_or(AllocationError::NotFound(bundle_id))?;
        if !self.permissions.can_write(credentials, &bundle) {
            return Err(AllocationError::Forbidden {
                subject: credentials.subject_key.clone(),
                action: "update",
                bundle_id,
            });
        }
        if changes.is_empty() {
            return Ok(bundle);
        }

        if let Some(increment) = changes.used_space_increment_bytes {
            bundle.used_space_bytes = bundle.used_space_bytes.saturating_add(increment);
        }
        if let Some(checksum) = changes.checksum.filter(|c| !c.trim().is_empty()) {
            bundle.checksum = Some(checksum);
        }

        let updated = self.store.update_bundle(bundle).await?;
        tracing::debug!(
            bundle_id,
            used_space_bytes = updated.used_space_bytes,
            "Updated bundle"
        );
        Ok(updated)
    }

    /// Delete a bundle from its serving agent, then from the metadata store
    pub async fn delete(
        &self,
        bundle_id: BundleId,
        credentials: &Credentials,
    ) -> Result<(), AllocationError> {
        let bundle = self
            .store
            .get_bundle(bundle_id)
            .await?
            .ok_or(AllocationError::NotFound(bundle_id))?;
        if !self.permissions.can_delete(credentials, &bundle) {
            return Err(AllocationError::Forbidden {
                subject: credentials.subject_key.clone(),
                action: "delete",
                bundle_id,
            });
        }

        let volume = self
            .store
            .get_volume(bundle.volume_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("Volume {}", bundle.volume_id)))?;
        let agent = self
            .registry
            .pick_random(|a| a.is_connected() && a.can_serve(&volume))
            .ok_or_else(|| AllocationError::AgentUnavailable(volume.name.clone()))?;

        let timeout = self.config.borrow().agent_request_timeout();
        if let Err(source) = self
            .agents
            .delete_bundle(
                &agent.agent_url,
                bundle_id,
                credentials.authorization.as_deref(),
                timeout,
            )
            .await
        {
            metrics::record_agent_delete_failure();
            tracing::warn!(
                bundle_id,
                agent_url = %agent.agent_url,
                error = %source,
                "Agent delete failed, keeping bundle metadata"
            );
            return Err(AllocationError::AgentDeleteFailed {
                agent_url: agent.agent_url,
                bundle_id,
                source,
            });
        }

        self.store.delete_bundle(bundle_id).await?;
        tracing::info!(
            bundle_id,
            bundle = %bundle.name,
            agent_url = %agent.agent_url,
            "Deleted bundle"
        );
        Ok(())
    }
}
