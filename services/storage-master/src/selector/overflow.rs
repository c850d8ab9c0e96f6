// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

use std::sync::Arc;

use async_trait::async_trait;
use rand::seq::IndexedRandom;

use storage_types::{
    AgentSummary, BundleRequest, NewStorageVolume, OVERFLOW_VOLUME, StorageType, StorageVolume,
};

use super::VolumeSelector;
use crate::store::{MetadataStore, StoreError};

/// Last resort: the shared overflow volume, bound to a random live agent that
/// can serve it.
///
/// The overflow volume record is created on first use. The agent binding is
/// returned on the volume and never persisted.
pub struct OverflowVolumeSelector {
    store: Arc<dyn MetadataStore>,
    root_dir: String,
}

impl OverflowVolumeSelector {
    pub fn new(store: Arc<dyn MetadataStore>, root_dir: String) -> Self {
        Self { store, root_dir }
    }

    async fn overflow_volume(&self) -> Result<StorageVolume, StoreError> {
        if let Some(volume) = self.store.find_volume_by_name(OVERFLOW_VOLUME).await? {
            return Ok(volume);
        }
        self.store
            .insert_volume(NewStorageVolume {
                name: OVERFLOW_VOLUME.to_string(),
                storage_type: StorageType::FileSystem,
                storage_host: None,
                root_path: self.root_dir.clone(),
                virtual_path: None,
                shared: true,
                active: true,
                tags: Vec::new(),
                available_space_bytes: None,
            })
            .await
    }
}

#[async_trait]
impl VolumeSelector for OverflowVolumeSelector {
    fn name(&self) -> &'static str {
        "overflow"
    }

    async fn select(
        &self,
        request: &BundleRequest,
        live_agents: &[AgentSummary],
    ) -> Result<Option<StorageVolume>, StoreError> {
        if live_agents.is_empty() {
            return Ok(None);
        }
        if request
            .volume_name
            .as_deref()
            .is_some_and(|n| n != OVERFLOW_VOLUME)
        {
            return Ok(None);
        }

        let volume = self.overflow_volume().await?;
        if request.volume_id.is_some_and(|id| id != volume.id) || !volume.active {
            return Ok(None);
        }

        let candidates: Vec<_> = live_agents
            .iter()
            .filter(|a| a.can_serve(&volume))
            .collect();
        let Some(agent) = candidates.choose(&mut rand::rng()) else {
            tracing::debug!("No live agent can serve the overflow volume");
            return Ok(None);
        };

        tracing::info!(
            agent_url = %agent.agent_url,
            volume_id = volume.id,
            "Selected overflow volume"
        );
        Ok(Some(StorageVolume {
            storage_service_url: Some(agent.agent_url.clone()),
            ..volume
        }))
    }
}
