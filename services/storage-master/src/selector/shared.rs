// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

use std::sync::Arc;

use async_trait::async_trait;

use storage_types::{AgentSummary, BundleRequest, StorageVolume};

use super::{VolumeSelector, request_query, select_random};
use crate::store::{MetadataStore, StoreError, VolumeQuery};

/// Picks a random shared volume served by at least one live agent
pub struct SharedVolumeSelector {
    store: Arc<dyn MetadataStore>,
}

impl SharedVolumeSelector {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl VolumeSelector for SharedVolumeSelector {
    fn name(&self) -> &'static str {
        "shared"
    }

    async fn select(
        &self,
        request: &BundleRequest,
        live_agents: &[AgentSummary],
    ) -> Result<Option<StorageVolume>, StoreError> {
        if live_agents.is_empty() {
            return Ok(None);
        }

        let query = VolumeQuery {
            shared: Some(true),
            exclude_overflow: true,
            servable_by: Some(live_agents.iter().map(AgentSummary::info).collect()),
            ..request_query(request)
        };
        select_random(self.store.as_ref(), &query, self.name()).await
    }
}
