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

/// Picks a random non-shared volume living on a host with a live agent.
///
/// When the request carries a locality hint only agents on the hinted hosts
/// are considered.
pub struct LocalVolumeSelector {
    store: Arc<dyn MetadataStore>,
}

impl LocalVolumeSelector {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl VolumeSelector for LocalVolumeSelector {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn select(
        &self,
        request: &BundleRequest,
        live_agents: &[AgentSummary],
    ) -> Result<Option<StorageVolume>, StoreError> {
        let agents: Vec<_> = live_agents
            .iter()
            .filter(|a| {
                request.storage_hosts.is_empty() || request.storage_hosts.contains(&a.agent_host)
            })
            .map(AgentSummary::info)
            .collect();
        if agents.is_empty() {
            return Ok(None);
        }

        let query = VolumeQuery {
            shared: Some(false),
            storage_hosts: agents.iter().map(|a| a.agent_host.clone()).collect(),
            exclude_overflow: true,
            servable_by: Some(agents),
            ..request_query(request)
        };
        select_random(self.store.as_ref(), &query, self.name()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::test_support::{new_volume, summary};

    async fn store_with_locals() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_volume(new_volume("local-h1", false, Some("h1")))
            .await
            .unwrap();
        store
            .insert_volume(new_volume("local-h2", false, Some("h2")))
            .await
            .unwrap();
        store
            .insert_volume(new_volume("shared", true, None))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn only_volumes_on_live_hosts() {
        let selector = LocalVolumeSelector::new(store_with_locals().await);
        let live = vec![summary("h2", &["*"])];

        for _ in 0..20 {
            let volume = selector
                .select(&BundleRequest::default(), &live)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(volume.name, "local-h2");
        }
    }

    #[tokio::test]
    async fn locality_hint_narrows_hosts() {
        let selector = LocalVolumeSelector::new(store_with_locals().await);
        let live = vec![summary("h1", &["*"]), summary("h2", &["*"])];
        let request = BundleRequest {
            storage_hosts: vec!["h1".to_string(), "h9".to_string()],
            ..Default::default()
        };

        for _ in 0..20 {
            let volume = selector.select(&request, &live).await.unwrap().unwrap();
            assert_eq!(volume.name, "local-h1");
        }

        let elsewhere = BundleRequest {
            storage_hosts: vec!["h9".to_string()],
            ..Default::default()
        };
        assert!(selector.select(&elsewhere, &live).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unclaimed_local_volume_is_skipped() {
        let selector = LocalVolumeSelector::new(store_with_locals().await);
        let live = vec![summary("h1", &["some-other-volume"])];
        assert!(
            selector
                .select(&BundleRequest::default(), &live)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn no_live_agents_is_none() {
        let selector = LocalVolumeSelector::new(store_with_locals().await);
        assert!(
            selector
                .select(&BundleRequest::default(), &[])
                .await
                .unwrap()
                .is_none()
        );
    }
}
