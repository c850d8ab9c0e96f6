// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Volume selection for new bundles
//!
//! Selectors are tried in order until one produces a volume:
//!
//! 1. [`LocalVolumeSelector`]: non-shared volumes on hosts with a live agent
//! 2. [`SharedVolumeSelector`]: shared volumes a live agent can serve
//! 3. [`OverflowVolumeSelector`]: the overflow volume, bound to a live agent
//!
//! The query-based selectors count matching volumes and fetch a single one at
//! a uniformly random offset.

mod local;
mod overflow;
mod shared;

pub use local::LocalVolumeSelector;
pub use overflow::OverflowVolumeSelector;
pub use shared::SharedVolumeSelector;

use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;

use storage_types::{AgentSummary, BundleRequest, StorageVolume};

use crate::store::{MetadataStore, StoreError, VolumeQuery};

/// One step of the allocation fallback chain
#[async_trait]
pub trait VolumeSelector: Send + Sync {
    /// Short name used in logs and allocation metrics
    fn name(&self) -> &'static str;

    /// Pick a volume for `request`, considering only `live_agents`.
    ///
    /// `Ok(None)` means this selector has nothing to offer.
    async fn select(
        &self,
        request: &BundleRequest,
        live_agents: &[AgentSummary],
    ) -> Result<Option<StorageVolume>, StoreError>;
}

/// The default chain: local, then shared, then overflow
pub fn default_chain(
    store: Arc<dyn MetadataStore>,
    overflow_root_dir: String,
) -> Vec<Box<dyn VolumeSelector>> {
    vec![
        Box::new(LocalVolumeSelector::new(store.clone())),
        Box::new(SharedVolumeSelector::new(store.clone())),
        Box::new(OverflowVolumeSelector::new(store, overflow_root_dir)),
    ]
}

/// Query with the request's hard filters applied
fn request_query(request: &BundleRequest) -> VolumeQuery {
    VolumeQuery {
        id: request.volume_id,
        name: request.volume_name.clone(),
        tags: request.tags.clone(),
        min_available_space_bytes: request.used_space_bytes,
        ..Default::default()
    }
}

/// Count matches, then fetch one at a random offset
async fn select_random(
    store: &dyn MetadataStore,
    query: &VolumeQuery,
    selector: &'static str,
) -> Result<Option<StorageVolume>, StoreError> {
    let count = store.count_volumes(query).await?;
    if count == 0 {
        tracing::debug!(selector, query = ?query, "Found no volumes using query");
        return Ok(None);
    }

    let offset = rand::rng().random_range(0..count);
    let mut page = store.find_volumes(query, offset, 1).await?;
    Ok(page.pop())
}
