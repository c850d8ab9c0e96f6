// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Resolution of bundles, paths and volumes to the agents serving them
//!
//! Every lookup resolves the serving agent afresh from the registry's cached
//! breaker state; agents are never probed on the request path.

use std::sync::Arc;

use thiserror::Error;

use storage_types::{AgentSummary, BundleId, BundleLocation, DataBundle, StorageVolume, VolumeId};

use crate::permissions::{Credentials, PermissionOracle};
use crate::registry::AgentRegistry;
use crate::store::{BundleQuery, MetadataStore, StoreError, VolumeQuery};

/// Lookup errors
#[derive(Debug, Error)]
pub enum LocateError {
    #[error("{0} not found")]
    NotFound(String),

    /// The data exists but no connected agent serves it right now
    #[error("No connected agent serves volume {0}, try again later")]
    Unreachable(String),

    #[error("{subject} is not allowed to read bundle {bundle_id}")]
    Forbidden { subject: String, bundle_id: BundleId },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Strip `prefix` from `path` on a component boundary
fn strip_path_prefix<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return None;
    }
    let rest = path.strip_prefix(prefix)?;
    if rest.is_empty() {
        Some(rest)
    } else {
        rest.strip_prefix('/')
    }
}

/// Whether `path` is `bundle_path` or lies below it. Leading and trailing
/// separators are ignored on both sides.
fn path_within(path: &str, bundle_path: &str) -> bool {
    let bundle_path = bundle_path.trim_matches('/');
    if bundle_path.is_empty() {
        return false;
    }
    path.trim_matches('/')
        .strip_prefix(bundle_path)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

/// Filters for listing bundles
#[derive(Debug, Clone, Default)]
pub struct BundleFilter {
    pub id: Option<BundleId>,
    /// Only honored for admins; everyone else only sees their own bundles
    pub owner_key: Option<String>,
    pub storage_host: Option<String>,
    /// Tags the bundle's volume must carry
    pub storage_tags: Vec<String>,
    pub volume_name: Option<String>,
}

pub struct StorageLocator {
    store: Arc<dyn MetadataStore>,
    registry: Arc<AgentRegistry>,
    permissions: Arc<dyn PermissionOracle>,
}

impl StorageLocator {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        registry: Arc<AgentRegistry>,
        permissions: Arc<dyn PermissionOracle>,
    ) -> Self {
        Self {
            store,
            registry,
            permissions,
        }
    }

    /// A random connected agent able to serve `volume`
    fn serving_agent(&self, volume: &StorageVolume) -> Option<AgentSummary> {
        self.registry
            .pick_random(|a| a.is_connected() && a.can_serve(volume))
    }

    /// Copy of `volume` annotated with a serving agent, if one is connected
    fn with_access_info(&self, volume: StorageVolume) -> StorageVolume {
        let storage_service_url = self.serving_agent(&volume).map(|a| a.agent_url);
        StorageVolume {
            storage_service_url,
            ..volume
        }
    }

    async fn volume(&self, id: VolumeId) -> Result<StorageVolume, LocateError> {
        self.store
            .get_volume(id)
            .await?
            .ok_or_else(|| LocateError::NotFound(format!("Volume {}", id)))
    }

    /// Resolve a bundle to its volume and a connected serving agent
    pub async fn locate_bundle(&self, bundle_id: BundleId) -> Result<BundleLocation, LocateError> {
        let bundle = self
            .store
            .get_bundle(bundle_id)
            .await?
            .ok_or_else(|| LocateError::NotFound(format!("Bundle {}", bundle_id)))?;
        let volume = self.volume(bundle.volume_id).await?;

        let agent = self
            .serving_agent(&volume)
            .ok_or_else(|| LocateError::Unreachable(volume.name.clone()))?;
        tracing::debug!(bundle_id, agent_url = %agent.agent_url, "Located bundle");
        Ok(BundleLocation {
            bundle_id: Some(bundle_id),
            volume: StorageVolume {
                storage_service_url: Some(agent.agent_url.clone()),
                ..volume
            },
            agent_url: agent.agent_url,
            relative_path: bundle.path,
        })
    }

    /// Resolve a raw storage path.
    ///
    /// The volume whose virtual path or root path is the longest prefix of
    /// `path` wins. If the remainder lies inside a bundle on that volume the
    /// bundle id is reported too.
    pub async fn locate_path(&self, path: &str) -> Result<BundleLocation, LocateError> {
        let volumes = self
            .store
            .find_volumes(&VolumeQuery::default(), 0, usize::MAX)
            .await?;

        let mut best: Option<(usize, StorageVolume, String)> = None;
        for volume in volumes {
            let prefixes = volume
                .virtual_path
                .iter()
                .chain(std::iter::once(&volume.root_path));
            let matched = prefixes
                .filter_map(|p| strip_path_prefix(path, p).map(|rest| (p.len(), rest)))
                .max_by_key(|(len, _)| *len);
            let Some((len, rest)) = matched else {
                continue;
            };
            if best.as_ref().is_none_or(|(best_len, _, _)| len > *best_len) {
                best = Some((len, volume, rest.to_string()));
            }
        }
        let Some((_, volume, relative_path)) = best else {
            return Err(LocateError::NotFound(format!("Volume for path {}", path)));
        };

        let agent = self
            .serving_agent(&volume)
            .ok_or_else(|| LocateError::Unreachable(volume.name.clone()))?;

        let bundles = self
            .store
            .find_bundles(
                &BundleQuery {
                    volume_ids: Some(vec![volume.id]),
                    ..Default::default()
                },
                0,
                usize::MAX,
            )
            .await?;
        let bundle_id = bundles
            .iter()
            .find(|b| path_within(&relative_path, &b.path))
            .map(|b| b.id);

        Ok(BundleLocation {
            bundle_id,
            volume: StorageVolume {
                storage_service_url: Some(agent.agent_url.clone()),
                ..volume
            },
            agent_url: agent.agent_url,
            relative_path,
        })
    }

    /// Get a volume annotated with its current serving agent
    pub async fn get_volume(&self, id: VolumeId) -> Result<StorageVolume, LocateError> {
        let volume = self.volume(id).await?;
        Ok(self.with_access_info(volume))
    }

    /// Find volumes, annotated with serving agents.
    ///
    /// Unless `include_inaccessible` is set, volumes no connected agent can
    /// serve are left out.
    pub async fn find_volumes(
        &self,
        mut query: VolumeQuery,
        include_inaccessible: bool,
    ) -> Result<Vec<StorageVolume>, LocateError> {
        if !include_inaccessible {
            query.servable_by = Some(
                self.registry
                    .connected_agents()
                    .iter()
                    .map(AgentSummary::info)
                    .collect(),
            );
        }
        let volumes = self.store.find_volumes(&query, 0, usize::MAX).await?;
        Ok(volumes
            .into_iter()
            .map(|v| self.with_access_info(v))
            .collect())
    }

    /// Get a bundle the caller may read, with its volume resolved
    pub async fn get_bundle(
        &self,
        bundle_id: BundleId,
        credentials: &Credentials,
    ) -> Result<DataBundle, LocateError> {
        let bundle = self
            .store
            .get_bundle(bundle_id)
            .await?
            .ok_or_else(|| LocateError::NotFound(format!("Bundle {}", bundle_id)))?;
        self.readable(bundle, credentials).await
    }

    /// Find a bundle by owner and name
    pub async fn find_bundle(
        &self,
        owner_key: &str,
        name: &str,
        credentials: &Credentials,
    ) -> Result<DataBundle, LocateError> {
        let bundle = self
            .store
            .find_bundle_by_owner_and_name(owner_key, name)
            .await?
            .ok_or_else(|| {
                LocateError::NotFound(format!("Bundle '{}' owned by {}", name, owner_key))
            })?;
        self.readable(bundle, credentials).await
    }

    /// Bundles matching `filter`, ordered by id.
    ///
    /// Non-admin callers only ever see their own bundles.
    pub async fn list_bundles(
        &self,
        filter: BundleFilter,
        credentials: &Credentials,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<DataBundle>, LocateError> {
        let query = self.bundle_query(filter, credentials).await?;
        Ok(self.store.find_bundles(&query, offset, limit).await?)
    }

    /// Number of bundles [`list_bundles`](Self::list_bundles) would page over
    pub async fn count_bundles(
        &self,
        filter: BundleFilter,
        credentials: &Credentials,
    ) -> Result<usize, LocateError> {
        let query = self.bundle_query(filter, credentials).await?;
        Ok(self.store.count_bundles(&query).await?)
    }

    async fn bundle_query(
        &self,
        filter: BundleFilter,
        credentials: &Credentials,
    ) -> Result<BundleQuery, LocateError> {
        let owner_key = match filter.owner_key.filter(|o| !o.trim().is_empty()) {
            Some(owner) if self.permissions.is_admin(credentials) => owner,
            _ => credentials.subject_key.clone(),
        };

        let by_volume = filter.storage_host.is_some()
            || !filter.storage_tags.is_empty()
            || filter.volume_name.is_some();
        let volume_ids = if by_volume {
            let query = VolumeQuery {
                name: filter.volume_name,
                storage_hosts: filter.storage_host.into_iter().collect(),
                tags: filter.storage_tags,
                include_inactive: true,
                ..Default::default()
            };
            let volumes = self.store.find_volumes(&query, 0, usize::MAX).await?;
            Some(volumes.iter().map(|v| v.id).collect())
        } else {
            None
        };

        Ok(BundleQuery {
            id: filter.id,
            owner_key: Some(owner_key),
            name: None,
            volume_ids,
        })
    }

    async fn readable(
        &self,
        mut bundle: DataBundle,
        credentials: &Credentials,
    ) -> Result<DataBundle, LocateError> {
        if !self.permissions.can_read(credentials, &bundle) {
            return Err(LocateError::Forbidden {
                subject: credentials.subject_key.clone(),
                bundle_id: bundle.id,
            });
        }
        let volume = self.store.get_volume(bundle.volume_id).await?;
        bundle.storage_volume = volume.map(|v| self.with_access_info(v));
        Ok(bundle)
    }
}
