// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Volume and bundle metadata store
//!
//! The master consumes the metadata store through [`MetadataStore`].
//! [`MemoryStore`] keeps everything in process memory.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;

use storage_types::{
    AgentInfo, BundleId, DataBundle, NewStorageVolume, OVERFLOW_VOLUME, StorageVolume, VolumeId,
};

/// Metadata store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Already exists: {0}")]
    Conflict(String),

    #[error("Metadata store error: {0}")]
    Backend(String),
}

/// Structured volume query.
///
/// Every populated field narrows the result.
#[derive(Debug, Clone, Default)]
pub struct VolumeQuery {
    pub id: Option<VolumeId>,
    pub name: Option<String>,
    pub shared: Option<bool>,
    /// Any of these hosts; empty means any host
    pub storage_hosts: Vec<String>,
    /// All of these tags
    pub tags: Vec<String>,
    /// Volumes with unknown available space always pass
    pub min_available_space_bytes: Option<u64>,
    pub include_inactive: bool,
    pub exclude_overflow: bool,
    /// Only volumes at least one of these agents can serve.
    ///
    /// `None` leaves the result unrestricted; an empty list matches nothing.
    pub servable_by: Option<Vec<AgentInfo>>,
}

impl VolumeQuery {
    pub fn matches(&self, volume: &StorageVolume) -> bool {
        if self.id.is_some_and(|id| id != volume.id) {
            return false;
        }
        if self.name.as_deref().is_some_and(|n| n != volume.name) {
            return false;
        }
        if self.shared.is_some_and(|s| s != volume.shared) {
            return false;
        }
        if !self.storage_hosts.is_empty()
            && !volume
                .storage_host
                .as_ref()
                .is_some_and(|h| self.storage_hosts.contains(h))
        {
            return false;
        }
        if !self.tags.iter().all(|t| volume.tags.contains(t)) {
            return false;
        }
        if self
            .min_available_space_bytes
            .is_some_and(|min| volume.available_space_bytes.is_some_and(|a| a < min))
        {
            return false;
        }
        if !self.include_inactive && !volume.active {
            return false;
        }
        if self.exclude_overflow && volume.is_overflow() {
            return false;
        }
        self.servable_by
            .as_ref()
            .is_none_or(|agents| agents.iter().any(|a| a.can_serve(volume)))
    }
}

/// Structured bundle query
#[derive(Debug, Clone, Default)]
pub struct BundleQuery {
    pub id: Option<BundleId>,
    pub owner_key: Option<String>,
    pub name: Option<String>,
    /// Bundles on any of these volumes; an empty list matches nothing
    pub volume_ids: Option<Vec<VolumeId>>,
}

impl BundleQuery {
    pub fn matches(&self, bundle: &DataBundle) -> bool {
        self.id.is_none_or(|id| id == bundle.id)
            && self.owner_key.as_deref().is_none_or(|o| o == bundle.owner_key)
            && self.name.as_deref().is_none_or(|n| n == bundle.name)
            && self
                .volume_ids
                .as_ref()
                .is_none_or(|ids| ids.contains(&bundle.volume_id))
    }
}

/// Persistent metadata for volumes and bundles.
///
/// Results are ordered by id so offsets are stable between a count and the
/// following page fetch.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn count_volumes(&self, query: &VolumeQuery) -> Result<usize, StoreError>;

    async fn find_volumes(
        &self,
        query: &VolumeQuery,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<StorageVolume>, StoreError>;

    async fn get_volume(&self, id: VolumeId) -> Result<Option<StorageVolume>, StoreError>;

    async fn find_volume_by_name(&self, name: &str) -> Result<Option<StorageVolume>, StoreError>;

    /// Create a volume unless one with the same name exists, in which case
    /// the existing volume is returned unchanged.
    async fn insert_volume(&self, volume: NewStorageVolume) -> Result<StorageVolume, StoreError>;

    /// Replace a stored volume. The agent annotation is never persisted.
    async fn update_volume(&self, volume: StorageVolume) -> Result<StorageVolume, StoreError>;

    async fn get_bundle(&self, id: BundleId) -> Result<Option<DataBundle>, StoreError>;

    async fn find_bundle_by_owner_and_name(
        &self,
        owner_key: &str,
        name: &str,
    ) -> Result<Option<DataBundle>, StoreError>;

    async fn count_bundles(&self, query: &BundleQuery) -> Result<usize, StoreError>;

    async fn find_bundles(
        &self,
        query: &BundleQuery,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<DataBundle>, StoreError>;

    /// Persist a new bundle. The store assigns the id; the given one is
    /// ignored. Owner and name must be unique together.
    async fn insert_bundle(&self, bundle: DataBundle) -> Result<DataBundle, StoreError>;

    /// Replace a stored bundle
    async fn update_bundle(&self, bundle: DataBundle) -> Result<DataBundle, StoreError>;

    async fn delete_bundle(&self, id: BundleId) -> Result<(), StoreError>;
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Default)]
struct Tables {
    volumes: BTreeMap<VolumeId, StorageVolume>,
    bundles: BTreeMap<BundleId, DataBundle>,
    next_volume_id: VolumeId,
    next_bundle_id: BundleId,
}

/// In-memory metadata store
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn count_volumes(&self, query: &VolumeQuery) -> Result<usize, StoreError> {
        Ok(self
            .lock()
            .volumes
            .values()
            .filter(|v| query.matches(v))
            .count())
    }

    async fn find_volumes(
        &self,
        query: &VolumeQuery,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<StorageVolume>, StoreError> {
        Ok(self
            .lock()
            .volumes
            .values()
            .filter(|v| query.matches(v))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn get_volume(&self, id: VolumeId) -> Result<Option<StorageVolume>, StoreError> {
        Ok(self.lock().volumes.get(&id).cloned())
    }

    async fn find_volume_by_name(&self, name: &str) -> Result<Option<StorageVolume>, StoreError> {
        Ok(self
            .lock()
            .volumes
            .values()
            .find(|v| v.name == name)
            .cloned())
    }

    async fn insert_volume(&self, volume: NewStorageVolume) -> Result<StorageVolume, StoreError> {
        let mut tables = self.lock();
        if let Some(existing) = tables.volumes.values().find(|v| v.name == volume.name) {
            return Ok(existing.clone());
        }

        tables.next_volume_id += 1;
        let created = StorageVolume {
            id: tables.next_volume_id,
            name: volume.name,
            storage_type: volume.storage_type,
            storage_host: volume.storage_host,
            root_path: volume.root_path,
            virtual_path: volume.virtual_path,
            shared: volume.shared,
            active: volume.active,
            tags: volume.tags,
            available_space_bytes: volume.available_space_bytes,
            storage_service_url: None,
        };
        tables.volumes.insert(created.id, created.clone());
        tracing::info!(
            volume_id = created.id,
            name = %created.name,
            shared = created.shared,
            overflow = created.name == OVERFLOW_VOLUME,
            "Created storage volume"
        );
        Ok(created)
    }

    async fn update_volume(&self, volume: StorageVolume) -> Result<StorageVolume, StoreError> {
        let mut tables = self.lock();
        if tables
            .volumes
            .values()
            .any(|v| v.id != volume.id && v.name == volume.name)
        {
            return Err(StoreError::Conflict(format!("volume '{}'", volume.name)));
        }
        let stored = tables
            .volumes
            .get_mut(&volume.id)
            .ok_or_else(|| StoreError::NotFound(format!("Volume {}", volume.id)))?;
        *stored = volume.without_access_info();
        Ok(stored.clone())
    }

    async fn get_bundle(&self, id: BundleId) -> Result<Option<DataBundle>, StoreError> {
        Ok(self.lock().bundles.get(&id).cloned())
    }

    async fn find_bundle_by_owner_and_name(
        &self,
        owner_key: &str,
        name: &str,
    ) -> Result<Option<DataBundle>, StoreError> {
        Ok(self
            .lock()
            .bundles
            .values()
            .find(|b| b.owner_key == owner_key && b.name == name)
            .cloned())
    }

    async fn count_bundles(&self, query: &BundleQuery) -> Result<usize, StoreError> {
        Ok(self
            .lock()
            .bundles
            .values()
            .filter(|b| query.matches(b))
            .count())
    }

    async fn find_bundles(
        &self,
        query: &BundleQuery,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<DataBundle>, StoreError> {
        Ok(self
            .lock()
            .bundles
            .values()
            .filter(|b| query.matches(b))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn insert_bundle(&self, mut bundle: DataBundle) -> Result<DataBundle, StoreError> {
        let mut tables = self.lock();
        if tables
            .bundles
            .values()
            .any(|b| b.owner_key == bundle.owner_key && b.name == bundle.name)
        {
            return Err(StoreError::Conflict(format!(
                "bundle '{}' owned by {}",
                bundle.name, bundle.owner_key
            )));
        }

        tables.next_bundle_id += 1;
        bundle.id = tables.next_bundle_id;
        bundle.storage_volume = None;
        tables.bundles.insert(bundle.id, bundle.clone());
        Ok(bundle)
    }

    async fn update_bundle(&self, mut bundle: DataBundle) -> Result<DataBundle, StoreError> {
        let mut tables = self.lock();
        let stored = tables
            .bundles
            .get_mut(&bundle.id)
            .ok_or_else(|| StoreError::NotFound(format!("Bundle {}", bundle.id)))?;
        bundle.storage_volume = None;
        bundle.modified_at = Utc::now();
        *stored = bundle.clone();
        Ok(bundle)
    }

    async fn delete_bundle(&self, id: BundleId) -> Result<(), StoreError> {
        self.lock()
            .bundles
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(format!("Bundle {}", id)))
    }
}
