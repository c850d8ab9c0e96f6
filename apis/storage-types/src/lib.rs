// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Shared types for the storage master and the storage agents.
//!
//! Agents register with the master using [`AgentInfo`]; clients allocate and
//! locate data bundles using [`BundleRequest`], [`DataBundle`] and
//! [`BundleLocation`]. Volumes are described by [`StorageVolume`].

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

// ============================================================================
// Type Aliases and Constants
// ============================================================================

/// Numeric volume identifier assigned by the metadata store
pub type VolumeId = u64;

/// Numeric bundle identifier assigned by the metadata store
pub type BundleId = u64;

/// Served-volume wildcard: the agent can serve any volume
pub const ALL_VOLUMES: &str = "*";

/// Name of the synthetic shared volume used when no regular volume fits
pub const OVERFLOW_VOLUME: &str = "OVERFLOW_VOLUME";

// ============================================================================
// Agent Types
// ============================================================================

/// Externally visible connection status of a registered agent.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
    Display,
    EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionStatus {
    /// The last probes succeeded (breaker closed)
    Connected,
    /// The agent failed enough consecutive probes to trip its breaker
    Disconnected,
}

/// Registration payload an agent submits to the master.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AgentInfo {
    /// Base URL the master and clients use to reach the agent
    pub agent_url: String,
    /// Host the agent runs on; non-shared volumes are bound to a host
    pub agent_host: String,
    /// Volume names or ids the agent serves, or `*` for all volumes
    #[serde(default)]
    pub served_volumes: BTreeSet<String>,
    /// Volume names or ids the agent currently cannot serve
    #[serde(default)]
    pub unavailable_volumes: BTreeSet<String>,
}

impl AgentInfo {
    fn lists(set: &BTreeSet<String>, volume: &StorageVolume) -> bool {
        set.contains(&volume.name) || set.contains(&volume.id.to_string())
    }

    /// Whether this agent claims `volume` and has not excluded it.
    ///
    /// A non-shared volume can only be served by the agent running on the
    /// volume's host.
    pub fn can_serve(&self, volume: &StorageVolume) -> bool {
        if Self::lists(&self.unavailable_volumes, volume) {
            return false;
        }
        let claimed = self.served_volumes.contains(ALL_VOLUMES)
            || Self::lists(&self.served_volumes, volume);
        if !claimed {
            return false;
        }
        volume.shared || volume.storage_host.as_deref() == Some(self.agent_host.as_str())
    }
}

/// A registered agent as reported by the master. Never carries the token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AgentSummary {
    /// Base URL of the agent (registry key)
    pub agent_url: String,
    /// Host the agent runs on
    pub agent_host: String,
    /// Volume names or ids the agent serves
    pub served_volumes: BTreeSet<String>,
    /// Volume names or ids excluded despite being served
    pub unavailable_volumes: BTreeSet<String>,
    /// Status derived from the agent's health breaker
    pub connection_status: ConnectionStatus,
    /// Time of the most recent completed probe
    pub last_checked: Option<DateTime<Utc>>,
    /// Time the agent registered
    pub registered_at: DateTime<Utc>,
}

impl AgentSummary {
    /// Whether the agent is currently considered reachable
    pub fn is_connected(&self) -> bool {
        self.connection_status == ConnectionStatus::Connected
    }

    /// The registration info this summary was built from
    pub fn info(&self) -> AgentInfo {
        AgentInfo {
            agent_url: self.agent_url.clone(),
            agent_host: self.agent_host.clone(),
            served_volumes: self.served_volumes.clone(),
            unavailable_volumes: self.unavailable_volumes.clone(),
        }
    }

    /// See [`AgentInfo::can_serve`]
    pub fn can_serve(&self, volume: &StorageVolume) -> bool {
        self.info().can_serve(volume)
    }
}

/// Response to a registration request.
///
/// The token is returned here and nowhere else; the agent presents it to
/// deregister.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AgentRegistration {
    /// The registered agent
    pub agent: AgentSummary,
    /// Capability token required to deregister
    pub token: String,
}

// ============================================================================
// Volume Types
// ============================================================================

/// Backing technology of a storage volume.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
    Display,
    EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StorageType {
    #[default]
    FileSystem,
    ObjectStore,
}

/// A named storage location served by one or more agents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct StorageVolume {
    pub id: VolumeId,
    pub name: String,
    pub storage_type: StorageType,
    /// Host the volume lives on; `None` for shared volumes
    pub storage_host: Option<String>,
    /// Physical root directory (or bucket prefix)
    pub root_path: String,
    /// Path prefix clients use to address content on this volume
    pub virtual_path: Option<String>,
    /// Shared volumes can be served by any agent that claims them
    pub shared: bool,
    /// Inactive volumes are never selected
    pub active: bool,
    pub tags: Vec<String>,
    pub available_space_bytes: Option<u64>,
    /// Agent currently resolved to serve this volume.
    ///
    /// Point-in-time annotation filled by the master on the way out; it is
    /// never persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_service_url: Option<String>,
}

impl StorageVolume {
    /// Whether this is the synthetic overflow volume
    pub fn is_overflow(&self) -> bool {
        self.name == OVERFLOW_VOLUME
    }

    /// Copy of this volume with the transient agent annotation cleared
    pub fn without_access_info(&self) -> StorageVolume {
        StorageVolume {
            storage_service_url: None,
            ..self.clone()
        }
    }
}

/// Payload for creating a storage volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct NewStorageVolume {
    pub name: String,
    #[serde(default)]
    pub storage_type: StorageType,
    /// Required for non-shared volumes
    #[serde(default)]
    pub storage_host: Option<String>,
    pub root_path: String,
    #[serde(default)]
    pub virtual_path: Option<String>,
    #[serde(default)]
    pub shared: bool,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub available_space_bytes: Option<u64>,
}

fn default_active() -> bool {
    true
}

/// Field-level changes to an existing volume. Unset fields are left alone.
///
/// Name, type, host and sharing are fixed at creation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct VolumeUpdate {
    #[serde(default)]
    pub root_path: Option<String>,
    #[serde(default)]
    pub virtual_path: Option<String>,
    #[serde(default)]
    pub active: Option<bool>,
    /// Replaces the volume's tags
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub available_space_bytes: Option<u64>,
}

// ============================================================================
// Bundle Types
// ============================================================================

/// Request to allocate storage for a new data bundle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BundleRequest {
    /// Bundle name, unique per owner
    pub name: String,
    /// Space the bundle is expected to need
    #[serde(default)]
    pub used_space_bytes: Option<u64>,
    /// Tags the selected volume must carry
    #[serde(default)]
    pub tags: Vec<String>,
    /// Arbitrary client metadata stored with the bundle
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// Place the bundle on this volume and no other
    #[serde(default)]
    pub volume_id: Option<VolumeId>,
    /// Place the bundle on the volume with this name and no other
    #[serde(default)]
    pub volume_name: Option<String>,
    /// Locality hint: prefer volumes local to these agent hosts
    #[serde(default)]
    pub storage_hosts: Vec<String>,
}

/// Field-level changes applied by a bundle update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct BundleUpdate {
    /// Added to the bundle's used space
    #[serde(default)]
    pub used_space_increment_bytes: Option<u64>,
    /// Replaces the bundle checksum when non-blank
    #[serde(default)]
    pub checksum: Option<String>,
}

impl BundleUpdate {
    /// Whether applying this update would change anything
    pub fn is_empty(&self) -> bool {
        self.used_space_increment_bytes.is_none()
            && self.checksum.as_deref().is_none_or(|c| c.trim().is_empty())
    }
}

/// A stored data bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DataBundle {
    pub id: BundleId,
    pub name: String,
    pub owner_key: String,
    /// Location of the bundle relative to its volume root
    pub path: String,
    pub used_space_bytes: u64,
    pub checksum: Option<String>,
    pub tags: Vec<String>,
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub volume_id: VolumeId,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    /// The bundle's volume, resolved against live agents at request time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_volume: Option<StorageVolume>,
}

/// Where a bundle or path can be reached right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct BundleLocation {
    /// Set when the location was resolved from a bundle id
    pub bundle_id: Option<BundleId>,
    /// The volume holding the data, annotated with the serving agent
    pub volume: StorageVolume,
    /// Agent currently selected to serve the volume
    pub agent_url: String,
    /// Path of the data relative to the volume root
    pub relative_path: String,
}

// ============================================================================
// Tests
// ============================================================================
