// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Dropshot API trait for the storage master service.
//!
//! The storage master brokers access to a fleet of storage agents. It is
//! responsible for:
//!
//! - Tracking which agents are registered and whether they are reachable
//! - Choosing a volume and a live agent for new data bundles
//! - Resolving existing bundles and paths to the agent serving them now
//! - Deleting bundles on their agent before dropping their metadata
//!
//! ## Endpoints
//!
//! - `POST /agents` - Register an agent
//! - `GET /agents` - List registered agents
//! - `GET /agents/lookup` - Find an agent by URL
//! - `DELETE /agents` - Deregister an agent
//! - `POST /volumes` - Create a volume
//! - `GET /volumes` - Find volumes
//! - `GET /volumes/{id}` - Get a volume
//! - `PUT /volumes/{id}` - Update a volume
//! - `POST /bundles` - Allocate a bundle
//! - `GET /bundles` - Find a bundle by owner and name
//! - `GET /bundles/{id}` - Get a bundle
//! - `PUT /bundles/{id}` - Update a bundle
//! - `DELETE /bundles/{id}` - Delete a bundle
//! - `GET /storage` - List bundles, one page at a time
//! - `GET /storage/size` - Count the bundles `GET /storage` pages over
//! - `GET /bundles/{id}/location` - Locate a bundle
//! - `GET /bundles/{id}/content` - Redirect to the bundle content on its agent
//! - `GET /locations` - Locate a raw storage path
//! - `GET /metrics` - Prometheus metrics

use dropshot::{
    Body, HttpError, HttpResponseCreated, HttpResponseDeleted, HttpResponseOk, Path, Query,
    RequestContext, TypedBody,
};
use http::Response;
use schemars::JsonSchema;
use serde::Deserialize;
use storage_types::{
    AgentInfo, AgentRegistration, AgentSummary, BundleId, BundleLocation, BundleRequest,
    BundleUpdate, DataBundle, NewStorageVolume, StorageVolume, VolumeId, VolumeUpdate,
};

/// Header carrying the caller's subject key
pub const SUBJECT_KEY_HEADER: &str = "x-subject-key";

/// Header carrying an agent's registration token on deregistration
pub const AGENT_TOKEN_HEADER: &str = "x-agent-token";

// ============================================================================
// Request Types
// ============================================================================

/// Query parameters for listing agents
#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct AgentListQuery {
    /// Only return agents whose breaker is closed
    #[serde(default)]
    pub connected_only: Option<bool>,
}

/// Query parameter identifying an agent by its URL
#[derive(Debug, Deserialize, JsonSchema)]
pub struct AgentUrlQuery {
    pub agent_url: String,
}

/// Path parameters for volume endpoints
#[derive(Debug, Deserialize, JsonSchema)]
pub struct VolumePath {
    pub id: VolumeId,
}

/// Query parameters for finding volumes
#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct VolumeListQuery {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub shared: Option<bool>,
    #[serde(default)]
    pub storage_host: Option<String>,
    /// Only volumes carrying this tag
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub min_available_space_bytes: Option<u64>,
    #[serde(default)]
    pub include_inactive: Option<bool>,
    /// Also return volumes no live agent can serve right now
    #[serde(default)]
    pub include_inaccessible: Option<bool>,
}

/// Path parameters for bundle endpoints
#[derive(Debug, Deserialize, JsonSchema)]
pub struct BundlePath {
    pub id: BundleId,
}

/// Query parameters for finding a bundle by owner and name
#[derive(Debug, Deserialize, JsonSchema)]
pub struct BundleLookupQuery {
    pub owner: String,
    pub name: String,
}

/// Query parameters for listing bundles.
///
/// `owner` is only honored for admins; everyone else lists their own
/// bundles. `page` counts from zero.
#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct BundleListQuery {
    #[serde(default)]
    pub id: Option<BundleId>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub storage_host: Option<String>,
    /// Only bundles on volumes carrying this tag
    #[serde(default)]
    pub storage_tag: Option<String>,
    #[serde(default)]
    pub volume_name: Option<String>,
    #[serde(default)]
    pub page: Option<u64>,
    /// Page size, capped at 1000 (default: 100)
    #[serde(default)]
    pub length: Option<u64>,
}

/// Query parameter for locating a raw storage path
#[derive(Debug, Deserialize, JsonSchema)]
pub struct PathLocationQuery {
    pub path: String,
}

/// Storage Master API
///
/// Endpoints that need a caller identity read it from the `x-subject-key`
/// header. The `Authorization` header, when present, is forwarded to agents.
#[dropshot::api_description]
pub trait StorageMasterApi {
    /// Context type for request handlers
    type Context: Send + Sync + 'static;

    // ========================================================================
    // Agents
    // ========================================================================

    /// Register an agent
    ///
    /// Registration is idempotent per agent URL: registering an agent that is
    /// already known returns the existing registration and token.
    ///
    /// Returns 400 if the agent URL is not a valid URL.
    #[endpoint {
        method = POST,
        path = "/agents",
        tags = ["agents"],
    }]
    async fn register_agent(
        rqctx: RequestContext<Self::Context>,
        body: TypedBody<AgentInfo>,
    ) -> Result<HttpResponseOk<AgentRegistration>, HttpError>;

    /// List registered agents
    #[endpoint {
        method = GET,
        path = "/agents",
        tags = ["agents"],
    }]
    async fn list_agents(
        rqctx: RequestContext<Self::Context>,
        query: Query<AgentListQuery>,
    ) -> Result<HttpResponseOk<Vec<AgentSummary>>, HttpError>;

    /// Find a registered agent by URL
    ///
    /// Returns 404 if no agent is registered under that URL.
    #[endpoint {
        method = GET,
        path = "/agents/lookup",
        tags = ["agents"],
    }]
    async fn find_agent(
        rqctx: RequestContext<Self::Context>,
        query: Query<AgentUrlQuery>,
    ) -> Result<HttpResponseOk<AgentSummary>, HttpError>;

    /// Deregister an agent
    ///
    /// The registration token must be supplied in the `x-agent-token` header.
    ///
    /// Returns 403 if the token does not match, 404 if the agent is unknown.
    #[endpoint {
        method = DELETE,
        path = "/agents",
        tags = ["agents"],
    }]
    async fn deregister_agent(
        rqctx: RequestContext<Self::Context>,
        query: Query<AgentUrlQuery>,
    ) -> Result<HttpResponseDeleted, HttpError>;

    // ========================================================================
    // Volumes
    // ========================================================================

    /// Create a volume
    ///
    /// If a volume with the same name exists it is returned unchanged.
    #[endpoint {
        method = POST,
        path = "/volumes",
        tags = ["volumes"],
    }]
    async fn create_volume(
        rqctx: RequestContext<Self::Context>,
        body: TypedBody<NewStorageVolume>,
    ) -> Result<HttpResponseOk<StorageVolume>, HttpError>;

    /// Find volumes
    ///
    /// Volumes that no connected agent can serve are omitted unless
    /// `include_inaccessible` is set.
    #[endpoint {
        method = GET,
        path = "/volumes",
        tags = ["volumes"],
    }]
    async fn list_volumes(
        rqctx: RequestContext<Self::Context>,
        query: Query<VolumeListQuery>,
    ) -> Result<HttpResponseOk<Vec<StorageVolume>>, HttpError>;

    /// Get a volume
    ///
    /// The returned volume carries the URL of an agent currently able to
    /// serve it, if any.
    #[endpoint {
        method = GET,
        path = "/volumes/{id}",
        tags = ["volumes"],
    }]
    async fn get_volume(
        rqctx: RequestContext<Self::Context>,
        path: Path<VolumePath>,
    ) -> Result<HttpResponseOk<StorageVolume>, HttpError>;

    /// Update a volume
    ///
    /// Returns 400 for a blank root path, 404 if the volume is unknown.
    #[endpoint {
        method = PUT,
        path = "/volumes/{id}",
        tags = ["volumes"],
    }]
    async fn update_volume(
        rqctx: RequestContext<Self::Context>,
        path: Path<VolumePath>,
        body: TypedBody<VolumeUpdate>,
    ) -> Result<HttpResponseOk<StorageVolume>, HttpError>;

    // ========================================================================
    // Bundles
    // ========================================================================

    /// Allocate a bundle
    ///
    /// Picks a volume (local volumes first, then shared, then the overflow
    /// volume) and a connected agent that can serve it.
    ///
    /// Returns 503 if no storage is available right now.
    #[endpoint {
        method = POST,
        path = "/bundles",
        tags = ["bundles"],
    }]
    async fn allocate_bundle(
        rqctx: RequestContext<Self::Context>,
        body: TypedBody<BundleRequest>,
    ) -> Result<HttpResponseCreated<DataBundle>, HttpError>;

    /// Find a bundle by owner and name
    #[endpoint {
        method = GET,
        path = "/bundles",
        tags = ["bundles"],
    }]
    async fn find_bundle(
        rqctx: RequestContext<Self::Context>,
        query: Query<BundleLookupQuery>,
    ) -> Result<HttpResponseOk<DataBundle>, HttpError>;

    /// Get a bundle
    #[endpoint {
        method = GET,
        path = "/bundles/{id}",
        tags = ["bundles"],
    }]
    async fn get_bundle(
        rqctx: RequestContext<Self::Context>,
        path: Path<BundlePath>,
    ) -> Result<HttpResponseOk<DataBundle>, HttpError>;

    /// Update a bundle
    ///
    /// Returns 403 without write permission, 404 if the bundle is unknown.
    #[endpoint {
        method = PUT,
        path = "/bundles/{id}",
        tags = ["bundles"],
    }]
    async fn update_bundle(
        rqctx: RequestContext<Self::Context>,
        path: Path<BundlePath>,
        body: TypedBody<BundleUpdate>,
    ) -> Result<HttpResponseOk<DataBundle>, HttpError>;

    /// Delete a bundle
    ///
    /// The bundle is removed from its agent first; metadata is only dropped
    /// once the agent confirms.
    ///
    /// Returns 403 without delete permission, 404 if the bundle is unknown,
    /// 503 if no connected agent serves the bundle's volume.
    #[endpoint {
        method = DELETE,
        path = "/bundles/{id}",
        tags = ["bundles"],
    }]
    async fn delete_bundle(
        rqctx: RequestContext<Self::Context>,
        path: Path<BundlePath>,
    ) -> Result<HttpResponseDeleted, HttpError>;

    /// List bundles
    ///
    /// Bundles are ordered by id. Volume filters match the volume the bundle
    /// lives on.
    #[endpoint {
        method = GET,
        path = "/storage",
        tags = ["bundles"],
    }]
    async fn list_bundles(
        rqctx: RequestContext<Self::Context>,
        query: Query<BundleListQuery>,
    ) -> Result<HttpResponseOk<Vec<DataBundle>>, HttpError>;

    /// Count bundles
    ///
    /// Takes the same filters as `GET /storage`; paging is ignored.
    #[endpoint {
        method = GET,
        path = "/storage/size",
        tags = ["bundles"],
    }]
    async fn count_bundles(
        rqctx: RequestContext<Self::Context>,
        query: Query<BundleListQuery>,
    ) -> Result<HttpResponseOk<u64>, HttpError>;

    /// Locate a bundle
    ///
    /// Returns 404 if the bundle does not exist, 503 if it exists but no
    /// connected agent serves its volume.
    #[endpoint {
        method = GET,
        path = "/bundles/{id}/location",
        tags = ["bundles"],
    }]
    async fn locate_bundle(
        rqctx: RequestContext<Self::Context>,
        path: Path<BundlePath>,
    ) -> Result<HttpResponseOk<BundleLocation>, HttpError>;

    /// Redirect to bundle content
    ///
    /// Responds with a temporary redirect to the agent currently serving the
    /// bundle.
    #[endpoint {
        method = GET,
        path = "/bundles/{id}/content",
        tags = ["bundles"],
    }]
    async fn redirect_bundle_content(
        rqctx: RequestContext<Self::Context>,
        path: Path<BundlePath>,
    ) -> Result<Response<Body>, HttpError>;

    /// Locate a raw storage path
    ///
    /// Resolves the volume whose virtual or root path is the longest prefix
    /// of `path`.
    #[endpoint {
        method = GET,
        path = "/locations",
        tags = ["bundles"],
    }]
    async fn locate_path(
        rqctx: RequestContext<Self::Context>,
        query: Query<PathLocationQuery>,
    ) -> Result<HttpResponseOk<BundleLocation>, HttpError>;

    // ========================================================================
    // Metrics
    // ========================================================================

    /// Prometheus metrics in text exposition format
    #[endpoint {
        method = GET,
        path = "/metrics",
        tags = ["metrics"],
    }]
    async fn get_metrics(
        rqctx: RequestContext<Self::Context>,
    ) -> Result<Response<Body>, HttpError>;
}
