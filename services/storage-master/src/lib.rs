// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Storage Master Library
//!
//! The storage master brokers bundle storage across a fleet of storage
//! agents. Agents register themselves, are probed periodically, and are only
//! handed out while their breaker is closed.
//!
//! # Modules
//!
//! - [`agent_client`] - HTTP client for agent status probes and deletes
//! - [`allocator`] - Bundle allocation, update and deletion
//! - [`config`] - Service configuration with SIGUSR1 reload
//! - [`context`] - API context for request handlers
//! - [`health`] - Per-agent connection health checker (two-state breaker)
//! - [`locator`] - Resolution of bundles and paths to serving agents
//! - [`metrics`] - Prometheus metrics
//! - [`permissions`] - Caller credentials and the permission oracle
//! - [`registry`] - Registered agents and their health
//! - [`selector`] - Volume selection chain
//! - [`store`] - Metadata store trait and in-memory backend

pub mod agent_client;
pub mod allocator;
pub mod config;
pub mod context;
pub mod health;
pub mod locator;
pub mod metrics;
pub mod permissions;
pub mod registry;
pub mod selector;
pub mod store;

#[cfg(test)]
mod test_support;

use dropshot::{
    Body, ClientErrorStatusCode, HttpError, HttpResponseCreated, HttpResponseDeleted,
    HttpResponseOk, Path, Query, RequestContext, TypedBody,
};
use http::{Response, StatusCode, header};
use storage_master_api::{
    AGENT_TOKEN_HEADER, AgentListQuery, AgentUrlQuery, BundleListQuery, BundleLookupQuery,
    BundlePath, PathLocationQuery, StorageMasterApi, VolumeListQuery, VolumePath,
};
use storage_types::{
    AgentInfo, AgentRegistration, AgentSummary, BundleLocation, BundleRequest, BundleUpdate,
    DataBundle, NewStorageVolume, StorageVolume, VolumeUpdate,
};

use crate::allocator::AllocationError;
use crate::context::ApiContext;
use crate::locator::{BundleFilter, LocateError};
use crate::permissions::Credentials;
use crate::registry::RegistryError;
use crate::store::{StoreError, VolumeQuery};

/// Page size for bundle listings without an explicit length
const DEFAULT_PAGE_LENGTH: u64 = 100;

/// Largest page a bundle listing returns
const MAX_PAGE_LENGTH: u64 = 1000;

/// `(offset, limit)` of the requested page of a bundle listing
fn page_bounds(query: &BundleListQuery) -> Result<(usize, usize), HttpError> {
    let length = query.length.unwrap_or(DEFAULT_PAGE_LENGTH);
    if length == 0 {
        return Err(HttpError::for_bad_request(
            None,
            "length must be positive".to_string(),
        ));
    }
    let length = length.min(MAX_PAGE_LENGTH);
    let offset = query.page.unwrap_or(0).saturating_mul(length);
    Ok((
        usize::try_from(offset).unwrap_or(usize::MAX),
        usize::try_from(length).unwrap_or(usize::MAX),
    ))
}

fn bundle_filter(query: BundleListQuery) -> BundleFilter {
    BundleFilter {
        id: query.id,
        owner_key: query.owner,
        storage_host: query.storage_host,
        storage_tags: query.storage_tag.into_iter().collect(),
        volume_name: query.volume_name,
    }
}

/// Storage Master API implementation
///
/// All state lives in the [`ApiContext`].
pub enum StorageMasterImpl {}

fn forbidden(message: String) -> HttpError {
    HttpError::for_client_error(None, ClientErrorStatusCode::FORBIDDEN, message)
}

fn store_error(e: StoreError) -> HttpError {
    match e {
        StoreError::NotFound(what) => HttpError::for_not_found(None, format!("{} not found", what)),
        StoreError::Conflict(what) => HttpError::for_client_error(
            None,
            ClientErrorStatusCode::CONFLICT,
            format!("Already exists: {}", what),
        ),
        StoreError::Backend(msg) => {
            HttpError::for_internal_error(format!("Metadata store error: {}", msg))
        }
    }
}

impl From<RegistryError> for HttpError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::InvalidAgentUrl { .. } => HttpError::for_bad_request(None, e.to_string()),
            RegistryError::InvalidToken(_) => forbidden(e.to_string()),
        }
    }
}

impl From<AllocationError> for HttpError {
    fn from(e: AllocationError) -> Self {
        match e {
            AllocationError::NotFound(_) => HttpError::for_not_found(None, e.to_string()),
            AllocationError::AlreadyExists { .. } => {
                HttpError::for_client_error(None, ClientErrorStatusCode::CONFLICT, e.to_string())
            }
            AllocationError::Forbidden { .. } => forbidden(e.to_string()),
            AllocationError::InvalidRequest(_) => HttpError::for_bad_request(None, e.to_string()),
            AllocationError::NoVolumeAvailable
            | AllocationError::AgentUnavailable(_)
            | AllocationError::AgentDeleteFailed { .. } => {
                HttpError::for_unavail(None, e.to_string())
            }
            AllocationError::Store(e) => store_error(e),
        }
    }
}

impl From<LocateError> for HttpError {
    fn from(e: LocateError) -> Self {
        match e {
            LocateError::NotFound(_) => HttpError::for_not_found(None, e.to_string()),
            LocateError::Unreachable(_) => HttpError::for_unavail(None, e.to_string()),
            LocateError::Forbidden { .. } => forbidden(e.to_string()),
            LocateError::Store(e) => store_error(e),
        }
    }
}

/// Caller credentials from the request headers, or 401
fn credentials(rqctx: &RequestContext<ApiContext>) -> Result<Credentials, HttpError> {
    Credentials::from_headers(rqctx.request.headers()).ok_or_else(|| {
        HttpError::for_client_error(
            None,
            ClientErrorStatusCode::UNAUTHORIZED,
            format!(
                "Missing {} header",
                storage_master_api::SUBJECT_KEY_HEADER
            ),
        )
    })
}

impl StorageMasterApi for StorageMasterImpl {
    type Context = ApiContext;

    async fn register_agent(
        rqctx: RequestContext<Self::Context>,
        body: TypedBody<AgentInfo>,
    ) -> Result<HttpResponseOk<AgentRegistration>, HttpError> {
        let ctx = rqctx.context();
        let registration = ctx.registry.register(body.into_inner())?;
        Ok(HttpResponseOk(registration))
    }

    async fn list_agents(
        rqctx: RequestContext<Self::Context>,
        query: Query<AgentListQuery>,
    ) -> Result<HttpResponseOk<Vec<AgentSummary>>, HttpError> {
        let ctx = rqctx.context();
        let connected_only = query.into_inner().connected_only.unwrap_or(false);
        let agents = ctx
            .registry
            .list_agents(|agent| !connected_only || agent.is_connected());
        Ok(HttpResponseOk(agents))
    }

    async fn find_agent(
        rqctx: RequestContext<Self::Context>,
        query: Query<AgentUrlQuery>,
    ) -> Result<HttpResponseOk<AgentSummary>, HttpError> {
        let ctx = rqctx.context();
        let agent_url = query.into_inner().agent_url;
        let agent = ctx.registry.find_by_url(&agent_url).ok_or_else(|| {
            HttpError::for_not_found(None, format!("Agent {} not found", agent_url))
        })?;
        Ok(HttpResponseOk(agent))
    }

    async fn deregister_agent(
        rqctx: RequestContext<Self::Context>,
        query: Query<AgentUrlQuery>,
    ) -> Result<HttpResponseDeleted, HttpError> {
        let ctx = rqctx.context();
        let agent_url = query.into_inner().agent_url;
        let token = rqctx
            .request
            .headers()
            .get(AGENT_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| forbidden(format!("Missing {} header", AGENT_TOKEN_HEADER)))?;

        ctx.registry.deregister(&agent_url, token)?.ok_or_else(|| {
            HttpError::for_not_found(None, format!("Agent {} not found", agent_url))
        })?;
        Ok(HttpResponseDeleted())
    }

    async fn create_volume(
        rqctx: RequestContext<Self::Context>,
        body: TypedBody<NewStorageVolume>,
    ) -> Result<HttpResponseOk<StorageVolume>, HttpError> {
        let ctx = rqctx.context();
        let volume = ctx.allocator.create_volume(body.into_inner()).await?;
        Ok(HttpResponseOk(volume))
    }

    async fn list_volumes(
        rqctx: RequestContext<Self::Context>,
        query: Query<VolumeListQuery>,
    ) -> Result<HttpResponseOk<Vec<StorageVolume>>, HttpError> {
        let ctx = rqctx.context();
        let params = query.into_inner();
        let volume_query = VolumeQuery {
            name: params.name,
            shared: params.shared,
            storage_hosts: params.storage_host.into_iter().collect(),
            tags: params.tag.into_iter().collect(),
            min_available_space_bytes: params.min_available_space_bytes,
            include_inactive: params.include_inactive.unwrap_or(false),
            ..Default::default()
        };
        let volumes = ctx
            .locator
            .find_volumes(volume_query, params.include_inaccessible.unwrap_or(false))
            .await?;
        Ok(HttpResponseOk(volumes))
    }

    async fn get_volume(
        rqctx: RequestContext<Self::Context>,
        path: Path<VolumePath>,
    ) -> Result<HttpResponseOk<StorageVolume>, HttpError> {
        let ctx = rqctx.context();
        let volume = ctx.locator.get_volume(path.into_inner().id).await?;
        Ok(HttpResponseOk(volume))
    }

    async fn update_volume(
        rqctx: RequestContext<Self::Context>,
        path: Path<VolumePath>,
        body: TypedBody<VolumeUpdate>,
    ) -> Result<HttpResponseOk<StorageVolume>, HttpError> {
        let ctx = rqctx.context();
        let id = path.into_inner().id;
        ctx.allocator.update_volume(id, body.into_inner()).await?;
        let volume = ctx.locator.get_volume(id).await?;
        Ok(HttpResponseOk(volume))
    }

    async fn allocate_bundle(
        rqctx: RequestContext<Self::Context>,
        body: TypedBody<BundleRequest>,
    ) -> Result<HttpResponseCreated<DataBundle>, HttpError> {
        let ctx = rqctx.context();
        let credentials = credentials(&rqctx)?;
        let bundle = ctx
            .allocator
            .allocate(body.into_inner(), &credentials)
            .await?;
        Ok(HttpResponseCreated(bundle))
    }

    async fn find_bundle(
        rqctx: RequestContext<Self::Context>,
        query: Query<BundleLookupQuery>,
    ) -> Result<HttpResponseOk<DataBundle>, HttpError> {
        let ctx = rqctx.context();
        let credentials = credentials(&rqctx)?;
        let lookup = query.into_inner();
        let bundle = ctx
            .locator
            .find_bundle(&lookup.owner, &lookup.name, &credentials)
            .await?;
        Ok(HttpResponseOk(bundle))
    }

    async fn get_bundle(
        rqctx: RequestContext<Self::Context>,
        path: Path<BundlePath>,
    ) -> Result<HttpResponseOk<DataBundle>, HttpError> {
        let ctx = rqctx.context();
        let credentials = credentials(&rqctx)?;
        let bundle = ctx
            .locator
            .get_bundle(path.into_inner().id, &credentials)
            .await?;
        Ok(HttpResponseOk(bundle))
    }

    async fn update_bundle(
        rqctx: RequestContext<Self::Context>,
        path: Path<BundlePath>,
        body: TypedBody<BundleUpdate>,
    ) -> Result<HttpResponseOk<DataBundle>, HttpError> {
        let ctx = rqctx.context();
        let credentials = credentials(&rqctx)?;
        let bundle = ctx
            .allocator
            .update(path.into_inner().id, body.into_inner(), &credentials)
            .await?;
        Ok(HttpResponseOk(bundle))
    }

    async fn delete_bundle(
        rqctx: RequestContext<Self::Context>,
        path: Path<BundlePath>,
    ) -> Result<HttpResponseDeleted, HttpError> {
        let ctx = rqctx.context();
        let credentials = credentials(&rqctx)?;
        let bundle_id = path.into_inner().id;
        ctx.allocator.delete(bundle_id, &credentials).await?;
        Ok(HttpResponseDeleted())
    }

    async fn list_bundles(
        rqctx: RequestContext<Self::Context>,
        query: Query<BundleListQuery>,
    ) -> Result<HttpResponseOk<Vec<DataBundle>>, HttpError> {
        let ctx = rqctx.context();
        let credentials = credentials(&rqctx)?;
        let query = query.into_inner();
        let (offset, limit) = page_bounds(&query)?;
        let bundles = ctx
            .locator
            .list_bundles(bundle_filter(query), &credentials, offset, limit)
            .await?;
        Ok(HttpResponseOk(bundles))
    }

    async fn count_bundles(
        rqctx: RequestContext<Self::Context>,
        query: Query<BundleListQuery>,
    ) -> Result<HttpResponseOk<u64>, HttpError> {
        let ctx = rqctx.context();
        let credentials = credentials(&rqctx)?;
        let filter = bundle_filter(query.into_inner());
        let count = ctx.locator.count_bundles(filter, &credentials).await?;
        Ok(HttpResponseOk(count as u64))
    }

    async fn locate_bundle(
        rqctx: RequestContext<Self::Context>,
        path: Path<BundlePath>,
    ) -> Result<HttpResponseOk<BundleLocation>, HttpError> {
        let ctx = rqctx.context();
        let location = ctx.locator.locate_bundle(path.into_inner().id).await?;
        Ok(HttpResponseOk(location))
    }

    async fn redirect_bundle_content(
        rqctx: RequestContext<Self::Context>,
        path: Path<BundlePath>,
    ) -> Result<Response<Body>, HttpError> {
        let ctx = rqctx.context();
        let bundle_id = path.into_inner().id;
        let location = ctx.locator.locate_bundle(bundle_id).await?;
        let target = format!(
            "{}/bundles/{}/content",
            location.agent_url.trim_end_matches('/'),
            bundle_id
        );

        Response::builder()
            .status(StatusCode::TEMPORARY_REDIRECT)
            .header(header::LOCATION, target)
            .body(Body::empty())
            .map_err(|e| HttpError::for_internal_error(format!("Failed to build redirect: {}", e)))
    }

    async fn locate_path(
        rqctx: RequestContext<Self::Context>,
        query: Query<PathLocationQuery>,
    ) -> Result<HttpResponseOk<BundleLocation>, HttpError> {
        let ctx = rqctx.context();
        let location = ctx.locator.locate_path(&query.into_inner().path).await?;
        Ok(HttpResponseOk(location))
    }

    async fn get_metrics(
        _rqctx: RequestContext<Self::Context>,
    ) -> Result<Response<Body>, HttpError> {
        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/plain; version=0.0.4")
            .body(metrics::gather_metrics().into())
            .map_err(|e| HttpError::for_internal_error(format!("Failed to build response: {}", e)))
    }
}
