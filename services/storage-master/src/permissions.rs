// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Caller credentials and bundle permission checks

use http::HeaderMap;
use http::header::AUTHORIZATION;
use tokio::sync::watch;

use storage_master_api::SUBJECT_KEY_HEADER;
use storage_types::DataBundle;

use crate::config::MasterConfig;

/// Identity of the caller of a bundle operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Subject key the bundle is owned by when created by this caller
    pub subject_key: String,
    /// Raw `Authorization` header, forwarded to agents
    pub authorization: Option<String>,
}

impl Credentials {
    pub fn new(subject_key: impl Into<String>) -> Self {
        Self {
            subject_key: subject_key.into(),
            authorization: None,
        }
    }

    /// Read credentials from request headers.
    ///
    /// `None` when the subject key header is missing or blank.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let subject_key = headers
            .get(SUBJECT_KEY_HEADER)?
            .to_str()
            .ok()?
            .trim()
            .to_string();
        if subject_key.is_empty() {
            return None;
        }
        let authorization = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        Some(Self {
            subject_key,
            authorization,
        })
    }
}

/// Yes/no permission decisions for bundle operations
pub trait PermissionOracle: Send + Sync {
    fn can_read(&self, credentials: &Credentials, bundle: &DataBundle) -> bool;
    fn can_write(&self, credentials: &Credentials, bundle: &DataBundle) -> bool;
    fn can_delete(&self, credentials: &Credentials, bundle: &DataBundle) -> bool;

    /// Whether the caller may act on bundles of any owner
    fn is_admin(&self, credentials: &Credentials) -> bool;
}

/// Owners and configured admin subjects may do everything; nobody else may
/// do anything.
pub struct OwnerPermissions {
    config: watch::Receiver<MasterConfig>,
}

impl OwnerPermissions {
    pub fn new(config: watch::Receiver<MasterConfig>) -> Self {
        Self { config }
    }

    fn is_owner_or_admin(&self, credentials: &Credentials, bundle: &DataBundle) -> bool {
        credentials.subject_key == bundle.owner_key || self.is_admin(credentials)
    }
}

impl PermissionOracle for OwnerPermissions {
    fn can_read(&self, credentials: &Credentials, bundle: &DataBundle) -> bool {
        self.is_owner_or_admin(credentials, bundle)
    }

    fn can_write(&self, credentials: &Credentials, bundle: &DataBundle) -> bool {
        self.is_owner_or_admin(credentials, bundle)
    }

    fn can_delete(&self, credentials: &Credentials, bundle: &DataBundle) -> bool {
        self.is_owner_or_admin(credentials, bundle)
    }

    fn is_admin(&self, credentials: &Credentials) -> bool {
        self.config.borrow().is_admin(&credentials.subject_key)
    }
}
