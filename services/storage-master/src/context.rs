// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! API context for the storage master

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;

use crate::agent_client::AgentClient;
use crate::allocator::StorageAllocator;
use crate::config::MasterConfig;
use crate::locator::StorageLocator;
use crate::permissions::{OwnerPermissions, PermissionOracle};
use crate::registry::{AgentRegistry, AgentTester};
use crate::selector::default_chain;
use crate::store::{MemoryStore, MetadataStore};

/// API context shared across all request handlers
pub struct ApiContext {
    pub registry: Arc<AgentRegistry>,
    pub allocator: StorageAllocator,
    pub locator: StorageLocator,
}

impl ApiContext {
    /// Create a new API context with an in-memory metadata store and HTTP
    /// agent probes.
    pub fn new(config: watch::Receiver<MasterConfig>) -> Result<Self> {
        let probe_timeout = config.borrow().probe_timeout();
        let agents =
            Arc::new(AgentClient::new(probe_timeout).context("Failed to create agent client")?);
        Ok(Self::with_parts(
            config,
            Arc::new(MemoryStore::new()),
            agents.clone(),
            agents,
        ))
    }

    /// Assemble a context from explicit parts
    pub fn with_parts(
        config: watch::Receiver<MasterConfig>,
        store: Arc<dyn MetadataStore>,
        agents: Arc<AgentClient>,
        tester: Arc<AgentTester>,
    ) -> Self {
        let (settings, overflow_root_dir) = {
            let current = config.borrow();
            (current.health_settings(), current.overflow_root_dir.clone())
        };

        let registry = Arc::new(AgentRegistry::new(settings, tester));
        let permissions: Arc<dyn PermissionOracle> =
            Arc::new(OwnerPermissions::new(config.clone()));

        let allocator = StorageAllocator::new(
            store.clone(),
            registry.clone(),
            agents,
            permissions.clone(),
            default_chain(store.clone(), overflow_root_dir),
            config,
        );
        let locator = StorageLocator::new(store, registry.clone(), permissions);

        Self {
            registry,
            allocator,
            locator,
        }
    }
}
