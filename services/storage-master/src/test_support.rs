// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Shared fixtures for unit tests

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;

use storage_types::{
    AgentInfo, AgentSummary, ConnectionStatus, DataBundle, NewStorageVolume, StorageType, VolumeId,
};

use crate::agent_client::AgentClientError;
use crate::health::ConnectionTester;

/// Agent prober whose answers are set by the test
#[derive(Default)]
pub struct FakeTester {
    down: Mutex<HashSet<String>>,
    probes: Mutex<HashMap<String, usize>>,
}

impl FakeTester {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_down(&self, agent_url: &str, down: bool) {
        let mut set = self.down.lock().unwrap();
        if down {
            set.insert(agent_url.to_string());
        } else {
            set.remove(agent_url);
        }
    }

    pub fn probes(&self, agent_url: &str) -> usize {
        self.probes
            .lock()
            .unwrap()
            .get(agent_url)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl ConnectionTester<AgentInfo> for FakeTester {
    type Error = AgentClientError;

    async fn test_connection(&self, agent: &AgentInfo) -> Result<(), AgentClientError> {
        *self
            .probes
            .lock()
            .unwrap()
            .entry(agent.agent_url.clone())
            .or_default() += 1;
        if self.down.lock().unwrap().contains(&agent.agent_url) {
            return Err(AgentClientError::Status {
                agent_url: agent.agent_url.clone(),
                status: 503,
            });
        }
        Ok(())
    }
}

/// Agent on `host` reachable at `http://{host}:8881`
pub fn agent_info(host: &str, served: &[&str]) -> AgentInfo {
    agent_at(&format!("http://{}:8881", host), host, served)
}

pub fn agent_at(agent_url: &str, host: &str, served: &[&str]) -> AgentInfo {
    AgentInfo {
        agent_url: agent_url.to_string(),
        agent_host: host.to_string(),
        served_volumes: served.iter().map(|s| s.to_string()).collect(),
        unavailable_volumes: Default::default(),
    }
}

/// Connected agent summary, for selector tests that bypass the registry
pub fn summary(host: &str, served: &[&str]) -> AgentSummary {
    let info = agent_info(host, served);
    AgentSummary {
        agent_url: info.agent_url,
        agent_host: info.agent_host,
        served_volumes: info.served_volumes,
        unavailable_volumes: info.unavailable_volumes,
        connection_status: ConnectionStatus::Connected,
        last_checked: None,
        registered_at: Utc::now(),
    }
}

pub fn new_volume(name: &str, shared: bool, host: Option<&str>) -> NewStorageVolume {
    NewStorageVolume {
        name: name.to_string(),
        storage_type: StorageType::FileSystem,
        storage_host: host.map(str::to_string),
        root_path: format!("/data/{}", name),
        virtual_path: None,
        shared,
        active: true,
        tags: Vec::new(),
        available_space_bytes: None,
    }
}

pub fn new_bundle(name: &str, owner: &str, volume_id: VolumeId) -> DataBundle {
    let now = Utc::now();
    DataBundle {
        id: 0,
        name: name.to_string(),
        owner_key: owner.to_string(),
        path: String::new(),
        used_space_bytes: 0,
        checksum: None,
        tags: Vec::new(),
        metadata: BTreeMap::new(),
        volume_id,
        created_by: owner.to_string(),
        created_at: now,
        modified_at: now,
        storage_volume: None,
    }
}
