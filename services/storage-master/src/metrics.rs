// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Prometheus metrics for the storage master
//!
//! Exports metrics for monitoring the agent fleet and bundle placement:
//! - Registered agents
//! - Agent connection transitions and failed probes
//! - Allocations by outcome
//! - Failed agent-side deletes

use std::sync::Once;

use prometheus::{Counter, CounterVec, Gauge, Opts, Registry, TextEncoder};

// Static metric initialization uses expect because these are compile-time
// constant definitions that cannot fail in practice. If they do fail, it indicates
// a programming error (e.g., invalid metric name) that should cause a panic at startup.
//
// This module exists to scope the clippy allow attributes to just the metric definitions.
#[allow(clippy::expect_used)]
mod metrics_impl {
    use super::*;
    use lazy_static::lazy_static;

    lazy_static! {
        /// Registry for all master metrics
        pub static ref REGISTRY: Registry = Registry::new();

        /// Number of agents currently registered
        pub static ref REGISTERED_AGENTS: Gauge = Gauge::with_opts(
            Opts::new("storage_master_registered_agents", "Agents currently registered")
        ).expect("valid metric name");

        /// Breaker transitions by direction (connected, disconnected)
        pub static ref AGENT_TRANSITIONS: CounterVec = CounterVec::new(
            Opts::new(
                "storage_master_agent_transitions_total",
                "Agent connection state transitions by direction"
            ),
            &["direction"]
        ).expect("valid metric name and labels");

        /// Individual failed health probes
        pub static ref PROBE_FAILURES: Counter = Counter::with_opts(
            Opts::new("storage_master_probe_failures_total", "Failed agent health probes")
        ).expect("valid metric name");

        /// Allocations by outcome (local, shared, overflow, no_volume)
        pub static ref ALLOCATIONS: CounterVec = CounterVec::new(
            Opts::new("storage_master_allocations_total", "Bundle allocations by outcome"),
            &["outcome"]
        ).expect("valid metric name and labels");

        /// Deletes the serving agent did not confirm
        ///
        /// The bundle metadata is kept whenever this is incremented.
        pub static ref AGENT_DELETE_FAILURES: Counter = Counter::with_opts(
            Opts::new(
                "storage_master_agent_delete_failures_total",
                "Bundle deletes not confirmed by the serving agent"
            )
        ).expect("valid metric name");
    }
}

pub use metrics_impl::{
    AGENT_DELETE_FAILURES, AGENT_TRANSITIONS, ALLOCATIONS, PROBE_FAILURES, REGISTERED_AGENTS,
    REGISTRY,
};

static REGISTER: Once = Once::new();

/// Register all metrics with the registry
///
/// Safe to call more than once; only the first call registers.
/// Panics if registration fails (indicates a programming error).
#[allow(clippy::expect_used)]
pub fn register_metrics() {
    REGISTER.call_once(|| {
        REGISTRY
            .register(Box::new(REGISTERED_AGENTS.clone()))
            .expect("Failed to register REGISTERED_AGENTS");
        REGISTRY
            .register(Box::new(AGENT_TRANSITIONS.clone()))
            .expect("Failed to register AGENT_TRANSITIONS");
        REGISTRY
            .register(Box::new(PROBE_FAILURES.clone()))
            .expect("Failed to register PROBE_FAILURES");
        REGISTRY
            .register(Box::new(ALLOCATIONS.clone()))
            .expect("Failed to register ALLOCATIONS");
        REGISTRY
            .register(Box::new(AGENT_DELETE_FAILURES.clone()))
            .expect("Failed to register AGENT_DELETE_FAILURES");
    });
}

/// Get metrics in Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}

/// Record the current number of registered agents
pub fn set_registered_agents(count: usize) {
    REGISTERED_AGENTS.set(count as f64);
}

/// Record an agent breaker transition
pub fn record_agent_transition(connected: bool) {
    let direction = if connected {
        "connected"
    } else {
        "disconnected"
    };
    AGENT_TRANSITIONS.with_label_values(&[direction]).inc();
}

pub fn record_probe_failure() {
    PROBE_FAILURES.inc();
}

/// Record an allocation outcome (selector name or `no_volume`)
pub fn record_allocation(outcome: &str) {
    ALLOCATIONS.with_label_values(&[outcome]).inc();
}

pub fn record_agent_delete_failure() {
    AGENT_DELETE_FAILURES.inc();
}
