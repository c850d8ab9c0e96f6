// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Periodic connection health checking
//!
//! A [`ConnectionHealthChecker`] runs one tokio task that probes a subject on
//! a fixed period and folds the results into a two-state circuit breaker:
//!
//! - `Closed`: the subject is healthy. Consecutive failures are counted and
//!   the breaker opens once the count reaches the trip threshold.
//! - `Open`: the subject is unreachable. A single successful probe closes
//!   the breaker again.
//!
//! Transition callbacks are edge-triggered: each transition fires exactly one
//! callback, no matter how many probes agree with the new state afterwards.

use std::fmt::Display;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Probes are succeeding
    Closed,
    /// Probes have failed at least `trip_threshold` times in a row
    Open,
}

/// Probe timing and breaker sensitivity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthCheckSettings {
    /// Time between probes
    pub period: Duration,
    /// Time before the first probe
    pub initial_delay: Duration,
    /// Consecutive failures needed to open the breaker
    pub trip_threshold: u32,
}

/// Something that can check whether a subject is reachable.
#[async_trait]
pub trait ConnectionTester<S>: Send + Sync {
    type Error: Display + Send;

    /// Probe `subject` once. `Ok` means healthy.
    async fn test_connection(&self, subject: &S) -> Result<(), Self::Error>;
}

/// Callback invoked on a breaker transition
pub type TransitionCallback<S> = Arc<dyn Fn(&S) + Send + Sync>;

struct Callbacks<S> {
    on_healthy: TransitionCallback<S>,
    on_unhealthy: TransitionCallback<S>,
}

struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    last_checked: Option<DateTime<Utc>>,
    // Bumped by dispose and re-initialization; results from an older
    // generation are discarded.
    generation: u64,
    task: Option<(CancellationToken, JoinHandle<()>)>,
}

struct BreakerShared {
    inner: Mutex<BreakerInner>,
    state_tx: watch::Sender<BreakerState>,
    trip_threshold: u32,
}

impl BreakerShared {
    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply one probe result. Callbacks run with the lock held, which is
    /// what lets `dispose` guarantee silence once it returns.
    fn record<S>(&self, generation: u64, healthy: bool, subject: &S, callbacks: &Callbacks<S>) {
        let mut inner = self.lock();
        if inner.generation != generation {
            return;
        }
        inner.last_checked = Some(Utc::now());

        let transition = if healthy {
            inner.consecutive_failures = 0;
            match inner.state {
                BreakerState::Open => Some(BreakerState::Closed),
                BreakerState::Closed => None,
            }
        } else {
            match inner.state {
                BreakerState::Closed => {
                    inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                    (inner.consecutive_failures >= self.trip_threshold)
                        .then_some(BreakerState::Open)
                }
                BreakerState::Open => None,
            }
        };

        if let Some(state) = transition {
            inner.state = state;
            self.state_tx.send_replace(state);
            match state {
                BreakerState::Closed => (callbacks.on_healthy)(subject),
                BreakerState::Open => (callbacks.on_unhealthy)(subject),
            }
        }
    }
}

/// Periodic prober with a two-state circuit breaker.
///
/// Callbacks must not call back into the checker that invoked them.
pub struct ConnectionHealthChecker {
    settings: HealthCheckSettings,
    shared: Arc<BreakerShared>,
}

impl ConnectionHealthChecker {
    /// Create a checker in `initial_state`. Nothing is probed until
    /// [`initialize`](Self::initialize) is called.
    pub fn new(settings: HealthCheckSettings, initial_state: BreakerState) -> Self {
        let (state_tx, _) = watch::channel(initial_state);
        Self {
            settings,
            shared: Arc::new(BreakerShared {
                inner: Mutex::new(BreakerInner {
                    state: initial_state,
                    consecutive_failures: 0,
                    last_checked: None,
                    generation: 0,
                    task: None,
                }),
                state_tx,
                trip_threshold: settings.trip_threshold.max(1),
            }),
        }
    }

    /// Start probing `subject` with `tester`.
    ///
    /// Any schedule started by an earlier call is disposed first. Must be
    /// called from within a tokio runtime.
    pub fn initialize<S, T>(
        &self,
        subject: S,
        tester: Arc<T>,
        on_healthy: TransitionCallback<S>,
        on_unhealthy: TransitionCallback<S>,
    ) where
        S: Send + Sync + 'static,
        T: ConnectionTester<S> + ?Sized + 'static,
    {
        let mut inner = self.shared.lock();
        if let Some((cancel, handle)) = inner.task.take() {
            cancel.cancel();
            handle.abort();
        }
        inner.generation += 1;

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_checks(
            self.shared.clone(),
            inner.generation,
            self.settings,
            subject,
            tester,
            Callbacks {
                on_healthy,
                on_unhealthy,
            },
            cancel.clone(),
        ));
        inner.task = Some((cancel, handle));
    }

    /// Stop probing. Once this returns no further callback fires, even if a
    /// probe was in flight.
    pub fn dispose(&self) {
        let mut inner = self.shared.lock();
        inner.generation += 1;
        if let Some((cancel, handle)) = inner.task.take() {
            cancel.cancel();
            handle.abort();
        }
    }

    /// Whether a probe task is scheduled
    pub fn is_running(&self) -> bool {
        self.shared
            .lock()
            .task
            .as_ref()
            .is_some_and(|(_, handle)| !handle.is_finished())
    }

    pub fn state(&self) -> BreakerState {
        *self.shared.state_tx.borrow()
    }

    /// Receiver that observes every transition
    pub fn subscribe(&self) -> watch::Receiver<BreakerState> {
        self.shared.state_tx.subscribe()
    }

    pub fn last_checked(&self) -> Option<DateTime<Utc>> {
        self.shared.lock().last_checked
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.shared.lock().consecutive_failures
    }
}

impl Drop for ConnectionHealthChecker {
    fn drop(&mut self) {
        self.dispose();
    }
}

async fn run_checks<S, T>(
    shared: Arc<BreakerShared>,
    generation: u64,
    settings: HealthCheckSettings,
    subject: S,
    tester: Arc<T>,
    callbacks: Callbacks<S>,
    cancel: CancellationToken,
) where
    S: Send + Sync + 'static,
    T: ConnectionTester<S> + ?Sized + 'static,
{
    tokio::select! {
        _ = cancel.cancelled() => return,
        _ = tokio::time::sleep(settings.initial_delay) => {}
    }

    let mut ticker = tokio::time::interval(settings.period.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let probe = AssertUnwindSafe(tester.test_connection(&subject)).catch_unwind();
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return,
            outcome = probe => outcome,
        };

        let healthy = match outcome {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "Connection probe failed");
                false
            }
            Err(_) => {
                tracing::error!("Connection probe panicked, counting as failure");
                false
            }
        };

        shared.record(generation, healthy, &subject, &callbacks);
    }
}
