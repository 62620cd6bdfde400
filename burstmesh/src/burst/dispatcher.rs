//! Worker pool dispatcher: matches `/run` tasks with `/idle` workers.
//!
//! There is no task queue. A task only runs if a worker is waiting at the
//! moment it is submitted; both sides meet in a double rendezvous and every
//! handoff is bounded by the runtime budget.
//!
//! # Protocol
//!
//! ```text
//! client (/run)                       tasks                       worker (/idle)
//!   │  new call: Rendezvous<String>     │                              │
//!   │── send(call) ───────────────────▶ │ ◀──────────────── recv() ────│  (worker Ready)
//!   │── call.send(payload) ─────────────┼────────────── call.recv() ──▶│  pending[key] = call
//!   │                                   │                  HTTP 200 payload
//!   │                                   │                              │  ... runs task ...
//!   │◀─ call.recv(2 × runtime) ─────────┼─ call.send(result, 10ms) ────│  PUT /idle, pending removed
//! ```
//!
//! Worker slots move `Registering → Ready → Matched`. Readiness is derived
//! from the registration time plus a warm-up delay; the first registration of
//! the process uses a shorter warm-up so a fresh node does not stall.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::time::Instant;

use crate::config::BurstConfig;
use crate::key::{generate_unique_key, redact};
use crate::rendezvous::Rendezvous;
use crate::state::ClusterState;

/// Body returned when no worker could take a task.
pub const BUSY_MESSAGE: &str = "The system is busy. Please reload.";

/// Lifecycle state of a registered worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Still warming up; polls are answered with an empty body.
    Registering,
    /// Polls wait for a task.
    Ready,
}

/// Registration record of one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerRecord {
    /// When the warm-up delay ends.
    pub ready_at: Instant,
    /// Last time the worker polled.
    pub last_seen: Instant,
}

impl WorkerRecord {
    /// State of the worker at `now`.
    pub fn state(&self, now: Instant) -> WorkerState {
        if now >= self.ready_at {
            WorkerState::Ready
        } else {
            WorkerState::Registering
        }
    }
}

/// Registered, not yet matched workers keyed by worker key.
#[derive(Debug, Default)]
pub struct WorkerTable {
    workers: HashMap<String, WorkerRecord>,
}

impl WorkerTable {
    /// Register `key`, ready after `warmup`.
    pub fn register(&mut self, key: &str, now: Instant, warmup: Duration) {
        self.workers.insert(
            key.to_string(),
            WorkerRecord {
                ready_at: now + warmup,
                last_seen: now,
            },
        );
    }

    /// State of `key` at `now`, recording the poll.
    pub fn poll(&mut self, key: &str, now: Instant) -> Option<WorkerState> {
        let record = self.workers.get_mut(key)?;
        record.last_seen = now;
        Some(record.state(now))
    }

    /// Forget `key`. Returns whether it was registered.
    pub fn remove(&mut self, key: &str) -> bool {
        self.workers.remove(key).is_some()
    }

    /// Drop workers that have not polled for `ttl` since becoming ready.
    pub fn sweep(&mut self, now: Instant, ttl: Duration) -> usize {
        let before = self.workers.len();
        self.workers
            .retain(|_, record| now < record.ready_at.max(record.last_seen) + ttl);
        before - self.workers.len()
    }

    /// Number of registered workers.
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// Whether no worker is registered.
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

/// A matched task waiting for its worker's result.
#[derive(Debug, Clone)]
pub struct PendingResult {
    /// Channel the submitting client listens on.
    pub reply: Rendezvous<String>,
    /// When the worker was matched.
    pub created_at: Instant,
}

/// Pending results keyed by worker key.
#[derive(Debug, Default)]
pub struct PendingResults {
    pending: HashMap<String, PendingResult>,
}

impl PendingResults {
    /// Record that `key` owes a result on `reply`.
    pub fn insert(&mut self, key: &str, reply: Rendezvous<String>, now: Instant) {
        self.pending.insert(
            key.to_string(),
            PendingResult {
                reply,
                created_at: now,
            },
        );
    }

    /// Remove and return the pending entry of `key`.
    pub fn take(&mut self, key: &str) -> Option<PendingResult> {
        self.pending.remove(key)
    }

    /// Drop entries older than `ttl`.
    pub fn sweep(&mut self, now: Instant, ttl: Duration) -> usize {
        let before = self.pending.len();
        self.pending
            .retain(|_, pending| now < pending.created_at + ttl);
        before - self.pending.len()
    }

    /// Number of pending results.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Answer to a worker's `GET /idle` poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// A task was matched; the payload goes back to the worker.
    Task(String),
    /// The worker is still warming up.
    NotReady,
    /// The worker is ready but no task arrived within the runtime budget.
    NoTask,
    /// The key is not a registered worker.
    Unknown,
}

/// Result of a `/run` submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The worker reported this result.
    Completed(String),
    /// No worker picked up the task.
    Busy,
    /// A worker took the task but no result arrived in time.
    TimedOut,
}

/// Matches tasks with idle workers through a shared rendezvous.
#[derive(Debug)]
pub struct WorkerPool {
    state: Arc<ClusterState>,
    tasks: Rendezvous<Rendezvous<String>>,
    config: BurstConfig,
    first_registration: AtomicBool,
}

impl WorkerPool {
    /// Create a dispatcher over the node's shared tables.
    pub fn new(state: Arc<ClusterState>, config: BurstConfig) -> Self {
        Self {
            state,
            tasks: Rendezvous::new(),
            config,
            first_registration: AtomicBool::new(true),
        }
    }

    /// Burst budgets in use.
    pub fn config(&self) -> &BurstConfig {
        &self.config
    }

    /// Issue a fresh worker key and start its warm-up.
    pub fn register(&self) -> String {
        let key = generate_unique_key();
        let warmup = if self.first_registration.swap(false, Ordering::SeqCst) {
            self.config.first_warmup
        } else {
            self.config.warmup
        };
        self.state.register_worker(&key, Instant::now(), warmup);
        tracing::debug!(worker = %redact(&key), ?warmup, "Burst worker registered");
        key
    }

    /// Handle a worker poll: wait up to the runtime budget for a task.
    pub async fn poll(&self, key: &str) -> PollOutcome {
        match self.state.poll_worker(key, Instant::now()) {
            None => return PollOutcome::Unknown,
            Some(WorkerState::Registering) => return PollOutcome::NotReady,
            Some(WorkerState::Ready) => {}
        }

        let runtime = self.config.max_runtime;
        let Ok(call) = self.tasks.recv(runtime).await else {
            return PollOutcome::NoTask;
        };
        let payload = match call.recv(runtime).await {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(
                    worker = %redact(key),
                    error = %e,
                    "Client vanished before sending its task"
                );
                return PollOutcome::NoTask;
            }
        };

        self.state.claim_worker(key, call, Instant::now());
        tracing::debug!(worker = %redact(key), bytes = payload.len(), "Task matched with worker");
        PollOutcome::Task(payload)
    }

    /// Submit a task and wait for its result.
    ///
    /// Waits at most the runtime budget to meet a worker, the runtime budget
    /// to hand over the payload, and twice the runtime budget for the result.
    pub async fn submit(&self, payload: String) -> RunOutcome {
        let runtime = self.config.max_runtime;
        let call = Rendezvous::new();

        if self.tasks.send(call.clone(), runtime).await.is_err() {
            tracing::debug!("No idle worker for task");
            return RunOutcome::Busy;
        }
        if call.send(payload, runtime).await.is_err() {
            tracing::warn!("Worker did not pick up the task payload");
            return RunOutcome::Busy;
        }
        match call.recv(runtime.saturating_mul(2)).await {
            Ok(result) => RunOutcome::Completed(result),
            Err(_) => {
                tracing::warn!("Worker result did not arrive in time");
                RunOutcome::TimedOut
            }
        }
    }

    /// Deliver a worker's result to its waiting client.
    ///
    /// The pending entry is removed whether or not the client is still
    /// listening. Returns `true` if the client took the result.
    pub async fn post_result(&self, key: &str, result: String) -> bool {
        let Some(pending) = self.state.take_pending(key) else {
            tracing::debug!(worker = %redact(key), "Result posted without a pending task");
            return false;
        };
        let delivered = pending
            .reply
            .send(result, self.config.result_post_window)
            .await
            .is_ok();
        if !delivered {
            tracing::warn!(worker = %redact(key), "Client gave up before the result arrived");
        }
        delivered
    }
}
