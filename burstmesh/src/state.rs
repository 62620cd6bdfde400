//! Process-wide cluster state behind one lock.
//!
//! Every shared table of a node lives in [`ClusterState`]. Callers never see
//! the tables directly: each method takes the lock, performs one complete
//! mutation or lookup, and releases it before returning. Nothing awaits while
//! the lock is held.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use crate::burst::container::ContainerTable;
use crate::burst::dispatcher::{PendingResult, PendingResults, WorkerState, WorkerTable};
use crate::burst::session::{BurstSession, SessionTable};
use crate::mesh::index::KeyIndex;
use crate::mesh::registry::{EvictOutcome, JoinOutcome, NodeRegistry, NodeStatus};
use crate::mesh::router::Resolution;
use crate::rendezvous::Rendezvous;

#[derive(Debug, Default)]
struct Tables {
    nodes: NodeRegistry,
    index: KeyIndex,
    sessions: SessionTable,
    workers: WorkerTable,
    pending: PendingResults,
    containers: ContainerTable,
}

/// Entries dropped by one [`ClusterState::sweep`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Expired sessions.
    pub sessions: usize,
    /// Pending results nobody collected.
    pub pending: usize,
    /// Workers that stopped polling.
    pub workers: usize,
}

impl SweepReport {
    /// Whether the pass dropped nothing.
    pub fn is_empty(&self) -> bool {
        self.sessions == 0 && self.pending == 0 && self.workers == 0
    }
}

/// All shared tables of one node.
#[derive(Debug, Default)]
pub struct ClusterState {
    tables: Mutex<Tables>,
}

impl ClusterState {
    /// Create empty state.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Mesh membership

    /// Add a member.
    pub fn join_node(&self, address: &str) -> JoinOutcome {
        self.lock().nodes.join(address)
    }

    /// Evict a member.
    pub fn evict_node(&self, address: &str) -> EvictOutcome {
        self.lock().nodes.evict(address)
    }

    /// Membership status of `address`.
    pub fn node_status(&self, address: &str) -> Option<NodeStatus> {
        self.lock().nodes.status(address)
    }

    /// Active members other than `own_address`.
    pub fn propagation_targets(&self, own_address: &str) -> Vec<String> {
        self.lock().nodes.propagation_targets(own_address)
    }

    // Key index

    /// Replace the index with a received batch. Returns `true` on change.
    pub fn replace_index(&self, entries: HashMap<String, String>) -> bool {
        self.lock().index.replace(entries)
    }

    /// Record that `server` owns `api_key`. Returns `true` on change.
    pub fn register_key(&self, api_key: &str, server: &str) -> bool {
        self.lock().index.insert(api_key, server).as_deref() != Some(server)
    }

    /// Sentence encoding of the whole index.
    pub fn encode_index(&self) -> String {
        self.lock().index.encode()
    }

    /// Owner of `api_key`.
    pub fn lookup_key(&self, api_key: &str) -> Option<String> {
        self.lock().index.lookup(api_key).map(str::to_string)
    }

    /// Where a request for `api_key` should be served.
    ///
    /// Index lookup and owner status are read under the same lock so an
    /// eviction cannot slip in between.
    pub fn resolve_key(&self, api_key: &str, own_address: &str) -> Resolution {
        let tables = self.lock();
        let Some(server) = tables.index.lookup(api_key) else {
            return Resolution::Unknown;
        };
        if server == own_address {
            return Resolution::Local;
        }
        match tables.nodes.status(server) {
            Some(NodeStatus::Evicted) => Resolution::Gone {
                server: server.to_string(),
            },
            _ => Resolution::Remote {
                server: server.to_string(),
            },
        }
    }

    // Sessions

    /// Store a redeemed session.
    pub fn open_session(&self, session: BurstSession) {
        self.lock().sessions.insert(session);
    }

    /// The active session of `api_key` at `now`.
    pub fn active_session(&self, api_key: &str, now: Instant) -> Option<BurstSession> {
        self.lock().sessions.active(api_key, now).cloned()
    }

    // HTTP workers

    /// Register a worker key with its warm-up.
    pub fn register_worker(&self, key: &str, now: Instant, warmup: Duration) {
        self.lock().workers.register(key, now, warmup);
    }

    /// Record a poll of `key` and return its state.
    pub fn poll_worker(&self, key: &str, now: Instant) -> Option<WorkerState> {
        self.lock().workers.poll(key, now)
    }

    /// Consume the registration of `key` and record that it owes a result.
    pub fn claim_worker(&self, key: &str, reply: Rendezvous<String>, now: Instant) {
        let mut tables = self.lock();
        tables.workers.remove(key);
        tables.pending.insert(key, reply, now);
    }

    /// Remove and return the pending result entry of `key`.
    pub fn take_pending(&self, key: &str) -> Option<PendingResult> {
        self.lock().pending.take(key)
    }

    // Containers

    /// Add an idle container slot.
    pub fn register_container(&self, key: &str) {
        self.lock().containers.register(key);
    }

    /// Claim an idle container for `payload`.
    pub fn start_container(&self, payload: &str) -> Option<String> {
        self.lock().containers.start(payload)
    }

    /// Payload of a running container.
    pub fn container_work(&self, key: &str) -> Option<String> {
        self.lock().containers.work(key)
    }

    /// Mark a running container finished.
    pub fn finish_container(&self, key: &str, result: &str) -> bool {
        self.lock().containers.finish(key, result)
    }

    /// Take a finished result, freeing the slot.
    pub fn fetch_container(&self, key: &str) -> Option<String> {
        self.lock().containers.fetch(key)
    }

    /// Sentence encoding of the container table.
    pub fn encode_containers(&self) -> String {
        self.lock().containers.encode()
    }

    // Housekeeping

    /// Drop expired sessions, stale pending results and silent workers.
    pub fn sweep(&self, now: Instant, pending_ttl: Duration, worker_ttl: Duration) -> SweepReport {
        let mut tables = self.lock();
        SweepReport {
            sessions: tables.sessions.sweep(now),
            pending: tables.pending.sweep(now, pending_ttl),
            workers: tables.workers.sweep(now, worker_ttl),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_key() {
        let state = ClusterState::new();
        state.join_node("self:1");
        state.join_node("b:1");
        state.register_key("MINE", "self:1");
        state.register_key("THEIRS", "b:1");
        state.register_key("STRAY", "c:1");

        assert_eq!(state.resolve_key("MINE", "self:1"), Resolution::Local);
        assert_eq!(
            state.resolve_key("THEIRS", "self:1"),
            Resolution::Remote {
                server: "b:1".into()
            }
        );
        assert_eq!(
            state.resolve_key("STRAY", "self:1"),
            Resolution::Remote {
                server: "c:1".into()
            }
        );
        assert_eq!(state.resolve_key("NONE", "self:1"), Resolution::Unknown);

        state.evict_node("b:1");
        assert_eq!(
            state.resolve_key("THEIRS", "self:1"),
            Resolution::Gone {
                server: "b:1".into()
            }
        );
    }

    #[test]
    fn test_register_key_reports_change() {
        let state = ClusterState::new();
        assert!(state.register_key("K", "a:1"));
        assert!(!state.register_key("K", "a:1"));
        assert!(state.register_key("K", "b:1"));
        assert_eq!(state.lookup_key("K").as_deref(), Some("b:1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_claim_moves_worker_to_pending() {
        let state = ClusterState::new();
        let now = Instant::now();
        state.register_worker("W", now, Duration::ZERO);
        state.claim_worker("W", Rendezvous::new(), now);

        assert_eq!(state.poll_worker("W", now), None);
        assert!(state.take_pending("W").is_some());
        assert!(state.take_pending("W").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep() {
        let state = ClusterState::new();
        let now = Instant::now();
        state.open_session(BurstSession {
            api_key: "S".into(),
            descriptor: String::new(),
            expires_at: now + Duration::from_secs(1),
        });
        state.register_worker("W", now, Duration::from_secs(1));
        state.claim_worker("P", Rendezvous::new(), now);

        let report = state.sweep(now, Duration::from_secs(4), Duration::from_secs(8));
        assert!(report.is_empty());

        let report = state.sweep(
            now + Duration::from_secs(10),
            Duration::from_secs(4),
            Duration::from_secs(8),
        );
        assert_eq!(
            report,
            SweepReport {
                sessions: 1,
                pending: 1,
                workers: 1
            }
        );
        assert!(state.active_session("S", now).is_none());
    }
}
