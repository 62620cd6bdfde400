//! Container table: reusable burst slots driven over the UDP channel.
//!
//! Each container cycles through
//!
//! ```text
//!   Idle ──start_burst──▶ Running(payload) ──finish──▶ Finished(result)
//!    ▲                                                     │
//!    └──────────────────────── get_burst ──────────────────┘
//! ```
//!
//! Callers poll: [`ContainerDispatcher::get_burst`] returns `None` both while
//! the slot is still running and when nothing was started, so "not ready" and
//! "idle" look the same from outside.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use crate::key::redact;
use crate::sentence::{SentenceError, SentenceTemplate};
use crate::state::ClusterState;

use super::dispatcher::BUSY_MESSAGE;

static IDLE_SENTENCE: LazyLock<SentenceTemplate> =
    LazyLock::new(|| SentenceTemplate::new("Burst container has key %s and it is running idle."));
static RUNNING_SENTENCE: LazyLock<SentenceTemplate> = LazyLock::new(|| {
    SentenceTemplate::new("Burst container has key %s and it is running code.Run this.%s")
});
static FINISHED_SENTENCE: LazyLock<SentenceTemplate> = LazyLock::new(|| {
    SentenceTemplate::new(
        "Burst container has key %s and it is finished with the following result %s",
    )
});

/// State of one container slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerStatus {
    /// Free for the next burst.
    Idle,
    /// Executing `payload`.
    Running(String),
    /// Done; `result` waits to be fetched.
    Finished(String),
}

/// A container slot with its key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    /// Slot key handed to the worker at registration.
    pub key: String,
    /// Current state.
    pub status: ContainerStatus,
}

impl Container {
    /// Checkpoint-compatible sentence form.
    pub fn to_sentence(&self) -> String {
        match &self.status {
            ContainerStatus::Idle => IDLE_SENTENCE.print(&[&self.key]),
            ContainerStatus::Running(payload) => RUNNING_SENTENCE.print(&[&self.key, payload]),
            ContainerStatus::Finished(result) => FINISHED_SENTENCE.print(&[&self.key, result]),
        }
    }

    /// Parse the sentence form produced by [`Container::to_sentence`].
    pub fn from_sentence(text: &str) -> Result<Self, SentenceError> {
        if let Ok(mut fields) = IDLE_SENTENCE.scan(text) {
            return Ok(Self {
                key: fields.remove(0),
                status: ContainerStatus::Idle,
            });
        }
        if let Ok(mut fields) = RUNNING_SENTENCE.scan(text) {
            let payload = fields.remove(1);
            return Ok(Self {
                key: fields.remove(0),
                status: ContainerStatus::Running(payload),
            });
        }
        let mut fields = FINISHED_SENTENCE.scan(text)?;
        let result = fields.remove(1);
        Ok(Self {
            key: fields.remove(0),
            status: ContainerStatus::Finished(result),
        })
    }
}

/// Container slots keyed by container key.
#[derive(Debug, Default)]
pub struct ContainerTable {
    containers: HashMap<String, ContainerStatus>,
}

impl ContainerTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an idle slot under `key`.
    pub fn register(&mut self, key: &str) {
        self.containers
            .insert(key.to_string(), ContainerStatus::Idle);
    }

    /// Claim any idle slot for `payload`; `None` means every slot is busy.
    pub fn start(&mut self, payload: &str) -> Option<String> {
        let (key, status) = self
            .containers
            .iter_mut()
            .find(|(_, status)| **status == ContainerStatus::Idle)?;
        *status = ContainerStatus::Running(payload.to_string());
        Some(key.clone())
    }

    /// Payload of `key` if it is running.
    pub fn work(&self, key: &str) -> Option<String> {
        match self.containers.get(key)? {
            ContainerStatus::Running(payload) => Some(payload.clone()),
            _ => None,
        }
    }

    /// Move a running slot to finished. Returns `false` if `key` was not running.
    pub fn finish(&mut self, key: &str, result: &str) -> bool {
        match self.containers.get_mut(key) {
            Some(status) if matches!(status, ContainerStatus::Running(_)) => {
                *status = ContainerStatus::Finished(result.to_string());
                true
            }
            _ => false,
        }
    }

    /// Take the result of a finished slot and make it idle again.
    pub fn fetch(&mut self, key: &str) -> Option<String> {
        let status = self.containers.get_mut(key)?;
        if !matches!(status, ContainerStatus::Finished(_)) {
            return None;
        }
        match std::mem::replace(status, ContainerStatus::Idle) {
            ContainerStatus::Finished(result) => Some(result),
            _ => None,
        }
    }

    /// All slots sorted by key.
    pub fn containers(&self) -> Vec<Container> {
        let mut containers: Vec<Container> = self
            .containers
            .iter()
            .map(|(key, status)| Container {
                key: key.clone(),
                status: status.clone(),
            })
            .collect();
        containers.sort_by(|a, b| a.key.cmp(&b.key));
        containers
    }

    /// Sentence form of the whole table, one container per line.
    pub fn encode(&self) -> String {
        self.containers()
            .iter()
            .map(|container| container.to_sentence() + "\n")
            .collect()
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.containers.len()
    }

    /// Whether no slot is registered.
    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }
}

/// Outcome of [`ContainerDispatcher::run_burst`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerRun {
    /// No idle slot.
    Busy,
    /// The slot finished within the poll budget.
    Finished {
        /// Slot that ran the burst.
        key: String,
        /// Its result.
        result: String,
    },
    /// Still running; fetch `key` later.
    Pending {
        /// Slot running the burst.
        key: String,
    },
}

impl ContainerRun {
    /// Text answered to a caller: the result, the busy message, or empty.
    pub fn into_reply(self) -> String {
        match self {
            Self::Busy => BUSY_MESSAGE.to_string(),
            Self::Finished { result, .. } => result,
            Self::Pending { .. } => String::new(),
        }
    }
}

/// Starts bursts on container slots and polls for their results.
#[derive(Debug, Clone)]
pub struct ContainerDispatcher {
    state: Arc<ClusterState>,
    poll_attempts: u32,
    poll_interval: Duration,
}

impl ContainerDispatcher {
    /// Create a dispatcher polling `poll_attempts` times, `poll_interval` apart.
    pub fn new(state: Arc<ClusterState>, poll_attempts: u32, poll_interval: Duration) -> Self {
        Self {
            state,
            poll_attempts,
            poll_interval,
        }
    }

    /// Claim an idle slot for `payload`, returning its key.
    pub fn start_burst(&self, payload: &str) -> Option<String> {
        let key = self.state.start_container(payload);
        match &key {
            Some(key) => tracing::debug!(container = %redact(key), "Burst started on container"),
            None => tracing::debug!("No idle container"),
        }
        key
    }

    /// Fetch the result of `key` if it finished, freeing the slot.
    pub fn get_burst(&self, key: &str) -> Option<String> {
        self.state.fetch_container(key)
    }

    /// Start a burst and poll briefly for its result.
    pub async fn run_burst(&self, payload: &str) -> ContainerRun {
        let Some(key) = self.start_burst(payload) else {
            return ContainerRun::Busy;
        };
        for _ in 0..self.poll_attempts {
            if let Some(result) = self.get_burst(&key) {
                return ContainerRun::Finished { key, result };
            }
            tokio::time::sleep(self.poll_interval).await;
        }
        ContainerRun::Pending { key }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentence_forms() {
        let cases = [
            ContainerStatus::Idle,
            ContainerStatus::Running("echo 1. echo 2.".into()),
            ContainerStatus::Finished("ok.".into()),
        ];
        for status in cases {
            let container = Container {
                key: "KEY".into(),
                status,
            };
            assert_eq!(Container::from_sentence(&container.to_sentence()).unwrap(), container);
        }
        assert_eq!(
            Container {
                key: "K".into(),
                status: ContainerStatus::Idle
            }
            .to_sentence(),
            "Burst container has key K and it is running idle."
        );
        assert!(Container::from_sentence("Burst container is lost").is_err());
    }

    #[test]
    fn test_slot_lifecycle() {
        let mut table = ContainerTable::new();
        table.register("K");

        assert_eq!(table.start("code").as_deref(), Some("K"));
        assert_eq!(table.start("more"), None);
        assert_eq!(table.work("K").as_deref(), Some("code"));
        assert_eq!(table.fetch("K"), None);

        assert!(table.finish("K", "result"));
        assert!(!table.finish("K", "twice"));
        assert_eq!(table.work("K"), None);
        assert_eq!(table.fetch("K").as_deref(), Some("result"));
        assert_eq!(table.fetch("K"), None);

        assert_eq!(table.start("next").as_deref(), Some("K"));
    }

    #[test]
    fn test_unknown_keys() {
        let mut table = ContainerTable::new();
        assert_eq!(table.work("X"), None);
        assert!(!table.finish("X", "r"));
        assert_eq!(table.fetch("X"), None);
    }

    #[test]
    fn test_encode_lists_every_slot() {
        let mut table = ContainerTable::new();
        table.register("B");
        table.register("A");
        table.start("x");
        let encoded = table.encode();
        assert_eq!(encoded.lines().count(), 2);
        assert!(encoded.lines().all(|line| Container::from_sentence(line).is_ok()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_burst_busy_without_slots() {
        let dispatcher =
            ContainerDispatcher::new(Arc::new(ClusterState::new()), 3, Duration::from_millis(1));
        assert_eq!(dispatcher.run_burst("x").await, ContainerRun::Busy);
        assert_eq!(ContainerRun::Busy.into_reply(), BUSY_MESSAGE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_burst_pending_then_fetched() {
        let state = Arc::new(ClusterState::new());
        state.register_container("K");
        let dispatcher = ContainerDispatcher::new(Arc::clone(&state), 3, Duration::from_millis(1));

        let run = dispatcher.run_burst("x").await;
        assert_eq!(run, ContainerRun::Pending { key: "K".into() });
        assert!(state.finish_container("K", "r"));
        assert_eq!(dispatcher.get_burst("K").as_deref(), Some("r"));
        assert_eq!(dispatcher.start_burst("y").as_deref(), Some("K"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_burst_sees_quick_result() {
        let state = Arc::new(ClusterState::new());
        state.register_container("K");
        let dispatcher = ContainerDispatcher::new(Arc::clone(&state), 15, Duration::from_millis(1));

        let finisher = Arc::clone(&state);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(3)).await;
            finisher.finish_container("K", "quick");
        });
        assert_eq!(
            dispatcher.run_burst("x").await,
            ContainerRun::Finished {
                key: "K".into(),
                result: "quick".into()
            }
        );
    }
}
