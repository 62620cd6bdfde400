//! Task execution collaborator.

use async_trait::async_trait;

/// Runs one task payload and produces its result text.
#[async_trait]
pub trait TaskExecutor: Send + Sync + std::fmt::Debug {
    /// Execute `task`. Failures are reported inside the returned text.
    async fn execute(&self, task: &str) -> String;
}

/// Executor that answers with a fixed prefix followed by the task itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoExecutor;

/// Prefix of every [`EchoExecutor`] result.
pub const ECHO_PREFIX: &str = "This is the result.";

#[async_trait]
impl TaskExecutor for EchoExecutor {
    async fn execute(&self, task: &str) -> String {
        format!("{ECHO_PREFIX}{task}")
    }
}
