//! Burst dispatch: short-lived tasks run by ephemeral workers.
//!
//! Two worker flavours exist side by side:
//!
//! - HTTP workers long-poll `/idle` and meet `/run` callers in the
//!   [`WorkerPool`] double rendezvous.
//! - Container workers hold a reusable slot in the container table and are
//!   driven over the UDP task channel or `/run.container`.
//!
//! Both are gated by [`session::BurstSession`]s opened with a coin.

pub mod container;
pub mod dispatcher;
pub mod executor;
pub mod session;
pub mod worker;

pub use container::{Container, ContainerDispatcher, ContainerRun, ContainerStatus};
pub use dispatcher::{BUSY_MESSAGE, PollOutcome, RunOutcome, WorkerPool, WorkerState};
pub use executor::{EchoExecutor, TaskExecutor};
pub use session::{BurstSession, describe_session};
pub use worker::{HttpWorker, UdpWorker};
