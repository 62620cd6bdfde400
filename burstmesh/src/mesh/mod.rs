//! Mesh membership and request routing.
//!
//! ```text
//!   PUT/DELETE /node ──▶ NodeRegistry ──┐
//!                                       ├──▶ RingPropagator ──▶ every active member
//!   PUT /index ────────▶ KeyIndex ──────┘
//!                           │
//!   apikey header ──────────┴──▶ Router ──▶ local handler | owning node | 404 | 410
//! ```
//!
//! Control messages flood to all active members. Joins and evictions are
//! idempotent and index batches are only re-sent when they changed something,
//! so the flood dies out once every node has seen the update.

pub mod index;
pub mod propagator;
pub mod registry;
pub mod router;

pub use index::{IndexEntry, KeyIndex, parse_index_batch};
pub use propagator::{ControlMessage, PropagationReport, RingPropagator};
pub use registry::{EvictOutcome, JoinOutcome, Node, NodeRegistry, NodeStatus};
pub use router::{ProxyOutcome, Resolution, Router};
