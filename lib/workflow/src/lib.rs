//! Scheduling engine for flowgrid workflows.
//!
//! A workflow is a set of sandboxed command blocks wired together by
//! connections that route one block's output file into another block's input
//! slot. This crate holds the engine: definitions and validation
//! ([`definition`]), per-workflow execution state ([`state`]), runner pools
//! ([`partition`]), the registry and dispatch loop ([`scheduler`]), and the
//! wire messages ([`protocol`]).
//!
//! The engine is fully synchronous and owns no I/O. Container storage and
//! session delivery are injected through the [`container::ContainerStore`]
//! and [`transport::SessionSink`] seams; the coordinator binary supplies the
//! real implementations, tests use the in-memory ones.

pub mod container;
pub mod definition;
pub mod error;
pub mod partition;
pub mod protocol;
pub mod scheduler;
pub mod state;
pub mod transport;

pub use container::{ContainerStore, FsContainerStore, MemoryContainerStore};
pub use definition::{Block, BlockId, Connection, Meta, Workflow};
pub use error::{CommandError, SchedulerError, ValidationError};
pub use partition::{Assignment, Partition};
pub use protocol::{BlockResponse, BlockState, RunRequest, RunResponse, RunStatus};
pub use scheduler::Scheduler;
pub use state::WorkflowState;
pub use transport::{RecordingSink, SessionSink};
