//! Error types for the workflow crate.
//!
//! Layered to match where each failure is handled:
//! - `ValidationError`: structural problems in a submitted workflow, raised
//!   during construction; the candidate state is discarded.
//! - `CommandError`: a client signal that cannot be honored; reported back on
//!   the originating connection, no state change.
//! - `SchedulerError`: registry-level failures (routing to a workflow that
//!   does not exist).

use flowgrid_core::WorkflowId;
use std::fmt;

/// Structural problems in a submitted workflow definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A block declares the same path twice across inputs, outputs, and bind
    /// inside paths.
    DuplicatedPath,
    /// A connection endpoint is out of range.
    InvalidConnection,
    /// A connection from a block to itself.
    LoopsNotSupported,
    /// `meta.max_runners` is below 1.
    InvalidMaxRunners,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicatedPath => write!(f, "duplicated path"),
            Self::InvalidConnection => write!(f, "invalid connection"),
            Self::LoopsNotSupported => write!(f, "loops are not supported"),
            Self::InvalidMaxRunners => write!(f, "'max-runners' is invalid"),
        }
    }
}

impl std::error::Error for ValidationError {}

/// A client signal that cannot be honored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// `run` received while the workflow is already running.
    AlreadyRunning,
    /// `stop` is not implemented.
    NotImplemented,
    /// The signal is not recognized at all.
    UndefinedCommand,
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyRunning => write!(f, "workflow is already running"),
            Self::NotImplemented => write!(f, "not implemented"),
            Self::UndefinedCommand => write!(f, "undefined command"),
        }
    }
}

impl std::error::Error for CommandError {}

/// Registry-level failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// No workflow registered under the given ID.
    WorkflowNotFound { workflow_id: WorkflowId },
    /// The signal was routed but rejected.
    Command(CommandError),
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WorkflowNotFound { workflow_id } => {
                write!(f, "workflow not found: {workflow_id}")
            }
            Self::Command(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for SchedulerError {}

impl From<CommandError> for SchedulerError {
    fn from(e: CommandError) -> Self {
        Self::Command(e)
    }
}
