//! Wire protocol between the coordinator, runners, and clients.
//!
//! The message set is closed and known at compile time, so serialization is
//! plain serde derives on plain structs; there is no runtime polymorphism.
//!
//! Runner protocol: coordinator sends a [`RunRequest`] per dispatched block;
//! the runner answers with a [`RunResponse`] carrying exactly one of `error`
//! (the sandbox itself failed) or `status` (the command ran to completion,
//! successfully or not).
//!
//! Client protocol: clients send the text signals `run` / `stop`; the
//! coordinator pushes `block {json}` frames on block transitions,
//! `workflow finished` once the run drains, and `error {message}` for
//! rejected signals.

use crate::definition::{Bind, BlockId, Constraints};
use serde::{Deserialize, Serialize};

/// Client signal starting a workflow run.
pub const RUN_SIGNAL: &str = "run";
/// Client signal requesting cancellation (not implemented).
pub const STOP_SIGNAL: &str = "stop";

/// Prefix of per-block progress frames.
pub const BLOCK_SIGNAL: &str = "block";
/// Prefix of workflow-level frames.
pub const WORKFLOW_SIGNAL: &str = "workflow";
/// Prefix of non-fatal error frames.
pub const ERROR_SIGNAL: &str = "error";

/// Terminal workflow state announced to clients.
pub const FINISHED_STATE: &str = "finished";

/// Everything a runner needs to execute one block run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    pub binds: Vec<Bind>,
    pub argv: Vec<String>,
    pub env: Vec<String>,
    pub constraints: Constraints,
}

/// Resource usage and exit information reported by the runner sandbox.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RunStatus {
    pub exited: bool,
    pub exit_code: i32,
    pub signaled: bool,
    pub term_signal: i32,
    pub time_limit_exceeded: bool,
    pub wall_time_limit_exceeded: bool,
    pub memory_limit_exceeded: bool,
    pub oom_killed: bool,
    pub time_usage_ms: i64,
    pub time_usage_sys_ms: i64,
    pub time_usage_user_ms: i64,
    pub wall_time_usage_ms: i64,
    pub memory_usage_kb: i64,
}

/// Result record for one block run. Exactly one of `error` / `status` is
/// present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RunStatus>,
}

impl RunResponse {
    /// A synthetic failure, used when the coordinator could not even hand the
    /// block to a runner (container preparation failed).
    #[must_use]
    pub fn from_error(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            status: None,
        }
    }

    /// A run succeeded iff the process exited on its own with code 0.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
            && self
                .status
                .as_ref()
                .is_some_and(|status| status.exited && status.exit_code == 0)
    }
}

/// Per-block state transition announced to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockResponse {
    #[serde(rename = "block-id")]
    pub block_id: BlockId,
    pub state: BlockState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RunStatus>,
}

/// Observable lifecycle states of a block run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockState {
    Running,
    Finished,
}

impl BlockResponse {
    /// Marks a block as dispatched to a runner.
    #[must_use]
    pub fn running(block_id: BlockId) -> Self {
        Self {
            block_id,
            state: BlockState::Running,
            error: None,
            status: None,
        }
    }

    /// Marks a block run as finished, carrying the runner's result record.
    #[must_use]
    pub fn finished(block_id: BlockId, response: &RunResponse) -> Self {
        Self {
            block_id,
            state: BlockState::Finished,
            error: response.error.clone(),
            status: response.status,
        }
    }

    /// Encodes the client-facing text frame: `block {json}`.
    #[must_use]
    pub fn to_frame(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_default();
        format!("{BLOCK_SIGNAL} {json}")
    }
}

/// Encodes the workflow completion frame: `workflow finished`.
#[must_use]
pub fn workflow_finished_frame() -> String {
    format!("{WORKFLOW_SIGNAL} {FINISHED_STATE}")
}

/// Encodes a non-fatal error frame: `error {message}`.
#[must_use]
pub fn error_frame(message: impl std::fmt::Display) -> String {
    format!("{ERROR_SIGNAL} {message}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_response_success_requires_clean_exit() {
        let success = RunResponse {
            error: None,
            status: Some(RunStatus {
                exited: true,
                exit_code: 0,
                ..RunStatus::default()
            }),
        };
        assert!(success.is_success());

        let nonzero = RunResponse {
            error: None,
            status: Some(RunStatus {
                exited: true,
                exit_code: 1,
                ..RunStatus::default()
            }),
        };
        assert!(!nonzero.is_success());

        let signaled = RunResponse {
            error: None,
            status: Some(RunStatus {
                exited: false,
                signaled: true,
                term_signal: 9,
                ..RunStatus::default()
            }),
        };
        assert!(!signaled.is_success());

        assert!(!RunResponse::from_error("sandbox failed").is_success());
        assert!(!RunResponse::default().is_success());
    }

    #[test]
    fn run_response_omits_absent_fields() {
        let response = RunResponse::from_error("boom");
        let json = serde_json::to_string(&response).expect("serialize");
        assert_eq!(json, "{\"error\":\"boom\"}");
    }

    #[test]
    fn run_status_serde_uses_kebab_case() {
        let status = RunStatus {
            exited: true,
            time_limit_exceeded: true,
            memory_usage_kb: 42,
            ..RunStatus::default()
        };
        let json = serde_json::to_string(&status).expect("serialize");
        assert!(json.contains("\"time-limit-exceeded\":true"));
        assert!(json.contains("\"memory-usage-kb\":42"));
        let parsed: RunStatus = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(status, parsed);
    }

    #[test]
    fn block_response_frame_format() {
        let frame = BlockResponse::running(3).to_frame();
        assert!(frame.starts_with("block "));
        assert!(frame.contains("\"block-id\":3"));
        assert!(frame.contains("\"state\":\"running\""));
    }

    #[test]
    fn finished_frame_carries_error() {
        let response = RunResponse::from_error("no such file");
        let frame = BlockResponse::finished(0, &response).to_frame();
        assert!(frame.contains("\"state\":\"finished\""));
        assert!(frame.contains("\"error\":\"no such file\""));
    }

    #[test]
    fn workflow_and_error_frames() {
        assert_eq!(workflow_finished_frame(), "workflow finished");
        assert_eq!(error_frame("undefined command"), "error undefined command");
    }
}
