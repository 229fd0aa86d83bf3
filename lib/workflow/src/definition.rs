//! Workflow definition types.
//!
//! A workflow is the validated, immutable description submitted by a client:
//! a list of executable blocks, directed connections routing one block's
//! output file to another block's input slot, and metadata naming the runner
//! partition and the per-workflow concurrency ceiling.
//!
//! Multi-word JSON field names are kebab-case on the wire
//! (`source-block-id`, `max-runners`).

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Index of a block within its workflow.
pub type BlockId = usize;

/// A declared input file of a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Input {
    /// Path of the file inside the block's container.
    pub path: String,
    /// A cached input, once satisfied, stays satisfied across the block's
    /// re-executions without re-propagation.
    #[serde(default)]
    pub cached: bool,
}

/// A declared output file of a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
    /// Path of the file inside the block's container.
    pub path: String,
}

/// An externally mounted file or directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bind {
    /// Mount point inside the container.
    pub inside: String,
    /// Source path outside the container.
    pub outside: String,
    /// Whether the mount is read-only.
    #[serde(default)]
    pub readonly: bool,
}

/// Resource limits applied by the runner sandbox.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Constraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_limit_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wall_time_limit_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_limit_kb: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fsize_limit_kb: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_files: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_threads: Option<i32>,
}

/// A unit of work: a command executed inside a sandboxed container with
/// declared inputs, outputs, and external binds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub inputs: Vec<Input>,
    #[serde(default)]
    pub outputs: Vec<Output>,
    #[serde(default)]
    pub binds: Vec<Bind>,
    #[serde(default)]
    pub argv: Vec<String>,
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub constraints: Constraints,
}

/// A directed edge routing one block's output to another block's input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Connection {
    pub source_block_id: BlockId,
    pub source_output_id: usize,
    pub target_block_id: BlockId,
    pub target_input_id: usize,
}

/// Workflow metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Meta {
    /// Human-readable workflow name.
    pub name: String,
    /// Name of the runner pool this workflow's blocks execute in.
    pub partition: String,
    /// Upper bound on concurrently in-flight blocks for this workflow.
    pub max_runners: usize,
}

/// A complete workflow definition: blocks, connections, metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workflow {
    pub blocks: Vec<Block>,
    pub connections: Vec<Connection>,
    pub meta: Meta,
}

impl Workflow {
    /// Validates the structural invariants of the definition.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::DuplicatedPath`] if a block repeats a path across
    ///   its inputs, outputs, and bind inside paths.
    /// - [`ValidationError::InvalidConnection`] if a connection endpoint is
    ///   out of range.
    /// - [`ValidationError::LoopsNotSupported`] if a connection starts and
    ///   ends at the same block. Cycles spanning two or more blocks are
    ///   permitted.
    /// - [`ValidationError::InvalidMaxRunners`] if `meta.max_runners == 0`.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for block in &self.blocks {
            let mut paths = HashSet::new();
            let inside = block.binds.iter().map(|bind| bind.inside.as_str());
            for path in block
                .inputs
                .iter()
                .map(|input| input.path.as_str())
                .chain(block.outputs.iter().map(|output| output.path.as_str()))
                .chain(inside)
            {
                if !paths.insert(path) {
                    return Err(ValidationError::DuplicatedPath);
                }
            }
        }
        for connection in &self.connections {
            let source = self
                .blocks
                .get(connection.source_block_id)
                .ok_or(ValidationError::InvalidConnection)?;
            let target = self
                .blocks
                .get(connection.target_block_id)
                .ok_or(ValidationError::InvalidConnection)?;
            if connection.source_output_id >= source.outputs.len()
                || connection.target_input_id >= target.inputs.len()
            {
                return Err(ValidationError::InvalidConnection);
            }
            if connection.source_block_id == connection.target_block_id {
                return Err(ValidationError::LoopsNotSupported);
            }
        }
        if self.meta.max_runners == 0 {
            return Err(ValidationError::InvalidMaxRunners);
        }
        Ok(())
    }
}
