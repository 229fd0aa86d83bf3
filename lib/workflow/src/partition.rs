//! Rendezvous between idle runners and ready blocks.
//!
//! A [`Partition`] is a named pool of runner sessions. It holds two queues,
//! idle runners and pending blocks, and at most one of them is non-empty at
//! any time: an arriving runner is matched against the oldest pending block,
//! an arriving block against the oldest idle runner. Both sides are FIFO, so
//! work is spread across runners and waiting workflows in arrival order.
//!
//! A match is returned to the caller as an [`Assignment`]; the partition
//! itself never talks to sessions or workflow state.

use flowgrid_core::{RunnerId, WorkflowId};
use std::collections::VecDeque;

use crate::definition::BlockId;

/// A matched (block, runner) pair, ready for dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assignment {
    pub workflow_id: WorkflowId,
    pub block_id: BlockId,
    pub runner_id: RunnerId,
}

/// One named runner pool.
#[derive(Debug, Default)]
pub struct Partition {
    idle_runners: VecDeque<RunnerId>,
    pending_blocks: VecDeque<(WorkflowId, BlockId)>,
}

impl Partition {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Offers an idle runner. Returns an assignment if a block is waiting,
    /// otherwise parks the runner.
    pub fn add_runner(&mut self, runner_id: RunnerId) -> Option<Assignment> {
        if let Some((workflow_id, block_id)) = self.pending_blocks.pop_front() {
            return Some(Assignment {
                workflow_id,
                block_id,
                runner_id,
            });
        }
        self.idle_runners.push_back(runner_id);
        None
    }

    /// Removes a disconnected runner from the idle queue, if present.
    pub fn remove_runner(&mut self, runner_id: RunnerId) {
        self.idle_runners.retain(|id| *id != runner_id);
    }

    /// Offers a ready block. Returns an assignment if a runner is idle,
    /// otherwise parks the block.
    pub fn enqueue_block(&mut self, workflow_id: WorkflowId, block_id: BlockId) -> Option<Assignment> {
        if let Some(runner_id) = self.idle_runners.pop_front() {
            return Some(Assignment {
                workflow_id,
                block_id,
                runner_id,
            });
        }
        self.pending_blocks.push_back((workflow_id, block_id));
        None
    }

    #[must_use]
    pub fn cnt_idle_runners(&self) -> usize {
        self.idle_runners.len()
    }

    #[must_use]
    pub fn cnt_pending_blocks(&self) -> usize {
        self.pending_blocks.len()
    }

    /// A partition with no runners and no backlog can be dropped.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.idle_runners.is_empty() && self.pending_blocks.is_empty()
    }
}
