//! Per-workflow execution state.
//!
//! [`WorkflowState`] pairs an immutable, validated [`Workflow`] definition
//! with the mutable bookkeeping of one or more runs over it:
//!
//! - per-block input satisfaction and run counters ([`BlockRunState`]),
//! - a FIFO queue of blocks whose inputs are all satisfied,
//! - the number of blocks currently in flight, capped by `max_runners`,
//! - the set of subscribed client sessions.
//!
//! A block is ready iff every declared input slot is filled. Readiness is
//! edge-triggered: a block enters the queue exactly when its last input slot
//! fills, so within one run a block re-executes only when a cycle refills a
//! cleared slot. Failed runs propagate nothing, which silently stalls
//! dependents; the workflow still drains and completes.

use flowgrid_core::{ClientId, WorkflowId};
use std::collections::{HashSet, VecDeque};
use std::io;
use std::path::PathBuf;

use crate::container::ContainerStore;
use crate::definition::{Bind, BlockId, Connection, Workflow};
use crate::error::{CommandError, ValidationError};
use crate::protocol::RunRequest;
use crate::transport::SessionSink;

/// Mutable per-block bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRunState {
    /// Number of filled input slots.
    pub cnt_inputs_ready: usize,
    /// Host path feeding each input slot, in declaration order.
    pub input_sources: Vec<Option<PathBuf>>,
    /// Completed run count; also the id of the next run. Monotonic across
    /// the workflow's lifetime, never reset.
    pub cnt_runs: usize,
}

impl BlockRunState {
    fn new(cnt_inputs: usize) -> Self {
        Self {
            cnt_inputs_ready: 0,
            input_sources: vec![None; cnt_inputs],
            cnt_runs: 0,
        }
    }
}

/// Execution state of a single registered workflow.
pub struct WorkflowState {
    id: WorkflowId,
    workflow: Workflow,
    /// Outgoing connections grouped by source block.
    outgoing: Vec<Vec<Connection>>,
    blocks: Vec<BlockRunState>,
    ready: VecDeque<BlockId>,
    cnt_blocks_processing: usize,
    is_running: bool,
    clients: HashSet<ClientId>,
}

impl WorkflowState {
    /// Validates the definition and builds the initial state.
    pub fn new(id: WorkflowId, workflow: Workflow) -> Result<Self, ValidationError> {
        workflow.validate()?;
        let mut outgoing = vec![Vec::new(); workflow.blocks.len()];
        for connection in &workflow.connections {
            outgoing[connection.source_block_id].push(*connection);
        }
        let blocks = workflow
            .blocks
            .iter()
            .map(|block| BlockRunState::new(block.inputs.len()))
            .collect();
        Ok(Self {
            id,
            workflow,
            outgoing,
            blocks,
            ready: VecDeque::new(),
            cnt_blocks_processing: 0,
            is_running: false,
            clients: HashSet::new(),
        })
    }

    #[must_use]
    pub fn id(&self) -> WorkflowId {
        self.id
    }

    #[must_use]
    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    /// Runner pool this workflow's blocks execute in.
    #[must_use]
    pub fn partition(&self) -> &str {
        &self.workflow.meta.partition
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.is_running
    }

    #[must_use]
    pub fn block_state(&self, block_id: BlockId) -> &BlockRunState {
        &self.blocks[block_id]
    }

    /// Outgoing connections of a block, in definition order.
    #[must_use]
    pub fn outgoing(&self, block_id: BlockId) -> &[Connection] {
        &self.outgoing[block_id]
    }

    /// Starts a run: clears every block's input readiness and queues the
    /// blocks with no declared inputs. Run counters are never reset, so
    /// container identities stay unique across runs.
    ///
    /// # Errors
    ///
    /// [`CommandError::AlreadyRunning`] if a run is in progress.
    pub fn start(&mut self) -> Result<(), CommandError> {
        if self.is_running {
            return Err(CommandError::AlreadyRunning);
        }
        self.is_running = true;
        for (block_id, state) in self.blocks.iter_mut().enumerate() {
            state.cnt_inputs_ready = 0;
            state.input_sources.fill(None);
            if self.workflow.blocks[block_id].inputs.is_empty() {
                self.ready.push_back(block_id);
            }
        }
        tracing::debug!(workflow_id = %self.id, queued = self.ready.len(), "workflow started");
        Ok(())
    }

    /// Cancellation is not supported.
    ///
    /// # Errors
    ///
    /// Always [`CommandError::NotImplemented`].
    pub fn stop(&mut self) -> Result<(), CommandError> {
        Err(CommandError::NotImplemented)
    }

    #[must_use]
    pub fn is_block_ready(&self, block_id: BlockId) -> bool {
        self.blocks[block_id].cnt_inputs_ready == self.workflow.blocks[block_id].inputs.len()
    }

    /// Pops ready blocks up to the `max_runners` ceiling; each popped block
    /// counts as in flight until [`WorkflowState::block_done`].
    pub fn drain_ready(&mut self) -> Vec<BlockId> {
        let mut dispatched = Vec::new();
        while self.cnt_blocks_processing < self.workflow.meta.max_runners {
            let Some(block_id) = self.ready.pop_front() else {
                break;
            };
            self.cnt_blocks_processing += 1;
            dispatched.push(block_id);
        }
        dispatched
    }

    /// Closes out one run of a block: bumps the run counter and clears every
    /// non-cached input slot. Cached slots stay filled.
    pub fn finalize_run(&mut self, block_id: BlockId) {
        let state = &mut self.blocks[block_id];
        state.cnt_runs += 1;
        let inputs = &self.workflow.blocks[block_id].inputs;
        let mut ready = 0;
        for (input, slot) in inputs.iter().zip(state.input_sources.iter_mut()) {
            if input.cached && slot.is_some() {
                ready += 1;
            } else {
                *slot = None;
            }
        }
        state.cnt_inputs_ready = ready;
    }

    /// Propagates one connection after a successful run of its source block.
    ///
    /// Records the source output's host path into the target input slot.
    /// No-op when the source run produced no such file or the slot is
    /// already filled. Returns `true` iff the target block became ready.
    pub fn process_connection(
        &mut self,
        connection: Connection,
        store: &dyn ContainerStore,
    ) -> bool {
        let source_run = self.blocks[connection.source_block_id]
            .cnt_runs
            .saturating_sub(1);
        let output = &self.workflow.blocks[connection.source_block_id].outputs
            [connection.source_output_id]
            .path;
        if !store.output_exists(self.id, connection.source_block_id, source_run, output) {
            return false;
        }
        let target = &mut self.blocks[connection.target_block_id];
        if target.input_sources[connection.target_input_id].is_some() {
            return false;
        }
        target.input_sources[connection.target_input_id] =
            Some(store.output_path(self.id, connection.source_block_id, source_run, output));
        target.cnt_inputs_ready += 1;
        self.is_block_ready(connection.target_block_id)
    }

    /// Queues a block that just became ready.
    pub fn enqueue_block(&mut self, block_id: BlockId) {
        self.ready.push_back(block_id);
    }

    /// Builds the run request for the block's upcoming run, creating its
    /// container directory.
    ///
    /// Bind order: the container mounted read-write at `.`, then one
    /// read-only bind per satisfied input slot, then the block's own binds.
    ///
    /// # Errors
    ///
    /// Propagates container creation failures.
    pub fn build_run_request(
        &self,
        block_id: BlockId,
        store: &dyn ContainerStore,
    ) -> io::Result<RunRequest> {
        let block = &self.workflow.blocks[block_id];
        let state = &self.blocks[block_id];
        let container = store.ensure_container(self.id, block_id, state.cnt_runs)?;
        let mut binds = vec![Bind {
            inside: ".".to_string(),
            outside: container.to_string_lossy().into_owned(),
            readonly: false,
        }];
        for (input, slot) in block.inputs.iter().zip(state.input_sources.iter()) {
            if let Some(source) = slot {
                binds.push(Bind {
                    inside: input.path.clone(),
                    outside: source.to_string_lossy().into_owned(),
                    readonly: true,
                });
            }
        }
        binds.extend(block.binds.iter().cloned());
        Ok(RunRequest {
            binds,
            argv: block.argv.clone(),
            env: block.env.clone(),
            constraints: block.constraints.clone(),
        })
    }

    /// Marks one in-flight block as done.
    pub fn block_done(&mut self) {
        self.cnt_blocks_processing = self.cnt_blocks_processing.saturating_sub(1);
    }

    #[must_use]
    pub fn cnt_blocks_processing(&self) -> usize {
        self.cnt_blocks_processing
    }

    /// Transitions to finished when nothing is in flight and nothing is
    /// queued. Returns `true` exactly once per run.
    pub fn try_finish(&mut self) -> bool {
        if self.is_running && self.cnt_blocks_processing == 0 && self.ready.is_empty() {
            self.is_running = false;
            tracing::debug!(workflow_id = %self.id, "workflow finished");
            return true;
        }
        false
    }

    pub fn add_client(&mut self, client_id: ClientId) {
        self.clients.insert(client_id);
    }

    pub fn remove_client(&mut self, client_id: ClientId) {
        self.clients.remove(&client_id);
    }

    /// Pushes a text frame to every subscribed client.
    pub fn send_to_clients(&self, sessions: &dyn SessionSink, frame: &str) {
        for client_id in &self.clients {
            sessions.send_to_client(*client_id, frame);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::MemoryContainerStore;
    use crate::definition::{Block, Input, Meta, Output};

    fn meta(max_runners: usize) -> Meta {
        Meta {
            name: "test".to_string(),
            partition: "all".to_string(),
            max_runners,
        }
    }

    fn block(inputs: &[(&str, bool)], outputs: &[&str]) -> Block {
        Block {
            inputs: inputs
                .iter()
                .map(|(path, cached)| Input {
                    path: (*path).to_string(),
                    cached: *cached,
                })
                .collect(),
            outputs: outputs
                .iter()
                .map(|path| Output {
                    path: (*path).to_string(),
                })
                .collect(),
            ..Block::default()
        }
    }

    fn connection(source: BlockId, target: BlockId) -> Connection {
        Connection {
            source_block_id: source,
            source_output_id: 0,
            target_block_id: target,
            target_input_id: 0,
        }
    }

    fn pipeline() -> WorkflowState {
        // 0 --> 1, both single-port.
        let workflow = Workflow {
            blocks: vec![block(&[], &["a"]), block(&[("a", false)], &[])],
            connections: vec![connection(0, 1)],
            meta: meta(4),
        };
        WorkflowState::new(WorkflowId::new(), workflow).expect("valid workflow")
    }

    #[test]
    fn new_rejects_invalid_definition() {
        let workflow = Workflow {
            blocks: vec![],
            connections: vec![],
            meta: meta(0),
        };
        assert!(WorkflowState::new(WorkflowId::new(), workflow).is_err());
    }

    #[test]
    fn start_queues_source_blocks_only() {
        let mut state = pipeline();
        state.start().expect("start");
        assert_eq!(state.drain_ready(), vec![0]);
    }

    #[test]
    fn double_start_rejected() {
        let mut state = pipeline();
        state.start().expect("start");
        assert_eq!(state.start(), Err(CommandError::AlreadyRunning));
    }

    #[test]
    fn stop_is_not_implemented() {
        let mut state = pipeline();
        assert_eq!(state.stop(), Err(CommandError::NotImplemented));
    }

    #[test]
    fn drain_respects_max_runners() {
        let workflow = Workflow {
            blocks: vec![block(&[], &[]), block(&[], &[]), block(&[], &[])],
            connections: vec![],
            meta: meta(2),
        };
        let mut state = WorkflowState::new(WorkflowId::new(), workflow).expect("valid workflow");
        state.start().expect("start");
        assert_eq!(state.drain_ready(), vec![0, 1]);
        assert_eq!(state.drain_ready(), Vec::<BlockId>::new());
        state.block_done();
        assert_eq!(state.drain_ready(), vec![2]);
    }

    #[test]
    fn propagation_fills_slot_once() {
        let mut state = pipeline();
        let store = MemoryContainerStore::new();
        state.start().expect("start");
        state.drain_ready();

        state.finalize_run(0);
        store.add_output(state.id(), 0, 0, "a");
        assert!(state.process_connection(connection(0, 1), &store));
        // Slot already filled; second delivery is a no-op.
        assert!(!state.process_connection(connection(0, 1), &store));
        assert_eq!(state.block_state(1).cnt_inputs_ready, 1);
    }

    #[test]
    fn propagation_skips_missing_output() {
        let mut state = pipeline();
        let store = MemoryContainerStore::new();
        state.start().expect("start");
        state.drain_ready();

        state.finalize_run(0);
        assert!(!state.process_connection(connection(0, 1), &store));
        assert!(!state.is_block_ready(1));
    }

    #[test]
    fn finalize_clears_non_cached_slots() {
        let mut state = pipeline();
        let store = MemoryContainerStore::new();
        state.start().expect("start");
        state.drain_ready();
        state.finalize_run(0);
        store.add_output(state.id(), 0, 0, "a");
        state.process_connection(connection(0, 1), &store);

        state.finalize_run(1);
        assert_eq!(state.block_state(1).cnt_runs, 1);
        assert_eq!(state.block_state(1).cnt_inputs_ready, 0);
        assert!(state.block_state(1).input_sources[0].is_none());
    }

    #[test]
    fn finalize_keeps_cached_slots() {
        let workflow = Workflow {
            blocks: vec![block(&[], &["a"]), block(&[("a", true)], &[])],
            connections: vec![connection(0, 1)],
            meta: meta(4),
        };
        let mut state = WorkflowState::new(WorkflowId::new(), workflow).expect("valid workflow");
        let store = MemoryContainerStore::new();
        state.start().expect("start");
        state.drain_ready();
        state.finalize_run(0);
        store.add_output(state.id(), 0, 0, "a");
        state.process_connection(connection(0, 1), &store);

        state.finalize_run(1);
        assert_eq!(state.block_state(1).cnt_inputs_ready, 1);
        assert!(state.is_block_ready(1));
    }

    #[test]
    fn run_request_bind_order() {
        let workflow = Workflow {
            blocks: vec![
                block(&[], &["a"]),
                Block {
                    binds: vec![Bind {
                        inside: "data".to_string(),
                        outside: "/srv/data".to_string(),
                        readonly: true,
                    }],
                    argv: vec!["cat".to_string(), "a".to_string()],
                    ..block(&[("a", false)], &[])
                },
            ],
            connections: vec![connection(0, 1)],
            meta: meta(4),
        };
        let mut state = WorkflowState::new(WorkflowId::new(), workflow).expect("valid workflow");
        let store = MemoryContainerStore::new();
        state.start().expect("start");
        state.drain_ready();
        state.finalize_run(0);
        store.add_output(state.id(), 0, 0, "a");
        state.process_connection(connection(0, 1), &store);

        let request = state.build_run_request(1, &store).expect("run request");
        assert_eq!(request.binds.len(), 3);
        assert_eq!(request.binds[0].inside, ".");
        assert!(!request.binds[0].readonly);
        assert_eq!(request.binds[1].inside, "a");
        assert!(request.binds[1].readonly);
        assert_eq!(request.binds[2].inside, "data");
        assert_eq!(request.argv, vec!["cat", "a"]);
    }

    #[test]
    fn run_request_container_failure_propagates() {
        let state = {
            let workflow = Workflow {
                blocks: vec![block(&[], &[])],
                connections: vec![],
                meta: meta(1),
            };
            WorkflowState::new(WorkflowId::new(), workflow).expect("valid workflow")
        };
        let store = MemoryContainerStore::new();
        store.set_fail_ensure(true);
        assert!(state.build_run_request(0, &store).is_err());
    }

    #[test]
    fn try_finish_fires_once() {
        let mut state = pipeline();
        state.start().expect("start");
        assert!(!state.try_finish());
        state.drain_ready();
        state.finalize_run(0);
        state.block_done();
        assert!(state.try_finish());
        assert!(!state.try_finish());
        assert!(!state.is_running());
    }

    #[test]
    fn empty_workflow_finishes_immediately() {
        let workflow = Workflow {
            blocks: vec![],
            connections: vec![],
            meta: meta(1),
        };
        let mut state = WorkflowState::new(WorkflowId::new(), workflow).expect("valid workflow");
        state.start().expect("start");
        assert!(state.drain_ready().is_empty());
        assert!(state.try_finish());
    }

    #[test]
    fn restart_resets_input_slots_even_cached_ones() {
        let workflow = Workflow {
            blocks: vec![block(&[], &["a"]), block(&[("a", true)], &[])],
            connections: vec![connection(0, 1)],
            meta: meta(4),
        };
        let mut state = WorkflowState::new(WorkflowId::new(), workflow).expect("valid workflow");
        let store = MemoryContainerStore::new();
        state.start().expect("start");
        state.drain_ready();
        state.finalize_run(0);
        store.add_output(state.id(), 0, 0, "a");
        state.process_connection(connection(0, 1), &store);
        state.enqueue_block(1);
        state.drain_ready();
        state.block_done();
        state.finalize_run(1);
        state.block_done();
        assert!(state.try_finish());
        // The cached slot survived finalize but not the restart.
        assert!(state.block_state(1).input_sources[0].is_some());

        state.start().expect("restart");
        assert_eq!(state.block_state(1).cnt_inputs_ready, 0);
        assert!(state.block_state(1).input_sources[0].is_none());
        assert_eq!(state.drain_ready(), vec![0]);
    }

    #[test]
    fn clients_receive_frames() {
        use crate::transport::RecordingSink;

        let mut state = pipeline();
        let sink = RecordingSink::new();
        let client = ClientId::new();
        state.add_client(client);
        state.send_to_clients(&sink, "workflow finished");
        assert_eq!(sink.frames_for(client), vec!["workflow finished"]);

        state.remove_client(client);
        state.send_to_clients(&sink, "again");
        assert_eq!(sink.frames_for(client).len(), 1);
    }
}
