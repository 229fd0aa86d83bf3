//! Workflow registry and dispatch loop.
//!
//! [`Scheduler`] owns every registered [`WorkflowState`], every named
//! [`Partition`], and one [`RunnerSession`] per connected runner. All entry
//! points take `&mut self`; the coordinator binary serializes calls behind a
//! mutex, so the engine itself has no interior locking.
//!
//! Dispatch is an explicit work queue rather than call chains: entry points
//! collect [`Assignment`]s into a queue and [`Scheduler::execute`] drains it.
//! A failed dispatch (container preparation, runner disconnect) is fed back
//! through the same completion path as a real runner result, so counters and
//! completion checks stay consistent and the loop stays bounded.

use flowgrid_core::{ClientId, RunnerId, WorkflowId};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::container::ContainerStore;
use crate::definition::Workflow;
use crate::error::{CommandError, SchedulerError, ValidationError};
use crate::partition::{Assignment, Partition};
use crate::protocol::{
    workflow_finished_frame, BlockResponse, RunResponse, RUN_SIGNAL, STOP_SIGNAL,
};
use crate::state::WorkflowState;
use crate::transport::SessionSink;

/// One connected runner: its partition and the block it is executing, if any.
struct RunnerSession {
    partition: String,
    assignment: Option<Assignment>,
}

/// Registry of workflows, partitions, and runner sessions.
pub struct Scheduler {
    workflows: HashMap<WorkflowId, WorkflowState>,
    partitions: HashMap<String, Partition>,
    runners: HashMap<RunnerId, RunnerSession>,
    containers: Arc<dyn ContainerStore>,
    sessions: Arc<dyn SessionSink>,
}

impl Scheduler {
    #[must_use]
    pub fn new(containers: Arc<dyn ContainerStore>, sessions: Arc<dyn SessionSink>) -> Self {
        Self {
            workflows: HashMap::new(),
            partitions: HashMap::new(),
            runners: HashMap::new(),
            containers,
            sessions,
        }
    }

    /// Validates and registers a submitted workflow under a fresh id.
    ///
    /// # Errors
    ///
    /// Returns the validation failure; nothing is registered.
    pub fn add_workflow(&mut self, workflow: Workflow) -> Result<WorkflowId, ValidationError> {
        let workflow_id = WorkflowId::new();
        let state = WorkflowState::new(workflow_id, workflow)?;
        tracing::info!(
            %workflow_id,
            name = %state.workflow().meta.name,
            partition = state.partition(),
            blocks = state.workflow().blocks.len(),
            "workflow registered"
        );
        self.workflows.insert(workflow_id, state);
        Ok(workflow_id)
    }

    #[must_use]
    pub fn workflow(&self, workflow_id: WorkflowId) -> Option<&WorkflowState> {
        self.workflows.get(&workflow_id)
    }

    #[must_use]
    pub fn contains_workflow(&self, workflow_id: WorkflowId) -> bool {
        self.workflows.contains_key(&workflow_id)
    }

    #[must_use]
    pub fn partition(&self, name: &str) -> Option<&Partition> {
        self.partitions.get(name)
    }

    /// Registers a runner session and matches it against any backlog in its
    /// partition.
    pub fn join_runner(&mut self, runner_id: RunnerId, partition: &str) {
        tracing::info!(%runner_id, partition, "runner joined");
        self.runners.insert(
            runner_id,
            RunnerSession {
                partition: partition.to_string(),
                assignment: None,
            },
        );
        let mut pending = VecDeque::new();
        if let Some(assignment) = self
            .partitions
            .entry(partition.to_string())
            .or_default()
            .add_runner(runner_id)
        {
            pending.push_back(assignment);
        }
        self.execute(pending);
    }

    /// Removes a disconnected runner. A block it was executing is finished
    /// with a synthetic failure so its workflow can still drain.
    pub fn leave_runner(&mut self, runner_id: RunnerId) {
        let Some(session) = self.runners.remove(&runner_id) else {
            return;
        };
        tracing::info!(%runner_id, partition = %session.partition, "runner left");
        if let Some(partition) = self.partitions.get_mut(&session.partition) {
            partition.remove_runner(runner_id);
            if partition.is_empty() {
                self.partitions.remove(&session.partition);
            }
        }
        if let Some(assignment) = session.assignment {
            let response = RunResponse::from_error("runner disconnected");
            let mut pending = VecDeque::new();
            self.complete(assignment, &response, None, &mut pending);
            self.execute(pending);
        }
    }

    /// Subscribes a client session to a workflow's progress frames.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::WorkflowNotFound`] if the id is unknown.
    pub fn join_client(
        &mut self,
        workflow_id: WorkflowId,
        client_id: ClientId,
    ) -> Result<(), SchedulerError> {
        let state = self
            .workflows
            .get_mut(&workflow_id)
            .ok_or(SchedulerError::WorkflowNotFound { workflow_id })?;
        state.add_client(client_id);
        tracing::debug!(%workflow_id, %client_id, "client joined");
        Ok(())
    }

    pub fn leave_client(&mut self, workflow_id: WorkflowId, client_id: ClientId) {
        if let Some(state) = self.workflows.get_mut(&workflow_id) {
            state.remove_client(client_id);
        }
    }

    /// Handles a text signal from a client session.
    ///
    /// `run` starts the workflow and dispatches its initially ready blocks;
    /// `stop` is not implemented; anything else is an undefined command.
    /// Errors are reported back on the originating connection only.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::WorkflowNotFound`] for an unknown id, otherwise the
    /// rejected command.
    pub fn client_signal(
        &mut self,
        workflow_id: WorkflowId,
        signal: &str,
    ) -> Result<(), SchedulerError> {
        let state = self
            .workflows
            .get_mut(&workflow_id)
            .ok_or(SchedulerError::WorkflowNotFound { workflow_id })?;
        match signal {
            RUN_SIGNAL => {
                state.start()?;
                let partition_name = state.partition().to_string();
                let ready = state.drain_ready();
                let mut pending = VecDeque::new();
                let partition = self.partitions.entry(partition_name).or_default();
                for block_id in ready {
                    if let Some(assignment) = partition.enqueue_block(workflow_id, block_id) {
                        pending.push_back(assignment);
                    }
                }
                if state.try_finish() {
                    state.send_to_clients(self.sessions.as_ref(), &workflow_finished_frame());
                }
                self.execute(pending);
                Ok(())
            }
            STOP_SIGNAL => {
                state.stop()?;
                Ok(())
            }
            _ => Err(CommandError::UndefinedCommand.into()),
        }
    }

    /// Handles a result record from a runner. Unsolicited results are
    /// dropped.
    pub fn on_runner_result(&mut self, runner_id: RunnerId, response: &RunResponse) {
        let Some(session) = self.runners.get_mut(&runner_id) else {
            tracing::warn!(%runner_id, "result from unknown runner");
            return;
        };
        let Some(assignment) = session.assignment.take() else {
            tracing::warn!(%runner_id, "result from idle runner");
            return;
        };
        let mut pending = VecDeque::new();
        self.complete(assignment, response, Some(runner_id), &mut pending);
        self.execute(pending);
    }

    /// Drains the dispatch queue. Each failed dispatch re-enters the queue
    /// as a synthetic completion, so every iteration retires one assignment
    /// and the loop terminates.
    fn execute(&mut self, mut pending: VecDeque<Assignment>) {
        while let Some(assignment) = pending.pop_front() {
            self.start_block(assignment, &mut pending);
        }
    }

    /// Sends one assigned block to its runner, announcing the transition to
    /// clients. Container preparation failure becomes a synthetic failed
    /// completion.
    fn start_block(&mut self, assignment: Assignment, pending: &mut VecDeque<Assignment>) {
        let Some(state) = self.workflows.get(&assignment.workflow_id) else {
            return;
        };
        match state.build_run_request(assignment.block_id, self.containers.as_ref()) {
            Ok(request) => {
                if let Some(session) = self.runners.get_mut(&assignment.runner_id) {
                    session.assignment = Some(assignment);
                }
                tracing::debug!(
                    workflow_id = %assignment.workflow_id,
                    block_id = assignment.block_id,
                    runner_id = %assignment.runner_id,
                    "block dispatched"
                );
                let frame = BlockResponse::running(assignment.block_id).to_frame();
                state.send_to_clients(self.sessions.as_ref(), &frame);
                self.sessions.send_to_runner(assignment.runner_id, &request);
            }
            Err(error) => {
                tracing::warn!(
                    workflow_id = %assignment.workflow_id,
                    block_id = assignment.block_id,
                    %error,
                    "container preparation failed"
                );
                let response = RunResponse::from_error(error.to_string());
                self.complete(assignment, &response, Some(assignment.runner_id), pending);
            }
        }
    }

    /// Retires one block run: finalizes its state, propagates outputs on
    /// success, announces the result, returns the runner to its partition,
    /// refills capacity from the ready queue, and checks completion. New
    /// matches land in `pending`.
    fn complete(
        &mut self,
        assignment: Assignment,
        response: &RunResponse,
        runner_id: Option<RunnerId>,
        pending: &mut VecDeque<Assignment>,
    ) {
        let Some(state) = self.workflows.get_mut(&assignment.workflow_id) else {
            return;
        };
        state.finalize_run(assignment.block_id);
        if response.is_success() {
            let outgoing = state.outgoing(assignment.block_id).to_vec();
            for connection in outgoing {
                if state.process_connection(connection, self.containers.as_ref()) {
                    state.enqueue_block(connection.target_block_id);
                }
            }
        }
        let frame = BlockResponse::finished(assignment.block_id, response).to_frame();
        state.send_to_clients(self.sessions.as_ref(), &frame);

        if let Some(runner_id) = runner_id {
            if let Some(session) = self.runners.get(&runner_id) {
                let partition = self.partitions.entry(session.partition.clone()).or_default();
                if let Some(next) = partition.add_runner(runner_id) {
                    pending.push_back(next);
                }
            }
        }

        state.block_done();
        let partition_name = state.partition().to_string();
        let ready = state.drain_ready();
        let partition = self.partitions.entry(partition_name).or_default();
        for block_id in ready {
            if let Some(next) = partition.enqueue_block(assignment.workflow_id, block_id) {
                pending.push_back(next);
            }
        }
        if state.try_finish() {
            state.send_to_clients(self.sessions.as_ref(), &workflow_finished_frame());
        }
    }
}
