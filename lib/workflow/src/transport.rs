//! Outbound session seam.
//!
//! The engine is synchronous and never owns sockets. When it needs to push a
//! run request to a runner or a text frame to a client it goes through
//! [`SessionSink`]; the coordinator binary implements it over per-session
//! channels, tests use [`RecordingSink`].

use flowgrid_core::{ClientId, RunnerId};

use crate::protocol::RunRequest;

/// Delivers engine output to connected sessions. Sends are best-effort and
/// must not block.
pub trait SessionSink: Send + Sync {
    fn send_to_runner(&self, runner_id: RunnerId, request: &RunRequest);
    fn send_to_client(&self, client_id: ClientId, frame: &str);
}

/// Test sink recording every send in order.
#[derive(Default)]
pub struct RecordingSink {
    runner_sends: std::sync::Mutex<Vec<(RunnerId, RunRequest)>>,
    client_sends: std::sync::Mutex<Vec<(ClientId, String)>>,
}

impl RecordingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn runner_sends(&self) -> Vec<(RunnerId, RunRequest)> {
        self.runner_sends.lock().unwrap().clone()
    }

    #[must_use]
    pub fn client_sends(&self) -> Vec<(ClientId, String)> {
        self.client_sends.lock().unwrap().clone()
    }

    /// Text frames delivered to one client, in order.
    #[must_use]
    pub fn frames_for(&self, client_id: ClientId) -> Vec<String> {
        self.client_sends
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == client_id)
            .map(|(_, frame)| frame.clone())
            .collect()
    }
}

impl SessionSink for RecordingSink {
    fn send_to_runner(&self, runner_id: RunnerId, request: &RunRequest) {
        self.runner_sends
            .lock()
            .unwrap()
            .push((runner_id, request.clone()));
    }

    fn send_to_client(&self, client_id: ClientId, frame: &str) {
        self.client_sends
            .lock()
            .unwrap()
            .push((client_id, frame.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_sink_keeps_order_per_client() {
        let sink = RecordingSink::new();
        let client = ClientId::new();
        let other = ClientId::new();
        sink.send_to_client(client, "first");
        sink.send_to_client(other, "noise");
        sink.send_to_client(client, "second");
        assert_eq!(sink.frames_for(client), vec!["first", "second"]);
    }

    #[test]
    fn recording_sink_records_runner_requests() {
        let sink = RecordingSink::new();
        let runner = RunnerId::new();
        sink.send_to_runner(runner, &RunRequest::default());
        let sends = sink.runner_sends();
        assert_eq!(sends.len(), 1);
        assert_eq!(sends[0].0, runner);
    }
}
