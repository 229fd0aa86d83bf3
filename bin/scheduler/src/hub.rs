//! Session hub bridging the synchronous engine to websocket tasks.
//!
//! Each connected runner or client registers an unbounded channel here; its
//! socket task forwards queued messages out. The engine pushes through the
//! [`SessionSink`] impl, which never blocks and drops messages for sessions
//! that have already gone away.

use axum::extract::ws::Message;
use flowgrid_core::{ClientId, RunnerId};
use flowgrid_workflow::protocol::RunRequest;
use flowgrid_workflow::transport::SessionSink;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

#[derive(Default)]
pub struct SessionHub {
    runners: Mutex<HashMap<RunnerId, UnboundedSender<Message>>>,
    clients: Mutex<HashMap<ClientId, UnboundedSender<Message>>>,
}

impl SessionHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_runner(&self, runner_id: RunnerId) -> UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.runners.lock().unwrap().insert(runner_id, tx);
        rx
    }

    pub fn unregister_runner(&self, runner_id: RunnerId) {
        self.runners.lock().unwrap().remove(&runner_id);
    }

    pub fn register_client(&self, client_id: ClientId) -> UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.clients.lock().unwrap().insert(client_id, tx);
        rx
    }

    pub fn unregister_client(&self, client_id: ClientId) {
        self.clients.lock().unwrap().remove(&client_id);
    }
}

impl SessionSink for SessionHub {
    fn send_to_runner(&self, runner_id: RunnerId, request: &RunRequest) {
        let Ok(json) = serde_json::to_string(request) else {
            return;
        };
        if let Some(tx) = self.runners.lock().unwrap().get(&runner_id) {
            if tx.send(Message::Text(json.into())).is_err() {
                tracing::debug!(%runner_id, "runner channel closed");
            }
        }
    }

    fn send_to_client(&self, client_id: ClientId, frame: &str) {
        if let Some(tx) = self.clients.lock().unwrap().get(&client_id) {
            if tx.send(Message::Text(frame.to_string().into())).is_err() {
                tracing::debug!(%client_id, "client channel closed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_client_receives_frames() {
        let hub = SessionHub::new();
        let client_id = ClientId::new();
        let mut rx = hub.register_client(client_id);

        hub.send_to_client(client_id, "workflow finished");
        let message = rx.try_recv().expect("frame delivered");
        assert_eq!(message, Message::Text("workflow finished".into()));
    }

    #[test]
    fn unregistered_session_drops_frames() {
        let hub = SessionHub::new();
        let client_id = ClientId::new();
        let mut rx = hub.register_client(client_id);
        hub.unregister_client(client_id);

        hub.send_to_client(client_id, "late");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn runner_receives_json_request() {
        let hub = SessionHub::new();
        let runner_id = RunnerId::new();
        let mut rx = hub.register_runner(runner_id);

        hub.send_to_runner(runner_id, &RunRequest::default());
        let Message::Text(text) = rx.try_recv().expect("request delivered") else {
            panic!("expected text frame");
        };
        let parsed: RunRequest = serde_json::from_str(&text).expect("valid json");
        assert_eq!(parsed, RunRequest::default());
    }
}
