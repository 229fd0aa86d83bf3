//! HTTP surface of the coordinator.
//!
//! - `POST /submit` registers a workflow and returns its id.
//! - `GET /runner/{partition}` upgrades to a runner websocket session.
//! - `GET /workflow/{id}` upgrades to a client websocket session.
//!
//! Socket tasks only shuttle frames; every engine call goes through one
//! mutex around the [`Scheduler`], and nothing awaits while holding it.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{DefaultBodyLimit, Path, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use flowgrid_core::{ClientId, RunnerId, WorkflowId};
use flowgrid_workflow::protocol::{error_frame, RunResponse};
use flowgrid_workflow::transport::SessionSink;
use flowgrid_workflow::{Scheduler, Workflow};
use futures::{SinkExt, StreamExt};
use std::sync::{Arc, Mutex};

use crate::hub::SessionHub;

#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<Mutex<Scheduler>>,
    pub hub: Arc<SessionHub>,
}

pub fn router(state: AppState, max_payload_length: usize) -> Router {
    Router::new()
        .route("/submit", post(submit))
        .route("/runner/{partition}", get(runner_ws))
        .route("/workflow/{workflow_id}", get(client_ws))
        .layer(DefaultBodyLimit::max(max_payload_length))
        .with_state(state)
}

/// Oversized bodies are rejected with 413 by the body limit layer before
/// this handler runs.
async fn submit(State(state): State<AppState>, body: String) -> Response {
    let workflow = match serde_json::from_str::<Workflow>(&body) {
        Ok(workflow) => workflow,
        Err(error) => {
            return (
                StatusCode::BAD_REQUEST,
                format!("Could not parse json: {error}"),
            )
                .into_response();
        }
    };
    match state.scheduler.lock().unwrap().add_workflow(workflow) {
        Ok(workflow_id) => (StatusCode::OK, workflow_id.to_string()).into_response(),
        Err(error) => (
            StatusCode::BAD_REQUEST,
            format!("Invalid document: {error}"),
        )
            .into_response(),
    }
}

async fn runner_ws(
    State(state): State<AppState>,
    Path(partition): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| runner_session(state, partition, socket))
}

async fn runner_session(state: AppState, partition: String, socket: WebSocket) {
    let runner_id = RunnerId::new();
    let mut outbox = state.hub.register_runner(runner_id);
    state
        .scheduler
        .lock()
        .unwrap()
        .join_runner(runner_id, &partition);

    let (mut sender, mut receiver) = socket.split();
    loop {
        tokio::select! {
            outgoing = outbox.recv() => {
                let Some(message) = outgoing else { break };
                if sender.send(message).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<RunResponse>(&text) {
                            Ok(response) => {
                                state
                                    .scheduler
                                    .lock()
                                    .unwrap()
                                    .on_runner_result(runner_id, &response);
                            }
                            Err(error) => {
                                tracing::warn!(%runner_id, %error, "malformed runner result");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    state.hub.unregister_runner(runner_id);
    state.scheduler.lock().unwrap().leave_runner(runner_id);
}

async fn client_ws(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    // Unknown workflows are rejected before the upgrade completes.
    let Ok(workflow_id) = lookup_workflow(&state, &workflow_id) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    ws.on_upgrade(move |socket| client_session(state, workflow_id, socket))
}

fn lookup_workflow(state: &AppState, raw: &str) -> Result<WorkflowId, StatusCode> {
    let workflow_id: WorkflowId = raw.parse().map_err(|_| StatusCode::NOT_FOUND)?;
    if state.scheduler.lock().unwrap().contains_workflow(workflow_id) {
        Ok(workflow_id)
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

async fn client_session(state: AppState, workflow_id: WorkflowId, socket: WebSocket) {
    let client_id = ClientId::new();
    let mut outbox = state.hub.register_client(client_id);
    if state
        .scheduler
        .lock()
        .unwrap()
        .join_client(workflow_id, client_id)
        .is_err()
    {
        state.hub.unregister_client(client_id);
        return;
    }

    let (mut sender, mut receiver) = socket.split();
    loop {
        tokio::select! {
            outgoing = outbox.recv() => {
                let Some(message) = outgoing else { break };
                if sender.send(message).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let result = state
                            .scheduler
                            .lock()
                            .unwrap()
                            .client_signal(workflow_id, &text);
                        if let Err(error) = result {
                            // Rejected signals only bounce back on this
                            // connection; other subscribers see nothing.
                            state.hub.send_to_client(client_id, &error_frame(error));
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    state.hub.unregister_client(client_id);
    state.scheduler.lock().unwrap().leave_client(workflow_id, client_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use flowgrid_workflow::MemoryContainerStore;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn state() -> AppState {
        let hub = Arc::new(SessionHub::new());
        let scheduler = Arc::new(Mutex::new(Scheduler::new(
            Arc::new(MemoryContainerStore::new()),
            hub.clone(),
        )));
        AppState { scheduler, hub }
    }

    fn submission(max_runners: usize) -> String {
        format!(
            "{{\"blocks\":[],\"connections\":[],\"meta\":{{\"name\":\"t\",\"partition\":\"all\",\"max-runners\":{max_runners}}}}}"
        )
    }

    async fn post_submit(app: Router, body: String) -> (StatusCode, String) {
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/submit")
                    .body(Body::from(body))
                    .expect("request"),
            )
            .await
            .expect("response");
        let status = response.status();
        let bytes = response.into_body().collect().await.expect("body").to_bytes();
        (status, String::from_utf8(bytes.to_vec()).expect("utf8"))
    }

    #[tokio::test]
    async fn submit_returns_workflow_id() {
        let state = state();
        let app = router(state.clone(), 1024);
        let (status, body) = post_submit(app, submission(2)).await;
        assert_eq!(status, StatusCode::OK);
        let workflow_id: WorkflowId = body.parse().expect("uuid body");
        assert!(state.scheduler.lock().unwrap().contains_workflow(workflow_id));
    }

    #[tokio::test]
    async fn submit_rejects_malformed_json() {
        let app = router(state(), 1024);
        let (status, body) = post_submit(app, "{not json".to_string()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.starts_with("Could not parse json:"));
    }

    #[tokio::test]
    async fn submit_rejects_invalid_document() {
        let app = router(state(), 1024);
        let (status, body) = post_submit(app, submission(0)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "Invalid document: 'max-runners' is invalid");
    }

    #[tokio::test]
    async fn submit_rejects_oversized_body_before_parsing() {
        let app = router(state(), 16);
        let (status, _) = post_submit(app, submission(2)).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn submit_length_limit_is_exact() {
        let body = format!(
            "{{\"blocks\":[],\"connections\":[],\"meta\":{{\"name\":\"{}\",\"partition\":\"all\",\"max-runners\":2}}}}",
            "a".repeat(64)
        );
        let limit = body.len();

        // A body exactly at the limit parses normally.
        let (status, returned) = post_submit(router(state(), limit), body.clone()).await;
        assert_eq!(status, StatusCode::OK);
        returned.parse::<WorkflowId>().expect("uuid body");

        // The same body one byte over the limit is rejected before parsing.
        let (status, _) = post_submit(router(state(), limit - 1), body).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn unknown_workflow_is_not_found() {
        let state = state();
        assert_eq!(
            lookup_workflow(&state, &WorkflowId::new().to_string()),
            Err(StatusCode::NOT_FOUND)
        );
        assert_eq!(
            lookup_workflow(&state, "not-a-uuid"),
            Err(StatusCode::NOT_FOUND)
        );
    }

    #[test]
    fn registered_workflow_is_found() {
        let state = state();
        let workflow: Workflow = serde_json::from_str(&submission(2)).expect("workflow");
        let workflow_id = state
            .scheduler
            .lock()
            .unwrap()
            .add_workflow(workflow)
            .expect("register");
        assert_eq!(
            lookup_workflow(&state, &workflow_id.to_string()),
            Ok(workflow_id)
        );
    }
}
