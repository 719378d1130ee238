//! WebSocket/HTTP gateway.
//!
//! Owns connection framing and delivery so the dispatcher core never sees a
//! socket: each connection gets a fresh worker id and an outbound queue, and
//! every inbound frame is routed into the registry under one mutex, so one
//! event is processed to completion before the next.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::dispatch::worker::WorkerId;
use crate::dispatch::OutboundSink;
use crate::protocol::{ClientEvent, ProjectSpec, ServerEvent};
use crate::registry::{ProjectId, ProjectRegistry};

/// Delivers dispatcher events to live connections over per-connection
/// unbounded queues. Sends to closed or unknown connections are dropped;
/// dispatch is fire-and-forget.
#[derive(Clone, Default)]
pub struct ChannelSink {
    senders: Arc<StdMutex<HashMap<WorkerId, mpsc::UnboundedSender<ServerEvent>>>>,
}

impl ChannelSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, worker_id: WorkerId, tx: mpsc::UnboundedSender<ServerEvent>) {
        self.senders
            .lock()
            .expect("sink lock poisoned")
            .insert(worker_id, tx);
    }

    pub fn unregister(&self, worker_id: WorkerId) {
        self.senders
            .lock()
            .expect("sink lock poisoned")
            .remove(&worker_id);
    }
}

impl OutboundSink for ChannelSink {
    fn send(&self, worker_id: WorkerId, event: ServerEvent) {
        let senders = self.senders.lock().expect("sink lock poisoned");
        match senders.get(&worker_id) {
            Some(tx) => {
                if tx.send(event).is_err() {
                    tracing::debug!(worker_id = %worker_id, "Outbound queue closed, event dropped");
                }
            }
            None => {
                tracing::debug!(worker_id = %worker_id, "No live connection for worker, event dropped");
            }
        }
    }
}

#[derive(Clone)]
pub struct GatewayState {
    pub registry: Arc<Mutex<ProjectRegistry>>,
    pub sink: ChannelSink,
}

impl GatewayState {
    pub fn new(registry: ProjectRegistry) -> Self {
        Self {
            registry: Arc::new(Mutex::new(registry)),
            sink: ChannelSink::new(),
        }
    }
}

#[derive(Serialize)]
struct CreateProjectResponse {
    project_id: Option<ProjectId>,
    error: Option<String>,
}

pub fn router(state: GatewayState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/projects", get(list_projects_handler))
        .route("/api/projects", post(create_project_handler))
        .route("/api/projects/{id}/results", get(project_results_handler))
        .route("/api/projects/{id}", delete(remove_project_handler))
        .layer(cors)
        .with_state(state)
}

/// Bind and serve until the shutdown future resolves.
pub async fn run_gateway(
    addr: std::net::SocketAddr,
    state: GatewayState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) {
    let app = router(state);

    tracing::info!(addr = %addr, "Starting gateway");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "Failed to bind gateway");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
    {
        tracing::error!(error = %e, "Gateway server failed");
    }
}

async fn list_projects_handler(State(state): State<GatewayState>) -> impl IntoResponse {
    let registry = state.registry.lock().await;
    Json(registry.summaries())
}

async fn create_project_handler(
    State(state): State<GatewayState>,
    Json(spec): Json<ProjectSpec>,
) -> impl IntoResponse {
    let mut registry = state.registry.lock().await;
    match registry.create_project(spec) {
        Ok(project_id) => (
            StatusCode::OK,
            Json(CreateProjectResponse {
                project_id: Some(project_id),
                error: None,
            }),
        ),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(CreateProjectResponse {
                project_id: None,
                error: Some(e.to_string()),
            }),
        ),
    }
}

async fn project_results_handler(
    State(state): State<GatewayState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let registry = state.registry.lock().await;
    match registry.results(ProjectId(id)) {
        Ok(results) => (StatusCode::OK, Json(results)).into_response(),
        Err(e) => (StatusCode::NOT_FOUND, e.to_string()).into_response(),
    }
}

async fn remove_project_handler(
    State(state): State<GatewayState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let mut registry = state.registry.lock().await;
    match registry.remove_project(ProjectId(id)) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => (StatusCode::NOT_FOUND, e.to_string()).into_response(),
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<GatewayState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: GatewayState) {
    // The worker's identity for its whole lifetime is this connection.
    let worker_id = WorkerId::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    state.sink.register(worker_id, tx);
    tracing::info!(worker_id = %worker_id, "Connection opened");

    loop {
        tokio::select! {
            // Drain dispatcher events out to the agent
            event = rx.recv() => {
                match event {
                    Some(event) => {
                        match serde_json::to_string(&event) {
                            Ok(json) => {
                                if socket.send(Message::Text(json.into())).await.is_err() {
                                    tracing::debug!(worker_id = %worker_id, "Send failed, connection closing");
                                    break;
                                }
                            }
                            Err(e) => {
                                tracing::error!(worker_id = %worker_id, error = %e, "Failed to encode outbound event");
                            }
                        }
                    }
                    None => break,
                }
            }

            // Route agent frames into the registry
            frame = socket.recv() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(&state, worker_id, &text).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::info!(worker_id = %worker_id, "Connection closed");
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(worker_id = %worker_id, error = %e, "Connection error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    // A dropped socket cancels the worker exactly like an explicit leave.
    state.sink.unregister(worker_id);
    state.registry.lock().await.leave(worker_id, &state.sink);
}

async fn handle_frame(state: &GatewayState, worker_id: WorkerId, text: &str) {
    let event = match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(worker_id = %worker_id, error = %e, "Unrecognized frame dropped");
            return;
        }
    };

    let mut registry = state.registry.lock().await;
    match event {
        ClientEvent::CreateProject {
            title,
            dataset,
            map,
            reduce,
        } => {
            let spec = ProjectSpec {
                title,
                dataset,
                map,
                reduce,
            };
            match registry.create_project(spec) {
                Ok(project_id) => {
                    state
                        .sink
                        .send(worker_id, ServerEvent::ProjectCreated { project_id });
                }
                Err(e) => {
                    tracing::warn!(worker_id = %worker_id, error = %e, "Project creation rejected");
                    state.sink.send(
                        worker_id,
                        ServerEvent::Error {
                            message: e.to_string(),
                        },
                    );
                }
            }
        }
        ClientEvent::Join {
            project_id,
            capacity,
        } => {
            if let Err(e) = registry.join(worker_id, project_id, capacity, &state.sink) {
                tracing::warn!(worker_id = %worker_id, project_id = %project_id, error = %e, "Join rejected");
                state.sink.send(
                    worker_id,
                    ServerEvent::Error {
                        message: e.to_string(),
                    },
                );
            }
        }
        ClientEvent::Leave => {
            registry.leave(worker_id, &state.sink);
        }
        ClientEvent::JobDone { job_id, result } => {
            // Stale, duplicate, or misattributed results are dropped here;
            // nothing is echoed back to the sender.
            if let Err(e) = registry.record_result(worker_id, job_id, result, &state.sink) {
                tracing::warn!(worker_id = %worker_id, job_id = %job_id, error = %e, "Result rejected");
            }
        }
        ClientEvent::FetchResults { project_id } => match registry.results(project_id) {
            Ok(results) => {
                state
                    .sink
                    .send(worker_id, ServerEvent::ResultsSnapshot { results });
            }
            Err(e) => {
                state.sink.send(
                    worker_id,
                    ServerEvent::Error {
                        message: e.to_string(),
                    },
                );
            }
        },
    }
}
