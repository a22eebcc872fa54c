use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::{Stream, StreamExt};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::error::{CloudLoggingError, Result};
use crate::mcp::{process_request, RpcRequest};
use crate::session::{SessionState, SharedSession};

pub const SSE_PATH: &str = "/sse";
pub const MESSAGE_PATH: &str = "/message";

/// A live SSE connection: where its responses go and its tool state.
#[derive(Clone)]
struct TransportSession {
    sender: mpsc::UnboundedSender<Event>,
    state: SharedSession,
}

/// sessionId → 会话。每个 id 至多一个条目，关闭时恰好移除一次。
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<RwLock<HashMap<String, TransportSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new session. Dropping the returned guard closes it.
    pub fn open(&self) -> (String, mpsc::UnboundedReceiver<Event>, SessionGuard) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut sessions = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let mut id = Uuid::new_v4().to_string();
        while sessions.contains_key(&id) {
            id = Uuid::new_v4().to_string();
        }
        sessions.insert(
            id.clone(),
            TransportSession {
                sender: tx,
                state: SessionState::shared(),
            },
        );
        drop(sessions);

        let guard = SessionGuard {
            id: id.clone(),
            registry: self.clone(),
        };
        (id, rx, guard)
    }

    /// Idempotent. Returns whether a live session was removed.
    pub fn close(&self, id: &str) -> bool {
        let removed = self
            .inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .is_some();
        if removed {
            info!(session_id = %id, "sse session closed");
        }
        removed
    }

    /// Drops every sender so open event streams end.
    pub fn close_all(&self) {
        self.inner.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, id: &str) -> Option<TransportSession> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).get(id).cloned()
    }
}

pub struct SessionGuard {
    id: String,
    registry: SessionRegistry,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.close(&self.id);
    }
}

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub sessions: SessionRegistry,
}

async fn sse_handler(State(state): State<AppState>) -> Sse<impl Stream<Item = std::result::Result<Event, axum::Error>>> {
    let (session_id, rx, guard) = state.sessions.open();
    info!(session_id = %session_id, "sse session opened");

    let endpoint_url = format!("{MESSAGE_PATH}?sessionId={session_id}");
    if let Some(session) = state.sessions.get(&session_id) {
        let _ = session.sender.send(Event::default().event("endpoint").data(endpoint_url));
    }

    // The guard is owned by the stream, so the session is removed however the stream ends.
    let stream = UnboundedReceiverStream::new(rx).map(move |event| {
        let _keep = &guard;
        Ok::<_, axum::Error>(event)
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[derive(Debug, Deserialize)]
struct MessageQuery {
    #[serde(rename = "sessionId", alias = "session_id")]
    session_id: Option<String>,
}

async fn message_handler(
    State(state): State<AppState>,
    query: std::result::Result<Query<MessageQuery>, QueryRejection>,
    payload: std::result::Result<Json<RpcRequest>, JsonRejection>,
) -> Response {
    let session_id = match query {
        Ok(Query(MessageQuery { session_id: Some(id) })) if !id.is_empty() => id,
        _ => return (StatusCode::BAD_REQUEST, "missing sessionId").into_response(),
    };

    let Some(session) = state.sessions.get(&session_id) else {
        debug!(session_id = %session_id, "message for unknown session");
        return (StatusCode::NOT_FOUND, "session not found").into_response();
    };

    let req = match payload {
        Ok(Json(req)) => req,
        Err(e) => {
            warn!(session_id = %session_id, error = %e, "invalid message body");
            return (StatusCode::BAD_REQUEST, format!("invalid message: {e}")).into_response();
        }
    };

    let dispatcher = state.dispatcher.clone();
    tokio::spawn(async move {
        let Some(resp) = process_request(&dispatcher, &session.state, req).await else {
            return;
        };
        match serde_json::to_string(&resp) {
            Ok(json_str) => {
                if session.sender.send(Event::default().event("message").data(json_str)).is_err() {
                    debug!(session_id = %session_id, "session closed before response was delivered");
                }
            }
            Err(e) => warn!(session_id = %session_id, error = %e, "failed to encode response"),
        }
    });

    StatusCode::ACCEPTED.into_response()
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "not found")
}

pub fn build_router(dispatcher: Arc<Dispatcher>, sessions: SessionRegistry) -> Router {
    let state = AppState { dispatcher, sessions };
    Router::new()
        .route(SSE_PATH, get(sse_handler))
        .route(MESSAGE_PATH, post(message_handler))
        .fallback(not_found)
        .with_state(state)
}

pub async fn serve_http(config: &Config, dispatcher: Arc<Dispatcher>) -> Result<()> {
    let sessions = SessionRegistry::new();
    let router = build_router(dispatcher, sessions.clone());

    let addr = format!("{}:{}", config.server.http_addr, config.server.http_port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| CloudLoggingError::ConfigError(format!("bind {addr} failed: {e}")))?;
    info!(%addr, "Google Cloud Logging MCP server listening (SSE at {SSE_PATH})");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            info!("shutdown requested, closing sse sessions");
            sessions.close_all();
        })
        .await
        .map_err(Into::into)
}
