//! Session registry and per-session message workers.
//!
//! A session is born when a client opens the event stream, lives while that
//! stream stays up, and is removed from the registry exactly once when the
//! transport closes; its identifier is never reused. Sessions share nothing
//! with each other except the connection manager.
//!
//! Each session owns a worker task draining an inbound queue, so messages
//! submitted on one session are handled strictly in submission order even
//! when handling suspends on the database. Responses flow out through the
//! outbound channel that feeds the session's event stream.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::errors::{RelayError, RelayResult};
use crate::mcp::server::McpServer;
use crate::mcp::types::{McpRequest, McpResponse};

/// Buffered frames per session before submission back-pressures.
const SESSION_QUEUE_DEPTH: usize = 64;

/// Write side of one established session.
#[derive(Clone)]
pub struct SessionHandle {
    pub id: String,
    inbound: mpsc::Sender<McpRequest>,
}

impl SessionHandle {
    /// Queues a one-shot message for in-order handling by the session worker.
    pub async fn submit(&self, request: McpRequest) -> RelayResult<()> {
        self.inbound
            .send(request)
            .await
            .map_err(|_| RelayError::SessionNotFound(self.id.clone()))
    }
}

pub struct SessionRegistry {
    server: Arc<McpServer>,
    sessions: RwLock<HashMap<String, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new(server: Arc<McpServer>) -> Self {
        Self {
            server,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a session and its worker. The returned receiver feeds the
    /// event stream; when the stream side drops it, the worker winds down on
    /// its next send.
    pub async fn create(&self) -> (SessionHandle, mpsc::Receiver<McpResponse>) {
        let id = Uuid::new_v4().to_string();
        let (inbound_tx, mut inbound_rx) = mpsc::channel::<McpRequest>(SESSION_QUEUE_DEPTH);
        let (outbound_tx, outbound_rx) = mpsc::channel::<McpResponse>(SESSION_QUEUE_DEPTH);

        let server = self.server.clone();
        let session_id = id.clone();
        tokio::spawn(async move {
            while let Some(request) = inbound_rx.recv().await {
                let is_notification = request.id.is_none();
                let response = server.handle_request(request).await;
                if is_notification {
                    continue;
                }
                if outbound_tx.send(response).await.is_err() {
                    tracing::debug!(session = %session_id, "stream closed, worker stopping");
                    break;
                }
            }
        });

        let handle = SessionHandle {
            id: id.clone(),
            inbound: inbound_tx,
        };
        self.sessions.write().await.insert(id, handle.clone());
        (handle, outbound_rx)
    }

    pub async fn get(&self, id: &str) -> Option<SessionHandle> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Removing an absent id is a no-op.
    pub async fn remove(&self, id: &str) {
        if self.sessions.write().await.remove(id).is_some() {
            tracing::info!(session = %id, "session closed");
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}
