use crate::error::Result;
use crate::protocol::{self, TimeSnapshot};
use crate::registry::ClientRegistry;
use axum::{
    Json, Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::services::ServeDir;
use tracing::{debug, error, info, warn};

/// Shared state for the relay handlers
#[derive(Debug, Default)]
pub struct RelayState {
    pub registry: ClientRegistry,
}

impl RelayState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push `payload` to every client and prune the ones that failed.
    ///
    /// Returns the number of clients pruned.
    pub async fn broadcast(&self, payload: &str) -> usize {
        let failures = self.registry.broadcast_all(payload).await;
        for failure in &failures {
            warn!(client = %failure.client, error = %failure.error, "Broadcast write failed");
        }
        self.registry.prune(&failures).await
    }

    /// Broadcast a fresh time snapshot
    pub async fn broadcast_snapshot(&self) -> Result<usize> {
        let payload = TimeSnapshot::now().to_json()?;
        Ok(self.broadcast(&payload).await)
    }
}

/// GET / - current time snapshot
async fn index() -> Response {
    (StatusCode::OK, Json(TimeSnapshot::now())).into_response()
}

/// GET /ws - websocket upgrade
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<RelayState>>) -> Response {
    debug!("WebSocket upgrade request received");
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Build the relay router. `/static` is only mounted when a directory is given.
pub fn create_router(state: Arc<RelayState>, static_dir: Option<&Path>) -> Router {
    let mut router = Router::new()
        .route("/", get(index))
        .route("/ws", get(ws_handler));

    if let Some(dir) = static_dir {
        router = router.nest_service("/static", ServeDir::new(dir));
    }

    router.with_state(state)
}

/// Serve `router` on `listener` until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, router: Router, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "Relay listening");
    }
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// One connection: inbound commands and outbound broadcasts share the socket
async fn handle_socket(mut socket: WebSocket, state: Arc<RelayState>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let client = state.registry.register(tx).await;

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => match protocol::reply_for(&text) {
                        Ok(Some(reply)) => {
                            if let Err(e) = socket.send(Message::Text(reply)).await {
                                warn!(client = %client, error = %e, "Failed to send reply");
                                break;
                            }
                        }
                        Ok(None) => {
                            debug!(client = %client, "Ignoring unknown command");
                        }
                        Err(e) => {
                            warn!(client = %client, error = %e, "Dropping malformed message");
                        }
                    },
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = socket.send(Message::Pong(data)).await {
                            error!(client = %client, error = %e, "Failed to send pong");
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!(client = %client, "WebSocket client disconnected");
                        break;
                    }
                    Some(Ok(_)) => {
                        // Binary and pong frames carry nothing for us
                    }
                    Some(Err(e)) => {
                        warn!(client = %client, error = %e, "WebSocket error");
                        break;
                    }
                }
            }

            outgoing = rx.recv() => {
                match outgoing {
                    Some(payload) => {
                        if let Err(e) = socket.send(Message::Text(payload)).await {
                            warn!(client = %client, error = %e, "Failed to push broadcast");
                            break;
                        }
                    }
                    // Pruned by a broadcaster
                    None => break,
                }
            }
        }
    }

    state.registry.unregister(client).await;
}
