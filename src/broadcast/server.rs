//! WebSocket server that turns connections into registry subscribers.
//!
//! Clients pick their dataset with the request path:
//! `ws://host:8765/overworld`. In unscoped mode the path is ignored.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::Uri;
use axum::response::Response;
use axum::routing::get;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::registry::{Payload, SubscriptionRegistry};

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Cannot bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// State shared by every connection handler.
#[derive(Clone)]
struct ServerState {
    registry: Arc<SubscriptionRegistry>,
    shutdown: CancellationToken,
    subscriber_buffer: usize,
}

/// Accepts subscriber connections until the shutdown token fires.
pub struct BroadcastServer {
    listener: TcpListener,
    state: ServerState,
}

impl BroadcastServer {
    /// Bind the listener. Failing to bind is an initialization error.
    pub async fn bind(
        bind_address: &str,
        port: u16,
        registry: Arc<SubscriptionRegistry>,
        shutdown: CancellationToken,
        subscriber_buffer: usize,
    ) -> Result<Self, ServerError> {
        let address = format!("{bind_address}:{port}");
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|source| ServerError::Bind { address, source })?;

        Ok(Self {
            listener,
            state: ServerState {
                registry,
                shutdown,
                subscriber_buffer: subscriber_buffer.max(1),
            },
        })
    }

    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until the shutdown token is cancelled.
    ///
    /// Stops accepting new connections on shutdown; open connections flush
    /// what is already queued and close themselves.
    pub async fn run(self) -> Result<(), ServerError> {
        let shutdown = self.state.shutdown.clone();
        let router = router(self.state);

        crate::log_event!("server", "listening", "ws://{}", self.listener.local_addr()?);

        axum::serve(self.listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        crate::debug_event!("server", "stopped accepting");
        Ok(())
    }
}

fn router(state: ServerState) -> Router {
    Router::new()
        .route("/", get(subscribe))
        .route("/{*selector}", get(subscribe))
        .with_state(state)
}

/// Dataset key requested by a connection: its path without surrounding `/`.
fn selector(uri: &Uri) -> String {
    uri.path().trim_matches('/').to_string()
}

async fn subscribe(ws: WebSocketUpgrade, uri: Uri, State(state): State<ServerState>) -> Response {
    let key = selector(&uri);

    if !state.registry.accepts(&key) {
        tracing::error!("[server] client tried to connect for unwatched dataset: '{key}'");
        return ws.on_upgrade(reject);
    }

    ws.on_upgrade(move |socket| serve_subscriber(socket, key, state))
}

/// Close an upgraded connection without sending any payload.
async fn reject(mut socket: WebSocket) {
    let _ = socket.send(Message::Close(None)).await;
}

async fn serve_subscriber(mut socket: WebSocket, key: String, state: ServerState) {
    let (tx, mut rx) = mpsc::channel::<Payload>(state.subscriber_buffer);
    let id = match state.registry.subscribe(&key, tx) {
        Ok(id) => id,
        Err(e) => {
            tracing::error!("[server] {e}");
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };

    crate::log_event!("server", "client subscribed", "{id} to '{key}'");

    loop {
        tokio::select! {
            biased;

            _ = state.shutdown.cancelled() => {
                // Deliver whatever was queued before shutdown
                while let Ok(payload) = rx.try_recv() {
                    if send_text(&mut socket, &payload).await.is_err() {
                        break;
                    }
                }
                let _ = socket.send(Message::Close(None)).await;
                break;
            }

            payload = rx.recv() => match payload {
                Some(payload) => {
                    if let Err(e) = send_text(&mut socket, &payload).await {
                        crate::debug_event!("server", "send failed", "{id}: {e}");
                        break;
                    }
                }
                None => {
                    // Registry dropped us after a send timed out
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
            },

            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    crate::debug_event!("server", "receive failed", "{id}: {e}");
                    break;
                }
                // Subscribers have nothing to say; pings are answered by axum
                Some(Ok(_)) => {}
            },
        }
    }

    state.registry.unsubscribe(&key, id);
    crate::log_event!("server", "client disconnected", "{id} from '{key}'");
}

async fn send_text(socket: &mut WebSocket, payload: &Payload) -> Result<(), axum::Error> {
    socket.send(Message::Text(payload.to_string().into())).await
}
