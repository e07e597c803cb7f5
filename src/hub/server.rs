//! HTTP / WebSocket surface over the hub

use super::{Hub, Outgoing, SessionId};
use crate::types::Domain;
use anyhow::{Context, Result};
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, error, info, warn};

pub fn router(hub: Arc<Hub>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/:domain", get(snapshot_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .with_state(hub)
}

/// Serve until the shutdown flag flips, then close every session with 1001
pub async fn serve(hub: Arc<Hub>, listen: &str, mut shutdown: watch::Receiver<bool>) -> Result<()> {
    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("Failed to bind {}", listen))?;
    info!("Hub listening on {}", listen);

    let app = router(Arc::clone(&hub));
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
            hub.shutdown();
        })
        .await
        .context("Hub server failed")?;

    info!("Hub server stopped");
    Ok(())
}

async fn ws_handler(ws: WebSocketUpgrade, State(hub): State<Arc<Hub>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

/// Detaches its session when dropped, so an aborted or panicking socket
/// task still leaves the hub
struct SessionGuard {
    hub: Arc<Hub>,
    id: SessionId,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.hub.detach(self.id);
    }
}

async fn handle_socket(socket: WebSocket, hub: Arc<Hub>) {
    let (id, outbox) = hub.attach();
    let _guard = SessionGuard {
        hub: Arc::clone(&hub),
        id,
    };
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            out = outbox.next() => match out {
                Outgoing::Frame(text) => {
                    // axum 0.7 text messages own a String: one copy per session here
                    if let Err(e) = sender.send(Message::Text(text.to_string())).await {
                        debug!("Session {} send failed: {}", id, e);
                        break;
                    }
                }
                Outgoing::Close(code) => {
                    let frame = CloseFrame {
                        code,
                        reason: "server going away".into(),
                    };
                    if let Err(e) = sender.send(Message::Close(Some(frame))).await {
                        debug!("Session {} close failed: {}", id, e);
                    }
                    break;
                }
            },
            msg = receiver.next() => match msg {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    warn!("Session {} receive error: {}", id, e);
                    break;
                }
                // Viewers have nothing to say beyond Close
                Some(Ok(_)) => {}
            },
        }
    }
}

async fn snapshot_handler(
    Path(domain): Path<String>,
    State(hub): State<Arc<Hub>>,
) -> impl IntoResponse {
    let Some(domain) = Domain::from_path(&domain) else {
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": format!("unknown domain {}", domain) })),
        );
    };

    match hub.store().current(domain).to_json() {
        Ok(value) => (StatusCode::OK, Json(value)),
        Err(e) => {
            error!("Failed to serialize {} snapshot: {}", domain, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "serialization failed" })),
            )
        }
    }
}

async fn health_handler(State(hub): State<Arc<Hub>>) -> impl IntoResponse {
    Json(hub.health())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheStore;
    use crate::hub::{Inbound, ServerMessage};
    use futures::StreamExt;
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

    async fn spawn_server() -> (Arc<Hub>, String, watch::Sender<bool>, tokio::task::JoinHandle<()>) {
        let hub = Arc::new(Hub::new(Arc::new(CacheStore::new(10, 50)), 8));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (tx, rx) = watch::channel(false);
        let server = {
            let hub = Arc::clone(&hub);
            let listen = addr.to_string();
            tokio::spawn(async move {
                serve(hub, &listen, rx).await.unwrap();
            })
        };
        // Give the listener a moment to bind
        for _ in 0..50 {
            if tokio::net::TcpStream::connect(addr).await.is_ok() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        (hub, format!("ws://{}/ws", addr), tx, server)
    }

    #[tokio::test]
    async fn test_ws_catch_up_then_going_away() {
        let (hub, url, shutdown, server) = spawn_server().await;

        let (mut ws, _) = connect_async(url.as_str()).await.unwrap();
        let first = ws.next().await.unwrap().unwrap();
        let text = first.into_text().unwrap();
        assert!(matches!(
            Inbound::decode(&text).unwrap(),
            Inbound::Known(ServerMessage::InitialData(_))
        ));
        assert_eq!(hub.session_count(), 1);

        shutdown.send(true).unwrap();
        let mut close_code = None;
        while let Some(Ok(msg)) = ws.next().await {
            if let tokio_tungstenite::tungstenite::Message::Close(Some(frame)) = msg {
                close_code = Some(frame.code);
                break;
            }
        }
        assert_eq!(close_code, Some(CloseCode::Away));
        drop(ws);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_aborted_socket_task_still_detaches() {
        let hub = Arc::new(Hub::new(Arc::new(CacheStore::new(10, 50)), 8));
        let (id, outbox) = hub.attach();

        let task = tokio::spawn({
            let hub = Arc::clone(&hub);
            async move {
                let _guard = SessionGuard { hub, id };
                std::future::pending::<()>().await;
            }
        });
        tokio::task::yield_now().await;
        assert_eq!(hub.session_count(), 1);

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        assert_eq!(hub.session_count(), 0);
        assert!(outbox.is_closed());
    }

    #[tokio::test]
    async fn test_client_disconnect_detaches_session() {
        let (hub, url, shutdown, server) = spawn_server().await;

        let (mut ws, _) = connect_async(url.as_str()).await.unwrap();
        ws.next().await.unwrap().unwrap();
        assert_eq!(hub.session_count(), 1);
        drop(ws);

        for _ in 0..100 {
            if hub.session_count() == 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(hub.session_count(), 0);

        shutdown.send(true).unwrap();
        server.await.unwrap();
    }
}
