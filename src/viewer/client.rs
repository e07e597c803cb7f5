//! WebSocket client loop for a viewer session
//!
//! Connects, feeds frames into the session, and on close asks the session's
//! reconnector what to do. The endpoint URL is reused verbatim on every
//! attempt; a failed connect counts as an abnormal close (1006).
//!
//! Staleness is checked once a second, both while connected and while
//! waiting to retry; the session flags stale views on its render surface.

use super::reconnect::{ConnectionState, Decision, CLOSE_ABNORMAL, CLOSE_NORMAL};
use super::render::RenderSurface;
use super::session::ViewerSession;
use futures::{SinkExt, StreamExt};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

/// How often staleness is re-evaluated while connected
const STALENESS_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// No status code in the close frame
const CLOSE_NO_STATUS: u16 = 1005;

/// Run until a normal close, shutdown, or the retry budget is spent.
/// Returns the final connection state.
pub async fn run_viewer<S: RenderSurface>(
    url: &str,
    session: &mut ViewerSession<S>,
    mut shutdown: watch::Receiver<bool>,
) -> ConnectionState {
    loop {
        session.on_connecting();
        info!("Connecting to {}", url);

        let code = match connect_async(url).await {
            Ok((ws, _)) => {
                info!("Connected to {}", url);
                session.on_open(Instant::now());
                run_connection(ws, session, &mut shutdown).await
            }
            Err(e) => {
                warn!("Connect to {} failed: {}", url, e);
                CLOSE_ABNORMAL
            }
        };

        if *shutdown.borrow() {
            session.teardown();
            info!("Viewer shutting down");
            return session.connection_state();
        }

        match session.on_close(code) {
            Decision::Stop => {
                info!("Connection closed normally");
                return session.connection_state();
            }
            Decision::GiveUp => {
                error!("Hub unavailable at {}", url);
                return session.connection_state();
            }
            Decision::RetryAfter(delay) => {
                // Views stay up during the wait, so keep flagging stale ones
                let wait = tokio::time::sleep(delay);
                tokio::pin!(wait);
                let mut staleness = tokio::time::interval(STALENESS_CHECK_INTERVAL);
                loop {
                    tokio::select! {
                        _ = &mut wait => break,
                        _ = staleness.tick() => {
                            session.check_staleness(Instant::now());
                        }
                        _ = shutdown.changed() => {
                            session.teardown();
                            return session.connection_state();
                        }
                    }
                }
            }
        }
    }
}

/// Pump one connection; returns the close code that ended it
async fn run_connection<S: RenderSurface>(
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    session: &mut ViewerSession<S>,
    shutdown: &mut watch::Receiver<bool>,
) -> u16 {
    let (mut sink, mut stream) = ws.split();
    let mut staleness = tokio::time::interval(STALENESS_CHECK_INTERVAL);

    loop {
        tokio::select! {
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    session.handle_text(&text, Instant::now());
                }
                Some(Ok(Message::Close(frame))) => {
                    let code = frame.map(|f| u16::from(f.code)).unwrap_or(CLOSE_NO_STATUS);
                    debug!("Server closed the connection ({})", code);
                    return code;
                }
                Some(Ok(Message::Binary(_))) => {
                    warn!("Ignoring unexpected binary frame");
                }
                // Ping/pong are answered by tungstenite
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("Connection error: {}", e);
                    return CLOSE_ABNORMAL;
                }
                None => return CLOSE_ABNORMAL,
            },
            _ = staleness.tick() => {
                session.check_staleness(Instant::now());
            }
            _ = shutdown.changed() => {
                let frame = CloseFrame {
                    code: CloseCode::Normal,
                    reason: "viewer shutting down".into(),
                };
                if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                    debug!("Close send failed: {}", e);
                }
                return CLOSE_NORMAL;
            }
        }
    }
}
