//! WebSocket server link: controllers connect to the vehicle at `/ws`

use crate::link::LinkSender;
use crate::transport::traits::LinkAdapter;
use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use rover_shared::{PING, PONG};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Greeting sent to every controller on connect
pub const GREETING: &str = "Connected";

pub struct WsServerAdapter {
    bind: String,
}

impl WsServerAdapter {
    pub fn new(bind: impl Into<String>) -> Self {
        Self { bind: bind.into() }
    }
}

#[derive(Clone)]
struct WsState {
    link: LinkSender,
    clients: Arc<AtomicUsize>,
    next_id: Arc<AtomicU64>,
}

/// Routes served by the WebSocket link
pub fn router(link: LinkSender) -> Router {
    let state = WsState {
        link,
        clients: Arc::new(AtomicUsize::new(0)),
        next_id: Arc::new(AtomicU64::new(1)),
    };
    Router::new().route("/ws", get(ws_handler)).with_state(state)
}

#[async_trait]
impl LinkAdapter for WsServerAdapter {
    fn name(&self) -> &'static str {
        "ws-server"
    }

    async fn run(self: Box<Self>, link: LinkSender) -> Result<()> {
        let listener = TcpListener::bind(&self.bind)
            .await
            .with_context(|| format!("Failed to bind WebSocket link on {}", self.bind))?;
        info!("WebSocket link listening on ws://{}/ws", listener.local_addr()?);

        axum::serve(listener, router(link.with_origin(self.name()))).await?;
        Ok(())
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<WsState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws_connection(state, socket))
}

async fn ws_connection(state: WsState, mut socket: WebSocket) {
    let id = state.next_id.fetch_add(1, Ordering::SeqCst);
    state.clients.fetch_add(1, Ordering::SeqCst);
    info!("Controller #{} connected", id);

    if socket.send(Message::Text(GREETING.into())).await.is_ok()
        && state.link.established().await.is_ok()
    {
        serve(&mut socket, &state.link, id).await;
    }

    let remaining = state.clients.fetch_sub(1, Ordering::SeqCst) - 1;
    warn!("Controller #{} disconnected ({} remaining)", id, remaining);

    // Every departure stops the vehicle; the link stays up for the others
    if state
        .link
        .lost(format!("controller #{} disconnected", id))
        .await
        .is_ok()
        && remaining > 0
    {
        let _ = state.link.established().await;
    }
}

async fn serve(socket: &mut WebSocket, link: &LinkSender, id: u64) {
    while let Some(message) = socket.recv().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(data)) => {
                debug!("Controller #{}: ignoring {} byte binary frame", id, data.len());
                continue;
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                warn!("Controller #{} socket error: {}", id, e);
                break;
            }
        };

        if text.trim() == PING {
            link.heartbeat();
            if socket.send(Message::Text(PONG.into())).await.is_err() {
                break;
            }
            continue;
        }

        let ack = match link.command(Bytes::from(text)).await {
            Ok(ack) => ack,
            Err(_) => break,
        };
        if let Some(ack) = ack {
            if socket.send(Message::Text(ack)).await.is_err() {
                break;
            }
        }
    }
}
