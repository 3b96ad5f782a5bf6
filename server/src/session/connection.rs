//! Individual vehicle session handling

use super::manager::SessionManager;
use anyhow::Result;
use futures::{SinkExt, StreamExt};
use rover_shared::{Registration, PONG};
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Run one vehicle connection until it closes
pub async fn serve<S>(stream: S, addr: SocketAddr, sessions: SessionManager) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let ws = accept_async(stream).await?;
    let (mut writer, mut reader) = ws.split();

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
    let id = sessions.register(addr, outbound_tx).await;
    info!("Vehicle #{} connected from {}", id, addr);

    let send_task = tokio::spawn(async move {
        while let Some(text) = outbound_rx.recv().await {
            if writer.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = reader.next().await {
        match message {
            Ok(Message::Text(text)) => handle_text(&sessions, id, &text).await,
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!("Vehicle #{} read error: {}", id, e);
                break;
            }
        }
    }

    sessions.unregister(id).await;
    send_task.abort();
    info!("Vehicle #{} disconnected", id);
    Ok(())
}

async fn handle_text(sessions: &SessionManager, id: u64, text: &str) {
    if text.trim() == PONG {
        debug!("Vehicle #{}: pong", id);
        sessions.record_pong(id).await;
        return;
    }

    if let Ok(registration) = serde_json::from_str::<Registration>(text) {
        info!(
            "Vehicle #{} registered ({} as {})",
            id, registration.kind, registration.role
        );
        sessions.set_role(id, registration.role).await;
        return;
    }

    // Anything else is an acknowledgement from the vehicle
    info!("[vehicle #{}] {}", id, text);
}
