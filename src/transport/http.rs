//! HTTP link: commands arrive as `POST /control` requests

use crate::link::LinkSender;
use crate::transport::traits::LinkAdapter;
use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use rover_shared::codec::check_syntax;
use tokio::net::TcpListener;
use tracing::{info, warn};

pub struct HttpAdapter {
    bind: String,
}

impl HttpAdapter {
    pub fn new(bind: impl Into<String>) -> Self {
        Self { bind: bind.into() }
    }
}

/// Routes served by the HTTP link
pub fn router(link: LinkSender) -> Router {
    Router::new()
        .route("/control", post(control))
        .route("/healthz", get(healthz))
        .fallback(not_found)
        .with_state(link)
}

#[async_trait]
impl LinkAdapter for HttpAdapter {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn run(self: Box<Self>, link: LinkSender) -> Result<()> {
        let link = link.with_origin(self.name());
        let listener = TcpListener::bind(&self.bind)
            .await
            .with_context(|| format!("Failed to bind HTTP link on {}", self.bind))?;
        info!("HTTP link listening on http://{}/control", listener.local_addr()?);

        // No session to track; loss is left to the command watchdog
        link.established().await?;
        axum::serve(listener, router(link)).await?;
        Ok(())
    }
}

async fn control(State(link): State<LinkSender>, body: Bytes) -> (StatusCode, String) {
    if let Err(e) = check_syntax(&body) {
        warn!("Rejecting malformed control request: {}", e);
        return (StatusCode::BAD_REQUEST, e.to_string());
    }

    match link.command(body).await {
        Ok(Some(ack)) => (StatusCode::OK, ack),
        Ok(None) => (StatusCode::OK, "ok".into()),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
    }
}

async fn healthz() -> &'static str {
    "ok"
}

async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "Not Found")
}
