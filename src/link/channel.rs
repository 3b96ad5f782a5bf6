//! Link event channel

use anyhow::{anyhow, Result};
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Duration, Instant};
use tracing::debug;

/// Events delivered to the control task
#[derive(Debug)]
pub enum LinkEvent {
    /// A control link came up
    Established { adapter: &'static str },
    /// The control link is gone; the vehicle must stop
    Lost { reason: String },
    /// Raw command payload, with an optional slot for the acknowledgement
    Command {
        payload: Bytes,
        reply: Option<oneshot::Sender<Option<String>>>,
    },
    /// Rangefinder reading in centimetres
    Distance { cm: f32 },
}

/// Connectivity and command activity shared by every sender clone
#[derive(Debug)]
pub struct LinkActivity {
    connected: AtomicBool,
    /// Milliseconds since `origin` of the last established, command or heartbeat
    last_seen_ms: AtomicU64,
    origin: Instant,
}

impl LinkActivity {
    fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            last_seen_ms: AtomicU64::new(0),
            origin: Instant::now(),
        }
    }

    fn touch(&self) {
        let now = self.origin.elapsed().as_millis() as u64;
        self.last_seen_ms.store(now, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Time since the link was last established or heard from
    pub fn idle_for(&self) -> Duration {
        let now = self.origin.elapsed().as_millis() as u64;
        Duration::from_millis(now.saturating_sub(self.last_seen_ms.load(Ordering::SeqCst)))
    }
}

/// Handle adapters, the watchdog and sensor feeds use to reach the control task
#[derive(Debug, Clone)]
pub struct LinkSender {
    tx: mpsc::Sender<LinkEvent>,
    activity: Arc<LinkActivity>,
    origin: &'static str,
}

/// Create the link event queue
pub fn channel(capacity: usize) -> (LinkSender, mpsc::Receiver<LinkEvent>) {
    let (tx, rx) = mpsc::channel(capacity);
    let sender = LinkSender {
        tx,
        activity: Arc::new(LinkActivity::new()),
        origin: "link",
    };
    (sender, rx)
}

impl LinkSender {
    /// Clone labelled with the adapter that owns it
    pub fn with_origin(&self, origin: &'static str) -> Self {
        Self {
            origin,
            ..self.clone()
        }
    }

    pub async fn established(&self) -> Result<()> {
        self.activity.connected.store(true, Ordering::SeqCst);
        self.activity.touch();
        self.send(LinkEvent::Established {
            adapter: self.origin,
        })
        .await
    }

    pub async fn lost(&self, reason: impl Into<String>) -> Result<()> {
        self.activity.connected.store(false, Ordering::SeqCst);
        self.send(LinkEvent::Lost {
            reason: reason.into(),
        })
        .await
    }

    /// Forward a command and wait for its acknowledgement text.
    ///
    /// A command over a link that was declared lost (by the watchdog) proves
    /// the link is alive again, so the link is re-established first.
    pub async fn command(&self, payload: Bytes) -> Result<Option<String>> {
        if !self.activity.is_connected() {
            debug!("Command over {} while link down, re-establishing", self.origin);
            self.established().await?;
        }
        self.activity.touch();

        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(LinkEvent::Command {
            payload,
            reply: Some(reply_tx),
        })
        .await?;

        Ok(reply_rx.await.unwrap_or_default())
    }

    /// Keep-alive traffic from the peer; proves the link without a command
    pub fn heartbeat(&self) {
        self.activity.touch();
    }

    pub async fn distance(&self, cm: f32) -> Result<()> {
        self.send(LinkEvent::Distance { cm }).await
    }

    pub fn is_connected(&self) -> bool {
        self.activity.is_connected()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn activity(&self) -> &LinkActivity {
        &self.activity
    }

    async fn send(&self, event: LinkEvent) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| anyhow!("control task is not running"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_established_and_lost_track_connectivity() {
        let (link, mut rx) = channel(8);
        let link = link.with_origin("test");
        assert!(!link.is_connected());

        link.established().await.unwrap();
        assert!(link.is_connected());
        assert!(matches!(
            rx.recv().await,
            Some(LinkEvent::Established { adapter: "test" })
        ));

        link.lost("bye").await.unwrap();
        assert!(!link.is_connected());
        match rx.recv().await {
            Some(LinkEvent::Lost { reason }) => assert_eq!(reason, "bye"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_command_reestablishes_and_returns_ack() {
        let (link, mut rx) = channel(8);
        let link = link.with_origin("http");

        let control = tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(event) = rx.recv().await {
                match event {
                    LinkEvent::Command { payload, reply } => {
                        seen.push(format!("command:{}", String::from_utf8_lossy(&payload)));
                        if let Some(reply) = reply {
                            let _ = reply.send(Some("done".into()));
                        }
                    }
                    LinkEvent::Established { adapter } => seen.push(format!("up:{}", adapter)),
                    other => seen.push(format!("{:?}", other)),
                }
            }
            seen
        });

        let ack = link.command(Bytes::from_static(b"STOP")).await.unwrap();
        assert_eq!(ack.as_deref(), Some("done"));
        assert!(link.is_connected());

        drop(link);
        let seen = control.await.unwrap();
        assert_eq!(seen, vec!["up:http", "command:STOP"]);
    }

    #[tokio::test]
    async fn test_dropped_reply_yields_no_ack() {
        let (link, mut rx) = channel(8);
        link.established().await.unwrap();

        tokio::spawn(async move { while rx.recv().await.is_some() {} });

        let ack = link.command(Bytes::from_static(b"{}")).await.unwrap();
        assert_eq!(ack, None);
    }

    #[tokio::test]
    async fn test_send_fails_when_control_task_gone() {
        let (link, rx) = channel(8);
        drop(rx);
        assert!(link.is_closed());
        assert!(link.distance(10.0).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_resets_idle_time() {
        let (link, mut rx) = channel(8);
        link.established().await.unwrap();
        rx.recv().await.unwrap();

        tokio::time::advance(Duration::from_millis(900)).await;
        link.heartbeat();
        assert!(link.activity().idle_for() < Duration::from_millis(100));
        // Heartbeats never reach the control task
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_time() {
        let (link, _rx) = channel(8);
        link.established().await.unwrap();
        tokio::time::advance(Duration::from_millis(750)).await;
        assert!(link.activity().idle_for() >= Duration::from_millis(750));
    }
}
