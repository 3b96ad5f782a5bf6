//! WebSocket client link: dials the control station and keeps reconnecting

use crate::config::LinkConfig;
use crate::link::LinkSender;
use crate::transport::traits::LinkAdapter;
use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use rover_shared::{Registration, PING, PONG};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WsClientAdapter {
    url: String,
    reconnect_delay: Duration,
    max_reconnect_delay: Duration,
    connect_timeout: Duration,
}

impl WsClientAdapter {
    #[cfg(test)]
    pub fn new(url: impl Into<String>) -> Self {
        let defaults = LinkConfig::default();
        Self {
            url: url.into(),
            reconnect_delay: defaults.reconnect_delay(),
            max_reconnect_delay: defaults.max_reconnect_delay(),
            connect_timeout: defaults.connect_timeout(),
        }
    }

    pub fn from_config(config: &LinkConfig) -> Self {
        Self {
            url: config.url.clone(),
            reconnect_delay: config.reconnect_delay(),
            max_reconnect_delay: config.max_reconnect_delay(),
            connect_timeout: config.connect_timeout(),
        }
    }

    #[cfg(test)]
    pub fn with_reconnect_delays(mut self, initial: Duration, max: Duration) -> Self {
        self.reconnect_delay = initial;
        self.max_reconnect_delay = max;
        self
    }
}

#[async_trait]
impl LinkAdapter for WsClientAdapter {
    fn name(&self) -> &'static str {
        "ws-client"
    }

    async fn run(self: Box<Self>, link: LinkSender) -> Result<()> {
        let link = link.with_origin(self.name());
        let mut reconnect_delay = self.reconnect_delay;

        loop {
            match timeout(self.connect_timeout, connect_async(self.url.as_str())).await {
                Ok(Ok((stream, _))) => {
                    info!("Connected to control station at {}", self.url);
                    reconnect_delay = self.reconnect_delay;

                    let reason = match session(stream, &link).await {
                        Ok(()) => "station closed the connection".to_string(),
                        Err(e) => e.to_string(),
                    };
                    warn!("Control station link down: {}", reason);
                    link.lost(reason).await?;
                }
                Ok(Err(e)) => {
                    warn!("Failed to connect to {}: {}", self.url, e);
                }
                Err(_) => {
                    warn!("Connecting to {} timed out", self.url);
                }
            }

            if link.is_closed() {
                return Ok(());
            }

            debug!("Reconnecting in {:?}", reconnect_delay);
            sleep(reconnect_delay).await;

            // Exponential backoff
            reconnect_delay = std::cmp::min(reconnect_delay * 2, self.max_reconnect_delay);
        }
    }
}

/// Serve one connection until it closes or fails
async fn session(stream: WsStream, link: &LinkSender) -> Result<()> {
    let (mut writer, mut reader) = stream.split();

    let hello = serde_json::to_string(&Registration::vehicle())?;
    writer
        .send(Message::Text(hello))
        .await
        .context("Failed to register with control station")?;
    link.established().await?;

    while let Some(message) = reader.next().await {
        match message? {
            Message::Text(text) => {
                if text.trim() == PING {
                    link.heartbeat();
                    writer.send(Message::Text(PONG.into())).await?;
                    continue;
                }

                if let Some(ack) = link.command(Bytes::from(text)).await? {
                    writer.send(Message::Text(ack)).await?;
                }
            }
            Message::Binary(data) => {
                debug!("Ignoring {} byte binary frame", data.len());
            }
            Message::Close(frame) => {
                debug!("Close frame from station: {:?}", frame);
                break;
            }
            _ => {}
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::{channel, LinkEvent};
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    /// Stand-in control task answering every command with a fixed ack
    fn spawn_control(
        mut rx: tokio::sync::mpsc::Receiver<LinkEvent>,
    ) -> tokio::sync::mpsc::UnboundedReceiver<String> {
        let (log_tx, log_rx) = tokio::sync::mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let entry = match event {
                    LinkEvent::Established { adapter } => format!("up:{}", adapter),
                    LinkEvent::Lost { .. } => "down".to_string(),
                    LinkEvent::Command { payload, reply } => {
                        if let Some(reply) = reply {
                            let _ = reply.send(Some("ack".into()));
                        }
                        format!("cmd:{}", String::from_utf8_lossy(&payload))
                    }
                    LinkEvent::Distance { cm } => format!("dist:{}", cm),
                };
                let _ = log_tx.send(entry);
            }
        });
        log_rx
    }

    #[tokio::test]
    async fn test_registers_answers_ping_and_forwards_commands() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/ws", listener.local_addr().unwrap());

        let (link, rx) = channel(16);
        let mut log = spawn_control(rx);
        let adapter = Box::new(WsClientAdapter::new(url));
        let task = tokio::spawn(adapter.run(link));

        let (socket, _) = listener.accept().await.unwrap();
        let mut station = accept_async(socket).await.unwrap();

        let hello = station.next().await.unwrap().unwrap();
        assert_eq!(hello, Message::Text(r#"{"type":"register","role":"carro"}"#.into()));
        assert_eq!(log.recv().await.as_deref(), Some("up:ws-client"));

        station.send(Message::Text(PING.into())).await.unwrap();
        assert_eq!(
            station.next().await.unwrap().unwrap(),
            Message::Text(PONG.into())
        );

        station
            .send(Message::Text(r#"{"state":"FORWARD"}"#.into()))
            .await
            .unwrap();
        assert_eq!(
            station.next().await.unwrap().unwrap(),
            Message::Text("ack".into())
        );
        assert_eq!(log.recv().await.as_deref(), Some(r#"cmd:{"state":"FORWARD"}"#));

        station.close(None).await.unwrap();
        assert_eq!(log.recv().await.as_deref(), Some("down"));

        task.abort();
    }

    #[tokio::test]
    async fn test_silent_station_stops_vehicle() {
        use crate::command::CommandExecutor;
        use crate::config::PinConfig;
        use crate::hardware::SimulatedPins;
        use crate::safety::LinkWatchdog;
        use rover_shared::{ActuatorDriver, Drive, DriveMode, InterlockConfig, Resolver};

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/ws", listener.local_addr().unwrap());

        let (link, rx) = channel(16);
        let resolver = Resolver::new(
            ActuatorDriver::new(SimulatedPins::new(PinConfig::default())),
            DriveMode::Discrete,
            InterlockConfig::default(),
        );
        let executor = tokio::spawn(CommandExecutor::new(resolver, rx).run());
        let watchdog = LinkWatchdog::new(link.clone(), Duration::from_millis(300)).spawn();
        let task = tokio::spawn(Box::new(WsClientAdapter::new(url)).run(link.clone()));

        let (socket, _) = listener.accept().await.unwrap();
        let mut station = accept_async(socket).await.unwrap();
        station.next().await.unwrap().unwrap();

        station
            .send(Message::Text(r#"{"state":"FORWARD"}"#.into()))
            .await
            .unwrap();
        assert_eq!(
            station.next().await.unwrap().unwrap(),
            Message::Text("state: FORWARD, speed: 255, light: off".into())
        );

        // Pings alone keep the link up well past the timeout
        for _ in 0..6 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            station.send(Message::Text(PING.into())).await.unwrap();
            assert_eq!(station.next().await.unwrap().unwrap(), Message::Text(PONG.into()));
        }
        assert!(link.is_connected());

        // Station goes quiet with the socket still open
        tokio::time::timeout(Duration::from_secs(2), async {
            while link.is_connected() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("watchdog should declare the link lost");

        task.abort();
        watchdog.abort();
        let _ = task.await;
        let _ = watchdog.await;
        drop(link);

        let (resolver, stats) = executor.await.unwrap();
        // Watchdog stop plus the final stop on shutdown
        assert_eq!(stats.forced_stops, 2);
        assert!(resolver.driver().state().motors_stopped());
        drop(station);
    }

    #[tokio::test]
    async fn test_reconnects_after_station_drops() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());

        let (link, rx) = channel(16);
        let mut log = spawn_control(rx);
        let adapter = Box::new(
            WsClientAdapter::new(url)
                .with_reconnect_delays(Duration::from_millis(10), Duration::from_millis(40)),
        );
        let task = tokio::spawn(adapter.run(link));

        let (socket, _) = listener.accept().await.unwrap();
        let station = accept_async(socket).await.unwrap();
        assert_eq!(log.recv().await.as_deref(), Some("up:ws-client"));
        drop(station);
        assert_eq!(log.recv().await.as_deref(), Some("down"));

        let (socket, _) = listener.accept().await.unwrap();
        let _station = accept_async(socket).await.unwrap();
        assert_eq!(log.recv().await.as_deref(), Some("up:ws-client"));

        task.abort();
    }
}
