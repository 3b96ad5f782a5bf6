//! Session manager for tracking all connected vehicles

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

/// What the station knows about one connection
#[derive(Debug, Clone)]
pub struct VehicleInfo {
    pub id: u64,
    pub addr: SocketAddr,
    /// Role announced in the registration message, if any
    pub role: Option<String>,
    pub connected_at: Instant,
    pub last_pong: Option<Instant>,
}

struct SessionEntry {
    outbound: mpsc::UnboundedSender<String>,
    info: VehicleInfo,
}

/// Manages all active vehicle sessions
#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<u64, SessionEntry>>>,
    next_id: Arc<AtomicU64>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Register a connection; text sent to it is pushed into `outbound`
    pub async fn register(&self, addr: SocketAddr, outbound: mpsc::UnboundedSender<String>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let info = VehicleInfo {
            id,
            addr,
            role: None,
            connected_at: Instant::now(),
            last_pong: None,
        };
        self.sessions
            .write()
            .await
            .insert(id, SessionEntry { outbound, info });
        id
    }

    pub async fn unregister(&self, id: u64) {
        self.sessions.write().await.remove(&id);
    }

    pub async fn set_role(&self, id: u64, role: String) {
        if let Some(entry) = self.sessions.write().await.get_mut(&id) {
            entry.info.role = Some(role);
        }
    }

    pub async fn record_pong(&self, id: u64) {
        if let Some(entry) = self.sessions.write().await.get_mut(&id) {
            entry.info.last_pong = Some(Instant::now());
        }
    }

    /// Send text to every connected vehicle, returning how many got it
    pub async fn broadcast(&self, text: &str) -> usize {
        let sessions = self.sessions.read().await;
        let mut delivered = 0;
        for (id, entry) in sessions.iter() {
            if entry.outbound.send(text.to_string()).is_ok() {
                delivered += 1;
            } else {
                debug!("Vehicle #{} writer already closed", id);
            }
        }
        delivered
    }

    pub async fn vehicles(&self) -> Vec<VehicleInfo> {
        let sessions = self.sessions.read().await;
        let mut list: Vec<VehicleInfo> = sessions.values().map(|e| e.info.clone()).collect();
        list.sort_by_key(|info| info.id);
        list
    }

    /// Vehicles that have not answered a ping within `timeout`
    pub async fn silent_vehicles(&self, timeout: Duration) -> Vec<u64> {
        let sessions = self.sessions.read().await;
        sessions
            .values()
            .filter(|entry| {
                let last = entry.info.last_pong.unwrap_or(entry.info.connected_at);
                last.elapsed() > timeout
            })
            .map(|entry| entry.info.id)
            .collect()
    }

    #[cfg(test)]
    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:4000".parse().unwrap()
    }

    #[tokio::test]
    async fn test_broadcast_reaches_registered_vehicles() {
        let sessions = SessionManager::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let a = sessions.register(addr(), tx_a).await;
        let b = sessions.register(addr(), tx_b).await;
        assert_ne!(a, b);

        assert_eq!(sessions.broadcast("ping").await, 2);
        assert_eq!(rx_a.recv().await.as_deref(), Some("ping"));
        assert_eq!(rx_b.recv().await.as_deref(), Some("ping"));

        sessions.unregister(a).await;
        assert_eq!(sessions.count().await, 1);
        assert_eq!(sessions.broadcast("x").await, 1);
    }

    #[tokio::test]
    async fn test_closed_writer_is_not_counted() {
        let sessions = SessionManager::new();
        let (tx, rx) = mpsc::unbounded_channel();
        sessions.register(addr(), tx).await;
        drop(rx);
        assert_eq!(sessions.broadcast("ping").await, 0);
    }

    #[tokio::test]
    async fn test_role_and_pong_tracking() {
        let sessions = SessionManager::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = sessions.register(addr(), tx).await;

        sessions.set_role(id, "carro".into()).await;
        sessions.record_pong(id).await;

        let vehicles = sessions.vehicles().await;
        assert_eq!(vehicles.len(), 1);
        assert_eq!(vehicles[0].role.as_deref(), Some("carro"));
        assert!(vehicles[0].last_pong.is_some());
        assert!(sessions.silent_vehicles(Duration::from_secs(60)).await.is_empty());
    }
}
