//! Session management for connected vehicles
//!
//! This module handles:
//! - Accepting vehicle WebSocket connections
//! - Tracking registration and ping replies per vehicle
//! - Broadcasting operator commands to every vehicle

mod connection;
mod manager;

pub use connection::serve;
pub use manager::SessionManager;
