//! Link event plumbing between adapters and the control task
//!
//! This module handles:
//! - The `LinkEvent` queue feeding the single control task
//! - Link connectivity and command activity tracking for the watchdog
//! - Re-establishing a link that was declared lost when a command arrives

mod channel;

pub use channel::{channel, LinkEvent, LinkSender};
