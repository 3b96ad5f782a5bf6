//! Safety Module
//!
//! Background feeds that can stop the vehicle on their own: the link
//! watchdog (no commands for too long) and the rangefinder feeding the
//! distance interlock.

mod monitor;
mod range;

pub use monitor::LinkWatchdog;
pub use range::{spawn_range_feed, FileRangefinder};
