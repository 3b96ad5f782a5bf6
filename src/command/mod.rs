//! Command execution for the vehicle
//!
//! This module handles:
//! - Running the resolver on a single task fed by link events
//! - Replying acknowledgement text to the adapter that sent a command
//! - Stopping the vehicle when the last link sender goes away

mod executor;

pub use executor::CommandExecutor;
