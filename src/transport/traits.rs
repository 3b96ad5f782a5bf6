//! Link adapter trait abstraction for pluggable control links

use crate::link::LinkSender;
use anyhow::Result;
use async_trait::async_trait;

/// A source of control commands and link-status events
#[async_trait]
pub trait LinkAdapter: Send {
    /// Human-readable name for this adapter
    fn name(&self) -> &'static str;

    /// Serve the link until it fails for good or the control task goes away
    async fn run(self: Box<Self>, link: LinkSender) -> Result<()>;
}
