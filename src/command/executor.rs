//! Command executor - the single task that owns the resolver
//!
//! Every link event is handled to completion before the next one is
//! received, so the resolver and actuator state have exactly one writer.

use crate::link::LinkEvent;
use rover_shared::{Drive, Outcome, Resolver, StopReason};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Counters reported when the executor stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutorStats {
    pub commands: u64,
    pub applied: u64,
    pub suppressed: u64,
    pub ignored: u64,
    pub blocked: u64,
    pub parse_errors: u64,
    pub forced_stops: u64,
}

impl ExecutorStats {
    fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Applied => self.applied += 1,
            Outcome::Suppressed => self.suppressed += 1,
            Outcome::IgnoredLinkDown => self.ignored += 1,
            Outcome::Blocked { .. } => self.blocked += 1,
            Outcome::ForcedStop(_) => self.forced_stops += 1,
            Outcome::Noop => {}
        }
    }
}

/// Feeds link events into a [`Resolver`]
pub struct CommandExecutor<D> {
    resolver: Resolver<D>,
    events: mpsc::Receiver<LinkEvent>,
    stats: ExecutorStats,
}

impl<D: Drive> CommandExecutor<D> {
    pub fn new(resolver: Resolver<D>, events: mpsc::Receiver<LinkEvent>) -> Self {
        Self {
            resolver,
            events,
            stats: ExecutorStats::default(),
        }
    }

    /// Run until every link sender is gone, then stop the vehicle.
    /// Returns the resolver so its final state can be inspected.
    pub async fn run(mut self) -> (Resolver<D>, ExecutorStats) {
        info!("Command executor started ({:?} mode)", self.resolver.mode());

        while let Some(event) = self.events.recv().await {
            self.handle(event);
        }

        info!("Link event channel closed, stopping vehicle");
        let outcome = self.resolver.on_link_lost();
        self.stats.record(&outcome);
        info!("Command executor stopped: {:?}", self.stats);

        (self.resolver, self.stats)
    }

    fn handle(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Established { adapter } => {
                info!("Link established via {}", adapter);
                self.resolver.on_link_established();
            }
            LinkEvent::Lost { reason } => {
                warn!("Link lost ({}), forcing stop", reason);
                let outcome = self.resolver.on_link_lost();
                self.stats.record(&outcome);
            }
            LinkEvent::Command { payload, reply } => {
                self.stats.commands += 1;
                let resolution = self.resolver.on_command(&payload);
                if resolution.parse_error.is_some() {
                    self.stats.parse_errors += 1;
                }
                self.stats.record(&resolution.outcome);

                let ack = self.resolver.acknowledge(&resolution.outcome);
                debug!(
                    "Command {:?} -> {:?}, ack {:?}",
                    String::from_utf8_lossy(&payload),
                    resolution.outcome,
                    ack
                );

                if let Some(reply) = reply {
                    // Requester may have gone away; nothing to do then
                    let _ = reply.send(ack);
                }
            }
            LinkEvent::Distance { cm } => {
                let outcome = self.resolver.on_distance(cm);
                if let Outcome::ForcedStop(StopReason::Obstacle { distance_cm }) = outcome {
                    warn!("Interlock stopped the vehicle at {:.1} cm", distance_cm);
                }
                self.stats.record(&outcome);
            }
        }
    }
}
