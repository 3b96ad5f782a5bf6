//! Link Watchdog
//!
//! Runs a background task that declares the control link lost when
//! neither a command nor a heartbeat has arrived within the configured
//! timeout.

use crate::link::LinkSender;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{info, warn};

/// Upper bound on how often the watchdog looks at the link
const MAX_CHECK_INTERVAL: Duration = Duration::from_millis(250);

pub struct LinkWatchdog {
    link: LinkSender,
    timeout: Duration,
}

impl LinkWatchdog {
    pub fn new(link: LinkSender, timeout: Duration) -> Self {
        Self {
            link: link.with_origin("watchdog"),
            timeout,
        }
    }

    fn check_interval(&self) -> Duration {
        std::cmp::min(self.timeout / 4, MAX_CHECK_INTERVAL).max(Duration::from_millis(1))
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(self) {
        let mut ticker = interval(self.check_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("[SAFETY] Link watchdog armed ({:?} link timeout)", self.timeout);

        loop {
            ticker.tick().await;

            if self.link.is_closed() {
                break;
            }

            let idle = self.link.activity().idle_for();
            if self.link.is_connected() && idle >= self.timeout {
                warn!("[SAFETY] Link silent for {:?}, declaring link lost", idle);
                if self.link.lost("command timeout").await.is_err() {
                    break;
                }
            }
        }

        info!("[SAFETY] Link watchdog stopped");
    }
}
