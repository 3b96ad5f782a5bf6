//! Rangefinder feed for the distance interlock

use crate::link::LinkSender;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Source of forward distance readings
#[async_trait]
pub trait DistanceSensor: Send {
    /// Latest reading in centimetres, `None` when no echo was measured
    async fn read_cm(&mut self) -> Result<Option<f32>>;
}

/// Reads the latest value a driver exports to a file (sysfs, or a file a
/// sensor daemon keeps rewriting)
pub struct FileRangefinder {
    path: PathBuf,
    scale: f32,
}

impl FileRangefinder {
    pub fn new(path: impl Into<PathBuf>, scale: f32) -> Self {
        Self {
            path: path.into(),
            scale,
        }
    }
}

#[async_trait]
impl DistanceSensor for FileRangefinder {
    async fn read_cm(&mut self) -> Result<Option<f32>> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read rangefinder {}", self.path.display()))?;

        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }

        let raw: f32 = text
            .parse()
            .with_context(|| format!("Unreadable rangefinder value {:?}", text))?;
        Ok(Some(raw * self.scale))
    }
}

/// Poll `sensor` and forward each reading to the control task
pub fn spawn_range_feed<S>(mut sensor: S, link: LinkSender, period: Duration) -> JoinHandle<()>
where
    S: DistanceSensor + 'static,
{
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut failing = false;
        info!("[SAFETY] Rangefinder feed started ({:?} period)", period);

        loop {
            ticker.tick().await;

            match sensor.read_cm().await {
                Ok(Some(cm)) => {
                    if failing {
                        info!("[SAFETY] Rangefinder readings recovered");
                        failing = false;
                    }
                    if link.distance(cm).await.is_err() {
                        break;
                    }
                }
                Ok(None) => debug!("Rangefinder: no echo"),
                Err(e) => {
                    // Log the first failure of a run only
                    if !failing {
                        warn!("[SAFETY] {:#}", e);
                        failing = true;
                    }
                    if link.is_closed() {
                        break;
                    }
                }
            }
        }

        info!("[SAFETY] Rangefinder feed stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::{channel, LinkEvent};
    use anyhow::anyhow;
    use std::collections::VecDeque;

    struct ScriptedSensor {
        readings: VecDeque<Result<Option<f32>>>,
    }

    #[async_trait]
    impl DistanceSensor for ScriptedSensor {
        async fn read_cm(&mut self) -> Result<Option<f32>> {
            self.readings.pop_front().unwrap_or(Ok(None))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_feed_forwards_readings_and_skips_gaps() {
        let sensor = ScriptedSensor {
            readings: VecDeque::from(vec![
                Ok(Some(120.0)),
                Ok(None),
                Err(anyhow!("i2c timeout")),
                Ok(Some(35.5)),
            ]),
        };
        let (link, mut rx) = channel(8);
        let feed = spawn_range_feed(sensor, link, Duration::from_millis(50));

        let mut readings = Vec::new();
        while readings.len() < 2 {
            if let Some(LinkEvent::Distance { cm }) = rx.recv().await {
                readings.push(cm);
            }
        }
        assert_eq!(readings, vec![120.0, 35.5]);

        drop(rx);
        feed.abort();
    }

    #[tokio::test]
    async fn test_file_rangefinder_scales_value() {
        let path = std::env::temp_dir().join(format!("rover-range-{}", std::process::id()));
        tokio::fs::write(&path, "415\n").await.unwrap();

        let mut sensor = FileRangefinder::new(&path, 0.1);
        let cm = sensor.read_cm().await.unwrap().unwrap();
        assert!((cm - 41.5).abs() < 1e-4);

        tokio::fs::write(&path, "").await.unwrap();
        assert_eq!(sensor.read_cm().await.unwrap(), None);

        tokio::fs::write(&path, "far").await.unwrap();
        assert!(sensor.read_cm().await.is_err());

        tokio::fs::remove_file(&path).await.unwrap();
        assert!(sensor.read_cm().await.is_err());
    }
}
