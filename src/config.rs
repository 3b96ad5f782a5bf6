//! Vehicle configuration
//!
//! Loaded from an optional TOML file, then overridden by `ROVER__`
//! environment variables (`ROVER__LINK__MODE=http`,
//! `ROVER__INTERLOCK__ENABLED=true`, ...).

use anyhow::{bail, Context, Result};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use rover_shared::{safety, DriveMode, InterlockConfig, InterlockPolicy, Pin, PwmChannel};
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use tracing::info;

pub const DEFAULT_CONFIG_PATH: &str = "config/rover.toml";

/// Which link adapter carries commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum LinkMode {
    /// Dial out to a control station
    #[default]
    WsClient,
    /// Accept controllers on a local WebSocket endpoint
    WsServer,
    /// Accept `POST /control` requests
    Http,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoverConfig {
    pub device_id: String,
    pub link: LinkConfig,
    pub drive: DriveConfig,
    pub pins: PinConfig,
    pub interlock: InterlockSettings,
}

impl Default for RoverConfig {
    fn default() -> Self {
        Self {
            device_id: "rover-001".into(),
            link: LinkConfig::default(),
            drive: DriveConfig::default(),
            pins: PinConfig::default(),
            interlock: InterlockSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub mode: LinkMode,
    /// Control station URL for `ws_client`
    pub url: String,
    /// Listen address for `ws_server` and `http`
    pub bind: String,
    pub reconnect_delay_ms: u64,
    pub max_reconnect_delay_ms: u64,
    pub connect_timeout_ms: u64,
    /// Declare the link lost after this long without a command or heartbeat.
    /// 0 disables; not allowed for `http`, which has no session to lose.
    pub command_timeout_ms: u64,
    /// Capacity of the link event queue
    pub queue_depth: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            mode: LinkMode::default(),
            url: "ws://127.0.0.1:8080/ws".into(),
            bind: "0.0.0.0:8080".into(),
            reconnect_delay_ms: 1000,
            max_reconnect_delay_ms: 30_000,
            connect_timeout_ms: 5000,
            command_timeout_ms: safety::LINK_TIMEOUT_MS,
            queue_depth: 64,
        }
    }
}

impl LinkConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn max_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.max_reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        (self.command_timeout_ms > 0).then(|| Duration::from_millis(self.command_timeout_ms))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    pub mode: DriveMode,
}

/// GPIO assignment of the H-bridge, PWM and light outputs
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PinConfig {
    pub left_forward: u8,
    pub left_backward: u8,
    pub left_pwm: u8,
    pub right_forward: u8,
    pub right_backward: u8,
    pub right_pwm: u8,
    pub light: u8,
    pub pwm_frequency_hz: u32,
    pub pwm_resolution_bits: u8,
}

impl Default for PinConfig {
    fn default() -> Self {
        Self {
            left_forward: 2,
            left_backward: 5,
            left_pwm: 26,
            right_forward: 12,
            right_backward: 14,
            right_pwm: 25,
            light: 4,
            pwm_frequency_hz: 1000,
            pwm_resolution_bits: 8,
        }
    }
}

impl PinConfig {
    pub fn gpio(&self, pin: Pin) -> u8 {
        match pin {
            Pin::LeftForward => self.left_forward,
            Pin::LeftBackward => self.left_backward,
            Pin::RightForward => self.right_forward,
            Pin::RightBackward => self.right_backward,
            Pin::Light => self.light,
        }
    }

    pub fn pwm_gpio(&self, channel: PwmChannel) -> u8 {
        match channel {
            PwmChannel::Left => self.left_pwm,
            PwmChannel::Right => self.right_pwm,
        }
    }

    fn all(&self) -> [u8; 7] {
        [
            self.left_forward,
            self.left_backward,
            self.left_pwm,
            self.right_forward,
            self.right_backward,
            self.right_pwm,
            self.light,
        ]
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InterlockSettings {
    pub enabled: bool,
    pub stop_distance_cm: f32,
    pub policy: InterlockPolicy,
    /// File holding the latest rangefinder reading
    pub sensor_path: Option<String>,
    /// Multiplier turning the raw reading into centimetres
    pub sensor_scale: f32,
    pub poll_interval_ms: u64,
}

impl Default for InterlockSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            stop_distance_cm: safety::DEFAULT_STOP_DISTANCE_CM,
            policy: InterlockPolicy::default(),
            sensor_path: None,
            sensor_scale: 1.0,
            poll_interval_ms: 100,
        }
    }
}

impl InterlockSettings {
    pub fn resolver_config(&self) -> InterlockConfig {
        InterlockConfig {
            enabled: self.enabled,
            stop_distance_cm: self.stop_distance_cm,
            policy: self.policy,
        }
    }
}

impl RoverConfig {
    /// Load from `path` (or the default location) plus environment overrides.
    /// An explicitly given file must exist.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let (path, required) = match path {
            Some(path) => (path, true),
            None => (DEFAULT_CONFIG_PATH, false),
        };
        info!("Loading configuration from {} (required: {})", path, required);

        let builder =
            Config::builder().add_source(File::new(path, FileFormat::Toml).required(required));
        Self::from_builder(builder)
    }

    fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self> {
        let config: RoverConfig = builder
            .add_source(
                Environment::with_prefix("ROVER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let pins = self.pins.all();
        let unique: HashSet<u8> = pins.iter().copied().collect();
        if unique.len() != pins.len() {
            bail!("GPIO assignments must be distinct: {:?}", pins);
        }

        if self.pins.pwm_resolution_bits != 8 {
            bail!(
                "Unsupported PWM resolution {} bits (duty values are 8-bit)",
                self.pins.pwm_resolution_bits
            );
        }

        if !(self.interlock.stop_distance_cm > 0.0) {
            bail!(
                "interlock.stop_distance_cm must be positive, got {}",
                self.interlock.stop_distance_cm
            );
        }

        if self.interlock.enabled && self.interlock.poll_interval_ms == 0 {
            bail!("interlock.poll_interval_ms must be non-zero");
        }

        if self.link.reconnect_delay_ms == 0
            || self.link.max_reconnect_delay_ms < self.link.reconnect_delay_ms
        {
            bail!(
                "Invalid reconnect delays: {} ms initial, {} ms max",
                self.link.reconnect_delay_ms,
                self.link.max_reconnect_delay_ms
            );
        }

        if self.link.mode == LinkMode::Http && self.link.command_timeout_ms == 0 {
            bail!("link.command_timeout_ms must be non-zero in http mode");
        }

        if self.link.queue_depth == 0 {
            bail!("link.queue_depth must be non-zero");
        }

        Ok(())
    }
}
