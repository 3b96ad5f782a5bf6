//! Logging pin backend for hosts without motor hardware

use crate::config::PinConfig;
use rover_shared::{Level, Pin, PinOutput, PwmChannel};
use tracing::{debug, info};

/// Records pin writes in the log instead of driving GPIO lines
#[derive(Debug)]
pub struct SimulatedPins {
    config: PinConfig,
    writes: u64,
}

impl SimulatedPins {
    pub fn new(config: PinConfig) -> Self {
        info!(
            "Simulated GPIO: left {}/{} pwm {}, right {}/{} pwm {}, light {}, {} Hz {}-bit PWM",
            config.left_forward,
            config.left_backward,
            config.left_pwm,
            config.right_forward,
            config.right_backward,
            config.right_pwm,
            config.light,
            config.pwm_frequency_hz,
            config.pwm_resolution_bits,
        );
        Self { config, writes: 0 }
    }

    /// Number of writes issued so far
    #[cfg(test)]
    pub fn writes(&self) -> u64 {
        self.writes
    }
}

impl PinOutput for SimulatedPins {
    fn set_level(&mut self, pin: Pin, level: Level) {
        self.writes += 1;
        debug!(
            "[GPIO {:>2}] {:?} <- {:?} (write #{})",
            self.config.gpio(pin),
            pin,
            level,
            self.writes
        );
    }

    fn set_duty(&mut self, channel: PwmChannel, duty: u8) {
        self.writes += 1;
        debug!(
            "[PWM  {:>2}] {:?} <- {} (write #{})",
            self.config.pwm_gpio(channel),
            channel,
            duty,
            self.writes
        );
    }
}
