//! Actuator Driver
//!
//! The only writer of physical outputs. Each intent-level operation is a
//! short sequence of pin writes with a fixed ordering: pins going LOW are
//! always written before pins going HIGH, so a motor never has both of its
//! direction pins asserted, not even between two writes.

use tracing::debug;

/// Digital output level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

impl From<bool> for Level {
    fn from(high: bool) -> Self {
        if high {
            Level::High
        } else {
            Level::Low
        }
    }
}

/// Logical digital outputs of the vehicle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pin {
    LeftForward,
    LeftBackward,
    RightForward,
    RightBackward,
    Light,
}

impl Pin {
    pub const DIRECTION_PINS: [Pin; 4] = [
        Pin::LeftForward,
        Pin::LeftBackward,
        Pin::RightForward,
        Pin::RightBackward,
    ];
}

/// PWM channels, one per motor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PwmChannel {
    Left,
    Right,
}

/// Output capability the driver writes through
///
/// Writes are assumed to always succeed.
pub trait PinOutput {
    fn set_level(&mut self, pin: Pin, level: Level);

    fn set_duty(&mut self, channel: PwmChannel, duty: u8);
}

impl<T: PinOutput + ?Sized> PinOutput for Box<T> {
    fn set_level(&mut self, pin: Pin, level: Level) {
        (**self).set_level(pin, level)
    }

    fn set_duty(&mut self, channel: PwmChannel, duty: u8) {
        (**self).set_duty(channel, duty)
    }
}

/// Last physical configuration applied to the outputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ActuatorState {
    pub left_forward: bool,
    pub left_backward: bool,
    pub right_forward: bool,
    pub right_backward: bool,
    pub light_on: bool,
    pub left_duty: u8,
    pub right_duty: u8,
}

impl ActuatorState {
    pub fn level(&self, pin: Pin) -> bool {
        match pin {
            Pin::LeftForward => self.left_forward,
            Pin::LeftBackward => self.left_backward,
            Pin::RightForward => self.right_forward,
            Pin::RightBackward => self.right_backward,
            Pin::Light => self.light_on,
        }
    }

    fn set_level(&mut self, pin: Pin, high: bool) {
        match pin {
            Pin::LeftForward => self.left_forward = high,
            Pin::LeftBackward => self.left_backward = high,
            Pin::RightForward => self.right_forward = high,
            Pin::RightBackward => self.right_backward = high,
            Pin::Light => self.light_on = high,
        }
    }

    pub fn duty(&self, channel: PwmChannel) -> u8 {
        match channel {
            PwmChannel::Left => self.left_duty,
            PwmChannel::Right => self.right_duty,
        }
    }

    fn set_duty(&mut self, channel: PwmChannel, duty: u8) {
        match channel {
            PwmChannel::Left => self.left_duty = duty,
            PwmChannel::Right => self.right_duty = duty,
        }
    }

    /// No motor has both direction pins asserted
    pub fn is_consistent(&self) -> bool {
        !(self.left_forward && self.left_backward) && !(self.right_forward && self.right_backward)
    }

    /// All four direction pins are LOW
    pub fn motors_stopped(&self) -> bool {
        !self.left_forward && !self.left_backward && !self.right_forward && !self.right_backward
    }
}

/// Intent-level operations the resolver issues
pub trait Drive {
    fn drive_forward(&mut self);

    fn drive_backward(&mut self);

    /// Spin left: left motor backward, right motor forward
    fn turn_left(&mut self);

    /// Spin right: left motor forward, right motor backward
    fn turn_right(&mut self);

    /// Release all direction pins. Idempotent.
    fn stop(&mut self);

    /// Set the PWM duty of both motors
    fn set_speed(&mut self, duty: u8);

    /// Drive each wheel independently; sign is direction, magnitude is duty
    fn set_wheel_speeds(&mut self, left: i16, right: i16);

    fn set_light(&mut self, on: bool);

    fn state(&self) -> ActuatorState;
}

/// Direction pin pattern: (left forward, left backward, right forward, right backward)
type Pattern = [bool; 4];

const FORWARD: Pattern = [true, false, true, false];
const BACKWARD: Pattern = [false, true, false, true];
const LEFT: Pattern = [false, true, true, false];
const RIGHT: Pattern = [true, false, false, true];
const STOPPED: Pattern = [false, false, false, false];

#[derive(Debug, Clone, Copy)]
enum Side {
    Left,
    Right,
}

impl Side {
    fn pins(self) -> (Pin, Pin) {
        match self {
            Side::Left => (Pin::LeftForward, Pin::LeftBackward),
            Side::Right => (Pin::RightForward, Pin::RightBackward),
        }
    }

    fn channel(self) -> PwmChannel {
        match self {
            Side::Left => PwmChannel::Left,
            Side::Right => PwmChannel::Right,
        }
    }
}

/// Differential-drive actuator driver over a [`PinOutput`]
#[derive(Debug)]
pub struct ActuatorDriver<P> {
    pins: P,
    state: ActuatorState,
}

impl<P: PinOutput> ActuatorDriver<P> {
    /// Take ownership of the outputs and drive all of them LOW
    pub fn new(mut pins: P) -> Self {
        for pin in Pin::DIRECTION_PINS {
            pins.set_level(pin, Level::Low);
        }
        pins.set_level(Pin::Light, Level::Low);
        pins.set_duty(PwmChannel::Left, 0);
        pins.set_duty(PwmChannel::Right, 0);

        Self {
            pins,
            state: ActuatorState::default(),
        }
    }

    pub fn pins(&self) -> &P {
        &self.pins
    }

    /// Apply a direction pattern, releasing pins before asserting any
    fn apply(&mut self, pattern: Pattern) {
        let target = Pin::DIRECTION_PINS.iter().copied().zip(pattern);

        for (pin, high) in target.clone() {
            if !high && self.state.level(pin) {
                self.write(pin, false);
            }
        }
        for (pin, high) in target {
            if high && !self.state.level(pin) {
                self.write(pin, true);
            }
        }
    }

    fn write(&mut self, pin: Pin, high: bool) {
        self.pins.set_level(pin, Level::from(high));
        self.state.set_level(pin, high);
    }

    fn write_duty(&mut self, channel: PwmChannel, duty: u8) {
        if self.state.duty(channel) != duty {
            self.pins.set_duty(channel, duty);
            self.state.set_duty(channel, duty);
        }
    }

    fn set_wheel(&mut self, side: Side, speed: i16) {
        let (forward_pin, backward_pin) = side.pins();
        let duty = speed.unsigned_abs().min(255) as u8;

        match speed.signum() {
            1 => {
                if self.state.level(backward_pin) {
                    self.write(backward_pin, false);
                }
                if !self.state.level(forward_pin) {
                    self.write(forward_pin, true);
                }
            }
            -1 => {
                if self.state.level(forward_pin) {
                    self.write(forward_pin, false);
                }
                if !self.state.level(backward_pin) {
                    self.write(backward_pin, true);
                }
            }
            _ => {
                if self.state.level(forward_pin) {
                    self.write(forward_pin, false);
                }
                if self.state.level(backward_pin) {
                    self.write(backward_pin, false);
                }
            }
        }

        self.write_duty(side.channel(), duty);
    }
}

impl<P: PinOutput> Drive for ActuatorDriver<P> {
    fn drive_forward(&mut self) {
        debug!("Driving forward");
        self.apply(FORWARD);
    }

    fn drive_backward(&mut self) {
        debug!("Driving backward");
        self.apply(BACKWARD);
    }

    fn turn_left(&mut self) {
        debug!("Turning left");
        self.apply(LEFT);
    }

    fn turn_right(&mut self) {
        debug!("Turning right");
        self.apply(RIGHT);
    }

    fn stop(&mut self) {
        debug!("Stopping");
        self.apply(STOPPED);
    }

    fn set_speed(&mut self, duty: u8) {
        self.write_duty(PwmChannel::Left, duty);
        self.write_duty(PwmChannel::Right, duty);
    }

    fn set_wheel_speeds(&mut self, left: i16, right: i16) {
        debug!("Wheel speeds: left={} right={}", left, right);
        self.set_wheel(Side::Left, left);
        self.set_wheel(Side::Right, right);
    }

    fn set_light(&mut self, on: bool) {
        if self.state.light_on != on {
            self.write(Pin::Light, on);
        }
    }

    fn state(&self) -> ActuatorState {
        self.state
    }
}
