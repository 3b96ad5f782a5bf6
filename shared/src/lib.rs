//! Rover Shared Protocol Types
//!
//! This crate provides the command payload types and the command-to-actuation
//! core shared by the vehicle firmware and the control station.

pub mod actuator;
pub mod codec;
pub mod state_machine;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use actuator::{ActuatorDriver, ActuatorState, Drive, Level, Pin, PinOutput, PwmChannel};
pub use codec::{CommandModel, Decoded, DriveMode, ParseError};
pub use state_machine::{
    InterlockConfig, InterlockPolicy, Outcome, Phase, Resolution, Resolver, ResolverContext,
    StopReason,
};

/// Value limits for command fields
pub mod limits {
    /// Upper bound of a speed / PWM duty value, also the default speed
    pub const MAX_SPEED: u8 = 255;

    /// Magnitude bound of a signed wheel speed
    pub const MAX_WHEEL_SPEED: i16 = 255;
}

/// Safety parameters for the system
pub mod safety {
    /// Keep-alive interval used by the control station, in milliseconds
    pub const HEARTBEAT_INTERVAL_MS: u64 = 1000;

    /// Silence after which either end treats the link as dead
    pub const LINK_TIMEOUT_MS: u64 = 3 * HEARTBEAT_INTERVAL_MS;

    /// Distance below which a forward-moving vehicle is stopped
    pub const DEFAULT_STOP_DISTANCE_CM: f32 = 40.0;
}

/// Mutually exclusive drive intents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Forward,
    Backward,
    Left,
    Right,
    Stop,
    /// No motor change
    None,
}

impl Direction {
    pub const ALL: [Direction; 6] = [
        Direction::Forward,
        Direction::Backward,
        Direction::Left,
        Direction::Right,
        Direction::Stop,
        Direction::None,
    ];

    /// Name used for this direction in the `state` field
    pub fn wire_name(self) -> &'static str {
        match self {
            Direction::Forward => "FORWARD",
            Direction::Backward => "BACKWARD",
            Direction::Left => "LEFT",
            Direction::Right => "RIGHT",
            Direction::Stop => "STOP",
            Direction::None => "NONE",
        }
    }

    /// True for directions that energise the motors
    pub fn is_drive(self) -> bool {
        matches!(
            self,
            Direction::Forward | Direction::Backward | Direction::Left | Direction::Right
        )
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// Requested change of the auxiliary light output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LightChange {
    On,
    Off,
    #[default]
    Unchanged,
}

impl LightChange {
    pub fn from_bool(on: bool) -> Self {
        if on {
            LightChange::On
        } else {
            LightChange::Off
        }
    }

    /// The requested level, if any
    pub fn target(self) -> Option<bool> {
        match self {
            LightChange::On => Some(true),
            LightChange::Off => Some(false),
            LightChange::Unchanged => None,
        }
    }
}

/// A parsed, validated discrete-mode command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotionCommand {
    pub direction: Direction,
    pub light: LightChange,
    pub speed: u8,
}

impl MotionCommand {
    pub fn new(direction: Direction, light: LightChange, speed: u8) -> Self {
        Self {
            direction,
            light,
            speed,
        }
    }

    /// The command every unusable payload degrades to
    pub fn noop() -> Self {
        Self::new(Direction::None, LightChange::Unchanged, limits::MAX_SPEED)
    }

    pub fn is_noop(&self) -> bool {
        self.direction == Direction::None && self.light == LightChange::Unchanged
    }
}

impl Default for MotionCommand {
    fn default() -> Self {
        Self::noop()
    }
}

/// A dual-wheel command: signed per-wheel speeds in [-255, 255]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WheelCommand {
    pub left: i16,
    pub right: i16,
}

impl WheelCommand {
    pub fn new(left: i16, right: i16) -> Self {
        Self {
            left: left.clamp(-limits::MAX_WHEEL_SPEED, limits::MAX_WHEEL_SPEED),
            right: right.clamp(-limits::MAX_WHEEL_SPEED, limits::MAX_WHEEL_SPEED),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.left == 0 && self.right == 0
    }

    /// Coarse heading of the vehicle under these wheel speeds
    pub fn heading(&self) -> Direction {
        match (self.left, self.right) {
            (0, 0) => Direction::Stop,
            (l, r) if l > 0 && r > 0 => Direction::Forward,
            (l, r) if l < 0 && r < 0 => Direction::Backward,
            (l, r) if l < r => Direction::Left,
            _ => Direction::Right,
        }
    }

    /// True when at least one wheel pushes forward and neither reverses.
    /// A pivot on one forward wheel still closes in on what is ahead.
    pub fn advances(&self) -> bool {
        (self.left > 0 || self.right > 0) && self.left >= 0 && self.right >= 0
    }
}

/// A decoded command, in whichever shape the drive mode produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Motion(MotionCommand),
    Wheels(WheelCommand),
}

impl Command {
    pub fn noop() -> Self {
        Command::Motion(MotionCommand::noop())
    }

    pub fn is_noop(&self) -> bool {
        matches!(self, Command::Motion(m) if m.is_noop())
    }
}

/// Wire form of a command, as produced by controllers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ControlMessage {
    State {
        state: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        speed: Option<u8>,
    },
    Wheels {
        left: f32,
        right: f32,
    },
}

impl ControlMessage {
    pub fn direction(direction: Direction, speed: Option<u8>) -> Self {
        ControlMessage::State {
            state: direction.wire_name().into(),
            speed,
        }
    }

    pub fn light(on: bool) -> Self {
        ControlMessage::State {
            state: if on { "LIGHT_ON" } else { "LIGHT_OFF" }.into(),
            speed: None,
        }
    }

    pub fn wheels(left: f32, right: f32) -> Self {
        ControlMessage::Wheels { left, right }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Greeting a vehicle sends after dialing a control station
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    #[serde(rename = "type")]
    pub kind: String,
    pub role: String,
}

impl Registration {
    pub fn vehicle() -> Self {
        Self {
            kind: "register".into(),
            role: "carro".into(),
        }
    }
}

/// Liveness probe text exchanged on WebSocket links
pub const PING: &str = "ping";

/// Reply to [`PING`]
pub const PONG: &str = "pong";
