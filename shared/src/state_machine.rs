//! Command Resolver
//!
//! Turns decoded commands, link events and rangefinder readings into
//! Actuator Driver calls. Actuation is issued only on state change, and link
//! loss always ends in a full stop.

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::actuator::Drive;
use crate::codec::{CommandModel, DriveMode, ParseError};
use crate::{limits, safety, Command, Direction, LightChange, MotionCommand, WheelCommand};

/// Resolver phase. The light bit is tracked separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Link is up and nothing has been commanded since it came up
    Idle,
    Driving(Direction),
    Stopped,
}

/// When a vehicle stopped by the interlock may drive forward again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterlockPolicy {
    /// Forward stays blocked until a non-forward command has been accepted
    #[default]
    LatchUntilNonForward,
    /// Forward is blocked only while the latest reading is too close
    ReleaseWhenClear,
}

/// Distance interlock settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InterlockConfig {
    pub enabled: bool,
    pub stop_distance_cm: f32,
    pub policy: InterlockPolicy,
}

impl Default for InterlockConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            stop_distance_cm: safety::DEFAULT_STOP_DISTANCE_CM,
            policy: InterlockPolicy::default(),
        }
    }
}

/// Why the resolver forced a stop
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StopReason {
    LinkLost,
    Obstacle { distance_cm: f32 },
}

/// What the resolver did with an input
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Outcome {
    /// Actuator calls were issued
    Applied,
    /// Same as the previous command; nothing issued
    Suppressed,
    /// The command asks for nothing
    Noop,
    /// Command arrived while the link was down
    IgnoredLinkDown,
    /// Forward refused by the distance interlock
    Blocked { distance_cm: Option<f32> },
    ForcedStop(StopReason),
}

/// Outcome of one command plus any recovered parse problem
#[derive(Debug)]
pub struct Resolution {
    pub outcome: Outcome,
    pub parse_error: Option<ParseError>,
}

/// Decision inputs carried between commands
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolverContext {
    pub previous_direction: Direction,
    /// Duty last applied in discrete mode
    pub previous_speed: Option<u8>,
    /// Wheel speeds last applied in dual-wheel mode
    pub previous_wheels: WheelCommand,
    pub light_on: bool,
    pub link_connected: bool,
    pub interlock_latched: bool,
    pub last_distance_cm: Option<f32>,
    pub phase: Phase,
}

impl Default for ResolverContext {
    fn default() -> Self {
        Self {
            previous_direction: Direction::Stop,
            previous_speed: None,
            previous_wheels: WheelCommand::default(),
            light_on: false,
            link_connected: false,
            interlock_latched: false,
            last_distance_cm: None,
            phase: Phase::Stopped,
        }
    }
}

/// The command-to-actuation state machine
#[derive(Debug)]
pub struct Resolver<D> {
    driver: D,
    model: CommandModel,
    interlock: InterlockConfig,
    ctx: ResolverContext,
}

impl<D: Drive> Resolver<D> {
    pub fn new(driver: D, mode: DriveMode, interlock: InterlockConfig) -> Self {
        Self {
            driver,
            model: CommandModel::new(mode),
            interlock,
            ctx: ResolverContext::default(),
        }
    }

    pub fn context(&self) -> &ResolverContext {
        &self.ctx
    }

    pub fn phase(&self) -> Phase {
        self.ctx.phase
    }

    pub fn mode(&self) -> DriveMode {
        self.model.mode()
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Handle one raw command payload
    pub fn on_command(&mut self, raw: &[u8]) -> Resolution {
        let decoded = self.model.parse(raw);
        if let Some(e) = &decoded.error {
            warn!("Recovered command parse error: {}", e);
        }

        let outcome = self.resolve(decoded.command);
        debug!("Command resolved: {:?} (phase {:?})", outcome, self.ctx.phase);

        Resolution {
            outcome,
            parse_error: decoded.error,
        }
    }

    /// Resolve an already decoded command
    pub fn resolve(&mut self, command: Command) -> Outcome {
        if !self.ctx.link_connected {
            debug!("Ignoring command while link is down");
            return Outcome::IgnoredLinkDown;
        }

        match command {
            Command::Motion(motion) => self.resolve_motion(motion),
            Command::Wheels(wheels) => self.resolve_wheels(wheels),
        }
    }

    fn resolve_motion(&mut self, cmd: MotionCommand) -> Outcome {
        let light = self.light_change(cmd.light);
        let direction = cmd.direction;

        if cmd.is_noop() {
            return Outcome::Noop;
        }

        if direction != Direction::None && direction != Direction::Forward {
            self.ctx.interlock_latched = false;
        }

        let speed_change = direction.is_drive() && self.ctx.previous_speed != Some(cmd.speed);
        let direction_change =
            direction != Direction::None && direction != self.ctx.previous_direction;

        if !direction_change && !speed_change && light.is_none() {
            return Outcome::Suppressed;
        }

        if direction == Direction::Forward && direction_change && self.forward_blocked() {
            warn!("Forward refused by distance interlock");
            if let Some(on) = light {
                self.apply_light(on);
            }
            return Outcome::Blocked {
                distance_cm: self.ctx.last_distance_cm,
            };
        }

        if speed_change {
            self.driver.set_speed(cmd.speed);
            self.ctx.previous_speed = Some(cmd.speed);
        }

        if direction_change {
            match direction {
                Direction::Forward => self.driver.drive_forward(),
                Direction::Backward => self.driver.drive_backward(),
                Direction::Left => self.driver.turn_left(),
                Direction::Right => self.driver.turn_right(),
                Direction::Stop => self.driver.stop(),
                Direction::None => {}
            }
            self.set_direction(direction);
        }

        if let Some(on) = light {
            self.apply_light(on);
        }

        Outcome::Applied
    }

    fn resolve_wheels(&mut self, wheels: WheelCommand) -> Outcome {
        if wheels == self.ctx.previous_wheels {
            return Outcome::Suppressed;
        }

        let heading = wheels.heading();
        if !wheels.advances() {
            self.ctx.interlock_latched = false;
        } else if !self.ctx.previous_wheels.advances() && self.forward_blocked() {
            warn!("Forward refused by distance interlock");
            return Outcome::Blocked {
                distance_cm: self.ctx.last_distance_cm,
            };
        }

        self.driver.set_wheel_speeds(wheels.left, wheels.right);
        self.ctx.previous_wheels = wheels;
        self.set_direction(heading);

        Outcome::Applied
    }

    /// Handle a rangefinder reading
    pub fn on_distance(&mut self, distance_cm: f32) -> Outcome {
        if !self.interlock.enabled || !distance_cm.is_finite() || distance_cm < 0.0 {
            return Outcome::Noop;
        }

        self.ctx.last_distance_cm = Some(distance_cm);

        if distance_cm >= self.interlock.stop_distance_cm {
            if self.interlock.policy == InterlockPolicy::ReleaseWhenClear {
                self.ctx.interlock_latched = false;
            }
            return Outcome::Noop;
        }

        if !self.advancing() {
            return Outcome::Noop;
        }

        warn!(
            "Obstacle at {:.1} cm (limit {:.1} cm), forcing stop",
            distance_cm, self.interlock.stop_distance_cm
        );
        self.force_stop();
        self.ctx.interlock_latched = true;
        Outcome::ForcedStop(StopReason::Obstacle { distance_cm })
    }

    /// Safety transition on loss of the control link
    pub fn on_link_lost(&mut self) -> Outcome {
        self.force_stop();
        self.ctx.link_connected = false;
        Outcome::ForcedStop(StopReason::LinkLost)
    }

    pub fn on_link_established(&mut self) {
        self.ctx.link_connected = true;
        if self.ctx.phase == Phase::Stopped {
            self.ctx.phase = Phase::Idle;
        }
        info!("Link established, accepting commands");
    }

    /// Human-readable acknowledgement for a command outcome
    pub fn acknowledge(&self, outcome: &Outcome) -> Option<String> {
        match outcome {
            Outcome::IgnoredLinkDown | Outcome::ForcedStop(_) => None,
            Outcome::Blocked {
                distance_cm: Some(d),
            } => Some(format!("blocked: obstacle at {:.0} cm", d)),
            Outcome::Blocked { distance_cm: None } => Some("blocked: obstacle".into()),
            Outcome::Applied | Outcome::Suppressed | Outcome::Noop => Some(self.status_line()),
        }
    }

    /// Current commanded state as a short status string
    pub fn status_line(&self) -> String {
        match self.model.mode() {
            DriveMode::DualWheel => format!(
                "Vel izq: {}, der: {}",
                self.ctx.previous_wheels.left, self.ctx.previous_wheels.right
            ),
            DriveMode::Discrete => format!(
                "state: {}, speed: {}, light: {}",
                self.ctx.previous_direction,
                self.ctx.previous_speed.unwrap_or(limits::MAX_SPEED),
                if self.ctx.light_on { "on" } else { "off" }
            ),
        }
    }

    /// Whether the current motion closes in on what the rangefinder sees
    fn advancing(&self) -> bool {
        match self.model.mode() {
            DriveMode::DualWheel => self.ctx.previous_wheels.advances(),
            DriveMode::Discrete => self.ctx.previous_direction == Direction::Forward,
        }
    }

    fn forward_blocked(&self) -> bool {
        if !self.interlock.enabled {
            return false;
        }
        match self.interlock.policy {
            InterlockPolicy::LatchUntilNonForward => self.ctx.interlock_latched,
            InterlockPolicy::ReleaseWhenClear => self
                .ctx
                .last_distance_cm
                .map_or(false, |d| d < self.interlock.stop_distance_cm),
        }
    }

    /// Only requested light levels that differ from the current one count
    fn light_change(&self, light: LightChange) -> Option<bool> {
        light.target().filter(|on| *on != self.ctx.light_on)
    }

    fn apply_light(&mut self, on: bool) {
        self.driver.set_light(on);
        self.ctx.light_on = on;
    }

    fn set_direction(&mut self, direction: Direction) {
        self.ctx.previous_direction = direction;
        self.ctx.phase = if direction.is_drive() {
            Phase::Driving(direction)
        } else {
            Phase::Stopped
        };
    }

    fn force_stop(&mut self) {
        self.driver.stop();
        if self.model.mode() == DriveMode::DualWheel {
            self.driver.set_wheel_speeds(0, 0);
            self.ctx.previous_wheels = WheelCommand::default();
        }
        self.set_direction(Direction::Stop);
    }
}
