//! Command payload decoding
//!
//! Payloads arrive either as JSON text (WebSocket frames, HTTP bodies):
//! ```text
//! {"state": "FORWARD", "speed": 200}
//! {"left": 120.5, "right": -80}
//! ```
//! or as url-encoded form bodies (`state=FORWARD&speed=200`).
//!
//! Decoding never fails the caller. Anything unusable degrades to the no-op
//! command and the problem is reported next to it for logging.

use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::{limits, Command, Direction, LightChange, MotionCommand, WheelCommand};

/// Errors reported while decoding a command payload
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Empty payload")]
    Empty,

    #[error("Malformed JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Payload is not a key/value object")]
    NotAnObject,

    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Invalid value for {field}: {value}")]
    InvalidField { field: &'static str, value: String },

    #[error("Unknown state: {0}")]
    UnknownState(String),
}

/// How a vehicle interprets commands. Fixed for the lifetime of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriveMode {
    /// `state` + `speed` commands driving both motors together
    #[default]
    Discrete,
    /// Independent signed `left` / `right` wheel speeds
    DualWheel,
}

/// Result of decoding one payload
#[derive(Debug)]
pub struct Decoded {
    pub command: Command,
    /// Recovered problem, if any. The command is still usable.
    pub error: Option<ParseError>,
}

impl Decoded {
    fn ok(command: Command) -> Self {
        Self {
            command,
            error: None,
        }
    }

    fn with_error(command: Command, error: ParseError) -> Self {
        Self {
            command,
            error: Some(error),
        }
    }

    fn fallback(error: ParseError) -> Self {
        Self::with_error(Command::noop(), error)
    }
}

/// Clamp a requested speed into the PWM duty range
pub fn clamp_speed(value: i64) -> u8 {
    value.clamp(0, limits::MAX_SPEED as i64) as u8
}

/// Clamp a requested wheel speed into [-255, 255], truncating toward zero
pub fn clamp_wheel(value: f64) -> i16 {
    if value.is_nan() {
        return 0;
    }
    let max = limits::MAX_WHEEL_SPEED as f64;
    value.clamp(-max, max).trunc() as i16
}

/// Map a `state` value to its direction and light change
///
/// Matching ignores case and surrounding whitespace. `GO` and `BACK` are the
/// names sent by the browser controller.
pub fn parse_state(text: &str) -> Option<(Direction, LightChange)> {
    let state = match text.trim().to_ascii_uppercase().as_str() {
        "FORWARD" | "GO" => (Direction::Forward, LightChange::Unchanged),
        "BACKWARD" | "BACK" => (Direction::Backward, LightChange::Unchanged),
        "LEFT" => (Direction::Left, LightChange::Unchanged),
        "RIGHT" => (Direction::Right, LightChange::Unchanged),
        "STOP" => (Direction::Stop, LightChange::Unchanged),
        "NONE" => (Direction::None, LightChange::Unchanged),
        "LIGHT_ON" => (Direction::None, LightChange::On),
        "LIGHT_OFF" => (Direction::None, LightChange::Off),
        _ => return None,
    };
    Some(state)
}

/// Check payload syntax without interpreting any field
pub fn check_syntax(payload: &[u8]) -> Result<(), ParseError> {
    parse_fields(payload).map(|_| ())
}

/// Converts raw payloads into commands for one drive mode
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandModel {
    mode: DriveMode,
}

impl CommandModel {
    pub fn new(mode: DriveMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> DriveMode {
        self.mode
    }

    /// Decode a payload. Never fails; see [`Decoded::error`].
    pub fn parse(&self, payload: &[u8]) -> Decoded {
        let fields = match parse_fields(payload) {
            Ok(fields) => fields,
            Err(e) => return Decoded::fallback(e),
        };

        match self.mode {
            DriveMode::Discrete => decode_discrete(&fields),
            DriveMode::DualWheel => decode_wheels(&fields),
        }
    }
}

fn parse_fields(payload: &[u8]) -> Result<Map<String, Value>, ParseError> {
    let start = match payload.iter().position(|b| !b.is_ascii_whitespace()) {
        Some(pos) => pos,
        None => return Err(ParseError::Empty),
    };

    if payload[start] == b'{' || payload[start] == b'[' {
        return match serde_json::from_slice::<Value>(payload)? {
            Value::Object(map) => Ok(map),
            _ => Err(ParseError::NotAnObject),
        };
    }

    let fields: Map<String, Value> = url::form_urlencoded::parse(&payload[start..])
        .filter(|(key, _)| !key.is_empty())
        .map(|(key, value)| (key.into_owned(), Value::String(value.into_owned())))
        .collect();

    if fields.is_empty() {
        return Err(ParseError::NotAnObject);
    }
    Ok(fields)
}

fn decode_discrete(fields: &Map<String, Value>) -> Decoded {
    let mut error = None;

    let mut light = match fields.get("light") {
        Some(value) => match as_bool(value) {
            Some(on) => LightChange::from_bool(on),
            None => {
                error = Some(invalid("light", value));
                LightChange::Unchanged
            }
        },
        None => LightChange::Unchanged,
    };

    let direction = match fields.get("state") {
        Some(Value::String(text)) => match parse_state(text) {
            Some((direction, state_light)) => {
                if state_light != LightChange::Unchanged {
                    light = state_light;
                }
                direction
            }
            None => {
                error = Some(ParseError::UnknownState(text.clone()));
                Direction::None
            }
        },
        Some(other) => {
            error = Some(invalid("state", other));
            Direction::None
        }
        None => {
            if light == LightChange::Unchanged && error.is_none() {
                error = Some(ParseError::MissingField("state"));
            }
            Direction::None
        }
    };

    let speed = match fields.get("speed") {
        Some(value) => match as_number(value) {
            Some(n) => clamp_speed(n as i64),
            None => {
                error = Some(invalid("speed", value));
                limits::MAX_SPEED
            }
        },
        None => limits::MAX_SPEED,
    };

    let command = Command::Motion(MotionCommand::new(direction, light, speed));
    match error {
        Some(e) => Decoded::with_error(command, e),
        None => Decoded::ok(command),
    }
}

fn decode_wheels(fields: &Map<String, Value>) -> Decoded {
    let left = match wheel_field(fields, "left") {
        Ok(value) => value,
        Err(e) => return Decoded::fallback(e),
    };
    let right = match wheel_field(fields, "right") {
        Ok(value) => value,
        Err(e) => return Decoded::fallback(e),
    };

    Decoded::ok(Command::Wheels(WheelCommand::new(left, right)))
}

fn wheel_field(fields: &Map<String, Value>, name: &'static str) -> Result<i16, ParseError> {
    let value = fields.get(name).ok_or(ParseError::MissingField(name))?;
    as_number(value)
        .map(clamp_wheel)
        .ok_or_else(|| invalid(name, value))
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| !n.is_nan()),
        _ => None,
    }
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "on" | "1" => Some(true),
            "false" | "off" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn invalid(field: &'static str, value: &Value) -> ParseError {
    ParseError::InvalidField {
        field,
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn discrete(payload: &str) -> Decoded {
        CommandModel::new(DriveMode::Discrete).parse(payload.as_bytes())
    }

    fn wheels(payload: &str) -> Decoded {
        CommandModel::new(DriveMode::DualWheel).parse(payload.as_bytes())
    }

    fn motion(decoded: &Decoded) -> MotionCommand {
        match decoded.command {
            Command::Motion(m) => m,
            other => panic!("expected motion command, got {:?}", other),
        }
    }

    #[test]
    fn test_every_state_maps_to_its_direction() {
        let table = [
            ("FORWARD", Direction::Forward, LightChange::Unchanged),
            ("BACKWARD", Direction::Backward, LightChange::Unchanged),
            ("LEFT", Direction::Left, LightChange::Unchanged),
            ("RIGHT", Direction::Right, LightChange::Unchanged),
            ("STOP", Direction::Stop, LightChange::Unchanged),
            ("NONE", Direction::None, LightChange::Unchanged),
            ("LIGHT_ON", Direction::None, LightChange::On),
            ("LIGHT_OFF", Direction::None, LightChange::Off),
            ("GO", Direction::Forward, LightChange::Unchanged),
            ("BACK", Direction::Backward, LightChange::Unchanged),
        ];

        for (state, direction, light) in table {
            let decoded = discrete(&format!(r#"{{"state":"{}"}}"#, state));
            assert!(decoded.error.is_none(), "{} reported {:?}", state, decoded.error);
            let cmd = motion(&decoded);
            assert_eq!(cmd.direction, direction, "state {}", state);
            assert_eq!(cmd.light, light, "state {}", state);
            assert_eq!(cmd.speed, 255);
        }
    }

    #[test]
    fn test_wire_names_round_trip_through_parse_state() {
        for direction in Direction::ALL {
            let (parsed, light) = parse_state(direction.wire_name()).unwrap();
            assert_eq!(parsed, direction);
            assert_eq!(light, LightChange::Unchanged);
        }
    }

    #[test]
    fn test_state_matching_ignores_case_and_whitespace() {
        let cmd = motion(&discrete(r#"{"state":"  forward "}"#));
        assert_eq!(cmd.direction, Direction::Forward);
    }

    #[test]
    fn test_unknown_state_is_explicit_noop() {
        let decoded = discrete(r#"{"state":"JUMP"}"#);
        assert!(decoded.command.is_noop());
        assert!(matches!(decoded.error, Some(ParseError::UnknownState(ref s)) if s == "JUMP"));
    }

    #[test]
    fn test_malformed_and_empty_payloads_degrade_to_noop() {
        let payloads = [
            "",
            "   ",
            "{",
            "{\"state\": }",
            "[1, 2, 3]",
            "{\"state\": 12}",
            "{}",
            "&&&",
            "\u{0}\u{1}",
        ];

        for payload in payloads {
            let decoded = discrete(payload);
            assert!(decoded.command.is_noop(), "payload {:?}", payload);
            assert!(decoded.error.is_some(), "payload {:?}", payload);

            let decoded = wheels(payload);
            assert!(decoded.command.is_noop(), "payload {:?}", payload);
            assert!(decoded.error.is_some(), "payload {:?}", payload);
        }
    }

    #[test]
    fn test_invalid_utf8_does_not_panic() {
        let decoded = CommandModel::new(DriveMode::Discrete).parse(&[0xff, 0xfe, b'{']);
        assert!(decoded.command.is_noop());
    }

    #[test]
    fn test_speed_defaults_and_clamps() {
        assert_eq!(motion(&discrete(r#"{"state":"LEFT"}"#)).speed, 255);
        assert_eq!(motion(&discrete(r#"{"state":"LEFT","speed":120}"#)).speed, 120);
        assert_eq!(motion(&discrete(r#"{"state":"LEFT","speed":999}"#)).speed, 255);
        assert_eq!(motion(&discrete(r#"{"state":"LEFT","speed":-5}"#)).speed, 0);
        assert_eq!(motion(&discrete(r#"{"state":"LEFT","speed":99.9}"#)).speed, 99);
    }

    #[test]
    fn test_non_numeric_speed_keeps_direction() {
        let decoded = discrete(r#"{"state":"RIGHT","speed":"fast"}"#);
        let cmd = motion(&decoded);
        assert_eq!(cmd.direction, Direction::Right);
        assert_eq!(cmd.speed, 255);
        assert!(matches!(
            decoded.error,
            Some(ParseError::InvalidField { field: "speed", .. })
        ));
    }

    #[test]
    fn test_clamp_speed_properties() {
        for s in -1000i64..=1000 {
            let clamped = clamp_speed(s);
            if (0..=255).contains(&s) {
                assert_eq!(clamped as i64, s);
            }
        }
        assert_eq!(clamp_speed(i64::MIN), 0);
        assert_eq!(clamp_speed(i64::MAX), 255);
    }

    #[test]
    fn test_clamp_wheel() {
        assert_eq!(clamp_wheel(300.0), 255);
        assert_eq!(clamp_wheel(-300.0), -255);
        assert_eq!(clamp_wheel(-50.9), -50);
        assert_eq!(clamp_wheel(f64::NAN), 0);
        assert_eq!(clamp_wheel(f64::INFINITY), 255);
    }

    #[test]
    fn test_extra_fields_ignored() {
        let decoded = discrete(r#"{"state":"STOP","gameMode":"classic","x":[1]}"#);
        assert!(decoded.error.is_none());
        assert_eq!(motion(&decoded).direction, Direction::Stop);
    }

    #[test]
    fn test_light_field() {
        let cmd = motion(&discrete(r#"{"state":"FORWARD","light":true}"#));
        assert_eq!(cmd.direction, Direction::Forward);
        assert_eq!(cmd.light, LightChange::On);

        // A LIGHT_* state wins over the light field
        let cmd = motion(&discrete(r#"{"state":"LIGHT_OFF","light":true}"#));
        assert_eq!(cmd.light, LightChange::Off);

        let decoded = discrete(r#"{"light":false}"#);
        assert!(decoded.error.is_none());
        assert_eq!(motion(&decoded).light, LightChange::Off);
    }

    #[test]
    fn test_form_payload() {
        let cmd = motion(&discrete("state=BACKWARD&speed=80"));
        assert_eq!(cmd.direction, Direction::Backward);
        assert_eq!(cmd.speed, 80);

        let decoded = wheels("left=-12.5&right=40");
        assert_eq!(decoded.command, Command::Wheels(WheelCommand::new(-12, 40)));
    }

    #[test]
    fn test_dual_wheel_clamps_each_side() {
        let decoded = wheels(r#"{"left": 300, "right": -50}"#);
        assert!(decoded.error.is_none());
        assert_eq!(decoded.command, Command::Wheels(WheelCommand::new(255, -50)));
    }

    #[test]
    fn test_dual_wheel_missing_side_is_noop() {
        let decoded = wheels(r#"{"left": 100}"#);
        assert!(decoded.command.is_noop());
        assert!(matches!(decoded.error, Some(ParseError::MissingField("right"))));

        let decoded = wheels(r#"{"left": "abc", "right": 1}"#);
        assert!(decoded.command.is_noop());
        assert!(matches!(
            decoded.error,
            Some(ParseError::InvalidField { field: "left", .. })
        ));
    }

    #[test]
    fn test_dual_wheel_ignores_state_field() {
        let decoded = wheels(r#"{"state":"FORWARD"}"#);
        assert!(decoded.command.is_noop());
    }

    #[test]
    fn test_check_syntax() {
        assert!(check_syntax(br#"{"state":"STOP"}"#).is_ok());
        assert!(check_syntax(b"state=STOP").is_ok());
        assert!(matches!(check_syntax(b"{oops"), Err(ParseError::Malformed(_))));
        assert!(matches!(check_syntax(b""), Err(ParseError::Empty)));
        assert!(matches!(check_syntax(b"[true]"), Err(ParseError::NotAnObject)));
    }
}
