//! Operator console: turns typed lines into vehicle commands

use anyhow::{anyhow, bail, Result};
use rover_shared::{ControlMessage, Direction};

pub const HELP: &str = "\
commands:
  forward|backward|left|right|stop|none [speed 0-255]
  light on|off
  wheels <left> <right>        (-255..255 each, dual-wheel vehicles)
  status                       list connected vehicles
  help";

/// One parsed console line
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleInput {
    Send(ControlMessage),
    Status,
    Help,
    Empty,
}

fn direction(word: &str) -> Option<Direction> {
    match word {
        "forward" | "f" | "go" => Some(Direction::Forward),
        "backward" | "b" | "back" => Some(Direction::Backward),
        "left" | "l" => Some(Direction::Left),
        "right" | "r" => Some(Direction::Right),
        "stop" | "s" => Some(Direction::Stop),
        "none" => Some(Direction::None),
        _ => None,
    }
}

fn number(word: Option<&str>, what: &str) -> Result<f32> {
    let word = word.ok_or_else(|| anyhow!("missing {}", what))?;
    word.parse()
        .map_err(|_| anyhow!("invalid {}: {:?}", what, word))
}

pub fn parse_console_line(line: &str) -> Result<ConsoleInput> {
    let lower = line.trim().to_ascii_lowercase();
    let mut words = lower.split_whitespace();

    let first = match words.next() {
        Some(word) => word,
        None => return Ok(ConsoleInput::Empty),
    };

    let input = match first {
        "status" => ConsoleInput::Status,
        "help" | "?" => ConsoleInput::Help,
        "light" => match words.next() {
            Some("on") => ConsoleInput::Send(ControlMessage::light(true)),
            Some("off") => ConsoleInput::Send(ControlMessage::light(false)),
            other => bail!("expected `light on` or `light off`, got {:?}", other),
        },
        "wheels" => {
            let left = number(words.next(), "left speed")?;
            let right = number(words.next(), "right speed")?;
            ConsoleInput::Send(ControlMessage::wheels(left, right))
        }
        word => {
            let dir = direction(word).ok_or_else(|| anyhow!("unknown command {:?}", word))?;
            let speed = match words.next() {
                Some(text) => {
                    let value: u16 = text
                        .parse()
                        .map_err(|_| anyhow!("invalid speed: {:?}", text))?;
                    if value > u8::MAX as u16 {
                        bail!("speed must be 0-255, got {}", value);
                    }
                    Some(value as u8)
                }
                None => None,
            };
            ConsoleInput::Send(ControlMessage::direction(dir, speed))
        }
    };

    if let Some(extra) = words.next() {
        bail!("unexpected argument {:?}", extra);
    }
    Ok(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn json(line: &str) -> String {
        match parse_console_line(line).unwrap() {
            ConsoleInput::Send(msg) => msg.to_json().unwrap(),
            other => panic!("not a command: {:?}", other),
        }
    }

    #[test]
    fn test_directions() {
        assert_eq!(json("forward"), r#"{"state":"FORWARD"}"#);
        assert_eq!(json("  GO 120 "), r#"{"state":"FORWARD","speed":120}"#);
        assert_eq!(json("back"), r#"{"state":"BACKWARD"}"#);
        assert_eq!(json("l 0"), r#"{"state":"LEFT","speed":0}"#);
        assert_eq!(json("right 255"), r#"{"state":"RIGHT","speed":255}"#);
        assert_eq!(json("stop"), r#"{"state":"STOP"}"#);
        assert_eq!(json("none"), r#"{"state":"NONE"}"#);
    }

    #[test]
    fn test_light_and_wheels() {
        assert_eq!(json("light on"), r#"{"state":"LIGHT_ON"}"#);
        assert_eq!(json("Light OFF"), r#"{"state":"LIGHT_OFF"}"#);
        assert_eq!(json("wheels 100 -80.5"), r#"{"left":100.0,"right":-80.5}"#);
    }

    #[test]
    fn test_meta_commands() {
        assert_eq!(parse_console_line("").unwrap(), ConsoleInput::Empty);
        assert_eq!(parse_console_line("   ").unwrap(), ConsoleInput::Empty);
        assert_eq!(parse_console_line("status").unwrap(), ConsoleInput::Status);
        assert_eq!(parse_console_line("?").unwrap(), ConsoleInput::Help);
    }

    #[test]
    fn test_rejects_bad_lines() {
        for line in [
            "jump",
            "forward fast",
            "forward 256",
            "forward 10 20",
            "light dim",
            "light",
            "wheels 10",
            "wheels a b",
            "status now",
        ] {
            assert!(parse_console_line(line).is_err(), "{}", line);
        }
    }
}
