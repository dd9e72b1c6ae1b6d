//! minitouch line protocol
//!
//! ```text
//! d <slot> <x> <y> <pressure>
//! m <slot> <x> <y> <pressure>
//! u <slot>
//! c
//! ```

use serde::Deserialize;
use std::fmt;

pub const DEFAULT_PRESSURE: u32 = 50;

fn default_pressure() -> u32 {
    DEFAULT_PRESSURE
}

/// One minitouch command
///
/// Deserialises from `{"type": "down", "x": 100, "y": 200}`; `slot` defaults
/// to 0 and `pressure` to 50.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TouchCommand {
    Down {
        #[serde(default)]
        slot: u8,
        x: f64,
        y: f64,
        #[serde(default = "default_pressure")]
        pressure: u32,
    },
    Move {
        #[serde(default)]
        slot: u8,
        x: f64,
        y: f64,
        #[serde(default = "default_pressure")]
        pressure: u32,
    },
    Up {
        #[serde(default)]
        slot: u8,
    },
    Commit,
}

impl TouchCommand {
    pub fn down(x: f64, y: f64) -> Self {
        TouchCommand::Down {
            slot: 0,
            x,
            y,
            pressure: DEFAULT_PRESSURE,
        }
    }

    pub fn move_to(x: f64, y: f64) -> Self {
        TouchCommand::Move {
            slot: 0,
            x,
            y,
            pressure: DEFAULT_PRESSURE,
        }
    }

    pub fn up() -> Self {
        TouchCommand::Up { slot: 0 }
    }

    pub fn with_slot(self, slot: u8) -> Self {
        match self {
            TouchCommand::Down { x, y, pressure, .. } => TouchCommand::Down { slot, x, y, pressure },
            TouchCommand::Move { x, y, pressure, .. } => TouchCommand::Move { slot, x, y, pressure },
            TouchCommand::Up { .. } => TouchCommand::Up { slot },
            TouchCommand::Commit => TouchCommand::Commit,
        }
    }

    /// Apply `f` to the coordinates of `Down`/`Move`
    pub fn map_xy(self, f: impl FnOnce(f64, f64) -> (f64, f64)) -> Self {
        match self {
            TouchCommand::Down { slot, x, y, pressure } => {
                let (x, y) = f(x, y);
                TouchCommand::Down { slot, x, y, pressure }
            }
            TouchCommand::Move { slot, x, y, pressure } => {
                let (x, y) = f(x, y);
                TouchCommand::Move { slot, x, y, pressure }
            }
            other => other,
        }
    }
}

impl fmt::Display for TouchCommand {
    /// Single protocol line, newline included; coordinates truncate to integers
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            TouchCommand::Down { slot, x, y, pressure } => {
                writeln!(f, "d {} {} {} {}", slot, x as i64, y as i64, pressure)
            }
            TouchCommand::Move { slot, x, y, pressure } => {
                writeln!(f, "m {} {} {} {}", slot, x as i64, y as i64, pressure)
            }
            TouchCommand::Up { slot } => writeln!(f, "u {}", slot),
            TouchCommand::Commit => writeln!(f, "c"),
        }
    }
}

/// Encode commands as one contact frame closed by a single commit
pub fn encode_batch(commands: &[TouchCommand]) -> String {
    let mut out: String = commands
        .iter()
        .filter(|c| !matches!(c, TouchCommand::Commit))
        .map(|c| c.to_string())
        .collect();
    out.push_str("c\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_lines() {
        assert_eq!(TouchCommand::down(10.7, 20.2).to_string(), "d 0 10 20 50\n");
        assert_eq!(TouchCommand::move_to(30.0, 40.0).with_slot(1).to_string(), "m 1 30 40 50\n");
        assert_eq!(TouchCommand::up().to_string(), "u 0\n");
        assert_eq!(TouchCommand::Commit.to_string(), "c\n");
    }

    #[test]
    fn test_encode_batch_single_commit() {
        let batch = encode_batch(&[
            TouchCommand::down(0.0, 100.0),
            TouchCommand::down(100.0, 0.0).with_slot(1),
        ]);
        assert_eq!(batch, "d 0 0 100 50\nd 1 100 0 50\nc\n");
        assert_eq!(encode_batch(&[TouchCommand::Commit]), "c\n");
    }

    #[test]
    fn test_deserialize_event_dicts() {
        let down: TouchCommand =
            serde_json::from_str(r#"{"type":"down","x":100,"y":200}"#).unwrap();
        assert_eq!(down, TouchCommand::down(100.0, 200.0));

        let up: TouchCommand = serde_json::from_str(r#"{"type":"up"}"#).unwrap();
        assert_eq!(up, TouchCommand::up());

        let mv: TouchCommand =
            serde_json::from_str(r#"{"type":"move","x":1.5,"y":2,"slot":2,"pressure":10}"#)
                .unwrap();
        assert_eq!(
            mv,
            TouchCommand::Move { slot: 2, x: 1.5, y: 2.0, pressure: 10 }
        );

        assert!(serde_json::from_str::<TouchCommand>(r#"{"type":"pinch"}"#).is_err());
        assert!(serde_json::from_str::<TouchCommand>(r#"{"type":"down","x":1}"#).is_err());
    }

    #[test]
    fn test_map_xy_leaves_up_alone() {
        let scaled = TouchCommand::down(10.0, 10.0).map_xy(|x, y| (x * 2.0, y * 3.0));
        assert_eq!(scaled, TouchCommand::down(20.0, 30.0));
        assert_eq!(TouchCommand::up().map_xy(|_, _| (1.0, 1.0)), TouchCommand::up());
    }
}
