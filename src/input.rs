//! Controller input in numpad notation.
//!
//! ```text
//! 7 8 9      up-back   up   up-forward
//! 4 5 6      back    neutral  forward
//! 1 2 3      down-back down down-forward
//! ```
//!
//! Buttons are the letters `A`..`H`, one bit each. `"236A"` is a
//! quarter-circle forward into A; `"2B"` is down + B on one frame.

use core::fmt;

use serde::{Deserialize, Serialize};

const BUTTON_LETTERS: [char; 8] = ['A', 'B', 'C', 'D', 'E', 'F', 'G', 'H'];

/// One frame of controller state: a stick direction plus pressed buttons.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InputCommand {
    direction: u8,
    buttons: u8,
}

impl InputCommand {
    /// Stick at rest, no buttons.
    pub const NEUTRAL: InputCommand = InputCommand { direction: 5, buttons: 0 };

    /// `None` unless `direction` is in 1..=9.
    pub fn new(direction: u8, buttons: u8) -> Option<Self> {
        (1..=9).contains(&direction).then_some(Self { direction, buttons })
    }

    /// Numpad direction, 1..=9.
    pub fn direction(self) -> u8 {
        self.direction
    }

    /// Button bitmask, bit 0 = A.
    pub fn buttons(self) -> u8 {
        self.buttons
    }

    /// True when any button is held.
    pub fn has_buttons(self) -> bool {
        self.buttons != 0
    }

    /// Same direction and at least the buttons of `step`.
    pub fn satisfies(self, step: InputCommand) -> bool {
        self.direction == step.direction && self.buttons & step.buttons == step.buttons
    }

    /// Parse a single-frame token such as `"5"`, `"2B"` or `"6AC"`.
    ///
    /// A token with only letters is read as neutral plus buttons.
    pub fn parse(token: &str) -> Option<Self> {
        let mut chars = token.trim().chars().peekable();
        let direction = match chars.peek().copied() {
            Some(c) if c.is_ascii_digit() => {
                chars.next();
                c.to_digit(10)? as u8
            }
            Some(_) => 5,
            None => return None,
        };
        let mut buttons = 0u8;
        for c in chars {
            buttons |= button_bit(c)?;
        }
        Self::new(direction, buttons)
    }

    /// Parse a motion string such as `"236A"` or `"2B 6C"` into one command
    /// per step. Buttons attach to the direction they follow.
    pub fn parse_sequence(notation: &str) -> Option<Vec<Self>> {
        let mut out: Vec<Self> = Vec::new();
        for token in notation.split_whitespace() {
            let start = out.len();
            for c in token.chars() {
                if let Some(d) = c.to_digit(10) {
                    out.push(Self::new(d as u8, 0)?);
                } else {
                    let bit = button_bit(c)?;
                    if out.len() == start {
                        out.push(Self::NEUTRAL);
                    }
                    if let Some(last) = out.last_mut() {
                        last.buttons |= bit;
                    }
                }
            }
        }
        (!out.is_empty()).then_some(out)
    }
}

fn button_bit(c: char) -> Option<u8> {
    BUTTON_LETTERS
        .iter()
        .position(|&b| b == c.to_ascii_uppercase())
        .map(|i| 1u8 << i)
}

impl Default for InputCommand {
    fn default() -> Self {
        Self::NEUTRAL
    }
}

impl fmt::Display for InputCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.direction)?;
        for (i, letter) in BUTTON_LETTERS.iter().enumerate() {
            if self.buttons & (1 << i) != 0 {
                write!(f, "{letter}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for InputCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InputCommand({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_token() {
        let c = InputCommand::parse("2B").unwrap();
        assert_eq!(c.direction(), 2);
        assert_eq!(c.buttons(), 0b10);
        assert_eq!(InputCommand::parse("5"), Some(InputCommand::NEUTRAL));
        assert_eq!(InputCommand::parse("a").map(|c| c.to_string()), Some("5A".into()));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(InputCommand::parse("").is_none());
        assert!(InputCommand::parse("0A").is_none());
        assert!(InputCommand::parse("6Z").is_none());
    }

    #[test]
    fn test_parse_sequence_attaches_buttons() {
        let seq = InputCommand::parse_sequence("236A").unwrap();
        let text: Vec<String> = seq.iter().map(|c| c.to_string()).collect();
        assert_eq!(text, vec!["2", "3", "6A"]);

        let seq = InputCommand::parse_sequence("2B 6C").unwrap();
        let text: Vec<String> = seq.iter().map(|c| c.to_string()).collect();
        assert_eq!(text, vec!["2B", "6C"]);
    }

    #[test]
    fn test_satisfies_allows_extra_buttons() {
        let step = InputCommand::parse("6A").unwrap();
        assert!(InputCommand::parse("6AB").unwrap().satisfies(step));
        assert!(!InputCommand::parse("6B").unwrap().satisfies(step));
        assert!(!InputCommand::parse("3A").unwrap().satisfies(step));
    }

    #[test]
    fn test_display_round_trips_through_parse() {
        let c = InputCommand::new(3, 0b101).unwrap();
        assert_eq!(c.to_string(), "3AC");
        assert_eq!(InputCommand::parse(&c.to_string()), Some(c));
    }
}
