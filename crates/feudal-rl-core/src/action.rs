//! Actions: primitive moves and discovered exit macro-actions

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::{FeudalError, StateId};

/// The four primitive grid moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Decreasing y
    North,
    /// Increasing x
    East,
    /// Increasing y
    South,
    /// Decreasing x
    West,
}

impl Direction {
    /// All primitive directions, in wire order.
    pub const ALL: [Direction; 4] = [
        Direction::North,
        Direction::East,
        Direction::South,
        Direction::West,
    ];

    /// Wire encoding of the direction
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::North => "N",
            Direction::East => "E",
            Direction::South => "S",
            Direction::West => "W",
        }
    }

    /// The direction 90 degrees clockwise
    #[must_use]
    pub fn turn_right(self) -> Self {
        match self {
            Direction::North => Direction::East,
            Direction::East => Direction::South,
            Direction::South => Direction::West,
            Direction::West => Direction::North,
        }
    }

    /// The direction 90 degrees counter-clockwise
    #[must_use]
    pub fn turn_left(self) -> Self {
        match self {
            Direction::North => Direction::West,
            Direction::East => Direction::North,
            Direction::South => Direction::East,
            Direction::West => Direction::South,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = FeudalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "N" => Ok(Direction::North),
            "E" => Ok(Direction::East),
            "S" => Ok(Direction::South),
            "W" => Ok(Direction::West),
            other => Err(FeudalError::Parse(format!("unknown direction: {other}"))),
        }
    }
}

/// An action recordable in the transition model.
///
/// The lowest level applies primitive moves to the environment; levels above
/// it command a lower agent to leave its partition towards a named external
/// state. Exit actions are discovered at runtime, never declared up front.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Action {
    /// Primitive environment move
    Primitive(Direction),
    /// Delegate "leave your partition towards `state`" to a lower agent
    ExitTo(StateId),
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Primitive(direction) => f.write_str(direction.as_str()),
            Action::ExitTo(state) => write!(f, "ExitTo{state}"),
        }
    }
}

impl FromStr for Action {
    type Err = FeudalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(target) = s.strip_prefix("ExitTo") {
            if target.is_empty() {
                return Err(FeudalError::Parse("ExitTo action without a target".into()));
            }
            return Ok(Action::ExitTo(StateId::from(target)));
        }
        Ok(Action::Primitive(Direction::from_str(s)?))
    }
}

impl Serialize for Action {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Action {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = String::deserialize(deserializer)?;
        wire.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directions_round_trip() {
        for direction in Direction::ALL {
            let parsed: Direction = direction.as_str().parse().unwrap();
            assert_eq!(parsed, direction);
        }
    }

    #[test]
    fn turns_compose_to_identity() {
        for direction in Direction::ALL {
            assert_eq!(direction.turn_right().turn_left(), direction);
            assert_eq!(
                direction.turn_right().turn_right(),
                direction.turn_left().turn_left()
            );
        }
    }

    #[test]
    fn actions_use_the_wire_encoding() {
        let exit = Action::ExitTo(StateId::from("A2"));
        assert_eq!(serde_json::to_string(&exit).unwrap(), "\"ExitToA2\"");
        let back: Action = serde_json::from_str("\"ExitToA2\"").unwrap();
        assert_eq!(back, exit);

        let north: Action = serde_json::from_str("\"N\"").unwrap();
        assert_eq!(north, Action::Primitive(Direction::North));
    }

    #[test]
    fn malformed_actions_are_rejected() {
        assert!("ExitTo".parse::<Action>().is_err());
        assert!("NorthEast".parse::<Action>().is_err());
    }
}
