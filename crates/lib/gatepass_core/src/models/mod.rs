//! Domain models.
//!
//! These are internal domain models, distinct from the request/response
//! shapes of the HTTP layer.

pub mod audit;
pub mod pass;
pub mod student;
pub mod token;

use serde::{Deserialize, Serialize};

/// Direction of travel through the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Exit,
    Entry,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Exit => "exit",
            Direction::Entry => "entry",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "exit" => Some(Direction::Exit),
            "entry" => Some(Direction::Entry),
            _ => None,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Binary decision made by a reviewer or a guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Approve,
    Reject,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Approve => "approve",
            Outcome::Reject => "reject",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "approve" => Some(Outcome::Approve),
            "reject" => Some(Outcome::Reject),
            _ => None,
        }
    }
}
