//! Student record and presence state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Direction;

/// Coarse location of a student.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    Inside,
    Outside,
}

impl Presence {
    /// The only direction a student in this presence may take next.
    pub fn next_action(&self) -> Direction {
        match self {
            Presence::Inside => Direction::Exit,
            Presence::Outside => Direction::Entry,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Presence::Inside => "inside",
            Presence::Outside => "outside",
        }
    }
}

/// Place and purpose declared for an exit that is not backed by a gate-pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalExit {
    pub place: String,
    pub purpose: String,
}

/// What backs a student's current time outside campus.
///
/// The two shapes are mutually exclusive: a student is outside either under a
/// gate-pass or on a normal exit, never both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Excursion {
    #[serde(rename_all = "camelCase")]
    Normal {
        place: String,
        purpose: String,
        out_time: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    GatePass {
        gate_pass_id: Uuid,
        out_time: DateTime<Utc>,
    },
}

impl Excursion {
    pub fn out_time(&self) -> DateTime<Utc> {
        match self {
            Excursion::Normal { out_time, .. } | Excursion::GatePass { out_time, .. } => *out_time,
        }
    }

    pub fn gate_pass_id(&self) -> Option<Uuid> {
        match self {
            Excursion::GatePass { gate_pass_id, .. } => Some(*gate_pass_id),
            Excursion::Normal { .. } => None,
        }
    }
}

/// Where a student currently is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "presence", rename_all = "lowercase")]
pub enum Whereabouts {
    Inside,
    Outside(Excursion),
}

impl Whereabouts {
    pub fn presence(&self) -> Presence {
        match self {
            Whereabouts::Inside => Presence::Inside,
            Whereabouts::Outside(_) => Presence::Outside,
        }
    }

    pub fn excursion(&self) -> Option<&Excursion> {
        match self {
            Whereabouts::Inside => None,
            Whereabouts::Outside(e) => Some(e),
        }
    }

    pub fn active_gate_pass(&self) -> Option<Uuid> {
        self.excursion().and_then(Excursion::gate_pass_id)
    }
}

/// Active ban on a student.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ban {
    pub reason: String,
    pub banned_at: DateTime<Utc>,
}

/// Directory fields supplied when enrolling a student.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentProfile {
    pub id: Uuid,
    pub name: String,
    pub roll_number: String,
    pub email: String,
    pub photo_ref: Option<String>,
}

/// Student record of the system.
///
/// `version` increases by one on every committed write and guards
/// compare-and-set updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: Uuid,
    pub name: String,
    pub roll_number: String,
    pub email: String,
    pub photo_ref: Option<String>,
    pub ban: Option<Ban>,
    pub whereabouts: Whereabouts,
    pub version: i64,
}

impl Student {
    /// A freshly enrolled student: inside, unbanned.
    pub fn enrolled(profile: StudentProfile) -> Self {
        Self {
            id: profile.id,
            name: profile.name,
            roll_number: profile.roll_number,
            email: profile.email,
            photo_ref: profile.photo_ref,
            ban: None,
            whereabouts: Whereabouts::Inside,
            version: 0,
        }
    }

    pub fn is_banned(&self) -> bool {
        self.ban.is_some()
    }

    pub fn presence(&self) -> Presence {
        self.whereabouts.presence()
    }

    pub fn next_action(&self) -> Direction {
        self.presence().next_action()
    }
}
