//! QR token records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Direction;
use super::Outcome;
use super::student::NormalExit;

/// Why a token stopped being live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsumedReason {
    Approved,
    Rejected,
    /// Replaced by a newer token for the same student.
    Superseded,
}

impl ConsumedReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsumedReason::Approved => "approved",
            ConsumedReason::Rejected => "rejected",
            ConsumedReason::Superseded => "superseded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "approved" => Some(ConsumedReason::Approved),
            "rejected" => Some(ConsumedReason::Rejected),
            "superseded" => Some(ConsumedReason::Superseded),
            _ => None,
        }
    }
}

impl From<Outcome> for ConsumedReason {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Approve => ConsumedReason::Approved,
            Outcome::Reject => ConsumedReason::Rejected,
        }
    }
}

/// Single-use gate credential.
///
/// Only the SHA-256 hash of the scanned secret is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QrToken {
    pub id: Uuid,
    pub secret_hash: String,
    pub student_id: Uuid,
    pub direction: Direction,
    pub gate_pass_ref: Option<Uuid>,
    /// Declared place and purpose for an exit with no gate-pass.
    pub normal_exit: Option<NormalExit>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Set when a guard scans the token.
    pub redeemed_at: Option<DateTime<Utc>>,
    pub consumed_at: Option<DateTime<Utc>>,
    pub consumed_reason: Option<ConsumedReason>,
}

impl QrToken {
    pub fn is_consumed(&self) -> bool {
        self.consumed_at.is_some()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Unconsumed and unexpired.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        !self.is_consumed() && !self.is_expired(now)
    }

    /// Live and already scanned by a guard, awaiting a decision.
    pub fn is_under_review(&self, now: DateTime<Utc>) -> bool {
        self.is_live(now) && self.redeemed_at.is_some()
    }

    pub(crate) fn consume(&mut self, at: DateTime<Utc>, reason: ConsumedReason) {
        self.consumed_at = Some(at);
        self.consumed_reason = Some(reason);
    }
}
