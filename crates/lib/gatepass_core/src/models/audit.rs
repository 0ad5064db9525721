//! Gate activity log entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Direction, Outcome};

/// One committed guard decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: Uuid,
    pub token_id: Uuid,
    pub student_id: Uuid,
    pub guard_id: String,
    pub direction: Direction,
    pub outcome: Outcome,
    pub gate_pass_ref: Option<Uuid>,
    pub decided_at: DateTime<Utc>,
}
