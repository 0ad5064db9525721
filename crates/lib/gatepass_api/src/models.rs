//! Request and response bodies of the HTTP API.
//!
//! Engine types that already serialize in the wire shape (`StatusView`,
//! `IssuedToken`, `TokenContext`, `Receipt`, `AuditEntry`) are returned as-is.

use chrono::{DateTime, Utc};
use gatepass_core::models::Outcome;
use gatepass_core::models::pass::{GatePass, PassKind, PassSummary, Stage};
use gatepass_core::models::student::Student;
use gatepass_core::presence::StatusView;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Error body of every non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// An application with its computed status fields.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PassView {
    #[serde(flatten)]
    pub summary: PassSummary,
    pub student_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub details: PassKind,
}

impl PassView {
    pub fn new(pass: GatePass, now: DateTime<Utc>) -> Self {
        Self {
            summary: pass.summary(now),
            student_id: pass.student_id,
            created_at: pass.created_at,
            details: pass.kind,
        }
    }
}

/// `POST /passes/{id}/decision` body. `stage` is ignored for local passes.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageDecisionRequest {
    pub stage: Option<Stage>,
    pub outcome: Outcome,
}

/// `POST /gate/redeem` body: whatever the scanner read.
#[derive(Debug, Clone, Deserialize)]
pub struct ScanRequest {
    pub token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GateDecisionRequest {
    pub token: String,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelTokenResponse {
    pub cancelled: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityQuery {
    pub limit: Option<usize>,
}

/// `POST /admin/students` body. A missing `id` gets a fresh one.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollRequest {
    pub id: Option<Uuid>,
    pub name: String,
    pub roll_number: String,
    pub email: String,
    pub photo_ref: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BanRequest {
    pub reason: String,
}

/// Directory record plus current status.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentView {
    pub id: Uuid,
    pub name: String,
    pub roll_number: String,
    pub email: String,
    pub photo_ref: Option<String>,
    pub ban_reason: Option<String>,
    pub banned_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub status: StatusView,
}

impl From<Student> for StudentView {
    fn from(student: Student) -> Self {
        let status = StatusView::from(&student);
        let (ban_reason, banned_at) = match student.ban {
            Some(ban) => (Some(ban.reason), Some(ban.banned_at)),
            None => (None, None),
        };
        Self {
            id: student.id,
            name: student.name,
            roll_number: student.roll_number,
            email: student.email,
            photo_ref: student.photo_ref,
            ban_reason,
            banned_at,
            status,
        }
    }
}
