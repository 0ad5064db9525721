//! Persistence seam for the engine.
//!
//! Every mutating method is a single atomic step scoped to one student.
//! Records carry a `version`; CAS writes take the record as read (with its
//! old version) and succeed only if the stored version still matches,
//! writing `version + 1`. Backends must never serialize writes across
//! different students.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::Outcome;
use crate::models::audit::AuditEntry;
use crate::models::pass::{GatePass, Stage};
use crate::models::student::{Student, StudentProfile};
use crate::models::token::QrToken;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    /// A unique directory field is already held by another record.
    #[error("Duplicate {0}")]
    Duplicate(String),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result of an atomic token issuance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueOutcome {
    /// Token stored; `superseded` older unscanned tokens were retired.
    Issued { superseded: usize },
    /// The student record moved past the version the caller validated against.
    StudentChanged,
    /// A live token of this student has been scanned and awaits a guard.
    UnderReview,
    UnknownStudent,
}

/// Everything a guard decision writes, applied as one commit.
#[derive(Debug, Clone)]
pub struct DecisionCommit {
    pub token_id: Uuid,
    pub student_id: Uuid,
    pub outcome: Outcome,
    pub decided_at: DateTime<Utc>,
    /// New student state on approve; `version` is the version it was derived from.
    pub student: Option<Student>,
    /// Pass to mark utilized: `(pass id, version read)`.
    pub utilize_pass: Option<(Uuid, i64)>,
    pub audit: AuditEntry,
}

/// Result of a decision commit. Nothing is written unless `Committed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    TokenMissing,
    TokenConsumed,
    /// No guard has scanned the token yet.
    TokenNotScanned,
    StudentChanged,
    PassChanged,
}

/// Storage backend for students, passes, tokens and the gate activity log.
#[async_trait]
pub trait GateStore: Send + Sync {
    /// Insert a student, or refresh the directory fields of an existing one.
    ///
    /// Re-enrolling with unchanged fields leaves `version` untouched. A roll
    /// number held by a different student is refused with `Duplicate`.
    async fn enroll_student(&self, profile: StudentProfile) -> StoreResult<Student>;

    async fn get_student(&self, id: Uuid) -> StoreResult<Option<Student>>;

    /// CAS write of the student's mutable state.
    async fn update_student(&self, student: &Student) -> StoreResult<bool>;

    /// Insert a new application unless the owner already has an open one at `now`.
    async fn insert_pass(&self, pass: &GatePass, now: DateTime<Utc>) -> StoreResult<bool>;

    async fn get_pass(&self, id: Uuid) -> StoreResult<Option<GatePass>>;

    /// CAS write of an application.
    async fn update_pass(&self, pass: &GatePass) -> StoreResult<bool>;

    /// All applications of a student, newest first.
    async fn passes_for_student(&self, student_id: Uuid) -> StoreResult<Vec<GatePass>>;

    /// Applications waiting on `stage`, oldest first.
    async fn pending_passes(&self, stage: Stage) -> StoreResult<Vec<GatePass>>;

    /// Atomically retire the student's other live tokens and store `token`,
    /// provided the student is still at `student_version`.
    ///
    /// A scanned token for the same direction blocks issuance; scanned tokens
    /// for the other direction can no longer be approved and are retired.
    async fn issue_token(
        &self,
        token: &QrToken,
        student_version: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<IssueOutcome>;

    async fn token_by_hash(&self, secret_hash: &str) -> StoreResult<Option<QrToken>>;

    /// Record a guard scan. Returns `false` if the token is already consumed.
    async fn mark_redeemed(&self, token_id: Uuid, at: DateTime<Utc>) -> StoreResult<bool>;

    /// Retire the student's live tokens, except a scanned one matching their
    /// next action.
    async fn supersede_live_tokens(
        &self,
        student_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<usize>;

    /// Unconsumed, unexpired tokens of a student.
    async fn live_tokens(&self, student_id: Uuid, now: DateTime<Utc>)
    -> StoreResult<Vec<QrToken>>;

    /// Consume a scanned token and apply the decision's writes, all or nothing.
    async fn commit_decision(&self, commit: DecisionCommit) -> StoreResult<CommitOutcome>;

    /// Gate activity of a student, most recent first.
    async fn audit_for_student(
        &self,
        student_id: Uuid,
        limit: usize,
    ) -> StoreResult<Vec<AuditEntry>>;
}
