//! PostgreSQL backend.
//!
//! Per-student atomicity comes from a row lock on the student
//! (`SELECT ... FOR UPDATE`) inside a transaction, plus `version`-guarded
//! `UPDATE`s. No statement locks more than one student row.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{CommitOutcome, DecisionCommit, GateStore, IssueOutcome, StoreError, StoreResult};
use crate::models::audit::AuditEntry;
use crate::models::pass::{GatePass, PassKind, Stage};
use crate::models::student::{Ban, Excursion, NormalExit, Student, StudentProfile, Whereabouts};
use crate::models::token::{ConsumedReason, QrToken};
use crate::models::{Direction, Outcome};

const STUDENT_COLUMNS: &str = "id, name, roll_number, email, photo_ref, ban_reason, banned_at, \
     presence, active_gate_pass, out_place, out_purpose, out_time, version";

const PASS_COLUMNS: &str = "id, student_id, planned_out, planned_in, utilized, details, \
     created_at, version";

const TOKEN_COLUMNS: &str = "id, secret_hash, student_id, direction, gate_pass_ref, exit_place, \
     exit_purpose, issued_at, expires_at, redeemed_at, consumed_at, consumed_reason";

/// Retire live tokens of `$1` at `$2` that are unscanned, or scanned for a
/// direction other than `$3`.
const SUPERSEDE_SQL: &str = "UPDATE qr_tokens SET consumed_at = $2, consumed_reason = 'superseded' \
     WHERE student_id = $1 AND consumed_at IS NULL AND expires_at >= $2 \
       AND (redeemed_at IS NULL OR direction <> $3)";

/// Row returned by student queries.
#[derive(Debug, Clone, sqlx::FromRow)]
struct StudentRow {
    id: Uuid,
    name: String,
    roll_number: String,
    email: String,
    photo_ref: Option<String>,
    ban_reason: Option<String>,
    banned_at: Option<DateTime<Utc>>,
    presence: String,
    active_gate_pass: Option<Uuid>,
    out_place: Option<String>,
    out_purpose: Option<String>,
    out_time: Option<DateTime<Utc>>,
    version: i64,
}

impl TryFrom<StudentRow> for Student {
    type Error = StoreError;

    fn try_from(row: StudentRow) -> Result<Self, Self::Error> {
        let ban = match (row.ban_reason, row.banned_at) {
            (Some(reason), Some(banned_at)) => Some(Ban { reason, banned_at }),
            (None, None) => None,
            _ => return Err(StoreError::Corrupt(format!("student {}: partial ban", row.id))),
        };
        let whereabouts = match (
            row.presence.as_str(),
            row.active_gate_pass,
            row.out_place,
            row.out_purpose,
            row.out_time,
        ) {
            ("inside", None, None, None, None) => Whereabouts::Inside,
            ("outside", Some(gate_pass_id), None, None, Some(out_time)) => {
                Whereabouts::Outside(Excursion::GatePass {
                    gate_pass_id,
                    out_time,
                })
            }
            ("outside", None, Some(place), Some(purpose), Some(out_time)) => {
                Whereabouts::Outside(Excursion::Normal {
                    place,
                    purpose,
                    out_time,
                })
            }
            _ => {
                return Err(StoreError::Corrupt(format!(
                    "student {}: inconsistent presence",
                    row.id
                )));
            }
        };
        Ok(Student {
            id: row.id,
            name: row.name,
            roll_number: row.roll_number,
            email: row.email,
            photo_ref: row.photo_ref,
            ban,
            whereabouts,
            version: row.version,
        })
    }
}

/// Column values for a student's whereabouts:
/// `(presence, active_gate_pass, out_place, out_purpose, out_time)`.
type WhereaboutsColumns<'a> = (
    &'static str,
    Option<Uuid>,
    Option<&'a str>,
    Option<&'a str>,
    Option<DateTime<Utc>>,
);

fn whereabouts_columns(whereabouts: &Whereabouts) -> WhereaboutsColumns<'_> {
    match whereabouts {
        Whereabouts::Inside => ("inside", None, None, None, None),
        Whereabouts::Outside(Excursion::GatePass {
            gate_pass_id,
            out_time,
        }) => ("outside", Some(*gate_pass_id), None, None, Some(*out_time)),
        Whereabouts::Outside(Excursion::Normal {
            place,
            purpose,
            out_time,
        }) => (
            "outside",
            None,
            Some(place.as_str()),
            Some(purpose.as_str()),
            Some(*out_time),
        ),
    }
}

/// Row returned by gate-pass queries.
#[derive(Debug, Clone, sqlx::FromRow)]
struct PassRow {
    id: Uuid,
    student_id: Uuid,
    planned_out: DateTime<Utc>,
    planned_in: DateTime<Utc>,
    utilized: bool,
    details: serde_json::Value,
    created_at: DateTime<Utc>,
    version: i64,
}

impl TryFrom<PassRow> for GatePass {
    type Error = StoreError;

    fn try_from(row: PassRow) -> Result<Self, Self::Error> {
        let kind: PassKind = serde_json::from_value(row.details)?;
        Ok(GatePass {
            id: row.id,
            student_id: row.student_id,
            created_at: row.created_at,
            planned_out: row.planned_out,
            planned_in: row.planned_in,
            utilized: row.utilized,
            kind,
            version: row.version,
        })
    }
}

/// Row returned by token queries.
#[derive(Debug, Clone, sqlx::FromRow)]
struct TokenRow {
    id: Uuid,
    secret_hash: String,
    student_id: Uuid,
    direction: String,
    gate_pass_ref: Option<Uuid>,
    exit_place: Option<String>,
    exit_purpose: Option<String>,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    redeemed_at: Option<DateTime<Utc>>,
    consumed_at: Option<DateTime<Utc>>,
    consumed_reason: Option<String>,
}

impl TryFrom<TokenRow> for QrToken {
    type Error = StoreError;

    fn try_from(row: TokenRow) -> Result<Self, Self::Error> {
        let direction = Direction::parse(&row.direction)
            .ok_or_else(|| StoreError::Corrupt(format!("token {}: direction", row.id)))?;
        let consumed_reason = row
            .consumed_reason
            .as_deref()
            .map(|r| {
                ConsumedReason::parse(r)
                    .ok_or_else(|| StoreError::Corrupt(format!("token {}: reason", row.id)))
            })
            .transpose()?;
        let normal_exit = match (row.exit_place, row.exit_purpose) {
            (Some(place), Some(purpose)) => Some(NormalExit { place, purpose }),
            _ => None,
        };
        Ok(QrToken {
            id: row.id,
            secret_hash: row.secret_hash,
            student_id: row.student_id,
            direction,
            gate_pass_ref: row.gate_pass_ref,
            normal_exit,
            issued_at: row.issued_at,
            expires_at: row.expires_at,
            redeemed_at: row.redeemed_at,
            consumed_at: row.consumed_at,
            consumed_reason,
        })
    }
}

/// Row returned by audit queries.
#[derive(Debug, Clone, sqlx::FromRow)]
struct AuditRow {
    id: Uuid,
    token_id: Uuid,
    student_id: Uuid,
    guard_id: String,
    direction: String,
    outcome: String,
    gate_pass_ref: Option<Uuid>,
    decided_at: DateTime<Utc>,
}

impl TryFrom<AuditRow> for AuditEntry {
    type Error = StoreError;

    fn try_from(row: AuditRow) -> Result<Self, Self::Error> {
        Ok(AuditEntry {
            direction: Direction::parse(&row.direction)
                .ok_or_else(|| StoreError::Corrupt(format!("audit {}: direction", row.id)))?,
            outcome: Outcome::parse(&row.outcome)
                .ok_or_else(|| StoreError::Corrupt(format!("audit {}: outcome", row.id)))?,
            id: row.id,
            token_id: row.token_id,
            student_id: row.student_id,
            guard_id: row.guard_id,
            gate_pass_ref: row.gate_pass_ref,
            decided_at: row.decided_at,
        })
    }
}

/// `GateStore` over a PostgreSQL pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Lock a student row for the rest of the transaction, returning its version.
async fn lock_student(tx: &mut Transaction<'_, Postgres>, id: Uuid) -> StoreResult<Option<i64>> {
    let version =
        sqlx::query_scalar::<_, i64>("SELECT version FROM students WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?;
    Ok(version)
}

#[async_trait]
impl GateStore for PgStore {
    async fn enroll_student(&self, profile: StudentProfile) -> StoreResult<Student> {
        // The WHERE clause skips the update, and so the version bump, when
        // nothing changed; RETURNING then yields no row.
        let row = sqlx::query_as::<_, StudentRow>(&format!(
            "INSERT INTO students (id, name, roll_number, email, photo_ref) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (id) DO UPDATE SET \
               name = EXCLUDED.name, \
               roll_number = EXCLUDED.roll_number, \
               email = EXCLUDED.email, \
               photo_ref = EXCLUDED.photo_ref, \
               version = students.version + 1 \
             WHERE (students.name, students.roll_number, students.email, students.photo_ref) \
               IS DISTINCT FROM \
               (EXCLUDED.name, EXCLUDED.roll_number, EXCLUDED.email, EXCLUDED.photo_ref) \
             RETURNING {STUDENT_COLUMNS}"
        ))
        .bind(profile.id)
        .bind(&profile.name)
        .bind(&profile.roll_number)
        .bind(&profile.email)
        .bind(&profile.photo_ref)
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| match err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Duplicate(format!("roll number {}", profile.roll_number))
            }
            other => StoreError::Db(other),
        })?;
        match row {
            Some(row) => Student::try_from(row),
            None => self
                .get_student(profile.id)
                .await?
                .ok_or_else(|| StoreError::Corrupt(format!("student {}: vanished", profile.id))),
        }
    }

    async fn get_student(&self, id: Uuid) -> StoreResult<Option<Student>> {
        let row = sqlx::query_as::<_, StudentRow>(&format!(
            "SELECT {STUDENT_COLUMNS} FROM students WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Student::try_from).transpose()
    }

    async fn update_student(&self, student: &Student) -> StoreResult<bool> {
        let (presence, gate_pass, place, purpose, out_time) =
            whereabouts_columns(&student.whereabouts);
        let result = sqlx::query(
            "UPDATE students SET \
               ban_reason = $3, banned_at = $4, presence = $5, active_gate_pass = $6, \
               out_place = $7, out_purpose = $8, out_time = $9, version = version + 1 \
             WHERE id = $1 AND version = $2",
        )
        .bind(student.id)
        .bind(student.version)
        .bind(student.ban.as_ref().map(|b| b.reason.as_str()))
        .bind(student.ban.as_ref().map(|b| b.banned_at))
        .bind(presence)
        .bind(gate_pass)
        .bind(place)
        .bind(purpose)
        .bind(out_time)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_pass(&self, pass: &GatePass, now: DateTime<Utc>) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;
        if lock_student(&mut tx, pass.student_id).await?.is_none() {
            return Ok(false);
        }

        let open = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS( \
               SELECT 1 FROM gate_passes WHERE student_id = $1 \
                 AND (final_status = 'pending' \
                   OR (final_status = 'approved' AND NOT utilized AND planned_in > $2)))",
        )
        .bind(pass.student_id)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;
        if open {
            return Ok(false);
        }

        sqlx::query(
            "INSERT INTO gate_passes \
               (id, student_id, kind, final_status, current_stage, planned_out, planned_in, \
                utilized, details, created_at, version) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(pass.id)
        .bind(pass.student_id)
        .bind(pass.kind.as_str())
        .bind(pass.final_status().as_str())
        .bind(pass.current_stage().map(|s| s.as_str()))
        .bind(pass.planned_out)
        .bind(pass.planned_in)
        .bind(pass.utilized)
        .bind(serde_json::to_value(&pass.kind)?)
        .bind(pass.created_at)
        .bind(pass.version)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn get_pass(&self, id: Uuid) -> StoreResult<Option<GatePass>> {
        let row = sqlx::query_as::<_, PassRow>(&format!(
            "SELECT {PASS_COLUMNS} FROM gate_passes WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(GatePass::try_from).transpose()
    }

    async fn update_pass(&self, pass: &GatePass) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE gate_passes SET \
               final_status = $3, current_stage = $4, utilized = $5, details = $6, \
               version = version + 1 \
             WHERE id = $1 AND version = $2",
        )
        .bind(pass.id)
        .bind(pass.version)
        .bind(pass.final_status().as_str())
        .bind(pass.current_stage().map(|s| s.as_str()))
        .bind(pass.utilized)
        .bind(serde_json::to_value(&pass.kind)?)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn passes_for_student(&self, student_id: Uuid) -> StoreResult<Vec<GatePass>> {
        let rows = sqlx::query_as::<_, PassRow>(&format!(
            "SELECT {PASS_COLUMNS} FROM gate_passes \
             WHERE student_id = $1 ORDER BY created_at DESC"
        ))
        .bind(student_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(GatePass::try_from).collect()
    }

    async fn pending_passes(&self, stage: Stage) -> StoreResult<Vec<GatePass>> {
        let rows = sqlx::query_as::<_, PassRow>(&format!(
            "SELECT {PASS_COLUMNS} FROM gate_passes \
             WHERE final_status = 'pending' AND current_stage = $1 \
             ORDER BY created_at ASC"
        ))
        .bind(stage.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(GatePass::try_from).collect()
    }

    async fn issue_token(
        &self,
        token: &QrToken,
        student_version: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<IssueOutcome> {
        let mut tx = self.pool.begin().await?;
        match lock_student(&mut tx, token.student_id).await? {
            None => return Ok(IssueOutcome::UnknownStudent),
            Some(v) if v != student_version => return Ok(IssueOutcome::StudentChanged),
            Some(_) => {}
        }

        let under_review = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS( \
               SELECT 1 FROM qr_tokens WHERE student_id = $1 \
                 AND consumed_at IS NULL AND expires_at >= $2 AND redeemed_at IS NOT NULL \
                 AND direction = $3)",
        )
        .bind(token.student_id)
        .bind(now)
        .bind(token.direction.as_str())
        .fetch_one(&mut *tx)
        .await?;
        if under_review {
            return Ok(IssueOutcome::UnderReview);
        }

        let superseded = sqlx::query(SUPERSEDE_SQL)
            .bind(token.student_id)
            .bind(now)
            .bind(token.direction.as_str())
            .execute(&mut *tx)
            .await?
            .rows_affected();

        sqlx::query(&format!(
            "INSERT INTO qr_tokens ({TOKEN_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"
        ))
        .bind(token.id)
        .bind(&token.secret_hash)
        .bind(token.student_id)
        .bind(token.direction.as_str())
        .bind(token.gate_pass_ref)
        .bind(token.normal_exit.as_ref().map(|e| e.place.as_str()))
        .bind(token.normal_exit.as_ref().map(|e| e.purpose.as_str()))
        .bind(token.issued_at)
        .bind(token.expires_at)
        .bind(token.redeemed_at)
        .bind(token.consumed_at)
        .bind(token.consumed_reason.map(|r| r.as_str()))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(IssueOutcome::Issued {
            superseded: superseded as usize,
        })
    }

    async fn token_by_hash(&self, secret_hash: &str) -> StoreResult<Option<QrToken>> {
        let row = sqlx::query_as::<_, TokenRow>(&format!(
            "SELECT {TOKEN_COLUMNS} FROM qr_tokens WHERE secret_hash = $1"
        ))
        .bind(secret_hash)
        .fetch_optional(&self.pool)
        .await?;
        row.map(QrToken::try_from).transpose()
    }

    async fn mark_redeemed(&self, token_id: Uuid, at: DateTime<Utc>) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE qr_tokens SET redeemed_at = COALESCE(redeemed_at, $2) \
             WHERE id = $1 AND consumed_at IS NULL",
        )
        .bind(token_id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn supersede_live_tokens(
        &self,
        student_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<usize> {
        let next_action = sqlx::query_scalar::<_, String>(
            "SELECT CASE presence WHEN 'inside' THEN 'exit' ELSE 'entry' END \
             FROM students WHERE id = $1",
        )
        .bind(student_id)
        .fetch_optional(&self.pool)
        .await?;
        let Some(next_action) = next_action else {
            return Ok(0);
        };
        let result = sqlx::query(SUPERSEDE_SQL)
            .bind(student_id)
            .bind(now)
            .bind(next_action)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn live_tokens(
        &self,
        student_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<QrToken>> {
        let rows = sqlx::query_as::<_, TokenRow>(&format!(
            "SELECT {TOKEN_COLUMNS} FROM qr_tokens \
             WHERE student_id = $1 AND consumed_at IS NULL AND expires_at >= $2"
        ))
        .bind(student_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(QrToken::try_from).collect()
    }

    async fn commit_decision(&self, commit: DecisionCommit) -> StoreResult<CommitOutcome> {
        let mut tx = self.pool.begin().await?;
        if lock_student(&mut tx, commit.student_id).await?.is_none() {
            return Ok(CommitOutcome::TokenMissing);
        }

        let reason: ConsumedReason = commit.outcome.into();
        let consumed = sqlx::query(
            "UPDATE qr_tokens SET consumed_at = $2, consumed_reason = $3 \
             WHERE id = $1 AND student_id = $4 AND consumed_at IS NULL \
               AND redeemed_at IS NOT NULL",
        )
        .bind(commit.token_id)
        .bind(commit.decided_at)
        .bind(reason.as_str())
        .bind(commit.student_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if consumed == 0 {
            let consumed = sqlx::query_scalar::<_, bool>(
                "SELECT consumed_at IS NOT NULL FROM qr_tokens WHERE id = $1",
            )
            .bind(commit.token_id)
            .fetch_optional(&mut *tx)
            .await?;
            return Ok(match consumed {
                None => CommitOutcome::TokenMissing,
                Some(true) => CommitOutcome::TokenConsumed,
                Some(false) => CommitOutcome::TokenNotScanned,
            });
        }

        if let Some(student) = &commit.student {
            let (presence, gate_pass, place, purpose, out_time) =
                whereabouts_columns(&student.whereabouts);
            let written = sqlx::query(
                "UPDATE students SET \
                   presence = $3, active_gate_pass = $4, out_place = $5, out_purpose = $6, \
                   out_time = $7, version = version + 1 \
                 WHERE id = $1 AND version = $2",
            )
            .bind(student.id)
            .bind(student.version)
            .bind(presence)
            .bind(gate_pass)
            .bind(place)
            .bind(purpose)
            .bind(out_time)
            .execute(&mut *tx)
            .await?
            .rows_affected();
            if written == 0 {
                return Ok(CommitOutcome::StudentChanged);
            }
        }

        if let Some((pass_id, version)) = commit.utilize_pass {
            let written = sqlx::query(
                "UPDATE gate_passes SET utilized = TRUE, version = version + 1 \
                 WHERE id = $1 AND version = $2 AND NOT utilized",
            )
            .bind(pass_id)
            .bind(version)
            .execute(&mut *tx)
            .await?
            .rows_affected();
            if written == 0 {
                return Ok(CommitOutcome::PassChanged);
            }
        }

        let audit = &commit.audit;
        sqlx::query(
            "INSERT INTO gate_audit \
               (id, token_id, student_id, guard_id, direction, outcome, gate_pass_ref, decided_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(audit.id)
        .bind(audit.token_id)
        .bind(audit.student_id)
        .bind(&audit.guard_id)
        .bind(audit.direction.as_str())
        .bind(audit.outcome.as_str())
        .bind(audit.gate_pass_ref)
        .bind(audit.decided_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(CommitOutcome::Committed)
    }

    async fn audit_for_student(
        &self,
        student_id: Uuid,
        limit: usize,
    ) -> StoreResult<Vec<AuditEntry>> {
        let rows = sqlx::query_as::<_, AuditRow>(
            "SELECT id, token_id, student_id, guard_id, direction, outcome, gate_pass_ref, \
                    decided_at \
             FROM gate_audit WHERE student_id = $1 \
             ORDER BY decided_at DESC LIMIT $2",
        )
        .bind(student_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(AuditEntry::try_from).collect()
    }
}
