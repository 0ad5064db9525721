//! Identity and ban gate.
//!
//! Every student-initiated mutation starts with [`require_active_student`].

use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::auth::Role;
use crate::engine::GateEngine;
use crate::error::{GateError, GateResult};
use crate::models::student::{Ban, Student, StudentProfile};
use crate::notify::NotificationKind;
use crate::store::StoreError;

/// Authenticated caller, as resolved from a bearer token.
#[derive(Debug, Clone)]
pub struct Actor {
    pub id: String,
    pub roles: Vec<Role>,
}

impl Actor {
    pub fn new(id: impl Into<String>, roles: Vec<Role>) -> Self {
        Self {
            id: id.into(),
            roles,
        }
    }

    pub fn has(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    /// Fail with `Forbidden` unless the actor holds one of `roles`.
    pub fn require_any(&self, roles: &[Role]) -> GateResult<()> {
        if roles.iter().any(|r| self.has(*r)) {
            Ok(())
        } else {
            Err(GateError::Forbidden(format!(
                "requires one of: {}",
                roles.iter().map(Role::as_str).collect::<Vec<_>>().join(", ")
            )))
        }
    }

    /// The student id this actor speaks for.
    pub fn student_id(&self) -> GateResult<Uuid> {
        self.require_any(&[Role::Student])?;
        Uuid::parse_str(&self.id)
            .map_err(|_| GateError::Forbidden("student subject is not a student id".into()))
    }
}

/// Fetch a student record.
pub async fn resolve_student(engine: &GateEngine, student_id: Uuid) -> GateResult<Student> {
    engine
        .store
        .get_student(student_id)
        .await?
        .ok_or_else(|| GateError::NotFound(format!("student {student_id}")))
}

/// Fetch a student record, refusing banned students.
pub async fn require_active_student(engine: &GateEngine, student_id: Uuid) -> GateResult<Student> {
    let student = resolve_student(engine, student_id).await?;
    if let Some(ban) = &student.ban {
        return Err(GateError::Forbidden(format!("student is banned: {}", ban.reason)));
    }
    Ok(student)
}

/// Insert or refresh a student's directory record.
pub async fn enroll(engine: &GateEngine, profile: StudentProfile) -> GateResult<Student> {
    for (field, value) in [
        ("name", &profile.name),
        ("rollNumber", &profile.roll_number),
        ("email", &profile.email),
    ] {
        if value.trim().is_empty() {
            return Err(GateError::Validation(format!("{field} must not be empty")));
        }
    }
    let student = match engine.store.enroll_student(profile).await {
        Ok(student) => student,
        Err(StoreError::Duplicate(what)) => {
            return Err(GateError::Conflict(format!("{what} is already enrolled")));
        }
        Err(other) => return Err(other.into()),
    };
    info!(student_id = %student.id, roll = %student.roll_number, "student enrolled");
    Ok(student)
}

/// Ban a student. Existing tokens are not revoked; the ban is checked when
/// the next token is requested.
pub async fn ban(
    engine: &GateEngine,
    student_id: Uuid,
    reason: &str,
    actor: &Actor,
) -> GateResult<Student> {
    actor.require_any(&[Role::Admin])?;
    if reason.trim().is_empty() {
        return Err(GateError::Validation("ban reason must not be empty".into()));
    }
    let mut student = resolve_student(engine, student_id).await?;
    student.ban = Some(Ban {
        reason: reason.trim().to_string(),
        banned_at: engine.now(),
    });
    write_ban_toggle(engine, student, actor).await
}

/// Lift a student's ban.
pub async fn unban(engine: &GateEngine, student_id: Uuid, actor: &Actor) -> GateResult<Student> {
    actor.require_any(&[Role::Admin])?;
    let mut student = resolve_student(engine, student_id).await?;
    student.ban = None;
    write_ban_toggle(engine, student, actor).await
}

async fn write_ban_toggle(
    engine: &GateEngine,
    student: Student,
    actor: &Actor,
) -> GateResult<Student> {
    if !engine.store.update_student(&student).await? {
        return Err(GateError::Conflict(
            "student record changed concurrently".into(),
        ));
    }
    let updated = resolve_student(engine, student.id).await?;
    info!(
        student_id = %updated.id,
        banned = updated.is_banned(),
        by = %actor.id,
        "ban toggled"
    );
    engine.notifier.publish(
        updated.id,
        NotificationKind::Activity,
        json!({
            "event": "ban",
            "studentId": updated.id,
            "isBanned": updated.is_banned(),
            "banReason": updated.ban.as_ref().map(|b| b.reason.clone()),
            "bannedAt": updated.ban.as_ref().map(|b| b.banned_at),
        }),
    );
    Ok(updated)
}
