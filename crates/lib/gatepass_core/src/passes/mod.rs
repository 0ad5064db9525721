//! Gate-pass applications: creation, review and lookup.

pub mod approval;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use crate::auth::Role;
use crate::engine::GateEngine;
use crate::error::{GateError, GateResult};
use crate::identity::{Actor, require_active_student};
use crate::models::Outcome;
use crate::models::pass::{
    GatePass, LocalPass, OUTSTATION_STAGES, OutstationPass, PassKind, Stage, StageRecord,
};
use crate::notify::NotificationKind;
use crate::uuid::uuidv7;

/// Roles that may read any application.
const STAFF_ROLES: [Role; 6] = [
    Role::HostelOffice,
    Role::OfficeSecretary,
    Role::Dugc,
    Role::Hod,
    Role::Guard,
    Role::Admin,
];

/// Planned out and in date-times, in campus local time.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedWindow {
    pub date_out: NaiveDate,
    pub time_out: NaiveTime,
    pub date_in: NaiveDate,
    pub time_in: NaiveTime,
}

impl PlannedWindow {
    /// Resolve to UTC instants `(out, in)`.
    pub fn resolve(&self, offset: FixedOffset) -> GateResult<(DateTime<Utc>, DateTime<Utc>)> {
        let out = planned_datetime(self.date_out, self.time_out, offset)?;
        let back = planned_datetime(self.date_in, self.time_in, offset)?;
        if back <= out {
            return Err(GateError::Validation(
                "planned in-time must be after planned out-time".into(),
            ));
        }
        Ok((out, back))
    }
}

/// Combine a campus-local date and time into a UTC instant.
pub fn planned_datetime(
    date: NaiveDate,
    time: NaiveTime,
    offset: FixedOffset,
) -> GateResult<DateTime<Utc>> {
    date.and_time(time)
        .and_local_timezone(offset)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| GateError::Validation(format!("invalid local time {date} {time}")))
}

/// Local pass form.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalApplication {
    pub place: String,
    pub purpose: String,
    #[serde(flatten)]
    pub window: PlannedWindow,
}

/// Outstation pass form.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutstationApplication {
    pub leave_days: u32,
    pub address: String,
    pub nature_of_leave: String,
    pub reason_of_leave: String,
    #[serde(flatten)]
    pub window: PlannedWindow,
}

fn require_text(field: &str, value: &str) -> GateResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(GateError::Validation(format!("{field} must not be empty")));
    }
    Ok(trimmed.to_string())
}

/// Apply for a local pass.
pub async fn apply_local(
    engine: &GateEngine,
    student_id: Uuid,
    form: LocalApplication,
) -> GateResult<GatePass> {
    let kind = PassKind::Local(LocalPass {
        place: require_text("place", &form.place)?,
        purpose: require_text("purpose", &form.purpose)?,
        review: StageRecord::pending(Stage::HostelOffice),
    });
    create(engine, student_id, &form.window, kind).await
}

/// Apply for an outstation pass.
pub async fn apply_outstation(
    engine: &GateEngine,
    student_id: Uuid,
    form: OutstationApplication,
) -> GateResult<GatePass> {
    if form.leave_days == 0 {
        return Err(GateError::Validation("leaveDays must be at least 1".into()));
    }
    let kind = PassKind::Outstation(OutstationPass {
        leave_days: form.leave_days,
        address: require_text("address", &form.address)?,
        nature_of_leave: require_text("natureOfLeave", &form.nature_of_leave)?,
        reason_of_leave: require_text("reasonOfLeave", &form.reason_of_leave)?,
        stages: OUTSTATION_STAGES
            .iter()
            .map(|s| StageRecord::pending(*s))
            .collect(),
        current_stage: OUTSTATION_STAGES.first().copied(),
    });
    create(engine, student_id, &form.window, kind).await
}

async fn create(
    engine: &GateEngine,
    student_id: Uuid,
    window: &PlannedWindow,
    kind: PassKind,
) -> GateResult<GatePass> {
    require_active_student(engine, student_id).await?;
    let now = engine.now();
    let (planned_out, planned_in) = window.resolve(engine.config.campus_offset)?;
    if planned_in <= now {
        return Err(GateError::Validation(
            "planned in-time is already in the past".into(),
        ));
    }

    let pass = GatePass {
        id: uuidv7(),
        student_id,
        created_at: now,
        planned_out,
        planned_in,
        utilized: false,
        kind,
        version: 0,
    };
    if !engine.store.insert_pass(&pass, now).await? {
        debug!(%student_id, "application refused: another pass is open");
        return Err(GateError::Conflict(
            "another application is still pending or usable".into(),
        ));
    }

    info!(
        %student_id,
        pass_id = %pass.id,
        kind = pass.kind.as_str(),
        "gate-pass application created"
    );
    engine.notifier.publish(
        student_id,
        NotificationKind::Activity,
        json!({"event": "applied", "pass": pass.summary(now)}),
    );
    Ok(pass)
}

/// Record a reviewer's decision on an application.
///
/// `stage` is required for outstation passes and ignored for local ones.
pub async fn decide(
    engine: &GateEngine,
    actor: &Actor,
    pass_id: Uuid,
    stage: Option<Stage>,
    outcome: Outcome,
) -> GateResult<GatePass> {
    let mut pass = get_pass(engine, pass_id).await?;
    let stage = match (&pass.kind, stage) {
        (PassKind::Local(_), _) => Stage::HostelOffice,
        (PassKind::Outstation(_), Some(stage)) => stage,
        (PassKind::Outstation(_), None) => {
            return Err(GateError::Validation(
                "stage is required for outstation passes".into(),
            ));
        }
    };
    if !actor.roles.iter().any(|r| r.reviews() == Some(stage)) {
        return Err(GateError::Forbidden(format!(
            "caller does not review the {stage} stage"
        )));
    }

    let now = engine.now();
    approval::decide_stage(&mut pass, stage, outcome, &actor.id, now)?;
    if !engine.store.update_pass(&pass).await? {
        return Err(GateError::Conflict(
            "application changed concurrently".into(),
        ));
    }
    pass.version += 1;

    info!(
        %pass_id,
        stage = stage.as_str(),
        outcome = outcome.as_str(),
        by = %actor.id,
        final_status = pass.final_status().as_str(),
        "stage decided"
    );
    engine.notifier.publish(
        pass.student_id,
        NotificationKind::Activity,
        json!({
            "event": "stageDecided",
            "stage": stage,
            "outcome": outcome,
            "pass": pass.summary(now),
        }),
    );
    Ok(pass)
}

/// Fetch an application.
pub async fn get_pass(engine: &GateEngine, pass_id: Uuid) -> GateResult<GatePass> {
    engine
        .store
        .get_pass(pass_id)
        .await?
        .ok_or_else(|| GateError::NotFound(format!("gate-pass {pass_id}")))
}

/// Fetch an application on behalf of `actor`: its owner or staff.
pub async fn get_pass_for(engine: &GateEngine, actor: &Actor, pass_id: Uuid) -> GateResult<GatePass> {
    let pass = get_pass(engine, pass_id).await?;
    let is_owner = actor.has(Role::Student) && actor.id == pass.student_id.to_string();
    if !is_owner {
        actor.require_any(&STAFF_ROLES)?;
    }
    Ok(pass)
}

/// Applications of one student, newest first.
pub async fn list_for_student(engine: &GateEngine, student_id: Uuid) -> GateResult<Vec<GatePass>> {
    Ok(engine.store.passes_for_student(student_id).await?)
}

/// Pending applications awaiting any stage the actor reviews, oldest first.
pub async fn review_queue(engine: &GateEngine, actor: &Actor) -> GateResult<Vec<GatePass>> {
    let stages: Vec<Stage> = actor.roles.iter().filter_map(Role::reviews).collect();
    if stages.is_empty() {
        return Err(GateError::Forbidden("caller is not a reviewer".into()));
    }
    let mut queue = Vec::new();
    for stage in stages {
        queue.extend(engine.store.pending_passes(stage).await?);
    }
    queue.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Ok(queue)
}
