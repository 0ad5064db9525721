//! Gate-pass applications.
//!
//! Local and outstation passes share the planned window, owner and
//! utilization flag, and differ only in the shape of their approval.
//! `GatePass::final_status` is the common projection both kinds expose.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reviewer slot in an approval sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    HostelOffice,
    OfficeSecretary,
    Dugc,
    Hod,
}

/// Outstation review order.
pub const OUTSTATION_STAGES: [Stage; 3] = [Stage::OfficeSecretary, Stage::Dugc, Stage::Hod];

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::HostelOffice => "hostelOffice",
            Stage::OfficeSecretary => "officeSecretary",
            Stage::Dugc => "dugc",
            Stage::Hod => "hod",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "hostelOffice" => Some(Stage::HostelOffice),
            "officeSecretary" => Some(Stage::OfficeSecretary),
            "dugc" => Some(Stage::Dugc),
            "hod" => Some(Stage::Hod),
            _ => None,
        }
    }

    /// Stage that follows this one in the outstation sequence.
    pub fn next_outstation(&self) -> Option<Stage> {
        let idx = OUTSTATION_STAGES.iter().position(|s| s == self)?;
        OUTSTATION_STAGES.get(idx + 1).copied()
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decision state of one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Pending,
    Approved,
    Rejected,
}

/// Overall status of an application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinalStatus {
    Pending,
    Approved,
    Rejected,
}

impl FinalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinalStatus::Pending => "pending",
            FinalStatus::Approved => "approved",
            FinalStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, FinalStatus::Pending)
    }
}

/// Local pass status as shown to students and the hostel office.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocalStatus {
    Pending,
    Approved,
    Denied,
}

/// One reviewer's slot and its decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageRecord {
    pub stage: Stage,
    pub status: StageStatus,
    pub decided_at: Option<DateTime<Utc>>,
    pub decided_by: Option<String>,
}

impl StageRecord {
    pub fn pending(stage: Stage) -> Self {
        Self {
            stage,
            status: StageStatus::Pending,
            decided_at: None,
            decided_by: None,
        }
    }
}

/// Single-stage pass reviewed by the hostel office.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalPass {
    pub place: String,
    pub purpose: String,
    pub review: StageRecord,
}

impl LocalPass {
    pub fn status(&self) -> LocalStatus {
        match self.review.status {
            StageStatus::Pending => LocalStatus::Pending,
            StageStatus::Approved => LocalStatus::Approved,
            StageStatus::Rejected => LocalStatus::Denied,
        }
    }
}

/// Three-stage pass for leave away from the city.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutstationPass {
    pub leave_days: u32,
    pub address: String,
    pub nature_of_leave: String,
    pub reason_of_leave: String,
    /// Always in `OUTSTATION_STAGES` order.
    pub stages: Vec<StageRecord>,
    /// Stage awaiting a decision; `None` once the application is terminal.
    pub current_stage: Option<Stage>,
}

impl OutstationPass {
    pub fn stage(&self, stage: Stage) -> Option<&StageRecord> {
        self.stages.iter().find(|r| r.stage == stage)
    }

    pub fn stage_mut(&mut self, stage: Stage) -> Option<&mut StageRecord> {
        self.stages.iter_mut().find(|r| r.stage == stage)
    }

    /// `rejected` if any stage rejected, `approved` only once the HOD approved.
    pub fn final_status(&self) -> FinalStatus {
        if self.stages.iter().any(|r| r.status == StageStatus::Rejected) {
            FinalStatus::Rejected
        } else if self
            .stage(Stage::Hod)
            .is_some_and(|r| r.status == StageStatus::Approved)
        {
            FinalStatus::Approved
        } else {
            FinalStatus::Pending
        }
    }
}

/// Kind-specific part of an application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PassKind {
    Local(LocalPass),
    Outstation(OutstationPass),
}

impl PassKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PassKind::Local(_) => "local",
            PassKind::Outstation(_) => "outstation",
        }
    }
}

/// A gate-pass application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatePass {
    pub id: Uuid,
    pub student_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub planned_out: DateTime<Utc>,
    pub planned_in: DateTime<Utc>,
    /// Flips once, from `false` to `true`, when the student returns under it.
    pub utilized: bool,
    pub kind: PassKind,
    pub version: i64,
}

impl GatePass {
    pub fn final_status(&self) -> FinalStatus {
        match &self.kind {
            PassKind::Local(local) => match local.review.status {
                StageStatus::Pending => FinalStatus::Pending,
                StageStatus::Approved => FinalStatus::Approved,
                StageStatus::Rejected => FinalStatus::Rejected,
            },
            PassKind::Outstation(out) => out.final_status(),
        }
    }

    /// Stage whose reviewer may act now, if any.
    pub fn current_stage(&self) -> Option<Stage> {
        match &self.kind {
            PassKind::Local(local) => {
                (local.review.status == StageStatus::Pending).then_some(Stage::HostelOffice)
            }
            PassKind::Outstation(out) => out.current_stage,
        }
    }

    /// Approved passes stop being usable for an exit once the planned return
    /// time has passed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.planned_in
    }

    /// Whether this pass can back a new exit at `now`.
    pub fn is_exit_eligible(&self, now: DateTime<Utc>) -> bool {
        self.final_status() == FinalStatus::Approved && !self.utilized && !self.is_expired(now)
    }

    /// Whether this pass still blocks the owner from opening another one.
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        match self.final_status() {
            FinalStatus::Pending => true,
            FinalStatus::Approved => !self.utilized && !self.is_expired(now),
            FinalStatus::Rejected => false,
        }
    }

    pub fn summary(&self, now: DateTime<Utc>) -> PassSummary {
        PassSummary {
            id: self.id,
            kind: self.kind.as_str(),
            final_status: self.final_status(),
            current_stage: self.current_stage(),
            planned_out: self.planned_out,
            planned_in: self.planned_in,
            utilized: self.utilized,
            expired: self.final_status() == FinalStatus::Approved && self.is_expired(now),
        }
    }
}

/// Read projection of a pass, common to both kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PassSummary {
    pub id: Uuid,
    pub kind: &'static str,
    pub final_status: FinalStatus,
    pub current_stage: Option<Stage>,
    pub planned_out: DateTime<Utc>,
    pub planned_in: DateTime<Utc>,
    pub utilized: bool,
    pub expired: bool,
}
