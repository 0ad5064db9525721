//! Stage transitions for local and outstation applications.

use chrono::{DateTime, Utc};

use crate::error::{GateError, GateResult};
use crate::models::Outcome;
use crate::models::pass::{GatePass, PassKind, Stage, StageRecord, StageStatus};

/// Record `outcome` for `stage` on `pass`.
///
/// Deciding a stage that already has a decision is a `Conflict`. Acting on
/// any stage other than the one currently awaiting review is `Forbidden`;
/// the outstation order cannot be skipped.
pub fn decide_stage(
    pass: &mut GatePass,
    stage: Stage,
    outcome: Outcome,
    decided_by: &str,
    at: DateTime<Utc>,
) -> GateResult<()> {
    let current = pass.current_stage();
    match &mut pass.kind {
        PassKind::Local(local) => {
            if stage != Stage::HostelOffice {
                return Err(GateError::Forbidden(format!(
                    "local passes are decided by the hostel office, not {stage}"
                )));
            }
            record(&mut local.review, outcome, decided_by, at)?;
        }
        PassKind::Outstation(out) => {
            let Some(slot) = out.stage(stage) else {
                return Err(GateError::Forbidden(format!(
                    "{stage} does not review outstation passes"
                )));
            };
            if slot.status != StageStatus::Pending {
                return Err(GateError::Conflict(format!("{stage} has already decided")));
            }
            if current != Some(stage) {
                return Err(GateError::Forbidden(match current {
                    Some(current) => format!("application is awaiting {current}, not {stage}"),
                    None => "application is no longer under review".to_string(),
                }));
            }
            let slot = out
                .stage_mut(stage)
                .ok_or_else(|| GateError::Invariant(format!("missing {stage} slot")))?;
            record(slot, outcome, decided_by, at)?;
            out.current_stage = match outcome {
                Outcome::Reject => None,
                Outcome::Approve => stage.next_outstation(),
            };
        }
    }
    Ok(())
}

fn record(
    slot: &mut StageRecord,
    outcome: Outcome,
    decided_by: &str,
    at: DateTime<Utc>,
) -> GateResult<()> {
    if slot.status != StageStatus::Pending {
        return Err(GateError::Conflict(format!(
            "{} has already decided",
            slot.stage
        )));
    }
    slot.status = match outcome {
        Outcome::Approve => StageStatus::Approved,
        Outcome::Reject => StageStatus::Rejected,
    };
    slot.decided_at = Some(at);
    slot.decided_by = Some(decided_by.to_string());
    Ok(())
}
