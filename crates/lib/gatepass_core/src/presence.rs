//! Presence ledger: where each student is and what they may do next.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::engine::GateEngine;
use crate::error::{GateError, GateResult};
use crate::identity::resolve_student;
use crate::models::Direction;
use crate::models::student::{Excursion, NormalExit, Presence, Student, Whereabouts};

/// Pollable status of a student. Reading it has no side effects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusView {
    pub student_id: Uuid,
    pub presence: Presence,
    pub next_action: Direction,
    pub active_gate_pass_no: Option<Uuid>,
    pub out_place: Option<String>,
    pub out_purpose: Option<String>,
    pub out_time: Option<DateTime<Utc>>,
    pub is_banned: bool,
}

impl From<&Student> for StatusView {
    fn from(student: &Student) -> Self {
        let (out_place, out_purpose) = match student.whereabouts.excursion() {
            Some(Excursion::Normal { place, purpose, .. }) => {
                (Some(place.clone()), Some(purpose.clone()))
            }
            _ => (None, None),
        };
        Self {
            student_id: student.id,
            presence: student.presence(),
            next_action: student.next_action(),
            active_gate_pass_no: student.whereabouts.active_gate_pass(),
            out_place,
            out_purpose,
            out_time: student.whereabouts.excursion().map(Excursion::out_time),
            is_banned: student.is_banned(),
        }
    }
}

/// Current presence and next allowed direction.
pub async fn get_status(engine: &GateEngine, student_id: Uuid) -> GateResult<StatusView> {
    let student = resolve_student(engine, student_id).await?;
    Ok(StatusView::from(&student))
}

/// What backs a requested transition.
#[derive(Debug, Clone)]
pub struct TransitionContext {
    pub gate_pass: Option<Uuid>,
    pub normal_exit: Option<NormalExit>,
    pub at: DateTime<Utc>,
}

/// Result of applying a transition to a student record.
#[derive(Debug, Clone)]
pub struct Transition {
    /// New state; `version` is still the version it was derived from.
    pub student: Student,
    /// Pass consumed by this transition, on return from a gate-pass excursion.
    pub utilizes: Option<Uuid>,
}

/// Compute the state after moving `student` in `direction`.
///
/// Fails with `InvalidState` if `direction` is not the student's next action.
/// Used at commit time, so the check runs against the freshest record.
pub fn apply_transition(
    student: &Student,
    direction: Direction,
    ctx: TransitionContext,
) -> GateResult<Transition> {
    let expected = student.next_action();
    if direction != expected {
        return Err(GateError::InvalidState(format!(
            "student is {}, next action is {expected}",
            student.presence().as_str()
        )));
    }

    let mut next = student.clone();
    let utilizes = match direction {
        Direction::Exit => {
            let excursion = match (ctx.gate_pass, ctx.normal_exit) {
                (Some(gate_pass_id), None) => Excursion::GatePass {
                    gate_pass_id,
                    out_time: ctx.at,
                },
                (None, Some(exit)) => Excursion::Normal {
                    place: exit.place,
                    purpose: exit.purpose,
                    out_time: ctx.at,
                },
                _ => {
                    return Err(GateError::Invariant(
                        "exit must be backed by exactly one of gate-pass or place/purpose".into(),
                    ));
                }
            };
            next.whereabouts = Whereabouts::Outside(excursion);
            None
        }
        Direction::Entry => {
            let active = student.whereabouts.active_gate_pass();
            if let (Some(requested), Some(active)) = (ctx.gate_pass, active)
                && requested != active
            {
                return Err(GateError::Invariant(format!(
                    "entry bound to pass {requested} but student is out on {active}"
                )));
            }
            next.whereabouts = Whereabouts::Inside;
            active
        }
    };

    Ok(Transition {
        student: next,
        utilizes,
    })
}
