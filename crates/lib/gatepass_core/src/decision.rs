//! Guard decisions on scanned tokens.
//!
//! A decision consumes the token and, on approve, moves the student through
//! the gate, all in one store commit. Lost races surface as errors and are
//! never retried: the student has to request a new token.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::auth::Role;
use crate::engine::GateEngine;
use crate::error::{GateError, GateResult};
use crate::identity::{Actor, resolve_student};
use crate::models::audit::AuditEntry;
use crate::models::student::Presence;
use crate::models::token::QrToken;
use crate::models::{Direction, Outcome};
use crate::notify::NotificationKind;
use crate::passes::get_pass;
use crate::presence::{TransitionContext, apply_transition};
use crate::store::{CommitOutcome, DecisionCommit};
use crate::tokens::{check_usable, find_token};
use crate::uuid::uuidv7;

/// Default number of activity entries returned.
pub const DEFAULT_ACTIVITY_LIMIT: usize = 50;

/// Confirmation of a committed decision.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub audit_id: Uuid,
    pub token_id: Uuid,
    pub student_id: Uuid,
    pub direction: Direction,
    pub outcome: Outcome,
    pub presence: Presence,
    pub gate_pass_ref: Option<Uuid>,
    pub decided_at: DateTime<Utc>,
}

/// Apply a guard's approve/reject to a scanned token. Tokens no guard has
/// redeemed yet are refused with `InvalidState`.
pub async fn decide(
    engine: &GateEngine,
    actor: &Actor,
    scanned: &str,
    outcome: Outcome,
) -> GateResult<Receipt> {
    actor.require_any(&[Role::Guard])?;
    let token = find_token(engine, scanned).await?;

    match commit(engine, actor, &token, outcome).await {
        Ok(receipt) => {
            info!(
                token_id = %receipt.token_id,
                student_id = %receipt.student_id,
                direction = %receipt.direction,
                outcome = receipt.outcome.as_str(),
                guard = %actor.id,
                "gate decision committed"
            );
            engine.notifier.publish(
                receipt.student_id,
                NotificationKind::Decision,
                json!({"status": "committed", "receipt": receipt}),
            );
            Ok(receipt)
        }
        Err(err) => {
            if err.is_expected() {
                debug!(token_id = %token.id, error = %err, "gate decision refused");
            } else {
                error!(token_id = %token.id, error = %err, "gate decision aborted");
            }
            if matches!(
                err,
                GateError::Expired | GateError::Conflict(_) | GateError::InvalidState(_)
            ) {
                engine.notifier.publish(
                    token.student_id,
                    NotificationKind::Decision,
                    json!({
                        "status": "failed",
                        "tokenId": token.id,
                        "reason": err.to_string(),
                    }),
                );
            }
            Err(err)
        }
    }
}

async fn commit(
    engine: &GateEngine,
    actor: &Actor,
    token: &QrToken,
    outcome: Outcome,
) -> GateResult<Receipt> {
    let now = engine.now();
    check_usable(token, now)?;
    if token.redeemed_at.is_none() {
        return Err(GateError::InvalidState("token has not been scanned".into()));
    }

    let student = resolve_student(engine, token.student_id).await?;
    let mut presence = student.presence();
    let (next_student, utilize_pass) = match outcome {
        Outcome::Reject => (None, None),
        Outcome::Approve => {
            let transition = match apply_transition(
                &student,
                token.direction,
                TransitionContext {
                    gate_pass: token.gate_pass_ref,
                    normal_exit: token.normal_exit.clone(),
                    at: now,
                },
            ) {
                Ok(transition) => transition,
                Err(GateError::InvalidState(msg)) => {
                    let stale =
                        GateError::Conflict(format!("presence changed since issuance: {msg}"));
                    return Err(explain_stale_read(engine, token, stale).await);
                }
                Err(other) => return Err(other),
            };
            let utilize_pass = match transition.utilizes {
                Some(pass_id) => {
                    let pass = get_pass(engine, pass_id).await?;
                    if pass.utilized {
                        let stale = GateError::Invariant(format!(
                            "gate-pass {pass_id} is already utilized"
                        ));
                        return Err(explain_stale_read(engine, token, stale).await);
                    }
                    Some((pass_id, pass.version))
                }
                None => None,
            };
            presence = transition.student.presence();
            (Some(transition.student), utilize_pass)
        }
    };

    let audit = AuditEntry {
        id: uuidv7(),
        token_id: token.id,
        student_id: token.student_id,
        guard_id: actor.id.clone(),
        direction: token.direction,
        outcome,
        gate_pass_ref: token.gate_pass_ref,
        decided_at: now,
    };
    let audit_id = audit.id;

    let result = engine
        .store
        .commit_decision(DecisionCommit {
            token_id: token.id,
            student_id: token.student_id,
            outcome,
            decided_at: now,
            student: next_student,
            utilize_pass,
            audit,
        })
        .await?;

    match result {
        CommitOutcome::Committed => Ok(Receipt {
            audit_id,
            token_id: token.id,
            student_id: token.student_id,
            direction: token.direction,
            outcome,
            presence,
            gate_pass_ref: token.gate_pass_ref,
            decided_at: now,
        }),
        CommitOutcome::TokenConsumed => Err(GateError::AlreadyUsed),
        CommitOutcome::TokenMissing => Err(GateError::NotFound("token".into())),
        CommitOutcome::TokenNotScanned => Err(GateError::InvalidState(
            "token has not been scanned".into(),
        )),
        CommitOutcome::StudentChanged => Err(GateError::Conflict(
            "student presence changed concurrently".into(),
        )),
        CommitOutcome::PassChanged => Err(GateError::Conflict(
            "gate-pass changed concurrently".into(),
        )),
    }
}

/// A student or pass read that no longer matches the token is usually a
/// competing decision on the same token that committed first. Report that as
/// `AlreadyUsed`; otherwise keep `err`.
async fn explain_stale_read(engine: &GateEngine, token: &QrToken, err: GateError) -> GateError {
    match engine.store.token_by_hash(&token.secret_hash).await {
        Ok(Some(current)) if current.is_consumed() => GateError::AlreadyUsed,
        _ => err,
    }
}

/// Gate activity of a student, most recent first.
pub async fn activity(
    engine: &GateEngine,
    student_id: Uuid,
    limit: usize,
) -> GateResult<Vec<AuditEntry>> {
    Ok(engine.store.audit_for_student(student_id, limit).await?)
}
