//! QR token issuance and redemption.
//!
//! A token is a random secret shown to the guard as a QR code. Only its
//! SHA-256 hash is stored. At most one token per student is live at a time:
//! issuing retires older unscanned tokens, and is refused while a scanned
//! token awaits a guard decision.

use base64::Engine;
use chrono::{DateTime, Utc};
use rand::distr::Alphanumeric;
use rand::{Rng, rng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use uuid::Uuid;

use crate::auth::Role;
use crate::engine::GateEngine;
use crate::error::{GateError, GateResult};
use crate::identity::{Actor, require_active_student, resolve_student};
use crate::models::Direction;
use crate::models::pass::{FinalStatus, GatePass};
use crate::models::student::{Excursion, NormalExit, Student};
use crate::models::token::QrToken;
use crate::passes::get_pass;
use crate::store::IssueOutcome;
use crate::uuid::uuidv7;

/// Length of the scanned secret.
const TOKEN_SECRET_LEN: usize = 48;

/// Generate a random token secret.
fn generate_secret() -> String {
    rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_SECRET_LEN)
        .map(char::from)
        .collect()
}

/// SHA-256 hash a token secret for storage.
pub fn hash_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.trim().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Contents of the rendered QR code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QrPayload {
    /// Token secret.
    pub t: String,
    /// Direction.
    pub d: Direction,
    /// Expiry.
    pub e: DateTime<Utc>,
}

impl QrPayload {
    pub fn encode(&self) -> GateResult<String> {
        let json = serde_json::to_vec(self)
            .map_err(|e| GateError::Invariant(format!("qr payload encode: {e}")))?;
        Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(json))
    }

    /// Decode a scanned payload.
    pub fn decode(scanned: &str) -> GateResult<Self> {
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(scanned.trim())
            .map_err(|_| GateError::NotFound("unreadable QR payload".into()))?;
        serde_json::from_slice(&bytes).map_err(|_| GateError::NotFound("unreadable QR payload".into()))
    }
}

/// Extract the token secret from whatever the scanner read: either the
/// encoded QR payload or the bare secret.
pub fn secret_from_scan(scanned: &str) -> String {
    match QrPayload::decode(scanned) {
        Ok(payload) => payload.t,
        Err(_) => scanned.trim().to_string(),
    }
}

/// What a student asks a token for.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRequest {
    pub direction: Direction,
    pub gate_pass_id: Option<Uuid>,
    /// Required for an exit with no gate-pass.
    pub place: Option<String>,
    pub purpose: Option<String>,
}

/// A freshly issued token, returned once to the student.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedToken {
    pub token_id: Uuid,
    pub token: String,
    pub qr_payload: String,
    pub direction: Direction,
    pub gate_pass_ref: Option<Uuid>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Issue a token for the student's next gate crossing.
pub async fn issue(
    engine: &GateEngine,
    student_id: Uuid,
    request: TokenRequest,
) -> GateResult<IssuedToken> {
    let student = require_active_student(engine, student_id).await?;
    let now = engine.now();

    let expected = student.next_action();
    if request.direction != expected {
        debug!(%student_id, requested = %request.direction, "token refused: wrong direction");
        return Err(GateError::InvalidState(format!(
            "student is {}, next action is {expected}",
            student.presence().as_str()
        )));
    }

    let normal_exit = match (request.place.as_deref(), request.purpose.as_deref()) {
        (None, None) => None,
        (Some(place), Some(purpose)) if !place.trim().is_empty() && !purpose.trim().is_empty() => {
            Some(NormalExit {
                place: place.trim().to_string(),
                purpose: purpose.trim().to_string(),
            })
        }
        _ => {
            return Err(GateError::Validation(
                "place and purpose must both be given".into(),
            ));
        }
    };

    let (gate_pass_ref, normal_exit) = match request.direction {
        Direction::Exit => match (request.gate_pass_id, normal_exit) {
            (Some(pass_id), None) => {
                let pass = get_pass(engine, pass_id).await?;
                check_exit_eligible(&pass, &student, now)?;
                (Some(pass_id), None)
            }
            (None, Some(exit)) => (None, Some(exit)),
            (Some(_), Some(_)) => {
                return Err(GateError::Validation(
                    "an exit is backed by a gate-pass or by place/purpose, not both".into(),
                ));
            }
            (None, None) => {
                return Err(GateError::Validation(
                    "exit needs a gate-pass or a place and purpose".into(),
                ));
            }
        },
        Direction::Entry => {
            if normal_exit.is_some() {
                return Err(GateError::Validation(
                    "place and purpose only apply to exits".into(),
                ));
            }
            let active = student.whereabouts.active_gate_pass();
            if let Some(requested) = request.gate_pass_id
                && Some(requested) != active
            {
                return Err(GateError::NotEligible(
                    "student is not out on that gate-pass".into(),
                ));
            }
            if let Some(pass_id) = active {
                let pass = get_pass(engine, pass_id).await?;
                if pass.final_status() != FinalStatus::Approved || pass.utilized {
                    return Err(GateError::NotEligible(
                        "gate-pass is not approved or already utilized".into(),
                    ));
                }
            }
            (active, None)
        }
    };

    let secret = generate_secret();
    let token = QrToken {
        id: uuidv7(),
        secret_hash: hash_secret(&secret),
        student_id,
        direction: request.direction,
        gate_pass_ref,
        normal_exit,
        issued_at: now,
        expires_at: now + engine.config.token_ttl,
        redeemed_at: None,
        consumed_at: None,
        consumed_reason: None,
    };

    match engine
        .store
        .issue_token(&token, student.version, now)
        .await?
    {
        IssueOutcome::Issued { superseded } => {
            info!(
                %student_id,
                token_id = %token.id,
                direction = %token.direction,
                superseded,
                "token issued"
            );
        }
        IssueOutcome::StudentChanged => {
            return Err(GateError::Conflict(
                "student record changed while issuing".into(),
            ));
        }
        IssueOutcome::UnderReview => {
            return Err(GateError::Conflict(
                "a scanned token is awaiting the guard's decision".into(),
            ));
        }
        IssueOutcome::UnknownStudent => {
            return Err(GateError::NotFound(format!("student {student_id}")));
        }
    }

    let qr_payload = QrPayload {
        t: secret.clone(),
        d: token.direction,
        e: token.expires_at,
    }
    .encode()?;

    Ok(IssuedToken {
        token_id: token.id,
        token: secret,
        qr_payload,
        direction: token.direction,
        gate_pass_ref: token.gate_pass_ref,
        issued_at: token.issued_at,
        expires_at: token.expires_at,
    })
}

fn check_exit_eligible(pass: &GatePass, student: &Student, now: DateTime<Utc>) -> GateResult<()> {
    if pass.student_id != student.id {
        return Err(GateError::NotEligible(
            "gate-pass belongs to another student".into(),
        ));
    }
    if pass.final_status() != FinalStatus::Approved {
        return Err(GateError::NotEligible("gate-pass is not approved".into()));
    }
    if pass.utilized {
        return Err(GateError::NotEligible("gate-pass already utilized".into()));
    }
    if pass.is_expired(now) {
        return Err(GateError::NotEligible("gate-pass has expired".into()));
    }
    Ok(())
}

/// Retire the student's own unscanned token.
pub async fn cancel_own(engine: &GateEngine, student_id: Uuid) -> GateResult<usize> {
    let retired = engine
        .store
        .supersede_live_tokens(student_id, engine.now())
        .await?;
    debug!(%student_id, retired, "student cancelled token");
    Ok(retired)
}

/// What a guard sees after scanning a token.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenContext {
    pub token_id: Uuid,
    pub student_id: Uuid,
    pub name: String,
    pub roll_number: String,
    pub photo_ref: Option<String>,
    pub direction: Direction,
    pub expires_at: DateTime<Utc>,
    pub place: Option<String>,
    pub purpose: Option<String>,
    pub gate_pass: Option<GatePass>,
}

/// Look up a scanned token for a guard.
///
/// Records the scan but does not consume the token; consumption happens only
/// when the guard's decision is committed.
pub async fn redeem(engine: &GateEngine, actor: &Actor, scanned: &str) -> GateResult<TokenContext> {
    actor.require_any(&[Role::Guard])?;
    let token = find_token(engine, scanned).await?;
    let now = engine.now();
    check_usable(&token, now)?;

    if !engine.store.mark_redeemed(token.id, now).await? {
        return Err(GateError::AlreadyUsed);
    }

    let student = resolve_student(engine, token.student_id).await?;
    let gate_pass = match token.gate_pass_ref {
        Some(pass_id) => Some(get_pass(engine, pass_id).await?),
        None => None,
    };
    let (place, purpose) = match &token.normal_exit {
        Some(exit) => (Some(exit.place.clone()), Some(exit.purpose.clone())),
        None => match student.whereabouts.excursion() {
            Some(Excursion::Normal { place, purpose, .. }) => {
                (Some(place.clone()), Some(purpose.clone()))
            }
            _ => (None, None),
        },
    };

    info!(token_id = %token.id, guard = %actor.id, student_id = %student.id, "token scanned");
    Ok(TokenContext {
        token_id: token.id,
        student_id: student.id,
        name: student.name,
        roll_number: student.roll_number,
        photo_ref: student.photo_ref,
        direction: token.direction,
        expires_at: token.expires_at,
        place,
        purpose,
        gate_pass,
    })
}

/// Resolve a scan to its token record.
pub(crate) async fn find_token(engine: &GateEngine, scanned: &str) -> GateResult<QrToken> {
    let secret = secret_from_scan(scanned);
    engine
        .store
        .token_by_hash(&hash_secret(&secret))
        .await?
        .ok_or_else(|| GateError::NotFound("token".into()))
}

/// `AlreadyUsed` if consumed, `Expired` if past its expiry.
pub(crate) fn check_usable(token: &QrToken, now: DateTime<Utc>) -> GateResult<()> {
    if token.is_consumed() {
        return Err(GateError::AlreadyUsed);
    }
    if token.is_expired(now) {
        return Err(GateError::Expired);
    }
    Ok(())
}
