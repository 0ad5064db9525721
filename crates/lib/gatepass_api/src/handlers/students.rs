//! Student status and gate activity handlers.

use axum::Json;
use axum::extract::{Path, Query, State};
use gatepass_core::auth::Role;
use gatepass_core::decision::{self, DEFAULT_ACTIVITY_LIMIT};
use gatepass_core::models::audit::AuditEntry;
use gatepass_core::presence::{self, StatusView};
use uuid::Uuid;

use crate::AppState;
use crate::error::AppResult;
use crate::middleware::auth::AuthenticatedUser;
use crate::models::ActivityQuery;

/// `GET /students/me/status`: the caller's own presence.
pub async fn my_status_handler(
    State(state): State<AppState>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
) -> AppResult<Json<StatusView>> {
    let student_id = user.actor().student_id()?;
    Ok(Json(presence::get_status(&state.engine, student_id).await?))
}

/// `GET /students/{id}/status`: presence lookup at the gate.
pub async fn student_status_handler(
    State(state): State<AppState>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
    Path(student_id): Path<Uuid>,
) -> AppResult<Json<StatusView>> {
    user.actor().require_any(&[Role::Guard, Role::Admin])?;
    Ok(Json(presence::get_status(&state.engine, student_id).await?))
}

/// `GET /students/{id}/activity`: committed gate decisions, newest first.
pub async fn activity_handler(
    State(state): State<AppState>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
    Path(student_id): Path<Uuid>,
    Query(query): Query<ActivityQuery>,
) -> AppResult<Json<Vec<AuditEntry>>> {
    let actor = user.actor();
    let is_owner = actor.student_id().is_ok_and(|id| id == student_id);
    if !is_owner {
        actor.require_any(&[Role::Guard, Role::Admin])?;
    }
    let limit = query.limit.unwrap_or(DEFAULT_ACTIVITY_LIMIT).clamp(1, 500);
    Ok(Json(
        decision::activity(&state.engine, student_id, limit).await?,
    ))
}
