//! Gate-pass application handlers.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use gatepass_core::passes::{self, LocalApplication, OutstationApplication};
use uuid::Uuid;

use crate::AppState;
use crate::error::AppResult;
use crate::middleware::auth::AuthenticatedUser;
use crate::models::{PassView, StageDecisionRequest};

/// `POST /passes/local`: apply for a local pass.
pub async fn apply_local_handler(
    State(state): State<AppState>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
    Json(body): Json<LocalApplication>,
) -> AppResult<(StatusCode, Json<PassView>)> {
    let student_id = user.actor().student_id()?;
    let pass = passes::apply_local(&state.engine, student_id, body).await?;
    Ok((
        StatusCode::CREATED,
        Json(PassView::new(pass, state.engine.now())),
    ))
}

/// `POST /passes/outstation`: apply for an outstation pass.
pub async fn apply_outstation_handler(
    State(state): State<AppState>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
    Json(body): Json<OutstationApplication>,
) -> AppResult<(StatusCode, Json<PassView>)> {
    let student_id = user.actor().student_id()?;
    let pass = passes::apply_outstation(&state.engine, student_id, body).await?;
    Ok((
        StatusCode::CREATED,
        Json(PassView::new(pass, state.engine.now())),
    ))
}

/// `GET /passes/mine`: the caller's applications, newest first.
pub async fn my_passes_handler(
    State(state): State<AppState>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
) -> AppResult<Json<Vec<PassView>>> {
    let student_id = user.actor().student_id()?;
    let now = state.engine.now();
    let list = passes::list_for_student(&state.engine, student_id).await?;
    Ok(Json(
        list.into_iter().map(|p| PassView::new(p, now)).collect(),
    ))
}

/// `GET /passes/queue`: applications awaiting the caller's stage.
pub async fn review_queue_handler(
    State(state): State<AppState>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
) -> AppResult<Json<Vec<PassView>>> {
    let now = state.engine.now();
    let queue = passes::review_queue(&state.engine, &user.actor()).await?;
    Ok(Json(
        queue.into_iter().map(|p| PassView::new(p, now)).collect(),
    ))
}

/// `GET /passes/{id}`
pub async fn get_pass_handler(
    State(state): State<AppState>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
    Path(pass_id): Path<Uuid>,
) -> AppResult<Json<PassView>> {
    let pass = passes::get_pass_for(&state.engine, &user.actor(), pass_id).await?;
    Ok(Json(PassView::new(pass, state.engine.now())))
}

/// `POST /passes/{id}/decision`: record a reviewer's approve/reject.
pub async fn decide_stage_handler(
    State(state): State<AppState>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
    Path(pass_id): Path<Uuid>,
    Json(body): Json<StageDecisionRequest>,
) -> AppResult<Json<PassView>> {
    let pass = passes::decide(
        &state.engine,
        &user.actor(),
        pass_id,
        body.stage,
        body.outcome,
    )
    .await?;
    Ok(Json(PassView::new(pass, state.engine.now())))
}
