//! Student directory administration.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use gatepass_core::auth::Role;
use gatepass_core::identity;
use gatepass_core::models::student::StudentProfile;
use gatepass_core::uuid::uuidv7;
use uuid::Uuid;

use crate::AppState;
use crate::error::AppResult;
use crate::middleware::auth::AuthenticatedUser;
use crate::models::{BanRequest, EnrollRequest, StudentView};

/// `POST /admin/students`: enroll or refresh a student.
pub async fn enroll_handler(
    State(state): State<AppState>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
    Json(body): Json<EnrollRequest>,
) -> AppResult<(StatusCode, Json<StudentView>)> {
    user.actor().require_any(&[Role::Admin])?;
    let profile = StudentProfile {
        id: body.id.unwrap_or_else(uuidv7),
        name: body.name,
        roll_number: body.roll_number,
        email: body.email,
        photo_ref: body.photo_ref,
    };
    let student = identity::enroll(&state.engine, profile).await?;
    Ok((StatusCode::CREATED, Json(StudentView::from(student))))
}

/// `POST /admin/students/{id}/ban`
pub async fn ban_handler(
    State(state): State<AppState>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
    Path(student_id): Path<Uuid>,
    Json(body): Json<BanRequest>,
) -> AppResult<Json<StudentView>> {
    let student = identity::ban(&state.engine, student_id, &body.reason, &user.actor()).await?;
    Ok(Json(StudentView::from(student)))
}

/// `DELETE /admin/students/{id}/ban`
pub async fn unban_handler(
    State(state): State<AppState>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
    Path(student_id): Path<Uuid>,
) -> AppResult<Json<StudentView>> {
    let student = identity::unban(&state.engine, student_id, &user.actor()).await?;
    Ok(Json(StudentView::from(student)))
}
