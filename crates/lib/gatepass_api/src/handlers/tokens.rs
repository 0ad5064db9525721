//! Student-side QR token handlers.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use gatepass_core::tokens::{self, IssuedToken, TokenRequest};

use crate::AppState;
use crate::error::AppResult;
use crate::middleware::auth::AuthenticatedUser;
use crate::models::CancelTokenResponse;

/// `POST /tokens`: issue a token for the caller's next crossing.
pub async fn issue_token_handler(
    State(state): State<AppState>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
    Json(body): Json<TokenRequest>,
) -> AppResult<(StatusCode, Json<IssuedToken>)> {
    let student_id = user.actor().student_id()?;
    let issued = tokens::issue(&state.engine, student_id, body).await?;
    Ok((StatusCode::CREATED, Json(issued)))
}

/// `DELETE /tokens/mine`: retire the caller's unscanned token.
pub async fn cancel_token_handler(
    State(state): State<AppState>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
) -> AppResult<Json<CancelTokenResponse>> {
    let student_id = user.actor().student_id()?;
    let cancelled = tokens::cancel_own(&state.engine, student_id).await?;
    Ok(Json(CancelTokenResponse { cancelled }))
}
