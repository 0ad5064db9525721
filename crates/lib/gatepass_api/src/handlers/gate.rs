//! Guard-side handlers: scan and decide.

use axum::Json;
use axum::extract::State;
use gatepass_core::decision::{self, Receipt};
use gatepass_core::tokens::{self, TokenContext};

use crate::AppState;
use crate::error::AppResult;
use crate::middleware::auth::AuthenticatedUser;
use crate::models::{GateDecisionRequest, ScanRequest};

/// `POST /gate/redeem`: look up a scanned token.
pub async fn redeem_handler(
    State(state): State<AppState>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
    Json(body): Json<ScanRequest>,
) -> AppResult<Json<TokenContext>> {
    let context = tokens::redeem(&state.engine, &user.actor(), &body.token).await?;
    Ok(Json(context))
}

/// `POST /gate/decide`: approve or reject a scanned token.
pub async fn decide_handler(
    State(state): State<AppState>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
    Json(body): Json<GateDecisionRequest>,
) -> AppResult<Json<Receipt>> {
    let receipt = decision::decide(&state.engine, &user.actor(), &body.token, body.outcome).await?;
    Ok(Json(receipt))
}
