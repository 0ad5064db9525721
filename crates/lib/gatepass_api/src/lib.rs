//! # gatepass_api
//!
//! HTTP API library for Gatepass.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;

use axum::Router;
use axum::routing::{delete, get, post};
use gatepass_core::GateEngine;
use tower_http::cors::{Any, CorsLayer};

use crate::config::ApiConfig;
use crate::handlers::{admin, events, gate, health, passes, students, tokens};

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Gate-pass engine over the configured store.
    pub engine: GateEngine,
    /// API configuration.
    pub config: ApiConfig,
}

/// Builds the Axum router with all routes and shared state.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Public routes (no auth required)
    let public = Router::new().route(routes::GET_API_HEALTH, get(health::health));

    // Protected routes (require auth)
    let protected = Router::new()
        .route(
            routes::GET_STUDENTS_ME_STATUS,
            get(students::my_status_handler),
        )
        .route(
            routes::GET_STUDENTS_ID_STATUS,
            get(students::student_status_handler),
        )
        .route(
            routes::GET_STUDENTS_ID_ACTIVITY,
            get(students::activity_handler),
        )
        .route(routes::POST_PASSES_LOCAL, post(passes::apply_local_handler))
        .route(
            routes::POST_PASSES_OUTSTATION,
            post(passes::apply_outstation_handler),
        )
        .route(routes::GET_PASSES_MINE, get(passes::my_passes_handler))
        .route(routes::GET_PASSES_QUEUE, get(passes::review_queue_handler))
        .route(routes::GET_PASSES_ID, get(passes::get_pass_handler))
        .route(
            routes::POST_PASSES_ID_DECISION,
            post(passes::decide_stage_handler),
        )
        .route(routes::POST_TOKENS, post(tokens::issue_token_handler))
        .route(routes::DELETE_TOKENS_MINE, delete(tokens::cancel_token_handler))
        .route(routes::POST_GATE_REDEEM, post(gate::redeem_handler))
        .route(routes::POST_GATE_DECIDE, post(gate::decide_handler))
        .route(routes::POST_ADMIN_STUDENTS, post(admin::enroll_handler))
        .route(
            routes::ADMIN_STUDENTS_ID_BAN,
            post(admin::ban_handler).delete(admin::unban_handler),
        )
        .route(routes::GET_EVENTS, get(events::events_handler))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_auth,
        ));

    Router::new()
        .merge(public)
        .merge(protected)
        .layer(cors)
        .with_state(state)
}
