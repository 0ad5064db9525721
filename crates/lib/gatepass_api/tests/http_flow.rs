//! Integration tests: build the router over the in-memory store and drive
//! it with `oneshot` requests.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use chrono::{Duration, TimeZone, Utc};
use gatepass_api::{AppState, config::ApiConfig};
use gatepass_core::GateEngine;
use gatepass_core::auth::Role;
use gatepass_core::auth::jwt::generate_access_token;
use gatepass_core::clock::ManualClock;
use gatepass_core::config::EngineConfig;
use gatepass_core::store::MemoryStore;
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

const SECRET: &str = "test-secret";

struct TestApp {
    router: Router,
    clock: Arc<ManualClock>,
}

fn test_app() -> TestApp {
    // 08:30 campus time on 2026-03-01.
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 3, 1, 3, 0, 0).unwrap(),
    ));
    let engine = GateEngine::with_clock(
        Arc::new(MemoryStore::new()),
        clock.clone(),
        EngineConfig::default(),
    );
    let state = AppState {
        engine,
        config: ApiConfig {
            bind_addr: "127.0.0.1:0".into(),
            database_url: None,
            jwt_secret: SECRET.into(),
        },
    };
    TestApp {
        router: gatepass_api::router(state),
        clock,
    }
}

fn bearer(subject: &str, role: Role) -> String {
    generate_access_token(
        subject,
        &format!("{subject}@campus.test"),
        &[role],
        Duration::hours(1),
        SECRET.as_bytes(),
    )
    .unwrap()
}

async fn call(
    app: &TestApp,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        req = req.header("authorization", format!("Bearer {token}"));
    }
    let req = match body {
        Some(body) => req
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => req.body(Body::empty()).unwrap(),
    };
    let resp = app.router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

/// Enroll a student through the admin endpoint and return its id and token.
async fn enroll(app: &TestApp, roll: &str) -> (Uuid, String) {
    let admin = bearer("admin-1", Role::Admin);
    let (status, body) = call(
        app,
        Method::POST,
        "/admin/students",
        Some(&admin),
        Some(json!({
            "name": "Meera Iyer",
            "rollNumber": roll,
            "email": format!("{roll}@campus.test"),
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let id: Uuid = body["id"].as_str().unwrap().parse().unwrap();
    (id, bearer(&id.to_string(), Role::Student))
}

fn window() -> Value {
    json!({
        "dateOut": "2026-03-01",
        "timeOut": "09:00:00",
        "dateIn": "2026-03-03",
        "timeIn": "18:00:00",
    })
}

fn with_window(mut form: Value) -> Value {
    if let (Some(form), Some(window)) = (form.as_object_mut(), window().as_object()) {
        form.extend(window.clone());
    }
    form
}

#[tokio::test]
async fn health_is_public() {
    let app = test_app();
    let (status, body) = call(&app, Method::GET, "/api/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn protected_routes_require_bearer() {
    let app = test_app();
    let (status, body) = call(&app, Method::GET, "/students/me/status", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");

    let (status, _) = call(
        &app,
        Method::GET,
        "/students/me/status",
        Some("not-a-jwt"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn normal_exit_round_trip_over_http() {
    let app = test_app();
    let (student_id, student) = enroll(&app, "21EE011").await;
    let guard = bearer("guard-7", Role::Guard);

    let (status, body) = call(&app, Method::GET, "/students/me/status", Some(&student), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["presence"], "inside");
    assert_eq!(body["nextAction"], "exit");

    let (status, issued) = call(
        &app,
        Method::POST,
        "/tokens",
        Some(&student),
        Some(json!({"direction": "exit", "place": "Library annex", "purpose": "Books"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{issued}");
    let qr = issued["qrPayload"].as_str().unwrap().to_string();

    let (status, ctx) = call(
        &app,
        Method::POST,
        "/gate/redeem",
        Some(&guard),
        Some(json!({"token": qr})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{ctx}");
    assert_eq!(ctx["rollNumber"], "21EE011");
    assert_eq!(ctx["place"], "Library annex");

    let (status, receipt) = call(
        &app,
        Method::POST,
        "/gate/decide",
        Some(&guard),
        Some(json!({"token": qr, "outcome": "approve"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{receipt}");
    assert_eq!(receipt["presence"], "outside");

    let (status, again) = call(
        &app,
        Method::POST,
        "/gate/decide",
        Some(&guard),
        Some(json!({"token": qr, "outcome": "approve"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(again["error"], "already_used");

    let (status, body) = call(
        &app,
        Method::GET,
        &format!("/students/{student_id}/status"),
        Some(&guard),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["presence"], "outside");
    assert_eq!(body["outPlace"], "Library annex");

    let (status, log) = call(
        &app,
        Method::GET,
        &format!("/students/{student_id}/activity"),
        Some(&student),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(log.as_array().map(Vec::len), Some(1));
    assert_eq!(log[0]["guardId"], "guard-7");
}

#[tokio::test]
async fn wrong_direction_is_conflict() {
    let app = test_app();
    let (_, student) = enroll(&app, "21EE012").await;
    let (status, body) = call(
        &app,
        Method::POST,
        "/tokens",
        Some(&student),
        Some(json!({"direction": "entry"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "invalid_state");
}

#[tokio::test]
async fn half_declared_exit_is_rejected() {
    let app = test_app();
    let (_, student) = enroll(&app, "21EE013").await;
    let (status, body) = call(
        &app,
        Method::POST,
        "/tokens",
        Some(&student),
        Some(json!({"direction": "exit", "place": "Market"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");
}

#[tokio::test]
async fn students_cannot_use_the_gate_endpoints() {
    let app = test_app();
    let (_, student) = enroll(&app, "21EE014").await;
    let (_, issued) = call(
        &app,
        Method::POST,
        "/tokens",
        Some(&student),
        Some(json!({"direction": "exit", "place": "Market", "purpose": "Fruit"})),
    )
    .await;
    let (status, body) = call(
        &app,
        Method::POST,
        "/gate/redeem",
        Some(&student),
        Some(json!({"token": issued["token"]})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");
}

#[tokio::test]
async fn expired_token_is_gone() {
    let app = test_app();
    let (_, student) = enroll(&app, "21EE015").await;
    let guard = bearer("guard-1", Role::Guard);
    let (_, issued) = call(
        &app,
        Method::POST,
        "/tokens",
        Some(&student),
        Some(json!({"direction": "exit", "place": "Market", "purpose": "Fruit"})),
    )
    .await;
    app.clock.advance(Duration::minutes(10));

    let (status, body) = call(
        &app,
        Method::POST,
        "/gate/redeem",
        Some(&guard),
        Some(json!({"token": issued["token"]})),
    )
    .await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(body["error"], "expired");
}

#[tokio::test]
async fn banned_student_is_forbidden_until_unbanned() {
    let app = test_app();
    let (student_id, student) = enroll(&app, "21EE016").await;
    let admin = bearer("admin-1", Role::Admin);
    let ban_uri = format!("/admin/students/{student_id}/ban");

    let (status, body) = call(
        &app,
        Method::POST,
        &ban_uri,
        Some(&admin),
        Some(json!({"reason": "Curfew violation"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["isBanned"], true);
    assert_eq!(body["banReason"], "Curfew violation");

    let exit = json!({"direction": "exit", "place": "Market", "purpose": "Fruit"});
    let (status, _) = call(&app, Method::POST, "/tokens", Some(&student), Some(exit.clone())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = call(&app, Method::DELETE, &ban_uri, Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call(&app, Method::POST, "/tokens", Some(&student), Some(exit)).await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn only_admins_manage_the_directory() {
    let app = test_app();
    let guard = bearer("guard-1", Role::Guard);
    let (status, _) = call(
        &app,
        Method::POST,
        "/admin/students",
        Some(&guard),
        Some(json!({"name": "X", "rollNumber": "Y", "email": "z@campus.test"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn duplicate_roll_number_is_a_conflict() {
    let app = test_app();
    enroll(&app, "21EE022").await;
    let admin = bearer("admin-1", Role::Admin);
    let (status, body) = call(
        &app,
        Method::POST,
        "/admin/students",
        Some(&admin),
        Some(json!({"name": "Other", "rollNumber": "21EE022", "email": "other@campus.test"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");
}

#[tokio::test]
async fn decide_requires_a_prior_scan() {
    let app = test_app();
    let (student_id, student) = enroll(&app, "21EE023").await;
    let guard = bearer("guard-1", Role::Guard);
    let (_, issued) = call(
        &app,
        Method::POST,
        "/tokens",
        Some(&student),
        Some(json!({"direction": "exit", "place": "Market", "purpose": "Groceries"})),
    )
    .await;
    let qr = issued["qrPayload"].as_str().unwrap().to_string();

    let (status, body) = call(
        &app,
        Method::POST,
        "/gate/decide",
        Some(&guard),
        Some(json!({"token": qr, "outcome": "approve"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "invalid_state");

    let (_, body) = call(
        &app,
        Method::GET,
        &format!("/students/{student_id}/status"),
        Some(&guard),
        None,
    )
    .await;
    assert_eq!(body["presence"], "inside");
}

#[tokio::test]
async fn outstation_pass_review_and_exit() {
    let app = test_app();
    let (_, student) = enroll(&app, "21EE017").await;

    let (status, pass) = call(
        &app,
        Method::POST,
        "/passes/outstation",
        Some(&student),
        Some(with_window(json!({
            "leaveDays": 3,
            "address": "4 Temple St, Madurai",
            "natureOfLeave": "Personal",
            "reasonOfLeave": "Family function",
        }))),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{pass}");
    assert_eq!(pass["finalStatus"], "pending");
    assert_eq!(pass["currentStage"], "officeSecretary");
    let pass_id = pass["id"].as_str().unwrap().to_string();

    // Not yet approved: no exit token.
    let exit = json!({"direction": "exit", "gatePassId": pass_id});
    let (status, body) = call(&app, Method::POST, "/tokens", Some(&student), Some(exit.clone())).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "not_eligible");

    // HOD cannot jump the queue.
    let hod = bearer("hod-1", Role::Hod);
    let decision_uri = format!("/passes/{pass_id}/decision");
    let (status, _) = call(
        &app,
        Method::POST,
        &decision_uri,
        Some(&hod),
        Some(json!({"stage": "hod", "outcome": "approve"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let secretary = bearer("os-1", Role::OfficeSecretary);
    let (status, queue) = call(&app, Method::GET, "/passes/queue", Some(&secretary), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(queue[0]["id"], pass["id"]);

    for (role, stage) in [
        (Role::OfficeSecretary, "officeSecretary"),
        (Role::Dugc, "dugc"),
        (Role::Hod, "hod"),
    ] {
        let reviewer = bearer(&format!("{stage}-1"), role);
        let (status, body) = call(
            &app,
            Method::POST,
            &decision_uri,
            Some(&reviewer),
            Some(json!({"stage": stage, "outcome": "approve"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
    }

    let (status, mine) = call(&app, Method::GET, "/passes/mine", Some(&student), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(mine[0]["finalStatus"], "approved");
    assert_eq!(mine[0]["details"]["address"], "4 Temple St, Madurai");

    let (status, issued) = call(&app, Method::POST, "/tokens", Some(&student), Some(exit)).await;
    assert_eq!(status, StatusCode::CREATED, "{issued}");
    assert_eq!(issued["gatePassRef"], pass["id"]);
}

#[tokio::test]
async fn second_open_application_conflicts() {
    let app = test_app();
    let (_, student) = enroll(&app, "21EE018").await;
    let form = with_window(json!({"place": "Clinic", "purpose": "Check-up"}));
    let (status, _) = call(
        &app,
        Method::POST,
        "/passes/local",
        Some(&student),
        Some(form.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, body) = call(&app, Method::POST, "/passes/local", Some(&student), Some(form)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");
}

#[tokio::test]
async fn other_students_cannot_read_a_pass() {
    let app = test_app();
    let (_, owner) = enroll(&app, "21EE019").await;
    let (_, other) = enroll(&app, "21EE020").await;
    let (_, pass) = call(
        &app,
        Method::POST,
        "/passes/local",
        Some(&owner),
        Some(with_window(json!({"place": "Clinic", "purpose": "Check-up"}))),
    )
    .await;
    let uri = format!("/passes/{}", pass["id"].as_str().unwrap());

    let (status, _) = call(&app, Method::GET, &uri, Some(&owner), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call(&app, Method::GET, &uri, Some(&other), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn cancelling_retires_the_live_token() {
    let app = test_app();
    let (_, student) = enroll(&app, "21EE021").await;
    let guard = bearer("guard-1", Role::Guard);
    let (_, issued) = call(
        &app,
        Method::POST,
        "/tokens",
        Some(&student),
        Some(json!({"direction": "exit", "place": "Market", "purpose": "Fruit"})),
    )
    .await;

    let (status, body) = call(&app, Method::DELETE, "/tokens/mine", Some(&student), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cancelled"], 1);

    let (status, _) = call(
        &app,
        Method::POST,
        "/gate/redeem",
        Some(&guard),
        Some(json!({"token": issued["token"]})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}
