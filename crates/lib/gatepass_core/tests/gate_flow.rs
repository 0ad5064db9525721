//! End-to-end engine scenarios against the in-memory store.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use gatepass_core::auth::Role;
use gatepass_core::clock::ManualClock;
use gatepass_core::config::EngineConfig;
use gatepass_core::identity::{self, Actor};
use gatepass_core::models::Direction;
use gatepass_core::models::Outcome;
use gatepass_core::models::audit::AuditEntry;
use gatepass_core::models::pass::{FinalStatus, GatePass, Stage};
use gatepass_core::models::student::{Excursion, Presence, Student, StudentProfile, Whereabouts};
use gatepass_core::models::token::QrToken;
use gatepass_core::notify::{Audience, NotificationKind};
use gatepass_core::passes::{self, LocalApplication, OutstationApplication, PlannedWindow};
use gatepass_core::store::{
    CommitOutcome, DecisionCommit, GateStore, IssueOutcome, MemoryStore, StoreResult,
};
use gatepass_core::tokens::{self, IssuedToken, TokenRequest};
use gatepass_core::{GateEngine, GateError, decision, presence};
use uuid::Uuid;

struct Harness {
    engine: GateEngine,
    store: Arc<MemoryStore>,
    clock: Arc<ManualClock>,
    guard: Actor,
    student_id: Uuid,
}

fn start() -> DateTime<Utc> {
    // 08:30 campus time.
    Utc.with_ymd_and_hms(2026, 3, 1, 3, 0, 0).unwrap()
}

async fn harness() -> Harness {
    harness_over(|store| store as Arc<dyn GateStore>).await
}

/// A harness whose engine talks to `wrap(store)` instead of the bare store.
async fn harness_over(wrap: impl FnOnce(Arc<MemoryStore>) -> Arc<dyn GateStore>) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(start()));
    let engine = GateEngine::with_clock(
        wrap(store.clone()),
        clock.clone(),
        EngineConfig::default(),
    );
    let student_id = Uuid::now_v7();
    identity::enroll(
        &engine,
        StudentProfile {
            id: student_id,
            name: "Asha Rao".into(),
            roll_number: "21CS042".into(),
            email: "asha@campus.test".into(),
            photo_ref: Some("photos/21CS042.jpg".into()),
        },
    )
    .await
    .unwrap();
    Harness {
        engine,
        store,
        clock,
        guard: Actor::new("guard-1", vec![Role::Guard]),
        student_id,
    }
}

/// A write that lands between a decision's reads and its commit.
enum Race {
    Student(Uuid),
    Pass(Uuid),
}

/// Delegates to a `MemoryStore`, applying one armed competing write right
/// before the next decision commit.
struct RacingStore {
    inner: Arc<MemoryStore>,
    armed: Mutex<Option<Race>>,
}

impl RacingStore {
    fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            armed: Mutex::new(None),
        }
    }

    fn arm(&self, race: Race) {
        *self.armed.lock().unwrap() = Some(race);
    }
}

#[async_trait]
impl GateStore for RacingStore {
    async fn enroll_student(&self, profile: StudentProfile) -> StoreResult<Student> {
        self.inner.enroll_student(profile).await
    }

    async fn get_student(&self, id: Uuid) -> StoreResult<Option<Student>> {
        self.inner.get_student(id).await
    }

    async fn update_student(&self, student: &Student) -> StoreResult<bool> {
        self.inner.update_student(student).await
    }

    async fn insert_pass(&self, pass: &GatePass, now: DateTime<Utc>) -> StoreResult<bool> {
        self.inner.insert_pass(pass, now).await
    }

    async fn get_pass(&self, id: Uuid) -> StoreResult<Option<GatePass>> {
        self.inner.get_pass(id).await
    }

    async fn update_pass(&self, pass: &GatePass) -> StoreResult<bool> {
        self.inner.update_pass(pass).await
    }

    async fn passes_for_student(&self, student_id: Uuid) -> StoreResult<Vec<GatePass>> {
        self.inner.passes_for_student(student_id).await
    }

    async fn pending_passes(&self, stage: Stage) -> StoreResult<Vec<GatePass>> {
        self.inner.pending_passes(stage).await
    }

    async fn issue_token(
        &self,
        token: &QrToken,
        student_version: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<IssueOutcome> {
        self.inner.issue_token(token, student_version, now).await
    }

    async fn token_by_hash(&self, secret_hash: &str) -> StoreResult<Option<QrToken>> {
        self.inner.token_by_hash(secret_hash).await
    }

    async fn mark_redeemed(&self, token_id: Uuid, at: DateTime<Utc>) -> StoreResult<bool> {
        self.inner.mark_redeemed(token_id, at).await
    }

    async fn supersede_live_tokens(
        &self,
        student_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<usize> {
        self.inner.supersede_live_tokens(student_id, now).await
    }

    async fn live_tokens(
        &self,
        student_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<QrToken>> {
        self.inner.live_tokens(student_id, now).await
    }

    async fn commit_decision(&self, commit: DecisionCommit) -> StoreResult<CommitOutcome> {
        let race = self.armed.lock().unwrap().take();
        match race {
            Some(Race::Student(id)) => {
                let student = self.inner.get_student(id).await?.unwrap();
                assert!(self.inner.update_student(&student).await?);
            }
            Some(Race::Pass(id)) => {
                let pass = self.inner.get_pass(id).await?.unwrap();
                assert!(self.inner.update_pass(&pass).await?);
            }
            None => {}
        }
        self.inner.commit_decision(commit).await
    }

    async fn audit_for_student(
        &self,
        student_id: Uuid,
        limit: usize,
    ) -> StoreResult<Vec<AuditEntry>> {
        self.inner.audit_for_student(student_id, limit).await
    }
}

async fn racing_harness() -> (Harness, Arc<RacingStore>) {
    let mut racing = None;
    let h = harness_over(|store| {
        let wrapped = Arc::new(RacingStore::new(store));
        racing = Some(wrapped.clone());
        wrapped as Arc<dyn GateStore>
    })
    .await;
    (h, racing.unwrap())
}

fn window() -> PlannedWindow {
    PlannedWindow {
        date_out: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
        time_out: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
        date_in: NaiveDate::from_ymd_opt(2026, 3, 3).unwrap(),
        time_in: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
    }
}

fn normal_exit() -> TokenRequest {
    TokenRequest {
        direction: Direction::Exit,
        gate_pass_id: None,
        place: Some("Market".into()),
        purpose: Some("Stationery".into()),
    }
}

fn entry() -> TokenRequest {
    TokenRequest {
        direction: Direction::Entry,
        gate_pass_id: None,
        place: None,
        purpose: None,
    }
}

fn exit_with(pass_id: Uuid) -> TokenRequest {
    TokenRequest {
        direction: Direction::Exit,
        gate_pass_id: Some(pass_id),
        place: None,
        purpose: None,
    }
}

async fn approved_outstation(h: &Harness) -> GatePass {
    let pass = passes::apply_outstation(
        &h.engine,
        h.student_id,
        OutstationApplication {
            leave_days: 3,
            address: "14 Lake View, Mysuru".into(),
            nature_of_leave: "Personal".into(),
            reason_of_leave: "Sister's wedding".into(),
            window: window(),
        },
    )
    .await
    .unwrap();
    for (stage, role) in [
        (Stage::OfficeSecretary, Role::OfficeSecretary),
        (Stage::Dugc, Role::Dugc),
        (Stage::Hod, Role::Hod),
    ] {
        let reviewer = Actor::new(format!("{stage}-1"), vec![role]);
        passes::decide(&h.engine, &reviewer, pass.id, Some(stage), Outcome::Approve)
            .await
            .unwrap();
    }
    passes::get_pass(&h.engine, pass.id).await.unwrap()
}

async fn pass_through(h: &Harness, issued: &IssuedToken) {
    tokens::redeem(&h.engine, &h.guard, &issued.qr_payload)
        .await
        .unwrap();
    decision::decide(&h.engine, &h.guard, &issued.token, Outcome::Approve)
        .await
        .unwrap();
}

async fn live_token_count(h: &Harness) -> usize {
    h.store
        .live_tokens(h.student_id, h.engine.now())
        .await
        .unwrap()
        .len()
}

#[tokio::test]
async fn normal_exit_and_return_round_trip() {
    let h = harness().await;

    let issued = tokens::issue(&h.engine, h.student_id, normal_exit())
        .await
        .unwrap();
    assert_eq!(issued.expires_at, start() + Duration::minutes(5));

    let ctx = tokens::redeem(&h.engine, &h.guard, &issued.qr_payload)
        .await
        .unwrap();
    assert_eq!(ctx.roll_number, "21CS042");
    assert_eq!(ctx.place.as_deref(), Some("Market"));
    assert!(ctx.gate_pass.is_none());

    let receipt = decision::decide(&h.engine, &h.guard, &issued.token, Outcome::Approve)
        .await
        .unwrap();
    assert_eq!(receipt.presence, Presence::Outside);

    let status = presence::get_status(&h.engine, h.student_id).await.unwrap();
    assert_eq!(status.presence, Presence::Outside);
    assert_eq!(status.next_action, Direction::Entry);
    assert_eq!(status.out_place.as_deref(), Some("Market"));
    assert_eq!(status.active_gate_pass_no, None);

    let back = tokens::issue(&h.engine, h.student_id, entry()).await.unwrap();
    pass_through(&h, &back).await;

    let status = presence::get_status(&h.engine, h.student_id).await.unwrap();
    assert_eq!(status.presence, Presence::Inside);
    assert_eq!(status.out_place, None);
    assert_eq!(status.out_time, None);

    let log = decision::activity(&h.engine, h.student_id, 10).await.unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].direction, Direction::Entry);
    assert_eq!(log[1].direction, Direction::Exit);
}

#[tokio::test]
async fn guard_rejection_keeps_student_inside() {
    let h = harness().await;
    let issued = tokens::issue(&h.engine, h.student_id, normal_exit())
        .await
        .unwrap();
    tokens::redeem(&h.engine, &h.guard, &issued.token)
        .await
        .unwrap();

    let receipt = decision::decide(&h.engine, &h.guard, &issued.token, Outcome::Reject)
        .await
        .unwrap();
    assert_eq!(receipt.presence, Presence::Inside);

    let status = presence::get_status(&h.engine, h.student_id).await.unwrap();
    assert_eq!(status.presence, Presence::Inside);
    assert_eq!(live_token_count(&h).await, 0);

    let again = tokens::redeem(&h.engine, &h.guard, &issued.token).await;
    assert!(matches!(again, Err(GateError::AlreadyUsed)));

    tokens::issue(&h.engine, h.student_id, normal_exit())
        .await
        .unwrap();
}

#[tokio::test]
async fn deciding_twice_applies_once() {
    let h = harness().await;
    let issued = tokens::issue(&h.engine, h.student_id, normal_exit())
        .await
        .unwrap();
    tokens::redeem(&h.engine, &h.guard, &issued.token)
        .await
        .unwrap();
    decision::decide(&h.engine, &h.guard, &issued.token, Outcome::Approve)
        .await
        .unwrap();
    let second = decision::decide(&h.engine, &h.guard, &issued.token, Outcome::Approve).await;
    assert!(matches!(second, Err(GateError::AlreadyUsed)));

    let status = presence::get_status(&h.engine, h.student_id).await.unwrap();
    assert_eq!(status.presence, Presence::Outside);
    assert_eq!(
        decision::activity(&h.engine, h.student_id, 10)
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn deciding_an_unscanned_token_is_refused() {
    let h = harness().await;
    let issued = tokens::issue(&h.engine, h.student_id, normal_exit())
        .await
        .unwrap();

    for outcome in [Outcome::Approve, Outcome::Reject] {
        let err = decision::decide(&h.engine, &h.guard, &issued.token, outcome)
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::InvalidState(_)));
    }

    let status = presence::get_status(&h.engine, h.student_id).await.unwrap();
    assert_eq!(status.presence, Presence::Inside);
    assert_eq!(live_token_count(&h).await, 1);
    assert!(
        decision::activity(&h.engine, h.student_id, 10)
            .await
            .unwrap()
            .is_empty()
    );

    // The same token still goes through once a guard scans it.
    pass_through(&h, &issued).await;
    let status = presence::get_status(&h.engine, h.student_id).await.unwrap();
    assert_eq!(status.presence, Presence::Outside);
}

#[tokio::test]
async fn presence_moved_after_scan_conflicts() {
    let h = harness().await;
    let issued = tokens::issue(&h.engine, h.student_id, normal_exit())
        .await
        .unwrap();
    tokens::redeem(&h.engine, &h.guard, &issued.token)
        .await
        .unwrap();

    let mut student = h.store.get_student(h.student_id).await.unwrap().unwrap();
    let elsewhere = Whereabouts::Outside(Excursion::Normal {
        place: "Library annex".into(),
        purpose: "Exam".into(),
        out_time: start(),
    });
    student.whereabouts = elsewhere.clone();
    assert!(h.store.update_student(&student).await.unwrap());

    let err = decision::decide(&h.engine, &h.guard, &issued.token, Outcome::Approve)
        .await
        .unwrap_err();
    assert!(matches!(err, GateError::Conflict(_)));

    let after = h.store.get_student(h.student_id).await.unwrap().unwrap();
    assert_eq!(after.whereabouts, elsewhere);
    assert_eq!(after.version, student.version + 1);
    let token = h
        .store
        .live_tokens(h.student_id, h.engine.now())
        .await
        .unwrap();
    assert_eq!(token.len(), 1);
    assert!(token[0].consumed_at.is_none());
}

#[tokio::test]
async fn student_write_between_read_and_commit_conflicts() {
    let (h, racing) = racing_harness().await;
    let issued = tokens::issue(&h.engine, h.student_id, normal_exit())
        .await
        .unwrap();
    tokens::redeem(&h.engine, &h.guard, &issued.token)
        .await
        .unwrap();
    let before = h.store.get_student(h.student_id).await.unwrap().unwrap();

    racing.arm(Race::Student(h.student_id));
    let err = decision::decide(&h.engine, &h.guard, &issued.token, Outcome::Approve)
        .await
        .unwrap_err();
    assert!(matches!(err, GateError::Conflict(_)));

    let after = h.store.get_student(h.student_id).await.unwrap().unwrap();
    assert_eq!(after.presence(), Presence::Inside);
    assert_eq!(after.version, before.version + 1);
    assert_eq!(live_token_count(&h).await, 1);
    assert!(
        decision::activity(&h.engine, h.student_id, 10)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn pass_write_between_read_and_commit_conflicts() {
    let (h, racing) = racing_harness().await;
    let pass = approved_outstation(&h).await;
    let out = tokens::issue(&h.engine, h.student_id, exit_with(pass.id))
        .await
        .unwrap();
    pass_through(&h, &out).await;

    let back = tokens::issue(&h.engine, h.student_id, entry()).await.unwrap();
    tokens::redeem(&h.engine, &h.guard, &back.token)
        .await
        .unwrap();

    racing.arm(Race::Pass(pass.id));
    let err = decision::decide(&h.engine, &h.guard, &back.token, Outcome::Approve)
        .await
        .unwrap_err();
    assert!(matches!(err, GateError::Conflict(_)));

    let status = presence::get_status(&h.engine, h.student_id).await.unwrap();
    assert_eq!(status.presence, Presence::Outside);
    assert_eq!(status.active_gate_pass_no, Some(pass.id));
    let after = passes::get_pass(&h.engine, pass.id).await.unwrap();
    assert!(!after.utilized);
    assert_eq!(after.version, pass.version + 1);
    assert_eq!(live_token_count(&h).await, 1);
}

#[tokio::test]
async fn reissuing_supersedes_the_previous_token() {
    let h = harness().await;
    let first = tokens::issue(&h.engine, h.student_id, normal_exit())
        .await
        .unwrap();
    let second = tokens::issue(&h.engine, h.student_id, normal_exit())
        .await
        .unwrap();
    assert_eq!(live_token_count(&h).await, 1);

    let stale = tokens::redeem(&h.engine, &h.guard, &first.token).await;
    assert!(matches!(stale, Err(GateError::AlreadyUsed)));
    tokens::redeem(&h.engine, &h.guard, &second.token)
        .await
        .unwrap();
}

#[tokio::test]
async fn scanned_token_blocks_reissue_until_decided() {
    let h = harness().await;
    let issued = tokens::issue(&h.engine, h.student_id, normal_exit())
        .await
        .unwrap();
    tokens::redeem(&h.engine, &h.guard, &issued.token)
        .await
        .unwrap();

    let blocked = tokens::issue(&h.engine, h.student_id, normal_exit()).await;
    assert!(matches!(blocked, Err(GateError::Conflict(_))));
    assert_eq!(tokens::cancel_own(&h.engine, h.student_id).await.unwrap(), 0);

    decision::decide(&h.engine, &h.guard, &issued.token, Outcome::Reject)
        .await
        .unwrap();
    tokens::issue(&h.engine, h.student_id, normal_exit())
        .await
        .unwrap();
}

#[tokio::test]
async fn cancelled_token_cannot_be_scanned() {
    let h = harness().await;
    let issued = tokens::issue(&h.engine, h.student_id, normal_exit())
        .await
        .unwrap();
    assert_eq!(tokens::cancel_own(&h.engine, h.student_id).await.unwrap(), 1);
    let scan = tokens::redeem(&h.engine, &h.guard, &issued.token).await;
    assert!(matches!(scan, Err(GateError::AlreadyUsed)));
}

#[tokio::test]
async fn expired_token_is_refused() {
    let h = harness().await;
    let issued = tokens::issue(&h.engine, h.student_id, normal_exit())
        .await
        .unwrap();
    h.clock.advance(Duration::minutes(6));

    let scan = tokens::redeem(&h.engine, &h.guard, &issued.token).await;
    assert!(matches!(scan, Err(GateError::Expired)));
    let decide = decision::decide(&h.engine, &h.guard, &issued.token, Outcome::Approve).await;
    assert!(matches!(decide, Err(GateError::Expired)));

    let status = presence::get_status(&h.engine, h.student_id).await.unwrap();
    assert_eq!(status.presence, Presence::Inside);
    tokens::issue(&h.engine, h.student_id, normal_exit())
        .await
        .unwrap();
}

#[tokio::test]
async fn wrong_direction_is_invalid_state() {
    let h = harness().await;
    let err = tokens::issue(&h.engine, h.student_id, entry())
        .await
        .unwrap_err();
    assert!(matches!(err, GateError::InvalidState(_)));
    assert_eq!(live_token_count(&h).await, 0);
}

#[tokio::test]
async fn unknown_scan_is_not_found() {
    let h = harness().await;
    let err = tokens::redeem(&h.engine, &h.guard, "not-a-token")
        .await
        .unwrap_err();
    assert!(matches!(err, GateError::NotFound(_)));
}

#[tokio::test]
async fn only_guards_scan_and_decide() {
    let h = harness().await;
    let issued = tokens::issue(&h.engine, h.student_id, normal_exit())
        .await
        .unwrap();
    let student = Actor::new(h.student_id.to_string(), vec![Role::Student]);
    assert!(matches!(
        tokens::redeem(&h.engine, &student, &issued.token).await,
        Err(GateError::Forbidden(_))
    ));
    assert!(matches!(
        decision::decide(&h.engine, &student, &issued.token, Outcome::Approve).await,
        Err(GateError::Forbidden(_))
    ));
}

#[tokio::test]
async fn banned_student_cannot_request_a_token() {
    let h = harness().await;
    let admin = Actor::new("admin-1", vec![Role::Admin]);
    identity::ban(&h.engine, h.student_id, "Curfew violation", &admin)
        .await
        .unwrap();

    let err = tokens::issue(&h.engine, h.student_id, normal_exit())
        .await
        .unwrap_err();
    assert!(matches!(err, GateError::Forbidden(_)));
    assert_eq!(live_token_count(&h).await, 0);
    let status = presence::get_status(&h.engine, h.student_id).await.unwrap();
    assert_eq!(status.presence, Presence::Inside);
    assert!(status.is_banned);

    identity::unban(&h.engine, h.student_id, &admin).await.unwrap();
    tokens::issue(&h.engine, h.student_id, normal_exit())
        .await
        .unwrap();
}

#[tokio::test]
async fn ban_does_not_revoke_an_issued_token() {
    let h = harness().await;
    let issued = tokens::issue(&h.engine, h.student_id, normal_exit())
        .await
        .unwrap();
    let admin = Actor::new("admin-1", vec![Role::Admin]);
    identity::ban(&h.engine, h.student_id, "Late return", &admin)
        .await
        .unwrap();

    tokens::redeem(&h.engine, &h.guard, &issued.token)
        .await
        .unwrap();
}

#[tokio::test]
async fn outstation_pass_exit_and_return_utilizes_once() {
    let h = harness().await;
    let pass = approved_outstation(&h).await;
    assert_eq!(pass.final_status(), FinalStatus::Approved);

    let out = tokens::issue(&h.engine, h.student_id, exit_with(pass.id))
        .await
        .unwrap();
    let ctx = tokens::redeem(&h.engine, &h.guard, &out.token)
        .await
        .unwrap();
    assert_eq!(ctx.gate_pass.as_ref().map(|p| p.id), Some(pass.id));
    decision::decide(&h.engine, &h.guard, &out.token, Outcome::Approve)
        .await
        .unwrap();

    let status = presence::get_status(&h.engine, h.student_id).await.unwrap();
    assert_eq!(status.active_gate_pass_no, Some(pass.id));
    assert_eq!(status.out_place, None);
    assert!(!passes::get_pass(&h.engine, pass.id).await.unwrap().utilized);

    // Returning well after the planned in-time is still allowed.
    h.clock.advance(Duration::days(5));
    let back = tokens::issue(&h.engine, h.student_id, entry()).await.unwrap();
    assert_eq!(back.gate_pass_ref, Some(pass.id));
    pass_through(&h, &back).await;

    let after = passes::get_pass(&h.engine, pass.id).await.unwrap();
    assert!(after.utilized);
    assert_eq!(after.version, pass.version + 1);
    let status = presence::get_status(&h.engine, h.student_id).await.unwrap();
    assert_eq!(status.presence, Presence::Inside);
    assert_eq!(status.active_gate_pass_no, None);

    let reuse = tokens::issue(&h.engine, h.student_id, exit_with(pass.id)).await;
    assert!(matches!(reuse, Err(GateError::NotEligible(_))));
}

#[tokio::test]
async fn hod_rejection_makes_pass_unusable() {
    let h = harness().await;
    let pass = passes::apply_outstation(
        &h.engine,
        h.student_id,
        OutstationApplication {
            leave_days: 2,
            address: "Home".into(),
            nature_of_leave: "Medical".into(),
            reason_of_leave: "Check-up".into(),
            window: window(),
        },
    )
    .await
    .unwrap();
    let os = Actor::new("os-1", vec![Role::OfficeSecretary]);
    let dugc = Actor::new("dugc-1", vec![Role::Dugc]);
    let hod = Actor::new("hod-1", vec![Role::Hod]);

    passes::decide(&h.engine, &os, pass.id, Some(Stage::OfficeSecretary), Outcome::Approve)
        .await
        .unwrap();
    passes::decide(&h.engine, &dugc, pass.id, Some(Stage::Dugc), Outcome::Approve)
        .await
        .unwrap();
    let rejected = passes::decide(&h.engine, &hod, pass.id, Some(Stage::Hod), Outcome::Reject)
        .await
        .unwrap();
    assert_eq!(rejected.final_status(), FinalStatus::Rejected);

    let err = tokens::issue(&h.engine, h.student_id, exit_with(pass.id))
        .await
        .unwrap_err();
    assert!(matches!(err, GateError::NotEligible(_)));

    let again = passes::decide(&h.engine, &hod, pass.id, Some(Stage::Hod), Outcome::Approve).await;
    assert!(matches!(again, Err(GateError::Conflict(_))));
}

#[tokio::test]
async fn stage_order_cannot_be_bypassed() {
    let h = harness().await;
    let pass = passes::apply_outstation(
        &h.engine,
        h.student_id,
        OutstationApplication {
            leave_days: 1,
            address: "Home".into(),
            nature_of_leave: "Personal".into(),
            reason_of_leave: "Festival".into(),
            window: window(),
        },
    )
    .await
    .unwrap();
    let hod = Actor::new("hod-1", vec![Role::Hod]);
    let err = passes::decide(&h.engine, &hod, pass.id, Some(Stage::Hod), Outcome::Approve)
        .await
        .unwrap_err();
    assert!(matches!(err, GateError::Forbidden(_)));

    // Holding the HOD role does not allow deciding the secretary's stage.
    let err = passes::decide(
        &h.engine,
        &hod,
        pass.id,
        Some(Stage::OfficeSecretary),
        Outcome::Approve,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, GateError::Forbidden(_)));

    let stored = passes::get_pass(&h.engine, pass.id).await.unwrap();
    assert_eq!(stored.current_stage(), Some(Stage::OfficeSecretary));
    assert_eq!(stored.final_status(), FinalStatus::Pending);
}

#[tokio::test]
async fn local_pass_flow_and_review_queue() {
    let h = harness().await;
    let pass = passes::apply_local(
        &h.engine,
        h.student_id,
        LocalApplication {
            place: "City hospital".into(),
            purpose: "Dentist".into(),
            window: window(),
        },
    )
    .await
    .unwrap();

    let warden = Actor::new("warden-1", vec![Role::HostelOffice]);
    let queue = passes::review_queue(&h.engine, &warden).await.unwrap();
    assert_eq!(queue.iter().map(|p| p.id).collect::<Vec<_>>(), vec![pass.id]);

    let hod = Actor::new("hod-1", vec![Role::Hod]);
    assert!(passes::review_queue(&h.engine, &hod).await.unwrap().is_empty());

    passes::decide(&h.engine, &warden, pass.id, None, Outcome::Approve)
        .await
        .unwrap();
    assert!(passes::review_queue(&h.engine, &warden).await.unwrap().is_empty());

    let out = tokens::issue(&h.engine, h.student_id, exit_with(pass.id))
        .await
        .unwrap();
    pass_through(&h, &out).await;
    let status = presence::get_status(&h.engine, h.student_id).await.unwrap();
    assert_eq!(status.active_gate_pass_no, Some(pass.id));
}

#[tokio::test]
async fn approved_pass_expires_for_exit() {
    let h = harness().await;
    let pass = approved_outstation(&h).await;
    h.clock.set(pass.planned_in + Duration::minutes(1));
    let err = tokens::issue(&h.engine, h.student_id, exit_with(pass.id))
        .await
        .unwrap_err();
    assert!(matches!(err, GateError::NotEligible(_)));
    assert!(pass.summary(h.engine.now()).expired);
}

#[tokio::test]
async fn only_one_open_application() {
    let h = harness().await;
    let form = LocalApplication {
        place: "Town".into(),
        purpose: "Bank".into(),
        window: window(),
    };
    passes::apply_local(&h.engine, h.student_id, form.clone())
        .await
        .unwrap();
    let err = passes::apply_local(&h.engine, h.student_id, form)
        .await
        .unwrap_err();
    assert!(matches!(err, GateError::Conflict(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_guard_decisions_have_one_winner() {
    let h = harness().await;
    let issued = tokens::issue(&h.engine, h.student_id, normal_exit())
        .await
        .unwrap();
    tokens::redeem(&h.engine, &h.guard, &issued.token)
        .await
        .unwrap();

    let tasks: Vec<_> = (0..2)
        .map(|i| {
            let engine = h.engine.clone();
            let token = issued.token.clone();
            tokio::spawn(async move {
                let guard = Actor::new(format!("guard-{i}"), vec![Role::Guard]);
                decision::decide(&engine, &guard, &token, Outcome::Approve).await
            })
        })
        .collect();
    let results = futures::future::join_all(tasks).await;

    let mut wins = 0;
    let mut already_used = 0;
    for result in results {
        match result.unwrap() {
            Ok(_) => wins += 1,
            Err(GateError::AlreadyUsed) => already_used += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!((wins, already_used), (1, 1));
    let status = presence::get_status(&h.engine, h.student_id).await.unwrap();
    assert_eq!(status.presence, Presence::Outside);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_issuance_leaves_one_live_token() {
    let h = harness().await;
    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let engine = h.engine.clone();
            let student_id = h.student_id;
            tokio::spawn(async move { tokens::issue(&engine, student_id, normal_exit()).await })
        })
        .collect();
    for result in futures::future::join_all(tasks).await {
        result.unwrap().unwrap();
    }
    assert_eq!(live_token_count(&h).await, 1);
}

#[tokio::test]
async fn decisions_are_pushed_to_student_and_observers() {
    let h = harness().await;
    let mut rx = h.engine.notifier.subscribe();
    let issued = tokens::issue(&h.engine, h.student_id, normal_exit())
        .await
        .unwrap();
    tokens::redeem(&h.engine, &h.guard, &issued.token)
        .await
        .unwrap();
    decision::decide(&h.engine, &h.guard, &issued.token, Outcome::Approve)
        .await
        .unwrap();

    let to_student = rx.recv().await.unwrap();
    let to_observers = rx.recv().await.unwrap();
    assert_eq!(to_student.audience, Audience::Student(h.student_id));
    assert_eq!(to_student.kind, NotificationKind::Decision);
    assert_eq!(to_student.payload["receipt"]["presence"], "outside");
    assert_eq!(to_observers.audience, Audience::Observers);
}

#[tokio::test]
async fn outside_state_has_exactly_one_backing() {
    let h = harness().await;
    let issued = tokens::issue(&h.engine, h.student_id, normal_exit())
        .await
        .unwrap();
    pass_through(&h, &issued).await;
    let status = presence::get_status(&h.engine, h.student_id).await.unwrap();
    let by_pass = status.active_gate_pass_no.is_some();
    let by_declaration = status.out_place.is_some() && status.out_purpose.is_some();
    assert!(by_pass ^ by_declaration);
}
