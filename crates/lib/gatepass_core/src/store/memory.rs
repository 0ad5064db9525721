//! In-memory backend.
//!
//! State is sharded per student in a `DashMap`; a write locks only that
//! student's shard. No shard reference is held across an `.await`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use uuid::Uuid;

use super::{CommitOutcome, DecisionCommit, GateStore, IssueOutcome, StoreError, StoreResult};
use crate::models::Direction;
use crate::models::audit::AuditEntry;
use crate::models::pass::{FinalStatus, GatePass, Stage};
use crate::models::student::{Student, StudentProfile};
use crate::models::token::{ConsumedReason, QrToken};

/// All state owned by one student.
#[derive(Debug)]
struct Shard {
    student: Student,
    passes: Vec<GatePass>,
    tokens: Vec<QrToken>,
    audit: Vec<AuditEntry>,
}

impl Shard {
    /// Retire live tokens that are unscanned, or scanned for a direction other
    /// than `keep_scanned` (those can no longer be approved).
    fn supersede(&mut self, now: DateTime<Utc>, keep_scanned: Direction) -> usize {
        let mut retired = 0;
        for token in self.tokens.iter_mut().filter(|t| {
            t.is_live(now) && (t.redeemed_at.is_none() || t.direction != keep_scanned)
        }) {
            token.consume(now, ConsumedReason::Superseded);
            retired += 1;
        }
        retired
    }
}

/// Process-local `GateStore`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    shards: DashMap<Uuid, Shard>,
    /// Pass id → owning student.
    pass_owner: DashMap<Uuid, Uuid>,
    /// Token secret hash → owning student.
    token_owner: DashMap<String, Uuid>,
    /// Token id → owning student.
    token_id_owner: DashMap<Uuid, Uuid>,
    /// Roll number → student holding it.
    roll_owner: DashMap<String, Uuid>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn owner_of_pass(&self, pass_id: Uuid) -> Option<Uuid> {
        self.pass_owner.get(&pass_id).map(|r| *r)
    }
}

#[async_trait]
impl GateStore for MemoryStore {
    async fn enroll_student(&self, profile: StudentProfile) -> StoreResult<Student> {
        // Claim the roll number first; the index guard is dropped before the
        // shard is locked.
        match self.roll_owner.entry(profile.roll_number.clone()) {
            Entry::Occupied(owner) if *owner.get() != profile.id => {
                return Err(StoreError::Duplicate(format!(
                    "roll number {}",
                    profile.roll_number
                )));
            }
            Entry::Occupied(_) => {}
            Entry::Vacant(slot) => {
                slot.insert(profile.id);
            }
        }

        let mut entry = self.shards.entry(profile.id).or_insert_with(|| Shard {
            student: Student::enrolled(profile.clone()),
            passes: Vec::new(),
            tokens: Vec::new(),
            audit: Vec::new(),
        });
        let student = &mut entry.student;
        if student.name != profile.name
            || student.roll_number != profile.roll_number
            || student.email != profile.email
            || student.photo_ref != profile.photo_ref
        {
            if student.roll_number != profile.roll_number {
                self.roll_owner
                    .remove_if(&student.roll_number, |_, owner| *owner == profile.id);
            }
            student.name = profile.name;
            student.roll_number = profile.roll_number;
            student.email = profile.email;
            student.photo_ref = profile.photo_ref;
            student.version += 1;
        }
        Ok(student.clone())
    }

    async fn get_student(&self, id: Uuid) -> StoreResult<Option<Student>> {
        Ok(self.shards.get(&id).map(|s| s.student.clone()))
    }

    async fn update_student(&self, student: &Student) -> StoreResult<bool> {
        let Some(mut shard) = self.shards.get_mut(&student.id) else {
            return Ok(false);
        };
        if shard.student.version != student.version {
            return Ok(false);
        }
        let mut next = student.clone();
        next.version += 1;
        shard.student = next;
        Ok(true)
    }

    async fn insert_pass(&self, pass: &GatePass, now: DateTime<Utc>) -> StoreResult<bool> {
        let Some(mut shard) = self.shards.get_mut(&pass.student_id) else {
            return Ok(false);
        };
        if shard.passes.iter().any(|p| p.is_open(now)) {
            return Ok(false);
        }
        shard.passes.push(pass.clone());
        self.pass_owner.insert(pass.id, pass.student_id);
        Ok(true)
    }

    async fn get_pass(&self, id: Uuid) -> StoreResult<Option<GatePass>> {
        let Some(owner) = self.owner_of_pass(id) else {
            return Ok(None);
        };
        Ok(self
            .shards
            .get(&owner)
            .and_then(|s| s.passes.iter().find(|p| p.id == id).cloned()))
    }

    async fn update_pass(&self, pass: &GatePass) -> StoreResult<bool> {
        let Some(owner) = self.owner_of_pass(pass.id) else {
            return Ok(false);
        };
        let Some(mut shard) = self.shards.get_mut(&owner) else {
            return Ok(false);
        };
        let Some(stored) = shard.passes.iter_mut().find(|p| p.id == pass.id) else {
            return Ok(false);
        };
        if stored.version != pass.version {
            return Ok(false);
        }
        let mut next = pass.clone();
        next.version += 1;
        *stored = next;
        Ok(true)
    }

    async fn passes_for_student(&self, student_id: Uuid) -> StoreResult<Vec<GatePass>> {
        let mut passes = self
            .shards
            .get(&student_id)
            .map(|s| s.passes.clone())
            .unwrap_or_default();
        passes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(passes)
    }

    async fn pending_passes(&self, stage: Stage) -> StoreResult<Vec<GatePass>> {
        let mut pending: Vec<GatePass> = self
            .shards
            .iter()
            .flat_map(|shard| {
                shard
                    .passes
                    .iter()
                    .filter(|p| {
                        p.final_status() == FinalStatus::Pending && p.current_stage() == Some(stage)
                    })
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(pending)
    }

    async fn issue_token(
        &self,
        token: &QrToken,
        student_version: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<IssueOutcome> {
        let Some(mut shard) = self.shards.get_mut(&token.student_id) else {
            return Ok(IssueOutcome::UnknownStudent);
        };
        if shard.student.version != student_version {
            return Ok(IssueOutcome::StudentChanged);
        }
        if shard
            .tokens
            .iter()
            .any(|t| t.is_under_review(now) && t.direction == token.direction)
        {
            return Ok(IssueOutcome::UnderReview);
        }
        let superseded = shard.supersede(now, token.direction);
        shard.tokens.push(token.clone());
        self.token_owner
            .insert(token.secret_hash.clone(), token.student_id);
        self.token_id_owner.insert(token.id, token.student_id);
        Ok(IssueOutcome::Issued { superseded })
    }

    async fn token_by_hash(&self, secret_hash: &str) -> StoreResult<Option<QrToken>> {
        let Some(owner) = self.token_owner.get(secret_hash).map(|r| *r) else {
            return Ok(None);
        };
        Ok(self.shards.get(&owner).and_then(|s| {
            s.tokens
                .iter()
                .find(|t| t.secret_hash == secret_hash)
                .cloned()
        }))
    }

    async fn mark_redeemed(&self, token_id: Uuid, at: DateTime<Utc>) -> StoreResult<bool> {
        let Some(owner) = self.token_id_owner.get(&token_id).map(|r| *r) else {
            return Ok(false);
        };
        let Some(mut shard) = self.shards.get_mut(&owner) else {
            return Ok(false);
        };
        match shard.tokens.iter_mut().find(|t| t.id == token_id) {
            Some(token) if !token.is_consumed() => {
                token.redeemed_at.get_or_insert(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn supersede_live_tokens(
        &self,
        student_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<usize> {
        Ok(self
            .shards
            .get_mut(&student_id)
            .map(|mut s| {
                let keep = s.student.next_action();
                s.supersede(now, keep)
            })
            .unwrap_or(0))
    }

    async fn live_tokens(
        &self,
        student_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<QrToken>> {
        Ok(self
            .shards
            .get(&student_id)
            .map(|s| s.tokens.iter().filter(|t| t.is_live(now)).cloned().collect())
            .unwrap_or_default())
    }

    async fn commit_decision(&self, commit: DecisionCommit) -> StoreResult<CommitOutcome> {
        let Some(mut guard) = self.shards.get_mut(&commit.student_id) else {
            return Ok(CommitOutcome::TokenMissing);
        };
        let shard = &mut *guard;

        let Some(token_idx) = shard.tokens.iter().position(|t| t.id == commit.token_id) else {
            return Ok(CommitOutcome::TokenMissing);
        };
        if shard.tokens[token_idx].is_consumed() {
            return Ok(CommitOutcome::TokenConsumed);
        }
        if shard.tokens[token_idx].redeemed_at.is_none() {
            return Ok(CommitOutcome::TokenNotScanned);
        }
        if let Some(next) = &commit.student
            && shard.student.version != next.version
        {
            return Ok(CommitOutcome::StudentChanged);
        }
        let pass_idx = match commit.utilize_pass {
            Some((pass_id, version)) => {
                match shard
                    .passes
                    .iter()
                    .position(|p| p.id == pass_id && p.version == version && !p.utilized)
                {
                    Some(idx) => Some(idx),
                    None => return Ok(CommitOutcome::PassChanged),
                }
            }
            None => None,
        };

        // All checks passed; apply every write.
        shard.tokens[token_idx].consume(commit.decided_at, commit.outcome.into());
        if let Some(mut next) = commit.student {
            next.version += 1;
            shard.student = next;
        }
        if let Some(idx) = pass_idx {
            let pass = &mut shard.passes[idx];
            pass.utilized = true;
            pass.version += 1;
        }
        shard.audit.push(commit.audit);
        Ok(CommitOutcome::Committed)
    }

    async fn audit_for_student(
        &self,
        student_id: Uuid,
        limit: usize,
    ) -> StoreResult<Vec<AuditEntry>> {
        Ok(self
            .shards
            .get(&student_id)
            .map(|s| s.audit.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}
