//! Best-effort notification fan-out.
//!
//! Every committed state change publishes one event to the affected student
//! and one to observers. Delivery is at-most-once; receivers that lag or are
//! absent simply miss events and reconcile through a status read.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

/// Who an event is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "to", content = "studentId", rename_all = "camelCase")]
pub enum Audience {
    Student(Uuid),
    Observers,
}

/// Event category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    /// Outcome of a guard decision.
    Decision,
    /// Any other committed change: stage decisions, applications, bans.
    Activity,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Decision => "decision",
            NotificationKind::Activity => "activity",
        }
    }
}

/// One pushed event.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub audience: Audience,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub payload: serde_json::Value,
}

/// Broadcast hub for notifications.
#[derive(Debug, Clone)]
pub struct Notifier {
    sender: broadcast::Sender<Notification>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    /// Publish the student-addressed and the observer copy of an event.
    pub fn publish(&self, student_id: Uuid, kind: NotificationKind, payload: serde_json::Value) {
        for audience in [Audience::Student(student_id), Audience::Observers] {
            let event = Notification {
                audience,
                kind,
                payload: payload.clone(),
            };
            // No subscribers is not a failure; the records remain authoritative.
            if self.sender.send(event).is_err() {
                debug!(%student_id, "no live notification subscribers");
                return;
            }
        }
    }

    /// Log and skip a lagged receiver.
    pub fn note_lag(skipped: u64) {
        warn!(skipped, "notification receiver lagged; events dropped");
    }
}

impl Notification {
    /// Whether an observer or the given student should see this event.
    pub fn visible_to(&self, student: Option<Uuid>, observer: bool) -> bool {
        match self.audience {
            Audience::Observers => observer,
            Audience::Student(id) => student == Some(id),
        }
    }
}
