//! Notification stream over Server-Sent Events.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::stream::{self, Stream};
use gatepass_core::auth::Role;
use gatepass_core::notify::{Notification, Notifier};
use tokio::sync::broadcast::error::RecvError;

use crate::AppState;
use crate::middleware::auth::AuthenticatedUser;

/// `GET /events`: students get their own events; guards and admins get the
/// observer feed.
///
/// Delivery is best-effort. A client that falls behind loses the skipped
/// events and should re-read status.
pub async fn events_handler(
    State(state): State<AppState>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let actor = user.actor();
    let student = actor.student_id().ok();
    let observer = actor.has(Role::Guard) || actor.has(Role::Admin);
    let rx = state.engine.notifier.subscribe();

    let stream = stream::unfold(rx, move |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(notification) if notification.visible_to(student, observer) => {
                    return Some((Ok(to_event(&notification)), rx));
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    Notifier::note_lag(skipped);
                    return Some((Ok(Event::default().comment("lagged")), rx));
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

fn to_event(notification: &Notification) -> Event {
    let data = serde_json::to_string(notification).unwrap_or_default();
    Event::default()
        .event(notification.kind.as_str())
        .data(data)
}
