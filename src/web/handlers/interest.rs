// GET /api/interest — one-off `{ "interested": n }`.
// GET /api/interest/stream — live counter over SSE.
//
// Each stream connection mounts its own counter and unmounts it when the
// client disconnects (the stream, and with it the counter, is dropped).

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures::stream::{self, Stream};

use crate::counter::{current_interest, CounterOptions, InterestCounter};
use crate::web::AppState;

/// How long the first SSE event waits for the initial count before sending
/// the baseline.
const FIRST_EVENT_WAIT: Duration = Duration::from_secs(1);

/// SSE event name carrying the counter value.
pub const INTEREST_EVENT: &str = "interested";

pub async fn get_interest(State(state): State<AppState>) -> impl IntoResponse {
    let interested = current_interest(state.log.as_ref(), state.config.interest_offset).await;
    Json(serde_json::json!({ "interested": interested }))
}

pub async fn stream_interest(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let counter = InterestCounter::mount(
        Arc::clone(&state.log),
        CounterOptions::from_config(&state.config),
    );
    let rx = counter.watch();

    let events = stream::unfold((counter, rx, true), |(counter, mut rx, first)| async move {
        if first {
            // Past the deadline the baseline goes out and the real count
            // follows as a change.
            let _ = tokio::time::timeout(FIRST_EVENT_WAIT, counter.ready()).await;
        } else {
            // The counter holds the sender, so this only ends with the stream.
            rx.changed().await.ok()?;
        }
        let value = *rx.borrow_and_update();
        let event = Event::default()
            .event(INTEREST_EVENT)
            .data(value.to_string());
        Some((Ok::<_, Infallible>(event), (counter, rx, false)))
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}
