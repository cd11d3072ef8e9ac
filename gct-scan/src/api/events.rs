//! Server-Sent Events stream of scan and offline-sync events

use crate::AppState;
use axum::{
    extract::State,
    response::sse::{Event, Sse},
    routing::get,
    Router,
};
use futures::stream::Stream;
use std::convert::Infallible;

/// GET /events
///
/// Streams `ScanRecorded`, `OfflineScanQueued` and `OfflineSyncCompleted`.
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    gct_common::sse::create_event_sse_stream("gct-scan", &state.event_bus)
}

pub fn event_routes() -> Router<AppState> {
    Router::new().route("/events", get(event_stream))
}
