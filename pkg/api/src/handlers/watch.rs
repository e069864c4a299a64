use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
};
use serde::Deserialize;
use std::convert::Infallible;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};

use crate::AppState;
use pkg_state::watch::GrantDelta;

#[derive(Debug, Deserialize)]
pub struct GrantsQuery {
    /// Replay buffered deltas with a generation above this one.
    #[serde(default)]
    pub since: Option<u64>,
}

fn to_event(delta: &GrantDelta) -> Option<Event> {
    let data = serde_json::to_string(delta).ok()?;
    Some(
        Event::default()
            .event("grant")
            .id(delta.generation.to_string())
            .data(data),
    )
}

/// GET /api/v1/watch/grants: SSE stream of grant deltas.
pub async fn watch_grants(
    State(state): State<AppState>,
    Query(query): Query<GrantsQuery>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let since = query.since.unwrap_or(0);
    info!("Grant subscription from generation {}", since);

    // Subscribe before reading the buffer so nothing falls in between.
    let rx = state.deltas.subscribe();
    let buffered = state.deltas.since(since);
    let last_replayed = buffered.last().map(|d| d.generation).unwrap_or(since);

    let buffered_stream = tokio_stream::iter(
        buffered
            .into_iter()
            .filter_map(|d| to_event(&d))
            .map(Ok::<_, Infallible>),
    );

    let live_stream = BroadcastStream::new(rx).filter_map(move |result| match result {
        Ok(delta) if delta.generation > last_replayed => {
            to_event(&delta).map(Ok::<_, Infallible>)
        }
        Ok(_) => None,
        Err(e) => {
            warn!("Grant subscriber fell behind: {}", e);
            None
        }
    });

    Sse::new(buffered_stream.chain(live_stream)).keep_alive(KeepAlive::default())
}
