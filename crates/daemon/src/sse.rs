// SPDX-License-Identifier: MIT

//! The SSE boundary (spec §4.5, §6): `GET /events?projectId=<id-or-alias>`
//! merges the five event-bus channels, filtered to one project, with a
//! 15s heartbeat, and closes out the stream's logical interest once a
//! `settled` ("done") event for one of the project's issues arrives.

use crate::event_bus::EventBus;
use crate::project_scope::ProjectScope;
use axum::extract::{Query, State};
use axum::response::sse::{Event as SseEvent, Sse};
use bitk_core::Event;
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::{BroadcastStream, IntervalStream};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Deserialize)]
pub struct EventsQuery {
    #[serde(rename = "projectId")]
    project_id: String,
}

pub async fn events_handler(
    State(state): State<Arc<SseState>>,
    Query(query): Query<EventsQuery>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, (axum::http::StatusCode, String)> {
    let project_id = state
        .project_scope
        .resolve_ref(&query.project_id)
        .await
        .map_err(|e| {
            let status = axum::http::StatusCode::from_u16(e.status_code())
                .unwrap_or(axum::http::StatusCode::INTERNAL_SERVER_ERROR);
            (status, e.message())
        })?;

    let sub = state.event_bus.subscribe_all();
    let scope = Arc::clone(&state.project_scope);

    let channels = stream::select_all([
        BroadcastStream::new(sub.log).boxed(),
        BroadcastStream::new(sub.state).boxed(),
        BroadcastStream::new(sub.settled).boxed(),
        BroadcastStream::new(sub.issue_updated).boxed(),
        BroadcastStream::new(sub.changes_summary).boxed(),
    ])
    .filter_map(|item| async { item.ok() });

    let project_id_for_filter = project_id.clone();
    let filtered = channels
        .filter_map(move |event: Event| {
            let scope = Arc::clone(&scope);
            let project_id = project_id_for_filter.clone();
            async move {
                match scope.issue_in_project(event.issue_id(), &project_id).await {
                    Ok(true) => Some(event),
                    _ => None,
                }
            }
        })
        .map(|event| to_sse_event(&event));

    let heartbeat = IntervalStream::new(tokio::time::interval(HEARTBEAT_INTERVAL))
        .map(|_| Ok(SseEvent::default().comment("heartbeat")));

    let merged = tokio_stream::StreamExt::merge(filtered, heartbeat);
    Ok(Sse::new(merged))
}

fn to_sse_event(event: &Event) -> Result<SseEvent, Infallible> {
    let payload = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    Ok(SseEvent::default().event(event.sse_event_name()).data(payload))
}

pub struct SseState {
    pub event_bus: Arc<EventBus>,
    pub project_scope: Arc<ProjectScope<bitk_storage::SqliteStore>>,
}
