//! Server-Sent Events (SSE) handler.
//!
//! Subscribes to the [`lc_core::events::EventBus`], optionally filters by
//! kind, replays recent events for late joiners, and sends keepalive
//! heartbeats. Streams end when the server starts shutting down.

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use serde::Deserialize;
use std::convert::Infallible;
use std::time::Duration;

use lc_core::events::EventPayload;

use crate::context::AppContext;

/// Optional query parameter for kind filtering.
#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    /// "log" for encoder output only, "lifecycle" for state changes only.
    pub kind: Option<String>,
}

/// GET /api/events -- SSE stream of log lines and stream lifecycle events.
pub async fn events_handler(
    State(ctx): State<AppContext>,
    Query(params): Query<EventsQuery>,
) -> Sse<impl futures_core::Stream<Item = Result<Event, Infallible>>> {
    let kind_filter = params.kind;
    let shutdown = ctx.shutdown.clone();

    // Replay recent events for late joiners.
    let recent = ctx.event_bus.recent_events(50);
    let mut rx = ctx.event_bus.subscribe();

    let stream = async_stream::stream! {
        for event in recent.into_iter().rev() {
            if matches_kind(&event.payload, &kind_filter) {
                if let Ok(data) = serde_json::to_string(&event) {
                    yield Ok(Event::default().data(data));
                }
            }
        }

        let mut heartbeat = tokio::time::interval(Duration::from_secs(15));

        loop {
            tokio::select! {
                result = rx.recv() => {
                    match result {
                        Ok(event) => {
                            if matches_kind(&event.payload, &kind_filter) {
                                if let Ok(data) = serde_json::to_string(&event) {
                                    yield Ok(Event::default().data(data));
                                }
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            tracing::debug!("SSE client lagged by {n} events");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                            break;
                        }
                    }
                }
                _ = shutdown.cancelled() => {
                    break;
                }
                _ = heartbeat.tick() => {
                    yield Ok(Event::default()
                        .event("heartbeat")
                        .data(r#"{"type":"heartbeat"}"#));
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

fn matches_kind(payload: &EventPayload, filter: &Option<String>) -> bool {
    let Some(ref f) = filter else {
        return true;
    };
    let is_log = matches!(payload, EventPayload::StreamLog { .. });
    match f.as_str() {
        "log" => is_log,
        "lifecycle" => !is_log,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lc_core::events::{LogBuffer, LogSource};
    use lc_core::RunId;

    #[test]
    fn kind_filter() {
        let mut buf = LogBuffer::new(4);
        let log = EventPayload::StreamLog {
            line: buf.push(None, LogSource::Stderr, "frame=1"),
        };
        let stopped = EventPayload::StreamStopped { run_id: RunId::new() };

        assert!(matches_kind(&log, &None));
        assert!(matches_kind(&log, &Some("log".into())));
        assert!(!matches_kind(&stopped, &Some("log".into())));
        assert!(matches_kind(&stopped, &Some("lifecycle".into())));
        assert!(!matches_kind(&log, &Some("lifecycle".into())));
        assert!(matches_kind(&stopped, &Some("other".into())));
    }
}
