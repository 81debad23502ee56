//! Server-sent event stream of deliberation and ledger events.
//!
//! Framing: `event: <name>\ndata: <json>\n\n`, with an `event: ping`
//! heartbeat every 15 seconds. A subscriber that falls behind its bounded
//! queue receives a final `slow_consumer` notice and is dropped; it may
//! reconnect and resume from current state.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, Sse};
use futures::future::ready;
use futures::stream::{self, Stream, StreamExt};
use serde_json::json;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::{BroadcastStream, IntervalStream};

use lib_deliberation::DeliberationEvent;
use lib_ledger::LedgerEvent;

use super::AppState;

const HEARTBEAT_SECS: u64 = 15;

fn ledger_event(event: LedgerEvent) -> Event {
    match event {
        LedgerEvent::Block { height, hash } => Event::default()
            .event("ledger.block")
            .data(json!({"height": height, "hash": hash}).to_string()),
        LedgerEvent::Tx { id, kind } => Event::default()
            .event("ledger.tx")
            .data(json!({"id": id, "type": kind.to_string()}).to_string()),
        LedgerEvent::Reorg {
            old_height,
            new_height,
            fork_height,
        } => Event::default().event("ledger.reorg").data(
            json!({
                "old_height": old_height,
                "new_height": new_height,
                "fork_height": fork_height,
            })
            .to_string(),
        ),
    }
}

fn deliberation_event(event: DeliberationEvent) -> Event {
    match event {
        DeliberationEvent::Started { proposal_id } => Event::default()
            .event("deliberation.started")
            .data(json!({"proposal_id": proposal_id}).to_string()),
        DeliberationEvent::Round {
            proposal_id,
            round_no,
            votes,
            score,
        } => Event::default().event("deliberation.round").data(
            json!({
                "proposal_id": proposal_id,
                "round_no": round_no,
                "votes": votes,
                "score": score,
            })
            .to_string(),
        ),
        DeliberationEvent::Refined { parent_id, child_id } => Event::default()
            .event("deliberation.refined")
            .data(json!({"parent_id": parent_id, "child_id": child_id}).to_string()),
        DeliberationEvent::Terminal {
            proposal_id,
            outcome,
            score,
        } => Event::default().event("deliberation.terminal").data(
            json!({
                "proposal_id": proposal_id,
                "outcome": outcome,
                "score": score,
            })
            .to_string(),
        ),
        DeliberationEvent::Error {
            proposal_id,
            kind,
            message,
        } => Event::default().event("deliberation.error").data(
            json!({
                "proposal_id": proposal_id,
                "kind": kind,
                "message": message,
            })
            .to_string(),
        ),
    }
}

fn slow_consumer(skipped: u64) -> Event {
    Event::default()
        .event("slow_consumer")
        .data(json!({"skipped": skipped}).to_string())
}

/// Fold a broadcast stream into SSE events, ending the stream after a lag
/// notice (the subscriber is dropped and must reconnect).
fn event_stream<T, F>(
    receiver: tokio::sync::broadcast::Receiver<T>,
    to_event: F,
) -> impl Stream<Item = Result<Event, Infallible>>
where
    T: Clone + Send + 'static,
    F: Fn(T) -> Event + Send + 'static,
{
    BroadcastStream::new(receiver).scan(false, move |dropped, item| {
        if *dropped {
            return ready(None);
        }
        let event = match item {
            Ok(event) => to_event(event),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                *dropped = true;
                slow_consumer(skipped)
            }
        };
        ready(Some(Ok(event)))
    })
}

/// `GET /api/events`
pub async fn events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let ledger = event_stream(state.ledger_events.subscribe(), ledger_event);
    let deliberation = event_stream(state.deliberation_events.subscribe(), deliberation_event);
    let heartbeat =
        IntervalStream::new(tokio::time::interval(Duration::from_secs(HEARTBEAT_SECS)))
            .map(|_| Ok(Event::default().event("ping").data("{}")));

    let merged = stream::select(stream::select(ledger, deliberation), heartbeat);
    Sse::new(merged)
}
