//! Rebuilds a room's history for late joiners.
//!
//! Both logs are merged and ordered by the client timestamp; equal
//! timestamps fall back to append order, so the result is deterministic.
//! Pacing playback from the timestamp deltas is left to the client.

use tracing::instrument;

use crate::error::{not_found, AppResult};
use crate::models::{EventLog, LoggedEvent, RoomEvent};
use crate::store::RoomStore;

#[instrument(skip(store))]
pub async fn replay(store: &RoomStore, room_id: &str) -> AppResult<Vec<RoomEvent>> {
    if store.room_header(room_id).await?.is_none() {
        return Err(not_found("class not found"));
    }
    let board = store.event_log(room_id, EventLog::Board).await?;
    let chat = store.event_log(room_id, EventLog::Chat).await?;
    Ok(merge(board, chat))
}

pub fn merge(board: Vec<LoggedEvent>, chat: Vec<LoggedEvent>) -> Vec<RoomEvent> {
    let mut all: Vec<LoggedEvent> = board.into_iter().chain(chat).collect();
    all.sort_by(|a, b| {
        a.event
            .timestamp()
            .cmp(&b.event.timestamp())
            .then(a.seq.cmp(&b.seq))
    });
    all.into_iter().map(|l| l.event).collect()
}
