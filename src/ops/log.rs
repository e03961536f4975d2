//! Appends to the shared TTL event log.

use std::sync::Arc;

use crate::SyncError;
use crate::clock::Clock;
use crate::events::{self, EventContent, EventEntry, LogCode};
use crate::model::{GameId, UserId};
use crate::store::{DocKey, StateStore};

use super::transact_doc;

/// Append a notification to the game's event log.
///
/// The mutator prunes expired entries before appending, so a quiet log never
/// grows; timestamps are server-normalized through `clock`.
pub async fn push_to_log(
    store: &Arc<dyn StateStore>,
    clock: &Clock,
    game: &GameId,
    user: &UserId,
    code: LogCode,
    content: EventContent,
) -> Result<(), SyncError> {
    let now = clock.now_server_ms();
    let user = user.clone();
    transact_doc::<Vec<EventEntry>, _>(store, DocKey::EventLog(game.clone()), move |entries| {
        Some(events::appended(
            entries.unwrap_or_default(),
            now,
            code,
            user.clone(),
            content.clone(),
        ))
    })
    .await?;
    Ok(())
}
