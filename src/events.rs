//! TTL event log: transient notifications broadcast between clients.
//!
//! Entries carry server-normalized timestamps and expire after a fixed TTL;
//! every append prunes expired entries first, so a quiet log never grows.

use serde::{Deserialize, Serialize};

use crate::model::{CardKind, UserId};

/// How long a pushed notification stays visible to other clients.
pub const EVENT_TTL_MS: i64 = 7_500;

/// Notification codes appended to the shared event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogCode {
    /// A player picked or changed their color.
    ChangeColor,
    /// A player drew a troop card.
    TakeCard,
    /// A player threw a random card away.
    ThrowCard,
    /// A player put a card on the shared display.
    DisplayCard,
    /// A player took a displayed card back into their hand.
    HideCard,
    /// A player discarded their displayed cards.
    DiscardCards,
    /// A player dropped a lifted army stack on the discard zone.
    DiscardArmy,
}

/// Payload attached to a log entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventContent {
    /// Display name of the acting player.
    #[serde(default)]
    pub user: String,
    /// Card face involved, when the notification concerns a single card.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card: Option<CardKind>,
    /// Card tags involved, for bulk discards.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cards: Option<Vec<u8>>,
    /// Army count involved, for discarded stacks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<u32>,
}

/// One entry of the TTL event log. Timestamps are server-time milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEntry {
    /// Server time the entry was appended at.
    pub timestamp: i64,
    /// Server time the entry stops being visible; always `timestamp` plus
    /// [`EVENT_TTL_MS`].
    pub expire: i64,
    /// What happened.
    pub code: LogCode,
    /// Acting player.
    pub user_id: UserId,
    /// Notification payload.
    pub content: EventContent,
}

impl EventEntry {
    /// Whether this entry is still visible at `now` (server time). An entry
    /// whose expiry has been reached is treated as absent.
    pub fn visible_at(&self, now: i64) -> bool {
        self.expire > now
    }
}

/// Drop every entry whose TTL has elapsed at `now`.
pub fn prune_expired(entries: Vec<EventEntry>, now: i64) -> Vec<EventEntry> {
    entries
        .into_iter()
        .filter(|entry| entry.visible_at(now))
        .collect()
}

/// Prune, then append a fresh entry stamped at `now`.
pub fn appended(
    entries: Vec<EventEntry>,
    now: i64,
    code: LogCode,
    user_id: UserId,
    content: EventContent,
) -> Vec<EventEntry> {
    let mut entries = prune_expired(entries, now);
    entries.push(EventEntry {
        timestamp: now,
        expire: now + EVENT_TTL_MS,
        code,
        user_id,
        content,
    });
    entries
}
