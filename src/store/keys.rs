use std::fmt;

use crate::model::{GameId, UserId};

/// Typed address of one independently-transacted document.
///
/// The rendered form is the store's logical keyspace; two keys compare equal
/// exactly when they render to the same path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DocKey {
    /// Game metadata: membership, colors, missions, displayed cards.
    Game(GameId),
    /// Board state: countries and their army stacks.
    Board(GameId),
    /// One player's hand in one game.
    Hand(GameId, UserId),
    /// TTL event log of a game.
    EventLog(GameId),
    /// Roster profile of a user.
    User(UserId),
    /// Presence flag of one player in one game.
    Presence(GameId, UserId),
}

impl fmt::Display for DocKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocKey::Game(game) => write!(f, "game/{game}"),
            DocKey::Board(game) => write!(f, "board/{game}"),
            DocKey::Hand(game, user) => write!(f, "hand/{game}/{user}"),
            DocKey::EventLog(game) => write!(f, "eventlog/{game}"),
            DocKey::User(user) => write!(f, "user/{user}"),
            DocKey::Presence(game, user) => write!(f, "presence/{game}/{user}"),
        }
    }
}
