//! Shared document types stored behind the state store, plus the identifier
//! newtypes used across the crate.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// Identifier of a game session; doubles as the join code players type in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GameId(pub String);

impl GameId {
    /// Generate a fresh short join code.
    pub fn generate() -> Self {
        let id = Uuid::new_v4().simple().to_string();
        GameId(id[..8].to_owned())
    }
}

impl fmt::Display for GameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GameId {
    fn from(value: &str) -> Self {
        GameId(value.to_owned())
    }
}

/// Identifier of a user account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        UserId(value.to_owned())
    }
}

/// Game metadata document: membership, colors, missions, displayed cards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameDoc {
    /// Primary key of the game.
    pub id: GameId,
    /// Display title chosen at creation.
    #[serde(default)]
    pub title: String,
    /// User who created the game; the only one allowed to edit missions and
    /// start play.
    pub creator: UserId,
    /// Chosen color per player. At most one player per color.
    #[serde(default)]
    pub colors: IndexMap<UserId, String>,
    /// Joined players, in join order. Append-only, no duplicates.
    #[serde(default)]
    pub members: Vec<UserId>,
    /// Mission pool and per-player assignments.
    #[serde(default)]
    pub missions: MissionState,
    /// Even partition of the country pool across members, recomputed on join.
    #[serde(default)]
    pub initial_countries: IndexMap<UserId, Vec<String>>,
    /// Cards currently shown to everyone. At most one owner at a time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub displayed_cards: Option<DisplayedCards>,
    /// Whether the creator has started play.
    #[serde(default)]
    pub started: bool,
}

/// Mission pool plus assignments popped off it at join time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissionState {
    /// Missions still available for joining players.
    #[serde(default)]
    pub pool: Vec<String>,
    /// Mission handed to each member, immutable once assigned.
    #[serde(default)]
    pub assigned: IndexMap<UserId, String>,
}

/// The displayed-cards singleton: held by at most one player at a time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayedCards {
    /// Player currently showing cards.
    pub owner: UserId,
    /// The cards on display, in the order they were shown.
    #[serde(default)]
    pub list: Vec<DisplayedCard>,
}

/// One card on the shared display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayedCard {
    /// Face of the card.
    pub kind: CardKind,
    /// Where the card lives in the owner's hand.
    pub slot: CardSlot,
}

/// Face of a card: a troop card tag or the player's mission text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CardKind {
    /// Troop card type tag (0..=2).
    Troop(u8),
    /// Mission card carrying its text.
    Mission(String),
}

/// Position of a card within a hand: a numeric index or the mission card,
/// which lives outside the `cards` sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CardSlot {
    /// Index into the hand's card sequence.
    Hand(usize),
    /// The hand's single mission card.
    Mission,
}

impl Serialize for CardSlot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CardSlot::Hand(index) => serializer.serialize_u64(*index as u64),
            CardSlot::Mission => serializer.serialize_str("mission"),
        }
    }
}

impl<'de> Deserialize<'de> for CardSlot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Index(usize),
            Tag(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Index(index) => Ok(CardSlot::Hand(index)),
            Repr::Tag(tag) if tag == "mission" => Ok(CardSlot::Mission),
            Repr::Tag(tag) => Err(serde::de::Error::custom(format!(
                "unknown card slot `{tag}`"
            ))),
        }
    }
}

/// Board document: the countries and their army stacks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardDoc {
    /// Game this board belongs to.
    pub id: GameId,
    /// All countries on the board.
    #[serde(default)]
    pub countries: Vec<Country>,
}

/// One country and the armies standing on it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Country {
    /// Country name; unique on the board.
    pub name: String,
    /// Army stacks keyed by [`army_key`] of their color. An entry's amount is
    /// always positive; depleted stacks are removed, never stored at zero.
    #[serde(default)]
    pub armies: IndexMap<String, Army>,
}

/// A stack of armies of one color.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Army {
    /// Hex color of the owning player.
    pub color: String,
    /// Stack size, strictly positive.
    pub amount: u32,
}

/// One player's hand in one game.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandDoc {
    /// Game this hand belongs to.
    pub game: GameId,
    /// Owning player.
    pub player: UserId,
    /// Troop card tags, in draw order.
    #[serde(default)]
    pub cards: Vec<u8>,
    /// Mission assigned at join time, immutable thereafter.
    #[serde(default)]
    pub mission: String,
}

/// Roster profile of a user, read-only from this crate's point of view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDoc {
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Contact address, when the account carries one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Deterministic map key for an army entry, derived from its color.
///
/// Concurrent placements of the same color must land on the same entry on
/// every client, so the key keeps only the color's alphanumeric characters.
pub fn army_key(color: &str) -> String {
    color.chars().filter(char::is_ascii_alphanumeric).collect()
}
