//! Fold of the subscribed documents into one renderable view.
//!
//! The projector subscribes to the game, board, own-hand and event-log
//! documents, plus the user and presence documents of every member
//! (resubscribing as the member list changes), and recomputes a
//! default-filled [`GameView`] on every underlying change. Expired log
//! entries are filtered out at projection time, and the view re-emits when
//! the nearest expiry passes.

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::BoxStream;
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, sleep_until};
use tokio_stream::{StreamExt, StreamMap};
use tracing::debug;

use crate::clock::Clock;
use crate::events::EventEntry;
use crate::model::{BoardDoc, DisplayedCards, GameDoc, GameId, HandDoc, MissionState, UserDoc, UserId};
use crate::store::{DocKey, StateStore};

/// One army stack, flattened for rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArmyView {
    /// Army entry key (color-derived).
    pub id: String,
    /// Stack color.
    pub color: String,
    /// Stack size.
    pub amount: u32,
}

/// One country with its stacks listed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountryView {
    /// Country name.
    pub name: String,
    /// Stacks standing on the country, in insertion order.
    pub armies: Vec<ArmyView>,
}

/// A roster member joined with color and presence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserView {
    /// Member id.
    pub id: UserId,
    /// Display name from the roster document; empty while unknown.
    pub name: String,
    /// Chosen color, if any.
    pub color: Option<String>,
    /// Presence flag; false while unknown.
    pub online: bool,
}

/// The player's own hand, default-filled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandView {
    /// Troop card tags, in draw order.
    pub cards: Vec<u8>,
    /// Mission assigned at join time.
    pub mission: String,
}

/// Normalized, default-filled view of the whole session.
///
/// Consumers treat each emission as immutable; every recompute produces a
/// fresh value. Missing documents become empty collections, never absent
/// fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GameView {
    /// Game id (join code).
    pub id: GameId,
    /// Game title.
    pub title: String,
    /// Creating user.
    pub creator: UserId,
    /// Whether play has started.
    pub started: bool,
    /// Chosen color per member.
    pub colors: IndexMap<UserId, String>,
    /// Joined members, in join order.
    pub members: Vec<UserId>,
    /// Mission pool and assignments.
    pub missions: MissionState,
    /// Country partition handed out at join time.
    pub initial_countries: IndexMap<UserId, Vec<String>>,
    /// The displayed-cards singleton, if held.
    pub displayed_cards: Option<DisplayedCards>,
    /// Countries with their stacks flattened for rendering.
    pub countries: Vec<CountryView>,
    /// Members joined with roster names, colors and presence.
    pub users: Vec<UserView>,
    /// Presence flag per member.
    pub status: IndexMap<UserId, bool>,
    /// Visible log entries, timestamps localized to this client's clock.
    pub events: Vec<EventEntry>,
    /// The player's own hand.
    pub hand: HandView,
}

/// Raw documents the fold runs over.
#[derive(Debug, Clone, Default)]
struct Inputs {
    game: Option<GameDoc>,
    board: Option<BoardDoc>,
    hand: Option<HandDoc>,
    events: Option<Vec<EventEntry>>,
    users: HashMap<UserId, UserDoc>,
    presence: HashMap<UserId, bool>,
}

impl GameView {
    /// Pure fold: merge the raw documents with defaults and filter the event
    /// log down to entries visible at `now_server_ms`.
    fn project(inputs: &Inputs, game_id: &GameId, now_server_ms: i64, offset_ms: i64) -> GameView {
        let game = inputs.game.clone().unwrap_or_default();
        let board = inputs.board.clone().unwrap_or_default();
        let hand = inputs.hand.clone().unwrap_or_default();

        let countries = board
            .countries
            .iter()
            .map(|country| CountryView {
                name: country.name.clone(),
                armies: country
                    .armies
                    .iter()
                    .map(|(id, army)| ArmyView {
                        id: id.clone(),
                        color: army.color.clone(),
                        amount: army.amount,
                    })
                    .collect(),
            })
            .collect();

        let users = game
            .members
            .iter()
            .map(|member| UserView {
                id: member.clone(),
                name: inputs
                    .users
                    .get(member)
                    .map(|user| user.name.clone())
                    .unwrap_or_default(),
                color: game.colors.get(member).cloned(),
                online: inputs.presence.get(member).copied().unwrap_or(false),
            })
            .collect();

        let status = game
            .members
            .iter()
            .map(|member| {
                (
                    member.clone(),
                    inputs.presence.get(member).copied().unwrap_or(false),
                )
            })
            .collect();

        let events = inputs
            .events
            .clone()
            .unwrap_or_default()
            .into_iter()
            .filter(|entry| entry.visible_at(now_server_ms))
            .map(|mut entry| {
                entry.timestamp -= offset_ms;
                entry.expire -= offset_ms;
                entry
            })
            .collect();

        GameView {
            id: game_id.clone(),
            title: game.title,
            creator: game.creator,
            started: game.started,
            colors: game.colors,
            members: game.members,
            missions: game.missions,
            initial_countries: game.initial_countries,
            displayed_cards: game.displayed_cards,
            countries,
            users,
            status,
            events,
            hand: HandView {
                cards: hand.cards,
                mission: hand.mission,
            },
        }
    }
}

/// Key of one merged subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum SubKey {
    Game,
    Board,
    Hand,
    Events,
    User(UserId),
    Presence(UserId),
}

/// Handle to the background fold; dropping it cancels the task.
pub struct Projector {
    rx: watch::Receiver<GameView>,
    task: JoinHandle<()>,
}

impl Projector {
    /// Subscribe to the session's documents and start folding.
    pub fn spawn(
        store: Arc<dyn StateStore>,
        clock: Clock,
        game_id: GameId,
        player: UserId,
    ) -> Projector {
        let (tx, rx) = watch::channel(GameView::default());
        let task = tokio::spawn(run(store, clock, game_id, player, tx));
        Projector { rx, task }
    }

    /// Latest emitted view.
    pub fn current(&self) -> GameView {
        self.rx.borrow().clone()
    }

    /// Watch receiver for change notifications.
    pub fn subscribe(&self) -> watch::Receiver<GameView> {
        self.rx.clone()
    }
}

impl Drop for Projector {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run(
    store: Arc<dyn StateStore>,
    clock: Clock,
    game_id: GameId,
    player: UserId,
    tx: watch::Sender<GameView>,
) {
    let mut subs: StreamMap<SubKey, BoxStream<'static, Option<Value>>> = StreamMap::new();
    subs.insert(SubKey::Game, store.subscribe(DocKey::Game(game_id.clone())));
    subs.insert(SubKey::Board, store.subscribe(DocKey::Board(game_id.clone())));
    subs.insert(
        SubKey::Hand,
        store.subscribe(DocKey::Hand(game_id.clone(), player.clone())),
    );
    subs.insert(
        SubKey::Events,
        store.subscribe(DocKey::EventLog(game_id.clone())),
    );

    let mut inputs = Inputs::default();

    loop {
        let deadline = next_expiry(&inputs, clock.now_server_ms());
        tokio::select! {
            item = subs.next() => {
                let Some((key, value)) = item else {
                    break;
                };
                absorb(&mut inputs, &key, value);
                if key == SubKey::Game {
                    sync_member_subs(&store, &game_id, &mut subs, &inputs);
                }
            }
            _ = wait_until(deadline) => {
                // An entry just expired; fall through and re-project.
            }
        }

        let view = GameView::project(&inputs, &game_id, clock.now_server_ms(), clock.offset_ms());
        if tx.send(view).is_err() {
            break;
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(instant) => sleep_until(instant).await,
        None => std::future::pending().await,
    }
}

/// Instant of the nearest event expiry still ahead of `now`, if any.
fn next_expiry(inputs: &Inputs, now_server_ms: i64) -> Option<Instant> {
    let soonest = inputs
        .events
        .as_ref()?
        .iter()
        .map(|entry| entry.expire)
        .filter(|expire| *expire > now_server_ms)
        .min()?;
    let wait = (soonest - now_server_ms).max(0) as u64;
    Some(Instant::now() + Duration::from_millis(wait + 5))
}

fn absorb(inputs: &mut Inputs, key: &SubKey, value: Option<Value>) {
    match key {
        SubKey::Game => inputs.game = decode(value, "game"),
        SubKey::Board => inputs.board = decode(value, "board"),
        SubKey::Hand => inputs.hand = decode(value, "hand"),
        SubKey::Events => inputs.events = decode(value, "eventlog"),
        SubKey::User(member) => match decode::<UserDoc>(value, "user") {
            Some(user) => {
                inputs.users.insert(member.clone(), user);
            }
            None => {
                inputs.users.remove(member);
            }
        },
        SubKey::Presence(member) => match decode::<bool>(value, "presence") {
            Some(flag) => {
                inputs.presence.insert(member.clone(), flag);
            }
            None => {
                inputs.presence.remove(member);
            }
        },
    }
}

fn decode<T: DeserializeOwned>(value: Option<Value>, doc: &str) -> Option<T> {
    let value = value?;
    match serde_json::from_value(value) {
        Ok(decoded) => Some(decoded),
        Err(err) => {
            debug!(doc, error = %err, "skipping undecodable document");
            None
        }
    }
}

/// Keep one user and one presence subscription per current member.
fn sync_member_subs(
    store: &Arc<dyn StateStore>,
    game_id: &GameId,
    subs: &mut StreamMap<SubKey, BoxStream<'static, Option<Value>>>,
    inputs: &Inputs,
) {
    let members: Vec<UserId> = inputs
        .game
        .as_ref()
        .map(|game| game.members.clone())
        .unwrap_or_default();

    for member in &members {
        let user_key = SubKey::User(member.clone());
        if !subs.contains_key(&user_key) {
            subs.insert(user_key, store.subscribe(DocKey::User(member.clone())));
        }
        let presence_key = SubKey::Presence(member.clone());
        if !subs.contains_key(&presence_key) {
            subs.insert(
                presence_key,
                store.subscribe(DocKey::Presence(game_id.clone(), member.clone())),
            );
        }
    }

    let stale: Vec<SubKey> = subs
        .keys()
        .filter(|key| match key {
            SubKey::User(member) | SubKey::Presence(member) => !members.contains(member),
            _ => false,
        })
        .cloned()
        .collect();
    for key in stale {
        subs.remove(&key);
    }
}
