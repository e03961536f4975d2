//! Game-document operations: lobby lifecycle, joining, colors and missions.

use std::sync::Arc;

use indexmap::IndexMap;
use rand::seq::SliceRandom;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::SyncError;
use crate::config::AppConfig;
use crate::model::{BoardDoc, Country, GameDoc, GameId, HandDoc, MissionState, UserId};
use crate::store::{DocKey, StateStore, StorageError};

use super::transact_doc;

/// Verify that a join code refers to an existing game.
pub async fn check_code(store: &Arc<dyn StateStore>, game: &GameId) -> Result<(), SyncError> {
    match store.once(DocKey::Game(game.clone())).await? {
        Some(_) => Ok(()),
        None => Err(SyncError::NotFound(format!("game `{game}` does not exist"))),
    }
}

/// Seed the game and board documents for a fresh session; returns the join
/// code.
pub async fn create_game(
    store: &Arc<dyn StateStore>,
    config: &AppConfig,
    creator: &UserId,
    title: &str,
) -> Result<GameId, SyncError> {
    if title.trim().is_empty() {
        return Err(SyncError::InvalidInput("game title must not be empty".into()));
    }

    let id = GameId::generate();
    let game = GameDoc {
        id: id.clone(),
        title: title.to_owned(),
        creator: creator.clone(),
        missions: MissionState {
            pool: config.missions().to_vec(),
            assigned: IndexMap::new(),
        },
        ..GameDoc::default()
    };
    let board = BoardDoc {
        id: id.clone(),
        countries: config
            .countries()
            .iter()
            .map(|name| Country {
                name: name.clone(),
                armies: IndexMap::new(),
            })
            .collect(),
    };

    store.set(DocKey::Game(id.clone()), encode(&game)?).await?;
    store.set(DocKey::Board(id.clone()), encode(&board)?).await?;
    Ok(id)
}

/// Join `player` into the game.
///
/// A first join appends membership, pops a mission from the pool into the
/// per-player assignment, re-partitions the country pool evenly across the
/// current members, and creates the hand document carrying the assigned
/// mission. Re-joining changes nothing: every step is guarded by the
/// membership check.
pub async fn join_game(
    store: &Arc<dyn StateStore>,
    config: &AppConfig,
    game: &GameId,
    player: &UserId,
) -> Result<(), SyncError> {
    // The shuffle is drawn before the transaction so a retried mutator
    // partitions the same permutation.
    let mut shuffled: Vec<String> = config.countries().to_vec();
    shuffled.shuffle(&mut rand::rng());

    let joining = player.clone();
    let committed = transact_doc::<GameDoc, _>(store, DocKey::Game(game.clone()), move |doc| {
        doc.map(|mut doc| {
            if !doc.members.contains(&joining) {
                doc.members.push(joining.clone());
                if let Some(mission) = doc.missions.pool.pop() {
                    doc.missions.assigned.insert(joining.clone(), mission);
                }
                doc.initial_countries = distribute(&doc.members, &shuffled);
            }
            doc
        })
    })
    .await?;

    let Some(committed) = committed else {
        return Err(SyncError::NotFound(format!("game `{game}` does not exist")));
    };
    let mission = committed
        .missions
        .assigned
        .get(player)
        .cloned()
        .unwrap_or_default();

    let hand_game = game.clone();
    let hand_player = player.clone();
    transact_doc::<HandDoc, _>(
        store,
        DocKey::Hand(game.clone(), player.clone()),
        move |hand| {
            Some(hand.unwrap_or_else(|| HandDoc {
                game: hand_game.clone(),
                player: hand_player.clone(),
                cards: Vec::new(),
                mission: mission.clone(),
            }))
        },
    )
    .await?;
    Ok(())
}

/// Choose or change a color.
///
/// The write is refused inside the transaction when another player already
/// holds the color in the snapshot the transaction sees, so two players can
/// never commit the same color; a refused write surfaces as `InvalidState`.
pub async fn set_color(
    store: &Arc<dyn StateStore>,
    game: &GameId,
    player: &UserId,
    color: &str,
) -> Result<(), SyncError> {
    let chooser = player.clone();
    let chosen = color.to_owned();
    let committed = transact_doc::<GameDoc, _>(store, DocKey::Game(game.clone()), move |doc| {
        doc.map(|mut doc| {
            let taken = doc
                .colors
                .iter()
                .any(|(holder, held)| *held == chosen && *holder != chooser);
            if !taken {
                doc.colors.insert(chooser.clone(), chosen.clone());
            }
            doc
        })
    })
    .await?;

    let Some(committed) = committed else {
        return Err(SyncError::NotFound(format!("game `{game}` does not exist")));
    };
    if committed.colors.get(player).is_some_and(|held| held == color) {
        Ok(())
    } else {
        Err(SyncError::InvalidState(format!(
            "color `{color}` is already taken"
        )))
    }
}

/// Mark the game as started. Creator only.
pub async fn start_game(
    store: &Arc<dyn StateStore>,
    game: &GameId,
    player: &UserId,
) -> Result<(), SyncError> {
    creator_guard(store, game, player).await?;
    transact_doc::<GameDoc, _>(store, DocKey::Game(game.clone()), |doc| {
        doc.map(|mut doc| {
            doc.started = true;
            doc
        })
    })
    .await?;
    Ok(())
}

/// Append a mission to the pool. Creator only.
pub async fn add_mission(
    store: &Arc<dyn StateStore>,
    game: &GameId,
    player: &UserId,
    text: &str,
) -> Result<(), SyncError> {
    if text.trim().is_empty() {
        return Err(SyncError::InvalidInput("mission text must not be empty".into()));
    }
    creator_guard(store, game, player).await?;

    let text = text.to_owned();
    transact_doc::<GameDoc, _>(store, DocKey::Game(game.clone()), move |doc| {
        doc.map(|mut doc| {
            doc.missions.pool.push(text.clone());
            doc
        })
    })
    .await?;
    Ok(())
}

/// Replace the mission at `index`; out-of-range edits are ignored. Creator
/// only.
pub async fn save_mission(
    store: &Arc<dyn StateStore>,
    game: &GameId,
    player: &UserId,
    index: usize,
    text: &str,
) -> Result<(), SyncError> {
    if text.trim().is_empty() {
        return Err(SyncError::InvalidInput("mission text must not be empty".into()));
    }
    creator_guard(store, game, player).await?;

    let text = text.to_owned();
    transact_doc::<GameDoc, _>(store, DocKey::Game(game.clone()), move |doc| {
        doc.map(|mut doc| {
            if let Some(slot) = doc.missions.pool.get_mut(index) {
                *slot = text.clone();
            }
            doc
        })
    })
    .await?;
    Ok(())
}

/// Remove the mission at `index`; out-of-range deletes are ignored. Creator
/// only.
pub async fn delete_mission(
    store: &Arc<dyn StateStore>,
    game: &GameId,
    player: &UserId,
    index: usize,
) -> Result<(), SyncError> {
    creator_guard(store, game, player).await?;
    transact_doc::<GameDoc, _>(store, DocKey::Game(game.clone()), move |doc| {
        doc.map(|mut doc| {
            if index < doc.missions.pool.len() {
                doc.missions.pool.remove(index);
            }
            doc
        })
    })
    .await?;
    Ok(())
}

/// Replace the whole mission pool. Creator only.
pub async fn set_missions(
    store: &Arc<dyn StateStore>,
    game: &GameId,
    player: &UserId,
    missions: Vec<String>,
) -> Result<(), SyncError> {
    creator_guard(store, game, player).await?;
    transact_doc::<GameDoc, _>(store, DocKey::Game(game.clone()), move |doc| {
        doc.map(|mut doc| {
            doc.missions.pool = missions.clone();
            doc
        })
    })
    .await?;
    Ok(())
}

/// Rename the game. Creator only.
pub async fn change_title(
    store: &Arc<dyn StateStore>,
    game: &GameId,
    player: &UserId,
    title: &str,
) -> Result<(), SyncError> {
    if title.trim().is_empty() {
        return Err(SyncError::InvalidInput("game title must not be empty".into()));
    }
    creator_guard(store, game, player).await?;

    let title = title.to_owned();
    transact_doc::<GameDoc, _>(store, DocKey::Game(game.clone()), move |doc| {
        doc.map(|mut doc| {
            doc.title = title.clone();
            doc
        })
    })
    .await?;
    Ok(())
}

/// Tear down the game, board, event log and member hands. Creator only.
///
/// The deletes span several documents with no cross-document atomicity; every
/// key is attempted, failures are logged, and the first failure is reported.
pub async fn delete_game(
    store: &Arc<dyn StateStore>,
    game: &GameId,
    player: &UserId,
) -> Result<(), SyncError> {
    let doc = creator_guard(store, game, player).await?;

    let mut keys = vec![
        DocKey::Game(game.clone()),
        DocKey::Board(game.clone()),
        DocKey::EventLog(game.clone()),
    ];
    keys.extend(
        doc.members
            .iter()
            .map(|member| DocKey::Hand(game.clone(), member.clone())),
    );

    let mut first_failure = None;
    for key in keys {
        if let Err(err) = store.set(key.clone(), None).await {
            warn!(key = %key, error = %err, "teardown write failed");
            first_failure.get_or_insert(err);
        }
    }
    match first_failure {
        None => Ok(()),
        Some(err) => Err(err.into()),
    }
}

/// Check that `player` created the game, returning the current document.
///
/// The creator field is immutable, so the read-then-transact split in the
/// callers is race-free.
async fn creator_guard(
    store: &Arc<dyn StateStore>,
    game: &GameId,
    player: &UserId,
) -> Result<GameDoc, SyncError> {
    let key = DocKey::Game(game.clone());
    let Some(raw) = store.once(key.clone()).await? else {
        return Err(SyncError::NotFound(format!("game `{game}` does not exist")));
    };
    let doc: GameDoc = serde_json::from_value(raw).map_err(|source| StorageError::Codec {
        key: key.to_string(),
        source,
    })?;
    if doc.creator == *player {
        Ok(doc)
    } else {
        Err(SyncError::Unauthorized(
            "only the game's creator may do this".into(),
        ))
    }
}

/// Round-robin partition of the (pre-shuffled) country pool across members.
fn distribute(members: &[UserId], pool: &[String]) -> IndexMap<UserId, Vec<String>> {
    let mut partition: IndexMap<UserId, Vec<String>> = members
        .iter()
        .cloned()
        .map(|member| (member, Vec::new()))
        .collect();
    if members.is_empty() {
        return partition;
    }
    for (index, country) in pool.iter().enumerate() {
        let member = &members[index % members.len()];
        if let Some(bucket) = partition.get_mut(member) {
            bucket.push(country.clone());
        }
    }
    partition
}

fn encode<T: Serialize>(doc: &T) -> Result<Option<Value>, SyncError> {
    serde_json::to_value(doc)
        .map(Some)
        .map_err(|err| SyncError::InvalidInput(format!("unencodable document: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    async fn game_doc(store: &Arc<dyn StateStore>, game: &GameId) -> GameDoc {
        let raw = store.once(DocKey::Game(game.clone())).await.unwrap();
        serde_json::from_value(raw.unwrap()).unwrap()
    }

    async fn hand_doc(
        store: &Arc<dyn StateStore>,
        game: &GameId,
        player: &UserId,
    ) -> Option<HandDoc> {
        store
            .once(DocKey::Hand(game.clone(), player.clone()))
            .await
            .unwrap()
            .map(|raw| serde_json::from_value(raw).unwrap())
    }

    async fn fresh_game(store: &Arc<dyn StateStore>, config: &AppConfig) -> GameId {
        create_game(store, config, &UserId::from("alice"), "world war")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn create_seeds_game_and_board() {
        let store: Arc<dyn StateStore> = MemoryStore::new();
        let config = AppConfig::default();
        let game = fresh_game(&store, &config).await;

        let doc = game_doc(&store, &game).await;
        assert_eq!(doc.creator, UserId::from("alice"));
        assert_eq!(doc.title, "world war");
        assert_eq!(doc.missions.pool.len(), config.missions().len());
        assert!(!doc.started);

        let board: BoardDoc = serde_json::from_value(
            store
                .once(DocKey::Board(game.clone()))
                .await
                .unwrap()
                .unwrap(),
        )
        .unwrap();
        assert_eq!(board.countries.len(), 42);
        assert!(board.countries.iter().all(|c| c.armies.is_empty()));

        check_code(&store, &game).await.unwrap();
        assert!(matches!(
            check_code(&store, &GameId::from("nope")).await,
            Err(SyncError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn join_is_idempotent_per_player() {
        let store: Arc<dyn StateStore> = MemoryStore::new();
        let config = AppConfig::default();
        let game = fresh_game(&store, &config).await;
        let alice = UserId::from("alice");

        join_game(&store, &config, &game, &alice).await.unwrap();
        let first = game_doc(&store, &game).await;
        let first_hand = hand_doc(&store, &game, &alice).await.unwrap();

        join_game(&store, &config, &game, &alice).await.unwrap();
        let second = game_doc(&store, &game).await;
        let second_hand = hand_doc(&store, &game, &alice).await.unwrap();

        assert_eq!(second.members, vec![alice.clone()]);
        assert_eq!(second.missions.pool.len(), first.missions.pool.len());
        assert_eq!(second.initial_countries, first.initial_countries);
        assert_eq!(second_hand.mission, first_hand.mission);
    }

    #[tokio::test]
    async fn join_assigns_one_mission_and_partitions_countries() {
        let store: Arc<dyn StateStore> = MemoryStore::new();
        let config = AppConfig::default();
        let game = fresh_game(&store, &config).await;
        let alice = UserId::from("alice");
        let bob = UserId::from("bob");

        join_game(&store, &config, &game, &alice).await.unwrap();
        join_game(&store, &config, &game, &bob).await.unwrap();

        let doc = game_doc(&store, &game).await;
        assert_eq!(doc.members, vec![alice.clone(), bob.clone()]);
        assert_eq!(doc.missions.pool.len(), config.missions().len() - 2);
        assert_ne!(
            doc.missions.assigned[&alice],
            doc.missions.assigned[&bob],
            "popped missions are distinct"
        );

        // 42 countries split evenly over two members.
        let mine = &doc.initial_countries[&alice];
        let theirs = &doc.initial_countries[&bob];
        assert_eq!(mine.len(), 21);
        assert_eq!(theirs.len(), 21);
        assert!(mine.iter().all(|c| !theirs.contains(c)));

        let hand = hand_doc(&store, &game, &bob).await.unwrap();
        assert_eq!(hand.mission, doc.missions.assigned[&bob]);
        assert!(hand.cards.is_empty());
    }

    #[tokio::test]
    async fn joining_an_unknown_game_fails() {
        let store: Arc<dyn StateStore> = MemoryStore::new();
        let config = AppConfig::default();
        let ghost = GameId::from("ghost");

        let err = join_game(&store, &config, &ghost, &UserId::from("alice"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NotFound(_)));
        assert!(hand_doc(&store, &ghost, &UserId::from("alice")).await.is_none());
    }

    #[tokio::test]
    async fn color_uniqueness_is_enforced_in_the_transaction() {
        let store: Arc<dyn StateStore> = MemoryStore::new();
        let config = AppConfig::default();
        let game = fresh_game(&store, &config).await;
        let alice = UserId::from("alice");
        let bob = UserId::from("bob");

        set_color(&store, &game, &alice, "#ff0000").await.unwrap();
        let err = set_color(&store, &game, &bob, "#ff0000").await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidState(_)));

        let doc = game_doc(&store, &game).await;
        assert_eq!(doc.colors.get(&alice).map(String::as_str), Some("#ff0000"));
        assert!(!doc.colors.contains_key(&bob));

        // Re-choosing one's own color and switching are both fine.
        set_color(&store, &game, &alice, "#ff0000").await.unwrap();
        set_color(&store, &game, &alice, "#0000ff").await.unwrap();
        set_color(&store, &game, &bob, "#ff0000").await.unwrap();
    }

    #[tokio::test]
    async fn racing_players_cannot_commit_the_same_color() {
        let store: Arc<dyn StateStore> = MemoryStore::new();
        let config = AppConfig::default();
        let game = fresh_game(&store, &config).await;

        let alice = UserId::from("alice");
        let bob = UserId::from("bob");
        let (a, b) = tokio::join!(
            set_color(&store, &game, &alice, "#ff0000"),
            set_color(&store, &game, &bob, "#ff0000"),
        );
        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);

        let doc = game_doc(&store, &game).await;
        let holders: Vec<_> = doc
            .colors
            .iter()
            .filter(|(_, held)| held.as_str() == "#ff0000")
            .collect();
        assert_eq!(holders.len(), 1);
    }

    #[tokio::test]
    async fn mission_editing_is_creator_only() {
        let store: Arc<dyn StateStore> = MemoryStore::new();
        let config = AppConfig::default();
        let game = fresh_game(&store, &config).await;
        let alice = UserId::from("alice");
        let bob = UserId::from("bob");

        add_mission(&store, &game, &alice, "hold the line").await.unwrap();
        let err = add_mission(&store, &game, &bob, "cheat").await.unwrap_err();
        assert!(matches!(err, SyncError::Unauthorized(_)));

        save_mission(&store, &game, &alice, 0, "rewritten").await.unwrap();
        let doc = game_doc(&store, &game).await;
        assert_eq!(doc.missions.pool[0], "rewritten");
        assert_eq!(*doc.missions.pool.last().unwrap(), "hold the line");

        let before = doc.missions.pool.len();
        delete_mission(&store, &game, &alice, 0).await.unwrap();
        assert_eq!(game_doc(&store, &game).await.missions.pool.len(), before - 1);

        set_missions(&store, &game, &alice, vec!["only one".into()])
            .await
            .unwrap();
        assert_eq!(game_doc(&store, &game).await.missions.pool, ["only one"]);
    }

    #[tokio::test]
    async fn start_game_flips_the_flag_for_the_creator_only() {
        let store: Arc<dyn StateStore> = MemoryStore::new();
        let config = AppConfig::default();
        let game = fresh_game(&store, &config).await;

        let err = start_game(&store, &game, &UserId::from("bob")).await.unwrap_err();
        assert!(matches!(err, SyncError::Unauthorized(_)));
        assert!(!game_doc(&store, &game).await.started);

        start_game(&store, &game, &UserId::from("alice")).await.unwrap();
        assert!(game_doc(&store, &game).await.started);
    }

    #[tokio::test]
    async fn delete_game_tears_down_every_document() {
        let store: Arc<dyn StateStore> = MemoryStore::new();
        let config = AppConfig::default();
        let game = fresh_game(&store, &config).await;
        let alice = UserId::from("alice");

        join_game(&store, &config, &game, &alice).await.unwrap();
        delete_game(&store, &game, &alice).await.unwrap();

        assert!(store.once(DocKey::Game(game.clone())).await.unwrap().is_none());
        assert!(store.once(DocKey::Board(game.clone())).await.unwrap().is_none());
        assert!(hand_doc(&store, &game, &alice).await.is_none());
    }

    #[test]
    fn distribute_covers_the_pool_evenly() {
        let members = vec![UserId::from("a"), UserId::from("b"), UserId::from("c")];
        let pool: Vec<String> = (0..9).map(|i| format!("c{i}")).collect();

        let partition = distribute(&members, &pool);
        assert_eq!(partition.len(), 3);
        assert!(partition.values().all(|bucket| bucket.len() == 3));

        let mut all: Vec<_> = partition.values().flatten().cloned().collect();
        all.sort();
        let mut expected = pool.clone();
        expected.sort();
        assert_eq!(all, expected);
    }
}
