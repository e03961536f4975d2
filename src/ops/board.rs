//! Army placement and removal on the shared board.

use std::sync::Arc;

use crate::SyncError;
use crate::model::{Army, BoardDoc, GameId, army_key};
use crate::store::{DocKey, StateStore};

use super::transact_doc;

/// Add `amount` armies of `color` to `country`, creating the entry if absent.
///
/// A player without a chosen color cannot place: `None` is rejected before
/// any document is touched.
pub async fn place_army(
    store: &Arc<dyn StateStore>,
    game: &GameId,
    country: &str,
    color: Option<&str>,
    amount: u32,
) -> Result<(), SyncError> {
    let Some(color) = color else {
        return Err(SyncError::InvalidInput(
            "choose a color before placing armies".into(),
        ));
    };

    let color = color.to_owned();
    let country = country.to_owned();
    transact_doc::<BoardDoc, _>(store, DocKey::Board(game.clone()), move |board| {
        board.map(|mut board| {
            if let Some(target) = board.countries.iter_mut().find(|c| c.name == country) {
                let entry = target
                    .armies
                    .entry(army_key(&color))
                    .or_insert_with(|| Army {
                        color: color.clone(),
                        amount: 0,
                    });
                entry.amount += amount;
            }
            board
        })
    })
    .await?;
    Ok(())
}

/// Remove `amount` armies from the identified stack.
///
/// A stack that reaches zero (or below) is deleted outright; the board never
/// stores a non-positive amount.
pub async fn remove_army(
    store: &Arc<dyn StateStore>,
    game: &GameId,
    country: &str,
    army_id: &str,
    amount: u32,
) -> Result<(), SyncError> {
    let country = country.to_owned();
    let army_id = army_id.to_owned();
    transact_doc::<BoardDoc, _>(store, DocKey::Board(game.clone()), move |board| {
        board.map(|mut board| {
            if let Some(target) = board.countries.iter_mut().find(|c| c.name == country) {
                let depleted = match target.armies.get_mut(&army_id) {
                    Some(existing) if existing.amount > amount => {
                        existing.amount -= amount;
                        false
                    }
                    Some(_) => true,
                    None => false,
                };
                if depleted {
                    target.armies.shift_remove(&army_id);
                }
            }
            board
        })
    })
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;
    use rand::Rng;

    use super::*;
    use crate::model::Country;
    use crate::store::MemoryStore;

    const RED: &str = "#ff0000";

    async fn seed(store: &Arc<dyn StateStore>, game: &GameId, countries: &[&str]) {
        let board = BoardDoc {
            id: game.clone(),
            countries: countries
                .iter()
                .map(|name| Country {
                    name: (*name).to_owned(),
                    armies: IndexMap::new(),
                })
                .collect(),
        };
        store
            .set(
                DocKey::Board(game.clone()),
                Some(serde_json::to_value(board).unwrap()),
            )
            .await
            .unwrap();
    }

    async fn board(store: &Arc<dyn StateStore>, game: &GameId) -> BoardDoc {
        let raw = store.once(DocKey::Board(game.clone())).await.unwrap();
        serde_json::from_value(raw.unwrap()).unwrap()
    }

    #[tokio::test]
    async fn placing_without_color_is_a_document_noop() {
        let store: Arc<dyn StateStore> = MemoryStore::new();
        let game = GameId::from("g1");
        seed(&store, &game, &["Peru"]).await;

        let err = place_army(&store, &game, "Peru", None, 1).await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidInput(_)));
        assert!(board(&store, &game).await.countries[0].armies.is_empty());
    }

    #[tokio::test]
    async fn concurrent_placements_merge_on_one_entry() {
        let store: Arc<dyn StateStore> = MemoryStore::new();
        let game = GameId::from("g1");
        seed(&store, &game, &["Alaska"]).await;

        // Two clients place the same color at the same time.
        let (a, b) = tokio::join!(
            place_army(&store, &game, "Alaska", Some(RED), 1),
            place_army(&store, &game, "Alaska", Some(RED), 1),
        );
        a.unwrap();
        b.unwrap();

        let board = board(&store, &game).await;
        let armies = &board.countries[0].armies;
        assert_eq!(armies.len(), 1);
        let entry = &armies[&army_key(RED)];
        assert_eq!(entry.color, RED);
        assert_eq!(entry.amount, 2);
    }

    #[tokio::test]
    async fn random_concurrent_deltas_sum_exactly() {
        let store: Arc<dyn StateStore> = MemoryStore::new();
        let game = GameId::from("g1");
        seed(&store, &game, &["Ukraine"]).await;

        // Start from a big stack so removals never bottom out.
        place_army(&store, &game, "Ukraine", Some(RED), 500)
            .await
            .unwrap();

        let mut expected: i64 = 500;
        let mut tasks = Vec::new();
        for _ in 0..24 {
            let delta: u32 = rand::rng().random_range(1..4);
            let add: bool = rand::rng().random();
            expected += if add { delta as i64 } else { -(delta as i64) };

            let store = store.clone();
            let game = game.clone();
            tasks.push(tokio::spawn(async move {
                if add {
                    place_army(&store, &game, "Ukraine", Some(RED), delta).await
                } else {
                    remove_army(&store, &game, "Ukraine", &army_key(RED), delta).await
                }
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let board = board(&store, &game).await;
        let amount = board.countries[0].armies[&army_key(RED)].amount;
        assert_eq!(amount as i64, expected, "no update may be lost");
    }

    #[tokio::test]
    async fn depleted_stack_is_removed_not_zeroed() {
        let store: Arc<dyn StateStore> = MemoryStore::new();
        let game = GameId::from("g1");
        seed(&store, &game, &["Peru"]).await;

        place_army(&store, &game, "Peru", Some(RED), 2).await.unwrap();
        remove_army(&store, &game, "Peru", &army_key(RED), 2)
            .await
            .unwrap();

        let board = board(&store, &game).await;
        assert!(
            !board.countries[0].armies.contains_key(&army_key(RED)),
            "a zero stack must be deleted, never stored"
        );
    }

    #[tokio::test]
    async fn over_removal_also_deletes_the_entry() {
        let store: Arc<dyn StateStore> = MemoryStore::new();
        let game = GameId::from("g1");
        seed(&store, &game, &["Peru"]).await;

        place_army(&store, &game, "Peru", Some(RED), 1).await.unwrap();
        remove_army(&store, &game, "Peru", &army_key(RED), 5)
            .await
            .unwrap();

        let board = board(&store, &game).await;
        assert!(board.countries[0].armies.is_empty());
    }

    #[tokio::test]
    async fn unknown_country_is_ignored() {
        let store: Arc<dyn StateStore> = MemoryStore::new();
        let game = GameId::from("g1");
        seed(&store, &game, &["Peru"]).await;

        place_army(&store, &game, "Atlantis", Some(RED), 1)
            .await
            .unwrap();
        assert!(board(&store, &game).await.countries[0].armies.is_empty());
    }
}
