//! Hand and displayed-card operations.

use std::sync::Arc;

use rand::Rng;
use tracing::warn;

use crate::SyncError;
use crate::model::{CardKind, CardSlot, DisplayedCard, DisplayedCards, GameDoc, GameId, HandDoc, UserId};
use crate::store::{DocKey, StateStore};

use super::transact_doc;

/// Number of distinct troop card tags.
const CARD_KINDS: u8 = 3;

/// Draw a uniformly random troop card into the player's hand; returns the
/// drawn tag. The draw happens before the transaction so a retried mutator
/// cannot re-roll.
pub async fn take_card(
    store: &Arc<dyn StateStore>,
    game: &GameId,
    player: &UserId,
) -> Result<u8, SyncError> {
    let tag = rand::rng().random_range(0..CARD_KINDS);
    transact_doc::<HandDoc, _>(
        store,
        DocKey::Hand(game.clone(), player.clone()),
        move |hand| {
            hand.map(|mut hand| {
                hand.cards.push(tag);
                hand
            })
        },
    )
    .await?;
    Ok(tag)
}

/// Throw one uniformly random card out of the hand; a no-op on an empty hand.
///
/// The roll is drawn up front; the index is derived from the hand length
/// inside the mutator so a retry against a fresher hand stays in bounds.
pub async fn throw_random_card(
    store: &Arc<dyn StateStore>,
    game: &GameId,
    player: &UserId,
) -> Result<(), SyncError> {
    let roll: u64 = rand::rng().random();
    transact_doc::<HandDoc, _>(
        store,
        DocKey::Hand(game.clone(), player.clone()),
        move |hand| {
            hand.map(|mut hand| {
                if !hand.cards.is_empty() {
                    let index = (roll % hand.cards.len() as u64) as usize;
                    hand.cards.remove(index);
                }
                hand
            })
        },
    )
    .await?;
    Ok(())
}

/// Put one of the player's cards on the shared display.
///
/// The display is a singleton: the append only happens while the display is
/// unowned or already owned by the acting player. A losing racer's mutator
/// leaves the document unchanged, and the loss is reported as `InvalidState`
/// once the committed document comes back.
pub async fn display_card(
    store: &Arc<dyn StateStore>,
    game: &GameId,
    player: &UserId,
    kind: CardKind,
    slot: CardSlot,
) -> Result<(), SyncError> {
    let owner = player.clone();
    let shown = DisplayedCard { kind, slot };
    let committed = transact_doc::<GameDoc, _>(store, DocKey::Game(game.clone()), move |game| {
        game.map(|mut game| {
            let display = game
                .displayed_cards
                .get_or_insert_with(|| DisplayedCards {
                    owner: owner.clone(),
                    list: Vec::new(),
                });
            if display.owner == owner {
                display.list.push(shown.clone());
            }
            game
        })
    })
    .await?;

    let holds = committed
        .and_then(|game| game.displayed_cards)
        .is_some_and(|display| display.owner == *player);
    if holds {
        Ok(())
    } else {
        Err(SyncError::InvalidState(
            "another player is displaying cards".into(),
        ))
    }
}

/// Return one displayed card to the hand; removing the last card clears the
/// document, releasing the display for any other player.
pub async fn remove_displayed_card(
    store: &Arc<dyn StateStore>,
    game: &GameId,
    player: &UserId,
    slot: CardSlot,
) -> Result<(), SyncError> {
    let owner = player.clone();
    transact_doc::<GameDoc, _>(store, DocKey::Game(game.clone()), move |game| {
        game.map(|mut game| {
            if let Some(display) = game.displayed_cards.as_mut() {
                if display.owner == owner {
                    display.list.retain(|card| card.slot != slot);
                }
                if display.list.is_empty() {
                    game.displayed_cards = None;
                }
            }
            game
        })
    })
    .await?;
    Ok(())
}

/// Discard the displayed cards: remove them from the player's hand, then
/// clear them from the shared display.
///
/// Two documents, no cross-document atomicity. When the second write fails
/// the hand update stands; the inconsistency is logged and surfaced, and
/// lasts until the next successful mutation of the game document.
pub async fn discard_displayed_cards(
    store: &Arc<dyn StateStore>,
    game: &GameId,
    player: &UserId,
    discarded: Vec<DisplayedCard>,
) -> Result<(), SyncError> {
    let slots: Vec<CardSlot> = discarded.iter().map(|card| card.slot).collect();

    let hand_slots = slots.clone();
    transact_doc::<HandDoc, _>(
        store,
        DocKey::Hand(game.clone(), player.clone()),
        move |hand| {
            hand.map(|mut hand| {
                let mut index = 0usize;
                hand.cards.retain(|_| {
                    let keep = !hand_slots.contains(&CardSlot::Hand(index));
                    index += 1;
                    keep
                });
                hand
            })
        },
    )
    .await?;

    let cleanup = transact_doc::<GameDoc, _>(store, DocKey::Game(game.clone()), move |game| {
        game.map(|mut game| {
            if let Some(display) = game.displayed_cards.as_mut() {
                display.list.retain(|card| !slots.contains(&card.slot));
                if display.list.is_empty() {
                    game.displayed_cards = None;
                }
            }
            game
        })
    })
    .await;

    if let Err(err) = &cleanup {
        warn!(
            game = %game,
            error = %err,
            "display cleanup failed after hand discard; documents disagree until the next mutation"
        );
    }
    cleanup?;
    Ok(())
}
