//! Client-local staging of in-flight user actions.
//!
//! At most one action is pending per connected client. A gesture either
//! stages an action, accumulates onto one, or resolves it into an [`Effect`]
//! the session runs against the store. The machine itself never touches the
//! store and is never persisted; cancelling before an effect is issued has
//! zero remote cost.

use thiserror::Error;

use crate::model::{CardKind, CardSlot, UserId};

/// The client's single in-flight action.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ActionState {
    /// Nothing staged.
    #[default]
    Idle,
    /// Fresh armies held on the cursor, not yet on the board.
    PlacingArmy {
        /// Color the armies will take.
        color: String,
        /// Number of armies staged.
        amount: u32,
    },
    /// An existing stack lifted off the board; already removed from origin.
    MovingArmy {
        /// Country the stack was lifted from.
        origin: String,
        /// Army entry key at the origin.
        army_id: String,
        /// Armies accumulated so far.
        amount: u32,
        /// Stack color.
        color: String,
    },
    /// A card lifted off the draw pile.
    TakingCard,
    /// A hand or mission card on its way to the display.
    MovingCard {
        /// Face of the card being moved.
        kind: CardKind,
        /// Where the card lives in the hand.
        slot: CardSlot,
    },
    /// One of the player's own displayed cards on its way back to the hand.
    MovingDisplayedCard {
        /// Face of the card.
        kind: CardKind,
        /// Position within the displayed list.
        display_index: usize,
        /// Hand slot the card came from.
        slot: CardSlot,
    },
}

/// User gestures, as reported by the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Gesture {
    /// Grab a fresh army from the reserve.
    BeginPlaceArmy,
    /// Lift one army off an existing stack.
    PickArmyStack {
        /// Country holding the stack.
        country: String,
        /// Army entry key.
        army_id: String,
        /// Stack color.
        color: String,
    },
    /// Drop the held armies on a country.
    DropOnCountry {
        /// Target country.
        country: String,
    },
    /// Drop the held armies on the discard zone.
    DropOnDiscard,
    /// Lift a card off the draw pile.
    BeginTakeCard,
    /// Drop the drawn card into the hand.
    DropOnHand,
    /// Lift a card out of the hand (or the mission card).
    PickHandCard {
        /// Card face.
        kind: CardKind,
        /// Hand slot.
        slot: CardSlot,
    },
    /// Lift one of the currently displayed cards.
    PickDisplayedCard {
        /// Card face.
        kind: CardKind,
        /// Position within the displayed list.
        display_index: usize,
        /// Hand slot it came from.
        slot: CardSlot,
    },
    /// Drop the held card on the shared display zone.
    DropOnDisplay,
    /// Drop a displayed card outside the display, returning it to the hand.
    DropOutsideDisplay,
    /// Drop on a cancel zone, abandoning whatever is staged.
    Cancel,
}

/// Mutation the session must run after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Commit the held armies onto a country.
    PlaceArmy {
        /// Target country.
        country: String,
        /// Army color.
        color: String,
        /// Armies to add.
        amount: u32,
    },
    /// Lift armies off a stack; runs immediately on pick-up.
    RemoveArmy {
        /// Origin country.
        country: String,
        /// Army entry key.
        army_id: String,
        /// Armies to remove.
        amount: u32,
    },
    /// Draw a card into the hand.
    TakeCard,
    /// Put a card on the shared display.
    DisplayCard {
        /// Card face.
        kind: CardKind,
        /// Hand slot.
        slot: CardSlot,
    },
    /// Take one of the player's displayed cards back into the hand.
    RemoveDisplayedCard {
        /// Card face.
        kind: CardKind,
        /// Hand slot.
        slot: CardSlot,
    },
    /// Announce a stack dropped on the discard zone; the armies are gone.
    DiscardArmy {
        /// Stack color.
        color: String,
        /// Armies destroyed.
        amount: u32,
    },
}

/// Snapshot of the shared state a gesture is judged against.
#[derive(Debug, Clone, Default)]
pub struct StageContext {
    /// The acting player.
    pub player: UserId,
    /// Color the acting player has chosen, if any.
    pub own_color: Option<String>,
    /// Player currently owning the displayed-cards singleton.
    pub display_owner: Option<UserId>,
    /// Hand slots the acting player is currently displaying.
    pub own_displayed_slots: Vec<CardSlot>,
}

/// Why a gesture could not be staged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageError {
    /// Another action is already pending.
    #[error("another action is already in progress")]
    Busy,
    /// The player has not chosen a color yet.
    #[error("choose a color first")]
    NoColor,
    /// The card is on display and cannot be picked up from the hand.
    #[error("that card is already displayed")]
    CardUnavailable,
}

/// Single-instance staging machine; owns the client's [`ActionState`].
#[derive(Debug, Default)]
pub struct ActionStateMachine {
    state: ActionState,
}

impl ActionStateMachine {
    /// Fresh machine in the idle state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspect the current state.
    pub fn state(&self) -> &ActionState {
        &self.state
    }

    /// Abandon whatever is staged. Armies lifted by a pending MovingArmy are
    /// not restored.
    pub fn reset(&mut self) {
        self.state = ActionState::Idle;
    }

    /// Apply one gesture, returning the effect the caller must run.
    ///
    /// Picks and begins while another action is pending are rejected, except
    /// for the one allowed re-entry (re-picking the lifted stack). Drops
    /// that do not match the staged action are inert.
    pub fn apply(
        &mut self,
        gesture: Gesture,
        ctx: &StageContext,
    ) -> Result<Option<Effect>, StageError> {
        let (next, effect) = match (self.state.clone(), gesture) {
            (ActionState::Idle, Gesture::BeginPlaceArmy) => {
                let Some(color) = ctx.own_color.clone() else {
                    return Err(StageError::NoColor);
                };
                (ActionState::PlacingArmy { color, amount: 1 }, None)
            }
            (ActionState::PlacingArmy { color, amount }, Gesture::DropOnCountry { country }) => (
                ActionState::Idle,
                Some(Effect::PlaceArmy {
                    country,
                    color,
                    amount,
                }),
            ),

            // Picking a stack removes from the origin immediately; the drop
            // later commits to the destination. A crash in between loses the
            // staged armies.
            (
                ActionState::Idle,
                Gesture::PickArmyStack {
                    country,
                    army_id,
                    color,
                },
            ) => (
                ActionState::MovingArmy {
                    origin: country.clone(),
                    army_id: army_id.clone(),
                    amount: 1,
                    color,
                },
                Some(Effect::RemoveArmy {
                    country,
                    army_id,
                    amount: 1,
                }),
            ),
            (
                ActionState::MovingArmy {
                    origin,
                    army_id,
                    amount,
                    color,
                },
                Gesture::PickArmyStack {
                    country, army_id: picked, ..
                },
            ) if origin == country && army_id == picked => (
                ActionState::MovingArmy {
                    origin: origin.clone(),
                    army_id: army_id.clone(),
                    amount: amount + 1,
                    color,
                },
                Some(Effect::RemoveArmy {
                    country: origin,
                    army_id,
                    amount: 1,
                }),
            ),
            (ActionState::MovingArmy { color, amount, .. }, Gesture::DropOnCountry { country }) => (
                ActionState::Idle,
                Some(Effect::PlaceArmy {
                    country,
                    color,
                    amount,
                }),
            ),
            (ActionState::MovingArmy { color, amount, .. }, Gesture::DropOnDiscard) => (
                ActionState::Idle,
                Some(Effect::DiscardArmy { color, amount }),
            ),

            (ActionState::Idle, Gesture::BeginTakeCard) => (ActionState::TakingCard, None),
            (ActionState::TakingCard, Gesture::DropOnHand) => {
                (ActionState::Idle, Some(Effect::TakeCard))
            }

            // Restaging onto another hand card is allowed; re-picking the
            // same one changes nothing.
            (
                ActionState::Idle | ActionState::MovingCard { .. },
                Gesture::PickHandCard { kind, slot },
            ) => {
                if matches!(&self.state, ActionState::MovingCard { slot: staged, .. } if *staged == slot)
                {
                    return Ok(None);
                }
                if ctx.own_displayed_slots.contains(&slot) {
                    return Err(StageError::CardUnavailable);
                }
                (ActionState::MovingCard { kind, slot }, None)
            }
            (ActionState::MovingCard { kind, slot }, Gesture::DropOnDisplay) => {
                let zone_free = ctx
                    .display_owner
                    .as_ref()
                    .is_none_or(|owner| *owner == ctx.player);
                let effect = zone_free.then_some(Effect::DisplayCard { kind, slot });
                (ActionState::Idle, effect)
            }

            (
                ActionState::Idle,
                Gesture::PickDisplayedCard {
                    kind,
                    display_index,
                    slot,
                },
            ) => {
                if ctx.display_owner.as_ref() != Some(&ctx.player) {
                    return Err(StageError::CardUnavailable);
                }
                (
                    ActionState::MovingDisplayedCard {
                        kind,
                        display_index,
                        slot,
                    },
                    None,
                )
            }
            (
                ActionState::MovingDisplayedCard { kind, slot, .. },
                Gesture::DropOutsideDisplay,
            ) => (
                ActionState::Idle,
                Some(Effect::RemoveDisplayedCard { kind, slot }),
            ),

            // Cancelling discards the staged action with no remote effect;
            // for MovingArmy the already-removed armies stay removed.
            (_, Gesture::Cancel) => (ActionState::Idle, None),

            // Any other pick or begin while something is staged is rejected.
            (
                _,
                Gesture::BeginPlaceArmy
                | Gesture::PickArmyStack { .. }
                | Gesture::BeginTakeCard
                | Gesture::PickHandCard { .. }
                | Gesture::PickDisplayedCard { .. },
            ) => return Err(StageError::Busy),

            // Drops with no matching staged action are inert.
            (state, _) => (state, None),
        };

        self.state = next;
        Ok(effect)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> StageContext {
        StageContext {
            player: UserId::from("alice"),
            own_color: Some("#ff0000".into()),
            display_owner: None,
            own_displayed_slots: Vec::new(),
        }
    }

    fn pick(country: &str) -> Gesture {
        Gesture::PickArmyStack {
            country: country.into(),
            army_id: "ff0000".into(),
            color: "#ff0000".into(),
        }
    }

    #[test]
    fn initial_state_is_idle() {
        let sm = ActionStateMachine::new();
        assert_eq!(*sm.state(), ActionState::Idle);
    }

    #[test]
    fn placing_requires_a_chosen_color() {
        let mut sm = ActionStateMachine::new();
        let mut no_color = ctx();
        no_color.own_color = None;

        assert_eq!(
            sm.apply(Gesture::BeginPlaceArmy, &no_color),
            Err(StageError::NoColor)
        );
        assert_eq!(*sm.state(), ActionState::Idle);
    }

    #[test]
    fn place_army_round_trip() {
        let mut sm = ActionStateMachine::new();

        assert_eq!(sm.apply(Gesture::BeginPlaceArmy, &ctx()), Ok(None));
        assert_eq!(
            *sm.state(),
            ActionState::PlacingArmy {
                color: "#ff0000".into(),
                amount: 1
            }
        );

        let effect = sm
            .apply(
                Gesture::DropOnCountry {
                    country: "Brazil".into(),
                },
                &ctx(),
            )
            .unwrap();
        assert_eq!(
            effect,
            Some(Effect::PlaceArmy {
                country: "Brazil".into(),
                color: "#ff0000".into(),
                amount: 1
            })
        );
        assert_eq!(*sm.state(), ActionState::Idle);
    }

    #[test]
    fn repeated_pickup_accumulates_and_commits_the_sum() {
        let mut sm = ActionStateMachine::new();

        // First pick-up removes one from the origin.
        assert_eq!(
            sm.apply(pick("Peru"), &ctx()).unwrap(),
            Some(Effect::RemoveArmy {
                country: "Peru".into(),
                army_id: "ff0000".into(),
                amount: 1
            })
        );
        // Re-picking the same stack removes another and accumulates.
        assert_eq!(
            sm.apply(pick("Peru"), &ctx()).unwrap(),
            Some(Effect::RemoveArmy {
                country: "Peru".into(),
                army_id: "ff0000".into(),
                amount: 1
            })
        );
        assert!(matches!(
            sm.state(),
            ActionState::MovingArmy { amount: 2, .. }
        ));

        // Dropping commits the accumulated amount to the destination.
        let effect = sm
            .apply(
                Gesture::DropOnCountry {
                    country: "Brazil".into(),
                },
                &ctx(),
            )
            .unwrap();
        assert_eq!(
            effect,
            Some(Effect::PlaceArmy {
                country: "Brazil".into(),
                color: "#ff0000".into(),
                amount: 2
            })
        );
        assert_eq!(*sm.state(), ActionState::Idle);
    }

    #[test]
    fn picking_a_different_stack_is_rejected() {
        let mut sm = ActionStateMachine::new();
        sm.apply(pick("Peru"), &ctx()).unwrap();
        assert_eq!(sm.apply(pick("Brazil"), &ctx()), Err(StageError::Busy));
        assert!(matches!(
            sm.state(),
            ActionState::MovingArmy { amount: 1, .. }
        ));
    }

    #[test]
    fn begin_while_busy_is_rejected() {
        let mut sm = ActionStateMachine::new();
        sm.apply(Gesture::BeginTakeCard, &ctx()).unwrap();
        assert_eq!(
            sm.apply(Gesture::BeginPlaceArmy, &ctx()),
            Err(StageError::Busy)
        );
        assert_eq!(
            sm.apply(Gesture::BeginTakeCard, &ctx()),
            Err(StageError::Busy)
        );
    }

    #[test]
    fn discard_zone_destroys_the_stack_and_logs() {
        let mut sm = ActionStateMachine::new();
        sm.apply(pick("Peru"), &ctx()).unwrap();
        sm.apply(pick("Peru"), &ctx()).unwrap();

        let effect = sm.apply(Gesture::DropOnDiscard, &ctx()).unwrap();
        assert_eq!(
            effect,
            Some(Effect::DiscardArmy {
                color: "#ff0000".into(),
                amount: 2
            })
        );
        assert_eq!(*sm.state(), ActionState::Idle);
    }

    #[test]
    fn cancel_discards_without_restoring() {
        let mut sm = ActionStateMachine::new();
        sm.apply(pick("Peru"), &ctx()).unwrap();

        // No compensating place effect: the removed army stays removed.
        assert_eq!(sm.apply(Gesture::Cancel, &ctx()), Ok(None));
        assert_eq!(*sm.state(), ActionState::Idle);
    }

    #[test]
    fn take_card_flow() {
        let mut sm = ActionStateMachine::new();
        assert_eq!(sm.apply(Gesture::BeginTakeCard, &ctx()), Ok(None));
        assert_eq!(
            sm.apply(Gesture::DropOnHand, &ctx()).unwrap(),
            Some(Effect::TakeCard)
        );
        assert_eq!(*sm.state(), ActionState::Idle);
    }

    #[test]
    fn hand_card_can_be_restaged_but_not_repicked() {
        let mut sm = ActionStateMachine::new();
        let first = Gesture::PickHandCard {
            kind: CardKind::Troop(0),
            slot: CardSlot::Hand(0),
        };
        let second = Gesture::PickHandCard {
            kind: CardKind::Troop(2),
            slot: CardSlot::Hand(2),
        };

        sm.apply(first.clone(), &ctx()).unwrap();
        // Same slot again: nothing changes.
        assert_eq!(sm.apply(first, &ctx()), Ok(None));
        // A different slot replaces the staged card.
        sm.apply(second, &ctx()).unwrap();
        assert!(matches!(
            sm.state(),
            ActionState::MovingCard {
                slot: CardSlot::Hand(2),
                ..
            }
        ));
    }

    #[test]
    fn own_displayed_card_cannot_be_picked_from_hand() {
        let mut sm = ActionStateMachine::new();
        let mut context = ctx();
        context.own_displayed_slots = vec![CardSlot::Hand(1)];

        let gesture = Gesture::PickHandCard {
            kind: CardKind::Troop(1),
            slot: CardSlot::Hand(1),
        };
        assert_eq!(sm.apply(gesture, &context), Err(StageError::CardUnavailable));
    }

    #[test]
    fn display_drop_respects_singleton_ownership() {
        let pick_card = Gesture::PickHandCard {
            kind: CardKind::Troop(1),
            slot: CardSlot::Hand(0),
        };

        // Zone owned by someone else: the action resolves with no effect.
        let mut sm = ActionStateMachine::new();
        let mut taken = ctx();
        taken.display_owner = Some(UserId::from("bob"));
        sm.apply(pick_card.clone(), &taken).unwrap();
        assert_eq!(sm.apply(Gesture::DropOnDisplay, &taken), Ok(None));
        assert_eq!(*sm.state(), ActionState::Idle);

        // Zone owned by the player themselves: the card is displayed.
        let mut sm = ActionStateMachine::new();
        let mut own = ctx();
        own.display_owner = Some(UserId::from("alice"));
        sm.apply(pick_card, &own).unwrap();
        assert_eq!(
            sm.apply(Gesture::DropOnDisplay, &own).unwrap(),
            Some(Effect::DisplayCard {
                kind: CardKind::Troop(1),
                slot: CardSlot::Hand(0)
            })
        );
    }

    #[test]
    fn displayed_card_returns_to_hand() {
        let mut sm = ActionStateMachine::new();
        let mut own = ctx();
        own.display_owner = Some(UserId::from("alice"));

        sm.apply(
            Gesture::PickDisplayedCard {
                kind: CardKind::Troop(2),
                display_index: 0,
                slot: CardSlot::Hand(3),
            },
            &own,
        )
        .unwrap();
        assert_eq!(
            sm.apply(Gesture::DropOutsideDisplay, &own).unwrap(),
            Some(Effect::RemoveDisplayedCard {
                kind: CardKind::Troop(2),
                slot: CardSlot::Hand(3)
            })
        );
    }

    #[test]
    fn foreign_display_cannot_be_picked() {
        let mut sm = ActionStateMachine::new();
        let mut taken = ctx();
        taken.display_owner = Some(UserId::from("bob"));

        let gesture = Gesture::PickDisplayedCard {
            kind: CardKind::Troop(0),
            display_index: 0,
            slot: CardSlot::Hand(0),
        };
        assert_eq!(sm.apply(gesture, &taken), Err(StageError::CardUnavailable));
    }

    #[test]
    fn unmatched_drops_are_inert() {
        let mut sm = ActionStateMachine::new();
        assert_eq!(sm.apply(Gesture::DropOnHand, &ctx()), Ok(None));
        assert_eq!(
            sm.apply(
                Gesture::DropOnCountry {
                    country: "Peru".into()
                },
                &ctx()
            ),
            Ok(None)
        );
        assert_eq!(sm.apply(Gesture::Cancel, &ctx()), Ok(None));
        assert_eq!(*sm.state(), ActionState::Idle);
    }
}
