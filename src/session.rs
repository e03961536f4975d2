//! Composition root: one connected client's handle on a game.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{info, warn};

use crate::SyncError;
use crate::action::{ActionState, ActionStateMachine, Effect, Gesture, StageContext};
use crate::clock::Clock;
use crate::config::AppConfig;
use crate::events::{EventContent, LogCode};
use crate::model::{CardKind, GameId, UserId};
use crate::ops;
use crate::presence::{self, PresenceGuard};
use crate::projector::{GameView, Projector};
use crate::store::StateStore;

/// The acting player's identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerRef {
    /// Stable user id.
    pub id: UserId,
    /// Display name used in log notifications.
    pub name: String,
}

/// One client's connection to a game.
///
/// Owns the single staging machine, the projector and the presence guard;
/// created by the composition root and passed by reference, never held in an
/// ambient singleton. Gestures are evaluated on one logical thread: the
/// staging lock is only held for the synchronous transition, and the store
/// round-trip is awaited before the gesture call returns.
pub struct Session {
    store: Arc<dyn StateStore>,
    config: AppConfig,
    clock: Clock,
    game: GameId,
    player: PlayerRef,
    action: Mutex<ActionStateMachine>,
    projector: Projector,
    presence: Option<PresenceGuard>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("game", &self.game)
            .field("player", &self.player)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Join `game` as `player`: validates the code, syncs the clock, runs the
    /// join transactions, attaches presence and starts projecting.
    pub async fn join(
        store: Arc<dyn StateStore>,
        config: AppConfig,
        player: PlayerRef,
        game: GameId,
    ) -> Result<Session, SyncError> {
        ops::game::check_code(&store, &game).await?;

        let clock = Clock::new();
        clock.sync(store.as_ref()).await;

        ops::game::join_game(&store, &config, &game, &player.id).await?;
        let presence = presence::attach(store.clone(), game.clone(), player.id.clone());
        let projector = Projector::spawn(
            store.clone(),
            clock.clone(),
            game.clone(),
            player.id.clone(),
        );

        info!(game = %game, player = %player.id, "joined game");
        Ok(Session {
            store,
            config,
            clock,
            game,
            player,
            action: Mutex::new(ActionStateMachine::new()),
            projector,
            presence: Some(presence),
        })
    }

    /// The joined game's id.
    pub fn game_id(&self) -> &GameId {
        &self.game
    }

    /// The configuration in use (palette, countries, missions).
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// The session clock (offset inspection).
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Latest projected view.
    pub fn view(&self) -> GameView {
        self.projector.current()
    }

    /// Watch receiver over projected views.
    pub fn watch(&self) -> tokio::sync::watch::Receiver<GameView> {
        self.projector.subscribe()
    }

    /// Currently staged action.
    pub fn action(&self) -> ActionState {
        lock(&self.action).state().clone()
    }

    /// Feed one user gesture through the staging machine and run whatever
    /// mutation it resolves to.
    pub async fn gesture(&self, gesture: Gesture) -> Result<(), SyncError> {
        let ctx = self.stage_context();
        let effect = lock(&self.action).apply(gesture, &ctx)?;
        if let Some(effect) = effect {
            self.perform(effect).await?;
        }
        Ok(())
    }

    /// Pick or change color; announces the change on success.
    pub async fn choose_color(&self, color: &str) -> Result<(), SyncError> {
        ops::game::set_color(&self.store, &self.game, &self.player.id, color).await?;
        self.log(LogCode::ChangeColor, self.content()).await;
        Ok(())
    }

    /// Throw one random card out of the hand.
    pub async fn throw_random_card(&self) -> Result<(), SyncError> {
        ops::cards::throw_random_card(&self.store, &self.game, &self.player.id).await?;
        self.log(LogCode::ThrowCard, self.content()).await;
        Ok(())
    }

    /// Discard every card the player currently has on display.
    pub async fn discard_displayed_cards(&self) -> Result<(), SyncError> {
        let view = self.projector.current();
        let Some(display) = view
            .displayed_cards
            .filter(|display| display.owner == self.player.id)
        else {
            return Err(SyncError::InvalidState(
                "you have no displayed cards to discard".into(),
            ));
        };

        let tags: Vec<u8> = display
            .list
            .iter()
            .filter_map(|card| match &card.kind {
                CardKind::Troop(tag) => Some(*tag),
                CardKind::Mission(_) => None,
            })
            .collect();

        ops::cards::discard_displayed_cards(&self.store, &self.game, &self.player.id, display.list)
            .await?;
        self.log(
            LogCode::DiscardCards,
            EventContent {
                cards: Some(tags),
                ..self.content()
            },
        )
        .await;
        Ok(())
    }

    /// Start the game (creator only).
    pub async fn start_game(&self) -> Result<(), SyncError> {
        ops::game::start_game(&self.store, &self.game, &self.player.id).await
    }

    /// Append a mission to the pool (creator only).
    pub async fn add_mission(&self, text: &str) -> Result<(), SyncError> {
        ops::game::add_mission(&self.store, &self.game, &self.player.id, text).await
    }

    /// Replace the mission at `index` (creator only).
    pub async fn save_mission(&self, index: usize, text: &str) -> Result<(), SyncError> {
        ops::game::save_mission(&self.store, &self.game, &self.player.id, index, text).await
    }

    /// Remove the mission at `index` (creator only).
    pub async fn delete_mission(&self, index: usize) -> Result<(), SyncError> {
        ops::game::delete_mission(&self.store, &self.game, &self.player.id, index).await
    }

    /// Voluntary leave: detaches presence and stops projecting.
    pub async fn leave(mut self) {
        if let Some(presence) = self.presence.take() {
            presence.detach().await;
        }
        info!(game = %self.game, player = %self.player.id, "left game");
    }

    fn stage_context(&self) -> StageContext {
        let view = self.projector.current();
        let own_displayed_slots = view
            .displayed_cards
            .as_ref()
            .filter(|display| display.owner == self.player.id)
            .map(|display| display.list.iter().map(|card| card.slot).collect())
            .unwrap_or_default();
        StageContext {
            player: self.player.id.clone(),
            own_color: view.colors.get(&self.player.id).cloned(),
            display_owner: view.displayed_cards.map(|display| display.owner),
            own_displayed_slots,
        }
    }

    async fn perform(&self, effect: Effect) -> Result<(), SyncError> {
        match effect {
            Effect::PlaceArmy {
                country,
                color,
                amount,
            } => {
                ops::board::place_army(&self.store, &self.game, &country, Some(&color), amount)
                    .await
            }
            Effect::RemoveArmy {
                country,
                army_id,
                amount,
            } => ops::board::remove_army(&self.store, &self.game, &country, &army_id, amount).await,
            Effect::TakeCard => {
                ops::cards::take_card(&self.store, &self.game, &self.player.id).await?;
                self.log(LogCode::TakeCard, self.content()).await;
                Ok(())
            }
            Effect::DisplayCard { kind, slot } => {
                ops::cards::display_card(
                    &self.store,
                    &self.game,
                    &self.player.id,
                    kind.clone(),
                    slot,
                )
                .await?;
                self.log(
                    LogCode::DisplayCard,
                    EventContent {
                        card: Some(kind),
                        ..self.content()
                    },
                )
                .await;
                Ok(())
            }
            Effect::RemoveDisplayedCard { kind, slot } => {
                ops::cards::remove_displayed_card(&self.store, &self.game, &self.player.id, slot)
                    .await?;
                self.log(
                    LogCode::HideCard,
                    EventContent {
                        card: Some(kind),
                        ..self.content()
                    },
                )
                .await;
                Ok(())
            }
            Effect::DiscardArmy { color: _, amount } => {
                self.log(
                    LogCode::DiscardArmy,
                    EventContent {
                        amount: Some(amount),
                        ..self.content()
                    },
                )
                .await;
                Ok(())
            }
        }
    }

    fn content(&self) -> EventContent {
        EventContent {
            user: self.player.name.clone(),
            ..EventContent::default()
        }
    }

    /// Notification pushes are fire-and-forget: a failed append never fails
    /// the action that triggered it.
    async fn log(&self, code: LogCode, content: EventContent) {
        if let Err(err) = ops::log::push_to_log(
            &self.store,
            &self.clock,
            &self.game,
            &self.player.id,
            code,
            content,
        )
        .await
        {
            warn!(code = ?code, error = %err, "failed to push log notification");
        }
    }
}

fn lock(machine: &Mutex<ActionStateMachine>) -> MutexGuard<'_, ActionStateMachine> {
    machine.lock().unwrap_or_else(PoisonError::into_inner)
}
