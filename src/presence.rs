//! Presence tracking wired to the store's connection lifecycle.
//!
//! The store itself flips the flag false when the connection drops (no
//! client code runs); this module only arms that write and keeps the flag
//! true while connected. Failures are fail-open: presence keeps its last
//! known state rather than failing the session.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::model::{GameId, UserId};
use crate::store::{DocKey, HookId, StateStore};

/// Wire `player`'s presence flag to the connection lifecycle.
///
/// Whenever the store reports the connection up, a disconnect write (flag
/// false) is armed before the flag is set true, so the store always wins
/// over a vanished client. Re-arms after every reconnect.
pub fn attach(store: Arc<dyn StateStore>, game: GameId, player: UserId) -> PresenceGuard {
    let key = DocKey::Presence(game, player);
    let hook: Arc<Mutex<Option<HookId>>> = Arc::new(Mutex::new(None));
    let task = tokio::spawn(watch_connectivity(
        store.clone(),
        key.clone(),
        hook.clone(),
    ));
    PresenceGuard {
        store,
        key,
        hook,
        task,
    }
}

async fn watch_connectivity(
    store: Arc<dyn StateStore>,
    key: DocKey,
    hook_slot: Arc<Mutex<Option<HookId>>>,
) {
    let mut connectivity = store.connectivity();
    loop {
        if *connectivity.borrow_and_update() {
            arm(&store, &key, &hook_slot).await;
        }
        if connectivity.changed().await.is_err() {
            break;
        }
    }
}

async fn arm(store: &Arc<dyn StateStore>, key: &DocKey, hook_slot: &Arc<Mutex<Option<HookId>>>) {
    match store
        .on_disconnect(key.clone(), Some(Value::Bool(false)))
        .await
    {
        Ok(hook) => {
            *lock(hook_slot) = Some(hook);
            if let Err(err) = store.set(key.clone(), Some(Value::Bool(true))).await {
                warn!(key = %key, error = %err, "failed to publish presence flag");
            }
        }
        Err(err) => {
            warn!(key = %key, error = %err, "failed to arm disconnect hook; presence keeps its last state");
        }
    }
}

/// Detach handle returned by [`attach`].
pub struct PresenceGuard {
    store: Arc<dyn StateStore>,
    key: DocKey,
    hook: Arc<Mutex<Option<HookId>>>,
    task: JoinHandle<()>,
}

impl PresenceGuard {
    /// Voluntary leave: cancel the disconnect hook and mark the player
    /// offline explicitly.
    pub async fn detach(self) {
        self.task.abort();
        let hook = lock(&self.hook).take();
        if let Some(hook) = hook {
            if let Err(err) = self.store.cancel_on_disconnect(hook).await {
                warn!(key = %self.key, error = %err, "failed to cancel disconnect hook");
            }
        }
        if let Err(err) = self.store.set(self.key.clone(), Some(Value::Bool(false))).await {
            warn!(key = %self.key, error = %err, "failed to clear presence flag");
        }
    }
}

impl Drop for PresenceGuard {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn lock(slot: &Mutex<Option<HookId>>) -> MutexGuard<'_, Option<HookId>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}
