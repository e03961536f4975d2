//! In-process reference backend with optimistic concurrency semantics.

use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError,
    atomic::{AtomicI64, AtomicU64, Ordering},
};
use std::time::Duration;

use async_stream::stream;
use dashmap::DashMap;
use futures::{FutureExt, future::BoxFuture, stream::BoxStream};
use serde_json::Value;
use tokio::sync::watch;
use tracing::trace;

use super::{DocKey, HookId, Mutator, StateStore, StorageError, StorageResult};
use crate::clock::local_now_ms;

/// Upper bound on optimistic retries before a transaction gives up.
const MAX_TRANSACT_ATTEMPTS: u32 = 32;
/// Base delay of the bounded backoff between conflicting attempts.
const BACKOFF_BASE: Duration = Duration::from_micros(50);
/// Ceiling for the backoff delay.
const BACKOFF_MAX: Duration = Duration::from_millis(5);

#[derive(Default)]
struct Slot {
    version: u64,
    value: Option<Value>,
}

struct Cell {
    slot: Mutex<Slot>,
    publish: watch::Sender<Option<Value>>,
}

impl Cell {
    fn new() -> Arc<Self> {
        let (publish, _) = watch::channel(None);
        Arc::new(Cell {
            slot: Mutex::new(Slot::default()),
            publish,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Unconditional write; publishes while the slot lock is held so
    /// subscribers always observe commits in version order.
    fn store(&self, value: Option<Value>) {
        let mut slot = self.lock();
        slot.version += 1;
        slot.value = value.clone();
        let _ = self.publish.send(value);
    }
}

/// In-process [`StateStore`] with compare-and-swap transactions.
///
/// Behaves like the remote store contract: per-document serialization of
/// conflicting transactions, push-based subscriptions, disconnect hooks and
/// a (skewable) server clock. The connection can be dropped and restored
/// from tests via [`MemoryStore::simulate_disconnect`] /
/// [`MemoryStore::simulate_reconnect`].
pub struct MemoryStore {
    cells: DashMap<DocKey, Arc<Cell>>,
    hooks: DashMap<u64, (DocKey, Option<Value>)>,
    next_hook: AtomicU64,
    connected: watch::Sender<bool>,
    clock_skew_ms: AtomicI64,
}

impl MemoryStore {
    /// Fresh, connected store with no documents.
    pub fn new() -> Arc<Self> {
        let (connected, _) = watch::channel(true);
        Arc::new(MemoryStore {
            cells: DashMap::new(),
            hooks: DashMap::new(),
            next_hook: AtomicU64::new(1),
            connected,
            clock_skew_ms: AtomicI64::new(0),
        })
    }

    /// Fresh store whose server clock runs `skew_ms` ahead of local time.
    pub fn with_clock_skew(skew_ms: i64) -> Arc<Self> {
        let store = Self::new();
        store.clock_skew_ms.store(skew_ms, Ordering::Relaxed);
        store
    }

    /// Apply every pending disconnect write, then flip the connection flag.
    pub fn simulate_disconnect(&self) {
        let ids: Vec<u64> = self.hooks.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, (key, value))) = self.hooks.remove(&id) {
                self.cell(&key).store(value);
            }
        }
        let _ = self.connected.send(false);
    }

    /// Restore the connection flag.
    pub fn simulate_reconnect(&self) {
        let _ = self.connected.send(true);
    }

    /// Number of disconnect writes currently armed.
    pub fn pending_hooks(&self) -> usize {
        self.hooks.len()
    }

    fn cell(&self, key: &DocKey) -> Arc<Cell> {
        self.cells
            .entry(key.clone())
            .or_insert_with(Cell::new)
            .clone()
    }
}

impl StateStore for MemoryStore {
    fn transact(
        &self,
        key: DocKey,
        mutator: Mutator,
    ) -> BoxFuture<'static, StorageResult<Option<Value>>> {
        let cell = self.cell(&key);
        let key = key.to_string();
        async move {
            let mut backoff = BACKOFF_BASE;
            for attempt in 0..MAX_TRANSACT_ATTEMPTS {
                let (base_version, base_value) = {
                    let slot = cell.lock();
                    (slot.version, slot.value.clone())
                };

                let next = mutator(base_value);

                {
                    let mut slot = cell.lock();
                    if slot.version == base_version {
                        slot.version += 1;
                        slot.value = next.clone();
                        let _ = cell.publish.send(next.clone());
                        return Ok(next);
                    }
                }

                trace!(key = %key, attempt, "transaction lost to a concurrent write, retrying");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(BACKOFF_MAX);
            }
            Err(StorageError::Contention { key })
        }
        .boxed()
    }

    fn set(&self, key: DocKey, value: Option<Value>) -> BoxFuture<'static, StorageResult<()>> {
        let cell = self.cell(&key);
        async move {
            cell.store(value);
            Ok(())
        }
        .boxed()
    }

    fn once(&self, key: DocKey) -> BoxFuture<'static, StorageResult<Option<Value>>> {
        let cell = self.cell(&key);
        async move { Ok(cell.lock().value.clone()) }.boxed()
    }

    fn subscribe(&self, key: DocKey) -> BoxStream<'static, Option<Value>> {
        let cell = self.cell(&key);
        Box::pin(stream! {
            let mut rx = cell.publish.subscribe();
            let initial = rx.borrow_and_update().clone();
            yield initial;
            while rx.changed().await.is_ok() {
                let next = rx.borrow_and_update().clone();
                yield next;
            }
        })
    }

    fn on_disconnect(
        &self,
        key: DocKey,
        value: Option<Value>,
    ) -> BoxFuture<'static, StorageResult<HookId>> {
        let id = self.next_hook.fetch_add(1, Ordering::Relaxed);
        self.hooks.insert(id, (key, value));
        async move { Ok(HookId(id)) }.boxed()
    }

    fn cancel_on_disconnect(&self, hook: HookId) -> BoxFuture<'static, StorageResult<()>> {
        self.hooks.remove(&hook.0);
        async move { Ok(()) }.boxed()
    }

    fn connectivity(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }

    fn server_time(&self) -> BoxFuture<'static, StorageResult<i64>> {
        let skew = self.clock_skew_ms.load(Ordering::Relaxed);
        async move { Ok(local_now_ms() + skew) }.boxed()
    }
}
