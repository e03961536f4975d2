//! Contract required from the remote shared-state store, plus the in-process
//! reference backend used by tests and local play.

mod keys;
mod memory;
mod storage;

pub use keys::DocKey;
pub use memory::MemoryStore;
pub use storage::{StorageError, StorageResult};

use futures::{future::BoxFuture, stream::BoxStream};
use serde_json::Value;
use tokio::sync::watch;

/// Pure document transformation applied inside a transaction.
///
/// The function may run several times before the store commits an update
/// derived from the latest value, so it must be free of external side
/// effects. Returning `None` deletes the document.
pub type Mutator = Box<dyn Fn(Option<Value>) -> Option<Value> + Send + Sync>;

/// Token identifying a registered disconnect write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(pub u64);

/// Abstraction over the keyed shared-state store.
///
/// Each key addresses an independently-transacted document; there is no
/// multi-document transaction primitive. Conflicting concurrent writes are
/// resolved inside [`StateStore::transact`] and never surface to callers
/// short of the backend's retry budget.
pub trait StateStore: Send + Sync {
    /// Atomic read-modify-write with internal retry on conflicting writes.
    /// Resolves to the committed value.
    fn transact(
        &self,
        key: DocKey,
        mutator: Mutator,
    ) -> BoxFuture<'static, StorageResult<Option<Value>>>;

    /// Plain overwrite of a document (`None` deletes it).
    fn set(&self, key: DocKey, value: Option<Value>) -> BoxFuture<'static, StorageResult<()>>;

    /// Single read of the current value.
    fn once(&self, key: DocKey) -> BoxFuture<'static, StorageResult<Option<Value>>>;

    /// Live read: emits the current value immediately, then on every
    /// committed change.
    fn subscribe(&self, key: DocKey) -> BoxStream<'static, Option<Value>>;

    /// Register a store-managed write applied if this client's connection is
    /// lost, with no further client code running.
    fn on_disconnect(
        &self,
        key: DocKey,
        value: Option<Value>,
    ) -> BoxFuture<'static, StorageResult<HookId>>;

    /// Cancel a pending disconnect write.
    fn cancel_on_disconnect(&self, hook: HookId) -> BoxFuture<'static, StorageResult<()>>;

    /// Connection flag of this client, updated by the store.
    fn connectivity(&self) -> watch::Receiver<bool>;

    /// Epoch milliseconds at the server.
    fn server_time(&self) -> BoxFuture<'static, StorageResult<i64>>;
}
