//! Client/server clock offset, sampled once per session.

use std::sync::{
    Arc,
    atomic::{AtomicI64, Ordering},
};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{info, warn};

use crate::store::StateStore;

/// Normalizes timestamp math across clients with drifting local clocks.
///
/// Stored timestamps are server time: writers stamp entries with
/// [`Clock::now_server_ms`], readers compare stored expiries against the same
/// value, and the projector localizes stored timestamps back with
/// [`Clock::to_local_ms`]. A failed sample degrades to local-clock semantics.
#[derive(Debug, Clone, Default)]
pub struct Clock {
    offset_ms: Arc<AtomicI64>,
}

impl Clock {
    /// Clock with no offset recorded yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clock with a fixed, already-known offset.
    pub fn with_offset(offset_ms: i64) -> Self {
        let clock = Self::default();
        clock.offset_ms.store(offset_ms, Ordering::Relaxed);
        clock
    }

    /// Sample the store's server time once and record the offset.
    pub async fn sync(&self, store: &dyn StateStore) {
        match store.server_time().await {
            Ok(server_ms) => {
                let offset = server_ms - local_now_ms();
                self.offset_ms.store(offset, Ordering::Relaxed);
                info!(offset_ms = offset, "clock offset sampled");
            }
            Err(err) => {
                warn!(error = %err, "server time unavailable, using local clock");
                self.offset_ms.store(0, Ordering::Relaxed);
            }
        }
    }

    /// Recorded offset in milliseconds (server minus local).
    pub fn offset_ms(&self) -> i64 {
        self.offset_ms.load(Ordering::Relaxed)
    }

    /// Current time in server-normalized milliseconds.
    pub fn now_server_ms(&self) -> i64 {
        local_now_ms() + self.offset_ms()
    }

    /// Convert a stored server timestamp into local milliseconds.
    pub fn to_local_ms(&self, server_ms: i64) -> i64 {
        server_ms - self.offset_ms()
    }
}

/// Local wall-clock milliseconds since the Unix epoch.
pub(crate) fn local_now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use futures::FutureExt;
    use futures::{future::BoxFuture, stream::BoxStream};
    use serde_json::Value;
    use tokio::sync::watch;

    use super::*;
    use crate::store::{DocKey, HookId, MemoryStore, Mutator, StorageError, StorageResult};

    /// Store whose server-time endpoint is down; everything else is unused.
    struct NoServerTime;

    impl StateStore for NoServerTime {
        fn transact(
            &self,
            _key: DocKey,
            _mutator: Mutator,
        ) -> BoxFuture<'static, StorageResult<Option<Value>>> {
            async { Ok(None) }.boxed()
        }

        fn set(&self, _key: DocKey, _value: Option<Value>) -> BoxFuture<'static, StorageResult<()>> {
            async { Ok(()) }.boxed()
        }

        fn once(&self, _key: DocKey) -> BoxFuture<'static, StorageResult<Option<Value>>> {
            async { Ok(None) }.boxed()
        }

        fn subscribe(&self, _key: DocKey) -> BoxStream<'static, Option<Value>> {
            Box::pin(futures::stream::empty())
        }

        fn on_disconnect(
            &self,
            _key: DocKey,
            _value: Option<Value>,
        ) -> BoxFuture<'static, StorageResult<HookId>> {
            async { Ok(HookId(0)) }.boxed()
        }

        fn cancel_on_disconnect(&self, _hook: HookId) -> BoxFuture<'static, StorageResult<()>> {
            async { Ok(()) }.boxed()
        }

        fn connectivity(&self) -> watch::Receiver<bool> {
            let (tx, rx) = watch::channel(true);
            std::mem::forget(tx);
            rx
        }

        fn server_time(&self) -> BoxFuture<'static, StorageResult<i64>> {
            async {
                Err(StorageError::unavailable(
                    "time endpoint down".into(),
                    std::io::Error::other("unreachable"),
                ))
            }
            .boxed()
        }
    }

    #[test]
    fn offset_arithmetic_round_trips() {
        let clock = Clock::with_offset(2_500);
        let stored = clock.now_server_ms();
        let localized = clock.to_local_ms(stored);
        assert!((localized - local_now_ms()).abs() < 100);
    }

    #[tokio::test]
    async fn sync_tracks_server_skew() {
        let store = MemoryStore::with_clock_skew(60_000);
        let clock = Clock::new();
        clock.sync(store.as_ref()).await;
        assert!((clock.offset_ms() - 60_000).abs() < 1_000);
    }

    #[tokio::test]
    async fn failed_sync_degrades_to_local_clock() {
        // A failed sample resets the offset rather than keeping a stale one.
        let clock = Clock::with_offset(9_000);
        clock.sync(&NoServerTime).await;
        assert_eq!(clock.offset_ms(), 0);
        assert!((clock.now_server_ms() - local_now_ms()).abs() < 100);
    }
}
