//! Atomic mutation operations over the shared documents.
//!
//! Every operation is a pure mutator run through [`StateStore::transact`].
//! Mutators may re-run when the transaction loses to a concurrent write, so
//! they never carry side effects and all randomness is drawn before the
//! transaction starts.

pub mod board;
pub mod cards;
pub mod game;
pub mod log;

use std::sync::Arc;

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::store::{DocKey, StateStore, StorageError, StorageResult};

/// Run `apply` as a typed transaction on `key`.
///
/// The raw document is decoded before `apply` and re-encoded after. A stored
/// value that no longer decodes is left untouched, and then surfaces as
/// [`StorageError::Codec`] when the committed value is read back; returning
/// `None` from `apply` deletes the document.
pub(crate) async fn transact_doc<T, F>(
    store: &Arc<dyn StateStore>,
    key: DocKey,
    apply: F,
) -> StorageResult<Option<T>>
where
    T: Serialize + DeserializeOwned + 'static,
    F: Fn(Option<T>) -> Option<T> + Send + Sync + 'static,
{
    let committed = store
        .transact(
            key.clone(),
            Box::new(move |raw: Option<Value>| {
                let fallback = raw.clone();
                let current = match raw {
                    Some(value) => match serde_json::from_value::<T>(value) {
                        Ok(doc) => Some(doc),
                        Err(_) => return fallback,
                    },
                    None => None,
                };
                match apply(current) {
                    Some(next) => match serde_json::to_value(next) {
                        Ok(value) => Some(value),
                        Err(_) => fallback,
                    },
                    None => None,
                }
            }),
        )
        .await?;

    match committed {
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|source| StorageError::Codec {
                key: key.to_string(),
                source,
            }),
        None => Ok(None),
    }
}
