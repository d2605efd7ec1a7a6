//! Serde-typed object stores.

use crate::error::CoreResult;
use crate::store::ObjectStore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::marker::PhantomData;
use stowdb_engine::Key;

/// An [`ObjectStore`] whose records are values of `T`.
///
/// Records are converted through `serde_json`, so `T` must map to a JSON
/// object when the store uses an in-line key path.
///
/// ```rust,ignore
/// #[derive(Serialize, Deserialize)]
/// struct Identity { id: String, email: String }
///
/// let identities = db.typed::<Identity>("identities");
/// let key = identities.put(&Identity { id: "ada".into(), email: "a@x".into() }, None).await?;
/// let found: Option<Identity> = identities.get(key).await?;
/// ```
pub struct TypedStore<T> {
    store: ObjectStore,
    _marker: PhantomData<fn() -> T>,
}

impl<T> TypedStore<T>
where
    T: Serialize + DeserializeOwned,
{
    pub(crate) fn new(store: ObjectStore) -> Self {
        Self {
            store,
            _marker: PhantomData,
        }
    }

    /// Returns the untyped store.
    #[must_use]
    pub fn untyped(&self) -> &ObjectStore {
        &self.store
    }

    /// Reads and decodes a record.
    pub async fn get(&self, key: impl Into<Key>) -> CoreResult<Option<T>> {
        match self.store.get(key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Encodes and stores a record, returning its effective key.
    pub async fn put(&self, item: &T, key: Option<Key>) -> CoreResult<Key> {
        let value = serde_json::to_value(item)?;
        self.store.put(value, key).await
    }

    /// Encodes and inserts a record, failing if its key already exists.
    pub async fn add(&self, item: &T, key: Option<Key>) -> CoreResult<Key> {
        let value = serde_json::to_value(item)?;
        self.store.add(value, key).await
    }

    /// Removes a record.
    pub async fn delete(&self, key: impl Into<Key>) -> CoreResult<()> {
        self.store.delete(key).await
    }

    /// Reads and decodes every record in key order.
    pub async fn get_all(&self) -> CoreResult<Vec<T>> {
        self.store
            .get_all()
            .await?
            .into_iter()
            .map(|value| serde_json::from_value(value).map_err(Into::into))
            .collect()
    }

    /// Counts the records.
    pub async fn count(&self) -> CoreResult<u64> {
        self.store.count().await
    }
}

impl<T> Clone for TypedStore<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for TypedStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedStore")
            .field("store", &self.store.name())
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}
