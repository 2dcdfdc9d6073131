//! Ports (interfaces) for the application layer.
//!
//! In hexagonal architecture, ports define the interfaces that the application
//! layer needs. Infrastructure adapters implement these ports.

use crate::application::error::StoreError;
use serde_json::Value;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Port for obtaining current time.
///
/// Wall-clock time is required because timestamps are persisted and compared
/// across process instances. Infrastructure provides concrete implementations
/// (SystemClock, MockClock).
pub trait Clock: Send + Sync + Debug {
    /// Get the current time.
    fn now(&self) -> SystemTime;

    /// Get the current time in milliseconds since the Unix epoch.
    fn now_millis(&self) -> u64 {
        epoch_millis(self.now())
    }
}

/// Milliseconds since the Unix epoch; times before the epoch map to 0.
pub fn epoch_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(crate::domain::duration_millis)
        .unwrap_or(0)
}

/// Port for concurrent key-value storage.
///
/// This abstraction allows the application layer to store and retrieve values
/// without depending on specific concurrent data structure implementations.
/// Infrastructure provides concrete implementations (ShardedStorage).
pub trait Storage<K, V>: Send + Sync + Debug
where
    K: Hash + Eq + Clone + Send + Sync,
    V: Send + Sync,
{
    /// Access an entry with mutable access, creating it if necessary.
    ///
    /// # Arguments
    /// * `key` - The key to look up
    /// * `factory` - Function to create a new value if the key doesn't exist
    /// * `accessor` - Function that gets mutable access to the value
    ///
    /// # Returns
    /// The result from the accessor function
    fn with_entry_mut<F, R>(&self, key: K, factory: impl FnOnce() -> V, accessor: F) -> R
    where
        F: FnOnce(&mut V) -> R;

    /// Remove an entry, returning whether it existed.
    fn remove(&self, key: &K) -> bool;

    /// Get the number of entries in the storage.
    fn len(&self) -> usize;

    /// Check if the storage is empty.
    fn is_empty(&self) -> bool;

    /// Clear all entries from the storage.
    fn clear(&self);

    /// Iterate over all entries, providing access to both key and value.
    fn for_each<F>(&self, f: F)
    where
        F: FnMut(&K, &V);

    /// Remove entries for which the predicate returns false.
    fn retain<F>(&self, f: F)
    where
        F: FnMut(&K, &mut V) -> bool;
}

/// A schemaless document as held by the shared store.
pub type Document = Value;

/// Result of a transaction body.
///
/// The body runs against the current snapshot of one document and either
/// commits a replacement or aborts, leaving the document untouched. Both
/// carry the value returned to the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum TxOutcome<T> {
    Commit(Document, T),
    Abort(T),
}

/// Equality query over one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// Field compared for equality
    pub field: String,
    /// Value the field must equal
    pub equals: Value,
    /// Sort descending by this field; `None` leaves store order
    pub order_by_desc: Option<String>,
    /// Maximum number of documents returned
    pub limit: usize,
}

impl Query {
    pub fn eq(field: impl Into<String>, equals: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            equals: equals.into(),
            order_by_desc: None,
            limit: usize::MAX,
        }
    }

    pub fn order_by_desc(mut self, field: impl Into<String>) -> Self {
        self.order_by_desc = Some(field.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Whether a document satisfies the equality filter.
    pub fn matches(&self, document: &Document) -> bool {
        document.get(&self.field) == Some(&self.equals)
    }
}

/// Port for the shared transactional document store.
///
/// This is the only state shared between process instances. Adapters must
/// serialize conflicting transactions on the same document: two concurrent
/// transactions never both commit against the same snapshot. Infrastructure
/// provides concrete implementations (InMemoryDocumentStore,
/// RedisDocumentStore).
pub trait DocumentStore: Send + Sync + Debug {
    /// Run a read-modify-write transaction on one document.
    ///
    /// `body` may run several times if the adapter retries on conflict, so
    /// it must be free of side effects.
    fn transact<T, F>(
        &self,
        collection: &str,
        id: &str,
        body: F,
    ) -> impl Future<Output = Result<T, StoreError>> + Send
    where
        T: Send,
        F: FnMut(Option<&Document>) -> TxOutcome<T> + Send;

    /// Append a new document, returning its generated id.
    fn append(
        &self,
        collection: &str,
        document: Document,
    ) -> impl Future<Output = Result<String, StoreError>> + Send;

    /// Run an equality query.
    fn query(
        &self,
        collection: &str,
        query: &Query,
    ) -> impl Future<Output = Result<Vec<Document>, StoreError>> + Send;
}

impl<D: DocumentStore> DocumentStore for std::sync::Arc<D> {
    fn transact<T, F>(
        &self,
        collection: &str,
        id: &str,
        body: F,
    ) -> impl Future<Output = Result<T, StoreError>> + Send
    where
        T: Send,
        F: FnMut(Option<&Document>) -> TxOutcome<T> + Send,
    {
        (**self).transact(collection, id, body)
    }

    fn append(
        &self,
        collection: &str,
        document: Document,
    ) -> impl Future<Output = Result<String, StoreError>> + Send {
        (**self).append(collection, document)
    }

    fn query(
        &self,
        collection: &str,
        query: &Query,
    ) -> impl Future<Output = Result<Vec<Document>, StoreError>> + Send {
        (**self).query(collection, query)
    }
}

/// Bound a store call by `limit`, mapping expiry to [`StoreError::Timeout`].
pub async fn with_timeout<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, StoreError> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(limit)),
    }
}
