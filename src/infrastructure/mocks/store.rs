//! Fault-injecting document store for testing.

use crate::application::error::StoreError;
use crate::application::ports::{Document, DocumentStore, Query, TxOutcome};
use crate::infrastructure::memory_store::InMemoryDocumentStore;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default)]
struct Faults {
    transactions: AtomicBool,
    appends: AtomicBool,
    ordered_queries: AtomicBool,
    unordered_queries: AtomicBool,
    stall: AtomicBool,
    panic_on_append: AtomicBool,
    ordered_query_calls: AtomicU64,
    unordered_query_calls: AtomicU64,
}

/// An [`InMemoryDocumentStore`] with per-operation fault switches.
///
/// Clones share the same data and switches, so a test can hand one clone to
/// the guard and flip faults on the other.
///
/// ```
/// use donation_guard::infrastructure::mocks::FaultyStore;
///
/// let store = FaultyStore::new();
/// store.fail_ordered_queries(true);
/// assert_eq!(store.ordered_query_calls(), 0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct FaultyStore {
    inner: Arc<InMemoryDocumentStore>,
    faults: Arc<Faults>,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every transaction with [`StoreError::Unavailable`].
    pub fn fail_transactions(&self, on: bool) {
        self.faults.transactions.store(on, Ordering::SeqCst);
    }

    /// Fail every append with [`StoreError::Unavailable`].
    pub fn fail_appends(&self, on: bool) {
        self.faults.appends.store(on, Ordering::SeqCst);
    }

    /// Fail sorted queries with [`StoreError::IndexUnavailable`], like a missing index.
    pub fn fail_ordered_queries(&self, on: bool) {
        self.faults.ordered_queries.store(on, Ordering::SeqCst);
    }

    /// Fail unsorted queries with [`StoreError::Unavailable`].
    pub fn fail_unordered_queries(&self, on: bool) {
        self.faults.unordered_queries.store(on, Ordering::SeqCst);
    }

    /// Make every call hang for a minute before proceeding.
    pub fn stall(&self, on: bool) {
        self.faults.stall.store(on, Ordering::SeqCst);
    }

    /// Panic inside `append`, simulating a buggy adapter.
    pub fn panic_on_append(&self, on: bool) {
        self.faults.panic_on_append.store(on, Ordering::SeqCst);
    }

    pub fn ordered_query_calls(&self) -> u64 {
        self.faults.ordered_query_calls.load(Ordering::SeqCst)
    }

    pub fn unordered_query_calls(&self) -> u64 {
        self.faults.unordered_query_calls.load(Ordering::SeqCst)
    }

    /// The wrapped store, for seeding and inspection.
    pub fn inner(&self) -> &InMemoryDocumentStore {
        &self.inner
    }

    async fn maybe_stall(&self) {
        if self.faults.stall.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
    }
}

impl DocumentStore for FaultyStore {
    async fn transact<T, F>(&self, collection: &str, id: &str, body: F) -> Result<T, StoreError>
    where
        T: Send,
        F: FnMut(Option<&Document>) -> TxOutcome<T> + Send,
    {
        self.maybe_stall().await;
        if self.faults.transactions.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected transaction fault".to_string()));
        }
        self.inner.transact(collection, id, body).await
    }

    async fn append(&self, collection: &str, document: Document) -> Result<String, StoreError> {
        self.maybe_stall().await;
        if self.faults.panic_on_append.load(Ordering::SeqCst) {
            panic!("injected append panic");
        }
        if self.faults.appends.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected append fault".to_string()));
        }
        self.inner.append(collection, document).await
    }

    async fn query(&self, collection: &str, query: &Query) -> Result<Vec<Document>, StoreError> {
        self.maybe_stall().await;
        if query.order_by_desc.is_some() {
            self.faults.ordered_query_calls.fetch_add(1, Ordering::SeqCst);
            if self.faults.ordered_queries.load(Ordering::SeqCst) {
                return Err(StoreError::IndexUnavailable(format!(
                    "{}({} asc, createdAt desc)",
                    collection, query.field
                )));
            }
        } else {
            self.faults.unordered_query_calls.fetch_add(1, Ordering::SeqCst);
            if self.faults.unordered_queries.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("injected query fault".to_string()));
            }
        }
        self.inner.query(collection, query).await
    }
}
