//! In-memory document store.
//!
//! Suitable for single-process deployments and tests. Transactions are
//! optimistic: the body runs against a versioned snapshot and the commit is
//! a compare-and-set on that version, retried on conflict. The task yields
//! between reading and committing, so concurrent transactions on a
//! multi-threaded runtime genuinely race.

use crate::application::error::StoreError;
use crate::application::ports::{Document, DocumentStore, Query, TxOutcome};
use ahash::RandomState;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use std::cmp::Ordering;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

/// Default number of transaction attempts before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 128;

type DocKey = (String, String);

#[derive(Debug, Clone)]
struct Versioned {
    version: u64,
    /// Insertion order, used when a query has no sort field
    seq: u64,
    document: Document,
}

/// A document store held in a sharded concurrent map.
#[derive(Debug)]
pub struct InMemoryDocumentStore {
    docs: DashMap<DocKey, Versioned, RandomState>,
    next_seq: AtomicU64,
    max_attempts: u32,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            docs: DashMap::with_hasher(RandomState::new()),
            next_seq: AtomicU64::new(0),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Give up on a contended transaction after `attempts` tries.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Read one document.
    pub fn get(&self, collection: &str, id: &str) -> Option<Document> {
        self.docs
            .get(&(collection.to_string(), id.to_string()))
            .map(|entry| entry.value().document.clone())
    }

    /// All documents of a collection in insertion order.
    pub fn documents_in(&self, collection: &str) -> Vec<Document> {
        let mut rows: Vec<(u64, Document)> = self
            .docs
            .iter()
            .filter(|entry| entry.key().0 == collection)
            .map(|entry| (entry.value().seq, entry.value().document.clone()))
            .collect();
        rows.sort_unstable_by_key(|(seq, _)| *seq);
        rows.into_iter().map(|(_, doc)| doc).collect()
    }

    /// Total number of documents across collections.
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, AtomicOrdering::Relaxed)
    }

    /// Write `document` if the stored version still equals `expected`.
    fn compare_and_set(&self, key: &DocKey, expected: Option<u64>, document: Document) -> bool {
        match self.docs.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                if Some(occupied.get().version) != expected {
                    return false;
                }
                let stored = occupied.get_mut();
                stored.version += 1;
                stored.document = document;
                true
            }
            Entry::Vacant(vacant) => {
                if expected.is_some() {
                    return false;
                }
                vacant.insert(Versioned {
                    version: 1,
                    seq: self.next_seq(),
                    document,
                });
                true
            }
        }
    }
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentStore for InMemoryDocumentStore {
    async fn transact<T, F>(&self, collection: &str, id: &str, mut body: F) -> Result<T, StoreError>
    where
        T: Send,
        F: FnMut(Option<&Document>) -> TxOutcome<T> + Send,
    {
        let key = (collection.to_string(), id.to_string());

        for _ in 0..self.max_attempts {
            let snapshot = self.docs.get(&key).map(|entry| entry.value().clone());
            let expected = snapshot.as_ref().map(|s| s.version);

            match body(snapshot.as_ref().map(|s| &s.document)) {
                TxOutcome::Abort(value) => return Ok(value),
                TxOutcome::Commit(document, value) => {
                    tokio::task::yield_now().await;
                    if self.compare_and_set(&key, expected, document) {
                        return Ok(value);
                    }
                }
            }
        }

        tracing::warn!(collection, id, attempts = self.max_attempts, "transaction contention");
        Err(StoreError::Contention {
            attempts: self.max_attempts,
        })
    }

    async fn append(&self, collection: &str, document: Document) -> Result<String, StoreError> {
        let seq = self.next_seq();
        let id = format!("{:016x}", seq);
        self.docs.insert(
            (collection.to_string(), id.clone()),
            Versioned {
                version: 1,
                seq,
                document,
            },
        );
        Ok(id)
    }

    async fn query(&self, collection: &str, query: &Query) -> Result<Vec<Document>, StoreError> {
        let mut rows: Vec<(u64, Document)> = self
            .docs
            .iter()
            .filter(|entry| entry.key().0 == collection && query.matches(&entry.value().document))
            .map(|entry| (entry.value().seq, entry.value().document.clone()))
            .collect();

        match &query.order_by_desc {
            Some(field) => rows.sort_by(|(_, a), (_, b)| compare_field(b, a, field)),
            None => rows.sort_unstable_by_key(|(seq, _)| *seq),
        }

        Ok(rows
            .into_iter()
            .take(query.limit)
            .map(|(_, doc)| doc)
            .collect())
    }
}

/// Order two documents by a field; missing fields sort lowest.
fn compare_field(a: &Document, b: &Document, field: &str) -> Ordering {
    match (a.get(field), b.get(field)) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => match (x.as_u64(), y.as_u64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => x
                .as_f64()
                .partial_cmp(&y.as_f64())
                .unwrap_or(Ordering::Equal),
        },
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        _ => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_append_and_query_in_insertion_order() {
        let store = InMemoryDocumentStore::new();
        for (fp, at) in [("a", 3), ("b", 1), ("a", 1), ("a", 2)] {
            store.append("logs", json!({"fingerprint": fp, "createdAt": at})).await.unwrap();
        }
        store.append("other", json!({"fingerprint": "a"})).await.unwrap();

        let rows = store.query("logs", &Query::eq("fingerprint", "a")).await.unwrap();
        let times: Vec<_> = rows.iter().map(|d| d["createdAt"].as_u64().unwrap()).collect();
        assert_eq!(times, vec![3, 1, 2]);
    }

    #[tokio::test]
    async fn test_ordered_query_with_limit() {
        let store = InMemoryDocumentStore::new();
        for at in [5, 9, 1, 7] {
            store.append("logs", json!({"fingerprint": "a", "createdAt": at})).await.unwrap();
        }

        let query = Query::eq("fingerprint", "a").order_by_desc("createdAt").limit(2);
        let rows = store.query("logs", &query).await.unwrap();
        let times: Vec<_> = rows.iter().map(|d| d["createdAt"].as_u64().unwrap()).collect();
        assert_eq!(times, vec![9, 7]);
    }

    #[tokio::test]
    async fn test_transaction_commit_and_abort() {
        let store = InMemoryDocumentStore::new();

        let created = store
            .transact("c", "doc", |current| {
                assert!(current.is_none());
                TxOutcome::Commit(json!({"n": 1}), "created")
            })
            .await
            .unwrap();
        assert_eq!(created, "created");

        let aborted = store
            .transact("c", "doc", |current| {
                assert_eq!(current, Some(&json!({"n": 1})));
                TxOutcome::Abort(false)
            })
            .await
            .unwrap();
        assert!(!aborted);
        assert_eq!(store.get("c", "doc"), Some(json!({"n": 1})));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_are_serialized() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let mut handles = Vec::new();

        for _ in 0..32 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .transact("c", "counter", |current| {
                        let n = current.and_then(|d| d["n"].as_u64()).unwrap_or(0);
                        TxOutcome::Commit(json!({"n": n + 1}), ())
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.get("c", "counter"), Some(json!({"n": 32})));
    }

    #[tokio::test]
    async fn test_contention_gives_up() {
        let store = Arc::new(InMemoryDocumentStore::new().with_max_attempts(1));
        store
            .transact("c", "doc", |_| TxOutcome::Commit(json!({"n": 0}), ()))
            .await
            .unwrap();

        // Every attempt conflicts: the body bumps the stored version behind
        // the transaction's back before it commits.
        let racer = Arc::clone(&store);
        let result = store
            .transact("c", "doc", move |_| {
                let key = ("c".to_string(), "doc".to_string());
                let version = racer.docs.get(&key).map(|e| e.version);
                assert!(racer.compare_and_set(&key, version, json!({"n": 99})));
                TxOutcome::Commit(json!({"n": 1}), ())
            })
            .await;
        assert_eq!(result, Err(StoreError::Contention { attempts: 1 }));
        assert_eq!(store.get("c", "doc"), Some(json!({"n": 99})));
    }
}
