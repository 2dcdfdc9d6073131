//! Redis-backed document store.
//!
//! Lets several process instances share rate limit counters and the error
//! log, so the backstop dedupe and the rate limiter work across instances.
//!
//! ## Layout
//!
//! - `{prefix}{collection}:doc:{id}`: the document as JSON
//! - `{prefix}{collection}:seq`: id counter for appended documents
//! - `{prefix}{collection}:idx:{field}:{value}`: sorted set of document ids
//!   scored by the order field, one per indexed field value
//!
//! Transactions are optimistic: the document is read, the body runs, and a
//! Lua script swaps in the new JSON only if the stored JSON is unchanged.
//! Documents are never deleted by default; `expiresAt` is a logical expiry
//! left to an external sweep. With [`RedisStoreConfig::expire_documents`]
//! set, committed documents carrying an `expiresAt` epoch-millisecond field
//! get a matching `PEXPIREAT` instead.
//!
//! Queries are served from the sorted-set indexes only. Querying a field
//! that is not indexed, or ordering by anything but the order field, fails
//! with [`StoreError::IndexUnavailable`], which callers treat like a missing
//! composite index.
//!
//! ## Example
//!
//! ```rust,ignore
//! use donation_guard::{Guard, RedisDocumentStore};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = RedisDocumentStore::connect("redis://127.0.0.1/")
//!         .await
//!         .expect("Failed to connect to Redis");
//!     let guard = Guard::builder(store).build().expect("valid config");
//! }
//! ```

use crate::application::error::StoreError;
use crate::application::ports::{Document, DocumentStore, Query, TxOutcome};
use crate::domain::record::CREATED_AT_FIELD;
use crate::domain::record::FINGERPRINT_FIELD;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError, Script};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Field holding the absolute expiry of a document, in epoch milliseconds.
pub const EXPIRES_AT_FIELD: &str = "expiresAt";

const DEFAULT_MAX_ATTEMPTS: u32 = 16;

const COMPARE_AND_SET: &str = r"
local current = redis.call('GET', KEYS[1])
if ARGV[1] == '1' then
  if current ~= ARGV[2] then return 0 end
elseif current then
  return 0
end
redis.call('SET', KEYS[1], ARGV[3])
if ARGV[4] ~= '0' then redis.call('PEXPIREAT', KEYS[1], ARGV[4]) end
return 1
";

impl From<RedisError> for StoreError {
    fn from(e: RedisError) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

/// Configuration for the Redis store.
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Key prefix for Redis keys (default: "donation-guard:")
    pub key_prefix: String,
    /// Fields maintained as query indexes (default: `fingerprint`)
    pub indexed_fields: Vec<String>,
    /// Numeric field scoring index entries (default: `createdAt`)
    pub order_field: String,
    /// Optimistic transaction attempts before giving up (default: 16)
    pub max_attempts: u32,
    /// Let Redis delete documents at their `expiresAt` (default: false)
    pub expire_documents: bool,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            key_prefix: "donation-guard:".to_string(),
            indexed_fields: vec![FINGERPRINT_FIELD.to_string()],
            order_field: CREATED_AT_FIELD.to_string(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            expire_documents: false,
        }
    }
}

/// Redis-backed [`DocumentStore`] shared between process instances.
#[derive(Clone)]
pub struct RedisDocumentStore {
    connection: ConnectionManager,
    config: Arc<RedisStoreConfig>,
    compare_and_set: Arc<Script>,
}

impl fmt::Debug for RedisDocumentStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisDocumentStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RedisDocumentStore {
    /// Connect to Redis with default configuration.
    ///
    /// # Errors
    /// Returns error if connection fails.
    pub async fn connect(url: &str) -> Result<Self, RedisError> {
        Self::connect_with_config(url, RedisStoreConfig::default()).await
    }

    /// Connect to Redis with custom configuration.
    ///
    /// # Errors
    /// Returns error if connection fails.
    pub async fn connect_with_config(
        url: &str,
        config: RedisStoreConfig,
    ) -> Result<Self, RedisError> {
        let client = Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;

        Ok(Self {
            connection,
            config: Arc::new(config),
            compare_and_set: Arc::new(Script::new(COMPARE_AND_SET)),
        })
    }

    pub fn config(&self) -> &RedisStoreConfig {
        &self.config
    }

    fn doc_key(&self, collection: &str, id: &str) -> String {
        format!("{}{}:doc:{}", self.config.key_prefix, collection, id)
    }

    fn seq_key(&self, collection: &str) -> String {
        format!("{}{}:seq", self.config.key_prefix, collection)
    }

    fn index_key(&self, collection: &str, field: &str, value: &Value) -> String {
        format!(
            "{}{}:idx:{}:{}",
            self.config.key_prefix,
            collection,
            field,
            index_value(value)
        )
    }

    fn check_indexed(&self, collection: &str, query: &Query) -> Result<(), StoreError> {
        let indexed = self.config.indexed_fields.iter().any(|f| *f == query.field);
        let ordered = query
            .order_by_desc
            .as_ref()
            .map_or(true, |field| *field == self.config.order_field);
        if indexed && ordered {
            return Ok(());
        }
        Err(StoreError::IndexUnavailable(format!(
            "{}({} asc, {} desc)",
            collection,
            query.field,
            query.order_by_desc.as_deref().unwrap_or("-")
        )))
    }
}

/// Render an indexed value as a key segment.
fn index_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Epoch millis for `PEXPIREAT`, or 0 to keep the document.
fn physical_expiry(config: &RedisStoreConfig, document: &Document) -> u64 {
    if !config.expire_documents {
        return 0;
    }
    document
        .get(EXPIRES_AT_FIELD)
        .and_then(Value::as_u64)
        .unwrap_or(0)
}

fn parse(raw: &str) -> Result<Document, StoreError> {
    Ok(serde_json::from_str(raw)?)
}

impl DocumentStore for RedisDocumentStore {
    async fn transact<T, F>(&self, collection: &str, id: &str, mut body: F) -> Result<T, StoreError>
    where
        T: Send,
        F: FnMut(Option<&Document>) -> TxOutcome<T> + Send,
    {
        let key = self.doc_key(collection, id);
        let mut conn = self.connection.clone();

        for _ in 0..self.config.max_attempts {
            let raw: Option<String> = conn.get(&key).await?;
            let snapshot = raw.as_deref().map(parse).transpose()?;

            let (document, value) = match body(snapshot.as_ref()) {
                TxOutcome::Abort(value) => return Ok(value),
                TxOutcome::Commit(document, value) => (document, value),
            };

            let expires_at = physical_expiry(&self.config, &document);
            let swapped: i32 = self
                .compare_and_set
                .key(&key)
                .arg(if raw.is_some() { "1" } else { "0" })
                .arg(raw.as_deref().unwrap_or_default())
                .arg(document.to_string())
                .arg(expires_at)
                .invoke_async(&mut conn)
                .await?;
            if swapped == 1 {
                return Ok(value);
            }
        }

        tracing::warn!(
            collection,
            id,
            attempts = self.config.max_attempts,
            "transaction contention"
        );
        Err(StoreError::Contention {
            attempts: self.config.max_attempts,
        })
    }

    async fn append(&self, collection: &str, document: Document) -> Result<String, StoreError> {
        let mut conn = self.connection.clone();
        let seq: u64 = conn.incr(self.seq_key(collection), 1_u64).await?;
        let id = format!("{:016x}", seq);
        let score = document
            .get(&self.config.order_field)
            .and_then(Value::as_f64)
            .unwrap_or(seq as f64);

        let mut pipe = redis::pipe();
        pipe.atomic()
            .set(self.doc_key(collection, &id), document.to_string())
            .ignore();
        for field in &self.config.indexed_fields {
            if let Some(value) = document.get(field) {
                pipe.zadd(self.index_key(collection, field, value), &id, score)
                    .ignore();
            }
        }
        pipe.query_async::<_, ()>(&mut conn).await?;

        Ok(id)
    }

    async fn query(&self, collection: &str, query: &Query) -> Result<Vec<Document>, StoreError> {
        self.check_indexed(collection, query)?;
        if query.limit == 0 {
            return Ok(Vec::new());
        }

        let mut conn = self.connection.clone();
        let index = self.index_key(collection, &query.field, &query.equals);
        let stop = isize::try_from(query.limit)
            .map(|limit| limit - 1)
            .unwrap_or(-1);
        let ids: Vec<String> = match query.order_by_desc {
            Some(_) => conn.zrevrange(&index, 0, stop).await?,
            None => conn.zrange(&index, 0, stop).await?,
        };
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = ids.iter().map(|id| self.doc_key(collection, id)).collect();
        let raw: Vec<Option<String>> = redis::cmd("MGET").arg(&keys).query_async(&mut conn).await?;

        raw.iter()
            .flatten()
            .map(|json| parse(json))
            .filter(|doc| doc.as_ref().map_or(true, |doc| query.matches(doc)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_index_value_rendering() {
        assert_eq!(index_value(&json!("abc")), "abc");
        assert_eq!(index_value(&json!(42)), "42");
        assert_eq!(index_value(&json!(true)), "true");
    }

    #[test]
    fn test_default_config_indexes_fingerprints() {
        let config = RedisStoreConfig::default();
        assert_eq!(config.indexed_fields, vec!["fingerprint".to_string()]);
        assert_eq!(config.order_field, "createdAt");
        assert!(!config.expire_documents);
    }

    #[test]
    fn test_documents_expire_only_when_enabled() {
        let counter = json!({"count": 1, "expiresAt": 1_700_000_120_000_u64});
        let mut config = RedisStoreConfig::default();
        assert_eq!(physical_expiry(&config, &counter), 0);

        config.expire_documents = true;
        assert_eq!(physical_expiry(&config, &counter), 1_700_000_120_000);
        assert_eq!(physical_expiry(&config, &json!({"count": 1})), 0);
    }

    #[test]
    fn test_redis_error_maps_to_unavailable() {
        let err = RedisError::from((redis::ErrorKind::IoError, "connection refused"));
        assert!(matches!(StoreError::from(err), StoreError::Unavailable(_)));
    }
}
