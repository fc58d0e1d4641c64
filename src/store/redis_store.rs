//! Redis-backed store
//!
//! ## Key layout
//!
//! - General namespaces: `<prefix>data:<namespace>:<key>`. `evict_all` SCANs
//!   the namespace pattern and deletes matches in batches.
//! - Query-result namespaces: `<prefix>data:<namespace>@<generation>:<key>`,
//!   with the generation counter at `<prefix>generation:<namespace>`.
//!   `evict_all` bumps the counter; entries of older generations expire on
//!   their own.
//!
//! Namespace names are written with `%`, `:` and `@` percent-encoded, so the
//! first `:` or `@` after `data:` always ends the namespace segment.

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::debug;

use super::CacheStore;
use crate::error::StoreError;
use crate::namespace::Namespace;

const SCAN_BATCH: usize = 100;

/// [`CacheStore`] over a Redis connection manager.
#[derive(Clone)]
pub struct RedisStore {
    redis: ConnectionManager,
    key_prefix: String,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

impl RedisStore {
    /// Connect to Redis. Every key written is prefixed with `key_prefix`
    /// (e.g. `"cache:"`).
    pub async fn new(
        redis_client: redis::Client,
        key_prefix: impl Into<String>,
    ) -> Result<Self, redis::RedisError> {
        let redis = ConnectionManager::new(redis_client).await?;
        Ok(Self {
            redis,
            key_prefix: key_prefix.into(),
        })
    }

    async fn store_key(&self, namespace: &Namespace, key: &str) -> Result<String, StoreError> {
        if !namespace.is_query_region() {
            return Ok(general_key(&self.key_prefix, namespace, key));
        }

        let mut conn = self.redis.clone();
        let generation: Option<u64> = conn
            .get(generation_key(&self.key_prefix, namespace))
            .await?;
        Ok(generational_key(
            &self.key_prefix,
            namespace,
            generation.unwrap_or(0),
            key,
        ))
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, namespace: &Namespace, key: &str) -> Result<Option<String>, StoreError> {
        let redis_key = self.store_key(namespace, key).await?;
        let mut conn = self.redis.clone();
        let value: Option<String> = conn.get(&redis_key).await?;
        Ok(value)
    }

    async fn set(
        &self,
        namespace: &Namespace,
        key: &str,
        value: String,
        ttl_seconds: u64,
    ) -> Result<(), StoreError> {
        let redis_key = self.store_key(namespace, key).await?;
        let mut conn = self.redis.clone();
        if ttl_seconds == 0 {
            conn.set::<_, _, ()>(&redis_key, value).await?;
        } else {
            conn.set_ex::<_, _, ()>(&redis_key, value, ttl_seconds)
                .await?;
        }
        Ok(())
    }

    async fn delete(&self, namespace: &Namespace, key: &str) -> Result<(), StoreError> {
        let redis_key = self.store_key(namespace, key).await?;
        let mut conn = self.redis.clone();
        conn.del::<_, ()>(&redis_key).await?;
        Ok(())
    }

    async fn evict_all(&self, namespace: &Namespace) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();

        if namespace.is_query_region() {
            let generation: u64 = conn
                .incr(generation_key(&self.key_prefix, namespace), 1)
                .await?;
            debug!(
                "Redis store moved namespace {} to generation {}",
                namespace, generation
            );
            return Ok(());
        }

        let pattern = namespace_pattern(&self.key_prefix, namespace);
        let mut deleted: u64 = 0;
        let mut cursor: u64 = 0;

        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;

            if !keys.is_empty() {
                let count: u64 = redis::cmd("DEL").arg(&keys).query_async(&mut conn).await?;
                deleted += count;
            }

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        debug!(
            "Redis store deleted {} entries of namespace {}",
            deleted, namespace
        );
        Ok(())
    }
}

fn general_key(prefix: &str, namespace: &Namespace, key: &str) -> String {
    format!("{}data:{}:{}", prefix, encode_namespace(namespace), key)
}

fn generational_key(prefix: &str, namespace: &Namespace, generation: u64, key: &str) -> String {
    format!(
        "{}data:{}@{}:{}",
        prefix,
        encode_namespace(namespace),
        generation,
        key
    )
}

fn generation_key(prefix: &str, namespace: &Namespace) -> String {
    format!("{}generation:{}", prefix, encode_namespace(namespace))
}

fn encode_namespace(namespace: &Namespace) -> String {
    let name = namespace.name();
    let mut encoded = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            '%' => encoded.push_str("%25"),
            ':' => encoded.push_str("%3A"),
            '@' => encoded.push_str("%40"),
            c => encoded.push(c),
        }
    }
    encoded
}

/// SCAN pattern matching every key of a general namespace.
fn namespace_pattern(prefix: &str, namespace: &Namespace) -> String {
    let literal = format!("{}data:{}:", prefix, encode_namespace(namespace));
    let mut pattern = String::with_capacity(literal.len() + 1);
    for c in literal.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('*');
    pattern
}
