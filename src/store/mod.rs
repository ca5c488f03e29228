//! Key/value store access.
//!
//! The external store is the shared memory of the system: band indexes,
//! reputation scores, scan records and replicated oracle state all live
//! there, and TTL-driven eviction is the only retention mechanism. This
//! module defines the primitive operation set ([`KvStore`]) and the Redis
//! implementation; [`index`] layers the semantic operations on top.

pub mod index;
#[cfg(test)]
pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::error::StoreError;

// ---------------------------------------------------------------------------
// Key space
// ---------------------------------------------------------------------------

/// Local LSH band index (learned state).
pub const LOCAL_BAND_PREFIX: &str = "lg_f:";
/// Locally materialized subset of the oracle's LSH table.
pub const ORACLE_CACHE_BAND_PREFIX: &str = "oc_f:";
/// Oracle LSH band presence, maintained by the sync worker.
pub const ORACLE_BAND_PREFIX: &str = "mi_f:";
/// Per-fingerprint reputation score.
pub const SCORE_PREFIX: &str = "lg_s:";
/// Scan history, keyed by sha1(Message-ID).
pub const SCAN_PREFIX: &str = "mi:msgid:";
/// Report dedup markers.
pub const REPORT_MARK_PREFIX: &str = "mi:rpt:";
/// External image digest cache, keyed by sha1(URL).
pub const IMAGE_CACHE_PREFIX: &str = "mi:img:";
/// Oracle decision cache, keyed by fingerprint.
pub const ORACLE_DECISION_PREFIX: &str = "mi:oracle_cache:";
/// Stable node identity.
pub const NODE_ID_KEY: &str = "mi_meta:id";
/// Last applied oracle sync sequence.
pub const SYNC_SEQ_KEY: &str = "mi_meta:v";

// ---------------------------------------------------------------------------
// Primitive operations
// ---------------------------------------------------------------------------

/// Primitive store operations. Multi-key calls are batched so a band lookup
/// costs a constant number of round trips regardless of band count.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Set without expiry (node identity, sync sequence, oracle band flags).
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Set-if-absent with expiry. `true` on first insert.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError>;

    async fn del(&self, key: &str) -> Result<(), StoreError>;

    /// Atomic integer increment; the key is created at `delta` when absent.
    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, StoreError>;

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;

    async fn sadd(&self, key: &str, member: &str) -> Result<(), StoreError>;

    /// Pipelined existence check, one bool per key in input order.
    async fn exists_multi(&self, keys: &[String]) -> Result<Vec<bool>, StoreError>;

    /// Pipelined SMEMBERS, one member list per key in input order.
    async fn smembers_multi(&self, keys: &[String]) -> Result<Vec<Vec<String>>, StoreError>;

    /// Delete every key under a prefix. Returns the number deleted.
    async fn del_prefix(&self, prefix: &str) -> Result<u64, StoreError>;
}

// ---------------------------------------------------------------------------
// Redis implementation
// ---------------------------------------------------------------------------

/// Redis-backed store. `ConnectionManager` multiplexes and reconnects, so
/// the handle is cheap to clone per operation.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(key, value).await?;
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs()).await?;
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs())
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.incr(key, delta).await?)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.expire::<_, ()>(key, ttl.as_secs() as i64).await?;
        Ok(())
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.sadd::<_, _, ()>(key, member).await?;
        Ok(())
    }

    async fn exists_multi(&self, keys: &[String]) -> Result<Vec<bool>, StoreError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        for key in keys {
            pipe.cmd("EXISTS").arg(key);
        }
        let flags: Vec<bool> = pipe.query_async(&mut conn).await?;
        Ok(flags)
    }

    async fn smembers_multi(&self, keys: &[String]) -> Result<Vec<Vec<String>>, StoreError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        for key in keys {
            pipe.cmd("SMEMBERS").arg(key);
        }
        let members: Vec<Vec<String>> = pipe.query_async(&mut conn).await?;
        Ok(members)
    }

    async fn del_prefix(&self, prefix: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let pattern = format!("{prefix}*");
        let mut cursor: u64 = 0;
        let mut deleted: u64 = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(512)
                .query_async(&mut conn)
                .await?;
            if !keys.is_empty() {
                deleted += keys.len() as u64;
                conn.del::<_, ()>(keys).await?;
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(deleted)
    }
}
