//! Semantic operations over the key/value store.
//!
//! Everything the analyzer, reporter and sync worker do to the store goes
//! through here: band indexes (local, oracle-cache, oracle), reputation
//! scores, scan history, report dedup, the image digest cache, the oracle
//! decision cache and node state. Learned state is TTL-stamped on every
//! write and refresh; expiry is the only retention mechanism.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::error::StoreError;
use crate::fingerprint::bands::bands;

use super::{
    KvStore, IMAGE_CACHE_PREFIX, LOCAL_BAND_PREFIX, NODE_ID_KEY, ORACLE_BAND_PREFIX,
    ORACLE_CACHE_BAND_PREFIX, ORACLE_DECISION_PREFIX, REPORT_MARK_PREFIX, SCAN_PREFIX,
    SCORE_PREFIX, SYNC_SEQ_KEY,
};

/// TTL for scan records, report dedup markers and the image cache.
pub const DAY_TTL: Duration = Duration::from_secs(24 * 3600);

/// A scan record: the digests a message produced, for later reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRecord {
    pub hashes: Vec<String>,
    pub timestamp: i64,
}

/// Outcome of an LSH band lookup.
#[derive(Debug, Default)]
pub struct BandLookup {
    /// Band keys that existed in the store (quorum met; empty otherwise).
    pub matched_keys: Vec<String>,
    /// Union of member fingerprints across the matched bands.
    pub candidates: Vec<String>,
}

/// Wrap a Message-ID in angle brackets when the caller omitted them, so
/// `/analyze` and `/report` derive the same scan key.
pub fn canonical_message_id(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with('<') && trimmed.ends_with('>') {
        trimmed.to_string()
    } else {
        format!("<{trimmed}>")
    }
}

pub fn sha1_hex(input: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Semantic store handle. Cheap to clone; all state lives in the store.
#[derive(Clone)]
pub struct Index {
    kv: Arc<dyn KvStore>,
}

impl Index {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    // -----------------------------------------------------------------------
    // Local band index + reputation
    // -----------------------------------------------------------------------

    /// Add a fingerprint to the local band index, stamping retention TTL on
    /// every band key.
    pub async fn index_add(&self, fingerprint: &str, ttl: Duration) -> Result<(), StoreError> {
        for band in bands(fingerprint) {
            let key = format!("{LOCAL_BAND_PREFIX}{band}");
            self.kv.sadd(&key, fingerprint).await?;
            self.kv.expire(&key, ttl).await?;
        }
        Ok(())
    }

    /// Refresh retention on every band of a fingerprint and on its score.
    pub async fn index_refresh(&self, fingerprint: &str, ttl: Duration) -> Result<(), StoreError> {
        for band in bands(fingerprint) {
            self.kv
                .expire(&format!("{LOCAL_BAND_PREFIX}{band}"), ttl)
                .await?;
        }
        self.kv
            .expire(&format!("{SCORE_PREFIX}{fingerprint}"), ttl)
            .await?;
        Ok(())
    }

    /// LSH lookup against one band index. Returns an empty lookup unless at
    /// least `quorum` band keys exist; below the quorum a handful of shared
    /// windows is noise, not proximity.
    pub async fn band_candidates(
        &self,
        prefix: &str,
        fingerprint: &str,
        quorum: usize,
    ) -> Result<BandLookup, StoreError> {
        let keys: Vec<String> = bands(fingerprint)
            .into_iter()
            .map(|b| format!("{prefix}{b}"))
            .collect();
        if keys.is_empty() {
            return Ok(BandLookup::default());
        }

        let flags = self.kv.exists_multi(&keys).await?;
        let matched: Vec<String> = keys
            .into_iter()
            .zip(flags)
            .filter_map(|(k, present)| present.then_some(k))
            .collect();
        if matched.len() < quorum {
            return Ok(BandLookup::default());
        }

        let member_lists = self.kv.smembers_multi(&matched).await?;
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        for member in member_lists.into_iter().flatten() {
            if seen.insert(member.clone()) {
                candidates.push(member);
            }
        }

        Ok(BandLookup {
            matched_keys: matched,
            candidates,
        })
    }

    /// Extend retention on a set of matched band keys.
    pub async fn refresh_keys(&self, keys: &[String], ttl: Duration) -> Result<(), StoreError> {
        for key in keys {
            self.kv.expire(key, ttl).await?;
        }
        Ok(())
    }

    /// Atomically adjust a fingerprint's reputation score. Negative deltas
    /// are ham corrections. Returns the new score.
    pub async fn score_add(
        &self,
        fingerprint: &str,
        delta: i64,
        ttl: Duration,
    ) -> Result<i64, StoreError> {
        let key = format!("{SCORE_PREFIX}{fingerprint}");
        let score = self.kv.incr_by(&key, delta).await?;
        self.kv.expire(&key, ttl).await?;
        Ok(score)
    }

    pub async fn score_get(&self, fingerprint: &str) -> Result<i64, StoreError> {
        let key = format!("{SCORE_PREFIX}{fingerprint}");
        match self.kv.get(&key).await? {
            Some(raw) => raw.parse().map_err(|_| StoreError::Malformed {
                key,
                reason: "score is not an integer".into(),
            }),
            None => Ok(0),
        }
    }

    // -----------------------------------------------------------------------
    // Scan history + report dedup
    // -----------------------------------------------------------------------

    pub async fn scan_put(
        &self,
        message_id: &str,
        hashes: &[String],
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let record = ScanRecord {
            hashes: hashes.to_vec(),
            timestamp: chrono::Utc::now().timestamp(),
        };
        let key = format!("{SCAN_PREFIX}{}", sha1_hex(message_id));
        self.kv
            .set_ex(&key, &serde_json::to_string(&record)?, ttl)
            .await
    }

    pub async fn scan_get(&self, message_id: &str) -> Result<Option<ScanRecord>, StoreError> {
        let key = format!("{SCAN_PREFIX}{}", sha1_hex(message_id));
        match self.kv.get(&key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Mark a (message-id, report-type) pair. `false` when already marked
    /// within the TTL window, meaning the report is a duplicate.
    pub async fn report_mark(
        &self,
        message_id: &str,
        report_type: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let key = format!("{REPORT_MARK_PREFIX}{}:{report_type}", sha1_hex(message_id));
        self.kv.set_nx_ex(&key, "1", ttl).await
    }

    // -----------------------------------------------------------------------
    // Image digest cache
    // -----------------------------------------------------------------------

    pub async fn image_cache_get(&self, url: &str) -> Result<Option<(u64, String)>, StoreError> {
        let key = format!("{IMAGE_CACHE_PREFIX}{}", sha1_hex(url));
        let Some(raw) = self.kv.get(&key).await? else {
            return Ok(None);
        };
        let Some((size, digest)) = raw.split_once('|') else {
            return Err(StoreError::Malformed {
                key,
                reason: "expected <size>|<digest>".into(),
            });
        };
        let size = size.parse().map_err(|_| StoreError::Malformed {
            key: key.clone(),
            reason: "size is not an integer".into(),
        })?;
        Ok(Some((size, digest.to_string())))
    }

    pub async fn image_cache_put(
        &self,
        url: &str,
        size: u64,
        digest: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let key = format!("{IMAGE_CACHE_PREFIX}{}", sha1_hex(url));
        self.kv.set_ex(&key, &format!("{size}|{digest}"), ttl).await
    }

    // -----------------------------------------------------------------------
    // Oracle replicas (decision cache, oracle-cache bands, oracle LSH)
    // -----------------------------------------------------------------------

    /// Raw payload of a cached oracle decision for a fingerprint.
    pub async fn oracle_cache_get(&self, fingerprint: &str) -> Result<Option<String>, StoreError> {
        self.kv
            .get(&format!("{ORACLE_DECISION_PREFIX}{fingerprint}"))
            .await
    }

    pub async fn oracle_cache_put(
        &self,
        fingerprint: &str,
        payload: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.kv
            .set_ex(&format!("{ORACLE_DECISION_PREFIX}{fingerprint}"), payload, ttl)
            .await
    }

    /// Replicate a fingerprint into the oracle-cache band index.
    pub async fn oracle_cache_band_add(
        &self,
        fingerprint: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        for band in bands(fingerprint) {
            let key = format!("{ORACLE_CACHE_BAND_PREFIX}{band}");
            self.kv.sadd(&key, fingerprint).await?;
            self.kv.expire(&key, ttl).await?;
        }
        Ok(())
    }

    /// Whether a fingerprint clears the band quorum against the oracle LSH
    /// index (tier D gate; presence only, no members).
    pub async fn oracle_band_quorum(
        &self,
        fingerprint: &str,
        quorum: usize,
    ) -> Result<bool, StoreError> {
        let keys: Vec<String> = bands(fingerprint)
            .into_iter()
            .map(|b| format!("{ORACLE_BAND_PREFIX}{b}"))
            .collect();
        if keys.is_empty() {
            return Ok(false);
        }
        let flags = self.kv.exists_multi(&keys).await?;
        Ok(flags.into_iter().filter(|p| *p).count() >= quorum)
    }

    pub async fn oracle_band_set(&self, band: &str) -> Result<(), StoreError> {
        self.kv.set(&format!("{ORACLE_BAND_PREFIX}{band}"), "1").await
    }

    pub async fn oracle_band_del(&self, band: &str) -> Result<(), StoreError> {
        self.kv.del(&format!("{ORACLE_BAND_PREFIX}{band}")).await
    }

    /// Drop the whole oracle LSH replica ahead of a full resync.
    pub async fn flush_oracle_bands(&self) -> Result<u64, StoreError> {
        self.kv.del_prefix(ORACLE_BAND_PREFIX).await
    }

    // -----------------------------------------------------------------------
    // Node state
    // -----------------------------------------------------------------------

    /// Stable node identity: read it, or mint and persist one on first boot.
    pub async fn node_id(&self) -> Result<String, StoreError> {
        if let Some(id) = self.kv.get(NODE_ID_KEY).await? {
            return Ok(id);
        }
        let id = uuid::Uuid::new_v4().to_string();
        self.kv.set(NODE_ID_KEY, &id).await?;
        Ok(id)
    }

    pub async fn current_seq(&self) -> Result<i64, StoreError> {
        match self.kv.get(SYNC_SEQ_KEY).await? {
            Some(raw) => raw.parse().map_err(|_| StoreError::Malformed {
                key: SYNC_SEQ_KEY.to_string(),
                reason: "sequence is not an integer".into(),
            }),
            None => Ok(0),
        }
    }

    pub async fn set_current_seq(&self, seq: i64) -> Result<(), StoreError> {
        self.kv.set(SYNC_SEQ_KEY, &seq.to_string()).await
    }
}
