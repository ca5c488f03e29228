//! Background workers.
//!
//! The sync worker polls the oracle for band-index deltas and replays them
//! into the local replica; `current_seq` advances only after a delta is
//! fully applied, so a failure mid-batch replays from the old sequence on
//! the next poll. The stats worker periodically logs a counter snapshot.

use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::error::StoreError;
use crate::metrics::Metrics;
use crate::oracle::{OpAction, OracleClient, SyncAction, SyncDelta, SyncOutcome};
use crate::store::index::Index;

/// Poll cadence when the oracle is healthy.
pub const SYNC_INTERVAL: Duration = Duration::from_secs(60);
/// Backoff ceiling on repeated failure.
pub const SYNC_BACKOFF_MAX: Duration = Duration::from_secs(600);
/// Stats log cadence.
pub const STATS_INTERVAL: Duration = Duration::from_secs(300);

/// Apply one sync delta: on `FULL_RESYNC` the oracle band replica is
/// flushed first, then ops replay in oracle order, then the sequence is
/// committed. Pushed cache examples land in the decision cache and the
/// oracle-cache band index.
pub async fn apply_delta(
    index: &Index,
    delta: &SyncDelta,
    replica_ttl: Duration,
) -> Result<(), StoreError> {
    if delta.action == SyncAction::FullResync {
        let dropped = index.flush_oracle_bands().await?;
        tracing::info!(dropped, new_seq = delta.new_seq, "full oracle resync");
    }

    for op in &delta.ops {
        for band in &op.bands {
            match op.action {
                OpAction::Add => index.oracle_band_set(band).await?,
                OpAction::Remove => index.oracle_band_del(band).await?,
            }
        }
    }

    for example in &delta.examples {
        let payload = serde_json::to_string(&example.result)?;
        index
            .oracle_cache_put(&example.signature, &payload, replica_ttl)
            .await?;
        index
            .oracle_cache_band_add(&example.signature, replica_ttl)
            .await?;
    }

    index.set_current_seq(delta.new_seq).await
}

/// Long-running delta-sync loop. Retries forever; stops only with the
/// process.
pub async fn run_sync_worker(index: Index, oracle: Arc<OracleClient>, config: Arc<Config>) {
    let mut backoff = SYNC_INTERVAL;
    loop {
        let pause = match sync_once(&index, &oracle, &config).await {
            Ok(applied) => {
                if applied {
                    tracing::debug!("sync delta applied");
                }
                backoff = SYNC_INTERVAL;
                SYNC_INTERVAL
            }
            Err(e) => {
                tracing::warn!(error = %e, retry_in = ?backoff, "sync failed");
                let pause = backoff;
                backoff = (backoff * 2).min(SYNC_BACKOFF_MAX);
                pause
            }
        };
        tokio::time::sleep(pause).await;
    }
}

async fn sync_once(
    index: &Index,
    oracle: &OracleClient,
    config: &Config,
) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
    let seq = index.current_seq().await?;
    match oracle.sync(seq).await? {
        SyncOutcome::NotModified => Ok(false),
        SyncOutcome::Delta(delta) => {
            apply_delta(index, &delta, config.retention()).await?;
            tracing::info!(
                old_seq = seq,
                new_seq = delta.new_seq,
                ops = delta.ops.len(),
                "applied sync delta"
            );
            Ok(true)
        }
    }
}

/// Long-running stats loop: one INFO line per interval with the counter
/// snapshot.
pub async fn run_stats_worker(metrics: Arc<Metrics>) {
    let mut interval = tokio::time::interval(STATS_INTERVAL);
    interval.tick().await;
    loop {
        interval.tick().await;
        let snap = metrics.snapshot();
        tracing::info!(
            scanned = snap.scanned,
            local_matches = snap.local_matches,
            oracle_complete = snap.oracle_complete,
            oracle_partial = snap.oracle_partial,
            cache_positive = snap.cache_positive,
            cache_negative = snap.cache_negative,
            "guardian stats"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::{Action, AnalysisResult, BandOp, CacheExample};
    use crate::store::index::DAY_TTL;
    use crate::store::memory::MemoryStore;

    const F: &str = "T147B1A513F6C0A4A0C9B39276337946A9B121BA42E3658D79B5C53F3B3E46EDF85A02AD";

    fn index() -> Index {
        Index::new(Arc::new(MemoryStore::new()))
    }

    fn delta(action: SyncAction, new_seq: i64, ops: Vec<BandOp>) -> SyncDelta {
        SyncDelta {
            new_seq,
            action,
            ops,
            examples: Vec::new(),
        }
    }

    fn add_op(bands: &[&str]) -> BandOp {
        BandOp {
            action: OpAction::Add,
            bands: bands.iter().map(|b| b.to_string()).collect(),
        }
    }

    fn remove_op(bands: &[&str]) -> BandOp {
        BandOp {
            action: OpAction::Remove,
            bands: bands.iter().map(|b| b.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn update_delta_adds_and_removes_bands() {
        let index = index();
        let bands: Vec<String> = crate::fingerprint::bands::bands(F);
        let band_refs: Vec<&str> = bands.iter().map(String::as_str).collect();

        apply_delta(
            &index,
            &delta(SyncAction::UpdateDelta, 5, vec![add_op(&band_refs)]),
            DAY_TTL,
        )
        .await
        .unwrap();
        assert!(index.oracle_band_quorum(F, 4).await.unwrap());
        assert_eq!(index.current_seq().await.unwrap(), 5);

        apply_delta(
            &index,
            &delta(SyncAction::UpdateDelta, 6, vec![remove_op(&band_refs)]),
            DAY_TTL,
        )
        .await
        .unwrap();
        assert!(!index.oracle_band_quorum(F, 4).await.unwrap());
        assert_eq!(index.current_seq().await.unwrap(), 6);
    }

    #[tokio::test]
    async fn full_resync_rebuilds_the_replica() {
        let index = index();
        index.oracle_band_set("0:AAAAAA").await.unwrap();
        index.oracle_band_set("3:BBBBBB").await.unwrap();

        let bands: Vec<String> = crate::fingerprint::bands::bands(F);
        let band_refs: Vec<&str> = bands.iter().map(String::as_str).collect();
        apply_delta(
            &index,
            &delta(SyncAction::FullResync, 40, vec![add_op(&band_refs)]),
            DAY_TTL,
        )
        .await
        .unwrap();

        // Stale entries gone, the replayed set present.
        assert!(index.oracle_band_quorum(F, 20).await.unwrap());
        assert_eq!(index.current_seq().await.unwrap(), 40);
    }

    #[tokio::test]
    async fn examples_populate_both_caches() {
        let index = index();
        let delta = SyncDelta {
            new_seq: 9,
            action: SyncAction::UpdateDelta,
            ops: Vec::new(),
            examples: vec![CacheExample {
                signature: F.to_string(),
                result: AnalysisResult {
                    action: Action::Spam,
                    label: Some("cluster_member".into()),
                    proximity_match: false,
                    distance: None,
                },
            }],
        };
        apply_delta(&index, &delta, DAY_TTL).await.unwrap();

        let cached = index.oracle_cache_get(F).await.unwrap().unwrap();
        let parsed: AnalysisResult = serde_json::from_str(&cached).unwrap();
        assert_eq!(parsed.action, Action::Spam);

        let lookup = index
            .band_candidates(crate::store::ORACLE_CACHE_BAND_PREFIX, F, 4)
            .await
            .unwrap();
        assert_eq!(lookup.candidates, vec![F.to_string()]);
    }

    #[tokio::test]
    async fn sequence_is_committed_after_ops() {
        let index = index();
        index.set_current_seq(10).await.unwrap();
        apply_delta(&index, &delta(SyncAction::UpdateDelta, 11, Vec::new()), DAY_TTL)
            .await
            .unwrap();
        assert_eq!(index.current_seq().await.unwrap(), 11);
    }
}
