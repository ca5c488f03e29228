//! Per-request classification.
//!
//! Orchestrates fingerprinting and the tiered proximity search. Tiers run
//! in cost order per fingerprint (oracle-decision cache, oracle-cache band
//! proximity, local reputation, then the oracle LSH gate and decision RPC)
//! and the first spam verdict wins. Store failures never fail a request:
//! absent data is simply no match.

use std::sync::Arc;

use serde::Serialize;

use crate::config::Config;
use crate::error::AnalyzeError;
use crate::fingerprint::{self, normalize};
use crate::images::{ImageSidechannel, SPARSE_TEXT_WORDS};
use crate::metrics::Metrics;
use crate::oracle::{Action, AnalysisResult, OracleClient};
use crate::store::index::{canonical_message_id, Index, DAY_TTL};
use crate::store::{LOCAL_BAND_PREFIX, ORACLE_CACHE_BAND_PREFIX};

/// The `/analyze` response.
#[derive(Debug, Clone, Serialize)]
pub struct Verdict {
    pub action: Action,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub proximity_match: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<i32>,
    pub hashes: Vec<String>,
}

impl Verdict {
    fn allow(hashes: Vec<String>) -> Self {
        Self {
            action: Action::Allow,
            label: None,
            proximity_match: false,
            distance: None,
            hashes,
        }
    }

    fn adopt(&mut self, result: &AnalysisResult) {
        self.action = result.action;
        self.label = result.label.clone();
        self.distance = result.distance;
        self.proximity_match = self.proximity_match || result.proximity_match;
    }
}

pub struct Analyzer {
    index: Index,
    oracle: Arc<OracleClient>,
    images: ImageSidechannel,
    metrics: Arc<Metrics>,
    config: Arc<Config>,
}

impl Analyzer {
    pub fn new(
        index: Index,
        oracle: Arc<OracleClient>,
        images: ImageSidechannel,
        metrics: Arc<Metrics>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            index,
            oracle,
            images,
            metrics,
            config,
        }
    }

    pub async fn analyze(&self, raw: &[u8]) -> Result<Verdict, AnalyzeError> {
        let mail = fingerprint::parse(raw)?;
        tracing::debug!(
            message_id = mail.message_id.as_deref().unwrap_or("-"),
            subject = mail.subject.as_deref().unwrap_or("-"),
            "analyzing message"
        );

        let mut hashes = fingerprint::digests(&mail);
        if self.config.image_analysis_enabled()
            && normalize::html_word_count(&mail.html) < SPARSE_TEXT_WORDS
        {
            if let Some(digest) = self.images.best_external_digest(&mail.html).await {
                hashes.push(digest);
            }
        }

        // Persist the scan record off the request path; reporting needs it,
        // the response does not.
        if let Some(message_id) = &mail.message_id {
            let canonical = canonical_message_id(message_id);
            let index = self.index.clone();
            let scan_hashes = hashes.clone();
            tokio::spawn(async move {
                if let Err(e) = index.scan_put(&canonical, &scan_hashes, DAY_TTL).await {
                    tracing::warn!(error = %e, "scan record write failed");
                }
            });
        }

        // One snapshot per request; a SIGHUP mid-flight changes nothing here.
        let quorum = self.config.min_band_matches();
        let max_distance = self.config.match_distance();
        let threshold = self.config.spam_threshold();
        let retention = self.config.retention();

        let mut verdict = Verdict::allow(hashes.clone());

        'fingerprints: for fingerprint in &hashes {
            // Tier A: oracle-decision cache.
            match self.index.oracle_cache_get(fingerprint).await {
                Ok(Some(payload)) => match serde_json::from_str::<AnalysisResult>(&payload) {
                    Ok(cached) if cached.action == Action::Spam => {
                        verdict.adopt(&cached);
                        self.metrics.cache_hit("positive");
                        break 'fingerprints;
                    }
                    Ok(_) => self.metrics.cache_hit("negative"),
                    Err(e) => tracing::warn!(error = %e, "oracle cache entry malformed"),
                },
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "oracle cache read failed"),
            }

            // Tier B: proximity against the replicated oracle cache bands.
            match self
                .index
                .band_candidates(ORACLE_CACHE_BAND_PREFIX, fingerprint, quorum)
                .await
            {
                Ok(lookup) if !lookup.matched_keys.is_empty() => {
                    verdict.proximity_match = true;
                    if let Some((_, d)) = nearest(fingerprint, &lookup.candidates, max_distance) {
                        verdict.action = Action::Spam;
                        verdict.label = Some("oracle_cache_match".into());
                        verdict.distance = Some(d);
                        self.metrics.cache_hit("positive");
                        break 'fingerprints;
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "oracle cache band lookup failed"),
            }

            // Tier C: local reputation.
            match self
                .index
                .band_candidates(LOCAL_BAND_PREFIX, fingerprint, quorum)
                .await
            {
                Ok(lookup) if !lookup.matched_keys.is_empty() => {
                    verdict.proximity_match = true;
                    if let Err(e) = self.index.refresh_keys(&lookup.matched_keys, retention).await
                    {
                        tracing::warn!(error = %e, "band TTL refresh failed");
                    }

                    let mut close = crate::fingerprint::distance::distance_batch(
                        fingerprint,
                        &lookup.candidates,
                    );
                    close.retain(|(_, d)| *d <= max_distance);
                    close.sort_by_key(|(_, d)| *d);

                    for (candidate, d) in close {
                        match self.index.score_get(&candidate).await {
                            Ok(score) if score >= threshold => {
                                verdict.action = Action::Spam;
                                verdict.label = Some("local_spam".into());
                                verdict.distance = Some(d);
                                self.metrics.local_match_total.inc();
                                // Extend retention on every band of the
                                // matched digest, not just the shared ones.
                                if let Err(e) =
                                    self.index.index_refresh(&candidate, retention).await
                                {
                                    tracing::warn!(error = %e, "reputation TTL refresh failed");
                                }
                                break 'fingerprints;
                            }
                            Ok(_) => {}
                            Err(e) => tracing::warn!(error = %e, "score read failed"),
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "local band lookup failed"),
            }

            // Tier D: oracle LSH gate, then the decision RPC.
            match self.index.oracle_band_quorum(fingerprint, quorum).await {
                Ok(true) => {
                    let result = self.oracle.decision(fingerprint).await;
                    if result.action == Action::Spam {
                        verdict.adopt(&result);
                        self.metrics.oracle_match("complete");
                        break 'fingerprints;
                    }
                    verdict.proximity_match = true;
                    self.metrics.oracle_match("partial");
                }
                Ok(false) => {}
                Err(e) => tracing::warn!(error = %e, "oracle band lookup failed"),
            }
        }

        Ok(verdict)
    }
}

/// Nearest candidate within the distance cutoff.
fn nearest(
    fingerprint: &str,
    candidates: &[String],
    max_distance: i32,
) -> Option<(String, i32)> {
    crate::fingerprint::distance::distance_batch(fingerprint, candidates)
        .into_iter()
        .filter(|(_, d)| *d <= max_distance)
        .min_by_key(|(_, d)| *d)
}
