//! Report handling: immediate local learning plus oracle forwarding.
//!
//! A report names a previously analyzed Message-ID. Each digest from its
//! scan record is folded into the reputation of a canonical local
//! representative: the nearest already-stored neighbor within the distance
//! cutoff, or the digest itself. Spam reports that only confirm what the
//! node already knows are not forwarded, so one campaign cannot amplify
//! itself through the oracle; ham reports always reach the oracle because a
//! false positive is the costlier error.

use std::sync::Arc;

use serde::Deserialize;

use crate::config::Config;
use crate::error::ReportError;
use crate::fingerprint::distance::distance_batch;
use crate::oracle::OracleClient;
use crate::store::index::{canonical_message_id, Index, DAY_TTL};
use crate::store::LOCAL_BAND_PREFIX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportType {
    Spam,
    Ham,
}

impl ReportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportType::Spam => "spam",
            ReportType::Ham => "ham",
        }
    }
}

/// The `/report` request body.
#[derive(Debug, Deserialize)]
pub struct ReportRequest {
    #[serde(rename = "message-id")]
    pub message_id: String,
    pub report_type: ReportType,
}

/// What happened to a report; the HTTP layer maps these onto status codes.
#[derive(Debug)]
pub enum ReportOutcome {
    /// Same (message-id, type) seen within the dedup window.
    Duplicate,
    /// No scan record for the Message-ID.
    NotFound,
    /// The scan record exists but carries no digests.
    NoHashes,
    /// Learned locally from a known campaign; oracle intentionally skipped.
    SkippedOracle,
    /// Forwarded; the oracle's reply is proxied verbatim.
    Forwarded { status: u16, body: String },
    /// Forwarding failed at the transport level.
    OracleUnreachable,
}

pub struct Reporter {
    index: Index,
    oracle: Arc<OracleClient>,
    config: Arc<Config>,
}

impl Reporter {
    pub fn new(index: Index, oracle: Arc<OracleClient>, config: Arc<Config>) -> Self {
        Self {
            index,
            oracle,
            config,
        }
    }

    pub async fn report(&self, request: &ReportRequest) -> Result<ReportOutcome, ReportError> {
        let message_id = canonical_message_id(&request.message_id);

        if !self
            .index
            .report_mark(&message_id, request.report_type.as_str(), DAY_TTL)
            .await?
        {
            return Ok(ReportOutcome::Duplicate);
        }

        let Some(record) = self.index.scan_get(&message_id).await? else {
            return Ok(ReportOutcome::NotFound);
        };
        if record.hashes.is_empty() {
            return Ok(ReportOutcome::NoHashes);
        }

        // Weight snapshot for the whole report; SIGHUP cannot mix values.
        let spam_weight = self.config.spam_weight();
        let ham_weight = self.config.ham_weight();
        let quorum = self.config.min_band_matches();
        let max_distance = self.config.match_distance();
        let retention = self.config.retention();

        let mut known_locally = false;

        for fingerprint in &record.hashes {
            let neighbor = match self
                .index
                .band_candidates(LOCAL_BAND_PREFIX, fingerprint, quorum)
                .await
            {
                Ok(lookup) => distance_batch(fingerprint, &lookup.candidates)
                    .into_iter()
                    .filter(|(_, d)| *d <= max_distance)
                    .min_by_key(|(_, d)| *d),
                Err(e) => {
                    tracing::warn!(error = %e, "representative lookup failed");
                    None
                }
            };

            match request.report_type {
                ReportType::Spam => {
                    let representative = match &neighbor {
                        Some((rep, _)) => {
                            known_locally = true;
                            rep.clone()
                        }
                        None => fingerprint.clone(),
                    };
                    if let Err(e) = self
                        .index
                        .score_add(&representative, spam_weight, retention)
                        .await
                    {
                        tracing::warn!(error = %e, "score increment failed");
                    }
                    if let Err(e) = self.index.index_add(&representative, retention).await {
                        tracing::warn!(error = %e, "band index write failed");
                    }
                }
                ReportType::Ham => {
                    // A ham correction only applies to something the node
                    // has learned; unknown digests are a local no-op but
                    // still reach the oracle.
                    if let Some((representative, _)) = &neighbor {
                        if let Err(e) = self
                            .index
                            .score_add(representative, -ham_weight, retention)
                            .await
                        {
                            tracing::warn!(error = %e, "score decrement failed");
                        }
                        if let Err(e) = self.index.index_refresh(representative, retention).await {
                            tracing::warn!(error = %e, "reputation TTL refresh failed");
                        }
                    }
                }
            }
        }

        if request.report_type == ReportType::Spam && known_locally {
            tracing::debug!(message_id, "campaign already learned, oracle skipped");
            return Ok(ReportOutcome::SkippedOracle);
        }

        match self
            .oracle
            .report(&record.hashes, request.report_type.as_str())
            .await
        {
            Ok(reply) => Ok(ReportOutcome::Forwarded {
                status: reply.status,
                body: reply.body,
            }),
            Err(e) => {
                tracing::warn!(error = %e, "oracle report forwarding failed");
                Ok(ReportOutcome::OracleUnreachable)
            }
        }
    }
}
