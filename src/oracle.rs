//! HTTP client for the remote oracle.
//!
//! Three endpoints: `/analyze` adjudicates a single fingerprint, `/report`
//! receives learned reports, `/sync` hands out band-index deltas. Only
//! structural fingerprints ever leave the host. The decision call never
//! fails the caller: any transport or decoding problem degrades to a
//! synthetic "partial match, unable to confirm" result.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::OracleError;

/// Client timeout for every oracle call.
const ORACLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Classification actions on the wire and in verdicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Allow,
    Spam,
}

/// An oracle adjudication, also the payload format of the local
/// oracle-decision cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub proximity_match: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<i32>,
}

impl AnalysisResult {
    /// The degraded result used when the oracle cannot be consulted.
    pub fn unconfirmed() -> Self {
        Self {
            action: Action::Allow,
            label: None,
            proximity_match: true,
            distance: None,
        }
    }
}

/// Oracle response to a forwarded report, proxied verbatim to the caller.
#[derive(Debug, Clone)]
pub struct OracleReply {
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncAction {
    UpdateDelta,
    FullResync,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpAction {
    Add,
    Remove,
}

/// One band-index mutation within a sync delta.
#[derive(Debug, Clone, Deserialize)]
pub struct BandOp {
    pub action: OpAction,
    #[serde(default)]
    pub bands: Vec<String>,
}

/// Same-cluster example the oracle pushes into the local decision cache and
/// oracle-cache band index.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheExample {
    pub signature: String,
    pub result: AnalysisResult,
}

/// A sync delta. Ops apply in order; `new_seq` is committed only after.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncDelta {
    pub new_seq: i64,
    pub action: SyncAction,
    #[serde(default)]
    pub ops: Vec<BandOp>,
    #[serde(default)]
    pub examples: Vec<CacheExample>,
}

/// Outcome of a sync poll.
#[derive(Debug, Clone)]
pub enum SyncOutcome {
    /// HTTP 304: nothing changed; do not touch seq or indexes.
    NotModified,
    Delta(SyncDelta),
}

#[derive(Serialize)]
struct DecisionRequest<'a> {
    node_id: &'a str,
    signature: &'a str,
}

#[derive(Serialize)]
struct ReportRequest<'a> {
    node_id: &'a str,
    signatures: &'a [String],
    report_type: &'a str,
}

#[derive(Serialize)]
struct SyncRequest<'a> {
    node_id: &'a str,
    current_seq: i64,
}

/// Async client for the oracle endpoints.
pub struct OracleClient {
    http: reqwest::Client,
    base_url: String,
    node_id: String,
}

impl OracleClient {
    pub fn new(base_url: String, node_id: String) -> Result<Self, OracleError> {
        let http = reqwest::Client::builder()
            .timeout(ORACLE_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            node_id,
        })
    }

    /// Ask the oracle to adjudicate a fingerprint. Never fails: network
    /// errors, non-2xx statuses and malformed payloads all degrade to
    /// [`AnalysisResult::unconfirmed`].
    pub async fn decision(&self, fingerprint: &str) -> AnalysisResult {
        let request = DecisionRequest {
            node_id: &self.node_id,
            signature: fingerprint,
        };
        let response = match self
            .http
            .post(format!("{}/analyze", self.base_url))
            .json(&request)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "oracle decision call failed");
                return AnalysisResult::unconfirmed();
            }
        };
        if !response.status().is_success() {
            tracing::warn!(status = %response.status(), "oracle decision rejected");
            return AnalysisResult::unconfirmed();
        }
        match response.json::<AnalysisResult>().await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(error = %e, "oracle decision payload malformed");
                AnalysisResult::unconfirmed()
            }
        }
    }

    /// Forward reported fingerprints. The reply is proxied verbatim, so any
    /// status the oracle chose comes back as-is; only transport failures
    /// surface as errors.
    pub async fn report(
        &self,
        signatures: &[String],
        report_type: &str,
    ) -> Result<OracleReply, OracleError> {
        let request = ReportRequest {
            node_id: &self.node_id,
            signatures,
            report_type,
        };
        let response = self
            .http
            .post(format!("{}/report", self.base_url))
            .json(&request)
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(OracleReply { status, body })
    }

    /// Poll for a band-index delta relative to `current_seq`.
    pub async fn sync(&self, current_seq: i64) -> Result<SyncOutcome, OracleError> {
        let request = SyncRequest {
            node_id: &self.node_id,
            current_seq,
        };
        let response = self
            .http
            .post(format!("{}/sync", self.base_url))
            .json(&request)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_MODIFIED {
            return Ok(SyncOutcome::NotModified);
        }
        if !response.status().is_success() {
            return Err(OracleError::Status(response.status().as_u16()));
        }
        let body = response.text().await?;
        let delta: SyncDelta = serde_json::from_str(&body).map_err(OracleError::Decode)?;
        Ok(SyncOutcome::Delta(delta))
    }
}
