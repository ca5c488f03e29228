//! Prometheus counters.
//!
//! The struct owns its own `Registry` (no process-global default), so tests
//! can build as many instances as they need without name collisions.
//! Registration failure at startup is fatal.

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Counter snapshot for the periodic stats log.
#[derive(Debug, Clone, Copy)]
pub struct MetricsSnapshot {
    pub scanned: u64,
    pub local_matches: u64,
    pub oracle_complete: u64,
    pub oracle_partial: u64,
    pub cache_positive: u64,
    pub cache_negative: u64,
}

pub struct Metrics {
    registry: Registry,
    pub scanned_total: IntCounter,
    pub local_match_total: IntCounter,
    oracle_match_total: IntCounterVec,
    cache_hits_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let scanned_total = IntCounter::new(
            "mailuminati_guardian_scanned_total",
            "Messages received by /analyze",
        )?;
        let local_match_total = IntCounter::new(
            "mailuminati_guardian_local_match_total",
            "Spam verdicts from the local reputation index",
        )?;
        let oracle_match_total = IntCounterVec::new(
            Opts::new(
                "mailuminati_guardian_oracle_match_total",
                "Oracle adjudications by outcome",
            ),
            &["type"],
        )?;
        let cache_hits_total = IntCounterVec::new(
            Opts::new(
                "mailuminati_guardian_cache_hits_total",
                "Oracle decision cache hits by result",
            ),
            &["result"],
        )?;

        registry.register(Box::new(scanned_total.clone()))?;
        registry.register(Box::new(local_match_total.clone()))?;
        registry.register(Box::new(oracle_match_total.clone()))?;
        registry.register(Box::new(cache_hits_total.clone()))?;

        Ok(Self {
            registry,
            scanned_total,
            local_match_total,
            oracle_match_total,
            cache_hits_total,
        })
    }

    /// `type="complete"` for an adopted oracle spam verdict, `"partial"`
    /// when the oracle declined to confirm.
    pub fn oracle_match(&self, kind: &str) {
        self.oracle_match_total.with_label_values(&[kind]).inc();
    }

    /// `result="positive"` for an adopted cached/cache-proximal verdict,
    /// `"negative"` for a cached allow.
    pub fn cache_hit(&self, result: &str) {
        self.cache_hits_total.with_label_values(&[result]).inc();
    }

    /// Prometheus text exposition of all registered collectors.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            scanned: self.scanned_total.get(),
            local_matches: self.local_match_total.get(),
            oracle_complete: self.oracle_match_total.with_label_values(&["complete"]).get(),
            oracle_partial: self.oracle_match_total.with_label_values(&["partial"]).get(),
            cache_positive: self.cache_hits_total.with_label_values(&["positive"]).get(),
            cache_negative: self.cache_hits_total.with_label_values(&["negative"]).get(),
        }
    }
}
