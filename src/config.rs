//! Runtime configuration.
//!
//! Options resolve in order: config-file map, process environment, built-in
//! default. The string map sits behind an `RwLock` and is replaced wholesale
//! on SIGHUP; the numeric knobs the hot path reads (weights, threshold,
//! retention, match tunables) are additionally mirrored into atomics so a
//! reload mid-request can never hand out a half-old, half-new pair.
//!
//! Config file format: one `KEY=VALUE` per line, `#` comments, optional
//! double quotes around the value.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use crate::error::ConfigError;

/// Recognized option keys and their defaults.
const DEFAULTS: &[(&str, &str)] = &[
    ("REDIS_HOST", "localhost"),
    ("REDIS_PORT", "6379"),
    ("GUARDIAN_BIND_ADDR", "127.0.0.1"),
    ("PORT", "12421"),
    ("ORACLE_URL", "https://oracle.mailuminati.com"),
    ("MI_ENABLE_IMAGE_ANALYSIS", "true"),
    ("SPAM_WEIGHT", "1"),
    ("HAM_WEIGHT", "2"),
    ("SPAM_THRESHOLD", "1"),
    ("LOCAL_RETENTION_DAYS", "15"),
    ("MATCH_DISTANCE", "70"),
    ("MIN_BAND_MATCHES", "4"),
    ("LOG_LEVEL", "INFO"),
    ("LOG_FORMAT", "TEXT"),
];

/// Shared runtime configuration. Construct once, reload via [`Config::reload`].
pub struct Config {
    path: Option<PathBuf>,
    map: RwLock<HashMap<String, String>>,

    // Hot-path snapshot. Refreshed atomically on load/reload.
    spam_weight: AtomicI64,
    ham_weight: AtomicI64,
    spam_threshold: AtomicI64,
    retention_days: AtomicI64,
    match_distance: AtomicI64,
    min_band_matches: AtomicI64,
    image_analysis: AtomicBool,
}

impl Config {
    /// Load configuration, reading `path` if given (a missing file is not an
    /// error; the file layer is simply empty).
    pub fn load(path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let map = match &path {
            Some(p) if p.exists() => parse_file(&std::fs::read_to_string(p)?)?,
            _ => HashMap::new(),
        };

        let config = Self {
            path,
            map: RwLock::new(map),
            spam_weight: AtomicI64::new(0),
            ham_weight: AtomicI64::new(0),
            spam_threshold: AtomicI64::new(1),
            retention_days: AtomicI64::new(15),
            match_distance: AtomicI64::new(70),
            min_band_matches: AtomicI64::new(4),
            image_analysis: AtomicBool::new(true),
        };
        config.refresh_snapshot();
        Ok(config)
    }

    /// Re-read the config file and refresh the numeric snapshot. In-flight
    /// requests keep whatever snapshot they already captured.
    pub fn reload(&self) -> Result<(), ConfigError> {
        if let Some(p) = &self.path {
            let map = if p.exists() {
                parse_file(&std::fs::read_to_string(p)?)?
            } else {
                HashMap::new()
            };
            *self.map.write().unwrap_or_else(|e| e.into_inner()) = map;
        }
        self.refresh_snapshot();
        Ok(())
    }

    /// Resolve a key: file map, then environment, then default.
    pub fn get(&self, key: &str) -> Option<String> {
        if let Some(v) = self
            .map
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
        {
            return Some(v.clone());
        }
        if let Ok(v) = std::env::var(key) {
            return Some(v);
        }
        DEFAULTS
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| (*v).to_string())
    }

    fn get_i64(&self, key: &str, default: i64) -> i64 {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn refresh_snapshot(&self) {
        self.spam_weight
            .store(self.get_i64("SPAM_WEIGHT", 1).max(0), Ordering::SeqCst);
        self.ham_weight
            .store(self.get_i64("HAM_WEIGHT", 2).max(0), Ordering::SeqCst);
        self.spam_threshold
            .store(self.get_i64("SPAM_THRESHOLD", 1).max(1), Ordering::SeqCst);
        self.retention_days
            .store(self.get_i64("LOCAL_RETENTION_DAYS", 15).max(1), Ordering::SeqCst);
        self.match_distance
            .store(self.get_i64("MATCH_DISTANCE", 70).max(0), Ordering::SeqCst);
        self.min_band_matches
            .store(self.get_i64("MIN_BAND_MATCHES", 4).max(1), Ordering::SeqCst);
        let enabled = self
            .get("MI_ENABLE_IMAGE_ANALYSIS")
            .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
            .unwrap_or(true);
        self.image_analysis.store(enabled, Ordering::SeqCst);
    }

    // -----------------------------------------------------------------------
    // Typed accessors
    // -----------------------------------------------------------------------

    pub fn redis_url(&self) -> String {
        format!(
            "redis://{}:{}/",
            self.get("REDIS_HOST").unwrap_or_default(),
            self.get("REDIS_PORT").unwrap_or_default()
        )
    }

    pub fn bind_addr(&self) -> String {
        format!(
            "{}:{}",
            self.get("GUARDIAN_BIND_ADDR").unwrap_or_default(),
            self.get("PORT").unwrap_or_default()
        )
    }

    pub fn oracle_url(&self) -> String {
        self.get("ORACLE_URL")
            .unwrap_or_default()
            .trim_end_matches('/')
            .to_string()
    }

    pub fn log_level(&self) -> String {
        self.get("LOG_LEVEL").unwrap_or_else(|| "INFO".into())
    }

    pub fn log_format_json(&self) -> bool {
        self.get("LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false)
    }

    pub fn spam_weight(&self) -> i64 {
        self.spam_weight.load(Ordering::SeqCst)
    }

    pub fn ham_weight(&self) -> i64 {
        self.ham_weight.load(Ordering::SeqCst)
    }

    pub fn spam_threshold(&self) -> i64 {
        self.spam_threshold.load(Ordering::SeqCst)
    }

    /// TTL applied to learned state (`lg_f:*`, `lg_s:*`).
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_days.load(Ordering::SeqCst) as u64 * 24 * 3600)
    }

    /// Maximum TLSH distance for two digests to share a verdict.
    pub fn match_distance(&self) -> i32 {
        self.match_distance.load(Ordering::SeqCst) as i32
    }

    /// Band quorum below which an LSH lookup yields no candidates.
    pub fn min_band_matches(&self) -> usize {
        self.min_band_matches.load(Ordering::SeqCst) as usize
    }

    pub fn image_analysis_enabled(&self) -> bool {
        self.image_analysis.load(Ordering::SeqCst)
    }
}

fn parse_file(text: &str) -> Result<HashMap<String, String>, ConfigError> {
    let mut map = HashMap::new();
    for (n, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(ConfigError::Malformed {
                line: n + 1,
                text: line.to_string(),
            });
        };
        let mut value = value.trim();
        if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
            value = &value[1..value.len() - 1];
        }
        map.insert(key.trim().to_string(), value.to_string());
    }
    Ok(map)
}
