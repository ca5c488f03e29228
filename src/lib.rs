//! # Mailuminati Guardian
//!
//! A local HTTP analyzer that classifies mail as spam or allow by combining
//! TLSH structural fingerprints, an LSH band index over an external
//! key/value store, a locally learned reputation score, and a remote oracle
//! that arbitrates ambiguous cases. Invoked synchronously by a mail filter
//! per message; operator reports feed back through `/report` and mutate the
//! local index immediately.
//!
//! Only structural fingerprints ever leave the host; raw mail content is
//! neither stored nor shared.

pub mod analyzer;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod images;
pub mod metrics;
pub mod oracle;
pub mod reporter;
pub mod server;
pub mod store;
pub mod sync;

pub use analyzer::{Analyzer, Verdict};
pub use config::Config;
pub use oracle::OracleClient;
pub use reporter::Reporter;
pub use store::index::Index;
pub use store::RedisStore;

/// Build version reported by `/status`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
