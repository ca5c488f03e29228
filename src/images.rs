//! External image sidechannel.
//!
//! Image-only spam carries its payload in a single large hero image, so
//! when a message has almost no text the analyzer enumerates external
//! `<img src=…>` URLs, fetches them concurrently under a hard budget, and
//! fingerprints the largest candidate. Fetching can leak a read-receipt to
//! the sender, which is why the whole feature sits behind
//! `MI_ENABLE_IMAGE_ANALYSIS`.

use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use regex::Regex;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::fingerprint::tlsh_digest;
use crate::store::index::{Index, DAY_TTL};

/// Messages with fewer HTML words than this are "image-only" candidates.
pub const SPARSE_TEXT_WORDS: usize = 10;
/// Upper bound on URLs considered per message.
pub const MAX_EXTERNAL_IMAGES: usize = 10;
/// Concurrent fetch cap.
const MAX_IN_FLIGHT: usize = 5;
/// Wall-clock budget for the whole fan-out.
const FETCH_BUDGET: Duration = Duration::from_secs(5);
/// Per-request timeout.
const FETCH_TIMEOUT: Duration = Duration::from_secs(5);
/// Candidates smaller than this are decoration, not payload.
const MIN_EXTERNAL_IMAGE_SIZE: usize = 40 * 1024;
/// Read cap per response body.
const MAX_IMAGE_READ: usize = 10 * 1024 * 1024;

fn img_src_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)<img[^>]*\bsrc\s*=\s*["'](https?://[^"']+)["']"#).unwrap()
    })
}

/// Unique external image URLs in document order, capped.
pub fn extract_image_urls(html: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut urls = Vec::new();
    for capture in img_src_re().captures_iter(html) {
        let url = capture[1].to_string();
        if seen.insert(url.clone()) {
            urls.push(url);
            if urls.len() >= MAX_EXTERNAL_IMAGES {
                break;
            }
        }
    }
    urls
}

struct Candidate {
    url: String,
    size: u64,
    /// Known digest when served from the image cache.
    digest: Option<String>,
    /// Raw bytes when freshly fetched; hashed only if this candidate wins.
    bytes: Option<Vec<u8>>,
}

/// Concurrent fetcher with a shared best-candidate slot.
pub struct ImageSidechannel {
    http: reqwest::Client,
    index: Index,
}

impl ImageSidechannel {
    pub fn new(index: Index) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(FETCH_TIMEOUT).build()?;
        Ok(Self { http, index })
    }

    /// Fetch the message's external images and return the digest of the
    /// largest usable one, if any.
    pub async fn best_external_digest(&self, html: &str) -> Option<String> {
        let urls = extract_image_urls(html);
        if urls.is_empty() {
            return None;
        }

        let best: Arc<Mutex<Option<Candidate>>> = Arc::new(Mutex::new(None));
        let semaphore = Arc::new(Semaphore::new(MAX_IN_FLIGHT));
        let mut tasks = JoinSet::new();

        for url in urls {
            let best = best.clone();
            let semaphore = semaphore.clone();
            let http = self.http.clone();
            let index = self.index.clone();
            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return;
                };
                if let Some(candidate) = fetch_candidate(&http, &index, &url).await {
                    let mut slot = best.lock().unwrap_or_else(|e| e.into_inner());
                    let better = slot
                        .as_ref()
                        .map(|current| candidate.size > current.size)
                        .unwrap_or(true);
                    if better {
                        *slot = Some(candidate);
                    }
                }
            });
        }

        let drain = async {
            while tasks.join_next().await.is_some() {}
        };
        if tokio::time::timeout(FETCH_BUDGET, drain).await.is_err() {
            tracing::debug!("image fetch budget expired, using best so far");
            tasks.abort_all();
        }

        let winner = best.lock().unwrap_or_else(|e| e.into_inner()).take()?;
        if let Some(digest) = winner.digest {
            return Some(digest);
        }

        let digest = tlsh_digest(winner.bytes.as_deref()?)?;
        if let Err(e) = self
            .index
            .image_cache_put(&winner.url, winner.size, &digest, DAY_TTL)
            .await
        {
            tracing::warn!(error = %e, "image cache write failed");
        }
        Some(digest)
    }
}

async fn fetch_candidate(
    http: &reqwest::Client,
    index: &Index,
    url: &str,
) -> Option<Candidate> {
    match index.image_cache_get(url).await {
        Ok(Some((size, digest))) => {
            return Some(Candidate {
                url: url.to_string(),
                size,
                digest: Some(digest),
                bytes: None,
            });
        }
        Ok(None) => {}
        Err(e) => tracing::warn!(error = %e, "image cache read failed"),
    }

    let mut response = match http.get(url).send().await {
        Ok(r) => r,
        Err(e) => {
            tracing::debug!(url, error = %e, "image fetch failed");
            return None;
        }
    };
    if response.status() != reqwest::StatusCode::OK {
        return None;
    }

    let mut bytes: Vec<u8> = Vec::new();
    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                let room = MAX_IMAGE_READ - bytes.len();
                bytes.extend_from_slice(&chunk[..chunk.len().min(room)]);
                if bytes.len() >= MAX_IMAGE_READ {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(url, error = %e, "image read failed");
                return None;
            }
        }
    }
    if bytes.len() < MIN_EXTERNAL_IMAGE_SIZE {
        return None;
    }

    Some(Candidate {
        url: url.to_string(),
        size: bytes.len() as u64,
        digest: None,
        bytes: Some(bytes),
    })
}
