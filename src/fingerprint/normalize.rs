//! Body normalization ahead of fingerprinting.
//!
//! Spam campaigns rotate tracking ids, image URLs and whitespace between
//! sends; normalization folds those axes away so the normalized-body digest
//! lands near its siblings. The pass is deterministic and order-preserving
//! apart from the substitutions below.

use std::sync::OnceLock;

use regex::Regex;

/// Sentinel substituted for any `<img src=…>` tag.
const IMG_SENTINEL: &str = "<img src=\"imgurl\">";
/// Sentinel substituted for hex-looking tokens of 8+ chars.
const HEX_SENTINEL: &str = "hexnum";

fn img_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"<img[^>]*\bsrc\s*=\s*["'][^"']*["'][^>]*>"#).unwrap())
}

fn tracker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(utm_[a-z0-9_]+|gclid|fbclid|mc_eid|mc_cid|igshid|msclkid)=[^&\s"'<>]*&?"#)
            .unwrap()
    })
}

fn hex_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b[0-9a-f]{8,}\b").unwrap())
}

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").unwrap())
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]*>").unwrap())
}

/// Normalize a body (plaintext and HTML concatenated): lowercase, swap
/// `<img src=…>` tags for a fixed sentinel, strip common URL tracker
/// parameters, swap long hex tokens for a sentinel, collapse whitespace.
pub fn normalize(body: &str) -> String {
    let lowered = body.to_lowercase();
    let no_imgs = img_tag_re().replace_all(&lowered, IMG_SENTINEL);
    let no_trackers = tracker_re().replace_all(&no_imgs, "");
    let no_hex = hex_token_re().replace_all(&no_trackers, HEX_SENTINEL);
    let collapsed = whitespace_re().replace_all(&no_hex, " ");
    collapsed.trim().to_string()
}

/// Count whitespace-separated words in HTML with the tags stripped. Gates
/// the external-image sidechannel: image-only spam carries almost no text.
pub fn html_word_count(html: &str) -> usize {
    tag_re()
        .replace_all(html, " ")
        .split_whitespace()
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_and_collapses_whitespace() {
        assert_eq!(normalize("Hello   WORLD\n\n foo"), "hello world foo");
    }

    #[test]
    fn replaces_img_tags_with_sentinel() {
        let html = r#"before <img class="x" src="https://cdn.example/a.png" width="600"> after"#;
        assert_eq!(
            normalize(html),
            r#"before <img src="imgurl"> after"#
        );
    }

    #[test]
    fn replaces_long_hex_tokens() {
        let out = normalize("id deadbeef00 and cafe");
        assert_eq!(out, "id hexnum and cafe");
    }

    #[test]
    fn short_hex_tokens_survive() {
        assert_eq!(normalize("dead beef"), "dead beef");
    }

    #[test]
    fn strips_tracker_parameters() {
        let out = normalize("visit https://shop.example/p?id=1&utm_source=mail&utm_camp=x&gclid=abc now");
        assert!(!out.contains("utm_source"), "{out}");
        assert!(!out.contains("gclid"), "{out}");
        assert!(out.contains("id=1"), "{out}");
    }

    #[test]
    fn normalization_is_deterministic() {
        let body = "Some BODY  with <img src='http://x/y.gif'> and utm_term=z&ok=1 0123456789abcdef";
        assert_eq!(normalize(body), normalize(body));
    }

    #[test]
    fn whitespace_variants_converge() {
        assert_eq!(normalize("buy  now\tcheap"), normalize("buy now cheap"));
    }

    #[test]
    fn word_count_ignores_tags() {
        assert_eq!(html_word_count("<html><body><img src='x'></body></html>"), 0);
        assert_eq!(html_word_count("<p>only three words</p>"), 3);
    }
}
