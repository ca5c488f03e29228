//! LSH band extraction.
//!
//! A band is `"i:v"` where `i` is the window offset and `v` a 6-hex-char
//! slice of the digest body, taken with stride 3 over the first 64 body
//! characters. Digests that are close under TLSH distance share many bands,
//! so band keys act as coarse buckets: a lookup demands a quorum of shared
//! bands before any distance is computed.

/// Hex characters per band value.
pub const BAND_WIDTH: usize = 6;
/// Step between consecutive window offsets.
pub const BAND_STRIDE: usize = 3;
/// Portion of the digest body covered by bands.
pub const BAND_SPAN: usize = 64;

/// Offset of the digest body: `T1` version prefix plus 6 header hex chars
/// (checksum, length, quartile ratios).
const BODY_OFFSET: usize = 8;

/// Derive the band set for a digest. Pure and deterministic; a digest too
/// short to carry a full body yields whatever windows fit, and a digest
/// without a body yields nothing.
pub fn bands(digest: &str) -> Vec<String> {
    let digest = digest.trim();
    if digest.len() <= BODY_OFFSET {
        return Vec::new();
    }
    let body = digest[BODY_OFFSET..].to_ascii_uppercase();
    let span = body.len().min(BAND_SPAN);

    let mut out = Vec::with_capacity(span / BAND_STRIDE);
    let mut i = 0;
    while i + BAND_WIDTH <= span {
        out.push(format!("{}:{}", i, &body[i..i + BAND_WIDTH]));
        i += BAND_STRIDE;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIGEST: &str = "T147B1A513F6C0A4A0C9B39276337946A9B121BA42E3658D79B5C53F3B3E46EDF85A02AD";

    #[test]
    fn full_digest_yields_twenty_bands() {
        assert_eq!(DIGEST.len(), 72);
        let bands = bands(DIGEST);
        assert_eq!(bands.len(), 20);
    }

    #[test]
    fn bands_have_offset_and_six_hex_chars() {
        for band in bands(DIGEST) {
            let (i, v) = band.split_once(':').expect("i:v format");
            let i: usize = i.parse().expect("numeric offset");
            assert_eq!(i % BAND_STRIDE, 0);
            assert_eq!(v.len(), BAND_WIDTH);
            assert!(v.chars().all(|c| c.is_ascii_hexdigit()));
        }
    }

    #[test]
    fn extraction_is_deterministic() {
        assert_eq!(bands(DIGEST), bands(DIGEST));
    }

    #[test]
    fn case_is_normalized() {
        assert_eq!(bands(DIGEST), bands(&DIGEST.to_ascii_lowercase()));
    }

    #[test]
    fn identical_digests_share_every_band() {
        let a = bands(DIGEST);
        let b = bands(DIGEST);
        assert!(a.iter().all(|band| b.contains(band)));
    }

    #[test]
    fn short_input_yields_no_bands() {
        assert!(bands("T1AB").is_empty());
        assert!(bands("").is_empty());
    }

    #[test]
    fn first_band_covers_body_start() {
        let first = &bands(DIGEST)[0];
        assert_eq!(first, &format!("0:{}", &DIGEST[8..14]));
    }
}
