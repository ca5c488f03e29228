//! TLSH distance over digest strings.
//!
//! tlsh2's comparison works on built hash objects, which only exist while
//! the hashed input is in hand. Here one side of every comparison is a
//! candidate read back from the store as a digest string, and the bytes
//! that produced it are long gone (raw mail is never kept), so the scoring
//! runs on the string form instead: decode the 72-char digest that
//! `hash()` emits (version tag, nibble-swapped checksum/length/quartile
//! header, 32 body bytes), then apply the published TLSH scoring with the
//! length component included: modular length distance, quartile-ratio
//! distances, checksum mismatch penalty, 2-bit bucket distance with the
//! far-bucket penalty. This module is the single distance authority; every
//! tier compares through it. Lower is more similar; 0 iff the digests are
//! equal.

/// Decoded digest header and body.
struct Decoded {
    checksum: u8,
    lvalue: u8,
    q1: u8,
    q2: u8,
    body: [u8; 32],
}

/// Penalty applied when a 2-bit bucket pair differs by the maximum 3.
const OUTLIER_BUCKET_COST: i32 = 6;
/// Multiplier for length and quartile distances beyond the free step.
const RANGE_MULT: i32 = 12;

fn swap_nibbles(b: u8) -> u8 {
    (b << 4) | (b >> 4)
}

fn decode(digest: &str) -> Option<Decoded> {
    let digest = digest.trim();
    let hex_part = digest
        .strip_prefix("T1")
        .or_else(|| digest.strip_prefix("t1"))
        .unwrap_or(digest);
    let raw = hex::decode(hex_part).ok()?;
    if raw.len() != 35 {
        return None;
    }

    let qb = swap_nibbles(raw[2]);
    let mut body = [0u8; 32];
    body.copy_from_slice(&raw[3..35]);
    Some(Decoded {
        checksum: swap_nibbles(raw[0]),
        lvalue: swap_nibbles(raw[1]),
        q1: qb >> 4,
        q2: qb & 0x0F,
        body,
    })
}

/// Circular distance between two values in a ring of size `range`.
fn mod_diff(a: u8, b: u8, range: i32) -> i32 {
    let d = (a as i32 - b as i32).abs();
    d.min(range - d)
}

/// Sum of 2-bit bucket distances over the body bytes.
fn body_distance(a: &[u8; 32], b: &[u8; 32]) -> i32 {
    let mut total = 0;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let (mut x, mut y) = (x, y);
        for _ in 0..4 {
            let d = ((x & 3) as i32 - (y & 3) as i32).abs();
            total += if d == 3 { OUTLIER_BUCKET_COST } else { d };
            x >>= 2;
            y >>= 2;
        }
    }
    total
}

/// Distance between two digests. `None` when either digest does not decode;
/// callers treat an undecodable candidate as a non-match.
pub fn distance(a: &str, b: &str) -> Option<i32> {
    let da = decode(a)?;
    let db = decode(b)?;

    let mut score = 0;

    let ldiff = mod_diff(da.lvalue, db.lvalue, 256);
    score += match ldiff {
        0 => 0,
        1 => 1,
        d => d * RANGE_MULT,
    };

    for (qa, qb) in [(da.q1, db.q1), (da.q2, db.q2)] {
        let qdiff = mod_diff(qa, qb, 16);
        score += if qdiff <= 1 {
            qdiff
        } else {
            (qdiff - 1) * RANGE_MULT
        };
    }

    if da.checksum != db.checksum {
        score += 1;
    }

    score += body_distance(&da.body, &db.body);
    Some(score)
}

/// Distance from one digest to each of a batch of candidates, preserving
/// candidate order. Undecodable candidates are dropped.
pub fn distance_batch<'a, I>(from: &str, candidates: I) -> Vec<(String, i32)>
where
    I: IntoIterator<Item = &'a String>,
{
    candidates
        .into_iter()
        .filter_map(|c| distance(from, c).map(|d| (c.clone(), d)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: &str = "T147B1A513F6C0A4A0C9B39276337946A9B121BA42E3658D79B5C53F3B3E46EDF85A02AD";

    /// Same as `A` except the final body byte.
    const B: &str = "T147B1A513F6C0A4A0C9B39276337946A9B121BA42E3658D79B5C53F3B3E46EDF85A02AE";

    /// Same body as `A`, different length byte.
    const C: &str = "T147FFA513F6C0A4A0C9B39276337946A9B121BA42E3658D79B5C53F3B3E46EDF85A02AD";

    #[test]
    fn self_distance_is_zero() {
        assert_eq!(distance(A, A), Some(0));
        assert_eq!(distance(B, B), Some(0));
    }

    #[test]
    fn distance_is_symmetric() {
        assert_eq!(distance(A, B), distance(B, A));
        assert_eq!(distance(A, C), distance(C, A));
    }

    #[test]
    fn nearby_body_change_scores_low() {
        // AD -> AE flips one 2-bit pair by one step.
        let d = distance(A, B).unwrap();
        assert!(d > 0 && d <= 3, "got {d}");
    }

    #[test]
    fn length_field_dominates_when_far() {
        // lvalue B1 vs FF decodes (nibble-swapped) to a large modular gap,
        // each step of which costs 12.
        let d = distance(A, C).unwrap();
        assert!(d >= RANGE_MULT, "got {d}");
    }

    #[test]
    fn prefix_case_is_tolerated() {
        assert_eq!(distance(A, &A.to_ascii_lowercase()), Some(0));
    }

    #[test]
    fn undecodable_digest_yields_none() {
        assert_eq!(distance(A, "T1ZZZZ"), None);
        assert_eq!(distance("", A), None);
        assert_eq!(distance(A, "T147B1"), None);
    }

    #[test]
    fn batch_preserves_order_and_drops_garbage() {
        let candidates = vec![B.to_string(), "junk".to_string(), A.to_string()];
        let out = distance_batch(A, &candidates);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].0, B);
        assert_eq!(out[1].0, A);
        assert_eq!(out[1].1, 0);
    }
}
