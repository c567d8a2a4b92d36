//! Approximate string similarity for the fuzzy relevance signal.
//!
//! [`partial_ratio`] answers "does some stretch of the chunk look like the
//! query?" while tolerating typos and small rewordings. The shorter string is
//! slid across every equal-length window of the longer one and scored by
//! longest common subsequence, normalized to 0–100.
//!
//! LCS uses the bit-parallel formulation (one `u64` word per pattern), so a
//! pattern is at most 64 bytes and each window costs O(window) word
//! operations. A longer short string is covered by 64-byte slices that
//! overlap by half, and the best slice wins, so the end of a long question
//! counts as much as its start. Comparison is byte-wise; callers pass
//! lower-cased text.

/// Longest pattern handled by the bit-parallel LCS.
pub const MAX_PATTERN_BYTES: usize = 64;

const PATTERN_STEP: usize = MAX_PATTERN_BYTES / 2;

/// Best windowed LCS similarity between `a` and `b`, in `[0, 100]`.
pub fn partial_ratio(a: &str, b: &str) -> f64 {
    let (short, long) = if a.len() <= b.len() {
        (a.as_bytes(), b.as_bytes())
    } else {
        (b.as_bytes(), a.as_bytes())
    };
    if short.is_empty() || long.is_empty() {
        return 0.0;
    }

    let width = short.len().min(MAX_PATTERN_BYTES);
    let last = short.len() - width;
    let mut starts: Vec<usize> = (0..last).step_by(PATTERN_STEP).collect();
    starts.push(last);

    let mut best = 0.0f64;
    for start in starts {
        best = best.max(window_ratio(&short[start..start + width], long));
        if best >= 100.0 {
            break;
        }
    }
    best
}

/// Best LCS similarity of `pattern` (at most 64 bytes) against any
/// equal-length window of `long`.
fn window_ratio(pattern: &[u8], long: &[u8]) -> f64 {
    let m = pattern.len();
    let peq = pattern_table(pattern);

    let mut best = 0u32;
    for window in long.windows(m) {
        let lcs = lcs_len(&peq, m, window);
        if lcs > best {
            best = lcs;
            if best as usize == m {
                break;
            }
        }
    }

    100.0 * f64::from(best) / m as f64
}

/// Per-byte match masks: bit `i` of `peq[c]` is set when `pattern[i] == c`.
fn pattern_table(pattern: &[u8]) -> [u64; 256] {
    let mut peq = [0u64; 256];
    for (i, &c) in pattern.iter().enumerate() {
        peq[c as usize] |= 1u64 << i;
    }
    peq
}

/// LCS length of the pattern encoded in `peq` (length `m`) and `text`.
fn lcs_len(peq: &[u64; 256], m: usize, text: &[u8]) -> u32 {
    let mut v: u64 = !0;
    for &c in text {
        let u = v & peq[c as usize];
        v = v.wrapping_add(u) | v.wrapping_sub(u);
    }
    let mask = if m >= 64 { !0 } else { (1u64 << m) - 1 };
    (!v & mask).count_ones()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_substring_is_perfect() {
        let r = partial_ratio("speed limit", "the posted speed limit is 25 mph");
        assert!((r - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_typo_scores_high() {
        let r = partial_ratio("spead limit", "the posted speed limit is 25 mph");
        assert!(r > 85.0, "ratio was {}", r);
    }

    #[test]
    fn test_unrelated_scores_low() {
        let r = partial_ratio("xyz", "abcdefgh");
        assert!(r < 1e-9);
    }

    #[test]
    fn test_empty_inputs() {
        assert_eq!(partial_ratio("", "anything"), 0.0);
        assert_eq!(partial_ratio("anything", ""), 0.0);
    }

    #[test]
    fn test_symmetric_in_argument_order() {
        let a = "fire hydrant";
        let b = "do not park near a fire hydrant";
        assert_eq!(partial_ratio(a, b), partial_ratio(b, a));
    }

    #[test]
    fn test_lcs_matches_known_value() {
        // LCS("abcde", "ace") = 3
        let peq = pattern_table(b"ace");
        assert_eq!(lcs_len(&peq, 3, b"abcde"), 3);
        let peq = pattern_table(b"abcbdab");
        assert_eq!(lcs_len(&peq, 7, b"bdcaba"), 4);
    }

    #[test]
    fn test_long_query_tail_is_scored() {
        let query = "what does the driver handbook say about the posted limit in school zones when children are present";
        let chunk = "reduce your speed in school zones when children are present, and watch for crossing guards at every marked crosswalk near the school.";
        assert!(partial_ratio(&query[..MAX_PATTERN_BYTES], chunk) < 70.0);
        let r = partial_ratio(query, chunk);
        assert!(r > 70.0, "ratio was {}", r);
    }

    #[test]
    fn test_long_pattern_is_capped() {
        let long_query = "a".repeat(200);
        let chunk = "a".repeat(300);
        assert!((partial_ratio(&long_query, &chunk) - 100.0).abs() < 1e-9);
    }
}
