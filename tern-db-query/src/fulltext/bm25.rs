//! BM25 scoring primitives
//!
//! IDF: `ln(1 + (N - n + 0.5) / (n + 0.5))`
//! Term score: `tf * (k1 + 1) / (tf + k1 * (1 - b + b * dl / avg_dl))`
//! with k1 = 2.0, b = 0.75.

const K1: f64 = 2.0;
const B: f64 = 0.75;

/// Inverse document frequency of a word
pub fn idf(total_docs: usize, matched_docs: usize) -> f64 {
    let n = total_docs as f64;
    let m = matched_docs as f64;
    (1.0 + (n - m + 0.5) / (m + 0.5)).ln()
}

/// Length-normalized term-frequency component
pub fn bm25_score(term_count_in_field: u32, words_in_field: u32, avg_words_in_field: f64) -> f64 {
    let tf = term_count_in_field as f64;
    let dl = words_in_field as f64;
    let denom_norm = if avg_words_in_field > 0.0 {
        1.0 - B + B * dl / avg_words_in_field
    } else {
        1.0
    };
    tf * (K1 + 1.0) / (tf + K1 * denom_norm)
}

/// Blend a raw score with a configured weight and boost:
/// `(1 - weight) + score * boost * weight`
pub fn bound(score: f64, weight: f64, boost: f64) -> f64 {
    (1.0 - weight) + score * boost * weight
}

/// Positional rank: earlier occurrences rank higher, in coarse bands
pub fn pos2rank(pos: u32) -> f64 {
    let p = pos as f64;
    if pos <= 10 {
        1.0 - p / 100.0
    } else if pos <= 100 {
        0.9 - p / 1000.0
    } else if pos <= 1000 {
        0.8 - p / 10_000.0
    } else if pos <= 10_000 {
        0.7 - p / 100_000.0
    } else if pos <= 100_000 {
        0.6 - p / 1_000_000.0
    } else {
        0.5
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idf_rewards_rare_words() {
        assert!(idf(1000, 1) > idf(1000, 500));
        assert!(idf(10, 10) > 0.0);
    }

    #[test]
    fn bm25_saturates_with_tf() {
        let one = bm25_score(1, 10, 10.0);
        let five = bm25_score(5, 10, 10.0);
        let fifty = bm25_score(50, 10, 10.0);
        assert!(five > one);
        // saturation: the 5->50 gain is much smaller than 1->5
        assert!((fifty - five) < (five - one));
    }

    #[test]
    fn pos2rank_is_monotone_decreasing() {
        let ranks: Vec<f64> = [0u32, 5, 10, 50, 100, 999, 5000, 99_999, 200_000]
            .iter()
            .map(|&p| pos2rank(p))
            .collect();
        for w in ranks.windows(2) {
            assert!(w[0] >= w[1], "{} < {}", w[0], w[1]);
        }
    }

    #[test]
    fn bound_blends_toward_one() {
        // zero weight ignores the score entirely
        assert_eq!(bound(0.3, 0.0, 1.0), 1.0);
        // full weight passes the boosted score through
        assert_eq!(bound(0.5, 1.0, 2.0), 1.0);
    }
}
