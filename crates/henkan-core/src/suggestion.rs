//! Bloom-filter based suggestion filter.
//!
//! Holds the list of words that must never be shown as automatic
//! suggestions. The filter has no false negatives for inserted words; the
//! false-positive rate is kept below 1e-4 by sizing the bit array at 20 bits
//! per word with 13 probes.

use std::hash::{DefaultHasher, Hash, Hasher};

const BITS_PER_WORD: usize = 20;
const NUM_PROBES: u64 = 13;

pub struct SuggestionFilter {
    bits: Vec<u64>,
    num_bits: u64,
}

impl SuggestionFilter {
    /// Build the filter from the bad-suggestion word list.
    pub fn from_words<S: AsRef<str>>(words: &[S]) -> Self {
        let num_bits = (words.len().max(1) * BITS_PER_WORD) as u64;
        let mut filter = Self {
            bits: vec![0u64; num_bits.div_ceil(64) as usize],
            num_bits,
        };
        for word in words {
            let (h1, h2) = hash_pair(word.as_ref());
            for i in 0..NUM_PROBES {
                let bit = (h1.wrapping_add(i.wrapping_mul(h2))) % filter.num_bits;
                filter.bits[(bit / 64) as usize] |= 1u64 << (bit % 64);
            }
        }
        filter
    }

    /// An empty filter that rejects nothing.
    pub fn empty() -> Self {
        Self::from_words::<&str>(&[])
    }

    pub fn is_bad_suggestion(&self, text: &str) -> bool {
        if text.is_empty() {
            return false;
        }
        let (h1, h2) = hash_pair(text);
        (0..NUM_PROBES).all(|i| {
            let bit = (h1.wrapping_add(i.wrapping_mul(h2))) % self.num_bits;
            self.bits[(bit / 64) as usize] & (1u64 << (bit % 64)) != 0
        })
    }
}

fn hash_pair(text: &str) -> (u64, u64) {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    let h1 = hasher.finish();
    // Second independent hash: fold a salt into the same hasher family.
    let mut hasher = DefaultHasher::new();
    0xa5a5_5a5a_u32.hash(&mut hasher);
    text.hash(&mut hasher);
    let h2 = hasher.finish() | 1; // odd, so probe stride never collapses
    (h1, h2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_false_negatives() {
        let words = ["ばか", "あほ", "しね", "うんこ"];
        let filter = SuggestionFilter::from_words(&words);
        for w in words {
            assert!(filter.is_bad_suggestion(w), "missing: {w}");
        }
    }

    #[test]
    fn test_unlisted_words_mostly_pass() {
        let words: Vec<String> = (0..1000).map(|i| format!("word{i}")).collect();
        let filter = SuggestionFilter::from_words(&words);
        // Sample the false-positive rate; with 20 bits/word it should stay
        // far below 1%, so 10000 probes give a comfortable margin.
        let false_positives = (0..10_000)
            .filter(|i| filter.is_bad_suggestion(&format!("other{i}")))
            .count();
        assert!(false_positives < 20, "too many false positives: {false_positives}");
    }

    #[test]
    fn test_empty_filter() {
        let filter = SuggestionFilter::empty();
        assert!(!filter.is_bad_suggestion("なにか"));
        assert!(!filter.is_bad_suggestion(""));
    }
}
