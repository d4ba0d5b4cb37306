//! Pure text-similarity primitives for near-duplicate finding detection.
//!
//! Two findings worded differently by different review passes still need to
//! collapse into one. The primitives here are deliberately cheap and
//! deterministic: character-bigram Dice coefficient, containment, and
//! keyword overlap — no model calls, no embeddings.
//!
//! The matching rule is a replaceable seam: [`SimilarityMatcher`] is a trait
//! and [`DiceMatcher`] the default implementation, with its threshold
//! exposed rather than hard-coded.

use std::collections::{BTreeSet, HashSet};
use std::fmt;

/// Character-bigram set of a string, whitespace excluded.
pub type BigramSet = HashSet<[char; 2]>;

/// Build the bigram set of a string.
///
/// Whitespace is dropped first so line wrapping and spacing differences do
/// not perturb the coefficient.
pub fn bigrams(text: &str) -> BigramSet {
    let chars: Vec<char> = text.chars().filter(|c| !c.is_whitespace()).collect();
    chars.windows(2).map(|w| [w[0], w[1]]).collect()
}

/// Sørensen–Dice coefficient of two bigram sets in `[0, 1]`.
///
/// Two empty sets compare as identical (single-character strings reduce to
/// empty sets; exact equality is checked before this ever matters).
pub fn dice_coefficient(a: &BigramSet, b: &BigramSet) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(b).count();
    (2.0 * shared as f64) / (a.len() + b.len()) as f64
}

/// Words too generic to anchor a match on.
const STOPWORDS: &[&str] = &[
    "this", "that", "with", "from", "when", "where", "which", "should", "would", "could", "there",
    "their", "have", "been", "being", "into", "because", "does", "code", "file", "line", "issue",
    "finding",
];

/// Extract anchor keywords: lowercase alphanumeric runs of length ≥ 4,
/// stopwords removed, first-occurrence order, deduplicated.
pub fn keywords(text: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for token in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 4)
        .filter(|t| !STOPWORDS.contains(t))
    {
        if seen.insert(token.to_string()) {
            out.push(token.to_string());
        }
    }
    out
}

/// A comparison-ready string: the normalized text plus its cached bigram
/// set, computed once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedText {
    /// Normalized text content.
    pub text: String,
    /// Cached bigram set of `text`.
    pub bigrams: BigramSet,
}

impl NormalizedText {
    /// Wrap already-normalized text, computing the bigram cache.
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let bigrams = bigrams(&text);
        Self { text, bigrams }
    }

    /// Whether there is any usable content.
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

impl fmt::Display for NormalizedText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}

/// The "similar" decision between two normalized strings.
pub trait SimilarityMatcher: Send + Sync + fmt::Debug {
    /// Decide whether two normalized strings describe the same thing.
    fn is_similar(&self, a: &NormalizedText, b: &NormalizedText) -> bool;
}

/// Default matcher: exact equality, containment of a string of length ≥
/// `containment_min_len`, or Dice coefficient ≥ `threshold`.
#[derive(Debug, Clone)]
pub struct DiceMatcher {
    /// Minimum Dice coefficient that counts as similar.
    pub threshold: f64,
    /// Minimum length of the contained string for containment to count.
    pub containment_min_len: usize,
}

impl Default for DiceMatcher {
    fn default() -> Self {
        Self {
            threshold: 0.80,
            containment_min_len: 8,
        }
    }
}

impl SimilarityMatcher for DiceMatcher {
    fn is_similar(&self, a: &NormalizedText, b: &NormalizedText) -> bool {
        if a.text == b.text {
            return !a.text.is_empty();
        }

        let (shorter, longer) = if a.text.chars().count() <= b.text.chars().count() {
            (a, b)
        } else {
            (b, a)
        };
        if shorter.text.chars().count() >= self.containment_min_len
            && longer.text.contains(&shorter.text)
        {
            return true;
        }

        // Strings too short to produce bigrams only match by equality above.
        if a.bigrams.is_empty() || b.bigrams.is_empty() {
            return false;
        }
        dice_coefficient(&a.bigrams, &b.bigrams) >= self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================
    // Bigram / Dice tests
    // =========================================

    #[test]
    fn test_bigrams_ignores_whitespace() {
        assert_eq!(bigrams("ab cd"), bigrams("abcd"));
        assert_eq!(bigrams("a b\u{3000}c d"), bigrams("abcd"));
    }

    #[test]
    fn test_bigrams_short_strings() {
        assert!(bigrams("").is_empty());
        assert!(bigrams("a").is_empty());
        assert_eq!(bigrams("ab").len(), 1);
    }

    #[test]
    fn test_dice_identical_strings() {
        let a = bigrams("sql injection in userdao");
        assert!((dice_coefficient(&a, &a) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_dice_disjoint_strings() {
        let a = bigrams("abcdef");
        let b = bigrams("uvwxyz");
        assert_eq!(dice_coefficient(&a, &b), 0.0);
    }

    #[test]
    fn test_dice_close_wording_scores_high() {
        let a = bigrams("sql injection vulnerability in user query");
        let b = bigrams("sql injection vulnerability in the user query");
        assert!(dice_coefficient(&a, &b) >= 0.80);
    }

    #[test]
    fn test_dice_empty_sets() {
        let empty = BigramSet::new();
        let full = bigrams("abc");
        assert_eq!(dice_coefficient(&empty, &empty), 1.0);
        assert_eq!(dice_coefficient(&empty, &full), 0.0);
    }

    // =========================================
    // Keyword tests
    // =========================================

    #[test]
    fn test_keywords_filters_short_and_stopwords() {
        let kws = keywords("This is the SQL injection in UserDao query");
        assert!(kws.contains(&"injection".to_string()));
        assert!(kws.contains(&"userdao".to_string()));
        assert!(kws.contains(&"query".to_string()));
        assert!(!kws.contains(&"this".to_string()));
        assert!(!kws.contains(&"sql".to_string())); // length 3
    }

    #[test]
    fn test_keywords_deduplicates_preserving_order() {
        let kws = keywords("token leak token leak parser");
        assert_eq!(kws, vec!["token", "leak", "parser"]);
    }

    // =========================================
    // Matcher tests
    // =========================================

    fn nt(s: &str) -> NormalizedText {
        NormalizedText::new(s)
    }

    #[test]
    fn test_matcher_exact_equality() {
        let m = DiceMatcher::default();
        assert!(m.is_similar(&nt("userdao.java:42"), &nt("userdao.java:42")));
    }

    #[test]
    fn test_matcher_empty_strings_never_similar() {
        let m = DiceMatcher::default();
        assert!(!m.is_similar(&nt(""), &nt("")));
    }

    #[test]
    fn test_matcher_distinct_single_chars_not_similar() {
        let m = DiceMatcher::default();
        assert!(!m.is_similar(&nt("a"), &nt("b")));
    }

    #[test]
    fn test_matcher_containment_requires_min_len() {
        let m = DiceMatcher::default();
        // Contained string of length >= 8 counts.
        assert!(m.is_similar(&nt("userdao.java"), &nt("sql injection in userdao.java line 42")));
        // Short contained strings do not.
        assert!(!m.is_similar(&nt("dao"), &nt("sql injection in userdao.java")));
    }

    #[test]
    fn test_matcher_dice_threshold() {
        let m = DiceMatcher::default();
        assert!(m.is_similar(
            &nt("sql injection vulnerability in user query"),
            &nt("sql injection vulnerability in the user query"),
        ));
        assert!(!m.is_similar(&nt("memory leak in cache"), &nt("sql injection in userdao")));
    }

    #[test]
    fn test_matcher_threshold_is_configurable() {
        let strict = DiceMatcher {
            threshold: 0.99,
            containment_min_len: 8,
        };
        let a = nt("sql injection vulnerability in user query");
        let b = nt("sql injection vulnerability in the user query");
        assert!(!strict.is_similar(&a, &b));

        let lax = DiceMatcher {
            threshold: 0.30,
            containment_min_len: 8,
        };
        assert!(lax.is_similar(&a, &b));
    }
}
