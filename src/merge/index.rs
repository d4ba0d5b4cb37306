//! In-memory multi-index for near-duplicate finding lookup.
//!
//! Instead of comparing every new finding against every aggregated one,
//! three auxiliary indices narrow the candidate set first:
//!
//! - by priority (contradicting priorities can never merge)
//! - by priority + title prefix
//! - by first anchor keyword
//!
//! Only the candidates surviving that narrowing get the full duplicate
//! comparison. Fallback findings (unparseable content) bypass the fuzzy
//! machinery entirely and merge on exact normalized-text equality only.

use crate::merge::MergeConfig;
use crate::merge::normalize::NormalizedFinding;
use crate::merge::similarity::SimilarityMatcher;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

/// One consolidated finding with the set of passes that reported it.
///
/// The display title and body come from the first occurrence; later
/// duplicates only grow the pass set.
#[derive(Debug, Clone)]
pub struct AggregatedFinding {
    /// Canonical (first-seen) display title.
    pub title: String,
    /// Canonical (first-seen) display body.
    pub body: String,
    /// Passes that reported this finding. Only ever grows.
    pub passes: BTreeSet<u32>,
    /// The representative normalized form used for comparison.
    pub normalized: NormalizedFinding,
}

impl AggregatedFinding {
    /// Human-readable pass annotation: `pass 1` or `passes 1, 3`.
    pub fn passes_label(&self) -> String {
        let list: Vec<String> = self.passes.iter().map(u32::to_string).collect();
        if list.len() == 1 {
            format!("pass {}", list[0])
        } else {
            format!("passes {}", list.join(", "))
        }
    }
}

impl fmt::Display for AggregatedFinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.title, self.passes_label())
    }
}

/// Outcome of folding one finding into the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FoldOutcome {
    /// Matched an existing finding at this entry index.
    Merged(usize),
    /// Inserted as a new finding at this entry index.
    Inserted(usize),
}

impl FoldOutcome {
    /// Check whether the finding merged into an existing entry.
    pub fn is_merged(&self) -> bool {
        matches!(self, Self::Merged(_))
    }
}

fn priority_key(priority: Option<&String>) -> String {
    priority.cloned().unwrap_or_default()
}

fn title_prefix(title: &str, len: usize) -> String {
    title.chars().take(len).collect()
}

/// Multi-indexed accumulator of aggregated findings, first-seen order.
pub struct FindingIndex {
    matcher: Arc<dyn SimilarityMatcher>,
    title_prefix_len: usize,
    entries: Vec<AggregatedFinding>,
    by_priority: HashMap<String, Vec<usize>>,
    by_title_prefix: HashMap<String, Vec<usize>>,
    by_keyword: HashMap<String, Vec<usize>>,
    fallback_by_text: HashMap<String, usize>,
}

impl FindingIndex {
    /// Create an index with the default Dice matcher from the config.
    pub fn new(config: &MergeConfig) -> Self {
        Self::with_matcher(config, config.matcher())
    }

    /// Create an index with a custom similarity matcher.
    pub fn with_matcher(config: &MergeConfig, matcher: Arc<dyn SimilarityMatcher>) -> Self {
        Self {
            matcher,
            title_prefix_len: config.title_prefix_len,
            entries: Vec::new(),
            by_priority: HashMap::new(),
            by_title_prefix: HashMap::new(),
            by_keyword: HashMap::new(),
            fallback_by_text: HashMap::new(),
        }
    }

    /// Number of distinct findings so far.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index holds no findings.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The aggregated findings in first-seen order.
    pub fn findings(&self) -> &[AggregatedFinding] {
        &self.entries
    }

    /// Consume the index, yielding findings in first-seen order.
    pub fn into_findings(self) -> Vec<AggregatedFinding> {
        self.entries
    }

    /// Fold one finding from `pass` into the index.
    ///
    /// A duplicate of an existing entry grows that entry's pass set; a new
    /// finding is appended and indexed. `title` and `body` are the raw
    /// display forms kept for the first occurrence.
    pub fn fold(
        &mut self,
        title: impl Into<String>,
        body: impl Into<String>,
        finding: NormalizedFinding,
        pass: u32,
    ) -> FoldOutcome {
        if finding.fallback {
            return self.fold_fallback(title.into(), body.into(), finding, pass);
        }

        for idx in self.candidates(&finding) {
            if self.is_duplicate(&self.entries[idx].normalized, &finding) {
                self.entries[idx].passes.insert(pass);
                return FoldOutcome::Merged(idx);
            }
        }

        let idx = self.insert(title.into(), body.into(), finding, pass);
        FoldOutcome::Inserted(idx)
    }

    /// Exact-equality path for fallback findings.
    fn fold_fallback(
        &mut self,
        title: String,
        body: String,
        finding: NormalizedFinding,
        pass: u32,
    ) -> FoldOutcome {
        if let Some(&idx) = self.fallback_by_text.get(&finding.summary.text) {
            self.entries[idx].passes.insert(pass);
            return FoldOutcome::Merged(idx);
        }
        let key = finding.summary.text.clone();
        let idx = self.entries.len();
        self.entries.push(AggregatedFinding {
            title,
            body,
            passes: BTreeSet::from([pass]),
            normalized: finding,
        });
        self.fallback_by_text.insert(key, idx);
        FoldOutcome::Inserted(idx)
    }

    /// Candidate entry indices for duplicate comparison, ascending.
    fn candidates(&self, finding: &NormalizedFinding) -> BTreeSet<usize> {
        let mut out = BTreeSet::new();
        let own_key = priority_key(finding.priority.as_ref());

        // Priorities that do not contradict: same label, unlabeled, and —
        // for an unlabeled finding — every bucket.
        let prio_keys: Vec<String> = if own_key.is_empty() {
            self.by_priority.keys().cloned().collect()
        } else {
            vec![own_key.clone(), String::new()]
        };

        for key in &prio_keys {
            if let Some(bucket) = self.by_priority.get(key) {
                out.extend(bucket.iter().copied());
            }
        }

        let prefix = title_prefix(&finding.title.text, self.title_prefix_len);
        for key in &prio_keys {
            if let Some(bucket) = self.by_title_prefix.get(&format!("{key}|{prefix}")) {
                out.extend(bucket.iter().copied());
            }
        }

        for keyword in &finding.keywords {
            if let Some(bucket) = self.by_keyword.get(keyword) {
                out.extend(bucket.iter().copied());
            }
        }

        out
    }

    /// The full duplicate decision between an aggregated entry and a new
    /// finding.
    ///
    /// Location-first: file/line agreement plus any secondary signal
    /// (summary, title, or shared keyword) wins even over divergent
    /// wording. Without any location anchor on either side the rule is
    /// stricter — summary AND title must both be similar. A finding with a
    /// location never merges with one without.
    fn is_duplicate(&self, existing: &NormalizedFinding, incoming: &NormalizedFinding) -> bool {
        if existing.fallback || incoming.fallback {
            return false;
        }
        if existing.priority_contradicts(incoming) {
            return false;
        }

        match (&existing.location, &incoming.location) {
            (Some(loc_a), Some(loc_b)) => {
                self.matcher.is_similar(loc_a, loc_b)
                    && (self.matcher.is_similar(&existing.summary, &incoming.summary)
                        || self.matcher.is_similar(&existing.title, &incoming.title)
                        || existing.shares_keyword(incoming))
            }
            (None, None) => {
                self.matcher.is_similar(&existing.summary, &incoming.summary)
                    && self.matcher.is_similar(&existing.title, &incoming.title)
            }
            _ => false,
        }
    }

    fn insert(
        &mut self,
        title: String,
        body: String,
        finding: NormalizedFinding,
        pass: u32,
    ) -> usize {
        let idx = self.entries.len();
        let own_key = priority_key(finding.priority.as_ref());

        self.by_priority.entry(own_key.clone()).or_default().push(idx);

        if !finding.title.text.is_empty() {
            let prefix = title_prefix(&finding.title.text, self.title_prefix_len);
            self.by_title_prefix
                .entry(format!("{own_key}|{prefix}"))
                .or_default()
                .push(idx);
        }

        if let Some(keyword) = finding.first_keyword() {
            self.by_keyword
                .entry(keyword.to_string())
                .or_default()
                .push(idx);
        }

        self.entries.push(AggregatedFinding {
            title,
            body,
            passes: BTreeSet::from([pass]),
            normalized: finding,
        });
        idx
    }
}

impl fmt::Debug for FindingIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FindingIndex")
            .field("entries", &self.entries.len())
            .field("priority_buckets", &self.by_priority.len())
            .field("prefix_buckets", &self.by_title_prefix.len())
            .field("keyword_buckets", &self.by_keyword.len())
            .finish()
    }
}
