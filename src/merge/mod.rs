//! Finding consolidation engine.
//!
//! Given all per-pass results for one agent, produce a single result listing
//! each distinct finding exactly once, annotated with the passes it occurred
//! in, in first-occurrence order.
//!
//! ## Components
//!
//! - [`similarity`]: pure text-similarity primitives (bigram Dice, keywords)
//! - [`normalize`]: block splitting and label extraction
//! - [`index`]: multi-indexed near-duplicate lookup
//! - [`ResultMerger`]: the per-agent fold, one consolidated result per agent
//!
//! ## Example
//!
//! ```
//! use tribunal::agent::ReviewResult;
//! use tribunal::merge::{MergeConfig, ResultMerger};
//!
//! let merger = ResultMerger::new(MergeConfig::default());
//! let passes = vec![
//!     ReviewResult::success("security", "repo", 1,
//!         "## 1. SQL Injection\n- **Priority**: High\n- **Summary**: tainted query\n- **Location**: UserDao.java:42"),
//!     ReviewResult::success("security", "repo", 2,
//!         "## 1. Injection flaw\n- **Priority**: High\n- **Summary**: tainted query built here\n- **Location**: UserDao.java:42"),
//! ];
//! let merged = merger.merge_agent(&passes).unwrap();
//! assert!(merged.success);
//! assert!(merged.content_or_empty().contains("passes 1, 2"));
//! ```

pub mod index;
pub mod normalize;
pub mod similarity;

pub use index::{AggregatedFinding, FindingIndex, FoldOutcome};
pub use normalize::{FindingBlock, NormalizedFinding, split_blocks};
pub use similarity::{DiceMatcher, NormalizedText, SimilarityMatcher};

use crate::agent::{AgentSpec, MERGED_PASS, ReviewResult};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Tuning knobs for the consolidation engine.
///
/// The similarity threshold and indexing parameters are configuration, not
/// constants: over- or under-merging is corrected here, or by swapping the
/// [`SimilarityMatcher`] entirely.
#[derive(Debug, Clone)]
pub struct MergeConfig {
    /// Minimum Dice coefficient for two strings to count as similar.
    pub dice_threshold: f64,
    /// Minimum contained-string length for containment similarity.
    pub containment_min_len: usize,
    /// Title prefix length used by the priority+prefix index.
    pub title_prefix_len: usize,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            dice_threshold: 0.80,
            containment_min_len: 8,
            title_prefix_len: 8,
        }
    }
}

impl MergeConfig {
    /// Set the Dice similarity threshold.
    pub fn with_dice_threshold(mut self, threshold: f64) -> Self {
        self.dice_threshold = threshold;
        self
    }

    /// Set the minimum contained-string length.
    pub fn with_containment_min_len(mut self, len: usize) -> Self {
        self.containment_min_len = len;
        self
    }

    /// Set the title prefix length for indexing.
    pub fn with_title_prefix_len(mut self, len: usize) -> Self {
        self.title_prefix_len = len;
        self
    }

    /// Build the default matcher for this configuration.
    pub fn matcher(&self) -> Arc<dyn SimilarityMatcher> {
        Arc::new(DiceMatcher {
            threshold: self.dice_threshold,
            containment_min_len: self.containment_min_len,
        })
    }
}

/// Folds raw per-pass results into one consolidated result per agent.
#[derive(Debug, Clone)]
pub struct ResultMerger {
    config: MergeConfig,
    matcher: Arc<dyn SimilarityMatcher>,
}

impl ResultMerger {
    /// Create a merger with the default Dice matcher.
    pub fn new(config: MergeConfig) -> Self {
        let matcher = config.matcher();
        Self { config, matcher }
    }

    /// Create a merger with a custom similarity matcher.
    pub fn with_matcher(config: MergeConfig, matcher: Arc<dyn SimilarityMatcher>) -> Self {
        Self { config, matcher }
    }

    /// Start an empty finding index using this merger's matcher.
    pub fn new_index(&self) -> FindingIndex {
        FindingIndex::with_matcher(&self.config, self.matcher.clone())
    }

    /// Fold one pass result into an index.
    ///
    /// Successful content is split into finding blocks; content with no
    /// parseable blocks becomes a single fallback finding. Failed passes
    /// contribute nothing here — the caller counts them for the trailer.
    pub fn fold_result(&self, index: &mut FindingIndex, result: &ReviewResult) {
        if !result.success {
            return;
        }
        let content = result.content_or_empty();
        let blocks = split_blocks(content);

        if blocks.is_empty() {
            let fallback = NormalizedFinding::fallback(content);
            if fallback.summary.is_empty() {
                return;
            }
            let title = content
                .lines()
                .map(str::trim)
                .find(|l| !l.is_empty())
                .unwrap_or_default()
                .to_string();
            index.fold(title, content.trim().to_string(), fallback, result.pass);
            return;
        }

        for block in blocks {
            let finding = NormalizedFinding::from_block(&block);
            index.fold(block.title, block.body, finding, result.pass);
        }
    }

    /// Merge all passes of one agent into a single consolidated result.
    ///
    /// Returns `None` for an empty slice. All results must belong to the
    /// same (agent, target); the first one names them.
    pub fn merge_agent(&self, results: &[ReviewResult]) -> Option<ReviewResult> {
        let first = results.first()?;
        let agent_id = first.agent_id.clone();
        let target_id = first.target_id.clone();

        let mut sorted: Vec<&ReviewResult> = results.iter().collect();
        sorted.sort_by_key(|r| r.pass);

        let total = sorted.len();
        let failed = sorted.iter().filter(|r| !r.success).count();

        if failed == total {
            // Fully failed agent: the report is the last failure's error.
            let last_error = sorted
                .iter()
                .rev()
                .find_map(|r| r.error.clone())
                .unwrap_or_else(|| "all passes failed".to_string());
            debug!(agent = %agent_id, total, "all passes failed, merged report is the failure");
            return Some(ReviewResult::failure(
                agent_id, target_id, MERGED_PASS, last_error,
            ));
        }

        let mut index = self.new_index();
        for result in &sorted {
            self.fold_result(&mut index, result);
        }

        let findings = index.into_findings();
        debug!(
            agent = %agent_id,
            passes = total,
            failed,
            distinct = findings.len(),
            "consolidated agent findings"
        );
        let content = render_report(&findings, failed, total);
        Some(ReviewResult::success(
            agent_id, target_id, MERGED_PASS, content,
        ))
    }

    /// Merge a whole batch: one consolidated result per agent, in the given
    /// agent order. Agents with no recorded passes yield a failed result
    /// rather than disappearing.
    pub fn merge_batch(
        &self,
        agents: &[AgentSpec],
        results: &[ReviewResult],
        target_id: &str,
    ) -> Vec<ReviewResult> {
        let mut by_agent: HashMap<&str, Vec<ReviewResult>> = HashMap::new();
        for result in results {
            by_agent
                .entry(result.agent_id.as_str())
                .or_default()
                .push(result.clone());
        }

        agents
            .iter()
            .map(|agent| {
                by_agent
                    .get(agent.id.as_str())
                    .and_then(|rs| self.merge_agent(rs))
                    .unwrap_or_else(|| {
                        ReviewResult::failure(
                            &agent.id,
                            target_id,
                            MERGED_PASS,
                            "no passes executed",
                        )
                    })
            })
            .collect()
    }
}

/// Render consolidated findings back into a numbered-section document.
fn render_report(findings: &[AggregatedFinding], failed: usize, total: usize) -> String {
    let mut out = String::new();

    if findings.is_empty() {
        out.push_str("No findings reported.\n");
    }
    for (i, finding) in findings.iter().enumerate() {
        out.push_str(&format!(
            "## {}. {} ({})\n",
            i + 1,
            finding.title,
            finding.passes_label()
        ));
        if !finding.body.is_empty() {
            out.push('\n');
            out.push_str(&finding.body);
            out.push('\n');
        }
        out.push('\n');
    }

    if failed > 0 {
        out.push_str(&format!("{failed} of {total} passes failed.\n"));
    }

    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn merger() -> ResultMerger {
        ResultMerger::new(MergeConfig::default())
    }

    fn pass(pass: u32, content: &str) -> ReviewResult {
        ReviewResult::success("security", "repo", pass, content)
    }

    fn failed_pass(pass: u32, error: &str) -> ReviewResult {
        ReviewResult::failure("security", "repo", pass, error)
    }

    const INJECTION_A: &str = "\
## 1. SQL Injection in UserDao
- **Priority**: High
- **Summary**: user input concatenated into a sql query
- **Location**: UserDao.java:42";

    const INJECTION_B: &str = "\
## 1. Injection flaw in the user DAO
- **Priority**: High
- **Summary**: user input is concatenated into the sql query
- **Location**: UserDao.java:42";

    // =========================================
    // merge_agent tests
    // =========================================

    #[test]
    fn test_merge_agent_empty_slice() {
        assert!(merger().merge_agent(&[]).is_none());
    }

    #[test]
    fn test_merge_agent_single_pass() {
        let merged = merger().merge_agent(&[pass(1, INJECTION_A)]).unwrap();
        assert!(merged.success);
        assert!(merged.is_merged());
        let content = merged.content_or_empty();
        assert!(content.contains("SQL Injection in UserDao"));
        assert!(content.contains("(pass 1)"));
        assert!(!content.contains("passes failed"));
    }

    #[test]
    fn test_merge_agent_deduplicates_across_passes() {
        let empty_third = pass(3, "Nothing new found in this pass.");
        let merged = merger()
            .merge_agent(&[pass(1, INJECTION_A), pass(2, INJECTION_B), empty_third])
            .unwrap();
        let content = merged.content_or_empty();

        // Exactly one numbered finding plus the fallback note from pass 3.
        assert!(content.contains("## 1. SQL Injection in UserDao (passes 1, 2)"));
        assert!(!content.contains("## 3."));
        assert!(!content.contains("passes failed"));
    }

    #[test]
    fn test_merge_agent_trailer_counts_failures() {
        let merged = merger()
            .merge_agent(&[
                pass(1, INJECTION_A),
                failed_pass(2, "completion call timed out after 1000ms"),
                failed_pass(3, "rate limited"),
            ])
            .unwrap();
        assert!(merged.success);
        assert!(merged.content_or_empty().contains("2 of 3 passes failed."));
    }

    #[test]
    fn test_merge_agent_all_failed_uses_last_error() {
        let merged = merger()
            .merge_agent(&[
                failed_pass(1, "first error"),
                failed_pass(3, "final error"),
                failed_pass(2, "middle error"),
            ])
            .unwrap();
        assert!(!merged.success);
        assert_eq!(merged.error.as_deref(), Some("final error"));
        assert!(merged.content.is_none());
    }

    #[test]
    fn test_merge_agent_unparseable_content_fallback() {
        let merged = merger()
            .merge_agent(&[
                pass(1, "The code looks fine."),
                pass(2, "The   code looks fine."),
                pass(3, "A different overall remark."),
            ])
            .unwrap();
        let content = merged.content_or_empty();
        assert!(content.contains("## 1. The code looks fine. (passes 1, 2)"));
        assert!(content.contains("## 2. A different overall remark. (pass 3)"));
    }

    #[test]
    fn test_merge_agent_no_findings_at_all() {
        let merged = merger().merge_agent(&[pass(1, ""), pass(2, "")]).unwrap();
        assert!(merged.success);
        assert!(merged.content_or_empty().contains("No findings reported."));
    }

    #[test]
    fn test_merge_agent_first_occurrence_order() {
        let p1 = "## 1. Alpha issue\n- **Summary**: alpha body text\n- **Location**: a.rs:1\n\n## 2. Beta issue\n- **Summary**: beta body text\n- **Location**: b.rs:2";
        let p2 = "## 1. Gamma issue\n- **Summary**: gamma body text\n- **Location**: c.rs:3";
        let merged = merger().merge_agent(&[pass(1, p1), pass(2, p2)]).unwrap();
        let content = merged.content_or_empty();

        let alpha = content.find("Alpha issue").unwrap();
        let beta = content.find("Beta issue").unwrap();
        let gamma = content.find("Gamma issue").unwrap();
        assert!(alpha < beta && beta < gamma);
    }

    // =========================================
    // Associativity tests
    // =========================================

    #[test]
    fn test_merge_is_associative_over_passes() {
        let p3 = "## 1. SQL Injection in the DAO\n- **Priority**: High\n- **Summary**: user input concatenated into a sql query again\n- **Location**: UserDao.java:42";
        let m = merger();

        // All at once.
        let mut all_at_once = m.new_index();
        for r in [pass(1, INJECTION_A), pass(2, INJECTION_B), pass(3, p3)] {
            m.fold_result(&mut all_at_once, &r);
        }

        // [P1, P2] first, then P3 folded in.
        let mut incremental = m.new_index();
        for r in [pass(1, INJECTION_A), pass(2, INJECTION_B)] {
            m.fold_result(&mut incremental, &r);
        }
        m.fold_result(&mut incremental, &pass(3, p3));

        let a: Vec<_> = all_at_once
            .findings()
            .iter()
            .map(|f| (f.title.clone(), f.passes.clone()))
            .collect();
        let b: Vec<_> = incremental
            .findings()
            .iter()
            .map(|f| (f.title.clone(), f.passes.clone()))
            .collect();
        assert_eq!(a, b);
    }

    // =========================================
    // merge_batch tests
    // =========================================

    #[test]
    fn test_merge_batch_preserves_agent_order() {
        let agents = vec![
            AgentSpec::new("security", "m", "p"),
            AgentSpec::new("performance", "m", "p"),
        ];
        let results = vec![
            ReviewResult::success("performance", "repo", 1, "## 1. Slow loop\n- **Summary**: quadratic scan of items\n- **Location**: hot.rs:9"),
            ReviewResult::success("security", "repo", 1, INJECTION_A),
        ];
        let merged = merger().merge_batch(&agents, &results, "repo");

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].agent_id, "security");
        assert_eq!(merged[1].agent_id, "performance");
        assert!(merged.iter().all(ReviewResult::is_merged));
    }

    #[test]
    fn test_merge_batch_agent_without_results() {
        let agents = vec![AgentSpec::new("ghost", "m", "p")];
        let merged = merger().merge_batch(&agents, &[], "repo");
        assert_eq!(merged.len(), 1);
        assert!(!merged[0].success);
        assert_eq!(merged[0].error.as_deref(), Some("no passes executed"));
    }
}
