//! Finding extraction and normalization.
//!
//! Raw review content is free-form markdown. This module splits it into
//! [`FindingBlock`]s at numbered section headers, pulls title / priority /
//! summary / location out of the fixed-label rows inside each block, and
//! normalizes everything into a [`NormalizedFinding`] ready for duplicate
//! comparison.
//!
//! Normalization is case-folding, markup stripping, and whitespace collapse.
//! Whitespace handling is CJK-aware: the ideographic space (U+3000) collapses
//! like any other whitespace.

use crate::merge::similarity::{NormalizedText, keywords};
use regex::Regex;
use std::sync::OnceLock;

/// One extracted issue: the section title and everything under it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindingBlock {
    /// Raw section title (header text, markup intact).
    pub title: String,
    /// Raw section body.
    pub body: String,
}

/// Numbered section header: optional `#` markers, a section number, a title.
/// Matches `## 1. Title`, `3) Title`, `**2. Title**`.
fn header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s{0,3}(?:#{1,6}\s+)?(?:\*\*)?(\d{1,3})[.)]\s+(.*?)\s*$").unwrap()
    })
}

/// Fixed-label list row: `- **Priority**: High`, `Location: a.rs:10`.
/// The fullwidth colon keeps CJK-formatted tables parseable.
fn label_row_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^\s*(?:[-*+]\s+)?(?:\*\*)?(title|priority|severity|summary|description|location|file)(?:\*\*)?\s*[:：]\s*(.+?)\s*$",
        )
        .unwrap()
    })
}

/// Fixed-label table row: `| Priority | High |`.
fn label_table_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^\s*\|\s*(?:\*\*)?(title|priority|severity|summary|description|location|file)(?:\*\*)?\s*\|\s*(.+?)\s*\|?\s*$",
        )
        .unwrap()
    })
}

/// Split content into finding blocks at numbered section headers.
///
/// Text before the first header is preamble and dropped. Content with no
/// numbered headers yields no blocks — the caller falls back to
/// [`NormalizedFinding::fallback`].
pub fn split_blocks(content: &str) -> Vec<FindingBlock> {
    let mut blocks: Vec<FindingBlock> = Vec::new();
    let mut current: Option<FindingBlock> = None;

    for line in content.lines() {
        if let Some(caps) = header_re().captures(line) {
            if let Some(block) = current.take() {
                blocks.push(block);
            }
            let title = caps
                .get(2)
                .map(|m| m.as_str().trim_end_matches("**").trim().to_string())
                .unwrap_or_default();
            current = Some(FindingBlock {
                title,
                body: String::new(),
            });
        } else if let Some(ref mut block) = current {
            block.body.push_str(line);
            block.body.push('\n');
        }
    }
    if let Some(mut block) = current {
        block.body = block.body.trim_end().to_string();
        blocks.push(block);
    }
    for block in &mut blocks {
        block.body = block.body.trim().to_string();
    }
    blocks
}

/// Case-fold, strip markdown markup, collapse whitespace.
pub fn normalize_text(raw: &str) -> String {
    let stripped: String = raw
        .to_lowercase()
        .chars()
        .filter(|c| !matches!(c, '*' | '`' | '#' | '[' | ']'))
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Fold a priority label onto its canonical token.
///
/// Synonyms collapse ("blocker" and "P0" are both "critical"); an unknown
/// label survives as its own normalized token so two agents using the same
/// custom scale still compare equal.
pub fn canonical_priority(raw: &str) -> Option<String> {
    let normalized = normalize_text(raw);
    if normalized.is_empty() {
        return None;
    }
    let token = normalized.split_whitespace().next().unwrap_or_default();
    let canonical = match token {
        "critical" | "blocker" | "urgent" | "p0" => "critical",
        "high" | "major" | "severe" | "p1" => "high",
        "medium" | "moderate" | "p2" => "medium",
        "low" | "minor" | "trivial" | "p3" | "p4" => "low",
        "info" | "informational" | "note" | "nit" => "info",
        other => other,
    };
    Some(canonical.to_string())
}

/// Labels recognized in the fixed-label table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Label {
    Title,
    Priority,
    Summary,
    Location,
}

fn classify_label(raw: &str) -> Label {
    match raw.to_lowercase().as_str() {
        "title" => Label::Title,
        "priority" | "severity" => Label::Priority,
        "location" | "file" => Label::Location,
        _ => Label::Summary,
    }
}

/// Extracted label values, first occurrence of each label wins.
#[derive(Debug, Default, Clone)]
struct LabelTable {
    title: Option<String>,
    priority: Option<String>,
    summary: Option<String>,
    location: Option<String>,
}

fn extract_labels(body: &str) -> LabelTable {
    let mut table = LabelTable::default();
    for line in body.lines() {
        let caps = label_row_re()
            .captures(line)
            .or_else(|| label_table_re().captures(line));
        let Some(caps) = caps else { continue };
        let value = caps.get(2).map(|m| m.as_str().to_string());
        let slot = match classify_label(caps.get(1).map(|m| m.as_str()).unwrap_or_default()) {
            Label::Title => &mut table.title,
            Label::Priority => &mut table.priority,
            Label::Summary => &mut table.summary,
            Label::Location => &mut table.location,
        };
        if slot.is_none() {
            *slot = value;
        }
    }
    table
}

/// A comparison-ready finding with every derived field cached.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedFinding {
    /// Normalized title.
    pub title: NormalizedText,
    /// Canonical priority token, absent when the block states none.
    pub priority: Option<String>,
    /// Normalized summary (label value, or the whole body when unlabeled).
    pub summary: NormalizedText,
    /// Normalized location, absent when the block anchors nowhere usable.
    pub location: Option<NormalizedText>,
    /// Anchor keywords from title + summary, first-occurrence order.
    pub keywords: Vec<String>,
    /// True when derived from unparseable content; fallback findings only
    /// merge on exact normalized-text equality.
    pub fallback: bool,
}

impl NormalizedFinding {
    /// Derive from a parsed finding block.
    pub fn from_block(block: &FindingBlock) -> Self {
        let labels = extract_labels(&block.body);

        let title_source = labels.title.as_deref().unwrap_or(&block.title);
        let title = NormalizedText::new(normalize_text(title_source));

        let summary_source = labels.summary.as_deref().unwrap_or(&block.body);
        let summary = NormalizedText::new(normalize_text(summary_source));

        let location = labels
            .location
            .as_deref()
            .map(normalize_text)
            .filter(|loc| !loc.is_empty())
            .map(NormalizedText::new);

        let priority = labels.priority.as_deref().and_then(canonical_priority);

        let mut keyword_source = title.text.clone();
        keyword_source.push(' ');
        keyword_source.push_str(&summary.text);

        Self {
            keywords: keywords(&keyword_source),
            title,
            priority,
            summary,
            location,
            fallback: false,
        }
    }

    /// Treat unparseable content as a single opaque finding.
    ///
    /// No fuzzy matching applies: generic prose merges only on exact
    /// normalized equality, held in `summary`.
    pub fn fallback(content: &str) -> Self {
        let first_line = content
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or_default();
        let normalized = normalize_text(content);
        Self {
            title: NormalizedText::new(normalize_text(first_line)),
            priority: None,
            summary: NormalizedText::new(normalized),
            location: None,
            keywords: Vec::new(),
            fallback: true,
        }
    }

    /// Whether this finding has a usable location anchor.
    pub fn has_location(&self) -> bool {
        self.location.is_some()
    }

    /// First anchor keyword, used as the keyword-index key.
    pub fn first_keyword(&self) -> Option<&str> {
        self.keywords.first().map(String::as_str)
    }

    /// Whether any keyword is shared with another finding.
    pub fn shares_keyword(&self, other: &Self) -> bool {
        self.keywords.iter().any(|k| other.keywords.contains(k))
    }

    /// Whether two priorities contradict: both stated and different.
    pub fn priority_contradicts(&self, other: &Self) -> bool {
        match (&self.priority, &other.priority) {
            (Some(a), Some(b)) => a != b,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================
    // Block splitting tests
    // =========================================

    #[test]
    fn test_split_blocks_markdown_headers() {
        let content = "\
Preamble the reviewer wrote.

## 1. SQL Injection in UserDao

- **Priority**: High
- **Location**: UserDao.java:42

Detail paragraph.

## 2. Missing input validation

- **Priority**: Medium
";
        let blocks = split_blocks(content);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].title, "SQL Injection in UserDao");
        assert!(blocks[0].body.contains("UserDao.java:42"));
        assert!(blocks[0].body.contains("Detail paragraph."));
        assert_eq!(blocks[1].title, "Missing input validation");
    }

    #[test]
    fn test_split_blocks_plain_numbering() {
        let content = "1. First issue\nbody a\n2) Second issue\nbody b";
        let blocks = split_blocks(content);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].title, "First issue");
        assert_eq!(blocks[0].body, "body a");
        assert_eq!(blocks[1].title, "Second issue");
    }

    #[test]
    fn test_split_blocks_bold_numbering() {
        let blocks = split_blocks("**1. Hardcoded secret**\nkey in config");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].title, "Hardcoded secret");
    }

    #[test]
    fn test_split_blocks_none_without_numbers() {
        assert!(split_blocks("The code looks fine overall.").is_empty());
        assert!(split_blocks("").is_empty());
    }

    // =========================================
    // Normalization tests
    // =========================================

    #[test]
    fn test_normalize_text_folds_case_and_markup() {
        assert_eq!(
            normalize_text("**SQL Injection** in `UserDao`"),
            "sql injection in userdao"
        );
    }

    #[test]
    fn test_normalize_text_collapses_cjk_whitespace() {
        assert_eq!(normalize_text("SQL\u{3000}注入   攻撃"), "sql注入 攻撃");
    }

    #[test]
    fn test_canonical_priority_synonyms() {
        assert_eq!(canonical_priority("High").as_deref(), Some("high"));
        assert_eq!(canonical_priority("**Major**").as_deref(), Some("high"));
        assert_eq!(canonical_priority("P0").as_deref(), Some("critical"));
        assert_eq!(canonical_priority("blocker").as_deref(), Some("critical"));
        assert_eq!(canonical_priority("minor").as_deref(), Some("low"));
        assert_eq!(canonical_priority("note").as_deref(), Some("info"));
        assert_eq!(canonical_priority("").is_none(), true);
        assert_eq!(canonical_priority("bespoke").as_deref(), Some("bespoke"));
    }

    // =========================================
    // Label extraction tests
    // =========================================

    #[test]
    fn test_from_block_extracts_labels() {
        let block = FindingBlock {
            title: "SQL Injection in UserDao".into(),
            body: "\
- **Priority**: High
- **Summary**: User input is concatenated into a SQL query.
- **Location**: src/dao/UserDao.java:42
"
            .into(),
        };
        let finding = NormalizedFinding::from_block(&block);
        assert_eq!(finding.title.text, "sql injection in userdao");
        assert_eq!(finding.priority.as_deref(), Some("high"));
        assert_eq!(
            finding.summary.text,
            "user input is concatenated into a sql query."
        );
        assert_eq!(
            finding.location.as_ref().map(|l| l.text.as_str()),
            Some("src/dao/userdao.java:42")
        );
        assert!(finding.keywords.contains(&"injection".to_string()));
        assert!(!finding.fallback);
    }

    #[test]
    fn test_from_block_table_style_labels() {
        let block = FindingBlock {
            title: "Leak".into(),
            body: "| Severity | Critical |\n| File | cache.rs:7 |\n| Description | grows unbounded |".into(),
        };
        let finding = NormalizedFinding::from_block(&block);
        assert_eq!(finding.priority.as_deref(), Some("critical"));
        assert_eq!(
            finding.location.as_ref().map(|l| l.text.as_str()),
            Some("cache.rs:7")
        );
        assert_eq!(finding.summary.text, "grows unbounded");
    }

    #[test]
    fn test_from_block_title_label_overrides_header() {
        let block = FindingBlock {
            title: "Issue".into(),
            body: "Title: Hardcoded credentials\nPriority: high".into(),
        };
        let finding = NormalizedFinding::from_block(&block);
        assert_eq!(finding.title.text, "hardcoded credentials");
    }

    #[test]
    fn test_from_block_fullwidth_colon() {
        let block = FindingBlock {
            title: "注入".into(),
            body: "Priority：High\nLocation：UserDao.java:42".into(),
        };
        let finding = NormalizedFinding::from_block(&block);
        assert_eq!(finding.priority.as_deref(), Some("high"));
        assert!(finding.has_location());
    }

    #[test]
    fn test_from_block_missing_labels_fall_back_to_body() {
        let block = FindingBlock {
            title: "Race condition".into(),
            body: "Two tasks mutate the cache without a lock.".into(),
        };
        let finding = NormalizedFinding::from_block(&block);
        assert!(finding.priority.is_none());
        assert!(!finding.has_location());
        assert_eq!(
            finding.summary.text,
            "two tasks mutate the cache without a lock."
        );
    }

    #[test]
    fn test_from_block_first_label_occurrence_wins() {
        let block = FindingBlock {
            title: "t".into(),
            body: "Priority: High\nPriority: Low".into(),
        };
        let finding = NormalizedFinding::from_block(&block);
        assert_eq!(finding.priority.as_deref(), Some("high"));
    }

    // =========================================
    // Fallback tests
    // =========================================

    #[test]
    fn test_fallback_finding() {
        let finding = NormalizedFinding::fallback("The code looks fine.\nNothing to report.");
        assert!(finding.fallback);
        assert!(finding.priority.is_none());
        assert!(!finding.has_location());
        assert_eq!(finding.title.text, "the code looks fine.");
        assert_eq!(finding.summary.text, "the code looks fine. nothing to report.");
    }

    // =========================================
    // Comparison helper tests
    // =========================================

    #[test]
    fn test_priority_contradicts() {
        let high = NormalizedFinding::from_block(&FindingBlock {
            title: "t".into(),
            body: "Priority: high".into(),
        });
        let low = NormalizedFinding::from_block(&FindingBlock {
            title: "t".into(),
            body: "Priority: low".into(),
        });
        let none = NormalizedFinding::from_block(&FindingBlock {
            title: "t".into(),
            body: "no labels".into(),
        });

        assert!(high.priority_contradicts(&low));
        assert!(!high.priority_contradicts(&high.clone()));
        assert!(!high.priority_contradicts(&none));
        assert!(!none.priority_contradicts(&none.clone()));
    }

    #[test]
    fn test_shares_keyword() {
        let a = NormalizedFinding::from_block(&FindingBlock {
            title: "SQL injection".into(),
            body: "Summary: tainted query built by concatenation".into(),
        });
        let b = NormalizedFinding::from_block(&FindingBlock {
            title: "Injection risk".into(),
            body: "Summary: unrelated wording entirely".into(),
        });
        assert!(a.shares_keyword(&b));
    }
}
