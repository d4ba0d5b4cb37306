//! Review agent definitions and per-pass results.
//!
//! ## Types
//!
//! - [`AgentSpec`]: one reviewer definition — owned by the (excluded) config
//!   loader, read-only here
//! - [`ReviewResult`]: the immutable outcome of one (agent, pass)
//!
//! ## Example
//!
//! ```
//! use tribunal::agent::{AgentSpec, ReviewResult};
//!
//! let spec = AgentSpec::new("security", "sonnet-4", "You are a security reviewer.")
//!     .with_display_name("Security Sentinel");
//!
//! let result = ReviewResult::success("security", "repo-a", 1, "## 1. Finding ...");
//! assert!(result.success);
//! assert_eq!(result.pass, 1);
//! ```

pub mod executor;

pub use executor::AgentExecutor;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One reviewer definition.
///
/// Loaded by the excluded configuration layer (agent markdown files); this
/// crate only reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSpec {
    /// Stable agent identifier, unique within a batch.
    pub id: String,
    /// Human-readable name for reports; defaults to the id.
    #[serde(default)]
    pub display_name: String,
    /// Model identifier, forwarded to the completion service as-is.
    pub model: String,
    /// System prompt defining the agent's review persona.
    pub prompt: String,
}

impl AgentSpec {
    /// Create a new agent spec.
    pub fn new(id: impl Into<String>, model: impl Into<String>, prompt: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            display_name: id.clone(),
            id,
            model: model.into(),
            prompt: prompt.into(),
        }
    }

    /// Set the display name used in reports.
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }
}

/// Outcome of one (agent, pass) — or, with `pass == MERGED_PASS`, the
/// consolidated report for an agent.
///
/// Created once and never mutated. Failure is a field, not an error type:
/// a failed pass has `success == false`, an error message, and no content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewResult {
    /// Agent that produced this result.
    pub agent_id: String,
    /// Target the review ran against.
    pub target_id: String,
    /// 1-based pass index; [`MERGED_PASS`] marks a consolidated result.
    pub pass: u32,
    /// Raw natural-language review content, present on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Whether the pass completed successfully.
    pub success: bool,
    /// Error message for failed passes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the result was created.
    pub timestamp: DateTime<Utc>,
    /// Wall-clock duration of the pass in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// Sentinel pass index for consolidated per-agent results.
pub const MERGED_PASS: u32 = 0;

impl ReviewResult {
    /// Create a successful pass result.
    pub fn success(
        agent_id: impl Into<String>,
        target_id: impl Into<String>,
        pass: u32,
        content: impl Into<String>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            target_id: target_id.into(),
            pass,
            content: Some(content.into()),
            success: true,
            error: None,
            timestamp: Utc::now(),
            duration_ms: None,
        }
    }

    /// Create a failed pass result.
    pub fn failure(
        agent_id: impl Into<String>,
        target_id: impl Into<String>,
        pass: u32,
        error: impl Into<String>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            target_id: target_id.into(),
            pass,
            content: None,
            success: false,
            error: Some(error.into()),
            timestamp: Utc::now(),
            duration_ms: None,
        }
    }

    /// Set the pass duration.
    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Check whether this is a consolidated (post-merge) result.
    pub fn is_merged(&self) -> bool {
        self.pass == MERGED_PASS
    }

    /// Content, empty string when absent.
    pub fn content_or_empty(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }
}

impl fmt::Display for ReviewResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.success { "ok" } else { "failed" };
        write!(
            f,
            "[{}] {} pass {} ({})",
            status, self.agent_id, self.pass, self.target_id
        )?;
        if let Some(ref error) = self.error {
            write!(f, ": {}", error)?;
        }
        Ok(())
    }
}
