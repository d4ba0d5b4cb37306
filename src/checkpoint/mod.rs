//! Durable per-pass checkpoints for crash-safe resume.
//!
//! Every (agent, pass) outcome is written as one JSON file as soon as the
//! pass reaches a terminal state. On startup the orchestrator scans the
//! directory and skips every pair whose stored result is `success=true`;
//! failed checkpoints are untrusted and re-executed.
//!
//! Writes are atomic: the document goes to a temp file in the same
//! directory and is renamed into place, so a crash mid-write never exposes a
//! partial checkpoint. File names are built from sanitized ids — every
//! non-alphanumeric byte becomes `_` — so a hostile target or agent id
//! cannot traverse out of the checkpoint directory.

use crate::agent::ReviewResult;
use crate::errors::CheckpointError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Durable record of one (agent, pass) outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Target the pass ran against (original, unsanitized id).
    pub target_id: String,
    /// Agent that produced the result (original, unsanitized id).
    pub agent_id: String,
    /// 1-based pass index.
    pub pass: u32,
    /// The stored pass result.
    pub result: ReviewResult,
    /// When the checkpoint was written.
    pub written_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Wrap a pass result for persistence.
    pub fn from_result(result: ReviewResult) -> Self {
        Self {
            target_id: result.target_id.clone(),
            agent_id: result.agent_id.clone(),
            pass: result.pass,
            written_at: Utc::now(),
            result,
        }
    }

    /// Whether this checkpoint may satisfy a pass on resume.
    ///
    /// Only successful results are trusted; anything else is retried.
    pub fn is_reusable(&self) -> bool {
        self.result.success
    }
}

/// Replace every non-alphanumeric byte with `_`.
///
/// Filesystem safety and path-traversal prevention in one move: the result
/// can only ever be a plain file-name component.
pub fn sanitize_id(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// File-backed checkpoint store, one JSON document per (target, agent, pass).
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Create a store rooted at `dir`. The directory is created lazily on
    /// the first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The directory this store writes into.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File name for one (target, agent, pass).
    fn file_name(target_id: &str, agent_id: &str, pass: u32) -> String {
        format!(
            "{}__{}__pass{}.json",
            sanitize_id(target_id),
            sanitize_id(agent_id),
            pass
        )
    }

    /// Full path for one (target, agent, pass).
    pub fn path_for(&self, target_id: &str, agent_id: &str, pass: u32) -> PathBuf {
        self.dir.join(Self::file_name(target_id, agent_id, pass))
    }

    /// Persist a pass result atomically. Returns the final path.
    pub fn write(&self, result: &ReviewResult) -> Result<PathBuf, CheckpointError> {
        fs::create_dir_all(&self.dir).map_err(|source| CheckpointError::CreateDirFailed {
            path: self.dir.clone(),
            source,
        })?;

        let checkpoint = Checkpoint::from_result(result.clone());
        let json = serde_json::to_string_pretty(&checkpoint).map_err(|source| {
            CheckpointError::SerializeFailed {
                agent_id: result.agent_id.clone(),
                pass: result.pass,
                source,
            }
        })?;

        let path = self.path_for(&result.target_id, &result.agent_id, result.pass);
        let tmp = path.with_extension("json.tmp");

        fs::write(&tmp, json).map_err(|source| CheckpointError::WriteFailed {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &path).map_err(|source| CheckpointError::RenameFailed {
            path: path.clone(),
            source,
        })?;

        debug!(
            agent = %result.agent_id,
            pass = result.pass,
            path = %path.display(),
            "checkpoint written"
        );
        Ok(path)
    }

    /// Load every checkpoint stored for a target.
    ///
    /// Unreadable or unparseable files are skipped with a warning — a
    /// corrupt checkpoint must not block a resume. A missing directory is an
    /// empty result, not an error.
    pub fn load_for_target(&self, target_id: &str) -> Result<Vec<Checkpoint>, CheckpointError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&self.dir).map_err(|source| CheckpointError::ScanFailed {
            path: self.dir.clone(),
            source,
        })?;

        let mut checkpoints = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = match fs::read_to_string(&path) {
                Ok(c) => c,
                Err(err) => {
                    warn!(path = %path.display(), "skipping unreadable checkpoint: {err}");
                    continue;
                }
            };
            let checkpoint: Checkpoint = match serde_json::from_str(&content) {
                Ok(cp) => cp,
                Err(err) => {
                    warn!(path = %path.display(), "skipping unparseable checkpoint: {err}");
                    continue;
                }
            };
            if checkpoint.target_id == target_id {
                checkpoints.push(checkpoint);
            }
        }

        checkpoints.sort_by(|a, b| (&a.agent_id, a.pass).cmp(&(&b.agent_id, b.pass)));
        Ok(checkpoints)
    }

    /// Load the reusable results for a target, keyed by (agent id, pass).
    pub fn reusable_for_target(
        &self,
        target_id: &str,
    ) -> Result<HashMap<(String, u32), ReviewResult>, CheckpointError> {
        let checkpoints = self.load_for_target(target_id)?;
        Ok(checkpoints
            .into_iter()
            .filter(Checkpoint::is_reusable)
            .map(|cp| ((cp.agent_id.clone(), cp.pass), cp.result))
            .collect())
    }
}
