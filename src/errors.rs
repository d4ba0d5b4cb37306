//! Typed error hierarchy for the review orchestrator.
//!
//! Three top-level enums cover the three subsystems:
//! - `CompletionError` — typed failures from the remote completion collaborator
//! - `CheckpointError` — checkpoint persistence and reload failures
//! - `OrchestratorError` — batch dispatch failures
//!
//! Per-pass review failures are *not* errors: they are recorded as
//! `success=false` on the pass result and never propagate past the
//! orchestrator boundary.

use thiserror::Error;

/// Failures returned by the remote completion collaborator.
///
/// The variants carry the transience signal the retry layer needs: a call
/// that timed out or was throttled is worth retrying, a rejected credential
/// is not. Classification itself lives in
/// [`crate::resilience::RetryPolicy`].
#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("completion call timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("rate limited by completion service: {0}")]
    RateLimited(String),

    #[error("connection reset: {0}")]
    ConnectionReset(String),

    #[error("completion service temporarily unavailable: {0}")]
    Unavailable(String),

    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("malformed completion request: {0}")]
    InvalidRequest(String),

    #[error("quota exhausted: {0}")]
    QuotaExhausted(String),

    /// Untyped remote failure. Transience is decided from the message
    /// signature by the retry policy.
    #[error("completion service error: {0}")]
    Remote(String),

    /// The circuit breaker for this operation class refused the call.
    /// No remote attempt was made.
    #[error("circuit breaker open for {class}")]
    BreakerOpen { class: &'static str },
}

/// Errors from the checkpoint store.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("failed to create checkpoint directory {path}: {source}")]
    CreateDirFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write checkpoint at {path}: {source}")]
    WriteFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to rename checkpoint into place at {path}: {source}")]
    RenameFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read checkpoint directory {path}: {source}")]
    ScanFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize checkpoint for {agent_id} pass {pass}: {source}")]
    SerializeFailed {
        agent_id: String,
        pass: u32,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors from the batch orchestrator.
///
/// These cover setup and plumbing only. A failing agent pass is data, not an
/// `OrchestratorError`.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("no agents configured for target {target_id}")]
    NoAgents { target_id: String },

    #[error("pass count must be at least 1, got {passes}")]
    InvalidPassCount { passes: u32 },

    #[error("concurrency limit must be at least 1, got {concurrency}")]
    InvalidConcurrency { concurrency: usize },

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_error_timeout_carries_duration() {
        let err = CompletionError::Timeout { timeout_ms: 30_000 };
        assert!(err.to_string().contains("30000"));
        match &err {
            CompletionError::Timeout { timeout_ms } => assert_eq!(*timeout_ms, 30_000),
            _ => panic!("expected Timeout variant"),
        }
    }

    #[test]
    fn completion_error_breaker_open_names_class() {
        let err = CompletionError::BreakerOpen { class: "review" };
        assert!(err.to_string().contains("review"));
    }

    #[test]
    fn checkpoint_error_write_failed_carries_path() {
        use std::path::PathBuf;
        let path = PathBuf::from("/checkpoints/t__a__pass1.json");
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = CheckpointError::WriteFailed {
            path: path.clone(),
            source: io_err,
        };
        match &err {
            CheckpointError::WriteFailed { path: p, source: s } => {
                assert_eq!(p, &path);
                assert_eq!(s.kind(), std::io::ErrorKind::PermissionDenied);
            }
            _ => panic!("expected WriteFailed"),
        }
    }

    #[test]
    fn orchestrator_error_invalid_pass_count_carries_value() {
        let err = OrchestratorError::InvalidPassCount { passes: 0 };
        assert!(err.to_string().contains('0'));
    }

    #[test]
    fn orchestrator_error_converts_from_checkpoint_error() {
        let inner = CheckpointError::ScanFailed {
            path: "/missing".into(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        };
        let err: OrchestratorError = inner.into();
        assert!(matches!(err, OrchestratorError::Checkpoint(_)));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&CompletionError::Auth("bad key".into()));
        assert_std_error(&CheckpointError::SerializeFailed {
            agent_id: "security".into(),
            pass: 1,
            source: serde_json::from_str::<serde_json::Value>("not json").unwrap_err(),
        });
        assert_std_error(&OrchestratorError::NoAgents {
            target_id: "repo".into(),
        });
    }
}
