//! Remote completion collaborator interface.
//!
//! The orchestrator never talks to a concrete LLM backend. It talks to
//! [`CompletionClient`], a narrow async trait the embedding application
//! implements over whatever transport it uses. Tests implement it directly —
//! no wire mocking required.
//!
//! The access token is forwarded verbatim on every request and never parsed
//! here; token acquisition belongs to the excluded configuration layer.

pub use crate::errors::CompletionError;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One completion request to the remote service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// System prompt (the agent's review persona and instructions).
    pub system_prompt: String,
    /// User prompt (the concrete review task for this pass).
    pub user_prompt: String,
    /// Model identifier, forwarded as-is.
    pub model: String,
    /// Opaque access token, forwarded as-is and never inspected.
    #[serde(skip_serializing)]
    pub access_token: String,
    /// Per-call timeout the transport should honor. The executor also
    /// enforces it locally, so a transport that ignores it is still bounded.
    #[serde(skip)]
    pub timeout: Duration,
}

impl CompletionRequest {
    /// Create a new completion request.
    pub fn new(
        system_prompt: impl Into<String>,
        user_prompt: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            user_prompt: user_prompt.into(),
            model: model.into(),
            access_token: String::new(),
            timeout: Duration::from_secs(120),
        }
    }

    /// Attach the opaque access token.
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = token.into();
        self
    }

    /// Set the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Successful completion response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// Raw natural-language content returned by the model.
    pub content: String,
}

impl CompletionResponse {
    /// Create a response from raw content.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

/// The remote completion collaborator.
///
/// Implementations are expected to be cheap to share (`Arc<dyn ...>`) and
/// safe to call from many tasks at once; the orchestrator bounds the number
/// of concurrent calls, not the client.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Run one completion. Failures must be mapped onto the
    /// [`CompletionError`] taxonomy so the retry layer can classify them.
    async fn complete(&self, request: CompletionRequest)
    -> Result<CompletionResponse, CompletionError>;
}
