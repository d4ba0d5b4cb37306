//! Runs one review pass against the completion collaborator, wrapped in
//! timeout + retry + circuit breaker.
//!
//! The executor owns the *retry* axis only. Passes are independent review
//! attempts scheduled by the orchestrator, each with its own checkpoint;
//! retries are invisible outside this module and never touch a checkpoint.

use crate::agent::{AgentSpec, ReviewResult};
use crate::completion::{CompletionClient, CompletionError, CompletionRequest};
use crate::resilience::{CircuitBreaker, ResilienceConfig, RetryPolicy};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Executes single review passes under the resilience policy.
///
/// Cheap to clone; one instance is shared by every task in a batch. The
/// breaker is injected explicitly — there is no global lookup.
#[derive(Clone)]
pub struct AgentExecutor {
    client: Arc<dyn CompletionClient>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
    config: ResilienceConfig,
    access_token: String,
}

impl AgentExecutor {
    /// Create an executor.
    pub fn new(
        client: Arc<dyn CompletionClient>,
        breaker: Arc<CircuitBreaker>,
        config: ResilienceConfig,
    ) -> Self {
        Self {
            client,
            breaker,
            retry: RetryPolicy::new(config.clone()),
            config,
            access_token: String::new(),
        }
    }

    /// Attach the opaque access token forwarded on every request.
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = token.into();
        self
    }

    /// Run one (agent, pass) to a terminal [`ReviewResult`].
    ///
    /// Never returns an error: a pass that cannot complete resolves as
    /// `success=false` with the final failure's message.
    pub async fn execute_pass(&self, spec: &AgentSpec, target_id: &str, pass: u32) -> ReviewResult {
        let start = Instant::now();
        let mut attempt: u32 = 1;

        loop {
            if !self.breaker.try_acquire().is_admitted() {
                let err = CompletionError::BreakerOpen {
                    class: self.breaker.class().as_str(),
                };
                warn!(
                    agent = %spec.id,
                    pass,
                    "fast-failing pass: {err}"
                );
                return ReviewResult::failure(&spec.id, target_id, pass, err.to_string())
                    .with_duration_ms(start.elapsed().as_millis() as u64);
            }

            let request = self.build_request(spec, target_id, pass);
            let timeout_ms = self.config.call_timeout.as_millis() as u64;

            let outcome = match tokio::time::timeout(
                self.config.call_timeout,
                self.client.complete(request),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(CompletionError::Timeout { timeout_ms }),
            };

            match outcome {
                Ok(response) => {
                    self.breaker.record_success();
                    debug!(agent = %spec.id, pass, attempt, "pass completed");
                    return ReviewResult::success(&spec.id, target_id, pass, response.content)
                        .with_duration_ms(start.elapsed().as_millis() as u64);
                }
                Err(err) => {
                    self.breaker.record_failure();
                    let transient = self.retry.classify(&err).is_transient();

                    if transient && attempt < self.retry.max_attempts() {
                        let delay = self.retry.backoff_delay(attempt);
                        debug!(
                            agent = %spec.id,
                            pass,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            "transient failure, backing off: {err}"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }

                    warn!(
                        agent = %spec.id,
                        pass,
                        attempt,
                        transient,
                        "pass failed: {err}"
                    );
                    return ReviewResult::failure(&spec.id, target_id, pass, err.to_string())
                        .with_duration_ms(start.elapsed().as_millis() as u64);
                }
            }
        }
    }

    /// Build the completion request for one pass.
    fn build_request(&self, spec: &AgentSpec, target_id: &str, pass: u32) -> CompletionRequest {
        CompletionRequest::new(
            &spec.prompt,
            build_pass_prompt(spec, target_id, pass),
            &spec.model,
        )
        .with_access_token(&self.access_token)
        .with_timeout(self.config.call_timeout)
    }
}

/// Build the per-pass user prompt.
///
/// The output format instructions mirror what the consolidation parser
/// expects: numbered sections with a fixed label table.
fn build_pass_prompt(spec: &AgentSpec, target_id: &str, pass: u32) -> String {
    format!(
        r#"Review the target `{target_id}` as **{display_name}**.

This is independent review pass {pass}. Do not assume any earlier pass ran.

Report every issue you find as its own numbered section:

## 1. <short issue title>

- **Priority**: Critical | High | Medium | Low
- **Summary**: one or two sentences describing the issue
- **Location**: file and line, e.g. src/auth/UserDao.java:42

Followed by any detail you consider useful. If you find nothing, say so in
one sentence without a numbered section.
"#,
        target_id = target_id,
        display_name = spec.display_name,
        pass = pass,
    )
}
