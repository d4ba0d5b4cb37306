//! Concurrent multi-agent code review orchestration with finding
//! consolidation.
//!
//! Many independent LLM review agents run against one code target, each
//! possibly several times, under a bounded concurrency budget. Every
//! (agent, pass) outcome is checkpointed for crash-safe resume, remote calls
//! are wrapped in timeout + retry + circuit breaker, and each agent's raw
//! natural-language findings are deduplicated across passes into one
//! consolidated report.
//!
//! The CLI, agent-definition loading, report templating, and the completion
//! wire protocol live outside this crate; the completion service is reached
//! through the [`completion::CompletionClient`] trait.

pub mod agent;
pub mod checkpoint;
pub mod completion;
pub mod errors;
pub mod merge;
pub mod orchestrator;
pub mod resilience;
pub mod telemetry;

pub use agent::{AgentSpec, ReviewResult};
pub use orchestrator::{BatchOutcome, Orchestrator, RunConfig};
