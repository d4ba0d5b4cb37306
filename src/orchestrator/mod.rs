//! Bounded-concurrency batch dispatcher over agents × passes.
//!
//! The orchestrator turns a set of agent specs into one [`ReviewResult`] per
//! (agent, pass) — reusing successful checkpoints, bounding in-flight remote
//! calls with a semaphore sized to the concurrency limit, and resolving
//! deadline expiry as failed results rather than lost tasks — then hands the
//! full set to the [`ResultMerger`].
//!
//! Failure is data here: a failed pass is `success=false` in its result, and
//! nothing a single agent does can abort the batch.

use crate::agent::{AgentExecutor, AgentSpec, ReviewResult};
use crate::checkpoint::CheckpointStore;
use crate::completion::CompletionClient;
use crate::errors::OrchestratorError;
use crate::merge::{MergeConfig, ResultMerger};
use crate::resilience::{BreakerSet, OperationClass, ResilienceConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Events emitted during batch execution.
///
/// The channel is optional and best-effort: a slow or dropped consumer never
/// stalls dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchEvent {
    /// A pass was started.
    PassStarted { agent: String, pass: u32 },
    /// A pass reached a terminal state.
    PassCompleted {
        agent: String,
        pass: u32,
        success: bool,
    },
    /// A pass was satisfied by a stored checkpoint; no task was spawned.
    CheckpointReused { agent: String, pass: u32 },
    /// The whole batch completed.
    BatchCompleted { summary: BatchSummary },
}

/// Summary of one batch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Unique id of this run.
    pub run_id: Uuid,
    /// Target reviewed.
    pub target_id: String,
    /// Number of agents in the batch.
    pub agents: usize,
    /// Passes per agent.
    pub passes: u32,
    /// Pairs dispatched as tasks (not satisfied by checkpoints).
    pub scheduled: usize,
    /// Pairs satisfied by stored checkpoints.
    pub reused: usize,
    /// Pairs that ended `success=true`.
    pub succeeded: usize,
    /// Pairs that ended `success=false`.
    pub failed: usize,
    /// Whether the batch deadline expired before every task finished.
    pub deadline_expired: bool,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

impl BatchSummary {
    /// Whether every pair ended successfully.
    pub fn all_success(&self) -> bool {
        self.failed == 0
    }
}

/// Everything the orchestrator needs for one run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Target under review.
    pub target_id: String,
    /// Independent review passes per agent (≥ 1).
    pub passes: u32,
    /// Maximum concurrently in-flight remote calls (≥ 1).
    pub concurrency: usize,
    /// Wall-clock budget for the whole batch.
    pub deadline: Duration,
    /// Opaque access token, forwarded to the completion client verbatim.
    pub access_token: String,
    /// Directory holding per-pass checkpoints.
    pub checkpoint_dir: PathBuf,
}

impl RunConfig {
    /// Create a run configuration with defaults: one pass, concurrency 4,
    /// a 30-minute deadline.
    pub fn new(target_id: impl Into<String>, checkpoint_dir: impl Into<PathBuf>) -> Self {
        Self {
            target_id: target_id.into(),
            passes: 1,
            concurrency: 4,
            deadline: Duration::from_secs(30 * 60),
            access_token: String::new(),
            checkpoint_dir: checkpoint_dir.into(),
        }
    }

    /// Set the pass count.
    pub fn with_passes(mut self, passes: u32) -> Self {
        self.passes = passes;
        self
    }

    /// Set the concurrency limit.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set the batch deadline.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Attach the opaque access token.
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = token.into();
        self
    }
}

/// Result of one batch run.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    /// One consolidated result per agent, input order.
    pub merged: Vec<ReviewResult>,
    /// One raw result per (agent, pass), agent input order then pass order.
    pub raw: Vec<ReviewResult>,
    /// Run summary.
    pub summary: BatchSummary,
}

/// The batch orchestrator.
pub struct Orchestrator {
    config: RunConfig,
    resilience: ResilienceConfig,
    merge_config: MergeConfig,
    client: Arc<dyn CompletionClient>,
    breakers: Arc<BreakerSet>,
    event_tx: Option<mpsc::Sender<BatchEvent>>,
}

impl Orchestrator {
    /// Create an orchestrator with default resilience and merge settings.
    pub fn new(config: RunConfig, client: Arc<dyn CompletionClient>) -> Self {
        let resilience = ResilienceConfig::default();
        let breakers = Arc::new(BreakerSet::new(&resilience));
        Self {
            config,
            resilience,
            merge_config: MergeConfig::default(),
            client,
            breakers,
            event_tx: None,
        }
    }

    /// Replace the resilience configuration (rebuilds the default breakers).
    pub fn with_resilience(mut self, resilience: ResilienceConfig) -> Self {
        self.breakers = Arc::new(BreakerSet::new(&resilience));
        self.resilience = resilience;
        self
    }

    /// Inject an explicit breaker set (e.g. one sharing a manual clock).
    pub fn with_breakers(mut self, breakers: Arc<BreakerSet>) -> Self {
        self.breakers = breakers;
        self
    }

    /// Replace the merge configuration.
    pub fn with_merge_config(mut self, merge_config: MergeConfig) -> Self {
        self.merge_config = merge_config;
        self
    }

    /// Set the event channel for progress updates.
    pub fn with_event_channel(mut self, tx: mpsc::Sender<BatchEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Run the full batch: dispatch, checkpoint, barrier, merge.
    pub async fn run(&self, agents: &[AgentSpec]) -> Result<BatchOutcome, OrchestratorError> {
        if agents.is_empty() {
            return Err(OrchestratorError::NoAgents {
                target_id: self.config.target_id.clone(),
            });
        }
        if self.config.passes < 1 {
            return Err(OrchestratorError::InvalidPassCount {
                passes: self.config.passes,
            });
        }
        if self.config.concurrency < 1 {
            return Err(OrchestratorError::InvalidConcurrency {
                concurrency: self.config.concurrency,
            });
        }

        let start = Instant::now();
        let run_id = Uuid::new_v4();
        let target_id = self.config.target_id.clone();
        let store = CheckpointStore::new(&self.config.checkpoint_dir);

        // Crash-recovery path: successful checkpoints satisfy their pair.
        let mut results: HashMap<(String, u32), ReviewResult> = HashMap::new();
        let reusable = store.reusable_for_target(&target_id)?;
        for agent in agents {
            for pass in 1..=self.config.passes {
                if let Some(result) = reusable.get(&(agent.id.clone(), pass)) {
                    results.insert((agent.id.clone(), pass), result.clone());
                    self.emit(BatchEvent::CheckpointReused {
                        agent: agent.id.clone(),
                        pass,
                    });
                }
            }
        }
        let reused = results.len();
        if reused > 0 {
            info!(%target_id, reused, "resuming from checkpoints");
        }

        // Everything not satisfied by a checkpoint becomes one task.
        let pending: Vec<(AgentSpec, u32)> = agents
            .iter()
            .flat_map(|agent| (1..=self.config.passes).map(move |pass| (agent.clone(), pass)))
            .filter(|(agent, pass)| !results.contains_key(&(agent.id.clone(), *pass)))
            .collect();
        let scheduled = pending.len();

        info!(
            %target_id,
            run = %run_id,
            agents = agents.len(),
            passes = self.config.passes,
            scheduled,
            concurrency = self.config.concurrency,
            "dispatching review batch"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let (tx, mut rx) = mpsc::channel::<ReviewResult>(scheduled.max(1));
        let executor = AgentExecutor::new(
            self.client.clone(),
            self.breakers.for_class(OperationClass::Review),
            self.resilience.clone(),
        )
        .with_access_token(&self.config.access_token);

        let mut handles: HashMap<(String, u32), JoinHandle<()>> = HashMap::new();
        for (spec, pass) in pending {
            let semaphore = semaphore.clone();
            let tx = tx.clone();
            let executor = executor.clone();
            let store = store.clone();
            let target_id = target_id.clone();
            let event_tx = self.event_tx.clone();
            let key = (spec.id.clone(), pass);

            let handle = tokio::spawn(async move {
                // The admission gate: at most `concurrency` tasks get past
                // this point at once.
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return,
                };

                if let Some(ref tx) = event_tx {
                    tx.try_send(BatchEvent::PassStarted {
                        agent: spec.id.clone(),
                        pass,
                    })
                    .ok();
                }

                let result = executor.execute_pass(&spec, &target_id, pass).await;

                // Terminal outcome, success or failure, is checkpointed
                // before the result is reported.
                if let Err(err) = store.write(&result) {
                    warn!(agent = %spec.id, pass, "checkpoint write failed: {err}");
                }

                tx.send(result).await.ok();
            });
            handles.insert(key, handle);
        }
        drop(tx);

        // Full barrier with a deadline: collect until every task reported
        // or the clock runs out.
        let deadline_at = tokio::time::Instant::now() + self.config.deadline;
        let mut deadline_expired = false;
        loop {
            match tokio::time::timeout_at(deadline_at, rx.recv()).await {
                Ok(Some(result)) => {
                    let key = (result.agent_id.clone(), result.pass);
                    handles.remove(&key);
                    self.emit(BatchEvent::PassCompleted {
                        agent: result.agent_id.clone(),
                        pass: result.pass,
                        success: result.success,
                    });
                    results.insert(key, result);
                }
                Ok(None) => break,
                Err(_) => {
                    deadline_expired = true;
                    break;
                }
            }
        }

        if deadline_expired {
            warn!(%target_id, in_flight = handles.len(), "batch deadline expired, cancelling tasks");
            // Results that raced into the channel still count.
            while let Ok(result) = rx.try_recv() {
                let key = (result.agent_id.clone(), result.pass);
                handles.remove(&key);
                results.insert(key, result);
            }
            // Anything still running is cancelled cooperatively and
            // resolved as a failed pass — it never vanishes.
            let mut aborted = Vec::with_capacity(handles.len());
            for ((agent_id, pass), handle) in handles.drain() {
                handle.abort();
                aborted.push(handle);
                let error = format!(
                    "deadline exceeded after {}s",
                    self.config.deadline.as_secs()
                );
                results.insert(
                    (agent_id.clone(), pass),
                    ReviewResult::failure(agent_id, &target_id, pass, error),
                );
            }
            // Wait for the cancelled tasks to wind down before reporting.
            futures::future::join_all(aborted).await;
        }

        // Assemble the raw results in deterministic (agent order, pass) order.
        let mut raw = Vec::with_capacity(agents.len() * self.config.passes as usize);
        for agent in agents {
            for pass in 1..=self.config.passes {
                let result = results.remove(&(agent.id.clone(), pass)).unwrap_or_else(|| {
                    // A task that died without reporting (e.g. panicked).
                    ReviewResult::failure(&agent.id, &target_id, pass, "review task aborted")
                });
                raw.push(result);
            }
        }

        let succeeded = raw.iter().filter(|r| r.success).count();
        let summary = BatchSummary {
            run_id,
            target_id: target_id.clone(),
            agents: agents.len(),
            passes: self.config.passes,
            scheduled,
            reused,
            succeeded,
            failed: raw.len() - succeeded,
            deadline_expired,
            duration_ms: start.elapsed().as_millis() as u64,
        };

        debug!(
            run = %run_id,
            succeeded,
            failed = summary.failed,
            "batch barrier reached, merging"
        );

        // Merge only after every pair is terminal — no incremental merging.
        let merger = ResultMerger::new(self.merge_config.clone());
        let merged = merger.merge_batch(agents, &raw, &target_id);

        self.emit(BatchEvent::BatchCompleted {
            summary: summary.clone(),
        });

        Ok(BatchOutcome {
            merged,
            raw,
            summary,
        })
    }

    /// Emit an event if a channel is configured. Best-effort: a full or
    /// closed channel drops the event rather than stalling dispatch.
    fn emit(&self, event: BatchEvent) {
        if let Some(ref tx) = self.event_tx {
            tx.try_send(event).ok();
        }
    }
}
