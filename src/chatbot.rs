//! Generation orchestrator.
//!
//! `ChatBot` ties the memory store, prompt builder, job client and output
//! parser together as a small state machine: `Idle` until a message arrives,
//! `Generating` while a Horde job is in flight. Input arriving mid-flight
//! requests cancellation of the active job and queues a continuation; the
//! continuation is consumed when the job's cancellation (or natural
//! completion) is acknowledged, restarting generation against the refreshed
//! memory inside the same task. At most one job is ever active.

use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use crate::config::ChatBotConfig;
use crate::error::Error;
use crate::events::ChatEvents;
use crate::horde::{HordeClient, JobApi, POLL_INTERVAL};
use crate::memory::{MemoryEntry, MemoryStore};
use crate::parser::{PLACEHOLDER_REPLY, parse_replies};
use crate::prompt::build_prompt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Generating,
}

struct BotState {
    memory: MemoryStore,
    phase: Phase,
    /// Cancellation of the active job has been requested but not yet
    /// acknowledged. Meaningful only while `Generating`.
    cancelling: bool,
    /// Input arrived mid-generation; restart once the active job settles.
    /// Meaningful only while `Generating`.
    continuation_requested: bool,
    /// Token for the active job. Created per job, never re-armed.
    cancel: Option<CancellationToken>,
    /// Bumped by `clear_memory` so a force-idled generation task can detect
    /// it is stale and exit without firing callbacks.
    epoch: u64,
}

struct Inner {
    config: ChatBotConfig,
    api: Arc<dyn JobApi>,
    events: Arc<dyn ChatEvents>,
    state: Mutex<BotState>,
}

/// One conversation, one bot, at most one in-flight generation job.
pub struct ChatBot {
    inner: Arc<Inner>,
}

/// How one submit-poll-fetch cycle ended.
enum Cycle {
    /// The job finished; raw generated text of the first candidate.
    Completed(String),
    /// The cancellation token fired and the remote cancel was issued.
    Cancelled,
    /// Submission failed, the job faulted, or the Horde marked it impossible.
    Failed,
}

impl ChatBot {
    /// Create a bot backed by a real [`HordeClient`] built from the config.
    pub fn new(config: ChatBotConfig, events: Arc<dyn ChatEvents>) -> Result<Self, Error> {
        let client = HordeClient::new(config.base_url.clone(), config.api_key.clone())?
            .with_models(config.allowed_models.clone());
        Ok(Self::with_api(config, Arc::new(client), events))
    }

    /// Create a bot against any [`JobApi`] implementation.
    pub fn with_api(
        config: ChatBotConfig,
        api: Arc<dyn JobApi>,
        events: Arc<dyn ChatEvents>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                api,
                events,
                state: Mutex::new(BotState {
                    memory: MemoryStore::new(),
                    phase: Phase::Idle,
                    cancelling: false,
                    continuation_requested: false,
                    cancel: None,
                    epoch: 0,
                }),
            }),
        }
    }

    /// Record an inbound message and decide what to do with the active job.
    ///
    /// The append and the cancel/continue/queue decision are synchronous; the
    /// generation itself runs on a spawned task, so this is safe to call
    /// while a job is in flight. Generation failures never propagate here.
    ///
    /// With `mention_only` configured, generation is triggered only when
    /// `force` is true; unforced messages are still remembered.
    ///
    /// Must be called within a Tokio runtime.
    pub fn push_message(&self, speaker: &str, text: &str, timestamp: i64, force: bool) {
        let inner = &self.inner;
        let start = {
            let mut state = inner.state.lock().expect("state lock poisoned");
            state.memory.append(speaker, text, timestamp);

            if inner.config.mention_only && !force {
                None
            } else {
                match state.phase {
                    Phase::Idle => {
                        let token = CancellationToken::new();
                        state.phase = Phase::Generating;
                        state.cancelling = false;
                        state.continuation_requested = false;
                        state.cancel = Some(token.clone());
                        // Fired under the lock so a racing stop/start pair
                        // can never be observed out of order.
                        inner.events.on_start_generating();
                        Some((token, state.epoch))
                    }
                    Phase::Generating => {
                        state.continuation_requested = true;
                        if !state.cancelling {
                            state.cancelling = true;
                            if let Some(token) = &state.cancel {
                                token.cancel();
                            }
                        }
                        None
                    }
                }
            }
        };

        if let Some((token, epoch)) = start {
            let inner = Arc::clone(inner);
            tokio::spawn(run_generation(inner, token, epoch));
        }
    }

    /// Forget the conversation. If a job is in flight its cancellation is
    /// requested and the bot returns to `Idle` immediately; the stale task
    /// exits without firing callbacks. Idempotent.
    pub fn clear_memory(&self) {
        let mut state = self.inner.state.lock().expect("state lock poisoned");
        state.memory.clear();
        state.continuation_requested = false;
        if state.phase == Phase::Generating {
            if let Some(token) = state.cancel.take() {
                token.cancel();
            }
            state.cancelling = false;
            state.phase = Phase::Idle;
            state.epoch += 1;
            self.inner.events.on_stop_generating();
        }
    }

    /// Render the prompt the next job would be submitted with. Diagnostic;
    /// runs eviction first, like a real submission.
    pub fn create_prompt(&self) -> String {
        let mut state = self.inner.state.lock().expect("state lock poisoned");
        evict_and_render(&self.inner.config, &mut state.memory)
    }

    /// Whether a generation job is currently in flight.
    pub fn is_generating(&self) -> bool {
        let state = self.inner.state.lock().expect("state lock poisoned");
        state.phase == Phase::Generating
    }

    /// Replace the memory contents, e.g. with history recovered from the
    /// platform at connect time.
    pub fn seed_memory(&self, entries: Vec<MemoryEntry>) {
        let mut state = self.inner.state.lock().expect("state lock poisoned");
        state.memory.clear();
        for entry in entries {
            state.memory.append(entry.speaker, entry.text, entry.timestamp);
        }
    }

    /// Snapshot of the current memory contents.
    pub fn memory_snapshot(&self) -> Vec<MemoryEntry> {
        let state = self.inner.state.lock().expect("state lock poisoned");
        state.memory.entries().to_vec()
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn evict_and_render(config: &ChatBotConfig, memory: &mut MemoryStore) -> String {
    memory.evict(
        now_millis(),
        config.memory_time_limit,
        config.memory_space_limit,
    );
    build_prompt(
        &config.name,
        config.persona.as_deref(),
        config.hello.as_deref(),
        memory.entries(),
    )
}

/// Consume a pending continuation, arming a fresh token for the next job;
/// otherwise settle back to `Idle`.
fn consume_continuation(state: &mut BotState) -> Option<CancellationToken> {
    if state.continuation_requested {
        state.continuation_requested = false;
        state.cancelling = false;
        let token = CancellationToken::new();
        state.cancel = Some(token.clone());
        Some(token)
    } else {
        state.phase = Phase::Idle;
        state.cancel = None;
        None
    }
}

/// The generation task: an explicit loop, one iteration per job, re-entered
/// on coalesced continuations so restarts never recurse.
async fn run_generation(inner: Arc<Inner>, mut token: CancellationToken, epoch: u64) {
    loop {
        let prompt = {
            let mut state = inner.state.lock().expect("state lock poisoned");
            if state.epoch != epoch {
                return;
            }
            evict_and_render(&inner.config, &mut state.memory)
        };

        let outcome = run_cycle(inner.api.as_ref(), &token, &prompt).await;

        match outcome {
            Cycle::Completed(raw) => {
                let replies = parse_replies(&inner.config.name, &raw);
                let next = {
                    let mut state = inner.state.lock().expect("state lock poisoned");
                    if state.epoch != epoch {
                        return;
                    }
                    let now = now_millis();
                    for reply in &replies {
                        state.memory.append(inner.config.name.clone(), reply.clone(), now);
                    }
                    let next = consume_continuation(&mut state);
                    inner.events.on_generated_messages(&replies);
                    if next.is_none() {
                        inner.events.on_stop_generating();
                    }
                    next
                };
                match next {
                    Some(next_token) => token = next_token,
                    None => return,
                }
            }
            Cycle::Cancelled => {
                // Cancellation acknowledged. A pending continuation is what
                // the cancel was requested for: restart against the
                // refreshed memory. Without one, degrade like a failure.
                let next = {
                    let mut state = inner.state.lock().expect("state lock poisoned");
                    if state.epoch != epoch {
                        return;
                    }
                    if state.continuation_requested {
                        consume_continuation(&mut state)
                    } else {
                        state.phase = Phase::Idle;
                        state.cancelling = false;
                        state.cancel = None;
                        state
                            .memory
                            .append(inner.config.name.clone(), PLACEHOLDER_REPLY, now_millis());
                        inner
                            .events
                            .on_generated_messages(&[PLACEHOLDER_REPLY.to_string()]);
                        inner.events.on_stop_generating();
                        None
                    }
                };
                match next {
                    Some(next_token) => token = next_token,
                    None => return,
                }
            }
            Cycle::Failed => {
                // A faulted job is never resubmitted, even with a
                // continuation pending.
                let mut state = inner.state.lock().expect("state lock poisoned");
                if state.epoch != epoch {
                    return;
                }
                state.phase = Phase::Idle;
                state.cancelling = false;
                state.continuation_requested = false;
                state.cancel = None;
                state
                    .memory
                    .append(inner.config.name.clone(), PLACEHOLDER_REPLY, now_millis());
                inner
                    .events
                    .on_generated_messages(&[PLACEHOLDER_REPLY.to_string()]);
                inner.events.on_stop_generating();
                return;
            }
        }
    }
}

/// Submit one job and see it through: poll at the fixed cadence, watching the
/// cancellation token only while sleeping between status calls. Once `done`
/// has been read the fetched result is honored even if a cancel raced in —
/// finished work is never discarded.
async fn run_cycle(api: &dyn JobApi, token: &CancellationToken, prompt: &str) -> Cycle {
    let job_id = match api.create_job(prompt).await {
        Ok(id) => id,
        Err(e) => {
            tracing::error!(error = %e, "Job submission failed");
            return Cycle::Failed;
        }
    };

    if token.is_cancelled() {
        best_effort_cancel(api, &job_id).await;
        return Cycle::Cancelled;
    }

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                best_effort_cancel(api, &job_id).await;
                return Cycle::Cancelled;
            }
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
        }

        let check = match api.check_job(&job_id).await {
            Ok(check) => check,
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Status check failed");
                return Cycle::Failed;
            }
        };

        if check.faulted || !check.is_possible {
            tracing::error!(
                job_id = %job_id,
                faulted = check.faulted,
                is_possible = check.is_possible,
                "Generation failed"
            );
            return Cycle::Failed;
        }

        if check.done {
            return match api.get_job(&job_id).await {
                Ok(status) => {
                    let text = status
                        .generations
                        .first()
                        .map(|g| g.text.clone())
                        .unwrap_or_default();
                    Cycle::Completed(text)
                }
                Err(e) => {
                    tracing::error!(job_id = %job_id, error = %e, "Result fetch failed");
                    Cycle::Failed
                }
            };
        }
    }
}

/// Remote cancel is best-effort: it only guarantees our polling stops.
async fn best_effort_cancel(api: &dyn JobApi, job_id: &str) {
    if let Err(e) = api.cancel_job(job_id).await {
        tracing::warn!(job_id = %job_id, error = %e, "Remote cancel failed");
    }
}
