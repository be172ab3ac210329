//! Conversation orchestrator that drives generation rounds.
//!
//! Each [`ConversationCoordinator::submit`] call appends user input and runs
//! generation rounds until the backend stops asking for code to be executed.
//! A newer submission pre-empts the active one: the old round is cancelled,
//! awaited, and given a grace period before the new round's first request.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::StreamExt;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::Backend;
use crate::config::ConversationConfig;
use crate::error::{ConversationError, Result};
use crate::pipeline::messages::Message;
use crate::reaction::{CodeRunner, Speaker};
use crate::runtime::ConversationEvent;
use crate::turn::{Turn, TurnParser};

/// Coarse conversation state, observable through [`ConversationCoordinator::subscribe_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConversationState {
    /// No round is running.
    #[default]
    Idle,
    /// A round is consuming the backend stream or running reactions.
    Generating,
    /// New input arrived; waiting for the superseded round to settle.
    AwaitingCancellation,
}

/// Handles for the round currently owned by a `submit` call.
struct ActiveRound {
    /// Identifies the owning submission.
    owner: u64,
    cancel: CancellationToken,
    /// Cancelled when the owning `submit` call returns or is dropped.
    done: CancellationToken,
}

/// Per-round bookkeeping.
struct RoundProgress {
    round: u32,
    turns: usize,
    needs_followup: bool,
}

/// Owns conversation history and runs generation rounds against a backend.
pub struct ConversationCoordinator {
    id: Uuid,
    config: ConversationConfig,
    backend: Arc<dyn Backend>,
    speaker: Arc<dyn Speaker>,
    runner: Arc<dyn CodeRunner>,
    /// Every snapshot read and append goes through this lock.
    history: tokio::sync::Mutex<Vec<Message>>,
    /// Serializes pre-emption so only one submission takes over at a time.
    takeover: tokio::sync::Mutex<()>,
    active: Mutex<Option<ActiveRound>>,
    next_owner: AtomicU64,
    state_tx: watch::Sender<ConversationState>,
    events_tx: broadcast::Sender<ConversationEvent>,
}

impl ConversationCoordinator {
    /// Create a coordinator. A configured system prompt becomes the first message.
    pub fn new(
        config: ConversationConfig,
        backend: Arc<dyn Backend>,
        speaker: Arc<dyn Speaker>,
        runner: Arc<dyn CodeRunner>,
    ) -> Self {
        let history = config
            .system_prompt
            .as_ref()
            .map(|prompt| vec![Message::system(prompt.clone())])
            .unwrap_or_default();
        let (state_tx, _) = watch::channel(ConversationState::Idle);
        let (events_tx, _) = broadcast::channel(config.event_capacity.max(1));
        let id = Uuid::new_v4();
        debug!(conversation = %id, backend = backend.name(), "conversation created");

        Self {
            id,
            config,
            backend,
            speaker,
            runner,
            history: tokio::sync::Mutex::new(history),
            takeover: tokio::sync::Mutex::new(()),
            active: Mutex::new(None),
            next_owner: AtomicU64::new(0),
            state_tx,
            events_tx,
        }
    }

    /// Unique id used in log fields.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Submit user input and run rounds until the conversation settles.
    ///
    /// With `format_as_user` the content is prefixed with the configured user
    /// speaker label (`"User: hello"`); otherwise it is stored verbatim.
    ///
    /// # Errors
    ///
    /// Returns [`ConversationError::Cancelled`] if newer input (or
    /// [`cancel_active`](Self::cancel_active)) superseded this call, and
    /// backend, speech, or unexpected runner failures as-is. Malformed backend
    /// output and execution failures are handled internally.
    pub async fn submit(&self, content: &str, format_as_user: bool) -> Result<()> {
        let (owner, cancel, _done) = self.take_over(content, format_as_user).await;

        self.state_tx.send_replace(ConversationState::Generating);
        self.emit(ConversationEvent::Generating { active: true });

        let result = self.run_rounds(&cancel).await;

        // A newer submission that took over owns the state from here on.
        {
            let active = self.active_slot();
            if active.as_ref().is_some_and(|a| a.owner == owner) {
                self.state_tx.send_replace(ConversationState::Idle);
            }
        }
        self.emit(ConversationEvent::Generating { active: false });

        match &result {
            Ok(()) => debug!(conversation = %self.id, "submission settled"),
            Err(e) if e.is_cancelled() => {
                info!(conversation = %self.id, "submission superseded");
            }
            Err(e) => warn!(conversation = %self.id, error = %e, "submission failed"),
        }
        result
    }

    /// Cancel the active round, if any. Safe to call repeatedly.
    pub fn cancel_active(&self) {
        if let Some(active) = self.active_slot().as_ref() {
            active.cancel.cancel();
        }
    }

    /// Snapshot of the full history.
    pub async fn history(&self) -> Vec<Message> {
        self.history.lock().await.clone()
    }

    /// Number of messages in history.
    pub async fn history_len(&self) -> usize {
        self.history.lock().await.len()
    }

    /// Current conversation state.
    pub fn state(&self) -> ConversationState {
        *self.state_tx.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ConversationState> {
        self.state_tx.subscribe()
    }

    /// Receive runtime events emitted from now on.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ConversationEvent> {
        self.events_tx.subscribe()
    }

    fn active_slot(&self) -> std::sync::MutexGuard<'_, Option<ActiveRound>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: ConversationEvent) {
        // No subscribers is not an error.
        let _ = self.events_tx.send(event);
    }

    async fn append(&self, message: Message) {
        self.history.lock().await.push(message);
    }

    /// Cancel and await any active round, then install a fresh one.
    ///
    /// The user message is appended before the takeover lock is released so
    /// concurrent submissions land in history in takeover order.
    async fn take_over(
        &self,
        content: &str,
        format_as_user: bool,
    ) -> (u64, CancellationToken, DropGuard) {
        let _takeover = self.takeover.lock().await;

        let previous = self.active_slot().take();
        if let Some(previous) = previous
            && !previous.done.is_cancelled()
        {
            self.state_tx
                .send_replace(ConversationState::AwaitingCancellation);
            info!(conversation = %self.id, "new input, cancelling active round");
            previous.cancel.cancel();
            previous.done.cancelled().await;
            tokio::time::sleep(self.config.grace_period()).await;
        }

        let message = if format_as_user {
            Message::user(format!("{}: {content}", self.config.user_speaker))
        } else {
            Message::user(content)
        };
        self.append(message).await;

        let owner = self.next_owner.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let done = CancellationToken::new();
        let guard = done.clone().drop_guard();
        *self.active_slot() = Some(ActiveRound {
            owner,
            cancel: cancel.clone(),
            done,
        });
        (owner, cancel, guard)
    }

    async fn run_rounds(&self, cancel: &CancellationToken) -> Result<()> {
        let mut round = 0;
        loop {
            round += 1;
            match self.run_round_with_retry(round, cancel).await {
                Ok(true) => {}
                Ok(false) => return Ok(()),
                Err(e) => {
                    if e.is_cancelled() {
                        info!(conversation = %self.id, round, "round cancelled");
                        self.emit(ConversationEvent::RoundCancelled { round });
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Run one round, re-running it while its output is malformed.
    ///
    /// Returns whether another round is required.
    async fn run_round_with_retry(&self, round: u32, cancel: &CancellationToken) -> Result<bool> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mark = self.history_len().await;

            let reason = match self.run_round(round, attempt, cancel).await {
                Err(ConversationError::MalformedInput(reason)) => reason,
                other => return other,
            };

            self.history.lock().await.truncate(mark);
            warn!(
                conversation = %self.id,
                round,
                attempt,
                reason = %reason,
                "malformed output, round discarded"
            );
            self.emit(ConversationEvent::RoundDiscarded {
                round,
                attempt,
                reason,
            });

            if let Some(max) = self.config.max_malformed_retries
                && attempt > max
            {
                warn!(conversation = %self.id, round, retries = max, "giving up on malformed round");
                return Ok(false);
            }

            let delay = self.config.malformed_retry_delay();
            if !delay.is_zero() {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(ConversationError::Cancelled),
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    async fn run_round(&self, round: u32, attempt: u32, cancel: &CancellationToken) -> Result<bool> {
        if cancel.is_cancelled() {
            return Err(ConversationError::Cancelled);
        }

        let snapshot = self.history().await;
        info!(
            conversation = %self.id,
            round,
            attempt,
            messages = snapshot.len(),
            "generation round started"
        );
        self.emit(ConversationEvent::RoundStarted { round, attempt });

        let mut stream = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ConversationError::Cancelled),
            stream = self.backend.generate(&snapshot, cancel.clone()) => stream?,
        };

        let mut parser = TurnParser::new();
        let mut progress = RoundProgress {
            round,
            turns: 0,
            needs_followup: false,
        };

        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(ConversationError::Cancelled),
                next = stream.next() => next,
            };
            let Some(fragment) = next else { break };
            for turn in parser.feed(&fragment?) {
                self.dispatch(turn, &mut progress, cancel).await?;
            }
        }

        if cancel.is_cancelled() {
            return Err(ConversationError::Cancelled);
        }
        for turn in parser.finish() {
            self.dispatch(turn?, &mut progress, cancel).await?;
        }

        info!(
            conversation = %self.id,
            round,
            turns = progress.turns,
            needs_followup = progress.needs_followup,
            "generation round finished"
        );
        self.emit(ConversationEvent::RoundFinished {
            round,
            turns: progress.turns,
            needs_followup: progress.needs_followup,
        });
        Ok(progress.needs_followup)
    }

    async fn dispatch(
        &self,
        turn: Turn,
        progress: &mut RoundProgress,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(ConversationError::Cancelled);
        }

        let round = progress.round;
        progress.turns += 1;
        debug!(conversation = %self.id, round, kind = ?turn.kind(), "dispatching turn");
        self.emit(ConversationEvent::TurnDispatched {
            round,
            kind: turn.kind(),
        });

        match turn {
            Turn::Dialogue(dialogue) => match self.speaker.speak(dialogue, cancel.clone()).await? {
                Some(spoken) => self.append(Message::assistant(spoken.to_string())).await,
                None => {
                    debug!(conversation = %self.id, round, "dialogue vetoed");
                    self.emit(ConversationEvent::DialogueVetoed { round });
                }
            },
            Turn::Code(code) => {
                self.append(Message::assistant(code.to_string())).await;
                progress.needs_followup = true;

                match self.runner.run_code(&code, cancel.clone()).await {
                    Ok(output) => {
                        self.append(Message::assistant(format!(
                            "{output}{}",
                            self.config.completion_marker
                        )))
                        .await;
                        self.emit(ConversationEvent::CodeExecuted {
                            round,
                            success: true,
                        });
                    }
                    Err(ConversationError::Execution(reason)) => {
                        warn!(conversation = %self.id, round, reason = %reason, "code execution failed");
                        self.append(Message::assistant(format!(
                            "{reason}{}",
                            self.config.fault_marker
                        )))
                        .await;
                        self.emit(ConversationEvent::CodeExecuted {
                            round,
                            success: false,
                        });
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(())
    }
}
