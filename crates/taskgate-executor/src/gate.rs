//! Interaction gate: one confirmation or question at a time per connection.

use std::sync::{Mutex, MutexGuard, PoisonError};

use taskgate_core::{EventSender, ServerEvent, now_millis};
use thiserror::Error;
use tokio::sync::oneshot;

/// Outcome of a confirmation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Yes,
    No,
    /// Approved, and every later confirmation on this connection is too.
    YesAll,
    /// The connection went away before an answer arrived.
    Disconnected,
}

impl Decision {
    /// Yes or YesAll.
    #[must_use]
    pub const fn is_approved(self) -> bool {
        matches!(self, Self::Yes | Self::YesAll)
    }
}

/// Yes/no button on a question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonChoice {
    Yes,
    No,
}

/// Outcome of a question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    Text(String),
    Button(ButtonChoice),
    Disconnected,
}

/// Value a pending interaction resolves to when its connection is lost.
pub trait Resolution: Sized {
    fn disconnected() -> Self;
}

impl Resolution for Decision {
    fn disconnected() -> Self {
        Self::Disconnected
    }
}

impl Resolution for Answer {
    fn disconnected() -> Self {
        Self::Disconnected
    }
}

/// What a pending interaction is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionKind {
    Confirmation,
    Question,
}

/// Gate error.
#[derive(Debug, Clone, Error)]
pub enum GateError {
    #[error("A {0:?} is already pending on this connection")]
    InteractionPending(InteractionKind),
    #[error("No interaction is pending")]
    NoPendingInteraction,
    #[error("Response does not match the pending {0:?}")]
    UnexpectedResponse(InteractionKind),
    #[error("Invalid answer: {0}")]
    InvalidAnswer(String),
}

enum Resolver {
    Confirmation(oneshot::Sender<Decision>),
    Question(oneshot::Sender<Answer>),
}

/// The single outstanding request on a connection.
///
/// Owns the one-shot sender that wakes the suspended caller; resolving
/// consumes the value, so it can only happen once.
pub struct PendingInteraction {
    id: u64,
    prompt: String,
    diff: Option<String>,
    allows_yes_no: bool,
    allows_free_text: bool,
    created_at: i64,
    resolver: Resolver,
}

impl PendingInteraction {
    fn confirmation(
        id: u64,
        message: String,
        diff: Option<String>,
    ) -> (Self, oneshot::Receiver<Decision>) {
        let (tx, rx) = oneshot::channel();
        let pending = Self {
            id,
            prompt: message,
            diff,
            allows_yes_no: true,
            allows_free_text: false,
            created_at: now_millis(),
            resolver: Resolver::Confirmation(tx),
        };
        (pending, rx)
    }

    fn question(
        id: u64,
        question: String,
        allows_yes_no: bool,
    ) -> (Self, oneshot::Receiver<Answer>) {
        let (tx, rx) = oneshot::channel();
        let pending = Self {
            id,
            prompt: question,
            diff: None,
            allows_yes_no,
            allows_free_text: true,
            created_at: now_millis(),
            resolver: Resolver::Question(tx),
        };
        (pending, rx)
    }

    /// Confirmation or Question.
    #[must_use]
    pub const fn kind(&self) -> InteractionKind {
        match self.resolver {
            Resolver::Confirmation(_) => InteractionKind::Confirmation,
            Resolver::Question(_) => InteractionKind::Question,
        }
    }

    /// Prompt text shown to the user.
    #[must_use]
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// Unix epoch milliseconds.
    #[must_use]
    pub const fn created_at(&self) -> i64 {
        self.created_at
    }

    fn request_event(&self) -> ServerEvent {
        match self.resolver {
            Resolver::Confirmation(_) => ServerEvent::ConfirmationRequest {
                message: self.prompt.clone(),
                diff: self.diff.clone(),
            },
            Resolver::Question(_) => ServerEvent::AskQuestionRequest {
                question: self.prompt.clone(),
                allows_yes_no: self.allows_yes_no,
            },
        }
    }

    fn disconnect(self) {
        // The waiter may already be gone; nothing left to wake then.
        match self.resolver {
            Resolver::Confirmation(tx) => {
                let _ = tx.send(Decision::Disconnected);
            }
            Resolver::Question(tx) => {
                let _ = tx.send(Answer::Disconnected);
            }
        }
    }
}

/// Either an immediate result or a reply still to come.
pub enum Outcome<T> {
    Resolved(T),
    Waiting(Reply<T>),
}

/// Receiving end of a pending interaction.
pub struct Reply<T> {
    id: u64,
    rx: oneshot::Receiver<T>,
}

impl<T> Reply<T> {
    /// Identifies the interaction for [`InteractionGate::abandon`].
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }
}

impl<T: Resolution> Reply<T> {
    /// Suspend until the interaction is resolved.
    ///
    /// A dropped resolver counts as a disconnect, so this never hangs once
    /// the gate has let go of the interaction.
    pub async fn wait(self) -> T {
        self.rx.await.unwrap_or_else(|_| T::disconnected())
    }
}

impl<T: Resolution> Outcome<T> {
    /// Resolve now or wait for the reply.
    pub async fn wait(self) -> T {
        match self {
            Self::Resolved(value) => value,
            Self::Waiting(reply) => reply.wait().await,
        }
    }
}

#[derive(Default)]
struct GateState {
    next_id: u64,
    confirm_all: bool,
    closed: bool,
    pending: Option<PendingInteraction>,
}

impl GateState {
    fn issue_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Mediates confirmation and question exchanges for one connection.
pub struct InteractionGate {
    events: EventSender,
    state: Mutex<GateState>,
}

impl InteractionGate {
    /// Gate that emits requests through `events`.
    #[must_use]
    pub fn new(events: EventSender) -> Self {
        Self {
            events,
            state: Mutex::new(GateState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ask the user to approve an operation.
    ///
    /// # Errors
    /// Returns error if another interaction is already pending.
    pub async fn request_confirmation(
        &self,
        message: impl Into<String>,
        diff: Option<String>,
    ) -> Result<Decision, GateError> {
        Ok(self.begin_confirmation(message, diff)?.wait().await)
    }

    /// Ask the user a question.
    ///
    /// # Errors
    /// Returns error if another interaction is already pending.
    pub async fn request_question(
        &self,
        question: impl Into<String>,
        allows_yes_no: bool,
    ) -> Result<Answer, GateError> {
        Ok(self.begin_question(question, allows_yes_no)?.wait().await)
    }

    /// Register and emit a confirmation request without waiting for it.
    ///
    /// Resolves immediately to `YesAll` once the user chose "yes to all",
    /// and to `Disconnected` after the connection closed.
    ///
    /// # Errors
    /// Returns error if another interaction is already pending.
    pub fn begin_confirmation(
        &self,
        message: impl Into<String>,
        diff: Option<String>,
    ) -> Result<Outcome<Decision>, GateError> {
        let mut state = self.state();
        if state.closed {
            return Ok(Outcome::Resolved(Decision::Disconnected));
        }
        if let Some(pending) = &state.pending {
            return Err(GateError::InteractionPending(pending.kind()));
        }
        if state.confirm_all {
            tracing::debug!("Confirmation auto-approved by yes-to-all");
            return Ok(Outcome::Resolved(Decision::YesAll));
        }

        let id = state.issue_id();
        let (pending, rx) = PendingInteraction::confirmation(id, message.into(), diff);
        Ok(self
            .emit(&mut state, pending)
            .map_or(Outcome::Resolved(Decision::Disconnected), |()| {
                Outcome::Waiting(Reply { id, rx })
            }))
    }

    /// Register and emit a question without waiting for it.
    ///
    /// # Errors
    /// Returns error if another interaction is already pending.
    pub fn begin_question(
        &self,
        question: impl Into<String>,
        allows_yes_no: bool,
    ) -> Result<Outcome<Answer>, GateError> {
        let mut state = self.state();
        if state.closed {
            return Ok(Outcome::Resolved(Answer::Disconnected));
        }
        if let Some(pending) = &state.pending {
            return Err(GateError::InteractionPending(pending.kind()));
        }

        let id = state.issue_id();
        let (pending, rx) = PendingInteraction::question(id, question.into(), allows_yes_no);
        Ok(self
            .emit(&mut state, pending)
            .map_or(Outcome::Resolved(Answer::Disconnected), |()| {
                Outcome::Waiting(Reply { id, rx })
            }))
    }

    // Emitting while the lock is held keeps the request ordered before any
    // response can be matched against it.
    fn emit(&self, state: &mut GateState, pending: PendingInteraction) -> Result<(), ()> {
        let event = pending.request_event();
        tracing::debug!(kind = ?pending.kind(), prompt = %pending.prompt(), "Interaction requested");
        if self.events.send(event).is_err() {
            state.closed = true;
            return Err(());
        }
        state.pending = Some(pending);
        Ok(())
    }

    /// Apply the client's answer to the pending confirmation.
    ///
    /// `YesAll` also turns on yes-to-all for the rest of the connection.
    ///
    /// # Errors
    /// Returns error if no confirmation is pending; the state is unchanged.
    pub fn resolve_confirmation(&self, decision: Decision) -> Result<(), GateError> {
        let mut state = self.state();
        let pending = take_pending(&mut state, InteractionKind::Confirmation)?;
        if decision == Decision::YesAll {
            state.confirm_all = true;
        }
        drop(state);

        if let Resolver::Confirmation(tx) = pending.resolver {
            let _ = tx.send(decision);
        }
        tracing::debug!(?decision, "Confirmation resolved");
        Ok(())
    }

    /// Apply the client's answer to the pending question.
    ///
    /// # Errors
    /// Returns error if no question is pending or the answer form is not
    /// allowed by it; the pending question stays in place.
    pub fn resolve_question(&self, answer: Answer) -> Result<(), GateError> {
        let mut state = self.state();
        match &state.pending {
            Some(pending) if pending.kind() == InteractionKind::Question => {
                if matches!(answer, Answer::Button(_)) && !pending.allows_yes_no {
                    return Err(GateError::InvalidAnswer(
                        "question does not offer yes/no buttons".into(),
                    ));
                }
                if matches!(answer, Answer::Text(_)) && !pending.allows_free_text {
                    return Err(GateError::InvalidAnswer(
                        "question does not accept free text".into(),
                    ));
                }
            }
            _ => {}
        }
        let pending = take_pending(&mut state, InteractionKind::Question)?;
        drop(state);

        if let Resolver::Question(tx) = pending.resolver {
            let _ = tx.send(answer);
        }
        tracing::debug!("Question resolved");
        Ok(())
    }

    /// Connection closed: wake any waiter with `Disconnected` and refuse
    /// to ask anything further.
    pub fn close(&self) {
        let pending = {
            let mut state = self.state();
            state.closed = true;
            state.pending.take()
        };
        if let Some(pending) = pending {
            tracing::debug!(kind = ?pending.kind(), "Pending interaction cancelled by disconnect");
            pending.disconnect();
        }
    }

    /// Drop whatever is pending, waking its waiter with `Disconnected`.
    ///
    /// Returns whether something was pending.
    pub fn release(&self) -> bool {
        let pending = self.state().pending.take();
        pending.map(PendingInteraction::disconnect).is_some()
    }

    /// Withdraw interaction `id` because its waiter gave up.
    ///
    /// Only that interaction is removed; a later one stays pending. Returns
    /// whether it was still pending.
    pub fn abandon(&self, id: u64) -> bool {
        let mut state = self.state();
        if state.pending.as_ref().is_some_and(|pending| pending.id == id) {
            state.pending = None;
            tracing::debug!(id, "Pending interaction abandoned by its waiter");
            return true;
        }
        false
    }

    /// Clear connection-scoped policy for a freshly started task.
    pub fn reset_for_new_task(&self) {
        self.state().confirm_all = false;
    }

    /// Whether yes-to-all is active.
    #[must_use]
    pub fn confirm_all(&self) -> bool {
        self.state().confirm_all
    }

    /// Whether the connection has closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    /// Kind of the pending interaction, if any.
    #[must_use]
    pub fn pending_kind(&self) -> Option<InteractionKind> {
        self.state().pending.as_ref().map(PendingInteraction::kind)
    }
}

fn take_pending(
    state: &mut GateState,
    expected: InteractionKind,
) -> Result<PendingInteraction, GateError> {
    match &state.pending {
        None => Err(GateError::NoPendingInteraction),
        Some(pending) if pending.kind() != expected => {
            Err(GateError::UnexpectedResponse(pending.kind()))
        }
        Some(_) => state.pending.take().ok_or(GateError::NoPendingInteraction),
    }
}
