//! Work layer interface: what the agent sees of a running session.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use taskgate_core::{
    ChangeKind, ChangePaths, EventSender, Ledger, LedgerError, LogKind, ServerEvent, Session,
    SessionId, SessionStatus, TaskData, TransitionError,
};
use thiserror::Error;

use crate::gate::{Answer, Decision, GateError, InteractionGate, Outcome, Reply, Resolution};

/// Work error.
#[derive(Debug, Error)]
pub enum WorkError {
    #[error("Connection lost while waiting for the user")]
    Disconnected,
    #[error("Interaction rejected: {0}")]
    Gate(#[from] GateError),
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("{0}")]
    Transition(#[from] TransitionError),
    #[error("Session has already finished")]
    SessionClosed,
    #[error("Cannot change the ledger while {0:?}")]
    AwaitingUser(SessionStatus),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Failed(String),
}

/// Session state shared between the controller and the running work.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    inner: Arc<Mutex<Session>>,
}

impl SessionHandle {
    /// Share `session`.
    #[must_use]
    pub fn new(session: Session) -> Self {
        Self {
            inner: Arc::new(Mutex::new(session)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Session> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Session identifier.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.lock().id
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.lock().status
    }

    /// Copy of the session.
    #[must_use]
    pub fn snapshot(&self) -> Session {
        self.lock().clone()
    }

    /// Apply a status transition.
    ///
    /// # Errors
    /// Returns error if the state machine does not allow it.
    pub fn transition(&self, next: SessionStatus) -> Result<(), TransitionError> {
        let mut session = self.lock();
        let from = session.status;
        session.transition(next)?;
        tracing::debug!(session = %session.id, ?from, to = ?next, "Session transition");
        Ok(())
    }
}

/// Capabilities handed to the work layer for one session.
///
/// Every capability is always present; the work never has to probe for
/// logging, interaction, or ledger access.
#[derive(Clone)]
pub struct TaskContext {
    task: Arc<TaskData>,
    session: SessionHandle,
    gate: Arc<InteractionGate>,
    ledger: Arc<Ledger>,
    events: EventSender,
}

impl TaskContext {
    /// Bundle the session's collaborators.
    #[must_use]
    pub const fn new(
        task: Arc<TaskData>,
        session: SessionHandle,
        gate: Arc<InteractionGate>,
        ledger: Arc<Ledger>,
        events: EventSender,
    ) -> Self {
        Self {
            task,
            session,
            gate,
            ledger,
            events,
        }
    }

    /// The task being executed.
    #[must_use]
    pub fn task(&self) -> &TaskData {
        &self.task
    }

    /// Session identifier.
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.session.id()
    }

    /// Current session status.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.session.status()
    }

    /// Send an informational log line.
    pub fn log(&self, message: impl Into<String>) {
        self.events.log(message, LogKind::Info);
    }

    /// Send a log line of the given kind.
    pub fn log_as(&self, message: impl Into<String>, kind: LogKind) {
        self.events.log(message, kind);
    }

    /// Send a log line describing an action about to be taken.
    pub fn log_action(&self, message: impl Into<String>) {
        let event = ServerEvent::Log {
            message: message.into(),
            log_type: LogKind::Info,
            is_action: Some(true),
        };
        if self.events.send(event).is_err() {
            tracing::debug!("Dropped action log for closed connection");
        }
    }

    /// Whether the owning connection is still there.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.gate.is_closed() && !self.events.is_closed()
    }

    /// Ask the user to approve an operation.
    ///
    /// The session is `AwaitingConfirmation` while the request is
    /// outstanding. `No` is returned as a decision; what it means for the
    /// remaining work is up to the caller.
    ///
    /// # Errors
    /// Returns `WorkError::Disconnected` if the connection is lost, or the
    /// gate's error if another interaction is pending.
    pub async fn confirm(
        &self,
        message: impl Into<String>,
        diff: Option<String>,
    ) -> Result<Decision, WorkError> {
        let decision = match self.gate.begin_confirmation(message, diff)? {
            Outcome::Resolved(decision) => decision,
            Outcome::Waiting(reply) => {
                self.suspend(reply, SessionStatus::AwaitingConfirmation).await?
            }
        };
        if decision == Decision::Disconnected {
            return Err(WorkError::Disconnected);
        }
        Ok(decision)
    }

    /// Ask the user a question.
    ///
    /// The session is `AwaitingQuestion` while the question is outstanding.
    ///
    /// # Errors
    /// Returns `WorkError::Disconnected` if the connection is lost, or the
    /// gate's error if another interaction is pending.
    pub async fn ask(
        &self,
        question: impl Into<String>,
        allows_yes_no: bool,
    ) -> Result<Answer, WorkError> {
        let answer = match self.gate.begin_question(question, allows_yes_no)? {
            Outcome::Resolved(answer) => answer,
            Outcome::Waiting(reply) => self.suspend(reply, SessionStatus::AwaitingQuestion).await?,
        };
        if answer == Answer::Disconnected {
            return Err(WorkError::Disconnected);
        }
        Ok(answer)
    }

    // Holds the session in `awaiting` until the reply arrives. If the caller
    // drops the future first, the guard withdraws the request.
    async fn suspend<T: Resolution + PartialEq>(
        &self,
        reply: Reply<T>,
        awaiting: SessionStatus,
    ) -> Result<T, WorkError> {
        let guard = SuspendGuard {
            gate: &self.gate,
            session: &self.session,
            id: reply.id(),
            armed: true,
        };
        self.session.transition(awaiting)?;
        let value = reply.wait().await;
        guard.disarm();
        if value != T::disconnected() {
            self.session.transition(SessionStatus::Running)?;
        }
        Ok(value)
    }

    /// Record a performed operation in the ledger.
    ///
    /// # Errors
    /// Returns error once the session has finished, while an interaction is
    /// pending, or if `paths` does not fit `kind`.
    pub fn record(&self, kind: ChangeKind, paths: ChangePaths) -> Result<u64, WorkError> {
        let status = self.session.status();
        if status.is_terminal() {
            return Err(WorkError::SessionClosed);
        }
        if status.is_awaiting() {
            return Err(WorkError::AwaitingUser(status));
        }
        Ok(self.ledger.append(kind, paths)?)
    }
}

/// Withdraws an interaction whose waiter went away before it resolved.
struct SuspendGuard<'a> {
    gate: &'a InteractionGate,
    session: &'a SessionHandle,
    id: u64,
    armed: bool,
}

impl SuspendGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for SuspendGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.gate.abandon(self.id);
        // Another interaction may have been opened meanwhile; it owns the status then.
        if self.gate.pending_kind().is_none() && self.session.status().is_awaiting() {
            if let Err(e) = self.session.transition(SessionStatus::Running) {
                tracing::warn!("Could not resume session after cancelled interaction: {e}");
            }
        }
    }
}

/// The external work a session drives (agent reasoning, file edits).
#[async_trait]
pub trait TaskWork: Send + Sync {
    /// Execute the task, returning the completion message.
    async fn run(&self, ctx: TaskContext) -> Result<String, WorkError>;
}
