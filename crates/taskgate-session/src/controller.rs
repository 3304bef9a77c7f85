//! Per-connection session controller.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use taskgate_core::{
    ConnectionId, EventSender, Ledger, ServerEvent, Session, SessionId, SessionStatus, TaskData,
    TaskHistory, TaskValidationError, TransitionError, TransportError,
};
use taskgate_executor::{
    Answer, Decision, GateError, InteractionGate, SessionHandle, TaskContext, TaskWork, WorkError,
};
use tokio::sync::watch;

use crate::registry::{LedgerRegistry, RegistryError};

/// Controller error.
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("Invalid task: {0}")]
    InvalidTask(#[from] TaskValidationError),
    #[error("A session is already {0:?} on this connection")]
    SessionActive(SessionStatus),
    #[error("{0}")]
    Registry(#[from] RegistryError),
    #[error("{0}")]
    Gate(#[from] GateError),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("{0}")]
    Transition(#[from] TransitionError),
    #[error("Connection is closed")]
    Disconnected,
}

/// Session currently attached to the connection.
struct ActiveSession {
    session: SessionHandle,
    base_dir: String,
    finished: watch::Receiver<bool>,
}

/// Drives one task at a time for a single connection.
///
/// Owns the connection's interaction gate and hands the external work a
/// [`TaskContext`]. Terminal status is emitted exactly once per session.
pub struct SessionController {
    connection_id: ConnectionId,
    events: EventSender,
    gate: Arc<InteractionGate>,
    ledgers: Arc<LedgerRegistry>,
    work: Arc<dyn TaskWork>,
    history: Option<Arc<dyn TaskHistory>>,
    current: Mutex<Option<ActiveSession>>,
}

impl SessionController {
    /// Controller for the connection behind `events`.
    #[must_use]
    pub fn new(
        events: EventSender,
        ledgers: Arc<LedgerRegistry>,
        work: Arc<dyn TaskWork>,
        history: Option<Arc<dyn TaskHistory>>,
    ) -> Self {
        Self {
            connection_id: events.connection_id(),
            gate: Arc::new(InteractionGate::new(events.clone())),
            events,
            ledgers,
            work,
            history,
            current: Mutex::new(None),
        }
    }

    fn current(&self) -> MutexGuard<'_, Option<ActiveSession>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Connection this controller serves.
    #[must_use]
    pub const fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// The connection's interaction gate.
    #[must_use]
    pub fn gate(&self) -> &Arc<InteractionGate> {
        &self.gate
    }

    /// Status of the current session, `Idle` if none was started.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.current()
            .as_ref()
            .map_or(SessionStatus::Idle, |active| active.session.status())
    }

    /// Copy of the current session.
    #[must_use]
    pub fn session(&self) -> Option<Session> {
        self.current().as_ref().map(|active| active.session.snapshot())
    }

    /// Start a task on this connection.
    ///
    /// With `continue_context` and prior history for the base directory, the
    /// ledger is adopted and replayed to the client; otherwise it is reset.
    ///
    /// # Errors
    /// Returns error if the task is invalid, a session is still active here,
    /// the ledger is owned by another connection, or the connection closed.
    pub async fn start(&self, task: TaskData) -> Result<SessionId, ControllerError> {
        task.validate()?;
        let task = Arc::new(task);

        let session_id = {
            let mut current = self.current();
            if let Some(active) = current.as_ref() {
                let status = active.session.status();
                if status.is_active() {
                    return Err(ControllerError::SessionActive(status));
                }
            }
            if self.gate.is_closed() {
                return Err(ControllerError::Disconnected);
            }

            let ledger = self.ledgers.claim(&task.base_dir, self.connection_id)?;
            let session = SessionHandle::new(Session::new(&task));
            if let Err(e) = self.begin(&task, &ledger, &session) {
                self.ledgers.release(&task.base_dir, self.connection_id);
                return Err(e);
            }

            let ctx = TaskContext::new(
                Arc::clone(&task),
                session.clone(),
                Arc::clone(&self.gate),
                Arc::clone(&ledger),
                self.events.clone(),
            );
            let (finished_tx, finished) = watch::channel(false);
            tokio::spawn(drive(
                Arc::clone(&self.work),
                ctx,
                Finisher {
                    session: session.clone(),
                    gate: Arc::clone(&self.gate),
                    ledger,
                    ledgers: Arc::clone(&self.ledgers),
                    events: self.events.clone(),
                    connection_id: self.connection_id,
                    finished: finished_tx,
                },
            ));

            let id = session.id();
            *current = Some(ActiveSession {
                session,
                base_dir: task.base_dir.clone(),
                finished,
            });
            id
        };

        if let Some(history) = &self.history {
            if let Err(e) = history.record(&task).await {
                tracing::warn!(session = %session_id, "Failed to record task history: {e}");
            }
        }

        Ok(session_id)
    }

    // Ledger preparation and the Idle -> Running step, before any work runs.
    fn begin(
        &self,
        task: &TaskData,
        ledger: &Ledger,
        session: &SessionHandle,
    ) -> Result<(), ControllerError> {
        self.gate.reset_for_new_task();
        session.transition(SessionStatus::Running)?;
        self.events.send(ServerEvent::TaskRunning)?;

        if task.continue_context && !ledger.is_empty() {
            let replayed = ledger.replay_to(&self.events)?;
            tracing::info!(
                session = %session.id(),
                base_dir = %task.base_dir,
                replayed,
                "Resuming prior context"
            );
        } else {
            if !ledger.is_empty() {
                tracing::info!(base_dir = %task.base_dir, "Discarding prior context");
            }
            ledger.reset();
        }
        ledger.attach(self.events.clone());

        tracing::info!(
            connection = %self.connection_id,
            session = %session.id(),
            base_dir = %task.base_dir,
            "Session started"
        );
        Ok(())
    }

    /// Forward the client's confirmation answer to the gate.
    ///
    /// # Errors
    /// Returns error if no confirmation is pending.
    pub fn confirm(&self, decision: Decision) -> Result<(), ControllerError> {
        Ok(self.gate.resolve_confirmation(decision)?)
    }

    /// Forward the client's question answer to the gate.
    ///
    /// # Errors
    /// Returns error if no question is pending or the answer is not allowed.
    pub fn answer(&self, answer: Answer) -> Result<(), ControllerError> {
        Ok(self.gate.resolve_question(answer)?)
    }

    /// The connection is gone: cancel any pending interaction.
    ///
    /// Work already running keeps going without a client; it observes the
    /// disconnect the next time it asks the user anything.
    pub fn disconnect(&self) {
        self.gate.close();
        if let Some(active) = self.current().as_ref() {
            tracing::info!(
                connection = %self.connection_id,
                session = %active.session.id(),
                base_dir = %active.base_dir,
                status = ?active.session.status(),
                "Connection closed with session attached"
            );
        }
    }

    /// Wait for the current session to reach its terminal state.
    ///
    /// Any number of callers may wait at once. Returns the final status, or
    /// `None` if no session was started.
    pub async fn wait(&self) -> Option<SessionStatus> {
        let (mut finished, session) = {
            let current = self.current();
            let active = current.as_ref()?;
            (active.finished.clone(), active.session.clone())
        };
        if finished.wait_for(|done| *done).await.is_err() {
            tracing::error!(session = %session.id(), "Session driver ended without finishing");
        }
        Some(session.status())
    }
}

/// Everything needed to put a session into its terminal state.
struct Finisher {
    session: SessionHandle,
    gate: Arc<InteractionGate>,
    ledger: Arc<Ledger>,
    ledgers: Arc<LedgerRegistry>,
    events: EventSender,
    connection_id: ConnectionId,
    finished: watch::Sender<bool>,
}

impl Finisher {
    fn complete(&self, message: String) -> ServerEvent {
        if let Err(e) = self.session.transition(SessionStatus::Completed) {
            return self.fail(&WorkError::Transition(e));
        }
        tracing::info!(session = %self.session.id(), "Session completed");
        ServerEvent::TaskComplete { message }
    }

    fn fail(&self, error: &WorkError) -> ServerEvent {
        // Nothing may stay pending once the session is terminal.
        if self.gate.release() {
            tracing::debug!(session = %self.session.id(), "Released pending interaction");
        }
        if let Err(e) = self.session.transition(SessionStatus::Errored) {
            tracing::error!(session = %self.session.id(), "Could not mark session errored: {e}");
        }
        tracing::warn!(session = %self.session.id(), "Session errored: {error}");
        ServerEvent::TaskError {
            message: error.to_string(),
        }
    }

    // The ledger is free again before the client learns the task ended.
    fn finish(&self, terminal: ServerEvent) {
        self.ledger.detach();
        self.ledgers.release(self.ledger.base_dir(), self.connection_id);
        if self.events.send(terminal).is_err() {
            tracing::debug!(session = %self.session.id(), "Terminal event not delivered, client gone");
        }
        self.finished.send_replace(true);
    }
}

async fn drive(work: Arc<dyn TaskWork>, ctx: TaskContext, finisher: Finisher) {
    // The work runs on its own task so a panic still ends the session.
    let result = match tokio::spawn(async move { work.run(ctx).await }).await {
        Ok(result) => result,
        Err(e) => Err(WorkError::Failed(format!("Task aborted: {e}"))),
    };

    let terminal = match result {
        Ok(message) => finisher.complete(message),
        Err(e) => finisher.fail(&e),
    };
    finisher.finish(terminal);
}
