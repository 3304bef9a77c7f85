//! Explicit registries for connections and per-directory ledgers.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use taskgate_core::{ConnectionId, EventSender, Ledger, TaskHistory};
use taskgate_executor::TaskWork;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::SessionController;

/// Registry error.
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    #[error("Ledger for {base_dir} is in use by connection {owner}")]
    LedgerBusy {
        base_dir: String,
        owner: ConnectionId,
    },
}

struct LedgerSlot {
    ledger: Arc<Ledger>,
    owner: Option<ConnectionId>,
}

/// Ledgers keyed by base directory, each owned by at most one connection.
#[derive(Default)]
pub struct LedgerRegistry {
    slots: Mutex<HashMap<String, LedgerSlot>>,
}

/// Canonical registry key for a base directory.
#[must_use]
pub fn ledger_key(base_dir: &str) -> String {
    let trimmed = base_dir.trim();
    let without_slash = trimmed.trim_end_matches(['/', '\\']);
    if without_slash.is_empty() {
        trimmed.to_string()
    } else {
        without_slash.to_string()
    }
}

impl LedgerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, LedgerSlot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take ownership of the ledger for `base_dir`, creating it if needed.
    ///
    /// Claiming a ledger the same connection already owns succeeds.
    ///
    /// # Errors
    /// Returns error if another connection owns it.
    pub fn claim(&self, base_dir: &str, owner: ConnectionId) -> Result<Arc<Ledger>, RegistryError> {
        let key = ledger_key(base_dir);
        let mut slots = self.slots();
        let slot = slots.entry(key.clone()).or_insert_with(|| LedgerSlot {
            ledger: Arc::new(Ledger::new(key.clone())),
            owner: None,
        });

        match slot.owner {
            Some(current) if current != owner => Err(RegistryError::LedgerBusy {
                base_dir: key,
                owner: current,
            }),
            _ => {
                slot.owner = Some(owner);
                Ok(Arc::clone(&slot.ledger))
            }
        }
    }

    /// Give up ownership. Does nothing unless `owner` holds the ledger.
    pub fn release(&self, base_dir: &str, owner: ConnectionId) {
        if let Some(slot) = self.slots().get_mut(&ledger_key(base_dir)) {
            if slot.owner == Some(owner) {
                slot.owner = None;
            }
        }
    }

    /// Ledger for `base_dir`, if one was ever created.
    #[must_use]
    pub fn get(&self, base_dir: &str) -> Option<Arc<Ledger>> {
        self.slots()
            .get(&ledger_key(base_dir))
            .map(|slot| Arc::clone(&slot.ledger))
    }

    /// Connection currently owning the ledger for `base_dir`.
    #[must_use]
    pub fn owner(&self, base_dir: &str) -> Option<ConnectionId> {
        self.slots().get(&ledger_key(base_dir)).and_then(|slot| slot.owner)
    }
}

/// Live connections and the collaborators injected into their controllers.
///
/// A controller is created when a connection opens and disposed of when it
/// closes; nothing about a connection outlives that pair of calls except the
/// ledgers it wrote to.
pub struct ConnectionRegistry {
    ledgers: Arc<LedgerRegistry>,
    work: Arc<dyn TaskWork>,
    history: Option<Arc<dyn TaskHistory>>,
    connections: RwLock<HashMap<ConnectionId, Arc<SessionController>>>,
}

impl ConnectionRegistry {
    /// Registry that runs tasks with `work`.
    #[must_use]
    pub fn new(work: Arc<dyn TaskWork>) -> Self {
        Self {
            ledgers: Arc::new(LedgerRegistry::new()),
            work,
            history: None,
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Record every started task in `history`.
    #[must_use]
    pub fn with_history(mut self, history: Arc<dyn TaskHistory>) -> Self {
        self.history = Some(history);
        self
    }

    /// Shared ledger registry.
    #[must_use]
    pub fn ledgers(&self) -> &Arc<LedgerRegistry> {
        &self.ledgers
    }

    /// Task history, if configured.
    #[must_use]
    pub fn history(&self) -> Option<&Arc<dyn TaskHistory>> {
        self.history.as_ref()
    }

    /// Create the controller for a new connection.
    pub async fn connect(&self, events: EventSender) -> Arc<SessionController> {
        let id = events.connection_id();
        let controller = Arc::new(SessionController::new(
            events,
            Arc::clone(&self.ledgers),
            Arc::clone(&self.work),
            self.history.clone(),
        ));
        self.connections
            .write()
            .await
            .insert(id, Arc::clone(&controller));
        tracing::info!(connection = %id, "Connection registered");
        controller
    }

    /// Dispose of a connection's controller, cancelling its pending interaction.
    pub async fn disconnect(&self, id: ConnectionId) -> Option<Arc<SessionController>> {
        let controller = self.connections.write().await.remove(&id)?;
        controller.disconnect();
        tracing::info!(connection = %id, "Connection removed");
        Some(controller)
    }

    /// Controller for a live connection.
    pub async fn get(&self, id: ConnectionId) -> Option<Arc<SessionController>> {
        self.connections.read().await.get(&id).cloned()
    }

    /// Number of live connections.
    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Whether no connection is live.
    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }
}
