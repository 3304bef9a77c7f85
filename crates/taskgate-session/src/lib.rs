//! Session control and task history for interactive tasks.
//!
//! Provides:
//! - `SessionController` - Per-connection task state machine
//! - `ConnectionRegistry` / `LedgerRegistry` - Explicit connection and ledger ownership
//! - History implementations (memory, JSON file)

pub mod controller;
pub mod registry;
pub mod storage;

pub use controller::{ControllerError, SessionController};
pub use registry::{ConnectionRegistry, LedgerRegistry, RegistryError};
