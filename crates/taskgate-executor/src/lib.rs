//! Interaction gate and work layer interface.
//!
//! Provides:
//! - `InteractionGate` - One confirmation/question at a time per connection
//! - `TaskWork` - Trait implemented by the agent that performs a task
//! - `TaskContext` - Capabilities the agent uses while running

pub mod gate;
pub mod work;

pub use gate::{Answer, ButtonChoice, Decision, GateError, InteractionGate, InteractionKind};
pub use work::{SessionHandle, TaskContext, TaskWork, WorkError};
