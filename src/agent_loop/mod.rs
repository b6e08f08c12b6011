//! Tool-orchestration loop (steps, approvals, events).

pub mod approvals;
pub mod events;
pub mod runner;
pub(crate) mod tooling;
pub mod types;

pub use approvals::{ApprovalGate, GateVerdict};
pub use events::LoopEvent;
pub use runner::{SharedHistory, ToolLoop};
pub use types::{LoopState, TurnOutcome};
