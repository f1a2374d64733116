//! Processor lifecycle states.
//!
//! ```text
//! Idle --createProcessor ok--> Running --dispose--> Disposed
//!   \
//!    `--createProcessor failed--> Error
//! ```
//!
//! `Error` and `Disposed` are terminal. Only the `Running`, `Error` and
//! `Disposed` states are ever reported to the host.

use serde::{Deserialize, Serialize};

/// Lifecycle state reported in `state` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Running,
    Error,
    Disposed,
}

/// Per-id state as seen by the instance table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    /// No processor has been created under this id yet.
    Idle,
    Running,
    /// The processor was dropped; its id stays retired.
    Disposed,
}

impl ProcessorState {
    /// Whether `process` messages for this id reach a processor.
    pub fn accepts_blocks(self) -> bool {
        matches!(self, ProcessorState::Running)
    }
}

impl From<ProcessorState> for Option<LifecycleState> {
    fn from(state: ProcessorState) -> Self {
        match state {
            ProcessorState::Idle => None,
            ProcessorState::Running => Some(LifecycleState::Running),
            ProcessorState::Disposed => Some(LifecycleState::Disposed),
        }
    }
}
