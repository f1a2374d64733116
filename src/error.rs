//! Error types for the worklet scope.

use crate::buffer::SliceError;

/// Errors raised while handling control messages.
///
/// Construction errors are reported twice: a `state: error` notification goes
/// to the host first, then the error is returned to the caller.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WorkletError {
    #[error("NotSupportedError: no processor registered under '{name}'")]
    NotSupported { name: String },

    #[error("InvalidStateError: '{name}' did not construct a processor with a control port")]
    InvalidState { name: String },

    #[error("invalid bus layout: {0}")]
    InvalidBus(#[from] SliceError),

    #[error("module '{url}' not found")]
    ModuleNotFound { url: String },
}

/// Result type for control message handlers.
pub type WorkletResult<T = ()> = Result<T, WorkletError>;
