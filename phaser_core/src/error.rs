//! Error types for the phase tracker.
//!
//! Only programmer errors surface as [`PhaseError`]. Protocol violations the
//! tracker can recover from (mismatched completion, runaway scopes, leftover
//! captures) are reported through [`crate::diagnostics`] instead.

use crate::capture::CaptureCategory;
use thiserror::Error;

/// Contract violations raised at the call site.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PhaseError {
    /// Owner or notifier assigned twice with different values
    #[error("{field} for this phase context is already set")]
    AttributionAlreadySet { field: &'static str },

    /// A capture category was enabled twice on the same context
    #[error("capture of {0} is already enabled")]
    CaptureAlreadyEnabled(CaptureCategory),

    /// A capture buffer was accessed without opting into it
    #[error("expected to be capturing {0}, but capture was never enabled")]
    CaptureNotEnabled(CaptureCategory),

    /// The context was already pushed and can no longer be modified
    #[error("cannot modify a phase context that has already been switched")]
    AlreadySwitched,

    /// The context was pushed without being marked as switched
    #[error("phase context must be switched before it is pushed")]
    NotSwitched,

    /// The tracker was accessed from a thread other than its owner
    #[error("asynchronous access to the phase tracker")]
    WrongThread,

    /// A scope failed while committing its captures
    #[error("unwind failed: {0}")]
    Unwind(String),
}

impl PhaseError {
    /// Creates an unwind error.
    pub fn unwind(msg: impl Into<String>) -> Self {
        Self::Unwind(msg.into())
    }
}

/// Errors loading a [`crate::TrackerConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}
