//! Error types for layout operations.

use thiserror::Error;

use crate::engine::EngineState;

/// Errors that can occur while configuring or running a layout.
///
/// Cloneable so a failure raised inside the barrier can be handed to every
/// party that observes it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LayoutError {
    /// A property value was out of range.
    #[error("invalid value for `{property}`: {message}")]
    Configuration {
        property: &'static str,
        message: String,
    },

    /// The graph has no nodes; nothing to lay out.
    #[error("graph has no nodes")]
    EmptyGraph,

    /// Internal consistency check failed (e.g. two workers wrote the same node).
    #[error("concurrency invariant violated: {message}")]
    ConcurrencyInvariant { message: String },

    /// An operation was called in the wrong lifecycle state.
    #[error("cannot {operation} while {state:?}")]
    InvalidState {
        operation: &'static str,
        state: EngineState,
    },

    /// No graph model was attached before `init_algo`.
    #[error("no graph model attached")]
    GraphNotSet,

    /// A worker thread panicked and abandoned the barrier.
    #[error("worker {worker} panicked")]
    WorkerPanicked { worker: usize },

    /// The OS refused to start a worker thread.
    #[error("failed to spawn worker thread: {message}")]
    ThreadSpawn { message: String },
}

impl LayoutError {
    pub(crate) fn invariant(message: impl Into<String>) -> Self {
        Self::ConcurrencyInvariant {
            message: message.into(),
        }
    }

    pub(crate) fn config(property: &'static str, message: impl Into<String>) -> Self {
        Self::Configuration {
            property,
            message: message.into(),
        }
    }
}
