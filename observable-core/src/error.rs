//! Error types for the observable engine.

use std::fmt::Display;
use std::sync::Arc;

use crate::graph::NodeId;

/// Result alias used throughout the crate.
pub type Result<T, E = ObservableError> = std::result::Result<T, E>;

/// Errors raised by the engine or by user read functions and effects.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ObservableError {
    /// A reader was used after the evaluation it was created for returned.
    #[error("reader owned by {owner} was used outside of its evaluation")]
    InvalidScope {
        /// The node whose evaluation created the reader.
        owner: NodeId,
    },

    /// The node was disposed and can no longer be read or written.
    #[error("observable {id} was used after being disposed")]
    Disposed {
        /// Id of the disposed node.
        id: NodeId,
    },

    /// The id does not belong to this runtime.
    #[error("observable {id} is not registered with this runtime")]
    UnknownNode {
        /// Id that failed to resolve.
        id: NodeId,
    },

    /// A handle was used to read a node that stores a different type.
    #[error("observable `{name}` does not hold a value of the requested type")]
    TypeMismatch {
        /// Diagnostic name of the node.
        name: String,
    },

    /// A derived value depends on itself.
    #[error("cyclic dependency detected while evaluating `{name}`")]
    Cycle {
        /// Diagnostic name of the node that was re-entered.
        name: String,
    },

    /// Writes issued from effects kept re-triggering each other.
    #[error("transaction did not settle after {rounds} update rounds")]
    UpdateLoop {
        /// Number of rounds that were processed before giving up.
        rounds: usize,
    },

    /// Failure raised by a read function or an effect.
    #[error("{message}")]
    Failed {
        /// Human readable reason.
        message: String,
    },

    /// Runtime configuration could not be parsed.
    #[error("invalid runtime configuration: {0}")]
    Config(#[source] Arc<serde_json::Error>),
}

impl From<serde_json::Error> for ObservableError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(Arc::new(err))
    }
}

impl ObservableError {
    /// Build a user-level failure from anything printable.
    pub fn failed(message: impl Display) -> Self {
        Self::Failed {
            message: message.to_string(),
        }
    }
}
