use thiserror::Error;

use crate::models::NodeId;
use crate::persist::PersistenceError;

/// Errors returned by tree, history and service operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("node not found: {0}")]
    NotFound(NodeId),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("nothing to undo")]
    NothingToUndo,

    #[error("nothing to redo")]
    NothingToRedo,

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("remote store unavailable: {0}")]
    RemoteUnavailable(String),
}

impl Error {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidOperation(msg.into())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
