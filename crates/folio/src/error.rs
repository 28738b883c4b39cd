use thiserror::Error;

pub use folio_core::CompileError;

use crate::change_queue::{QueueId, QueueStatus};

/// Failure reported by the remote document service collaborator.
///
/// An explicit "no match" is not an error; see [`crate::remote::RemoteAnswer`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("remote service unreachable: {0}")]
    Unreachable(String),

    #[error("remote service timed out after {0} ms")]
    Timeout(u64),

    #[error("remote service refused the query: {0}")]
    Refused(String),
}

/// Signals raised while resolving a key. Neither is shown to the user directly.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// A probe answered after its resolution had moved to another key or closed.
    #[error("discarded stale probe result for key `{key}`")]
    StaleResultDiscarded { key: String },

    /// The remote check could not be completed; try again later.
    #[error("probe for key `{key}` failed: {source}")]
    RemoteProbeFailure {
        key: String,
        #[source]
        source: RemoteError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("queue entry {0} not found")]
    EntryNotFound(QueueId),

    #[error("queue entry {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: QueueId,
        from: QueueStatus,
        to: QueueStatus,
    },

    /// Permanent failure, surfaced to the user. The entry is kept for retry or discard.
    #[error("change to document `{document_id}` was rejected: {reason}")]
    Rejected {
        id: QueueId,
        document_id: String,
        reason: String,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
