//! Error types for physical replication
//!
//! Display strings double as the operator-facing messages of the admin
//! surface, so they are kept short and name the failed operation.

use crate::lsn::Lsn;
use thiserror::Error;

/// Result type alias using the replication Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the replication client and its collaborators
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors (config files, transports)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// A donor host could not be reached
    #[error("Couldn't connect to {host}: {reason}")]
    Connection {
        /// Host that refused or timed out
        host: String,
        /// Transport-level reason
        reason: String,
    },

    /// Every registered host was tried and none accepted a connection
    #[error("Couldn't start replicating")]
    NoDonorAvailable,

    /// A donor query failed (transient)
    #[error("Query error: {0}")]
    Query(String),

    /// A donor row could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// A textual LSN token did not have the `{file:offset}` form
    #[error("Invalid lsn token '{0}'")]
    InvalidLsn(String),

    /// A record could not be written to the local log
    #[error("Log apply failed at {lsn}: {reason}")]
    Apply {
        /// Position of the rejected record
        lsn: Lsn,
        /// Storage-level reason
        reason: String,
    },

    /// Local log storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Truncation attempted on a node that is not master of its local log
    #[error("Can only truncate from master node")]
    TruncationNotPermitted,

    /// The local log retains nothing that can be truncated
    #[error("Log is not truncatable")]
    NotTruncatable,

    /// Requested truncation LSN precedes the retained minimum
    #[error("Minimum truncate lsn is {minimum}")]
    BelowMinimumLsn {
        /// Smallest LSN the log can be truncated to
        minimum: Lsn,
    },

    /// Requested truncation time precedes the retained minimum
    #[error("Minimum truncate timestamp is {minimum}")]
    BelowMinimumTimestamp {
        /// Oldest truncatable time (epoch seconds)
        minimum: i64,
    },

    /// Truncation to an LSN failed for a reason other than mastership
    #[error("Couldn't truncate to lsn {lsn}")]
    TruncateFailed {
        /// Requested LSN
        lsn: Lsn,
    },

    /// Truncation to a timestamp failed for a reason other than mastership
    #[error("Couldn't truncate to timestamp {timestamp}")]
    TruncateTimeFailed {
        /// Requested time (epoch seconds)
        timestamp: i64,
    },

    /// A session is already active
    #[error("DB is already replicating")]
    AlreadyReplicating,

    /// No session is active
    #[error("DB is not replicating")]
    NotReplicating,

    /// Replication commands issued on a node not configured as a replicant
    #[error("Database is not a physical replicant, cannot replicate")]
    NotPhysicalReplicant,

    /// The background task could not be joined
    #[error("Something went horribly wrong. Replicating thread wouldn't stop")]
    StopFailed,

    /// Host is not in the registry
    #[error("Replicant host not found: {0}")]
    HostNotFound(String),

    /// Host is already in the registry
    #[error("Replicant host already registered: {0}")]
    DuplicateHost(String),

    /// Command invoked with malformed arguments
    #[error("{0}")]
    Usage(String),

    /// Generic replication errors
    #[error("Replication error: {0}")]
    Replication(String),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a connection error
    pub fn connection(host: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Connection {
            host: host.into(),
            reason: reason.into(),
        }
    }

    /// Create a query error
    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }

    /// Create a decode error
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Create an apply error
    pub fn apply(lsn: Lsn, reason: impl Into<String>) -> Self {
        Self::Apply {
            lsn,
            reason: reason.into(),
        }
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a usage error
    pub fn usage(msg: impl Into<String>) -> Self {
        Self::Usage(msg.into())
    }

    /// Create a replication error
    pub fn replication(msg: impl Into<String>) -> Self {
        Self::Replication(msg.into())
    }

    /// Whether the failure is worth retrying on a later poll
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::Connection { .. } | Error::Query(_) | Error::Storage(_)
        )
    }
}
