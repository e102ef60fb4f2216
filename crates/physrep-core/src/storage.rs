//! Local log storage interface
//!
//! The storage engine is owned by the host process and shared with other
//! subsystems; replication only appends, reads the tail and truncates.

use crate::lsn::{LogPosition, Lsn};
use crate::Result;
use serde::{Deserialize, Serialize};

/// Oldest position and time the local log can still be truncated to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TruncationFloor {
    /// Minimum truncatable LSN; file 0 means the log is not truncatable
    pub lsn: Lsn,
    /// Minimum truncatable time (epoch seconds)
    pub timestamp: i64,
}

impl TruncationFloor {
    /// Whether any truncation is possible at all
    pub fn is_truncatable(&self) -> bool {
        self.lsn.file != 0
    }
}

/// Local physical log storage engine
pub trait LogStore: Send + Sync {
    /// Whether the node has finished recovery and its log tail can be trusted
    fn recovery_complete(&self) -> bool;

    /// Position and size of the last record, `None` for an empty log
    fn last_record(&self) -> Result<Option<LogPosition>>;

    /// Write a record at `lsn` tagged with `record_type`
    fn apply(&self, lsn: Lsn, record_type: i64, payload: &[u8]) -> Result<()>;

    /// Start a new log file; `lsn` is where the next record of the
    /// current file would have begun
    fn apply_new_file(&self, lsn: Lsn) -> Result<()>;

    /// Minimum truncatable position and time
    fn minimum_truncatable(&self) -> Result<TruncationFloor>;

    /// Drop every record after `lsn`.
    ///
    /// Fails with [`crate::Error::TruncationNotPermitted`] unless this node
    /// is master of its local log.
    fn truncate(&self, lsn: Lsn) -> Result<()>;

    /// Drop every record written after `timestamp` (epoch seconds)
    fn truncate_to_time(&self, timestamp: i64) -> Result<()>;
}
