//! Local end-of-log tracking

use crate::lsn::LogPosition;
use crate::storage::LogStore;
use crate::{Error, Result};
use std::sync::Arc;

/// Reads the tail of the local log
#[derive(Clone)]
pub struct PositionTracker {
    store: Arc<dyn LogStore>,
}

impl PositionTracker {
    /// Create a tracker over the local store
    pub fn new(store: Arc<dyn LogStore>) -> Self {
        Self { store }
    }

    /// Last record of the local log, or the zero position if it cannot be
    /// determined. A zero result means "retry later", not a fatal error.
    pub fn local_end_of_log(&self) -> LogPosition {
        match self.try_local_end_of_log() {
            Ok(position) => position,
            Err(e) => {
                tracing::error!("Can't determine local end of log: {}", e);
                LogPosition::ZERO
            }
        }
    }

    /// Last record of the local log, keeping the failure distinct
    pub fn try_local_end_of_log(&self) -> Result<LogPosition> {
        self.store
            .last_record()?
            .ok_or_else(|| Error::storage("can't get last log record"))
    }

    /// Byte offset at which the record after `position` begins
    pub fn next_position(position: &LogPosition) -> u32 {
        position.next_offset()
    }
}
