//! In-memory local log

use crate::lsn::{LogPosition, Lsn};
use crate::storage::{LogStore, TruncationFloor};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};

/// A mutation observed by [`MemoryLogStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOp {
    /// Record written
    Apply {
        /// Position written
        lsn: Lsn,
        /// Record type tag
        record_type: i64,
        /// Record bytes
        payload: Vec<u8>,
    },
    /// New log file started
    NewFile {
        /// Where the next record of the old file would have begun
        lsn: Lsn,
    },
    /// Log truncated to an LSN
    Truncate {
        /// Last retained position
        lsn: Lsn,
    },
    /// Log truncated to a time
    TruncateToTime {
        /// Epoch seconds
        timestamp: i64,
    },
}

struct Inner {
    /// Record sizes keyed by position
    records: BTreeMap<Lsn, u32>,
    ops: Vec<LogOp>,
    ready: bool,
    master: bool,
    floor: TruncationFloor,
    fail_reads: bool,
    fail_truncates: bool,
    rejected: HashSet<Lsn>,
}

/// Local log kept in memory
pub struct MemoryLogStore {
    inner: Mutex<Inner>,
}

impl MemoryLogStore {
    /// An empty, recovered log on a master node
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                records: BTreeMap::new(),
                ops: Vec::new(),
                ready: true,
                master: true,
                floor: TruncationFloor {
                    lsn: Lsn::new(1, 0),
                    timestamp: 0,
                },
                fail_reads: false,
                fail_truncates: false,
                rejected: HashSet::new(),
            }),
        }
    }

    /// A log whose last record is `tail`
    pub fn with_tail(tail: LogPosition) -> Self {
        let store = Self::new();
        store.inner.lock().records.insert(tail.lsn(), tail.size);
        store
    }

    /// Mark local recovery as finished or not
    pub fn set_ready(&self, ready: bool) {
        self.inner.lock().ready = ready;
    }

    /// Make this node master of its local log or not
    pub fn set_master(&self, master: bool) {
        self.inner.lock().master = master;
    }

    /// Set the minimum truncatable position and time
    pub fn set_floor(&self, floor: TruncationFloor) {
        self.inner.lock().floor = floor;
    }

    /// Make tail and floor reads fail
    pub fn fail_reads(&self, fail: bool) {
        self.inner.lock().fail_reads = fail;
    }

    /// Make truncations fail with a storage error
    pub fn fail_truncates(&self, fail: bool) {
        self.inner.lock().fail_truncates = fail;
    }

    /// Refuse writes at `lsn`
    pub fn reject_at(&self, lsn: Lsn) {
        self.inner.lock().rejected.insert(lsn);
    }

    /// Every mutation so far, in order
    pub fn ops(&self) -> Vec<LogOp> {
        self.inner.lock().ops.clone()
    }

    /// Current last record, if any
    pub fn tail(&self) -> Option<LogPosition> {
        Self::tail_of(&self.inner.lock())
    }

    fn tail_of(inner: &Inner) -> Option<LogPosition> {
        inner
            .records
            .iter()
            .next_back()
            .map(|(lsn, size)| LogPosition::at(*lsn, *size))
    }
}

impl Default for MemoryLogStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LogStore for MemoryLogStore {
    fn recovery_complete(&self) -> bool {
        self.inner.lock().ready
    }

    fn last_record(&self) -> Result<Option<LogPosition>> {
        let inner = self.inner.lock();
        if inner.fail_reads {
            return Err(Error::storage("can't get log cursor"));
        }
        Ok(Self::tail_of(&inner))
    }

    fn apply(&self, lsn: Lsn, record_type: i64, payload: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.rejected.contains(&lsn) {
            return Err(Error::apply(lsn, "write rejected"));
        }
        inner.records.insert(lsn, payload.len() as u32);
        inner.ops.push(LogOp::Apply {
            lsn,
            record_type,
            payload: payload.to_vec(),
        });
        Ok(())
    }

    fn apply_new_file(&self, lsn: Lsn) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.rejected.contains(&lsn) {
            return Err(Error::apply(lsn, "new file rejected"));
        }
        inner.ops.push(LogOp::NewFile { lsn });
        Ok(())
    }

    fn minimum_truncatable(&self) -> Result<TruncationFloor> {
        let inner = self.inner.lock();
        if inner.fail_reads {
            return Err(Error::storage("can't read truncation floor"));
        }
        Ok(inner.floor)
    }

    fn truncate(&self, lsn: Lsn) -> Result<()> {
        let mut inner = self.inner.lock();
        if !inner.master {
            return Err(Error::TruncationNotPermitted);
        }
        if inner.fail_truncates {
            return Err(Error::storage("can't truncate log"));
        }
        inner.records.retain(|k, _| *k <= lsn);
        inner.ops.push(LogOp::Truncate { lsn });
        Ok(())
    }

    fn truncate_to_time(&self, timestamp: i64) -> Result<()> {
        let mut inner = self.inner.lock();
        if !inner.master {
            return Err(Error::TruncationNotPermitted);
        }
        if inner.fail_truncates {
            return Err(Error::storage("can't truncate log"));
        }
        inner.ops.push(LogOp::TruncateToTime { timestamp });
        Ok(())
    }
}
