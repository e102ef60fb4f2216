//! Sync state machine
//!
//! One [`SyncMachine`] runs per replication session on its own task and
//! exclusively owns the donor connection. Each iteration:
//!
//! 1. reads the local end of log,
//! 2. asks the donor for every row after it,
//! 3. applies the rows in donor order, or runs the truncation handshake when
//!    the donor has nothing new or its generation moved forward,
//! 4. sleeps for the poll interval.
//!
//! ```text
//! STARTING ──► CATCHUP ──► STEADY ◄──► TRUNCATING
//!     │            │          │             │
//!     └────────────┴──────────┴─────────────┴──► STOPPED
//! ```
//!
//! [`SyncMachine::step`] runs a single iteration without sleeping so the
//! loop body can be driven directly.

use crate::config::{FailurePolicy, ReplicationConfig};
use crate::decoder::{DonorRecord, RecordDecoder};
use crate::donor::{DonorConnection, DonorQuery, TruncationPoint};
use crate::lsn::{LogPosition, Lsn};
use crate::storage::LogStore;
use crate::tracker::PositionTracker;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Phase of a replication session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum SyncState {
    /// Waiting for local recovery and the initial handshake
    #[default]
    Starting,
    /// Pulling a backlog from the donor
    Catchup,
    /// Caught up, polling for new records
    Steady,
    /// Renegotiating a common position with the donor
    Truncating,
    /// Loop has exited
    Stopped,
}

/// Replication session statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReplicationStats {
    /// Current phase
    pub state: SyncState,
    /// Host the session is pulling from
    pub donor: Option<String>,
    /// Session identifier
    pub session_id: Option<String>,
    /// Generation the session currently accepts
    pub expected_generation: u64,
    /// Last record applied (or agreed by a handshake)
    pub last_applied: Option<LogPosition>,
    /// Completed donor polls
    pub polls: u64,
    /// Records written to the local log
    pub records_applied: u64,
    /// Payload bytes written to the local log
    pub bytes_applied: u64,
    /// New-file markers written
    pub file_markers: u64,
    /// Rows skipped because the local log already had them
    pub stale_rows: u64,
    /// Donor queries that failed or timed out
    pub query_failures: u64,
    /// Polls skipped because the local tail could not be read
    pub position_failures: u64,
    /// Rows that could not be decoded
    pub decode_failures: u64,
    /// Records the local log refused
    pub apply_failures: u64,
    /// Successful truncation handshakes
    pub truncations: u64,
    /// Failed truncation handshakes
    pub truncation_failures: u64,
    /// Generation increases observed
    pub generation_changes: u64,
    /// Time of the last completed poll
    pub last_poll_time: Option<DateTime<Utc>>,
    /// Most recent failure; a non-transient one also stops the loop
    pub last_error: Option<String>,
}

/// Statistics shared between a session task and its manager
pub type SharedStats = Arc<Mutex<ReplicationStats>>;

/// What a single iteration did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Batch processed; `applied` records written
    Applied {
        /// Records written
        applied: usize,
    },
    /// Donor had nothing new; handshake completed
    Resynced,
    /// A row from a newer generation ended the batch; handshake completed
    GenerationChanged {
        /// New expected generation
        generation: u64,
        /// Records written before the change
        applied: usize,
    },
    /// A failure under [`FailurePolicy::AbortAndResync`] ended the batch;
    /// handshake completed
    Aborted {
        /// Records written before the failure
        applied: usize,
    },
}

/// Background replication loop for one session
pub struct SyncMachine {
    store: Arc<dyn LogStore>,
    tracker: PositionTracker,
    donor: Box<dyn DonorConnection>,
    config: ReplicationConfig,
    state: SyncState,
    expected_generation: u64,
    prev: LogPosition,
    resync_pending: bool,
    halted: Option<String>,
    stats: SharedStats,
}

impl SyncMachine {
    /// Create a machine pulling from `donor` into `store`
    pub fn new(
        store: Arc<dyn LogStore>,
        donor: Box<dyn DonorConnection>,
        config: ReplicationConfig,
    ) -> Self {
        Self {
            tracker: PositionTracker::new(Arc::clone(&store)),
            store,
            donor,
            config,
            state: SyncState::Starting,
            expected_generation: 0,
            prev: LogPosition::ZERO,
            resync_pending: false,
            halted: None,
            stats: SharedStats::default(),
        }
    }

    /// Report into an existing statistics handle
    pub fn with_stats(mut self, stats: SharedStats) -> Self {
        self.stats = stats;
        self
    }

    /// Current phase
    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Generation the machine currently accepts
    pub fn expected_generation(&self) -> u64 {
        self.expected_generation
    }

    /// Last applied (or agreed) position
    pub fn previous_applied(&self) -> LogPosition {
        self.prev
    }

    /// Whether a handshake must succeed before the next poll
    pub fn resync_pending(&self) -> bool {
        self.resync_pending
    }

    /// Failure that stopped automatic retries, if any
    pub fn halted(&self) -> Option<&str> {
        self.halted.as_deref()
    }

    /// Snapshot of the statistics
    pub fn stats(&self) -> ReplicationStats {
        self.stats.lock().clone()
    }

    /// Run until `cancel` fires
    pub async fn run(mut self, cancel: CancellationToken) {
        if self.bootstrap(&cancel).await {
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                match self.step().await {
                    Ok(_) => {}
                    Err(_) if self.halted.is_some() => break,
                    Err(e) => tracing::warn!("Replication iteration failed: {}", e),
                }
                if !pause(&cancel, self.config.poll_interval).await {
                    break;
                }
            }
        }
        self.set_state(SyncState::Stopped);
        tracing::info!("Replication loop stopped");
    }

    /// Wait for local recovery, then establish a common position with the
    /// donor. Returns `false` if cancelled first or if the handshake fails
    /// for a reason a retry cannot fix.
    pub async fn bootstrap(&mut self, cancel: &CancellationToken) -> bool {
        self.set_state(SyncState::Starting);

        while !self.store.recovery_complete() {
            tracing::debug!("Waiting for local recovery before replicating");
            if !pause(cancel, self.config.readiness_interval).await {
                return false;
            }
        }

        loop {
            if cancel.is_cancelled() {
                return false;
            }
            match self.resync().await {
                Ok(point) => {
                    tracing::info!(
                        "Replication starting from {} at generation {}",
                        point.position.lsn(),
                        self.expected_generation
                    );
                    self.set_state(SyncState::Catchup);
                    return true;
                }
                Err(e) => {
                    self.record_failure(&e);
                    if self.halted.is_some() {
                        return false;
                    }
                    tracing::error!("Initial truncation handshake failed: {}", e);
                    if !pause(cancel, self.config.poll_interval).await {
                        return false;
                    }
                }
            }
        }
    }

    /// Run one poll iteration.
    ///
    /// A failure that is not [transient](Error::is_transient), such as the
    /// local log refusing a truncation, halts the machine: later calls fail
    /// without touching the donor or the local log.
    pub async fn step(&mut self) -> Result<StepOutcome> {
        if let Some(reason) = &self.halted {
            return Err(Error::replication(format!("halted after: {}", reason)));
        }
        let result = self.poll_once().await;
        if let Err(e) = &result {
            self.record_failure(e);
        }
        result
    }

    fn record_failure(&mut self, e: &Error) {
        let message = e.to_string();
        if !e.is_transient() {
            tracing::error!("Replication halted, operator action required: {}", message);
            self.halted = Some(message.clone());
        }
        self.stats.lock().last_error = Some(message);
    }

    async fn poll_once(&mut self) -> Result<StepOutcome> {
        if self.resync_pending {
            self.resync().await?;
            return Ok(StepOutcome::Resynced);
        }

        let local = match self.tracker.try_local_end_of_log() {
            Ok(position) => position,
            Err(e) => {
                self.stats.lock().position_failures += 1;
                return Err(e);
            }
        };
        self.prev = local;

        let query = DonorQuery::after(local.lsn());
        let status = match bounded(self.config.query_timeout, self.donor.run_query(&query)).await
        {
            Ok(status) => status,
            Err(e) => {
                self.stats.lock().query_failures += 1;
                return Err(e);
            }
        };

        {
            let mut stats = self.stats.lock();
            stats.polls += 1;
            stats.last_poll_time = Some(Utc::now());
        }

        if status.is_done() {
            tracing::debug!("Donor has no log past {}", local.lsn());
            self.resync().await?;
            return Ok(StepOutcome::Resynced);
        }

        // Rows that were not already in the local log
        let mut fresh = 0;
        let mut applied = 0;
        for row in status.into_rows() {
            let generation = RecordDecoder::generation(&row);
            if generation > self.expected_generation {
                tracing::info!(
                    "Donor generation moved from {} to {} at {}",
                    self.expected_generation,
                    generation,
                    row.lsn
                );
                self.expected_generation = generation;
                {
                    let mut stats = self.stats.lock();
                    stats.generation_changes += 1;
                    stats.expected_generation = generation;
                }
                self.resync().await?;
                return Ok(StepOutcome::GenerationChanged {
                    generation,
                    applied,
                });
            }

            let record = match RecordDecoder::decode(&row) {
                Ok(record) => record,
                Err(e) => {
                    fresh += 1;
                    self.stats.lock().decode_failures += 1;
                    tracing::warn!("Skipping undecodable donor row: {}", e);
                    if self.config.decode_failure_policy == FailurePolicy::AbortAndResync {
                        self.resync().await?;
                        return Ok(StepOutcome::Aborted { applied });
                    }
                    continue;
                }
            };

            if record.lsn.lsn() <= self.prev.lsn() {
                tracing::debug!("Record {} already present locally", record.lsn.lsn());
                self.stats.lock().stale_rows += 1;
                continue;
            }

            fresh += 1;
            match self.apply_record(&record) {
                Ok(()) => applied += 1,
                Err(_) if self.config.apply_failure_policy == FailurePolicy::AbortAndResync => {
                    self.resync().await?;
                    return Ok(StepOutcome::Aborted { applied });
                }
                Err(_) => {}
            }
        }

        if fresh == 0 {
            tracing::debug!("Donor re-sent only log up to {}", self.prev.lsn());
            self.resync().await?;
            return Ok(StepOutcome::Resynced);
        }

        Ok(StepOutcome::Applied { applied })
    }

    /// Apply one decoded record after the previously applied position.
    ///
    /// Crossing into a later log file first writes a new-file marker at
    /// `(prev.file, prev.offset + prev.size)`. On failure the previous
    /// position still advances under [`FailurePolicy::SkipAndContinue`].
    pub fn apply_record(&mut self, record: &DonorRecord) -> Result<()> {
        let cur = record.lsn;
        let result = self.write_record(self.prev, record);

        match &result {
            Ok(()) => {
                let mut stats = self.stats.lock();
                stats.records_applied += 1;
                stats.bytes_applied += record.payload.len() as u64;
            }
            Err(e) => {
                self.stats.lock().apply_failures += 1;
                tracing::error!("Failed to apply log record at {}: {}", cur.lsn(), e);
            }
        }

        if result.is_ok() || self.config.apply_failure_policy == FailurePolicy::SkipAndContinue {
            self.prev = cur;
            self.stats.lock().last_applied = Some(cur);
        }
        result
    }

    fn write_record(&self, prev: LogPosition, record: &DonorRecord) -> Result<()> {
        if record.lsn.file > prev.file {
            let marker = Lsn::new(prev.file, PositionTracker::next_position(&prev));
            tracing::debug!("Starting new log file after {}", marker);
            self.store.apply_new_file(marker)?;
            self.stats.lock().file_markers += 1;
        }
        self.store
            .apply(record.lsn.lsn(), record.record_type, &record.payload)
    }

    /// Negotiate a common position with the donor and cut the local log
    /// back to it if needed. Leaves the machine in [`SyncState::Steady`].
    pub async fn resync(&mut self) -> Result<TruncationPoint> {
        self.resync_pending = true;
        self.set_state(SyncState::Truncating);

        let local = self.tracker.local_end_of_log();
        let point = match bounded(
            self.config.query_timeout,
            self.donor.negotiate_truncation(local),
        )
        .await
        {
            Ok(point) => point,
            Err(e) => {
                self.stats.lock().truncation_failures += 1;
                return Err(e);
            }
        };

        if local.lsn() > point.position.lsn() {
            tracing::info!(
                "Truncating local log from {} back to {}",
                local.lsn(),
                point.position.lsn()
            );
            if let Err(e) = self.store.truncate(point.position.lsn()) {
                self.stats.lock().truncation_failures += 1;
                return Err(e);
            }
        }

        self.prev = point.position;
        self.expected_generation = self.expected_generation.max(point.generation);
        self.resync_pending = false;
        {
            let mut stats = self.stats.lock();
            stats.truncations += 1;
            stats.expected_generation = self.expected_generation;
            stats.last_applied = Some(point.position);
        }
        self.set_state(SyncState::Steady);
        Ok(point)
    }

    fn set_state(&mut self, state: SyncState) {
        self.state = state;
        self.stats.lock().state = state;
    }
}

/// Sleep unless cancelled; `false` means cancellation won
async fn pause(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

async fn bounded<T>(limit: Duration, fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| Error::query(format!("donor did not answer within {:?}", limit)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::donor::DonorRow;
    use crate::testing::{LogOp, MemoryLogStore, ScriptedDonor};

    fn machine(store: &Arc<MemoryLogStore>, donor: &ScriptedDonor) -> SyncMachine {
        SyncMachine::new(
            Arc::clone(store) as Arc<dyn LogStore>,
            Box::new(donor.connection()),
            ReplicationConfig::replicant("local", ["h1"]),
        )
    }

    fn record(file: u32, offset: u32, payload: &'static [u8]) -> DonorRecord {
        RecordDecoder::decode(&DonorRow::new(Lsn::new(file, offset), 1, 1, payload)).unwrap()
    }

    #[test]
    fn test_same_file_apply_has_no_marker() {
        let store = Arc::new(MemoryLogStore::with_tail(LogPosition::new(3, 100, 20)));
        let donor = ScriptedDonor::new();
        let mut m = machine(&store, &donor);
        m.prev = LogPosition::new(3, 100, 20);

        m.apply_record(&record(3, 120, b"abc")).unwrap();

        assert_eq!(
            store.ops(),
            vec![LogOp::Apply {
                lsn: Lsn::new(3, 120),
                record_type: 1,
                payload: b"abc".to_vec(),
            }]
        );
        assert_eq!(m.previous_applied(), LogPosition::new(3, 120, 3));
    }

    #[test]
    fn test_apply_failure_policies() {
        let store = Arc::new(MemoryLogStore::with_tail(LogPosition::new(3, 100, 20)));
        store.reject_at(Lsn::new(3, 120));
        let donor = ScriptedDonor::new();

        let mut skip = machine(&store, &donor);
        skip.prev = LogPosition::new(3, 100, 20);
        assert!(skip.apply_record(&record(3, 120, b"abc")).is_err());
        assert_eq!(skip.previous_applied(), LogPosition::new(3, 120, 3));
        assert_eq!(skip.stats().apply_failures, 1);

        let mut abort = SyncMachine::new(
            Arc::clone(&store) as Arc<dyn LogStore>,
            Box::new(donor.connection()),
            ReplicationConfig::replicant("local", ["h1"])
                .with_apply_failure_policy(FailurePolicy::AbortAndResync),
        );
        abort.prev = LogPosition::new(3, 100, 20);
        assert!(abort.apply_record(&record(3, 120, b"abc")).is_err());
        assert_eq!(abort.previous_applied(), LogPosition::new(3, 100, 20));
    }

    #[tokio::test]
    async fn test_resync_seeds_generation_and_position() {
        let store = Arc::new(MemoryLogStore::with_tail(LogPosition::new(2, 50, 10)));
        let donor = ScriptedDonor::new();
        donor.set_generation(7);
        let mut m = machine(&store, &donor);

        let point = m.resync().await.unwrap();

        assert_eq!(point.position, LogPosition::new(2, 50, 10));
        assert_eq!(m.expected_generation(), 7);
        assert_eq!(m.previous_applied(), LogPosition::new(2, 50, 10));
        assert_eq!(m.state(), SyncState::Steady);
        assert!(!m.resync_pending());
    }

    #[tokio::test]
    async fn test_resync_truncates_divergent_tail() {
        let store = Arc::new(MemoryLogStore::with_tail(LogPosition::new(2, 0, 10)));
        store.apply(Lsn::new(2, 10), 1, b"diverged").unwrap();
        let donor = ScriptedDonor::new();
        donor.push_handshake(TruncationPoint {
            position: LogPosition::new(2, 0, 10),
            generation: 3,
        });
        let mut m = machine(&store, &donor);

        m.resync().await.unwrap();

        assert_eq!(store.tail(), Some(LogPosition::new(2, 0, 10)));
        assert!(store.ops().contains(&LogOp::Truncate {
            lsn: Lsn::new(2, 0)
        }));
    }

    #[tokio::test]
    async fn test_failed_resync_stays_pending() {
        let store = Arc::new(MemoryLogStore::with_tail(LogPosition::new(1, 0, 4)));
        let donor = ScriptedDonor::new();
        donor.push_handshake_error("donor busy");
        let mut m = machine(&store, &donor);

        assert!(m.resync().await.is_err());
        assert!(m.resync_pending());
        assert_eq!(m.state(), SyncState::Truncating);

        // The retry happens before any poll.
        assert_eq!(m.step().await.unwrap(), StepOutcome::Resynced);
        assert!(donor.queries().is_empty());
        assert!(!m.resync_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bootstrap_waits_for_recovery() {
        let store = Arc::new(MemoryLogStore::with_tail(LogPosition::new(1, 0, 4)));
        store.set_ready(false);
        let donor = ScriptedDonor::new();
        let mut m = machine(&store, &donor);
        let cancel = CancellationToken::new();

        let waiter = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                store.set_ready(true);
            })
        };

        assert!(m.bootstrap(&cancel).await);
        waiter.await.unwrap();
        assert_eq!(m.state(), SyncState::Catchup);
        assert_eq!(donor.negotiations().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bootstrap_cancelled_while_waiting() {
        let store = Arc::new(MemoryLogStore::new());
        store.set_ready(false);
        let donor = ScriptedDonor::new();
        let mut m = machine(&store, &donor);
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(!m.bootstrap(&cancel).await);
        assert!(donor.negotiations().is_empty());
    }
}
