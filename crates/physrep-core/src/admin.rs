//! Administrative surface
//!
//! Operator commands exposed to whatever front end embeds the replicant
//! (stored procedures, an HTTP endpoint, a CLI). Arguments arrive as text
//! the way an operator types them, and every failure comes back as an
//! [`Error`] whose message is meant to be shown verbatim.

use crate::lsn::Lsn;
use crate::session::ReplicationManager;
use crate::storage::LogStore;
use crate::{Error, Result};
use async_trait::async_trait;

const TRUNCATE_LOG_USAGE: &str = "Usage: truncate_log(\"{<file>:<offset>}\"). Input not valid.";
const APPLY_LOG_USAGE: &str = "Usage: apply_log(\"{<file>:<offset>}\", 'blob'). LSN not valid.";

/// Operator commands for a physical replicant
#[async_trait]
pub trait ReplicationAdmin {
    /// Register a donor candidate
    fn add_replicant_host(&mut self, hostname: &str) -> Result<()>;

    /// Unregister a donor candidate
    fn remove_replicant_host(&mut self, hostname: &str) -> Result<()>;

    /// Set the database name opened on donors
    fn set_donor_db(&mut self, name: &str) -> Result<()>;

    /// Start replicating; returns the chosen donor host
    async fn start_replication(&mut self) -> Result<String>;

    /// Stop replicating and wait for the loop to exit
    async fn stop_replication(&mut self) -> Result<()>;

    /// Truncate the local log to `{file:offset}`
    fn truncate_log(&mut self, lsn: &str) -> Result<()>;

    /// Truncate the local log to a point in time (epoch seconds)
    fn truncate_time(&mut self, timestamp: i64) -> Result<()>;

    /// Write one record, or a new-file marker, at `{file:offset}`
    fn apply_log(
        &mut self,
        lsn: &str,
        record_type: i64,
        payload: &[u8],
        new_file: bool,
    ) -> Result<()>;
}

impl ReplicationManager {
    fn require_replicant(&self) -> Result<()> {
        if self.config().physical_replicant {
            Ok(())
        } else {
            Err(Error::NotPhysicalReplicant)
        }
    }
}

#[async_trait]
impl ReplicationAdmin for ReplicationManager {
    fn add_replicant_host(&mut self, hostname: &str) -> Result<()> {
        ReplicationManager::add_replicant_host(self, hostname)
    }

    fn remove_replicant_host(&mut self, hostname: &str) -> Result<()> {
        ReplicationManager::remove_replicant_host(self, hostname).map(|_| ())
    }

    fn set_donor_db(&mut self, name: &str) -> Result<()> {
        ReplicationManager::set_donor_db(self, name)
    }

    async fn start_replication(&mut self) -> Result<String> {
        self.require_replicant()?;
        ReplicationManager::start_replication(self)
            .await?
            .ok_or(Error::NoDonorAvailable)
    }

    async fn stop_replication(&mut self) -> Result<()> {
        self.require_replicant()?;
        ReplicationManager::stop_replication(self).await
    }

    fn truncate_log(&mut self, lsn: &str) -> Result<()> {
        let lsn: Lsn = lsn.parse().map_err(|_| Error::usage(TRUNCATE_LOG_USAGE))?;
        truncate_to_lsn(self.store().as_ref(), lsn)
    }

    fn truncate_time(&mut self, timestamp: i64) -> Result<()> {
        truncate_to_time(self.store().as_ref(), timestamp)
    }

    fn apply_log(
        &mut self,
        lsn: &str,
        record_type: i64,
        payload: &[u8],
        new_file: bool,
    ) -> Result<()> {
        let lsn: Lsn = lsn.parse().map_err(|_| Error::usage(APPLY_LOG_USAGE))?;
        tracing::info!("applying log lsn {}", lsn);

        let result = if new_file {
            self.store().apply_new_file(lsn)
        } else {
            self.store().apply(lsn, record_type, payload)
        };
        result.map_err(|e| {
            tracing::error!("Manual apply at {} failed: {}", lsn, e);
            Error::usage("Log apply failed.")
        })
    }
}

/// Truncate `store` to `lsn` after checking it against the retained minimum
pub fn truncate_to_lsn(store: &dyn LogStore, lsn: Lsn) -> Result<()> {
    let floor = store.minimum_truncatable()?;
    if !floor.is_truncatable() {
        return Err(Error::NotTruncatable);
    }
    if lsn < floor.lsn {
        return Err(Error::BelowMinimumLsn { minimum: floor.lsn });
    }

    tracing::info!("truncating log from lsn {}", lsn);
    store.truncate(lsn).map_err(|e| match e {
        Error::TruncationNotPermitted => e,
        other => {
            tracing::error!("Truncate to {} failed: {}", lsn, other);
            Error::TruncateFailed { lsn }
        }
    })
}

/// Truncate `store` to `timestamp` after checking it against the retained
/// minimum
pub fn truncate_to_time(store: &dyn LogStore, timestamp: i64) -> Result<()> {
    let floor = store.minimum_truncatable()?;
    if timestamp < floor.timestamp {
        return Err(Error::BelowMinimumTimestamp {
            minimum: floor.timestamp,
        });
    }

    tracing::info!("Finding earliest log before stated time: {}", timestamp);
    store.truncate_to_time(timestamp).map_err(|e| match e {
        Error::TruncationNotPermitted => e,
        other => {
            tracing::error!("Truncate to time {} failed: {}", timestamp, other);
            Error::TruncateTimeFailed { timestamp }
        }
    })
}
