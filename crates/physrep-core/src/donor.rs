//! Donor query interface
//!
//! Donors expose their log as rows of a query rather than as a stream, so
//! the replicant asks for "everything after `{file:offset}`" on every poll.

use crate::lsn::{LogPosition, Lsn};
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Name of the donor's transaction log table
pub const TRANSACTION_LOG_TABLE: &str = "comdb2_transaction_logs";

/// A log row as returned by the donor, before decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DonorRow {
    /// LSN token, `{file:offset}`
    pub lsn: String,
    /// Record type tag
    pub record_type: i64,
    /// Generation of the master that wrote the record
    pub generation: u64,
    /// Commit time (epoch seconds)
    pub timestamp: i64,
    /// Raw log record
    pub payload: Bytes,
}

impl DonorRow {
    /// Build a row for the record at `lsn`
    pub fn new(lsn: Lsn, record_type: i64, generation: u64, payload: impl Into<Bytes>) -> Self {
        Self {
            lsn: lsn.to_string(),
            record_type,
            generation,
            timestamp: 0,
            payload: payload.into(),
        }
    }
}

/// Request for the donor log rows following a position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DonorQuery {
    /// Rows strictly after this LSN are wanted
    pub after: Lsn,
}

impl DonorQuery {
    /// Query for rows after `lsn`
    pub fn after(lsn: Lsn) -> Self {
        Self { after: lsn }
    }

    /// Query text sent to the donor
    pub fn sql(&self) -> String {
        format!("select * from {}('{}')", TRANSACTION_LOG_TABLE, self.after)
    }
}

/// Outcome of a successful donor query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchStatus {
    /// Rows in donor log order
    Rows(Vec<DonorRow>),
    /// The donor has nothing past the requested position
    Done,
}

impl FetchStatus {
    /// Whether no row was returned
    pub fn is_done(&self) -> bool {
        match self {
            FetchStatus::Rows(rows) => rows.is_empty(),
            FetchStatus::Done => true,
        }
    }

    /// The returned rows; none for [`FetchStatus::Done`]
    pub fn into_rows(self) -> Vec<DonorRow> {
        match self {
            FetchStatus::Rows(rows) => rows,
            FetchStatus::Done => Vec::new(),
        }
    }
}

/// Common position agreed with the donor by the truncation handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TruncationPoint {
    /// Last record both logs share
    pub position: LogPosition,
    /// Donor's current generation
    pub generation: u64,
}

/// Opens connections to donor hosts
#[async_trait]
pub trait DonorConnector: Send + Sync {
    /// Open a direct (not load-balanced) connection to `dbname` on `hostname`
    async fn connect(&self, hostname: &str, dbname: &str) -> Result<Box<dyn DonorConnection>>;
}

/// A live connection to one donor
#[async_trait]
pub trait DonorConnection: Send {
    /// Run a log query
    async fn run_query(&mut self, query: &DonorQuery) -> Result<FetchStatus>;

    /// Negotiate the last position both logs share, given the local tail
    async fn negotiate_truncation(&mut self, local: LogPosition) -> Result<TruncationPoint>;
}
