//! physrep - Physical log replication client
//!
//! Keeps a replicant node's transaction log in sync with a donor node by
//! polling the donor's log through a query interface and replaying each
//! record into the local log:
//! - Ordered donor host list with failover on connect
//! - Position (LSN) tracking of the local log tail
//! - Generation tracking to detect a change of master on the donor
//! - Truncation handshake to fall back to a common ancestor position
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐  start/stop   ┌──────────────────────┐
//! │  ReplicationAdmin    │ ────────────► │ ReplicationManager   │
//! │  (operator surface)  │               │  HostRegistry        │
//! └──────────────────────┘               └──────────┬───────────┘
//!                                                   │ spawns
//!                                        ┌──────────▼───────────┐
//!   DonorConnection ◄── query {f:o} ──── │     SyncMachine      │
//!        rows ─────── RecordDecoder ───► │  apply / truncate    │
//!                                        └──────────┬───────────┘
//!                                                   │
//!                                        ┌──────────▼───────────┐
//!                                        │  LogStore (local)    │
//!                                        └──────────────────────┘
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod admin;
pub mod config;
pub mod decoder;
pub mod donor;
pub mod error;
pub mod hosts;
pub mod lsn;
pub mod session;
pub mod storage;
pub mod sync;
pub mod testing;
pub mod tracker;

pub use admin::ReplicationAdmin;
pub use config::{FailurePolicy, ReplicationConfig};
pub use decoder::{DonorRecord, RecordDecoder};
pub use donor::{
    DonorConnection, DonorConnector, DonorQuery, DonorRow, FetchStatus, TruncationPoint,
};
pub use error::{Error, Result};
pub use hosts::{HostEntry, HostRegistry};
pub use lsn::{LogPosition, Lsn};
pub use session::{ReplicationManager, ReplicationSession};
pub use storage::{LogStore, TruncationFloor};
pub use sync::{ReplicationStats, StepOutcome, SyncMachine, SyncState};
pub use tracker::PositionTracker;
