//! In-memory collaborators
//!
//! [`MemoryLogStore`] stands in for the local log storage engine and
//! [`ScriptedDonor`] for the donor query transport. Both record every call
//! so replication behaviour can be asserted without a real database.
//!
//! # Usage
//!
//! ```rust,no_run
//! use physrep_core::lsn::LogPosition;
//! use physrep_core::testing::{MemoryLogStore, ScriptedDonor};
//!
//! let store = MemoryLogStore::with_tail(LogPosition::new(3, 100, 20));
//! let donor = ScriptedDonor::new();
//! donor.set_unreachable("h1");
//! ```

mod memory;
mod scripted;

pub use memory::{LogOp, MemoryLogStore};
pub use scripted::{ScriptedConnection, ScriptedDonor};
