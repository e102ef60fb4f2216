//! Scripted donor transport

use crate::donor::{
    DonorConnection, DonorConnector, DonorQuery, DonorRow, FetchStatus, TruncationPoint,
};
use crate::lsn::LogPosition;
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

#[derive(Default)]
struct Script {
    unreachable: HashSet<String>,
    attempts: Vec<String>,
    connections: Vec<(String, String)>,
    batches: VecDeque<Result<FetchStatus>>,
    handshakes: VecDeque<Result<TruncationPoint>>,
    queries: Vec<DonorQuery>,
    negotiations: Vec<LogPosition>,
    generation: u64,
}

/// Donor transport that replays queued responses.
///
/// Once the queues run dry, queries answer [`FetchStatus::Done`] and the
/// handshake agrees with whatever local position it is given, at the
/// current generation.
#[derive(Clone, Default)]
pub struct ScriptedDonor {
    script: Arc<Mutex<Script>>,
}

impl ScriptedDonor {
    /// A donor where every host accepts connections
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse connections to `hostname`
    pub fn set_unreachable(&self, hostname: &str) {
        self.script.lock().unreachable.insert(hostname.to_string());
    }

    /// Generation reported by default handshakes
    pub fn set_generation(&self, generation: u64) {
        self.script.lock().generation = generation;
    }

    /// Queue a batch of rows
    pub fn push_rows(&self, rows: Vec<DonorRow>) {
        self.script
            .lock()
            .batches
            .push_back(Ok(FetchStatus::Rows(rows)));
    }

    /// Queue a "no more rows" answer
    pub fn push_done(&self) {
        self.script.lock().batches.push_back(Ok(FetchStatus::Done));
    }

    /// Queue a failing query
    pub fn push_query_error(&self, msg: &str) {
        self.script
            .lock()
            .batches
            .push_back(Err(Error::query(msg)));
    }

    /// Queue a handshake answer
    pub fn push_handshake(&self, point: TruncationPoint) {
        self.script.lock().handshakes.push_back(Ok(point));
    }

    /// Queue a handshake the donor fails to answer
    pub fn push_handshake_error(&self, msg: &str) {
        self.script
            .lock()
            .handshakes
            .push_back(Err(Error::query(msg)));
    }

    /// Hosts tried, in order
    pub fn attempts(&self) -> Vec<String> {
        self.script.lock().attempts.clone()
    }

    /// Successful `(host, db)` connections
    pub fn connections(&self) -> Vec<(String, String)> {
        self.script.lock().connections.clone()
    }

    /// Queries issued, in order
    pub fn queries(&self) -> Vec<DonorQuery> {
        self.script.lock().queries.clone()
    }

    /// Local positions sent to the handshake, in order
    pub fn negotiations(&self) -> Vec<LogPosition> {
        self.script.lock().negotiations.clone()
    }

    /// Open a connection without going through [`DonorConnector`]
    pub fn connection(&self) -> ScriptedConnection {
        ScriptedConnection {
            script: Arc::clone(&self.script),
        }
    }
}

#[async_trait]
impl DonorConnector for ScriptedDonor {
    async fn connect(&self, hostname: &str, dbname: &str) -> Result<Box<dyn DonorConnection>> {
        {
            let mut script = self.script.lock();
            script.attempts.push(hostname.to_string());
            if script.unreachable.contains(hostname) {
                return Err(Error::connection(hostname, "connection refused"));
            }
            script
                .connections
                .push((hostname.to_string(), dbname.to_string()));
        }
        Ok(Box::new(self.connection()))
    }
}

/// Connection handed out by [`ScriptedDonor`]
pub struct ScriptedConnection {
    script: Arc<Mutex<Script>>,
}

#[async_trait]
impl DonorConnection for ScriptedConnection {
    async fn run_query(&mut self, query: &DonorQuery) -> Result<FetchStatus> {
        let mut script = self.script.lock();
        script.queries.push(*query);
        script
            .batches
            .pop_front()
            .unwrap_or(Ok(FetchStatus::Done))
    }

    async fn negotiate_truncation(&mut self, local: LogPosition) -> Result<TruncationPoint> {
        let mut script = self.script.lock();
        script.negotiations.push(local);
        let generation = script.generation;
        script.handshakes.pop_front().unwrap_or(Ok(TruncationPoint {
            position: local,
            generation,
        }))
    }
}
