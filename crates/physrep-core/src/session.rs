//! Replication session management
//!
//! [`ReplicationManager`] owns the host registry, the donor connector, the
//! local store handle and at most one active [`ReplicationSession`]. All
//! mutation goes through `&mut self`, so callers serialize administrative
//! calls and no internal locking is needed.

use crate::config::ReplicationConfig;
use crate::donor::DonorConnector;
use crate::hosts::{HostEntry, HostRegistry};
use crate::storage::LogStore;
use crate::sync::{ReplicationStats, SharedStats, SyncMachine, SyncState};
use crate::{Error, Result};
use chrono::Utc;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// The live donor session and its background task
pub struct ReplicationSession {
    id: String,
    hostname: String,
    dbname: String,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl ReplicationSession {
    /// Session identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Donor host
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Donor database name
    pub fn dbname(&self) -> &str {
        &self.dbname
    }

    /// Whether the background task has exited, either stopped or halted on
    /// a failure it could not retry
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Owns replication state for one local log
pub struct ReplicationManager {
    config: ReplicationConfig,
    registry: HostRegistry,
    connector: Arc<dyn DonorConnector>,
    store: Arc<dyn LogStore>,
    session: Option<ReplicationSession>,
    stats: SharedStats,
}

impl ReplicationManager {
    /// Create a manager; hosts listed in `config` seed the registry
    pub fn new(
        config: ReplicationConfig,
        connector: Arc<dyn DonorConnector>,
        store: Arc<dyn LogStore>,
    ) -> Result<Self> {
        config.validate()?;
        let registry: HostRegistry = config.hosts.iter().cloned().collect();
        Ok(Self {
            config,
            registry,
            connector,
            store,
            session: None,
            stats: SharedStats::default(),
        })
    }

    /// Current configuration
    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    /// Local log handle
    pub fn store(&self) -> &Arc<dyn LogStore> {
        &self.store
    }

    /// Change the donor database name used by the next session
    pub fn set_donor_db(&mut self, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::config("donor_db must not be empty"));
        }
        self.config.donor_db = name;
        Ok(())
    }

    /// Register a candidate donor host
    pub fn add_replicant_host(&mut self, hostname: impl Into<String>) -> Result<()> {
        let hostname = hostname.into();
        if self.registry.find(&hostname).is_some() {
            return Err(Error::DuplicateHost(hostname));
        }
        tracing::info!("Added replicant host {}", hostname);
        self.registry.add(hostname);
        Ok(())
    }

    /// Unregister a candidate donor host
    pub fn remove_replicant_host(&mut self, hostname: &str) -> Result<HostEntry> {
        let entry = self.registry.remove(hostname)?;
        tracing::info!("Removed replicant host {}", hostname);
        Ok(entry)
    }

    /// Registered hosts in failover order
    pub fn hosts(&self) -> Vec<HostEntry> {
        self.registry.all()
    }

    /// Whether a session is active
    pub fn is_replicating(&self) -> bool {
        self.session.is_some()
    }

    /// Host of the active session
    pub fn active_host(&self) -> Option<&str> {
        self.session.as_ref().map(ReplicationSession::hostname)
    }

    /// The active session
    pub fn session(&self) -> Option<&ReplicationSession> {
        self.session.as_ref()
    }

    /// Snapshot of the session statistics
    pub fn stats(&self) -> ReplicationStats {
        self.stats.lock().clone()
    }

    /// Connect to the first reachable host and start the sync loop.
    ///
    /// Hosts are tried in registry order. Returns the chosen host, or
    /// `None` when every host refused. A session whose loop already halted
    /// is replaced.
    pub async fn start_replication(&mut self) -> Result<Option<String>> {
        match &self.session {
            Some(session) if session.is_finished() => {
                tracing::info!(
                    "Replacing halted replication session from {}",
                    session.hostname
                );
                self.stop_replication().await?;
            }
            Some(_) => return Err(Error::AlreadyReplicating),
            None => {}
        }

        let dbname = self.config.donor_db.clone();
        for host in self.registry.all() {
            let connection = match self.connector.connect(&host.hostname, &dbname).await {
                Ok(connection) => connection,
                Err(e) => {
                    tracing::warn!("Couldn't attach to {} for replication: {}", host.hostname, e);
                    self.registry.mark_unreachable(&host.hostname);
                    continue;
                }
            };

            self.registry.mark_reachable(&host.hostname, Utc::now());
            tracing::info!("Attached to {} for replication", host.hostname);

            let id = Uuid::new_v4().to_string();
            {
                let mut stats = self.stats.lock();
                *stats = ReplicationStats::default();
                stats.donor = Some(host.hostname.clone());
                stats.session_id = Some(id.clone());
            }

            let machine = SyncMachine::new(Arc::clone(&self.store), connection, self.config.clone())
                .with_stats(Arc::clone(&self.stats));
            let cancel = CancellationToken::new();
            let handle = tokio::spawn(machine.run(cancel.clone()));

            self.session = Some(ReplicationSession {
                id,
                hostname: host.hostname.clone(),
                dbname: dbname.clone(),
                cancel,
                handle,
            });
            return Ok(Some(host.hostname));
        }

        tracing::error!("Couldn't find any remote dbs to connect to");
        Ok(None)
    }

    /// Signal the sync loop to stop and wait for it to exit
    pub async fn stop_replication(&mut self) -> Result<()> {
        let session = self.session.take().ok_or(Error::NotReplicating)?;
        tracing::info!("Stopping replication from {}", session.hostname);

        session.cancel.cancel();
        if let Err(e) = session.handle.await {
            tracing::error!("Replication task for {} failed: {}", session.hostname, e);
            self.stats.lock().state = SyncState::Stopped;
            return Err(Error::StopFailed);
        }
        Ok(())
    }

    /// Stop any session and drop every registered host
    pub async fn cleanup(&mut self) -> Result<()> {
        let stopped = match self.session {
            Some(_) => self.stop_replication().await,
            None => Ok(()),
        };
        self.registry.clear();
        stopped
    }
}
