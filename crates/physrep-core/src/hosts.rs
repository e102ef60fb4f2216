//! Candidate donor hosts
//!
//! The registry is an ordered list: insertion order is the order in which
//! hosts are tried when a session is started. Entries are handed out by
//! value so callers never hold references into the registry.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A candidate donor host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostEntry {
    /// Host name used to open a direct connection
    pub hostname: String,
    /// Outcome of the last connection attempt
    pub reachable: bool,
    /// Time of the last successful connection
    pub last_contact: Option<DateTime<Utc>>,
}

impl HostEntry {
    fn new(hostname: String) -> Self {
        Self {
            hostname,
            reachable: true,
            last_contact: None,
        }
    }
}

/// Ordered set of candidate donor hosts
#[derive(Debug, Clone, Default)]
pub struct HostRegistry {
    hosts: Vec<HostEntry>,
}

impl HostRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a host. Uniqueness is the caller's responsibility (see
    /// [`HostRegistry::find`]).
    pub fn add(&mut self, hostname: impl Into<String>) {
        self.hosts.push(HostEntry::new(hostname.into()));
    }

    /// Remove the first entry with this hostname
    pub fn remove(&mut self, hostname: &str) -> Result<HostEntry> {
        let index = self
            .position(hostname)
            .ok_or_else(|| Error::HostNotFound(hostname.to_string()))?;
        Ok(self.hosts.remove(index))
    }

    /// Look up a host by name
    pub fn find(&self, hostname: &str) -> Option<HostEntry> {
        self.position(hostname).map(|i| self.hosts[i].clone())
    }

    /// Snapshot of all hosts in failover order
    pub fn all(&self) -> Vec<HostEntry> {
        self.hosts.clone()
    }

    /// Record a successful connection
    pub fn mark_reachable(&mut self, hostname: &str, at: DateTime<Utc>) {
        if let Some(i) = self.position(hostname) {
            let entry = &mut self.hosts[i];
            entry.reachable = true;
            entry.last_contact = Some(at);
        }
    }

    /// Record a failed connection
    pub fn mark_unreachable(&mut self, hostname: &str) {
        if let Some(i) = self.position(hostname) {
            self.hosts[i].reachable = false;
        }
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.hosts.clear();
    }

    /// Number of registered hosts
    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    /// Whether no host is registered
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    fn position(&self, hostname: &str) -> Option<usize> {
        self.hosts.iter().position(|h| h.hostname == hostname)
    }
}

impl<S: Into<String>> FromIterator<S> for HostRegistry {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut registry = Self::new();
        for host in iter {
            registry.add(host);
        }
        registry
    }
}
