//! Replication configuration
//!
//! Loaded from a TOML file and/or environment variables.
//! Priority: environment variables > config file > defaults.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// What to do when a donor row cannot be decoded or applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Count and log the failure, then carry on with the next row
    #[default]
    SkipAndContinue,
    /// Abandon the rest of the batch and renegotiate a common position
    AbortAndResync,
}

/// Replication client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// Whether this node is configured as a physical replicant
    pub physical_replicant: bool,

    /// Database name to open on the donor hosts
    pub donor_db: String,

    /// Candidate donor hosts in failover order
    pub hosts: Vec<String>,

    /// Sleep between donor polls
    #[serde(with = "serde_millis")]
    pub poll_interval: Duration,

    /// Sleep between checks for local recovery completion
    #[serde(with = "serde_millis")]
    pub readiness_interval: Duration,

    /// Upper bound on a single donor round trip
    #[serde(with = "serde_millis")]
    pub query_timeout: Duration,

    /// Policy for rows whose LSN token does not parse
    pub decode_failure_policy: FailurePolicy,

    /// Policy for records the local log refuses
    pub apply_failure_policy: FailurePolicy,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            physical_replicant: false,
            donor_db: "local".to_string(),
            hosts: Vec::new(),
            poll_interval: Duration::from_secs(1),
            readiness_interval: Duration::from_secs(1),
            query_timeout: Duration::from_secs(30),
            decode_failure_policy: FailurePolicy::SkipAndContinue,
            apply_failure_policy: FailurePolicy::SkipAndContinue,
        }
    }
}

impl ReplicationConfig {
    /// Create a replicant configuration pulling `donor_db` from `hosts`
    pub fn replicant<I, S>(donor_db: impl Into<String>, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            physical_replicant: true,
            donor_db: donor_db.into(),
            hosts: hosts.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Set the poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the readiness check interval
    pub fn with_readiness_interval(mut self, interval: Duration) -> Self {
        self.readiness_interval = interval;
        self
    }

    /// Set the donor query timeout
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// Set the decode failure policy
    pub fn with_decode_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.decode_failure_policy = policy;
        self
    }

    /// Set the apply failure policy
    pub fn with_apply_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.apply_failure_policy = policy;
        self
    }

    /// Parse a TOML document
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| Error::config(format!("invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&content)?;
        tracing::info!("Loaded replication configuration from {:?}", path);
        Ok(config)
    }

    /// Load from `PHYSREP_CONFIG` (if set) and apply environment overrides
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var("PHYSREP_CONFIG") {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };

        if let Ok(replicant) = std::env::var("PHYSREP_PHYSICAL_REPLICANT") {
            config.physical_replicant = replicant
                .parse::<bool>()
                .unwrap_or(config.physical_replicant);
        }

        if let Ok(donor_db) = std::env::var("PHYSREP_DONOR_DB") {
            config.donor_db = donor_db;
        }

        if let Ok(hosts) = std::env::var("PHYSREP_HOSTS") {
            config.hosts = hosts
                .split(',')
                .map(str::trim)
                .filter(|h| !h.is_empty())
                .map(String::from)
                .collect();
        }

        if let Some(ms) = env_millis("PHYSREP_POLL_INTERVAL_MS") {
            config.poll_interval = ms;
        }

        if let Some(ms) = env_millis("PHYSREP_QUERY_TIMEOUT_MS") {
            config.query_timeout = ms;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.donor_db.trim().is_empty() {
            return Err(Error::config("donor_db must not be empty"));
        }
        if self.poll_interval.is_zero() {
            return Err(Error::config("poll_interval must be greater than zero"));
        }
        if self.readiness_interval.is_zero() {
            return Err(Error::config("readiness_interval must be greater than zero"));
        }
        if self.query_timeout.is_zero() {
            return Err(Error::config("query_timeout must be greater than zero"));
        }
        Ok(())
    }
}

fn env_millis(key: &str) -> Option<Duration> {
    let raw = std::env::var(key).ok()?;
    match raw.parse::<u64>() {
        Ok(ms) => Some(Duration::from_millis(ms)),
        Err(_) => {
            tracing::warn!("Ignoring {}={:?}: not a number of milliseconds", key, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = ReplicationConfig::default();
        assert!(!config.physical_replicant);
        assert_eq!(config.donor_db, "local");
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.decode_failure_policy, FailurePolicy::SkipAndContinue);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_replicant_config() {
        let config = ReplicationConfig::replicant("mydb", ["h1", "h2"])
            .with_poll_interval(Duration::from_millis(250))
            .with_apply_failure_policy(FailurePolicy::AbortAndResync);
        assert!(config.physical_replicant);
        assert_eq!(config.hosts, vec!["h1", "h2"]);
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.apply_failure_policy, FailurePolicy::AbortAndResync);
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let config = ReplicationConfig::default().with_poll_interval(Duration::ZERO);
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = ReplicationConfig::default();
        config.donor_db = "  ".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_toml() {
        let config = ReplicationConfig::from_toml(
            r#"
            physical_replicant = true
            donor_db = "prod"
            hosts = ["db1", "db2"]
            poll_interval = 500
            decode_failure_policy = "abort_and_resync"
            "#,
        )
        .unwrap();
        assert!(config.physical_replicant);
        assert_eq!(config.donor_db, "prod");
        assert_eq!(config.hosts, vec!["db1", "db2"]);
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert_eq!(config.query_timeout, Duration::from_secs(30));
        assert_eq!(config.decode_failure_policy, FailurePolicy::AbortAndResync);
    }

    #[test]
    fn test_from_toml_invalid() {
        assert!(ReplicationConfig::from_toml("poll_interval = \"soon\"").is_err());
        assert!(ReplicationConfig::from_toml("poll_interval = 0").is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "donor_db = \"filedb\"\nhosts = [\"a\"]").unwrap();

        let config = ReplicationConfig::from_file(file.path()).unwrap();
        assert_eq!(config.donor_db, "filedb");
        assert_eq!(config.hosts, vec!["a"]);
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "donor_db = \"filedb\"\npoll_interval = 2000").unwrap();

        // SAFETY: serialized with the other env tests; no other thread reads these keys.
        unsafe {
            std::env::set_var("PHYSREP_CONFIG", file.path());
            std::env::set_var("PHYSREP_DONOR_DB", "envdb");
            std::env::set_var("PHYSREP_HOSTS", "h1, h2,,h3");
            std::env::set_var("PHYSREP_PHYSICAL_REPLICANT", "true");
            std::env::set_var("PHYSREP_QUERY_TIMEOUT_MS", "not-a-number");
        }

        let config = ReplicationConfig::from_env().unwrap();

        unsafe {
            for key in [
                "PHYSREP_CONFIG",
                "PHYSREP_DONOR_DB",
                "PHYSREP_HOSTS",
                "PHYSREP_PHYSICAL_REPLICANT",
                "PHYSREP_QUERY_TIMEOUT_MS",
            ] {
                std::env::remove_var(key);
            }
        }

        assert_eq!(config.donor_db, "envdb");
        assert_eq!(config.hosts, vec!["h1", "h2", "h3"]);
        assert!(config.physical_replicant);
        assert_eq!(config.poll_interval, Duration::from_millis(2000));
        assert_eq!(config.query_timeout, Duration::from_secs(30));
    }
}
