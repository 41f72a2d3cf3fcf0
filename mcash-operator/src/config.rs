//! Operator configuration.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use mcash_ledger::SequencerConfig;

const PORT_ENV: &str = "MCASH_PORT";
const SHADOW_DB_ENV: &str = "MCASH_SHADOW_DB";
const PROOF_TIMEOUT_ENV: &str = "MCASH_PROOF_TIMEOUT_MS";
const MAX_COMMIT_RETRIES_ENV: &str = "MCASH_MAX_COMMIT_RETRIES";
const QUEUE_CAPACITY_ENV: &str = "MCASH_QUEUE_CAPACITY";

const DEFAULT_PORT: u16 = 3010;

/// Operator configuration.
#[derive(Clone, Debug)]
pub struct OperatorConfig {
    /// HTTP listen port.
    pub port: u16,
    /// sled path for the shadow store; in-memory when unset.
    pub shadow_db: Option<PathBuf>,
    pub sequencer: SequencerConfig,
}

impl OperatorConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = SequencerConfig::default();

        let port: u16 = lookup(PORT_ENV)
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let shadow_db = lookup(SHADOW_DB_ENV)
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        let proof_timeout = lookup(PROOF_TIMEOUT_ENV)
            .and_then(|s| s.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.proof_timeout);

        let max_commit_retries: u32 = lookup(MAX_COMMIT_RETRIES_ENV)
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_commit_retries);

        let queue_capacity: usize = lookup(QUEUE_CAPACITY_ENV)
            .and_then(|s| s.parse().ok())
            .filter(|capacity| *capacity > 0)
            .unwrap_or(defaults.queue_capacity);

        Ok(Self {
            port,
            shadow_db,
            sequencer: SequencerConfig {
                proof_timeout,
                max_commit_retries,
                queue_capacity,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> OperatorConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        OperatorConfig::from_lookup(|key| vars.get(key).cloned()).unwrap()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config(&[]);
        assert_eq!(config.port, DEFAULT_PORT);
        assert!(config.shadow_db.is_none());
        assert_eq!(config.sequencer.proof_timeout, Duration::from_millis(30_000));
        assert_eq!(config.sequencer.max_commit_retries, 3);
        assert_eq!(config.sequencer.queue_capacity, 1024);
    }

    #[test]
    fn overrides_are_parsed() {
        let config = config(&[
            (PORT_ENV, "8080"),
            (SHADOW_DB_ENV, "/var/lib/mcash/shadow"),
            (PROOF_TIMEOUT_ENV, "500"),
            (MAX_COMMIT_RETRIES_ENV, "7"),
            (QUEUE_CAPACITY_ENV, "0"),
        ]);
        assert_eq!(config.port, 8080);
        assert_eq!(
            config.shadow_db,
            Some(PathBuf::from("/var/lib/mcash/shadow"))
        );
        assert_eq!(config.sequencer.proof_timeout, Duration::from_millis(500));
        assert_eq!(config.sequencer.max_commit_retries, 7);
        assert_eq!(config.sequencer.queue_capacity, 1024);
    }
}
