//! Worker configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for one worker process.
///
/// Loadable from a YAML file; every field has a default so a bare worker
/// runs with no config at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Name used in logs; useful when several workers share a store.
    pub name: String,
    /// Seconds between claim attempts. One task is processed per tick.
    pub poll_interval_secs: u64,
    /// Age after which a `Processing` task is considered abandoned by a
    /// dead worker and returned to the eligible pool.
    pub stale_after_secs: u64,
    /// Seconds between stale-task reclaim sweeps.
    pub reclaim_interval_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: "mailspool-worker".to_string(),
            poll_interval_secs: 5,
            stale_after_secs: 600,
            reclaim_interval_secs: 60,
        }
    }
}

impl WorkerConfig {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn reclaim_interval(&self) -> Duration {
        Duration::from_secs(self.reclaim_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = WorkerConfig::default();
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.stale_after(), Duration::from_secs(600));
    }

    #[test]
    fn partial_yaml_falls_back_to_defaults() {
        let config: WorkerConfig = serde_yaml::from_str("poll_interval_secs: 1\n").unwrap();
        assert_eq!(config.poll_interval_secs, 1);
        assert_eq!(config.name, "mailspool-worker");
        assert_eq!(config.reclaim_interval_secs, 60);
    }
}
