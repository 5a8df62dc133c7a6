//! Informer configuration

use crate::backoff::BackoffConfig;
use crate::{Error, Result};
use serde::Deserialize;
use std::time::Duration;

/// Tuning knobs for a shared informer.
///
/// Can be built in code or loaded from YAML:
///
/// ```
/// use kube_shared_informer::InformerConfig;
///
/// let config = InformerConfig::from_yaml_str(
///     "resyncPeriod: 60\nbackoff:\n  initialDelay: 0.5\n  maxDelay: 10\n",
/// )
/// .unwrap();
/// assert_eq!(config.resync_period.as_secs(), 60);
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InformerConfig {
    /// Period between resync notifications; zero disables resync
    #[serde(with = "duration_secs")]
    pub resync_period: Duration,
    /// Client-side bound on a single List call
    #[serde(with = "duration_secs")]
    pub list_timeout: Duration,
    /// Server-side timeout requested for each Watch
    #[serde(with = "duration_secs")]
    pub watch_timeout: Duration,
    pub backoff: BackoffConfig,
    pub allow_bookmarks: bool,
}

impl Default for InformerConfig {
    fn default() -> Self {
        Self {
            resync_period: Duration::from_secs(300),
            list_timeout: Duration::from_secs(60),
            watch_timeout: Duration::from_secs(290),
            backoff: BackoffConfig::default(),
            allow_bookmarks: true,
        }
    }
}

impl InformerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| Error::Config(format!("Failed to parse informer config: {}", e)))?;
        config.backoff.validate()?;
        Ok(config)
    }

    pub fn with_resync_period(mut self, period: Duration) -> Self {
        self.resync_period = period;
        self
    }

    pub fn without_resync(self) -> Self {
        self.with_resync_period(Duration::ZERO)
    }

    pub fn with_list_timeout(mut self, timeout: Duration) -> Self {
        self.list_timeout = timeout;
        self
    }

    pub fn with_watch_timeout(mut self, timeout: Duration) -> Self {
        self.watch_timeout = timeout;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_bookmarks(mut self, allow: bool) -> Self {
        self.allow_bookmarks = allow;
        self
    }
}

/// (De)serialize a `Duration` as fractional seconds.
pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
