//! Exponential backoff with jitter for reconnecting list/watch loops

use rand::Rng;
use serde::Deserialize;
use std::time::Duration;

use crate::config::duration_secs;
use crate::{Error, Result};

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackoffConfig {
    /// Delay after the first failure
    #[serde(with = "duration_secs")]
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    #[serde(with = "duration_secs")]
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Fraction of the delay randomized in either direction (0.0 disables jitter)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(800),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.5,
        }
    }
}

impl BackoffConfig {
    /// Reject settings that would shrink delays or produce negative ones.
    pub fn validate(&self) -> Result<()> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(Error::Config(format!(
                "backoff multiplier must be a finite number >= 1.0, got {}",
                self.multiplier
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(Error::Config(format!(
                "backoff jitter must be within 0.0..=1.0, got {}",
                self.jitter
            )));
        }
        if self.initial_delay > self.max_delay {
            return Err(Error::Config(format!(
                "backoff initialDelay {:?} exceeds maxDelay {:?}",
                self.initial_delay, self.max_delay
            )));
        }
        Ok(())
    }
}

/// Stateful delay generator; call [`Backoff::reset`] after a healthy cycle.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    current: Duration,
    attempts: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            current: config.initial_delay,
            config,
            attempts: 0,
        }
    }

    /// Number of delays handed out since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn reset(&mut self) {
        self.current = self.config.initial_delay;
        self.attempts = 0;
    }

    pub fn next_delay(&mut self) -> Duration {
        self.attempts += 1;
        let max = self.config.max_delay;
        let base = self.current.min(max);

        let jitter = self.config.jitter.clamp(0.0, 1.0);
        let delay = if jitter > 0.0 {
            let factor = rand::rng().random_range((1.0 - jitter)..(1.0 + jitter));
            Duration::try_from_secs_f64(base.as_secs_f64() * factor).unwrap_or(max)
        } else {
            base
        };

        // Configs built in code skip validation; never let the delay shrink.
        let multiplier = if self.config.multiplier.is_finite() {
            self.config.multiplier.max(1.0)
        } else {
            1.0
        };
        self.current = Duration::try_from_secs_f64(self.current.as_secs_f64() * multiplier)
            .unwrap_or(max)
            .min(max);

        delay.min(max)
    }
}
