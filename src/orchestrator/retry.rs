//! Retry pacing: pre-flight jitter, short backoff, long block cooldown.
//!
//! All sleeps go through the `Sleeper` trait so tests can observe which
//! pacing path a failure took instead of waiting on real clocks.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use crate::config::Config;

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Pacing knobs for one consultation attempt sequence.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Generic attempt budget (block signals have their own).
    pub max_attempts: u32,
    /// Cooldowns tolerated before a block becomes terminal.
    pub max_block_cooldowns: u32,
    pub jitter_min: Duration,
    pub jitter_max: Duration,
    /// Base for the short randomized backoff between generic retries.
    pub backoff_base: Duration,
    /// Long fixed cooldown after a block signal: the whole session is
    /// likely flagged, so short backoffs buy nothing.
    pub block_cooldown: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            max_block_cooldowns: config.max_block_cooldowns,
            jitter_min: Duration::from_secs_f64(config.fetch_min_delay.max(0.0)),
            jitter_max: Duration::from_secs_f64(
                config.fetch_max_delay.max(config.fetch_min_delay).max(0.0),
            ),
            backoff_base: Duration::from_millis(1250),
            block_cooldown: Duration::from_secs(config.block_sleep_seconds),
        }
    }

    /// Random pre-flight delay, avoiding synchronized bursts across
    /// concurrently scheduled identifiers.
    pub fn jitter(&self) -> Duration {
        random_between(self.jitter_min, self.jitter_max)
    }

    /// Random short delay before a generic retry.
    pub fn backoff(&self) -> Duration {
        random_between(self.backoff_base, self.backoff_base * 2)
    }
}

fn random_between(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let span = (max - min).as_millis() as u64;
    let offset = rand::thread_rng().gen_range(0..=span);
    min + Duration::from_millis(offset)
}
