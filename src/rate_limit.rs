//! Sliding-window request counting per credential.
//!
//! Each credential owns a table of per-minute buckets over a rolling window.
//! A request purges buckets older than the window, sums the remainder, and is
//! rejected before any further work when the sum has reached the quota;
//! otherwise the current-minute bucket is incremented. The whole
//! read-purge-increment sequence runs under one lock, so racing requests for
//! the same credential never lose updates.

use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use crate::error::{Error, Result};

#[derive(Debug)]
pub struct SlidingWindowLimiter {
    window: Duration,
    buckets: Mutex<HashMap<String, BTreeMap<i64, u32>>>,
}

impl SlidingWindowLimiter {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Count the current request against `key`'s quota.
    ///
    /// # Errors
    /// [`Error::RateLimited`] when the window is exhausted; the request is
    /// not counted in that case.
    pub fn check(&self, key: &str, quota: u32) -> Result<()> {
        self.check_at(key, quota, Utc::now())
    }

    /// Clock-injected variant of [`Self::check`].
    pub fn check_at(&self, key: &str, quota: u32, now: DateTime<Utc>) -> Result<()> {
        let minute = now.timestamp().div_euclid(60);
        let window_minutes = self.window.num_minutes();
        let mut tables = self.buckets.lock().map_err(|_| Error::StoreUnavailable)?;
        let table = tables.entry(key.to_string()).or_default();

        table.retain(|&bucket_minute, _| bucket_minute + window_minutes > minute);
        let used: u32 = table.values().sum();
        if used >= quota {
            return Err(Error::RateLimited);
        }
        *table.entry(minute).or_insert(0) += 1;
        Ok(())
    }

    /// Requests left in `key`'s window, without consuming one.
    #[must_use]
    pub fn remaining(&self, key: &str, quota: u32) -> u32 {
        self.remaining_at(key, quota, Utc::now())
    }

    #[must_use]
    pub fn remaining_at(&self, key: &str, quota: u32, now: DateTime<Utc>) -> u32 {
        let minute = now.timestamp().div_euclid(60);
        let window_minutes = self.window.num_minutes();
        let Ok(tables) = self.buckets.lock() else {
            return 0;
        };
        let used: u32 = tables
            .get(key)
            .map(|table| {
                table
                    .iter()
                    .filter(|(&bucket_minute, _)| bucket_minute + window_minutes > minute)
                    .map(|(_, count)| count)
                    .sum()
            })
            .unwrap_or(0);
        quota.saturating_sub(used)
    }

    /// Drop per-key tables with no in-window buckets. Called periodically to
    /// bound memory.
    pub fn cleanup(&self) {
        self.cleanup_at(Utc::now());
    }

    pub fn cleanup_at(&self, now: DateTime<Utc>) {
        let minute = now.timestamp().div_euclid(60);
        let window_minutes = self.window.num_minutes();
        if let Ok(mut tables) = self.buckets.lock() {
            tables.retain(|_, table| {
                table.retain(|&bucket_minute, _| bucket_minute + window_minutes > minute);
                !table.is_empty()
            });
        }
    }

    /// Forget a key entirely (used when a credential is revoked).
    pub fn reset(&self, key: &str) {
        if let Ok(mut tables) = self.buckets.lock() {
            tables.remove(key);
        }
    }
}
