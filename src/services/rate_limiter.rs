//! Fixed-window admission control for incoming requests.
//!
//! Three independent checks guard the upstream API:
//! - per client IP,
//! - per (client IP, access key) pair,
//! - key churn: how many distinct access keys one IP used in the window.
//!
//! Windows are fixed, not sliding: a bucket is reset wholesale the first time
//! it is touched at or after its `reset_at`, so bursts of up to twice the
//! nominal rate are possible across a window boundary.

use crate::services::cache::prune_bounded;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Bucket name used when the client address is loopback or unknown.
pub const UNKNOWN_CLIENT: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub window: Duration,
    pub per_ip: u32,
    pub per_key: u32,
    pub max_keys_per_ip: usize,
    pub max_entries: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            per_ip: 120,
            per_key: 60,
            max_keys_per_ip: 3,
            max_entries: 10_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitReason {
    PerIp,
    PerKey,
    KeyChurn,
}

impl LimitReason {
    pub fn as_str(self) -> &'static str {
        match self {
            LimitReason::PerIp => "per-ip",
            LimitReason::PerKey => "per-key",
            LimitReason::KeyChurn => "key-churn",
        }
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Limited {
        reason: LimitReason,
        retry_after: Duration,
    },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed)
    }
}

struct Counter {
    count: u32,
    reset_at: Instant,
}

struct KeyChurn {
    keys: HashSet<String>,
    reset_at: Instant,
}

/// Shared admission state; one instance serves every request in the process.
pub struct RateLimiter {
    config: RateLimitConfig,
    per_ip: Mutex<HashMap<String, Counter>>,
    per_key: Mutex<HashMap<String, Counter>>,
    churn: Mutex<HashMap<String, KeyChurn>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            per_ip: Mutex::new(HashMap::new()),
            per_key: Mutex::new(HashMap::new()),
            churn: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub fn admit(&self, client_ip: Option<&str>, access_key: &str) -> Admission {
        self.admit_at(client_ip, access_key, Instant::now())
    }

    /// Run all three checks and combine them.
    ///
    /// Every check mutates its bucket even when another one already
    /// rejected the request.
    pub fn admit_at(&self, client_ip: Option<&str>, access_key: &str, now: Instant) -> Admission {
        let ip = client_ip.unwrap_or(UNKNOWN_CLIENT);
        let checks = [
            (LimitReason::PerIp, self.check_ip(ip, now)),
            (LimitReason::PerKey, self.check_key(ip, access_key, now)),
            (LimitReason::KeyChurn, self.check_churn(ip, access_key, now)),
        ];

        let mut verdict = Admission::Allowed;
        for (reason, outcome) in checks {
            if let Some(retry_after) = outcome {
                verdict = match verdict {
                    Admission::Allowed => Admission::Limited {
                        reason,
                        retry_after,
                    },
                    Admission::Limited {
                        reason: first,
                        retry_after: waited,
                    } => Admission::Limited {
                        reason: first,
                        retry_after: waited.max(retry_after),
                    },
                };
            }
        }
        verdict
    }

    fn check_ip(&self, ip: &str, now: Instant) -> Option<Duration> {
        let mut buckets = self.per_ip.lock().unwrap_or_else(PoisonError::into_inner);
        self.bump(&mut buckets, ip, self.config.per_ip, now)
    }

    fn check_key(&self, ip: &str, access_key: &str, now: Instant) -> Option<Duration> {
        let bucket = format!("{ip}|{access_key}");
        let mut buckets = self.per_key.lock().unwrap_or_else(PoisonError::into_inner);
        self.bump(&mut buckets, &bucket, self.config.per_key, now)
    }

    /// Increment a counter bucket; returns the wait time when over `limit`.
    fn bump(
        &self,
        buckets: &mut HashMap<String, Counter>,
        bucket: &str,
        limit: u32,
        now: Instant,
    ) -> Option<Duration> {
        if !buckets.contains_key(bucket) && buckets.len() >= self.config.max_entries {
            prune_bounded(buckets, self.config.max_entries.saturating_sub(1), |counter| {
                now < counter.reset_at
            });
        }

        let window = self.config.window;
        let counter = buckets.entry(bucket.to_string()).or_insert(Counter {
            count: 0,
            reset_at: now + window,
        });
        if now >= counter.reset_at {
            counter.count = 0;
            counter.reset_at = now + window;
        }
        counter.count = counter.count.saturating_add(1);

        if counter.count > limit {
            Some(counter.reset_at.saturating_duration_since(now))
        } else {
            None
        }
    }

    fn check_churn(&self, ip: &str, access_key: &str, now: Instant) -> Option<Duration> {
        let mut trackers = self.churn.lock().unwrap_or_else(PoisonError::into_inner);
        if !trackers.contains_key(ip) && trackers.len() >= self.config.max_entries {
            prune_bounded(&mut trackers, self.config.max_entries.saturating_sub(1), |tracker| {
                now < tracker.reset_at
            });
        }

        let window = self.config.window;
        let tracker = trackers.entry(ip.to_string()).or_insert(KeyChurn {
            keys: HashSet::new(),
            reset_at: now + window,
        });
        if now >= tracker.reset_at {
            tracker.keys.clear();
            tracker.reset_at = now + window;
        }
        // Past the cap the IP is rejected anyway; the set stays at cap + 1.
        if tracker.keys.len() <= self.config.max_keys_per_ip {
            tracker.keys.insert(access_key.to_string());
        }

        if tracker.keys.len() > self.config.max_keys_per_ip {
            Some(tracker.reset_at.saturating_duration_since(now))
        } else {
            None
        }
    }

    #[cfg(test)]
    fn bucket_counts(&self) -> (usize, usize, usize) {
        (
            self.per_ip.lock().map(|m| m.len()).unwrap_or(0),
            self.per_key.lock().map(|m| m.len()).unwrap_or(0),
            self.churn.lock().map(|m| m.len()).unwrap_or(0),
        )
    }

    #[cfg(test)]
    fn tracked_keys(&self, ip: &str) -> usize {
        self.churn
            .lock()
            .map(|m| m.get(ip).map_or(0, |tracker| tracker.keys.len()))
            .unwrap_or(0)
    }
}
