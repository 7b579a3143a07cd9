//! Per-provider health tracking
//!
//! Counts consecutive failures per provider identity and takes providers
//! out of rotation once a threshold is hit, until a cooldown passes, a
//! success lands through some other path, or the error goes stale.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde::Serialize;
use switchboard_config::Settings;

/// Health transition thresholds, derived from settings per snapshot
#[derive(Debug, Clone, Copy)]
pub struct HealthPolicy {
    /// Consecutive errors before a provider turns unhealthy
    pub unhealthy_threshold: u32,
    /// Seconds an unhealthy provider stays out of rotation
    pub failure_cooldown: u64,
    /// Seconds since the last error after which a provider heals on its own
    pub unhealthy_reset_timeout: u64,
    /// Whether a success resets the consecutive error counter
    pub reset_on_success: bool,
}

impl From<&Settings> for HealthPolicy {
    fn from(settings: &Settings) -> Self {
        Self {
            unhealthy_threshold: settings.unhealthy_threshold,
            failure_cooldown: settings.failure_cooldown,
            unhealthy_reset_timeout: settings.unhealthy_reset_timeout,
            reset_on_success: settings.unhealthy_reset_on_success,
        }
    }
}

/// Observable health state of a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    /// In rotation
    Healthy,
    /// Out of rotation until cooldown or recovery
    Unhealthy,
}

/// Per-provider counters; timestamps are unix seconds, 0 = never
struct ProviderHealth {
    consecutive_errors: AtomicU32,
    last_error_at: AtomicU64,
    last_success_at: AtomicU64,
    cooldown_until: AtomicU64,
    unhealthy: AtomicBool,
}

impl ProviderHealth {
    fn new() -> Self {
        Self {
            consecutive_errors: AtomicU32::new(0),
            last_error_at: AtomicU64::new(0),
            last_success_at: AtomicU64::new(0),
            cooldown_until: AtomicU64::new(0),
            unhealthy: AtomicBool::new(false),
        }
    }
}

/// Serializable view of one provider's health, for diagnostics
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    /// Current state
    pub state: HealthState,
    /// Consecutive error count
    pub consecutive_errors: u32,
    /// Last failure time (unix seconds, 0 = never)
    pub last_error_at: u64,
    /// Last success time (unix seconds, 0 = never)
    pub last_success_at: u64,
    /// Cooldown deadline (unix seconds, 0 = none)
    pub cooldown_until: u64,
}

/// Tracks health for every provider identity
pub struct HealthTracker {
    providers: DashMap<String, ProviderHealth>,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self {
            providers: DashMap::new(),
        }
    }

    /// Whether a provider may be selected right now
    ///
    /// Unhealthy providers come back when the cooldown passes or when the
    /// last error is older than the reset timeout (self-heal).
    pub fn is_eligible(&self, identity: &str, policy: &HealthPolicy) -> bool {
        let Some(health) = self.providers.get(identity) else {
            return true;
        };

        if !health.unhealthy.load(Ordering::Relaxed) {
            return true;
        }

        let now = now_secs();

        // Stale error: heal without waiting for a success
        let last_error = health.last_error_at.load(Ordering::Relaxed);
        if last_error > 0 && now.saturating_sub(last_error) >= policy.unhealthy_reset_timeout {
            health.unhealthy.store(false, Ordering::Relaxed);
            health.consecutive_errors.store(0, Ordering::Relaxed);
            health.cooldown_until.store(0, Ordering::Relaxed);
            tracing::info!(provider = identity, "provider healed after reset timeout");
            return true;
        }

        now >= health.cooldown_until.load(Ordering::Relaxed)
    }

    /// Current state of a provider
    pub fn state(&self, identity: &str) -> HealthState {
        let unhealthy = self
            .providers
            .get(identity)
            .is_some_and(|h| h.unhealthy.load(Ordering::Relaxed));
        if unhealthy { HealthState::Unhealthy } else { HealthState::Healthy }
    }

    /// Record a health-counting failure against a provider
    pub fn record_failure(&self, identity: &str, policy: &HealthPolicy) {
        let health = self
            .providers
            .entry(identity.to_owned())
            .or_insert_with(ProviderHealth::new);

        let now = now_secs();
        health.last_error_at.store(now, Ordering::Relaxed);
        let count = health.consecutive_errors.fetch_add(1, Ordering::Relaxed) + 1;

        if count >= policy.unhealthy_threshold && !health.unhealthy.swap(true, Ordering::Relaxed) {
            health
                .cooldown_until
                .store(now + policy.failure_cooldown, Ordering::Relaxed);
            drop(health);
            tracing::warn!(
                provider = identity,
                consecutive_errors = count,
                cooldown_secs = policy.failure_cooldown,
                "provider marked unhealthy"
            );
        }
    }

    /// Record a successful response from a provider
    pub fn record_success(&self, identity: &str, policy: &HealthPolicy) {
        let health = self
            .providers
            .entry(identity.to_owned())
            .or_insert_with(ProviderHealth::new);

        health.last_success_at.store(now_secs(), Ordering::Relaxed);
        if policy.reset_on_success {
            health.consecutive_errors.store(0, Ordering::Relaxed);
        }
        if health.unhealthy.swap(false, Ordering::Relaxed) {
            health.cooldown_until.store(0, Ordering::Relaxed);
            tracing::info!(provider = identity, "provider healthy again after success");
        }
    }

    /// Health fields for one provider, for the diagnostics endpoint
    pub fn snapshot(&self, identity: &str) -> HealthSnapshot {
        self.providers.get(identity).map_or(
            HealthSnapshot {
                state: HealthState::Healthy,
                consecutive_errors: 0,
                last_error_at: 0,
                last_success_at: 0,
                cooldown_until: 0,
            },
            |h| HealthSnapshot {
                state: if h.unhealthy.load(Ordering::Relaxed) {
                    HealthState::Unhealthy
                } else {
                    HealthState::Healthy
                },
                consecutive_errors: h.consecutive_errors.load(Ordering::Relaxed),
                last_error_at: h.last_error_at.load(Ordering::Relaxed),
                last_success_at: h.last_success_at.load(Ordering::Relaxed),
                cooldown_until: h.cooldown_until.load(Ordering::Relaxed),
            },
        )
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
