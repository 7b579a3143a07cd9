//! Shared proxy state
//!
//! Everything derived from configuration lives in an immutable [`Snapshot`]
//! swapped atomically on reload; requests grab an `Arc` to the snapshot on
//! entry and keep it for their whole lifetime. Health counters, the dedup
//! table, and the OAuth store survive reloads.

use std::sync::{Arc, RwLock};

use switchboard_config::Config;
use switchboard_oauth::TokenStore;

use crate::classify::ClassifyRules;
use crate::dedup::DedupTable;
use crate::health::{HealthPolicy, HealthTracker};
use crate::registry::ProviderRegistry;
use crate::routes::RouteTable;

/// Immutable view of one loaded configuration
pub struct Snapshot {
    /// The configuration itself
    pub config: Arc<Config>,
    /// Provider handles with their HTTP clients
    pub registry: ProviderRegistry,
    /// Compiled route table
    pub routes: RouteTable,
    /// Compiled classification rules
    pub rules: ClassifyRules,
    /// Health thresholds derived from settings
    pub policy: HealthPolicy,
}

impl Snapshot {
    fn build(config: Config) -> anyhow::Result<Self> {
        let registry = ProviderRegistry::from_config(&config.providers, &config.settings.timeouts)?;
        let routes = RouteTable::from_config(&config);
        let rules = ClassifyRules::from_settings(&config.settings)?;
        let policy = HealthPolicy::from(&config.settings);

        Ok(Self {
            config: Arc::new(config),
            registry,
            routes,
            rules,
            policy,
        })
    }
}

/// Shared state for the balancing engine
#[derive(Clone)]
pub struct ProxyState {
    inner: Arc<ProxyStateInner>,
}

struct ProxyStateInner {
    snapshot: RwLock<Arc<Snapshot>>,
    health: HealthTracker,
    dedup: Arc<DedupTable>,
    oauth: Arc<TokenStore>,
}

impl ProxyState {
    /// Build state from a validated configuration
    pub fn from_config(config: Config, oauth: Arc<TokenStore>) -> anyhow::Result<Self> {
        let snapshot = Snapshot::build(config)?;
        Ok(Self {
            inner: Arc::new(ProxyStateInner {
                snapshot: RwLock::new(Arc::new(snapshot)),
                health: HealthTracker::new(),
                dedup: Arc::new(DedupTable::new()),
                oauth,
            }),
        })
    }

    /// The snapshot current requests should use
    ///
    /// In-flight requests keep the `Arc` they took; a reload never mutates
    /// a snapshot out from under them.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.inner.snapshot.read().expect("snapshot lock poisoned"))
    }

    /// Atomically replace the configuration snapshot
    pub fn reload(&self, config: Config) -> anyhow::Result<()> {
        let snapshot = Arc::new(Snapshot::build(config)?);
        *self.inner.snapshot.write().expect("snapshot lock poisoned") = snapshot;
        tracing::info!("configuration snapshot replaced");
        Ok(())
    }

    /// Health tracker shared across snapshots
    pub fn health(&self) -> &HealthTracker {
        &self.inner.health
    }

    /// Deduplication table shared across snapshots
    pub fn dedup(&self) -> &Arc<DedupTable> {
        &self.inner.dedup
    }

    /// OAuth token store
    pub fn oauth(&self) -> &Arc<TokenStore> {
        &self.inner.oauth
    }
}
