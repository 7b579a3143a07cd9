//! Route resolution: model name → ordered candidate list
//!
//! Exact routes win over glob routes; glob routes are scanned in the order
//! the operator declared them. Glob matching is deliberately simple: the
//! pattern with its `*`s stripped must appear as a case-insensitive
//! substring of the model name. Candidate ordering applies the configured
//! selection strategy on top of priority sorting.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use switchboard_config::{Config, RouteCandidate, SelectionStrategy};

use crate::error::ProxyError;
use crate::health::{HealthPolicy, HealthTracker};
use crate::registry::{ProviderHandle, ProviderRegistry};

/// One fully resolved attempt target
#[derive(Clone, Debug)]
pub struct Candidate {
    /// Provider to call
    pub provider: Arc<ProviderHandle>,
    /// Model string to send upstream (passthrough already applied)
    pub upstream_model: String,
    /// Priority the candidate was declared with
    pub priority: u32,
}

struct Route {
    candidates: Vec<RouteCandidate>,
    /// Round-robin cursor, advanced once per resolution
    cursor: AtomicUsize,
}

/// Route table built from one configuration snapshot
pub struct RouteTable {
    exact: HashMap<String, Arc<Route>>,
    globs: Vec<(String, Arc<Route>)>,
}

impl RouteTable {
    /// Build the table; route declaration order is preserved for globs
    pub fn from_config(config: &Config) -> Self {
        let mut exact = HashMap::new();
        let mut globs = Vec::new();

        for (pattern, candidates) in &config.model_routes {
            let route = Arc::new(Route {
                candidates: candidates.clone(),
                cursor: AtomicUsize::new(0),
            });
            if pattern.contains('*') {
                globs.push((pattern.to_lowercase().replace('*', ""), route));
            } else {
                exact.insert(pattern.clone(), route);
            }
        }

        Self { exact, globs }
    }

    /// Resolve a client model to its ordered, health-filtered candidates
    ///
    /// # Errors
    ///
    /// `ProxyError::NoRoute` when no pattern matches or every candidate is
    /// filtered out (disabled, unknown, or ineligible by health).
    pub fn resolve(
        &self,
        model: &str,
        strategy: SelectionStrategy,
        registry: &ProviderRegistry,
        health: &HealthTracker,
        policy: &HealthPolicy,
    ) -> Result<Vec<Candidate>, ProxyError> {
        let Some(route) = self.lookup(model) else {
            tracing::warn!(model, "no route pattern matched");
            return Err(ProxyError::NoRoute { model: model.to_owned() });
        };

        let mut candidates: Vec<Candidate> = route
            .candidates
            .iter()
            .filter_map(|candidate| {
                let provider = registry.find(&candidate.provider, candidate.account_email.as_deref())?;
                if !provider.config.enabled {
                    return None;
                }
                if !health.is_eligible(&provider.identity, policy) {
                    tracing::debug!(provider = %provider.identity, "skipping ineligible provider");
                    return None;
                }
                Some(Candidate {
                    upstream_model: candidate.upstream_model(model).to_owned(),
                    priority: candidate.priority,
                    provider,
                })
            })
            .collect();

        if candidates.is_empty() {
            tracing::warn!(model, "route matched but no candidate is currently eligible");
            return Err(ProxyError::NoRoute { model: model.to_owned() });
        }

        candidates.sort_by_key(|c| c.priority);

        match strategy {
            SelectionStrategy::Priority => {}
            SelectionStrategy::RoundRobin => {
                let turn = route.cursor.fetch_add(1, Ordering::Relaxed);
                rotate_equal_priority_groups(&mut candidates, turn);
            }
            SelectionStrategy::Random => {
                use rand::seq::SliceRandom;
                candidates.shuffle(&mut rand::rng());
            }
        }

        Ok(candidates)
    }

    fn lookup(&self, model: &str) -> Option<&Arc<Route>> {
        if let Some(route) = self.exact.get(model) {
            return Some(route);
        }

        let lowered = model.to_lowercase();
        self.globs
            .iter()
            .find(|(needle, _)| lowered.contains(needle.as_str()))
            .map(|(_, route)| route)
    }
}

/// Rotate each run of equal-priority candidates by the route's turn counter
fn rotate_equal_priority_groups(candidates: &mut [Candidate], turn: usize) {
    let mut start = 0;
    while start < candidates.len() {
        let priority = candidates[start].priority;
        let mut end = start + 1;
        while end < candidates.len() && candidates[end].priority == priority {
            end += 1;
        }
        let group = &mut candidates[start..end];
        if group.len() > 1 {
            group.rotate_left(turn % group.len());
        }
        start = end;
    }
}
