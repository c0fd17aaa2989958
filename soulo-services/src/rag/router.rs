//! Retrieval router.
//!
//! Maps a classified question to a time budget and concurrency ceiling and
//! lays out the fallback chain the executor walks.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use soulo_core::config::RetrievalConfig;

use super::classifier::ComplexityAnalysis;
use super::planner::{QueryPlan, SearchStrategy};

/// How a question's search is run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingDecision {
    /// Planned strategy first, then fallbacks. The last route is always
    /// `recent_entries`.
    pub chain: Vec<SearchStrategy>,
    pub budget_ms: u64,
    pub max_concurrency: usize,
}

impl RoutingDecision {
    pub fn budget(&self) -> Duration {
        Duration::from_millis(self.budget_ms)
    }

    pub fn primary(&self) -> SearchStrategy {
        self.chain.first().copied().unwrap_or(SearchStrategy::RecentEntries)
    }
}

/// Route a planned question.
pub fn route(analysis: &ComplexityAnalysis, plan: &QueryPlan, config: &RetrievalConfig) -> RoutingDecision {
    let tier = analysis.complexity.tier(config);
    RoutingDecision {
        chain: fallback_chain(plan.strategy),
        budget_ms: tier.budget_ms,
        max_concurrency: tier.max_concurrency.max(1),
    }
}

/// planned -> vector_only (if different) -> recent_entries.
pub fn fallback_chain(planned: SearchStrategy) -> Vec<SearchStrategy> {
    let mut chain = vec![planned];
    for next in [SearchStrategy::VectorOnly, SearchStrategy::RecentEntries] {
        if !chain.contains(&next) {
            chain.push(next);
        }
    }
    chain
}
