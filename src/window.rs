//! Per-platform token budgets with immutable allocation tracking

use crate::formatter::Platform;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Budget section for retrieved project content
pub const SECTION_PROJECT_DOCS: &str = "project_docs";
/// Budget section for web search results
pub const SECTION_WEB_SEARCH: &str = "web_search";
/// Budget section for the task analysis summary
pub const SECTION_TASK_ANALYSIS: &str = "task_analysis";
/// Budget section for formatting overhead
pub const SECTION_OVERHEAD: &str = "overhead";

/// Default proportional weights per section
const DEFAULT_WEIGHTS: [(&str, f32); 4] = [
    (SECTION_PROJECT_DOCS, 0.60),
    (SECTION_WEB_SEARCH, 0.20),
    (SECTION_TASK_ANALYSIS, 0.10),
    (SECTION_OVERHEAD, 0.10),
];

/// Context window shape of a target model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub max_context_tokens: usize,
    pub reserved_for_response: usize,
    pub reserved_for_conversation: usize,
}

impl ModelConfig {
    /// Tokens available for the tailored artifact
    pub fn total_available(&self) -> usize {
        self.max_context_tokens
            .saturating_sub(self.reserved_for_response)
            .saturating_sub(self.reserved_for_conversation)
    }
}

/// How a total is divided across sections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AllocationStrategy {
    Proportional,
    Priority,
}

/// Immutable token budget; tracking and rebalancing return new budgets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenBudget {
    pub total_available: usize,
    pub allocations: HashMap<String, usize>,
    pub used: HashMap<String, usize>,
}

impl TokenBudget {
    pub fn total_used(&self) -> usize {
        self.used.values().sum()
    }

    /// Tokens not yet consumed
    pub fn remaining(&self) -> usize {
        self.total_available.saturating_sub(self.total_used())
    }

    pub fn allocation(&self, section: &str) -> usize {
        self.allocations.get(section).copied().unwrap_or(0)
    }

    pub fn used_in(&self, section: &str) -> usize {
        self.used.get(section).copied().unwrap_or(0)
    }
}

/// Builds and manipulates token budgets per target platform
pub struct ContextWindowManager;

impl ContextWindowManager {
    /// Context window shape for a platform (and optional model override)
    pub fn model_config(platform: Platform, model: Option<&str>) -> ModelConfig {
        match (platform, model) {
            (Platform::Claude, _) => ModelConfig {
                max_context_tokens: 32_768,
                reserved_for_response: 8_192,
                reserved_for_conversation: 8_192,
            },
            (Platform::ChatGpt, Some("gpt-4o-mini")) => ModelConfig {
                max_context_tokens: 8_192,
                reserved_for_response: 2_048,
                reserved_for_conversation: 2_048,
            },
            (Platform::ChatGpt, _) => ModelConfig {
                max_context_tokens: 16_384,
                reserved_for_response: 4_096,
                reserved_for_conversation: 4_096,
            },
        }
    }

    /// Budget for a platform using the default section proportions
    pub fn create_budget(platform: Platform, model: Option<&str>) -> TokenBudget {
        let config = Self::model_config(platform, model);
        let weights: Vec<(String, f32)> = DEFAULT_WEIGHTS
            .iter()
            .map(|(name, w)| (name.to_string(), *w))
            .collect();
        Self::allocate_budget(
            config.total_available(),
            &weights,
            AllocationStrategy::Proportional,
        )
    }

    /// Divide a total across named sections
    pub fn allocate_budget(
        total: usize,
        weights: &[(String, f32)],
        strategy: AllocationStrategy,
    ) -> TokenBudget {
        let mut allocations = HashMap::new();

        match strategy {
            AllocationStrategy::Proportional => {
                let weight_sum: f32 = weights.iter().map(|(_, w)| w.max(0.0)).sum();
                if weight_sum > 0.0 {
                    let mut assigned = 0usize;
                    for (name, weight) in weights {
                        let share =
                            ((total as f32) * (weight.max(0.0) / weight_sum)).floor() as usize;
                        allocations.insert(name.clone(), share);
                        assigned += share;
                    }
                    // Rounding remainder goes to the heaviest section
                    if let Some((heaviest, _)) = weights
                        .iter()
                        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
                    {
                        *allocations.entry(heaviest.clone()).or_insert(0) +=
                            total.saturating_sub(assigned);
                    }
                }
            }
            AllocationStrategy::Priority => {
                // Highest weight first; each section takes its full share of
                // what is left
                let mut ordered: Vec<&(String, f32)> = weights.iter().collect();
                ordered.sort_by(|a, b| {
                    b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal)
                });
                let mut left = total;
                for (name, weight) in ordered {
                    let want = ((total as f32) * weight.max(0.0)).ceil() as usize;
                    let take = want.min(left);
                    allocations.insert(name.clone(), take);
                    left -= take;
                }
            }
        }

        let used = weights.iter().map(|(name, _)| (name.clone(), 0)).collect();
        TokenBudget {
            total_available: total,
            allocations,
            used,
        }
    }

    /// Record usage against a section, returning a new budget
    pub fn track_usage(budget: &TokenBudget, section: &str, tokens: usize) -> TokenBudget {
        let mut next = budget.clone();
        *next.used.entry(section.to_string()).or_insert(0) += tokens;
        debug!(section, tokens, remaining = next.remaining(), "tracked usage");
        next
    }

    /// Overall and per-section usage fits the allocations
    pub fn is_within_budget(budget: &TokenBudget) -> bool {
        if budget.total_used() > budget.total_available {
            return false;
        }
        budget
            .used
            .iter()
            .all(|(section, used)| *used <= budget.allocation(section))
    }

    /// Move surplus from under-used sections to over-budget sections
    /// proportionally; never grows `total_available`
    pub fn rebalance(budget: &TokenBudget) -> TokenBudget {
        let mut surpluses: HashMap<String, usize> = HashMap::new();
        let mut deficits: HashMap<String, usize> = HashMap::new();

        for (section, allocation) in &budget.allocations {
            let used = budget.used_in(section);
            if used < *allocation {
                surpluses.insert(section.clone(), allocation - used);
            } else if used > *allocation {
                deficits.insert(section.clone(), used - allocation);
            }
        }

        let total_surplus: usize = surpluses.values().sum();
        let total_deficit: usize = deficits.values().sum();
        let transfer = total_surplus.min(total_deficit);
        if transfer == 0 {
            return budget.clone();
        }

        let mut next = budget.clone();

        // Fund each deficit section in proportion to its overrun
        let mut granted = 0usize;
        let deficit_sections: Vec<(String, usize)> = deficits.into_iter().collect();
        for (i, (section, deficit)) in deficit_sections.iter().enumerate() {
            let grant = if i == deficit_sections.len() - 1 {
                transfer - granted
            } else {
                (transfer as f32 * (*deficit as f32 / total_deficit as f32)).floor() as usize
            };
            *next.allocations.entry(section.clone()).or_insert(0) += grant;
            granted += grant;
        }

        // Charge each surplus section in proportion to its headroom
        let mut charged = 0usize;
        let surplus_sections: Vec<(String, usize)> = surpluses.into_iter().collect();
        for (i, (section, surplus)) in surplus_sections.iter().enumerate() {
            let charge = if i == surplus_sections.len() - 1 {
                transfer - charged
            } else {
                (transfer as f32 * (*surplus as f32 / total_surplus as f32)).floor() as usize
            };
            if let Some(allocation) = next.allocations.get_mut(section) {
                *allocation = allocation.saturating_sub(charge);
            }
            charged += charge;
        }

        debug!(transfer, "rebalanced budget sections");
        next
    }
}
