mod engine;
mod phases;

use persona_budget::{
    allocation::{BudgetAllocation, PerNodeBudgetAllocationResult},
    delivery::NodeDeliveryMetrics,
    lattice::MeasureSet,
    types::Money,
    valuation::{CampaignDefinition, ExplicitValuation},
};
use time::{OffsetDateTime, macros::datetime};

pub const CAMPAIGN_START: OffsetDateTime = datetime!(2026-03-01 00:00 UTC);
pub const CAMPAIGN_END: OffsetDateTime = datetime!(2026-03-31 00:00 UTC);

/// Four independent measures, persona {11,12,13,14} capped at 31.
pub fn four_measure_campaign() -> CampaignDefinition {
    CampaignDefinition::new("campaign-four", 31.0)
        .with_valuation(ExplicitValuation::single(11, 9.0))
        .with_valuation(ExplicitValuation::single(12, 7.5))
        .with_valuation(ExplicitValuation::single(13, 3.25))
        .with_valuation(ExplicitValuation::single(14, 1.0))
}

pub fn empty_allocation(campaign_id: &str, remaining: Money) -> BudgetAllocation {
    BudgetAllocation::new(
        campaign_id,
        CAMPAIGN_START,
        CAMPAIGN_END,
        CAMPAIGN_START,
        remaining,
        remaining,
    )
}

pub fn allocation_with(nodes: &[(MeasureSet, Money)]) -> BudgetAllocation {
    let mut allocation = empty_allocation("campaign-fixture", 3000.0);
    for (node, valuation) in nodes {
        allocation
            .per_node_results
            .insert(node.clone(), PerNodeBudgetAllocationResult::new(*valuation));
    }
    allocation
}

/// `hours` consecutive eligible hours at a steady rate.
pub fn steady_metrics(hours: usize, impressions: f64, media_spend: f64) -> NodeDeliveryMetrics {
    let mut metrics = NodeDeliveryMetrics::new();
    for hour in 0..hours {
        metrics.record_hour(hour, impressions, media_spend, true);
    }
    metrics
}

/// Eligible hours that never won an impression.
pub fn ineligible_metrics(hours: usize) -> NodeDeliveryMetrics {
    steady_metrics(hours, 0.0, 0.0)
}

pub fn assert_close(actual: f64, expected: f64, tolerance: f64) {
    assert!(
        (actual - expected).abs() <= tolerance,
        "expected {expected} (+/- {tolerance}), got {actual}"
    );
}
