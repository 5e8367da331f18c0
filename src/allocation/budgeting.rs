use rayon::prelude::*;

use crate::{
    allocation::{cost::CostModel, types::BudgetAllocation},
    delivery::{EffectiveNodeMetrics, Horizon, NodeDeliveryMetrics},
    types::Money,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeriodBudgets {
    pub period_budget: Money,
    pub graph_budget: Money,
}

/// Anticipated spend for the coming period and the deeper graph budget used
/// to decide how far down the ranked node list to look.
pub fn compute_period_budgets(allocation: &BudgetAllocation) -> PeriodBudgets {
    let params = &allocation.parameters;
    let remaining = allocation.remaining_budget.max(0.0);
    let period_budget = (allocation.even_period_budget() * params.budget_buffer).min(remaining);
    let graph_budget = (period_budget * params.graph_budget_multiplier)
        .min(period_budget + remaining * params.graph_budget_remaining_fraction)
        .max(period_budget);
    PeriodBudgets {
        period_budget,
        graph_budget,
    }
}

/// Nodes exported before but missing delivery metrics get a zero-delivery
/// entry. Returns how many were backfilled.
pub fn backfill_missing_metrics(allocation: &mut BudgetAllocation) -> usize {
    let missing: Vec<_> = allocation
        .per_node_results
        .iter()
        .filter(|(node, result)| {
            result.was_exported() && !allocation.node_metrics.contains_key(*node)
        })
        .map(|(node, _)| node.clone())
        .collect();

    for node in &missing {
        tracing::warn!(
            target: "allocation",
            campaign_id = %allocation.campaign_id,
            node = %node,
            "missing_delivery_metrics_backfilled"
        );
        allocation
            .node_metrics
            .insert(node.clone(), NodeDeliveryMetrics::default());
    }
    missing.len()
}

pub fn assign_history_budgets(allocation: &mut BudgetAllocation, budgets: PeriodBudgets) {
    let BudgetAllocation {
        parameters,
        per_node_results,
        node_metrics,
        ..
    } = allocation;
    let cost_model = CostModel::from_parameters(parameters);
    let horizon = Horizon::Hours(parameters.period_hours);

    per_node_results.par_iter_mut().for_each(|(node, result)| {
        let Some(metrics) = node_metrics.get(node).filter(|m| m.has_delivery()) else {
            result.period_total_budget = 0.0;
            result.return_on_ad_spend = 0.0;
            return;
        };

        let tier_cap = budgets.period_budget * parameters.tier_budget_fraction(node.tier());
        result.period_total_budget = metrics
            .calc_effective_total_spend(&cost_model, horizon)
            .min(tier_cap)
            .max(0.0);

        let ecpm = metrics.effective_total_ecpm(&cost_model);
        result.return_on_ad_spend = if ecpm > 0.0 {
            result.valuation / ecpm
        } else {
            0.0
        };
    });
}
