use std::collections::BTreeMap;

use rayon::prelude::*;

use crate::{
    allocation::{
        budgeting::{assign_history_budgets, backfill_missing_metrics, compute_period_budgets},
        cost::CapCalculator,
        lineage::score_lineage,
        phases::{PhaseContext, Selection, run_phases},
        types::{AllocationPhase, BudgetAllocation},
    },
    delivery::EffectiveNodeMetrics,
    lattice::MeasureSet,
    types::Money,
};

/// One history-informed cycle: budgets, lineage, phase selection, finalize.
pub fn reallocate(allocation: &mut BudgetAllocation) -> AllocationPhase {
    let backfilled = backfill_missing_metrics(allocation);

    for result in allocation.per_node_results.values_mut() {
        result.reset_cycle_outputs();
    }

    let budgets = compute_period_budgets(allocation);
    allocation.period_budget = budgets.period_budget;
    allocation.graph_budget = budgets.graph_budget;
    assign_history_budgets(allocation, budgets);
    score_lineage(allocation);

    let caps = CapCalculator::new(&allocation.parameters);
    let ctx = PhaseContext::from_allocation(allocation, &caps);
    let (phase, selection) = run_phases(&ctx);
    finalize(allocation, selection, &caps);
    allocation.last_phase = Some(phase);

    tracing::info!(
        target: "allocation",
        campaign_id = %allocation.campaign_id,
        phase = ?phase,
        backfilled,
        period_budget = allocation.period_budget,
        graph_budget = allocation.graph_budget,
        exported = allocation.exported_nodes().len(),
        "reallocation_completed"
    );
    phase
}

/// Applies caps and the export boost to selected nodes and clears the export
/// fields of everything else. Unselected nodes keep their computed budget.
pub fn finalize(allocation: &mut BudgetAllocation, selection: Selection, caps: &CapCalculator) {
    let boost = allocation.parameters.export_budget_boost;
    let selected: BTreeMap<MeasureSet, Money> = selection
        .into_entries()
        .into_iter()
        .map(|entry| (entry.node, entry.budget))
        .collect();

    let BudgetAllocation {
        per_node_results,
        node_metrics,
        ..
    } = allocation;
    per_node_results.par_iter_mut().for_each(|(node, result)| {
        let Some(budget) = selected.get(node) else {
            result.clear_export();
            return;
        };
        let history = node_metrics
            .get(node)
            .map(|metrics| metrics as &dyn EffectiveNodeMetrics);
        result.period_total_budget = *budget;
        caps.apply_caps(result, history);
        result.export_budget = result.period_media_budget * boost;
        result.period_impression_cap = (result.period_impression_cap * boost).floor();
        result.is_exported = true;
    });
}
