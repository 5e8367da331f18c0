use std::collections::{BTreeMap, BTreeSet};

use dashmap::DashMap;
use rayon::prelude::*;

use crate::{
    allocation::{
        cost::CapCalculator,
        params::AllocationParameters,
        types::{AllocationPhase, BudgetAllocation},
    },
    delivery::EffectiveNodeMetrics,
    lattice::MeasureSet,
    types::Money,
};

/// First-day budget: the even share doubled and buffered, capped by what is left.
pub fn cold_start_period_budget(allocation: &BudgetAllocation) -> Money {
    let remaining = allocation.remaining_budget.max(0.0);
    (allocation.even_period_budget() * 2.0 * allocation.parameters.budget_buffer).min(remaining)
}

pub fn considered_tiers(params: &AllocationParameters, persona_tier: usize) -> Vec<usize> {
    let top = params.initial_top_tier.min(persona_tier.saturating_sub(1));
    if top == 0 || params.initial_tier_count == 0 {
        return Vec::new();
    }
    let lowest = top
        .saturating_sub(params.initial_tier_count - 1)
        .max(1);
    (lowest..=top).collect()
}

/// Splits `node_budget` over tiers (ascending) with weights `growth^k`, the
/// lowest tier at k = 0. Each allotment is capped at the tier's size and the
/// overflow is passed to the next lower tier.
pub fn tier_allotments(tier_sizes: &[usize], node_budget: usize, growth: f64) -> Vec<usize> {
    if tier_sizes.is_empty() || node_budget == 0 {
        return vec![0; tier_sizes.len()];
    }

    let weights: Vec<f64> = (0..tier_sizes.len())
        .map(|k| growth.max(1.0).powi(k as i32))
        .collect();
    let weight_sum: f64 = weights.iter().sum();

    let mut allotments: Vec<usize> = weights
        .iter()
        .map(|weight| (node_budget as f64 * weight / weight_sum).floor() as usize)
        .collect();

    let mut remainder = node_budget.saturating_sub(allotments.iter().sum());
    let mut index = allotments.len();
    while remainder > 0 {
        index = if index == 0 { allotments.len() - 1 } else { index - 1 };
        allotments[index] += 1;
        remainder -= 1;
    }

    let mut overflow = 0usize;
    for index in (0..allotments.len()).rev() {
        let wanted = allotments[index] + overflow;
        allotments[index] = wanted.min(tier_sizes[index]);
        overflow = wanted - allotments[index];
    }
    allotments
}

/// Greedy maximum coverage: repeatedly takes the candidate that is a superset
/// of the most still-uncovered nodes. Ties go to the higher valuation, then
/// to the smaller set in lattice order.
pub fn greedy_cover(
    mut candidates: Vec<MeasureSet>,
    uncovered: &mut BTreeSet<MeasureSet>,
    allotment: usize,
    valuations: &BTreeMap<MeasureSet, Money>,
) -> Vec<MeasureSet> {
    let mut chosen = Vec::new();
    while chosen.len() < allotment && !candidates.is_empty() {
        let coverage: DashMap<MeasureSet, usize> = DashMap::with_capacity(candidates.len());
        {
            let uncovered = &*uncovered;
            candidates.par_iter().for_each(|candidate| {
                let covered = uncovered
                    .iter()
                    .filter(|node| node.is_subset_of(candidate))
                    .count();
                coverage.insert(candidate.clone(), covered);
            });
        }

        let score = |node: &MeasureSet| coverage.get(node).map(|entry| *entry).unwrap_or(0);
        let valuation = |node: &MeasureSet| valuations.get(node).copied().unwrap_or(0.0);
        let Some(best_index) = candidates
            .iter()
            .enumerate()
            .max_by(|(_, lhs), (_, rhs)| {
                score(lhs)
                    .cmp(&score(rhs))
                    .then(valuation(lhs).total_cmp(&valuation(rhs)))
                    .then(rhs.cmp(lhs))
            })
            .map(|(index, _)| index)
        else {
            break;
        };

        let best = candidates.remove(best_index);
        uncovered.retain(|node| !node.is_subset_of(&best));
        chosen.push(best);
    }
    chosen
}

pub fn allocate_initial(allocation: &mut BudgetAllocation) -> Vec<MeasureSet> {
    let params = allocation.parameters.clone();
    let caps = CapCalculator::new(&params);
    let period_budget = cold_start_period_budget(allocation);

    for result in allocation.per_node_results.values_mut() {
        result.reset_cycle_outputs();
    }

    let valuations: BTreeMap<MeasureSet, Money> = allocation
        .per_node_results
        .iter()
        .map(|(node, result)| (node.clone(), result.valuation))
        .collect();
    let eligible: Vec<MeasureSet> = valuations
        .iter()
        .filter(|(_, valuation)| caps.justifies_data_cost(**valuation))
        .map(|(node, _)| node.clone())
        .collect();

    allocation.period_budget = period_budget;
    allocation.graph_budget = period_budget;
    allocation.last_phase = Some(AllocationPhase::Initial);

    let Some(persona_tier) = eligible.iter().map(MeasureSet::tier).max() else {
        tracing::warn!(
            target: "allocation",
            campaign_id = %allocation.campaign_id,
            nodes = valuations.len(),
            "no_node_justifies_data_cost"
        );
        return Vec::new();
    };

    let mut selected: Vec<MeasureSet> = eligible
        .iter()
        .filter(|node| node.tier() == persona_tier)
        .cloned()
        .collect();

    let tiers = considered_tiers(&params, persona_tier);
    let tier_nodes: Vec<Vec<MeasureSet>> = tiers
        .iter()
        .map(|tier| {
            eligible
                .iter()
                .filter(|node| node.tier() == *tier)
                .cloned()
                .collect()
        })
        .collect();
    let sizes: Vec<usize> = tier_nodes.iter().map(Vec::len).collect();
    let node_budget = params.initial_max_nodes.saturating_sub(selected.len());
    let allotments = tier_allotments(&sizes, node_budget, params.tier_allotment_growth);

    for ((tier, candidates), allotment) in tiers.iter().zip(tier_nodes).zip(allotments).rev() {
        if allotment == 0 {
            continue;
        }
        let mut uncovered: BTreeSet<MeasureSet> = eligible
            .iter()
            .filter(|node| node.tier() < *tier)
            .filter(|node| !selected.iter().any(|chosen| node.is_subset_of(chosen)))
            .cloned()
            .collect();
        let chosen = greedy_cover(candidates, &mut uncovered, allotment, &valuations);
        tracing::debug!(
            target: "allocation",
            campaign_id = %allocation.campaign_id,
            tier,
            allotment,
            chosen = chosen.len(),
            still_uncovered = uncovered.len(),
            "initial_tier_covered"
        );
        selected.extend(chosen);
    }

    let share = period_budget / selected.len() as f64;
    let selection: BTreeSet<&MeasureSet> = selected.iter().collect();
    let node_metrics = &allocation.node_metrics;
    allocation
        .per_node_results
        .par_iter_mut()
        .filter(|(node, _)| selection.contains(node))
        .for_each(|(node, result)| {
            let history = node_metrics
                .get(node)
                .map(|metrics| metrics as &dyn EffectiveNodeMetrics);
            result.period_total_budget = share;
            caps.apply_caps(result, history);
            result.export_budget = result.period_media_budget;
            result.is_exported = true;
        });

    tracing::info!(
        target: "allocation",
        campaign_id = %allocation.campaign_id,
        persona_tier,
        selected = selected.len(),
        period_budget,
        "initial_allocation_completed"
    );
    selected
}
