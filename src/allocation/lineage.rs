use std::collections::BTreeMap;

use dashmap::DashMap;
use rayon::prelude::*;

use crate::{
    allocation::types::{BudgetAllocation, PerNodeBudgetAllocationResult},
    delivery::{EffectiveNodeMetrics, NodeDeliveryMetrics},
    lattice::MeasureSet,
    types::Money,
};

/// Per-subset average effective impression rate, memoized across nodes.
pub struct TupleScores {
    history: Vec<(MeasureSet, f64)>,
    memo: DashMap<MeasureSet, f64>,
}

impl TupleScores {
    pub fn from_metrics(node_metrics: &BTreeMap<MeasureSet, NodeDeliveryMetrics>) -> Self {
        let history = node_metrics
            .iter()
            .filter(|(_, metrics)| metrics.has_history())
            .map(|(node, metrics)| (node.clone(), metrics.calc_effective_impression_rate()))
            .collect();
        Self {
            history,
            memo: DashMap::new(),
        }
    }

    pub fn tuple_score(&self, tuple: &MeasureSet) -> f64 {
        if let Some(score) = self.memo.get(tuple) {
            return *score;
        }

        let (sum, count) = self
            .history
            .iter()
            .filter(|(node, _)| node.is_superset_of(tuple))
            .fold((0.0, 0usize), |(sum, count), (_, rate)| (sum + rate, count + 1));
        let score = if count == 0 { 0.0 } else { sum / count as f64 };
        self.memo.insert(tuple.clone(), score);
        score
    }

    pub fn node_score(&self, node: &MeasureSet) -> f64 {
        node.power_set().map(|tuple| self.tuple_score(&tuple)).sum()
    }

    pub fn memoized(&self) -> usize {
        self.memo.len()
    }
}

/// Never-exported nodes sitting between an ineligible ancestor and an
/// ineligible descendant get `penalty`. An ineligible ancestor valued strictly
/// below the node does not count.
pub fn lineage_penalty(
    node: &MeasureSet,
    result: &PerNodeBudgetAllocationResult,
    ineligible: &[(MeasureSet, Money)],
    penalty: f64,
) -> f64 {
    if result.was_exported() {
        return 1.0;
    }

    let has_ancestor = ineligible.iter().any(|(other, valuation)| {
        other.is_proper_subset_of(node) && *valuation >= result.valuation
    });
    let has_descendant = ineligible
        .iter()
        .any(|(other, _)| other.is_proper_superset_of(node));

    if has_ancestor && has_descendant {
        penalty
    } else {
        1.0
    }
}

pub fn score_lineage(allocation: &mut BudgetAllocation) {
    let penalty = allocation.parameters.lineage_penalty;
    let BudgetAllocation {
        per_node_results,
        node_metrics,
        ..
    } = allocation;

    per_node_results.par_iter_mut().for_each(|(node, result)| {
        result.node_is_ineligible = node_metrics
            .get(node)
            .is_some_and(|metrics| metrics.is_ineligible());
    });

    let ineligible: Vec<(MeasureSet, Money)> = per_node_results
        .iter()
        .filter(|(_, result)| result.node_is_ineligible)
        .map(|(node, result)| (node.clone(), result.valuation))
        .collect();

    let tuples = TupleScores::from_metrics(node_metrics);
    per_node_results.par_iter_mut().for_each(|(node, result)| {
        result.node_score = tuples.node_score(node);
        result.lineage_penalty = lineage_penalty(node, result, &ineligible, penalty);
    });

    let penalized = per_node_results
        .values()
        .filter(|result| result.lineage_penalty < 1.0)
        .count();
    tracing::debug!(
        target: "allocation",
        campaign_id = %allocation.campaign_id,
        ineligible = ineligible.len(),
        penalized,
        tuples = tuples.memoized(),
        "lineage_scored"
    );
}
