use std::cmp::Ordering;

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

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub node: MeasureSet,
    pub budget: Money,
    pub valuation: Money,
    pub node_score: f64,
    pub lineage_penalty: f64,
    pub return_on_ad_spend: f64,
    pub impression_rate: f64,
    pub has_insight: bool,
    pub is_ineligible: bool,
    pub is_justified: bool,
    pub was_exported: bool,
}

impl Candidate {
    pub fn tier(&self) -> usize {
        self.node.tier()
    }

    pub fn node_rank(&self) -> f64 {
        self.node_score * self.lineage_penalty * self.valuation
    }

    pub fn value_volume(&self) -> f64 {
        self.valuation * self.impression_rate * self.lineage_penalty
    }

    pub fn is_allocatable(&self) -> bool {
        self.budget > 0.0 && self.is_exportable()
    }

    pub fn is_exportable(&self) -> bool {
        !self.is_ineligible && self.is_justified
    }

    pub fn selected(&self) -> SelectedNode {
        self.selected_with_budget(self.budget)
    }

    pub fn selected_with_budget(&self, budget: Money) -> SelectedNode {
        SelectedNode {
            node: self.node.clone(),
            budget,
            value_volume: self.value_volume(),
            node_score: self.node_score,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectedNode {
    pub node: MeasureSet,
    pub budget: Money,
    pub value_volume: f64,
    pub node_score: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    entries: Vec<SelectedNode>,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[SelectedNode] {
        &self.entries
    }

    pub fn contains(&self, node: &MeasureSet) -> bool {
        self.entries.iter().any(|entry| &entry.node == node)
    }

    pub fn total_budget(&self) -> Money {
        self.entries.iter().map(|entry| entry.budget).sum()
    }

    pub fn push(&mut self, entry: SelectedNode) {
        if !self.contains(&entry.node) {
            self.entries.push(entry);
        }
    }

    pub fn remove(&mut self, node: &MeasureSet) -> Option<SelectedNode> {
        let index = self.entries.iter().position(|entry| &entry.node == node)?;
        Some(self.entries.remove(index))
    }

    pub fn is_under_budget(&self, anticipated_spend: Money) -> bool {
        self.total_budget() < anticipated_spend
    }

    pub fn sort_by_value_volume(&mut self) {
        self.entries.sort_by(|lhs, rhs| {
            lhs.value_volume
                .total_cmp(&rhs.value_volume)
                .then_with(|| lhs.node.cmp(&rhs.node))
        });
    }

    pub fn into_entries(self) -> Vec<SelectedNode> {
        self.entries
    }
}

impl FromIterator<SelectedNode> for Selection {
    fn from_iter<I: IntoIterator<Item = SelectedNode>>(iter: I) -> Self {
        let mut selection = Selection::new();
        for entry in iter {
            selection.push(entry);
        }
        selection
    }
}

#[derive(Debug, Clone)]
pub struct PhaseContext {
    pub params: AllocationParameters,
    pub period_budget: Money,
    pub graph_budget: Money,
    pub elapsed_fraction: f64,
    pub candidates: Vec<Candidate>,
}

impl PhaseContext {
    pub fn from_allocation(allocation: &BudgetAllocation, caps: &CapCalculator) -> Self {
        let candidates = allocation
            .per_node_results
            .iter()
            .map(|(node, result)| {
                let metrics = allocation.node_metrics.get(node);
                Candidate {
                    node: node.clone(),
                    budget: result.period_total_budget,
                    valuation: result.valuation,
                    node_score: result.node_score,
                    lineage_penalty: result.lineage_penalty,
                    return_on_ad_spend: result.return_on_ad_spend,
                    impression_rate: metrics
                        .map(|metrics| metrics.calc_effective_impression_rate())
                        .unwrap_or(0.0),
                    has_insight: metrics.is_some_and(|metrics| metrics.has_delivery()),
                    is_ineligible: result.node_is_ineligible,
                    is_justified: caps.justifies_data_cost(result.valuation),
                    was_exported: result.was_exported(),
                }
            })
            .collect();

        Self {
            params: allocation.parameters.clone(),
            period_budget: allocation.period_budget,
            graph_budget: allocation.graph_budget,
            elapsed_fraction: allocation.elapsed_fraction(),
            candidates,
        }
    }

    fn max_nodes(&self) -> usize {
        self.params.max_export_nodes
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseDecision {
    pub phase: AllocationPhase,
    pub insight: f64,
    pub under_budget: bool,
}

fn by_budget_desc(lhs: &Candidate, rhs: &Candidate) -> Ordering {
    rhs.budget
        .total_cmp(&lhs.budget)
        .then_with(|| lhs.node.cmp(&rhs.node))
}

fn by_rank_desc(lhs: &Candidate, rhs: &Candidate) -> Ordering {
    rhs.node_rank()
        .total_cmp(&lhs.node_rank())
        .then(lhs.tier().cmp(&rhs.tier()))
        .then_with(|| by_budget_desc(lhs, rhs))
}

/// Fraction of nodes in `base_tier..=top_tier` that already delivered.
pub fn insight_score(ctx: &PhaseContext) -> f64 {
    let tiers = ctx.params.base_tier..=ctx.params.top_tier;
    let (total, with_insight) = ctx
        .candidates
        .iter()
        .filter(|candidate| tiers.contains(&candidate.tier()))
        .fold((0usize, 0usize), |(total, with_insight), candidate| {
            (total + 1, with_insight + usize::from(candidate.has_insight))
        });
    if total == 0 {
        0.0
    } else {
        with_insight as f64 / total as f64
    }
}

pub fn top_candidates(ctx: &PhaseContext) -> Vec<&Candidate> {
    let mut top: Vec<&Candidate> = ctx
        .candidates
        .iter()
        .filter(|candidate| candidate.is_allocatable())
        .collect();
    top.sort_by(|lhs, rhs| by_budget_desc(lhs, rhs));
    top.truncate(ctx.max_nodes());
    top
}

pub fn select_phase(ctx: &PhaseContext) -> PhaseDecision {
    let params = &ctx.params;
    let boosted: Money = top_candidates(ctx)
        .iter()
        .map(|candidate| candidate.budget * params.export_budget_boost)
        .sum();
    let under_budget = boosted < ctx.period_budget;
    let insight = insight_score(ctx);
    let early = ctx.elapsed_fraction < params.rise_elapsed_threshold
        && insight < params.insight_threshold;

    let phase = if early || under_budget {
        if insight < params.insight_threshold {
            AllocationPhase::RiseNoInsight
        } else {
            AllocationPhase::RiseUnderBudget
        }
    } else {
        AllocationPhase::Maximize
    };

    PhaseDecision {
        phase,
        insight,
        under_budget,
    }
}

/// Previously exported nodes kept by descending budget while enough budget
/// stays free for the next experiment. One slot is always left open.
pub fn keep_previously_exported(ctx: &PhaseContext) -> Selection {
    let params = &ctx.params;
    let slots = ctx.max_nodes().saturating_sub(1);
    let window = params.experimental_spend_window.max(1);

    let mut prior: Vec<&Candidate> = ctx
        .candidates
        .iter()
        .filter(|candidate| candidate.was_exported && candidate.is_allocatable())
        .collect();
    prior.sort_by(|lhs, rhs| by_budget_desc(lhs, rhs));

    let mut kept = Selection::new();
    for candidate in prior {
        if kept.len() >= slots {
            break;
        }
        let recent: Vec<Money> = kept
            .entries()
            .iter()
            .rev()
            .take(window - 1)
            .map(|entry| entry.budget)
            .chain(std::iter::once(candidate.budget))
            .collect();
        let mean = recent.iter().sum::<Money>() / recent.len() as f64;
        let required = params.minimum_node_budget.max(mean);
        if kept.total_budget() + candidate.budget + required <= ctx.period_budget {
            kept.push(candidate.selected());
        }
    }
    kept
}

/// Gives an even share of `budget_limit - selection total` to the first pool
/// nodes, each at least `minimum_node_budget`. Returns how many were added.
pub fn fill_experimental<'a>(
    selection: &mut Selection,
    pool: impl IntoIterator<Item = &'a Candidate>,
    budget_limit: Money,
    params: &AllocationParameters,
) -> usize {
    let free = params.max_export_nodes.saturating_sub(selection.len());
    let leftover = budget_limit - selection.total_budget();
    let pool: Vec<&Candidate> = pool
        .into_iter()
        .filter(|candidate| !selection.contains(&candidate.node))
        .collect();
    if free == 0 || leftover <= 0.0 || pool.is_empty() {
        return 0;
    }

    let affordable = if params.minimum_node_budget > 0.0 {
        ((leftover / params.minimum_node_budget).floor() as usize).max(1)
    } else {
        usize::MAX
    };
    let count = free.min(pool.len()).min(affordable);
    let share = (leftover / count as f64).max(params.minimum_node_budget);
    for candidate in pool.into_iter().take(count) {
        selection.push(candidate.selected_with_budget(share));
    }
    count
}

pub fn rise_no_insight(ctx: &PhaseContext) -> Selection {
    let mut selection = keep_previously_exported(ctx);

    let mut pool: Vec<&Candidate> = ctx
        .candidates
        .iter()
        .filter(|candidate| !candidate.has_insight && candidate.is_exportable())
        .collect();
    pool.sort_by(|lhs, rhs| {
        lhs.node_score
            .total_cmp(&rhs.node_score)
            .then(lhs.tier().cmp(&rhs.tier()))
            .then_with(|| lhs.node.cmp(&rhs.node))
    });

    fill_experimental(&mut selection, pool, ctx.period_budget, &ctx.params);
    selection
}

pub fn rise_under_budget(ctx: &PhaseContext) -> Selection {
    let params = &ctx.params;
    let mut selection = keep_previously_exported(ctx);

    let never_exported = || {
        ctx.candidates
            .iter()
            .filter(|candidate| !candidate.was_exported && candidate.is_exportable())
    };
    let mut below_base: Vec<&Candidate> = never_exported()
        .filter(|candidate| candidate.tier() < params.base_tier)
        .collect();
    below_base.sort_by(|lhs, rhs| by_rank_desc(lhs, rhs));
    let mut up_to_top: Vec<&Candidate> = never_exported()
        .filter(|candidate| (params.base_tier..=params.top_tier).contains(&candidate.tier()))
        .collect();
    up_to_top.sort_by(|lhs, rhs| by_rank_desc(lhs, rhs));

    fill_experimental(
        &mut selection,
        below_base.into_iter().chain(up_to_top),
        ctx.period_budget,
        params,
    );
    selection
}

/// Appends the largest pool budgets until anticipated spend is reached. The
/// node limit is not enforced here; Phase 3.5 trims an over-full selection.
pub fn add_high_budget_nodes_to_make_spend(
    selection: &mut Selection,
    mut pool: Vec<SelectedNode>,
    anticipated_spend: Money,
) {
    pool.sort_by(|lhs, rhs| {
        rhs.budget
            .total_cmp(&lhs.budget)
            .then_with(|| lhs.node.cmp(&rhs.node))
    });

    for candidate in pool {
        if !selection.is_under_budget(anticipated_spend) {
            break;
        }
        selection.push(candidate);
    }
    selection.sort_by_value_volume();
}

pub fn maximize(ctx: &PhaseContext) -> Selection {
    let mut ranked: Vec<&Candidate> = ctx
        .candidates
        .iter()
        .filter(|candidate| candidate.is_allocatable())
        .collect();
    ranked.sort_by(|lhs, rhs| {
        rhs.return_on_ad_spend
            .total_cmp(&lhs.return_on_ad_spend)
            .then_with(|| by_budget_desc(lhs, rhs))
    });

    let mut selection = Selection::new();
    let mut remainder = Vec::new();
    for candidate in ranked {
        if selection.len() < ctx.max_nodes()
            && selection.total_budget() + candidate.budget <= ctx.graph_budget
        {
            selection.push(candidate.selected());
        } else if candidate.was_exported {
            remainder.push(candidate.selected());
        }
    }

    add_high_budget_nodes_to_make_spend(&mut selection, remainder, ctx.period_budget);
    selection
}

/// Phase 3.5: trim a full selection to anticipated spend and spread the rest
/// of the graph budget over nodes without insight.
pub fn maximize_at_capacity(ctx: &PhaseContext, selection: &Selection) -> Selection {
    let mut by_budget: Vec<&SelectedNode> = selection.entries().iter().collect();
    by_budget.sort_by(|lhs, rhs| {
        rhs.budget
            .total_cmp(&lhs.budget)
            .then_with(|| lhs.node.cmp(&rhs.node))
    });

    let mut kept = Selection::new();
    for entry in by_budget {
        if kept.len() < ctx.max_nodes()
            && kept.total_budget() + entry.budget <= ctx.period_budget
        {
            kept.push(entry.clone());
        }
    }

    let free = ctx.max_nodes().saturating_sub(kept.len());
    let mut pool: Vec<&Candidate> = ctx
        .candidates
        .iter()
        .filter(|candidate| {
            !candidate.has_insight && candidate.is_exportable() && !kept.contains(&candidate.node)
        })
        .collect();
    pool.sort_by(|lhs, rhs| by_rank_desc(lhs, rhs));
    if pool.len() < free {
        let mut fallback: Vec<&Candidate> = ctx
            .candidates
            .iter()
            .filter(|candidate| {
                !candidate.was_exported
                    && candidate.has_insight
                    && candidate.is_exportable()
                    && !kept.contains(&candidate.node)
            })
            .collect();
        fallback.sort_by(|lhs, rhs| by_rank_desc(lhs, rhs));
        pool.extend(fallback);
    }

    fill_experimental(&mut kept, pool, ctx.graph_budget, &ctx.params);
    kept.sort_by_value_volume();
    kept
}

/// Phase 4: replaces low value-volume nodes with groups of unselected,
/// higher-scored nodes carrying at least the same budget. Returns the number
/// of swaps made.
pub fn rarify(ctx: &PhaseContext, selection: &mut Selection) -> usize {
    selection.sort_by_value_volume();
    let targets: Vec<SelectedNode> = selection.entries().to_vec();

    let mut swaps = 0;
    for target in targets {
        if swaps >= ctx.params.rarify_max_swaps {
            break;
        }

        let mut pool: Vec<&Candidate> = ctx
            .candidates
            .iter()
            .filter(|candidate| {
                candidate.is_allocatable()
                    && candidate.node_score > target.node_score
                    && !selection.contains(&candidate.node)
            })
            .collect();
        pool.sort_by(|lhs, rhs| {
            rhs.node_score
                .total_cmp(&lhs.node_score)
                .then_with(|| by_budget_desc(lhs, rhs))
        });

        let room = ctx.max_nodes().saturating_sub(selection.len().saturating_sub(1));
        let mut group: Vec<&Candidate> = Vec::new();
        let mut group_budget = 0.0;
        for candidate in pool {
            if group_budget >= target.budget || group.len() >= room {
                break;
            }
            group_budget += candidate.budget;
            group.push(candidate);
        }

        let total_after = selection.total_budget() - target.budget + group_budget;
        if group.is_empty() || group_budget < target.budget || total_after > ctx.graph_budget {
            continue;
        }

        selection.remove(&target.node);
        for candidate in group {
            selection.push(candidate.selected());
        }
        swaps += 1;
    }

    selection.sort_by_value_volume();
    swaps
}

pub fn run_phases(ctx: &PhaseContext) -> (AllocationPhase, Selection) {
    let decision = select_phase(ctx);
    tracing::info!(
        target: "allocation",
        phase = ?decision.phase,
        insight = decision.insight,
        under_budget = decision.under_budget,
        elapsed = ctx.elapsed_fraction,
        "allocation_phase_selected"
    );

    match decision.phase {
        AllocationPhase::RiseNoInsight => (decision.phase, rise_no_insight(ctx)),
        AllocationPhase::RiseUnderBudget => (decision.phase, rise_under_budget(ctx)),
        _ => {
            let mut selection = maximize(ctx);
            if selection.len() >= ctx.max_nodes() {
                let trimmed = maximize_at_capacity(ctx, &selection);
                return (AllocationPhase::MaximizeAtCapacity, trimmed);
            }
            let swaps = rarify(ctx, &mut selection);
            tracing::debug!(target: "allocation", swaps, "rarify_completed");
            if swaps > 0 {
                (AllocationPhase::Rarify, selection)
            } else {
                (AllocationPhase::Maximize, selection)
            }
        }
    }
}
