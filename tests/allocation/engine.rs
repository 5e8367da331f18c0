use persona_budget::{
    allocation::{AllocationErrorKind, AllocationPhase, BudgetAllocation},
    engine::AllocationEngine,
    lattice::MeasureSet,
};
use time::Duration;

use crate::{
    CAMPAIGN_START, allocation_with, assert_close, empty_allocation, four_measure_campaign,
    steady_metrics,
};

fn engine() -> AllocationEngine {
    AllocationEngine::with_default_pool().expect("pool should build")
}

/// A cold-started campaign whose exports were recorded.
fn after_first_cycle(engine: &AllocationEngine) -> BudgetAllocation {
    let campaign = four_measure_campaign();
    let mut allocation = empty_allocation(&campaign.campaign_id, 3000.0);
    engine
        .populate_valuations(&mut allocation, &campaign)
        .expect("valuations should populate");
    let allocation = engine
        .get_budget_allocations(allocation, false)
        .expect("cold start should succeed");
    let exported: Vec<MeasureSet> = allocation
        .exported_nodes()
        .into_iter()
        .map(|export| export.measure_set)
        .collect();
    engine.increment_export_counts(allocation, &exported)
}

#[test]
fn given_fresh_campaign_when_allocating_then_cold_start_runs() {
    let engine = engine();
    let allocation = after_first_cycle(&engine);

    assert_eq!(allocation.last_phase, Some(AllocationPhase::Initial));
    assert!(allocation.last_run_id.is_some());
    assert!(allocation.has_export_history());
    assert!(
        allocation
            .per_node_results
            .values()
            .all(|result| result.export_count == 1)
    );
}

#[test]
fn given_delivery_history_when_allocating_then_history_path_exports_boosted_media() {
    let engine = engine();
    let mut allocation = after_first_cycle(&engine);
    let first_run = allocation.last_run_id;
    for node in allocation.per_node_results.keys() {
        allocation
            .node_metrics
            .insert(node.clone(), steady_metrics(24, 1000.0, 1.5));
    }
    allocation.as_of = CAMPAIGN_START + Duration::days(1);

    let allocation = engine
        .get_budget_allocations(allocation, false)
        .expect("reallocation should succeed");

    let phase = allocation.last_phase.expect("phase should be recorded");
    assert_ne!(phase, AllocationPhase::Initial);
    assert!(!phase.is_rise(), "every node has insight, got {phase:?}");
    assert_ne!(allocation.last_run_id, first_run);

    // 29 days left: 3000 / 29 buffered by 1.1
    assert_close(allocation.period_budget, 3000.0 / 29.0 * 1.1, 1e-9);
    assert!(allocation.graph_budget >= allocation.period_budget);

    let boost = allocation.parameters.export_budget_boost;
    assert!(!allocation.exported_nodes().is_empty());
    for (node, result) in &allocation.per_node_results {
        if result.is_exported {
            assert_close(result.export_budget, result.period_media_budget * boost, 1e-9);
            assert!(result.period_total_budget > 0.0, "{node} exported without budget");
        } else {
            assert_eq!(result.export_budget, 0.0);
            assert_eq!(result.period_impression_cap, 0.0);
        }
    }
}

#[test]
fn history_budgets_respect_the_tier_cap() {
    let engine = engine();
    let mut allocation = after_first_cycle(&engine);
    for node in allocation.per_node_results.keys() {
        allocation
            .node_metrics
            .insert(node.clone(), steady_metrics(24, 1000.0, 1.5));
    }
    allocation.as_of = CAMPAIGN_START + Duration::days(1);

    let allocation = engine
        .get_budget_allocations(allocation, false)
        .expect("reallocation should succeed");

    let params = &allocation.parameters;
    for (node, result) in &allocation.per_node_results {
        let cap = allocation.period_budget * params.tier_budget_fraction(node.tier());
        assert!(
            result.period_total_budget <= cap + 1e-9,
            "{node} budget {} above tier cap {cap}",
            result.period_total_budget
        );
    }
}

#[test]
fn exported_nodes_without_metrics_are_backfilled() {
    let engine = engine();
    let mut allocation = after_first_cycle(&engine);
    allocation.as_of = CAMPAIGN_START + Duration::days(1);

    let allocation = engine
        .get_budget_allocations(allocation, false)
        .expect("reallocation should succeed");

    assert_eq!(allocation.node_metrics.len(), 15);
    assert_eq!(allocation.last_phase, Some(AllocationPhase::RiseNoInsight));
    assert_eq!(allocation.exported_nodes().len(), 15);
}

#[test]
fn force_initial_reruns_cold_start_despite_history() {
    let engine = engine();
    let allocation = after_first_cycle(&engine);

    let allocation = engine
        .get_budget_allocations(allocation, true)
        .expect("forced cold start should succeed");

    assert_eq!(allocation.last_phase, Some(AllocationPhase::Initial));
}

#[test]
fn allocation_without_valuations_is_rejected() {
    let err = engine()
        .get_budget_allocations(empty_allocation("campaign-empty", 100.0), false)
        .expect_err("no nodes should fail");
    assert_eq!(err.kind, AllocationErrorKind::MissingValuations);
}

#[test]
fn campaign_ending_before_it_starts_is_rejected() {
    let mut allocation = allocation_with(&[(MeasureSet::single(1), 5.0)]);
    allocation.campaign_end = allocation.campaign_start;

    let err = engine()
        .get_budget_allocations(allocation, false)
        .expect_err("zero-length campaign should fail");

    assert_eq!(err.kind, AllocationErrorKind::InvalidRequest);
    assert!(err.message.contains("must end after it starts"));
}

#[test]
fn negative_remaining_budget_is_rejected() {
    let mut allocation = allocation_with(&[(MeasureSet::single(1), 5.0)]);
    allocation.remaining_budget = -1.0;

    let err = engine()
        .get_budget_allocations(allocation, false)
        .expect_err("negative budget should fail");

    assert_eq!(err.kind, AllocationErrorKind::InvalidRequest);
}

#[test]
fn invalid_stored_parameters_are_rejected() {
    let mut allocation = allocation_with(&[(MeasureSet::single(1), 5.0)]);
    allocation.parameters.max_export_nodes = 0;

    let err = engine()
        .get_budget_allocations(allocation, false)
        .expect_err("zero export nodes should fail");

    assert_eq!(err.kind, AllocationErrorKind::InvalidParameter);
}

#[test]
fn export_counts_skip_unknown_nodes_and_count_duplicates_once() {
    let allocation = allocation_with(&[
        (MeasureSet::single(1), 5.0),
        (MeasureSet::single(2), 5.0),
    ]);

    let allocation = engine().increment_export_counts(
        allocation,
        &[
            MeasureSet::single(1),
            MeasureSet::single(1),
            MeasureSet::single(9),
        ],
    );

    assert_eq!(allocation.per_node_results[&MeasureSet::single(1)].export_count, 1);
    assert_eq!(allocation.per_node_results[&MeasureSet::single(2)].export_count, 0);
    assert!(!allocation.per_node_results.contains_key(&MeasureSet::single(9)));
}

#[test]
fn worker_pool_honors_configured_thread_count() {
    let config = persona_budget::config::EngineConfig { worker_threads: 2 };
    let engine = AllocationEngine::new(&config).expect("pool should build");
    assert_eq!(engine.worker_threads(), 2);
}
