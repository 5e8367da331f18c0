use persona_budget::{
    allocation::{
        AllocationParameters, AllocationPhase, SelectedNode, Selection,
        add_high_budget_nodes_to_make_spend,
        phases::{
            Candidate, PhaseContext, fill_experimental, insight_score, keep_previously_exported,
            run_phases, select_phase,
        },
    },
    lattice::MeasureSet,
};

use crate::assert_close;

fn candidate(node: MeasureSet, budget: f64) -> Candidate {
    Candidate {
        node,
        budget,
        valuation: 5.0,
        node_score: 1.0,
        lineage_penalty: 1.0,
        return_on_ad_spend: 1.0,
        impression_rate: 1.0,
        has_insight: true,
        is_ineligible: false,
        is_justified: true,
        was_exported: true,
    }
}

fn context(candidates: Vec<Candidate>, period_budget: f64, elapsed_fraction: f64) -> PhaseContext {
    PhaseContext {
        params: AllocationParameters::default(),
        period_budget,
        graph_budget: period_budget * 1.1,
        elapsed_fraction,
        candidates,
    }
}

fn selected(node: MeasureSet, budget: f64, value_volume: f64) -> SelectedNode {
    SelectedNode {
        node,
        budget,
        value_volume,
        node_score: 1.0,
    }
}

fn budgets(selection: &Selection) -> Vec<f64> {
    selection.entries().iter().map(|entry| entry.budget).collect()
}

#[test]
fn early_cycles_without_insight_rise_on_fresh_nodes() {
    let candidates = vec![
        Candidate {
            has_insight: false,
            ..candidate(MeasureSet::from([1, 2]), 50.0)
        },
        Candidate {
            has_insight: false,
            ..candidate(MeasureSet::from([1, 3]), 50.0)
        },
    ];
    let ctx = context(candidates, 100.0, 0.1);

    let decision = select_phase(&ctx);

    assert_eq!(decision.phase, AllocationPhase::RiseNoInsight);
    assert_eq!(decision.insight, 0.0);
    assert!(!decision.under_budget);
}

#[test]
fn under_budget_with_insight_rises_on_never_exported_nodes() {
    let candidates = vec![
        candidate(MeasureSet::from([1, 2]), 10.0),
        candidate(MeasureSet::from([1, 3]), 10.0),
    ];
    let ctx = context(candidates, 100.0, 0.5);

    let decision = select_phase(&ctx);

    assert_eq!(decision.phase, AllocationPhase::RiseUnderBudget);
    assert!(decision.under_budget);
    assert_eq!(decision.insight, 1.0);
}

#[test]
fn enough_boosted_budget_with_insight_maximizes() {
    let candidates = vec![
        candidate(MeasureSet::from([1, 2]), 50.0),
        candidate(MeasureSet::from([1, 3]), 50.0),
    ];
    let ctx = context(candidates, 100.0, 0.5);

    assert_eq!(select_phase(&ctx).phase, AllocationPhase::Maximize);
}

#[test]
fn insight_score_only_counts_base_to_top_tiers() {
    let candidates = vec![
        Candidate {
            has_insight: false,
            ..candidate(MeasureSet::from([1]), 0.0)
        },
        candidate(MeasureSet::from([1, 2]), 0.0),
        Candidate {
            has_insight: false,
            ..candidate(MeasureSet::from([1, 2, 3]), 0.0)
        },
    ];
    let ctx = context(candidates, 100.0, 0.5);

    assert_close(insight_score(&ctx), 0.5, 1e-12);
    assert_eq!(insight_score(&context(Vec::new(), 100.0, 0.5)), 0.0);
}

#[test]
fn previously_exported_nodes_are_kept_while_an_experiment_still_fits() {
    let candidates = vec![
        candidate(MeasureSet::from([1]), 40.0),
        candidate(MeasureSet::from([2]), 30.0),
        candidate(MeasureSet::from([3]), 20.0),
        candidate(MeasureSet::from([4]), 10.0),
    ];
    let ctx = context(candidates, 100.0, 0.5);

    let kept = keep_previously_exported(&ctx);

    // 30 would leave 100 - 70 < mean(40, 30) for the next experiment
    assert_eq!(budgets(&kept), vec![40.0, 20.0, 10.0]);
    assert!(!kept.contains(&MeasureSet::from([2])));
}

#[test]
fn keeping_leaves_one_slot_open() {
    let candidates = vec![
        candidate(MeasureSet::from([1]), 5.0),
        candidate(MeasureSet::from([2]), 5.0),
        candidate(MeasureSet::from([3]), 5.0),
    ];
    let mut ctx = context(candidates, 1000.0, 0.5);
    ctx.params.max_export_nodes = 3;

    assert_eq!(keep_previously_exported(&ctx).len(), 2);
}

#[test]
fn experimental_fill_splits_leftover_into_minimum_budgets() {
    let pool: Vec<Candidate> = (1..=10)
        .map(|measure| candidate(MeasureSet::single(measure), 0.0))
        .collect();
    let params = AllocationParameters::default();
    let mut selection = Selection::new();

    let added = fill_experimental(&mut selection, &pool, 40.0, &params);

    assert_eq!(added, 8);
    assert_eq!(selection.len(), 8);
    assert!(selection.entries().iter().all(|entry| entry.budget == 5.0));
    assert_close(selection.total_budget(), 40.0, 1e-12);
}

#[test]
fn experimental_fill_spreads_evenly_when_the_pool_is_small() {
    let pool = vec![
        candidate(MeasureSet::single(1), 0.0),
        candidate(MeasureSet::single(2), 0.0),
    ];
    let params = AllocationParameters::default();
    let mut selection: Selection = [selected(MeasureSet::single(9), 20.0, 1.0)]
        .into_iter()
        .collect();

    let added = fill_experimental(&mut selection, &pool, 100.0, &params);

    assert_eq!(added, 2);
    assert_eq!(budgets(&selection), vec![20.0, 40.0, 40.0]);
}

#[test]
fn high_budget_nodes_are_added_until_spend_is_reached() {
    let mut selection: Selection = [
        selected(MeasureSet::single(1), 10.0, 1.0),
        selected(MeasureSet::single(2), 20.0, 2.0),
    ]
    .into_iter()
    .collect();
    let pool = vec![
        selected(MeasureSet::single(3), 50.0, 1.0),
        selected(MeasureSet::single(4), 40.0, 1.0),
        selected(MeasureSet::single(5), 5.0, 1.0),
        selected(MeasureSet::single(6), 30.0, 1.0),
    ];

    add_high_budget_nodes_to_make_spend(&mut selection, pool, 100.0);

    assert!(!selection.is_under_budget(100.0));
    assert_eq!(selection.len(), 4);
    assert!(selection.contains(&MeasureSet::single(3)));
    assert!(selection.contains(&MeasureSet::single(4)));
    assert!(!selection.contains(&MeasureSet::single(6)));
}

#[test]
fn make_spend_appends_past_the_node_limit_until_spend_is_reached() {
    let mut selection: Selection = [selected(MeasureSet::single(1), 10.0, 1.0)]
        .into_iter()
        .collect();
    let pool = vec![
        selected(MeasureSet::single(2), 15.0, 1.0),
        selected(MeasureSet::single(3), 15.0, 1.0),
    ];

    add_high_budget_nodes_to_make_spend(&mut selection, pool, 20.0);

    assert!(!selection.is_under_budget(20.0));
    assert_eq!(selection.len(), 2);
    assert!(selection.contains(&MeasureSet::single(1)));
    assert!(selection.contains(&MeasureSet::single(2)));
    assert_close(selection.total_budget(), 25.0, 1e-9);
}

#[test]
fn maximize_at_the_node_limit_makes_spend_then_trims_to_capacity() {
    let mut ctx = context(
        vec![
            Candidate {
                return_on_ad_spend: 3.0,
                ..candidate(MeasureSet::single(1), 30.0)
            },
            Candidate {
                return_on_ad_spend: 2.0,
                ..candidate(MeasureSet::single(2), 90.0)
            },
            Candidate {
                return_on_ad_spend: 1.0,
                ..candidate(MeasureSet::single(3), 60.0)
            },
        ],
        100.0,
        0.5,
    );
    ctx.params.max_export_nodes = 1;

    let (phase, selection) = run_phases(&ctx);

    assert_eq!(phase, AllocationPhase::MaximizeAtCapacity);
    assert_eq!(selection.len(), 1);
    assert!(selection.contains(&MeasureSet::single(2)));
    assert_close(selection.total_budget(), 90.0, 1e-9);
}

#[test]
fn rise_without_insight_funds_the_lowest_scored_nodes_first() {
    let fresh = |measure, node_score| Candidate {
        has_insight: false,
        was_exported: false,
        node_score,
        ..candidate(MeasureSet::single(measure), 0.0)
    };
    let ctx = context(vec![fresh(1, 2.0), fresh(2, 1.0), fresh(3, 3.0)], 30.0, 0.1);

    let (phase, selection) = run_phases(&ctx);

    assert_eq!(phase, AllocationPhase::RiseNoInsight);
    let nodes: Vec<&MeasureSet> = selection.entries().iter().map(|entry| &entry.node).collect();
    assert_eq!(
        nodes,
        vec![
            &MeasureSet::single(2),
            &MeasureSet::single(1),
            &MeasureSet::single(3)
        ]
    );
    assert_eq!(budgets(&selection), vec![10.0, 10.0, 10.0]);
}

#[test]
fn rise_under_budget_keeps_proven_nodes_and_tries_lower_tiers_first() {
    let ctx = context(
        vec![
            candidate(MeasureSet::from([1, 2]), 20.0),
            Candidate {
                was_exported: false,
                node_score: 2.0,
                ..candidate(MeasureSet::single(1), 0.0)
            },
            Candidate {
                was_exported: false,
                ..candidate(MeasureSet::from([2, 3]), 0.0)
            },
        ],
        100.0,
        0.5,
    );

    let (phase, selection) = run_phases(&ctx);

    assert_eq!(phase, AllocationPhase::RiseUnderBudget);
    let nodes: Vec<&MeasureSet> = selection.entries().iter().map(|entry| &entry.node).collect();
    assert_eq!(
        nodes,
        vec![
            &MeasureSet::from([1, 2]),
            &MeasureSet::single(1),
            &MeasureSet::from([2, 3])
        ]
    );
    assert_eq!(budgets(&selection), vec![20.0, 40.0, 40.0]);
}

#[test]
fn full_maximize_selection_is_trimmed_to_anticipated_spend() {
    let mut ctx = context(
        vec![
            Candidate {
                return_on_ad_spend: 3.0,
                ..candidate(MeasureSet::from([1, 2]), 60.0)
            },
            Candidate {
                return_on_ad_spend: 2.0,
                ..candidate(MeasureSet::from([1, 3]), 50.0)
            },
            Candidate {
                return_on_ad_spend: 1.0,
                ..candidate(MeasureSet::from([2, 3]), 45.0)
            },
        ],
        100.0,
        0.5,
    );
    ctx.params.max_export_nodes = 2;
    ctx.graph_budget = 110.0;

    let (phase, selection) = run_phases(&ctx);

    assert_eq!(phase, AllocationPhase::MaximizeAtCapacity);
    assert_eq!(selection.len(), 1);
    assert!(selection.contains(&MeasureSet::from([1, 2])));
}

#[test]
fn low_value_volume_nodes_are_swapped_for_rarer_groups() {
    let mut ctx = context(
        vec![
            Candidate {
                return_on_ad_spend: 3.0,
                impression_rate: 10.0,
                ..candidate(MeasureSet::from([1, 2]), 60.0)
            },
            Candidate {
                return_on_ad_spend: 2.0,
                impression_rate: 2.0,
                ..candidate(MeasureSet::from([1, 3]), 40.0)
            },
            Candidate {
                return_on_ad_spend: 0.5,
                node_score: 5.0,
                was_exported: false,
                ..candidate(MeasureSet::from([2, 3]), 25.0)
            },
            Candidate {
                return_on_ad_spend: 0.4,
                node_score: 4.0,
                was_exported: false,
                ..candidate(MeasureSet::from([2, 4]), 20.0)
            },
        ],
        100.0,
        0.5,
    );
    ctx.params.max_export_nodes = 5;
    ctx.graph_budget = 110.0;

    let (phase, selection) = run_phases(&ctx);

    assert_eq!(phase, AllocationPhase::Rarify);
    assert_eq!(selection.len(), 3);
    assert!(selection.contains(&MeasureSet::from([1, 2])));
    assert!(!selection.contains(&MeasureSet::from([1, 3])));
    assert!(selection.contains(&MeasureSet::from([2, 3])));
    assert!(selection.contains(&MeasureSet::from([2, 4])));
    assert_close(selection.total_budget(), 105.0, 1e-9);
}

#[test]
fn maximize_without_better_groups_keeps_its_selection() {
    let mut ctx = context(
        vec![
            Candidate {
                return_on_ad_spend: 3.0,
                ..candidate(MeasureSet::from([1, 2]), 60.0)
            },
            Candidate {
                return_on_ad_spend: 2.0,
                ..candidate(MeasureSet::from([1, 3]), 40.0)
            },
        ],
        100.0,
        0.5,
    );
    ctx.params.max_export_nodes = 5;

    let (phase, selection) = run_phases(&ctx);

    assert_eq!(phase, AllocationPhase::Maximize);
    assert_eq!(selection.len(), 2);
}
