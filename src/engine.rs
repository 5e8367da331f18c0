use std::collections::{BTreeMap, BTreeSet};

use rayon::{ThreadPool, ThreadPoolBuilder};
use uuid::Uuid;

use crate::{
    allocation::{
        AllocationError, AllocationParametersBuilder, AllocationPhase, BudgetAllocation,
        PerNodeBudgetAllocationResult,
        error::{internal_error, invalid_request, missing_valuations},
        initial::allocate_initial,
        reallocator::reallocate,
    },
    config::EngineConfig,
    lattice::MeasureSet,
    types::Money,
    valuation::{self, CampaignDefinition, ValuationError},
};

/// Entry point for valuation and budget allocation. All data-parallel work
/// runs on the engine's own worker pool.
pub struct AllocationEngine {
    pool: ThreadPool,
}

impl AllocationEngine {
    pub fn new(config: &EngineConfig) -> Result<Self, AllocationError> {
        let mut builder =
            ThreadPoolBuilder::new().thread_name(|index| format!("persona-budget-worker-{index}"));
        if config.worker_threads > 0 {
            builder = builder.num_threads(config.worker_threads);
        }
        let pool = builder
            .build()
            .map_err(|err| internal_error(format!("failed to build worker pool: {err}")))?;
        Ok(Self { pool })
    }

    pub fn with_default_pool() -> Result<Self, AllocationError> {
        Self::new(&EngineConfig::default())
    }

    pub fn worker_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    pub fn get_valuations(
        &self,
        campaign: &CampaignDefinition,
    ) -> Result<BTreeMap<MeasureSet, Money>, ValuationError> {
        self.pool.install(|| valuation::get_valuations(campaign))
    }

    /// Aligns the node results with the campaign's lattice: new nodes are
    /// added, valuations refreshed, export counts kept, vanished nodes dropped.
    #[tracing::instrument(
        name = "populate_valuations",
        target = "allocation",
        skip(self, allocation, campaign),
        fields(campaign_id = %campaign.campaign_id)
    )]
    pub fn populate_valuations(
        &self,
        allocation: &mut BudgetAllocation,
        campaign: &CampaignDefinition,
    ) -> Result<(), AllocationError> {
        if allocation.campaign_id != campaign.campaign_id {
            return Err(invalid_request(format!(
                "allocation for campaign '{}' cannot take valuations of campaign '{}'",
                allocation.campaign_id, campaign.campaign_id
            )));
        }

        let valuations = self.get_valuations(campaign)?;
        let before = allocation.per_node_results.len();
        allocation
            .per_node_results
            .retain(|node, _| valuations.contains_key(node));
        let dropped = before - allocation.per_node_results.len();

        for (node, valuation) in valuations {
            allocation
                .per_node_results
                .entry(node)
                .and_modify(|result| result.valuation = valuation)
                .or_insert_with(|| PerNodeBudgetAllocationResult::new(valuation));
        }

        tracing::info!(
            target: "allocation",
            campaign_id = %allocation.campaign_id,
            nodes = allocation.per_node_results.len(),
            dropped,
            "valuations_populated"
        );
        Ok(())
    }

    /// Runs one allocation cycle. Cold start when no node was ever exported
    /// or when `force_initial` is set, the history-informed path otherwise.
    #[tracing::instrument(
        name = "get_budget_allocations",
        target = "allocation",
        skip(self, allocation),
        fields(campaign_id = %allocation.campaign_id)
    )]
    pub fn get_budget_allocations(
        &self,
        mut allocation: BudgetAllocation,
        force_initial: bool,
    ) -> Result<BudgetAllocation, AllocationError> {
        validate_request(&allocation)?;
        allocation.parameters =
            AllocationParametersBuilder::from_parameters(allocation.parameters.clone()).build()?;

        let run_id = Uuid::now_v7();
        let cold_start = force_initial || !allocation.has_export_history();
        let phase = self.pool.install(|| {
            if cold_start {
                allocate_initial(&mut allocation);
                AllocationPhase::Initial
            } else {
                reallocate(&mut allocation)
            }
        });
        allocation.last_run_id = Some(run_id);

        tracing::info!(
            target: "allocation",
            campaign_id = %allocation.campaign_id,
            run_id = %run_id,
            phase = ?phase,
            period_budget = allocation.period_budget,
            exported = allocation.exported_nodes().len(),
            total_export_budget = allocation.total_export_budget(),
            "budget_allocations_computed"
        );
        Ok(allocation)
    }

    pub fn increment_export_counts(
        &self,
        mut allocation: BudgetAllocation,
        measure_sets: &[MeasureSet],
    ) -> BudgetAllocation {
        let unique: BTreeSet<&MeasureSet> = measure_sets.iter().collect();
        for node in unique {
            match allocation.per_node_results.get_mut(node) {
                Some(result) => result.export_count = result.export_count.saturating_add(1),
                None => tracing::warn!(
                    target: "allocation",
                    campaign_id = %allocation.campaign_id,
                    node = %node,
                    "export_count_for_unknown_node_skipped"
                ),
            }
        }
        allocation
    }
}

fn validate_request(allocation: &BudgetAllocation) -> Result<(), AllocationError> {
    if allocation.campaign_end <= allocation.campaign_start {
        return Err(invalid_request(format!(
            "campaign '{}' must end after it starts",
            allocation.campaign_id
        )));
    }
    for (name, value) in [
        ("total_budget", allocation.total_budget),
        ("remaining_budget", allocation.remaining_budget),
    ] {
        if !value.is_finite() || value < 0.0 {
            return Err(invalid_request(format!(
                "campaign '{}' {name} must be a non-negative number, got {value}",
                allocation.campaign_id
            )));
        }
    }
    if allocation.per_node_results.is_empty() {
        return Err(missing_valuations(format!(
            "campaign '{}' has no node valuations",
            allocation.campaign_id
        )));
    }
    Ok(())
}
