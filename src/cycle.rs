use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    allocation::{AllocationParameters, AllocationPhase},
    engine::AllocationEngine,
    lattice::MeasureSet,
    store::{AllocationStore, CampaignStore, ExportSink},
    types::Money,
};

#[derive(Clone)]
pub struct CycleStores {
    pub campaigns: Arc<dyn CampaignStore>,
    pub allocations: Arc<dyn AllocationStore>,
    pub exports: Arc<dyn ExportSink>,
}

impl CycleStores {
    /// One object serving every role, e.g. a file or in-memory store.
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: CampaignStore + AllocationStore + ExportSink + 'static,
    {
        Self {
            campaigns: store.clone(),
            allocations: store.clone(),
            exports: store,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub campaign_id: String,
    pub run_id: Option<Uuid>,
    pub phase: Option<AllocationPhase>,
    pub period_budget: Money,
    pub exported_nodes: usize,
    pub total_export_budget: Money,
}

#[derive(Debug, Clone)]
pub struct CycleRequest {
    pub campaign_id: String,
    pub as_of: OffsetDateTime,
    pub force_initial: bool,
    /// Replaces the stored parameters when set.
    pub parameters: Option<AllocationParameters>,
}

impl CycleRequest {
    pub fn new(campaign_id: impl Into<String>, as_of: OffsetDateTime) -> Self {
        Self {
            campaign_id: campaign_id.into(),
            as_of,
            force_initial: false,
            parameters: None,
        }
    }

    pub fn force_initial(mut self, force_initial: bool) -> Self {
        self.force_initial = force_initial;
        self
    }

    pub fn with_parameters(mut self, parameters: AllocationParameters) -> Self {
        self.parameters = Some(parameters);
        self
    }
}

/// Loads a campaign and its prior allocation, allocates on the blocking
/// pool, records the exports, persists the result, and forwards the exports.
#[tracing::instrument(
    name = "run_allocation_cycle",
    target = "cycle",
    skip(engine, stores, request),
    fields(campaign_id = %request.campaign_id)
)]
pub async fn run_allocation_cycle(
    engine: Arc<AllocationEngine>,
    stores: &CycleStores,
    request: CycleRequest,
) -> Result<CycleReport> {
    let campaign_id = request.campaign_id.clone();
    let campaign = stores
        .campaigns
        .load_campaign(&campaign_id)
        .await
        .with_context(|| format!("failed to load campaign '{campaign_id}'"))?;
    let mut allocation = stores
        .allocations
        .load_allocation(&campaign_id)
        .await
        .with_context(|| format!("failed to load allocation for '{campaign_id}'"))?;

    allocation.as_of = request.as_of;
    if let Some(parameters) = request.parameters {
        allocation.parameters = parameters;
    }

    let force_initial = request.force_initial;
    let worker_engine = engine.clone();
    let allocation = tokio::task::spawn_blocking(move || {
        worker_engine.populate_valuations(&mut allocation, &campaign)?;
        worker_engine.get_budget_allocations(allocation, force_initial)
    })
    .await
    .map_err(|err| anyhow!("allocation task for '{campaign_id}' failed: {err}"))?
    .with_context(|| format!("allocation failed for '{campaign_id}'"))?;

    let exports = allocation.exported_nodes();
    let exported: Vec<MeasureSet> = exports
        .iter()
        .map(|export| export.measure_set.clone())
        .collect();
    let allocation = engine.increment_export_counts(allocation, &exported);

    stores
        .allocations
        .save_allocation(&allocation)
        .await
        .with_context(|| format!("failed to save allocation for '{campaign_id}'"))?;
    let report = CycleReport {
        campaign_id: campaign_id.clone(),
        run_id: allocation.last_run_id,
        phase: allocation.last_phase,
        period_budget: allocation.period_budget,
        exported_nodes: exports.len(),
        total_export_budget: allocation.total_export_budget(),
    };
    stores
        .exports
        .forward_exports(&campaign_id, exports)
        .await
        .with_context(|| format!("failed to forward exports for '{campaign_id}'"))?;

    tracing::info!(
        target: "cycle",
        campaign_id = %campaign_id,
        phase = ?report.phase,
        exported = report.exported_nodes,
        total_export_budget = report.total_export_budget,
        "allocation_cycle_completed"
    );
    Ok(report)
}
