use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    allocation::params::AllocationParameters,
    delivery::NodeDeliveryMetrics,
    lattice::{MeasureSet, keyed},
    types::Money,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationPhase {
    Initial,
    RiseNoInsight,
    RiseUnderBudget,
    Maximize,
    MaximizeAtCapacity,
    Rarify,
}

impl AllocationPhase {
    pub fn is_rise(self) -> bool {
        matches!(self, Self::RiseNoInsight | Self::RiseUnderBudget)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerNodeBudgetAllocationResult {
    pub valuation: Money,
    #[serde(default)]
    pub period_total_budget: Money,
    #[serde(default)]
    pub period_media_budget: Money,
    #[serde(default)]
    pub export_budget: Money,
    #[serde(default)]
    pub period_impression_cap: f64,
    #[serde(default)]
    pub max_bid: Money,
    #[serde(default)]
    pub node_score: f64,
    #[serde(default = "neutral_lineage_penalty")]
    pub lineage_penalty: f64,
    #[serde(default)]
    pub node_is_ineligible: bool,
    #[serde(default)]
    pub export_count: u64,
    #[serde(default)]
    pub return_on_ad_spend: f64,
    #[serde(default)]
    pub is_exported: bool,
}

fn neutral_lineage_penalty() -> f64 {
    1.0
}

impl PerNodeBudgetAllocationResult {
    pub fn new(valuation: Money) -> Self {
        Self {
            valuation,
            period_total_budget: 0.0,
            period_media_budget: 0.0,
            export_budget: 0.0,
            period_impression_cap: 0.0,
            max_bid: 0.0,
            node_score: 0.0,
            lineage_penalty: neutral_lineage_penalty(),
            node_is_ineligible: false,
            export_count: 0,
            return_on_ad_spend: 0.0,
            is_exported: false,
        }
    }

    pub fn was_exported(&self) -> bool {
        self.export_count > 0
    }

    /// Drops every per-cycle output, keeping valuation and export history.
    pub fn reset_cycle_outputs(&mut self) {
        self.period_total_budget = 0.0;
        self.period_media_budget = 0.0;
        self.export_budget = 0.0;
        self.period_impression_cap = 0.0;
        self.max_bid = 0.0;
        self.node_score = 0.0;
        self.lineage_penalty = neutral_lineage_penalty();
        self.node_is_ineligible = false;
        self.return_on_ad_spend = 0.0;
        self.is_exported = false;
    }

    pub fn clear_export(&mut self) {
        self.export_budget = 0.0;
        self.period_impression_cap = 0.0;
        self.is_exported = false;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedNode {
    pub measure_set: MeasureSet,
    pub export_budget: Money,
    pub period_impression_cap: f64,
    pub max_bid: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetAllocation {
    pub campaign_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub campaign_start: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub campaign_end: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub as_of: OffsetDateTime,
    pub total_budget: Money,
    pub remaining_budget: Money,
    #[serde(default)]
    pub period_budget: Money,
    #[serde(default)]
    pub graph_budget: Money,
    #[serde(default)]
    pub parameters: AllocationParameters,
    #[serde(default, with = "keyed")]
    pub per_node_results: BTreeMap<MeasureSet, PerNodeBudgetAllocationResult>,
    #[serde(default, with = "keyed")]
    pub node_metrics: BTreeMap<MeasureSet, NodeDeliveryMetrics>,
    #[serde(default)]
    pub last_phase: Option<AllocationPhase>,
    #[serde(default)]
    pub last_run_id: Option<Uuid>,
}

impl BudgetAllocation {
    pub fn new(
        campaign_id: impl Into<String>,
        campaign_start: OffsetDateTime,
        campaign_end: OffsetDateTime,
        as_of: OffsetDateTime,
        total_budget: Money,
        remaining_budget: Money,
    ) -> Self {
        Self {
            campaign_id: campaign_id.into(),
            campaign_start,
            campaign_end,
            as_of,
            total_budget,
            remaining_budget,
            period_budget: 0.0,
            graph_budget: 0.0,
            parameters: AllocationParameters::default(),
            per_node_results: BTreeMap::new(),
            node_metrics: BTreeMap::new(),
            last_phase: None,
            last_run_id: None,
        }
    }

    pub fn with_parameters(mut self, parameters: AllocationParameters) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn remaining_hours(&self) -> f64 {
        ((self.campaign_end - self.as_of).as_seconds_f64() / 3600.0).max(0.0)
    }

    pub fn elapsed_fraction(&self) -> f64 {
        let total = (self.campaign_end - self.campaign_start).as_seconds_f64();
        if total <= 0.0 {
            return 1.0;
        }
        ((self.as_of - self.campaign_start).as_seconds_f64() / total).clamp(0.0, 1.0)
    }

    /// Budget for the coming period when spend is spread evenly over the
    /// remaining periods, never more than what is left.
    pub fn even_period_budget(&self) -> Money {
        let periods = (self.remaining_hours() / self.parameters.period_hours).max(1.0);
        self.remaining_budget.max(0.0) / periods
    }

    pub fn has_export_history(&self) -> bool {
        self.per_node_results
            .values()
            .any(PerNodeBudgetAllocationResult::was_exported)
    }

    pub fn exported_nodes(&self) -> Vec<ExportedNode> {
        self.per_node_results
            .iter()
            .filter(|(_, result)| result.is_exported)
            .map(|(measure_set, result)| ExportedNode {
                measure_set: measure_set.clone(),
                export_budget: result.export_budget,
                period_impression_cap: result.period_impression_cap,
                max_bid: result.max_bid,
            })
            .collect()
    }

    pub fn total_export_budget(&self) -> Money {
        self.per_node_results
            .values()
            .filter(|result| result.is_exported)
            .map(|result| result.export_budget)
            .sum()
    }
}
