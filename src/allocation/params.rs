use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::allocation::error::{AllocationError, invalid_parameter};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_tier_bounds"))]
pub struct AllocationParameters {
    #[validate(range(min = 0.0, max = 10.0))]
    pub margin: f64,
    #[validate(range(min = 0.0))]
    pub per_mille_fees: f64,
    #[validate(range(exclusive_min = 0.0))]
    pub default_estimated_cpm: f64,
    #[validate(range(min = 0.0))]
    pub data_cost_justification_margin: f64,
    #[validate(range(exclusive_min = 0.0))]
    pub period_hours: f64,
    #[validate(range(min = 1.0))]
    pub budget_buffer: f64,
    #[validate(range(min = 1))]
    pub max_export_nodes: usize,
    #[validate(range(min = 1))]
    pub initial_max_nodes: usize,
    #[validate(range(min = 1))]
    pub initial_top_tier: usize,
    #[validate(range(min = 1))]
    pub initial_tier_count: usize,
    #[validate(range(min = 1.0))]
    pub tier_allotment_growth: f64,
    #[validate(range(min = 1))]
    pub base_tier: usize,
    #[validate(range(min = 1))]
    pub top_tier: usize,
    #[validate(range(min = 1))]
    pub neutral_tier: usize,
    #[validate(range(exclusive_min = 0.0, max = 1.0))]
    pub largest_budget_percent_allowed: f64,
    #[validate(range(min = 0.0, max = 1.0))]
    pub lineage_penalty: f64,
    #[validate(range(min = 0.0, max = 1.0))]
    pub rise_elapsed_threshold: f64,
    #[validate(range(min = 0.0, max = 1.0))]
    pub insight_threshold: f64,
    #[validate(range(min = 1.0))]
    pub graph_budget_multiplier: f64,
    #[validate(range(min = 0.0, max = 1.0))]
    pub graph_budget_remaining_fraction: f64,
    #[validate(range(min = 1.0))]
    pub export_budget_boost: f64,
    #[validate(range(min = 0.0))]
    pub minimum_node_budget: f64,
    #[validate(range(min = 1))]
    pub experimental_spend_window: usize,
    pub rarify_max_swaps: usize,
}

impl Default for AllocationParameters {
    fn default() -> Self {
        Self {
            margin: 0.15,
            per_mille_fees: 0.50,
            default_estimated_cpm: 1.50,
            data_cost_justification_margin: 0.25,
            period_hours: 24.0,
            budget_buffer: 1.10,
            max_export_nodes: 40,
            initial_max_nodes: 30,
            initial_top_tier: 4,
            initial_tier_count: 3,
            tier_allotment_growth: 2.0,
            base_tier: 2,
            top_tier: 4,
            neutral_tier: 3,
            largest_budget_percent_allowed: 0.25,
            lineage_penalty: 0.5,
            rise_elapsed_threshold: 0.25,
            insight_threshold: 0.5,
            graph_budget_multiplier: 1.1,
            graph_budget_remaining_fraction: 0.10,
            export_budget_boost: 1.2,
            minimum_node_budget: 5.0,
            experimental_spend_window: 3,
            rarify_max_swaps: 3,
        }
    }
}

fn validate_tier_bounds(params: &AllocationParameters) -> Result<(), ValidationError> {
    if params.base_tier > params.top_tier {
        return Err(ValidationError::new("base_tier_above_top_tier"));
    }
    Ok(())
}

impl AllocationParameters {
    pub const KEYS: [&'static str; 24] = [
        "margin",
        "per_mille_fees",
        "default_estimated_cpm",
        "data_cost_justification_margin",
        "period_hours",
        "budget_buffer",
        "max_export_nodes",
        "initial_max_nodes",
        "initial_top_tier",
        "initial_tier_count",
        "tier_allotment_growth",
        "base_tier",
        "top_tier",
        "neutral_tier",
        "largest_budget_percent_allowed",
        "lineage_penalty",
        "rise_elapsed_threshold",
        "insight_threshold",
        "graph_budget_multiplier",
        "graph_budget_remaining_fraction",
        "export_budget_boost",
        "minimum_node_budget",
        "experimental_spend_window",
        "rarify_max_swaps",
    ];

    pub fn builder() -> AllocationParametersBuilder {
        AllocationParametersBuilder::new()
    }

    /// Cap on a node's share of the period budget, widened for tiers below
    /// the neutral tier and narrowed above it.
    pub fn tier_budget_fraction(&self, tier: usize) -> f64 {
        let tier = tier.max(1) as f64;
        (self.largest_budget_percent_allowed * self.neutral_tier as f64 / tier).min(1.0)
    }
}

/// Populates [`AllocationParameters`] from named keys, rejecting anything
/// outside [`AllocationParameters::KEYS`].
#[derive(Debug, Clone, Default)]
pub struct AllocationParametersBuilder {
    params: AllocationParameters,
}

impl AllocationParametersBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_parameters(params: AllocationParameters) -> Self {
        Self { params }
    }

    pub fn set(&mut self, key: &str, value: f64) -> Result<&mut Self, AllocationError> {
        if !value.is_finite() {
            return Err(invalid_parameter(format!(
                "parameter '{key}' must be a finite number, got {value}"
            )));
        }

        let params = &mut self.params;
        match key {
            "margin" => params.margin = value,
            "per_mille_fees" => params.per_mille_fees = value,
            "default_estimated_cpm" => params.default_estimated_cpm = value,
            "data_cost_justification_margin" => params.data_cost_justification_margin = value,
            "period_hours" => params.period_hours = value,
            "budget_buffer" => params.budget_buffer = value,
            "max_export_nodes" => params.max_export_nodes = as_count(key, value)?,
            "initial_max_nodes" => params.initial_max_nodes = as_count(key, value)?,
            "initial_top_tier" => params.initial_top_tier = as_count(key, value)?,
            "initial_tier_count" => params.initial_tier_count = as_count(key, value)?,
            "tier_allotment_growth" => params.tier_allotment_growth = value,
            "base_tier" => params.base_tier = as_count(key, value)?,
            "top_tier" => params.top_tier = as_count(key, value)?,
            "neutral_tier" => params.neutral_tier = as_count(key, value)?,
            "largest_budget_percent_allowed" => params.largest_budget_percent_allowed = value,
            "lineage_penalty" => params.lineage_penalty = value,
            "rise_elapsed_threshold" => params.rise_elapsed_threshold = value,
            "insight_threshold" => params.insight_threshold = value,
            "graph_budget_multiplier" => params.graph_budget_multiplier = value,
            "graph_budget_remaining_fraction" => params.graph_budget_remaining_fraction = value,
            "export_budget_boost" => params.export_budget_boost = value,
            "minimum_node_budget" => params.minimum_node_budget = value,
            "experimental_spend_window" => {
                params.experimental_spend_window = as_count(key, value)?
            }
            "rarify_max_swaps" => params.rarify_max_swaps = as_count(key, value)?,
            unknown => {
                return Err(invalid_parameter(format!(
                    "unknown allocation parameter '{unknown}'"
                )));
            }
        }
        Ok(self)
    }

    pub fn apply_overrides(
        &mut self,
        overrides: &BTreeMap<String, f64>,
    ) -> Result<&mut Self, AllocationError> {
        for (key, value) in overrides {
            self.set(key, *value)?;
        }
        Ok(self)
    }

    pub fn build(&self) -> Result<AllocationParameters, AllocationError> {
        self.params
            .validate()
            .map_err(|errors| invalid_parameter(format!("invalid allocation parameters: {errors}")))?;
        Ok(self.params.clone())
    }
}

fn as_count(key: &str, value: f64) -> Result<usize, AllocationError> {
    if value < 0.0 || value.fract() != 0.0 {
        return Err(invalid_parameter(format!(
            "parameter '{key}' must be a non-negative integer, got {value}"
        )));
    }
    Ok(value as usize)
}
