use crate::{
    allocation::{params::AllocationParameters, types::PerNodeBudgetAllocationResult},
    delivery::{EffectiveNodeMetrics, Horizon},
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostModel {
    pub margin: f64,
    pub per_mille_fees: f64,
}

impl CostModel {
    pub fn from_parameters(params: &AllocationParameters) -> Self {
        Self {
            margin: params.margin,
            per_mille_fees: params.per_mille_fees,
        }
    }

    pub fn total_spend(&self, media_spend: f64, impressions: f64) -> f64 {
        media_spend * (1.0 + self.margin) + impressions * self.per_mille_fees / 1000.0
    }

    pub fn non_media_cpm(&self, media_cpm: f64) -> f64 {
        self.per_mille_fees + self.margin * media_cpm.max(0.0)
    }

    /// Fraction of a total budget that reaches media at the given media CPM.
    /// `None` when the CPM is degenerate.
    pub fn media_ratio(&self, media_cpm: f64) -> Option<f64> {
        if media_cpm.is_nan() || media_cpm <= 0.0 {
            return None;
        }
        Some(1.0 / (1.0 + self.margin + self.per_mille_fees / media_cpm))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CapCalculator {
    cost_model: CostModel,
    default_estimated_cpm: f64,
    default_media_ratio: f64,
    data_cost_justification_margin: f64,
    period_hours: f64,
}

impl CapCalculator {
    pub fn new(params: &AllocationParameters) -> Self {
        let cost_model = CostModel::from_parameters(params);
        let default_media_ratio = cost_model
            .media_ratio(params.default_estimated_cpm)
            .unwrap_or(1.0 / (1.0 + params.margin));
        Self {
            cost_model,
            default_estimated_cpm: params.default_estimated_cpm,
            default_media_ratio,
            data_cost_justification_margin: params.data_cost_justification_margin,
            period_hours: params.period_hours,
        }
    }

    pub fn cost_model(&self) -> &CostModel {
        &self.cost_model
    }

    pub fn media_from_total(&self, total: f64, media_cpm: f64) -> f64 {
        let ratio = self
            .cost_model
            .media_ratio(media_cpm)
            .unwrap_or(self.default_media_ratio);
        total.max(0.0) * ratio
    }

    /// Default CPM clipped so media plus non-media cost never exceeds the valuation.
    pub fn synthesized_media_cpm(&self, valuation: f64) -> f64 {
        let ceiling = (valuation - self.cost_model.per_mille_fees) / (1.0 + self.cost_model.margin);
        self.default_estimated_cpm.min(ceiling).max(0.0)
    }

    pub fn estimated_media_cpm(
        &self,
        valuation: f64,
        history: Option<&dyn EffectiveNodeMetrics>,
    ) -> f64 {
        match history {
            Some(metrics) if metrics.has_delivery() => {
                let cpm = metrics.effective_rates().media_ecpm();
                if cpm > 0.0 {
                    cpm
                } else {
                    self.synthesized_media_cpm(valuation)
                }
            }
            _ => self.synthesized_media_cpm(valuation),
        }
    }

    pub fn estimated_non_media_cpm(&self, valuation: f64) -> f64 {
        self.cost_model
            .non_media_cpm(self.default_estimated_cpm.min(valuation.max(0.0)))
    }

    pub fn justifies_data_cost(&self, valuation: f64) -> bool {
        valuation > self.estimated_non_media_cpm(valuation) * (1.0 + self.data_cost_justification_margin)
    }

    /// Recomputes bid ceiling, media budget and impression cap from the
    /// node's assigned `period_total_budget`.
    pub fn apply_caps(
        &self,
        result: &mut PerNodeBudgetAllocationResult,
        history: Option<&dyn EffectiveNodeMetrics>,
    ) {
        let media_cpm = self.estimated_media_cpm(result.valuation, history);
        result.max_bid = (result.valuation - self.cost_model.non_media_cpm(media_cpm)).max(0.0);

        if result.period_total_budget <= 0.0 {
            result.period_media_budget = 0.0;
            result.period_impression_cap = 0.0;
            return;
        }

        result.period_media_budget = self.media_from_total(result.period_total_budget, media_cpm);

        let (prior_impressions, prior_media) = match history {
            Some(metrics) if metrics.has_delivery() => {
                let horizon = Horizon::Hours(self.period_hours);
                (
                    metrics.calc_effective_impressions(horizon),
                    metrics.calc_effective_media_spend(horizon),
                )
            }
            Some(metrics) if metrics.lifetime_eligible_hours() > 0 => (0.0, 0.0),
            _ => {
                // no history: a one-unit prior period delivered at the estimated CPM
                if media_cpm > 0.0 {
                    (1000.0 / media_cpm, 1.0)
                } else {
                    (0.0, 0.0)
                }
            }
        };

        result.period_impression_cap = if prior_media > 0.0 {
            (prior_impressions * result.period_media_budget / prior_media).floor()
        } else {
            0.0
        };
    }
}
