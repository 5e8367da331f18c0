use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{lattice::MeasureId, types::Money};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplicitValuation {
    pub measures: Vec<MeasureId>,
    pub valuation: Money,
}

impl ExplicitValuation {
    pub fn single(measure: MeasureId, valuation: Money) -> Self {
        Self {
            measures: vec![measure],
            valuation,
        }
    }

    pub fn combination(measures: impl Into<Vec<MeasureId>>, valuation: Money) -> Self {
        Self {
            measures: measures.into(),
            valuation,
        }
    }
}

/// Valuation rules for one campaign. Measures sharing a grouping key are
/// alternatives (OR); distinct groups combine (AND).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignDefinition {
    pub campaign_id: String,
    pub max_persona_valuation: Money,
    #[serde(default)]
    pub measure_groupings: BTreeMap<MeasureId, String>,
    #[serde(default)]
    pub explicit_valuations: Vec<ExplicitValuation>,
    #[serde(default)]
    pub pinned_measures: Vec<MeasureId>,
}

impl CampaignDefinition {
    pub fn new(campaign_id: impl Into<String>, max_persona_valuation: Money) -> Self {
        Self {
            campaign_id: campaign_id.into(),
            max_persona_valuation,
            measure_groupings: BTreeMap::new(),
            explicit_valuations: Vec::new(),
            pinned_measures: Vec::new(),
        }
    }

    pub fn with_valuation(mut self, valuation: ExplicitValuation) -> Self {
        self.explicit_valuations.push(valuation);
        self
    }

    pub fn with_grouping(mut self, measure: MeasureId, group: impl Into<String>) -> Self {
        self.measure_groupings.insert(measure, group.into());
        self
    }

    pub fn with_pinned(mut self, measure: MeasureId) -> Self {
        self.pinned_measures.push(measure);
        self
    }
}
