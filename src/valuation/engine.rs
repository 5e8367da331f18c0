use std::collections::{BTreeMap, BTreeSet};

use rayon::prelude::*;

use crate::{
    lattice::{MeasureId, MeasureSet},
    types::{Money, round_money},
    valuation::{
        error::{ValuationError, configuration_error},
        types::CampaignDefinition,
    },
};

const CAP_TOLERANCE: f64 = 1e-9;

/// Largest lattice a campaign may define, counting the empty set.
pub const MAX_LATTICE_NODES: usize = 1 << 20;

#[derive(Debug, Clone)]
struct MeasureValue {
    valuation: Money,
    listed_at: usize,
}

#[derive(Debug, Clone)]
pub struct ValuationModel {
    max_persona_valuation: Money,
    values: BTreeMap<MeasureId, MeasureValue>,
    groups: Vec<Vec<MeasureId>>,
    group_of: BTreeMap<MeasureId, usize>,
    persona_by_group: Vec<MeasureId>,
    overrides: Vec<(MeasureSet, Money)>,
    pinned_groups: BTreeSet<usize>,
    default_bonus: f64,
}

impl ValuationModel {
    pub fn from_campaign(campaign: &CampaignDefinition) -> Result<Self, ValuationError> {
        let cap = campaign.max_persona_valuation;
        if !cap.is_finite() || cap <= 0.0 {
            return Err(configuration_error(format!(
                "campaign '{}' max_persona_valuation must be positive, got {}",
                campaign.campaign_id, cap
            )));
        }

        let mut values: BTreeMap<MeasureId, MeasureValue> = BTreeMap::new();
        let mut listed: Vec<MeasureId> = Vec::new();
        let mut raw_overrides: Vec<(MeasureSet, Money)> = Vec::new();
        for explicit in &campaign.explicit_valuations {
            if !explicit.valuation.is_finite() || explicit.valuation < 0.0 {
                return Err(configuration_error(format!(
                    "campaign '{}' has an explicit valuation that is negative or not finite: {}",
                    campaign.campaign_id, explicit.valuation
                )));
            }
            let measures: MeasureSet = explicit.measures.iter().copied().collect();
            match measures.len() {
                0 => {
                    return Err(configuration_error(format!(
                        "campaign '{}' has an explicit valuation without measures",
                        campaign.campaign_id
                    )));
                }
                1 => {
                    let measure = explicit.measures[0];
                    if values.contains_key(&measure) {
                        tracing::warn!(
                            target: "valuation",
                            campaign_id = %campaign.campaign_id,
                            measure,
                            "duplicate_single_measure_valuation_ignored"
                        );
                        continue;
                    }
                    values.insert(
                        measure,
                        MeasureValue {
                            valuation: explicit.valuation,
                            listed_at: listed.len(),
                        },
                    );
                    listed.push(measure);
                }
                _ => raw_overrides.push((measures, explicit.valuation)),
            }
        }

        if listed.len() < 2 {
            return Err(configuration_error(format!(
                "campaign '{}' needs at least two single-measure valuations, found {}",
                campaign.campaign_id,
                listed.len()
            )));
        }

        for (measures, _) in &raw_overrides {
            if let Some(unvalued) = measures.iter().find(|m| !values.contains_key(m)) {
                return Err(configuration_error(format!(
                    "campaign '{}' override {} references unvalued measure {}",
                    campaign.campaign_id, measures, unvalued
                )));
            }
        }

        let mut groups: Vec<Vec<MeasureId>> = Vec::new();
        let mut group_of: BTreeMap<MeasureId, usize> = BTreeMap::new();
        let mut group_index_by_key: BTreeMap<&str, usize> = BTreeMap::new();
        for measure in &listed {
            let index = match campaign.measure_groupings.get(measure) {
                Some(key) => *group_index_by_key.entry(key.as_str()).or_insert_with(|| {
                    groups.push(Vec::new());
                    groups.len() - 1
                }),
                None => {
                    groups.push(Vec::new());
                    groups.len() - 1
                }
            };
            groups[index].push(*measure);
            group_of.insert(*measure, index);
        }

        let lattice_size = groups.iter().try_fold(1usize, |size, members| {
            size.checked_mul(members.len() + 1)
                .filter(|size| *size <= MAX_LATTICE_NODES)
        });
        if lattice_size.is_none() {
            return Err(configuration_error(format!(
                "campaign '{}' defines a lattice above {} nodes across {} measure groups",
                campaign.campaign_id,
                MAX_LATTICE_NODES,
                groups.len()
            )));
        }

        let mut pinned_groups = BTreeSet::new();
        for pinned in &campaign.pinned_measures {
            let Some(group) = group_of.get(pinned) else {
                return Err(configuration_error(format!(
                    "campaign '{}' pins unvalued measure {}",
                    campaign.campaign_id, pinned
                )));
            };
            pinned_groups.insert(*group);
        }

        let mut model = Self {
            max_persona_valuation: cap,
            values,
            groups,
            group_of,
            persona_by_group: Vec::new(),
            overrides: raw_overrides,
            pinned_groups,
            default_bonus: 1.0,
        };
        model.persona_by_group = model
            .groups
            .iter()
            .filter_map(|members| model.best_of(members.iter().copied()))
            .collect();
        model.default_bonus = model.compute_default_bonus();
        Ok(model)
    }

    pub fn persona(&self) -> MeasureSet {
        self.persona_by_group.iter().copied().collect()
    }

    pub fn default_bonus(&self) -> f64 {
        self.default_bonus
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    fn value(&self, measure: MeasureId) -> Money {
        self.values
            .get(&measure)
            .map(|entry| entry.valuation)
            .unwrap_or(0.0)
    }

    /// Highest-valued measure, ties going to the one listed first.
    fn best_of(&self, measures: impl Iterator<Item = MeasureId>) -> Option<MeasureId> {
        measures
            .filter_map(|measure| self.values.get(&measure).map(|entry| (measure, entry)))
            .min_by(|(_, lhs), (_, rhs)| {
                rhs.valuation
                    .total_cmp(&lhs.valuation)
                    .then(lhs.listed_at.cmp(&rhs.listed_at))
            })
            .map(|(measure, _)| measure)
    }

    fn compute_default_bonus(&self) -> f64 {
        let persona = self.persona();
        let Some(top) = self.best_of(persona.iter()) else {
            return 1.0;
        };
        let top_value = self.value(top);
        let rest: Money = persona
            .iter()
            .filter(|measure| *measure != top)
            .map(|measure| self.value(measure))
            .sum();
        if rest <= 0.0 {
            return 1.0;
        }
        ((self.max_persona_valuation - top_value) / rest).max(0.0)
    }

    fn is_valid_node(&self, node: &MeasureSet) -> bool {
        self.pinned_groups.iter().all(|group| {
            self.groups[*group]
                .iter()
                .any(|measure| node.contains(*measure))
        })
    }

    /// Every non-empty node taking at most one measure per group.
    pub fn lattice(&self) -> Vec<MeasureSet> {
        let mut nodes: Vec<MeasureSet> = vec![MeasureSet::new()];
        for members in &self.groups {
            let mut extended = Vec::with_capacity(nodes.len() * (members.len() + 1));
            for node in &nodes {
                extended.push(node.clone());
                for measure in members {
                    extended.push(node.with(*measure));
                }
            }
            nodes = extended;
        }
        nodes
            .into_iter()
            .filter(|node| !node.is_empty() && self.is_valid_node(node))
            .collect()
    }

    /// Largest override contained in the node, lowest value on ties.
    fn closest_override(&self, node: &MeasureSet) -> Option<&(MeasureSet, Money)> {
        self.overrides
            .iter()
            .filter(|(measures, _)| measures.is_subset_of(node))
            .min_by(|(lhs, lhs_value), (rhs, rhs_value)| {
                rhs.len()
                    .cmp(&lhs.len())
                    .then(lhs_value.total_cmp(rhs_value))
            })
    }

    pub fn value_node(&self, node: &MeasureSet) -> Money {
        let (base, rest) = match self.closest_override(node) {
            Some((measures, valuation)) => (*valuation, node.difference(measures)),
            None => match self.best_of(node.iter()) {
                Some(top) => (self.value(top), node.without(top)),
                None => return 0.0,
            },
        };

        let rest_sum: Money = rest.iter().map(|measure| self.value(measure)).sum();
        let represented: BTreeSet<usize> = node
            .iter()
            .filter_map(|measure| self.group_of.get(&measure).copied())
            .collect();
        let completion_sum: Money = rest_sum
            + self
                .persona_by_group
                .iter()
                .enumerate()
                .filter(|(group, _)| !represented.contains(group))
                .map(|(_, measure)| self.value(*measure))
                .sum::<Money>();

        let bonus = if completion_sum > 0.0
            && base + self.default_bonus * completion_sum > self.max_persona_valuation + CAP_TOLERANCE
        {
            ((self.max_persona_valuation - base) / completion_sum).max(0.0)
        } else {
            self.default_bonus
        };

        round_money(base + bonus * rest_sum)
    }

    /// Values the lattice tier by tier in ascending cardinality; nodes within
    /// a tier are valued in parallel and merged before the next tier starts.
    pub fn valuate(&self) -> BTreeMap<MeasureSet, Money> {
        let mut tiers: BTreeMap<usize, Vec<MeasureSet>> = BTreeMap::new();
        for node in self.lattice() {
            tiers.entry(node.tier()).or_default().push(node);
        }

        let mut valuations = BTreeMap::new();
        for (tier, nodes) in tiers {
            let tier_values: Vec<(MeasureSet, Money)> = nodes
                .into_par_iter()
                .map(|node| {
                    let value = self.value_node(&node);
                    (node, value)
                })
                .collect();
            tracing::debug!(
                target: "valuation",
                tier,
                nodes = tier_values.len(),
                "tier_valuated"
            );
            valuations.extend(tier_values);
        }
        valuations
    }
}

#[tracing::instrument(
    name = "get_valuations",
    target = "valuation",
    skip(campaign),
    fields(campaign_id = %campaign.campaign_id)
)]
pub fn get_valuations(
    campaign: &CampaignDefinition,
) -> Result<BTreeMap<MeasureSet, Money>, ValuationError> {
    let model = ValuationModel::from_campaign(campaign)?;
    let valuations = model.valuate();
    tracing::info!(
        target: "valuation",
        campaign_id = %campaign.campaign_id,
        groups = model.group_count(),
        nodes = valuations.len(),
        default_bonus = model.default_bonus(),
        persona = %model.persona(),
        "valuations_computed"
    );
    Ok(valuations)
}
