use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::{
    allocation::cost::CostModel,
    delivery::types::{DeliveryRates, HOURS_PER_WEEK, HourlyDelivery, Horizon, Lookback},
};

/// Read-only delivery view the allocators work against.
pub trait EffectiveNodeMetrics: Send + Sync {
    fn lifetime_impressions(&self) -> f64;

    fn lifetime_media_spend(&self) -> f64;

    fn lifetime_eligible_hours(&self) -> u64;

    fn lifetime_hours(&self) -> u64;

    fn rates(&self, lookback: Lookback) -> DeliveryRates;

    /// One-week window when it outperforms the two-day window, the two-day
    /// window otherwise, lifetime when neither window delivered anything.
    fn effective_lookback(&self) -> Lookback {
        let two_days = self.rates(Lookback::TwoDays).impressions_per_hour;
        let one_week = self.rates(Lookback::OneWeek).impressions_per_hour;
        if two_days <= 0.0 && one_week <= 0.0 {
            Lookback::Lifetime
        } else if one_week > two_days {
            Lookback::OneWeek
        } else {
            Lookback::TwoDays
        }
    }

    fn effective_rates(&self) -> DeliveryRates {
        self.rates(self.effective_lookback())
    }

    fn calc_effective_impression_rate(&self) -> f64 {
        self.effective_rates().impressions_per_hour
    }

    fn calc_effective_media_spend_rate(&self) -> f64 {
        self.effective_rates().media_spend_per_hour
    }

    fn calc_effective_impressions(&self, horizon: Horizon) -> f64 {
        match horizon {
            Horizon::Lifetime => self.lifetime_impressions(),
            Horizon::Hours(hours) => self.calc_effective_impression_rate() * hours.max(0.0),
        }
    }

    fn calc_effective_media_spend(&self, horizon: Horizon) -> f64 {
        match horizon {
            Horizon::Lifetime => self.lifetime_media_spend(),
            Horizon::Hours(hours) => self.calc_effective_media_spend_rate() * hours.max(0.0),
        }
    }

    fn calc_effective_total_spend(&self, cost_model: &CostModel, horizon: Horizon) -> f64 {
        match horizon {
            Horizon::Lifetime => {
                cost_model.total_spend(self.lifetime_media_spend(), self.lifetime_impressions())
            }
            Horizon::Hours(hours) => {
                let rates = self.effective_rates();
                cost_model.total_spend(rates.media_spend_per_hour, rates.impressions_per_hour)
                    * hours.max(0.0)
            }
        }
    }

    /// Total spend per thousand impressions at the effective rates.
    fn effective_total_ecpm(&self, cost_model: &CostModel) -> f64 {
        let rates = self.effective_rates();
        if rates.impressions_per_hour <= 0.0 {
            return 0.0;
        }
        cost_model.total_spend(rates.media_spend_per_hour, rates.impressions_per_hour)
            / rates.impressions_per_hour
            * 1000.0
    }

    fn has_history(&self) -> bool {
        self.lifetime_hours() > 0
    }

    fn has_delivery(&self) -> bool {
        self.lifetime_impressions() > 0.0
    }

    fn is_ineligible(&self) -> bool {
        self.lifetime_eligible_hours() > 0 && self.lifetime_impressions() <= 0.0
    }
}

fn empty_profile() -> Vec<HourlyDelivery> {
    vec![HourlyDelivery::default(); HOURS_PER_WEEK]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDeliveryMetrics {
    #[serde(default = "empty_profile")]
    hourly: Vec<HourlyDelivery>,
    #[serde(default)]
    lifetime_impressions: f64,
    #[serde(default)]
    lifetime_media_spend: f64,
    #[serde(default)]
    lifetime_hours: u64,
    #[serde(default)]
    lifetime_eligible_hours: u64,
    #[serde(default)]
    last_hour_of_week: Option<usize>,
    #[serde(skip)]
    rate_cache: DashMap<Lookback, DeliveryRates>,
}

impl Default for NodeDeliveryMetrics {
    fn default() -> Self {
        Self {
            hourly: empty_profile(),
            lifetime_impressions: 0.0,
            lifetime_media_spend: 0.0,
            lifetime_hours: 0,
            lifetime_eligible_hours: 0,
            last_hour_of_week: None,
            rate_cache: DashMap::new(),
        }
    }
}

impl NodeDeliveryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one reported hour. `hour_of_week` wraps modulo 168.
    pub fn record_hour(
        &mut self,
        hour_of_week: usize,
        impressions: f64,
        media_spend: f64,
        eligible: bool,
    ) {
        let hour = hour_of_week % HOURS_PER_WEEK;
        if self.hourly.len() != HOURS_PER_WEEK {
            self.hourly.resize(HOURS_PER_WEEK, HourlyDelivery::default());
        }
        self.hourly[hour].push(impressions, media_spend, eligible);

        self.lifetime_impressions += impressions.max(0.0);
        self.lifetime_media_spend += media_spend.max(0.0);
        self.lifetime_hours = self.lifetime_hours.saturating_add(1);
        if eligible {
            self.lifetime_eligible_hours = self.lifetime_eligible_hours.saturating_add(1);
        }
        self.last_hour_of_week = Some(hour);
        self.rate_cache.clear();
    }

    pub fn last_hour_of_week(&self) -> Option<usize> {
        self.last_hour_of_week
    }

    pub fn bucket(&self, hour_of_week: usize) -> Option<&HourlyDelivery> {
        self.hourly.get(hour_of_week % HOURS_PER_WEEK)
    }

    fn compute_rates(&self, lookback: Lookback) -> DeliveryRates {
        let Some(window) = lookback.window_hours() else {
            if self.lifetime_hours == 0 {
                return DeliveryRates::default();
            }
            let hours = self.lifetime_hours as f64;
            return DeliveryRates {
                impressions_per_hour: self.lifetime_impressions / hours,
                media_spend_per_hour: self.lifetime_media_spend / hours,
            };
        };

        let Some(last_hour) = self.last_hour_of_week else {
            return DeliveryRates::default();
        };

        let mut observed = 0usize;
        let mut impressions = 0.0;
        let mut media_spend = 0.0;
        for offset in 0..window {
            let hour = (last_hour + HOURS_PER_WEEK - offset % HOURS_PER_WEEK) % HOURS_PER_WEEK;
            let Some(bucket) = self.hourly.get(hour) else {
                continue;
            };
            if !bucket.is_observed() {
                continue;
            }
            observed += 1;
            impressions += bucket.average_impressions();
            media_spend += bucket.average_media_spend();
        }

        if observed == 0 {
            return DeliveryRates::default();
        }
        DeliveryRates {
            impressions_per_hour: impressions / observed as f64,
            media_spend_per_hour: media_spend / observed as f64,
        }
    }
}

impl EffectiveNodeMetrics for NodeDeliveryMetrics {
    fn lifetime_impressions(&self) -> f64 {
        self.lifetime_impressions
    }

    fn lifetime_media_spend(&self) -> f64 {
        self.lifetime_media_spend
    }

    fn lifetime_eligible_hours(&self) -> u64 {
        self.lifetime_eligible_hours
    }

    fn lifetime_hours(&self) -> u64 {
        self.lifetime_hours
    }

    fn rates(&self, lookback: Lookback) -> DeliveryRates {
        if let Some(cached) = self.rate_cache.get(&lookback) {
            return *cached;
        }
        let rates = self.compute_rates(lookback);
        self.rate_cache.insert(lookback, rates);
        rates
    }
}
