use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

pub const HOURS_PER_WEEK: usize = 168;
pub const ROLLING_SAMPLES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lookback {
    TwoDays,
    OneWeek,
    Lifetime,
}

impl Lookback {
    pub fn window_hours(self) -> Option<usize> {
        match self {
            Self::TwoDays => Some(48),
            Self::OneWeek => Some(HOURS_PER_WEEK),
            Self::Lifetime => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Horizon {
    Hours(f64),
    Lifetime,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRates {
    pub impressions_per_hour: f64,
    pub media_spend_per_hour: f64,
}

impl DeliveryRates {
    pub fn media_ecpm(&self) -> f64 {
        if self.impressions_per_hour <= 0.0 {
            return 0.0;
        }
        self.media_spend_per_hour / self.impressions_per_hour * 1000.0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HourlyDelivery {
    #[serde(default)]
    pub impressions: VecDeque<f64>,
    #[serde(default)]
    pub media_spend: VecDeque<f64>,
    #[serde(default)]
    pub samples: u32,
    #[serde(default)]
    pub eligible_hours: u32,
}

impl HourlyDelivery {
    pub fn push(&mut self, impressions: f64, media_spend: f64, eligible: bool) {
        push_rolling(&mut self.impressions, impressions);
        push_rolling(&mut self.media_spend, media_spend);
        self.samples = self.samples.saturating_add(1);
        if eligible {
            self.eligible_hours = self.eligible_hours.saturating_add(1);
        }
    }

    pub fn is_observed(&self) -> bool {
        !self.impressions.is_empty()
    }

    pub fn average_impressions(&self) -> f64 {
        rolling_average(&self.impressions)
    }

    pub fn average_media_spend(&self) -> f64 {
        rolling_average(&self.media_spend)
    }
}

fn push_rolling(samples: &mut VecDeque<f64>, value: f64) {
    if samples.len() == ROLLING_SAMPLES {
        samples.pop_front();
    }
    samples.push_back(value.max(0.0));
}

fn rolling_average(samples: &VecDeque<f64>) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<f64>() / samples.len() as f64
}
