pub mod metrics;
pub mod types;

pub use metrics::{EffectiveNodeMetrics, NodeDeliveryMetrics};
pub use types::{DeliveryRates, HOURS_PER_WEEK, Horizon, HourlyDelivery, Lookback, ROLLING_SAMPLES};
