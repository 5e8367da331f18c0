pub mod keyed;
pub mod measure_set;

pub use measure_set::{MAX_POWER_SET_MEASURES, MeasureId, MeasureSet, PowerSet, power_set};
