pub mod engine;
pub mod error;
pub mod types;

pub use engine::{MAX_LATTICE_NODES, ValuationModel, get_valuations};
pub use error::{ValuationError, ValuationErrorKind};
pub use types::{CampaignDefinition, ExplicitValuation};
