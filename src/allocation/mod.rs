pub mod budgeting;
pub mod cost;
pub mod error;
pub mod initial;
pub mod lineage;
pub mod params;
pub mod phases;
pub mod reallocator;
pub mod types;

pub use cost::{CapCalculator, CostModel};
pub use error::{AllocationError, AllocationErrorKind};
pub use params::{AllocationParameters, AllocationParametersBuilder};
pub use phases::{Selection, SelectedNode, add_high_budget_nodes_to_make_spend};
pub use types::{AllocationPhase, BudgetAllocation, ExportedNode, PerNodeBudgetAllocationResult};
