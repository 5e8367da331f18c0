use async_trait::async_trait;

use crate::{
    allocation::{BudgetAllocation, ExportedNode},
    store::error::StoreError,
    valuation::CampaignDefinition,
};

#[async_trait]
pub trait CampaignStore: Send + Sync {
    async fn load_campaign(&self, campaign_id: &str) -> Result<CampaignDefinition, StoreError>;
}

#[async_trait]
pub trait AllocationStore: Send + Sync {
    async fn load_allocation(&self, campaign_id: &str) -> Result<BudgetAllocation, StoreError>;

    async fn save_allocation(&self, allocation: &BudgetAllocation) -> Result<(), StoreError>;
}

/// Forwards committed export budgets and caps to the serving system.
#[async_trait]
pub trait ExportSink: Send + Sync {
    async fn forward_exports(
        &self,
        campaign_id: &str,
        exports: Vec<ExportedNode>,
    ) -> Result<(), StoreError>;
}
