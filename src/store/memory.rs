use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{
    allocation::{BudgetAllocation, ExportedNode},
    store::{
        error::{StoreError, not_found},
        ports::{AllocationStore, CampaignStore, ExportSink},
    },
    valuation::CampaignDefinition,
};

/// In-process store scoped to whoever owns it; share it with `Arc`.
#[derive(Default)]
pub struct InMemoryStore {
    campaigns: Mutex<BTreeMap<String, CampaignDefinition>>,
    allocations: Mutex<BTreeMap<String, BudgetAllocation>>,
    exports: Mutex<BTreeMap<String, Vec<Vec<ExportedNode>>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put_campaign(&self, campaign: CampaignDefinition) {
        self.campaigns
            .lock()
            .await
            .insert(campaign.campaign_id.clone(), campaign);
    }

    pub async fn put_allocation(&self, allocation: BudgetAllocation) {
        self.allocations
            .lock()
            .await
            .insert(allocation.campaign_id.clone(), allocation);
    }

    pub async fn forwarded_exports(&self, campaign_id: &str) -> Vec<Vec<ExportedNode>> {
        self.exports
            .lock()
            .await
            .get(campaign_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl CampaignStore for InMemoryStore {
    async fn load_campaign(&self, campaign_id: &str) -> Result<CampaignDefinition, StoreError> {
        self.campaigns
            .lock()
            .await
            .get(campaign_id)
            .cloned()
            .ok_or_else(|| not_found(format!("campaign '{campaign_id}' is not stored")))
    }
}

#[async_trait]
impl AllocationStore for InMemoryStore {
    async fn load_allocation(&self, campaign_id: &str) -> Result<BudgetAllocation, StoreError> {
        self.allocations
            .lock()
            .await
            .get(campaign_id)
            .cloned()
            .ok_or_else(|| not_found(format!("allocation for campaign '{campaign_id}' is not stored")))
    }

    async fn save_allocation(&self, allocation: &BudgetAllocation) -> Result<(), StoreError> {
        self.put_allocation(allocation.clone()).await;
        Ok(())
    }
}

#[async_trait]
impl ExportSink for InMemoryStore {
    async fn forward_exports(
        &self,
        campaign_id: &str,
        exports: Vec<ExportedNode>,
    ) -> Result<(), StoreError> {
        tracing::debug!(
            target: "store",
            campaign_id,
            exports = exports.len(),
            "exports_recorded"
        );
        self.exports
            .lock()
            .await
            .entry(campaign_id.to_string())
            .or_default()
            .push(exports);
        Ok(())
    }
}
