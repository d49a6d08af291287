use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::deals::models::{
    Customer, Deal, DealFilter, DealUpdate, NewCustomer, StagedDeal, SyncStatus,
};
use crate::deals::repositories::{CustomerRepository, DealRepository};
use chatsync_common::error::{ChatSyncError, ChatSyncResult};

#[derive(Default)]
struct IndexState {
    customers: HashMap<String, Customer>,
    deals: HashMap<String, Deal>,
}

/// Relational index kept in process memory. The single mutex makes
/// `stage_pending` atomic in the same way the Postgres transaction does.
#[derive(Default)]
pub struct InMemoryDealRepository {
    state: Mutex<IndexState>,
}

impl InMemoryDealRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> ChatSyncResult<std::sync::MutexGuard<'_, IndexState>> {
        self.state
            .lock()
            .map_err(|_| ChatSyncError::Internal("deal store mutex poisoned".to_string()))
    }

    /// Every deal regardless of status, sorted by external id.
    pub fn all_deals(&self) -> ChatSyncResult<Vec<Deal>> {
        let state = self.lock()?;
        let mut deals: Vec<Deal> = state.deals.values().cloned().collect();
        deals.sort_by(|a, b| a.external_id.cmp(&b.external_id));
        Ok(deals)
    }

    pub fn customer_count(&self) -> ChatSyncResult<usize> {
        Ok(self.lock()?.customers.len())
    }

    /// Insert a deal row directly, bypassing the staging protocol.
    pub fn seed_deal(&self, deal: Deal) -> ChatSyncResult<()> {
        self.lock()?.deals.insert(deal.external_id.clone(), deal);
        Ok(())
    }
}

#[async_trait]
impl DealRepository for InMemoryDealRepository {
    async fn find_by_external_id(&self, external_id: &str) -> ChatSyncResult<Option<Deal>> {
        Ok(self.lock()?.deals.get(external_id).cloned())
    }

    async fn stage_pending(
        &self,
        customer: &NewCustomer,
        update: &DealUpdate,
    ) -> ChatSyncResult<StagedDeal> {
        let mut state = self.lock()?;
        let now = Utc::now();

        let customer_created = !state.customers.contains_key(&customer.external_id);
        let customer = state
            .customers
            .entry(customer.external_id.clone())
            .or_insert_with(|| Customer {
                id: Uuid::new_v4(),
                external_id: customer.external_id.clone(),
                name: customer.name.clone(),
                avatar_url: customer.avatar_url.clone(),
                avatar_key: None,
                created_at: now,
                updated_at: now,
            })
            .clone();

        let deal = state
            .deals
            .entry(update.external_id.clone())
            .or_insert_with(|| Deal {
                id: Uuid::new_v4(),
                external_id: update.external_id.clone(),
                customer_id: None,
                last_message_id: None,
                last_message_at: None,
                message_count: 0,
                sync_status: SyncStatus::Pending,
                created_at: now,
                updated_at: now,
            });
        deal.customer_id = Some(customer.id);
        deal.last_message_id = Some(update.last_message_id.clone());
        deal.last_message_at = Some(update.last_message_at);
        deal.sync_status = SyncStatus::Pending;
        deal.updated_at = now;

        Ok(StagedDeal {
            deal: deal.clone(),
            customer,
            customer_created,
        })
    }

    async fn mark_complete(&self, deal_id: Uuid) -> ChatSyncResult<Deal> {
        let mut state = self.lock()?;
        let deal = state
            .deals
            .values_mut()
            .find(|d| d.id == deal_id)
            .ok_or_else(|| ChatSyncError::NotFound(format!("deal not found: {deal_id}")))?;
        deal.sync_status = SyncStatus::Complete;
        deal.message_count += 1;
        deal.updated_at = Utc::now();
        Ok(deal.clone())
    }

    async fn mark_failed(&self, deal_id: Uuid) -> ChatSyncResult<()> {
        let mut state = self.lock()?;
        if let Some(deal) = state.deals.values_mut().find(|d| d.id == deal_id) {
            deal.sync_status = SyncStatus::Failed;
            deal.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn list_complete(&self, filter: DealFilter) -> ChatSyncResult<Vec<Deal>> {
        let state = self.lock()?;
        let mut deals: Vec<Deal> = state
            .deals
            .values()
            .filter(|d| d.is_visible())
            .cloned()
            .collect();
        deals.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));

        let offset = filter.offset.unwrap_or(0).max(0) as usize;
        let limit = filter.limit.unwrap_or(50).max(0) as usize;
        Ok(deals.into_iter().skip(offset).take(limit).collect())
    }
}

#[async_trait]
impl CustomerRepository for InMemoryDealRepository {
    async fn get_by_external_id(&self, external_id: &str) -> ChatSyncResult<Option<Customer>> {
        Ok(self.lock()?.customers.get(external_id).cloned())
    }

    async fn set_avatar_key(&self, customer_id: Uuid, avatar_key: &str) -> ChatSyncResult<()> {
        let mut state = self.lock()?;
        let customer = state
            .customers
            .values_mut()
            .find(|c| c.id == customer_id)
            .ok_or_else(|| ChatSyncError::NotFound(format!("customer not found: {customer_id}")))?;
        customer.avatar_key = Some(avatar_key.to_string());
        customer.updated_at = Utc::now();
        Ok(())
    }
}
