use async_trait::async_trait;
use uuid::Uuid;

use crate::deals::models::{Customer, Deal, DealFilter, DealUpdate, NewCustomer, StagedDeal};
use chatsync_common::error::ChatSyncResult;

#[async_trait]
pub trait DealRepository: Send + Sync {
    async fn find_by_external_id(&self, external_id: &str) -> ChatSyncResult<Option<Deal>>;

    /// In one transaction: create the customer if absent (never update an
    /// existing one), then upsert the deal with the new last message and
    /// `sync_status = pending`.
    async fn stage_pending(
        &self,
        customer: &NewCustomer,
        update: &DealUpdate,
    ) -> ChatSyncResult<StagedDeal>;

    /// Set `sync_status = complete` and increment `message_count`.
    async fn mark_complete(&self, deal_id: Uuid) -> ChatSyncResult<Deal>;

    async fn mark_failed(&self, deal_id: Uuid) -> ChatSyncResult<()>;

    /// Deals that are complete and have a customer, newest message first.
    async fn list_complete(&self, filter: DealFilter) -> ChatSyncResult<Vec<Deal>>;
}

#[async_trait]
pub trait CustomerRepository: Send + Sync {
    async fn get_by_external_id(&self, external_id: &str) -> ChatSyncResult<Option<Customer>>;

    /// Record the blob key of an uploaded avatar.
    async fn set_avatar_key(&self, customer_id: Uuid, avatar_key: &str) -> ChatSyncResult<()>;
}
