use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{postgres::PgRow, PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::deals::models::{
    Customer, Deal, DealFilter, DealUpdate, NewCustomer, StagedDeal, SyncStatus,
};
use crate::deals::repositories::{CustomerRepository, DealRepository};
use chatsync_common::error::{ChatSyncError, ChatSyncResult};

const DEAL_COLUMNS: &str = "id, external_id, customer_id, last_message_id, last_message_at, \
     message_count, sync_status, created_at, updated_at";

const CUSTOMER_COLUMNS: &str =
    "id, external_id, name, avatar_url, avatar_key, created_at, updated_at";

#[derive(Clone)]
pub struct PgDealRepository {
    pool: PgPool,
}

impl PgDealRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_deal_row(row: PgRow) -> ChatSyncResult<Deal> {
        let status_raw: String = row.get("sync_status");
        let sync_status = SyncStatus::from_str(&status_raw).map_err(ChatSyncError::Internal)?;

        Ok(Deal {
            id: row.get("id"),
            external_id: row.get("external_id"),
            customer_id: row.get("customer_id"),
            last_message_id: row.get("last_message_id"),
            last_message_at: row.get("last_message_at"),
            message_count: row.get("message_count"),
            sync_status,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    fn map_customer_row(row: PgRow) -> Customer {
        Customer {
            id: row.get("id"),
            external_id: row.get("external_id"),
            name: row.get("name"),
            avatar_url: row.get("avatar_url"),
            avatar_key: row.get("avatar_key"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }

    /// Insert-if-absent. Returns the row and whether this call created it.
    async fn get_or_create_customer(
        tx: &mut Transaction<'_, Postgres>,
        customer: &NewCustomer,
    ) -> ChatSyncResult<(Customer, bool)> {
        let inserted = sqlx::query(&format!(
            "insert into customers (id, external_id, name, avatar_url)
             values ($1, $2, $3, $4)
             on conflict (external_id) do nothing
             returning {CUSTOMER_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(&customer.external_id)
        .bind(&customer.name)
        .bind(&customer.avatar_url)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| ChatSyncError::Database(e.to_string()))?;

        if let Some(row) = inserted {
            return Ok((Self::map_customer_row(row), true));
        }

        let row = sqlx::query(&format!(
            "select {CUSTOMER_COLUMNS} from customers where external_id = $1"
        ))
        .bind(&customer.external_id)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| ChatSyncError::Database(e.to_string()))?;

        Ok((Self::map_customer_row(row), false))
    }
}

#[async_trait]
impl DealRepository for PgDealRepository {
    async fn find_by_external_id(&self, external_id: &str) -> ChatSyncResult<Option<Deal>> {
        let row = sqlx::query(&format!(
            "select {DEAL_COLUMNS} from deals where external_id = $1"
        ))
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ChatSyncError::Database(e.to_string()))?;

        row.map(Self::map_deal_row).transpose()
    }

    async fn stage_pending(
        &self,
        customer: &NewCustomer,
        update: &DealUpdate,
    ) -> ChatSyncResult<StagedDeal> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| ChatSyncError::Database(e.to_string()))?;

        let (customer, customer_created) = Self::get_or_create_customer(&mut tx, customer).await?;

        let row = sqlx::query(&format!(
            "insert into deals (id, external_id, customer_id, last_message_id, last_message_at, sync_status)
             values ($1, $2, $3, $4, $5, 'pending')
             on conflict (external_id) do update set
               customer_id = excluded.customer_id,
               last_message_id = excluded.last_message_id,
               last_message_at = excluded.last_message_at,
               sync_status = 'pending',
               updated_at = $6
             returning {DEAL_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(&update.external_id)
        .bind(customer.id)
        .bind(&update.last_message_id)
        .bind(update.last_message_at)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| ChatSyncError::Database(e.to_string()))?;

        let deal = Self::map_deal_row(row)?;

        tx.commit()
            .await
            .map_err(|e| ChatSyncError::Database(e.to_string()))?;

        Ok(StagedDeal {
            deal,
            customer,
            customer_created,
        })
    }

    async fn mark_complete(&self, deal_id: Uuid) -> ChatSyncResult<Deal> {
        let row = sqlx::query(&format!(
            "update deals
             set sync_status = 'complete', message_count = message_count + 1, updated_at = $1
             where id = $2
             returning {DEAL_COLUMNS}"
        ))
        .bind(Utc::now())
        .bind(deal_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ChatSyncError::Database(e.to_string()))?;

        match row {
            Some(r) => Self::map_deal_row(r),
            None => Err(ChatSyncError::NotFound(format!("deal not found: {deal_id}"))),
        }
    }

    async fn mark_failed(&self, deal_id: Uuid) -> ChatSyncResult<()> {
        sqlx::query("update deals set sync_status = 'failed', updated_at = $1 where id = $2")
            .bind(Utc::now())
            .bind(deal_id)
            .execute(&self.pool)
            .await
            .map_err(|e| ChatSyncError::Database(e.to_string()))?;
        Ok(())
    }

    async fn list_complete(&self, filter: DealFilter) -> ChatSyncResult<Vec<Deal>> {
        let rows = sqlx::query(&format!(
            "select {DEAL_COLUMNS} from deals
             where sync_status = 'complete' and customer_id is not null
             order by last_message_at desc nulls last
             limit $1 offset $2"
        ))
        .bind(filter.limit.unwrap_or(50))
        .bind(filter.offset.unwrap_or(0))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ChatSyncError::Database(e.to_string()))?;

        rows.into_iter().map(Self::map_deal_row).collect()
    }
}

#[async_trait]
impl CustomerRepository for PgDealRepository {
    async fn get_by_external_id(&self, external_id: &str) -> ChatSyncResult<Option<Customer>> {
        let row = sqlx::query(&format!(
            "select {CUSTOMER_COLUMNS} from customers where external_id = $1"
        ))
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ChatSyncError::Database(e.to_string()))?;

        Ok(row.map(Self::map_customer_row))
    }

    async fn set_avatar_key(&self, customer_id: Uuid, avatar_key: &str) -> ChatSyncResult<()> {
        let result =
            sqlx::query("update customers set avatar_key = $1, updated_at = $2 where id = $3")
                .bind(avatar_key)
                .bind(Utc::now())
                .bind(customer_id)
                .execute(&self.pool)
                .await
                .map_err(|e| ChatSyncError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(ChatSyncError::NotFound(format!(
                "customer not found: {customer_id}"
            )));
        }
        Ok(())
    }
}
