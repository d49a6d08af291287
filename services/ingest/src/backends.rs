use std::sync::Arc;

use chatsync_common::error::{ChatSyncError, ChatSyncResult};
use chatsync_config::{AppConfig, StoreBackend};
use chatsync_db::blobs::fs::FsBlobStore;
use chatsync_db::blobs::memory::InMemoryBlobStore;
use chatsync_db::blobs::repositories::BlobStore;
use chatsync_db::deals::memory::InMemoryDealRepository;
use chatsync_db::deals::pg_repository::PgDealRepository;
use chatsync_db::deals::repositories::{CustomerRepository, DealRepository};
use chatsync_db::lock::memory::InMemoryLock;
use chatsync_db::lock::pg_repository::PgDistributedLock;
use chatsync_db::lock::repositories::DistributedLock;
use chatsync_db::messages::memory::InMemoryMessageStore;
use chatsync_db::messages::pg_repository::PgMessageStore;
use chatsync_db::messages::repositories::MessageStore;
use chatsync_db::schema::{ensure_message_schema, ensure_schema};
use chatsync_db::sync::memory::InMemorySyncRunRepository;
use chatsync_db::sync::pg_repository::PgSyncRunRepository;
use chatsync_db::sync::repositories::SyncRunRepository;

/// Store adapters chosen once at start-up and shared by reference.
#[derive(Clone)]
pub struct Backends {
    pub deals: Arc<dyn DealRepository>,
    pub customers: Arc<dyn CustomerRepository>,
    pub messages: Arc<dyn MessageStore>,
    pub runs: Arc<dyn SyncRunRepository>,
    pub lock: Arc<dyn DistributedLock>,
    pub blobs: Arc<dyn BlobStore>,
}

pub async fn build(config: &AppConfig) -> ChatSyncResult<Backends> {
    let blobs: Arc<dyn BlobStore> = match &config.avatar_dir {
        Some(dir) => {
            tracing::info!(dir = %dir, "avatar blobs on filesystem");
            Arc::new(FsBlobStore::new(dir))
        }
        None => Arc::new(InMemoryBlobStore::new()),
    };

    match config.store_backend {
        StoreBackend::Memory => {
            tracing::info!("using in-memory stores");
            let deals = Arc::new(InMemoryDealRepository::new());
            Ok(Backends {
                deals: deals.clone(),
                customers: deals,
                messages: Arc::new(InMemoryMessageStore::new()),
                runs: Arc::new(InMemorySyncRunRepository::new()),
                lock: Arc::new(InMemoryLock::new()),
                blobs,
            })
        }
        StoreBackend::Postgres => {
            let database_url = config.database_url.as_deref().ok_or_else(|| {
                ChatSyncError::Config("DATABASE_URL is required for postgres".to_string())
            })?;
            let pool = chatsync_db::create_pool(database_url).await?;
            ensure_schema(&pool).await?;

            let message_pool = match config.message_store_url.as_deref() {
                Some(url) if url != database_url => {
                    tracing::info!("message store on a separate database");
                    chatsync_db::create_pool(url).await?
                }
                _ => pool.clone(),
            };
            ensure_message_schema(&message_pool).await?;

            let deals = Arc::new(PgDealRepository::new(pool.clone()));
            Ok(Backends {
                deals: deals.clone(),
                customers: deals,
                messages: Arc::new(PgMessageStore::new(message_pool)),
                runs: Arc::new(PgSyncRunRepository::new(pool.clone())),
                lock: Arc::new(PgDistributedLock::new(pool)),
                blobs,
            })
        }
    }
}
