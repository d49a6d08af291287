mod avatar;
mod backends;
mod engine;
mod events;
mod runner;
mod source;

use std::sync::Arc;

use chatsync_common::types::ServiceInfo;
use chatsync_config::{init_tracing, AppConfig};
use chatsync_db::sync::repositories::SyncRunRepository;
use uuid::Uuid;

use crate::avatar::{AvatarRetry, AvatarUploader};
use crate::engine::SyncEngine;
use crate::events::TracingEventSink;
use crate::runner::{RunOutcome, RunnerConfig, SyncRunner};
use crate::source::client::{HttpChatSource, SourceClientConfig};
use crate::source::mock::{MockChatSource, MockSourceConfig};
use crate::source::ChatSource;

#[tokio::main]
async fn main() {
    let config = AppConfig::from_env().expect("failed to load config");
    init_tracing(&config.log_level);

    let service = ServiceInfo::new("chatsync-ingest");
    tracing::info!(service = %service.name, version = %service.version, "starting");

    let backends = backends::build(&config)
        .await
        .expect("failed to initialise stores");

    match backends.runs.list_recent(5).await {
        Ok(recent) => {
            for run in recent {
                tracing::debug!(
                    run_id = %run.run_id,
                    status = run.status.as_str(),
                    processed = run.processed_count,
                    "previous run"
                );
            }
        }
        Err(e) => tracing::warn!(error = %e, "could not list previous runs"),
    }

    // Real chat API when configured, otherwise the deterministic mock feed
    let source: Arc<dyn ChatSource> = match SourceClientConfig::from_env() {
        Some(source_config) => {
            tracing::info!(base_url = %source_config.base_url, "chat api configured");
            Arc::new(HttpChatSource::new(source_config).expect("failed to create chat api client"))
        }
        None => {
            let mock_config = MockSourceConfig::from_env();
            tracing::info!(
                total_chats = mock_config.total_chats,
                page_size = mock_config.page_size,
                "no chat api configured, using mock source"
            );
            Arc::new(MockChatSource::new(mock_config))
        }
    };

    let uploader = Arc::new(
        AvatarUploader::new(
            backends.blobs.clone(),
            backends.customers.clone(),
            AvatarRetry::default(),
        )
        .expect("failed to create avatar http client"),
    );

    let engine = SyncEngine::new(
        source,
        backends.deals.clone(),
        backends.messages.clone(),
        backends.runs.clone(),
        Arc::new(TracingEventSink),
    )
    .with_avatars(uploader.clone());

    let runner = SyncRunner::new(
        engine,
        backends.runs.clone(),
        backends.lock.clone(),
        RunnerConfig::from_app(&config, service.owner_token()),
    );

    let run_id = config
        .run_id
        .clone()
        .unwrap_or_else(|| format!("sync-{}", Uuid::new_v4()));
    let result = runner.run_with_retry(&run_id, config.cutoff_date).await;

    let uploads = uploader.drain().await;
    if uploads > 0 {
        tracing::info!(uploads, "avatar uploads finished");
    }

    match result {
        Ok(RunOutcome::Completed { run, report }) => {
            tracing::info!(
                run_id = %run.run_id,
                processed = run.processed_count,
                failed = report.failed,
                pages = report.pages,
                stop = ?report.stop,
                "sync finished"
            );
        }
        Ok(RunOutcome::Skipped) => {
            tracing::info!("sync skipped, another run holds the lock");
        }
        Err(e) => {
            tracing::error!(run_id = %run_id, error = %e, "sync failed");
            std::process::exit(1);
        }
    }
}
