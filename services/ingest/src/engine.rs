use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use uuid::Uuid;

use chatsync_common::error::{ChatSyncError, ChatSyncResult};
use chatsync_db::deals::models::{Customer, Deal, DealUpdate, NewCustomer};
use chatsync_db::deals::repositories::DealRepository;
use chatsync_db::messages::models::StoredMessage;
use chatsync_db::messages::repositories::MessageStore;
use chatsync_db::sync::models::SyncRun;
use chatsync_db::sync::repositories::SyncRunRepository;

use crate::avatar::{AvatarJob, AvatarUploader};
use crate::events::{EventSink, SyncEvent};
use crate::source::models::Chat;
use crate::source::ChatSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// A chat older than the run's cutoff date was reached.
    CutoffReached,
    /// A chat whose latest message is already indexed was reached.
    Unchanged,
    /// The source reported no further pages.
    Drained,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Synced,
    Failed,
    Stop(StopReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineReport {
    pub pages: u32,
    pub synced: u64,
    pub failed: u64,
    pub cursor_saves: u32,
    pub stop: StopReason,
}

struct RecordFailure {
    deal_id: Option<Uuid>,
    error: ChatSyncError,
}

/// Pulls chat pages from a source and writes each chat into the relational
/// index and the message store.
///
/// Per chat the deal is staged PENDING (customer and deal in one
/// transaction), the message is written to the document store, and only then
/// is the deal finalized COMPLETE. A failure in any of those steps marks the
/// deal FAILED and the run moves on. The cursor of a page is saved after all
/// of its chats were attempted and before the next fetch.
pub struct SyncEngine {
    source: Arc<dyn ChatSource>,
    deals: Arc<dyn DealRepository>,
    messages: Arc<dyn MessageStore>,
    runs: Arc<dyn SyncRunRepository>,
    events: Arc<dyn EventSink>,
    avatars: Option<Arc<AvatarUploader>>,
    source_down: AtomicBool,
}

impl SyncEngine {
    pub fn new(
        source: Arc<dyn ChatSource>,
        deals: Arc<dyn DealRepository>,
        messages: Arc<dyn MessageStore>,
        runs: Arc<dyn SyncRunRepository>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            source,
            deals,
            messages,
            runs,
            events,
            avatars: None,
            source_down: AtomicBool::new(false),
        }
    }

    pub fn with_avatars(mut self, uploader: Arc<AvatarUploader>) -> Self {
        self.avatars = Some(uploader);
        self
    }

    /// Drive `run` from its stored cursor until a stop condition.
    ///
    /// Source errors and run-state write errors abort the attempt; the run's
    /// terminal status is left to the caller.
    pub async fn run(&self, run: &SyncRun) -> ChatSyncResult<EngineReport> {
        tracing::info!(run_id = %run.run_id, cursor = %run.cursor, "sync run starting");

        let mut cursor = run.cursor.clone();
        let mut report = EngineReport {
            pages: 0,
            synced: 0,
            failed: 0,
            cursor_saves: 0,
            stop: StopReason::Drained,
        };

        loop {
            let page = match self.source.get_page(&cursor).await {
                Ok(page) => {
                    self.mark_source_up();
                    page
                }
                Err(e) => {
                    tracing::error!(run_id = %run.run_id, cursor = %cursor, error = %e, "page fetch failed");
                    self.mark_source_down(&e.to_string());
                    return Err(ChatSyncError::Source(e.to_string()));
                }
            };
            report.pages += 1;

            let mut stop = None;
            for chat in &page.chats {
                match self.process_chat(run, chat).await? {
                    RecordOutcome::Synced => report.synced += 1,
                    RecordOutcome::Failed => report.failed += 1,
                    RecordOutcome::Stop(reason) => {
                        stop = Some(reason);
                        break;
                    }
                }
            }

            let next_cursor = page.next_cursor.filter(|c| !c.is_empty());
            if let Some(next) = &next_cursor {
                self.runs.save_cursor(&run.run_id, next).await?;
                report.cursor_saves += 1;
                tracing::debug!(run_id = %run.run_id, cursor = %next, "cursor saved");
            }

            if let Some(reason) = stop {
                report.stop = reason;
                break;
            }
            if !page.has_more {
                break;
            }
            match next_cursor {
                Some(next) => cursor = next,
                None => {
                    return Err(ChatSyncError::Source(format!(
                        "page after cursor {cursor:?} reported more results without a next cursor"
                    )))
                }
            }
        }

        tracing::info!(
            run_id = %run.run_id,
            pages = report.pages,
            synced = report.synced,
            failed = report.failed,
            stop = ?report.stop,
            "sync run finished"
        );
        Ok(report)
    }

    /// Apply the per-chat protocol. Only a failed deal lookup or a failed
    /// run-counter write is returned as an error.
    pub async fn process_chat(&self, run: &SyncRun, chat: &Chat) -> ChatSyncResult<RecordOutcome> {
        if let Some(cutoff) = run.cutoff_date {
            if chat.last_message.created_at < cutoff {
                tracing::debug!(chat_id = %chat.external_id, %cutoff, "cutoff reached");
                return Ok(RecordOutcome::Stop(StopReason::CutoffReached));
            }
        }

        let existing = self.deals.find_by_external_id(&chat.external_id).await?;
        if let Some(deal) = &existing {
            if deal.last_message_id.as_deref() == Some(chat.last_message.message_id.as_str()) {
                tracing::debug!(chat_id = %chat.external_id, "chat unchanged");
                return Ok(RecordOutcome::Stop(StopReason::Unchanged));
            }
        }

        match self.sync_chat(chat).await {
            Ok(deal) => {
                self.runs.increment_processed(&run.run_id).await?;
                self.publish_synced(chat, &deal);
                tracing::debug!(chat_id = %chat.external_id, "chat synced");
                Ok(RecordOutcome::Synced)
            }
            Err(failure) => {
                tracing::warn!(
                    run_id = %run.run_id,
                    chat_id = %chat.external_id,
                    error = %failure.error,
                    "chat sync failed"
                );
                if let Some(deal_id) = failure.deal_id.or(existing.map(|d| d.id)) {
                    if let Err(e) = self.deals.mark_failed(deal_id).await {
                        tracing::warn!(chat_id = %chat.external_id, error = %e, "could not mark deal failed");
                    }
                }
                Ok(RecordOutcome::Failed)
            }
        }
    }

    async fn sync_chat(&self, chat: &Chat) -> Result<Deal, RecordFailure> {
        let customer = NewCustomer {
            external_id: chat.customer.external_id.clone(),
            name: chat.customer.name.clone(),
            avatar_url: chat.customer.avatar_url.clone(),
        };
        let update = DealUpdate {
            external_id: chat.external_id.clone(),
            last_message_id: chat.last_message.message_id.clone(),
            last_message_at: chat.last_message.created_at,
        };

        let staged = self
            .deals
            .stage_pending(&customer, &update)
            .await
            .map_err(|error| RecordFailure {
                deal_id: None,
                error,
            })?;
        if staged.customer_created {
            self.queue_avatar(&staged.customer);
        }

        let deal_id = staged.deal.id;
        let failed = move |error| RecordFailure {
            deal_id: Some(deal_id),
            error,
        };

        self.messages
            .put(&StoredMessage {
                chat_id: chat.external_id.clone(),
                message_id: chat.last_message.message_id.clone(),
                text: chat.last_message.text.clone(),
                created_at: chat.last_message.created_at,
            })
            .await
            .map_err(failed)?;

        self.deals.mark_complete(deal_id).await.map_err(|e| {
            // The message is stored but the deal is not COMPLETE.
            tracing::error!(
                chat_id = %chat.external_id,
                message_id = %chat.last_message.message_id,
                error = %e,
                "finalize failed after message write, message store entry is orphaned"
            );
            failed(e)
        })
    }

    fn queue_avatar(&self, customer: &Customer) {
        let (Some(uploader), Some(url)) = (&self.avatars, &customer.avatar_url) else {
            return;
        };
        uploader.enqueue(AvatarJob {
            customer_id: customer.id,
            customer_external_id: customer.external_id.clone(),
            avatar_url: url.clone(),
        });
    }

    // Status events fire on transitions only, so a retry loop against a dead
    // source reports one outage.
    fn mark_source_down(&self, detail: &str) {
        if !self.source_down.swap(true, Ordering::SeqCst) {
            self.events.publish(SyncEvent::ConnectionStatus {
                connected: false,
                detail: Some(detail.to_string()),
            });
        }
    }

    fn mark_source_up(&self) {
        if self.source_down.swap(false, Ordering::SeqCst) {
            self.events.publish(SyncEvent::ConnectionStatus {
                connected: true,
                detail: None,
            });
        }
    }

    fn publish_synced(&self, chat: &Chat, deal: &Deal) {
        self.events.publish(SyncEvent::NewMessage {
            chat_id: chat.external_id.clone(),
            message_id: chat.last_message.message_id.clone(),
            text: chat.last_message.text.clone(),
            created_at: chat.last_message.created_at,
        });
        self.events.publish(SyncEvent::DealUpdated {
            chat_id: deal.external_id.clone(),
            message_count: deal.message_count,
            sync_status: deal.sync_status.as_str().to_string(),
        });
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    use chatsync_db::blobs::memory::InMemoryBlobStore;
    use chatsync_db::deals::memory::InMemoryDealRepository;
    use chatsync_db::deals::models::{DealFilter, StagedDeal, SyncStatus};
    use chatsync_db::deals::repositories::CustomerRepository;
    use chatsync_db::messages::memory::InMemoryMessageStore;
    use chatsync_db::sync::memory::InMemorySyncRunRepository;
    use chatsync_db::sync::models::RunStatus;

    use crate::avatar::AvatarRetry;
    use crate::events::{BroadcastEventSink, TracingEventSink};
    use crate::source::mock::{default_base_date, generate_chat, MockChatSource, MockSourceConfig};

    // ── Run repository that counts cursor writes ────────────────

    pub(crate) struct CountingRuns {
        pub inner: InMemorySyncRunRepository,
        pub cursor_saves: AtomicU32,
    }

    impl CountingRuns {
        pub fn new() -> Self {
            Self {
                inner: InMemorySyncRunRepository::new(),
                cursor_saves: AtomicU32::new(0),
            }
        }

        pub fn saves(&self) -> u32 {
            self.cursor_saves.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SyncRunRepository for CountingRuns {
        async fn find_incomplete(&self) -> ChatSyncResult<Option<SyncRun>> {
            self.inner.find_incomplete().await
        }

        async fn create(
            &self,
            run_id: &str,
            cutoff_date: Option<DateTime<Utc>>,
        ) -> ChatSyncResult<SyncRun> {
            self.inner.create(run_id, cutoff_date).await
        }

        async fn get(&self, run_id: &str) -> ChatSyncResult<Option<SyncRun>> {
            self.inner.get(run_id).await
        }

        async fn mark_running(&self, run_id: &str) -> ChatSyncResult<SyncRun> {
            self.inner.mark_running(run_id).await
        }

        async fn save_cursor(&self, run_id: &str, cursor: &str) -> ChatSyncResult<()> {
            self.cursor_saves.fetch_add(1, Ordering::SeqCst);
            self.inner.save_cursor(run_id, cursor).await
        }

        async fn increment_processed(&self, run_id: &str) -> ChatSyncResult<()> {
            self.inner.increment_processed(run_id).await
        }

        async fn mark_completed(&self, run_id: &str) -> ChatSyncResult<SyncRun> {
            self.inner.mark_completed(run_id).await
        }

        async fn mark_failed(&self, run_id: &str, error_message: &str) -> ChatSyncResult<SyncRun> {
            self.inner.mark_failed(run_id, error_message).await
        }

        async fn list_recent(&self, limit: i64) -> ChatSyncResult<Vec<SyncRun>> {
            self.inner.list_recent(limit).await
        }
    }

    // ── Message store that rejects selected chats ───────────────

    pub(crate) struct FailingMessages {
        pub inner: InMemoryMessageStore,
        pub failing: HashSet<String>,
    }

    impl FailingMessages {
        pub fn new(failing: &[&str]) -> Self {
            Self {
                inner: InMemoryMessageStore::new(),
                failing: failing.iter().map(|s| s.to_string()).collect(),
            }
        }
    }

    #[async_trait]
    impl MessageStore for FailingMessages {
        async fn put(&self, message: &StoredMessage) -> ChatSyncResult<()> {
            if self.failing.contains(&message.chat_id) {
                return Err(ChatSyncError::Storage(format!(
                    "simulated write failure for {}",
                    message.chat_id
                )));
            }
            self.inner.put(message).await
        }

        async fn list(&self, chat_id: &str) -> ChatSyncResult<Vec<StoredMessage>> {
            self.inner.list(chat_id).await
        }

        async fn get(&self, chat_id: &str, message_id: &str) -> ChatSyncResult<Option<StoredMessage>> {
            self.inner.get(chat_id, message_id).await
        }

        async fn delete(&self, chat_id: &str, message_id: &str) -> ChatSyncResult<bool> {
            self.inner.delete(chat_id, message_id).await
        }
    }

    // ── Deal repository with injectable staging/finalize faults ──

    pub(crate) struct FaultyDeals {
        pub inner: InMemoryDealRepository,
        pub failing_stage: HashSet<String>,
        pub failing_complete: bool,
    }

    impl FaultyDeals {
        pub fn new(failing_stage: &[&str], failing_complete: bool) -> Self {
            Self {
                inner: InMemoryDealRepository::new(),
                failing_stage: failing_stage.iter().map(|s| s.to_string()).collect(),
                failing_complete,
            }
        }
    }

    #[async_trait]
    impl DealRepository for FaultyDeals {
        async fn find_by_external_id(&self, external_id: &str) -> ChatSyncResult<Option<Deal>> {
            self.inner.find_by_external_id(external_id).await
        }

        async fn stage_pending(
            &self,
            customer: &NewCustomer,
            update: &DealUpdate,
        ) -> ChatSyncResult<StagedDeal> {
            if self.failing_stage.contains(&update.external_id) {
                return Err(ChatSyncError::Database(format!(
                    "simulated staging failure for {}",
                    update.external_id
                )));
            }
            self.inner.stage_pending(customer, update).await
        }

        async fn mark_complete(&self, deal_id: Uuid) -> ChatSyncResult<Deal> {
            if self.failing_complete {
                return Err(ChatSyncError::Database(
                    "simulated finalize failure".to_string(),
                ));
            }
            self.inner.mark_complete(deal_id).await
        }

        async fn mark_failed(&self, deal_id: Uuid) -> ChatSyncResult<()> {
            self.inner.mark_failed(deal_id).await
        }

        async fn list_complete(&self, filter: DealFilter) -> ChatSyncResult<Vec<Deal>> {
            self.inner.list_complete(filter).await
        }
    }

    struct Harness {
        source: Arc<MockChatSource>,
        deals: Arc<InMemoryDealRepository>,
        messages: Arc<FailingMessages>,
        runs: Arc<CountingRuns>,
    }

    impl Harness {
        fn new(total_chats: usize, page_size: usize, failing: &[&str]) -> Self {
            Self {
                source: Arc::new(MockChatSource::new(MockSourceConfig {
                    total_chats,
                    page_size,
                })),
                deals: Arc::new(InMemoryDealRepository::new()),
                messages: Arc::new(FailingMessages::new(failing)),
                runs: Arc::new(CountingRuns::new()),
            }
        }

        fn engine(&self) -> SyncEngine {
            SyncEngine::new(
                self.source.clone(),
                self.deals.clone(),
                self.messages.clone(),
                self.runs.clone(),
                Arc::new(TracingEventSink),
            )
        }

        async fn start_run(&self, run_id: &str, cutoff: Option<DateTime<Utc>>) -> SyncRun {
            self.runs.create(run_id, cutoff).await.unwrap();
            self.runs.mark_running(run_id).await.unwrap()
        }

        async fn run_state(&self, run_id: &str) -> SyncRun {
            self.runs.get(run_id).await.unwrap().unwrap()
        }

        fn deal(&self, external_id: &str) -> Deal {
            self.deals
                .all_deals()
                .unwrap()
                .into_iter()
                .find(|d| d.external_id == external_id)
                .unwrap()
        }
    }

    #[tokio::test]
    async fn drains_all_pages_and_saves_cursor_per_page() {
        let h = Harness::new(25, 10, &[]);
        let run = h.start_run("run-1", None).await;

        let report = h.engine().run(&run).await.unwrap();

        assert_eq!(report.pages, 3);
        assert_eq!(report.synced, 25);
        assert_eq!(report.stop, StopReason::Drained);
        assert_eq!(h.runs.saves(), 3);

        let state = h.run_state("run-1").await;
        assert_eq!(state.processed_count, 25);
        assert_eq!(state.cursor, "Mw==");
        assert_eq!(state.status, RunStatus::Running);

        assert_eq!(h.messages.inner.len().unwrap(), 25);
        let deals = h.deals.all_deals().unwrap();
        assert_eq!(deals.len(), 25);
        assert!(deals
            .iter()
            .all(|d| d.sync_status == SyncStatus::Complete && d.message_count == 1));
    }

    #[tokio::test]
    async fn failed_document_write_is_contained_to_its_record() {
        // chat_0006 is the 7th record of the page
        let h = Harness::new(10, 10, &["chat_0006"]);
        let run = h.start_run("run-1", None).await;

        let report = h.engine().run(&run).await.unwrap();

        assert_eq!(report.synced, 9);
        assert_eq!(report.failed, 1);
        assert_eq!(report.stop, StopReason::Drained);
        assert_eq!(h.run_state("run-1").await.processed_count, 9);

        assert_eq!(h.deal("chat_0006").sync_status, SyncStatus::Failed);
        for i in (0..10).filter(|i| *i != 6) {
            assert_eq!(
                h.deal(&format!("chat_{i:04}")).sync_status,
                SyncStatus::Complete
            );
        }

        let listed = h.deals.list_complete(DealFilter::default()).await.unwrap();
        assert_eq!(listed.len(), 9);
        assert!(listed.iter().all(|d| d.external_id != "chat_0006"));
    }

    #[tokio::test]
    async fn rerun_against_unchanged_source_writes_nothing() {
        let h = Harness::new(5, 10, &[]);
        let first = h.start_run("run-1", None).await;
        h.engine().run(&first).await.unwrap();
        h.runs.mark_completed("run-1").await.unwrap();

        let second = h.start_run("run-2", None).await;
        let report = h.engine().run(&second).await.unwrap();

        assert_eq!(report.stop, StopReason::Unchanged);
        assert_eq!(report.synced, 0);
        assert_eq!(h.run_state("run-2").await.processed_count, 0);
        assert_eq!(h.deals.all_deals().unwrap().len(), 5);
        assert_eq!(h.deals.customer_count().unwrap(), 5);
        assert!(h
            .deals
            .all_deals()
            .unwrap()
            .iter()
            .all(|d| d.message_count == 1));
        assert_eq!(h.messages.inner.len().unwrap(), 5);
    }

    #[tokio::test]
    async fn incremental_run_stops_at_first_known_message() {
        let h = Harness::new(10, 10, &[]);
        let now = Utc::now();
        h.deals
            .seed_deal(Deal {
                id: Uuid::new_v4(),
                external_id: "chat_0000".to_string(),
                customer_id: Some(Uuid::new_v4()),
                last_message_id: Some("msg_0000".to_string()),
                last_message_at: Some(default_base_date()),
                message_count: 4,
                sync_status: SyncStatus::Complete,
                created_at: now,
                updated_at: now,
            })
            .unwrap();
        let run = h.start_run("run-1", None).await;

        let report = h.engine().run(&run).await.unwrap();

        assert_eq!(report.stop, StopReason::Unchanged);
        assert_eq!(h.run_state("run-1").await.processed_count, 0);
        assert!(h.messages.inner.is_empty().unwrap());
        assert_eq!(h.deals.customer_count().unwrap(), 0);
        assert_eq!(h.deal("chat_0000").message_count, 4);
    }

    #[tokio::test]
    async fn new_message_on_known_chat_is_synced_until_unchanged() {
        let h = Harness::new(5, 10, &[]);
        let first = h.start_run("run-1", None).await;
        h.engine().run(&first).await.unwrap();
        h.runs.mark_completed("run-1").await.unwrap();

        let mut updated = generate_chat(0, default_base_date());
        updated.last_message.message_id = "msg_0000_b".to_string();
        updated.last_message.created_at = default_base_date() + chrono::Duration::minutes(5);
        h.source.replace(0, updated);

        let second = h.start_run("run-2", None).await;
        let report = h.engine().run(&second).await.unwrap();

        assert_eq!(report.synced, 1);
        assert_eq!(report.stop, StopReason::Unchanged);
        let deal = h.deal("chat_0000");
        assert_eq!(deal.message_count, 2);
        assert_eq!(deal.last_message_id.as_deref(), Some("msg_0000_b"));
        assert_eq!(h.messages.inner.list("chat_0000").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn cutoff_is_strictly_less_than() {
        let h = Harness::new(10, 10, &[]);
        // chat_0003 is exactly at the cutoff, chat_0004 one hour before it
        let cutoff = generate_chat(3, default_base_date()).last_message.created_at;
        let run = h.start_run("run-1", Some(cutoff)).await;

        let report = h.engine().run(&run).await.unwrap();

        assert_eq!(report.stop, StopReason::CutoffReached);
        assert_eq!(report.synced, 4);
        assert_eq!(h.deal("chat_0003").sync_status, SyncStatus::Complete);
        assert!(h.deals.find_by_external_id("chat_0004").await.unwrap().is_none());
        // the page's cursor is still recorded
        assert_eq!(h.runs.saves(), 1);
    }

    #[tokio::test]
    async fn resumes_exactly_at_last_saved_cursor() {
        let h = Harness::new(30, 10, &[]);
        h.source.fail_page_once(1);
        let run = h.start_run("run-1", None).await;

        let err = h.engine().run(&run).await.unwrap_err();
        assert!(matches!(err, ChatSyncError::Source(_)));

        let interrupted = h.run_state("run-1").await;
        assert_eq!(interrupted.cursor, "MQ==");
        assert_eq!(interrupted.processed_count, 10);

        let report = h.engine().run(&interrupted).await.unwrap();
        assert_eq!(report.synced, 20);

        assert_eq!(
            h.source.requested_cursors(),
            vec!["", "MQ==", "MQ==", "Mg=="]
        );
        assert_eq!(h.run_state("run-1").await.processed_count, 30);
        assert!(h
            .deals
            .all_deals()
            .unwrap()
            .iter()
            .all(|d| d.message_count == 1 && d.sync_status == SyncStatus::Complete));
    }

    #[tokio::test]
    async fn more_pages_without_cursor_is_an_error() {
        struct BrokenSource;

        #[async_trait]
        impl ChatSource for BrokenSource {
            async fn get_page(
                &self,
                _cursor: &str,
            ) -> Result<crate::source::models::ChatPage, crate::source::SourceError> {
                Ok(crate::source::models::ChatPage {
                    chats: Vec::new(),
                    next_cursor: None,
                    has_more: true,
                })
            }
        }

        let runs = Arc::new(InMemorySyncRunRepository::new());
        runs.create("run-1", None).await.unwrap();
        let run = runs.mark_running("run-1").await.unwrap();
        let engine = SyncEngine::new(
            Arc::new(BrokenSource),
            Arc::new(InMemoryDealRepository::new()),
            Arc::new(InMemoryMessageStore::new()),
            runs,
            Arc::new(TracingEventSink),
        );

        assert!(matches!(
            engine.run(&run).await,
            Err(ChatSyncError::Source(_))
        ));
    }

    #[tokio::test]
    async fn publishes_message_and_deal_events() {
        let h = Harness::new(2, 10, &[]);
        let sink = Arc::new(BroadcastEventSink::new(16));
        let mut rx = sink.subscribe();
        let engine = SyncEngine::new(
            h.source.clone(),
            h.deals.clone(),
            h.messages.clone(),
            h.runs.clone(),
            sink,
        );
        let run = h.start_run("run-1", None).await;

        engine.run(&run).await.unwrap();

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(events.len(), 4);
        assert!(matches!(
            &events[0],
            SyncEvent::NewMessage { chat_id, .. } if chat_id == "chat_0000"
        ));
        assert!(matches!(
            &events[1],
            SyncEvent::DealUpdated { message_count: 1, sync_status, .. } if sync_status == "complete"
        ));
    }

    #[tokio::test]
    async fn source_outage_and_recovery_are_published_once() {
        let h = Harness::new(5, 10, &[]);
        h.source.fail_next(2);
        let sink = Arc::new(BroadcastEventSink::new(32));
        let mut rx = sink.subscribe();
        let engine = SyncEngine::new(
            h.source.clone(),
            h.deals.clone(),
            h.messages.clone(),
            h.runs.clone(),
            sink,
        );
        let run = h.start_run("run-1", None).await;

        assert!(engine.run(&run).await.is_err());
        assert!(engine.run(&run).await.is_err());
        engine.run(&run).await.unwrap();

        let mut statuses = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let SyncEvent::ConnectionStatus { connected, detail } = event {
                statuses.push((connected, detail.is_some()));
            }
        }
        assert_eq!(statuses, vec![(false, true), (true, false)]);
    }

    #[tokio::test]
    async fn new_customer_avatar_is_uploaded_out_of_band() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"img".to_vec()))
            .mount(&server)
            .await;

        let chats: Vec<Chat> = (0..3)
            .map(|i| {
                let mut chat = generate_chat(i, default_base_date());
                chat.customer.avatar_url = Some(format!("{}/{i}.jpg", server.uri()));
                chat
            })
            .collect();
        let deals = Arc::new(InMemoryDealRepository::new());
        let blobs = Arc::new(InMemoryBlobStore::new());
        let runs = Arc::new(InMemorySyncRunRepository::new());
        let uploader = Arc::new(
            AvatarUploader::new(blobs.clone(), deals.clone(), AvatarRetry::default()).unwrap(),
        );
        let engine = SyncEngine::new(
            Arc::new(MockChatSource::from_chats(chats, 10)),
            deals.clone(),
            Arc::new(InMemoryMessageStore::new()),
            runs.clone(),
            Arc::new(TracingEventSink),
        )
        .with_avatars(uploader.clone());

        runs.create("run-1", None).await.unwrap();
        let run = runs.mark_running("run-1").await.unwrap();
        engine.run(&run).await.unwrap();
        assert_eq!(uploader.drain().await, 3);

        assert_eq!(blobs.keys().unwrap().len(), 3);
        let customer = deals.get_by_external_id("cust_0002").await.unwrap().unwrap();
        assert_eq!(customer.avatar(), Some("avatars/cust_0002.jpg"));
    }

    fn engine_with_deals(h: &Harness, deals: Arc<FaultyDeals>) -> SyncEngine {
        SyncEngine::new(
            h.source.clone(),
            deals,
            h.messages.clone(),
            h.runs.clone(),
            Arc::new(TracingEventSink),
        )
    }

    #[tokio::test]
    async fn finalize_failure_leaves_message_stored_and_deal_failed() {
        let h = Harness::new(3, 10, &[]);
        let deals = Arc::new(FaultyDeals::new(&[], true));
        let run = h.start_run("run-1", None).await;

        let report = engine_with_deals(&h, deals.clone()).run(&run).await.unwrap();

        assert_eq!(report.synced, 0);
        assert_eq!(report.failed, 3);
        assert_eq!(report.stop, StopReason::Drained);
        assert_eq!(h.run_state("run-1").await.processed_count, 0);

        let all = deals.inner.all_deals().unwrap();
        assert_eq!(all.len(), 3);
        assert!(all
            .iter()
            .all(|d| d.sync_status == SyncStatus::Failed && d.message_count == 0));
        // the document write already happened and is not rolled back
        assert_eq!(h.messages.inner.len().unwrap(), 3);
        assert!(deals
            .list_complete(DealFilter::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn staging_failure_marks_existing_deal_failed() {
        let h = Harness::new(3, 10, &[]);
        let deals = Arc::new(FaultyDeals::new(&["chat_0001"], false));
        let now = Utc::now();
        let existing_id = Uuid::new_v4();
        deals
            .inner
            .seed_deal(Deal {
                id: existing_id,
                external_id: "chat_0001".to_string(),
                customer_id: Some(Uuid::new_v4()),
                last_message_id: Some("msg_older".to_string()),
                last_message_at: Some(default_base_date() - chrono::Duration::days(1)),
                message_count: 2,
                sync_status: SyncStatus::Complete,
                created_at: now,
                updated_at: now,
            })
            .unwrap();
        let run = h.start_run("run-1", None).await;

        let report = engine_with_deals(&h, deals.clone()).run(&run).await.unwrap();

        assert_eq!(report.synced, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(h.run_state("run-1").await.processed_count, 2);

        let failed = deals
            .find_by_external_id("chat_0001")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(failed.id, existing_id);
        assert_eq!(failed.sync_status, SyncStatus::Failed);
        assert_eq!(failed.message_count, 2);
        assert_eq!(failed.last_message_id.as_deref(), Some("msg_older"));
        assert!(h.messages.inner.list("chat_0001").await.unwrap().is_empty());

        let listed = deals.list_complete(DealFilter::default()).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|d| d.external_id != "chat_0001"));
    }
}
