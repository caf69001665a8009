use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::metrics::BroadcastMetrics;
use crate::store::{
    BroadcastCompletion, BroadcastRecord, BroadcastRecordStore, BroadcastStatus, NewBroadcast,
    StoreError,
};

use super::cancel::{cancel_pair, CancelHandle, CancelSignal};
use super::collaborators::{DeliveryObserver, MessageSender, RecipientResolver};
use super::dispatcher::BroadcastDispatcher;
use super::types::{
    BroadcastSummary, DeliveryResult, MessageTag, Recipient, ResolveError, StopReason,
};

/// Longest template accepted, in characters (Messenger text limit)
pub const MAX_MESSAGE_CHARS: usize = 2000;

/// Errors that prevent a broadcast from running at all
#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("Invalid broadcast request: {0}")]
    Validation(String),

    #[error("Recipient resolution failed: {0}")]
    Resolution(#[from] ResolveError),

    #[error("No eligible recipients for page")]
    NoRecipients,

    #[error("Broadcast store error: {0}")]
    Store(#[from] StoreError),

    #[error("Broadcast service is shutting down")]
    ShuttingDown,

    #[error("Broadcast task failed: {0}")]
    Internal(String),
}

/// One broadcast as submitted by a client
#[derive(Debug, Clone)]
pub struct BroadcastRequest {
    pub page_id: String,
    /// Spintax template, expanded separately for every recipient
    pub template: String,
    pub message_tag: Option<MessageTag>,
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Explicit recipients; when absent the page's eligible recipients are resolved
    pub recipient_ids: Option<Vec<String>>,
}

impl BroadcastRequest {
    pub fn new(page_id: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            page_id: page_id.into(),
            template: template.into(),
            message_tag: None,
            scheduled_at: None,
            recipient_ids: None,
        }
    }

    pub fn validate(&self) -> Result<(), BroadcastError> {
        if self.page_id.trim().is_empty() {
            return Err(BroadcastError::Validation("page_id is required".to_string()));
        }
        if self.template.trim().is_empty() {
            return Err(BroadcastError::Validation("message is required".to_string()));
        }
        let chars = self.template.chars().count();
        if chars > MAX_MESSAGE_CHARS {
            return Err(BroadcastError::Validation(format!(
                "message is {} characters, the maximum is {}",
                chars, MAX_MESSAGE_CHARS
            )));
        }
        if let Some(ids) = &self.recipient_ids {
            if ids.is_empty() {
                return Err(BroadcastError::Validation(
                    "recipient_ids must not be empty".to_string(),
                ));
            }
            if ids.iter().any(|id| id.trim().is_empty()) {
                return Err(BroadcastError::Validation(
                    "recipient_ids must not contain blank IDs".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Whether this request should wait for its scheduled time
    pub fn is_scheduled(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_at.is_some_and(|at| at > now)
    }
}

/// Outcome of a finished broadcast
#[derive(Debug, Clone, Serialize)]
pub struct BroadcastReport {
    pub broadcast_id: Uuid,
    pub status: BroadcastStatus,
    pub summary: BroadcastSummary,
    pub stop: StopReason,
}

/// Service-wide counters
#[derive(Debug, Default)]
pub struct ServiceStats {
    pub broadcasts_started: AtomicU64,
    pub broadcasts_completed: AtomicU64,
    pub broadcasts_cancelled: AtomicU64,
    pub broadcasts_failed: AtomicU64,
    pub deliveries_sent: AtomicU64,
    pub deliveries_failed: AtomicU64,
}

/// Snapshot of service statistics
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatsSnapshot {
    pub active_broadcasts: usize,
    pub broadcasts_started: u64,
    pub broadcasts_completed: u64,
    pub broadcasts_cancelled: u64,
    pub broadcasts_failed: u64,
    pub deliveries_sent: u64,
    pub deliveries_failed: u64,
}

/// Writes every delivery result to the store as it is produced
struct StoreObserver<'a> {
    store: &'a dyn BroadcastRecordStore,
    broadcast_id: Uuid,
}

#[async_trait]
impl DeliveryObserver for StoreObserver<'_> {
    async fn observe(&mut self, result: DeliveryResult) {
        if let Err(e) = self.store.record_delivery(self.broadcast_id, &result).await {
            tracing::warn!(
                broadcast_id = %self.broadcast_id,
                recipient_id = %result.recipient_id,
                error = %e,
                "Failed to record delivery"
            );
        }
    }
}

/// Runs broadcasts end to end: validation, recipient resolution,
/// persistence, delivery and cancellation.
pub struct BroadcastService {
    store: Arc<dyn BroadcastRecordStore>,
    dispatcher: BroadcastDispatcher,
    running: DashMap<Uuid, CancelHandle>,
    shutting_down: AtomicBool,
    stats: ServiceStats,
}

impl BroadcastService {
    pub fn new(store: Arc<dyn BroadcastRecordStore>, dispatcher: BroadcastDispatcher) -> Self {
        Self {
            store,
            dispatcher,
            running: DashMap::new(),
            shutting_down: AtomicBool::new(false),
            stats: ServiceStats::default(),
        }
    }

    pub fn store(&self) -> &Arc<dyn BroadcastRecordStore> {
        &self.store
    }

    /// Resolve recipients and deliver right away, returning once every
    /// recipient was attempted or the run was stopped.
    #[tracing::instrument(
        name = "service.send_now",
        skip(self, request, resolver, sender),
        fields(page_id = %request.page_id)
    )]
    pub async fn send_now(
        self: &Arc<Self>,
        request: BroadcastRequest,
        resolver: Arc<dyn RecipientResolver>,
        sender: Arc<dyn MessageSender>,
    ) -> Result<BroadcastReport, BroadcastError> {
        self.ensure_accepting()?;
        request.validate()?;

        let recipients = self.resolve(&request, resolver.as_ref()).await?;
        let record = self
            .store
            .create(NewBroadcast {
                page_id: request.page_id.clone(),
                template: request.template.clone(),
                recipient_count: recipients.len(),
                status: BroadcastStatus::Sending,
                message_tag: request.message_tag,
                scheduled_at: None,
            })
            .await?;

        tracing::info!(
            broadcast_id = %record.id,
            recipient_count = recipients.len(),
            "Broadcast started"
        );
        self.record_started(false);
        let signal = self.register(record.id);

        // The run continues even if the caller goes away
        let service = Arc::clone(self);
        let id = record.id;
        let task = tokio::spawn(async move {
            let _entry = RunningEntry::new(&service, id);
            service
                .deliver(id, &request.template, &recipients, sender.as_ref(), signal)
                .await
        });

        task.await.map_err(|e| {
            tracing::error!(broadcast_id = %id, error = %e, "Broadcast task aborted");
            BroadcastError::Internal(e.to_string())
        })
    }

    /// Store the broadcast as `scheduled` and deliver it at `scheduled_at`.
    ///
    /// Recipients are resolved when the scheduled time arrives.
    #[tracing::instrument(
        name = "service.schedule",
        skip(self, request, resolver, sender),
        fields(page_id = %request.page_id)
    )]
    pub async fn schedule(
        self: &Arc<Self>,
        request: BroadcastRequest,
        resolver: Arc<dyn RecipientResolver>,
        sender: Arc<dyn MessageSender>,
    ) -> Result<BroadcastRecord, BroadcastError> {
        self.ensure_accepting()?;
        request.validate()?;

        let scheduled_at = match request.scheduled_at {
            Some(at) if at > Utc::now() => at,
            Some(_) => {
                return Err(BroadcastError::Validation(
                    "scheduled_at must be in the future".to_string(),
                ))
            }
            None => {
                return Err(BroadcastError::Validation(
                    "scheduled_at is required".to_string(),
                ))
            }
        };

        let record = self
            .store
            .create(NewBroadcast {
                page_id: request.page_id.clone(),
                template: request.template.clone(),
                recipient_count: request.recipient_ids.as_ref().map_or(0, Vec::len),
                status: BroadcastStatus::Scheduled,
                message_tag: request.message_tag,
                scheduled_at: Some(scheduled_at),
            })
            .await?;

        tracing::info!(
            broadcast_id = %record.id,
            scheduled_at = %scheduled_at,
            "Broadcast scheduled"
        );
        self.record_started(true);
        let signal = self.register(record.id);

        let service = Arc::clone(self);
        let id = record.id;
        tokio::spawn(async move {
            let _entry = RunningEntry::new(&service, id);
            service
                .run_scheduled(id, request, scheduled_at, resolver, sender, signal)
                .await;
        });

        Ok(record)
    }

    /// Signal a running or scheduled broadcast to stop.
    ///
    /// Returns false when no such broadcast is active.
    pub fn cancel(&self, broadcast_id: Uuid) -> bool {
        match self.running.get(&broadcast_id) {
            Some(handle) => {
                handle.cancel();
                tracing::info!(broadcast_id = %broadcast_id, "Broadcast cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Stop accepting broadcasts and cancel every active one
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        let count = self.running.len();
        for entry in self.running.iter() {
            entry.value().cancel();
        }
        tracing::info!(cancelled = count, "Broadcast service shutting down");
    }

    /// Wait until no broadcast is active, up to `timeout`.
    ///
    /// Returns true when everything finished in time.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while !self.running.is_empty() {
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(
                    active = self.running.len(),
                    "Timed out waiting for broadcasts to finish"
                );
                return false;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        true
    }

    pub fn active_count(&self) -> usize {
        self.running.len()
    }

    pub fn is_active(&self, broadcast_id: Uuid) -> bool {
        self.running.contains_key(&broadcast_id)
    }

    pub fn stats(&self) -> ServiceStatsSnapshot {
        ServiceStatsSnapshot {
            active_broadcasts: self.active_count(),
            broadcasts_started: self.stats.broadcasts_started.load(Ordering::Relaxed),
            broadcasts_completed: self.stats.broadcasts_completed.load(Ordering::Relaxed),
            broadcasts_cancelled: self.stats.broadcasts_cancelled.load(Ordering::Relaxed),
            broadcasts_failed: self.stats.broadcasts_failed.load(Ordering::Relaxed),
            deliveries_sent: self.stats.deliveries_sent.load(Ordering::Relaxed),
            deliveries_failed: self.stats.deliveries_failed.load(Ordering::Relaxed),
        }
    }

    fn ensure_accepting(&self) -> Result<(), BroadcastError> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(BroadcastError::ShuttingDown);
        }
        Ok(())
    }

    /// Track a broadcast so `cancel` and `shutdown` can reach it.
    ///
    /// A shutdown that started while the broadcast was being prepared did not
    /// see it in `running`, so the flag is checked again after insertion.
    fn register(&self, broadcast_id: Uuid) -> CancelSignal {
        let (handle, signal) = cancel_pair();
        self.running.insert(broadcast_id, handle);
        if self.shutting_down.load(Ordering::SeqCst) {
            if let Some(handle) = self.running.get(&broadcast_id) {
                handle.cancel();
            }
            tracing::info!(broadcast_id = %broadcast_id, "Broadcast registered during shutdown, cancelling");
        }
        signal
    }

    async fn resolve(
        &self,
        request: &BroadcastRequest,
        resolver: &dyn RecipientResolver,
    ) -> Result<Vec<Recipient>, BroadcastError> {
        let recipients = match &request.recipient_ids {
            Some(ids) => {
                let mut seen = HashSet::new();
                ids.iter()
                    .filter(|id| seen.insert(id.as_str()))
                    .map(|id| Recipient::new(id.as_str()))
                    .collect()
            }
            None => resolver.eligible_recipients(&request.page_id).await?,
        };

        if recipients.is_empty() {
            return Err(BroadcastError::NoRecipients);
        }
        Ok(recipients)
    }

    async fn run_scheduled(
        &self,
        broadcast_id: Uuid,
        request: BroadcastRequest,
        scheduled_at: DateTime<Utc>,
        resolver: Arc<dyn RecipientResolver>,
        sender: Arc<dyn MessageSender>,
        mut signal: CancelSignal,
    ) {
        let wait = (scheduled_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = signal.cancelled() => {
                tracing::info!(broadcast_id = %broadcast_id, "Scheduled broadcast cancelled before start");
                self.finish(
                    broadcast_id,
                    BroadcastCompletion::from_summary(BroadcastStatus::Cancelled, BroadcastSummary::default()),
                )
                .await;
                return;
            }
        }

        let recipients = match self.resolve(&request, resolver.as_ref()).await {
            Ok(recipients) => recipients,
            Err(e) => {
                tracing::warn!(broadcast_id = %broadcast_id, error = %e, "Scheduled broadcast failed");
                self.finish(broadcast_id, BroadcastCompletion::failed(e.to_string()))
                    .await;
                return;
            }
        };

        if let Err(e) = self.store.mark_sending(broadcast_id, recipients.len()).await {
            tracing::warn!(broadcast_id = %broadcast_id, error = %e, "Failed to mark broadcast as sending");
        }

        self.deliver(
            broadcast_id,
            &request.template,
            &recipients,
            sender.as_ref(),
            signal,
        )
        .await;
    }

    async fn deliver(
        &self,
        broadcast_id: Uuid,
        template: &str,
        recipients: &[Recipient],
        sender: &dyn MessageSender,
        signal: CancelSignal,
    ) -> BroadcastReport {
        let mut rng = StdRng::from_rng(&mut rand::rng());
        let mut observer = StoreObserver {
            store: self.store.as_ref(),
            broadcast_id,
        };

        let outcome = self
            .dispatcher
            .run(template, recipients, sender, &mut rng, &mut observer, signal)
            .await;

        let status = match outcome.stop {
            StopReason::Completed => BroadcastStatus::Completed,
            StopReason::Cancelled | StopReason::DeadlineExceeded => BroadcastStatus::Cancelled,
        };
        let mut completion = BroadcastCompletion::from_summary(status, outcome.summary);
        if outcome.stop == StopReason::DeadlineExceeded {
            completion.error = Some("maximum broadcast duration exceeded".to_string());
        }

        self.stats
            .deliveries_sent
            .fetch_add(outcome.summary.succeeded as u64, Ordering::Relaxed);
        self.stats
            .deliveries_failed
            .fetch_add(outcome.summary.failed as u64, Ordering::Relaxed);
        self.finish(broadcast_id, completion).await;

        BroadcastReport {
            broadcast_id,
            status,
            summary: outcome.summary,
            stop: outcome.stop,
        }
    }

    async fn finish(&self, broadcast_id: Uuid, completion: BroadcastCompletion) {
        let status = completion.status;
        if let Err(e) = self.store.complete(broadcast_id, completion).await {
            tracing::error!(broadcast_id = %broadcast_id, error = %e, "Failed to record broadcast completion");
        }

        let counter = match status {
            BroadcastStatus::Cancelled => &self.stats.broadcasts_cancelled,
            BroadcastStatus::Failed => &self.stats.broadcasts_failed,
            _ => &self.stats.broadcasts_completed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        BroadcastMetrics::record_finished(status.as_str());
        tracing::info!(broadcast_id = %broadcast_id, status = %status, "Broadcast finished");
    }

    fn record_started(&self, scheduled: bool) {
        self.stats.broadcasts_started.fetch_add(1, Ordering::Relaxed);
        BroadcastMetrics::record_started(scheduled);
    }
}

/// Removes a broadcast from the running set when its task ends, panics included
struct RunningEntry {
    service: Arc<BroadcastService>,
    id: Uuid,
}

impl RunningEntry {
    fn new(service: &Arc<BroadcastService>, id: Uuid) -> Self {
        Self {
            service: Arc::clone(service),
            id,
        }
    }
}

impl Drop for RunningEntry {
    fn drop(&mut self) {
        self.service.running.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::dispatcher::DispatchConfig;
    use crate::broadcast::pacing::PacingPolicy;
    use crate::broadcast::types::{SendError, SentMessage};
    use crate::store::{DeliveryRecord, MemoryBroadcastStore};
    use std::sync::atomic::AtomicUsize;

    struct StubResolver {
        result: Result<Vec<Recipient>, ResolveError>,
        calls: AtomicUsize,
    }

    impl StubResolver {
        fn with(ids: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                result: Ok(ids.iter().map(|id| Recipient::new(*id)).collect()),
                calls: AtomicUsize::new(0),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                result: Err(ResolveError::Unavailable("graph down".to_string())),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl RecipientResolver for StubResolver {
        async fn eligible_recipients(&self, _page_id: &str) -> Result<Vec<Recipient>, ResolveError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    #[derive(Default)]
    struct StubSender {
        fail_for: Vec<String>,
        delay: Duration,
        sent: AtomicUsize,
    }

    impl StubSender {
        fn failing_for(ids: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                fail_for: ids.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            })
        }

        fn slow(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                delay,
                ..Default::default()
            })
        }

        fn calls(&self) -> usize {
            self.sent.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MessageSender for StubSender {
        async fn send(&self, recipient_id: &str, _text: &str) -> Result<SentMessage, SendError> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail_for.iter().any(|id| id == recipient_id) {
                return Err(SendError::InvalidRecipient(recipient_id.to_string()));
            }
            Ok(SentMessage {
                message_id: format!("mid.{}", recipient_id),
            })
        }
    }

    fn service() -> Arc<BroadcastService> {
        let dispatcher = BroadcastDispatcher::new(DispatchConfig {
            pacing: PacingPolicy::immediate(),
            max_duration: None,
        });
        Arc::new(BroadcastService::new(
            Arc::new(MemoryBroadcastStore::new()),
            dispatcher,
        ))
    }

    async fn wait_for_status(
        service: &BroadcastService,
        id: Uuid,
        status: BroadcastStatus,
    ) -> BroadcastRecord {
        for _ in 0..200 {
            if let Some(record) = service.store().get(id).await.unwrap() {
                if record.status == status {
                    return record;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("broadcast {} never reached {}", id, status);
    }

    #[tokio::test]
    async fn test_send_now_records_every_delivery() {
        let service = service();
        let sender = StubSender::failing_for(&["u2"]);
        let report = service
            .send_now(
                BroadcastRequest::new("page-1", "{Hi|Hello} there"),
                StubResolver::with(&["u1", "u2", "u3"]),
                sender.clone(),
            )
            .await
            .unwrap();

        assert_eq!(report.status, BroadcastStatus::Completed);
        assert_eq!(report.summary.total, 3);
        assert_eq!(report.summary.succeeded, 2);
        assert_eq!(report.summary.failed, 1);
        assert_eq!(sender.calls(), 3);

        let record = service.store().get(report.broadcast_id).await.unwrap().unwrap();
        let deliveries = service.store().deliveries(report.broadcast_id).await.unwrap();
        assert_eq!(record.status, BroadcastStatus::Completed);
        assert_eq!(record.sent_count + record.failed_count, deliveries.len());
        assert!(!deliveries[1].result.succeeded);
        assert_eq!(service.active_count(), 0);
    }

    #[tokio::test]
    async fn test_resolution_failure_sends_nothing() {
        let service = service();
        let sender = StubSender::failing_for(&[]);
        let err = service
            .send_now(
                BroadcastRequest::new("page-1", "Hi"),
                StubResolver::failing(),
                sender.clone(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, BroadcastError::Resolution(_)));
        assert_eq!(sender.calls(), 0);
        assert!(service.store().list(None, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_no_recipients_is_an_error() {
        let service = service();
        let err = service
            .send_now(
                BroadcastRequest::new("page-1", "Hi"),
                StubResolver::with(&[]),
                StubSender::failing_for(&[]),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BroadcastError::NoRecipients));
    }

    #[tokio::test]
    async fn test_explicit_recipients_skip_resolver() {
        let service = service();
        let resolver = StubResolver::failing();
        let mut request = BroadcastRequest::new("page-1", "Hi");
        request.recipient_ids = Some(vec!["a".into(), "b".into(), "a".into()]);

        let report = service
            .send_now(request, resolver.clone(), StubSender::failing_for(&[]))
            .await
            .unwrap();
        assert_eq!(report.summary.total, 2);
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_request_validation() {
        assert!(BroadcastRequest::new("", "Hi").validate().is_err());
        assert!(BroadcastRequest::new("page", "   ").validate().is_err());
        assert!(BroadcastRequest::new("page", "x".repeat(MAX_MESSAGE_CHARS + 1))
            .validate()
            .is_err());
        assert!(BroadcastRequest::new("page", "x".repeat(MAX_MESSAGE_CHARS))
            .validate()
            .is_ok());

        let mut request = BroadcastRequest::new("page", "Hi");
        request.recipient_ids = Some(vec![]);
        assert!(request.validate().is_err());
    }

    #[tokio::test]
    async fn test_scheduled_broadcast_runs_later() {
        let service = service();
        let sender = StubSender::failing_for(&[]);
        let mut request = BroadcastRequest::new("page-1", "Hi");
        request.scheduled_at = Some(Utc::now() + chrono::Duration::milliseconds(50));

        let record = service
            .schedule(request, StubResolver::with(&["u1", "u2"]), sender.clone())
            .await
            .unwrap();
        assert_eq!(record.status, BroadcastStatus::Scheduled);
        assert_eq!(sender.calls(), 0);

        let done = wait_for_status(&service, record.id, BroadcastStatus::Completed).await;
        assert_eq!(done.recipient_count, 2);
        assert_eq!(done.sent_count, 2);
        assert_eq!(sender.calls(), 2);
    }

    #[tokio::test]
    async fn test_cancel_scheduled_broadcast() {
        let service = service();
        let sender = StubSender::failing_for(&[]);
        let mut request = BroadcastRequest::new("page-1", "Hi");
        request.scheduled_at = Some(Utc::now() + chrono::Duration::seconds(30));

        let record = service
            .schedule(request, StubResolver::with(&["u1"]), sender.clone())
            .await
            .unwrap();
        assert!(service.cancel(record.id));

        wait_for_status(&service, record.id, BroadcastStatus::Cancelled).await;
        assert_eq!(sender.calls(), 0);
        assert!(!service.cancel(Uuid::new_v4()));
    }

    #[tokio::test]
    async fn test_scheduled_resolution_failure_marks_failed() {
        let service = service();
        let mut request = BroadcastRequest::new("page-1", "Hi");
        request.scheduled_at = Some(Utc::now() + chrono::Duration::milliseconds(20));

        let record = service
            .schedule(request, StubResolver::failing(), StubSender::failing_for(&[]))
            .await
            .unwrap();

        let failed = wait_for_status(&service, record.id, BroadcastStatus::Failed).await;
        assert!(failed.error.is_some());
    }

    #[tokio::test]
    async fn test_schedule_rejects_past_time() {
        let service = service();
        let mut request = BroadcastRequest::new("page-1", "Hi");
        request.scheduled_at = Some(Utc::now() - chrono::Duration::seconds(5));

        let err = service
            .schedule(request, StubResolver::with(&["u1"]), StubSender::failing_for(&[]))
            .await
            .unwrap_err();
        assert!(matches!(err, BroadcastError::Validation(_)));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_running_broadcast() {
        let service = service();
        let ids: Vec<String> = (0..20).map(|i| format!("u{}", i)).collect();
        let mut request = BroadcastRequest::new("page-1", "Hi");
        request.recipient_ids = Some(ids);

        let running = {
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                service
                    .send_now(
                        request,
                        StubResolver::with(&[]),
                        StubSender::slow(Duration::from_millis(20)),
                    )
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(70)).await;
        service.shutdown();

        let report = running.await.unwrap().unwrap();
        assert_eq!(report.stop, StopReason::Cancelled);
        assert_eq!(report.status, BroadcastStatus::Cancelled);
        assert!(report.summary.total < 20);
        assert!(service.drain(Duration::from_secs(1)).await);

        let err = service
            .send_now(
                BroadcastRequest::new("page-1", "Hi"),
                StubResolver::with(&["u1"]),
                StubSender::failing_for(&[]),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BroadcastError::ShuttingDown));
    }

    /// Resolver that takes a while, leaving room for a shutdown mid-preparation
    struct SlowResolver {
        delay: Duration,
        ids: Vec<String>,
    }

    #[async_trait]
    impl RecipientResolver for SlowResolver {
        async fn eligible_recipients(&self, _page_id: &str) -> Result<Vec<Recipient>, ResolveError> {
            tokio::time::sleep(self.delay).await;
            Ok(self.ids.iter().map(|id| Recipient::new(id.as_str())).collect())
        }
    }

    #[tokio::test]
    async fn test_shutdown_during_resolution_cancels_broadcast() {
        let service = service();
        let sender = StubSender::failing_for(&[]);
        let resolver = Arc::new(SlowResolver {
            delay: Duration::from_millis(50),
            ids: (0..5).map(|i| format!("u{}", i)).collect(),
        });

        let running = {
            let service = Arc::clone(&service);
            let sender = sender.clone();
            tokio::spawn(async move {
                service
                    .send_now(BroadcastRequest::new("page-1", "Hi"), resolver, sender)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        service.shutdown();

        let report = running.await.unwrap().unwrap();
        assert_eq!(report.stop, StopReason::Cancelled);
        assert_eq!(report.status, BroadcastStatus::Cancelled);
        assert_eq!(report.summary.total, 0);
        assert_eq!(sender.calls(), 0);
        assert!(service.drain(Duration::from_secs(1)).await);
    }

    /// Memory store whose `complete` panics
    #[derive(Default)]
    struct PanickingStore {
        inner: MemoryBroadcastStore,
    }

    #[async_trait]
    impl BroadcastRecordStore for PanickingStore {
        async fn create(&self, broadcast: NewBroadcast) -> Result<BroadcastRecord, StoreError> {
            self.inner.create(broadcast).await
        }

        async fn mark_sending(&self, id: Uuid, recipient_count: usize) -> Result<(), StoreError> {
            self.inner.mark_sending(id, recipient_count).await
        }

        async fn record_delivery(&self, id: Uuid, result: &DeliveryResult) -> Result<(), StoreError> {
            self.inner.record_delivery(id, result).await
        }

        async fn complete(&self, _id: Uuid, _completion: BroadcastCompletion) -> Result<(), StoreError> {
            panic!("store went away");
        }

        async fn get(&self, id: Uuid) -> Result<Option<BroadcastRecord>, StoreError> {
            self.inner.get(id).await
        }

        async fn list(
            &self,
            page_id: Option<&str>,
            limit: usize,
        ) -> Result<Vec<BroadcastRecord>, StoreError> {
            self.inner.list(page_id, limit).await
        }

        async fn deliveries(&self, id: Uuid) -> Result<Vec<DeliveryRecord>, StoreError> {
            self.inner.deliveries(id).await
        }
    }

    #[tokio::test]
    async fn test_panicking_run_leaves_no_active_entry() {
        let dispatcher = BroadcastDispatcher::new(DispatchConfig {
            pacing: PacingPolicy::immediate(),
            max_duration: None,
        });
        let service = Arc::new(BroadcastService::new(
            Arc::new(PanickingStore::default()),
            dispatcher,
        ));

        let err = service
            .send_now(
                BroadcastRequest::new("page-1", "Hi"),
                StubResolver::with(&["u1"]),
                StubSender::failing_for(&[]),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, BroadcastError::Internal(_)));
        assert_eq!(service.active_count(), 0);
        assert!(service.drain(Duration::from_millis(100)).await);
    }
}
