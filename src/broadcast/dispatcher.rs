use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use rand::Rng;
use serde::Serialize;
use tokio::time::Instant;

use crate::metrics::DeliveryMetrics;
use crate::spintax;

use super::cancel::CancelSignal;
use super::collaborators::{DeliveryObserver, MessageSender};
use super::pacing::{Pacer, PacingPolicy};
use super::types::{BroadcastSummary, BroadcastTally, DeliveryResult, Recipient, SendError, StopReason};

/// Dispatcher configuration
#[derive(Debug, Clone, Default)]
pub struct DispatchConfig {
    pub pacing: PacingPolicy,
    /// Stop starting new sends once a run has lasted this long
    pub max_duration: Option<Duration>,
}

/// Result of one dispatcher run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DispatchOutcome {
    pub summary: BroadcastSummary,
    pub stop: StopReason,
}

/// Sends one template to a list of recipients, one at a time.
///
/// Every recipient gets its own spintax expansion. A failed send is recorded
/// for that recipient and the run moves on; nothing is retried.
#[derive(Debug, Clone, Default)]
pub struct BroadcastDispatcher {
    config: DispatchConfig,
}

impl BroadcastDispatcher {
    pub fn new(config: DispatchConfig) -> Self {
        Self { config }
    }

    /// Run a broadcast over `recipients` in order.
    ///
    /// Each delivery result is handed to `observer` as soon as it exists.
    /// `cancel` and the configured deadline are checked before every
    /// recipient; results produced before the stop stay valid.
    #[tracing::instrument(
        name = "dispatcher.run",
        skip_all,
        fields(recipient_count = recipients.len())
    )]
    pub async fn run<R, O>(
        &self,
        template: &str,
        recipients: &[Recipient],
        sender: &dyn MessageSender,
        rng: &mut R,
        observer: &mut O,
        mut cancel: CancelSignal,
    ) -> DispatchOutcome
    where
        R: Rng + Send,
        O: DeliveryObserver + ?Sized,
    {
        let deadline = self.config.max_duration.map(|d| Instant::now() + d);
        let mut pacer = Pacer::new(&self.config.pacing);
        let mut tally = BroadcastTally::new();
        let mut stop = StopReason::Completed;

        for (index, recipient) in recipients.iter().enumerate() {
            if index > 0 {
                let pause = pacer.next_pause();
                if !pause.is_zero() {
                    tokio::select! {
                        _ = tokio::time::sleep(pause) => {}
                        _ = cancel.cancelled() => {}
                    }
                }
            }

            if cancel.is_cancelled() {
                stop = StopReason::Cancelled;
                break;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                stop = StopReason::DeadlineExceeded;
                break;
            }

            let message = spintax::expand_with(template, rng);
            let started = Instant::now();
            let outcome = AssertUnwindSafe(sender.send(&recipient.id, &message))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(SendError::Internal(panic_message(panic.as_ref()))));
            DeliveryMetrics::observe_latency(started.elapsed());
            pacer.observe(&outcome);

            let result = match outcome {
                Ok(sent) => {
                    DeliveryMetrics::record_sent();
                    DeliveryResult::sent(&recipient.id, message, sent)
                }
                Err(e) => {
                    DeliveryMetrics::record_failed(e.is_rate_limited());
                    tracing::warn!(
                        recipient_id = %recipient.id,
                        position = index,
                        error = %e,
                        "Delivery failed"
                    );
                    DeliveryResult::failed(&recipient.id, message, e.to_string())
                }
            };

            tally.record(&result);
            observer.observe(result).await;
        }

        let summary = tally.summary();
        tracing::info!(
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            stop = ?stop,
            "Broadcast run finished"
        );

        DispatchOutcome { summary, stop }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("sender panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("sender panicked: {}", s)
    } else {
        "sender panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::cancel::{cancel_pair, CancelHandle};
    use crate::broadcast::types::SentMessage;
    use async_trait::async_trait;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Records every call; fails or panics for the configured recipients
    #[derive(Default)]
    struct StubSender {
        calls: Mutex<Vec<(String, String)>>,
        fail_for: Vec<String>,
        panic_for: Vec<String>,
        cancel_after: Mutex<Option<(String, CancelHandle)>>,
    }

    impl StubSender {
        fn failing_for(ids: &[&str]) -> Self {
            Self {
                fail_for: ids.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<(String, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MessageSender for StubSender {
        async fn send(&self, recipient_id: &str, text: &str) -> Result<SentMessage, SendError> {
            self.calls
                .lock()
                .unwrap()
                .push((recipient_id.to_string(), text.to_string()));

            if let Some((id, handle)) = self.cancel_after.lock().unwrap().as_ref() {
                if id == recipient_id {
                    handle.cancel();
                }
            }
            if self.panic_for.iter().any(|id| id == recipient_id) {
                panic!("stub exploded");
            }
            if self.fail_for.iter().any(|id| id == recipient_id) {
                return Err(SendError::InvalidRecipient(recipient_id.to_string()));
            }
            Ok(SentMessage {
                message_id: format!("mid.{}", recipient_id),
            })
        }
    }

    fn recipients(ids: &[&str]) -> Vec<Recipient> {
        ids.iter().map(|id| Recipient::new(*id)).collect()
    }

    fn dispatcher() -> BroadcastDispatcher {
        BroadcastDispatcher::new(DispatchConfig {
            pacing: PacingPolicy::immediate(),
            max_duration: None,
        })
    }

    #[tokio::test]
    async fn test_empty_recipients_never_calls_sender() {
        let sender = StubSender::default();
        let mut results = Vec::new();
        let outcome = dispatcher()
            .run(
                "{a|b}",
                &[],
                &sender,
                &mut StdRng::seed_from_u64(1),
                &mut results,
                CancelSignal::never(),
            )
            .await;

        assert_eq!(outcome.summary, BroadcastSummary::default());
        assert_eq!(outcome.stop, StopReason::Completed);
        assert!(results.is_empty());
        assert!(sender.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failure_is_isolated_to_one_recipient() {
        let sender = StubSender::failing_for(&["u3"]);
        let mut results = Vec::new();
        let outcome = dispatcher()
            .run(
                "Hello",
                &recipients(&["u1", "u2", "u3", "u4", "u5"]),
                &sender,
                &mut StdRng::seed_from_u64(2),
                &mut results,
                CancelSignal::never(),
            )
            .await;

        assert_eq!(outcome.summary.total, 5);
        assert_eq!(outcome.summary.succeeded, 4);
        assert_eq!(outcome.summary.failed, 1);

        let attempted: Vec<String> = sender.calls().into_iter().map(|(id, _)| id).collect();
        assert_eq!(attempted, vec!["u1", "u2", "u3", "u4", "u5"]);

        let failed: Vec<&DeliveryResult> = results.iter().filter(|r| !r.succeeded).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].recipient_id, "u3");
        assert!(failed[0].error_detail.as_deref().unwrap().contains("Invalid recipient"));
        assert!(failed[0].sent_message_id.is_none());
        assert_eq!(BroadcastSummary::from_results(&results), outcome.summary);
    }

    #[tokio::test]
    async fn test_each_recipient_gets_its_own_expansion() {
        let sender = StubSender::default();
        let ids: Vec<String> = (0..50).map(|i| format!("u{}", i)).collect();
        let list: Vec<Recipient> = ids.iter().map(Recipient::new).collect();
        let mut results = Vec::new();

        dispatcher()
            .run(
                "{a|b}",
                &list,
                &sender,
                &mut StdRng::seed_from_u64(3),
                &mut results,
                CancelSignal::never(),
            )
            .await;

        let distinct: HashSet<&str> = results.iter().map(|r| r.message.as_str()).collect();
        assert!(distinct.len() > 1);
    }

    #[tokio::test]
    async fn test_concrete_scenario() {
        let sender = StubSender::default();
        let mut results = Vec::new();
        let outcome = dispatcher()
            .run(
                "Hi %(name)s! {Save|Get} 20% off",
                &recipients(&["u1", "u2", "u3"]),
                &sender,
                &mut StdRng::seed_from_u64(4),
                &mut results,
                CancelSignal::never(),
            )
            .await;

        assert_eq!(
            outcome.summary,
            BroadcastSummary {
                total: 3,
                succeeded: 3,
                failed: 0
            }
        );
        assert_eq!(results.len(), 3);
        for result in &results {
            assert!(result.message.contains("Save") ^ result.message.contains("Get"));
            assert_eq!(
                result.sent_message_id.as_deref(),
                Some(format!("mid.{}", result.recipient_id).as_str())
            );
        }
    }

    #[tokio::test]
    async fn test_sender_panic_becomes_failed_delivery() {
        let sender = StubSender {
            panic_for: vec!["u2".to_string()],
            ..Default::default()
        };
        let mut results = Vec::new();
        let outcome = dispatcher()
            .run(
                "Hi",
                &recipients(&["u1", "u2", "u3"]),
                &sender,
                &mut StdRng::seed_from_u64(5),
                &mut results,
                CancelSignal::never(),
            )
            .await;

        assert_eq!(outcome.summary.succeeded, 2);
        assert_eq!(outcome.summary.failed, 1);
        assert!(results[1]
            .error_detail
            .as_deref()
            .unwrap()
            .contains("stub exploded"));
        assert_eq!(sender.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_cancel_stops_between_recipients() {
        let (handle, signal) = cancel_pair();
        let sender = StubSender::default();
        *sender.cancel_after.lock().unwrap() = Some(("u2".to_string(), handle));

        let mut results = Vec::new();
        let outcome = dispatcher()
            .run(
                "Hi",
                &recipients(&["u1", "u2", "u3", "u4"]),
                &sender,
                &mut StdRng::seed_from_u64(6),
                &mut results,
                signal,
            )
            .await;

        assert_eq!(outcome.stop, StopReason::Cancelled);
        assert_eq!(outcome.summary.total, 2);
        assert_eq!(results.len(), 2);
        assert_eq!(sender.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_zero_deadline_sends_nothing() {
        let sender = StubSender::default();
        let dispatcher = BroadcastDispatcher::new(DispatchConfig {
            pacing: PacingPolicy::immediate(),
            max_duration: Some(Duration::ZERO),
        });
        let outcome = dispatcher
            .run(
                "Hi",
                &recipients(&["u1", "u2"]),
                &sender,
                &mut StdRng::seed_from_u64(7),
                &mut (),
                CancelSignal::never(),
            )
            .await;

        assert_eq!(outcome.stop, StopReason::DeadlineExceeded);
        assert_eq!(outcome.summary.total, 0);
        assert!(sender.calls().is_empty());
    }

    #[tokio::test]
    async fn test_sends_are_paced() {
        let sender = StubSender::default();
        let dispatcher = BroadcastDispatcher::new(DispatchConfig {
            pacing: PacingPolicy {
                send_delay: Duration::from_millis(20),
                ..PacingPolicy::immediate()
            },
            max_duration: None,
        });

        let started = std::time::Instant::now();
        dispatcher
            .run(
                "Hi",
                &recipients(&["u1", "u2", "u3"]),
                &sender,
                &mut StdRng::seed_from_u64(8),
                &mut (),
                CancelSignal::never(),
            )
            .await;

        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_seeded_runs_are_reproducible() {
        let template = "{Hi|Hello|Hey} {there|friend}";
        let list = recipients(&["u1", "u2", "u3", "u4"]);

        let mut first = Vec::new();
        dispatcher()
            .run(
                template,
                &list,
                &StubSender::default(),
                &mut StdRng::seed_from_u64(99),
                &mut first,
                CancelSignal::never(),
            )
            .await;

        let mut second = Vec::new();
        dispatcher()
            .run(
                template,
                &list,
                &StubSender::default(),
                &mut StdRng::seed_from_u64(99),
                &mut second,
                CancelSignal::never(),
            )
            .await;

        let a: Vec<&str> = first.iter().map(|r| r.message.as_str()).collect();
        let b: Vec<&str> = second.iter().map(|r| r.message.as_str()).collect();
        assert_eq!(a, b);
    }
}
