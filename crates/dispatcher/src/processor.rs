//! Dispatcher processor
//!
//! Delivers pending notifications in priority order through the channel,
//! retrying failed sends and recording every outcome on the notification.

use crate::keyboard::Keyboard;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tarwatch_common::channel::{Action, Channel, Target};
use tarwatch_common::config::AppConfig;
use tarwatch_common::domain::{DeliveryState, Notification, NotificationUpdate};
use tarwatch_common::errors::AppError;
use tarwatch_common::metrics::{record_exhausted, record_send};
use tarwatch_common::store::Store;
use tarwatch_common::{Pacer, Shutdown};
use tracing::{debug, error, info, instrument, warn};

/// Dispatcher settings resolved from configuration
#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    pub batch_size: u64,
    /// Send attempts per notification within one dispatch
    pub max_send_attempts: u32,
    /// Pause after every successful send
    pub send_cooldown: Duration,
    /// Multiplied by the attempt number between failed sends
    pub retry_base_delay: Duration,
}

impl DispatcherSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            batch_size: config.dispatcher.batch_size,
            max_send_attempts: config.dispatcher.max_send_attempts.max(1),
            send_cooldown: config.send_cooldown(),
            retry_base_delay: config.retry_base_delay(),
        }
    }
}

/// Result of dispatching one notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// Every attempt failed; the notification waits for a requeue
    Exhausted,
    /// No recipient or alias to send to
    Undeliverable,
}

/// Totals of one batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub sent: usize,
    pub exhausted: usize,
    pub undeliverable: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatcherError {
    #[error("Storage failure: {0}")]
    Store(AppError),

    #[error("Channel failure: {0}")]
    Channel(AppError),

    #[error("Notification {0} not found")]
    NotFound(i64),

    #[error("Notification {id} cannot be {action}: {reason}")]
    InvalidState {
        id: i64,
        action: &'static str,
        reason: &'static str,
    },
}

/// Dispatcher worker
pub struct Dispatcher {
    store: Arc<dyn Store>,
    channel: Arc<dyn Channel>,
    keyboard: Keyboard,
    settings: DispatcherSettings,
    pacer: Pacer,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn Store>,
        channel: Arc<dyn Channel>,
        keyboard: Keyboard,
        settings: DispatcherSettings,
        pacer: Pacer,
    ) -> Self {
        Self {
            store,
            channel,
            keyboard,
            settings,
            pacer,
        }
    }

    pub fn pacer(&self) -> &Pacer {
        &self.pacer
    }

    /// Poll until shutdown, sleeping the adaptive interval between batches
    pub async fn run(&mut self, mut shutdown: Shutdown) -> Result<(), DispatcherError> {
        loop {
            if shutdown.is_triggered() {
                break;
            }

            let report = self.run_once(&shutdown).await?;
            if report != BatchReport::default() {
                info!(?report, "Batch dispatched");
            }

            debug!(secs = self.pacer.current_secs(), "Sleeping");
            if !shutdown.sleep(self.pacer.interval()).await {
                break;
            }
        }

        info!("Dispatcher stopped");
        Ok(())
    }

    /// Deliver one batch of pending notifications
    pub async fn run_once(&mut self, shutdown: &Shutdown) -> Result<BatchReport, DispatcherError> {
        let pending = self
            .store
            .select_pending_notifications(self.settings.batch_size)
            .await
            .map_err(DispatcherError::Store)?;

        let mut report = BatchReport::default();

        if pending.is_empty() {
            self.pacer.on_empty_batch();
            return Ok(report);
        }

        let mut urgent = false;
        for notification in pending {
            if shutdown.is_triggered() {
                warn!("Batch interrupted by shutdown");
                break;
            }

            urgent |= notification.is_urgent();

            match self.dispatch(notification).await? {
                Delivery::Sent => report.sent += 1,
                Delivery::Exhausted => report.exhausted += 1,
                Delivery::Undeliverable => report.undeliverable += 1,
            }
        }

        self.pacer.on_batch(urgent);
        Ok(report)
    }

    #[instrument(skip(self, notification), fields(id = notification.id, priority = notification.priority))]
    async fn dispatch(&self, notification: Notification) -> Result<Delivery, DispatcherError> {
        let Some(target) = notification.target() else {
            warn!("Notification has neither recipient nor alias");
            self.update(
                notification.id,
                NotificationUpdate::Failed("notification has neither recipient nor alias".to_string()),
            )
            .await?;
            return Ok(Delivery::Undeliverable);
        };

        let actions = self.resolve_actions(&notification, &target).await?;
        self.send_with_retry(&notification, &target, &actions).await
    }

    /// Persist the deep link of the referenced document and build its keyboard
    async fn resolve_actions(
        &self,
        notification: &Notification,
        target: &Target,
    ) -> Result<Vec<Action>, DispatcherError> {
        let Some(document_id) = notification.document_id else {
            return Ok(Vec::new());
        };

        let link = self
            .store
            .find_document_link(document_id)
            .await
            .map_err(DispatcherError::Store)?;

        let Some(link) = link else {
            warn!(document_id, "Referenced document not found, sending without actions");
            return Ok(Vec::new());
        };

        let short_url = self.keyboard.deep_link(&link.public_id);
        self.update(notification.id, NotificationUpdate::ShortUrl(short_url))
            .await?;

        Ok(self.keyboard.actions(target, &link))
    }

    async fn send_with_retry(
        &self,
        notification: &Notification,
        target: &Target,
        actions: &[Action],
    ) -> Result<Delivery, DispatcherError> {
        let urgent = notification.is_urgent();
        let attempts = self.settings.max_send_attempts;

        for attempt in 1..=attempts {
            match self
                .channel
                .send_message(target, &notification.text, notification.preview, actions)
                .await
            {
                Ok(handle) => {
                    record_send(true, urgent);
                    self.update(
                        notification.id,
                        NotificationUpdate::Sent {
                            sent_at: Utc::now(),
                            handle,
                        },
                    )
                    .await?;

                    info!(to = %target, message_id = handle.message_id, "Notification sent");
                    tokio::time::sleep(self.settings.send_cooldown).await;
                    return Ok(Delivery::Sent);
                }
                Err(e) => {
                    record_send(false, urgent);
                    warn!(to = %target, attempt, error = %e, "Error while sending notification");
                    self.update(notification.id, NotificationUpdate::AttemptFailed(e.to_string()))
                        .await?;

                    if attempt < attempts {
                        tokio::time::sleep(self.settings.retry_base_delay * attempt).await;
                    }
                }
            }
        }

        record_exhausted();
        error!(to = %target, attempts, "Giving up on notification until requeued");
        Ok(Delivery::Exhausted)
    }

    /// Delete a delivered message from the channel
    pub async fn retract(&self, id: i64) -> Result<(), DispatcherError> {
        let notification = self.find(id).await?;

        if notification.retracted {
            info!(id, "Notification already retracted");
            return Ok(());
        }

        let handle = match (notification.state, notification.handle) {
            (DeliveryState::Sent, Some(handle)) => handle,
            _ => {
                return Err(DispatcherError::InvalidState {
                    id,
                    action: "retracted",
                    reason: "it was never delivered",
                })
            }
        };

        self.channel
            .delete_message(&handle)
            .await
            .map_err(DispatcherError::Channel)?;
        self.update(id, NotificationUpdate::Retracted).await?;

        info!(id, chat_id = handle.chat_id, message_id = handle.message_id, "Notification retracted");
        Ok(())
    }

    /// Clear the stored error so the notification re-enters the queue
    pub async fn requeue(&self, id: i64) -> Result<(), DispatcherError> {
        let notification = self.find(id).await?;

        let reason = match notification.state {
            DeliveryState::Sent => Some("it was already delivered"),
            DeliveryState::Failed => Some("it failed permanently"),
            DeliveryState::Pending => None,
        };
        if let Some(reason) = reason {
            return Err(DispatcherError::InvalidState {
                id,
                action: "requeued",
                reason,
            });
        }

        if notification.error.is_none() {
            info!(id, "Notification already queued");
            return Ok(());
        }

        self.update(id, NotificationUpdate::Requeued).await?;
        info!(id, previous_error = ?notification.error, "Notification requeued");
        Ok(())
    }

    async fn find(&self, id: i64) -> Result<Notification, DispatcherError> {
        self.store
            .find_notification(id)
            .await
            .map_err(DispatcherError::Store)?
            .ok_or(DispatcherError::NotFound(id))
    }

    async fn update(&self, id: i64, update: NotificationUpdate) -> Result<(), DispatcherError> {
        self.store
            .update_notification(id, update)
            .await
            .map_err(DispatcherError::Store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tarwatch_common::channel::MessageHandle;
    use tarwatch_common::domain::{
        DocumentInfo, NewDocument, NewNotification, SubDocument, PRIORITY_NORMAL,
    };
    use tarwatch_common::errors::Result;
    use tarwatch_common::MemoryStore;
    use tokio::time::Instant;

    struct Sent {
        target: Target,
        text: String,
        preview: bool,
        actions: Vec<Action>,
        at: Instant,
    }

    /// Channel that fails the first `failures` sends
    #[derive(Default)]
    struct FakeChannel {
        failures: AtomicUsize,
        attempts: Mutex<Vec<Instant>>,
        sent: Mutex<Vec<Sent>>,
        deleted: Mutex<Vec<MessageHandle>>,
    }

    impl FakeChannel {
        fn failing(failures: usize) -> Self {
            Self {
                failures: AtomicUsize::new(failures),
                ..Default::default()
            }
        }

        fn texts(&self) -> Vec<String> {
            self.sent.lock().unwrap().iter().map(|s| s.text.clone()).collect()
        }
    }

    #[async_trait]
    impl Channel for FakeChannel {
        async fn send_message(
            &self,
            target: &Target,
            text: &str,
            preview: bool,
            actions: &[Action],
        ) -> Result<MessageHandle> {
            self.attempts.lock().unwrap().push(Instant::now());

            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(AppError::Channel {
                    message: "Too Many Requests".into(),
                });
            }

            let mut sent = self.sent.lock().unwrap();
            sent.push(Sent {
                target: target.clone(),
                text: text.to_string(),
                preview,
                actions: actions.to_vec(),
                at: Instant::now(),
            });

            Ok(MessageHandle {
                chat_id: match target {
                    Target::Chat(id) => *id,
                    Target::Alias(_) => -100,
                },
                message_id: sent.len() as i64,
            })
        }

        async fn delete_message(&self, handle: &MessageHandle) -> Result<()> {
            self.deleted.lock().unwrap().push(*handle);
            Ok(())
        }
    }

    fn settings() -> DispatcherSettings {
        DispatcherSettings {
            batch_size: 20,
            max_send_attempts: 3,
            send_cooldown: Duration::from_millis(3000),
            retry_base_delay: Duration::from_millis(5000),
        }
    }

    fn dispatcher(store: &Arc<MemoryStore>, channel: &Arc<FakeChannel>) -> Dispatcher {
        Dispatcher::new(
            store.clone(),
            channel.clone(),
            Keyboard::new("https://t.me/bot?start={}", "Details", "Docs"),
            settings(),
            Pacer::new("dispatcher", 10),
        )
    }

    /// Store holding one document with two attachments
    async fn store_with_document() -> (Arc<MemoryStore>, i64) {
        let store = Arc::new(MemoryStore::new());
        store.add_court("LAZ", "Tar Lazio").await;
        let id = store
            .insert_document(NewDocument {
                external_id: "TAR/1/1/2024".into(),
                public_id: "0123456789abcdef".into(),
                court_id: "LAZ".into(),
                full_text: "testo".into(),
                short_text: "testo".into(),
                published_on: NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
                notify: false,
                info: DocumentInfo {
                    attachments: vec![
                        SubDocument::web("https://portal.example/1"),
                        SubDocument::web("https://portal.example/1.pdf"),
                    ],
                    ..Default::default()
                },
            })
            .await
            .unwrap();
        (store, id)
    }

    #[tokio::test(start_paused = true)]
    async fn test_priority_order() {
        let (store, doc) = store_with_document().await;
        store
            .insert_notifications(vec![
                NewNotification::to_recipient(doc, 10, "A"),
                NewNotification::broadcast(Some(doc), "@tar", "B"),
                NewNotification::to_recipient(doc, 11, "C"),
            ])
            .await
            .unwrap();
        let channel = Arc::new(FakeChannel::default());
        let mut dispatcher = dispatcher(&store, &channel);

        let report = dispatcher.run_once(&Shutdown::never()).await.unwrap();

        assert_eq!(report.sent, 3);
        assert_eq!(channel.texts(), vec!["B", "A", "C"]);
        assert_eq!(dispatcher.pacer().current_secs(), 0);

        let sent = channel.sent.lock().unwrap();
        assert!(sent[0].preview);
        assert!(!sent[1].preview);
        // Cooldown between successful sends
        assert!(sent[1].at - sent[0].at >= Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_actions_and_short_url() {
        let (store, doc) = store_with_document().await;
        store
            .insert_notifications(vec![
                NewNotification::broadcast(Some(doc), "@tar", "alias"),
                NewNotification::to_recipient(doc, 10, "recipient"),
            ])
            .await
            .unwrap();
        let channel = Arc::new(FakeChannel::default());

        dispatcher(&store, &channel)
            .run_once(&Shutdown::never())
            .await
            .unwrap();

        let sent = channel.sent.lock().unwrap();
        assert_eq!(sent[0].target, Target::Alias("@tar".into()));
        assert_eq!(sent[0].actions.len(), 2);
        assert_eq!(
            sent[1].actions,
            vec![Action::Callback {
                label: "Details".into(),
                data: "a.info:0123456789abcdef".into(),
            }]
        );

        let notifications = store.notifications().await;
        assert!(notifications.iter().all(|n| n.short_url.as_deref()
            == Some("https://t.me/bot?start=0123456789abcdef")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_backoff_then_sent() {
        let (store, doc) = store_with_document().await;
        store
            .insert_notifications(vec![NewNotification::to_recipient(doc, 10, "A")])
            .await
            .unwrap();
        let channel = Arc::new(FakeChannel::failing(2));

        let report = dispatcher(&store, &channel)
            .run_once(&Shutdown::never())
            .await
            .unwrap();
        assert_eq!(report.sent, 1);

        let attempts = channel.attempts.lock().unwrap().clone();
        assert_eq!(attempts.len(), 3);
        assert_eq!(attempts[1] - attempts[0], Duration::from_millis(5000));
        assert_eq!(attempts[2] - attempts[1], Duration::from_millis(10000));

        let notification = store.find_notification(1).await.unwrap().unwrap();
        assert_eq!(notification.state, DeliveryState::Sent);
        assert!(notification.error.is_none());
        assert_eq!(
            notification.handle,
            Some(MessageHandle {
                chat_id: 10,
                message_id: 1
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_stays_pending_until_requeued() {
        let (store, doc) = store_with_document().await;
        store
            .insert_notifications(vec![NewNotification::to_recipient(doc, 10, "A")])
            .await
            .unwrap();
        let channel = Arc::new(FakeChannel::failing(3));
        let mut dispatcher = dispatcher(&store, &channel);

        let report = dispatcher.run_once(&Shutdown::never()).await.unwrap();
        assert_eq!(report.exhausted, 1);
        assert_eq!(channel.attempts.lock().unwrap().len(), 3);

        let notification = store.find_notification(1).await.unwrap().unwrap();
        assert_eq!(notification.state, DeliveryState::Pending);
        assert_eq!(notification.error.as_deref(), Some("Channel error: Too Many Requests"));

        // Parked: later batches skip it
        let report = dispatcher.run_once(&Shutdown::never()).await.unwrap();
        assert_eq!(report, BatchReport::default());

        dispatcher.requeue(1).await.unwrap();
        let report = dispatcher.run_once(&Shutdown::never()).await.unwrap();
        assert_eq!(report.sent, 1);
    }

    #[tokio::test]
    async fn test_untargetable_marked_failed() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_notifications(vec![NewNotification {
                document_id: None,
                recipient_id: None,
                alias: None,
                text: "nowhere".into(),
                priority: PRIORITY_NORMAL,
                preview: false,
            }])
            .await
            .unwrap();
        let channel = Arc::new(FakeChannel::default());

        let report = dispatcher(&store, &channel)
            .run_once(&Shutdown::never())
            .await
            .unwrap();

        assert_eq!(report.undeliverable, 1);
        assert!(channel.attempts.lock().unwrap().is_empty());
        let notification = store.find_notification(1).await.unwrap().unwrap();
        assert_eq!(notification.state, DeliveryState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacing() {
        let (store, doc) = store_with_document().await;
        let channel = Arc::new(FakeChannel::default());
        let mut dispatcher = dispatcher(&store, &channel);

        dispatcher.run_once(&Shutdown::never()).await.unwrap();
        assert_eq!(dispatcher.pacer().current_secs(), 10);

        store
            .insert_notifications(vec![NewNotification::to_recipient(doc, 10, "A")])
            .await
            .unwrap();
        dispatcher.run_once(&Shutdown::never()).await.unwrap();
        assert_eq!(dispatcher.pacer().current_secs(), 9);

        store
            .insert_notifications(vec![NewNotification::broadcast(None, "@tar", "urgent")])
            .await
            .unwrap();
        dispatcher.run_once(&Shutdown::never()).await.unwrap();
        assert_eq!(dispatcher.pacer().current_secs(), 0);

        for _ in 0..3 {
            dispatcher.run_once(&Shutdown::never()).await.unwrap();
        }
        assert_eq!(dispatcher.pacer().current_secs(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retract_sent_notification() {
        let (store, doc) = store_with_document().await;
        store
            .insert_notifications(vec![
                NewNotification::to_recipient(doc, 10, "A"),
                NewNotification::to_recipient(doc, 11, "B"),
            ])
            .await
            .unwrap();
        let channel = Arc::new(FakeChannel::default());
        let mut dispatcher = dispatcher(&store, &channel);
        dispatcher.run_once(&Shutdown::never()).await.unwrap();

        tokio_test::assert_ok!(dispatcher.retract(2).await);

        assert_eq!(
            *channel.deleted.lock().unwrap(),
            vec![MessageHandle {
                chat_id: 11,
                message_id: 2
            }]
        );
        assert!(store.find_notification(2).await.unwrap().unwrap().retracted);

        // Second retraction is a no-op
        tokio_test::assert_ok!(dispatcher.retract(2).await);
        assert_eq!(channel.deleted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_retract_and_requeue_rejections() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_notifications(vec![NewNotification::broadcast(None, "@tar", "pending")])
            .await
            .unwrap();
        let channel = Arc::new(FakeChannel::default());
        let dispatcher = dispatcher(&store, &channel);

        assert!(matches!(
            dispatcher.retract(1).await,
            Err(DispatcherError::InvalidState { id: 1, .. })
        ));
        assert!(matches!(
            dispatcher.retract(99).await,
            Err(DispatcherError::NotFound(99))
        ));
        assert!(matches!(
            dispatcher.requeue(99).await,
            Err(DispatcherError::NotFound(99))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_requeue_rejects_sent() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_notifications(vec![NewNotification::broadcast(None, "@tar", "notice")])
            .await
            .unwrap();
        let channel = Arc::new(FakeChannel::default());
        let mut dispatcher = dispatcher(&store, &channel);
        dispatcher.run_once(&Shutdown::never()).await.unwrap();

        assert!(matches!(
            dispatcher.requeue(1).await,
            Err(DispatcherError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn test_requeue_rejects_failed() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_notifications(vec![NewNotification {
                document_id: None,
                recipient_id: None,
                alias: None,
                text: "nowhere".into(),
                priority: PRIORITY_NORMAL,
                preview: false,
            }])
            .await
            .unwrap();
        let channel = Arc::new(FakeChannel::default());
        let mut dispatcher = dispatcher(&store, &channel);
        dispatcher.run_once(&Shutdown::never()).await.unwrap();

        assert!(matches!(
            dispatcher.requeue(1).await,
            Err(DispatcherError::InvalidState { id: 1, .. })
        ));
        let notification = store.find_notification(1).await.unwrap().unwrap();
        assert_eq!(notification.state, DeliveryState::Failed);
        assert!(store.select_pending_notifications(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_requeue_queued_is_noop() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_notifications(vec![NewNotification::broadcast(None, "@tar", "pending")])
            .await
            .unwrap();
        let channel = Arc::new(FakeChannel::default());
        let dispatcher = dispatcher(&store, &channel);

        tokio_test::assert_ok!(dispatcher.requeue(1).await);
        let notification = store.find_notification(1).await.unwrap().unwrap();
        assert_eq!(notification.state, DeliveryState::Pending);
        assert!(notification.error.is_none());
    }
}
