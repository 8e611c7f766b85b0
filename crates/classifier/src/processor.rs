//! Classifier processor
//!
//! Takes unclassified documents in creation order, normalizes their text,
//! scores it against the keyword sets and fans relevant documents out into
//! per-recipient notifications.

use crate::scoring::{evaluate, Evaluation};
use crate::template::Template;
use std::sync::Arc;
use std::time::Duration;
use tarwatch_common::config::AppConfig;
use tarwatch_common::domain::{
    Document, DocumentInfo, DocumentUpdate, NewNotification, ProcessingStamp, SubscriberFilter,
};
use tarwatch_common::errors::AppError;
use tarwatch_common::metrics::record_classification;
use tarwatch_common::store::Store;
use tarwatch_common::text::{capitalize_first, normalize};
use tarwatch_common::{KeywordSets, Pacer, Shutdown};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// Classifier settings resolved from configuration
#[derive(Debug, Clone)]
pub struct ClassifierSettings {
    pub batch_size: u64,
    /// Alias notified when an exact keyword fires
    pub broadcast_alias: Option<String>,
}

impl ClassifierSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            batch_size: config.classifier.batch_size,
            broadcast_alias: config
                .classifier
                .broadcast_alias
                .clone()
                .filter(|alias| !alias.is_empty()),
        }
    }
}

/// Periodic keyword reload from a remote document
#[derive(Debug, Clone)]
pub struct KeywordRefresh {
    pub url: String,
    pub every: Duration,
    pub timeout: Duration,
}

/// Totals of one batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub processed: usize,
    pub relevant: usize,
    pub failed: usize,
    pub notifications: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("Storage failure: {0}")]
    Store(AppError),

    #[error("Keyword sets unavailable: {0}")]
    Keywords(AppError),
}

/// A document that went through normalization and scoring
struct Classified {
    full_text: String,
    short_text: String,
    info: DocumentInfo,
    evaluation: Evaluation,
    notifications: Vec<NewNotification>,
}

/// Classifier worker
pub struct Classifier {
    store: Arc<dyn Store>,
    keywords: Arc<KeywordSets>,
    template: Template,
    settings: ClassifierSettings,
    pacer: Pacer,
}

impl Classifier {
    pub fn new(
        store: Arc<dyn Store>,
        keywords: KeywordSets,
        template: Template,
        settings: ClassifierSettings,
        pacer: Pacer,
    ) -> Self {
        Self {
            store,
            keywords: Arc::new(keywords.normalized()),
            template,
            settings,
            pacer,
        }
    }

    /// Replace the keyword sets used by later batches
    pub fn reload(&mut self, keywords: KeywordSets) {
        self.keywords = Arc::new(keywords.normalized());
        info!(
            whitelist = self.keywords.whitelist.len(),
            blacklist = self.keywords.blacklist.len(),
            tags = self.keywords.tags.len(),
            exact = self.keywords.exact.len(),
            "Keyword sets reloaded"
        );
    }

    pub fn keywords(&self) -> &KeywordSets {
        &self.keywords
    }

    pub fn pacer(&self) -> &Pacer {
        &self.pacer
    }

    /// Poll until shutdown, sleeping the adaptive interval between batches
    pub async fn run(
        &mut self,
        mut shutdown: Shutdown,
        refresh: Option<KeywordRefresh>,
    ) -> Result<(), ClassifierError> {
        let mut last_refresh = Instant::now();

        loop {
            if shutdown.is_triggered() {
                break;
            }

            if let Some(refresh) = &refresh {
                if last_refresh.elapsed() >= refresh.every {
                    match KeywordSets::fetch(&refresh.url, refresh.timeout).await {
                        Ok(keywords) => self.reload(keywords),
                        Err(e) => warn!(error = %e, "Keyword refresh failed, keeping current sets"),
                    }
                    last_refresh = Instant::now();
                }
            }

            let report = self.run_once(&shutdown).await?;
            if report.processed > 0 {
                info!(?report, "Batch classified");
            }

            debug!(secs = self.pacer.current_secs(), "Sleeping");
            if !shutdown.sleep(self.pacer.interval()).await {
                break;
            }
        }

        info!("Classifier stopped");
        Ok(())
    }

    /// Classify one batch of documents
    pub async fn run_once(&mut self, shutdown: &Shutdown) -> Result<BatchReport, ClassifierError> {
        let documents = self
            .store
            .select_unclassified_documents(self.settings.batch_size)
            .await
            .map_err(ClassifierError::Store)?;

        let mut report = BatchReport::default();

        if documents.is_empty() {
            self.pacer.on_empty_batch();
            return Ok(report);
        }

        for document in documents {
            if shutdown.is_triggered() {
                warn!("Batch interrupted by shutdown");
                break;
            }

            let outcome = self.process(document).await?;
            report.processed += 1;
            match outcome {
                Some((relevant, notifications)) => {
                    report.relevant += relevant as usize;
                    report.notifications += notifications;
                }
                None => report.failed += 1,
            }
        }

        self.pacer.on_batch(false);
        Ok(report)
    }

    /// Classify and commit one document.
    ///
    /// Returns `None` when the document failed and its error was recorded.
    #[instrument(skip(self, document), fields(id = document.id, external_id = %document.external_id))]
    async fn process(&self, document: Document) -> Result<Option<(bool, usize)>, ClassifierError> {
        let started = Instant::now();
        let id = document.id;

        let result = self.classify(document).await;

        let elapsed = started.elapsed();
        let stamp = ProcessingStamp {
            processed_at: chrono::Utc::now(),
            duration_ms: elapsed.as_millis() as i64,
        };

        let classified = match result {
            Ok(classified) => classified,
            Err(e) if e.is_store_failure() => return Err(ClassifierError::Store(e)),
            Err(e) => {
                error!(error = %e, code = e.code().as_code(), "Error while classifying document");
                self.store
                    .update_document(
                        id,
                        DocumentUpdate::Failed {
                            error: e.to_string(),
                            stamp,
                        },
                    )
                    .await
                    .map_err(ClassifierError::Store)?;
                record_classification(elapsed.as_secs_f64(), "error", 0);
                return Ok(None);
            }
        };

        let relevant = classified.evaluation.relevance.is_relevant();
        let shortcut = classified.evaluation.shortcut;
        let matches = classified.evaluation.matches.len();
        let tags = classified.evaluation.tags.len();

        let update = DocumentUpdate::Classified {
            full_text: classified.full_text,
            short_text: classified.short_text,
            relevance: classified.evaluation.relevance,
            shortcut,
            info: classified.info,
            stamp,
        };

        let created = self
            .store
            .commit_classification(id, update, classified.notifications)
            .await
            .map_err(ClassifierError::Store)?;

        let outcome = if relevant { "relevant" } else { "not_relevant" };
        record_classification(elapsed.as_secs_f64(), outcome, created);

        info!(
            relevant,
            shortcut,
            matches,
            tags,
            notifications = created,
            "Document classified"
        );

        Ok(Some((relevant, created)))
    }

    async fn classify(&self, mut document: Document) -> Result<Classified, AppError> {
        document.full_text = normalize(&document.full_text);
        document.short_text = capitalize_first(&normalize(&document.short_text));
        for value in document.info.extra.values_mut() {
            *value = normalize(value);
        }
        for attachment in &mut document.info.attachments {
            attachment.title = attachment.title.as_deref().map(normalize);
        }

        let evaluation = evaluate(&document.full_text, &self.keywords);

        let notifications = if evaluation.relevance.is_relevant() || document.notify {
            self.fan_out(&document, &evaluation).await?
        } else {
            Vec::new()
        };

        Ok(Classified {
            full_text: document.full_text,
            short_text: document.short_text,
            info: DocumentInfo {
                matches: evaluation.matches.clone(),
                blacklist: evaluation.blacklist.clone(),
                tags: evaluation.tags.clone(),
                extra: document.info.extra,
                attachments: document.info.attachments,
            },
            evaluation,
            notifications,
        })
    }

    /// Expand a document into notifications.
    ///
    /// Exact hits reach every subscriber plus the broadcast alias; anything
    /// else reaches "all publications" subscribers only.
    async fn fan_out(
        &self,
        document: &Document,
        evaluation: &Evaluation,
    ) -> Result<Vec<NewNotification>, AppError> {
        let text = self.template.render(document, &evaluation.tags)?;
        let mut notifications = Vec::new();

        let filter = if evaluation.shortcut {
            if let Some(alias) = &self.settings.broadcast_alias {
                notifications.push(NewNotification::broadcast(Some(document.id), alias.clone(), text.clone()));
            }
            SubscriberFilter::Everyone
        } else {
            SubscriberFilter::AllModeOnly
        };

        let recipients = self
            .store
            .list_subscriptions_for_court(&document.court_id, filter)
            .await?;

        notifications.extend(
            recipients
                .into_iter()
                .map(|recipient| NewNotification::to_recipient(document.id, recipient, text.clone())),
        );

        Ok(notifications)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::collections::BTreeMap;
    use tarwatch_common::domain::{
        NewDocument, Relevance, SubDocument, SubscriptionMode, PRIORITY_NORMAL, PRIORITY_URGENT,
    };
    use tarwatch_common::MemoryStore;

    const COURT: &str = "LAZ";

    fn keywords() -> KeywordSets {
        KeywordSets {
            whitelist: vec!["appalto pubblico".into()],
            blacklist: vec!["risarcimento danni".into()],
            tags: vec!["urbanistica".into()],
            exact: vec!["d.lgs. 50/2016".into()],
        }
    }

    fn new_document(external_id: &str, full_text: &str, notify: bool) -> NewDocument {
        NewDocument {
            external_id: external_id.to_string(),
            public_id: format!("pub{}", external_id),
            court_id: COURT.to_string(),
            full_text: full_text.to_string(),
            short_text: format!("esito  del <i>ricorso</i> {}", external_id),
            published_on: NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
            notify,
            info: DocumentInfo {
                extra: BTreeMap::from([
                    ("section".to_string(), "  2 ".to_string()),
                    ("kind".to_string(), "sentenza".to_string()),
                ]),
                attachments: vec![SubDocument::web("https://portal.example/1")],
                ..Default::default()
            },
        }
    }

    /// Court with two relevant-only, two all-mode and one banned subscriber
    async fn store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.add_court(COURT, "Tar Lazio").await;
        store.subscribe(1, COURT, SubscriptionMode::RelevantOnly).await;
        store.subscribe(2, COURT, SubscriptionMode::RelevantOnly).await;
        store.subscribe(3, COURT, SubscriptionMode::All).await;
        store.subscribe(4, COURT, SubscriptionMode::All).await;
        store.subscribe(5, COURT, SubscriptionMode::All).await;
        store.add_recipient(5, true).await;
        store
    }

    fn classifier(store: &Arc<MemoryStore>) -> Classifier {
        Classifier::new(
            store.clone(),
            keywords(),
            Template::new("{court} {section} #{kind} {date}\n{text}"),
            ClassifierSettings {
                batch_size: 20,
                broadcast_alias: Some("@tarwatch".to_string()),
            },
            Pacer::new("classifier", 10),
        )
    }

    #[tokio::test]
    async fn test_relevant_document_reaches_all_mode_subscribers() {
        let store = store().await;
        store
            .insert_document(new_document("1", "Gara per un appalto pubblico di servizi", false))
            .await
            .unwrap();

        let report = classifier(&store).run_once(&Shutdown::never()).await.unwrap();

        assert_eq!(report.processed, 1);
        assert_eq!(report.relevant, 1);
        assert_eq!(report.notifications, 2);

        let notifications = store.notifications().await;
        let mut recipients: Vec<i64> = notifications.iter().filter_map(|n| n.recipient_id).collect();
        recipients.sort();
        assert_eq!(recipients, vec![3, 4]);
        assert!(notifications
            .iter()
            .all(|n| n.priority == PRIORITY_NORMAL && !n.preview && n.alias.is_none()));
        assert_eq!(
            notifications[0].text,
            "TAR LAZIO 2 #Sentenza 15/03/2024\nEsito del ricorso 1"
        );
    }

    #[tokio::test]
    async fn test_shortcut_reaches_everyone_and_alias() {
        let store = store().await;
        store
            .insert_document(new_document("1", "Violazione del D.Lgs. 50/2016 e risarcimento danni", false))
            .await
            .unwrap();

        let report = classifier(&store).run_once(&Shutdown::never()).await.unwrap();
        assert_eq!(report.notifications, 5);

        let notifications = store.notifications().await;
        let alias: Vec<_> = notifications.iter().filter(|n| n.alias.is_some()).collect();
        assert_eq!(alias.len(), 1);
        assert_eq!(alias[0].alias.as_deref(), Some("@tarwatch"));
        assert_eq!(alias[0].priority, PRIORITY_URGENT);
        assert!(alias[0].preview);

        let mut recipients: Vec<i64> = notifications.iter().filter_map(|n| n.recipient_id).collect();
        recipients.sort();
        assert_eq!(recipients, vec![1, 2, 3, 4]);

        let document = &store.documents().await[0];
        assert_eq!(document.relevance, Relevance::Relevant);
        assert!(document.shortcut);
    }

    #[tokio::test]
    async fn test_tag_case_survives_into_hashtag() {
        let store = store().await;
        store
            .insert_document(new_document("1", "Permesso per edilizia privata", false))
            .await
            .unwrap();
        let mut classifier = classifier(&store);
        classifier.reload(KeywordSets {
            tags: vec!["Edilizia Privata".into()],
            ..Default::default()
        });

        let report = classifier.run_once(&Shutdown::never()).await.unwrap();
        assert_eq!(report.relevant, 1);

        let document = &store.documents().await[0];
        assert_eq!(document.info.tags.get("Edilizia Privata"), Some(&100));
        let notifications = store.notifications().await;
        assert!(notifications[0].text.ends_with("\n\n#EdiliziaPrivata"));
    }

    #[tokio::test]
    async fn test_blacklisted_document_not_fanned_out() {
        let store = store().await;
        store
            .insert_document(new_document("1", "Appalto pubblico, risarcimento danni", false))
            .await
            .unwrap();

        let report = classifier(&store).run_once(&Shutdown::never()).await.unwrap();

        assert_eq!(report.relevant, 0);
        assert!(store.notifications().await.is_empty());

        let document = &store.documents().await[0];
        assert_eq!(document.relevance, Relevance::NotRelevant);
        assert!(document.info.blacklist.contains_key("risarcimento danni"));
        assert!(document.info.matches.contains_key("appalto pubblico"));
    }

    #[tokio::test]
    async fn test_notify_flag_fans_out_irrelevant_document() {
        let store = store().await;
        store
            .insert_document(new_document("1", "Permesso di costruire", true))
            .await
            .unwrap();

        let report = classifier(&store).run_once(&Shutdown::never()).await.unwrap();

        assert_eq!(report.relevant, 0);
        assert_eq!(report.notifications, 2);
    }

    #[tokio::test]
    async fn test_normalizes_stored_text() {
        let store = store().await;
        store
            .insert_document(new_document("1", "Permesso  di <b>costruire</b>...", false))
            .await
            .unwrap();

        classifier(&store).run_once(&Shutdown::never()).await.unwrap();

        let document = &store.documents().await[0];
        assert_eq!(document.full_text, "Permesso di costruire");
        assert_eq!(document.short_text, "Esito del ricorso 1");
        assert_eq!(document.info.extra["section"], "2");
        assert!(document.processed_at.is_some());
        assert!(document.process_duration_ms.is_some());
    }

    #[tokio::test]
    async fn test_failing_document_does_not_stop_batch() {
        let store = store().await;
        let mut broken = new_document("1", "Appalto pubblico di lavori", false);
        broken.info.extra.remove("section");
        store.insert_document(broken).await.unwrap();
        store
            .insert_document(new_document("2", "Appalto pubblico di servizi", false))
            .await
            .unwrap();

        let mut classifier = classifier(&store);
        let report = classifier.run_once(&Shutdown::never()).await.unwrap();

        assert_eq!(report.processed, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.relevant, 1);

        let documents = store.documents().await;
        assert_eq!(documents[0].relevance, Relevance::Unclassified);
        assert_eq!(documents[0].error.as_deref(), Some("Required field missing: section"));
        assert!(documents[0].processed_at.is_some());
        assert_eq!(documents[1].relevance, Relevance::Relevant);

        // The failed document stays out of later batches
        let report = classifier.run_once(&Shutdown::never()).await.unwrap();
        assert_eq!(report.processed, 0);
    }

    #[tokio::test]
    async fn test_pacing_follows_batches() {
        let store = store().await;
        let mut classifier = classifier(&store);
        assert_eq!(classifier.pacer().current_secs(), 10);

        store
            .insert_document(new_document("1", "Permesso di costruire", false))
            .await
            .unwrap();
        classifier.run_once(&Shutdown::never()).await.unwrap();
        assert_eq!(classifier.pacer().current_secs(), 9);

        classifier.run_once(&Shutdown::never()).await.unwrap();
        assert_eq!(classifier.pacer().current_secs(), 10);
    }

    #[tokio::test]
    async fn test_reload_replaces_keywords() {
        let store = store().await;
        let mut classifier = classifier(&store);

        classifier.reload(KeywordSets {
            whitelist: vec![" Permesso di Costruire ".into()],
            ..Default::default()
        });
        assert_eq!(classifier.keywords().whitelist, vec!["permesso di costruire"]);

        store
            .insert_document(new_document("1", "Permesso di costruire", false))
            .await
            .unwrap();
        let report = classifier.run_once(&Shutdown::never()).await.unwrap();
        assert_eq!(report.relevant, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let store = store().await;
        let (trigger, shutdown) = Shutdown::channel();

        let handle = tokio::spawn(async move {
            let mut classifier = classifier(&store);
            classifier.run(shutdown, None).await
        });

        tokio::time::sleep(Duration::from_secs(30)).await;
        trigger.trigger();

        tokio_test::assert_ok!(handle.await.unwrap());
    }
}
