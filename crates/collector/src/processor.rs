//! Collector processor
//!
//! Scans every court listing, deduplicates against the store and persists
//! new documents as unclassified.

use std::collections::BTreeMap;
use std::sync::Arc;
use tarwatch_common::config::AppConfig;
use tarwatch_common::domain::{Court, DocumentInfo, NewDocument, NewNotification, SubDocument};
use tarwatch_common::errors::AppError;
use tarwatch_common::metrics::record_court_scan;
use tarwatch_common::source::{Candidate, Source};
use tarwatch_common::store::Store;
use tarwatch_common::text::{html_escape, normalize_external_id, public_id};
use tarwatch_common::Shutdown;
use tracing::{debug, error, info, instrument, warn};

/// Collector settings resolved from configuration and command line
#[derive(Debug, Clone)]
pub struct CollectorSettings {
    /// Whether new documents should notify subscribers
    pub notifications: bool,
    /// Hard cap on pages scanned per court
    pub max_pages: u32,
    /// Stop a court at the first known document
    pub early_stop: bool,
    pub link_secret: String,
    /// Alias receiving start/end/error notices
    pub support_alias: Option<String>,
}

impl CollectorSettings {
    pub fn from_config(config: &AppConfig, notifications: Option<bool>) -> Self {
        Self {
            notifications: notifications.unwrap_or(config.collector.notifications_enabled),
            max_pages: config.collector.max_pages,
            early_stop: config.collector.early_stop,
            link_secret: config.security.link_secret.clone(),
            support_alias: config.telegram.support_alias.clone(),
        }
    }
}

/// Totals of one scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub courts_scanned: usize,
    pub courts_failed: usize,
    pub documents_created: usize,
    pub duplicates: usize,
    /// Candidates dropped because their detail page was malformed
    pub skipped: usize,
}

#[derive(Debug, Default)]
struct CourtOutcome {
    created: usize,
    duplicates: usize,
    skipped: usize,
}

/// Why a court scan was aborted
#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    #[error("Source failure: {0}")]
    Source(AppError),

    #[error("Storage failure: {0}")]
    Store(AppError),
}

enum Stored {
    Created(i64),
    Duplicate,
}

/// Collector worker
pub struct Collector {
    store: Arc<dyn Store>,
    source: Arc<dyn Source>,
    settings: CollectorSettings,
}

impl Collector {
    pub fn new(store: Arc<dyn Store>, source: Arc<dyn Source>, settings: CollectorSettings) -> Self {
        Self {
            store,
            source,
            settings,
        }
    }

    /// One full scan bracketed by operator notices
    pub async fn run(&self, shutdown: &Shutdown) -> Result<ScanReport, AppError> {
        self.notice("Collector started").await;

        match self.scan(shutdown).await {
            Ok(report) => {
                self.notice(&format!(
                    "Collector finished: {} new, {} known, {}/{} courts failed",
                    report.documents_created,
                    report.duplicates,
                    report.courts_failed,
                    report.courts_scanned
                ))
                .await;
                Ok(report)
            }
            Err(e) => {
                self.notice(&format!("Collector failed: {}", e)).await;
                Err(e)
            }
        }
    }

    /// Scan every court; per-court failures are logged and counted
    pub async fn scan(&self, shutdown: &Shutdown) -> Result<ScanReport, AppError> {
        let courts = self.store.list_courts().await?;
        let mut report = ScanReport::default();

        info!(
            courts = courts.len(),
            notifications = self.settings.notifications,
            "Starting scan"
        );

        for court in &courts {
            if shutdown.is_triggered() {
                warn!("Scan interrupted by shutdown");
                break;
            }

            report.courts_scanned += 1;

            match self.scan_court(court).await {
                Ok(outcome) => {
                    record_court_scan(&court.id, outcome.created, outcome.duplicates, false);
                    report.documents_created += outcome.created;
                    report.duplicates += outcome.duplicates;
                    report.skipped += outcome.skipped;
                }
                Err(e) => {
                    error!(court = %court.id, error = %e, "Error while scanning court");
                    record_court_scan(&court.id, 0, 0, true);
                    report.courts_failed += 1;
                }
            }
        }

        info!(?report, "Scan completed");
        Ok(report)
    }

    #[instrument(skip(self, court), fields(court = %court.id))]
    async fn scan_court(&self, court: &Court) -> Result<CourtOutcome, CollectorError> {
        let mut outcome = CourtOutcome::default();

        let first = self
            .source
            .fetch_listing(court, 0)
            .await
            .map_err(CollectorError::Source)?;
        let last_page = first.last_page.min(self.settings.max_pages.saturating_sub(1));
        let mut first = Some(first);

        for page in 0..=last_page {
            let listing = match first.take() {
                Some(listing) => listing,
                None => self
                    .source
                    .fetch_listing(court, page)
                    .await
                    .map_err(CollectorError::Source)?,
            };

            if listing.candidates.is_empty() {
                warn!(page, "No documents found");
                break;
            }

            for candidate in &listing.candidates {
                let external_id = external_id(candidate);

                let known = self
                    .store
                    .find_document_by_external_id(&court.id, &external_id)
                    .await
                    .map_err(CollectorError::Store)?;

                let stored = match known {
                    Some(_) => Stored::Duplicate,
                    None => match self.store_candidate(court, candidate, external_id.clone()).await? {
                        Some(stored) => stored,
                        None => {
                            outcome.skipped += 1;
                            continue;
                        }
                    },
                };

                match stored {
                    Stored::Created(id) => {
                        info!(id, external_id = %external_id, "New document");
                        outcome.created += 1;
                    }
                    Stored::Duplicate => {
                        debug!(external_id = %external_id, "Duplicate document");
                        outcome.duplicates += 1;
                        if self.settings.early_stop {
                            info!(court = %court.name, "Stopped scanning, duplicates found");
                            return Ok(outcome);
                        }
                    }
                }
            }
        }

        Ok(outcome)
    }

    /// Fetch the detail page and persist the document.
    ///
    /// Returns `None` when the candidate was skipped as malformed.
    async fn store_candidate(
        &self,
        court: &Court,
        candidate: &Candidate,
        external_id: String,
    ) -> Result<Option<Stored>, CollectorError> {
        let detail = match self.source.fetch_detail(candidate).await {
            Ok(detail) => detail,
            Err(e) if e.is_validation() => {
                warn!(external_id = %external_id, error = %e, "Skipping malformed document");
                return Ok(None);
            }
            Err(e) => return Err(CollectorError::Source(e)),
        };

        let Some(published_on) = detail.published_on else {
            warn!(external_id = %external_id, "Skipping document without publication date");
            return Ok(None);
        };

        let document = NewDocument {
            public_id: public_id(&self.settings.link_secret, &court.id, &external_id),
            external_id,
            court_id: court.id.clone(),
            full_text: detail.full_text,
            short_text: detail.short_text,
            published_on,
            notify: self.settings.notifications,
            info: DocumentInfo {
                extra: extra_fields(candidate),
                attachments: vec![SubDocument::web(&candidate.detail_url)],
                ..Default::default()
            },
        };

        match self.store.insert_document(document).await {
            Ok(id) => Ok(Some(Stored::Created(id))),
            // Lost a race with a concurrent scan
            Err(AppError::Duplicate { .. }) => Ok(Some(Stored::Duplicate)),
            Err(e) => Err(CollectorError::Store(e)),
        }
    }

    /// Queue an operator notice; failures only get logged
    async fn notice(&self, text: &str) {
        let Some(alias) = &self.settings.support_alias else {
            return;
        };

        let notice = NewNotification::broadcast(None, alias.clone(), format!("<b>{}</b>", html_escape(text)));
        if let Err(e) = self.store.insert_notifications(vec![notice]).await {
            warn!(error = %e, "Failed to queue operator notice");
        }
    }
}

fn external_id(candidate: &Candidate) -> String {
    normalize_external_id(&format!("TAR/{}/{}", candidate.listing_id, candidate.number))
}

fn extra_fields(candidate: &Candidate) -> BTreeMap<String, String> {
    [
        ("kind", &candidate.kind),
        ("seat", &candidate.seat),
        ("section", &candidate.section),
        ("number", &candidate.number),
        ("listing_id", &candidate.listing_id),
    ]
    .into_iter()
    .filter(|(_, value)| !value.is_empty())
    .map(|(key, value)| (key.to_string(), value.clone()))
    .collect()
}
