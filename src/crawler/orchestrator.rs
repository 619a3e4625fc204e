//! Per-date crawl orchestration.
//!
//! One date fans out to its sitemap index, then each leaf sitemap, then
//! each document entry. Entries whose documents are already downloaded are
//! skipped unless the crawl forces an update. Results are tallied per
//! date; per-document failures never abort the date.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use tokio_util::sync::CancellationToken;

use crate::crawler::downloader::DocumentDownloader;
use crate::crawler::sitemap::{SitemapCrawler, SitemapEntry};
use crate::error::FetchError;
use crate::models::{court_from_prefix, DocumentStatus, LegalDocument};
use crate::storage::DocumentStore;

/// Tally for one crawled date.
#[derive(Debug, Clone, Default)]
pub struct CrawlOutcome {
    pub date: Option<NaiveDate>,
    pub new_documents: u32,
    pub updated_documents: u32,
    pub failed_documents: u32,
}

impl CrawlOutcome {
    pub fn total_processed(&self) -> u32 {
        self.new_documents + self.updated_documents
    }
}

/// Coordinates sitemap fetching and document downloads for single dates.
pub struct CrawlOrchestrator {
    sitemaps: SitemapCrawler,
    downloader: Arc<DocumentDownloader>,
    store: Arc<dyn DocumentStore>,
}

impl CrawlOrchestrator {
    pub fn new(
        sitemaps: SitemapCrawler,
        downloader: Arc<DocumentDownloader>,
        store: Arc<dyn DocumentStore>,
    ) -> Self {
        Self {
            sitemaps,
            downloader,
            store,
        }
    }

    /// Crawl every document listed for one date.
    pub async fn crawl(
        &self,
        date: NaiveDate,
        force_update: bool,
        cancel: &CancellationToken,
    ) -> Result<CrawlOutcome, FetchError> {
        tracing::info!(%date, force_update, "starting crawl");

        let mut outcome = CrawlOutcome {
            date: Some(date),
            ..Default::default()
        };

        let sitemap_urls = self.sitemaps.fetch_index(date).await?;
        tracing::info!(%date, sitemaps = sitemap_urls.len(), "found sitemaps");

        for sitemap_url in sitemap_urls {
            if cancel.is_cancelled() {
                break;
            }

            let entries = match self.sitemaps.fetch_leaf(&sitemap_url).await {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::error!(url = %sitemap_url, error = %e, "failed to process sitemap");
                    continue;
                }
            };
            tracing::info!(url = %sitemap_url, documents = entries.len(), "processing sitemap");

            for entry in entries {
                if cancel.is_cancelled() {
                    break;
                }
                if let Err(e) = self.process_entry(&entry, force_update, &mut outcome).await {
                    tracing::error!(url = %entry.url, error = %e, "failed to process entry");
                    outcome.failed_documents += 1;
                }
            }
        }

        tracing::info!(
            %date,
            new = outcome.new_documents,
            updated = outcome.updated_documents,
            failed = outcome.failed_documents,
            "crawl completed"
        );
        Ok(outcome)
    }

    async fn process_entry(
        &self,
        entry: &SitemapEntry,
        force_update: bool,
        outcome: &mut CrawlOutcome,
    ) -> anyhow::Result<()> {
        let Some(document_id) = entry.document_id.clone() else {
            tracing::warn!(url = %entry.url, "could not extract document id from URL");
            outcome.failed_documents += 1;
            return Ok(());
        };

        let existing = self.store.find_by_document_id(&document_id).await?;

        if let Some(existing) = &existing {
            if existing.status.is_downloaded() && !force_update {
                tracing::debug!(%document_id, "document already downloaded, skipping");
                return Ok(());
            }
        }

        let was_new = existing.is_none();
        let mut doc = match existing {
            Some(doc) => doc,
            None => {
                let doc = LegalDocument::new(
                    document_id.clone(),
                    court_from_prefix(&document_id).to_string(),
                    entry.url.clone(),
                );
                self.store.upsert(&doc).await?;
                tracing::debug!(%document_id, court = %doc.court, "created new document");
                doc
            }
        };

        match self.downloader.download(&mut doc).await {
            Ok(_) => {
                if was_new {
                    outcome.new_documents += 1;
                } else {
                    outcome.updated_documents += 1;
                }
            }
            Err(e) => {
                tracing::error!(%document_id, error = %e, "download failed");
                doc.status = DocumentStatus::Failed;
                doc.crawled_at = Some(Utc::now());
                self.store.upsert(&doc).await?;
                outcome.failed_documents += 1;
            }
        }

        Ok(())
    }

    /// Retry documents that failed more than an hour ago: reset them to
    /// pending and re-run the download. Returns the success count.
    pub async fn retry_failed(&self) -> u32 {
        let cutoff = Utc::now() - ChronoDuration::hours(1);
        self.retry_failed_since(cutoff).await
    }

    pub async fn retry_failed_since(&self, older_than: DateTime<Utc>) -> u32 {
        let failed = match self.store.find_failed_for_retry(older_than).await {
            Ok(docs) => docs,
            Err(e) => {
                tracing::error!(error = %e, "failed to load retry candidates");
                return 0;
            }
        };

        tracing::info!(count = failed.len(), "retrying failed documents");
        let mut succeeded = 0;

        for mut doc in failed {
            doc.status = DocumentStatus::Pending;
            if let Err(e) = self.store.upsert(&doc).await {
                tracing::error!(document_id = %doc.document_id, error = %e, "retry reset failed");
                continue;
            }
            match self.downloader.download(&mut doc).await {
                Ok(_) => succeeded += 1,
                Err(e) => {
                    tracing::error!(document_id = %doc.document_id, error = %e, "retry failed");
                    doc.status = DocumentStatus::Failed;
                    doc.crawled_at = Some(Utc::now());
                    let _ = self.store.upsert(&doc).await;
                }
            }
        }

        tracing::info!(succeeded, "retry sweep completed");
        succeeded
    }
}
