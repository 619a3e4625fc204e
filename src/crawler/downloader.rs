//! Document download service.
//!
//! Fetches one document body, runs it through the validation pipeline and
//! the extractor, enriches the record, and persists it. A keyed mutex
//! serializes concurrent downloads of the same document id, keeping the
//! upsert idempotent under concurrent triggers. Extraction is best-effort;
//! validation gates the document only in strict mode.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;

use crate::crawler::client::PortalClient;
use crate::error::{FetchError, StoreError};
use crate::extract::ContentExtractor;
use crate::models::{DocumentStatus, LegalDocument};
use crate::storage::DocumentStore;
use crate::validator::{EcliValidator, ValidationReport, ValidationService};

/// Why a download failed.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Strict-mode validation rejection. Not retryable: the content will
    /// not change on a retry.
    #[error("validation rejected document: {0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl DownloadError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Validation(_))
    }
}

/// Outcome of one successful download.
#[derive(Debug)]
pub struct DownloadResult {
    pub document_id: String,
    pub xml_content: String,
    pub file_path: Option<String>,
    pub validation: ValidationReport,
    pub success: bool,
}

/// Downloader configuration.
#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    pub rate_limit_ms: u64,
    /// In strict mode a failed validation fails the document; otherwise
    /// the report is recorded and the document is kept.
    pub strict_validation: bool,
    /// Persist the document as DOWNLOADED first and wire the validation
    /// verdict in post-hoc. Ignored in strict mode, which always gates.
    pub async_validation: bool,
    /// Bound on one validation run.
    pub validation_timeout: Duration,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            rate_limit_ms: 1000,
            strict_validation: false,
            async_validation: true,
            validation_timeout: Duration::from_secs(30),
        }
    }
}

/// Downloads document bodies and persists enriched records.
pub struct DocumentDownloader {
    client: Arc<dyn PortalClient>,
    store: Arc<dyn DocumentStore>,
    validator: ValidationService,
    ecli: EcliValidator,
    extractor: ContentExtractor,
    config: DownloaderConfig,
    /// Per-document-id locks; at most one in-flight build per document.
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl DocumentDownloader {
    pub fn new(
        client: Arc<dyn PortalClient>,
        store: Arc<dyn DocumentStore>,
        validator: ValidationService,
        config: DownloaderConfig,
    ) -> Self {
        Self {
            client,
            store,
            validator,
            ecli: EcliValidator::new(),
            extractor: ContentExtractor::new(),
            config,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, document_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(document_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Download, validate, extract, and persist one document. The passed
    /// record is updated in place; on error the caller marks it failed.
    pub async fn download(&self, doc: &mut LegalDocument) -> Result<DownloadResult, DownloadError> {
        let key_lock = self.lock_for(&doc.document_id).await;
        let _guard = key_lock.lock().await;

        tracing::info!(
            document_id = %doc.document_id,
            url = %doc.source_url,
            "downloading document"
        );

        // Global pacing before every outbound document request.
        tokio::time::sleep(Duration::from_millis(self.config.rate_limit_ms)).await;

        let url = normalize_url(&doc.source_url);
        let response = self.client.get(&url).await.map_err(DownloadError::Fetch)?;
        if !response.is_success() {
            return Err(DownloadError::Fetch(FetchError::Status {
                status: response.status,
                url,
            }));
        }
        let content = response.text().map_err(DownloadError::Fetch)?;

        let async_mode = self.config.async_validation && !self.config.strict_validation;

        // Strict and sync modes gate on the verdict before anything is
        // persisted; async mode persists DOWNLOADED first and wires the
        // verdict in afterwards.
        let mut validation = if async_mode {
            None
        } else {
            let report = self.run_validation(&content).await;
            if self.config.strict_validation && !report.valid {
                let reason = report
                    .errors
                    .iter()
                    .next()
                    .cloned()
                    .unwrap_or_else(|| "validation failed".into());
                doc.status = DocumentStatus::Failed;
                doc.crawled_at = Some(Utc::now());
                self.store.upsert(doc).await?;
                return Err(DownloadError::Validation(reason));
            }
            Some(report)
        };

        self.apply_extraction(doc, &content);

        // The raw body is archived before the record flips status, so any
        // reader that sees DOWNLOADED/PROCESSED also sees the file.
        let file_path = self.store.store_content(doc, &content).await?;
        if let Some(path) = &file_path {
            doc.file_path = Some(path.display().to_string());
        }

        if async_mode {
            doc.status = DocumentStatus::Downloaded;
            doc.crawled_at = Some(Utc::now());
            self.store.upsert(doc).await?;
            validation = Some(self.run_validation(&content).await);
        }
        let validation = validation.expect("validation report present in every mode");

        if doc.ecli_identifier.is_none() {
            doc.ecli_identifier = validation.ecli_identifiers.iter().next().cloned();
        }

        doc.status = if validation.valid {
            DocumentStatus::Processed
        } else {
            DocumentStatus::Downloaded
        };
        doc.crawled_at = Some(Utc::now());
        self.store.upsert(doc).await?;

        tracing::info!(document_id = %doc.document_id, status = doc.status.as_str(), "document stored");

        Ok(DownloadResult {
            document_id: doc.document_id.clone(),
            xml_content: content,
            file_path: doc.file_path.clone(),
            validation,
            success: true,
        })
    }

    /// Run the validation pipeline off the async worker, bounded by the
    /// configured timeout. A timeout yields a failed report, never a
    /// panic or a hung download.
    async fn run_validation(&self, content: &str) -> ValidationReport {
        let validator = self.validator.clone();
        let body = content.to_string();
        let task = tokio::task::spawn_blocking(move || validator.validate(&body));
        match tokio::time::timeout(self.config.validation_timeout, task).await {
            Ok(Ok(report)) => report,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "validation task failed");
                failed_report(format!("validation task failed: {e}"))
            }
            Err(_) => {
                tracing::warn!("validation timed out");
                failed_report("validation timed out".into())
            }
        }
    }

    /// Copy extracted fields onto the record. Failures here never fail
    /// the download.
    fn apply_extraction(&self, doc: &mut LegalDocument, content: &str) {
        let extracted = self.extractor.extract(content);

        if let Some(title) = extracted.title {
            doc.title = Some(title);
        }
        if let Some(subject) = extracted.subject {
            doc.summary.get_or_insert_with(|| subject.clone());
            doc.subject = Some(subject);
        }
        if let Some(case_number) = extracted.case_number {
            doc.case_number = Some(case_number);
        }
        if let Some(document_type) = extracted.document_type {
            doc.document_type = Some(document_type);
        }
        if let Some(norms) = extracted.norms {
            doc.norms = Some(norms);
        }
        if let Some(leitsatz) = extracted.leitsatz {
            doc.leitsatz = Some(leitsatz);
        }
        if let Some(tenor) = extracted.tenor {
            doc.tenor = Some(tenor);
        }
        if let Some(gruende) = extracted.gruende {
            doc.gruende = Some(gruende);
        }
        if let Some(full_text) = extracted.full_text {
            doc.full_text = Some(full_text);
        }
        if let Some(date) = extracted.decision_date {
            doc.decision_date = date;
        }
        if let Some(court) = extracted.court {
            if court != "UNKNOWN" {
                doc.court = court;
            }
        }
        // Persisted identifiers always match the ECLI grammar; anything
        // else from the metadata table stays off the record.
        if let Some(ecli) = extracted.ecli {
            match self.ecli.validate(&ecli) {
                Ok(valid) => doc.ecli_identifier = Some(valid.normalized),
                Err(e) => tracing::debug!(%ecli, error = %e, "extracted ECLI rejected"),
            }
        }
    }
}

/// Strip whitespace and stray line breaks that occasionally leak into
/// sitemap loc values.
fn normalize_url(url: &str) -> String {
    url.chars().filter(|c| !c.is_whitespace()).collect()
}

fn failed_report(message: String) -> ValidationReport {
    let mut report = ValidationReport::default();
    report.errors.insert(message);
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::client::PortalResponse;
    use crate::storage::ArchiveStore;
    use crate::validator::pipeline::ValidationConfig;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    const DOC_BODY: &str = r#"<html><head><title>BAG Urteil</title></head><body>
<table>
  <tr><td class="TD30">Gericht:</td><td class="TD70">BAG 5. Senat</td></tr>
  <tr><td class="TD30">Entscheidungsdatum:</td><td class="TD70">15.03.2024</td></tr>
  <tr><td class="TD30">ECLI:</td><td class="TD70">ECLI:DE:BAG:2024:150324.U.5AZR101.24.0</td></tr>
</table>
<div class="docLayoutText">Die Revision der Beklagten wird zurückgewiesen, weil die Umkleidezeiten vergütungspflichtig sind.</div>
</body></html>"#;

    struct FakePortal {
        body: &'static str,
        status: u16,
        concurrent: AtomicUsize,
        max_concurrent: AtomicUsize,
    }

    impl FakePortal {
        fn new(body: &'static str, status: u16) -> Self {
            Self {
                body,
                status,
                concurrent: AtomicUsize::new(0),
                max_concurrent: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl PortalClient for FakePortal {
        async fn get(&self, _url: &str) -> Result<PortalResponse, FetchError> {
            let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_concurrent.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.concurrent.fetch_sub(1, Ordering::SeqCst);
            Ok(PortalResponse {
                status: self.status,
                body: self.body.as_bytes().to_vec(),
            })
        }

        async fn head(&self, _url: &str) -> Result<u16, FetchError> {
            Ok(self.status)
        }
    }

    fn downloader(
        portal: Arc<FakePortal>,
        store: Arc<dyn DocumentStore>,
        strict: bool,
    ) -> DocumentDownloader {
        DocumentDownloader::new(
            portal,
            store,
            ValidationService::new(ValidationConfig {
                strict_mode: strict,
                ..Default::default()
            }),
            DownloaderConfig {
                rate_limit_ms: 0,
                strict_validation: strict,
                ..Default::default()
            },
        )
    }

    fn pending_doc() -> LegalDocument {
        LegalDocument::new(
            "KARE500041892".into(),
            "BAG".into(),
            "https://example.de/doc?docid=KARE500041892".into(),
        )
    }

    #[tokio::test]
    async fn download_enriches_and_persists() {
        let dir = tempdir().unwrap();
        let store: Arc<dyn DocumentStore> =
            Arc::new(ArchiveStore::new(&dir.path().join("crawler.db"), dir.path()).unwrap());
        let portal = Arc::new(FakePortal::new(DOC_BODY, 200));
        let downloader = downloader(portal, store.clone(), false);

        let mut doc = pending_doc();
        let result = downloader.download(&mut doc).await.unwrap();

        assert!(result.success);
        assert!(doc.status.is_downloaded());
        assert!(doc.crawled_at.is_some());
        assert_eq!(
            doc.ecli_identifier.as_deref(),
            Some("ECLI:DE:BAG:2024:150324.U.5AZR101.24.0")
        );
        // Decision date refined from content, archive path derived from it.
        let path = doc.file_path.clone().unwrap();
        assert!(path.contains("bag"));
        assert!(path.ends_with("KARE500041892.xml"));
        assert!(std::path::Path::new(&path).exists());

        let stored = store
            .find_by_document_id("KARE500041892")
            .await
            .unwrap()
            .unwrap();
        assert!(stored.status.is_downloaded());
        assert!(stored.full_text.is_some());
    }

    #[tokio::test]
    async fn non_200_is_a_retryable_fetch_error() {
        let dir = tempdir().unwrap();
        let store: Arc<dyn DocumentStore> =
            Arc::new(ArchiveStore::new(&dir.path().join("crawler.db"), dir.path()).unwrap());
        let portal = Arc::new(FakePortal::new("", 503));
        let downloader = downloader(portal, store, false);

        let mut doc = pending_doc();
        let err = downloader.download(&mut doc).await.unwrap_err();
        assert!(matches!(err, DownloadError::Fetch(FetchError::Status { status: 503, .. })));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn strict_mode_marks_invalid_documents_failed() {
        let dir = tempdir().unwrap();
        let store: Arc<dyn DocumentStore> =
            Arc::new(ArchiveStore::new(&dir.path().join("crawler.db"), dir.path()).unwrap());
        let portal = Arc::new(FakePortal::new("<!DOCTYPE d><d/>", 200));
        let downloader = downloader(portal, store.clone(), true);

        let mut doc = pending_doc();
        let err = downloader.download(&mut doc).await.unwrap_err();
        assert!(matches!(err, DownloadError::Validation(_)));
        assert!(!err.is_retryable());

        let stored = store
            .find_by_document_id("KARE500041892")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, DocumentStatus::Failed);
    }

    #[tokio::test]
    async fn concurrent_downloads_of_same_document_serialize() {
        let dir = tempdir().unwrap();
        let store: Arc<dyn DocumentStore> =
            Arc::new(ArchiveStore::new(&dir.path().join("crawler.db"), dir.path()).unwrap());
        let portal = Arc::new(FakePortal::new(DOC_BODY, 200));
        let downloader = Arc::new(downloader(portal.clone(), store.clone(), false));

        let a = {
            let downloader = downloader.clone();
            tokio::spawn(async move {
                let mut doc = pending_doc();
                downloader.download(&mut doc).await
            })
        };
        let b = {
            let downloader = downloader.clone();
            tokio::spawn(async move {
                let mut doc = pending_doc();
                downloader.download(&mut doc).await
            })
        };

        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        assert_eq!(portal.max_concurrent.load(Ordering::SeqCst), 1);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[test]
    fn url_normalization_strips_whitespace() {
        assert_eq!(
            normalize_url("https://example.de/doc?doc\nid=KARE1 "),
            "https://example.de/doc?docid=KARE1"
        );
    }
}
