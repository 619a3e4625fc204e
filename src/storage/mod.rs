//! Document storage: one repository contract, two backends.
//!
//! The archive backend keeps metadata in SQLite and document bodies in a
//! court/year/month file tree; the search backend keeps everything in a
//! tantivy index with German text analysis. Dual mode writes the archive
//! first so the filesystem stays the source of truth and the index can
//! always be rebuilt from a rescan.

mod archive;
mod progress;
mod schema;
mod search;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreResult;
use crate::models::{DocumentStatus, LegalDocument};

pub use archive::ArchiveStore;
pub use progress::ProgressStore;
pub use schema::{build_schema, register_tokenizers, DocumentFields, GERMAN_ANALYZER};
pub use search::SearchStore;

/// Which backend(s) a deployment writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Archive,
    Search,
    Dual,
}

impl Default for StorageKind {
    fn default() -> Self {
        Self::Archive
    }
}

/// Repository contract over the document collection.
///
/// Writes are idempotent by `document_id`; after a successful `upsert` a
/// `find_by_document_id` returns the new state. Free-text reads are
/// case-insensitive.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn upsert(&self, doc: &LegalDocument) -> StoreResult<()>;

    async fn find_by_document_id(&self, id: &str) -> StoreResult<Option<LegalDocument>>;

    async fn exists_by_source_url(&self, url: &str) -> StoreResult<bool>;

    /// Paged, newest decisions first.
    async fn find_by_court(
        &self,
        court: &str,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<LegalDocument>>;

    async fn find_by_status(&self, status: DocumentStatus) -> StoreResult<Vec<LegalDocument>>;

    async fn find_by_date_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<LegalDocument>>;

    async fn find_by_ecli(&self, ecli: &str) -> StoreResult<Option<LegalDocument>>;

    async fn find_crawled_after(&self, after: DateTime<Utc>) -> StoreResult<Vec<LegalDocument>>;

    async fn find_recent(&self, since: DateTime<Utc>) -> StoreResult<Vec<LegalDocument>>;

    async fn search_text(&self, term: &str, limit: usize) -> StoreResult<Vec<LegalDocument>>;

    async fn count_by_court(&self) -> StoreResult<Vec<(String, u64)>>;

    async fn count_by_status(&self) -> StoreResult<Vec<(String, u64)>>;

    async fn count(&self) -> StoreResult<u64>;

    /// Failed documents whose last crawl attempt is older than the cutoff.
    async fn find_failed_for_retry(
        &self,
        older_than: DateTime<Utc>,
    ) -> StoreResult<Vec<LegalDocument>>;

    async fn delete(&self, id: &str) -> StoreResult<bool>;

    async fn delete_all(&self) -> StoreResult<()>;

    /// Persist the raw document body. The archive backend writes the
    /// court/year/month file and returns its path; the search backend
    /// carries the text in the index only and returns `None`.
    async fn store_content(&self, doc: &LegalDocument, xml: &str) -> StoreResult<Option<PathBuf>>;
}

/// Archive and search combined; archive writes always come first.
pub struct DualStore {
    archive: ArchiveStore,
    search: SearchStore,
}

impl DualStore {
    pub fn new(archive: ArchiveStore, search: SearchStore) -> Self {
        Self { archive, search }
    }
}

#[async_trait]
impl DocumentStore for DualStore {
    async fn upsert(&self, doc: &LegalDocument) -> StoreResult<()> {
        self.archive.upsert(doc).await?;
        self.search.upsert(doc).await
    }

    async fn find_by_document_id(&self, id: &str) -> StoreResult<Option<LegalDocument>> {
        self.archive.find_by_document_id(id).await
    }

    async fn exists_by_source_url(&self, url: &str) -> StoreResult<bool> {
        self.archive.exists_by_source_url(url).await
    }

    async fn find_by_court(
        &self,
        court: &str,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<LegalDocument>> {
        self.archive.find_by_court(court, limit, offset).await
    }

    async fn find_by_status(&self, status: DocumentStatus) -> StoreResult<Vec<LegalDocument>> {
        self.archive.find_by_status(status).await
    }

    async fn find_by_date_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<LegalDocument>> {
        self.archive.find_by_date_range(from, to).await
    }

    async fn find_by_ecli(&self, ecli: &str) -> StoreResult<Option<LegalDocument>> {
        self.archive.find_by_ecli(ecli).await
    }

    async fn find_crawled_after(&self, after: DateTime<Utc>) -> StoreResult<Vec<LegalDocument>> {
        self.archive.find_crawled_after(after).await
    }

    async fn find_recent(&self, since: DateTime<Utc>) -> StoreResult<Vec<LegalDocument>> {
        self.archive.find_recent(since).await
    }

    async fn search_text(&self, term: &str, limit: usize) -> StoreResult<Vec<LegalDocument>> {
        self.search.search_text(term, limit).await
    }

    async fn count_by_court(&self) -> StoreResult<Vec<(String, u64)>> {
        self.archive.count_by_court().await
    }

    async fn count_by_status(&self) -> StoreResult<Vec<(String, u64)>> {
        self.archive.count_by_status().await
    }

    async fn count(&self) -> StoreResult<u64> {
        self.archive.count().await
    }

    async fn find_failed_for_retry(
        &self,
        older_than: DateTime<Utc>,
    ) -> StoreResult<Vec<LegalDocument>> {
        self.archive.find_failed_for_retry(older_than).await
    }

    async fn delete(&self, id: &str) -> StoreResult<bool> {
        let deleted = self.archive.delete(id).await?;
        self.search.delete(id).await?;
        Ok(deleted)
    }

    async fn delete_all(&self) -> StoreResult<()> {
        self.archive.delete_all().await?;
        self.search.delete_all().await
    }

    async fn store_content(&self, doc: &LegalDocument, xml: &str) -> StoreResult<Option<PathBuf>> {
        self.archive.store_content(doc, xml).await
    }
}

/// Build the configured store.
pub fn build_store(
    kind: StorageKind,
    base_path: &std::path::Path,
) -> StoreResult<Arc<dyn DocumentStore>> {
    let db_path = base_path.join("crawler.db");
    let index_path = base_path.join("index");

    Ok(match kind {
        StorageKind::Archive => Arc::new(ArchiveStore::new(&db_path, base_path)?),
        StorageKind::Search => Arc::new(SearchStore::open(&index_path)?),
        StorageKind::Dual => Arc::new(DualStore::new(
            ArchiveStore::new(&db_path, base_path)?,
            SearchStore::open(&index_path)?,
        )),
    })
}
