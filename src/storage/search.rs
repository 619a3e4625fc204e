//! Search storage backend on tantivy.
//!
//! Upserts are delete-by-term followed by add and commit, so an upsert is
//! visible to queries within the reader's reload window (seconds). Reads
//! that hit multi-valued stored fields degrade to the first value.

use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use tantivy::collector::{Count, TopDocs};
use tantivy::directory::MmapDirectory;
use tantivy::query::{AllQuery, Query, QueryParser, RangeQuery, TermQuery};
use tantivy::schema::{IndexRecordOption, Type, Value};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};

use crate::error::{StoreError, StoreResult};
use crate::models::{DocumentStatus, LegalDocument};
use crate::storage::schema::{build_schema, register_tokenizers, DocumentFields};
use crate::storage::DocumentStore;

const WRITER_HEAP_BYTES: usize = 50_000_000;

/// Upper bound for full scans backing the count/list operations.
const SCAN_LIMIT: usize = 100_000;

/// tantivy-backed document store.
pub struct SearchStore {
    index: Index,
    fields: DocumentFields,
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
}

impl SearchStore {
    /// Open (or create) the index at a directory.
    pub fn open(index_dir: &Path) -> StoreResult<Self> {
        std::fs::create_dir_all(index_dir).map_err(|e| StoreError::Io {
            path: index_dir.to_path_buf(),
            source: e,
        })?;

        let schema = build_schema();
        let directory = MmapDirectory::open(index_dir)
            .map_err(|e| StoreError::Other(format!("failed to open index directory: {e}")))?;
        let index = Index::open_or_create(directory, schema.clone())?;
        register_tokenizers(&index);

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()?;
        let writer = index.writer(WRITER_HEAP_BYTES)?;
        let fields = DocumentFields::from_schema(&schema);

        tracing::info!(path = %index_dir.display(), "search index opened");

        Ok(Self {
            index,
            fields,
            reader,
            writer: Mutex::new(writer),
        })
    }

    fn to_tantivy_doc(&self, document: &LegalDocument) -> TantivyDocument {
        let f = &self.fields;
        let mut doc = doc!(
            f.document_id => document.document_id.as_str(),
            f.court => document.court.as_str(),
            f.source_url => document.source_url.as_str(),
            f.status => document.status.as_str(),
            f.decision_date => to_tantivy_date(document.decision_date),
            f.indexed_at => to_tantivy_date(Utc::now()),
            f.year => document.decision_date.year().max(0) as u64,
            f.month => u64::from(document.decision_date.month()),
        );

        let mut text_all = String::new();
        let mut add_text = |field: tantivy::schema::Field, value: &Option<String>| {
            if let Some(value) = value {
                doc.add_text(field, value);
                text_all.push_str(value);
                text_all.push('\n');
            }
        };
        add_text(f.ecli_identifier, &document.ecli_identifier);
        add_text(f.title, &document.title);
        add_text(f.summary, &document.summary);
        add_text(f.subject, &document.subject);
        add_text(f.norms, &document.norms);
        add_text(f.full_text, &document.full_text);
        add_text(f.case_number, &document.case_number);
        add_text(f.document_type, &document.document_type);
        add_text(f.leitsatz, &document.leitsatz);
        add_text(f.tenor, &document.tenor);
        add_text(f.gruende, &document.gruende);

        if let Some(file_path) = &document.file_path {
            doc.add_text(f.file_path, file_path);
        }
        if let Some(crawled_at) = document.crawled_at {
            doc.add_date(f.crawled_at, to_tantivy_date(crawled_at));
        }
        if !text_all.is_empty() {
            doc.add_text(f.text_all, &text_all);
        }
        doc
    }

    /// Stored fields back to the domain model. Multi-valued fields
    /// degrade to their first value.
    fn from_tantivy_doc(&self, doc: &TantivyDocument) -> LegalDocument {
        let f = &self.fields;
        let text = |field| {
            doc.get_first(field)
                .and_then(|v| v.as_str())
                .map(str::to_string)
        };
        let date = |field| {
            doc.get_first(field)
                .and_then(|v| v.as_datetime())
                .map(from_tantivy_date)
        };

        LegalDocument {
            document_id: text(f.document_id).unwrap_or_default(),
            court: text(f.court).unwrap_or_else(|| "UNKNOWN".into()),
            ecli_identifier: text(f.ecli_identifier),
            source_url: text(f.source_url).unwrap_or_default(),
            title: text(f.title),
            summary: text(f.summary),
            subject: text(f.subject),
            case_number: text(f.case_number),
            document_type: text(f.document_type),
            norms: text(f.norms),
            leitsatz: text(f.leitsatz),
            tenor: text(f.tenor),
            gruende: text(f.gruende),
            full_text: text(f.full_text),
            decision_date: date(f.decision_date).unwrap_or(DateTime::UNIX_EPOCH),
            crawled_at: date(f.crawled_at),
            file_path: text(f.file_path),
            status: text(f.status)
                .and_then(|s| DocumentStatus::from_str(&s))
                .unwrap_or(DocumentStatus::Pending),
        }
    }

    fn run_query(&self, query: &dyn Query, limit: usize) -> StoreResult<Vec<LegalDocument>> {
        let searcher = self.reader.searcher();
        let top = searcher.search(query, &TopDocs::with_limit(limit.max(1)))?;
        let mut documents = Vec::with_capacity(top.len());
        for (_score, address) in top {
            let doc: TantivyDocument = searcher.doc(address)?;
            documents.push(self.from_tantivy_doc(&doc));
        }
        Ok(documents)
    }

    fn term_query(&self, field: tantivy::schema::Field, value: &str) -> TermQuery {
        TermQuery::new(
            Term::from_field_text(field, value),
            IndexRecordOption::Basic,
        )
    }

    fn date_range_query(
        &self,
        field: tantivy::schema::Field,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> RangeQuery {
        let lower = match from {
            Some(d) => Bound::Included(Term::from_field_date(field, to_tantivy_date(d))),
            None => Bound::Unbounded,
        };
        let upper = match to {
            Some(d) => Bound::Included(Term::from_field_date(field, to_tantivy_date(d))),
            None => Bound::Unbounded,
        };
        let field_name = self.index.schema().get_field_name(field).to_string();
        RangeQuery::new_term_bounds(field_name, Type::Date, &lower, &upper)
    }

    fn tally_field(&self, field: tantivy::schema::Field) -> StoreResult<Vec<(String, u64)>> {
        let searcher = self.reader.searcher();
        let top = searcher.search(&AllQuery, &TopDocs::with_limit(SCAN_LIMIT))?;
        let mut counts = std::collections::HashMap::new();
        for (_score, address) in top {
            let doc: TantivyDocument = searcher.doc(address)?;
            if let Some(value) = doc.get_first(field).and_then(|v| v.as_str()) {
                *counts.entry(value.to_string()).or_insert(0u64) += 1;
            }
        }
        let mut counts: Vec<_> = counts.into_iter().collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1));
        Ok(counts)
    }

    fn commit(&self) -> StoreResult<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| StoreError::Other("index writer lock poisoned".into()))?;
        writer.commit()?;
        // Keep read-your-writes for callers that query right away.
        self.reader.reload()?;
        Ok(())
    }
}

fn to_tantivy_date(value: DateTime<Utc>) -> tantivy::DateTime {
    tantivy::DateTime::from_timestamp_secs(value.timestamp())
}

fn from_tantivy_date(value: tantivy::DateTime) -> DateTime<Utc> {
    DateTime::from_timestamp(value.into_timestamp_secs(), 0).unwrap_or(DateTime::UNIX_EPOCH)
}

#[async_trait]
impl DocumentStore for SearchStore {
    async fn upsert(&self, document: &LegalDocument) -> StoreResult<()> {
        {
            let writer = self
                .writer
                .lock()
                .map_err(|_| StoreError::Other("index writer lock poisoned".into()))?;
            writer.delete_term(Term::from_field_text(
                self.fields.document_id,
                &document.document_id,
            ));
            writer.add_document(self.to_tantivy_doc(document))?;
        }
        self.commit()
    }

    async fn find_by_document_id(&self, id: &str) -> StoreResult<Option<LegalDocument>> {
        let query = self.term_query(self.fields.document_id, id);
        Ok(self.run_query(&query, 1)?.into_iter().next())
    }

    async fn exists_by_source_url(&self, url: &str) -> StoreResult<bool> {
        let query = self.term_query(self.fields.source_url, url);
        let searcher = self.reader.searcher();
        Ok(searcher.search(&query, &Count)? > 0)
    }

    async fn find_by_court(
        &self,
        court: &str,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<LegalDocument>> {
        let query = self.term_query(self.fields.court, court);
        let mut documents = self.run_query(&query, offset + limit)?;
        documents.sort_by(|a, b| b.decision_date.cmp(&a.decision_date));
        Ok(documents.into_iter().skip(offset).take(limit).collect())
    }

    async fn find_by_status(&self, status: DocumentStatus) -> StoreResult<Vec<LegalDocument>> {
        let query = self.term_query(self.fields.status, status.as_str());
        self.run_query(&query, SCAN_LIMIT)
    }

    async fn find_by_date_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<LegalDocument>> {
        let query = self.date_range_query(self.fields.decision_date, Some(from), Some(to));
        let mut documents = self.run_query(&query, SCAN_LIMIT)?;
        documents.sort_by(|a, b| b.decision_date.cmp(&a.decision_date));
        Ok(documents)
    }

    async fn find_by_ecli(&self, ecli: &str) -> StoreResult<Option<LegalDocument>> {
        let query = self.term_query(self.fields.ecli_identifier, ecli);
        Ok(self.run_query(&query, 1)?.into_iter().next())
    }

    async fn find_crawled_after(&self, after: DateTime<Utc>) -> StoreResult<Vec<LegalDocument>> {
        let query = self.date_range_query(self.fields.crawled_at, Some(after), None);
        let mut documents = self.run_query(&query, SCAN_LIMIT)?;
        documents.sort_by(|a, b| b.crawled_at.cmp(&a.crawled_at));
        Ok(documents)
    }

    async fn find_recent(&self, since: DateTime<Utc>) -> StoreResult<Vec<LegalDocument>> {
        let query = self.date_range_query(self.fields.decision_date, Some(since), None);
        let mut documents = self.run_query(&query, SCAN_LIMIT)?;
        documents.sort_by(|a, b| b.decision_date.cmp(&a.decision_date));
        Ok(documents)
    }

    async fn search_text(&self, term: &str, limit: usize) -> StoreResult<Vec<LegalDocument>> {
        let f = &self.fields;
        let mut parser = QueryParser::for_index(
            &self.index,
            vec![f.title, f.summary, f.full_text, f.case_number, f.ecli_identifier, f.text_all],
        );
        // Field boosts follow the portal search profile: case numbers and
        // ECLIs are the strongest signals, then titles, then summaries.
        parser.set_field_boost(f.case_number, 4.0);
        parser.set_field_boost(f.ecli_identifier, 4.0);
        parser.set_field_boost(f.title, 3.0);
        parser.set_field_boost(f.summary, 2.0);

        let (query, errors) = parser.parse_query_lenient(term);
        if !errors.is_empty() {
            tracing::debug!(?errors, "lenient query parse");
        }
        self.run_query(&*query, limit)
    }

    async fn count_by_court(&self) -> StoreResult<Vec<(String, u64)>> {
        self.tally_field(self.fields.court)
    }

    async fn count_by_status(&self) -> StoreResult<Vec<(String, u64)>> {
        self.tally_field(self.fields.status)
    }

    async fn count(&self) -> StoreResult<u64> {
        Ok(self.reader.searcher().num_docs())
    }

    async fn find_failed_for_retry(
        &self,
        older_than: DateTime<Utc>,
    ) -> StoreResult<Vec<LegalDocument>> {
        let failed = self.find_by_status(DocumentStatus::Failed).await?;
        Ok(failed
            .into_iter()
            .filter(|doc| doc.crawled_at.map_or(true, |at| at < older_than))
            .collect())
    }

    async fn delete(&self, id: &str) -> StoreResult<bool> {
        let existed = self.find_by_document_id(id).await?.is_some();
        {
            let writer = self
                .writer
                .lock()
                .map_err(|_| StoreError::Other("index writer lock poisoned".into()))?;
            writer.delete_term(Term::from_field_text(self.fields.document_id, id));
        }
        self.commit()?;
        Ok(existed)
    }

    async fn delete_all(&self) -> StoreResult<()> {
        {
            let mut writer = self
                .writer
                .lock()
                .map_err(|_| StoreError::Other("index writer lock poisoned".into()))?;
            writer.delete_all_documents()?;
        }
        self.commit()
    }

    async fn store_content(&self, _doc: &LegalDocument, _xml: &str) -> StoreResult<Option<PathBuf>> {
        // The index carries extracted text only; raw bodies live in the
        // archive backend.
        Ok(None)
    }
}
