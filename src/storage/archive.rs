//! Archive storage backend: SQLite metadata plus an on-disk XML tree.
//!
//! Bodies live at `<base>/<court-lower>/<YYYY>/<MM>/<documentId>.xml`,
//! directories created on demand, files written with truncate semantics.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{StoreError, StoreResult};
use crate::models::{DocumentStatus, LegalDocument};
use crate::storage::DocumentStore;

/// SQLite-backed archive store.
pub struct ArchiveStore {
    db_path: PathBuf,
    base_path: PathBuf,
}

impl ArchiveStore {
    pub fn new(db_path: &Path, base_path: &Path) -> StoreResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let store = Self {
            db_path: db_path.to_path_buf(),
            base_path: base_path.to_path_buf(),
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn connect(&self) -> StoreResult<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Ok(conn)
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.connect()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS legal_documents (
                document_id TEXT PRIMARY KEY,
                court TEXT NOT NULL,
                ecli_identifier TEXT,
                source_url TEXT NOT NULL,
                title TEXT,
                summary TEXT,
                subject TEXT,
                case_number TEXT,
                document_type TEXT,
                norms TEXT,
                leitsatz TEXT,
                tenor TEXT,
                gruende TEXT,
                full_text TEXT,
                decision_date TEXT NOT NULL,
                crawled_at TEXT,
                file_path TEXT,
                status TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_documents_court
                ON legal_documents(court, decision_date);
            CREATE INDEX IF NOT EXISTS idx_documents_status
                ON legal_documents(status);
            CREATE INDEX IF NOT EXISTS idx_documents_ecli
                ON legal_documents(ecli_identifier);
            CREATE INDEX IF NOT EXISTS idx_documents_source_url
                ON legal_documents(source_url);
            CREATE INDEX IF NOT EXISTS idx_documents_crawled_at
                ON legal_documents(crawled_at);
        "#,
        )?;
        Ok(())
    }

    /// Archive file location for a document: court/year/month/id.xml.
    pub fn document_path(&self, doc: &LegalDocument) -> PathBuf {
        let court = doc.court.to_lowercase();
        let year = doc.decision_date.format("%Y").to_string();
        let month = doc.decision_date.format("%m").to_string();
        self.base_path
            .join(court)
            .join(year)
            .join(month)
            .join(format!("{}.xml", doc.document_id))
    }

    /// Count of archived files and their total size.
    pub fn storage_stats(&self) -> (u64, u64) {
        fn walk(dir: &Path, files: &mut u64, bytes: &mut u64) {
            let Ok(entries) = std::fs::read_dir(dir) else {
                return;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    walk(&path, files, bytes);
                } else if path.extension().is_some_and(|ext| ext == "xml") {
                    *files += 1;
                    *bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
                }
            }
        }
        let mut files = 0;
        let mut bytes = 0;
        walk(&self.base_path, &mut files, &mut bytes);
        (files, bytes)
    }

    fn query_documents(
        &self,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> StoreResult<Vec<LegalDocument>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(sql)?;
        let docs = stmt
            .query_map(params, row_to_document)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(docs)
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

fn row_to_document(row: &Row) -> rusqlite::Result<LegalDocument> {
    Ok(LegalDocument {
        document_id: row.get("document_id")?,
        court: row.get("court")?,
        ecli_identifier: row.get("ecli_identifier")?,
        source_url: row.get("source_url")?,
        title: row.get("title")?,
        summary: row.get("summary")?,
        subject: row.get("subject")?,
        case_number: row.get("case_number")?,
        document_type: row.get("document_type")?,
        norms: row.get("norms")?,
        leitsatz: row.get("leitsatz")?,
        tenor: row.get("tenor")?,
        gruende: row.get("gruende")?,
        full_text: row.get("full_text")?,
        decision_date: parse_datetime(&row.get::<_, String>("decision_date")?),
        crawled_at: row
            .get::<_, Option<String>>("crawled_at")?
            .map(|s| parse_datetime(&s)),
        file_path: row.get("file_path")?,
        status: DocumentStatus::from_str(&row.get::<_, String>("status")?)
            .unwrap_or(DocumentStatus::Pending),
    })
}

/// Retry a write once when SQLite reports the database busy.
fn with_retry<T>(mut op: impl FnMut() -> StoreResult<T>) -> StoreResult<T> {
    match op() {
        Err(StoreError::Sqlite(rusqlite::Error::SqliteFailure(e, _)))
            if e.code == rusqlite::ErrorCode::DatabaseBusy =>
        {
            std::thread::sleep(std::time::Duration::from_millis(50));
            op()
        }
        other => other,
    }
}

#[async_trait]
impl DocumentStore for ArchiveStore {
    async fn upsert(&self, doc: &LegalDocument) -> StoreResult<()> {
        with_retry(|| {
            let conn = self.connect()?;
            conn.execute(
                r#"
                INSERT INTO legal_documents (
                    document_id, court, ecli_identifier, source_url, title, summary,
                    subject, case_number, document_type, norms, leitsatz, tenor,
                    gruende, full_text, decision_date, crawled_at, file_path, status
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
                ON CONFLICT(document_id) DO UPDATE SET
                    court = excluded.court,
                    ecli_identifier = excluded.ecli_identifier,
                    source_url = excluded.source_url,
                    title = excluded.title,
                    summary = excluded.summary,
                    subject = excluded.subject,
                    case_number = excluded.case_number,
                    document_type = excluded.document_type,
                    norms = excluded.norms,
                    leitsatz = excluded.leitsatz,
                    tenor = excluded.tenor,
                    gruende = excluded.gruende,
                    full_text = excluded.full_text,
                    decision_date = excluded.decision_date,
                    crawled_at = excluded.crawled_at,
                    file_path = excluded.file_path,
                    status = excluded.status
                "#,
                params![
                    doc.document_id,
                    doc.court,
                    doc.ecli_identifier,
                    doc.source_url,
                    doc.title,
                    doc.summary,
                    doc.subject,
                    doc.case_number,
                    doc.document_type,
                    doc.norms,
                    doc.leitsatz,
                    doc.tenor,
                    doc.gruende,
                    doc.full_text,
                    doc.decision_date.to_rfc3339(),
                    doc.crawled_at.map(|d| d.to_rfc3339()),
                    doc.file_path,
                    doc.status.as_str(),
                ],
            )?;
            Ok(())
        })
    }

    async fn find_by_document_id(&self, id: &str) -> StoreResult<Option<LegalDocument>> {
        let conn = self.connect()?;
        let doc = conn
            .query_row(
                "SELECT * FROM legal_documents WHERE document_id = ?",
                params![id],
                row_to_document,
            )
            .optional()?;
        Ok(doc)
    }

    async fn exists_by_source_url(&self, url: &str) -> StoreResult<bool> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM legal_documents WHERE source_url = ?",
            params![url],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    async fn find_by_court(
        &self,
        court: &str,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<LegalDocument>> {
        self.query_documents(
            "SELECT * FROM legal_documents WHERE court = ? COLLATE NOCASE
             ORDER BY decision_date DESC LIMIT ? OFFSET ?",
            &[&court as &dyn rusqlite::ToSql, &(limit as i64), &(offset as i64)],
        )
    }

    async fn find_by_status(&self, status: DocumentStatus) -> StoreResult<Vec<LegalDocument>> {
        self.query_documents(
            "SELECT * FROM legal_documents WHERE status = ?",
            &[&status.as_str() as &dyn rusqlite::ToSql],
        )
    }

    async fn find_by_date_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<LegalDocument>> {
        self.query_documents(
            "SELECT * FROM legal_documents WHERE decision_date BETWEEN ? AND ?
             ORDER BY decision_date DESC",
            &[&from.to_rfc3339() as &dyn rusqlite::ToSql, &to.to_rfc3339()],
        )
    }

    async fn find_by_ecli(&self, ecli: &str) -> StoreResult<Option<LegalDocument>> {
        let conn = self.connect()?;
        let doc = conn
            .query_row(
                "SELECT * FROM legal_documents WHERE ecli_identifier = ? COLLATE NOCASE",
                params![ecli],
                row_to_document,
            )
            .optional()?;
        Ok(doc)
    }

    async fn find_crawled_after(&self, after: DateTime<Utc>) -> StoreResult<Vec<LegalDocument>> {
        self.query_documents(
            "SELECT * FROM legal_documents WHERE crawled_at > ? ORDER BY crawled_at DESC",
            &[&after.to_rfc3339() as &dyn rusqlite::ToSql],
        )
    }

    async fn find_recent(&self, since: DateTime<Utc>) -> StoreResult<Vec<LegalDocument>> {
        self.query_documents(
            "SELECT * FROM legal_documents WHERE decision_date > ?
             ORDER BY decision_date DESC",
            &[&since.to_rfc3339() as &dyn rusqlite::ToSql],
        )
    }

    async fn search_text(&self, term: &str, limit: usize) -> StoreResult<Vec<LegalDocument>> {
        let pattern = format!("%{term}%");
        self.query_documents(
            "SELECT * FROM legal_documents
             WHERE title LIKE ?1 COLLATE NOCASE
                OR summary LIKE ?1 COLLATE NOCASE
                OR full_text LIKE ?1 COLLATE NOCASE
             ORDER BY decision_date DESC LIMIT ?2",
            &[&pattern as &dyn rusqlite::ToSql, &(limit as i64)],
        )
    }

    async fn count_by_court(&self) -> StoreResult<Vec<(String, u64)>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT court, COUNT(*) FROM legal_documents GROUP BY court ORDER BY COUNT(*) DESC",
        )?;
        let counts = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(counts)
    }

    async fn count_by_status(&self) -> StoreResult<Vec<(String, u64)>> {
        let conn = self.connect()?;
        let mut stmt =
            conn.prepare("SELECT status, COUNT(*) FROM legal_documents GROUP BY status")?;
        let counts = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(counts)
    }

    async fn count(&self) -> StoreResult<u64> {
        let conn = self.connect()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM legal_documents", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    async fn find_failed_for_retry(
        &self,
        older_than: DateTime<Utc>,
    ) -> StoreResult<Vec<LegalDocument>> {
        self.query_documents(
            "SELECT * FROM legal_documents
             WHERE status = 'FAILED' AND (crawled_at IS NULL OR crawled_at < ?)",
            &[&older_than.to_rfc3339() as &dyn rusqlite::ToSql],
        )
    }

    async fn delete(&self, id: &str) -> StoreResult<bool> {
        let conn = self.connect()?;
        let rows = conn.execute(
            "DELETE FROM legal_documents WHERE document_id = ?",
            params![id],
        )?;
        Ok(rows > 0)
    }

    async fn delete_all(&self) -> StoreResult<()> {
        let conn = self.connect()?;
        conn.execute("DELETE FROM legal_documents", [])?;
        Ok(())
    }

    async fn store_content(&self, doc: &LegalDocument, xml: &str) -> StoreResult<Option<PathBuf>> {
        let path = self.document_path(doc);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        std::fs::write(&path, xml).map_err(|e| StoreError::Io {
            path: path.clone(),
            source: e,
        })?;
        tracing::debug!(document_id = %doc.document_id, path = %path.display(), "stored document");
        Ok(Some(path))
    }
}
