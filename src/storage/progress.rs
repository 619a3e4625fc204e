//! Persistence for bulk crawl campaign progress.
//!
//! Campaigns survive restart: the coordinator re-reads its own record at
//! every checkpoint, so pause/cancel latches written here reach a running
//! campaign, and a crashed one can be resumed by an operator call.

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::StoreResult;
use crate::models::{BulkCrawlProgress, BulkCrawlStatus};

/// SQLite-backed repository for campaign progress.
pub struct ProgressStore {
    db_path: PathBuf,
}

impl ProgressStore {
    pub fn new(db_path: &Path) -> StoreResult<Self> {
        let store = Self {
            db_path: db_path.to_path_buf(),
        };
        store.init_schema()?;
        Ok(store)
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
            CREATE TABLE IF NOT EXISTS bulk_crawl_progress (
                operation_id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                start_date TEXT,
                end_date TEXT,
                created_at TEXT NOT NULL,
                started_at TEXT,
                paused_at TEXT,
                completed_at TEXT,
                total_dates_discovered INTEGER NOT NULL DEFAULT 0,
                dates_processed INTEGER NOT NULL DEFAULT 0,
                documents_processed INTEGER NOT NULL DEFAULT 0,
                documents_succeeded INTEGER NOT NULL DEFAULT 0,
                documents_failed INTEGER NOT NULL DEFAULT 0,
                estimated_total_documents INTEGER NOT NULL DEFAULT 0,
                estimated_completion_time_ms INTEGER NOT NULL DEFAULT 0,
                processing_rate_docs_per_minute REAL NOT NULL DEFAULT 0,
                current_phase TEXT,
                current_processing_date TEXT,
                error_message TEXT,
                retry_count INTEGER NOT NULL DEFAULT 0,
                pause_requested INTEGER NOT NULL DEFAULT 0,
                cancel_requested INTEGER NOT NULL DEFAULT 0,
                force_update INTEGER NOT NULL DEFAULT 0,
                rate_limit_ms INTEGER NOT NULL DEFAULT 2000,
                max_concurrent_downloads INTEGER NOT NULL DEFAULT 5,
                discovery_time_ms INTEGER NOT NULL DEFAULT 0,
                download_time_ms INTEGER NOT NULL DEFAULT 0,
                processed_dates TEXT NOT NULL DEFAULT '[]',
                failed_dates TEXT NOT NULL DEFAULT '[]'
            );

            CREATE INDEX IF NOT EXISTS idx_bulk_progress_status
                ON bulk_crawl_progress(status);
        "#,
        )?;
        Ok(())
    }

    /// Insert or update a campaign record.
    pub fn save(&self, progress: &BulkCrawlProgress) -> StoreResult<()> {
        let conn = self.connect()?;
        conn.execute(
            r#"
            INSERT INTO bulk_crawl_progress (
                operation_id, status, start_date, end_date, created_at, started_at,
                paused_at, completed_at, total_dates_discovered, dates_processed,
                documents_processed, documents_succeeded, documents_failed,
                estimated_total_documents, estimated_completion_time_ms,
                processing_rate_docs_per_minute, current_phase, current_processing_date,
                error_message, retry_count, pause_requested, cancel_requested,
                force_update, rate_limit_ms, max_concurrent_downloads,
                discovery_time_ms, download_time_ms, processed_dates, failed_dates
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                    ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29)
            ON CONFLICT(operation_id) DO UPDATE SET
                status = excluded.status,
                start_date = excluded.start_date,
                end_date = excluded.end_date,
                started_at = excluded.started_at,
                paused_at = excluded.paused_at,
                completed_at = excluded.completed_at,
                total_dates_discovered = excluded.total_dates_discovered,
                dates_processed = excluded.dates_processed,
                documents_processed = excluded.documents_processed,
                documents_succeeded = excluded.documents_succeeded,
                documents_failed = excluded.documents_failed,
                estimated_total_documents = excluded.estimated_total_documents,
                estimated_completion_time_ms = excluded.estimated_completion_time_ms,
                processing_rate_docs_per_minute = excluded.processing_rate_docs_per_minute,
                current_phase = excluded.current_phase,
                current_processing_date = excluded.current_processing_date,
                error_message = excluded.error_message,
                retry_count = excluded.retry_count,
                -- Latches are write-once at the row level: a concurrent
                -- coordinator save cannot clear a controller's request.
                pause_requested = MAX(excluded.pause_requested, bulk_crawl_progress.pause_requested),
                cancel_requested = MAX(excluded.cancel_requested, bulk_crawl_progress.cancel_requested),
                force_update = excluded.force_update,
                rate_limit_ms = excluded.rate_limit_ms,
                max_concurrent_downloads = excluded.max_concurrent_downloads,
                discovery_time_ms = excluded.discovery_time_ms,
                download_time_ms = excluded.download_time_ms,
                processed_dates = excluded.processed_dates,
                failed_dates = excluded.failed_dates
            "#,
            params![
                progress.operation_id,
                progress.status.as_str(),
                progress.start_date.map(|d| d.to_string()),
                progress.end_date.map(|d| d.to_string()),
                progress.created_at.to_rfc3339(),
                progress.started_at.map(|d| d.to_rfc3339()),
                progress.paused_at.map(|d| d.to_rfc3339()),
                progress.completed_at.map(|d| d.to_rfc3339()),
                progress.total_dates_discovered,
                progress.dates_processed,
                progress.documents_processed as i64,
                progress.documents_succeeded as i64,
                progress.documents_failed as i64,
                progress.estimated_total_documents as i64,
                progress.estimated_completion_time_ms as i64,
                progress.processing_rate_docs_per_minute,
                progress.current_phase,
                progress.current_processing_date.map(|d| d.to_string()),
                progress.error_message,
                progress.retry_count,
                progress.pause_requested,
                progress.cancel_requested,
                progress.force_update,
                progress.rate_limit_ms as i64,
                progress.max_concurrent_downloads,
                progress.discovery_time_ms as i64,
                progress.download_time_ms as i64,
                serde_json::to_string(&progress.processed_dates)?,
                serde_json::to_string(&progress.failed_dates)?,
            ],
        )?;
        Ok(())
    }

    /// Explicitly release the pause latch (the resume path). This is the
    /// only way a set latch goes back to false.
    pub fn clear_pause_latch(&self, operation_id: &str) -> StoreResult<()> {
        let conn = self.connect()?;
        conn.execute(
            "UPDATE bulk_crawl_progress
             SET pause_requested = 0, paused_at = NULL
             WHERE operation_id = ?",
            params![operation_id],
        )?;
        Ok(())
    }

    pub fn find(&self, operation_id: &str) -> StoreResult<Option<BulkCrawlProgress>> {
        let conn = self.connect()?;
        let progress = conn
            .query_row(
                "SELECT * FROM bulk_crawl_progress WHERE operation_id = ?",
                params![operation_id],
                row_to_progress,
            )
            .optional()?;
        Ok(progress)
    }

    /// Non-terminal campaigns, oldest first.
    pub fn find_active(&self) -> StoreResult<Vec<BulkCrawlProgress>> {
        self.query(
            "SELECT * FROM bulk_crawl_progress
             WHERE status IN ('INITIALIZING', 'DISCOVERING', 'CRAWLING', 'RESUMING', 'PAUSED')
             ORDER BY created_at",
            &[],
        )
    }

    /// Campaigns that look stuck: running, started before the cutoff.
    pub fn find_stuck(&self, started_before: DateTime<Utc>) -> StoreResult<Vec<BulkCrawlProgress>> {
        self.query(
            "SELECT * FROM bulk_crawl_progress
             WHERE status IN ('DISCOVERING', 'CRAWLING')
               AND started_at IS NOT NULL AND started_at < ?",
            &[&started_before.to_rfc3339() as &dyn rusqlite::ToSql],
        )
    }

    /// Campaigns created in the lookback window, newest first.
    pub fn find_recent(&self, created_after: DateTime<Utc>) -> StoreResult<Vec<BulkCrawlProgress>> {
        self.query(
            "SELECT * FROM bulk_crawl_progress WHERE created_at > ? ORDER BY created_at DESC",
            &[&created_after.to_rfc3339() as &dyn rusqlite::ToSql],
        )
    }

    /// Delete finished campaigns that completed before the cutoff.
    /// Returns the number removed.
    pub fn delete_completed_before(&self, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        let conn = self.connect()?;
        let removed = conn.execute(
            "DELETE FROM bulk_crawl_progress
             WHERE status IN ('COMPLETED', 'CANCELLED')
               AND completed_at IS NOT NULL AND completed_at < ?",
            params![cutoff.to_rfc3339()],
        )?;
        Ok(removed)
    }

    fn query(
        &self,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> StoreResult<Vec<BulkCrawlProgress>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, row_to_progress)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn parse_datetime_opt(value: Option<String>) -> Option<DateTime<Utc>> {
    value.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    })
}

fn parse_date_opt(value: Option<String>) -> Option<NaiveDate> {
    value.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok())
}

fn parse_date_list(json: String) -> Vec<NaiveDate> {
    serde_json::from_str(&json).unwrap_or_default()
}

fn row_to_progress(row: &Row) -> rusqlite::Result<BulkCrawlProgress> {
    Ok(BulkCrawlProgress {
        operation_id: row.get("operation_id")?,
        status: BulkCrawlStatus::from_str(&row.get::<_, String>("status")?)
            .unwrap_or(BulkCrawlStatus::Failed),
        start_date: parse_date_opt(row.get("start_date")?),
        end_date: parse_date_opt(row.get("end_date")?),
        created_at: parse_datetime_opt(Some(row.get::<_, String>("created_at")?))
            .unwrap_or_else(Utc::now),
        started_at: parse_datetime_opt(row.get("started_at")?),
        paused_at: parse_datetime_opt(row.get("paused_at")?),
        completed_at: parse_datetime_opt(row.get("completed_at")?),
        total_dates_discovered: row.get("total_dates_discovered")?,
        dates_processed: row.get("dates_processed")?,
        documents_processed: row.get::<_, i64>("documents_processed")? as u64,
        documents_succeeded: row.get::<_, i64>("documents_succeeded")? as u64,
        documents_failed: row.get::<_, i64>("documents_failed")? as u64,
        estimated_total_documents: row.get::<_, i64>("estimated_total_documents")? as u64,
        estimated_completion_time_ms: row.get::<_, i64>("estimated_completion_time_ms")? as u64,
        processing_rate_docs_per_minute: row.get("processing_rate_docs_per_minute")?,
        current_phase: row.get("current_phase")?,
        current_processing_date: parse_date_opt(row.get("current_processing_date")?),
        error_message: row.get("error_message")?,
        retry_count: row.get("retry_count")?,
        pause_requested: row.get("pause_requested")?,
        cancel_requested: row.get("cancel_requested")?,
        force_update: row.get("force_update")?,
        rate_limit_ms: row.get::<_, i64>("rate_limit_ms")? as u64,
        max_concurrent_downloads: row.get("max_concurrent_downloads")?,
        discovery_time_ms: row.get::<_, i64>("discovery_time_ms")? as u64,
        download_time_ms: row.get::<_, i64>("download_time_ms")? as u64,
        processed_dates: parse_date_list(row.get("processed_dates")?),
        failed_dates: parse_date_list(row.get("failed_dates")?),
    })
}
