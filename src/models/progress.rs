//! Bulk crawl campaign state.
//!
//! A campaign record is the single source of truth for a long-running
//! crawl: the coordinator owns it while running, controllers communicate
//! through the persisted `pause_requested`/`cancel_requested` latches, and
//! the whole record survives restart.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a bulk crawl operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BulkCrawlStatus {
    Initializing,
    Discovering,
    Crawling,
    Paused,
    Resuming,
    Completed,
    Failed,
    Cancelled,
}

impl BulkCrawlStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "INITIALIZING",
            Self::Discovering => "DISCOVERING",
            Self::Crawling => "CRAWLING",
            Self::Paused => "PAUSED",
            Self::Resuming => "RESUMING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "INITIALIZING" => Some(Self::Initializing),
            "DISCOVERING" => Some(Self::Discovering),
            "CRAWLING" => Some(Self::Crawling),
            "PAUSED" => Some(Self::Paused),
            "RESUMING" => Some(Self::Resuming),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            "CANCELLED" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// Persistent progress record for one bulk crawl campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkCrawlProgress {
    pub operation_id: String,
    pub status: BulkCrawlStatus,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    pub total_dates_discovered: u32,
    pub dates_processed: u32,
    pub documents_processed: u64,
    pub documents_succeeded: u64,
    pub documents_failed: u64,
    pub estimated_total_documents: u64,
    pub estimated_completion_time_ms: u64,
    pub processing_rate_docs_per_minute: f64,

    pub current_phase: Option<String>,
    pub current_processing_date: Option<NaiveDate>,
    pub error_message: Option<String>,
    pub retry_count: u32,

    /// Write-once latches set by a controller, observed by the coordinator.
    pub pause_requested: bool,
    pub cancel_requested: bool,

    // Configuration snapshot taken when the campaign was started.
    pub force_update: bool,
    pub rate_limit_ms: u64,
    pub max_concurrent_downloads: u32,

    pub discovery_time_ms: u64,
    pub download_time_ms: u64,

    pub processed_dates: Vec<NaiveDate>,
    pub failed_dates: Vec<NaiveDate>,
}

impl BulkCrawlProgress {
    pub fn new(operation_id: String, start_date: Option<NaiveDate>, end_date: Option<NaiveDate>) -> Self {
        Self {
            operation_id,
            status: BulkCrawlStatus::Initializing,
            start_date,
            end_date,
            created_at: Utc::now(),
            started_at: None,
            paused_at: None,
            completed_at: None,
            total_dates_discovered: 0,
            dates_processed: 0,
            documents_processed: 0,
            documents_succeeded: 0,
            documents_failed: 0,
            estimated_total_documents: 0,
            estimated_completion_time_ms: 0,
            processing_rate_docs_per_minute: 0.0,
            current_phase: None,
            current_processing_date: None,
            error_message: None,
            retry_count: 0,
            pause_requested: false,
            cancel_requested: false,
            force_update: false,
            rate_limit_ms: 2000,
            max_concurrent_downloads: 5,
            discovery_time_ms: 0,
            download_time_ms: 0,
            processed_dates: Vec::new(),
            failed_dates: Vec::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(
            self.status,
            BulkCrawlStatus::Discovering | BulkCrawlStatus::Crawling | BulkCrawlStatus::Resuming
        )
    }

    pub fn is_paused(&self) -> bool {
        self.status == BulkCrawlStatus::Paused
    }

    /// Terminal states are sticky; nothing transitions out of them.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            BulkCrawlStatus::Completed | BulkCrawlStatus::Failed | BulkCrawlStatus::Cancelled
        )
    }

    /// Failed campaigns may be retried by a caller while under the limit.
    pub fn is_retry_eligible(&self) -> bool {
        self.status == BulkCrawlStatus::Failed && self.retry_count < 3
    }

    pub fn add_processed_date(&mut self, date: NaiveDate) {
        if !self.processed_dates.contains(&date) {
            self.processed_dates.push(date);
        }
    }

    pub fn add_failed_date(&mut self, date: NaiveDate) {
        if !self.failed_dates.contains(&date) {
            self.failed_dates.push(date);
        }
    }

    pub fn progress_percentage(&self) -> f64 {
        if self.estimated_total_documents == 0 {
            if self.total_dates_discovered == 0 {
                return 0.0;
            }
            return f64::from(self.dates_processed) / f64::from(self.total_dates_discovered) * 100.0;
        }
        self.documents_processed as f64 / self.estimated_total_documents as f64 * 100.0
    }

    /// Wall-clock duration from start to completion (or now while running).
    pub fn duration_ms(&self) -> u64 {
        let Some(started) = self.started_at else {
            return 0;
        };
        let end = self.completed_at.unwrap_or_else(Utc::now);
        (end - started).num_milliseconds().max(0) as u64
    }

    /// Recompute the docs-per-minute rate from the campaign duration.
    pub fn update_processing_rate(&mut self) {
        let duration_ms = self.duration_ms();
        if duration_ms > 0 && self.documents_processed > 0 {
            let minutes = duration_ms as f64 / 60_000.0;
            self.processing_rate_docs_per_minute = self.documents_processed as f64 / minutes;
        }
    }

    /// Project a completion timestamp from the current rate.
    pub fn update_estimated_completion(&mut self) {
        if self.processing_rate_docs_per_minute > 0.0
            && self.estimated_total_documents > self.documents_processed
        {
            let remaining = self.estimated_total_documents - self.documents_processed;
            let remaining_minutes = remaining as f64 / self.processing_rate_docs_per_minute;
            self.estimated_completion_time_ms =
                (Utc::now().timestamp_millis() as u64) + (remaining_minutes * 60_000.0) as u64;
        }
    }
}
