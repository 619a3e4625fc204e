//! Bulk crawl coordination.
//!
//! A campaign walks a date range: discovery first, then one per-date crawl
//! after another, with persistent progress the whole way. Controllers set
//! pause/cancel latches on the persisted record; the coordinator re-reads
//! the record at two checkpoints (before each date and between dates) and
//! transitions atomically. A resumed campaign re-discovers its range and
//! subtracts already-handled dates, so no date runs twice.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::crawler::discovery::{DiscoveryResult, SitemapDiscovery};
use crate::crawler::orchestrator::CrawlOrchestrator;
use crate::models::{BulkCrawlProgress, BulkCrawlStatus};
use crate::storage::ProgressStore;

/// Persist cadence while crawling: every this many dates.
const PERSIST_EVERY_DATES: u32 = 10;

/// Per-campaign configuration.
#[derive(Debug, Clone)]
pub struct BulkCrawlConfig {
    pub force_update: bool,
    pub rate_limit_ms: u64,
    pub max_concurrent_downloads: u32,
}

impl Default for BulkCrawlConfig {
    fn default() -> Self {
        Self {
            force_update: false,
            rate_limit_ms: 2000,
            max_concurrent_downloads: 5,
        }
    }
}

/// Coordinator-level limits, lifted from the bulk settings.
#[derive(Debug, Clone)]
pub struct BulkLimits {
    pub max_concurrent_operations: usize,
    pub stuck_operation_timeout_hours: u64,
    /// Time-based persistence floor: a slow campaign still checkpoints
    /// its counters at this interval even before ten dates pass.
    pub progress_update_interval: Duration,
}

impl Default for BulkLimits {
    fn default() -> Self {
        Self {
            max_concurrent_operations: 2,
            stuck_operation_timeout_hours: 6,
            progress_update_interval: Duration::from_millis(30_000),
        }
    }
}

/// Long-running bulk crawl coordinator.
pub struct BulkCrawler {
    discovery: Arc<SitemapDiscovery>,
    orchestrator: Arc<CrawlOrchestrator>,
    progress_store: Arc<ProgressStore>,
    limits: BulkLimits,
    /// Cancellation tokens of campaigns running in this process.
    active: Mutex<HashMap<String, CancellationToken>>,
}

impl BulkCrawler {
    pub fn new(
        discovery: Arc<SitemapDiscovery>,
        orchestrator: Arc<CrawlOrchestrator>,
        progress_store: Arc<ProgressStore>,
        limits: BulkLimits,
    ) -> Arc<Self> {
        Arc::new(Self {
            discovery,
            orchestrator,
            progress_store,
            limits,
            active: Mutex::new(HashMap::new()),
        })
    }

    /// Start a campaign over an explicit date range.
    pub async fn start_range(
        self: &Arc<Self>,
        start: NaiveDate,
        end: NaiveDate,
        config: BulkCrawlConfig,
    ) -> anyhow::Result<String> {
        self.start(Some((start, end)), config).await
    }

    /// Start a campaign over the full available range.
    pub async fn start_full(self: &Arc<Self>, config: BulkCrawlConfig) -> anyhow::Result<String> {
        self.start(None, config).await
    }

    async fn start(
        self: &Arc<Self>,
        range: Option<(NaiveDate, NaiveDate)>,
        config: BulkCrawlConfig,
    ) -> anyhow::Result<String> {
        let operation_id = generate_operation_id();
        tracing::info!(%operation_id, ?range, "starting bulk crawl operation");

        {
            let mut active = self.active.lock().await;
            if active.len() >= self.limits.max_concurrent_operations {
                anyhow::bail!("maximum concurrent bulk operations limit reached");
            }
            active.insert(operation_id.clone(), CancellationToken::new());
        }

        let mut progress = BulkCrawlProgress::new(
            operation_id.clone(),
            range.map(|(s, _)| s),
            range.map(|(_, e)| e),
        );
        progress.force_update = config.force_update;
        progress.rate_limit_ms = config.rate_limit_ms;
        progress.max_concurrent_downloads = config.max_concurrent_downloads;
        progress.current_phase = Some("INITIALIZATION".into());
        self.progress_store.save(&progress)?;

        let this = self.clone();
        tokio::spawn(async move {
            this.execute(progress).await;
        });

        Ok(operation_id)
    }

    /// Run (or continue) a campaign to completion. Public for the resume
    /// path; normal starts go through [`BulkCrawler::start_range`].
    async fn execute(self: Arc<Self>, mut progress: BulkCrawlProgress) {
        let operation_id = progress.operation_id.clone();
        let cancel = {
            let active = self.active.lock().await;
            active
                .get(&operation_id)
                .cloned()
                .unwrap_or_default()
        };

        tracing::info!(%operation_id, "bulk crawl execution started");

        let outcome = self.run_campaign(&mut progress, &cancel).await;
        if let Err(e) = outcome {
            tracing::error!(%operation_id, error = %e, "bulk crawl operation failed");
            progress.status = BulkCrawlStatus::Failed;
            progress.error_message = Some(e.to_string());
            progress.completed_at = Some(Utc::now());
            let _ = self.progress_store.save(&progress);
        }

        self.active.lock().await.remove(&operation_id);
    }

    async fn run_campaign(
        &self,
        progress: &mut BulkCrawlProgress,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        // Phase 1: discovery. A resuming campaign keeps its RESUMING
        // status while it re-discovers the range.
        if progress.status != BulkCrawlStatus::Resuming {
            progress.status = BulkCrawlStatus::Discovering;
        }
        progress.current_phase = Some("DISCOVERY".into());
        if progress.started_at.is_none() {
            progress.started_at = Some(Utc::now());
        }
        self.progress_store.save(progress)?;

        let discovery = self.discover(progress, cancel).await;
        progress.discovery_time_ms = discovery.duration_ms;
        progress.total_dates_discovered = discovery.available_dates.len() as u32;
        if progress.start_date.is_none() {
            progress.start_date = discovery.earliest();
        }
        if progress.end_date.is_none() {
            progress.end_date = discovery.latest();
        }
        tracing::info!(
            operation_id = %progress.operation_id,
            dates = discovery.available_dates.len(),
            "discovery completed"
        );

        if self.observe_cancel(progress)? {
            return Ok(());
        }

        // Phase 2: crawling. A resumed campaign skips everything it has
        // already handled, so pause/resume covers each date exactly once.
        progress.status = BulkCrawlStatus::Crawling;
        progress.current_phase = Some("CRAWLING".into());
        self.progress_store.save(progress)?;

        let remaining: Vec<NaiveDate> = discovery
            .available_dates
            .iter()
            .copied()
            .filter(|d| !progress.processed_dates.contains(d) && !progress.failed_dates.contains(d))
            .collect();

        let crawl_started = std::time::Instant::now();
        let mut dates_since_persist = 0u32;
        let mut last_persist = std::time::Instant::now();

        for date in remaining {
            // Checkpoint before each date: observe latches atomically.
            match self.observe_latches(progress)? {
                Checkpoint::Continue => {}
                Checkpoint::Stopped => return Ok(()),
            }
            if cancel.is_cancelled() {
                self.observe_cancel_forced(progress)?;
                return Ok(());
            }

            progress.current_processing_date = Some(date);

            match self.orchestrator.crawl(date, progress.force_update, cancel).await {
                Ok(outcome) => {
                    progress.add_processed_date(date);
                    progress.documents_succeeded += u64::from(outcome.total_processed());
                    progress.documents_failed += u64::from(outcome.failed_documents);
                    tracing::info!(
                        %date,
                        processed = outcome.total_processed(),
                        "completed crawling for date"
                    );
                }
                Err(e) => {
                    tracing::error!(%date, error = %e, "failed to crawl date");
                    progress.add_failed_date(date);
                }
            }
            progress.dates_processed += 1;
            progress.documents_processed =
                progress.documents_succeeded + progress.documents_failed;

            // Rate and ETA are recomputed after every date; the document
            // estimate extrapolates from the dates handled so far.
            if progress.dates_processed > 0 {
                let per_date =
                    progress.documents_processed as f64 / f64::from(progress.dates_processed);
                progress.estimated_total_documents =
                    (per_date * f64::from(progress.total_dates_discovered)).round() as u64;
            }
            progress.update_processing_rate();
            progress.update_estimated_completion();

            dates_since_persist += 1;
            if dates_since_persist >= PERSIST_EVERY_DATES
                || last_persist.elapsed() >= self.limits.progress_update_interval
            {
                self.progress_store.save(progress)?;
                dates_since_persist = 0;
                last_persist = std::time::Instant::now();
            }

            // Inter-date pacing.
            tokio::time::sleep(Duration::from_millis(progress.rate_limit_ms)).await;
        }

        // Phase 3: completion.
        progress.download_time_ms = crawl_started.elapsed().as_millis() as u64;
        progress.status = BulkCrawlStatus::Completed;
        progress.current_phase = Some("COMPLETED".into());
        progress.current_processing_date = None;
        progress.completed_at = Some(Utc::now());
        self.progress_store.save(progress)?;

        tracing::info!(
            operation_id = %progress.operation_id,
            dates = progress.dates_processed,
            succeeded = progress.documents_succeeded,
            failed = progress.documents_failed,
            "bulk crawl operation completed"
        );
        Ok(())
    }

    async fn discover(
        &self,
        progress: &BulkCrawlProgress,
        cancel: &CancellationToken,
    ) -> DiscoveryResult {
        match (progress.start_date, progress.end_date) {
            (Some(start), Some(end)) => self.discovery.discover_range(start, end, cancel).await,
            _ => self.discovery.discover_full_range(cancel).await,
        }
    }

    /// Re-read the persisted record and act on its latches. Pause is
    /// only honored here, at date boundaries.
    fn observe_latches(&self, progress: &mut BulkCrawlProgress) -> anyhow::Result<Checkpoint> {
        if let Some(current) = self.progress_store.find(&progress.operation_id)? {
            progress.pause_requested = current.pause_requested;
            progress.cancel_requested = current.cancel_requested;
        }

        if progress.cancel_requested {
            progress.status = BulkCrawlStatus::Cancelled;
            progress.completed_at = Some(Utc::now());
            self.progress_store.save(progress)?;
            tracing::info!(operation_id = %progress.operation_id, "bulk crawl operation cancelled");
            return Ok(Checkpoint::Stopped);
        }

        if progress.pause_requested {
            progress.status = BulkCrawlStatus::Paused;
            progress.paused_at = Some(Utc::now());
            self.progress_store.save(progress)?;
            tracing::info!(operation_id = %progress.operation_id, "bulk crawl operation paused");
            return Ok(Checkpoint::Stopped);
        }

        Ok(Checkpoint::Continue)
    }

    fn observe_cancel(&self, progress: &mut BulkCrawlProgress) -> anyhow::Result<bool> {
        if let Some(current) = self.progress_store.find(&progress.operation_id)? {
            progress.cancel_requested = current.cancel_requested;
        }
        if progress.cancel_requested {
            self.observe_cancel_forced(progress)?;
            return Ok(true);
        }
        Ok(false)
    }

    fn observe_cancel_forced(&self, progress: &mut BulkCrawlProgress) -> anyhow::Result<()> {
        progress.status = BulkCrawlStatus::Cancelled;
        progress.completed_at = Some(Utc::now());
        self.progress_store.save(progress)?;
        tracing::info!(operation_id = %progress.operation_id, "bulk crawl operation cancelled");
        Ok(())
    }

    /// Request a pause. The campaign stops at the next date boundary.
    pub async fn pause(&self, operation_id: &str) -> anyhow::Result<bool> {
        let Some(mut progress) = self.progress_store.find(operation_id)? else {
            return Ok(false);
        };
        if !progress.is_running() {
            tracing::warn!(%operation_id, status = progress.status.as_str(), "cannot pause, not running");
            return Ok(false);
        }
        progress.pause_requested = true;
        self.progress_store.save(&progress)?;
        Ok(true)
    }

    /// Resume a paused campaign.
    pub async fn resume(self: &Arc<Self>, operation_id: &str) -> anyhow::Result<bool> {
        let Some(mut progress) = self.progress_store.find(operation_id)? else {
            return Ok(false);
        };
        if !progress.is_paused() {
            tracing::warn!(%operation_id, status = progress.status.as_str(), "cannot resume, not paused");
            return Ok(false);
        }

        progress.status = BulkCrawlStatus::Resuming;
        progress.pause_requested = false;
        progress.paused_at = None;
        self.progress_store.save(&progress)?;
        // The save keeps latches sticky; releasing pause is explicit.
        self.progress_store.clear_pause_latch(operation_id)?;

        self.active
            .lock()
            .await
            .insert(operation_id.to_string(), CancellationToken::new());

        let this = self.clone();
        tokio::spawn(async move {
            this.execute(progress).await;
        });
        Ok(true)
    }

    /// Request cancellation. Terminal campaigns cannot be cancelled.
    pub async fn cancel(&self, operation_id: &str) -> anyhow::Result<bool> {
        let Some(mut progress) = self.progress_store.find(operation_id)? else {
            return Ok(false);
        };
        if progress.is_terminal() {
            tracing::warn!(%operation_id, status = progress.status.as_str(), "cannot cancel, already finished");
            return Ok(false);
        }
        progress.cancel_requested = true;
        self.progress_store.save(&progress)?;

        if let Some(token) = self.active.lock().await.get(operation_id) {
            token.cancel();
        }
        Ok(true)
    }

    pub fn get(&self, operation_id: &str) -> anyhow::Result<Option<BulkCrawlProgress>> {
        Ok(self.progress_store.find(operation_id)?)
    }

    pub fn list_active(&self) -> anyhow::Result<Vec<BulkCrawlProgress>> {
        Ok(self.progress_store.find_active()?)
    }

    /// Delete finished campaigns older than the retention window.
    pub fn cleanup_old(&self, days_to_keep: u32) -> anyhow::Result<usize> {
        let cutoff = Utc::now() - ChronoDuration::days(i64::from(days_to_keep));
        let removed = self.progress_store.delete_completed_before(cutoff)?;
        tracing::info!(removed, "cleaned up old bulk crawl operations");
        Ok(removed)
    }

    /// Force campaigns that have been running past the timeout into the
    /// failed state. Returns how many were reaped.
    pub async fn reap_stuck(&self, timeout_hours: u64) -> anyhow::Result<usize> {
        let threshold = Utc::now() - ChronoDuration::hours(timeout_hours as i64);
        let stuck = self.progress_store.find_stuck(threshold)?;
        let count = stuck.len();

        for mut progress in stuck {
            tracing::warn!(
                operation_id = %progress.operation_id,
                "found stuck operation, marking as failed"
            );
            progress.status = BulkCrawlStatus::Failed;
            progress.error_message = Some("stuck: operation timed out".into());
            progress.completed_at = Some(Utc::now());
            self.progress_store.save(&progress)?;
            self.active.lock().await.remove(&progress.operation_id);
        }
        Ok(count)
    }

    /// Default stuck-campaign timeout from the configured limits.
    pub async fn reap_stuck_default(&self) -> anyhow::Result<usize> {
        self.reap_stuck(self.limits.stuck_operation_timeout_hours).await
    }
}

enum Checkpoint {
    Continue,
    Stopped,
}

fn generate_operation_id() -> String {
    let uuid = Uuid::new_v4().to_string();
    format!("bulk-{}", &uuid[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_ids_are_prefixed_and_short() {
        let id = generate_operation_id();
        assert!(id.starts_with("bulk-"));
        assert_eq!(id.len(), "bulk-".len() + 8);
        assert_ne!(id, generate_operation_id());
    }
}
