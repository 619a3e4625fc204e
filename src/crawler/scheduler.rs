//! Scheduled crawling: daily and weekly sweeps, a retry job, and an
//! hourly health tick, all behind one enable toggle.
//!
//! Jobs are single-instance: a trigger that fires while the previous run
//! of the same job is still going is skipped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;

use crate::config::ScheduleSettings;
use crate::crawler::orchestrator::CrawlOrchestrator;

/// Pause between dates in the daily sweep.
const DAILY_INTER_DATE_SLEEP: Duration = Duration::from_secs(5);

/// Pause between dates in the weekly forced sweep.
const WEEKLY_INTER_DATE_SLEEP: Duration = Duration::from_secs(10);

/// Days covered by the weekly forced sweep.
const WEEKLY_DAYS_BACK: u32 = 30;

pub struct CrawlScheduler {
    scheduler: JobScheduler,
}

impl CrawlScheduler {
    /// Build and start the cron jobs. With scheduling disabled, an empty
    /// scheduler is returned and nothing ever fires.
    pub async fn start(
        settings: ScheduleSettings,
        orchestrator: Arc<CrawlOrchestrator>,
    ) -> anyhow::Result<Self> {
        let scheduler = JobScheduler::new().await?;

        if !settings.enabled {
            tracing::info!("scheduled crawling is disabled");
            return Ok(Self { scheduler });
        }

        let daily_running = Arc::new(AtomicBool::new(false));
        let weekly_running = Arc::new(AtomicBool::new(false));
        let retry_running = Arc::new(AtomicBool::new(false));

        // Daily sweep over the recent window, non-forcing.
        {
            let orchestrator = orchestrator.clone();
            let running = daily_running.clone();
            let days_back = settings.days_back;
            scheduler
                .add(Job::new_async(settings.daily_cron.as_str(), move |_id, _l| {
                    let orchestrator = orchestrator.clone();
                    let running = running.clone();
                    Box::pin(async move {
                        if running.swap(true, Ordering::SeqCst) {
                            tracing::warn!("daily crawl still running, skipping trigger");
                            return;
                        }
                        tracing::info!("starting scheduled daily crawl");
                        sweep(&orchestrator, days_back, false, DAILY_INTER_DATE_SLEEP).await;
                        tracing::info!("scheduled daily crawl completed");
                        running.store(false, Ordering::SeqCst);
                    })
                })?)
                .await?;
        }

        // Weekly deep sweep with forced updates.
        {
            let orchestrator = orchestrator.clone();
            let running = weekly_running.clone();
            scheduler
                .add(Job::new_async(settings.weekly_cron.as_str(), move |_id, _l| {
                    let orchestrator = orchestrator.clone();
                    let running = running.clone();
                    Box::pin(async move {
                        if running.swap(true, Ordering::SeqCst) {
                            tracing::warn!("weekly crawl still running, skipping trigger");
                            return;
                        }
                        tracing::info!("starting scheduled weekly crawl");
                        sweep(&orchestrator, WEEKLY_DAYS_BACK, true, WEEKLY_INTER_DATE_SLEEP).await;
                        tracing::info!("scheduled weekly crawl completed");
                        running.store(false, Ordering::SeqCst);
                    })
                })?)
                .await?;
        }

        // Retry sweep for failed documents.
        {
            let orchestrator = orchestrator.clone();
            let running = retry_running.clone();
            scheduler
                .add(Job::new_async(settings.retry_cron.as_str(), move |_id, _l| {
                    let orchestrator = orchestrator.clone();
                    let running = running.clone();
                    Box::pin(async move {
                        if running.swap(true, Ordering::SeqCst) {
                            tracing::warn!("retry sweep still running, skipping trigger");
                            return;
                        }
                        tracing::info!("starting scheduled retry of failed documents");
                        let succeeded = orchestrator.retry_failed().await;
                        tracing::info!(succeeded, "scheduled retry completed");
                        running.store(false, Ordering::SeqCst);
                    })
                })?)
                .await?;
        }

        // Hourly health tick: one log line, no state changes.
        scheduler
            .add(Job::new_async("0 0 * * * *", move |_id, _l| {
                Box::pin(async move {
                    tracing::info!(memory = %memory_usage_line(), "system health");
                })
            })?)
            .await?;

        scheduler.start().await?;
        tracing::info!("crawl scheduler started");
        Ok(Self { scheduler })
    }

    pub async fn shutdown(mut self) -> anyhow::Result<()> {
        self.scheduler.shutdown().await?;
        Ok(())
    }
}

/// Crawl the last `days_back` dates ending yesterday, in order, pausing
/// between dates.
async fn sweep(
    orchestrator: &CrawlOrchestrator,
    days_back: u32,
    force_update: bool,
    inter_date_sleep: Duration,
) {
    let cancel = CancellationToken::new();
    let end = Utc::now().date_naive() - ChronoDuration::days(1);
    let start = end - ChronoDuration::days(i64::from(days_back.saturating_sub(1)));

    let mut date = start;
    while date <= end {
        tracing::info!(%date, force_update, "scheduled crawl for date");
        if let Err(e) = orchestrator.crawl(date, force_update, &cancel).await {
            tracing::error!(%date, error = %e, "scheduled crawl failed for date");
        }
        tokio::time::sleep(inter_date_sleep).await;
        date += ChronoDuration::days(1);
    }
}

/// Resident set size of this process, human-readable. Best effort; on
/// platforms without procfs the line degrades gracefully.
fn memory_usage_line() -> String {
    if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
        for line in status.lines() {
            if let Some(rest) = line.strip_prefix("VmRSS:") {
                return rest.trim().to_string();
            }
        }
    }
    "unavailable".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_line_never_panics() {
        let line = memory_usage_line();
        assert!(!line.is_empty());
    }
}
