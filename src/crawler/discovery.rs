//! Discovery of dates that have usable sitemaps.
//!
//! Answers "which dates in a range have sitemaps with real content?"
//! without downloading every daily index up front. Range discovery probes
//! existence with HEAD requests in rate-limited batches; recent discovery
//! samples a handful of dates biased toward the present and verifies
//! content; full-range discovery locates the boundaries first (binary
//! search forward for the earliest day, back-scan for the latest) and
//! then sweeps the range.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Datelike, Duration as ChronoDuration, NaiveDate, Utc};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::crawler::client::PortalClient;
use crate::crawler::sitemap::sitemap_index_url;

/// Earliest date the portal is known to publish sitemaps for.
const EARLIEST_SEARCH_DATE: (i32, u32, u32) = (2020, 1, 1);

/// How far back the latest-date scan looks before giving up.
const LATEST_SCAN_DAYS: i64 = 30;

/// Sample size for recent discovery.
const MAX_SAMPLES: usize = 10;

/// Outcome of a discovery operation. Date lists are sorted ascending.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryResult {
    pub available_dates: Vec<NaiveDate>,
    pub failed_dates: Vec<NaiveDate>,
    pub duration_ms: u64,
    pub total_checked: usize,
}

impl DiscoveryResult {
    fn new(
        mut available_dates: Vec<NaiveDate>,
        failed_dates: Vec<NaiveDate>,
        duration_ms: u64,
        total_checked: usize,
    ) -> Self {
        available_dates.sort();
        Self {
            available_dates,
            failed_dates,
            duration_ms,
            total_checked,
        }
    }

    pub fn earliest(&self) -> Option<NaiveDate> {
        self.available_dates.first().copied()
    }

    pub fn latest(&self) -> Option<NaiveDate> {
        self.available_dates.last().copied()
    }
}

/// Discovery configuration, lifted from the bulk settings.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub rate_limit_ms: u64,
    pub max_concurrent_checks: usize,
    pub discovery_timeout_hours: u64,
    /// Whether recent discovery may fall back to a full range scan when
    /// sampling finds nothing. Expensive against large ranges.
    pub full_scan_fallback: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            rate_limit_ms: 2000,
            max_concurrent_checks: 10,
            discovery_timeout_hours: 2,
            full_scan_fallback: true,
        }
    }
}

pub struct SitemapDiscovery {
    client: Arc<dyn PortalClient>,
    base_url: String,
    config: DiscoveryConfig,
}

impl SitemapDiscovery {
    pub fn new(client: Arc<dyn PortalClient>, base_url: String, config: DiscoveryConfig) -> Self {
        Self {
            client,
            base_url,
            config,
        }
    }

    /// HEAD probe: does a sitemap index exist for the date?
    pub async fn exists(&self, date: NaiveDate) -> bool {
        let url = sitemap_index_url(&self.base_url, date);
        matches!(self.client.head(&url).await, Ok(200))
    }

    /// GET probe: does the daily index exist and reference at least one
    /// leaf sitemap?
    pub async fn exists_with_content(&self, date: NaiveDate) -> bool {
        let url = sitemap_index_url(&self.base_url, date);
        let Ok(response) = self.client.get(&url).await else {
            return false;
        };
        if !response.is_success() {
            return false;
        }
        match response.text() {
            Ok(xml) => xml.contains("<sitemap>") && xml.contains("<loc>"),
            Err(e) => {
                tracing::debug!(%date, error = %e, "content check failed");
                false
            }
        }
    }

    /// Probe every date in `[start, end]`, in batches of
    /// `max_concurrent_checks` parallel workers, each preceded by the
    /// configured rate-limit sleep. The whole operation is bounded by
    /// `discovery_timeout_hours`; on deadline the partial result is
    /// returned.
    pub async fn discover_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        cancel: &CancellationToken,
    ) -> DiscoveryResult {
        tracing::info!(%start, %end, "starting sitemap discovery");
        let started = Instant::now();
        let deadline = started + Duration::from_secs(self.config.discovery_timeout_hours * 3600);

        let dates = date_range(start, end);
        let total = dates.len();
        tracing::info!(count = total, "generated dates to check");

        let available = Arc::new(Mutex::new(Vec::new()));
        let failed = Arc::new(Mutex::new(Vec::new()));

        'batches: for batch in dates.chunks(self.config.max_concurrent_checks.max(1)) {
            if cancel.is_cancelled() || Instant::now() >= deadline {
                tracing::warn!("discovery stopped before completion");
                break 'batches;
            }

            let mut handles = Vec::with_capacity(batch.len());
            for &date in batch {
                let this = self.clone_probe();
                let available = available.clone();
                let failed = failed.clone();
                let rate = Duration::from_millis(self.config.rate_limit_ms);
                handles.push(tokio::spawn(async move {
                    tokio::time::sleep(rate).await;
                    if this.exists(date).await {
                        available.lock().await.push(date);
                        tracing::debug!(%date, "found sitemap");
                    } else {
                        failed.lock().await.push(date);
                    }
                }));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            let join_all = async {
                for handle in handles {
                    let _ = handle.await;
                }
            };
            if tokio::time::timeout(remaining, join_all).await.is_err() {
                tracing::warn!("discovery batch timed out");
                break 'batches;
            }
        }

        let available = available.lock().await.clone();
        let failed = failed.lock().await.clone();

        let result = DiscoveryResult::new(
            available,
            failed,
            started.elapsed().as_millis() as u64,
            total,
        );
        tracing::info!(
            available = result.available_dates.len(),
            failed = result.failed_dates.len(),
            total_checked = result.total_checked,
            duration_ms = result.duration_ms,
            "discovery completed"
        );
        result
    }

    /// Intelligent sampling over the last `days_back` days: check up to
    /// ten recency-biased sample dates for actual content. Falls back to
    /// a full range scan (when enabled) if nothing hits.
    pub async fn discover_recent(
        &self,
        days_back: u32,
        cancel: &CancellationToken,
    ) -> DiscoveryResult {
        tracing::info!(days_back, "starting recent sitemap discovery");
        let started = Instant::now();

        let end = Utc::now().date_naive() - ChronoDuration::days(1);
        let start = end - ChronoDuration::days(i64::from(days_back));

        let samples = sample_dates(start, end, MAX_SAMPLES);
        let total = samples.len();
        let mut with_content = Vec::new();

        for date in samples {
            if cancel.is_cancelled() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(self.config.rate_limit_ms)).await;
            if self.exists_with_content(date).await {
                tracing::debug!(%date, "found content");
                with_content.push(date);
            }
        }

        if with_content.is_empty() {
            if self.config.full_scan_fallback {
                tracing::warn!("no recent dates with content, falling back to full scan");
                return self.discover_range(start, end, cancel).await;
            }
            tracing::warn!("no recent dates with content and fallback disabled");
            return DiscoveryResult::default();
        }

        tracing::info!(found = with_content.len(), "recent discovery found dates with content");
        DiscoveryResult::new(with_content, Vec::new(), started.elapsed().as_millis() as u64, total)
    }

    /// Locate the full available range, then sweep it.
    pub async fn discover_full_range(&self, cancel: &CancellationToken) -> DiscoveryResult {
        tracing::info!("starting full range discovery");

        let Some(earliest) = self.find_earliest_available(cancel).await else {
            tracing::warn!("could not determine earliest available date");
            return DiscoveryResult::default();
        };
        let latest = self.find_latest_available(cancel).await;

        tracing::info!(%earliest, %latest, "discovered date range boundaries");
        self.discover_range(earliest, latest, cancel).await
    }

    /// Binary search forward from the earliest known publication date for
    /// the first date with an existing sitemap.
    async fn find_earliest_available(&self, cancel: &CancellationToken) -> Option<NaiveDate> {
        let (y, m, d) = EARLIEST_SEARCH_DATE;
        let mut lo = NaiveDate::from_ymd_opt(y, m, d)?.num_days_from_ce();
        let mut hi = Utc::now().date_naive().num_days_from_ce();
        let mut found = None;

        while lo <= hi {
            if cancel.is_cancelled() {
                return found;
            }
            let mid = lo + (hi - lo) / 2;
            let date = NaiveDate::from_num_days_from_ce_opt(mid)?;

            tokio::time::sleep(Duration::from_millis(self.config.rate_limit_ms)).await;
            if self.exists(date).await {
                found = Some(date);
                hi = mid - 1;
            } else {
                lo = mid + 1;
            }
        }

        found
    }

    /// Scan back from yesterday for the most recent date with content,
    /// falling back to a week ago.
    async fn find_latest_available(&self, cancel: &CancellationToken) -> NaiveDate {
        let yesterday = Utc::now().date_naive() - ChronoDuration::days(1);

        for offset in 0..LATEST_SCAN_DAYS {
            if cancel.is_cancelled() {
                break;
            }
            let date = yesterday - ChronoDuration::days(offset);
            // The boundary scan runs at half pace; it issues few requests.
            tokio::time::sleep(Duration::from_millis(self.config.rate_limit_ms / 2)).await;
            if self.exists_with_content(date).await {
                tracing::info!(%date, "found latest available date with content");
                return date;
            }
        }

        tracing::warn!("no recent date with content, using fallback");
        Utc::now().date_naive() - ChronoDuration::days(7)
    }

    fn clone_probe(&self) -> Self {
        Self {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            config: self.config.clone(),
        }
    }
}

/// All dates in `[start, end]`, ascending.
pub fn date_range(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let mut dates = Vec::new();
    let mut current = start;
    while current <= end {
        dates.push(current);
        current += ChronoDuration::days(1);
    }
    dates
}

/// Sample dates for content discovery, biased toward recent days: walk
/// back from the end of the range in equal steps, always keeping the
/// start date in the set. Small ranges are returned whole.
pub fn sample_dates(start: NaiveDate, end: NaiveDate, max_samples: usize) -> Vec<NaiveDate> {
    let total_days = (end - start).num_days() + 1;
    if total_days <= 0 {
        return Vec::new();
    }
    if total_days as usize <= max_samples {
        return date_range(start, end);
    }

    let step = (total_days / max_samples as i64).max(1);
    let mut samples = Vec::new();
    let mut current = end;
    while current >= start && samples.len() < max_samples {
        samples.insert(0, current);
        current -= ChronoDuration::days(step);
    }
    if !samples.contains(&start) {
        samples.insert(0, start);
    }
    samples
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::client::{PortalClient, PortalResponse};
    use crate::error::FetchError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    struct CountingPortal {
        head_calls: AtomicUsize,
        available: Vec<NaiveDate>,
        base_url: String,
    }

    impl CountingPortal {
        fn new(available: Vec<NaiveDate>) -> Self {
            Self {
                head_calls: AtomicUsize::new(0),
                available,
                base_url: "https://portal.test".into(),
            }
        }

        fn is_available(&self, url: &str) -> bool {
            self.available
                .iter()
                .any(|d| url == sitemap_index_url(&self.base_url, *d))
        }
    }

    #[async_trait]
    impl PortalClient for CountingPortal {
        async fn get(&self, url: &str) -> Result<PortalResponse, FetchError> {
            let body = if self.is_available(url) {
                "<sitemapindex><sitemap><loc>https://portal.test/leaf.xml</loc></sitemap></sitemapindex>"
            } else {
                "<sitemapindex></sitemapindex>"
            };
            Ok(PortalResponse {
                status: if self.is_available(url) { 200 } else { 404 },
                body: body.as_bytes().to_vec(),
            })
        }

        async fn head(&self, url: &str) -> Result<u16, FetchError> {
            self.head_calls.fetch_add(1, Ordering::SeqCst);
            Ok(if self.is_available(url) { 200 } else { 404 })
        }
    }

    fn discovery(portal: Arc<CountingPortal>) -> SitemapDiscovery {
        SitemapDiscovery::new(
            portal,
            "https://portal.test".into(),
            DiscoveryConfig {
                rate_limit_ms: 0,
                max_concurrent_checks: 3,
                discovery_timeout_hours: 1,
                full_scan_fallback: true,
            },
        )
    }

    #[test]
    fn date_range_is_inclusive() {
        let dates = date_range(date("2025-01-01"), date("2025-01-07"));
        assert_eq!(dates.len(), 7);
        assert_eq!(dates[0], date("2025-01-01"));
        assert_eq!(dates[6], date("2025-01-07"));
    }

    #[test]
    fn small_ranges_are_sampled_whole() {
        let samples = sample_dates(date("2025-01-01"), date("2025-01-05"), 10);
        assert_eq!(samples.len(), 5);
    }

    #[test]
    fn large_ranges_sample_with_recency_bias_and_keep_start() {
        let samples = sample_dates(date("2024-01-01"), date("2024-12-31"), 10);
        assert!(samples.len() <= 11);
        assert!(samples.contains(&date("2024-01-01")));
        assert!(samples.contains(&date("2024-12-31")));
        assert!(samples.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn range_discovery_probes_each_date_exactly_once() {
        let portal = Arc::new(CountingPortal::new(vec![
            date("2025-01-02"),
            date("2025-01-04"),
        ]));
        let disco = discovery(portal.clone());
        let cancel = CancellationToken::new();

        let result = disco
            .discover_range(date("2025-01-01"), date("2025-01-07"), &cancel)
            .await;

        assert_eq!(portal.head_calls.load(Ordering::SeqCst), 7);
        assert_eq!(result.total_checked, 7);
        assert_eq!(
            result.available_dates,
            vec![date("2025-01-02"), date("2025-01-04")]
        );
        assert_eq!(result.failed_dates.len(), 5);
    }

    #[tokio::test]
    async fn cancelled_discovery_returns_partial_result() {
        let portal = Arc::new(CountingPortal::new(vec![]));
        let disco = discovery(portal);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = disco
            .discover_range(date("2025-01-01"), date("2025-01-31"), &cancel)
            .await;
        assert!(result.available_dates.is_empty());
        assert!(result.failed_dates.is_empty());
    }

    #[tokio::test]
    async fn content_probe_requires_sitemap_entries() {
        let portal = Arc::new(CountingPortal::new(vec![date("2025-01-02")]));
        let disco = discovery(portal);
        assert!(disco.exists_with_content(date("2025-01-02")).await);
        assert!(!disco.exists_with_content(date("2025-01-03")).await);
    }
}
