//! Command-line interface.
//!
//! The CLI is the exposed control boundary: per-date crawls, retry
//! sweeps, validation of local files, document queries, bulk campaign
//! control, and the scheduler daemon.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::crawler::bulk::{BulkCrawlConfig, BulkCrawler, BulkLimits};
use crate::crawler::discovery::{DiscoveryConfig, SitemapDiscovery};
use crate::crawler::downloader::{DocumentDownloader, DownloaderConfig};
use crate::crawler::orchestrator::CrawlOrchestrator;
use crate::crawler::scheduler::CrawlScheduler;
use crate::crawler::sitemap::SitemapCrawler;
use crate::crawler::{HttpPortalClient, PortalClient};
use crate::models::BulkCrawlProgress;
use crate::storage::{build_store, DocumentStore, ProgressStore};
use crate::validator::pipeline::ValidationConfig;
use crate::validator::ValidationService;

#[derive(Parser)]
#[command(name = "ecli-crawler")]
#[command(about = "Crawler for the German court-decision portal")]
#[command(version)]
pub struct Cli {
    /// Config file path (TOML or JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl all documents published for one date
    Crawl {
        /// Date to crawl (YYYY-MM-DD)
        date: NaiveDate,
        /// Re-download documents that are already stored
        #[arg(short, long)]
        force: bool,
    },

    /// Retry documents that failed more than an hour ago
    Retry,

    /// Show document counts and storage statistics
    Status,

    /// Validate an XML file against the security and LegalDocML checks
    Validate {
        /// Path to the XML file
        file: PathBuf,
        /// Run the fast sanitize/structure/format path only
        #[arg(short, long)]
        quick: bool,
    },

    /// Full-text search over stored documents
    Search {
        query: String,
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// List documents of one court, paged
    Documents {
        /// Court tag (BAG, BGH, BSG, BVerwG, ...)
        #[arg(long)]
        court: String,
        #[arg(long, default_value = "0")]
        page: usize,
        #[arg(long, default_value = "20")]
        page_size: usize,
    },

    /// Bulk crawl campaigns over date ranges
    Bulk {
        #[command(subcommand)]
        command: BulkCommands,
    },

    /// Run the cron scheduler until interrupted
    Daemon,
}

#[derive(Subcommand)]
enum BulkCommands {
    /// Start a campaign; omit the dates to cover the full available range
    Start {
        #[arg(long)]
        start_date: Option<NaiveDate>,
        #[arg(long)]
        end_date: Option<NaiveDate>,
        #[arg(short, long)]
        force: bool,
        /// Inter-date delay for this campaign
        #[arg(long)]
        rate_limit_ms: Option<u64>,
        #[arg(long)]
        max_concurrent_downloads: Option<u32>,
    },

    /// Request a pause at the next date boundary
    Pause { operation_id: String },

    /// Resume a paused campaign and follow it
    Resume { operation_id: String },

    /// Cancel a campaign
    Cancel { operation_id: String },

    /// Show one campaign
    Status { operation_id: String },

    /// List non-terminal campaigns
    List,

    /// Delete finished campaigns older than the retention window
    Cleanup {
        #[arg(long, default_value = "30")]
        days: u32,
    },

    /// Fail campaigns that have been running past the timeout
    Reap {
        #[arg(long)]
        hours: Option<u64>,
    },
}

/// Wired-up services for one CLI invocation.
struct Context {
    settings: Settings,
    store: Arc<dyn DocumentStore>,
    progress_store: Arc<ProgressStore>,
    orchestrator: Arc<CrawlOrchestrator>,
    discovery: Arc<SitemapDiscovery>,
}

impl Context {
    fn build(settings: Settings) -> anyhow::Result<Self> {
        let store = build_store(settings.storage.kind, &settings.storage.base_path)?;
        let progress_store = Arc::new(ProgressStore::new(&settings.database_path())?);

        let client: Arc<dyn PortalClient> = Arc::new(HttpPortalClient::new(&settings.user_agent));

        let validator = ValidationService::new(ValidationConfig {
            schema_enabled: settings.validation.schema_enabled,
            legaldocml_enabled: settings.validation.legaldocml_enabled,
            ecli_enabled: settings.validation.ecli_enabled,
            strict_mode: settings.validation.strict_mode,
            max_size: settings.max_xml_size(),
            max_entity_expansion_ratio: crate::xml::sanitizer::DEFAULT_MAX_ENTITY_EXPANSION_RATIO,
        });

        let downloader = Arc::new(DocumentDownloader::new(
            client.clone(),
            store.clone(),
            validator,
            DownloaderConfig {
                rate_limit_ms: settings.rate_limit_ms,
                strict_validation: settings.validation.strict_mode,
                async_validation: settings.validation.async_validation,
                validation_timeout: Duration::from_secs(settings.validation.timeout_seconds),
            },
        ));

        let sitemaps = SitemapCrawler::new(
            client.clone(),
            settings.base_url.clone(),
            settings.rate_limit_ms,
        );
        let orchestrator = Arc::new(CrawlOrchestrator::new(
            sitemaps,
            downloader,
            store.clone(),
        ));

        let discovery = Arc::new(SitemapDiscovery::new(
            client,
            settings.base_url.clone(),
            DiscoveryConfig {
                rate_limit_ms: settings.bulk.default_rate_limit_ms,
                max_concurrent_checks: settings.bulk.max_concurrent_checks,
                discovery_timeout_hours: settings.bulk.discovery_timeout_hours,
                full_scan_fallback: settings.bulk.full_scan_fallback,
            },
        ));

        Ok(Self {
            settings,
            store,
            progress_store,
            orchestrator,
            discovery,
        })
    }

    fn bulk(&self) -> Arc<BulkCrawler> {
        BulkCrawler::new(
            self.discovery.clone(),
            self.orchestrator.clone(),
            self.progress_store.clone(),
            BulkLimits {
                max_concurrent_operations: self.settings.bulk.max_concurrent_operations,
                stuck_operation_timeout_hours: self.settings.bulk.stuck_operation_timeout_hours,
                progress_update_interval: Duration::from_millis(
                    self.settings.bulk.progress_update_interval_ms,
                ),
            },
        )
    }
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;
    let ctx = Context::build(settings)?;

    match cli.command {
        Commands::Crawl { date, force } => {
            let cancel = CancellationToken::new();
            let outcome = ctx.orchestrator.crawl(date, force, &cancel).await?;
            println!(
                "crawl {date}: {} new, {} updated, {} failed",
                outcome.new_documents, outcome.updated_documents, outcome.failed_documents
            );
        }

        Commands::Retry => {
            let succeeded = ctx.orchestrator.retry_failed().await;
            println!("retry sweep: {succeeded} documents succeeded");
        }

        Commands::Status => {
            println!("documents: {}", ctx.store.count().await?);
            for (status, count) in ctx.store.count_by_status().await? {
                println!("  {status}: {count}");
            }
            println!("by court:");
            for (court, count) in ctx.store.count_by_court().await? {
                println!("  {court}: {count}");
            }
        }

        Commands::Validate { file, quick } => {
            let xml = std::fs::read_to_string(&file)?;
            let validator = ValidationService::new(ValidationConfig {
                strict_mode: ctx.settings.validation.strict_mode,
                max_size: ctx.settings.max_xml_size(),
                ..Default::default()
            });
            if quick {
                let summary = validator.quick_validate(&xml);
                println!(
                    "valid: {}, sanitization: {}, structure: {}, legaldocml: {}, eclis: {}",
                    summary.valid,
                    summary.sanitization_passed,
                    summary.structure_valid,
                    summary.legaldocml_format,
                    summary.ecli_count
                );
                if let Some(error) = summary.error_message {
                    println!("error: {error}");
                }
            } else {
                let report = validator.validate(&xml);
                println!("{}", report.summary());
                for error in &report.errors {
                    println!("  error: {error}");
                }
                for warning in &report.warnings {
                    println!("  warning: {warning}");
                }
            }
        }

        Commands::Search { query, limit } => {
            let hits = ctx.store.search_text(&query, limit).await?;
            for doc in hits {
                println!(
                    "{}  {}  {}",
                    doc.document_id,
                    doc.court,
                    doc.title.as_deref().unwrap_or("-")
                );
            }
        }

        Commands::Documents {
            court,
            page,
            page_size,
        } => {
            let docs = ctx
                .store
                .find_by_court(&court, page_size, page * page_size)
                .await?;
            for doc in docs {
                println!(
                    "{}  {}  {}  {}",
                    doc.document_id,
                    doc.decision_date.format("%Y-%m-%d"),
                    doc.status.as_str(),
                    doc.title.as_deref().unwrap_or("-")
                );
            }
        }

        Commands::Bulk { command } => run_bulk(&ctx, command).await?,

        Commands::Daemon => {
            let scheduler =
                CrawlScheduler::start(ctx.settings.scheduled.clone(), ctx.orchestrator.clone())
                    .await?;
            // Reap campaigns left behind by a previous process.
            let bulk = ctx.bulk();
            let reaped = bulk.reap_stuck_default().await?;
            if reaped > 0 {
                println!("reaped {reaped} stuck campaigns from a previous run");
            }
            println!("scheduler running, press Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;
            scheduler.shutdown().await?;
        }
    }

    Ok(())
}

async fn run_bulk(ctx: &Context, command: BulkCommands) -> anyhow::Result<()> {
    let bulk = ctx.bulk();

    match command {
        BulkCommands::Start {
            start_date,
            end_date,
            force,
            rate_limit_ms,
            max_concurrent_downloads,
        } => {
            let config = BulkCrawlConfig {
                force_update: force,
                rate_limit_ms: rate_limit_ms.unwrap_or(ctx.settings.bulk.default_rate_limit_ms),
                max_concurrent_downloads: max_concurrent_downloads
                    .unwrap_or(ctx.settings.bulk.default_max_concurrent_downloads),
            };
            let operation_id = match (start_date, end_date) {
                (Some(start), Some(end)) => bulk.start_range(start, end, config).await?,
                (None, None) => bulk.start_full(config).await?,
                _ => anyhow::bail!("provide both --start-date and --end-date, or neither"),
            };
            println!("started campaign {operation_id}");
            follow_campaign(&bulk, &operation_id).await?;
        }

        BulkCommands::Pause { operation_id } => {
            let ok = bulk.pause(&operation_id).await?;
            println!(
                "{}",
                if ok { "pause requested" } else { "campaign not running" }
            );
        }

        BulkCommands::Resume { operation_id } => {
            if bulk.resume(&operation_id).await? {
                println!("resumed campaign {operation_id}");
                follow_campaign(&bulk, &operation_id).await?;
            } else {
                println!("campaign not paused");
            }
        }

        BulkCommands::Cancel { operation_id } => {
            let ok = bulk.cancel(&operation_id).await?;
            println!(
                "{}",
                if ok { "cancel requested" } else { "campaign already finished" }
            );
        }

        BulkCommands::Status { operation_id } => match bulk.get(&operation_id)? {
            Some(progress) => print_progress(&progress),
            None => println!("no such campaign"),
        },

        BulkCommands::List => {
            for progress in bulk.list_active()? {
                print_progress(&progress);
            }
        }

        BulkCommands::Cleanup { days } => {
            let removed = bulk.cleanup_old(days)?;
            println!("removed {removed} finished campaigns");
        }

        BulkCommands::Reap { hours } => {
            let reaped = match hours {
                Some(hours) => bulk.reap_stuck(hours).await?,
                None => bulk.reap_stuck_default().await?,
            };
            println!("reaped {reaped} stuck campaigns");
        }
    }

    Ok(())
}

/// Poll a campaign until it reaches a paused or terminal state.
async fn follow_campaign(bulk: &Arc<BulkCrawler>, operation_id: &str) -> anyhow::Result<()> {
    loop {
        tokio::time::sleep(Duration::from_secs(2)).await;
        let Some(progress) = bulk.get(operation_id)? else {
            break;
        };
        print_progress(&progress);
        if progress.is_terminal() || progress.is_paused() {
            break;
        }
    }
    Ok(())
}

fn print_progress(progress: &BulkCrawlProgress) {
    println!(
        "{}  {}  phase={}  dates {}/{}  docs ok={} failed={}  rate={:.1}/min",
        progress.operation_id,
        progress.status.as_str(),
        progress.current_phase.as_deref().unwrap_or("-"),
        progress.dates_processed,
        progress.total_dates_discovered,
        progress.documents_succeeded,
        progress.documents_failed,
        progress.processing_rate_docs_per_minute,
    );
    if let Some(error) = &progress.error_message {
        println!("  error: {error}");
    }
}
