//! Crawler for the German court-decision portal.
//!
//! Discovers daily ECLI sitemaps, downloads and validates decision
//! documents, and ingests them into the archive and the search index.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ecli_crawler::cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (before anything else)
    let _ = dotenvy::dotenv();

    let default_filter = if cli::is_verbose() {
        "ecli_crawler=debug"
    } else {
        "ecli_crawler=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    cli::run().await
}
