// Command-line runner for stored-graph operations. Graph building (sweeps,
// change events) needs the host application's sources and lives there; this
// binary covers what can be done against the database alone.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use linkpatrol::{
    BatchOptions, BatchRunner, Config, NullRouter, PostgresLinkStore, ReqwestFetcher, UrlChecker,
};

#[derive(Parser)]
#[command(name = "linkpatrol", about = "Link integrity checks over the stored URL graph")]
struct Cli {
    /// Postgres connection string; defaults to DATABASE_URL.
    #[arg(long)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify stored URLs, never-checked and stalest first
    Check {
        /// Maximum number of URLs to examine
        #[arg(long)]
        limit: Option<i64>,
        /// Leave internal links alone
        #[arg(long)]
        skip_internal: bool,
        /// Leave external links alone
        #[arg(long)]
        skip_external: bool,
        /// Minutes an external verdict stays fresh (overrides config)
        #[arg(long)]
        recheck_interval: Option<i64>,
    },
    /// Apply schema migrations
    Migrate,
    /// Clear every operator-set ignore flag
    Unignore,
    /// Show graph counts
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,linkpatrol=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let database_url = match cli.database_url {
        Some(url) => url,
        None => std::env::var("DATABASE_URL")
            .context("DATABASE_URL is not set and --database-url was not given")?,
    };
    let store = Arc::new(PostgresLinkStore::connect(&database_url).await?);

    match cli.command {
        Commands::Migrate => {
            store.migrate().await?;
            println!("migrations applied");
        }
        Commands::Check {
            limit,
            skip_internal,
            skip_external,
            recheck_interval,
        } => {
            let config = Config::from_env();
            let fetcher = Arc::new(ReqwestFetcher::new(&config)?);
            // No host routing here: internal links resolve as missing
            // unless internal checks are skipped.
            let checker = Arc::new(UrlChecker::new(config.clone(), fetcher, Arc::new(NullRouter)));
            let runner = BatchRunner::new(store, checker);

            let mut options = BatchOptions::from_config(&config);
            options.limit = limit;
            options.check_internal = !skip_internal;
            options.check_external = !skip_external;
            if let Some(minutes) = recheck_interval {
                options.external_recheck_interval = minutes;
            }

            let report = runner.check_links(&options).await?;
            println!(
                "checked {} ({} broken), skipped {}",
                report.checked, report.broken, report.skipped
            );
        }
        Commands::Unignore => {
            use linkpatrol::LinkStore;
            let cleared = store.unignore_all().await?;
            println!("cleared {cleared} ignore flags");
        }
        Commands::Status => {
            use linkpatrol::LinkStore;
            let urls = store.count_urls().await?;
            let links = store.count_links().await?;
            let broken = store.count_broken_links().await?;
            println!("{urls} urls, {links} links, {broken} broken");
        }
    }

    Ok(())
}
