use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use jobscout_core::AtsPlatform;
use jobscout_extract::engine::ExtractionEngine;
use jobscout_extract::AnthropicModel;
use jobscout_pipeline::{
    aggregate, lifecycle, maybe_build_scheduler, notify, open_workspace, scoring, scrape,
    Pipeline, PipelineConfig, Workspace,
};
use jobscout_storage::http::HttpFetcher;
use jobscout_storage::NewCompany;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "jobscout")]
#[command(about = "Job posting aggregation and scoring pipeline", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the full pipeline once. With the scheduler enabled, keep
    /// running on the configured cron cadence until interrupted.
    Run,
    /// Scrape active company boards.
    Scrape,
    /// Extract structured fields from pending postings.
    Extract,
    /// Score extracted postings against the saved profile.
    Score {
        /// Wipe stored scores first and score everything again.
        #[arg(long)]
        rescore: bool,
    },
    /// Close stale postings and purge those past retention.
    Lifecycle,
    /// Build this week's trend snapshots.
    Aggregate {
        /// Recompute even when snapshots for this week already exist.
        #[arg(long)]
        force: bool,
    },
    /// Announce high-scoring new postings.
    Notify,
    /// Manage tracked companies.
    Company {
        #[command(subcommand)]
        command: CompanyCommands,
    },
}

#[derive(Debug, Subcommand)]
enum CompanyCommands {
    /// Register a company board to scrape.
    Add {
        #[arg(long)]
        name: String,
        /// ATS platform: greenhouse or lever.
        #[arg(long)]
        platform: String,
        /// Board slug on the platform.
        #[arg(long)]
        slug: Option<String>,
        #[arg(long)]
        industry: Option<String>,
    },
    /// List active companies.
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = PipelineConfig::from_env();

    match cli.command {
        Commands::Run => {
            let pipeline = Arc::new(Pipeline::from_env().await?);
            let report = pipeline.run_once().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if let Some(mut scheduler) = maybe_build_scheduler(Arc::clone(&pipeline)).await? {
                info!("scheduler running, press ctrl-c to stop");
                tokio::signal::ctrl_c().await?;
                scheduler.shutdown().await?;
            }
        }
        Commands::Scrape => {
            let workspace = open_workspace(&config).await?;
            let http = Arc::new(HttpFetcher::new(config.http_config())?);
            let summary = scrape::run_scrape(
                &workspace.store,
                &http,
                config.concurrent_companies,
                Uuid::new_v4(),
            )
            .await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Extract => {
            let Workspace {
                store, normalizer, ..
            } = open_workspace(&config).await?;
            let model = Arc::new(AnthropicModel::from_env()?);
            let engine = ExtractionEngine::new(store, model, normalizer, config.extract_config());
            let report = engine.run().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Score { rescore } => {
            let workspace = open_workspace(&config).await?;
            let scored = if rescore {
                scoring::rescore_all(&workspace.store, &workspace.weights).await?
            } else {
                scoring::run_scoring(&workspace.store, &workspace.weights).await?
            };
            println!("scored {scored} postings");
        }
        Commands::Lifecycle => {
            let workspace = open_workspace(&config).await?;
            let report = lifecycle::run_lifecycle(
                &workspace.store,
                Utc::now(),
                config.staleness_days,
                config.retention_days,
            )
            .await?;
            println!("closed {} postings, purged {}", report.closed, report.purged);
        }
        Commands::Aggregate { force } => {
            let workspace = open_workspace(&config).await?;
            match aggregate::run_aggregation(&workspace.store, Utc::now(), force).await? {
                Some(report) => println!(
                    "aggregated {} roles for week {}",
                    report.roles_aggregated, report.week_start
                ),
                None => println!("snapshots already exist for this week, use --force to redo"),
            }
        }
        Commands::Notify => {
            let workspace = open_workspace(&config).await?;
            let announced =
                notify::announce_matches(&workspace.store, config.notify_min_score, config.notify_max).await?;
            println!("announced {announced} high matches");
        }
        Commands::Company { command } => match command {
            CompanyCommands::Add {
                name,
                platform,
                slug,
                industry,
            } => {
                let ats_platform = AtsPlatform::parse(&platform);
                if ats_platform == AtsPlatform::Unknown {
                    bail!("unknown ATS platform {platform:?}, expected greenhouse or lever");
                }
                let workspace = open_workspace(&config).await?;
                let id = workspace
                    .store
                    .insert_company(&NewCompany {
                        name: name.clone(),
                        ats_platform,
                        ats_slug: slug,
                        industry,
                    })
                    .await?;
                println!("registered {name} (id {id})");
            }
            CompanyCommands::List => {
                let workspace = open_workspace(&config).await?;
                for company in workspace.store.list_active_companies().await? {
                    println!(
                        "{:>4}  {:<30} {:<12} {}",
                        company.id,
                        company.name,
                        company.ats_platform.as_str(),
                        company.ats_slug.as_deref().unwrap_or("-"),
                    );
                }
            }
        },
    }
    Ok(())
}
