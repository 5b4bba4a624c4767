//! Pipeline orchestration for Job Scout.
//!
//! One run walks the stages in order: scrape every active company board,
//! extract structured fields from new postings, score them against the
//! saved profile, close and purge per the lifecycle windows, aggregate
//! weekly trends, and announce high matches. Each stage is also callable
//! on its own from the CLI.

pub mod aggregate;
pub mod lifecycle;
pub mod notify;
pub mod scoring;
pub mod scrape;
pub mod seed;

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use jobscout_core::score::ScoreWeights;
use jobscout_core::SkillNormalizer;
use jobscout_extract::engine::{ExtractConfig, ExtractionEngine, ExtractionReport};
use jobscout_extract::{AnthropicModel, LanguageModel};
use jobscout_storage::http::{BackoffPolicy, HttpClientConfig, HttpFetcher};
use jobscout_storage::Store;
use serde::Serialize;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};
use uuid::Uuid;

pub use aggregate::AggregationReport;
pub use lifecycle::LifecycleReport;
pub use scrape::ScrapeSummary;

pub const CRATE_NAME: &str = "jobscout-pipeline";

const DEFAULT_USER_AGENT: &str = "jobscout/0.1";

/// Runtime settings, read from `JOBSCOUT_*` environment variables with
/// working defaults for every knob.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub database_url: String,
    /// Directory holding `profile.yaml`, `roles.yaml` and `skills.yaml`.
    pub config_dir: PathBuf,
    /// When set, a JSON report is written here after every run.
    pub report_dir: Option<PathBuf>,
    pub user_agent: String,
    pub http_timeout: Duration,
    pub politeness_delay: Duration,
    pub max_retries: usize,
    pub concurrent_companies: usize,
    pub llm_batch_size: i64,
    pub llm_budget_usd: f64,
    pub staleness_days: i64,
    pub retention_days: i64,
    pub notify_min_score: f64,
    pub notify_max: usize,
    pub scheduler_enabled: bool,
    pub pipeline_cron: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:jobscout.db".to_string(),
            config_dir: PathBuf::from("config"),
            report_dir: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            http_timeout: Duration::from_secs(30),
            politeness_delay: Duration::from_millis(1500),
            max_retries: 3,
            concurrent_companies: 3,
            llm_batch_size: 10,
            llm_budget_usd: 5.0,
            staleness_days: 7,
            retention_days: 90,
            notify_min_score: 0.80,
            notify_max: 20,
            scheduler_enabled: false,
            pipeline_cron: "0 0 6 * * *".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database_url: env_or("JOBSCOUT_DATABASE_URL", defaults.database_url),
            config_dir: std::env::var("JOBSCOUT_CONFIG_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.config_dir),
            report_dir: std::env::var("JOBSCOUT_REPORT_DIR").ok().map(PathBuf::from),
            user_agent: env_or("JOBSCOUT_USER_AGENT", defaults.user_agent),
            http_timeout: Duration::from_secs(env_parsed("JOBSCOUT_HTTP_TIMEOUT_SECS", 30)),
            politeness_delay: Duration::from_millis(env_parsed("JOBSCOUT_POLITENESS_MS", 1500)),
            max_retries: env_parsed("JOBSCOUT_MAX_RETRIES", defaults.max_retries),
            concurrent_companies: env_parsed(
                "JOBSCOUT_CONCURRENT_COMPANIES",
                defaults.concurrent_companies,
            ),
            llm_batch_size: env_parsed("JOBSCOUT_LLM_BATCH_SIZE", defaults.llm_batch_size),
            llm_budget_usd: env_parsed("JOBSCOUT_LLM_BUDGET_USD", defaults.llm_budget_usd),
            staleness_days: env_parsed("JOBSCOUT_STALENESS_DAYS", defaults.staleness_days),
            retention_days: env_parsed("JOBSCOUT_RETENTION_DAYS", defaults.retention_days),
            notify_min_score: env_parsed("JOBSCOUT_NOTIFY_MIN_SCORE", defaults.notify_min_score),
            notify_max: env_parsed("JOBSCOUT_NOTIFY_MAX", defaults.notify_max),
            scheduler_enabled: env_flag("JOBSCOUT_SCHEDULER_ENABLED"),
            pipeline_cron: env_or("JOBSCOUT_PIPELINE_CRON", defaults.pipeline_cron),
        }
    }

    pub fn http_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: self.http_timeout,
            user_agent: Some(self.user_agent.clone()),
            politeness_delay: self.politeness_delay,
            backoff: BackoffPolicy {
                max_retries: self.max_retries,
                ..BackoffPolicy::default()
            },
            ..HttpClientConfig::default()
        }
    }

    pub fn extract_config(&self) -> ExtractConfig {
        ExtractConfig {
            batch_size: self.llm_batch_size,
            cost_budget_usd: self.llm_budget_usd,
            backoff: BackoffPolicy {
                max_retries: self.max_retries,
                ..BackoffPolicy::default()
            },
        }
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

fn env_parsed<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str) -> bool {
    std::env::var(key).map(|v| is_truthy(&v)).unwrap_or(false)
}

fn is_truthy(value: &str) -> bool {
    matches!(value.trim(), "1" | "true" | "yes")
}

/// The opened store plus everything the seed files contributed.
pub struct Workspace {
    pub store: Store,
    pub normalizer: SkillNormalizer,
    pub weights: ScoreWeights,
}

/// Open the database and apply the seed files under the config dir.
pub async fn open_workspace(config: &PipelineConfig) -> anyhow::Result<Workspace> {
    let store = Store::connect(&config.database_url)
        .await
        .with_context(|| format!("opening database {:?}", config.database_url))?;
    let seeded = seed::apply_seed_files(&store, &config.config_dir).await?;
    Ok(Workspace {
        store,
        normalizer: seeded.normalizer,
        weights: seeded.weights,
    })
}

/// Outcome of one full pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub scrape: ScrapeSummary,
    pub extraction: ExtractionReport,
    pub scored: u32,
    pub lifecycle: LifecycleReport,
    pub aggregation: Option<AggregationReport>,
    pub notified: u32,
}

pub struct Pipeline {
    config: PipelineConfig,
    store: Store,
    http: Arc<HttpFetcher>,
    model: Arc<dyn LanguageModel>,
    normalizer: SkillNormalizer,
    weights: ScoreWeights,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        workspace: Workspace,
        model: Arc<dyn LanguageModel>,
    ) -> anyhow::Result<Self> {
        workspace.weights.validate().map_err(anyhow::Error::msg)?;
        let http = Arc::new(HttpFetcher::new(config.http_config())?);
        Ok(Self {
            config,
            store: workspace.store,
            http,
            model,
            normalizer: workspace.normalizer,
            weights: workspace.weights,
        })
    }

    /// Build a pipeline entirely from the environment, Anthropic model
    /// included.
    pub async fn from_env() -> anyhow::Result<Self> {
        let config = PipelineConfig::from_env();
        let workspace = open_workspace(&config).await?;
        let model: Arc<dyn LanguageModel> = Arc::new(AnthropicModel::from_env()?);
        Self::new(config, workspace, model)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Run every stage once, in order. Failures scoped to one company or
    /// posting are absorbed into the report; infrastructure errors abort
    /// the run.
    pub async fn run_once(&self) -> anyhow::Result<RunReport> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let timer = std::time::Instant::now();
        info!(%run_id, "pipeline run starting");

        let scrape_summary = scrape::run_scrape(
            &self.store,
            &self.http,
            self.config.concurrent_companies,
            run_id,
        )
        .await?;

        let engine = ExtractionEngine::new(
            self.store.clone(),
            Arc::clone(&self.model),
            self.normalizer.clone(),
            self.config.extract_config(),
        );
        let extraction = engine.run().await?;

        let scored = scoring::run_scoring(&self.store, &self.weights).await?;
        let lifecycle = lifecycle::run_lifecycle(
            &self.store,
            Utc::now(),
            self.config.staleness_days,
            self.config.retention_days,
        )
        .await?;
        let aggregation = aggregate::run_aggregation(&self.store, Utc::now(), false).await?;
        let notified = notify::announce_matches(&self.store, self.config.notify_min_score, self.config.notify_max).await?;

        let report = RunReport {
            run_id,
            started_at,
            duration_seconds: timer.elapsed().as_secs_f64(),
            scrape: scrape_summary,
            extraction,
            scored,
            lifecycle,
            aggregation,
            notified,
        };
        if let Some(dir) = &self.config.report_dir {
            if let Err(err) = write_report(dir, &report).await {
                warn!(error = %err, "failed to write run report");
            }
        }
        info!(
            %run_id,
            companies = report.scrape.companies,
            postings_new = report.scrape.postings_new,
            extracted = report.extraction.succeeded,
            scored = report.scored,
            closed = report.lifecycle.closed,
            purged = report.lifecycle.purged,
            notified = report.notified,
            "pipeline run finished"
        );
        Ok(report)
    }
}

async fn write_report(dir: &PathBuf, report: &RunReport) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("creating report dir {}", dir.display()))?;
    let name = format!(
        "run-{}-{}.json",
        report.started_at.format("%Y%m%dT%H%M%SZ"),
        report.run_id
    );
    let path = dir.join(name);
    let body = serde_json::to_vec_pretty(report)?;
    tokio::fs::write(&path, body)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    info!(path = %path.display(), "run report written");
    Ok(())
}

/// Start the cron scheduler when enabled, returning `None` otherwise.
/// The scheduler holds a handle to the pipeline and runs it on the
/// configured cadence until dropped.
pub async fn maybe_build_scheduler(
    pipeline: Arc<Pipeline>,
) -> anyhow::Result<Option<JobScheduler>> {
    if !pipeline.config.scheduler_enabled {
        return Ok(None);
    }
    let cron = pipeline.config.pipeline_cron.clone();
    let scheduler = JobScheduler::new().await?;
    let job_pipeline = Arc::clone(&pipeline);
    let job = Job::new_async(cron.as_str(), move |_id, _lock| {
        let pipeline = Arc::clone(&job_pipeline);
        Box::pin(async move {
            match pipeline.run_once().await {
                Ok(report) => {
                    info!(run_id = %report.run_id, "scheduled pipeline run finished");
                }
                Err(err) => {
                    error!(error = %err, "scheduled pipeline run failed");
                }
            }
        })
    })
    .with_context(|| format!("invalid cron expression {cron:?}"))?;
    scheduler.add(job).await?;
    scheduler.start().await?;
    info!(%cron, "pipeline scheduler started");
    Ok(Some(scheduler))
}
