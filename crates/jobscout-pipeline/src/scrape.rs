//! Company fan-out scraping stage.
//!
//! Companies are scraped concurrently under one semaphore; per-host
//! politeness inside the fetcher keeps each board polite regardless of
//! how the fan-out schedules them. Every attempt lands in the scrape
//! log, failures included.

use std::sync::Arc;

use chrono::Utc;
use jobscout_adapters::{adapter_for_platform, AdapterContext};
use jobscout_core::{Company, ScrapeLogEntry, ScrapeOutcome};
use jobscout_storage::http::HttpFetcher;
use jobscout_storage::{SightingOutcome, Store, StoreError};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};
use uuid::Uuid;

/// Totals across every company scraped in one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScrapeSummary {
    pub companies: u32,
    pub succeeded: u32,
    pub partial: u32,
    pub failed: u32,
    pub postings_found: u32,
    pub postings_new: u32,
    pub postings_refreshed: u32,
}

impl ScrapeSummary {
    fn absorb(&mut self, entry: &ScrapeLogEntry) {
        self.companies += 1;
        match entry.status {
            ScrapeOutcome::Success => self.succeeded += 1,
            ScrapeOutcome::Partial => self.partial += 1,
            ScrapeOutcome::Failed => self.failed += 1,
        }
        self.postings_found += entry.postings_found;
        self.postings_new += entry.postings_new;
        self.postings_refreshed += entry.postings_updated;
    }
}

/// Scrape every active company, at most `concurrent_companies` at a time.
pub async fn run_scrape(
    store: &Store,
    http: &Arc<HttpFetcher>,
    concurrent_companies: usize,
    run_id: Uuid,
) -> Result<ScrapeSummary, StoreError> {
    let companies = store.list_active_companies().await?;
    let limit = Arc::new(Semaphore::new(concurrent_companies.max(1)));
    let mut tasks: JoinSet<Result<ScrapeLogEntry, StoreError>> = JoinSet::new();

    for company in companies {
        let store = store.clone();
        let http = Arc::clone(http);
        let limit = Arc::clone(&limit);
        tasks.spawn(async move {
            let _permit = limit.acquire_owned().await.ok();
            let started_at = Utc::now();
            let timer = std::time::Instant::now();
            let ctx = AdapterContext { run_id };
            let mut entry = scrape_company(&store, &http, &ctx, &company, started_at).await?;
            entry.duration_seconds = timer.elapsed().as_secs_f64();
            store.record_scrape(&entry).await?;
            store.mark_company_scraped(company.id, Utc::now()).await?;
            Ok(entry)
        });
    }

    let mut summary = ScrapeSummary::default();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(entry)) => summary.absorb(&entry),
            Ok(Err(err)) => {
                warn!(error = %err, "scrape task hit a storage error");
                summary.companies += 1;
                summary.failed += 1;
            }
            Err(err) => {
                warn!(error = %err, "scrape task panicked");
                summary.companies += 1;
                summary.failed += 1;
            }
        }
    }
    info!(
        companies = summary.companies,
        succeeded = summary.succeeded,
        partial = summary.partial,
        failed = summary.failed,
        new = summary.postings_new,
        "scrape stage finished"
    );
    Ok(summary)
}

async fn scrape_company(
    store: &Store,
    http: &HttpFetcher,
    ctx: &AdapterContext,
    company: &Company,
    started_at: chrono::DateTime<Utc>,
) -> Result<ScrapeLogEntry, StoreError> {
    let mut entry = ScrapeLogEntry {
        company_id: company.id,
        source_site: company.ats_platform,
        status: ScrapeOutcome::Failed,
        postings_found: 0,
        postings_new: 0,
        postings_updated: 0,
        error_message: None,
        duration_seconds: 0.0,
        started_at,
    };

    let fetched = match adapter_for_platform(company.ats_platform) {
        Ok(adapter) => adapter.fetch_postings(http, ctx, company).await,
        Err(err) => Err(err),
    };
    let raws = match fetched {
        Ok(raws) => raws,
        Err(err) => {
            warn!(company = %company.name, error = %err, "company scrape failed");
            entry.error_message = Some(err.to_string());
            return Ok(entry);
        }
    };

    entry.postings_found = raws.len() as u32;
    let missing_detail = raws.iter().filter(|r| r.description.is_none()).count();
    let now = Utc::now();
    for raw in &raws {
        match store
            .record_sighting(company.id, company.ats_platform, raw, now)
            .await?
        {
            SightingOutcome::Inserted(_) => entry.postings_new += 1,
            SightingOutcome::Refreshed(_) => entry.postings_updated += 1,
        }
    }
    entry.status = if missing_detail > 0 {
        ScrapeOutcome::Partial
    } else {
        ScrapeOutcome::Success
    };
    info!(
        company = %company.name,
        found = entry.postings_found,
        new = entry.postings_new,
        refreshed = entry.postings_updated,
        "company scraped"
    );
    Ok(entry)
}
