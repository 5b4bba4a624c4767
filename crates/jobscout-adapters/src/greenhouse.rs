//! Greenhouse board adapter.
//!
//! Greenhouse exposes a public JSON API per board: a jobs index plus a
//! per-job detail document whose `content` field is HTML-escaped posting
//! markup.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use jobscout_core::{AtsPlatform, Company, RawPosting};
use jobscout_storage::{FetchError, FetchedResponse, HttpFetcher};
use scraper::Html;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::{html_to_text, non_empty, slug_of, AdapterContext, AdapterError, SourceAdapter};

const BOARDS_API: &str = "https://boards-api.greenhouse.io/v1/boards";

#[derive(Debug, Deserialize)]
struct JobList {
    jobs: Vec<JobStub>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct JobStub {
    pub id: i64,
    pub title: String,
    pub absolute_url: String,
    #[serde(default)]
    pub location: Option<JobLocation>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct JobLocation {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct JobDetail {
    pub title: String,
    pub absolute_url: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub departments: Vec<Department>,
    #[serde(default)]
    pub location: Option<JobLocation>,
    #[serde(default)]
    pub first_published: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Department {
    pub name: String,
}

pub(crate) fn parse_job_list(body: &str, url: &str) -> Result<Vec<JobStub>, AdapterError> {
    let list: JobList =
        serde_json::from_str(body).map_err(|e| AdapterError::parse(url, e.to_string()))?;
    Ok(list.jobs)
}

pub(crate) fn parse_job_detail(body: &str, url: &str) -> Result<JobDetail, AdapterError> {
    serde_json::from_str(body).map_err(|e| AdapterError::parse(url, e.to_string()))
}

/// The `content` field arrives entity-escaped. One parse decodes the
/// entities into real markup, a second flattens that markup to text.
pub(crate) fn content_to_text(content: &str) -> Option<String> {
    let decoded: String = Html::parse_fragment(content).root_element().text().collect();
    non_empty(html_to_text(&decoded))
}

pub(crate) fn parse_posting_date(value: Option<&str>) -> Option<NaiveDate> {
    let value = value?;
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.date_naive());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()
}

fn detail_to_raw(detail: JobDetail, job_id: i64) -> RawPosting {
    RawPosting {
        source_url: detail.absolute_url,
        external_id: Some(job_id.to_string()),
        title: detail.title,
        description: detail.content.as_deref().and_then(content_to_text),
        location_raw: detail.location.map(|l| l.name),
        department: detail.departments.into_iter().next().map(|d| d.name),
        posted_date: parse_posting_date(
            detail.first_published.as_deref().or(detail.updated_at.as_deref()),
        ),
    }
}

fn stub_to_raw(stub: JobStub) -> RawPosting {
    RawPosting {
        source_url: stub.absolute_url,
        external_id: Some(stub.id.to_string()),
        title: stub.title,
        description: None,
        location_raw: stub.location.map(|l| l.name),
        department: None,
        posted_date: parse_posting_date(stub.updated_at.as_deref()),
    }
}

/// One posting can close (404) or error between the index fetch and the
/// detail fetch; either way the index stub is kept so the rest of the
/// board still lands. Only a malformed detail payload fails the board.
fn resolve_detail(
    fetched: Result<FetchedResponse, FetchError>,
    stub: JobStub,
    detail_url: &str,
) -> Result<RawPosting, AdapterError> {
    match fetched {
        Ok(resp) => {
            let detail = parse_job_detail(&resp.text(), detail_url)?;
            Ok(detail_to_raw(detail, stub.id))
        }
        Err(err) => {
            warn!(url = detail_url, error = %err, "job detail fetch failed");
            Ok(stub_to_raw(stub))
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GreenhouseAdapter;

#[async_trait]
impl SourceAdapter for GreenhouseAdapter {
    fn platform(&self) -> AtsPlatform {
        AtsPlatform::Greenhouse
    }

    async fn fetch_postings(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
        company: &Company,
    ) -> Result<Vec<RawPosting>, AdapterError> {
        let slug = slug_of(company)?;
        let list_url = format!("{BOARDS_API}/{slug}/jobs");
        let listing = http.fetch_bytes(ctx.run_id, &list_url).await?;
        let stubs = parse_job_list(&listing.text(), &list_url)?;
        debug!(company = company.name.as_str(), jobs = stubs.len(), "greenhouse board listed");

        let mut out = Vec::with_capacity(stubs.len());
        for stub in stubs {
            let detail_url = format!("{BOARDS_API}/{slug}/jobs/{}", stub.id);
            let fetched = http.fetch_bytes(ctx.run_id, &detail_url).await;
            out.push(resolve_detail(fetched, stub, &detail_url)?);
        }
        Ok(out)
    }
}
