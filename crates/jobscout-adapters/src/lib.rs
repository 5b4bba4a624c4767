//! Board adapters: one per supported ATS platform.
//!
//! An adapter turns a company's board into `RawPosting` records. Fetching
//! goes through the shared [`HttpFetcher`]; parsing is pure so it can be
//! tested against captured board pages without a network.

use async_trait::async_trait;
use jobscout_core::{AtsPlatform, Company, RawPosting};
use jobscout_storage::{FetchError, HttpFetcher};
use scraper::Html;
use thiserror::Error;
use uuid::Uuid;

pub mod greenhouse;
pub mod lever;

pub use greenhouse::GreenhouseAdapter;
pub use lever::LeverAdapter;

pub const CRATE_NAME: &str = "jobscout-adapters";

#[derive(Debug, Clone, Copy)]
pub struct AdapterContext {
    pub run_id: Uuid,
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("company {0:?} has no board slug configured")]
    MissingSlug(String),
    #[error("no scraping adapter for platform {0}")]
    UnsupportedPlatform(&'static str),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("parsing {url}: {message}")]
    Parse { url: String, message: String },
}

impl AdapterError {
    pub(crate) fn parse(url: &str, message: impl Into<String>) -> Self {
        Self::Parse {
            url: url.to_string(),
            message: message.into(),
        }
    }
}

/// One ATS platform's scraping strategy.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn platform(&self) -> AtsPlatform;

    /// Fetch every open posting on the company's board, detail text
    /// included.
    async fn fetch_postings(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
        company: &Company,
    ) -> Result<Vec<RawPosting>, AdapterError>;
}

/// Look up the adapter for a platform. Platforms without a structured
/// board surface are a typed failure, not a panic: the caller records the
/// company as unscrapable and moves on.
pub fn adapter_for_platform(
    platform: AtsPlatform,
) -> Result<Box<dyn SourceAdapter>, AdapterError> {
    match platform {
        AtsPlatform::Greenhouse => Ok(Box::new(GreenhouseAdapter)),
        AtsPlatform::Lever => Ok(Box::new(LeverAdapter)),
        other => Err(AdapterError::UnsupportedPlatform(other.as_str())),
    }
}

pub(crate) fn slug_of(company: &Company) -> Result<&str, AdapterError> {
    company
        .ats_slug
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AdapterError::MissingSlug(company.name.clone()))
}

/// Flatten posting HTML into readable text, keeping block boundaries as
/// newlines so downstream extraction sees paragraph structure.
pub fn html_to_text(html: &str) -> String {
    // Mark block boundaries before stripping tags.
    let mut marked = html.to_string();
    for tag in ["</p>", "</li>", "</div>", "</h1>", "</h2>", "</h3>", "</h4>", "</ul>", "<br>", "<br/>", "<br />"] {
        marked = marked.replace(tag, &format!("{tag}\n"));
    }
    let fragment = Html::parse_fragment(&marked);
    let text: String = fragment.root_element().text().collect();

    let mut out = String::with_capacity(text.len());
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(line);
    }
    out
}

pub(crate) fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
