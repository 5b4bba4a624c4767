//! Lever board adapter.
//!
//! Lever boards are scraped as HTML: a listing page at
//! `https://jobs.lever.co/{slug}` and one detail page per posting. The
//! current layout is matched first; boards still on the legacy markup get
//! one fallback pass.

use async_trait::async_trait;
use jobscout_core::{AtsPlatform, Company, RawPosting};
use jobscout_storage::{FetchError, FetchedResponse, HttpFetcher};
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};

use crate::{html_to_text, non_empty, slug_of, AdapterContext, AdapterError, SourceAdapter};

const BOARD_BASE: &str = "https://jobs.lever.co";

fn sel(url: &str, selector: &str) -> Result<Selector, AdapterError> {
    Selector::parse(selector).map_err(|e| AdapterError::parse(url, e.to_string()))
}

fn first_text(scope: ElementRef<'_>, selector: &Selector) -> Option<String> {
    scope
        .select(selector)
        .next()
        .and_then(|n| non_empty(n.text().collect::<String>()))
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ListingEntry {
    pub url: String,
    pub title: String,
    pub location: Option<String>,
    pub team: Option<String>,
}

pub(crate) fn parse_listing(html: &str, page_url: &str) -> Result<Vec<ListingEntry>, AdapterError> {
    let doc = Html::parse_document(html);

    let posting_sel = sel(page_url, "div.posting")?;
    let title_sel = sel(page_url, r#"h5[data-qa="posting-name"]"#)?;
    let link_sel = sel(page_url, "a.posting-title")?;
    let any_link_sel = sel(page_url, "a[href]")?;
    let location_sel = sel(page_url, ".posting-categories .sort-by-location")?;
    let team_sel = sel(page_url, ".posting-categories .sort-by-team")?;

    let mut entries = Vec::new();
    for posting in doc.select(&posting_sel) {
        let href = posting
            .select(&link_sel)
            .next()
            .or_else(|| posting.select(&any_link_sel).next())
            .and_then(|a| a.value().attr("href"))
            .map(str::to_string);
        let title = first_text(posting, &title_sel);
        let (Some(url), Some(title)) = (href, title) else {
            continue;
        };
        entries.push(ListingEntry {
            url,
            title,
            location: first_text(posting, &location_sel),
            team: first_text(posting, &team_sel),
        });
    }

    if !entries.is_empty() {
        return Ok(entries);
    }

    // Legacy board markup: a flat list of title anchors.
    let legacy_sel = sel(page_url, "li.posting-item")?;
    let legacy_title_sel = sel(page_url, ".posting-item-title")?;
    for item in doc.select(&legacy_sel) {
        let href = item
            .select(&any_link_sel)
            .next()
            .and_then(|a| a.value().attr("href"))
            .map(str::to_string);
        let title = first_text(item, &legacy_title_sel)
            .or_else(|| non_empty(item.text().collect::<String>()));
        if let (Some(url), Some(title)) = (href, title) {
            entries.push(ListingEntry {
                url,
                title,
                location: None,
                team: None,
            });
        }
    }
    Ok(entries)
}

pub(crate) fn parse_detail_description(html: &str, page_url: &str) -> Result<Option<String>, AdapterError> {
    let doc = Html::parse_document(html);
    for selector in [r#"div[data-qa="job-description"]"#, ".section.page-centered", ".content"] {
        let parsed = sel(page_url, selector)?;
        let joined: String = doc
            .select(&parsed)
            .map(|el| el.inner_html())
            .collect::<Vec<_>>()
            .join("\n");
        if let Some(text) = non_empty(html_to_text(&joined)) {
            return Ok(Some(text));
        }
    }
    Ok(None)
}

/// The posting id is the last path segment of the detail URL.
pub(crate) fn external_id_from_url(url: &str) -> Option<String> {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// A posting can vanish (404) or error between listing and detail; the
/// listing entry survives with no description rather than costing the
/// board its remaining postings.
fn resolve_description(
    fetched: Result<FetchedResponse, FetchError>,
    url: &str,
) -> Result<Option<String>, AdapterError> {
    match fetched {
        Ok(resp) => parse_detail_description(&resp.text(), url),
        Err(err) => {
            warn!(url, error = %err, "posting detail fetch failed");
            Ok(None)
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LeverAdapter;

#[async_trait]
impl SourceAdapter for LeverAdapter {
    fn platform(&self) -> AtsPlatform {
        AtsPlatform::Lever
    }

    async fn fetch_postings(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
        company: &Company,
    ) -> Result<Vec<RawPosting>, AdapterError> {
        let slug = slug_of(company)?;
        let board_url = format!("{BOARD_BASE}/{slug}");
        let listing_page = http.fetch_bytes(ctx.run_id, &board_url).await?;
        let entries = parse_listing(&listing_page.text(), &board_url)?;
        debug!(company = company.name.as_str(), postings = entries.len(), "lever board listed");

        let mut out = Vec::with_capacity(entries.len());
        for entry in entries {
            let fetched = http.fetch_bytes(ctx.run_id, &entry.url).await;
            let description = resolve_description(fetched, &entry.url)?;
            out.push(RawPosting {
                external_id: external_id_from_url(&entry.url),
                source_url: entry.url,
                title: entry.title,
                description,
                location_raw: entry.location,
                department: entry.team,
                posted_date: None,
            });
        }
        Ok(out)
    }
}
