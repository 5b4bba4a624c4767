//! SQLite persistence and polite HTTP fetching for Job Scout.

use sha2::{Digest, Sha256};

pub mod http;
pub mod store;

pub use http::{
    classify_reqwest_error, classify_status, BackoffPolicy, FetchError, FetchedResponse,
    HttpClientConfig, HttpFetcher, RetryDisposition,
};
pub use store::{
    ExtractedFields, NewCompany, ScoringCandidate, SightingOutcome, SkillLink, Store, StoreError,
};

pub const CRATE_NAME: &str = "jobscout-storage";

/// Stable content fingerprint for change detection on re-scrapes.
pub fn content_hash(title: &str, description: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update([0u8]);
    hasher.update(description.unwrap_or("").as_bytes());
    hex::encode(hasher.finalize())
}
