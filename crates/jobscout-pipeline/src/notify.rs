//! High-match announcements.
//!
//! Delivery is the tracing log for now; anything watching the log
//! stream (or the `match_score` column) can fan out from there.

use jobscout_storage::{Store, StoreError};
use tracing::info;

/// Log still-`new` postings scoring at or above the threshold, best
/// first, capped at `max` per run. Returns how many were announced.
pub async fn announce_matches(
    store: &Store,
    min_score: f64,
    max: usize,
) -> Result<u32, StoreError> {
    let postings = store.high_match_new_postings(min_score).await?;
    let postings = &postings[..postings.len().min(max)];
    for posting in postings {
        info!(
            posting_id = posting.id,
            score = posting.match_score.unwrap_or_default(),
            title = posting
                .normalized_title
                .as_deref()
                .unwrap_or(&posting.raw_title),
            url = %posting.source_url,
            "high match"
        );
    }
    Ok(postings.len() as u32)
}
