//! Scoring stage: turn extracted postings into ranked matches.

use jobscout_core::score::{score_posting, ScoreInputs, ScoreWeights};
use jobscout_core::RequirementLevel;
use jobscout_storage::{Store, StoreError};
use tracing::{debug, info, warn};

/// Score every extracted, not-yet-scored posting against the saved
/// profile. Returns the number scored. A missing profile is not an
/// error; the stage just has nothing to do.
pub async fn run_scoring(store: &Store, weights: &ScoreWeights) -> Result<u32, StoreError> {
    let Some(profile) = store.load_profile().await? else {
        warn!("no candidate profile saved, skipping scoring");
        return Ok(0);
    };

    let candidates = store.scoring_candidates().await?;
    let mut scored = 0u32;
    for candidate in &candidates {
        let mut required = Vec::new();
        let mut preferred = Vec::new();
        for skill in &candidate.skills {
            match skill.requirement_level {
                RequirementLevel::Required => required.push(skill.skill_name.clone()),
                RequirementLevel::Preferred => preferred.push(skill.skill_name.clone()),
            }
        }
        let posting = &candidate.posting;
        let inputs = ScoreInputs {
            required_skills: &required,
            preferred_skills: &preferred,
            salary_min: posting.salary_min,
            salary_max: posting.salary_max,
            experience_years_min: posting.experience_years_min,
            experience_years_max: posting.experience_years_max,
            clearance_required: posting.clearance_required.as_deref(),
            clearance_sponsorship: posting.clearance_sponsorship,
            remote_type: posting.remote_type,
            company_industry: candidate.company_industry.as_deref(),
        };
        let breakdown = score_posting(&inputs, &profile, weights);
        if let Some(reason) = &breakdown.disqualified {
            debug!(posting_id = posting.id, reason = %reason, "posting disqualified");
        }
        store.store_score(posting.id, &breakdown).await?;
        scored += 1;
    }
    info!(scored, "scoring stage finished");
    Ok(scored)
}

/// Wipe every stored score and score everything again. Used after the
/// profile or weights change.
pub async fn rescore_all(store: &Store, weights: &ScoreWeights) -> Result<u32, StoreError> {
    let cleared = store.clear_scores().await?;
    info!(cleared, "cleared existing scores");
    run_scoring(store, weights).await
}
