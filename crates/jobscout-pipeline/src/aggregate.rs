//! Weekly trend aggregation.
//!
//! One snapshot per (ISO week, role), built from the postings seen that
//! week. Skill movement is judged against the previous week's snapshot:
//! a skill breaking into the top list is emerging, one falling out is
//! declining.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc};
use jobscout_core::{Posting, RemoteType, RequirementLevel, SkillFrequency, WeeklySnapshot};
use jobscout_storage::{Store, StoreError};
use serde::Serialize;
use tracing::{debug, info};

/// How many skills each snapshot keeps per requirement level.
pub const TOP_SKILL_COUNT: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregationReport {
    pub week_start: NaiveDate,
    pub roles_aggregated: u32,
}

/// Monday of the ISO week containing `now`.
pub fn week_start_of(now: DateTime<Utc>) -> NaiveDate {
    let today = now.date_naive();
    today - Duration::days(i64::from(today.weekday().num_days_from_monday()))
}

/// Aggregate the current week once. Returns `None` when this week
/// already has snapshots and `force` is off; `force` recomputes and
/// upserts over them.
pub async fn run_aggregation(
    store: &Store,
    now: DateTime<Utc>,
    force: bool,
) -> Result<Option<AggregationReport>, StoreError> {
    let week_start = week_start_of(now);
    if !force && store.has_snapshots_for_week(week_start).await? {
        debug!(%week_start, "snapshots already exist for this week");
        return Ok(None);
    }

    let since = week_start.and_time(NaiveTime::MIN).and_utc();
    let roles = store.list_roles().await?;
    let mut aggregated = 0u32;
    for role in &roles {
        let postings = store.postings_for_role_since(role.role_id, since).await?;
        if postings.is_empty() {
            continue;
        }
        let snapshot = build_snapshot(store, week_start, role.role_id, &postings, since).await?;
        store.upsert_snapshot(&snapshot).await?;
        aggregated += 1;
    }
    info!(%week_start, roles = aggregated, "weekly aggregation finished");
    Ok(Some(AggregationReport {
        week_start,
        roles_aggregated: aggregated,
    }))
}

async fn build_snapshot(
    store: &Store,
    week_start: NaiveDate,
    role_id: i64,
    postings: &[Posting],
    since: DateTime<Utc>,
) -> Result<WeeklySnapshot, StoreError> {
    let top_required: Vec<SkillFrequency> = store
        .skill_counts_for_role(role_id, since, RequirementLevel::Required)
        .await?
        .into_iter()
        .take(TOP_SKILL_COUNT)
        .collect();
    let top_preferred: Vec<SkillFrequency> = store
        .skill_counts_for_role(role_id, since, RequirementLevel::Preferred)
        .await?
        .into_iter()
        .take(TOP_SKILL_COUNT)
        .collect();

    let previous = store
        .get_snapshot(week_start - Duration::days(7), role_id)
        .await?;
    let (emerging_skills, declining_skills) = match &previous {
        Some(prev) => diff_skills(&top_required, &prev.top_required_skills),
        None => (Vec::new(), Vec::new()),
    };

    let mut remote_count = 0u32;
    let mut hybrid_count = 0u32;
    let mut onsite_count = 0u32;
    for posting in postings {
        match posting.remote_type {
            Some(rt) if rt.is_remote() => remote_count += 1,
            Some(RemoteType::Hybrid) => hybrid_count += 1,
            Some(RemoteType::Onsite) => onsite_count += 1,
            _ => {}
        }
    }

    let salary_mins: Vec<f64> = postings
        .iter()
        .filter_map(|p| p.salary_min.map(|v| v as f64))
        .collect();
    let salary_maxes: Vec<f64> = postings
        .iter()
        .filter_map(|p| p.salary_max.map(|v| v as f64))
        .collect();
    let exp_mins: Vec<f64> = postings
        .iter()
        .filter_map(|p| p.experience_years_min.map(|v| v as f64))
        .collect();
    let exp_maxes: Vec<f64> = postings
        .iter()
        .filter_map(|p| p.experience_years_max.map(|v| v as f64))
        .collect();

    Ok(WeeklySnapshot {
        week_start,
        role_id,
        posting_count: postings.len() as u32,
        salary_min_avg: mean(&salary_mins),
        salary_max_avg: mean(&salary_maxes),
        salary_min_median: median(salary_mins),
        salary_max_median: median(salary_maxes),
        experience_min_avg: mean(&exp_mins),
        experience_max_avg: mean(&exp_maxes),
        remote_count,
        hybrid_count,
        onsite_count,
        top_required_skills: top_required,
        top_preferred_skills: top_preferred,
        emerging_skills,
        declining_skills,
    })
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

fn median(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        Some(values[mid])
    } else {
        Some((values[mid - 1] + values[mid]) / 2.0)
    }
}

fn diff_skills(
    current: &[SkillFrequency],
    previous: &[SkillFrequency],
) -> (Vec<String>, Vec<String>) {
    let emerging = current
        .iter()
        .filter(|s| !previous.iter().any(|p| p.skill == s.skill))
        .map(|s| s.skill.clone())
        .collect();
    let declining = previous
        .iter()
        .filter(|p| !current.iter().any(|s| s.skill == p.skill))
        .map(|p| p.skill.clone())
        .collect();
    (emerging, declining)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use jobscout_core::{AtsPlatform, RawPosting};
    use jobscout_storage::{ExtractedFields, NewCompany, SkillLink};

    #[test]
    fn week_starts_on_monday() {
        // 2026-08-29 is a Saturday.
        let now = Utc.with_ymd_and_hms(2026, 8, 29, 12, 0, 0).unwrap();
        assert_eq!(
            week_start_of(now),
            NaiveDate::from_ymd_opt(2026, 8, 24).unwrap()
        );
        // A Monday maps to itself.
        let monday = Utc.with_ymd_and_hms(2026, 8, 24, 0, 0, 0).unwrap();
        assert_eq!(week_start_of(monday), now.date_naive() - Duration::days(5));
    }

    #[test]
    fn median_of_even_and_odd_sets() {
        assert_eq!(median(vec![3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(vec![4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(median(Vec::new()), None);
        assert_eq!(mean(&[1.0, 2.0, 3.0]), Some(2.0));
        assert_eq!(mean(&[]), None);
    }

    #[test]
    fn skill_diff_marks_movement() {
        let freq = |name: &str| SkillFrequency {
            skill: name.to_string(),
            count: 1,
        };
        let current = vec![freq("Rust"), freq("Kubernetes")];
        let previous = vec![freq("Rust"), freq("Scala")];
        let (emerging, declining) = diff_skills(&current, &previous);
        assert_eq!(emerging, vec!["Kubernetes".to_string()]);
        assert_eq!(declining, vec!["Scala".to_string()]);
    }

    async fn seed_role_posting(store: &Store, url: &str, skill: &str) -> i64 {
        let company_id = match store.list_active_companies().await.unwrap().first() {
            Some(c) => c.id,
            None => store
                .insert_company(&NewCompany {
                    name: "Acme".to_string(),
                    ats_platform: AtsPlatform::Greenhouse,
                    ats_slug: None,
                    industry: None,
                })
                .await
                .unwrap(),
        };
        let posting_id = store
            .record_sighting(
                company_id,
                AtsPlatform::Greenhouse,
                &RawPosting {
                    source_url: url.to_string(),
                    external_id: None,
                    title: "Backend Engineer".to_string(),
                    description: None,
                    location_raw: None,
                    department: None,
                    posted_date: None,
                },
                Utc::now(),
            )
            .await
            .unwrap()
            .posting_id();
        store
            .apply_extraction(
                posting_id,
                &ExtractedFields {
                    normalized_title: "Backend Engineer".to_string(),
                    salary_min: Some(120_000),
                    salary_max: Some(160_000),
                    remote_type: Some(jobscout_core::RemoteType::RemoteUs),
                    ..ExtractedFields::default()
                },
                &[SkillLink {
                    skill: skill.to_string(),
                    category: None,
                    requirement_level: RequirementLevel::Required,
                    years_requested: None,
                }],
            )
            .await
            .unwrap();
        posting_id
    }

    #[tokio::test]
    async fn aggregation_snapshots_once_per_week() {
        let store = Store::in_memory().await.unwrap();
        let role_id = store
            .upsert_role("Backend Engineer", &[])
            .await
            .unwrap();
        let a = seed_role_posting(&store, "https://boards.greenhouse.io/acme/a", "Rust").await;
        let b = seed_role_posting(&store, "https://boards.greenhouse.io/acme/b", "Rust").await;
        store.set_posting_role(a, Some(role_id)).await.unwrap();
        store.set_posting_role(b, Some(role_id)).await.unwrap();

        let now = Utc::now();
        let report = run_aggregation(&store, now, false).await.unwrap().unwrap();
        assert_eq!(report.roles_aggregated, 1);

        let snapshot = store
            .get_snapshot(report.week_start, role_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.posting_count, 2);
        assert_eq!(snapshot.remote_count, 2);
        assert_eq!(snapshot.salary_min_avg, Some(120_000.0));
        assert_eq!(snapshot.top_required_skills[0].skill, "Rust");

        // Same week again without force: nothing to do.
        assert!(run_aggregation(&store, now, false).await.unwrap().is_none());
        // Forced: recomputed in place.
        assert!(run_aggregation(&store, now, true).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn resighted_old_postings_stay_out_of_the_week() {
        let store = Store::in_memory().await.unwrap();
        let role_id = store.upsert_role("Backend Engineer", &[]).await.unwrap();

        // First seen a month ago, re-sighted today: last_seen_at moves,
        // first_seen_at does not.
        let now = Utc::now();
        let raw = RawPosting {
            source_url: "https://boards.greenhouse.io/acme/old".to_string(),
            external_id: None,
            title: "Backend Engineer".to_string(),
            description: None,
            location_raw: None,
            department: None,
            posted_date: None,
        };
        let company_id = store
            .insert_company(&NewCompany {
                name: "Acme".to_string(),
                ats_platform: AtsPlatform::Greenhouse,
                ats_slug: None,
                industry: None,
            })
            .await
            .unwrap();
        let old = store
            .record_sighting(
                company_id,
                AtsPlatform::Greenhouse,
                &raw,
                now - Duration::days(30),
            )
            .await
            .unwrap()
            .posting_id();
        store
            .record_sighting(company_id, AtsPlatform::Greenhouse, &raw, now)
            .await
            .unwrap();
        store
            .apply_extraction(
                old,
                &ExtractedFields {
                    normalized_title: "Backend Engineer".to_string(),
                    ..ExtractedFields::default()
                },
                &[SkillLink {
                    skill: "Scala".to_string(),
                    category: None,
                    requirement_level: RequirementLevel::Required,
                    years_requested: None,
                }],
            )
            .await
            .unwrap();
        store.set_posting_role(old, Some(role_id)).await.unwrap();

        let fresh =
            seed_role_posting(&store, "https://boards.greenhouse.io/acme/new", "Rust").await;
        store.set_posting_role(fresh, Some(role_id)).await.unwrap();

        run_aggregation(&store, now, false).await.unwrap().unwrap();
        let snapshot = store
            .get_snapshot(week_start_of(now), role_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.posting_count, 1);
        assert_eq!(snapshot.top_required_skills.len(), 1);
        assert_eq!(snapshot.top_required_skills[0].skill, "Rust");
    }

    #[tokio::test]
    async fn movement_is_judged_against_previous_week() {
        let store = Store::in_memory().await.unwrap();
        let role_id = store
            .upsert_role("Backend Engineer", &[])
            .await
            .unwrap();
        let a = seed_role_posting(&store, "https://boards.greenhouse.io/acme/a", "Kubernetes").await;
        store.set_posting_role(a, Some(role_id)).await.unwrap();

        let now = Utc::now();
        let last_week = week_start_of(now) - Duration::days(7);
        store
            .upsert_snapshot(&WeeklySnapshot {
                week_start: last_week,
                role_id,
                posting_count: 1,
                salary_min_avg: None,
                salary_max_avg: None,
                salary_min_median: None,
                salary_max_median: None,
                experience_min_avg: None,
                experience_max_avg: None,
                remote_count: 0,
                hybrid_count: 0,
                onsite_count: 0,
                top_required_skills: vec![SkillFrequency {
                    skill: "Scala".to_string(),
                    count: 3,
                }],
                top_preferred_skills: vec![],
                emerging_skills: vec![],
                declining_skills: vec![],
            })
            .await
            .unwrap();

        run_aggregation(&store, now, false).await.unwrap().unwrap();
        let snapshot = store
            .get_snapshot(week_start_of(now), role_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.emerging_skills, vec!["Kubernetes".to_string()]);
        assert_eq!(snapshot.declining_skills, vec!["Scala".to_string()]);
    }
}
