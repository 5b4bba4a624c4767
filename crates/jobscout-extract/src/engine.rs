//! The batch extraction loop.
//!
//! One run examines a bounded batch of unprocessed postings. Per posting:
//! prompt the model, validate the JSON, normalize skills and title, write
//! everything back. A posting-level failure flags that posting for
//! reparse and moves on; only storage errors abort the run.

use std::collections::HashSet;
use std::sync::Arc;

use jobscout_core::normalize::{match_role, normalize_title, RoleAliases, SkillNormalizer};
use jobscout_core::{Company, Posting, RequirementLevel};
use jobscout_storage::{BackoffPolicy, SkillLink, Store, StoreError};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::schema::{parse_payload, validate, SkillMention, ValidatedExtraction, ValidationError};
use crate::{CostMeter, LanguageModel, LlmError};

const MAX_DESCRIPTION_CHARS: usize = 8000;

const SYSTEM_PROMPT: &str = "\
You extract structured data from job postings. Reply with a single JSON \
object and nothing else, using exactly these keys: normalized_title, \
seniority_level, salary_min, salary_max, salary_type, salary_currency, \
experience_years_min, experience_years_max, education_requirement, \
location_city, location_state, location_country, remote_type, \
clearance_required, clearance_sponsorship, team, benefits, red_flags, \
required_skills, preferred_skills.\n\
Rules:\n\
- seniority_level is one of junior, mid, senior, staff, principal, lead, \
manager, director, vp, c_level, or null.\n\
- remote_type is one of onsite, hybrid, remote_local, remote_us, \
remote_global, or null.\n\
- clearance_sponsorship is yes, no, unknown, or null.\n\
- Salaries are annual figures. Convert hourly rates to annual by \
multiplying by 2080 and set salary_type to \"annual\". salary_type is \
annual, hourly, or null.\n\
- required_skills and preferred_skills are arrays of objects with keys \
name, years (number or null), category (string or null).\n\
- benefits and red_flags are arrays of short strings, or null.\n\
- Use null for anything the posting does not state. Never invent values.";

#[derive(Debug, Clone)]
pub struct ExtractConfig {
    pub batch_size: i64,
    pub backoff: BackoffPolicy,
    pub cost_budget_usd: f64,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            backoff: BackoffPolicy::default(),
            cost_budget_usd: 5.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct ExtractionReport {
    pub examined: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub halted_on_budget: bool,
    pub llm_calls: u32,
    pub cost_usd: f64,
}

#[derive(Debug, Error)]
enum ExtractFailure {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

pub struct ExtractionEngine {
    store: Store,
    model: Arc<dyn LanguageModel>,
    normalizer: SkillNormalizer,
    config: ExtractConfig,
}

impl ExtractionEngine {
    pub fn new(
        store: Store,
        model: Arc<dyn LanguageModel>,
        normalizer: SkillNormalizer,
        config: ExtractConfig,
    ) -> Self {
        Self {
            store,
            model,
            normalizer,
            config,
        }
    }

    /// Process every pending posting in batches of `batch_size`. The
    /// meter is scoped to this call; budget state never leaks between
    /// runs. A posting that fails stays flagged for a future run rather
    /// than being retried within this one.
    pub async fn run(&self) -> Result<ExtractionReport, StoreError> {
        let roles = self.store.list_roles().await?;
        let mut meter = CostMeter::new(self.config.cost_budget_usd);
        let mut report = ExtractionReport::default();
        let mut attempted = HashSet::new();

        'batches: loop {
            let batch: Vec<Posting> = self
                .store
                .extraction_candidates(self.config.batch_size)
                .await?
                .into_iter()
                .filter(|p| !attempted.contains(&p.id))
                .collect();
            if batch.is_empty() {
                break;
            }
            if meter.exhausted() {
                warn!(
                    spent_usd = meter.spent_usd(),
                    "cost budget exhausted, deferring remaining batches"
                );
                report.halted_on_budget = true;
                break;
            }
            for posting in batch {
                if meter.exhausted() {
                    warn!(
                        spent_usd = meter.spent_usd(),
                        "cost budget exhausted, halting extraction"
                    );
                    report.halted_on_budget = true;
                    break 'batches;
                }
                attempted.insert(posting.id);
                report.examined += 1;
                let company = self.store.get_company(posting.company_id).await?;
                match self
                    .extract_one(&posting, company.as_ref(), &roles, &mut meter)
                    .await
                {
                    Ok(()) => report.succeeded += 1,
                    Err(ExtractFailure::Store(err)) => return Err(err),
                    Err(err) => {
                        warn!(posting_id = posting.id, error = %err, "extraction failed, flagging for reparse");
                        self.store.flag_needs_reparse(posting.id).await?;
                        report.failed += 1;
                    }
                }
            }
        }

        report.llm_calls = meter.calls();
        report.cost_usd = meter.spent_usd();
        info!(
            examined = report.examined,
            succeeded = report.succeeded,
            failed = report.failed,
            cost_usd = report.cost_usd,
            "extraction batch done"
        );
        Ok(report)
    }

    async fn extract_one(
        &self,
        posting: &Posting,
        company: Option<&Company>,
        roles: &[RoleAliases],
        meter: &mut CostMeter,
    ) -> Result<(), ExtractFailure> {
        let company_name = company.map(|c| c.name.as_str()).unwrap_or("");
        let user_prompt = build_user_prompt(posting, company_name);
        let mut validated = self.complete_validated(&user_prompt, meter).await?;

        let title = normalize_title(&validated.fields.normalized_title, company_name);
        validated.fields.normalized_title = title.bare_title.clone();
        if validated.fields.seniority_level.is_none() {
            validated.fields.seniority_level = title.seniority;
        }

        let mut links = Vec::new();
        self.collect_links(&mut links, &validated.required_skills, RequirementLevel::Required);
        self.collect_links(&mut links, &validated.preferred_skills, RequirementLevel::Preferred);

        self.store
            .apply_extraction(posting.id, &validated.fields, &links)
            .await
            .map_err(ExtractFailure::Store)?;

        let role_id = match_role(&title.bare_title, roles);
        self.store
            .set_posting_role(posting.id, role_id)
            .await
            .map_err(ExtractFailure::Store)?;
        Ok(())
    }

    fn collect_links(
        &self,
        out: &mut Vec<SkillLink>,
        mentions: &[SkillMention],
        level: RequirementLevel,
    ) {
        for mention in mentions {
            let canonical = self.normalizer.normalize(&mention.name);
            if canonical.is_empty() {
                continue;
            }
            out.push(SkillLink {
                skill: canonical,
                category: mention.category.clone(),
                requirement_level: level,
                years_requested: mention.years,
            });
        }
    }

    /// Call the model until a response parses and validates. Transient
    /// API errors and malformed responses both count against the same
    /// attempt budget, with backoff between attempts. Permanent API
    /// errors and budget exhaustion cut the loop short.
    async fn complete_validated(
        &self,
        user_prompt: &str,
        meter: &mut CostMeter,
    ) -> Result<ValidatedExtraction, ExtractFailure> {
        let mut last: Option<ExtractFailure> = None;
        for attempt in 0..=self.config.backoff.max_retries {
            if attempt > 0 {
                tokio::time::sleep(self.config.backoff.delay_for_attempt(attempt - 1)).await;
            }
            let completion = match self.model.complete(SYSTEM_PROMPT, user_prompt).await {
                Ok(completion) => {
                    meter.record(completion.cost_usd);
                    completion
                }
                Err(err) if err.is_transient() => {
                    last = Some(err.into());
                    continue;
                }
                Err(err) => return Err(err.into()),
            };
            match parse_payload(&completion.text).and_then(validate) {
                Ok(validated) => return Ok(validated),
                Err(err) => {
                    debug!(error = %err, "model response failed validation");
                    last = Some(err.into());
                    if meter.exhausted() {
                        break;
                    }
                }
            }
        }
        Err(last.unwrap_or(ExtractFailure::Llm(LlmError::EmptyResponse)))
    }
}

fn build_user_prompt(posting: &Posting, company_name: &str) -> String {
    let mut description = posting.raw_description.as_deref().unwrap_or("").to_string();
    if description.len() > MAX_DESCRIPTION_CHARS {
        let mut cut = MAX_DESCRIPTION_CHARS;
        while !description.is_char_boundary(cut) {
            cut -= 1;
        }
        description.truncate(cut);
    }
    format!(
        "Title: {}\nCompany: {}\nLocation: {}\n\nDescription:\n{}",
        posting.raw_title,
        company_name,
        posting.location_raw.as_deref().unwrap_or("unknown"),
        description
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedModel;
    use chrono::{DateTime, Utc};
    use jobscout_core::{AtsPlatform, RawPosting};
    use jobscout_storage::NewCompany;

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    async fn seed_posting(store: &Store, url: &str) -> i64 {
        let company = store
            .insert_company(&NewCompany {
                name: "Acme".into(),
                ats_platform: AtsPlatform::Greenhouse,
                ats_slug: Some("acme".into()),
                industry: None,
            })
            .await
            .unwrap();
        store
            .record_sighting(
                company,
                AtsPlatform::Greenhouse,
                &RawPosting {
                    source_url: url.into(),
                    external_id: None,
                    title: "Senior Backend Engineer".into(),
                    description: Some("Build APIs in Python. 5+ years required.".into()),
                    location_raw: Some("Remote - US".into()),
                    department: None,
                    posted_date: None,
                },
                ts("2026-08-10T08:00:00Z"),
            )
            .await
            .unwrap()
            .posting_id()
    }

    const GOOD_RESPONSE: &str = r#"{
        "normalized_title": "Backend Engineer",
        "seniority_level": "senior",
        "salary_min": 150000, "salary_max": 190000,
        "salary_type": "annual", "salary_currency": "USD",
        "experience_years_min": 5, "experience_years_max": null,
        "education_requirement": null,
        "location_city": null, "location_state": null, "location_country": "US",
        "remote_type": "remote_us",
        "clearance_required": null, "clearance_sponsorship": null,
        "team": "Platform",
        "benefits": ["401k match"], "red_flags": null,
        "required_skills": [{"name": "python3", "years": 5, "category": "language"}],
        "preferred_skills": [{"name": "k8s", "years": null, "category": null}]
    }"#;

    fn engine(store: Store, responses: Vec<Result<String, LlmError>>) -> ExtractionEngine {
        ExtractionEngine::new(
            store,
            Arc::new(ScriptedModel::new(responses)),
            SkillNormalizer::with_defaults(),
            ExtractConfig::default(),
        )
    }

    #[tokio::test]
    async fn successful_extraction_writes_fields_skills_and_role() {
        let store = Store::in_memory().await.unwrap();
        store
            .upsert_role("Backend Engineer", &["Backend Developer".into()])
            .await
            .unwrap();
        let posting_id = seed_posting(&store, "https://x/1").await;

        let report = engine(store.clone(), vec![Ok(GOOD_RESPONSE.to_string())])
            .run()
            .await
            .unwrap();
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(report.llm_calls, 1);

        let posting = store.get_posting(posting_id).await.unwrap().unwrap();
        assert_eq!(posting.normalized_title.as_deref(), Some("Backend Engineer"));
        assert_eq!(posting.salary_max, Some(190_000));
        assert!(posting.role_id.is_some());

        // Skill aliases were canonicalized before linking.
        let skills = store.skills_for_posting(posting_id).await.unwrap();
        let names: Vec<&str> = skills.iter().map(|s| s.skill_name.as_str()).collect();
        assert!(names.contains(&"Python"));
        assert!(names.contains(&"Kubernetes"));
    }

    #[tokio::test]
    async fn run_drains_every_batch_while_budget_remains() {
        let store = Store::in_memory().await.unwrap();
        let company = store
            .insert_company(&NewCompany {
                name: "Acme".into(),
                ats_platform: AtsPlatform::Greenhouse,
                ats_slug: Some("acme".into()),
                industry: None,
            })
            .await
            .unwrap();
        for url in ["https://x/1", "https://x/2", "https://x/3"] {
            store
                .record_sighting(
                    company,
                    AtsPlatform::Greenhouse,
                    &RawPosting {
                        source_url: url.into(),
                        external_id: None,
                        title: "Backend Engineer".into(),
                        description: Some("Build APIs.".into()),
                        location_raw: None,
                        department: None,
                        posted_date: None,
                    },
                    ts("2026-08-10T08:00:00Z"),
                )
                .await
                .unwrap();
        }

        // batch_size 1: three postings take three batches, all in one run.
        let engine = ExtractionEngine::new(
            store.clone(),
            Arc::new(ScriptedModel::new(vec![
                Ok(GOOD_RESPONSE.to_string()),
                Ok(GOOD_RESPONSE.to_string()),
                Ok(GOOD_RESPONSE.to_string()),
            ])),
            SkillNormalizer::with_defaults(),
            ExtractConfig {
                batch_size: 1,
                ..ExtractConfig::default()
            },
        );
        let report = engine.run().await.unwrap();
        assert_eq!(report.examined, 3);
        assert_eq!(report.succeeded, 3);
        assert!(!report.halted_on_budget);
        assert!(store.extraction_candidates(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_responses_retry_then_flag_reparse_without_aborting() {
        let store = Store::in_memory().await.unwrap();
        let bad = seed_posting(&store, "https://x/bad").await;
        let good = seed_posting_second(&store).await;

        // One retry allowed: two bad responses burn the attempt budget for
        // the first posting, the good response serves the second.
        let engine = ExtractionEngine::new(
            store.clone(),
            Arc::new(ScriptedModel::new(vec![
                Ok("the posting did not specify a salary".to_string()),
                Ok("still not json".to_string()),
                Ok(GOOD_RESPONSE.to_string()),
            ])),
            SkillNormalizer::with_defaults(),
            ExtractConfig {
                backoff: BackoffPolicy {
                    max_retries: 1,
                    base_delay: std::time::Duration::from_millis(1),
                    max_delay: std::time::Duration::from_millis(2),
                },
                ..ExtractConfig::default()
            },
        );
        let report = engine.run().await.unwrap();
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.llm_calls, 3);

        assert!(store.get_posting(bad).await.unwrap().unwrap().needs_reparse);
        assert!(!store.get_posting(good).await.unwrap().unwrap().needs_reparse);
    }

    async fn seed_posting_second(store: &Store) -> i64 {
        let company = store
            .insert_company(&NewCompany {
                name: "Globex".into(),
                ats_platform: AtsPlatform::Lever,
                ats_slug: Some("globex".into()),
                industry: None,
            })
            .await
            .unwrap();
        store
            .record_sighting(
                company,
                AtsPlatform::Lever,
                &RawPosting {
                    source_url: "https://x/2".into(),
                    external_id: None,
                    title: "Engineer".into(),
                    description: Some("Ship things.".into()),
                    location_raw: None,
                    department: None,
                    posted_date: None,
                },
                ts("2026-08-10T09:00:00Z"),
            )
            .await
            .unwrap()
            .posting_id()
    }

    #[tokio::test]
    async fn budget_exhaustion_halts_the_batch() {
        let store = Store::in_memory().await.unwrap();
        seed_posting(&store, "https://x/1").await;
        seed_posting_second(&store).await;

        let model = ScriptedModel::new(vec![Ok(GOOD_RESPONSE.to_string())]);
        let engine = ExtractionEngine::new(
            store,
            Arc::new(model),
            SkillNormalizer::with_defaults(),
            ExtractConfig {
                // One scripted call costs 0.01; the meter trips after it.
                cost_budget_usd: 0.01,
                ..ExtractConfig::default()
            },
        );
        let report = engine.run().await.unwrap();
        assert_eq!(report.examined, 1);
        assert_eq!(report.succeeded, 1);
        assert!(report.halted_on_budget);
    }

    #[tokio::test]
    async fn transient_llm_errors_are_retried() {
        let store = Store::in_memory().await.unwrap();
        let posting_id = seed_posting(&store, "https://x/1").await;

        let engine = ExtractionEngine::new(
            store.clone(),
            Arc::new(ScriptedModel::new(vec![
                Err(LlmError::Api {
                    status: 529,
                    body: "overloaded".into(),
                }),
                Ok(GOOD_RESPONSE.to_string()),
            ])),
            SkillNormalizer::with_defaults(),
            ExtractConfig {
                backoff: BackoffPolicy {
                    max_retries: 3,
                    base_delay: std::time::Duration::from_millis(1),
                    max_delay: std::time::Duration::from_millis(2),
                },
                ..ExtractConfig::default()
            },
        );
        let report = engine.run().await.unwrap();
        assert_eq!(report.succeeded, 1);
        assert!(!store.get_posting(posting_id).await.unwrap().unwrap().needs_reparse);
    }
}
