//! The extraction response contract and its validation rules.
//!
//! The model returns loosely-typed JSON; enum-like fields arrive as
//! strings so a bad value degrades that one field to null instead of
//! failing the record. Range inconsistencies are record-level failures
//! because they signal the model misread the posting.

use jobscout_core::{RemoteType, SalaryType, SeniorityLevel, Sponsorship};
use jobscout_storage::ExtractedFields;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ExtractionPayload {
    pub normalized_title: Option<String>,
    pub seniority_level: Option<String>,
    pub salary_min: Option<i64>,
    pub salary_max: Option<i64>,
    pub salary_type: Option<String>,
    pub salary_currency: Option<String>,
    pub experience_years_min: Option<i64>,
    pub experience_years_max: Option<i64>,
    pub education_requirement: Option<String>,
    pub location_city: Option<String>,
    pub location_state: Option<String>,
    pub location_country: Option<String>,
    pub remote_type: Option<String>,
    pub clearance_required: Option<String>,
    pub clearance_sponsorship: Option<String>,
    pub team: Option<String>,
    #[serde(default)]
    pub benefits: Option<Vec<String>>,
    #[serde(default)]
    pub red_flags: Option<Vec<String>>,
    #[serde(default)]
    pub required_skills: Vec<SkillMention>,
    #[serde(default)]
    pub preferred_skills: Vec<SkillMention>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SkillMention {
    pub name: String,
    #[serde(default)]
    pub years: Option<i64>,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("response is not valid JSON: {0}")]
    Json(String),
    #[error("normalized_title is missing")]
    MissingTitle,
    #[error("salary_min {min} exceeds salary_max {max}")]
    SalaryOrder { min: i64, max: i64 },
    #[error("experience_years_min {min} exceeds experience_years_max {max}")]
    ExperienceOrder { min: i64, max: i64 },
}

/// Parse model output as a payload, tolerating a markdown code fence
/// around the JSON.
pub fn parse_payload(text: &str) -> Result<ExtractionPayload, ValidationError> {
    let trimmed = text.trim();
    let body = if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        &trimmed[start..=end]
    } else {
        trimmed
    };
    serde_json::from_str(body).map_err(|e| ValidationError::Json(e.to_string()))
}

/// Validated result: typed fields plus the raw skill mentions, which the
/// engine still has to normalize.
#[derive(Debug, Clone)]
pub struct ValidatedExtraction {
    pub fields: ExtractedFields,
    pub required_skills: Vec<SkillMention>,
    pub preferred_skills: Vec<SkillMention>,
}

fn lenient<T>(raw: Option<&String>, parse: impl Fn(&str) -> Option<T>, field: &str) -> Option<T> {
    let raw = raw?;
    let parsed = parse(raw);
    if parsed.is_none() {
        debug!(field, value = raw.as_str(), "enum value outside contract, dropping field");
    }
    parsed
}

pub fn validate(payload: ExtractionPayload) -> Result<ValidatedExtraction, ValidationError> {
    let normalized_title = payload
        .normalized_title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(ValidationError::MissingTitle)?
        .to_string();

    if let (Some(min), Some(max)) = (payload.salary_min, payload.salary_max) {
        if min > max {
            return Err(ValidationError::SalaryOrder { min, max });
        }
    }
    if let (Some(min), Some(max)) = (payload.experience_years_min, payload.experience_years_max) {
        if min > max {
            return Err(ValidationError::ExperienceOrder { min, max });
        }
    }

    let salary_type = lenient(payload.salary_type.as_ref(), SalaryType::parse, "salary_type");

    // The prompt asks for annual figures (hourly x2080). An hourly range
    // that came back unconverted is rejected outright rather than guessed
    // at.
    let (salary_min, salary_max, salary_type, salary_currency) =
        if salary_type == Some(SalaryType::Hourly) {
            debug!("unconverted hourly salary, dropping salary fields");
            (None, None, None, None)
        } else {
            (
                payload.salary_min,
                payload.salary_max,
                salary_type,
                payload.salary_currency,
            )
        };

    Ok(ValidatedExtraction {
        fields: ExtractedFields {
            normalized_title,
            seniority_level: lenient(
                payload.seniority_level.as_ref(),
                SeniorityLevel::parse,
                "seniority_level",
            ),
            salary_min,
            salary_max,
            salary_type,
            salary_currency,
            experience_years_min: payload.experience_years_min,
            experience_years_max: payload.experience_years_max,
            education_requirement: payload.education_requirement,
            location_city: payload.location_city,
            location_state: payload.location_state,
            location_country: payload.location_country,
            remote_type: lenient(payload.remote_type.as_ref(), RemoteType::parse, "remote_type"),
            clearance_required: payload.clearance_required,
            clearance_sponsorship: lenient(
                payload.clearance_sponsorship.as_ref(),
                Sponsorship::parse,
                "clearance_sponsorship",
            ),
            team: payload.team,
            benefits_summary: payload.benefits,
            red_flags: payload.red_flags,
        },
        required_skills: payload.required_skills,
        preferred_skills: payload.preferred_skills,
    })
}
