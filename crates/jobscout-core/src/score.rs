//! Posting-vs-profile scoring.
//!
//! Scoring is a pure function of posting inputs, profile, and weights.
//! Disqualification runs first and short-circuits to zero; no component
//! scores are computed for a disqualified posting.

use serde::{Deserialize, Serialize};

use crate::{RemoteType, Sponsorship};

/// Salary ceilings below this fraction of the profile minimum disqualify.
const SALARY_DISQUALIFY_FRACTION: f64 = 0.7;

/// The candidate profile the scorer matches against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Profile {
    /// Canonical skill names the candidate holds.
    #[serde(default)]
    pub skills: Vec<String>,
    pub minimum_salary: Option<i64>,
    pub years_experience: Option<f64>,
    #[serde(default)]
    pub preferred_remote_types: Vec<RemoteType>,
    #[serde(default)]
    pub excluded_industries: Vec<String>,
}

impl Profile {
    fn has_skill(&self, name: &str) -> bool {
        self.skills.iter().any(|s| s.eq_ignore_ascii_case(name))
    }
}

/// Component weights. Must sum to 1.0; [`ScoreWeights::validate`] checks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub required_skills: f64,
    pub preferred_skills: f64,
    pub salary_fit: f64,
    pub experience_fit: f64,
    pub clearance_eligible: f64,
    pub remote_fit: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            required_skills: 0.35,
            preferred_skills: 0.15,
            salary_fit: 0.20,
            experience_fit: 0.10,
            clearance_eligible: 0.10,
            remote_fit: 0.10,
        }
    }
}

impl ScoreWeights {
    pub fn validate(&self) -> Result<(), String> {
        let sum = self.required_skills
            + self.preferred_skills
            + self.salary_fit
            + self.experience_fit
            + self.clearance_eligible
            + self.remote_fit;
        if (sum - 1.0).abs() > 1e-6 {
            return Err(format!("score weights sum to {sum}, expected 1.0"));
        }
        Ok(())
    }
}

/// Persisted alongside the scalar score for auditability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub total: f64,
    pub disqualified: Option<String>,
    pub required_skills: f64,
    pub preferred_skills: f64,
    pub salary_fit: f64,
    pub experience_fit: f64,
    pub clearance_eligible: f64,
    pub remote_fit: f64,
}

impl ScoreBreakdown {
    fn disqualified(reason: String) -> Self {
        Self {
            total: 0.0,
            disqualified: Some(reason),
            required_skills: 0.0,
            preferred_skills: 0.0,
            salary_fit: 0.0,
            experience_fit: 0.0,
            clearance_eligible: 0.0,
            remote_fit: 0.0,
        }
    }
}

/// The posting-side facts the scorer reads. Skill names must already be
/// canonical so matching against the profile is a plain lookup.
#[derive(Debug, Clone, Default)]
pub struct ScoreInputs<'a> {
    pub required_skills: &'a [String],
    pub preferred_skills: &'a [String],
    pub salary_min: Option<i64>,
    pub salary_max: Option<i64>,
    pub experience_years_min: Option<i64>,
    pub experience_years_max: Option<i64>,
    pub clearance_required: Option<&'a str>,
    pub clearance_sponsorship: Option<Sponsorship>,
    pub remote_type: Option<RemoteType>,
    pub company_industry: Option<&'a str>,
}

fn check_disqualification(inputs: &ScoreInputs<'_>, profile: &Profile) -> Option<String> {
    if inputs.clearance_required.is_some()
        && inputs.clearance_sponsorship == Some(Sponsorship::No)
    {
        return Some("clearance required without sponsorship".to_string());
    }
    if let (Some(max), Some(target)) = (inputs.salary_max, profile.minimum_salary) {
        if (max as f64) < SALARY_DISQUALIFY_FRACTION * target as f64 {
            return Some(format!(
                "salary ceiling {max} below 70% of minimum {target}"
            ));
        }
    }
    if let Some(industry) = inputs.company_industry {
        if profile
            .excluded_industries
            .iter()
            .any(|e| e.eq_ignore_ascii_case(industry))
        {
            return Some(format!("excluded industry: {industry}"));
        }
    }
    None
}

fn skill_match_ratio(wanted: &[String], profile: &Profile) -> Option<f64> {
    if wanted.is_empty() {
        return None;
    }
    let matched = wanted.iter().filter(|s| profile.has_skill(s)).count();
    Some(matched as f64 / wanted.len() as f64)
}

fn salary_fit(inputs: &ScoreInputs<'_>, profile: &Profile) -> f64 {
    let Some(target) = profile.minimum_salary else {
        return 1.0;
    };
    match (inputs.salary_min, inputs.salary_max) {
        (None, None) => 0.5,
        (Some(min), _) if min >= target => 1.0,
        (_, Some(max)) if max < target => (max as f64 / target as f64).min(1.0),
        // Range straddles the target without the floor clearing it.
        _ => 0.7,
    }
}

fn experience_fit(inputs: &ScoreInputs<'_>, profile: &Profile) -> f64 {
    let Some(years) = profile.years_experience else {
        return 1.0;
    };
    let Some(required_min) = inputs.experience_years_min else {
        return 1.0;
    };
    if let Some(required_max) = inputs.experience_years_max {
        if years > required_max as f64 + 3.0 {
            return 0.5;
        }
    }
    if years >= required_min as f64 {
        return 1.0;
    }
    let gap = required_min as f64 - years;
    (1.0 - 0.2 * gap).max(0.0)
}

fn clearance_eligible(inputs: &ScoreInputs<'_>) -> f64 {
    if inputs.clearance_required.is_none() {
        return 1.0;
    }
    match inputs.clearance_sponsorship {
        Some(Sponsorship::Yes) => 0.9,
        Some(Sponsorship::No) => 0.0,
        Some(Sponsorship::Unknown) | None => 0.5,
    }
}

fn remote_fit(inputs: &ScoreInputs<'_>, profile: &Profile) -> f64 {
    match inputs.remote_type {
        Some(rt) if profile.preferred_remote_types.contains(&rt) => 1.0,
        Some(RemoteType::Hybrid) => 0.6,
        Some(RemoteType::Onsite) => 0.2,
        _ => 0.5,
    }
}

/// Score one posting. Identical inputs always produce the identical
/// breakdown.
pub fn score_posting(
    inputs: &ScoreInputs<'_>,
    profile: &Profile,
    weights: &ScoreWeights,
) -> ScoreBreakdown {
    if let Some(reason) = check_disqualification(inputs, profile) {
        return ScoreBreakdown::disqualified(reason);
    }

    let required = skill_match_ratio(inputs.required_skills, profile).unwrap_or(1.0);
    let preferred = skill_match_ratio(inputs.preferred_skills, profile).unwrap_or(0.5);
    let salary = salary_fit(inputs, profile);
    let experience = experience_fit(inputs, profile);
    let clearance = clearance_eligible(inputs);
    let remote = remote_fit(inputs, profile);

    let total = required * weights.required_skills
        + preferred * weights.preferred_skills
        + salary * weights.salary_fit
        + experience * weights.experience_fit
        + clearance * weights.clearance_eligible
        + remote * weights.remote_fit;

    ScoreBreakdown {
        total,
        disqualified: None,
        required_skills: required,
        preferred_skills: preferred,
        salary_fit: salary,
        experience_fit: experience,
        clearance_eligible: clearance,
        remote_fit: remote,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> Profile {
        Profile {
            skills: vec!["Python".into(), "Kubernetes".into(), "Postgresql".into()],
            minimum_salary: Some(150_000),
            years_experience: Some(8.0),
            preferred_remote_types: vec![RemoteType::RemoteUs, RemoteType::RemoteGlobal],
            excluded_industries: vec!["gambling".into()],
        }
    }

    #[test]
    fn strong_match_scores_the_expected_components() {
        let required = vec!["Python".to_string(), "Kubernetes".to_string()];
        let inputs = ScoreInputs {
            required_skills: &required,
            salary_min: Some(160_000),
            remote_type: Some(RemoteType::RemoteUs),
            ..Default::default()
        };
        let b = score_posting(&inputs, &profile(), &ScoreWeights::default());
        assert_eq!(b.disqualified, None);
        assert_eq!(b.required_skills, 1.0);
        assert_eq!(b.salary_fit, 1.0);
        assert_eq!(b.clearance_eligible, 1.0);
        assert_eq!(b.remote_fit, 1.0);
        // 0.35 + 0.20 + 0.10 + 0.10 from those four components alone.
        assert!(b.total >= 0.75);
    }

    #[test]
    fn clearance_without_sponsorship_disqualifies() {
        let inputs = ScoreInputs {
            clearance_required: Some("secret"),
            clearance_sponsorship: Some(Sponsorship::No),
            salary_min: Some(200_000),
            ..Default::default()
        };
        let b = score_posting(&inputs, &profile(), &ScoreWeights::default());
        assert_eq!(b.total, 0.0);
        assert!(b.disqualified.is_some());
    }

    #[test]
    fn low_salary_ceiling_disqualifies() {
        let inputs = ScoreInputs {
            salary_max: Some(100_000),
            ..Default::default()
        };
        let b = score_posting(&inputs, &profile(), &ScoreWeights::default());
        assert_eq!(b.total, 0.0);
        assert!(b.disqualified.as_deref().unwrap().contains("salary"));
    }

    #[test]
    fn excluded_industry_disqualifies() {
        let inputs = ScoreInputs {
            company_industry: Some("Gambling"),
            ..Default::default()
        };
        let b = score_posting(&inputs, &profile(), &ScoreWeights::default());
        assert!(b.disqualified.as_deref().unwrap().contains("industry"));
    }

    #[test]
    fn salary_fit_bands() {
        let p = profile();
        let w = ScoreWeights::default();

        let no_data = score_posting(&ScoreInputs::default(), &p, &w);
        assert_eq!(no_data.salary_fit, 0.5);

        // Ceiling between 70% and 100% of the target: proportional.
        let low = ScoreInputs {
            salary_max: Some(120_000),
            ..Default::default()
        };
        let b = score_posting(&low, &p, &w);
        assert!((b.salary_fit - 0.8).abs() < 1e-9);

        // Floor below target, ceiling above: ambiguous overlap.
        let overlap = ScoreInputs {
            salary_min: Some(130_000),
            salary_max: Some(180_000),
            ..Default::default()
        };
        assert_eq!(score_posting(&overlap, &p, &w).salary_fit, 0.7);
    }

    #[test]
    fn experience_gap_decays_by_fifths() {
        let p = Profile {
            years_experience: Some(3.0),
            ..Default::default()
        };
        let w = ScoreWeights::default();
        let inputs = ScoreInputs {
            experience_years_min: Some(5),
            ..Default::default()
        };
        let b = score_posting(&inputs, &p, &w);
        assert!((b.experience_fit - 0.6).abs() < 1e-9);

        // Overqualified by more than three years over the max.
        let senior = Profile {
            years_experience: Some(12.0),
            ..Default::default()
        };
        let bounded = ScoreInputs {
            experience_years_min: Some(3),
            experience_years_max: Some(5),
            ..Default::default()
        };
        assert_eq!(score_posting(&bounded, &senior, &w).experience_fit, 0.5);
    }

    #[test]
    fn rescoring_is_deterministic() {
        let required = vec!["Python".to_string()];
        let inputs = ScoreInputs {
            required_skills: &required,
            salary_min: Some(155_000),
            experience_years_min: Some(5),
            remote_type: Some(RemoteType::Hybrid),
            ..Default::default()
        };
        let p = profile();
        let w = ScoreWeights::default();
        let first = score_posting(&inputs, &p, &w);
        let second = score_posting(&inputs, &p, &w);
        assert_eq!(first, second);
    }

    #[test]
    fn all_components_stay_in_unit_interval() {
        let required = vec!["Cobol".to_string(), "Fortran".to_string()];
        let inputs = ScoreInputs {
            required_skills: &required,
            salary_min: Some(151_000),
            experience_years_min: Some(20),
            clearance_required: Some("ts/sci"),
            remote_type: Some(RemoteType::Onsite),
            ..Default::default()
        };
        let b = score_posting(&inputs, &profile(), &ScoreWeights::default());
        for c in [
            b.required_skills,
            b.preferred_skills,
            b.salary_fit,
            b.experience_fit,
            b.clearance_eligible,
            b.remote_fit,
            b.total,
        ] {
            assert!((0.0..=1.0).contains(&c), "component {c} out of range");
        }
    }

    #[test]
    fn weight_validation_catches_bad_sums() {
        let mut w = ScoreWeights::default();
        assert!(w.validate().is_ok());
        w.salary_fit = 0.5;
        assert!(w.validate().is_err());
    }
}
