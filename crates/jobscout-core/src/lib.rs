//! Core domain model and pure matching logic for Job Scout.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub mod normalize;
pub mod score;

pub use normalize::{NormalizedTitle, RoleAliases, SkillNormalizer};
pub use score::{score_posting, Profile, ScoreBreakdown, ScoreInputs, ScoreWeights};

pub const CRATE_NAME: &str = "jobscout-core";

/// ATS platform hosting a company's job board. Drives adapter selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AtsPlatform {
    Greenhouse,
    Lever,
    Workday,
    Custom,
    Unknown,
}

impl AtsPlatform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Greenhouse => "greenhouse",
            Self::Lever => "lever",
            Self::Workday => "workday",
            Self::Custom => "custom",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "greenhouse" => Self::Greenhouse,
            "lever" => Self::Lever,
            "workday" => Self::Workday,
            "custom" => Self::Custom,
            _ => Self::Unknown,
        }
    }
}

/// The posting status state machine.
///
/// Forward progression is expected but not enforced at the data layer; the
/// lifecycle manager only ever writes `Closed`, and only from the
/// not-yet-engaged subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostingStatus {
    New,
    Reviewing,
    Saved,
    Applied,
    PhoneScreen,
    Interview,
    Offer,
    Rejected,
    Withdrawn,
    Closed,
}

impl PostingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Reviewing => "reviewing",
            Self::Saved => "saved",
            Self::Applied => "applied",
            Self::PhoneScreen => "phone_screen",
            Self::Interview => "interview",
            Self::Offer => "offer",
            Self::Rejected => "rejected",
            Self::Withdrawn => "withdrawn",
            Self::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "new" => Self::New,
            "reviewing" => Self::Reviewing,
            "saved" => Self::Saved,
            "applied" => Self::Applied,
            "phone_screen" => Self::PhoneScreen,
            "interview" => Self::Interview,
            "offer" => Self::Offer,
            "rejected" => Self::Rejected,
            "withdrawn" => Self::Withdrawn,
            "closed" => Self::Closed,
            _ => return None,
        })
    }

    /// Statuses eligible for auto-closure when a posting goes stale.
    pub const CLOSABLE: [Self; 3] = [Self::New, Self::Reviewing, Self::Saved];

    /// Statuses that exempt a posting from the retention sweep.
    pub const PROTECTED: [Self; 4] = [
        Self::Applied,
        Self::PhoneScreen,
        Self::Interview,
        Self::Offer,
    ];
}

/// Seniority bands extracted from titles and descriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeniorityLevel {
    Junior,
    Mid,
    Senior,
    Staff,
    Principal,
    Lead,
    Manager,
    Director,
    Vp,
    CLevel,
}

impl SeniorityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Junior => "junior",
            Self::Mid => "mid",
            Self::Senior => "senior",
            Self::Staff => "staff",
            Self::Principal => "principal",
            Self::Lead => "lead",
            Self::Manager => "manager",
            Self::Director => "director",
            Self::Vp => "vp",
            Self::CLevel => "c_level",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "junior" => Self::Junior,
            "mid" => Self::Mid,
            "senior" => Self::Senior,
            "staff" => Self::Staff,
            "principal" => Self::Principal,
            "lead" => Self::Lead,
            "manager" => Self::Manager,
            "director" => Self::Director,
            "vp" => Self::Vp,
            "c_level" => Self::CLevel,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteType {
    Onsite,
    Hybrid,
    RemoteLocal,
    RemoteUs,
    RemoteGlobal,
}

impl RemoteType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Onsite => "onsite",
            Self::Hybrid => "hybrid",
            Self::RemoteLocal => "remote_local",
            Self::RemoteUs => "remote_us",
            Self::RemoteGlobal => "remote_global",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "onsite" => Self::Onsite,
            "hybrid" => Self::Hybrid,
            "remote_local" => Self::RemoteLocal,
            "remote_us" => Self::RemoteUs,
            "remote_global" => Self::RemoteGlobal,
            _ => return None,
        })
    }

    /// Any fully-remote band.
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::RemoteLocal | Self::RemoteUs | Self::RemoteGlobal)
    }
}

/// Whether a posting's employer sponsors the stated clearance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sponsorship {
    Yes,
    No,
    Unknown,
}

impl Sponsorship {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Yes => "yes",
            Self::No => "no",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "yes" => Self::Yes,
            "no" => Self::No,
            "unknown" => Self::Unknown,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SalaryType {
    Annual,
    Hourly,
}

impl SalaryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Annual => "annual",
            Self::Hourly => "hourly",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "annual" => Self::Annual,
            "hourly" => Self::Hourly,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequirementLevel {
    Required,
    Preferred,
}

impl RequirementLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Required => "required",
            Self::Preferred => "preferred",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "required" => Self::Required,
            "preferred" => Self::Preferred,
            _ => return None,
        })
    }
}

/// A company whose board we scrape. Created by operator action, never
/// auto-deleted; only `last_scraped_at` churns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Company {
    pub id: i64,
    pub name: String,
    pub ats_platform: AtsPlatform,
    pub ats_slug: Option<String>,
    pub industry: Option<String>,
    pub is_active: bool,
    pub last_scraped_at: Option<DateTime<Utc>>,
}

/// Adapter handoff record: one fetched posting before ingestion.
///
/// `source_url` is the dedup key; raw text is stored verbatim and never
/// overwritten on re-sighting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPosting {
    pub source_url: String,
    pub external_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub location_raw: Option<String>,
    pub department: Option<String>,
    pub posted_date: Option<NaiveDate>,
}

/// A stored posting: raw scrape fields plus LLM-derived fields.
///
/// Derived fields stay `None` until extraction succeeds. `needs_reparse`
/// marks a posting whose extraction failed or produced an inconsistent
/// record and should be retried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Posting {
    pub id: i64,
    pub company_id: i64,
    pub role_id: Option<i64>,

    pub source_url: String,
    pub source_site: AtsPlatform,
    pub external_id: Option<String>,

    pub raw_title: String,
    pub raw_description: Option<String>,
    pub content_hash: Option<String>,
    pub location_raw: Option<String>,
    pub department: Option<String>,
    pub posted_date: Option<NaiveDate>,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,

    pub normalized_title: Option<String>,
    pub seniority_level: Option<SeniorityLevel>,
    pub salary_min: Option<i64>,
    pub salary_max: Option<i64>,
    pub salary_type: Option<SalaryType>,
    pub salary_currency: Option<String>,
    pub experience_years_min: Option<i64>,
    pub experience_years_max: Option<i64>,
    pub education_requirement: Option<String>,

    pub location_city: Option<String>,
    pub location_state: Option<String>,
    pub location_country: Option<String>,
    pub remote_type: Option<RemoteType>,

    pub clearance_required: Option<String>,
    pub clearance_sponsorship: Option<Sponsorship>,

    pub team: Option<String>,
    pub benefits_summary: Option<Vec<String>>,
    pub red_flags: Option<Vec<String>>,

    pub match_score: Option<f64>,
    pub score_breakdown: Option<ScoreBreakdown>,

    pub status: PostingStatus,
    pub needs_reparse: bool,
}

impl Posting {
    /// True once extraction has populated derived fields.
    pub fn is_extracted(&self) -> bool {
        self.normalized_title.is_some()
    }
}

/// A canonical skill with its known aliases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Skill {
    pub id: i64,
    pub name: String,
    pub aliases: Vec<String>,
    pub category: Option<String>,
}

/// One skill mention on a posting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostingSkill {
    pub skill_name: String,
    pub requirement_level: RequirementLevel,
    pub years_requested: Option<i64>,
}

/// Outcome of one scrape attempt for one company. Append-only audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeLogEntry {
    pub company_id: i64,
    pub source_site: AtsPlatform,
    pub status: ScrapeOutcome,
    pub postings_found: u32,
    pub postings_new: u32,
    pub postings_updated: u32,
    pub error_message: Option<String>,
    pub duration_seconds: f64,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrapeOutcome {
    Success,
    Partial,
    Failed,
}

impl ScrapeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "success" => Self::Success,
            "partial" => Self::Partial,
            "failed" => Self::Failed,
            _ => return None,
        })
    }
}

/// Weekly aggregate for one target role. One row per (week_start, role);
/// re-aggregation upserts rather than duplicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklySnapshot {
    pub week_start: NaiveDate,
    pub role_id: i64,
    pub posting_count: u32,
    pub salary_min_avg: Option<f64>,
    pub salary_max_avg: Option<f64>,
    pub salary_min_median: Option<f64>,
    pub salary_max_median: Option<f64>,
    pub experience_min_avg: Option<f64>,
    pub experience_max_avg: Option<f64>,
    pub remote_count: u32,
    pub hybrid_count: u32,
    pub onsite_count: u32,
    pub top_required_skills: Vec<SkillFrequency>,
    pub top_preferred_skills: Vec<SkillFrequency>,
    pub emerging_skills: Vec<String>,
    pub declining_skills: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillFrequency {
    pub skill: String,
    pub count: u32,
}
