//! The relational store: companies, postings, skills, roles, profile,
//! weekly snapshots, and the scrape audit log.
//!
//! All domain enums live in TEXT columns; decoding failures surface as
//! [`StoreError::Corrupt`] rather than panics so one bad row never takes
//! down a pipeline run.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use jobscout_core::{
    AtsPlatform, Company, Posting, PostingSkill, PostingStatus, Profile, RawPosting,
    RemoteType, RequirementLevel, RoleAliases, SalaryType, ScoreBreakdown, ScrapeLogEntry,
    SeniorityLevel, Skill, SkillFrequency, Sponsorship, WeeklySnapshot,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use thiserror::Error;
use tracing::debug;

use crate::content_hash;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("corrupt value {value:?} in column {column}")]
    Corrupt { column: &'static str, value: String },
    #[error("json decode in column {column}: {source}")]
    Json {
        column: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

fn corrupt(column: &'static str, value: impl Into<String>) -> StoreError {
    StoreError::Corrupt {
        column,
        value: value.into(),
    }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS companies (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    ats_platform TEXT NOT NULL,
    ats_slug TEXT,
    industry TEXT,
    is_active INTEGER NOT NULL DEFAULT 1,
    last_scraped_at TEXT
);

CREATE TABLE IF NOT EXISTS postings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    company_id INTEGER NOT NULL REFERENCES companies(id),
    role_id INTEGER REFERENCES roles(id),
    source_url TEXT NOT NULL UNIQUE,
    source_site TEXT NOT NULL,
    external_id TEXT,
    raw_title TEXT NOT NULL,
    raw_description TEXT,
    content_hash TEXT,
    location_raw TEXT,
    department TEXT,
    posted_date TEXT,
    first_seen_at TEXT NOT NULL,
    last_seen_at TEXT NOT NULL,
    normalized_title TEXT,
    seniority_level TEXT,
    salary_min INTEGER,
    salary_max INTEGER,
    salary_type TEXT,
    salary_currency TEXT,
    experience_years_min INTEGER,
    experience_years_max INTEGER,
    education_requirement TEXT,
    location_city TEXT,
    location_state TEXT,
    location_country TEXT,
    remote_type TEXT,
    clearance_required TEXT,
    clearance_sponsorship TEXT,
    team TEXT,
    benefits_summary TEXT,
    red_flags TEXT,
    match_score REAL,
    score_breakdown TEXT,
    status TEXT NOT NULL DEFAULT 'new',
    needs_reparse INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_postings_status ON postings(status);
CREATE INDEX IF NOT EXISTS idx_postings_company ON postings(company_id);
CREATE INDEX IF NOT EXISTS idx_postings_role ON postings(role_id);

CREATE TABLE IF NOT EXISTS skills (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    aliases TEXT NOT NULL DEFAULT '[]',
    category TEXT
);

CREATE TABLE IF NOT EXISTS posting_skills (
    posting_id INTEGER NOT NULL REFERENCES postings(id) ON DELETE CASCADE,
    skill_id INTEGER NOT NULL REFERENCES skills(id),
    requirement_level TEXT NOT NULL,
    years_requested INTEGER,
    UNIQUE(posting_id, skill_id, requirement_level)
);

CREATE TABLE IF NOT EXISTS roles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    aliases TEXT NOT NULL DEFAULT '[]'
);

CREATE TABLE IF NOT EXISTS profile (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS weekly_snapshots (
    week_start TEXT NOT NULL,
    role_id INTEGER NOT NULL REFERENCES roles(id),
    posting_count INTEGER NOT NULL,
    salary_min_avg REAL,
    salary_max_avg REAL,
    salary_min_median REAL,
    salary_max_median REAL,
    experience_min_avg REAL,
    experience_max_avg REAL,
    remote_count INTEGER NOT NULL,
    hybrid_count INTEGER NOT NULL,
    onsite_count INTEGER NOT NULL,
    top_required_skills TEXT NOT NULL,
    top_preferred_skills TEXT NOT NULL,
    emerging_skills TEXT NOT NULL,
    declining_skills TEXT NOT NULL,
    UNIQUE(week_start, role_id)
);

CREATE TABLE IF NOT EXISTS scrape_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    company_id INTEGER NOT NULL REFERENCES companies(id),
    source_site TEXT NOT NULL,
    status TEXT NOT NULL,
    postings_found INTEGER NOT NULL,
    postings_new INTEGER NOT NULL,
    postings_updated INTEGER NOT NULL,
    error_message TEXT,
    duration_seconds REAL NOT NULL,
    started_at TEXT NOT NULL
);
"#;

/// Inputs for registering a company to scrape.
#[derive(Debug, Clone)]
pub struct NewCompany {
    pub name: String,
    pub ats_platform: AtsPlatform,
    pub ats_slug: Option<String>,
    pub industry: Option<String>,
}

/// Result of recording one scrape sighting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SightingOutcome {
    /// First time this source URL was seen.
    Inserted(i64),
    /// Already known; last_seen_at refreshed.
    Refreshed(i64),
}

impl SightingOutcome {
    pub fn posting_id(&self) -> i64 {
        match self {
            Self::Inserted(id) | Self::Refreshed(id) => *id,
        }
    }
}

/// Derived fields written back after a successful extraction.
#[derive(Debug, Clone, Default)]
pub struct ExtractedFields {
    pub normalized_title: String,
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
}

/// One skill mention to link to a posting, already canonicalized.
#[derive(Debug, Clone)]
pub struct SkillLink {
    pub skill: String,
    pub category: Option<String>,
    pub requirement_level: RequirementLevel,
    pub years_requested: Option<i64>,
}

/// A posting plus the context the scorer needs.
#[derive(Debug, Clone)]
pub struct ScoringCandidate {
    pub posting: Posting,
    pub company_industry: Option<String>,
    pub skills: Vec<PostingSkill>,
}

#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if missing) the database at `url` and apply the schema.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// In-memory database for tests. Single connection so all queries see
    /// the same data.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        debug!("schema applied");
        Ok(())
    }

    // ----- companies -----

    pub async fn insert_company(&self, company: &NewCompany) -> Result<i64, StoreError> {
        let result = sqlx::query(
            "INSERT INTO companies (name, ats_platform, ats_slug, industry) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(&company.name)
        .bind(company.ats_platform.as_str())
        .bind(&company.ats_slug)
        .bind(&company.industry)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn list_active_companies(&self) -> Result<Vec<Company>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, name, ats_platform, ats_slug, industry, is_active, last_scraped_at \
             FROM companies WHERE is_active = 1 ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(company_from_row).collect()
    }

    pub async fn get_company(&self, id: i64) -> Result<Option<Company>, StoreError> {
        let row = sqlx::query(
            "SELECT id, name, ats_platform, ats_slug, industry, is_active, last_scraped_at \
             FROM companies WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(company_from_row).transpose()
    }

    pub async fn mark_company_scraped(
        &self,
        company_id: i64,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE companies SET last_scraped_at = ? WHERE id = ?")
            .bind(at)
            .bind(company_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ----- postings -----

    /// Record one scrape sighting. The source URL is the dedup key: the
    /// first sighting inserts a fresh `new` posting, every later one only
    /// refreshes `last_seen_at`. Raw text is never overwritten.
    pub async fn record_sighting(
        &self,
        company_id: i64,
        source_site: AtsPlatform,
        raw: &RawPosting,
        now: DateTime<Utc>,
    ) -> Result<SightingOutcome, StoreError> {
        let existing: Option<i64> =
            sqlx::query_scalar("SELECT id FROM postings WHERE source_url = ?")
                .bind(&raw.source_url)
                .fetch_optional(&self.pool)
                .await?;

        if let Some(id) = existing {
            sqlx::query("UPDATE postings SET last_seen_at = ? WHERE id = ?")
                .bind(now)
                .bind(id)
                .execute(&self.pool)
                .await?;
            return Ok(SightingOutcome::Refreshed(id));
        }

        let hash = content_hash(&raw.title, raw.description.as_deref());
        let result = sqlx::query(
            "INSERT INTO postings (company_id, source_url, source_site, external_id, \
             raw_title, raw_description, content_hash, location_raw, department, \
             posted_date, first_seen_at, last_seen_at, status) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'new')",
        )
        .bind(company_id)
        .bind(&raw.source_url)
        .bind(source_site.as_str())
        .bind(&raw.external_id)
        .bind(&raw.title)
        .bind(&raw.description)
        .bind(&hash)
        .bind(&raw.location_raw)
        .bind(&raw.department)
        .bind(raw.posted_date)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(SightingOutcome::Inserted(result.last_insert_rowid()))
    }

    pub async fn get_posting(&self, id: i64) -> Result<Option<Posting>, StoreError> {
        let row = sqlx::query(&format!("{POSTING_SELECT} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(posting_from_row).transpose()
    }

    /// Postings awaiting extraction: never extracted, or flagged for
    /// reparse. Closed postings are skipped.
    pub async fn extraction_candidates(&self, limit: i64) -> Result<Vec<Posting>, StoreError> {
        let rows = sqlx::query(&format!(
            "{POSTING_SELECT} WHERE (normalized_title IS NULL OR needs_reparse = 1) \
             AND status != 'closed' ORDER BY needs_reparse, first_seen_at LIMIT ?"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(posting_from_row).collect()
    }

    /// Write derived fields and replace the posting's skill links. Clears
    /// `needs_reparse` and any stale score so the scorer revisits it.
    pub async fn apply_extraction(
        &self,
        posting_id: i64,
        fields: &ExtractedFields,
        skills: &[SkillLink],
    ) -> Result<(), StoreError> {
        let benefits = fields
            .benefits_summary
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StoreError::Json {
                column: "benefits_summary",
                source: e,
            })?;
        let red_flags = fields
            .red_flags
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StoreError::Json {
                column: "red_flags",
                source: e,
            })?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE postings SET normalized_title = ?, seniority_level = ?, \
             salary_min = ?, salary_max = ?, salary_type = ?, salary_currency = ?, \
             experience_years_min = ?, experience_years_max = ?, education_requirement = ?, \
             location_city = ?, location_state = ?, location_country = ?, remote_type = ?, \
             clearance_required = ?, clearance_sponsorship = ?, team = ?, \
             benefits_summary = ?, red_flags = ?, needs_reparse = 0, \
             match_score = NULL, score_breakdown = NULL \
             WHERE id = ?",
        )
        .bind(&fields.normalized_title)
        .bind(fields.seniority_level.map(|s| s.as_str()))
        .bind(fields.salary_min)
        .bind(fields.salary_max)
        .bind(fields.salary_type.map(|s| s.as_str()))
        .bind(&fields.salary_currency)
        .bind(fields.experience_years_min)
        .bind(fields.experience_years_max)
        .bind(&fields.education_requirement)
        .bind(&fields.location_city)
        .bind(&fields.location_state)
        .bind(&fields.location_country)
        .bind(fields.remote_type.map(|r| r.as_str()))
        .bind(&fields.clearance_required)
        .bind(fields.clearance_sponsorship.map(|s| s.as_str()))
        .bind(&fields.team)
        .bind(benefits)
        .bind(red_flags)
        .bind(posting_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM posting_skills WHERE posting_id = ?")
            .bind(posting_id)
            .execute(&mut *tx)
            .await?;

        for link in skills {
            sqlx::query("INSERT INTO skills (name, category) VALUES (?, ?) ON CONFLICT(name) DO NOTHING")
                .bind(&link.skill)
                .bind(&link.category)
                .execute(&mut *tx)
                .await?;
            let skill_id: i64 = sqlx::query_scalar("SELECT id FROM skills WHERE name = ?")
                .bind(&link.skill)
                .fetch_one(&mut *tx)
                .await?;
            sqlx::query(
                "INSERT INTO posting_skills (posting_id, skill_id, requirement_level, years_requested) \
                 VALUES (?, ?, ?, ?) \
                 ON CONFLICT(posting_id, skill_id, requirement_level) DO UPDATE SET \
                 years_requested = excluded.years_requested",
            )
            .bind(posting_id)
            .bind(skill_id)
            .bind(link.requirement_level.as_str())
            .bind(link.years_requested)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Flag a posting whose extraction failed or came back inconsistent.
    pub async fn flag_needs_reparse(&self, posting_id: i64) -> Result<(), StoreError> {
        sqlx::query("UPDATE postings SET needs_reparse = 1 WHERE id = ?")
            .bind(posting_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn skills_for_posting(
        &self,
        posting_id: i64,
    ) -> Result<Vec<PostingSkill>, StoreError> {
        let rows = sqlx::query(
            "SELECT s.name, ps.requirement_level, ps.years_requested \
             FROM posting_skills ps JOIN skills s ON s.id = ps.skill_id \
             WHERE ps.posting_id = ? ORDER BY s.name",
        )
        .bind(posting_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                let level: String = row.try_get("requirement_level")?;
                Ok(PostingSkill {
                    skill_name: row.try_get("name")?,
                    requirement_level: RequirementLevel::parse(&level)
                        .ok_or_else(|| corrupt("requirement_level", level))?,
                    years_requested: row.try_get("years_requested")?,
                })
            })
            .collect()
    }

    /// Register a canonical skill with its aliases, merging on name.
    pub async fn upsert_skill(
        &self,
        name: &str,
        aliases: &[String],
        category: Option<&str>,
    ) -> Result<i64, StoreError> {
        let aliases_json = json_column(&aliases, "aliases")?;
        sqlx::query(
            "INSERT INTO skills (name, aliases, category) VALUES (?, ?, ?) \
             ON CONFLICT(name) DO UPDATE SET aliases = excluded.aliases, \
             category = COALESCE(excluded.category, skills.category)",
        )
        .bind(name)
        .bind(aliases_json)
        .bind(category)
        .execute(&self.pool)
        .await?;
        let id: i64 = sqlx::query_scalar("SELECT id FROM skills WHERE name = ?")
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        Ok(id)
    }

    pub async fn list_skills(&self) -> Result<Vec<Skill>, StoreError> {
        let rows = sqlx::query("SELECT id, name, aliases, category FROM skills ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                Ok(Skill {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                    aliases: decode_json(row.try_get("aliases")?, "aliases")?
                        .unwrap_or_default(),
                    category: row.try_get("category")?,
                })
            })
            .collect()
    }

    /// Extracted postings that have never been scored, with the context
    /// the scorer needs.
    pub async fn scoring_candidates(&self) -> Result<Vec<ScoringCandidate>, StoreError> {
        let rows = sqlx::query(
            "SELECT p.*, c.industry AS company_industry FROM postings p \
             JOIN companies c ON c.id = p.company_id \
             WHERE p.match_score IS NULL AND p.normalized_title IS NOT NULL \
             AND p.needs_reparse = 0 ORDER BY p.id",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let posting = posting_from_row(row)?;
            let skills = self.skills_for_posting(posting.id).await?;
            out.push(ScoringCandidate {
                company_industry: row.try_get("company_industry")?,
                posting,
                skills,
            });
        }
        Ok(out)
    }

    pub async fn store_score(
        &self,
        posting_id: i64,
        breakdown: &ScoreBreakdown,
    ) -> Result<(), StoreError> {
        let json = serde_json::to_string(breakdown).map_err(|e| StoreError::Json {
            column: "score_breakdown",
            source: e,
        })?;
        sqlx::query("UPDATE postings SET match_score = ?, score_breakdown = ? WHERE id = ?")
            .bind(breakdown.total)
            .bind(json)
            .bind(posting_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Wipe all scores so the next run re-scores everything. Used after a
    /// profile or weight change.
    pub async fn clear_scores(&self) -> Result<u64, StoreError> {
        let result =
            sqlx::query("UPDATE postings SET match_score = NULL, score_breakdown = NULL")
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    pub async fn set_posting_role(
        &self,
        posting_id: i64,
        role_id: Option<i64>,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE postings SET role_id = ? WHERE id = ?")
            .bind(role_id)
            .bind(posting_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_posting_status(
        &self,
        posting_id: i64,
        status: PostingStatus,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE postings SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(posting_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Freshly-scored postings worth surfacing: still `new`, at or above
    /// the notification threshold.
    pub async fn high_match_new_postings(
        &self,
        min_score: f64,
    ) -> Result<Vec<Posting>, StoreError> {
        let rows = sqlx::query(&format!(
            "{POSTING_SELECT} WHERE status = 'new' AND match_score >= ? \
             ORDER BY match_score DESC"
        ))
        .bind(min_score)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(posting_from_row).collect()
    }

    // ----- lifecycle -----

    /// Close stale not-yet-engaged postings. Returns the number closed.
    pub async fn close_stale(
        &self,
        now: DateTime<Utc>,
        staleness_days: i64,
    ) -> Result<u64, StoreError> {
        let cutoff = now - chrono::Duration::days(staleness_days);
        let result = sqlx::query(
            "UPDATE postings SET status = 'closed' \
             WHERE status IN ('new', 'reviewing', 'saved') AND last_seen_at < ?",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Delete postings past the retention window unless their status is
    /// protected. Skill links cascade. Returns the number deleted.
    pub async fn purge_expired(
        &self,
        now: DateTime<Utc>,
        retention_days: i64,
    ) -> Result<u64, StoreError> {
        let cutoff = now - chrono::Duration::days(retention_days);
        let result = sqlx::query(
            "DELETE FROM postings WHERE first_seen_at < ? \
             AND status NOT IN ('applied', 'phone_screen', 'interview', 'offer')",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    // ----- roles / profile -----

    pub async fn upsert_role(&self, name: &str, aliases: &[String]) -> Result<i64, StoreError> {
        let aliases_json = serde_json::to_string(aliases).map_err(|e| StoreError::Json {
            column: "aliases",
            source: e,
        })?;
        sqlx::query(
            "INSERT INTO roles (name, aliases) VALUES (?, ?) \
             ON CONFLICT(name) DO UPDATE SET aliases = excluded.aliases",
        )
        .bind(name)
        .bind(aliases_json)
        .execute(&self.pool)
        .await?;
        let id: i64 = sqlx::query_scalar("SELECT id FROM roles WHERE name = ?")
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        Ok(id)
    }

    pub async fn list_roles(&self) -> Result<Vec<RoleAliases>, StoreError> {
        let rows = sqlx::query("SELECT id, name, aliases FROM roles ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                let aliases_json: String = row.try_get("aliases")?;
                Ok(RoleAliases {
                    role_id: row.try_get("id")?,
                    name: row.try_get("name")?,
                    aliases: serde_json::from_str(&aliases_json).map_err(|e| {
                        StoreError::Json {
                            column: "aliases",
                            source: e,
                        }
                    })?,
                })
            })
            .collect()
    }

    pub async fn save_profile(&self, profile: &Profile) -> Result<(), StoreError> {
        let json = serde_json::to_string(profile).map_err(|e| StoreError::Json {
            column: "value",
            source: e,
        })?;
        sqlx::query(
            "INSERT INTO profile (key, value) VALUES ('profile', ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn load_profile(&self) -> Result<Option<Profile>, StoreError> {
        let json: Option<String> =
            sqlx::query_scalar("SELECT value FROM profile WHERE key = 'profile'")
                .fetch_optional(&self.pool)
                .await?;
        json.map(|j| {
            serde_json::from_str(&j).map_err(|e| StoreError::Json {
                column: "value",
                source: e,
            })
        })
        .transpose()
    }

    // ----- aggregation -----

    pub async fn upsert_snapshot(&self, snapshot: &WeeklySnapshot) -> Result<(), StoreError> {
        let top_required = json_column(&snapshot.top_required_skills, "top_required_skills")?;
        let top_preferred = json_column(&snapshot.top_preferred_skills, "top_preferred_skills")?;
        let emerging = json_column(&snapshot.emerging_skills, "emerging_skills")?;
        let declining = json_column(&snapshot.declining_skills, "declining_skills")?;

        sqlx::query(
            "INSERT INTO weekly_snapshots (week_start, role_id, posting_count, \
             salary_min_avg, salary_max_avg, salary_min_median, salary_max_median, \
             experience_min_avg, experience_max_avg, remote_count, hybrid_count, \
             onsite_count, top_required_skills, top_preferred_skills, emerging_skills, \
             declining_skills) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(week_start, role_id) DO UPDATE SET \
             posting_count = excluded.posting_count, \
             salary_min_avg = excluded.salary_min_avg, \
             salary_max_avg = excluded.salary_max_avg, \
             salary_min_median = excluded.salary_min_median, \
             salary_max_median = excluded.salary_max_median, \
             experience_min_avg = excluded.experience_min_avg, \
             experience_max_avg = excluded.experience_max_avg, \
             remote_count = excluded.remote_count, \
             hybrid_count = excluded.hybrid_count, \
             onsite_count = excluded.onsite_count, \
             top_required_skills = excluded.top_required_skills, \
             top_preferred_skills = excluded.top_preferred_skills, \
             emerging_skills = excluded.emerging_skills, \
             declining_skills = excluded.declining_skills",
        )
        .bind(snapshot.week_start)
        .bind(snapshot.role_id)
        .bind(snapshot.posting_count as i64)
        .bind(snapshot.salary_min_avg)
        .bind(snapshot.salary_max_avg)
        .bind(snapshot.salary_min_median)
        .bind(snapshot.salary_max_median)
        .bind(snapshot.experience_min_avg)
        .bind(snapshot.experience_max_avg)
        .bind(snapshot.remote_count as i64)
        .bind(snapshot.hybrid_count as i64)
        .bind(snapshot.onsite_count as i64)
        .bind(top_required)
        .bind(top_preferred)
        .bind(emerging)
        .bind(declining)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_snapshot(
        &self,
        week_start: NaiveDate,
        role_id: i64,
    ) -> Result<Option<WeeklySnapshot>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM weekly_snapshots WHERE week_start = ? AND role_id = ?",
        )
        .bind(week_start)
        .bind(role_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(snapshot_from_row).transpose()
    }

    pub async fn has_snapshots_for_week(&self, week_start: NaiveDate) -> Result<bool, StoreError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM weekly_snapshots WHERE week_start = ?")
                .bind(week_start)
                .fetch_one(&self.pool)
                .await?;
        Ok(count > 0)
    }

    /// Extracted postings for one role first seen on or after the cutoff.
    /// Re-sightings of older postings refresh `last_seen_at` but do not
    /// bring them back into the window.
    pub async fn postings_for_role_since(
        &self,
        role_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<Posting>, StoreError> {
        let rows = sqlx::query(&format!(
            "{POSTING_SELECT} WHERE role_id = ? AND first_seen_at >= ? \
             AND normalized_title IS NOT NULL"
        ))
        .bind(role_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(posting_from_row).collect()
    }

    /// Skill frequency among one role's postings first seen on or after
    /// the cutoff, at one requirement level, most common first.
    pub async fn skill_counts_for_role(
        &self,
        role_id: i64,
        since: DateTime<Utc>,
        level: RequirementLevel,
    ) -> Result<Vec<SkillFrequency>, StoreError> {
        let rows = sqlx::query(
            "SELECT s.name, COUNT(*) AS mentions \
             FROM posting_skills ps \
             JOIN skills s ON s.id = ps.skill_id \
             JOIN postings p ON p.id = ps.posting_id \
             WHERE p.role_id = ? AND p.first_seen_at >= ? AND ps.requirement_level = ? \
             GROUP BY s.name ORDER BY mentions DESC, s.name",
        )
        .bind(role_id)
        .bind(since)
        .bind(level.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(SkillFrequency {
                    skill: row.try_get("name")?,
                    count: row.try_get::<i64, _>("mentions")? as u32,
                })
            })
            .collect()
    }

    // ----- audit -----

    pub async fn record_scrape(&self, entry: &ScrapeLogEntry) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO scrape_log (company_id, source_site, status, postings_found, \
             postings_new, postings_updated, error_message, duration_seconds, started_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(entry.company_id)
        .bind(entry.source_site.as_str())
        .bind(entry.status.as_str())
        .bind(entry.postings_found as i64)
        .bind(entry.postings_new as i64)
        .bind(entry.postings_updated as i64)
        .bind(&entry.error_message)
        .bind(entry.duration_seconds)
        .bind(entry.started_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

const POSTING_SELECT: &str = "SELECT * FROM postings";

fn json_column<T: serde::Serialize>(
    value: &T,
    column: &'static str,
) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::Json { column, source: e })
}

fn decode_json<T: serde::de::DeserializeOwned>(
    raw: Option<String>,
    column: &'static str,
) -> Result<Option<T>, StoreError> {
    raw.map(|j| serde_json::from_str(&j).map_err(|e| StoreError::Json { column, source: e }))
        .transpose()
}

fn company_from_row(row: &SqliteRow) -> Result<Company, StoreError> {
    let platform: String = row.try_get("ats_platform")?;
    Ok(Company {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        ats_platform: AtsPlatform::parse(&platform),
        ats_slug: row.try_get("ats_slug")?,
        industry: row.try_get("industry")?,
        is_active: row.try_get("is_active")?,
        last_scraped_at: row.try_get("last_scraped_at")?,
    })
}

fn posting_from_row(row: &SqliteRow) -> Result<Posting, StoreError> {
    let source_site: String = row.try_get("source_site")?;
    let status: String = row.try_get("status")?;
    let seniority: Option<String> = row.try_get("seniority_level")?;
    let salary_type: Option<String> = row.try_get("salary_type")?;
    let remote_type: Option<String> = row.try_get("remote_type")?;
    let sponsorship: Option<String> = row.try_get("clearance_sponsorship")?;

    Ok(Posting {
        id: row.try_get("id")?,
        company_id: row.try_get("company_id")?,
        role_id: row.try_get("role_id")?,
        source_url: row.try_get("source_url")?,
        source_site: AtsPlatform::parse(&source_site),
        external_id: row.try_get("external_id")?,
        raw_title: row.try_get("raw_title")?,
        raw_description: row.try_get("raw_description")?,
        content_hash: row.try_get("content_hash")?,
        location_raw: row.try_get("location_raw")?,
        department: row.try_get("department")?,
        posted_date: row.try_get("posted_date")?,
        first_seen_at: row.try_get("first_seen_at")?,
        last_seen_at: row.try_get("last_seen_at")?,
        normalized_title: row.try_get("normalized_title")?,
        seniority_level: seniority
            .map(|s| SeniorityLevel::parse(&s).ok_or_else(|| corrupt("seniority_level", s)))
            .transpose()?,
        salary_min: row.try_get("salary_min")?,
        salary_max: row.try_get("salary_max")?,
        salary_type: salary_type
            .map(|s| SalaryType::parse(&s).ok_or_else(|| corrupt("salary_type", s)))
            .transpose()?,
        salary_currency: row.try_get("salary_currency")?,
        experience_years_min: row.try_get("experience_years_min")?,
        experience_years_max: row.try_get("experience_years_max")?,
        education_requirement: row.try_get("education_requirement")?,
        location_city: row.try_get("location_city")?,
        location_state: row.try_get("location_state")?,
        location_country: row.try_get("location_country")?,
        remote_type: remote_type
            .map(|s| RemoteType::parse(&s).ok_or_else(|| corrupt("remote_type", s)))
            .transpose()?,
        clearance_required: row.try_get("clearance_required")?,
        clearance_sponsorship: sponsorship
            .map(|s| Sponsorship::parse(&s).ok_or_else(|| corrupt("clearance_sponsorship", s)))
            .transpose()?,
        team: row.try_get("team")?,
        benefits_summary: decode_json(row.try_get("benefits_summary")?, "benefits_summary")?,
        red_flags: decode_json(row.try_get("red_flags")?, "red_flags")?,
        match_score: row.try_get("match_score")?,
        score_breakdown: decode_json(row.try_get("score_breakdown")?, "score_breakdown")?,
        status: PostingStatus::parse(&status).ok_or_else(|| corrupt("status", status))?,
        needs_reparse: row.try_get("needs_reparse")?,
    })
}

fn snapshot_from_row(row: &SqliteRow) -> Result<WeeklySnapshot, StoreError> {
    Ok(WeeklySnapshot {
        week_start: row.try_get("week_start")?,
        role_id: row.try_get("role_id")?,
        posting_count: row.try_get::<i64, _>("posting_count")? as u32,
        salary_min_avg: row.try_get("salary_min_avg")?,
        salary_max_avg: row.try_get("salary_max_avg")?,
        salary_min_median: row.try_get("salary_min_median")?,
        salary_max_median: row.try_get("salary_max_median")?,
        experience_min_avg: row.try_get("experience_min_avg")?,
        experience_max_avg: row.try_get("experience_max_avg")?,
        remote_count: row.try_get::<i64, _>("remote_count")? as u32,
        hybrid_count: row.try_get::<i64, _>("hybrid_count")? as u32,
        onsite_count: row.try_get::<i64, _>("onsite_count")? as u32,
        top_required_skills: decode_json(
            row.try_get("top_required_skills")?,
            "top_required_skills",
        )?
        .unwrap_or_default(),
        top_preferred_skills: decode_json(
            row.try_get("top_preferred_skills")?,
            "top_preferred_skills",
        )?
        .unwrap_or_default(),
        emerging_skills: decode_json(row.try_get("emerging_skills")?, "emerging_skills")?
            .unwrap_or_default(),
        declining_skills: decode_json(row.try_get("declining_skills")?, "declining_skills")?
            .unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn raw(url: &str, title: &str) -> RawPosting {
        RawPosting {
            source_url: url.to_string(),
            external_id: None,
            title: title.to_string(),
            description: Some("We are hiring.".to_string()),
            location_raw: Some("Remote - US".to_string()),
            department: None,
            posted_date: None,
        }
    }

    async fn seeded_company(store: &Store) -> i64 {
        store
            .insert_company(&NewCompany {
                name: "Acme".into(),
                ats_platform: AtsPlatform::Greenhouse,
                ats_slug: Some("acme".into()),
                industry: Some("aerospace".into()),
            })
            .await
            .unwrap()
    }

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[tokio::test]
    async fn repeated_sightings_refresh_instead_of_duplicating() {
        let store = Store::in_memory().await.unwrap();
        let company = seeded_company(&store).await;

        let t0 = ts("2026-08-01T08:00:00Z");
        let t1 = ts("2026-08-02T08:00:00Z");

        let first = store
            .record_sighting(company, AtsPlatform::Greenhouse, &raw("https://x/1", "Engineer"), t0)
            .await
            .unwrap();
        let second = store
            .record_sighting(company, AtsPlatform::Greenhouse, &raw("https://x/1", "Engineer"), t1)
            .await
            .unwrap();

        assert!(matches!(first, SightingOutcome::Inserted(_)));
        assert!(matches!(second, SightingOutcome::Refreshed(_)));
        assert_eq!(first.posting_id(), second.posting_id());

        let posting = store.get_posting(first.posting_id()).await.unwrap().unwrap();
        assert_eq!(posting.first_seen_at, t0);
        assert_eq!(posting.last_seen_at, t1);
        assert_eq!(posting.status, PostingStatus::New);
        assert!(posting.content_hash.is_some());
    }

    #[tokio::test]
    async fn extraction_writes_fields_and_clears_the_queue() {
        let store = Store::in_memory().await.unwrap();
        let company = seeded_company(&store).await;
        let outcome = store
            .record_sighting(
                company,
                AtsPlatform::Greenhouse,
                &raw("https://x/2", "Senior Engineer"),
                ts("2026-08-01T08:00:00Z"),
            )
            .await
            .unwrap();
        let id = outcome.posting_id();

        assert_eq!(store.extraction_candidates(10).await.unwrap().len(), 1);

        let fields = ExtractedFields {
            normalized_title: "Software Engineer".into(),
            seniority_level: Some(SeniorityLevel::Senior),
            salary_min: Some(150_000),
            salary_max: Some(190_000),
            salary_type: Some(SalaryType::Annual),
            remote_type: Some(RemoteType::RemoteUs),
            ..Default::default()
        };
        let skills = vec![
            SkillLink {
                skill: "Python".into(),
                category: Some("language".into()),
                requirement_level: RequirementLevel::Required,
                years_requested: Some(5),
            },
            SkillLink {
                skill: "Kubernetes".into(),
                category: None,
                requirement_level: RequirementLevel::Preferred,
                years_requested: None,
            },
        ];
        store.apply_extraction(id, &fields, &skills).await.unwrap();

        assert!(store.extraction_candidates(10).await.unwrap().is_empty());
        let posting = store.get_posting(id).await.unwrap().unwrap();
        assert_eq!(posting.normalized_title.as_deref(), Some("Software Engineer"));
        assert_eq!(posting.salary_max, Some(190_000));
        assert!(!posting.needs_reparse);

        let linked = store.skills_for_posting(id).await.unwrap();
        assert_eq!(linked.len(), 2);

        // Flagging for reparse puts it back in the queue.
        store.flag_needs_reparse(id).await.unwrap();
        assert_eq!(store.extraction_candidates(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn scoring_candidates_carry_industry_and_skills() {
        let store = Store::in_memory().await.unwrap();
        let company = seeded_company(&store).await;
        let id = store
            .record_sighting(
                company,
                AtsPlatform::Greenhouse,
                &raw("https://x/3", "Engineer"),
                ts("2026-08-01T08:00:00Z"),
            )
            .await
            .unwrap()
            .posting_id();
        store
            .apply_extraction(
                id,
                &ExtractedFields {
                    normalized_title: "Engineer".into(),
                    ..Default::default()
                },
                &[SkillLink {
                    skill: "Rust".into(),
                    category: None,
                    requirement_level: RequirementLevel::Required,
                    years_requested: None,
                }],
            )
            .await
            .unwrap();

        let candidates = store.scoring_candidates().await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].company_industry.as_deref(), Some("aerospace"));
        assert_eq!(candidates[0].skills[0].skill_name, "Rust");

        store
            .store_score(
                id,
                &jobscout_core::score::ScoreBreakdown {
                    total: 0.8,
                    disqualified: None,
                    required_skills: 1.0,
                    preferred_skills: 0.5,
                    salary_fit: 0.5,
                    experience_fit: 1.0,
                    clearance_eligible: 1.0,
                    remote_fit: 0.5,
                },
            )
            .await
            .unwrap();
        assert!(store.scoring_candidates().await.unwrap().is_empty());

        let posting = store.get_posting(id).await.unwrap().unwrap();
        assert_eq!(posting.match_score, Some(0.8));
        assert!(posting.score_breakdown.is_some());

        assert_eq!(store.clear_scores().await.unwrap(), 1);
        assert_eq!(store.scoring_candidates().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn closure_only_touches_stale_unengaged_postings() {
        let store = Store::in_memory().await.unwrap();
        let company = seeded_company(&store).await;
        let now = ts("2026-08-20T00:00:00Z");
        let stale = ts("2026-08-01T00:00:00Z");

        let fresh = store
            .record_sighting(company, AtsPlatform::Lever, &raw("https://x/f", "A"), now)
            .await
            .unwrap()
            .posting_id();
        let old_new = store
            .record_sighting(company, AtsPlatform::Lever, &raw("https://x/o", "B"), stale)
            .await
            .unwrap()
            .posting_id();
        let old_applied = store
            .record_sighting(company, AtsPlatform::Lever, &raw("https://x/a", "C"), stale)
            .await
            .unwrap()
            .posting_id();
        store
            .set_posting_status(old_applied, PostingStatus::Applied)
            .await
            .unwrap();

        let closed = store.close_stale(now, 7).await.unwrap();
        assert_eq!(closed, 1);
        assert_eq!(
            store.get_posting(fresh).await.unwrap().unwrap().status,
            PostingStatus::New
        );
        assert_eq!(
            store.get_posting(old_new).await.unwrap().unwrap().status,
            PostingStatus::Closed
        );
        assert_eq!(
            store.get_posting(old_applied).await.unwrap().unwrap().status,
            PostingStatus::Applied
        );
    }

    #[tokio::test]
    async fn retention_protects_engaged_postings() {
        let store = Store::in_memory().await.unwrap();
        let company = seeded_company(&store).await;
        let ancient = ts("2026-01-01T00:00:00Z");
        let now = ts("2026-08-20T00:00:00Z");

        let expired = store
            .record_sighting(company, AtsPlatform::Lever, &raw("https://x/e", "A"), ancient)
            .await
            .unwrap()
            .posting_id();
        let interviewed = store
            .record_sighting(company, AtsPlatform::Lever, &raw("https://x/i", "B"), ancient)
            .await
            .unwrap()
            .posting_id();
        store
            .set_posting_status(interviewed, PostingStatus::Interview)
            .await
            .unwrap();

        let purged = store.purge_expired(now, 90).await.unwrap();
        assert_eq!(purged, 1);
        assert!(store.get_posting(expired).await.unwrap().is_none());
        assert!(store.get_posting(interviewed).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn snapshot_upsert_overwrites_rather_than_duplicates() {
        let store = Store::in_memory().await.unwrap();
        let role = store.upsert_role("Backend Engineer", &[]).await.unwrap();
        let week = NaiveDate::from_ymd_opt(2026, 8, 17).unwrap();

        let mut snapshot = WeeklySnapshot {
            week_start: week,
            role_id: role,
            posting_count: 5,
            salary_min_avg: Some(140_000.0),
            salary_max_avg: Some(180_000.0),
            salary_min_median: Some(138_000.0),
            salary_max_median: Some(175_000.0),
            experience_min_avg: Some(4.0),
            experience_max_avg: Some(8.0),
            remote_count: 3,
            hybrid_count: 1,
            onsite_count: 1,
            top_required_skills: vec![SkillFrequency {
                skill: "Python".into(),
                count: 4,
            }],
            top_preferred_skills: vec![],
            emerging_skills: vec!["Rust".into()],
            declining_skills: vec![],
        };
        store.upsert_snapshot(&snapshot).await.unwrap();

        snapshot.posting_count = 7;
        store.upsert_snapshot(&snapshot).await.unwrap();

        let loaded = store.get_snapshot(week, role).await.unwrap().unwrap();
        assert_eq!(loaded.posting_count, 7);
        assert_eq!(loaded.top_required_skills[0].skill, "Python");
        assert!(store.has_snapshots_for_week(week).await.unwrap());
        assert!(!store
            .has_snapshots_for_week(NaiveDate::from_ymd_opt(2026, 8, 24).unwrap())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn profile_round_trips() {
        let store = Store::in_memory().await.unwrap();
        assert!(store.load_profile().await.unwrap().is_none());

        let profile = Profile {
            skills: vec!["Python".into()],
            minimum_salary: Some(150_000),
            years_experience: Some(8.0),
            preferred_remote_types: vec![RemoteType::RemoteUs],
            excluded_industries: vec!["gambling".into()],
        };
        store.save_profile(&profile).await.unwrap();
        assert_eq!(store.load_profile().await.unwrap(), Some(profile));
    }

    #[tokio::test]
    async fn scrape_log_accepts_entries() {
        let store = Store::in_memory().await.unwrap();
        let company = seeded_company(&store).await;
        store
            .record_scrape(&ScrapeLogEntry {
                company_id: company,
                source_site: AtsPlatform::Greenhouse,
                status: jobscout_core::ScrapeOutcome::Success,
                postings_found: 12,
                postings_new: 3,
                postings_updated: 9,
                error_message: None,
                duration_seconds: 4.2,
                started_at: Utc.with_ymd_and_hms(2026, 8, 20, 6, 0, 0).unwrap(),
            })
            .await
            .unwrap();
    }
}
