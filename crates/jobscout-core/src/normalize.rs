//! Skill and title normalization.
//!
//! Skill names arrive from LLM output in whatever casing the posting used.
//! Normalization is total: known aliases collapse to a canonical name,
//! anything else is title-cased as-is so the skills table never forks on
//! casing alone.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use strsim::jaro_winkler;

use crate::SeniorityLevel;

/// Similarity floor for fuzzy role matching.
const ROLE_MATCH_THRESHOLD: f64 = 0.85;

/// Built-in alias table: canonical name first, aliases after.
const DEFAULT_ALIASES: &[(&str, &[&str])] = &[
    ("python", &["python3", "py"]),
    ("javascript", &["js", "ecmascript"]),
    ("typescript", &["ts"]),
    ("kubernetes", &["k8s", "kube"]),
    ("postgresql", &["postgres", "psql", "pg"]),
    ("amazon web services", &["aws"]),
    ("google cloud platform", &["gcp", "google cloud"]),
    ("microsoft azure", &["azure"]),
    ("ci/cd", &["cicd", "continuous integration", "continuous delivery"]),
    ("machine learning", &["ml"]),
    ("terraform", &["tf"]),
    ("docker", &["containers"]),
    ("react", &["reactjs", "react.js"]),
    ("node.js", &["node", "nodejs"]),
    ("golang", &["go"]),
    ("c++", &["cpp"]),
    ("c#", &["csharp", "c sharp"]),
];

/// Maps raw skill mentions to canonical display names.
#[derive(Debug, Clone)]
pub struct SkillNormalizer {
    // lowercased alias -> canonical display name
    canonical: HashMap<String, String>,
}

impl SkillNormalizer {
    /// Normalizer seeded with the built-in alias table.
    pub fn with_defaults() -> Self {
        let mut n = Self {
            canonical: HashMap::new(),
        };
        for (name, aliases) in DEFAULT_ALIASES {
            n.register(name, aliases.iter().copied());
        }
        n
    }

    /// Normalizer with no aliases; every input title-cases as-is.
    pub fn empty() -> Self {
        Self {
            canonical: HashMap::new(),
        }
    }

    /// Register a canonical skill and its aliases. The canonical name itself
    /// also resolves, so registration is idempotent under `normalize`.
    pub fn register<'a>(&mut self, name: &str, aliases: impl IntoIterator<Item = &'a str>) {
        let display = title_case(name);
        self.canonical.insert(name.to_lowercase(), display.clone());
        for alias in aliases {
            self.canonical.insert(alias.to_lowercase(), display.clone());
        }
    }

    /// Resolve a raw mention to its canonical display name. Total: unknown
    /// skills come back title-cased rather than erroring.
    pub fn normalize(&self, raw: &str) -> String {
        let key = raw.trim().to_lowercase();
        match self.canonical.get(&key) {
            Some(display) => display.clone(),
            None => title_case(raw.trim()),
        }
    }
}

impl Default for SkillNormalizer {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Title-case each alphabetic run, preserving punctuation.
/// "amazon web services" -> "Amazon Web Services", "node.js" -> "Node.Js".
fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for ch in s.chars() {
        if ch.is_alphabetic() {
            if at_word_start {
                out.extend(ch.to_uppercase());
            } else {
                out.extend(ch.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(ch);
            at_word_start = true;
        }
    }
    out
}

/// A job title after marker collapsing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedTitle {
    pub bare_title: String,
    pub seniority: Option<SeniorityLevel>,
}

/// A target role and the alternate names postings use for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleAliases {
    pub role_id: i64,
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

fn seniority_marker(token: &str) -> Option<SeniorityLevel> {
    let t = token.trim_matches(|c: char| !c.is_alphanumeric());
    // Roman numerals are matched case-sensitively so words like "iv" in
    // prose never trigger.
    match t {
        "I" => return Some(SeniorityLevel::Junior),
        "II" => return Some(SeniorityLevel::Mid),
        "III" => return Some(SeniorityLevel::Senior),
        "IV" => return Some(SeniorityLevel::Staff),
        _ => {}
    }
    match t.to_ascii_lowercase().as_str() {
        "1" | "junior" | "jr" => Some(SeniorityLevel::Junior),
        "2" | "mid" | "midlevel" | "mid-level" | "intermediate" => Some(SeniorityLevel::Mid),
        "3" | "senior" | "sr" => Some(SeniorityLevel::Senior),
        "4" | "staff" => Some(SeniorityLevel::Staff),
        "principal" => Some(SeniorityLevel::Principal),
        "lead" => Some(SeniorityLevel::Lead),
        "manager" => Some(SeniorityLevel::Manager),
        "director" => Some(SeniorityLevel::Director),
        "vp" => Some(SeniorityLevel::Vp),
        "chief" | "cto" | "ciso" => Some(SeniorityLevel::CLevel),
        _ => None,
    }
}

/// Byte length of a leading case-insensitive match of `prefix` in `s`.
/// Compared char by char, so the returned length is always a char
/// boundary in `s` even when case folding changes byte lengths.
fn prefix_match_len(s: &str, prefix: &str) -> Option<usize> {
    let mut len = 0;
    let mut chars = s.chars();
    for want in prefix.chars() {
        let got = chars.next()?;
        if !got.to_lowercase().eq(want.to_lowercase()) {
            return None;
        }
        len += got.len_utf8();
    }
    Some(len)
}

/// Strip a leading company-name prefix and collapse level markers into a
/// seniority band. The first marker wins; remaining text is the bare title.
pub fn normalize_title(raw: &str, company_name: &str) -> NormalizedTitle {
    let mut title = raw.trim();
    if !company_name.is_empty() {
        if let Some(matched) = prefix_match_len(title, company_name) {
            let rest = &title[matched..];
            let trimmed = rest.trim_start_matches(|c: char| {
                c.is_whitespace() || c == ':' || c == '-' || c == '|'
            });
            // Only treat it as a prefix if a separator actually followed.
            if trimmed.len() < rest.len() && !trimmed.is_empty() {
                title = trimmed;
            }
        }
    }

    let mut seniority = None;
    let mut kept: Vec<&str> = Vec::new();
    for token in title.split_whitespace() {
        match seniority_marker(token) {
            Some(level) if seniority.is_none() => seniority = Some(level),
            _ => kept.push(token),
        }
    }
    let bare = kept
        .join(" ")
        .trim_matches(|c: char| c == ',' || c == '-' || c.is_whitespace())
        .to_string();

    NormalizedTitle {
        bare_title: if bare.is_empty() {
            title.to_string()
        } else {
            bare
        },
        seniority,
    }
}

/// Fuzzy-match a bare title against the target roles. Best Jaro-Winkler
/// similarity across each role's name and aliases; below the floor means
/// no role.
pub fn match_role(bare_title: &str, roles: &[RoleAliases]) -> Option<i64> {
    let needle = bare_title.to_lowercase();
    let mut best: Option<(f64, i64)> = None;
    for role in roles {
        let mut candidates = vec![role.name.as_str()];
        candidates.extend(role.aliases.iter().map(String::as_str));
        for candidate in candidates {
            let sim = jaro_winkler(&needle, &candidate.to_lowercase());
            if sim >= ROLE_MATCH_THRESHOLD
                && best.map(|(b, _)| sim > b).unwrap_or(true)
            {
                best = Some((sim, role.role_id));
            }
        }
    }
    best.map(|(_, id)| id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_collapse_to_one_canonical_name() {
        let n = SkillNormalizer::with_defaults();
        assert_eq!(n.normalize("python3"), "Python");
        assert_eq!(n.normalize("PY"), "Python");
        assert_eq!(n.normalize("Python"), "Python");
        assert_eq!(n.normalize("k8s"), "Kubernetes");
        assert_eq!(n.normalize("AWS"), "Amazon Web Services");
    }

    #[test]
    fn unknown_skills_pass_through_title_cased() {
        let n = SkillNormalizer::with_defaults();
        assert_eq!(n.normalize("Zigbee"), "Zigbee");
        assert_eq!(n.normalize("  zigbee  "), "Zigbee");
        assert_eq!(n.normalize("apache kafka"), "Apache Kafka");
    }

    #[test]
    fn normalization_is_idempotent() {
        let n = SkillNormalizer::with_defaults();
        for raw in ["python3", "Zigbee", "gcp", "node.js", "CI/CD"] {
            let once = n.normalize(raw);
            assert_eq!(n.normalize(&once), once);
        }
    }

    #[test]
    fn title_markers_collapse_into_seniority() {
        let t = normalize_title("Software Engineer II", "");
        assert_eq!(t.bare_title, "Software Engineer");
        assert_eq!(t.seniority, Some(SeniorityLevel::Mid));

        let t = normalize_title("Sr Backend Engineer", "");
        assert_eq!(t.bare_title, "Backend Engineer");
        assert_eq!(t.seniority, Some(SeniorityLevel::Senior));

        let t = normalize_title("Staff Software Engineer", "");
        assert_eq!(t.bare_title, "Software Engineer");
        assert_eq!(t.seniority, Some(SeniorityLevel::Staff));
    }

    #[test]
    fn company_prefix_is_stripped() {
        let t = normalize_title("Acme Corp - Platform Engineer", "Acme Corp");
        assert_eq!(t.bare_title, "Platform Engineer");
    }

    #[test]
    fn company_prefix_strip_survives_case_folds_that_resize() {
        // "ßß" is 4 bytes but the title's "ẞẞ" is 6; slicing the title
        // at the company name's byte length would split a char.
        let t = normalize_title("ẞẞ - Platform Engineer", "ßß");
        assert_eq!(t.bare_title, "Platform Engineer");
        // A company name longer than the title never matches.
        let t = normalize_title("Acme", "Acme Corporation");
        assert_eq!(t.bare_title, "Acme");
    }

    #[test]
    fn unmarked_titles_have_no_seniority() {
        let t = normalize_title("Data Engineer", "");
        assert_eq!(t.bare_title, "Data Engineer");
        assert_eq!(t.seniority, None);
    }

    #[test]
    fn role_matching_uses_similarity_floor() {
        let roles = vec![
            RoleAliases {
                role_id: 1,
                name: "Backend Engineer".into(),
                aliases: vec!["Backend Developer".into()],
            },
            RoleAliases {
                role_id: 2,
                name: "Data Scientist".into(),
                aliases: vec![],
            },
        ];
        assert_eq!(match_role("Backend Engineer", &roles), Some(1));
        assert_eq!(match_role("backend developer", &roles), Some(1));
        assert_eq!(match_role("Accountant", &roles), None);
    }
}
