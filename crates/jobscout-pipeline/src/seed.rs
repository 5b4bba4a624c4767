//! Workspace seed files.
//!
//! The config dir may hold three YAML files, all optional: a candidate
//! `profile.yaml` (with optional score weight overrides), the target
//! `roles.yaml`, and `skills.yaml` with extra alias mappings on top of
//! the built-in table. Present files win over whatever the store holds.

use std::path::Path;

use anyhow::Context;
use jobscout_core::score::{Profile, ScoreWeights};
use jobscout_core::SkillNormalizer;
use jobscout_storage::Store;
use serde::Deserialize;
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
struct ProfileFile {
    profile: Profile,
    #[serde(default)]
    weights: Option<ScoreWeights>,
}

#[derive(Debug, Deserialize)]
struct RolesFile {
    roles: Vec<RoleSeed>,
}

#[derive(Debug, Deserialize)]
struct RoleSeed {
    name: String,
    #[serde(default)]
    aliases: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SkillsFile {
    skills: Vec<SkillSeed>,
}

#[derive(Debug, Deserialize)]
struct SkillSeed {
    name: String,
    #[serde(default)]
    aliases: Vec<String>,
    #[serde(default)]
    category: Option<String>,
}

pub struct Seeded {
    pub normalizer: SkillNormalizer,
    pub weights: ScoreWeights,
}

/// Apply whichever seed files exist under `dir`. Missing files leave
/// the corresponding state untouched.
pub async fn apply_seed_files(store: &Store, dir: &Path) -> anyhow::Result<Seeded> {
    let mut normalizer = SkillNormalizer::with_defaults();
    let mut weights = ScoreWeights::default();

    if let Some(text) = read_if_present(&dir.join("profile.yaml")).await? {
        let file: ProfileFile = serde_yaml::from_str(&text).context("parsing profile.yaml")?;
        if let Some(overrides) = file.weights {
            overrides.validate().map_err(anyhow::Error::msg)?;
            weights = overrides;
        }
        store.save_profile(&file.profile).await?;
        info!(skills = file.profile.skills.len(), "candidate profile loaded");
    }

    if let Some(text) = read_if_present(&dir.join("roles.yaml")).await? {
        let file: RolesFile = serde_yaml::from_str(&text).context("parsing roles.yaml")?;
        for role in &file.roles {
            store.upsert_role(&role.name, &role.aliases).await?;
        }
        info!(roles = file.roles.len(), "target roles loaded");
    }

    if let Some(text) = read_if_present(&dir.join("skills.yaml")).await? {
        let file: SkillsFile = serde_yaml::from_str(&text).context("parsing skills.yaml")?;
        for skill in &file.skills {
            store
                .upsert_skill(&skill.name, &skill.aliases, skill.category.as_deref())
                .await?;
        }
        debug!(skills = file.skills.len(), "extra skill aliases registered");
    }

    // Skill rows accumulated across runs feed the normalizer too, so an
    // alias seeded once keeps resolving after its file is gone.
    for skill in store.list_skills().await? {
        normalizer.register(&skill.name, skill.aliases.iter().map(String::as_str));
    }

    Ok(Seeded { normalizer, weights })
}

async fn read_if_present(path: &Path) -> anyhow::Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(Some(text)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("reading {}", path.display())),
    }
}
