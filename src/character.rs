//! Character catalog: one YAML file per alien under `app.characters_dir`.
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

use crate::error::{PipelineError, Result};
use crate::model::Gender;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CharacterProfile {
    pub name: String,
    /// Free-form in the YAML files: a number or a phrase like "about 300".
    #[serde(default)]
    pub age: Option<serde_yaml::Value>,
    #[serde(default)]
    pub appearance: String,
    #[serde(default)]
    pub personality: String,
    #[serde(default)]
    pub backstory: String,
}

impl CharacterProfile {
    pub fn age_label(&self) -> String {
        match &self.age {
            Some(serde_yaml::Value::Number(n)) => n.to_string(),
            Some(serde_yaml::Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            _ => "unknown".to_string(),
        }
    }
}

pub async fn load_profile(path: &Path) -> Result<CharacterProfile> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| PipelineError::io(path, e))?;
    let profile: CharacterProfile = serde_yaml::from_str(&raw).map_err(|e| {
        PipelineError::validation(format!("character file {}: {}", path.display(), e))
    })?;
    if profile.name.trim().is_empty() {
        return Err(PipelineError::validation(format!(
            "character file {} has no name",
            path.display()
        )));
    }
    Ok(profile)
}

/// Every `.yaml` / `.yml` file in `dir`, sorted. A missing directory is empty.
pub async fn list_profiles(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(PipelineError::io(dir, e)),
    };
    let mut files = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| PipelineError::io(dir, e))?
    {
        let path = entry.path();
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"))
            .unwrap_or(false);
        if is_yaml {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Load a random profile from `dir`; an empty catalog is a validation error.
#[instrument(skip_all, fields(dir = %dir.display()))]
pub async fn random_profile(dir: &Path) -> Result<(PathBuf, CharacterProfile)> {
    let files = list_profiles(dir).await?;
    let chosen = pick(&files)
        .ok_or_else(|| {
            PipelineError::validation(format!("no character files found in {}", dir.display()))
        })?
        .clone();
    info!(file = %chosen.display(), "selected character file");
    let profile = load_profile(&chosen).await?;
    Ok((chosen, profile))
}

fn pick(files: &[PathBuf]) -> Option<&PathBuf> {
    files.choose(&mut rand::thread_rng())
}

/// Gender from the profile text: "female"/"male" in the appearance, or a
/// pronoun in the personality. "female" is checked first since it contains "male".
pub fn infer_gender(profile: &CharacterProfile) -> Option<Gender> {
    let appearance = profile.appearance.to_lowercase();
    let personality = profile.personality.to_lowercase();
    let words: Vec<&str> = personality
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    let has_word = |candidates: &[&str]| words.iter().any(|w| candidates.contains(w));

    if appearance.contains("female") || has_word(&["she", "her", "hers"]) {
        Some(Gender::Female)
    } else if appearance.contains("male") || has_word(&["he", "him", "his"]) {
        Some(Gender::Male)
    } else {
        None
    }
}

pub fn random_gender<R: Rng + ?Sized>(rng: &mut R) -> Gender {
    if rng.gen_bool(0.5) {
        Gender::Male
    } else {
        Gender::Female
    }
}
