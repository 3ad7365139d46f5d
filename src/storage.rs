//! Date-partitioned asset layout.
//!
//! News assets live under `{base}/{text|audio|images|videos}/{YYYYMMDD}/` and
//! story assets under `{base}/story/{YYYYMMDD}/{character|scene|voice}/`.
//! Every file name carries an [`ItemKey`] so concurrent items never share a path.
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::error::{PipelineError, Result};

/// What to do when today's news folders already hold files.
///
/// The check is a plain directory listing: two processes starting at the same
/// moment can both see empty folders.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyPolicy {
    /// Always run; folders are only created.
    #[default]
    Always,
    /// Skip the whole batch when every news folder for today is non-empty.
    SkipIfPopulated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Text,
    Audio,
    Images,
    Videos,
}

impl AssetKind {
    pub const ALL: [AssetKind; 4] = [
        AssetKind::Text,
        AssetKind::Audio,
        AssetKind::Images,
        AssetKind::Videos,
    ];

    pub fn dir_name(&self) -> &'static str {
        match self {
            AssetKind::Text => "text",
            AssetKind::Audio => "audio",
            AssetKind::Images => "images",
            AssetKind::Videos => "videos",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            AssetKind::Text => "json",
            AssetKind::Audio => "mp3",
            AssetKind::Images => "png",
            AssetKind::Videos => "mp4",
        }
    }
}

/// Unique key for one work item: local timestamp plus a short random suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemKey {
    timestamp: String,
    suffix: String,
}

impl ItemKey {
    pub fn now() -> Self {
        let timestamp = Local::now().format("%Y%m%d%H%M%S").to_string();
        let suffix = uuid::Uuid::new_v4().simple().to_string()[..6].to_string();
        Self { timestamp, suffix }
    }

    pub fn from_parts(timestamp: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self {
            timestamp: timestamp.into(),
            suffix: suffix.into(),
        }
    }

    /// `YYYYMMDDHHMMSS`.
    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    /// `YYYYMMDD`, the partition directory.
    pub fn date(&self) -> &str {
        &self.timestamp[..8.min(self.timestamp.len())]
    }

    pub fn stem(&self) -> String {
        format!("{}_{}", self.timestamp, self.suffix)
    }
}

impl std::fmt::Display for ItemKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.stem())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoryAsset {
    Character,
    Story,
    Summary,
    Scene(usize),
    Voice(usize),
}

#[derive(Debug, Clone)]
pub struct AssetLayout {
    base: PathBuf,
}

impl AssetLayout {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn news_dir(&self, kind: AssetKind, date: &str) -> PathBuf {
        self.base.join(kind.dir_name()).join(date)
    }

    pub fn news_asset(&self, kind: AssetKind, key: &ItemKey) -> PathBuf {
        self.news_dir(kind, key.date())
            .join(format!("alien_news_{}.{}", key.stem(), kind.extension()))
    }

    pub fn story_dir(&self, date: &str) -> PathBuf {
        self.base.join("story").join(date)
    }

    pub fn story_asset(&self, asset: StoryAsset, key: &ItemKey) -> PathBuf {
        let dir = self.story_dir(key.date());
        let stem = key.stem();
        match asset {
            StoryAsset::Character => dir.join("character").join(format!("character_{}.png", stem)),
            StoryAsset::Story => dir.join(format!("story_{}.json", stem)),
            StoryAsset::Summary => dir.join(format!("adventure_{}.json", stem)),
            StoryAsset::Scene(i) => dir.join("scene").join(format!("scene{}_{}.png", i, stem)),
            StoryAsset::Voice(i) => dir.join("voice").join(format!("scene{}_{}.mp3", i, stem)),
        }
    }

    pub async fn ensure_news_dirs(&self, date: &str) -> Result<()> {
        for kind in AssetKind::ALL {
            let dir = self.news_dir(kind, date);
            fs::create_dir_all(&dir)
                .await
                .map_err(|e| PipelineError::io(&dir, e))?;
        }
        Ok(())
    }

    pub async fn ensure_story_dirs(&self, date: &str) -> Result<()> {
        let root = self.story_dir(date);
        for sub in ["character", "scene", "voice"] {
            let dir = root.join(sub);
            fs::create_dir_all(&dir)
                .await
                .map_err(|e| PipelineError::io(&dir, e))?;
        }
        Ok(())
    }

    /// True when each of the `kinds` folders for `date` exists and holds at
    /// least one entry.
    pub async fn news_folders_populated(&self, date: &str, kinds: &[AssetKind]) -> bool {
        for &kind in kinds {
            let dir = self.news_dir(kind, date);
            let Ok(mut entries) = fs::read_dir(&dir).await else {
                return false;
            };
            match entries.next_entry().await {
                Ok(Some(_)) => {}
                _ => return false,
            }
        }
        true
    }
}

/// Pretty-print `value` to `path`, creating parent directories.
pub async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let body = serde_json::to_vec_pretty(value)?;
    write_bytes(path, &body).await
}

pub async fn write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| PipelineError::io(parent, e))?;
    }
    fs::write(path, bytes)
        .await
        .map_err(|e| PipelineError::io(path, e))
}

/// Render a path the way it is stored in the database.
pub fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
