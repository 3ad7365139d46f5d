//! Insert models used by repositories.
//!
//! Vocabulary is kept as an ordered list here; it is spread over the fixed
//! `vocab_*1..3` columns only when bound.
use serde::Serialize;

use crate::model::{SceneRecord, StoryRecord, VocabEntry};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNewsRecord {
    pub original_title: String,
    pub original_content: String,
    pub alien_title: String,
    pub alien_content: String,
    pub vocab: Vec<VocabEntry>,
    pub audio_path: Option<String>,
    pub image_path: Option<String>,
    pub video_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewStory {
    pub title: String,
    pub story_text: String,
    pub character_name: String,
    pub character_image_path: String,
    pub story_path: String,
    pub voice_id: Option<String>,
    pub moral: Option<String>,
    /// `YYYYMMDDHHMMSS`
    pub timestamp: String,
    /// `YYYYMMDD`
    pub date: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewScene {
    pub scene_number: i64,
    pub description: String,
    pub scene_story: Option<String>,
    pub image_path: String,
    pub audio_path: Option<String>,
}

/// A story row with its scenes in scene order.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StoryWithScenes {
    #[serde(flatten)]
    pub story: StoryRecord,
    pub scenes: Vec<SceneRecord>,
}
