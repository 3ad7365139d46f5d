use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PipelineError, Result};

/// Number of vocabulary words every segment carries.
pub const VOCAB_LEN: usize = 3;
/// Number of scenes every adventure story is written with.
pub const SCENE_COUNT: usize = 4;

/// A headline as delivered by the news source. Never persisted on its own.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Article {
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Happy,
    Excited,
    Surprised,
    Curious,
    Proud,
    Thoughtful,
}

impl Emotion {
    pub const ALL: [Emotion; 6] = [
        Emotion::Happy,
        Emotion::Excited,
        Emotion::Surprised,
        Emotion::Curious,
        Emotion::Proud,
        Emotion::Thoughtful,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Emotion::Happy => "happy",
            Emotion::Excited => "excited",
            Emotion::Surprised => "surprised",
            Emotion::Curious => "curious",
            Emotion::Proud => "proud",
            Emotion::Thoughtful => "thoughtful",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|e| e.as_str() == s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VocabEntry {
    pub word: String,
    pub explanation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentence: Option<String>,
}

/// The child-friendly rewrite of one article.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GeneratedSegment {
    pub character_name: String,
    pub emotion: Emotion,
    pub alien_title: String,
    pub alien_content: String,
    pub vocab: Vec<VocabEntry>,
}

impl GeneratedSegment {
    /// Build a segment from model JSON, reporting every missing or empty key.
    pub fn from_value(value: Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| PipelineError::validation("segment is not a JSON object"))?;

        let missing: Vec<&str> = ["character_name", "emotion", "alien_title", "alien_content", "vocab"]
            .into_iter()
            .filter(|key| obj.get(*key).map_or(true, Value::is_null))
            .collect();
        if !missing.is_empty() {
            return Err(PipelineError::validation(format!(
                "segment is missing keys: {}",
                missing.join(", ")
            )));
        }

        let emotion_raw = obj["emotion"].as_str().unwrap_or_default();
        let emotion = Emotion::parse(emotion_raw).ok_or_else(|| {
            PipelineError::validation(format!("unknown emotion '{}'", emotion_raw))
        })?;

        let vocab: Vec<VocabEntry> = serde_json::from_value(obj["vocab"].clone())
            .map_err(|e| PipelineError::validation(format!("vocab is malformed: {}", e)))?;

        let segment = GeneratedSegment {
            character_name: string_field(obj, "character_name")?,
            emotion,
            alien_title: string_field(obj, "alien_title")?,
            alien_content: string_field(obj, "alien_content")?,
            vocab,
        };
        segment.validate()?;
        Ok(segment)
    }

    pub fn validate(&self) -> Result<()> {
        if self.vocab.len() != VOCAB_LEN {
            return Err(PipelineError::validation(format!(
                "expected {} vocab entries, got {}",
                VOCAB_LEN,
                self.vocab.len()
            )));
        }
        for (name, value) in [
            ("character_name", &self.character_name),
            ("alien_title", &self.alien_title),
            ("alien_content", &self.alien_content),
        ] {
            if value.trim().is_empty() {
                return Err(PipelineError::validation(format!("{} is empty", name)));
            }
        }
        for (idx, entry) in self.vocab.iter().enumerate() {
            if entry.word.trim().is_empty() || entry.explanation.trim().is_empty() {
                return Err(PipelineError::validation(format!(
                    "vocab entry {} has an empty word or explanation",
                    idx + 1
                )));
            }
        }
        Ok(())
    }
}

fn string_field(obj: &serde_json::Map<String, Value>, key: &str) -> Result<String> {
    match obj.get(key) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(PipelineError::validation(format!(
            "{} must be a string, got {}",
            key, other
        ))),
        None => Err(PipelineError::validation(format!("{} is missing", key))),
    }
}

/// One narrative beat of an adventure story.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SceneBeat {
    pub description: String,
    pub narration: String,
}

/// Parsed output of the long-form story prompt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoryContent {
    pub title: String,
    pub story: String,
    pub scenes: Vec<SceneBeat>,
    pub moral: Option<String>,
}

impl StoryContent {
    /// Fold the flat `scene{i}` / `scene{i}_story` keys into ordered beats.
    pub fn from_value(value: Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| PipelineError::validation("story is not a JSON object"))?;

        let title = string_field(obj, "title")?;
        let story = string_field(obj, "story")?;
        let mut scenes = Vec::with_capacity(SCENE_COUNT);
        for i in 1..=SCENE_COUNT {
            let description = string_field(obj, &format!("scene{}", i))?;
            // Models sometimes nest the narration; take its text if so.
            let narration = match obj.get(&format!("scene{}_story", i)) {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Object(inner)) => inner
                    .get("scene_story")
                    .or_else(|| inner.get("text"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| Value::Object(inner.clone()).to_string()),
                _ => description.clone(),
            };
            scenes.push(SceneBeat {
                description,
                narration,
            });
        }
        let moral = obj
            .get("moral")
            .and_then(Value::as_str)
            .map(str::to_string)
            .filter(|m| !m.trim().is_empty());

        let content = StoryContent {
            title,
            story,
            scenes,
            moral,
        };
        if content.title.trim().is_empty() || content.story.trim().is_empty() {
            return Err(PipelineError::validation("story title or text is empty"));
        }
        Ok(content)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
            TaskStatus::TimedOut => "timed_out",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Queued | TaskStatus::Running)
    }
}

/// A job on a remote generation backend, discarded once its artifact is local.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteTask {
    pub task_id: String,
    pub status: TaskStatus,
    pub result_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewsRecord {
    pub id: i64,
    pub original_title: String,
    pub original_content: String,
    pub alien_title: String,
    pub alien_content: String,
    pub vocab: Vec<VocabEntry>,
    pub audio_path: Option<String>,
    pub image_path: Option<String>,
    pub video_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoryRecord {
    pub id: i64,
    pub title: String,
    pub story_text: String,
    pub character_name: String,
    pub character_image_path: String,
    pub story_path: String,
    pub voice_id: Option<String>,
    pub moral: Option<String>,
    pub timestamp: String,
    pub date: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SceneRecord {
    pub id: i64,
    pub story_id: i64,
    pub scene_number: i64,
    pub description: String,
    pub scene_story: Option<String>,
    pub image_path: String,
    pub audio_path: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "character_name": "Zog",
            "emotion": "happy",
            "alien_title": "T",
            "alien_content": "C",
            "vocab": [
                {"word": "a", "explanation": "e1"},
                {"word": "b", "explanation": "e2"},
                {"word": "c", "explanation": "e3"}
            ]
        })
    }

    #[test]
    fn parses_valid_segment() {
        let seg = GeneratedSegment::from_value(sample()).unwrap();
        assert_eq!(seg.emotion, Emotion::Happy);
        assert_eq!(seg.vocab.len(), 3);
        assert_eq!(seg.vocab[2].word, "c");
        assert!(seg.vocab[0].sentence.is_none());
    }

    #[test]
    fn rejects_unknown_emotion() {
        let mut v = sample();
        v["emotion"] = json!("grumpy");
        let err = GeneratedSegment::from_value(v).unwrap_err();
        assert!(matches!(err, PipelineError::Validation(msg) if msg.contains("grumpy")));
    }

    #[test]
    fn rejects_wrong_vocab_arity() {
        let mut v = sample();
        v["vocab"].as_array_mut().unwrap().pop();
        assert!(matches!(
            GeneratedSegment::from_value(v),
            Err(PipelineError::Validation(_))
        ));

        let mut v = sample();
        v["vocab"]
            .as_array_mut()
            .unwrap()
            .push(json!({"word": "d", "explanation": "e4"}));
        assert!(matches!(
            GeneratedSegment::from_value(v),
            Err(PipelineError::Validation(_))
        ));
    }

    #[test]
    fn reports_missing_keys() {
        let v = json!({"character_name": "Zog", "emotion": "proud"});
        let err = GeneratedSegment::from_value(v).unwrap_err();
        match err {
            PipelineError::Validation(msg) => {
                assert!(msg.contains("alien_title"));
                assert!(msg.contains("vocab"));
            }
            other => panic!("wrong error: {other:?}"),
        }
    }

    #[test]
    fn rejects_empty_fields() {
        let mut v = sample();
        v["alien_content"] = json!("  ");
        assert!(GeneratedSegment::from_value(v).is_err());

        let mut v = sample();
        v["vocab"][1]["word"] = json!("");
        assert!(GeneratedSegment::from_value(v).is_err());
    }

    #[test]
    fn every_emotion_round_trips_through_parse() {
        for e in Emotion::ALL {
            assert_eq!(Emotion::parse(e.as_str()), Some(e));
        }
        assert_eq!(Emotion::parse(" Curious "), Some(Emotion::Curious));
    }

    #[test]
    fn story_content_folds_scene_keys() {
        let v = json!({
            "title": "Star Hop",
            "story": "Once upon a time...",
            "scene1": "d1", "scene1_story": "n1",
            "scene2": "d2", "scene2_story": {"text": "n2"},
            "scene3": "d3",
            "scene4": "d4", "scene4_story": "n4",
            "moral": "Be kind"
        });
        let story = StoryContent::from_value(v).unwrap();
        assert_eq!(story.scenes.len(), SCENE_COUNT);
        assert_eq!(story.scenes[1].narration, "n2");
        assert_eq!(story.scenes[2].narration, "d3");
        assert_eq!(story.moral.as_deref(), Some("Be kind"));
    }

    #[test]
    fn story_content_requires_all_scenes() {
        let v = json!({"title": "t", "story": "s", "scene1": "d1", "scene2": "d2", "scene3": "d3"});
        assert!(matches!(
            StoryContent::from_value(v),
            Err(PipelineError::Validation(_))
        ));
    }
}
