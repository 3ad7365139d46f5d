//! Recording stand-ins for the remote services, shared by the pipeline tests.
#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::json;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use alien_newsroom::audio::{SpeechSynthesizer, TtsPayload};
use alien_newsroom::db::{self, Pool};
use alien_newsroom::error::{PipelineError, Result};
use alien_newsroom::llm::TextModel;
use alien_newsroom::media::{PortraitBackend, Speech, TalkingHeadBackend};
use alien_newsroom::model::Article;
use alien_newsroom::news::NewsSource;
use alien_newsroom::task::CancelSignal;

pub async fn news_pool() -> Pool {
    let pool = db::init_pool("sqlite::memory:").await.unwrap();
    db::run_news_migrations(&pool).await.unwrap();
    pool
}

pub async fn story_pool() -> Pool {
    let pool = db::init_pool("sqlite::memory:").await.unwrap();
    db::run_story_migrations(&pool).await.unwrap();
    pool
}

pub fn article(title: &str) -> Article {
    Article {
        title: title.into(),
        description: format!("{} happened today.", title),
    }
}

/// Answers news prompts with a fixed segment and story prompts with a
/// four-scene story. Prompts mentioning `poison` get an unparseable reply.
#[derive(Clone, Default)]
pub struct StubModel {
    pub poison: Option<String>,
    pub prompts: Arc<Mutex<Vec<String>>>,
}

impl StubModel {
    pub fn poisoned(marker: &str) -> Self {
        Self {
            poison: Some(marker.into()),
            ..Self::default()
        }
    }
}

#[async_trait]
impl TextModel for StubModel {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if let Some(marker) = &self.poison {
            if prompt.contains(marker.as_str()) {
                return Ok("Sorry, I cannot help with that.".into());
            }
        }
        if prompt.contains("adventure story") {
            return Ok(json!({
                "title": "Zib and the Comet",
                "story": "Zib chased a comet and made a friend.",
                "scene1": "Zib waves from her moon",
                "scene1_story": "Zib looked up and saw a comet.",
                "scene2": "BROKEN nebula",
                "scene2_story": "She flew through a pink nebula.",
                "scene3": "Zib meets a comet creature",
                "scene3_story": "The comet had a shy face.",
                "scene4": "Zib and the comet dance",
                "scene4_story": "They danced among the stars.",
                "moral": "Friends can be found anywhere."
            })
            .to_string());
        }
        Ok(format!(
            "```json\n{}\n```",
            json!({
                "character_name": "Zorp",
                "emotion": "excited",
                "alien_title": "Big Splash on Zorg",
                "alien_content": "The blue lake on Zorg got very big. Everyone swam!",
                "vocab": [
                    {"word": "a", "explanation": "the first word"},
                    {"word": "b", "explanation": "the second word"},
                    {"word": "c", "explanation": "the third word"}
                ]
            })
        ))
    }
}

#[derive(Clone, Default)]
pub struct StubSynth {
    pub calls: Arc<Mutex<Vec<(String, String)>>>,
}

#[async_trait]
impl SpeechSynthesizer for StubSynth {
    async fn synthesize(&self, text: &str, voice_id: &str) -> Result<TtsPayload> {
        self.calls
            .lock()
            .unwrap()
            .push((text.to_string(), voice_id.to_string()));
        Ok(TtsPayload::Chunks(vec![
            Bytes::from_static(b"ID3"),
            Bytes::from_static(b"audio"),
        ]))
    }
}

/// Writes a placeholder image for every prompt; prompts containing `fail_on`
/// are rejected.
#[derive(Clone, Default)]
pub struct StubPortrait {
    pub fail_on: Option<String>,
    pub calls: Arc<Mutex<Vec<(String, Option<PathBuf>)>>>,
}

#[async_trait]
impl PortraitBackend for StubPortrait {
    fn name(&self) -> &'static str {
        "stub-portrait"
    }

    async fn render(
        &self,
        prompt: &str,
        reference: Option<&Path>,
        dest: &Path,
        cancel: &CancelSignal,
    ) -> Result<PathBuf> {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        self.calls
            .lock()
            .unwrap()
            .push((prompt.to_string(), reference.map(Path::to_path_buf)));
        if let Some(marker) = &self.fail_on {
            if prompt.contains(marker.as_str()) {
                return Err(PipelineError::TaskFailed {
                    task_id: "img-9".into(),
                    payload: "content filtered".into(),
                });
            }
        }
        tokio::fs::create_dir_all(dest.parent().unwrap()).await.unwrap();
        tokio::fs::write(dest, b"png").await.unwrap();
        Ok(dest.to_path_buf())
    }
}

#[derive(Clone, Default)]
pub struct StubTalkingHead {
    pub text_speech: bool,
    /// Never finishes a render; waits for cancellation instead.
    pub hang: bool,
    pub speeches: Arc<Mutex<Vec<Speech>>>,
}

#[async_trait]
impl TalkingHeadBackend for StubTalkingHead {
    fn name(&self) -> &'static str {
        "stub-video"
    }

    fn supports_text_speech(&self) -> bool {
        self.text_speech
    }

    async fn render(
        &self,
        image: &Path,
        speech: &Speech,
        dest: &Path,
        cancel: &CancelSignal,
    ) -> Result<PathBuf> {
        assert!(image.exists(), "portrait must exist before the video is requested");
        self.speeches.lock().unwrap().push(speech.clone());
        if self.hang {
            cancel.cancelled().await;
            return Err(PipelineError::Cancelled);
        }
        tokio::fs::create_dir_all(dest.parent().unwrap()).await.unwrap();
        tokio::fs::write(dest, b"mp4").await.unwrap();
        Ok(dest.to_path_buf())
    }
}

#[derive(Clone, Default)]
pub struct StubSource {
    pub articles: Arc<Mutex<VecDeque<Article>>>,
    pub fetches: Arc<Mutex<Vec<usize>>>,
}

#[async_trait]
impl NewsSource for StubSource {
    async fn fetch(&self, n: usize) -> Result<Vec<Article>> {
        self.fetches.lock().unwrap().push(n);
        let mut queue = self.articles.lock().unwrap();
        let take = n.min(queue.len());
        Ok(queue.drain(..take).collect())
    }
}
