//! Adventure stories: portrait, four-scene story, scene art and narration.
use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::audio::{random_voice, AudioGenerator, ElevenLabsClient};
use crate::character::{
    infer_gender, load_profile, random_gender, random_profile, CharacterProfile,
};
use crate::config::Config;
use crate::content::{scene_prompt, story_portrait_prompt, ContentGenerator};
use crate::db::{self, NewScene, NewStory, Pool};
use crate::error::{PipelineError, Result};
use crate::llm::GeminiClient;
use crate::media::{build_portrait_backend, PortraitBackend};
use crate::model::Gender;
use crate::storage::{path_string, write_json, AssetLayout, ItemKey, StoryAsset};
use crate::task::CancelSignal;

pub struct StoryPipeline {
    pub pool: Pool,
    pub layout: AssetLayout,
    pub content: ContentGenerator,
    pub audio: AudioGenerator,
    pub portrait: Arc<dyn PortraitBackend>,
    pub characters_dir: PathBuf,
    pub reference_image: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StoryOutcome {
    pub story_id: i64,
    pub timestamp: String,
    pub title: String,
    pub character_name: String,
    pub voice_id: String,
    pub story_path: PathBuf,
    pub scenes_kept: usize,
}

impl StoryPipeline {
    pub fn from_config(cfg: &Config, pool: Pool) -> Result<Self> {
        Ok(Self {
            pool,
            layout: AssetLayout::new(&cfg.app.data_dir),
            content: ContentGenerator::new(Arc::new(GeminiClient::from_config(cfg)?)),
            audio: AudioGenerator::new(Arc::new(ElevenLabsClient::from_config(&cfg.tts)?)),
            portrait: build_portrait_backend(cfg)?,
            characters_dir: PathBuf::from(&cfg.app.characters_dir),
            reference_image: cfg.app.reference_image.as_ref().map(PathBuf::from),
        })
    }

    /// Generate and persist one story. `character_file` picks the alien;
    /// otherwise one is drawn from the character catalog.
    #[instrument(skip_all)]
    pub async fn run(
        &self,
        character_file: Option<&Path>,
        cancel: &CancelSignal,
    ) -> Result<StoryOutcome> {
        let key = ItemKey::now();
        self.layout.ensure_story_dirs(key.date()).await?;

        let profile = match character_file {
            Some(path) => load_profile(path).await?,
            None => random_profile(&self.characters_dir).await?.1,
        };
        let gender = story_gender(&profile);
        let voice = random_voice(gender)
            .ok_or_else(|| PipelineError::validation("voice catalog is empty"))?;
        info!(
            %key,
            character = %profile.name,
            gender = gender.as_str(),
            voice = voice.name,
            "story started"
        );

        let portrait_dest = self.layout.story_asset(StoryAsset::Character, &key);
        let portrait = self
            .portrait
            .render(
                &story_portrait_prompt(&profile),
                self.reference_image.as_deref(),
                &portrait_dest,
                cancel,
            )
            .await?;

        let story = self.content.generate_story(&profile).await?;
        let story_path = self.layout.story_asset(StoryAsset::Story, &key);
        write_json(&story_path, &story).await?;

        let mut scenes = Vec::with_capacity(story.scenes.len());
        for (idx, beat) in story.scenes.iter().enumerate() {
            let number = idx + 1;
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            let image_dest = self.layout.story_asset(StoryAsset::Scene(number), &key);
            let image = match self
                .portrait
                .render(
                    &scene_prompt(&beat.description),
                    Some(portrait.as_path()),
                    &image_dest,
                    cancel,
                )
                .await
            {
                Ok(path) => path,
                Err(PipelineError::Cancelled) => return Err(PipelineError::Cancelled),
                Err(err) => {
                    warn!(%key, scene = number, %err, "scene image failed, skipping scene");
                    continue;
                }
            };

            let voice_dest = self.layout.story_asset(StoryAsset::Voice(number), &key);
            let audio = match self
                .audio
                .synthesize_to(&beat.narration, voice.id, &voice_dest)
                .await
            {
                Ok(path) => Some(path),
                Err(err) => {
                    warn!(%key, scene = number, %err, "scene narration failed");
                    None
                }
            };

            scenes.push(NewScene {
                scene_number: number as i64,
                description: beat.description.clone(),
                scene_story: Some(beat.narration.clone()),
                image_path: path_string(&image),
                audio_path: audio.as_deref().map(path_string),
            });
        }
        if scenes.is_empty() {
            return Err(PipelineError::validation("no scene images could be generated"));
        }

        let summary_path = self.layout.story_asset(StoryAsset::Summary, &key);
        write_json(
            &summary_path,
            &json!({
                "character": profile,
                "character_image": path_string(&portrait),
                "story": story,
                "story_path": path_string(&story_path),
                "scene_images": scenes.iter().map(|s| &s.image_path).collect::<Vec<_>>(),
                "audio_paths": scenes.iter().filter_map(|s| s.audio_path.as_ref()).collect::<Vec<_>>(),
                "voice_id": voice.id,
                "timestamp": key.timestamp(),
                "date": key.date(),
            }),
        )
        .await?;

        let story_id = db::insert_story(
            &self.pool,
            &NewStory {
                title: story.title.clone(),
                story_text: story.story.clone(),
                character_name: profile.name.clone(),
                character_image_path: path_string(&portrait),
                story_path: path_string(&story_path),
                voice_id: Some(voice.id.to_string()),
                moral: story.moral.clone(),
                timestamp: key.timestamp().to_string(),
                date: key.date().to_string(),
            },
            &scenes,
        )
        .await?;
        info!(%key, story_id, scenes = scenes.len(), "story persisted");

        Ok(StoryOutcome {
            story_id,
            timestamp: key.timestamp().to_string(),
            title: story.title,
            character_name: profile.name,
            voice_id: voice.id.to_string(),
            story_path,
            scenes_kept: scenes.len(),
        })
    }
}

fn story_gender(profile: &CharacterProfile) -> Gender {
    infer_gender(profile).unwrap_or_else(|| random_gender(&mut rand::thread_rng()))
}
