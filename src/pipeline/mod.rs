//! News orchestration: one article at a time through text, audio, portrait
//! and video, and whole batches of articles with bounded concurrency.
use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, Local, TimeZone, Utc};
use serde_json::json;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{error, info, instrument, warn};

use crate::audio::{random_voice, AudioGenerator, ElevenLabsClient};
use crate::character::{infer_gender, random_gender, random_profile, CharacterProfile};
use crate::config::Config;
use crate::content::{
    narration_script, news_portrait_prompt, AnchorLook, CharacterAttributes, ContentGenerator,
};
use crate::db::{self, NewNewsRecord, Pool};
use crate::error::{PipelineError, Result};
use crate::llm::GeminiClient;
use crate::media::{
    build_portrait_backend, build_talking_head_backend, PortraitBackend, Speech,
    TalkingHeadBackend,
};
use crate::model::{Article, Gender, NewsRecord};
use crate::news::NewsSource;
use crate::storage::{
    path_string, write_json, AssetKind, AssetLayout, IdempotencyPolicy, ItemKey,
};
use crate::task::CancelSignal;

pub mod story;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemStage {
    Created,
    TextGenerated,
    AudioReady,
    ImageReady,
    VideoReady,
    Persisted,
    Failed,
}

impl ItemStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStage::Created => "created",
            ItemStage::TextGenerated => "text_generated",
            ItemStage::AudioReady => "audio_ready",
            ItemStage::ImageReady => "image_ready",
            ItemStage::VideoReady => "video_ready",
            ItemStage::Persisted => "persisted",
            ItemStage::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Let the talking-head backend voice the script itself.
    pub text_speech: bool,
    pub use_character_file: bool,
    pub characters_dir: PathBuf,
    pub reference_image: Option<PathBuf>,
    pub articles: usize,
    pub concurrency: usize,
    pub idempotency: IdempotencyPolicy,
    pub batch_deadline: Option<Duration>,
}

impl PipelineOptions {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            text_speech: cfg.pipeline.text_speech,
            use_character_file: cfg.pipeline.use_character_file,
            characters_dir: PathBuf::from(&cfg.app.characters_dir),
            reference_image: cfg.app.reference_image.as_ref().map(PathBuf::from),
            articles: cfg.pipeline.articles,
            concurrency: cfg.pipeline.concurrency.max(1),
            idempotency: cfg.pipeline.idempotency,
            batch_deadline: cfg.pipeline.batch_deadline_secs.map(Duration::from_secs),
        }
    }
}

/// Everything an item needs, built once per process.
pub struct PipelineContext {
    pub pool: Pool,
    pub layout: AssetLayout,
    pub content: ContentGenerator,
    pub audio: AudioGenerator,
    pub portrait: Arc<dyn PortraitBackend>,
    pub talking_head: Arc<dyn TalkingHeadBackend>,
    pub options: PipelineOptions,
}

impl PipelineContext {
    pub fn from_config(cfg: &Config, pool: Pool) -> Result<Self> {
        let llm = Arc::new(GeminiClient::from_config(cfg)?);
        let tts = Arc::new(ElevenLabsClient::from_config(&cfg.tts)?);
        let portrait = build_portrait_backend(cfg)?;
        let talking_head = build_talking_head_backend(cfg)?;
        info!(
            portrait = portrait.name(),
            talking_head = talking_head.name(),
            text_speech = cfg.pipeline.text_speech,
            "pipeline backends selected"
        );
        Ok(Self {
            pool,
            layout: AssetLayout::new(&cfg.app.data_dir),
            content: ContentGenerator::new(llm),
            audio: AudioGenerator::new(tts),
            portrait,
            talking_head,
            options: PipelineOptions::from_config(cfg),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub index: usize,
    pub title: String,
    pub error: String,
}

#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub records: Vec<NewsRecord>,
    pub failures: Vec<ItemFailure>,
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of {} succeeded", self.succeeded, self.attempted)
    }
}

#[derive(Clone)]
pub struct NewsPipeline {
    ctx: Arc<PipelineContext>,
}

impl NewsPipeline {
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx: Arc::new(ctx) }
    }

    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    /// Run one article to a persisted record. Every intermediate file is
    /// keyed by a fresh [`ItemKey`].
    pub async fn process_article(
        &self,
        article: &Article,
        cancel: &CancelSignal,
    ) -> Result<NewsRecord> {
        let key = ItemKey::now();
        let mut stage = ItemStage::Created;
        info!(%key, stage = stage.as_str(), title = %article.title, "item created");
        let result = self.run_stages(article, &key, &mut stage, cancel).await;
        if let Err(err) = &result {
            warn!(
                %key,
                reached = stage.as_str(),
                stage = ItemStage::Failed.as_str(),
                %err,
                "item failed"
            );
        }
        result
    }

    async fn run_stages(
        &self,
        article: &Article,
        key: &ItemKey,
        stage: &mut ItemStage,
        cancel: &CancelSignal,
    ) -> Result<NewsRecord> {
        let ctx = &*self.ctx;
        let opts = &ctx.options;
        ctx.layout.ensure_news_dirs(key.date()).await?;

        let profile = if opts.use_character_file {
            match random_profile(&opts.characters_dir).await {
                Ok((_, profile)) => Some(profile),
                Err(err) => {
                    warn!(%key, %err, "no character file, using random attributes");
                    None
                }
            }
        } else {
            None
        };
        let gender = pick_gender(profile.as_ref());

        let segment = ctx.content.generate(article).await?;
        let text_path = ctx.layout.news_asset(AssetKind::Text, key);
        write_json(
            &text_path,
            &json!({
                "original_title": article.title,
                "original_content": article.description,
                "gender": gender,
                "segment": segment,
            }),
        )
        .await?;
        advance(stage, ItemStage::TextGenerated, key);

        let voice = random_voice(gender)
            .ok_or_else(|| PipelineError::validation("voice catalog is empty"))?;
        let script = narration_script(&segment);
        let text_speech = self.speaks_text();
        if opts.text_speech && !text_speech {
            warn!(
                %key,
                backend = ctx.talking_head.name(),
                "backend cannot voice text, rendering audio instead"
            );
        }

        let (speech, audio_path) = if text_speech {
            let speech = Speech::Text {
                script,
                voice_id: voice.id.to_string(),
            };
            (speech, None)
        } else {
            let dest = ctx.layout.news_asset(AssetKind::Audio, key);
            let path = ctx.audio.synthesize_to(&script, voice.id, &dest).await?;
            advance(stage, ItemStage::AudioReady, key);
            (Speech::Audio(path.clone()), Some(path))
        };

        let look = match &profile {
            Some(p) => AnchorLook::Profile(p),
            None => AnchorLook::Attributes(random_attributes(gender)),
        };
        let prompt = news_portrait_prompt(&segment.character_name, segment.emotion, Some(gender), &look);
        let image_dest = ctx.layout.news_asset(AssetKind::Images, key);
        let image_path = ctx
            .portrait
            .render(&prompt, opts.reference_image.as_deref(), &image_dest, cancel)
            .await?;
        advance(stage, ItemStage::ImageReady, key);

        let video_dest = ctx.layout.news_asset(AssetKind::Videos, key);
        let video_path = ctx
            .talking_head
            .render(&image_path, &speech, &video_dest, cancel)
            .await?;
        advance(stage, ItemStage::VideoReady, key);

        let id = db::insert_news(
            &ctx.pool,
            &NewNewsRecord {
                original_title: article.title.clone(),
                original_content: article.description.clone(),
                alien_title: segment.alien_title.clone(),
                alien_content: segment.alien_content.clone(),
                vocab: segment.vocab.clone(),
                audio_path: audio_path.as_deref().map(path_string),
                image_path: Some(path_string(&image_path)),
                video_path: Some(path_string(&video_path)),
            },
        )
        .await?;
        advance(stage, ItemStage::Persisted, key);
        db::get_news(&ctx.pool, id)
            .await?
            .ok_or_else(|| PipelineError::validation(format!("news row {} missing after insert", id)))
    }

    /// Run every article; a failed item never stops its siblings.
    #[instrument(skip_all, fields(articles = articles.len()))]
    pub async fn run_batch(&self, articles: Vec<Article>, cancel: CancelSignal) -> BatchReport {
        let opts = &self.ctx.options;
        let semaphore = Arc::new(Semaphore::new(opts.concurrency.max(1)));
        // the deadline trips this batch only; the caller's signal stays usable
        let batch = cancel.child();
        let deadline = opts.batch_deadline.map(|limit| {
            let cancel = batch.clone();
            tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                warn!(secs = limit.as_secs(), "batch deadline reached, cancelling");
                cancel.cancel();
            })
        });

        let titles: Vec<String> = articles.iter().map(|a| a.title.clone()).collect();
        let mut handles = Vec::with_capacity(articles.len());
        for article in articles {
            let pipeline = self.clone();
            let semaphore = semaphore.clone();
            let cancel = batch.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| PipelineError::Cancelled)?;
                if cancel.is_cancelled() {
                    return Err(PipelineError::Cancelled);
                }
                pipeline.process_article(&article, &cancel).await
            }));
        }

        let mut report = BatchReport {
            attempted: titles.len(),
            ..BatchReport::default()
        };
        for (index, handle) in handles.into_iter().enumerate() {
            let outcome = match handle.await {
                Ok(result) => result.map_err(|e| e.to_string()),
                Err(join_err) => {
                    error!(index, ?join_err, "item task panicked");
                    Err(join_err.to_string())
                }
            };
            match outcome {
                Ok(record) => {
                    report.succeeded += 1;
                    report.records.push(record);
                }
                Err(error) => report.failures.push(ItemFailure {
                    index,
                    title: titles[index].clone(),
                    error,
                }),
            }
        }
        if let Some(handle) = deadline {
            handle.abort();
        }
        // ends the task forwarding the caller's signal into this batch
        batch.cancel();
        info!(report = %report, "batch finished");
        report
    }

    /// Whether the talking-head backend voices the script itself, which
    /// leaves no local audio file behind.
    pub fn speaks_text(&self) -> bool {
        self.ctx.options.text_speech && self.ctx.talking_head.supports_text_speech()
    }

    /// The news folders a successful item writes into.
    pub fn produced_kinds(&self) -> Vec<AssetKind> {
        AssetKind::ALL
            .into_iter()
            .filter(|kind| *kind != AssetKind::Audio || !self.speaks_text())
            .collect()
    }

    /// Daily entry point: idempotency gate, fetch headlines, run the batch.
    /// Returns `None` when the gate skipped the run.
    pub async fn run_daily(
        &self,
        source: &dyn NewsSource,
        cancel: CancelSignal,
    ) -> Result<Option<BatchReport>> {
        let opts = &self.ctx.options;
        let today = Local::now().format("%Y%m%d").to_string();
        if opts.idempotency == IdempotencyPolicy::SkipIfPopulated
            && self
                .ctx
                .layout
                .news_folders_populated(&today, &self.produced_kinds())
                .await
        {
            info!(date = %today, "news folders already populated, skipping run");
            return Ok(None);
        }
        self.ctx.layout.ensure_news_dirs(&today).await?;

        let articles = source.fetch(opts.articles).await?;
        if articles.is_empty() {
            warn!("no usable articles");
        }
        Ok(Some(self.run_batch(articles, cancel).await))
    }
}

fn advance(stage: &mut ItemStage, next: ItemStage, key: &ItemKey) {
    *stage = next;
    info!(%key, stage = next.as_str(), "stage reached");
}

fn pick_gender(profile: Option<&CharacterProfile>) -> Gender {
    profile
        .and_then(infer_gender)
        .unwrap_or_else(|| random_gender(&mut rand::thread_rng()))
}

fn random_attributes(gender: Gender) -> CharacterAttributes {
    CharacterAttributes::random(&mut rand::thread_rng(), Some(gender))
}

/// Time until the next `hour:00` in the zone `utc_offset_hours` east of UTC.
pub fn until_next_run(now: DateTime<Utc>, hour: u32, utc_offset_hours: i32) -> Duration {
    let Some(zone) = FixedOffset::east_opt(utc_offset_hours * 3600) else {
        return Duration::from_secs(24 * 3600);
    };
    let local = now.with_timezone(&zone);
    let today = local.date_naive().and_hms_opt(hour, 0, 0);
    let next = today
        .and_then(|t| zone.from_local_datetime(&t).single())
        .map(|t| if t <= local { t + ChronoDuration::days(1) } else { t });
    match next {
        Some(next) => (next - local).to_std().unwrap_or_default(),
        None => Duration::from_secs(24 * 3600),
    }
}
