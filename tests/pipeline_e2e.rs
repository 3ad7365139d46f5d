mod common;

use chrono::Local;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use alien_newsroom::audio::AudioGenerator;
use alien_newsroom::content::ContentGenerator;
use alien_newsroom::db::{self, Pool};
use alien_newsroom::media::Speech;
use alien_newsroom::pipeline::{NewsPipeline, PipelineContext, PipelineOptions};
use alien_newsroom::storage::{AssetKind, AssetLayout, IdempotencyPolicy};
use alien_newsroom::task::CancelSignal;
use common::*;

struct Harness {
    pipeline: NewsPipeline,
    pool: Pool,
    model: StubModel,
    synth: StubSynth,
    portrait: StubPortrait,
    video: StubTalkingHead,
    _dir: tempfile::TempDir,
    base: PathBuf,
}

fn options(characters_dir: &Path) -> PipelineOptions {
    PipelineOptions {
        text_speech: false,
        use_character_file: false,
        characters_dir: characters_dir.to_path_buf(),
        reference_image: None,
        articles: 3,
        concurrency: 2,
        idempotency: IdempotencyPolicy::Always,
        batch_deadline: None,
    }
}

async fn harness(
    model: StubModel,
    video: StubTalkingHead,
    tweak: impl FnOnce(&mut PipelineOptions),
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("data");
    let pool = news_pool().await;
    let synth = StubSynth::default();
    let portrait = StubPortrait::default();
    let mut opts = options(&dir.path().join("characters"));
    tweak(&mut opts);
    let ctx = PipelineContext {
        pool: pool.clone(),
        layout: AssetLayout::new(&base),
        content: ContentGenerator::new(Arc::new(model.clone())),
        audio: AudioGenerator::new(Arc::new(synth.clone())),
        portrait: Arc::new(portrait.clone()),
        talking_head: Arc::new(video.clone()),
        options: opts,
    };
    Harness {
        pipeline: NewsPipeline::new(ctx),
        pool,
        model,
        synth,
        portrait,
        video,
        _dir: dir,
        base,
    }
}

#[tokio::test]
async fn article_becomes_a_persisted_segment() {
    let h = harness(StubModel::default(), StubTalkingHead::default(), |_| {}).await;

    let record = h
        .pipeline
        .process_article(&article("Lake floods town"), &CancelSignal::new())
        .await
        .unwrap();

    assert_eq!(record.original_title, "Lake floods town");
    assert_eq!(record.alien_title, "Big Splash on Zorg");
    assert_eq!(record.vocab.len(), 3);
    assert_eq!(record.vocab[0].word, "a");
    assert_eq!(record.vocab[2].word, "c");

    let audio = PathBuf::from(record.audio_path.as_deref().unwrap());
    let image = PathBuf::from(record.image_path.as_deref().unwrap());
    let video = PathBuf::from(record.video_path.as_deref().unwrap());
    assert!(audio.starts_with(h.base.join("audio")));
    assert!(image.starts_with(h.base.join("images")));
    assert!(video.starts_with(h.base.join("videos")));
    assert_eq!(std::fs::read(&audio).unwrap(), b"ID3audio");
    assert!(video.exists());

    // the narration walks through every vocabulary word
    let calls = h.synth.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].0.contains("Word number three"));
    assert!(calls[0].0.ends_with("Goodbye, Earth friends!"));

    let prompt = &h.portrait.calls.lock().unwrap()[0].0;
    assert!(prompt.contains("Zorp"));
    assert_eq!(
        h.video.speeches.lock().unwrap().as_slice(),
        &[Speech::Audio(audio)]
    );
    assert_eq!(db::count_news(&h.pool).await.unwrap(), 1);

    // the text file for the item sits in today's partition
    let text_dir = h.base.join("text").join(Local::now().format("%Y%m%d").to_string());
    assert_eq!(std::fs::read_dir(text_dir).unwrap().count(), 1);
}

#[tokio::test]
async fn one_bad_article_does_not_sink_the_batch() {
    let h = harness(
        StubModel::poisoned("Scary headline"),
        StubTalkingHead::default(),
        |_| {},
    )
    .await;

    let report = h
        .pipeline
        .run_batch(
            vec![article("Scary headline"), article("Panda born")],
            CancelSignal::new(),
        )
        .await;

    assert_eq!(report.to_string(), "1 of 2 succeeded");
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].index, 0);
    assert_eq!(report.failures[0].title, "Scary headline");
    assert!(report.failures[0].error.contains("Sorry, I cannot help"));
    assert_eq!(report.records[0].original_title, "Panda born");
    assert_eq!(db::count_news(&h.pool).await.unwrap(), 1);
    assert_eq!(h.model.prompts.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn text_speech_skips_local_audio() {
    let video = StubTalkingHead {
        text_speech: true,
        ..StubTalkingHead::default()
    };
    let h = harness(StubModel::default(), video, |o| o.text_speech = true).await;

    let record = h
        .pipeline
        .process_article(&article("Rocket launch"), &CancelSignal::new())
        .await
        .unwrap();

    assert!(record.audio_path.is_none());
    assert!(record.video_path.is_some());
    assert!(h.synth.calls.lock().unwrap().is_empty());
    let speeches = h.video.speeches.lock().unwrap();
    match &speeches[0] {
        Speech::Text { script, voice_id } => {
            assert!(script.contains("Big Splash on Zorg"));
            assert!(!voice_id.is_empty());
        }
        other => panic!("expected script speech, got {other:?}"),
    }
}

#[tokio::test]
async fn text_speech_falls_back_to_audio_when_unsupported() {
    let h = harness(
        StubModel::default(),
        StubTalkingHead::default(),
        |o| o.text_speech = true,
    )
    .await;

    let record = h
        .pipeline
        .process_article(&article("Rocket launch"), &CancelSignal::new())
        .await
        .unwrap();

    assert!(record.audio_path.is_some());
    assert_eq!(h.synth.calls.lock().unwrap().len(), 1);
    assert!(matches!(h.video.speeches.lock().unwrap()[0], Speech::Audio(_)));
}

#[tokio::test]
async fn character_file_drives_the_portrait() {
    let h = harness(StubModel::default(), StubTalkingHead::default(), |o| {
        o.use_character_file = true;
        o.characters_dir = PathBuf::from("resource/characters");
    })
    .await;

    h.pipeline
        .process_article(&article("School opens"), &CancelSignal::new())
        .await
        .unwrap();

    let prompt = &h.portrait.calls.lock().unwrap()[0].0;
    assert!(prompt.contains("mint green skin"));
}

#[tokio::test]
async fn populated_folders_skip_the_daily_run() {
    let h = harness(StubModel::default(), StubTalkingHead::default(), |o| {
        o.idempotency = IdempotencyPolicy::SkipIfPopulated;
    })
    .await;
    let today = Local::now().format("%Y%m%d").to_string();
    for kind in AssetKind::ALL {
        let dir = h.pipeline.context().layout.news_dir(kind, &today);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(format!("earlier.{}", kind.extension())), b"x").unwrap();
    }
    let source = StubSource::default();
    source
        .articles
        .lock()
        .unwrap()
        .push_back(article("Ignored"));

    let outcome = h.pipeline.run_daily(&source, CancelSignal::new()).await.unwrap();

    assert!(outcome.is_none());
    assert!(source.fetches.lock().unwrap().is_empty());
    assert_eq!(db::count_news(&h.pool).await.unwrap(), 0);
}

#[tokio::test]
async fn daily_run_fetches_configured_article_count() {
    let h = harness(StubModel::default(), StubTalkingHead::default(), |o| {
        o.articles = 2;
        o.idempotency = IdempotencyPolicy::SkipIfPopulated;
    })
    .await;
    let source = StubSource::default();
    {
        let mut queue = source.articles.lock().unwrap();
        queue.push_back(article("One"));
        queue.push_back(article("Two"));
        queue.push_back(article("Three"));
    }

    let report = h
        .pipeline
        .run_daily(&source, CancelSignal::new())
        .await
        .unwrap()
        .expect("empty folders must not skip");

    assert_eq!(source.fetches.lock().unwrap().as_slice(), &[2]);
    assert_eq!(report.to_string(), "2 of 2 succeeded");
    assert_eq!(db::count_news(&h.pool).await.unwrap(), 2);
}

#[tokio::test]
async fn cancelled_batch_persists_nothing() {
    let h = harness(StubModel::default(), StubTalkingHead::default(), |_| {}).await;
    let cancel = CancelSignal::new();
    cancel.cancel();

    let report = h
        .pipeline
        .run_batch(vec![article("One"), article("Two")], cancel)
        .await;

    assert_eq!(report.succeeded, 0);
    assert_eq!(report.failures.len(), 2);
    assert!(report.failures.iter().all(|f| f.error == "cancelled"));
    assert_eq!(db::count_news(&h.pool).await.unwrap(), 0);
}

#[tokio::test]
async fn text_speech_days_are_skipped_without_audio_files() {
    let video = StubTalkingHead {
        text_speech: true,
        ..StubTalkingHead::default()
    };
    let h = harness(StubModel::default(), video, |o| {
        o.articles = 1;
        o.text_speech = true;
        o.idempotency = IdempotencyPolicy::SkipIfPopulated;
    })
    .await;
    let source = StubSource::default();
    {
        let mut queue = source.articles.lock().unwrap();
        queue.push_back(article("Morning"));
        queue.push_back(article("Evening"));
    }

    let first = h.pipeline.run_daily(&source, CancelSignal::new()).await.unwrap();
    assert_eq!(first.unwrap().succeeded, 1);
    let today = Local::now().format("%Y%m%d").to_string();
    let audio_dir = h.pipeline.context().layout.news_dir(AssetKind::Audio, &today);
    assert!(!audio_dir.exists() || std::fs::read_dir(&audio_dir).unwrap().next().is_none());

    let second = h.pipeline.run_daily(&source, CancelSignal::new()).await.unwrap();
    assert!(second.is_none());
    assert_eq!(source.fetches.lock().unwrap().len(), 1);
    assert_eq!(db::count_news(&h.pool).await.unwrap(), 1);
}

#[tokio::test]
async fn batch_deadline_leaves_the_callers_signal_alone() {
    let video = StubTalkingHead {
        hang: true,
        ..StubTalkingHead::default()
    };
    let h = harness(StubModel::default(), video, |o| {
        o.batch_deadline = Some(Duration::from_millis(50));
    })
    .await;
    let daemon = CancelSignal::new();

    let report = h
        .pipeline
        .run_batch(vec![article("Slow render")], daemon.clone())
        .await;

    assert_eq!(report.succeeded, 0);
    assert_eq!(report.failures[0].error, "cancelled");
    assert!(!daemon.is_cancelled());

    // the next batch on the same signal still runs
    let h = harness(StubModel::default(), StubTalkingHead::default(), |_| {}).await;
    let report = h.pipeline.run_batch(vec![article("Fast render")], daemon).await;
    assert_eq!(report.succeeded, 1);
}

#[tokio::test]
async fn failed_insert_rolls_back_only_that_item() {
    let h = harness(StubModel::default(), StubTalkingHead::default(), |o| {
        o.concurrency = 1;
    })
    .await;
    sqlx::query(
        "CREATE TRIGGER reject_poison BEFORE INSERT ON news \
         WHEN NEW.original_title = 'Poison' \
         BEGIN SELECT RAISE(ABORT, 'rejected'); END",
    )
    .execute(&h.pool)
    .await
    .unwrap();

    let report = h
        .pipeline
        .run_batch(
            vec![article("Fine one"), article("Poison"), article("Fine two")],
            CancelSignal::new(),
        )
        .await;

    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].index, 1);
    assert!(report.failures[0].error.contains("rejected"));
    assert_eq!(db::count_news(&h.pool).await.unwrap(), 2);
    let titles: Vec<String> = db::list_news(&h.pool, 10)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.original_title)
        .collect();
    assert!(titles.contains(&"Fine one".to_string()));
    assert!(titles.contains(&"Fine two".to_string()));
    assert!(!titles.contains(&"Poison".to_string()));
}
