use super::model::{NewNewsRecord, NewScene, NewStory, StoryWithScenes};
use crate::error::Result;
use crate::model::{NewsRecord, SceneRecord, StoryRecord, VocabEntry, VOCAB_LEN};
use chrono::Utc;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, instrument};

pub type Pool = SqlitePool;

/// Open a pool with foreign keys on. File databases are created on demand
/// and run in WAL mode with full synchronous writes.
pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let in_memory = normalized.contains(":memory:") || normalized.contains("mode=memory");
    let mut options = SqliteConnectOptions::from_str(&normalized)?
        .create_if_missing(true)
        .foreign_keys(true);
    if !in_memory {
        options = options
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full);
    }
    // every connection to an in-memory url opens its own empty database
    let max_connections = if in_memory { 1 } else { 5 };
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// `sqlite://{dir}/{file}` for a database kept next to the asset tree.
pub fn default_database_url(data_dir: &Path, file: &str) -> String {
    format!("sqlite://{}", data_dir.join(file).display())
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory URLs untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_news_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations/news")
        .run(pool)
        .await
        .map_err(sqlx::Error::from)?;
    Ok(())
}

pub async fn run_story_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations/story")
        .run(pool)
        .await
        .map_err(sqlx::Error::from)?;
    Ok(())
}

// ---------------------------------------------------------------- news

#[instrument(skip_all, fields(title = %record.alien_title))]
pub async fn insert_news(pool: &Pool, record: &NewNewsRecord) -> Result<i64> {
    let mut tx = pool.begin().await?;
    let vocab = |i: usize| record.vocab.get(i);
    let id: i64 = sqlx::query(
        "INSERT INTO news (original_title, original_content, alien_title, alien_content, \
            vocab_word1, vocab_explanation1, vocab_sentence1, \
            vocab_word2, vocab_explanation2, vocab_sentence2, \
            vocab_word3, vocab_explanation3, vocab_sentence3, \
            audio_path, image_path, video_path, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(&record.original_title)
    .bind(&record.original_content)
    .bind(&record.alien_title)
    .bind(&record.alien_content)
    .bind(vocab(0).map(|v| v.word.as_str()))
    .bind(vocab(0).map(|v| v.explanation.as_str()))
    .bind(vocab(0).and_then(|v| v.sentence.as_deref()))
    .bind(vocab(1).map(|v| v.word.as_str()))
    .bind(vocab(1).map(|v| v.explanation.as_str()))
    .bind(vocab(1).and_then(|v| v.sentence.as_deref()))
    .bind(vocab(2).map(|v| v.word.as_str()))
    .bind(vocab(2).map(|v| v.explanation.as_str()))
    .bind(vocab(2).and_then(|v| v.sentence.as_deref()))
    .bind(record.audio_path.as_deref())
    .bind(record.image_path.as_deref())
    .bind(record.video_path.as_deref())
    .bind(Utc::now())
    .fetch_one(&mut *tx)
    .await?
    .get("id");
    tx.commit().await?;
    debug!(id, "news row inserted");
    Ok(id)
}

fn news_from_row(row: &SqliteRow) -> Result<NewsRecord> {
    let mut vocab = Vec::with_capacity(VOCAB_LEN);
    for i in 1..=VOCAB_LEN {
        let word: Option<String> = row.try_get(format!("vocab_word{}", i).as_str())?;
        let Some(word) = word else { continue };
        vocab.push(VocabEntry {
            word,
            explanation: row
                .try_get::<Option<String>, _>(format!("vocab_explanation{}", i).as_str())?
                .unwrap_or_default(),
            sentence: row.try_get(format!("vocab_sentence{}", i).as_str())?,
        });
    }
    Ok(NewsRecord {
        id: row.try_get("id")?,
        original_title: row.try_get("original_title")?,
        original_content: row.try_get("original_content")?,
        alien_title: row.try_get("alien_title")?,
        alien_content: row.try_get("alien_content")?,
        vocab,
        audio_path: row.try_get("audio_path")?,
        image_path: row.try_get("image_path")?,
        video_path: row.try_get("video_path")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Newest first.
#[instrument(skip_all)]
pub async fn list_news(pool: &Pool, limit: i64) -> Result<Vec<NewsRecord>> {
    let rows = sqlx::query("SELECT * FROM news ORDER BY datetime(created_at) DESC, id DESC LIMIT ?")
        .bind(limit)
        .fetch_all(pool)
        .await?;
    rows.iter().map(news_from_row).collect()
}

#[instrument(skip_all)]
pub async fn get_news(pool: &Pool, id: i64) -> Result<Option<NewsRecord>> {
    let row = sqlx::query("SELECT * FROM news WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(news_from_row).transpose()
}

/// Returns false when no row had that id.
#[instrument(skip_all)]
pub async fn delete_news(pool: &Pool, id: i64) -> Result<bool> {
    let done = sqlx::query("DELETE FROM news WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(done.rows_affected() > 0)
}

pub async fn count_news(pool: &Pool) -> Result<i64> {
    Ok(sqlx::query_scalar("SELECT COUNT(*) FROM news")
        .fetch_one(pool)
        .await?)
}

// ---------------------------------------------------------------- stories

/// Story and scenes are written together or not at all.
#[instrument(skip_all, fields(title = %story.title, scenes = scenes.len()))]
pub async fn insert_story(pool: &Pool, story: &NewStory, scenes: &[NewScene]) -> Result<i64> {
    let mut tx = pool.begin().await?;
    let story_id: i64 = sqlx::query(
        "INSERT INTO stories (title, story_text, character_name, character_image_path, story_path, \
            voice_id, moral, timestamp, date, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(&story.title)
    .bind(&story.story_text)
    .bind(&story.character_name)
    .bind(&story.character_image_path)
    .bind(&story.story_path)
    .bind(story.voice_id.as_deref())
    .bind(story.moral.as_deref())
    .bind(&story.timestamp)
    .bind(&story.date)
    .bind(Utc::now())
    .fetch_one(&mut *tx)
    .await?
    .get("id");

    for scene in scenes {
        sqlx::query(
            "INSERT INTO scenes (story_id, scene_number, description, scene_story, image_path, audio_path) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(story_id)
        .bind(scene.scene_number)
        .bind(&scene.description)
        .bind(scene.scene_story.as_deref())
        .bind(&scene.image_path)
        .bind(scene.audio_path.as_deref())
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    debug!(story_id, "story rows inserted");
    Ok(story_id)
}

fn story_from_row(row: &SqliteRow) -> Result<StoryRecord> {
    Ok(StoryRecord {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        story_text: row.try_get("story_text")?,
        character_name: row.try_get("character_name")?,
        character_image_path: row.try_get("character_image_path")?,
        story_path: row.try_get("story_path")?,
        voice_id: row.try_get("voice_id")?,
        moral: row.try_get("moral")?,
        timestamp: row.try_get("timestamp")?,
        date: row.try_get("date")?,
        created_at: row.try_get("created_at")?,
    })
}

fn scene_from_row(row: &SqliteRow) -> Result<SceneRecord> {
    Ok(SceneRecord {
        id: row.try_get("id")?,
        story_id: row.try_get("story_id")?,
        scene_number: row.try_get("scene_number")?,
        description: row.try_get("description")?,
        scene_story: row.try_get("scene_story")?,
        image_path: row.try_get("image_path")?,
        audio_path: row.try_get("audio_path")?,
    })
}

/// Distinct `YYYYMMDD` dates, newest first.
#[instrument(skip_all)]
pub async fn list_story_dates(pool: &Pool) -> Result<Vec<String>> {
    Ok(
        sqlx::query_scalar("SELECT DISTINCT date FROM stories ORDER BY date DESC")
            .fetch_all(pool)
            .await?,
    )
}

#[instrument(skip_all)]
pub async fn scenes_for_story(pool: &Pool, story_id: i64) -> Result<Vec<SceneRecord>> {
    let rows = sqlx::query("SELECT * FROM scenes WHERE story_id = ? ORDER BY scene_number")
        .bind(story_id)
        .fetch_all(pool)
        .await?;
    rows.iter().map(scene_from_row).collect()
}

/// Stories of one day, newest first, each with its scenes.
#[instrument(skip_all, fields(%date, latest_only = latest_only))]
pub async fn stories_for_date(
    pool: &Pool,
    date: &str,
    latest_only: bool,
) -> Result<Vec<StoryWithScenes>> {
    let limit: i64 = if latest_only { 1 } else { -1 };
    let rows = sqlx::query(
        "SELECT * FROM stories WHERE date = ? ORDER BY timestamp DESC, id DESC LIMIT ?",
    )
    .bind(date)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    let mut out = Vec::with_capacity(rows.len());
    for row in &rows {
        let story = story_from_row(row)?;
        let scenes = scenes_for_story(pool, story.id).await?;
        out.push(StoryWithScenes { story, scenes });
    }
    Ok(out)
}
