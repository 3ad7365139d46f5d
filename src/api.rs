//! Read API over the news and story databases, plus static serving of the
//! asset tree under `/data`.
use axum::{
    extract::{Path as UrlPath, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::Path;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::{error, info};

use crate::db::{self, Pool, StoryWithScenes};
use crate::error::PipelineError;
use crate::model::NewsRecord;

pub const DEFAULT_LIMIT: i64 = 20;
pub const MAX_LIMIT: i64 = 20;

#[derive(Clone)]
pub struct ApiState {
    pub news: Pool,
    pub stories: Pool,
    /// Prefix that replaces the first segment of stored asset paths.
    pub public_base_url: String,
}

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    Internal(String),
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Internal(msg) => {
                error!(%msg, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

/// Turn a stored path like `data/videos/x.mp4` into `{base}/videos/x.mp4`.
pub fn file_url(base: &str, path: Option<&str>) -> Option<String> {
    let path = path?.trim();
    if path.is_empty() {
        return None;
    }
    let path = path.trim_start_matches("./");
    let rest = path.split_once('/').map(|(_, rest)| rest).unwrap_or("");
    Some(format!("{}/{}", base.trim_end_matches('/'), rest))
}

#[derive(Debug, Serialize)]
pub struct VocabWord {
    pub word: String,
    pub explanation: String,
    pub sentence: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct NewsResponse {
    pub id: i64,
    pub original_title: String,
    pub original_content: String,
    pub alien_title: String,
    pub alien_content: String,
    pub vocab_words: Vec<VocabWord>,
    pub audio_path: Option<String>,
    pub image_path: Option<String>,
    pub video_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl NewsResponse {
    fn from_record(record: NewsRecord, base: &str) -> Self {
        Self {
            id: record.id,
            original_title: record.original_title,
            original_content: record.original_content,
            alien_title: record.alien_title,
            alien_content: record.alien_content,
            vocab_words: record
                .vocab
                .into_iter()
                .map(|v| VocabWord {
                    word: v.word,
                    explanation: v.explanation,
                    sentence: v.sentence,
                })
                .collect(),
            audio_path: file_url(base, record.audio_path.as_deref()),
            image_path: file_url(base, record.image_path.as_deref()),
            video_path: file_url(base, record.video_path.as_deref()),
            created_at: record.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SceneResponse {
    pub id: i64,
    pub scene_number: i64,
    pub description: String,
    pub scene_story: Option<String>,
    pub image_path: Option<String>,
    pub audio_path: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StoryResponse {
    pub id: i64,
    pub title: String,
    pub story_text: String,
    pub character_name: String,
    pub character_image_path: Option<String>,
    pub voice_id: Option<String>,
    pub moral: Option<String>,
    pub timestamp: String,
    pub date: String,
    pub created_at: DateTime<Utc>,
    pub scenes: Vec<SceneResponse>,
}

impl StoryResponse {
    fn from_entry(entry: StoryWithScenes, base: &str) -> Self {
        let StoryWithScenes { story, scenes } = entry;
        Self {
            id: story.id,
            title: story.title,
            story_text: story.story_text,
            character_name: story.character_name,
            character_image_path: file_url(base, Some(&story.character_image_path)),
            voice_id: story.voice_id,
            moral: story.moral,
            timestamp: story.timestamp,
            date: story.date,
            created_at: story.created_at,
            scenes: scenes
                .into_iter()
                .map(|s| SceneResponse {
                    id: s.id,
                    scene_number: s.scene_number,
                    description: s.description,
                    scene_story: s.scene_story,
                    image_path: file_url(base, Some(&s.image_path)),
                    audio_path: file_url(base, s.audio_path.as_deref()),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ScenesQuery {
    #[serde(default)]
    pub latest_only: bool,
}

pub fn router(state: ApiState, data_dir: impl AsRef<Path>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    Router::new()
        .route("/health", get(health))
        .route("/news", get(list_news))
        .route("/news/", get(list_news))
        .route("/news/:id", get(get_news).delete(delete_news))
        .route("/story/dates", get(story_dates))
        .route("/story/scenes/date/:date", get(stories_by_date))
        .nest_service("/data", ServeDir::new(data_dir.as_ref()))
        .layer(cors)
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn list_news(
    State(state): State<ApiState>,
    Query(q): Query<ListQuery>,
) -> ApiResult<Vec<NewsResponse>> {
    let limit = q.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let records = db::list_news(&state.news, limit).await?;
    Ok(Json(
        records
            .into_iter()
            .map(|r| NewsResponse::from_record(r, &state.public_base_url))
            .collect(),
    ))
}

async fn get_news(
    State(state): State<ApiState>,
    UrlPath(id): UrlPath<i64>,
) -> ApiResult<NewsResponse> {
    match db::get_news(&state.news, id).await? {
        Some(record) => Ok(Json(NewsResponse::from_record(record, &state.public_base_url))),
        None => Err(ApiError::NotFound("News article not found".into())),
    }
}

async fn delete_news(
    State(state): State<ApiState>,
    UrlPath(id): UrlPath<i64>,
) -> ApiResult<serde_json::Value> {
    let deleted = db::delete_news(&state.news, id)
        .await
        .map_err(|e| ApiError::Internal(format!("Error deleting news article: {}", e)))?;
    if !deleted {
        return Err(ApiError::NotFound("News article not found".into()));
    }
    info!(id, "news article deleted");
    Ok(Json(json!({
        "message": format!("News article {} deleted successfully", id)
    })))
}

async fn story_dates(State(state): State<ApiState>) -> ApiResult<Vec<String>> {
    Ok(Json(db::list_story_dates(&state.stories).await?))
}

async fn stories_by_date(
    State(state): State<ApiState>,
    UrlPath(date): UrlPath<String>,
    Query(q): Query<ScenesQuery>,
) -> ApiResult<Vec<StoryResponse>> {
    let entries = db::stories_for_date(&state.stories, &date, q.latest_only).await?;
    if entries.is_empty() {
        return Err(ApiError::NotFound(format!("No stories found for date {}", date)));
    }
    Ok(Json(
        entries
            .into_iter()
            .map(|e| StoryResponse::from_entry(e, &state.public_base_url))
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "http://localhost:8003/data";

    #[test]
    fn file_url_drops_first_segment() {
        assert_eq!(
            file_url(BASE, Some("data/videos/20250101/a.mp4")).as_deref(),
            Some("http://localhost:8003/data/videos/20250101/a.mp4")
        );
        assert_eq!(
            file_url(BASE, Some("./data/images/x.png")).as_deref(),
            Some("http://localhost:8003/data/images/x.png")
        );
        assert_eq!(
            file_url("http://cdn.example/data/", Some("out/audio/a.mp3")).as_deref(),
            Some("http://cdn.example/data/audio/a.mp3")
        );
    }

    #[test]
    fn file_url_skips_empty_paths() {
        assert_eq!(file_url(BASE, None), None);
        assert_eq!(file_url(BASE, Some("  ")), None);
    }
}
