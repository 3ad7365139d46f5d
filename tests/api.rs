mod common;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tower::ServiceExt;

use alien_newsroom::api::{router, ApiState};
use alien_newsroom::db::{self, NewNewsRecord, NewScene, NewStory, Pool};
use alien_newsroom::model::VocabEntry;
use common::{news_pool, story_pool};

const BASE: &str = "http://localhost:8003/data";

fn news(n: usize) -> NewNewsRecord {
    NewNewsRecord {
        original_title: format!("Earth title {}", n),
        original_content: "Earth content".into(),
        alien_title: format!("Zorg title {}", n),
        alien_content: "Zorg content".into(),
        vocab: ["moon", "jump", "happy"]
            .iter()
            .map(|w| VocabEntry {
                word: w.to_string(),
                explanation: format!("about {}", w),
                sentence: None,
            })
            .collect(),
        audio_path: None,
        image_path: Some(format!("data/images/20250401/anchor_{}.png", n)),
        video_path: Some(format!("./data/videos/20250401/anchor_{}.mp4", n)),
    }
}

fn story(timestamp: &str, title: &str) -> NewStory {
    NewStory {
        title: title.into(),
        story_text: "Once upon a time".into(),
        character_name: "Zib".into(),
        character_image_path: format!("data/story/{}/character/character_{}.png", &timestamp[..8], timestamp),
        story_path: format!("data/story/{}/story_{}.json", &timestamp[..8], timestamp),
        voice_id: Some("voice-1".into()),
        moral: None,
        timestamp: timestamp.into(),
        date: timestamp[..8].into(),
    }
}

fn scene(n: i64) -> NewScene {
    NewScene {
        scene_number: n,
        description: format!("scene {}", n),
        scene_story: Some(format!("narration {}", n)),
        image_path: format!("data/story/20250401/scene/scene{}.png", n),
        audio_path: None,
    }
}

async fn app() -> (Router, Pool, Pool, tempfile::TempDir) {
    let news = news_pool().await;
    let stories = story_pool().await;
    let dir = tempfile::tempdir().unwrap();
    let state = ApiState {
        news: news.clone(),
        stories: stories.clone(),
        public_base_url: BASE.into(),
    };
    (router(state, dir.path()), news, stories, dir)
}

async fn call(app: &Router, method: Method, uri: &str) -> (StatusCode, Value) {
    let res = app
        .clone()
        .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = res.status();
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into()))
    };
    (status, body)
}

#[tokio::test]
async fn health_is_ok() {
    let (app, ..) = app().await;
    let (status, body) = call(&app, Method::GET, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn lists_newest_first_with_public_urls() {
    let (app, news_db, ..) = app().await;
    for n in 1..=3 {
        db::insert_news(&news_db, &news(n)).await.unwrap();
    }

    let (status, body) = call(&app, Method::GET, "/news/").await;
    assert_eq!(status, StatusCode::OK);
    let items = body.as_array().unwrap();
    assert_eq!(items.len(), 3);
    assert_eq!(items[0]["alien_title"], "Zorg title 3");
    assert_eq!(items[0]["vocab_words"][1]["word"], "jump");
    assert!(items[0]["vocab_words"][0]["sentence"].is_null());
    assert!(items[0]["audio_path"].is_null());
    assert_eq!(
        items[0]["image_path"],
        "http://localhost:8003/data/images/20250401/anchor_3.png"
    );
    assert_eq!(
        items[0]["video_path"],
        "http://localhost:8003/data/videos/20250401/anchor_3.mp4"
    );
}

#[tokio::test]
async fn limit_is_clamped() {
    let (app, news_db, ..) = app().await;
    for n in 1..=22 {
        db::insert_news(&news_db, &news(n)).await.unwrap();
    }

    let (_, body) = call(&app, Method::GET, "/news?limit=2").await;
    assert_eq!(body.as_array().unwrap().len(), 2);
    let (_, body) = call(&app, Method::GET, "/news?limit=500").await;
    assert_eq!(body.as_array().unwrap().len(), 20);
    let (_, body) = call(&app, Method::GET, "/news").await;
    assert_eq!(body.as_array().unwrap().len(), 20);
    let (_, body) = call(&app, Method::GET, "/news?limit=0").await;
    assert_eq!(body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn get_and_delete_by_id() {
    let (app, news_db, ..) = app().await;
    let first = db::insert_news(&news_db, &news(1)).await.unwrap();
    let second = db::insert_news(&news_db, &news(2)).await.unwrap();

    let (status, body) = call(&app, Method::GET, &format!("/news/{}", first)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], first);
    assert_eq!(body["original_title"], "Earth title 1");

    let (status, body) = call(&app, Method::DELETE, &format!("/news/{}", first)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["message"],
        format!("News article {} deleted successfully", first)
    );
    assert_eq!(db::count_news(&news_db).await.unwrap(), 1);
    assert!(db::get_news(&news_db, second).await.unwrap().is_some());

    let (status, body) = call(&app, Method::GET, &format!("/news/{}", first)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["detail"], "News article not found");

    let (status, _) = call(&app, Method::DELETE, &format!("/news/{}", first)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(db::count_news(&news_db).await.unwrap(), 1);
}

#[tokio::test]
async fn story_dates_and_scenes() {
    let (app, _, story_db, _dir) = app().await;
    db::insert_story(&story_db, &story("20250401080000", "Morning"), &[scene(2), scene(1)])
        .await
        .unwrap();
    db::insert_story(&story_db, &story("20250401200000", "Evening"), &[scene(1)])
        .await
        .unwrap();
    db::insert_story(&story_db, &story("20250402090000", "Next day"), &[scene(1)])
        .await
        .unwrap();

    let (status, body) = call(&app, Method::GET, "/story/dates").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, serde_json::json!(["20250402", "20250401"]));

    let (status, body) = call(&app, Method::GET, "/story/scenes/date/20250401").await;
    assert_eq!(status, StatusCode::OK);
    let stories = body.as_array().unwrap();
    assert_eq!(stories.len(), 2);
    assert_eq!(stories[0]["title"], "Evening");
    assert_eq!(stories[1]["scenes"][0]["scene_number"], 1);
    assert_eq!(stories[1]["scenes"][1]["scene_number"], 2);
    assert_eq!(
        stories[1]["scenes"][0]["image_path"],
        "http://localhost:8003/data/story/20250401/scene/scene1.png"
    );

    let (_, body) = call(&app, Method::GET, "/story/scenes/date/20250401?latest_only=true").await;
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["title"], "Evening");

    let (status, body) = call(&app, Method::GET, "/story/scenes/date/19990101").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["detail"].as_str().unwrap().contains("19990101"));
}

#[tokio::test]
async fn serves_asset_files() {
    let (app, _, _, dir) = app().await;
    std::fs::create_dir_all(dir.path().join("images")).unwrap();
    std::fs::write(dir.path().join("images/a.png"), b"png").unwrap();

    let (status, body) = call(&app, Method::GET, "/data/images/a.png").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::String("png".into()));

    let (status, _) = call(&app, Method::GET, "/data/images/missing.png").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
