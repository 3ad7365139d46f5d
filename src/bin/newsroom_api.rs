use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::info;

use alien_newsroom::api::{self, ApiState};
use alien_newsroom::config::{self, Scope};
use alien_newsroom::db;

#[derive(Debug, Parser)]
#[command(author, version, about = "Serve stored news segments, stories and their assets")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.check_credentials(Scope::Api)?;
    cfg.ensure_dirs()?;

    let data_dir = Path::new(&cfg.app.data_dir);
    let news_url = std::env::var("NEWS_DATABASE_URL")
        .unwrap_or_else(|_| db::default_database_url(data_dir, "news.db"));
    let story_url = std::env::var("STORY_DATABASE_URL")
        .unwrap_or_else(|_| db::default_database_url(data_dir, "story.db"));

    let news = db::init_pool(&news_url).await?;
    db::run_news_migrations(&news).await?;
    let stories = db::init_pool(&story_url).await?;
    db::run_story_migrations(&stories).await?;

    let state = ApiState {
        news,
        stories,
        public_base_url: cfg.api.public_base_url.clone(),
    };
    let app = api::router(state, data_dir);

    let listener = tokio::net::TcpListener::bind(&cfg.api.bind)
        .await
        .with_context(|| format!("binding {}", cfg.api.bind))?;
    info!(bind = %cfg.api.bind, "serving newsroom api");
    axum::serve(listener, app).await?;
    Ok(())
}
