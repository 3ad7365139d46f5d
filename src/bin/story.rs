use anyhow::Result;
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use alien_newsroom::config::{self, Scope};
use alien_newsroom::db;
use alien_newsroom::pipeline::story::StoryPipeline;
use alien_newsroom::task::CancelSignal;

#[derive(Debug, Parser)]
#[command(author, version, about = "Generate one illustrated, narrated alien adventure")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Character YAML to star in the story; a random one is drawn when omitted
    #[arg(long)]
    character: Option<PathBuf>,
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
    cfg.check_credentials(Scope::Story)?;
    cfg.ensure_dirs()?;

    let database_url = std::env::var("STORY_DATABASE_URL")
        .unwrap_or_else(|_| db::default_database_url(Path::new(&cfg.app.data_dir), "story.db"));
    let pool = db::init_pool(&database_url).await?;
    db::run_story_migrations(&pool).await?;

    let pipeline = StoryPipeline::from_config(&cfg, pool)?;

    let cancel = CancelSignal::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling story");
            on_signal.cancel();
        }
    });

    let outcome = pipeline.run(args.character.as_deref(), &cancel).await?;
    info!(
        story_id = outcome.story_id,
        title = %outcome.title,
        character = %outcome.character_name,
        scenes = outcome.scenes_kept,
        path = %outcome.story_path.display(),
        "story complete"
    );
    Ok(())
}
