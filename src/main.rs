use anyhow::Result;
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use alien_newsroom::config::{self, Scope};
use alien_newsroom::db;
use alien_newsroom::news::NewsApiClient;
use alien_newsroom::pipeline::{until_next_run, NewsPipeline, PipelineContext};
use alien_newsroom::task::CancelSignal;

#[derive(Debug, Parser)]
#[command(author, version, about = "Turn today's headlines into alien news segments")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Run one batch immediately and exit instead of waiting for the schedule
    #[arg(long)]
    run_now: bool,
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
    cfg.check_credentials(Scope::News)?;
    cfg.ensure_dirs()?;

    let database_url = std::env::var("NEWS_DATABASE_URL")
        .unwrap_or_else(|_| db::default_database_url(Path::new(&cfg.app.data_dir), "news.db"));
    let pool = db::init_pool(&database_url).await?;
    db::run_news_migrations(&pool).await?;

    let pipeline = NewsPipeline::new(PipelineContext::from_config(&cfg, pool)?);
    let source = NewsApiClient::from_config(&cfg.news_api)?;

    let cancel = CancelSignal::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling in-flight work");
            on_signal.cancel();
        }
    });

    loop {
        if !args.run_now {
            let wait = until_next_run(
                chrono::Utc::now(),
                cfg.pipeline.schedule_hour,
                cfg.pipeline.utc_offset_hours,
            );
            info!(secs = wait.as_secs(), "waiting for next scheduled run");
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = cancel.cancelled() => break,
            }
        }

        match pipeline.run_daily(&source, cancel.clone()).await {
            Ok(Some(report)) => {
                for failure in &report.failures {
                    warn!(index = failure.index, title = %failure.title, error = %failure.error, "article failed");
                }
                info!(report = %report, "daily run finished");
            }
            Ok(None) => info!("daily run skipped"),
            Err(err) => error!(?err, "daily run failed"),
        }

        if args.run_now || cancel.is_cancelled() {
            break;
        }
    }

    Ok(())
}
