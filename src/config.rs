//! Configuration loader and validator for the newsroom pipeline and API.
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::storage::IdempotencyPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub news_api: NewsApi,
    pub llm: Llm,
    pub tts: Tts,
    pub runninghub: RunningHub,
    pub did: Did,
    pub pipeline: Pipeline,
    pub api: Api,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    pub characters_dir: String,
    /// Style reference sent alongside portrait prompts to image models that accept one.
    #[serde(default)]
    pub reference_image: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewsApi {
    pub api_key: String,
    #[serde(default = "default_news_url")]
    pub base_url: String,
    pub country: String,
    pub category: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Llm {
    pub api_key: String,
    #[serde(default = "default_llm_url")]
    pub base_url: String,
    pub text_model: String,
    pub image_model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tts {
    pub api_key: String,
    #[serde(default = "default_tts_url")]
    pub base_url: String,
    pub model_id: String,
    pub output_format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunningHub {
    pub api_key: String,
    #[serde(default = "default_runninghub_url")]
    pub base_url: String,
    pub image_workflow: String,
    pub video_workflow: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Did {
    pub api_key: String,
    #[serde(default = "default_did_url")]
    pub base_url: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VideoBackendKind {
    Runninghub,
    Did,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ImageBackendKind {
    Runninghub,
    Gemini,
}

/// Orchestration settings shared by the news and story pipelines.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pipeline {
    pub video_backend: VideoBackendKind,
    pub image_backend: ImageBackendKind,
    /// Let the talking-head backend synthesise speech from the script.
    #[serde(default)]
    pub text_speech: bool,
    #[serde(default)]
    pub use_character_file: bool,
    pub articles: usize,
    pub concurrency: usize,
    #[serde(default)]
    pub idempotency: IdempotencyPolicy,
    pub poll: Poll,
    #[serde(default)]
    pub batch_deadline_secs: Option<u64>,
    pub schedule_hour: u32,
    pub utc_offset_hours: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Poll {
    pub max_attempts: u32,
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Api {
    pub bind: String,
    pub public_base_url: String,
}

/// Which binary is about to use the configuration; decides which secrets must be present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    News,
    Story,
    Api,
}

fn default_news_url() -> String {
    "https://newsapi.org/".into()
}

fn default_llm_url() -> String {
    "https://generativelanguage.googleapis.com/".into()
}

fn default_tts_url() -> String {
    "https://api.elevenlabs.io/".into()
}

fn default_runninghub_url() -> String {
    "https://www.runninghub.ai/".into()
}

fn default_did_url() -> String {
    "https://api.d-id.com/".into()
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.pipeline.poll.interval_secs)
    }

    /// Check that the secrets needed by `scope` were provided.
    pub fn check_credentials(&self, scope: Scope) -> Result<(), ConfigError> {
        if scope == Scope::Api {
            return Ok(());
        }
        if scope == Scope::News && self.news_api.api_key.trim().is_empty() {
            return Err(ConfigError::Invalid("news_api.api_key must be non-empty"));
        }
        if self.llm.api_key.trim().is_empty() {
            return Err(ConfigError::Invalid("llm.api_key must be non-empty"));
        }
        if self.tts.api_key.trim().is_empty() {
            return Err(ConfigError::Invalid("tts.api_key must be non-empty"));
        }
        let needs_runninghub = self.pipeline.image_backend == ImageBackendKind::Runninghub
            || (scope == Scope::News
                && self.pipeline.video_backend == VideoBackendKind::Runninghub);
        if needs_runninghub && self.runninghub.api_key.trim().is_empty() {
            return Err(ConfigError::Invalid("runninghub.api_key must be non-empty"));
        }
        if scope == Scope::News
            && self.pipeline.video_backend == VideoBackendKind::Did
            && self.did.api_key.trim().is_empty()
        {
            return Err(ConfigError::Invalid("did.api_key must be non-empty"));
        }
        Ok(())
    }
}

static ENV_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid placeholder regex"));

/// Replace `${VAR}` placeholders with environment values; unset variables become empty.
pub fn expand_env(raw: &str) -> String {
    ENV_PLACEHOLDER
        .replace_all(raw, |caps: &regex::Captures<'_>| {
            std::env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned()
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&expand_env(&content))?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.characters_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.characters_dir must be non-empty"));
    }

    for url in [
        &cfg.news_api.base_url,
        &cfg.llm.base_url,
        &cfg.tts.base_url,
        &cfg.runninghub.base_url,
        &cfg.did.base_url,
    ] {
        if reqwest::Url::parse(url).is_err() {
            return Err(ConfigError::Invalid("service base_url must be an absolute URL"));
        }
    }

    if cfg.llm.text_model.trim().is_empty() {
        return Err(ConfigError::Invalid("llm.text_model must be non-empty"));
    }
    if cfg.runninghub.image_workflow.trim().is_empty()
        || cfg.runninghub.video_workflow.trim().is_empty()
    {
        return Err(ConfigError::Invalid("runninghub workflows must be non-empty"));
    }

    let p = &cfg.pipeline;
    if p.poll.max_attempts == 0 {
        return Err(ConfigError::Invalid("pipeline.poll.max_attempts must be > 0"));
    }
    if p.poll.interval_secs == 0 {
        return Err(ConfigError::Invalid("pipeline.poll.interval_secs must be > 0"));
    }
    if p.concurrency == 0 {
        return Err(ConfigError::Invalid("pipeline.concurrency must be > 0"));
    }
    if p.articles == 0 || p.articles > 100 {
        return Err(ConfigError::Invalid("pipeline.articles must be within 1..=100"));
    }
    if p.schedule_hour > 23 {
        return Err(ConfigError::Invalid("pipeline.schedule_hour must be within 0..=23"));
    }
    if !(-12..=14).contains(&p.utc_offset_hours) {
        return Err(ConfigError::Invalid("pipeline.utc_offset_hours must be within -12..=14"));
    }

    if cfg.api.bind.trim().is_empty() {
        return Err(ConfigError::Invalid("api.bind must be non-empty"));
    }
    if cfg.api.public_base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("api.public_base_url must be non-empty"));
    }

    Ok(())
}

/// Returns the example YAML configuration.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  characters_dir: "./resource/characters"
  # style reference for image models that accept one, e.g. "./resource/reference.png"
  # reference_image: "./resource/reference.png"

news_api:
  api_key: "${NEWS_API_KEY}"
  country: "us"
  category: "general"

llm:
  api_key: "${GEMINI_API_KEY}"
  text_model: "gemini-2.0-flash"
  image_model: "gemini-2.0-flash-exp-image-generation"

tts:
  api_key: "${ELEVENLABS_API_KEY}"
  model_id: "eleven_multilingual_v2"
  output_format: "mp3_44100_128"

runninghub:
  api_key: "${RUNNINGHUB_API_KEY}"
  image_workflow: "1912608474486796289"
  video_workflow: "1911463855787077633"

did:
  api_key: "${DID_API_KEY}"

pipeline:
  video_backend: runninghub
  image_backend: runninghub
  text_speech: false
  use_character_file: false
  articles: 3
  concurrency: 2
  idempotency: always
  poll:
    max_attempts: 60
    interval_secs: 10
  batch_deadline_secs: 3600
  schedule_hour: 0
  utc_offset_hours: 8

api:
  bind: "0.0.0.0:8003"
  public_base_url: "http://localhost:8003/data"
"#
}
