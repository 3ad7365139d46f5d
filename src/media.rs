//! Image and talking-head generation seams.
//!
//! The pipeline only sees these two traits; which service sits behind them is
//! decided once, from configuration, by the `build_*` functions below.
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{Config, ImageBackendKind, VideoBackendKind};
use crate::error::Result;
use crate::llm::GeminiClient;
use crate::task::did::DidClient;
use crate::task::runninghub::RunningHubClient;
use crate::task::{CancelSignal, PollPolicy};

/// What the talking head says: a pre-rendered audio file, or a script the
/// backend voices itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Speech {
    Audio(PathBuf),
    Text { script: String, voice_id: String },
}

#[async_trait]
pub trait PortraitBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Render `prompt` to `dest`. `reference` is an image the result should be
    /// conditioned on; backends that cannot take one ignore it.
    async fn render(
        &self,
        prompt: &str,
        reference: Option<&Path>,
        dest: &Path,
        cancel: &CancelSignal,
    ) -> Result<PathBuf>;
}

#[async_trait]
pub trait TalkingHeadBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn supports_text_speech(&self) -> bool;

    async fn render(
        &self,
        image: &Path,
        speech: &Speech,
        dest: &Path,
        cancel: &CancelSignal,
    ) -> Result<PathBuf>;
}

pub fn poll_policy(cfg: &Config) -> PollPolicy {
    PollPolicy {
        max_attempts: cfg.pipeline.poll.max_attempts,
        interval: cfg.poll_interval(),
    }
}

pub fn build_portrait_backend(cfg: &Config) -> Result<Arc<dyn PortraitBackend>> {
    Ok(match cfg.pipeline.image_backend {
        ImageBackendKind::Runninghub => {
            Arc::new(RunningHubClient::from_config(&cfg.runninghub, poll_policy(cfg))?)
        }
        ImageBackendKind::Gemini => Arc::new(GeminiClient::from_config(cfg)?),
    })
}

pub fn build_talking_head_backend(cfg: &Config) -> Result<Arc<dyn TalkingHeadBackend>> {
    Ok(match cfg.pipeline.video_backend {
        VideoBackendKind::Runninghub => {
            Arc::new(RunningHubClient::from_config(&cfg.runninghub, poll_policy(cfg))?)
        }
        VideoBackendKind::Did => Arc::new(DidClient::from_config(&cfg.did, poll_policy(cfg))?),
    })
}
