//! Error taxonomy for the generation pipeline, its remote clients and storage.
use std::path::{Path, PathBuf};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The remote job API refused the job or answered without a task id.
    #[error("submission rejected by {service}: {reason}")]
    Submission {
        service: &'static str,
        reason: String,
    },
    /// The remote job reached a failed/rejected terminal state.
    #[error("remote task {task_id} failed: {payload}")]
    TaskFailed { task_id: String, payload: String },
    #[error("remote task {task_id} still unfinished after {attempts} status checks")]
    TaskTimeout { task_id: String, attempts: u32 },
    #[error("download of {url} failed with status {status}")]
    Download { url: String, status: u16 },
    /// Model output that could not be parsed. `raw` keeps the full text.
    #[error("malformed model response ({reason}): {raw}")]
    MalformedResponse { raw: String, reason: String },
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("database error: {0}")]
    Persistence(#[from] sqlx::Error),
    #[error("{service} returned {status}: {body}")]
    Upstream {
        service: &'static str,
        status: u16,
        body: String,
    },
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("cancelled")]
    Cancelled,
}

impl PipelineError {
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn submission(service: &'static str, reason: impl Into<String>) -> Self {
        PipelineError::Submission {
            service,
            reason: reason.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        PipelineError::Validation(msg.into())
    }
}
