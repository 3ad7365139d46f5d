//! Submit / poll / fetch / download against asynchronous remote job APIs.
//!
//! Each backend implements [`RemoteTaskApi`]; the polling state machine in
//! [`await_completion`] is shared and never blocks the runtime thread.
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::error::{PipelineError, Result};
use crate::model::{RemoteTask, TaskStatus};

pub mod did;
pub mod runninghub;

/// One `{target, value}` parameter binding of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldBinding {
    pub node: String,
    pub field: String,
    pub value: String,
}

impl FieldBinding {
    pub fn new(node: impl Into<String>, field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            field: field.into(),
            value: value.into(),
        }
    }
}

/// Job description: an opaque workflow identifier plus its parameter bindings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub workflow: String,
    pub bindings: Vec<FieldBinding>,
}

impl JobSpec {
    pub fn binding(&self, field: &str) -> Option<&str> {
        self.bindings
            .iter()
            .find(|b| b.field == field)
            .map(|b| b.value.as_str())
    }
}

/// Outcome of a single status check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub status: TaskStatus,
    /// Artifact URL when the status payload already carries it.
    pub result_url: Option<String>,
    /// Raw remote payload, kept for error reporting.
    pub payload: String,
}

#[async_trait]
pub trait RemoteTaskApi: Send + Sync {
    fn service(&self) -> &'static str;

    async fn submit(&self, job: &JobSpec) -> Result<String>;

    /// Single status check. Transport or decoding failures yield `None`.
    async fn poll_status(&self, task_id: &str) -> Option<StatusReport>;

    /// Resolve the artifact URL of a succeeded task.
    async fn fetch_result(&self, task_id: &str, report: &StatusReport) -> Result<String>;
}

/// Fixed attempt-count × fixed-delay budget for one remote task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 60,
            interval: Duration::from_secs(10),
        }
    }
}

/// Cloneable cancellation flag shared by every in-flight poll of a batch.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelSignal {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// A signal that trips whenever `self` trips, but whose own `cancel`
    /// never reaches `self`. Must be called from inside a runtime; the
    /// forwarding task ends once either side trips.
    pub fn child(&self) -> CancelSignal {
        let child = CancelSignal::new();
        if self.is_cancelled() {
            child.cancel();
            return child;
        }
        let parent = self.clone();
        let forward = child.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = parent.cancelled() => forward.cancel(),
                _ = forward.cancelled() => {}
            }
        });
        child
    }

    /// Resolves once [`cancel`](Self::cancel) has been called on any clone.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // sender lives as long as any clone of the signal
                return futures::future::pending::<()>().await;
            }
        }
    }
}

/// Poll `task_id` until it reaches a terminal state or the budget runs out.
#[instrument(skip_all, fields(service = api.service(), task_id = %task_id))]
pub async fn await_completion(
    api: &dyn RemoteTaskApi,
    task_id: &str,
    policy: &PollPolicy,
    cancel: &CancelSignal,
) -> Result<RemoteTask> {
    for attempt in 1..=policy.max_attempts {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        match api.poll_status(task_id).await {
            None => warn!(attempt, max = policy.max_attempts, "status unknown"),
            Some(report) => match report.status {
                TaskStatus::Succeeded => {
                    let url = api.fetch_result(task_id, &report).await?;
                    info!(attempt, "remote task succeeded");
                    return Ok(RemoteTask {
                        task_id: task_id.to_string(),
                        status: TaskStatus::Succeeded,
                        result_url: Some(url),
                    });
                }
                TaskStatus::Failed | TaskStatus::TimedOut => {
                    warn!(attempt, payload = %report.payload, "remote task failed");
                    return Err(PipelineError::TaskFailed {
                        task_id: task_id.to_string(),
                        payload: report.payload,
                    });
                }
                status => debug!(attempt, status = status.as_str(), "remote task pending"),
            },
        }

        if attempt < policy.max_attempts {
            tokio::select! {
                _ = tokio::time::sleep(policy.interval) => {}
                _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            }
        }
    }

    warn!(attempts = policy.max_attempts, "remote task timed out");
    Err(PipelineError::TaskTimeout {
        task_id: task_id.to_string(),
        attempts: policy.max_attempts,
    })
}

/// Submit, wait, and download the artifact to `dest`.
pub async fn run_to_file(
    api: &dyn RemoteTaskApi,
    http: &Client,
    job: &JobSpec,
    policy: &PollPolicy,
    cancel: &CancelSignal,
    dest: &Path,
) -> Result<PathBuf> {
    let task_id = api.submit(job).await?;
    info!(service = api.service(), %task_id, workflow = %job.workflow, "remote task submitted");
    let task = await_completion(api, &task_id, policy, cancel).await?;
    let url = task.result_url.ok_or_else(|| PipelineError::TaskFailed {
        task_id: task.task_id.clone(),
        payload: "no result url".into(),
    })?;
    download_artifact(http, &url, dest).await
}

/// Stream `url` to `dest`, creating parent directories as needed.
#[instrument(skip_all, fields(%url))]
pub async fn download_artifact(http: &Client, url: &str, dest: &Path) -> Result<PathBuf> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| PipelineError::io(parent, e))?;
    }

    let response = http.get(url).send().await?;
    if response.status() != StatusCode::OK {
        return Err(PipelineError::Download {
            url: url.to_string(),
            status: response.status().as_u16(),
        });
    }

    let mut file = tokio::fs::File::create(dest)
        .await
        .map_err(|e| PipelineError::io(dest, e))?;
    let mut stream = response.bytes_stream();
    let mut written = 0usize;
    while let Some(chunk) = stream.next().await {
        let data = chunk?;
        written += data.len();
        file.write_all(&data)
            .await
            .map_err(|e| PipelineError::io(dest, e))?;
    }
    file.flush().await.map_err(|e| PipelineError::io(dest, e))?;
    info!(path = %dest.display(), bytes = written, "artifact downloaded");
    Ok(dest.to_path_buf())
}

/// Render a remote id that may arrive as a JSON string or number.
pub(crate) fn id_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// MIME type for the artifact extensions the pipeline handles.
pub(crate) fn content_type(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|s| s.to_ascii_lowercase())
    {
        Some(ext) if ext == "jpg" || ext == "jpeg" => "image/jpeg",
        Some(ext) if ext == "png" => "image/png",
        Some(ext) if ext == "mp3" => "audio/mpeg",
        Some(ext) if ext == "wav" => "audio/wav",
        Some(ext) if ext == "mp4" => "video/mp4",
        _ => "application/octet-stream",
    }
}
