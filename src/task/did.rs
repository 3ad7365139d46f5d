//! D-ID talking-head backend. Speech is either an uploaded audio file or a
//! script the service voices itself through its ElevenLabs provider.
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};

use super::{
    content_type, id_string, run_to_file, CancelSignal, FieldBinding, JobSpec, PollPolicy,
    RemoteTaskApi, StatusReport,
};
use crate::config;
use crate::error::{PipelineError, Result};
use crate::media::{Speech, TalkingHeadBackend};
use crate::model::TaskStatus;

const SERVICE: &str = "d-id";

pub const SCRIPT_AUDIO: &str = "audio";
pub const SCRIPT_TEXT: &str = "text";

#[derive(Clone)]
pub struct DidClient {
    http: Client,
    base_url: Url,
    api_key: String,
    poll: PollPolicy,
}

impl fmt::Debug for DidClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DidClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct TalkStatus {
    #[serde(default)]
    status: String,
    #[serde(default)]
    result_url: Option<String>,
    #[serde(default)]
    error: Option<Value>,
}

impl DidClient {
    pub fn from_config(cfg: &config::Did, poll: PollPolicy) -> Result<Self> {
        let base_url = Url::parse(&cfg.base_url)
            .map_err(|e| PipelineError::validation(format!("d-id base_url: {}", e)))?;
        Self::with_base_url(cfg.api_key.clone(), base_url, poll)
    }

    pub fn with_base_url(api_key: String, base_url: Url, poll: PollPolicy) -> Result<Self> {
        let http = Client::builder().user_agent("alien-newsroom/0.1").build()?;
        Ok(Self {
            http,
            base_url,
            api_key,
            poll,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| PipelineError::validation(format!("d-id endpoint {}: {}", path, e)))
    }

    fn auth(&self) -> String {
        format!("Basic {}", self.api_key)
    }

    async fn upload(&self, path: &Path, endpoint: &str, field: &'static str) -> Result<String> {
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| PipelineError::io(path, e))?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(field)
            .to_string();
        let form = reqwest::multipart::Form::new().part(
            field,
            reqwest::multipart::Part::bytes(data)
                .file_name(file_name)
                .mime_str(content_type(path))?,
        );
        let res = self
            .http
            .post(self.endpoint(endpoint)?)
            .header("Authorization", self.auth())
            .header("accept", "application/json")
            .multipart(form)
            .send()
            .await?;
        let status = res.status();
        let body = res.text().await?;
        if status != StatusCode::CREATED {
            return Err(PipelineError::submission(
                SERVICE,
                format!("{} upload failed ({}): {}", field, status, body),
            ));
        }
        let value: Value = serde_json::from_str(&body)?;
        let url = value
            .get("url")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| PipelineError::submission(SERVICE, format!("{} upload returned no url", field)))?;
        info!(field, %url, "uploaded to d-id");
        Ok(url)
    }

    #[instrument(skip_all, fields(path = %path.display()))]
    pub async fn upload_image(&self, path: &Path) -> Result<String> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        if !matches!(ext.as_str(), "jpg" | "jpeg" | "png") {
            return Err(PipelineError::validation(format!(
                "d-id only accepts .jpg, .jpeg or .png images, got {}",
                path.display()
            )));
        }
        self.upload(path, "images", "image").await
    }

    #[instrument(skip_all, fields(path = %path.display()))]
    pub async fn upload_audio(&self, path: &Path) -> Result<String> {
        self.upload(path, "audios", "audio").await
    }

    pub fn build_talk_request(&self, job: &JobSpec) -> Result<reqwest::Request> {
        Ok(self
            .http
            .post(self.endpoint("talks")?)
            .header("Authorization", self.auth())
            .header("accept", "application/json")
            .json(&talk_payload(job)?)
            .build()?)
    }
}

/// Render the `/talks` body from a job. The workflow names the script type.
pub fn talk_payload(job: &JobSpec) -> Result<Value> {
    let need = |field: &str| {
        job.binding(field)
            .map(str::to_string)
            .ok_or_else(|| PipelineError::validation(format!("talk job is missing {}", field)))
    };
    let script = match job.workflow.as_str() {
        SCRIPT_AUDIO => json!({ "type": "audio", "audio_url": need("audio_url")? }),
        SCRIPT_TEXT => json!({
            "type": "text",
            "input": need("input")?,
            "provider": { "type": "elevenlabs", "voice_id": need("voice_id")? },
        }),
        other => {
            return Err(PipelineError::validation(format!(
                "unknown d-id script type '{}'",
                other
            )))
        }
    };
    Ok(json!({
        "source_url": need("source_url")?,
        "script": script,
        "config": {
            "result_format": "mp4",
            "fluent": true,
            "pad_audio": "0.5",
            "stitch": true,
        },
    }))
}

fn interpret_status(status: &str) -> TaskStatus {
    match status {
        "done" => TaskStatus::Succeeded,
        "error" | "rejected" => TaskStatus::Failed,
        "created" => TaskStatus::Queued,
        _ => TaskStatus::Running,
    }
}

#[async_trait]
impl RemoteTaskApi for DidClient {
    fn service(&self) -> &'static str {
        SERVICE
    }

    #[instrument(skip_all, fields(script = %job.workflow))]
    async fn submit(&self, job: &JobSpec) -> Result<String> {
        let request = self.build_talk_request(job)?;
        let res = self.http.execute(request).await?;
        let status = res.status();
        let body = res.text().await?;
        if status != StatusCode::CREATED {
            return Err(PipelineError::submission(SERVICE, format!("{}: {}", status, body)));
        }
        let value: Value = serde_json::from_str(&body)
            .map_err(|e| PipelineError::submission(SERVICE, format!("bad talk response: {}", e)))?;
        value
            .get("id")
            .and_then(id_string)
            .ok_or_else(|| PipelineError::submission(SERVICE, "talk response has no id"))
    }

    async fn poll_status(&self, task_id: &str) -> Option<StatusReport> {
        let url = match self.endpoint(&format!("talks/{}", task_id)) {
            Ok(url) => url,
            Err(err) => {
                warn!(%task_id, ?err, "bad d-id status url");
                return None;
            }
        };
        let res = match self
            .http
            .get(url)
            .header("Authorization", self.auth())
            .header("accept", "application/json")
            .send()
            .await
        {
            Ok(res) => res,
            Err(err) => {
                warn!(%task_id, ?err, "d-id status request failed");
                return None;
            }
        };
        if !res.status().is_success() {
            warn!(%task_id, status = %res.status(), "d-id status check rejected");
            return None;
        }
        match res.json::<TalkStatus>().await {
            Ok(talk) => Some(StatusReport {
                status: interpret_status(&talk.status),
                result_url: talk.result_url,
                payload: talk
                    .error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| talk.status.clone()),
            }),
            Err(err) => {
                warn!(%task_id, ?err, "d-id status body unreadable");
                None
            }
        }
    }

    async fn fetch_result(&self, task_id: &str, report: &StatusReport) -> Result<String> {
        report
            .result_url
            .clone()
            .ok_or_else(|| PipelineError::TaskFailed {
                task_id: task_id.to_string(),
                payload: "no outputs".into(),
            })
    }
}

#[async_trait]
impl TalkingHeadBackend for DidClient {
    fn name(&self) -> &'static str {
        SERVICE
    }

    fn supports_text_speech(&self) -> bool {
        true
    }

    async fn render(
        &self,
        image: &Path,
        speech: &Speech,
        dest: &Path,
        cancel: &CancelSignal,
    ) -> Result<PathBuf> {
        let source_url = self.upload_image(image).await?;
        let mut bindings = vec![FieldBinding::new("source", "source_url", source_url)];
        let workflow = match speech {
            Speech::Audio(audio) => {
                let audio_url = self.upload_audio(audio).await?;
                bindings.push(FieldBinding::new("script", "audio_url", audio_url));
                SCRIPT_AUDIO
            }
            Speech::Text { script, voice_id } => {
                bindings.push(FieldBinding::new("script", "input", script.as_str()));
                bindings.push(FieldBinding::new("provider", "voice_id", voice_id.as_str()));
                SCRIPT_TEXT
            }
        };
        let job = JobSpec {
            workflow: workflow.to_string(),
            bindings,
        };
        run_to_file(self, &self.http, &job, &self.poll, cancel, dest).await
    }
}
