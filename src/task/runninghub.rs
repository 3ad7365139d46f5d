//! RunningHub workflow backend: portrait images and audio-driven talking heads.
use async_trait::async_trait;
use reqwest::{Client, Url};
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
use crate::media::{PortraitBackend, Speech, TalkingHeadBackend};
use crate::model::TaskStatus;

const SERVICE: &str = "runninghub";

/// Workflow node that receives the portrait prompt.
const PROMPT_NODE: &str = "50";
const VIDEO_IMAGE_NODE: &str = "3";
const VIDEO_AUDIO_NODE: &str = "2";

#[derive(Clone)]
pub struct RunningHubClient {
    http: Client,
    base_url: Url,
    api_key: String,
    image_workflow: String,
    video_workflow: String,
    poll: PollPolicy,
}

impl fmt::Debug for RunningHubClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunningHubClient")
            .field("base_url", &self.base_url)
            .field("image_workflow", &self.image_workflow)
            .field("video_workflow", &self.video_workflow)
            .finish_non_exhaustive()
    }
}

/// `{code, msg, data}` envelope every RunningHub endpoint answers with.
#[derive(Debug, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub data: Value,
}

impl RunningHubClient {
    pub fn from_config(cfg: &config::RunningHub, poll: PollPolicy) -> Result<Self> {
        let base_url = Url::parse(&cfg.base_url)
            .map_err(|e| PipelineError::validation(format!("runninghub base_url: {}", e)))?;
        Self::with_base_url(
            cfg.api_key.clone(),
            cfg.image_workflow.clone(),
            cfg.video_workflow.clone(),
            base_url,
            poll,
        )
    }

    pub fn with_base_url(
        api_key: String,
        image_workflow: String,
        video_workflow: String,
        base_url: Url,
        poll: PollPolicy,
    ) -> Result<Self> {
        let http = Client::builder().user_agent("alien-newsroom/0.1").build()?;
        Ok(Self {
            http,
            base_url,
            api_key,
            image_workflow,
            video_workflow,
            poll,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| PipelineError::validation(format!("runninghub endpoint {}: {}", path, e)))
    }

    pub fn build_create_request(&self, job: &JobSpec) -> Result<reqwest::Request> {
        let node_info: Vec<Value> = job
            .bindings
            .iter()
            .map(|b| json!({ "nodeId": b.node, "fieldName": b.field, "fieldValue": b.value }))
            .collect();
        let body = json!({
            "apiKey": self.api_key,
            "workflowId": job.workflow,
            "nodeInfoList": node_info,
        });
        Ok(self
            .http
            .post(self.endpoint("task/openapi/create")?)
            .json(&body)
            .build()?)
    }

    async fn post_task_query(&self, path: &str, task_id: &str) -> Result<Envelope> {
        let body = json!({ "apiKey": self.api_key, "taskId": task_id });
        let res = self.http.post(self.endpoint(path)?).json(&body).send().await?;
        let status = res.status();
        if !status.is_success() {
            return Err(PipelineError::Upstream {
                service: SERVICE,
                status: status.as_u16(),
                body: res.text().await.unwrap_or_default(),
            });
        }
        Ok(res.json::<Envelope>().await?)
    }

    /// Upload a local file and return the remote file name to bind into a job.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub async fn upload_file(&self, path: &Path, file_type: &str) -> Result<String> {
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| PipelineError::io(path, e))?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload.bin")
            .to_string();
        let form = reqwest::multipart::Form::new()
            .text("apiKey", self.api_key.clone())
            .text("fileType", file_type.to_string())
            .part(
                "file",
                reqwest::multipart::Part::bytes(data)
                    .file_name(file_name)
                    .mime_str(content_type(path))?,
            );

        let res = self
            .http
            .post(self.endpoint("task/openapi/upload")?)
            .multipart(form)
            .send()
            .await?;
        let status = res.status();
        let text = res.text().await?;
        if !status.is_success() {
            return Err(PipelineError::submission(
                SERVICE,
                format!("upload of {} failed ({}): {}", file_type, status, text),
            ));
        }
        let envelope: Envelope = serde_json::from_str(&text)
            .map_err(|e| PipelineError::submission(SERVICE, format!("bad upload response: {}", e)))?;
        if envelope.code != 0 {
            return Err(PipelineError::submission(
                SERVICE,
                format!(
                    "upload of {} rejected (code {}): {}",
                    file_type,
                    envelope.code,
                    envelope.msg.unwrap_or_default()
                ),
            ));
        }
        let name = envelope
            .data
            .get("fileName")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| PipelineError::submission(SERVICE, "upload response has no fileName"))?;
        info!(file_type, remote = %name, "uploaded file");
        Ok(name)
    }
}

/// Map a status envelope onto the shared task states.
pub fn interpret_status(envelope: &Envelope) -> TaskStatus {
    if envelope.code != 0 {
        return TaskStatus::Failed;
    }
    match envelope.data.as_str().unwrap_or_default() {
        "SUCCESS" => TaskStatus::Succeeded,
        "FAILED" => TaskStatus::Failed,
        "QUEUED" => TaskStatus::Queued,
        _ => TaskStatus::Running,
    }
}

#[async_trait]
impl RemoteTaskApi for RunningHubClient {
    fn service(&self) -> &'static str {
        SERVICE
    }

    #[instrument(skip_all, fields(workflow = %job.workflow))]
    async fn submit(&self, job: &JobSpec) -> Result<String> {
        let request = self.build_create_request(job)?;
        let res = self.http.execute(request).await?;
        let status = res.status();
        let text = res.text().await?;
        if !status.is_success() {
            return Err(PipelineError::submission(SERVICE, format!("{}: {}", status, text)));
        }
        let envelope: Envelope = serde_json::from_str(&text)
            .map_err(|e| PipelineError::submission(SERVICE, format!("bad create response: {}", e)))?;
        if envelope.code != 0 {
            return Err(PipelineError::submission(
                SERVICE,
                envelope.msg.unwrap_or_else(|| format!("code {}", envelope.code)),
            ));
        }
        envelope
            .data
            .get("taskId")
            .and_then(id_string)
            .ok_or_else(|| PipelineError::submission(SERVICE, "create response has no taskId"))
    }

    async fn poll_status(&self, task_id: &str) -> Option<StatusReport> {
        match self.post_task_query("task/openapi/status", task_id).await {
            Ok(envelope) => {
                let status = interpret_status(&envelope);
                let payload = match &envelope.msg {
                    Some(msg) if !msg.is_empty() => format!("code {}: {} ({})", envelope.code, msg, envelope.data),
                    _ => format!("code {}: {}", envelope.code, envelope.data),
                };
                Some(StatusReport {
                    status,
                    result_url: None,
                    payload,
                })
            }
            Err(err) => {
                warn!(%task_id, ?err, "runninghub status check failed");
                None
            }
        }
    }

    async fn fetch_result(&self, task_id: &str, _report: &StatusReport) -> Result<String> {
        let envelope = self.post_task_query("task/openapi/outputs", task_id).await?;
        if envelope.code != 0 {
            return Err(PipelineError::TaskFailed {
                task_id: task_id.to_string(),
                payload: envelope.msg.unwrap_or_else(|| "outputs unavailable".into()),
            });
        }
        let first = envelope.data.as_array().and_then(|outputs| outputs.first());
        if let Some(cost) = first.and_then(|o| o.get("taskCostTime")) {
            info!(%task_id, cost = %cost, "runninghub task cost");
        }
        first
            .and_then(|o| o.get("fileUrl"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| PipelineError::TaskFailed {
                task_id: task_id.to_string(),
                payload: "no outputs".into(),
            })
    }
}

#[async_trait]
impl PortraitBackend for RunningHubClient {
    fn name(&self) -> &'static str {
        SERVICE
    }

    async fn render(
        &self,
        prompt: &str,
        _reference: Option<&Path>,
        dest: &Path,
        cancel: &CancelSignal,
    ) -> Result<PathBuf> {
        let job = JobSpec {
            workflow: self.image_workflow.clone(),
            bindings: vec![FieldBinding::new(PROMPT_NODE, "text", prompt)],
        };
        run_to_file(self, &self.http, &job, &self.poll, cancel, dest).await
    }
}

#[async_trait]
impl TalkingHeadBackend for RunningHubClient {
    fn name(&self) -> &'static str {
        SERVICE
    }

    fn supports_text_speech(&self) -> bool {
        false
    }

    async fn render(
        &self,
        image: &Path,
        speech: &Speech,
        dest: &Path,
        cancel: &CancelSignal,
    ) -> Result<PathBuf> {
        let Speech::Audio(audio) = speech else {
            return Err(PipelineError::validation(
                "runninghub talking heads need a pre-rendered audio file",
            ));
        };
        let uploaded_audio = self.upload_file(audio, "audio").await?;
        let uploaded_image = self.upload_file(image, "image").await?;
        let job = JobSpec {
            workflow: self.video_workflow.clone(),
            bindings: vec![
                FieldBinding::new(VIDEO_IMAGE_NODE, "image", uploaded_image),
                FieldBinding::new(VIDEO_AUDIO_NODE, "audio", uploaded_audio),
            ],
        };
        run_to_file(self, &self.http, &job, &self.poll, cancel, dest).await
    }
}
