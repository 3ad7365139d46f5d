//! Hosted LLM access over the Gemini `generateContent` REST endpoint.
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::{Client, Url};
use serde_json::{json, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::media::PortraitBackend;
use crate::storage::write_bytes;
use crate::task::{content_type, CancelSignal};

const SERVICE: &str = "gemini";

/// Anything that turns a prompt into raw text.
#[async_trait]
pub trait TextModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

#[derive(Clone)]
pub struct GeminiClient {
    http: Client,
    base_url: Url,
    api_key: String,
    text_model: String,
    image_model: String,
}

impl fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiClient")
            .field("base_url", &self.base_url)
            .field("text_model", &self.text_model)
            .field("image_model", &self.image_model)
            .finish_non_exhaustive()
    }
}

impl GeminiClient {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let base_url = Url::parse(&cfg.llm.base_url)
            .map_err(|e| PipelineError::validation(format!("llm base_url: {}", e)))?;
        let http = Client::builder().user_agent("alien-newsroom/0.1").build()?;
        Ok(Self {
            http,
            base_url,
            api_key: cfg.llm.api_key.clone(),
            text_model: cfg.llm.text_model.clone(),
            image_model: cfg.llm.image_model.clone(),
        })
    }

    pub fn build_request(&self, model: &str, body: &Value) -> Result<reqwest::Request> {
        let url = self
            .base_url
            .join(&format!("v1beta/models/{}:generateContent", model))
            .map_err(|e| PipelineError::validation(format!("llm endpoint: {}", e)))?;
        Ok(self
            .http
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .build()?)
    }

    async fn generate(&self, model: &str, body: &Value) -> Result<Value> {
        let res = self.http.execute(self.build_request(model, body)?).await?;
        let status = res.status();
        if !status.is_success() {
            return Err(PipelineError::Upstream {
                service: SERVICE,
                status: status.as_u16(),
                body: res.text().await.unwrap_or_default(),
            });
        }
        Ok(res.json::<Value>().await?)
    }
}

fn response_parts(response: &Value) -> impl Iterator<Item = &Value> {
    response["candidates"][0]["content"]["parts"]
        .as_array()
        .into_iter()
        .flatten()
}

/// Concatenate every text part of the first candidate.
pub fn extract_text(response: &Value) -> Option<String> {
    let text: String = response_parts(response)
        .filter_map(|p| p.get("text").and_then(Value::as_str))
        .collect();
    (!text.is_empty()).then_some(text)
}

/// Decode the first inline image of the first candidate.
pub fn extract_inline_image(response: &Value) -> Result<Vec<u8>> {
    let data = response_parts(response)
        .filter_map(|p| p.get("inlineData").or_else(|| p.get("inline_data")))
        .find_map(|d| d.get("data").and_then(Value::as_str))
        .ok_or_else(|| PipelineError::MalformedResponse {
            raw: response.to_string(),
            reason: "no inline image in response".into(),
        })?;
    STANDARD
        .decode(data)
        .map_err(|e| PipelineError::MalformedResponse {
            raw: data.chars().take(64).collect(),
            reason: format!("image is not valid base64: {}", e),
        })
}

#[async_trait]
impl TextModel for GeminiClient {
    #[instrument(skip_all, fields(model = %self.text_model))]
    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = json!({ "contents": [{ "parts": [{ "text": prompt }] }] });
        let response = self.generate(&self.text_model, &body).await?;
        let text = extract_text(&response).ok_or_else(|| PipelineError::MalformedResponse {
            raw: response.to_string(),
            reason: "no text in response".into(),
        })?;
        debug!(chars = text.len(), "llm completion received");
        Ok(text)
    }
}

#[async_trait]
impl PortraitBackend for GeminiClient {
    fn name(&self) -> &'static str {
        SERVICE
    }

    #[instrument(skip_all, fields(model = %self.image_model, dest = %dest.display()))]
    async fn render(
        &self,
        prompt: &str,
        reference: Option<&Path>,
        dest: &Path,
        cancel: &CancelSignal,
    ) -> Result<PathBuf> {
        let mut parts = vec![json!({ "text": prompt })];
        if let Some(reference) = reference {
            let bytes = tokio::fs::read(reference)
                .await
                .map_err(|e| PipelineError::io(reference, e))?;
            parts.push(json!({
                "inline_data": {
                    "mime_type": content_type(reference),
                    "data": STANDARD.encode(bytes),
                }
            }));
        }
        let body = json!({
            "contents": [{ "parts": parts }],
            "generationConfig": { "responseModalities": ["TEXT", "IMAGE"] },
        });

        let response = tokio::select! {
            res = self.generate(&self.image_model, &body) => res?,
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
        };
        let image = extract_inline_image(&response)?;
        write_bytes(dest, &image).await?;
        info!(bytes = image.len(), "portrait written");
        Ok(dest.to_path_buf())
    }
}
