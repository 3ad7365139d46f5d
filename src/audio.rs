//! Narration audio: voice catalog, voice selection and text-to-speech.
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use once_cell::sync::Lazy;
use rand::seq::SliceRandom;
use rand::Rng;
use reqwest::{Client, Url};
use serde::Serialize;
use serde_json::json;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, instrument};

use crate::config;
use crate::error::{PipelineError, Result};
use crate::model::Gender;
use crate::storage::write_bytes;

const SERVICE: &str = "elevenlabs";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Voice {
    pub id: &'static str,
    pub name: &'static str,
    pub gender: Gender,
}

pub static VOICES: Lazy<Vec<Voice>> = Lazy::new(|| {
    [
        ("IKne3meq5aSn9XLyUdCD", "Charlie", Gender::Male),
        ("Xb7hH8MSUJpSbSDYk0k2", "Alice", Gender::Female),
        ("iP95p4xoKVk53GoZ742B", "Chris", Gender::Male),
        ("cjVigY5qzO86Huf0OWal", "Eric", Gender::Male),
        ("cgSgspJ2msm6clMCkdW9", "Jessica", Gender::Female),
        ("pFZP5JQG7iQjIQuC4Bku", "Lily", Gender::Female),
    ]
    .into_iter()
    .map(|(id, name, gender)| Voice { id, name, gender })
    .collect()
});

/// Pick a voice matching `gender` (case-insensitive). An unknown gender, or
/// one with no voices, falls back to the whole catalog.
pub fn select_voice<'a, R: Rng + ?Sized>(
    rng: &mut R,
    catalog: &'a [Voice],
    gender: Option<&str>,
) -> Option<&'a Voice> {
    if let Some(wanted) = gender.map(str::to_lowercase) {
        let matching: Vec<&Voice> = catalog
            .iter()
            .filter(|v| v.gender.as_str() == wanted)
            .collect();
        if let Some(voice) = matching.choose(rng) {
            return Some(*voice);
        }
    }
    catalog.choose(rng)
}

/// Convenience over [`select_voice`] with the built-in catalog and a thread rng.
pub fn random_voice(gender: Gender) -> Option<&'static Voice> {
    select_voice(&mut rand::thread_rng(), VOICES.as_slice(), Some(gender.as_str()))
}

/// What a speech engine hands back: one buffer or a sequence of chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TtsPayload {
    Buffer(Bytes),
    Chunks(Vec<Bytes>),
}

impl TtsPayload {
    pub fn into_bytes(self) -> Bytes {
        match self {
            TtsPayload::Buffer(bytes) => bytes,
            TtsPayload::Chunks(chunks) => {
                let mut buf = BytesMut::with_capacity(chunks.iter().map(Bytes::len).sum());
                for chunk in chunks {
                    buf.extend_from_slice(&chunk);
                }
                buf.freeze()
            }
        }
    }
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, voice_id: &str) -> Result<TtsPayload>;
}

#[derive(Clone)]
pub struct ElevenLabsClient {
    http: Client,
    base_url: Url,
    api_key: String,
    model_id: String,
    output_format: String,
}

impl fmt::Debug for ElevenLabsClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElevenLabsClient")
            .field("base_url", &self.base_url)
            .field("model_id", &self.model_id)
            .field("output_format", &self.output_format)
            .finish_non_exhaustive()
    }
}

impl ElevenLabsClient {
    pub fn from_config(cfg: &config::Tts) -> Result<Self> {
        let base_url = Url::parse(&cfg.base_url)
            .map_err(|e| PipelineError::validation(format!("tts base_url: {}", e)))?;
        let http = Client::builder().user_agent("alien-newsroom/0.1").build()?;
        Ok(Self {
            http,
            base_url,
            api_key: cfg.api_key.clone(),
            model_id: cfg.model_id.clone(),
            output_format: cfg.output_format.clone(),
        })
    }

    pub fn build_request(&self, text: &str, voice_id: &str) -> Result<reqwest::Request> {
        let mut url = self
            .base_url
            .join(&format!("v1/text-to-speech/{}", voice_id))
            .map_err(|e| PipelineError::validation(format!("tts endpoint: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("output_format", &self.output_format);
        Ok(self
            .http
            .post(url)
            .header("xi-api-key", &self.api_key)
            .json(&json!({ "text": text, "model_id": self.model_id }))
            .build()?)
    }
}

#[async_trait]
impl SpeechSynthesizer for ElevenLabsClient {
    #[instrument(skip_all, fields(%voice_id))]
    async fn synthesize(&self, text: &str, voice_id: &str) -> Result<TtsPayload> {
        let res = self
            .http
            .execute(self.build_request(text, voice_id)?)
            .await?;
        let status = res.status();
        if !status.is_success() {
            return Err(PipelineError::Upstream {
                service: SERVICE,
                status: status.as_u16(),
                body: res.text().await.unwrap_or_default(),
            });
        }
        let mut chunks = Vec::new();
        let mut stream = res.bytes_stream();
        while let Some(chunk) = stream.next().await {
            chunks.push(chunk?);
        }
        Ok(TtsPayload::Chunks(chunks))
    }
}

/// Writes narration files through whichever synthesizer it was built with.
#[derive(Clone)]
pub struct AudioGenerator {
    synth: Arc<dyn SpeechSynthesizer>,
}

impl AudioGenerator {
    pub fn new(synth: Arc<dyn SpeechSynthesizer>) -> Self {
        Self { synth }
    }

    pub async fn synthesize_to(&self, text: &str, voice_id: &str, dest: &Path) -> Result<PathBuf> {
        let audio = self.synth.synthesize(text, voice_id).await?.into_bytes();
        if audio.is_empty() {
            return Err(PipelineError::validation("speech engine returned no audio"));
        }
        write_bytes(dest, &audio).await?;
        info!(path = %dest.display(), bytes = audio.len(), %voice_id, "audio written");
        Ok(dest.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tempfile::tempdir;

    struct ChunkedSynth;

    #[async_trait]
    impl SpeechSynthesizer for ChunkedSynth {
        async fn synthesize(&self, _text: &str, _voice_id: &str) -> Result<TtsPayload> {
            Ok(TtsPayload::Chunks(vec![
                Bytes::from_static(b"ab"),
                Bytes::from_static(b"cd"),
            ]))
        }
    }

    #[test]
    fn chunks_concatenate_in_order() {
        let payload = TtsPayload::Chunks(vec![Bytes::from_static(b"ab"), Bytes::from_static(b"cd")]);
        assert_eq!(payload.into_bytes(), Bytes::from_static(b"abcd"));
        let buffer = TtsPayload::Buffer(Bytes::from_static(b"xyz"));
        assert_eq!(buffer.into_bytes(), Bytes::from_static(b"xyz"));
    }

    #[test]
    fn selection_respects_gender() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..50 {
            let v = select_voice(&mut rng, &VOICES, Some("Female")).unwrap();
            assert_eq!(v.gender, Gender::Female);
            let v = select_voice(&mut rng, &VOICES, Some("male")).unwrap();
            assert_eq!(v.gender, Gender::Male);
        }
    }

    #[test]
    fn unknown_gender_falls_back_to_catalog() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            let v = select_voice(&mut rng, &VOICES, Some("martian")).unwrap();
            seen.insert(v.id);
        }
        assert_eq!(seen.len(), VOICES.len());
        assert!(select_voice(&mut rng, &VOICES, None).is_some());
        assert!(select_voice(&mut rng, &[], Some("male")).is_none());
    }

    #[test]
    fn request_carries_format_and_key() {
        let client = ElevenLabsClient::from_config(&config::Tts {
            api_key: "xi".into(),
            base_url: "https://tts.example/".into(),
            model_id: "eleven_multilingual_v2".into(),
            output_format: "mp3_44100_128".into(),
        })
        .unwrap();
        let req = client.build_request("hi", "IKne3meq5aSn9XLyUdCD").unwrap();
        assert_eq!(
            req.url().as_str(),
            "https://tts.example/v1/text-to-speech/IKne3meq5aSn9XLyUdCD?output_format=mp3_44100_128"
        );
        assert_eq!(req.headers().get("xi-api-key").unwrap(), "xi");
    }

    #[tokio::test]
    async fn synthesize_to_writes_joined_chunks() {
        let td = tempdir().unwrap();
        let dest = td.path().join("audio/20250101/a.mp3");
        let generator = AudioGenerator::new(Arc::new(ChunkedSynth));
        generator.synthesize_to("hello", "v", &dest).await.unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"abcd");
    }
}
