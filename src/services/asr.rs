//! Speech-to-text gateway
//!
//! Wraps the external ASR service in three capabilities: plain
//! transcription with a language hint, transcription with language
//! detection, and diarized transcription with per-segment speaker labels.
//! Uploads are WAV multipart bodies; single-shot calls time out at 30 s,
//! diarization at 60 s.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

use crate::types::DiarizationPrefs;

const TRANSCRIBE_TIMEOUT: Duration = Duration::from_secs(30);
const DIARIZE_TIMEOUT: Duration = Duration::from_secs(60);

/// One speaker-attributed span of a diarized transcription.
#[derive(Debug, Clone, Deserialize)]
pub struct DiarizedSegment {
    pub speaker: String,
    pub text: String,
    #[serde(default)]
    pub start: f32,
    #[serde(default)]
    pub end: f32,
    #[serde(default)]
    pub speaker_low_confidence: bool,
    #[serde(default)]
    pub speaker_overlap: bool,
}

/// Full diarized result for one audio chunk.
#[derive(Debug, Clone, Deserialize)]
pub struct DiarizedTranscription {
    pub text: String,
    pub language: String,
    #[serde(default)]
    pub num_speakers: u32,
    #[serde(default)]
    pub segments: Vec<DiarizedSegment>,
    /// Voice-print vectors per raw speaker label, when the service tracks
    /// speaker continuity for the session.
    #[serde(default)]
    pub speaker_embeddings: HashMap<String, Vec<f32>>,
}

/// Speech-to-text capability seam.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, wav: &[u8], language_hint: Option<&str>) -> Result<String>;

    async fn detect_and_transcribe(&self, wav: &[u8]) -> Result<(String, String)>;

    async fn transcribe_diarized(
        &self,
        wav: &[u8],
        session_id: &str,
        prefs: &DiarizationPrefs,
    ) -> Result<DiarizedTranscription>;
}

/// HTTP client for the external speech service.
pub struct AsrClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct TranscribeResponse {
    text: String,
    #[serde(default)]
    language: Option<String>,
}

impl AsrClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(DIARIZE_TIMEOUT)
            .build()
            .context("failed to build ASR HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn wav_form(wav: &[u8]) -> Form {
        let part = Part::bytes(wav.to_vec())
            .file_name("chunk.wav")
            .mime_str("audio/wav")
            .unwrap_or_else(|_| Part::bytes(wav.to_vec()).file_name("chunk.wav"));
        Form::new().part("file", part)
    }

    async fn post_wav(
        &self,
        path: &str,
        wav: &[u8],
        query: &[(String, String)],
        timeout: Duration,
    ) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .query(query)
            .multipart(Self::wav_form(wav))
            .timeout(timeout)
            .send()
            .await
            .with_context(|| format!("ASR request to {} failed", path))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!("ASR service error {} on {}: {}", status, path, body);
            anyhow::bail!("ASR service returned {}", status);
        }
        Ok(response)
    }
}

#[async_trait]
impl Transcriber for AsrClient {
    async fn transcribe(&self, wav: &[u8], language_hint: Option<&str>) -> Result<String> {
        let mut query = Vec::new();
        if let Some(lang) = language_hint {
            query.push(("language".to_string(), lang.to_string()));
        }
        let response = self
            .post_wav("/transcribe", wav, &query, TRANSCRIBE_TIMEOUT)
            .await?;
        let parsed: TranscribeResponse = response
            .json()
            .await
            .context("failed to parse transcription response")?;
        Ok(parsed.text)
    }

    async fn detect_and_transcribe(&self, wav: &[u8]) -> Result<(String, String)> {
        let response = self
            .post_wav("/transcribe", wav, &[("detect_language".into(), "true".into())], TRANSCRIBE_TIMEOUT)
            .await?;
        let parsed: TranscribeResponse = response
            .json()
            .await
            .context("failed to parse transcription response")?;
        let language = parsed
            .language
            .unwrap_or_else(|| crate::types::UNDETERMINED_LANGUAGE.to_string());
        Ok((parsed.text, language))
    }

    async fn transcribe_diarized(
        &self,
        wav: &[u8],
        session_id: &str,
        prefs: &DiarizationPrefs,
    ) -> Result<DiarizedTranscription> {
        let mut query = vec![("session_id".to_string(), session_id.to_string())];
        if let Some(min) = prefs.min_speakers {
            query.push(("min_speakers".into(), min.to_string()));
        }
        if let Some(max) = prefs.max_speakers {
            query.push(("max_speakers".into(), max.to_string()));
        }
        if let Some(strictness) = prefs.strictness {
            query.push(("strictness".into(), strictness.to_string()));
        }
        let response = self
            .post_wav("/diarize", wav, &query, DIARIZE_TIMEOUT)
            .await?;
        response
            .json()
            .await
            .context("failed to parse diarized transcription response")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diarized_response_parses_with_sparse_fields() {
        let raw = r#"{
            "text": "hello there",
            "language": "en",
            "segments": [
                {"speaker": "SPEAKER_00", "text": "hello", "start": 0.0, "end": 1.2},
                {"speaker": "SPEAKER_01", "text": "there", "start": 1.3, "end": 2.0,
                 "speaker_low_confidence": true}
            ]
        }"#;
        let parsed: DiarizedTranscription = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.segments.len(), 2);
        assert_eq!(parsed.num_speakers, 0);
        assert!(parsed.segments[1].speaker_low_confidence);
        assert!(!parsed.segments[0].speaker_overlap);
        assert!(parsed.speaker_embeddings.is_empty());
    }
}
