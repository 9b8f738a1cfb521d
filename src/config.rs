//! Configuration management
//!
//! Process-wide settings for the meeting hub: external service endpoints,
//! audio pipeline tuning, retrieval parameters, websocket origin policy and
//! the optional OIDC verifier. Loadable from a TOML file with environment
//! overrides (`BABELROOM_*`).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub services: ServicesConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub rag: RagConfig,
    #[serde(default)]
    pub oidc: OidcConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address, e.g. `0.0.0.0:8080`
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Websocket origin allow-list. Empty means permissive development mode
    /// (a warning is logged at startup).
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            allowed_origins: Vec::new(),
        }
    }
}

/// Base URLs and model names of the external AI services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicesConfig {
    #[serde(default = "default_asr_url")]
    pub asr_url: String,
    #[serde(default = "default_translate_url")]
    pub translate_url: String,
    #[serde(default = "default_embeddings_url")]
    pub embeddings_url: String,
    #[serde(default = "default_llm_url")]
    pub llm_url: String,
    /// TTS endpoint used by the dubbing pipeline; unused by the live engine
    /// but part of the deployment contract.
    #[serde(default = "default_tts_url")]
    pub tts_url: String,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
}

fn default_asr_url() -> String {
    "http://127.0.0.1:9000".to_string()
}

fn default_translate_url() -> String {
    "http://127.0.0.1:9001".to_string()
}

fn default_embeddings_url() -> String {
    "http://127.0.0.1:9002".to_string()
}

fn default_llm_url() -> String {
    "http://127.0.0.1:9003".to_string()
}

fn default_tts_url() -> String {
    "http://127.0.0.1:9004".to_string()
}

fn default_llm_model() -> String {
    "qwen2.5-7b-instruct".to_string()
}

fn default_embedding_model() -> String {
    "bge-m3".to_string()
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            asr_url: default_asr_url(),
            translate_url: default_translate_url(),
            embeddings_url: default_embeddings_url(),
            llm_url: default_llm_url(),
            tts_url: default_tts_url(),
            llm_model: default_llm_model(),
            embedding_model: default_embedding_model(),
        }
    }
}

/// Audio pipeline tuning.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Sample rate of the PCM contract (Hz).
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Chunk window submitted to ASR, in seconds (8-12 s works well).
    #[serde(default = "default_window_secs")]
    pub window_secs: u32,
    /// Minimum scaled RMS for a frame to count as speech.
    #[serde(default = "default_vad_threshold")]
    pub vad_threshold: f32,
}

fn default_sample_rate() -> u32 {
    16_000
}

fn default_window_secs() -> u32 {
    10
}

fn default_vad_threshold() -> f32 {
    0.5
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            window_secs: default_window_secs(),
            vad_threshold: default_vad_threshold(),
        }
    }
}

impl AudioConfig {
    /// Samples per ASR frame.
    pub fn window_samples(&self) -> usize {
        (self.sample_rate * self.window_secs) as usize
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database path (DSN).
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "babelroom.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Retrieval and question-answering tuning.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RagConfig {
    #[serde(default = "default_max_chunk_chars")]
    pub max_chunk_chars: usize,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Prior user/assistant turns prepended to a follow-up question.
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
    #[serde(default = "default_max_answer_tokens")]
    pub max_answer_tokens: u32,
    #[serde(default = "default_answer_temperature")]
    pub answer_temperature: f32,
}

fn default_max_chunk_chars() -> usize {
    2000
}

fn default_top_k() -> usize {
    5
}

fn default_history_turns() -> usize {
    5
}

fn default_max_answer_tokens() -> u32 {
    500
}

fn default_answer_temperature() -> f32 {
    0.7
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            max_chunk_chars: default_max_chunk_chars(),
            top_k: default_top_k(),
            history_turns: default_history_turns(),
            max_answer_tokens: default_max_answer_tokens(),
            answer_temperature: default_answer_temperature(),
        }
    }
}

/// Optional OIDC verifier settings. All three fields must be present for
/// token verification to be enabled; endpoints that require a verified
/// identity answer 503 otherwise.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OidcConfig {
    pub issuer: Option<String>,
    pub jwks_url: Option<String>,
    pub audience: Option<String>,
}

impl OidcConfig {
    pub fn is_configured(&self) -> bool {
        self.issuer.is_some() && self.jwks_url.is_some() && self.audience.is_some()
    }
}

impl Config {
    /// Load configuration: TOML file (if given) then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => {
                let raw = std::fs::read_to_string(p)
                    .with_context(|| format!("failed to read config file {}", p.display()))?;
                toml::from_str(&raw)
                    .with_context(|| format!("failed to parse config file {}", p.display()))?
            }
            None => Config::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// Apply `BABELROOM_*` environment variables over the loaded values.
    fn apply_env(&mut self) {
        let mut set = |key: &str, slot: &mut String| {
            if let Ok(v) = std::env::var(key) {
                if !v.is_empty() {
                    *slot = v;
                }
            }
        };
        set("BABELROOM_BIND", &mut self.server.bind);
        set("BABELROOM_ASR_URL", &mut self.services.asr_url);
        set("BABELROOM_TRANSLATE_URL", &mut self.services.translate_url);
        set("BABELROOM_EMBEDDINGS_URL", &mut self.services.embeddings_url);
        set("BABELROOM_LLM_URL", &mut self.services.llm_url);
        set("BABELROOM_TTS_URL", &mut self.services.tts_url);
        set("BABELROOM_DB_PATH", &mut self.database.path);

        if let Ok(v) = std::env::var("BABELROOM_ALLOWED_ORIGINS") {
            self.server.allowed_origins = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Ok(v) = std::env::var("BABELROOM_OIDC_ISSUER") {
            self.oidc.issuer = Some(v);
        }
        if let Ok(v) = std::env::var("BABELROOM_OIDC_JWKS_URL") {
            self.oidc.jwks_url = Some(v);
        }
        if let Ok(v) = std::env::var("BABELROOM_OIDC_AUDIENCE") {
            self.oidc.audience = Some(v);
        }
    }
}
