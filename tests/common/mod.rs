//! Shared test doubles: scripted external services and a state builder.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use babelroom::config::Config;
use babelroom::server::AppState;
use babelroom::services::{
    ChatMessage, ChatModel, DiarizedTranscription, HashEmbedder, Services, Transcriber, Translator,
};
use babelroom::store::MeetingStore;
use babelroom::types::DiarizationPrefs;
use babelroom::RoomManager;

/// ASR double that always hears the same sentence and counts calls.
pub struct ScriptedAsr {
    pub text: String,
    pub language: String,
    calls: AtomicUsize,
}

impl ScriptedAsr {
    pub fn speaking(text: &str, language: &str) -> Arc<Self> {
        Arc::new(Self {
            text: text.to_string(),
            language: language.to_string(),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcriber for ScriptedAsr {
    async fn transcribe(&self, _wav: &[u8], _hint: Option<&str>) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.text.clone())
    }

    async fn detect_and_transcribe(&self, _wav: &[u8]) -> Result<(String, String)> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok((self.text.clone(), self.language.clone()))
    }

    async fn transcribe_diarized(
        &self,
        _wav: &[u8],
        _session_id: &str,
        _prefs: &DiarizationPrefs,
    ) -> Result<DiarizedTranscription> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("diarization not scripted for this test")
    }
}

/// Translator double that tags output with the target language, so tests
/// can tell translated captions from passthroughs.
pub struct TaggingTranslator;

#[async_trait]
impl Translator for TaggingTranslator {
    async fn translate(&self, text: &str, target: &str) -> Result<String> {
        Ok(format!("[{}] {}", target, text))
    }

    async fn translate_with_source(
        &self,
        text: &str,
        _source: &str,
        target: &str,
    ) -> Result<String> {
        Ok(format!("[{}] {}", target, text))
    }
}

/// LLM double answering with a fixed sentence.
pub struct CannedLlm(pub &'static str);

#[async_trait]
impl ChatModel for CannedLlm {
    async fn complete(&self, _m: &[ChatMessage], _t: u32, _temp: f32) -> Result<String> {
        Ok(self.0.to_string())
    }
}

/// Application state wired entirely to in-process doubles.
pub fn test_state(asr: Arc<ScriptedAsr>) -> AppState {
    AppState {
        config: Arc::new(Config::default()),
        store: Arc::new(MeetingStore::open_in_memory().unwrap()),
        rooms: Arc::new(RoomManager::new()),
        services: Services {
            asr,
            translator: Arc::new(TaggingTranslator),
            embedder: Arc::new(HashEmbedder::default()),
            llm: Arc::new(CannedLlm("Alice welcomed everyone at the start.")),
        },
        oidc: None,
    }
}

/// A voiced 16 kHz frame loud enough to pass the energy gate.
pub fn voiced_frame(seconds: usize) -> Vec<i16> {
    (0..16_000 * seconds)
        .map(|i| if i % 2 == 0 { 2500 } else { -2500 })
        .collect()
}

/// A silent frame of the same shape.
pub fn silent_frame(seconds: usize) -> Vec<i16> {
    vec![0i16; 16_000 * seconds]
}
