//! Clients for the external AI services
//!
//! The engine treats speech, translation, embedding and generation as
//! black-box HTTP endpoints. Each capability is a trait so tests can swap
//! in scripted doubles; the HTTP implementations live beside the traits.

pub mod asr;
pub mod embeddings;
pub mod llm;
pub mod translate;

use std::sync::Arc;

use crate::config::ServicesConfig;
use anyhow::Result;

pub use asr::{AsrClient, DiarizedSegment, DiarizedTranscription, Transcriber};
pub use embeddings::{cosine_similarity, Embedder, EmbeddingClient, HashEmbedder};
pub use llm::{ChatMessage, ChatModel, LlmClient};
pub use translate::{translate_fanout, HttpTranslator, IdentityTranslator, Translator};

/// The service bundle handed to handlers and pipelines.
#[derive(Clone)]
pub struct Services {
    pub asr: Arc<dyn Transcriber>,
    pub translator: Arc<dyn Translator>,
    pub embedder: Arc<dyn Embedder>,
    pub llm: Arc<dyn ChatModel>,
}

impl Services {
    /// Construct HTTP-backed services from configuration.
    pub fn from_config(config: &ServicesConfig) -> Result<Self> {
        Ok(Self {
            asr: Arc::new(AsrClient::new(&config.asr_url)?),
            translator: Arc::new(HttpTranslator::new(&config.translate_url)?),
            embedder: Arc::new(EmbeddingClient::new(
                &config.embeddings_url,
                &config.embedding_model,
            )?),
            llm: Arc::new(LlmClient::new(&config.llm_url, &config.llm_model)?),
        })
    }
}
