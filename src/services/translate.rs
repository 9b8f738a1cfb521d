//! Translation capability and per-language fan-out
//!
//! One caption has to reach every target language a room holds. The
//! fan-out translates all targets concurrently and degrades per-language:
//! a failed target gets the original text rather than dropping the caption.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

const TRANSLATE_TIMEOUT: Duration = Duration::from_secs(30);

/// Character budget per translation request; long captions are split on
/// sentence or whitespace boundaries and re-joined.
const MAX_TRANSLATION_CHARS: usize = 5000;

/// Translation capability seam.
#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, text: &str, target: &str) -> Result<String>;

    async fn translate_with_source(&self, text: &str, source: &str, target: &str)
        -> Result<String>;
}

/// HTTP client for the external translation service.
pub struct HttpTranslator {
    client: Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct TranslateRequest<'a> {
    text: &'a str,
    target_lang: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    source_lang: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    translation: String,
}

impl HttpTranslator {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(TRANSLATE_TIMEOUT)
            .build()
            .context("failed to build translation HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn request(&self, text: &str, source: Option<&str>, target: &str) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/translate", self.base_url))
            .json(&TranslateRequest {
                text,
                target_lang: target,
                source_lang: source,
            })
            .send()
            .await
            .context("translation request failed")?;

        if !response.status().is_success() {
            anyhow::bail!("translation service returned {}", response.status());
        }
        let parsed: TranslateResponse = response
            .json()
            .await
            .context("failed to parse translation response")?;
        Ok(parsed.translation)
    }

    async fn translate_chunked(
        &self,
        text: &str,
        source: Option<&str>,
        target: &str,
    ) -> Result<String> {
        let chunks = split_for_translation(text, MAX_TRANSLATION_CHARS);
        let mut out = String::with_capacity(text.len());
        for chunk in chunks {
            let translated = self.request(&chunk, source, target).await?;
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(translated.trim());
        }
        Ok(out)
    }
}

#[async_trait]
impl Translator for HttpTranslator {
    async fn translate(&self, text: &str, target: &str) -> Result<String> {
        self.translate_chunked(text, None, target).await
    }

    async fn translate_with_source(
        &self,
        text: &str,
        source: &str,
        target: &str,
    ) -> Result<String> {
        self.translate_chunked(text, Some(source), target).await
    }
}

/// Pass-through translator for tests and degraded deployments.
pub struct IdentityTranslator;

#[async_trait]
impl Translator for IdentityTranslator {
    async fn translate(&self, text: &str, _target: &str) -> Result<String> {
        Ok(text.to_string())
    }

    async fn translate_with_source(
        &self,
        text: &str,
        _source: &str,
        _target: &str,
    ) -> Result<String> {
        Ok(text.to_string())
    }
}

/// Translate `text` into every distinct target language concurrently.
///
/// Returns one entry per distinct target. A target equal to the source is
/// filled with the original without a network call; a failed target is
/// substituted with the original text. Resolves only when every target has
/// an answer.
pub async fn translate_fanout(
    translator: &dyn Translator,
    text: &str,
    source_language: Option<&str>,
    targets: &[String],
) -> HashMap<String, String> {
    let mut distinct: Vec<&String> = targets.iter().collect();
    distinct.sort();
    distinct.dedup();

    let tasks = distinct.into_iter().map(|target| async move {
        if source_language == Some(target.as_str()) {
            return (target.clone(), text.to_string());
        }
        let attempt = match source_language {
            Some(source) => translator.translate_with_source(text, source, target).await,
            None => translator.translate(text, target).await,
        };
        match attempt {
            Ok(translated) => (target.clone(), translated),
            Err(e) => {
                warn!("translation to {} failed, using original: {}", target, e);
                (target.clone(), text.to_string())
            }
        }
    });

    join_all(tasks).await.into_iter().collect()
}

/// Split text into chunks of at most `max_chars`, preferring sentence ends
/// and falling back to whitespace, then to a hard cut.
pub fn split_for_translation(text: &str, max_chars: usize) -> Vec<String> {
    if text.len() <= max_chars {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut rest = text;
    while rest.len() > max_chars {
        let window = floor_char_boundary(rest, max_chars);
        let cut = rest[..window]
            .rfind(['.', '!', '?', '\n'])
            .map(|i| i + 1)
            .or_else(|| rest[..window].rfind(char::is_whitespace))
            .unwrap_or(window);
        let cut = cut.max(1);
        chunks.push(rest[..cut].trim().to_string());
        rest = rest[cut..].trim_start();
    }
    if !rest.is_empty() {
        chunks.push(rest.to_string());
    }
    chunks.retain(|c| !c.is_empty());
    chunks
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailFrench;

    #[async_trait]
    impl Translator for FailFrench {
        async fn translate(&self, text: &str, target: &str) -> Result<String> {
            self.translate_with_source(text, "en", target).await
        }

        async fn translate_with_source(
            &self,
            text: &str,
            _source: &str,
            target: &str,
        ) -> Result<String> {
            if target == "fr" {
                anyhow::bail!("simulated outage");
            }
            Ok(format!("[{}] {}", target, text))
        }
    }

    #[tokio::test]
    async fn fanout_covers_every_distinct_target() {
        let targets = vec!["ar".to_string(), "fr".to_string(), "ar".to_string()];
        let out = translate_fanout(&FailFrench, "hello", Some("en"), &targets).await;
        assert_eq!(out.len(), 2);
        assert_eq!(out["ar"], "[ar] hello");
        // failed target degrades to the original text
        assert_eq!(out["fr"], "hello");
    }

    #[tokio::test]
    async fn source_target_bypasses_translation() {
        let targets = vec!["en".to_string()];
        let out = translate_fanout(&FailFrench, "hello", Some("en"), &targets).await;
        assert_eq!(out["en"], "hello");
    }

    #[tokio::test]
    async fn empty_target_set_makes_no_requests() {
        let out = translate_fanout(&FailFrench, "hello", Some("en"), &[]).await;
        assert!(out.is_empty());
    }

    #[test]
    fn split_prefers_sentence_boundaries() {
        let text = "One sentence. Two sentence. Three";
        let chunks = split_for_translation(text, 16);
        assert_eq!(chunks, vec!["One sentence.", "Two sentence.", "Three"]);
    }

    #[test]
    fn split_falls_back_to_whitespace() {
        let text = "word ".repeat(10);
        let chunks = split_for_translation(text.trim(), 12);
        assert!(chunks.iter().all(|c| c.len() <= 12));
        assert_eq!(chunks.join(" "), text.trim());
    }

    #[test]
    fn short_text_is_untouched() {
        assert_eq!(split_for_translation("hi", 5000), vec!["hi".to_string()]);
    }
}
