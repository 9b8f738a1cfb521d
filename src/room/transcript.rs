//! Per-room, per-language caption log
//!
//! Append-only entries keyed by language, written by the broadcast path
//! and read by live transcript requests and the termination snapshot.
//! Guarded by its own lock so readers never contend with the participant
//! set.

use chrono::Timelike;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::types::{BroadcastMessage, ServerEvent, TranscriptEntry, UNDETERMINED_LANGUAGE};

#[derive(Default)]
pub struct TranscriptStore {
    logs: RwLock<HashMap<String, Vec<TranscriptEntry>>>,
}

impl TranscriptStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a broadcast into the per-language logs.
    ///
    /// A `transcription` with translations appends one entry per translated
    /// language (empty translations fall back to the original text), plus
    /// the original under its source language when the translations map
    /// does not already carry it. Without translations the original goes
    /// under the source language, or `"und"` when detection failed.
    pub fn record(&self, message: &BroadcastMessage) {
        let ServerEvent::Transcription {
            speaker_id,
            speaker_name,
            original_text,
            source_language,
            translations,
            ..
        } = &message.event
        else {
            return;
        };

        let entry = |text: &str| TranscriptEntry {
            timestamp: message.timestamp,
            speaker_id: speaker_id.clone(),
            speaker_name: speaker_name.clone(),
            text: text.to_string(),
        };

        let mut logs = self.logs.write().expect("transcript lock poisoned");
        if translations.is_empty() {
            let lang = source_language.as_deref().unwrap_or(UNDETERMINED_LANGUAGE);
            logs.entry(lang.to_string())
                .or_default()
                .push(entry(original_text));
            return;
        }

        for (lang, translated) in translations {
            let text = if translated.trim().is_empty() {
                original_text
            } else {
                translated
            };
            logs.entry(lang.clone()).or_default().push(entry(text));
        }
        if let Some(source) = source_language {
            if !translations.contains_key(source) {
                logs.entry(source.clone())
                    .or_default()
                    .push(entry(original_text));
            }
        }
    }

    /// Copy of the ordered entries for one language.
    pub fn get(&self, language: &str) -> Vec<TranscriptEntry> {
        self.logs
            .read()
            .expect("transcript lock poisoned")
            .get(language)
            .cloned()
            .unwrap_or_default()
    }

    pub fn languages(&self) -> Vec<String> {
        let mut languages: Vec<String> = self
            .logs
            .read()
            .expect("transcript lock poisoned")
            .keys()
            .cloned()
            .collect();
        languages.sort();
        languages
    }

    /// Render the persisted snapshot format for one language:
    /// `[HH:MM:SS] <name>: <text>\n` per entry. None when the language has
    /// no entries.
    pub fn render_snapshot(&self, language: &str) -> Option<String> {
        let entries = self.get(language);
        if entries.is_empty() {
            return None;
        }
        let mut out = String::new();
        for entry in &entries {
            out.push_str(&format!(
                "[{:02}:{:02}:{:02}] {}: {}\n",
                entry.timestamp.hour(),
                entry.timestamp.minute(),
                entry.timestamp.second(),
                entry.display_name(),
                entry.text
            ));
        }
        Some(out)
    }

    /// Snapshot every language that has at least one entry.
    pub fn render_all(&self) -> HashMap<String, String> {
        self.languages()
            .into_iter()
            .filter_map(|lang| self.render_snapshot(&lang).map(|s| (lang, s)))
            .collect()
    }
}
