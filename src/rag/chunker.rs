//! Deterministic snapshot chunker
//!
//! Splits the `[HH:MM:SS] Name: text` snapshot format into retrieval
//! chunks of bounded size. Re-running the chunker over the same snapshot
//! yields identical chunks, which keeps re-indexing reproducible.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

static LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\[(\d{2}):(\d{2}):(\d{2})\]\s+([^:]+):\s+(.+)$").expect("valid line regex")
});

/// One chunk of snapshot text with its time span and, when a single voice
/// covers the whole chunk, that speaker's name.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptChunk {
    pub text: String,
    pub start_seconds: i64,
    pub end_seconds: i64,
    pub speaker_name: Option<String>,
}

struct ChunkBuilder {
    text: String,
    start_seconds: Option<i64>,
    end_seconds: i64,
    speakers: BTreeSet<String>,
}

impl ChunkBuilder {
    fn new() -> Self {
        Self {
            text: String::new(),
            start_seconds: None,
            end_seconds: 0,
            speakers: BTreeSet::new(),
        }
    }

    fn push_line(&mut self, line: &str) {
        if !self.text.is_empty() {
            self.text.push('\n');
        }
        self.text.push_str(line);
    }

    fn finish(self) -> Option<TranscriptChunk> {
        if self.text.is_empty() {
            return None;
        }
        let speaker_name = if self.speakers.len() == 1 {
            self.speakers.into_iter().next()
        } else {
            None
        };
        Some(TranscriptChunk {
            text: self.text,
            start_seconds: self.start_seconds.unwrap_or(0),
            end_seconds: self.end_seconds,
            speaker_name,
        })
    }
}

/// Chunk a snapshot transcript.
///
/// Timestamped lines contribute `Name: text` to the running chunk and
/// advance its time span; non-matching, non-blank lines are appended
/// verbatim without touching the timestamps. A chunk is flushed once its
/// length exceeds `max_chunk_chars`.
pub fn chunk_transcript(snapshot: &str, max_chunk_chars: usize) -> Vec<TranscriptChunk> {
    let mut chunks = Vec::new();
    let mut current = ChunkBuilder::new();

    for line in snapshot.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match LINE_RE.captures(line) {
            Some(caps) => {
                let hours: i64 = caps[1].parse().unwrap_or(0);
                let minutes: i64 = caps[2].parse().unwrap_or(0);
                let seconds: i64 = caps[3].parse().unwrap_or(0);
                let ts = hours * 3600 + minutes * 60 + seconds;
                let name = caps[4].trim().to_string();
                let text = caps[5].trim();

                if current.start_seconds.is_none() {
                    current.start_seconds = Some(ts);
                }
                current.end_seconds = ts;
                current.speakers.insert(name.clone());
                current.push_line(&format!("{}: {}", name, text));
            }
            None => {
                current.push_line(line.trim_end());
            }
        }

        if current.text.len() > max_chunk_chars {
            if let Some(chunk) = std::mem::replace(&mut current, ChunkBuilder::new()).finish() {
                chunks.push(chunk);
            }
        }
    }

    if let Some(chunk) = current.finish() {
        chunks.push(chunk);
    }
    chunks
}
