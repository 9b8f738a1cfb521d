//! Snapshot indexing
//!
//! Turns a stored snapshot into embedded retrieval chunks. Embedding is a
//! single batch request; a partial failure never leaves a mixed
//! generation. Either every chunk lands `completed`, or every chunk is
//! written `failed` and the error propagates.

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::services::Embedder;
use crate::store::{ChunkRecord, ChunkStatus, MeetingStore};

use super::chunker::chunk_transcript;

/// Index the stored snapshot of one (meeting, language).
///
/// Returns the number of chunks written. Re-indexing replaces the previous
/// generation atomically.
pub async fn index_snapshot(
    store: &MeetingStore,
    embedder: &dyn Embedder,
    meeting_id: &str,
    language: &str,
    max_chunk_chars: usize,
) -> Result<usize> {
    let snapshot = store
        .get_snapshot(meeting_id, language)
        .await?
        .with_context(|| format!("no snapshot stored for {} / {}", meeting_id, language))?;

    let chunks = chunk_transcript(&snapshot, max_chunk_chars);
    if chunks.is_empty() {
        store.replace_chunks(meeting_id, language, &[]).await?;
        return Ok(0);
    }

    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let embeddings = match embedder.embed_batch(&texts).await {
        Ok(embeddings) if embeddings.len() == chunks.len() => embeddings,
        Ok(embeddings) => {
            mark_failed(store, meeting_id, language, &chunks).await?;
            anyhow::bail!(
                "embedding batch returned {} vectors for {} chunks",
                embeddings.len(),
                chunks.len()
            );
        }
        Err(e) => {
            warn!(
                "embedding batch for {} / {} failed: {}",
                meeting_id, language, e
            );
            mark_failed(store, meeting_id, language, &chunks).await?;
            return Err(e.context("snapshot indexing aborted"));
        }
    };

    let records: Vec<ChunkRecord> = chunks
        .into_iter()
        .zip(embeddings)
        .enumerate()
        .map(|(i, (chunk, embedding))| ChunkRecord {
            index: i as i64,
            text: chunk.text,
            start_seconds: chunk.start_seconds,
            end_seconds: chunk.end_seconds,
            speaker_name: chunk.speaker_name,
            embedding: Some(embedding),
            status: ChunkStatus::Completed,
        })
        .collect();

    store.replace_chunks(meeting_id, language, &records).await?;
    info!(
        "indexed {} chunks for {} / {}",
        records.len(),
        meeting_id,
        language
    );
    Ok(records.len())
}

async fn mark_failed(
    store: &MeetingStore,
    meeting_id: &str,
    language: &str,
    chunks: &[super::chunker::TranscriptChunk],
) -> Result<()> {
    let records: Vec<ChunkRecord> = chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| ChunkRecord {
            index: i as i64,
            text: chunk.text.clone(),
            start_seconds: chunk.start_seconds,
            end_seconds: chunk.end_seconds,
            speaker_name: chunk.speaker_name.clone(),
            embedding: None,
            status: ChunkStatus::Failed,
        })
        .collect();
    store.replace_chunks(meeting_id, language, &records).await
}
