//! Meeting termination
//!
//! Entered when the host ends the meeting or the last participant leaves.
//! Flushes per-language transcripts to persistent snapshots, marks the
//! meeting ended, notifies and closes remaining connections, then kicks
//! off indexing and minutes generation in the background.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::RagConfig;
use crate::rag;
use crate::room::RoomManager;
use crate::services::{ChatMessage, ChatModel, Embedder};
use crate::store::MeetingStore;
use crate::types::ServerEvent;

/// Minutes are generated over this snapshot language.
pub const MINUTES_LANGUAGE: &str = "en";

const MINUTES_MAX_TOKENS: u32 = 800;
const MINUTES_TEMPERATURE: f32 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    HostRequest,
    LastParticipantLeft,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndOutcome {
    Ended,
    AlreadyEnded,
}

/// Terminate a meeting.
///
/// Idempotent: the first call transitions the meeting, later calls are
/// no-ops. A database failure restores the room so live transcripts are
/// not dropped.
pub async fn end_meeting(
    store: Arc<MeetingStore>,
    rooms: Arc<RoomManager>,
    embedder: Arc<dyn Embedder>,
    llm: Arc<dyn ChatModel>,
    rag_config: RagConfig,
    meeting_id: &str,
    reason: EndReason,
) -> Result<EndOutcome> {
    // Step 1: atomically take the room out of the registry and freeze its
    // transcript into per-language snapshots.
    let room = rooms.remove(meeting_id).await;
    let snapshots = room
        .as_ref()
        .map(|r| r.transcript().render_all())
        .unwrap_or_default();

    // Step 2: flip the persistent record. Failure puts the room back.
    let ended_now = match store.mark_meeting_ended(meeting_id).await {
        Ok(flag) => flag,
        Err(e) => {
            if let Some(room) = &room {
                rooms.restore(room.clone()).await;
            }
            return Err(e.context("failed to mark meeting ended"));
        }
    };

    if !ended_now {
        // A second end request, possibly with a stale room still attached;
        // make sure its connections are told and released.
        if let Some(room) = &room {
            room.mark_ended();
            room.broadcast(ServerEvent::MeetingEnded).await;
            room.close_all().await;
        }
        return Ok(EndOutcome::AlreadyEnded);
    }

    info!("ending meeting {} ({:?})", meeting_id, reason);

    // Step 3: persist one snapshot per language that saw captions.
    for (language, content) in &snapshots {
        if let Err(e) = store.write_snapshot(meeting_id, language, content).await {
            if let Some(room) = &room {
                rooms.restore(room.clone()).await;
            }
            return Err(e.context(format!("failed to write snapshot for {}", language)));
        }
    }

    // Step 4: notify whoever is still attached and close the connections.
    if let Some(room) = &room {
        room.mark_ended();
        room.broadcast(ServerEvent::MeetingEnded).await;
        room.close_all().await;
    }

    // Step 5: indexing and minutes run detached; their failures are logged
    // and never undo the termination.
    let languages: Vec<String> = snapshots.keys().cloned().collect();
    let meeting_id = meeting_id.to_string();
    tokio::spawn(async move {
        for language in &languages {
            if let Err(e) = rag::index_snapshot(
                &store,
                embedder.as_ref(),
                &meeting_id,
                language,
                rag_config.max_chunk_chars,
            )
            .await
            {
                error!("indexing {} / {} failed: {:#}", meeting_id, language, e);
            }
        }
        if languages.iter().any(|l| l == MINUTES_LANGUAGE) {
            if let Err(e) =
                generate_minutes(&store, llm.as_ref(), &meeting_id, MINUTES_LANGUAGE).await
            {
                warn!("minutes generation for {} failed: {:#}", meeting_id, e);
            }
        }
    });

    Ok(EndOutcome::Ended)
}

/// Produce meeting minutes from a stored snapshot via the LLM.
pub async fn generate_minutes(
    store: &MeetingStore,
    llm: &dyn ChatModel,
    meeting_id: &str,
    language: &str,
) -> Result<()> {
    let snapshot = store
        .get_snapshot(meeting_id, language)
        .await?
        .with_context(|| format!("no snapshot for {} / {}", meeting_id, language))?;

    let system = "You write concise meeting minutes from a timestamped transcript. \
                  Cover what was discussed, decisions reached and action items, \
                  attributing points to speakers by name.";
    let user = format!("Transcript:\n{}", snapshot);

    let minutes = llm
        .complete(
            &[ChatMessage::system(system), ChatMessage::user(user)],
            MINUTES_MAX_TOKENS,
            MINUTES_TEMPERATURE,
        )
        .await
        .context("minutes generation request failed")?;

    store.write_minutes(meeting_id, language, &minutes).await?;
    info!("stored minutes for {} / {}", meeting_id, language);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::HashEmbedder;
    use crate::types::MeetingMode;
    use async_trait::async_trait;

    struct CannedLlm;

    #[async_trait]
    impl ChatModel for CannedLlm {
        async fn complete(
            &self,
            _messages: &[ChatMessage],
            _max_tokens: u32,
            _temperature: f32,
        ) -> Result<String> {
            Ok("Minutes: Alice welcomed everyone.".to_string())
        }
    }

    #[tokio::test]
    async fn ending_twice_is_a_no_op_after_the_first() {
        let store = Arc::new(MeetingStore::open_in_memory().unwrap());
        let rooms = Arc::new(RoomManager::new());
        let meeting = store
            .create_meeting(MeetingMode::Individual, None)
            .await
            .unwrap();
        rooms
            .get_or_create(&meeting.id, MeetingMode::Individual)
            .await;

        let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::default());
        let llm: Arc<dyn ChatModel> = Arc::new(CannedLlm);

        let first = end_meeting(
            store.clone(),
            rooms.clone(),
            embedder.clone(),
            llm.clone(),
            RagConfig::default(),
            &meeting.id,
            EndReason::HostRequest,
        )
        .await
        .unwrap();
        assert_eq!(first, EndOutcome::Ended);
        assert!(rooms.get(&meeting.id).await.is_none());

        let second = end_meeting(
            store.clone(),
            rooms,
            embedder,
            llm,
            RagConfig::default(),
            &meeting.id,
            EndReason::LastParticipantLeft,
        )
        .await
        .unwrap();
        assert_eq!(second, EndOutcome::AlreadyEnded);
    }

    #[tokio::test]
    async fn minutes_are_generated_from_snapshot() {
        let store = MeetingStore::open_in_memory().unwrap();
        store
            .write_snapshot("m1", "en", "[09:00:00] Alice: Welcome.\n")
            .await
            .unwrap();

        generate_minutes(&store, &CannedLlm, "m1", "en")
            .await
            .unwrap();
        let minutes = store.get_minutes("m1", "en").await.unwrap().unwrap();
        assert!(minutes.contains("Alice"));
    }
}
