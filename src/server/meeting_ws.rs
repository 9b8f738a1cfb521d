//! Meeting websocket session handler
//!
//! One task per connection. Ingress is a tagged stream: binary frames are
//! raw PCM fed to the participant's framer, text frames are JSON control
//! messages. Whole audio windows run through the processing pipeline
//! inline, so captions for a participant's frames go out in frame order.
//! Egress rides a bounded channel drained by a sender task; a peer that
//! stops draining is removed rather than blocking the room.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::audio::{wav::encode_wav, AudioFramer, EnergyGate};
use crate::lifecycle::{self, EndReason};
use crate::room::{Participant, Room, EGRESS_BUFFER};
use crate::services::{translate_fanout, Services};
use crate::store::MeetingStore;
use crate::types::{ControlMessage, DiarizationPrefs, MeetingMode, ServerEvent};

use super::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsQuery {
    pub participant_id: Option<i64>,
    pub participant_name: Option<String>,
    pub target_lang: Option<String>,
    pub min_speakers: Option<u32>,
    pub max_speakers: Option<u32>,
    pub strictness: Option<f32>,
}

/// What happened to one drained audio frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Below the energy threshold; nothing downstream happened.
    Silent,
    /// Transcribed to empty text; no broadcast.
    Empty,
    /// This many `transcription` events were broadcast.
    Broadcast(usize),
    /// ASR failed; an `error` event was broadcast instead.
    Failed,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(meeting_id): Path<String>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
) -> Response {
    if !origin_allowed(&state, &headers) {
        return (StatusCode::FORBIDDEN, "origin not allowed").into_response();
    }

    let (Some(participant_id), Some(_), Some(_)) = (
        query.participant_id,
        query.participant_name.as_ref(),
        query.target_lang.as_ref(),
    ) else {
        return (
            StatusCode::BAD_REQUEST,
            "participantId, participantName and targetLang are required",
        )
            .into_response();
    };

    // Handshake validation: the meeting must exist and be active, and the
    // participant must have joined it. Failure rejects before upgrade.
    let meeting = match state.store.get_meeting(&meeting_id).await {
        Ok(Some(meeting)) if meeting.is_active => meeting,
        Ok(Some(_)) => {
            return (StatusCode::BAD_REQUEST, "meeting has ended").into_response();
        }
        Ok(None) => return (StatusCode::NOT_FOUND, "unknown meeting").into_response(),
        Err(e) => {
            error!("meeting lookup failed: {:#}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "lookup failed").into_response();
        }
    };
    let participant = match state.store.get_participant(&meeting_id, participant_id).await {
        Ok(Some(p)) => p,
        Ok(None) => {
            return (StatusCode::BAD_REQUEST, "participant not in this meeting").into_response();
        }
        Err(e) => {
            error!("participant lookup failed: {:#}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "lookup failed").into_response();
        }
    };

    let mode = meeting.mode;
    ws.on_upgrade(move |socket| {
        handle_meeting_session(
            socket,
            state,
            meeting.id,
            mode,
            participant.participant_id,
            participant.user_id,
            query,
        )
    })
}

fn origin_allowed(state: &AppState, headers: &HeaderMap) -> bool {
    let allowed = &state.config.server.allowed_origins;
    if allowed.is_empty() {
        return true;
    }
    match headers.get(header::ORIGIN).and_then(|v| v.to_str().ok()) {
        // Non-browser clients send no Origin; the allow-list is a browser
        // cross-site guard, not an authentication layer.
        None => true,
        Some(origin) => allowed.iter().any(|a| a == origin),
    }
}

async fn handle_meeting_session(
    socket: WebSocket,
    state: AppState,
    meeting_id: String,
    mode: MeetingMode,
    participant_id: i64,
    user_id: Option<String>,
    query: WsQuery,
) {
    info!(
        "participant {} connected to meeting {} ({})",
        participant_id, meeting_id, mode
    );

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::channel::<String>(EGRESS_BUFFER);

    let sender_task = tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            if ws_tx.send(Message::Text(payload.into())).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    let room = state.rooms.get_or_create(&meeting_id, mode).await;
    if let Ok(names) = state.store.speaker_names(&meeting_id).await {
        room.seed_speaker_names(names);
    }

    // Query-string diarization settings override whatever join recorded.
    let diarization = DiarizationPrefs {
        min_speakers: query.min_speakers,
        max_speakers: query.max_speakers,
        strictness: query.strictness,
    };
    let name = query.participant_name.unwrap_or_default();
    let target_language = query.target_lang.unwrap_or_default();
    room.add_participant(Participant::new(
        participant_id,
        name.clone(),
        target_language.clone(),
        user_id,
        diarization,
        tx,
    ))
    .await;
    room.broadcast(ServerEvent::ParticipantJoined {
        participant_id,
        participant_name: name.clone(),
        target_language,
    })
    .await;

    let gate = EnergyGate::new(state.config.audio.vad_threshold);
    let sample_rate = state.config.audio.sample_rate;
    let mut framer = AudioFramer::new(state.config.audio.window_samples());

    while let Some(message) = ws_rx.next().await {
        match message {
            Ok(Message::Binary(data)) => {
                framer.push_bytes(&data);
                for frame in framer.drain_frames() {
                    let outcome = process_frame(
                        &state.services,
                        &state.store,
                        &room,
                        &gate,
                        sample_rate,
                        participant_id,
                        &frame,
                    )
                    .await;
                    debug!(
                        "frame from participant {} in {}: {:?}",
                        participant_id, meeting_id, outcome
                    );
                }
            }
            Ok(Message::Text(text)) => {
                handle_control(&state, &room, participant_id, &text).await;
            }
            Ok(Message::Close(_)) => {
                debug!("participant {} closed the socket", participant_id);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                debug!("read error for participant {}: {}", participant_id, e);
                break;
            }
        }

        // Termination or a stalled-peer removal cancels further work.
        if room.is_ended() || !room.has_participant(participant_id).await {
            break;
        }
    }

    leave(&state, &room, participant_id, &name).await;
    sender_task.abort();
    info!(
        "participant {} disconnected from meeting {}",
        participant_id, meeting_id
    );
}

async fn handle_control(state: &AppState, room: &Room, participant_id: i64, raw: &str) {
    match serde_json::from_str::<ControlMessage>(raw) {
        Ok(ControlMessage::UpdateLanguage { target_language }) => {
            if let Err(e) = state
                .store
                .update_participant_language(&room.meeting_id, participant_id, &target_language)
                .await
            {
                warn!("failed to persist language change: {:#}", e);
            }
            room.set_language(participant_id, &target_language).await;
            room.broadcast(ServerEvent::ParticipantLanguageUpdated {
                participant_id,
                target_language,
            })
            .await;
        }
        Ok(ControlMessage::Unknown) => {
            debug!("ignoring unknown control message: {}", raw);
        }
        Err(e) => {
            debug!("unparseable control message: {}", e);
        }
    }
}

async fn leave(state: &AppState, room: &Room, participant_id: i64, name: &str) {
    let was_present = room.remove_participant(participant_id).await.is_some();
    if let Err(e) = state
        .store
        .mark_participant_left(&room.meeting_id, participant_id)
        .await
    {
        warn!("failed to mark participant {} left: {:#}", participant_id, e);
    }
    if was_present && !room.is_ended() {
        room.broadcast(ServerEvent::ParticipantLeft {
            participant_id,
            participant_name: name.to_string(),
        })
        .await;
    }

    if room.is_empty().await && !room.is_ended() {
        if let Err(e) = lifecycle::end_meeting(
            state.store.clone(),
            state.rooms.clone(),
            state.services.embedder.clone(),
            state.services.llm.clone(),
            state.config.rag,
            &room.meeting_id,
            EndReason::LastParticipantLeft,
        )
        .await
        {
            error!(
                "termination after last leave of {} failed: {:#}",
                room.meeting_id, e
            );
        }
    }
}

// ─── Processing pipeline ─────────────────────────────────────────

/// Run one drained audio frame through VAD, speech recognition,
/// translation fan-out and broadcast.
///
/// Individual mode detects the language and emits one caption; shared mode
/// runs diarized recognition over the room mix and emits one caption per
/// speaker segment, falling back to the individual path for this frame
/// when diarization fails.
pub async fn process_frame(
    services: &Services,
    store: &MeetingStore,
    room: &Room,
    gate: &EnergyGate,
    sample_rate: u32,
    participant_id: i64,
    frame: &[i16],
) -> FrameOutcome {
    if !gate.passes(frame) {
        return FrameOutcome::Silent;
    }

    match room.mode {
        MeetingMode::Individual => {
            transcribe_individual(services, room, sample_rate, participant_id, frame).await
        }
        MeetingMode::Shared => {
            transcribe_shared(services, store, room, sample_rate, participant_id, frame).await
        }
    }
}

async fn transcribe_individual(
    services: &Services,
    room: &Room,
    sample_rate: u32,
    participant_id: i64,
    frame: &[i16],
) -> FrameOutcome {
    let wav = match encode_wav(frame, sample_rate) {
        Ok(wav) => wav,
        Err(e) => {
            error!("WAV framing failed: {:#}", e);
            return FrameOutcome::Failed;
        }
    };

    let (text, language) = match services.asr.detect_and_transcribe(&wav).await {
        Ok(result) => result,
        Err(e) => {
            warn!("transcription failed for participant {}: {:#}", participant_id, e);
            room.broadcast(ServerEvent::Error {
                error: "transcription failed for an audio chunk".into(),
            })
            .await;
            return FrameOutcome::Failed;
        }
    };
    if text.trim().is_empty() {
        return FrameOutcome::Empty;
    }

    let targets = room.unique_target_languages().await;
    let source = (language != crate::types::UNDETERMINED_LANGUAGE).then_some(language.as_str());
    let translations = translate_fanout(services.translator.as_ref(), &text, source, &targets).await;

    let speaker_name = room.participant_name(participant_id).await;
    room.broadcast(ServerEvent::Transcription {
        speaker_participant_id: participant_id,
        speaker_id: None,
        speaker_name,
        original_text: text,
        source_language: Some(language),
        translations,
        is_final: true,
    })
    .await;
    FrameOutcome::Broadcast(1)
}

async fn transcribe_shared(
    services: &Services,
    store: &MeetingStore,
    room: &Room,
    sample_rate: u32,
    participant_id: i64,
    frame: &[i16],
) -> FrameOutcome {
    let mixed = room.mix_with_peers(participant_id, frame);
    let wav = match encode_wav(&mixed, sample_rate) {
        Ok(wav) => wav,
        Err(e) => {
            error!("WAV framing failed: {:#}", e);
            return FrameOutcome::Failed;
        }
    };

    let prefs = room
        .diarization_prefs(participant_id)
        .await
        .unwrap_or_default();
    let diarized = match services
        .asr
        .transcribe_diarized(&wav, &room.meeting_id, &prefs)
        .await
    {
        Ok(diarized) => diarized,
        Err(e) => {
            warn!(
                "diarization failed for participant {}, falling back to individual: {:#}",
                participant_id, e
            );
            return transcribe_individual(services, room, sample_rate, participant_id, frame).await;
        }
    };

    // Persist voice prints for speaker continuity across reconnects.
    for (raw_label, embedding) in &diarized.speaker_embeddings {
        let (speaker_id, _) = room.resolve_speaker(participant_id, raw_label);
        if let Err(e) = store
            .upsert_speaker_profile(&room.meeting_id, &speaker_id, embedding)
            .await
        {
            warn!("failed to persist speaker profile {}: {:#}", speaker_id, e);
        }
    }

    let targets = room.unique_target_languages().await;
    let source =
        (diarized.language != crate::types::UNDETERMINED_LANGUAGE).then_some(diarized.language.as_str());

    let mut emitted = 0;
    for segment in &diarized.segments {
        let text = segment.text.trim();
        if text.is_empty() {
            continue;
        }
        let (speaker_id, speaker_name) = room.resolve_speaker(participant_id, &segment.speaker);
        let translations =
            translate_fanout(services.translator.as_ref(), text, source, &targets).await;

        room.broadcast(ServerEvent::Transcription {
            speaker_participant_id: participant_id,
            speaker_id: Some(speaker_id),
            speaker_name: Some(speaker_name),
            original_text: text.to_string(),
            source_language: Some(diarized.language.clone()),
            translations,
            is_final: true,
        })
        .await;
        emitted += 1;
    }

    if emitted == 0 {
        FrameOutcome::Empty
    } else {
        FrameOutcome::Broadcast(emitted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{
        DiarizedSegment, DiarizedTranscription, HashEmbedder, IdentityTranslator, Transcriber,
    };
    use crate::services::{ChatMessage, ChatModel};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct ScriptedAsr {
        text: String,
        language: String,
        diarize_fails: bool,
        calls: AtomicUsize,
    }

    impl ScriptedAsr {
        fn speaking(text: &str, language: &str) -> Self {
            Self {
                text: text.into(),
                language: language.into(),
                diarize_fails: false,
                calls: AtomicUsize::new(0),
            }
        }

        fn call_count(&self) -> usize {
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
            if self.diarize_fails {
                anyhow::bail!("diarizer offline");
            }
            Ok(DiarizedTranscription {
                text: self.text.clone(),
                language: self.language.clone(),
                num_speakers: 2,
                segments: vec![
                    DiarizedSegment {
                        speaker: "SPEAKER_00".into(),
                        text: "first part".into(),
                        start: 0.0,
                        end: 4.0,
                        speaker_low_confidence: false,
                        speaker_overlap: false,
                    },
                    DiarizedSegment {
                        speaker: "SPEAKER_01".into(),
                        text: "second part".into(),
                        start: 4.5,
                        end: 9.0,
                        speaker_low_confidence: false,
                        speaker_overlap: false,
                    },
                ],
                speaker_embeddings: Default::default(),
            })
        }
    }

    struct SilentLlm;

    #[async_trait]
    impl ChatModel for SilentLlm {
        async fn complete(&self, _m: &[ChatMessage], _t: u32, _temp: f32) -> Result<String> {
            Ok(String::new())
        }
    }

    fn services(asr: Arc<ScriptedAsr>) -> Services {
        Services {
            asr,
            translator: Arc::new(IdentityTranslator),
            embedder: Arc::new(HashEmbedder::default()),
            llm: Arc::new(SilentLlm),
        }
    }

    async fn room_with_listener(
        mode: MeetingMode,
    ) -> (Arc<Room>, tokio::sync::mpsc::Receiver<String>) {
        let room = Arc::new(Room::new("m1".into(), mode));
        let (tx, rx) = tokio::sync::mpsc::channel(EGRESS_BUFFER);
        room.add_participant(Participant::new(
            1,
            "Alice".into(),
            "ar".into(),
            None,
            DiarizationPrefs::default(),
            tx,
        ))
        .await;
        (room, rx)
    }

    fn voiced_frame() -> Vec<i16> {
        (0..16_000)
            .map(|i| if i % 2 == 0 { 2000 } else { -2000 })
            .collect()
    }

    #[tokio::test]
    async fn silent_frame_produces_no_calls_and_no_broadcasts() {
        let asr = Arc::new(ScriptedAsr::speaking("should not be used", "en"));
        let services = services(asr.clone());
        let store = MeetingStore::open_in_memory().unwrap();
        let (room, mut rx) = room_with_listener(MeetingMode::Individual).await;

        let outcome = process_frame(
            &services,
            &store,
            &room,
            &EnergyGate::default(),
            16_000,
            1,
            &vec![0i16; 16_000],
        )
        .await;

        assert_eq!(outcome, FrameOutcome::Silent);
        assert_eq!(asr.call_count(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn individual_frame_is_transcribed_translated_and_broadcast() {
        let asr = Arc::new(ScriptedAsr::speaking("Hello everyone", "en"));
        let services = services(asr.clone());
        let store = MeetingStore::open_in_memory().unwrap();
        let (room, mut rx) = room_with_listener(MeetingMode::Individual).await;

        let outcome = process_frame(
            &services,
            &store,
            &room,
            &EnergyGate::default(),
            16_000,
            1,
            &voiced_frame(),
        )
        .await;

        assert_eq!(outcome, FrameOutcome::Broadcast(1));
        assert_eq!(asr.call_count(), 1);
        let payload = rx.recv().await.unwrap();
        let json: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(json["type"], "transcription");
        assert_eq!(json["originalText"], "Hello everyone");
        assert_eq!(json["sourceLanguage"], "en");
        assert_eq!(json["translations"]["ar"], "Hello everyone");

        // the caption also landed in the transcript log
        assert_eq!(room.transcript().get("ar").len(), 1);
        assert_eq!(room.transcript().get("en").len(), 1);
    }

    #[tokio::test]
    async fn empty_transcription_broadcasts_nothing() {
        let asr = Arc::new(ScriptedAsr::speaking("   ", "en"));
        let services = services(asr.clone());
        let store = MeetingStore::open_in_memory().unwrap();
        let (room, mut rx) = room_with_listener(MeetingMode::Individual).await;

        let outcome = process_frame(
            &services,
            &store,
            &room,
            &EnergyGate::default(),
            16_000,
            1,
            &voiced_frame(),
        )
        .await;

        assert_eq!(outcome, FrameOutcome::Empty);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn shared_mode_emits_one_caption_per_segment() {
        let asr = Arc::new(ScriptedAsr::speaking("first part second part", "en"));
        let services = services(asr.clone());
        let store = MeetingStore::open_in_memory().unwrap();
        let (room, mut rx) = room_with_listener(MeetingMode::Shared).await;

        let outcome = process_frame(
            &services,
            &store,
            &room,
            &EnergyGate::default(),
            16_000,
            1,
            &voiced_frame(),
        )
        .await;

        assert_eq!(outcome, FrameOutcome::Broadcast(2));
        let first: serde_json::Value =
            serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        let second: serde_json::Value =
            serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(first["speakerId"], "P1_SPEAKER_00");
        assert_eq!(first["speakerName"], "Speaker 1");
        assert_eq!(second["speakerId"], "P1_SPEAKER_01");
        assert_eq!(second["originalText"], "second part");
    }

    #[tokio::test]
    async fn diarization_failure_falls_back_to_individual() {
        let asr = Arc::new(ScriptedAsr {
            text: "plan B caption".into(),
            language: "en".into(),
            diarize_fails: true,
            calls: AtomicUsize::new(0),
        });
        let services = services(asr.clone());
        let store = MeetingStore::open_in_memory().unwrap();
        let (room, mut rx) = room_with_listener(MeetingMode::Shared).await;

        let outcome = process_frame(
            &services,
            &store,
            &room,
            &EnergyGate::default(),
            16_000,
            1,
            &voiced_frame(),
        )
        .await;

        assert_eq!(outcome, FrameOutcome::Broadcast(1));
        // one failed diarize call plus one fallback detect call
        assert_eq!(asr.call_count(), 2);
        let json: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(json["originalText"], "plan B caption");
        assert!(json.get("speakerId").is_none());
    }

    #[test]
    fn ws_query_parses_camel_case() {
        let query: WsQuery = serde_urlencoded_like(
            r#"{"participantId":2,"participantName":"Bob","targetLang":"fr","minSpeakers":2}"#,
        );
        assert_eq!(query.participant_id, Some(2));
        assert_eq!(query.min_speakers, Some(2));
        assert!(query.strictness.is_none());
    }

    fn serde_urlencoded_like(json: &str) -> WsQuery {
        serde_json::from_str(json).unwrap()
    }
}
