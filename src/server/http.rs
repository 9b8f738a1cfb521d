//! REST handlers for meetings, transcripts and transcript QA

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::lifecycle::{self, EndReason};
use crate::rag::{self, QueryRequest};
use crate::room::ParticipantInfo;
use crate::store::{MeetingRecord, SnapshotInfo};
use crate::types::{DiarizationPrefs, MeetingMode, ServerEvent};

use super::auth::{host_tokens_match, optional_identity};
use super::{ApiError, ApiResult, AppState};

// ─── Meetings ────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct CreateMeetingRequest {
    #[serde(default)]
    pub mode: Option<MeetingMode>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMeetingResponse {
    pub success: bool,
    pub meeting_id: String,
    pub room_code: String,
    pub mode: MeetingMode,
    pub host_token: String,
}

pub async fn create_meeting_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<CreateMeetingRequest>>,
) -> ApiResult<impl IntoResponse> {
    let identity = optional_identity(&state, &headers).await?;
    let mode = body.and_then(|Json(b)| b.mode).unwrap_or_default();

    let meeting = state
        .store
        .create_meeting(mode, identity.as_ref().map(|i| i.user_id.as_str()))
        .await?;

    Ok(Json(CreateMeetingResponse {
        success: true,
        meeting_id: meeting.id,
        room_code: meeting.room_code,
        mode,
        host_token: meeting.host_token,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingInfoResponse {
    pub meeting_id: String,
    pub room_code: String,
    pub mode: MeetingMode,
    pub is_active: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<chrono::DateTime<chrono::Utc>>,
    pub participants: Vec<ParticipantInfo>,
}

async fn resolve_meeting(state: &AppState, code_or_id: &str) -> ApiResult<MeetingRecord> {
    state
        .store
        .resolve_meeting(code_or_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("no meeting for '{}'", code_or_id)))
}

pub async fn get_meeting_handler(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let meeting = resolve_meeting(&state, &code).await?;

    // Prefer the live room's view; fall back to the persistent rows.
    let participants = match state.rooms.get(&meeting.id).await {
        Some(room) => room.participants_info().await,
        None => state
            .store
            .list_active_participants(&meeting.id)
            .await?
            .into_iter()
            .map(|p| ParticipantInfo {
                participant_id: p.participant_id,
                participant_name: p.name,
                target_language: p.target_language,
            })
            .collect(),
    };

    Ok(Json(MeetingInfoResponse {
        meeting_id: meeting.id,
        room_code: meeting.room_code,
        mode: meeting.mode,
        is_active: meeting.is_active,
        created_at: meeting.created_at,
        ended_at: meeting.ended_at,
        participants,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinMeetingRequest {
    pub participant_name: String,
    pub target_language: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinMeetingResponse {
    pub success: bool,
    pub participant_id: i64,
    pub meeting_id: String,
}

pub async fn join_meeting_handler(
    State(state): State<AppState>,
    Path(code): Path<String>,
    headers: HeaderMap,
    Json(req): Json<JoinMeetingRequest>,
) -> ApiResult<impl IntoResponse> {
    if req.participant_name.trim().is_empty() {
        return Err(ApiError::BadRequest("participantName is required".into()));
    }
    if req.target_language.trim().is_empty() {
        return Err(ApiError::BadRequest("targetLanguage is required".into()));
    }

    let identity = optional_identity(&state, &headers).await?;
    let meeting = resolve_meeting(&state, &code).await?;
    if !meeting.is_active {
        return Err(ApiError::BadRequest("meeting has already ended".into()));
    }

    let participant_id = state
        .store
        .add_participant(
            &meeting.id,
            req.participant_name.trim(),
            req.target_language.trim(),
            identity.as_ref().map(|i| i.user_id.as_str()),
            DiarizationPrefs::default(),
        )
        .await?;

    Ok(Json(JoinMeetingResponse {
        success: true,
        participant_id,
        meeting_id: meeting.id,
    }))
}

// ─── Speakers ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameSpeakerRequest {
    pub speaker_name: String,
}

pub async fn rename_speaker_handler(
    State(state): State<AppState>,
    Path((code, speaker_id)): Path<(String, String)>,
    Json(req): Json<RenameSpeakerRequest>,
) -> ApiResult<impl IntoResponse> {
    let name = req.speaker_name.trim();
    if name.is_empty() {
        return Err(ApiError::BadRequest("speakerName is required".into()));
    }
    let meeting = resolve_meeting(&state, &code).await?;

    state
        .store
        .set_speaker_name(&meeting.id, &speaker_id, name)
        .await?;

    // Renames apply to subsequent captions only; the broadcast is skipped
    // when the name was already in place.
    if let Some(room) = state.rooms.get(&meeting.id).await {
        if room.set_speaker_name(&speaker_id, name) {
            room.broadcast(ServerEvent::SpeakerNameUpdated {
                speaker_id: speaker_id.clone(),
                speaker_name: name.to_string(),
            })
            .await;
        }
    }

    Ok(Json(json!({ "success": true })))
}

// ─── Transcripts ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct LangQuery {
    pub lang: Option<String>,
}

fn require_lang(query: &LangQuery) -> ApiResult<&str> {
    query
        .lang
        .as_deref()
        .filter(|l| !l.is_empty())
        .ok_or_else(|| ApiError::BadRequest("lang query parameter is required".into()))
}

fn plain_text(body: String) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
}

pub async fn live_transcript_handler(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Query(query): Query<LangQuery>,
) -> ApiResult<impl IntoResponse> {
    let lang = require_lang(&query)?;
    let meeting = resolve_meeting(&state, &code).await?;

    let room = state
        .rooms
        .get(&meeting.id)
        .await
        .ok_or_else(|| ApiError::NotFound("no live room for this meeting".into()))?;
    let transcript = room.transcript().render_snapshot(lang).unwrap_or_default();
    Ok(plain_text(transcript))
}

pub async fn snapshot_handler(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Query(query): Query<LangQuery>,
) -> ApiResult<impl IntoResponse> {
    let lang = require_lang(&query)?;
    let meeting = resolve_meeting(&state, &code).await?;

    let snapshot = state
        .store
        .get_snapshot(&meeting.id, lang)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("no snapshot stored for '{}'", lang)))?;
    Ok(plain_text(snapshot))
}

#[derive(Debug, Serialize)]
pub struct SnapshotListResponse {
    pub snapshots: Vec<SnapshotInfo>,
}

pub async fn snapshot_list_handler(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let meeting = resolve_meeting(&state, &code).await?;
    let snapshots = state.store.list_snapshots(&meeting.id).await?;
    Ok(Json(SnapshotListResponse { snapshots }))
}

// ─── Termination ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndMeetingRequest {
    #[serde(default)]
    pub host_token: Option<String>,
}

pub async fn end_meeting_handler(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Json(req): Json<EndMeetingRequest>,
) -> ApiResult<impl IntoResponse> {
    let meeting = resolve_meeting(&state, &code).await?;

    let authorized = req
        .host_token
        .as_deref()
        .map(|provided| host_tokens_match(provided, &meeting.host_token))
        .unwrap_or(false);
    if !authorized {
        return Err(ApiError::Unauthorized("invalid host token".into()));
    }

    lifecycle::end_meeting(
        state.store.clone(),
        state.rooms.clone(),
        state.services.embedder.clone(),
        state.services.llm.clone(),
        state.config.rag,
        &meeting.id,
        EndReason::HostRequest,
    )
    .await?;

    Ok(Json(json!({ "success": true })))
}

pub async fn minutes_handler(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Query(query): Query<LangQuery>,
) -> ApiResult<impl IntoResponse> {
    let lang = query.lang.as_deref().unwrap_or(lifecycle::MINUTES_LANGUAGE);
    let meeting = resolve_meeting(&state, &code).await?;
    let minutes = state
        .store
        .get_minutes(&meeting.id, lang)
        .await?
        .ok_or_else(|| ApiError::NotFound("minutes not generated yet".into()))?;
    Ok(plain_text(minutes))
}

// ─── Transcript QA ───────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChatSessionRequest {
    pub meeting_id: String,
    pub language: String,
}

pub async fn create_chat_session_handler(
    State(state): State<AppState>,
    Json(req): Json<CreateChatSessionRequest>,
) -> ApiResult<impl IntoResponse> {
    let meeting = resolve_meeting(&state, &req.meeting_id).await?;
    let session = state
        .store
        .create_chat_session(&meeting.id, &req.language)
        .await?;
    Ok(Json(json!({ "success": true, "sessionId": session.id })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatQueryRequest {
    pub session_id: String,
    pub question: String,
    pub meeting_id: String,
    pub language: String,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub chat_language: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatQueryResponse {
    pub answer: String,
    pub chunk_ids: Vec<i64>,
    pub session_id: String,
}

pub async fn chat_query_handler(
    State(state): State<AppState>,
    Json(req): Json<ChatQueryRequest>,
) -> ApiResult<impl IntoResponse> {
    if req.question.trim().is_empty() {
        return Err(ApiError::BadRequest("question is required".into()));
    }
    let session = state
        .store
        .get_chat_session(&req.session_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("unknown chat session".into()))?;
    let meeting = resolve_meeting(&state, &req.meeting_id).await?;

    let history = state
        .store
        .recent_chat_turns(&session.id, state.config.rag.history_turns)
        .await?;

    let request = QueryRequest {
        meeting_id: meeting.id,
        language: req.language.clone(),
        question: req.question.clone(),
        chat_language: req
            .chat_language
            .unwrap_or_else(|| session.language.clone()),
        top_k: req.top_k.unwrap_or(state.config.rag.top_k),
        history,
    };

    let answer = rag::answer_question(
        &state.store,
        state.services.embedder.as_ref(),
        state.services.llm.as_ref(),
        &state.config.rag,
        &request,
    )
    .await?;

    state
        .store
        .append_chat_message(&session.id, "user", &req.question, None)
        .await?;
    state
        .store
        .append_chat_message(
            &session.id,
            "assistant",
            &answer.answer,
            Some(&answer.chunk_indices),
        )
        .await?;

    Ok(Json(ChatQueryResponse {
        answer: answer.answer,
        chunk_ids: answer.chunk_indices,
        session_id: session.id,
    }))
}

// ─── Status ──────────────────────────────────────────────────────

pub async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let rooms = state.rooms.room_count().await;
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "activeRooms": rooms,
        })),
    )
}
