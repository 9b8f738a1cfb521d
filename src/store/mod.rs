//! SQLite-backed persistent artifacts
//!
//! Everything that must outlive a room lives here: meetings, participant
//! rows, transcript snapshots written at termination, retrieval chunks
//! with their embeddings, chat sessions for transcript QA, speaker rename
//! overrides, diarization speaker profiles and generated minutes.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::types::{DiarizationPrefs, MeetingMode};

/// Room codes avoid easily-confused characters.
const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const ROOM_CODE_LEN: usize = 7;

/// Speaker profiles unused for this long are evicted on the next write.
const SPEAKER_PROFILE_TTL_DAYS: i64 = 7;

#[derive(Debug, Clone)]
pub struct MeetingRecord {
    pub id: String,
    pub room_code: String,
    pub mode: MeetingMode,
    pub created_by: Option<String>,
    pub host_token: String,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

#[derive(Debug, Clone)]
pub struct ParticipantRecord {
    pub meeting_id: String,
    pub participant_id: i64,
    pub name: String,
    pub target_language: String,
    pub user_id: Option<String>,
    pub joined_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
    pub diarization: DiarizationPrefs,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotInfo {
    pub language: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStatus {
    Pending,
    Completed,
    Failed,
}

impl ChunkStatus {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

/// One retrieval chunk of a snapshot transcript.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub index: i64,
    pub text: String,
    pub start_seconds: i64,
    pub end_seconds: i64,
    pub speaker_name: Option<String>,
    pub embedding: Option<Vec<f32>>,
    pub status: ChunkStatus,
}

#[derive(Debug, Clone)]
pub struct ChatSessionRecord {
    pub id: String,
    pub meeting_id: String,
    pub language: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

/// SQLite-backed store for meeting artifacts.
pub struct MeetingStore {
    conn: Arc<Mutex<Connection>>,
}

impl MeetingStore {
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .context("failed to create database directory")?;
            }
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("failed to open database at {}", path.display()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS meetings (
                id TEXT PRIMARY KEY,
                room_code TEXT NOT NULL UNIQUE,
                mode TEXT NOT NULL,
                created_by TEXT,
                host_token TEXT NOT NULL,
                created_at TEXT NOT NULL,
                ended_at TEXT,
                is_active INTEGER NOT NULL DEFAULT 1
            );

            CREATE TABLE IF NOT EXISTS participants (
                meeting_id TEXT NOT NULL,
                participant_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                target_language TEXT NOT NULL,
                user_id TEXT,
                joined_at TEXT NOT NULL,
                left_at TEXT,
                min_speakers INTEGER,
                max_speakers INTEGER,
                strictness REAL,
                PRIMARY KEY (meeting_id, participant_id),
                FOREIGN KEY (meeting_id) REFERENCES meetings(id)
            );

            CREATE TABLE IF NOT EXISTS meeting_transcript_snapshots (
                meeting_id TEXT NOT NULL,
                language TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (meeting_id, language)
            );

            CREATE TABLE IF NOT EXISTS meeting_chunks (
                meeting_id TEXT NOT NULL,
                language TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                content TEXT NOT NULL,
                start_seconds INTEGER NOT NULL,
                end_seconds INTEGER NOT NULL,
                speaker_name TEXT,
                embedding BLOB,
                status TEXT NOT NULL,
                PRIMARY KEY (meeting_id, language, chunk_index)
            );

            CREATE TABLE IF NOT EXISTS chat_sessions (
                id TEXT PRIMARY KEY,
                meeting_id TEXT NOT NULL,
                language TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS chat_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                context_chunks TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY (session_id) REFERENCES chat_sessions(id)
            );

            CREATE TABLE IF NOT EXISTS speaker_names (
                meeting_id TEXT NOT NULL,
                speaker_id TEXT NOT NULL,
                display_name TEXT NOT NULL,
                PRIMARY KEY (meeting_id, speaker_id)
            );

            CREATE TABLE IF NOT EXISTS speaker_profiles (
                session_id TEXT NOT NULL,
                profile_id TEXT NOT NULL,
                embedding BLOB NOT NULL,
                observation_count INTEGER NOT NULL DEFAULT 1,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (session_id, profile_id)
            );

            CREATE TABLE IF NOT EXISTS meeting_minutes (
                meeting_id TEXT NOT NULL,
                language TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (meeting_id, language)
            );

            CREATE INDEX IF NOT EXISTS idx_meetings_room_code ON meetings(room_code);
            CREATE INDEX IF NOT EXISTS idx_chunks_status
                ON meeting_chunks(meeting_id, language, status);
            CREATE INDEX IF NOT EXISTS idx_chat_messages_session
                ON chat_messages(session_id, id);
            "#,
        )?;
        Ok(())
    }

    // ─── Meetings ────────────────────────────────────────────────

    pub async fn create_meeting(
        &self,
        mode: MeetingMode,
        created_by: Option<&str>,
    ) -> Result<MeetingRecord> {
        let conn = self.conn.lock().await;
        let id = uuid::Uuid::new_v4().to_string();
        let host_token = generate_host_token();
        let created_at = Utc::now();

        // Regenerate on the (unlikely) code collision.
        for _ in 0..8 {
            let room_code = generate_room_code();
            let inserted = conn.execute(
                r#"INSERT OR IGNORE INTO meetings
                   (id, room_code, mode, created_by, host_token, created_at, is_active)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1)"#,
                params![
                    id,
                    room_code,
                    mode.to_string(),
                    created_by,
                    host_token,
                    created_at.to_rfc3339(),
                ],
            )?;
            if inserted == 1 {
                return Ok(MeetingRecord {
                    id,
                    room_code,
                    mode,
                    created_by: created_by.map(String::from),
                    host_token,
                    created_at,
                    ended_at: None,
                    is_active: true,
                });
            }
        }
        anyhow::bail!("failed to allocate a unique room code")
    }

    /// Resolve a meeting by room code (case-insensitive) first, then by id.
    pub async fn resolve_meeting(&self, code_or_id: &str) -> Result<Option<MeetingRecord>> {
        let conn = self.conn.lock().await;
        let by_code = Self::query_meeting(
            &conn,
            "SELECT id, room_code, mode, created_by, host_token, created_at, ended_at, is_active
             FROM meetings WHERE room_code = UPPER(?1)",
            code_or_id,
        )?;
        if by_code.is_some() {
            return Ok(by_code);
        }
        Self::query_meeting(
            &conn,
            "SELECT id, room_code, mode, created_by, host_token, created_at, ended_at, is_active
             FROM meetings WHERE id = ?1",
            code_or_id,
        )
    }

    pub async fn get_meeting(&self, meeting_id: &str) -> Result<Option<MeetingRecord>> {
        let conn = self.conn.lock().await;
        Self::query_meeting(
            &conn,
            "SELECT id, room_code, mode, created_by, host_token, created_at, ended_at, is_active
             FROM meetings WHERE id = ?1",
            meeting_id,
        )
    }

    fn query_meeting(conn: &Connection, sql: &str, key: &str) -> Result<Option<MeetingRecord>> {
        let mut stmt = conn.prepare_cached(sql)?;
        let record = stmt
            .query_row(params![key], |row| {
                let mode_str: String = row.get(2)?;
                let created_at: String = row.get(5)?;
                let ended_at: Option<String> = row.get(6)?;
                Ok(MeetingRecord {
                    id: row.get(0)?,
                    room_code: row.get(1)?,
                    mode: mode_str.parse().unwrap_or_default(),
                    created_by: row.get(3)?,
                    host_token: row.get(4)?,
                    created_at: parse_timestamp(&created_at),
                    ended_at: ended_at.as_deref().map(parse_timestamp),
                    is_active: row.get::<_, i64>(7)? != 0,
                })
            })
            .optional()?;
        Ok(record)
    }

    /// Set `ended_at` and clear the active flag. Returns false when the
    /// meeting was already ended, making termination idempotent.
    pub async fn mark_meeting_ended(&self, meeting_id: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        let updated = conn.execute(
            "UPDATE meetings SET ended_at = ?1, is_active = 0 WHERE id = ?2 AND is_active = 1",
            params![Utc::now().to_rfc3339(), meeting_id],
        )?;
        Ok(updated == 1)
    }

    // ─── Participants ────────────────────────────────────────────

    pub async fn add_participant(
        &self,
        meeting_id: &str,
        name: &str,
        target_language: &str,
        user_id: Option<&str>,
        diarization: DiarizationPrefs,
    ) -> Result<i64> {
        let conn = self.conn.lock().await;
        let next_id: i64 = conn.query_row(
            "SELECT COALESCE(MAX(participant_id), 0) + 1 FROM participants WHERE meeting_id = ?1",
            params![meeting_id],
            |row| row.get(0),
        )?;
        conn.execute(
            r#"INSERT INTO participants
               (meeting_id, participant_id, name, target_language, user_id, joined_at,
                min_speakers, max_speakers, strictness)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"#,
            params![
                meeting_id,
                next_id,
                name,
                target_language,
                user_id,
                Utc::now().to_rfc3339(),
                diarization.min_speakers,
                diarization.max_speakers,
                diarization.strictness,
            ],
        )?;
        Ok(next_id)
    }

    pub async fn get_participant(
        &self,
        meeting_id: &str,
        participant_id: i64,
    ) -> Result<Option<ParticipantRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            r#"SELECT meeting_id, participant_id, name, target_language, user_id,
                      joined_at, left_at, min_speakers, max_speakers, strictness
               FROM participants WHERE meeting_id = ?1 AND participant_id = ?2"#,
        )?;
        let record = stmt
            .query_row(params![meeting_id, participant_id], Self::participant_row)
            .optional()?;
        Ok(record)
    }

    pub async fn list_active_participants(
        &self,
        meeting_id: &str,
    ) -> Result<Vec<ParticipantRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            r#"SELECT meeting_id, participant_id, name, target_language, user_id,
                      joined_at, left_at, min_speakers, max_speakers, strictness
               FROM participants
               WHERE meeting_id = ?1 AND left_at IS NULL
               ORDER BY participant_id"#,
        )?;
        let rows = stmt
            .query_map(params![meeting_id], Self::participant_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn participant_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ParticipantRecord> {
        let joined_at: String = row.get(5)?;
        let left_at: Option<String> = row.get(6)?;
        Ok(ParticipantRecord {
            meeting_id: row.get(0)?,
            participant_id: row.get(1)?,
            name: row.get(2)?,
            target_language: row.get(3)?,
            user_id: row.get(4)?,
            joined_at: parse_timestamp(&joined_at),
            left_at: left_at.as_deref().map(parse_timestamp),
            diarization: DiarizationPrefs {
                min_speakers: row.get(7)?,
                max_speakers: row.get(8)?,
                strictness: row.get(9)?,
            },
        })
    }

    pub async fn update_participant_language(
        &self,
        meeting_id: &str,
        participant_id: i64,
        target_language: &str,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE participants SET target_language = ?1
             WHERE meeting_id = ?2 AND participant_id = ?3",
            params![target_language, meeting_id, participant_id],
        )?;
        Ok(())
    }

    pub async fn mark_participant_left(
        &self,
        meeting_id: &str,
        participant_id: i64,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE participants SET left_at = ?1
             WHERE meeting_id = ?2 AND participant_id = ?3 AND left_at IS NULL",
            params![Utc::now().to_rfc3339(), meeting_id, participant_id],
        )?;
        Ok(())
    }

    // ─── Transcript snapshots ────────────────────────────────────

    /// Write-or-overwrite the snapshot for one language; last writer wins.
    pub async fn write_snapshot(
        &self,
        meeting_id: &str,
        language: &str,
        content: &str,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"INSERT OR REPLACE INTO meeting_transcript_snapshots
               (meeting_id, language, content, created_at)
               VALUES (?1, ?2, ?3, ?4)"#,
            params![meeting_id, language, content, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub async fn get_snapshot(&self, meeting_id: &str, language: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT content FROM meeting_transcript_snapshots
             WHERE meeting_id = ?1 AND language = ?2",
        )?;
        let content = stmt
            .query_row(params![meeting_id, language], |row| row.get(0))
            .optional()?;
        Ok(content)
    }

    pub async fn list_snapshots(&self, meeting_id: &str) -> Result<Vec<SnapshotInfo>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT language, created_at FROM meeting_transcript_snapshots
             WHERE meeting_id = ?1 ORDER BY language",
        )?;
        let rows = stmt
            .query_map(params![meeting_id], |row| {
                let created_at: String = row.get(1)?;
                Ok(SnapshotInfo {
                    language: row.get(0)?,
                    created_at: parse_timestamp(&created_at),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ─── Retrieval chunks ────────────────────────────────────────

    /// Replace every chunk of a (meeting, language) atomically.
    /// Delete-then-insert inside one transaction so a re-index never leaves
    /// a mixed generation behind.
    pub async fn replace_chunks(
        &self,
        meeting_id: &str,
        language: &str,
        chunks: &[ChunkRecord],
    ) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM meeting_chunks WHERE meeting_id = ?1 AND language = ?2",
            params![meeting_id, language],
        )?;
        for chunk in chunks {
            tx.execute(
                r#"INSERT INTO meeting_chunks
                   (meeting_id, language, chunk_index, content, start_seconds, end_seconds,
                    speaker_name, embedding, status)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"#,
                params![
                    meeting_id,
                    language,
                    chunk.index,
                    chunk.text,
                    chunk.start_seconds,
                    chunk.end_seconds,
                    chunk.speaker_name,
                    chunk.embedding.as_deref().map(embedding_to_blob),
                    chunk.status.as_str(),
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub async fn completed_chunks(
        &self,
        meeting_id: &str,
        language: &str,
    ) -> Result<Vec<ChunkRecord>> {
        self.chunks_with_status(meeting_id, language, Some(ChunkStatus::Completed))
            .await
    }

    pub async fn all_chunks(&self, meeting_id: &str, language: &str) -> Result<Vec<ChunkRecord>> {
        self.chunks_with_status(meeting_id, language, None).await
    }

    async fn chunks_with_status(
        &self,
        meeting_id: &str,
        language: &str,
        status: Option<ChunkStatus>,
    ) -> Result<Vec<ChunkRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            r#"SELECT chunk_index, content, start_seconds, end_seconds, speaker_name,
                      embedding, status
               FROM meeting_chunks
               WHERE meeting_id = ?1 AND language = ?2
               ORDER BY chunk_index"#,
        )?;
        let rows = stmt
            .query_map(params![meeting_id, language], |row| {
                let blob: Option<Vec<u8>> = row.get(5)?;
                let status_str: String = row.get(6)?;
                Ok(ChunkRecord {
                    index: row.get(0)?,
                    text: row.get(1)?,
                    start_seconds: row.get(2)?,
                    end_seconds: row.get(3)?,
                    speaker_name: row.get(4)?,
                    embedding: blob.as_deref().map(blob_to_embedding),
                    status: ChunkStatus::parse(&status_str),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows
            .into_iter()
            .filter(|c| status.map_or(true, |s| c.status == s))
            .collect())
    }

    // ─── Chat sessions ───────────────────────────────────────────

    pub async fn create_chat_session(
        &self,
        meeting_id: &str,
        language: &str,
    ) -> Result<ChatSessionRecord> {
        let conn = self.conn.lock().await;
        let now = Utc::now();
        let id = uuid::Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO chat_sessions (id, meeting_id, language, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![id, meeting_id, language, now.to_rfc3339()],
        )?;
        Ok(ChatSessionRecord {
            id,
            meeting_id: meeting_id.to_string(),
            language: language.to_string(),
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn get_chat_session(&self, session_id: &str) -> Result<Option<ChatSessionRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, meeting_id, language, created_at, updated_at
             FROM chat_sessions WHERE id = ?1",
        )?;
        let record = stmt
            .query_row(params![session_id], |row| {
                let created_at: String = row.get(3)?;
                let updated_at: String = row.get(4)?;
                Ok(ChatSessionRecord {
                    id: row.get(0)?,
                    meeting_id: row.get(1)?,
                    language: row.get(2)?,
                    created_at: parse_timestamp(&created_at),
                    updated_at: parse_timestamp(&updated_at),
                })
            })
            .optional()?;
        Ok(record)
    }

    /// Append one message and advance the session's `updated_at`.
    pub async fn append_chat_message(
        &self,
        session_id: &str,
        role: &str,
        content: &str,
        context_chunks: Option<&[i64]>,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO chat_messages (session_id, role, content, context_chunks, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                session_id,
                role,
                content,
                context_chunks.map(|c| serde_json::to_string(c).unwrap_or_default()),
                now,
            ],
        )?;
        conn.execute(
            "UPDATE chat_sessions SET updated_at = ?1 WHERE id = ?2",
            params![now, session_id],
        )?;
        Ok(())
    }

    /// Last `limit` user/assistant turns, oldest first.
    pub async fn recent_chat_turns(&self, session_id: &str, limit: usize) -> Result<Vec<ChatTurn>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT role, content FROM chat_messages
             WHERE session_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let mut rows = stmt
            .query_map(params![session_id, limit as i64], |row| {
                Ok(ChatTurn {
                    role: row.get(0)?,
                    content: row.get(1)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.reverse();
        Ok(rows)
    }

    // ─── Speaker names and profiles ──────────────────────────────

    pub async fn set_speaker_name(
        &self,
        meeting_id: &str,
        speaker_id: &str,
        display_name: &str,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO speaker_names (meeting_id, speaker_id, display_name)
             VALUES (?1, ?2, ?3)",
            params![meeting_id, speaker_id, display_name],
        )?;
        Ok(())
    }

    pub async fn speaker_names(
        &self,
        meeting_id: &str,
    ) -> Result<std::collections::HashMap<String, String>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT speaker_id, display_name FROM speaker_names WHERE meeting_id = ?1",
        )?;
        let rows = stmt
            .query_map(params![meeting_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<std::result::Result<std::collections::HashMap<_, _>, _>>()?;
        Ok(rows)
    }

    /// Upsert a diarization speaker profile, bumping its observation count,
    /// then evict profiles idle past the TTL.
    pub async fn upsert_speaker_profile(
        &self,
        session_id: &str,
        profile_id: &str,
        embedding: &[f32],
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"INSERT INTO speaker_profiles
               (session_id, profile_id, embedding, observation_count, updated_at)
               VALUES (?1, ?2, ?3, 1, ?4)
               ON CONFLICT (session_id, profile_id) DO UPDATE SET
                   embedding = excluded.embedding,
                   observation_count = observation_count + 1,
                   updated_at = excluded.updated_at"#,
            params![
                session_id,
                profile_id,
                embedding_to_blob(embedding),
                Utc::now().to_rfc3339(),
            ],
        )?;
        let cutoff = Utc::now() - Duration::days(SPEAKER_PROFILE_TTL_DAYS);
        conn.execute(
            "DELETE FROM speaker_profiles WHERE updated_at < ?1",
            params![cutoff.to_rfc3339()],
        )?;
        Ok(())
    }

    pub async fn speaker_profile_count(&self, session_id: &str) -> Result<i64> {
        let conn = self.conn.lock().await;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM speaker_profiles WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ─── Minutes ─────────────────────────────────────────────────

    pub async fn write_minutes(
        &self,
        meeting_id: &str,
        language: &str,
        content: &str,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO meeting_minutes (meeting_id, language, content, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![meeting_id, language, content, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub async fn get_minutes(&self, meeting_id: &str, language: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT content FROM meeting_minutes WHERE meeting_id = ?1 AND language = ?2",
        )?;
        let content = stmt
            .query_row(params![meeting_id, language], |row| row.get(0))
            .optional()?;
        Ok(content)
    }
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn generate_room_code() -> String {
    let mut rng = rand::rng();
    (0..ROOM_CODE_LEN)
        .map(|_| {
            let idx = rng.random_range(0..ROOM_CODE_ALPHABET.len());
            ROOM_CODE_ALPHABET[idx] as char
        })
        .collect()
}

/// 128-bit opaque host secret, hex-encoded.
fn generate_host_token() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> MeetingStore {
        MeetingStore::open_in_memory().unwrap()
    }

    #[tokio::test]
    async fn opens_on_disk_database_creating_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("meetings.db");
        let store = MeetingStore::open(&path).await.unwrap();
        store.write_snapshot("m1", "en", "x\n").await.unwrap();
        assert!(path.exists());
        assert_eq!(
            store.get_snapshot("m1", "en").await.unwrap().unwrap(),
            "x\n"
        );
    }

    #[tokio::test]
    async fn meeting_round_trip_and_resolution() {
        let store = store().await;
        let meeting = store
            .create_meeting(MeetingMode::Shared, Some("user-1"))
            .await
            .unwrap();
        assert_eq!(meeting.room_code.len(), ROOM_CODE_LEN);
        assert_eq!(meeting.host_token.len(), 32);
        assert!(meeting.is_active);

        // room code resolves case-insensitively, id resolves as fallback
        let by_code = store
            .resolve_meeting(&meeting.room_code.to_lowercase())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_code.id, meeting.id);
        let by_id = store.resolve_meeting(&meeting.id).await.unwrap().unwrap();
        assert_eq!(by_id.room_code, meeting.room_code);
        assert_eq!(by_id.mode, MeetingMode::Shared);

        assert!(store.resolve_meeting("NOSUCH1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn ending_a_meeting_is_idempotent() {
        let store = store().await;
        let meeting = store
            .create_meeting(MeetingMode::Individual, None)
            .await
            .unwrap();
        assert!(store.mark_meeting_ended(&meeting.id).await.unwrap());
        assert!(!store.mark_meeting_ended(&meeting.id).await.unwrap());

        let reloaded = store.get_meeting(&meeting.id).await.unwrap().unwrap();
        assert!(!reloaded.is_active);
        assert!(reloaded.ended_at.is_some());
    }

    #[tokio::test]
    async fn participant_ids_are_dense_per_meeting() {
        let store = store().await;
        let m1 = store
            .create_meeting(MeetingMode::Individual, None)
            .await
            .unwrap();
        let m2 = store
            .create_meeting(MeetingMode::Individual, None)
            .await
            .unwrap();

        let prefs = DiarizationPrefs::default();
        let a = store
            .add_participant(&m1.id, "Alice", "ar", None, prefs)
            .await
            .unwrap();
        let b = store
            .add_participant(&m1.id, "Bob", "fr", None, prefs)
            .await
            .unwrap();
        let other = store
            .add_participant(&m2.id, "Carol", "en", None, prefs)
            .await
            .unwrap();
        assert_eq!((a, b, other), (1, 2, 1));

        store.mark_participant_left(&m1.id, a).await.unwrap();
        let active = store.list_active_participants(&m1.id).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "Bob");
    }

    #[tokio::test]
    async fn snapshots_overwrite_per_language() {
        let store = store().await;
        store.write_snapshot("m1", "en", "first\n").await.unwrap();
        store.write_snapshot("m1", "en", "second\n").await.unwrap();
        store.write_snapshot("m1", "ar", "arabic\n").await.unwrap();

        assert_eq!(
            store.get_snapshot("m1", "en").await.unwrap().unwrap(),
            "second\n"
        );
        let listed = store.list_snapshots("m1").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].language, "ar");
    }

    #[tokio::test]
    async fn chunk_replacement_is_atomic_and_filtered_by_status() {
        let store = store().await;
        let first = vec![
            ChunkRecord {
                index: 0,
                text: "alpha".into(),
                start_seconds: 0,
                end_seconds: 10,
                speaker_name: Some("Alice".into()),
                embedding: Some(vec![1.0, 0.0]),
                status: ChunkStatus::Completed,
            },
            ChunkRecord {
                index: 1,
                text: "beta".into(),
                start_seconds: 11,
                end_seconds: 20,
                speaker_name: None,
                embedding: None,
                status: ChunkStatus::Failed,
            },
        ];
        store.replace_chunks("m1", "en", &first).await.unwrap();

        let completed = store.completed_chunks("m1", "en").await.unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].embedding.as_deref(), Some(&[1.0, 0.0][..]));

        // re-index replaces the previous generation entirely
        let second = vec![ChunkRecord {
            index: 0,
            text: "gamma".into(),
            start_seconds: 0,
            end_seconds: 5,
            speaker_name: None,
            embedding: Some(vec![0.0, 1.0]),
            status: ChunkStatus::Completed,
        }];
        store.replace_chunks("m1", "en", &second).await.unwrap();
        let all = store.all_chunks("m1", "en").await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].text, "gamma");
    }

    #[tokio::test]
    async fn chat_session_tracks_turns_and_updated_at() {
        let store = store().await;
        let session = store.create_chat_session("m1", "en").await.unwrap();

        store
            .append_chat_message(&session.id, "user", "who spoke?", None)
            .await
            .unwrap();
        store
            .append_chat_message(&session.id, "assistant", "Alice did.", Some(&[0, 2]))
            .await
            .unwrap();

        let turns = store.recent_chat_turns(&session.id, 5).await.unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, "user");
        assert_eq!(turns[1].content, "Alice did.");

        let turns = store.recent_chat_turns(&session.id, 1).await.unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].role, "assistant");
    }

    #[tokio::test]
    async fn speaker_profiles_bump_observations() {
        let store = store().await;
        store
            .upsert_speaker_profile("m1", "P1_SPEAKER_00", &[0.1, 0.2])
            .await
            .unwrap();
        store
            .upsert_speaker_profile("m1", "P1_SPEAKER_00", &[0.3, 0.4])
            .await
            .unwrap();
        store
            .upsert_speaker_profile("m1", "P2_SPEAKER_01", &[0.5, 0.6])
            .await
            .unwrap();
        assert_eq!(store.speaker_profile_count("m1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn speaker_names_persist_per_meeting() {
        let store = store().await;
        store
            .set_speaker_name("m1", "P1_SPEAKER_00", "Dana")
            .await
            .unwrap();
        store
            .set_speaker_name("m1", "P1_SPEAKER_00", "Dana Q")
            .await
            .unwrap();
        let names = store.speaker_names("m1").await.unwrap();
        assert_eq!(names.get("P1_SPEAKER_00").map(String::as_str), Some("Dana Q"));
    }
}
