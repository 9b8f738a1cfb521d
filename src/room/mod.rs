//! Live meeting state
//!
//! A `Room` exists for each active meeting with at least one open
//! connection. It owns the participant set, the per-language transcript
//! log, the shared-mode speaker map and the audio mix taps. Participants
//! are addressed by id; handlers never hold references into the room
//! across await points.

pub mod manager;
pub mod transcript;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

use crate::types::{BroadcastMessage, DiarizationPrefs, MeetingMode, ServerEvent};

pub use manager::RoomManager;
pub use transcript::TranscriptStore;

/// Egress queue depth per participant. A peer that falls this many
/// messages behind is treated as stalled and scheduled for removal.
pub const EGRESS_BUFFER: usize = 64;

/// One connected endpoint of a meeting.
pub struct Participant {
    pub id: i64,
    pub name: String,
    pub target_language: String,
    pub user_id: Option<String>,
    pub diarization: DiarizationPrefs,
    sender: mpsc::Sender<String>,
}

impl Participant {
    pub fn new(
        id: i64,
        name: String,
        target_language: String,
        user_id: Option<String>,
        diarization: DiarizationPrefs,
        sender: mpsc::Sender<String>,
    ) -> Self {
        Self {
            id,
            name,
            target_language,
            user_id,
            diarization,
            sender,
        }
    }
}

/// Public view of a participant for REST responses.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantInfo {
    pub participant_id: i64,
    pub participant_name: String,
    pub target_language: String,
}

#[derive(Default)]
struct SpeakerMap {
    /// (participant, raw diarizer label) -> meeting-wide speaker number.
    assignments: HashMap<(i64, String), u32>,
    /// speaker_id -> display-name override.
    names: HashMap<String, String>,
    next: u32,
}

impl SpeakerMap {
    /// Stable `(speaker_id, display_name)` for a diarizer label observed on
    /// one device. First observation allocates the next meeting-wide
    /// number; the id is device-scoped (`P<pid>_SPEAKER_NN`).
    fn resolve(&mut self, participant_id: i64, raw_label: &str) -> (String, String) {
        let next = &mut self.next;
        let number = *self
            .assignments
            .entry((participant_id, raw_label.to_string()))
            .or_insert_with(|| {
                let n = *next;
                *next += 1;
                n
            });
        let speaker_id = format!("P{}_SPEAKER_{:02}", participant_id, number);
        let name = self
            .names
            .get(&speaker_id)
            .cloned()
            .unwrap_or_else(|| format!("Speaker {}", number + 1));
        (speaker_id, name)
    }

    /// Returns false when the name was already set to this value.
    fn set_name(&mut self, speaker_id: &str, name: &str) -> bool {
        match self.names.get(speaker_id) {
            Some(existing) if existing == name => false,
            _ => {
                self.names.insert(speaker_id.to_string(), name.to_string());
                true
            }
        }
    }
}

/// Runtime state for one active meeting.
pub struct Room {
    pub meeting_id: String,
    pub mode: MeetingMode,
    participants: RwLock<HashMap<i64, Participant>>,
    transcript: TranscriptStore,
    speakers: Mutex<SpeakerMap>,
    /// Last drained frame per participant, for shared-mode mix-on-demand.
    mix_taps: Mutex<HashMap<i64, Vec<i16>>>,
    ended: AtomicBool,
}

impl Room {
    pub fn new(meeting_id: String, mode: MeetingMode) -> Self {
        Self {
            meeting_id,
            mode,
            participants: RwLock::new(HashMap::new()),
            transcript: TranscriptStore::new(),
            speakers: Mutex::new(SpeakerMap::default()),
            mix_taps: Mutex::new(HashMap::new()),
            ended: AtomicBool::new(false),
        }
    }

    pub fn transcript(&self) -> &TranscriptStore {
        &self.transcript
    }

    pub async fn add_participant(&self, participant: Participant) {
        self.participants
            .write()
            .await
            .insert(participant.id, participant);
    }

    pub async fn remove_participant(&self, participant_id: i64) -> Option<Participant> {
        self.mix_taps
            .lock()
            .expect("mix tap lock poisoned")
            .remove(&participant_id);
        self.participants.write().await.remove(&participant_id)
    }

    pub async fn has_participant(&self, participant_id: i64) -> bool {
        self.participants.read().await.contains_key(&participant_id)
    }

    pub async fn is_empty(&self) -> bool {
        self.participants.read().await.is_empty()
    }

    pub async fn participant_name(&self, participant_id: i64) -> Option<String> {
        self.participants
            .read()
            .await
            .get(&participant_id)
            .map(|p| p.name.clone())
    }

    pub async fn participants_info(&self) -> Vec<ParticipantInfo> {
        let mut info: Vec<ParticipantInfo> = self
            .participants
            .read()
            .await
            .values()
            .map(|p| ParticipantInfo {
                participant_id: p.id,
                participant_name: p.name.clone(),
                target_language: p.target_language.clone(),
            })
            .collect();
        info.sort_by_key(|p| p.participant_id);
        info
    }

    pub async fn set_language(&self, participant_id: i64, language: &str) -> bool {
        match self.participants.write().await.get_mut(&participant_id) {
            Some(p) => {
                p.target_language = language.to_string();
                true
            }
            None => false,
        }
    }

    pub async fn diarization_prefs(&self, participant_id: i64) -> Option<DiarizationPrefs> {
        self.participants
            .read()
            .await
            .get(&participant_id)
            .map(|p| p.diarization)
    }

    /// Distinct target languages across the current participant set.
    pub async fn unique_target_languages(&self) -> Vec<String> {
        let mut languages: Vec<String> = self
            .participants
            .read()
            .await
            .values()
            .map(|p| p.target_language.clone())
            .collect();
        languages.sort();
        languages.dedup();
        languages
    }

    // ─── Shared-mode speaker map ─────────────────────────────────

    pub fn resolve_speaker(&self, participant_id: i64, raw_label: &str) -> (String, String) {
        self.speakers
            .lock()
            .expect("speaker lock poisoned")
            .resolve(participant_id, raw_label)
    }

    /// Apply a rename override; false when it was already in place.
    pub fn set_speaker_name(&self, speaker_id: &str, name: &str) -> bool {
        self.speakers
            .lock()
            .expect("speaker lock poisoned")
            .set_name(speaker_id, name)
    }

    /// Seed rename overrides persisted from a previous connection cycle.
    pub fn seed_speaker_names(&self, names: HashMap<String, String>) {
        let mut speakers = self.speakers.lock().expect("speaker lock poisoned");
        for (id, name) in names {
            speakers.names.insert(id, name);
        }
    }

    // ─── Shared-mode mix-on-demand ───────────────────────────────

    /// Average a participant's frame with the most recent frames of every
    /// other participant, normalized by count. Also refreshes the
    /// participant's own tap.
    pub fn mix_with_peers(&self, participant_id: i64, frame: &[i16]) -> Vec<i16> {
        let mut taps = self.mix_taps.lock().expect("mix tap lock poisoned");
        taps.insert(participant_id, frame.to_vec());
        let frames: Vec<&[i16]> = taps.values().map(|f| f.as_slice()).collect();
        crate::audio::mix_frames(&frames)
    }

    // ─── Lifecycle ───────────────────────────────────────────────

    pub fn mark_ended(&self) {
        self.ended.store(true, Ordering::SeqCst);
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    /// Drop every connection sender, which ends each egress task and
    /// closes the attached sockets.
    pub async fn close_all(&self) {
        self.participants.write().await.clear();
    }

    // ─── Broadcast ───────────────────────────────────────────────

    /// Stamp and deliver an event to every connected participant.
    ///
    /// Transcriptions are recorded into the transcript log while the
    /// participant snapshot is held, so an entry is readable no later than
    /// the broadcast that carries it. Each peer gets one non-blocking send
    /// attempt; peers with a full or closed queue are removed before this
    /// call returns, and their ids are handed back for persistent cleanup.
    pub async fn broadcast(&self, event: ServerEvent) -> Vec<i64> {
        let message = BroadcastMessage::new(event);
        let payload = match serde_json::to_string(&message) {
            Ok(p) => p,
            Err(e) => {
                warn!("failed to serialize broadcast: {}", e);
                return Vec::new();
            }
        };

        let mut failed = Vec::new();
        {
            let participants = self.participants.read().await;
            self.transcript.record(&message);
            for (id, participant) in participants.iter() {
                if participant.sender.try_send(payload.clone()).is_err() {
                    debug!(
                        "participant {} in {} has a stalled connection, scheduling removal",
                        id, self.meeting_id
                    );
                    failed.push(*id);
                }
            }
        }

        if !failed.is_empty() {
            let mut participants = self.participants.write().await;
            for id in &failed {
                participants.remove(id);
            }
        }
        failed
    }
}
