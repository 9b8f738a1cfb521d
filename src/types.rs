//! Shared domain and wire types for the meeting engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How captions are produced for a meeting.
///
/// `Individual` transcribes each device's stream on its own with language
/// auto-detection. `Shared` runs diarized transcription so one device can
/// carry several speakers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeetingMode {
    Individual,
    Shared,
}

impl Default for MeetingMode {
    fn default() -> Self {
        Self::Individual
    }
}

impl std::fmt::Display for MeetingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Individual => write!(f, "individual"),
            Self::Shared => write!(f, "shared"),
        }
    }
}

impl std::str::FromStr for MeetingMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "individual" => Ok(Self::Individual),
            "shared" => Ok(Self::Shared),
            other => Err(anyhow::anyhow!("unknown meeting mode: {}", other)),
        }
    }
}

/// Per-session diarization preferences carried by a participant.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DiarizationPrefs {
    pub min_speakers: Option<u32>,
    pub max_speakers: Option<u32>,
    pub strictness: Option<f32>,
}

/// Event pushed to every connected participant of a room.
///
/// Serialized as a flat JSON object with a `type` discriminator; the
/// envelope ([`BroadcastMessage`]) contributes the timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    #[serde(rename = "participant_joined")]
    ParticipantJoined {
        participant_id: i64,
        participant_name: String,
        target_language: String,
    },
    #[serde(rename = "participant_left")]
    ParticipantLeft {
        participant_id: i64,
        participant_name: String,
    },
    #[serde(rename = "participant_language_updated")]
    ParticipantLanguageUpdated {
        participant_id: i64,
        target_language: String,
    },
    #[serde(rename = "transcription")]
    Transcription {
        speaker_participant_id: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        speaker_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        speaker_name: Option<String>,
        original_text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        source_language: Option<String>,
        translations: HashMap<String, String>,
        is_final: bool,
    },
    #[serde(rename = "speaker_name_updated")]
    SpeakerNameUpdated {
        speaker_id: String,
        speaker_name: String,
    },
    #[serde(rename = "meeting_ended")]
    MeetingEnded,
    #[serde(rename = "error")]
    Error { error: String },
}

/// A [`ServerEvent`] stamped at broadcast time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastMessage {
    #[serde(flatten)]
    pub event: ServerEvent,
    pub timestamp: DateTime<Utc>,
}

impl BroadcastMessage {
    pub fn new(event: ServerEvent) -> Self {
        Self {
            event,
            timestamp: Utc::now(),
        }
    }
}

/// Control message received on the websocket text channel.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum ControlMessage {
    #[serde(rename = "update_language")]
    UpdateLanguage { target_language: String },
    /// Unrecognized control types are logged and ignored.
    #[serde(other)]
    Unknown,
}

/// One caption line in a room's per-language transcript log.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptEntry {
    pub timestamp: DateTime<Utc>,
    pub speaker_id: Option<String>,
    pub speaker_name: Option<String>,
    pub text: String,
}

impl TranscriptEntry {
    /// Display name used in the persisted snapshot format.
    pub fn display_name(&self) -> &str {
        self.speaker_name
            .as_deref()
            .or(self.speaker_id.as_deref())
            .unwrap_or("Speaker")
    }
}

/// Sentinel language when the source language is unknown.
pub const UNDETERMINED_LANGUAGE: &str = "und";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcription_event_wire_shape() {
        let msg = BroadcastMessage::new(ServerEvent::Transcription {
            speaker_participant_id: 3,
            speaker_id: None,
            speaker_name: Some("Alice".into()),
            original_text: "hello".into(),
            source_language: Some("en".into()),
            translations: HashMap::from([("fr".into(), "bonjour".into())]),
            is_final: true,
        });
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "transcription");
        assert_eq!(json["speakerParticipantId"], 3);
        assert_eq!(json["translations"]["fr"], "bonjour");
        assert!(json.get("speakerId").is_none());
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn unknown_control_message_is_tolerated() {
        let msg: ControlMessage = serde_json::from_str(r#"{"type":"wave_hands"}"#).unwrap();
        assert!(matches!(msg, ControlMessage::Unknown));

        let msg: ControlMessage =
            serde_json::from_str(r#"{"type":"update_language","targetLanguage":"ar"}"#).unwrap();
        assert!(matches!(msg, ControlMessage::UpdateLanguage { target_language } if target_language == "ar"));
    }

    #[test]
    fn display_name_fallback_chain() {
        let mut entry = TranscriptEntry {
            timestamp: Utc::now(),
            speaker_id: None,
            speaker_name: None,
            text: "x".into(),
        };
        assert_eq!(entry.display_name(), "Speaker");
        entry.speaker_id = Some("P1_SPEAKER_00".into());
        assert_eq!(entry.display_name(), "P1_SPEAKER_00");
        entry.speaker_name = Some("Bob".into());
        assert_eq!(entry.display_name(), "Bob");
    }
}
