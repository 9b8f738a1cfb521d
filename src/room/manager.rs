//! Registry of live rooms
//!
//! Lookups take the reader side; creating or removing a room takes the
//! writer side. Broadcast delivery happens outside the registry lock so a
//! slow peer in one room never blocks another room's traffic.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use crate::types::{MeetingMode, ServerEvent, TranscriptEntry};

use super::Room;

#[derive(Default)]
pub struct RoomManager {
    rooms: RwLock<HashMap<String, Arc<Room>>>,
}

impl RoomManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the room for a meeting, creating it on first join. A room is
    /// re-creatable after removal as long as the meeting is still active;
    /// the caller checks that.
    pub async fn get_or_create(&self, meeting_id: &str, mode: MeetingMode) -> Arc<Room> {
        if let Some(room) = self.rooms.read().await.get(meeting_id) {
            return room.clone();
        }
        let mut rooms = self.rooms.write().await;
        rooms
            .entry(meeting_id.to_string())
            .or_insert_with(|| {
                info!("creating room for meeting {}", meeting_id);
                Arc::new(Room::new(meeting_id.to_string(), mode))
            })
            .clone()
    }

    pub async fn get(&self, meeting_id: &str) -> Option<Arc<Room>> {
        self.rooms.read().await.get(meeting_id).cloned()
    }

    /// Atomically take a room out of the registry. Termination uses this
    /// so snapshot collection sees a frozen transcript.
    pub async fn remove(&self, meeting_id: &str) -> Option<Arc<Room>> {
        let room = self.rooms.write().await.remove(meeting_id);
        if room.is_some() {
            info!("removed room for meeting {}", meeting_id);
        }
        room
    }

    /// Put a room back after a failed termination so captions are not lost.
    pub async fn restore(&self, room: Arc<Room>) {
        self.rooms
            .write()
            .await
            .insert(room.meeting_id.clone(), room);
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Deliver an event to every participant of a meeting. Returns the ids
    /// of peers dropped for stalled connections, or None when no room is
    /// live for the meeting.
    pub async fn broadcast(&self, meeting_id: &str, event: ServerEvent) -> Option<Vec<i64>> {
        let room = self.get(meeting_id).await?;
        Some(room.broadcast(event).await)
    }

    // ─── Read-through transcript access ──────────────────────────

    pub async fn get_transcript(&self, meeting_id: &str, language: &str) -> Option<Vec<TranscriptEntry>> {
        let room = self.get(meeting_id).await?;
        Some(room.transcript().get(language))
    }

    pub async fn get_transcript_languages(&self, meeting_id: &str) -> Option<Vec<String>> {
        let room = self.get(meeting_id).await?;
        Some(room.transcript().languages())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_or_create_is_idempotent() {
        let manager = RoomManager::new();
        let a = manager.get_or_create("m1", MeetingMode::Individual).await;
        let b = manager.get_or_create("m1", MeetingMode::Individual).await;
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(manager.room_count().await, 1);
    }

    #[tokio::test]
    async fn remove_takes_the_room_out_once() {
        let manager = RoomManager::new();
        manager.get_or_create("m1", MeetingMode::Individual).await;
        assert!(manager.remove("m1").await.is_some());
        assert!(manager.remove("m1").await.is_none());
        assert!(manager.get("m1").await.is_none());
    }

    #[tokio::test]
    async fn broadcast_to_unknown_meeting_is_none() {
        let manager = RoomManager::new();
        assert!(manager
            .broadcast("ghost", ServerEvent::MeetingEnded)
            .await
            .is_none());
    }
}
