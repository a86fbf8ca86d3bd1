use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    pub async fn room_info(&self, room_id: Ulid) -> Result<RoomInfo, EngineError> {
        let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        Ok(RoomInfo {
            id: guard.id,
            room_type: guard.room_type.clone(),
            max_guests: guard.max_guests,
            status: guard.status,
            version: guard.version,
            last_changed_at: guard.last_changed_at,
            last_changed_by: guard.last_changed_by,
        })
    }

    pub async fn list_rooms(&self) -> Vec<RoomInfo> {
        // Clone the Arcs out first; never hold a map shard across an await.
        let rooms: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(rooms.len());
        for rs in rooms {
            let guard = rs.read().await;
            out.push(RoomInfo {
                id: guard.id,
                room_type: guard.room_type.clone(),
                max_guests: guard.max_guests,
                status: guard.status,
                version: guard.version,
                last_changed_at: guard.last_changed_at,
                last_changed_by: guard.last_changed_by,
            });
        }
        out.sort_by_key(|r| r.id);
        out
    }

    /// Active reservations, sorted by check-in.
    pub async fn reservations(&self, room_id: Ulid) -> Result<Vec<Reservation>, EngineError> {
        let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        Ok(guard.reservations.clone())
    }

    /// Append-only transition history, oldest first.
    pub async fn transition_log(
        &self,
        room_id: Ulid,
    ) -> Result<Vec<TransitionLogEntry>, EngineError> {
        let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        Ok(guard.log.clone())
    }

    /// All waitlist entries for a room with their computed positions.
    pub async fn waitlist(&self, room_id: Ulid) -> Result<Vec<WaitlistSnapshot>, EngineError> {
        let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        Ok(guard
            .waitlist
            .iter()
            .map(|e| WaitlistSnapshot {
                position: match e.status {
                    WaitlistStatus::Waiting => guard.waitlist_rank(e),
                    _ => 0,
                },
                entry: e.clone(),
            })
            .collect())
    }

    pub async fn waitlist_entry(&self, entry_id: Ulid) -> Result<WaitlistEntry, EngineError> {
        let room_id = self
            .room_for_entry(&entry_id)
            .ok_or(EngineError::NotFound(entry_id))?;
        let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        guard
            .waitlist_entry(&entry_id)
            .cloned()
            .ok_or(EngineError::NotFound(entry_id))
    }
}
