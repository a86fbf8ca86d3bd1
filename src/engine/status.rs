use ulid::Ulid;

use crate::limits::MAX_REASON_LEN;
use crate::model::*;
use crate::observability;

use super::conflict::now_ms;
use super::{Engine, EngineError};

/// Directed transition table. Everything routes through AVAILABLE.
fn transition_allowed(from: RoomStatus, to: RoomStatus) -> bool {
    use RoomStatus::*;
    matches!(
        (from, to),
        (Available, Occupied)
            | (Occupied, Available)
            | (Available, Maintenance)
            | (Maintenance, Available)
            | (Available, Cleaning)
            | (Cleaning, Available)
    )
}

/// Role gate: Housekeeping handles upkeep statuses, FrontDesk handles
/// occupancy, Manager handles anything.
fn role_may_target(role: Role, to: RoomStatus) -> bool {
    use RoomStatus::*;
    match role {
        Role::Manager => true,
        Role::FrontDesk => matches!(to, Occupied | Available),
        Role::Housekeeping => matches!(to, Maintenance | Cleaning | Available),
    }
}

impl Engine {
    /// Guarded status transition with optimistic concurrency.
    ///
    /// The version check and the write are one unit under the room's write
    /// lock: of concurrent callers presenting the same `expected_version`,
    /// exactly one commits; the rest get `VersionConflict` and must refetch.
    /// A transition into AVAILABLE cascades the waiting list before the
    /// lock is released.
    ///
    /// Returns the new version.
    pub async fn transition(
        &self,
        room_id: Ulid,
        expected_version: u64,
        to: RoomStatus,
        reason: &str,
        operator: Ulid,
        role: Role,
    ) -> Result<u64, EngineError> {
        if reason.len() > MAX_REASON_LEN {
            return Err(EngineError::LimitExceeded("reason too long"));
        }
        if !role_may_target(role, to) {
            return Err(EngineError::PermissionDenied { role, to });
        }

        let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let mut guard = rs.write().await;

        // Staleness first: shape errors computed against a state the caller
        // has not seen would only mislead them.
        if guard.version != expected_version {
            metrics::counter!(observability::VERSION_CONFLICTS_TOTAL).increment(1);
            return Err(EngineError::VersionConflict {
                room_id,
                expected: expected_version,
                actual: guard.version,
            });
        }
        let from = guard.status;
        if from == to {
            return Err(EngineError::NoOpTransition(from));
        }
        if !transition_allowed(from, to) {
            return Err(EngineError::InvalidTransition { from, to });
        }

        let new_version = guard.version + 1;
        let event = Event::RoomStatusChanged {
            room_id,
            from,
            to,
            reason: reason.to_string(),
            operator,
            version: new_version,
            at: now_ms(),
        };
        self.persist_and_apply(room_id, &mut guard, &event, None).await?;
        metrics::counter!(observability::TRANSITIONS_TOTAL, "to" => to.to_string()).increment(1);

        if to == RoomStatus::Available {
            self.cascade(room_id, &mut guard).await?;
        }

        Ok(new_version)
    }
}
