use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::{now_ms, validate_span};
use super::{Engine, EngineError};

impl Engine {
    /// Enroll a deferred request. Returns the entry id and its 1-based
    /// position in the queue.
    pub async fn enroll_waitlist(
        &self,
        room_id: Ulid,
        requester: Ulid,
        span: Span,
        guests: u32,
        priority: i32,
        note: Option<String>,
    ) -> Result<(Ulid, u32), EngineError> {
        validate_span(&span).map_err(EngineError::LimitExceeded)?;
        if let Some(ref n) = note
            && n.len() > MAX_NOTE_LEN
        {
            return Err(EngineError::LimitExceeded("note too long"));
        }
        let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let mut guard = rs.write().await;
        if guests == 0 || guests > guard.max_guests {
            return Err(EngineError::LimitExceeded("guest count outside room capacity"));
        }
        let live = guard
            .waitlist
            .iter()
            .filter(|e| !e.status.is_terminal())
            .count();
        if live >= MAX_WAITLIST_PER_ROOM {
            return Err(EngineError::LimitExceeded("waitlist full"));
        }

        // One live enrollment per requester per overlapping date range.
        if let Some(existing) = guard.waitlist.iter().find(|e| {
            e.requester == requester && !e.status.is_terminal() && e.span.overlaps(&span)
        }) {
            return Err(EngineError::AlreadyEnrolled {
                entry_id: existing.id,
            });
        }

        let entry_id = Ulid::new();
        let event = Event::WaitlistEnrolled {
            entry_id,
            room_id,
            requester,
            span,
            guests,
            priority,
            seq: guard.enroll_seq,
            note,
            at: now_ms(),
        };
        self.persist_and_apply(room_id, &mut guard, &event, Some(requester))
            .await?;

        let entry = guard
            .waitlist_entry(&entry_id)
            .expect("entry just enrolled");
        let position = guard.waitlist_rank(entry);
        Ok((entry_id, position))
    }

    /// Current 1-based rank among WAITING entries; 0 while NOTIFIED
    /// (front of the queue, confirmation window open). Terminal entries
    /// have no position.
    pub async fn waitlist_position(&self, entry_id: Ulid) -> Result<u32, EngineError> {
        let room_id = self
            .room_for_entry(&entry_id)
            .ok_or(EngineError::NotFound(entry_id))?;
        let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        let entry = guard
            .waitlist_entry(&entry_id)
            .ok_or(EngineError::NotFound(entry_id))?;
        match entry.status {
            WaitlistStatus::Waiting => Ok(guard.waitlist_rank(entry)),
            WaitlistStatus::Notified => Ok(0),
            status => Err(EngineError::InvalidEntryState { entry_id, status }),
        }
    }

    /// Invoked when a room frees up (status transition to AVAILABLE, or a
    /// cancellation). Notifies the best eligible WAITING entry, if any.
    pub async fn on_room_freed(&self, room_id: Ulid) -> Result<Option<Ulid>, EngineError> {
        let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let mut guard = rs.write().await;
        self.cascade(room_id, &mut guard).await
    }

    /// Select and notify the highest-ranked WAITING entry whose dates are
    /// satisfiable: free of active reservations and of dates another
    /// NOTIFIED entry is currently holding. Caller holds the write lock.
    pub(super) async fn cascade(
        &self,
        room_id: Ulid,
        guard: &mut RoomState,
    ) -> Result<Option<Ulid>, EngineError> {
        let held: Vec<Span> = guard
            .waitlist
            .iter()
            .filter(|e| e.status == WaitlistStatus::Notified)
            .map(|e| e.span)
            .collect();

        let candidate = guard
            .waitlist
            .iter()
            .filter(|e| {
                e.status == WaitlistStatus::Waiting
                    && guard.overlapping(&e.span).next().is_none()
                    && !held.iter().any(|h| h.overlaps(&e.span))
            })
            .min_by(|a, b| {
                b.priority
                    .cmp(&a.priority)
                    .then(a.seq.cmp(&b.seq))
            })
            .map(|e| (e.id, e.requester));

        let Some((entry_id, requester)) = candidate else {
            return Ok(None);
        };

        let now = now_ms();
        let event = Event::WaitlistNotified {
            entry_id,
            room_id,
            notified_at: now,
            expires_at: now + self.config.confirmation_window_ms,
        };
        self.persist_and_apply(room_id, guard, &event, Some(requester))
            .await?;
        metrics::counter!(observability::WAITLIST_NOTIFIED_TOTAL).increment(1);
        Ok(Some(entry_id))
    }

    /// Confirm a notified entry against an order, while the window is open.
    /// A late confirm expires the entry, cascades to the next candidate,
    /// and fails with `WindowExpired`.
    pub async fn confirm_waitlist(
        &self,
        entry_id: Ulid,
        order_id: OrderId,
    ) -> Result<(), EngineError> {
        let room_id = self
            .room_for_entry(&entry_id)
            .ok_or(EngineError::NotFound(entry_id))?;
        let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let mut guard = rs.write().await;
        let entry = guard
            .waitlist_entry(&entry_id)
            .ok_or(EngineError::NotFound(entry_id))?;

        let status = entry.status;
        if status != WaitlistStatus::Notified {
            return Err(EngineError::InvalidEntryState { entry_id, status });
        }
        let requester = entry.requester;
        let expires_at = entry.expires_at.unwrap_or(0);

        if now_ms() >= expires_at {
            let event = Event::WaitlistExpired { entry_id, room_id };
            self.persist_and_apply(room_id, &mut guard, &event, Some(requester))
                .await?;
            metrics::counter!(observability::WAITLIST_EXPIRED_TOTAL).increment(1);
            self.cascade(room_id, &mut guard).await?;
            return Err(EngineError::WindowExpired(entry_id));
        }

        let event = Event::WaitlistConfirmed {
            entry_id,
            room_id,
            order_id,
        };
        self.persist_and_apply(room_id, &mut guard, &event, Some(requester))
            .await
    }

    /// Withdraw a WAITING entry. Entries behind it move up one rank
    /// (positions are computed lazily, so no renumbering is stored).
    pub async fn remove_waitlist(&self, entry_id: Ulid) -> Result<(), EngineError> {
        let room_id = self
            .room_for_entry(&entry_id)
            .ok_or(EngineError::NotFound(entry_id))?;
        let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let mut guard = rs.write().await;
        let entry = guard
            .waitlist_entry(&entry_id)
            .ok_or(EngineError::NotFound(entry_id))?;

        let status = entry.status;
        if status != WaitlistStatus::Waiting {
            return Err(EngineError::InvalidEntryState { entry_id, status });
        }
        let requester = entry.requester;

        let event = Event::WaitlistRemoved { entry_id, room_id };
        self.persist_and_apply(room_id, &mut guard, &event, Some(requester))
            .await
    }

    /// NOTIFIED entries whose confirmation window has closed.
    /// Snapshot for the sweeper; rooms with a contended lock are picked up
    /// on the next tick.
    pub fn collect_expired_notifications(&self, now: Ms) -> Vec<(Ulid, Ulid)> {
        let mut expired = Vec::new();
        for entry in self.state.iter() {
            let rs = entry.value().clone();
            if let Ok(guard) = rs.try_read() {
                for e in &guard.waitlist {
                    if e.status == WaitlistStatus::Notified
                        && e.expires_at.is_some_and(|t| t <= now)
                    {
                        expired.push((e.id, guard.id));
                    }
                }
            }
        }
        expired
    }

    /// Force-expire a notified entry past its window and cascade.
    /// Idempotent: an entry that is no longer NOTIFIED, or whose window is
    /// still open, is left alone and no second cascade fires.
    pub async fn expire_notification(&self, entry_id: Ulid) -> Result<bool, EngineError> {
        let room_id = self
            .room_for_entry(&entry_id)
            .ok_or(EngineError::NotFound(entry_id))?;
        let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let mut guard = rs.write().await;
        let Some(entry) = guard.waitlist_entry(&entry_id) else {
            return Ok(false);
        };
        if entry.status != WaitlistStatus::Notified
            || entry.expires_at.is_none_or(|t| t > now_ms())
        {
            return Ok(false);
        }
        let requester = entry.requester;

        let event = Event::WaitlistExpired { entry_id, room_id };
        self.persist_and_apply(room_id, &mut guard, &event, Some(requester))
            .await?;
        metrics::counter!(observability::WAITLIST_EXPIRED_TOTAL).increment(1);
        self.cascade(room_id, &mut guard).await?;
        Ok(true)
    }

    /// Advisory estimate only: rank times the configured average turnover.
    /// Never feeds a transition decision.
    pub async fn estimated_wait_ms(&self, entry_id: Ulid) -> Result<Ms, EngineError> {
        let position = self.waitlist_position(entry_id).await?;
        Ok(position as Ms * self.config.avg_turnover_ms)
    }
}
