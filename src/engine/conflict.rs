use tracing::warn;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;
use crate::retry::{RetryPolicy, retry_with_backoff};

use super::{Engine, EngineError};

pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

/// Structural validation; the reason string feeds an UNKNOWN classification.
pub(super) fn validate_span(span: &Span) -> Result<(), &'static str> {
    if span.start >= span.end {
        return Err("check-out must be after check-in");
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err("date out of range");
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err("stay too long");
    }
    Ok(())
}

/// Classify a proposed interval against the room's calendar and any live
/// coincidence claims. `None` means clear. Caller holds the room lock and
/// has already pruned stale claims.
fn classify(
    rs: &RoomState,
    span: &Span,
    requester: Ulid,
    guests: u32,
) -> Option<(ConflictKind, Option<OrderId>, String)> {
    if let Err(reason) = validate_span(span) {
        return Some((ConflictKind::Unknown, None, reason.to_string()));
    }
    if guests == 0 || guests > rs.max_guests {
        return Some((
            ConflictKind::Unknown,
            None,
            format!("guest count {guests} outside room capacity {}", rs.max_guests),
        ));
    }

    if let Some(existing) = rs.overlapping(span).next() {
        return if existing.requester == requester {
            Some((
                ConflictKind::DoubleBooking,
                Some(existing.order_id),
                format!(
                    "you already hold order {} overlapping these dates",
                    existing.order_id
                ),
            ))
        } else {
            Some((
                ConflictKind::TimeOverlap,
                Some(existing.order_id),
                format!("dates overlap existing reservation {}", existing.order_id),
            ))
        };
    }

    if rs
        .pending
        .iter()
        .any(|c| c.requester != requester && c.span.overlaps(span))
    {
        return Some((
            ConflictKind::ConcurrentRequest,
            None,
            "a competing request for these dates is in flight".to_string(),
        ));
    }

    None
}

impl Engine {
    /// Classify a proposed reservation without committing it.
    ///
    /// A clear result registers a coincidence claim for the caller: until
    /// the claim expires or the caller commits through [`Engine::reserve`],
    /// competing requests for overlapping dates classify as
    /// CONCURRENT_REQUEST.
    pub async fn check_conflict(
        &self,
        room_id: Ulid,
        requester: Ulid,
        span: Span,
        guests: u32,
    ) -> Result<ConflictCheck, EngineError> {
        let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let mut guard = rs.write().await;
        let now = now_ms();
        guard.prune_claims(now, self.config.coincidence_window_ms);

        let room_type = guard.room_type.clone();
        match classify(&guard, &span, requester, guests) {
            None => {
                guard.pending.push(PendingClaim {
                    requester,
                    span,
                    claimed_at: now,
                });
                metrics::counter!(observability::CONFLICT_CHECKS_TOTAL, "outcome" => "clear")
                    .increment(1);
                Ok(ConflictCheck::Clear)
            }
            Some((kind, conflicting_order, message)) => {
                // Release the room before the external search call.
                drop(guard);
                metrics::counter!(observability::CONFLICT_CHECKS_TOTAL, "outcome" => kind.to_string())
                    .increment(1);
                let alternatives = self
                    .alternatives_best_effort(&room_type, span, guests, room_id)
                    .await;
                Ok(ConflictCheck::Conflict(ConflictReport {
                    kind,
                    conflicting_order,
                    message,
                    alternatives,
                }))
            }
        }
    }

    /// Atomic classify-and-insert: the overlap check and the interval
    /// insert are one unit under the room's write lock, so concurrent
    /// reserves on the same room serialize and at most one wins.
    pub async fn reserve(
        &self,
        room_id: Ulid,
        order_id: OrderId,
        requester: Ulid,
        span: Span,
        guests: u32,
    ) -> Result<ReserveOutcome, EngineError> {
        if self.order_to_room.contains_key(&order_id) {
            return Err(EngineError::DuplicateOrder(order_id));
        }
        let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let mut guard = rs.write().await;
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many reservations on room"));
        }
        let now = now_ms();
        guard.prune_claims(now, self.config.coincidence_window_ms);

        if let Some((kind, conflicting_order, message)) =
            classify(&guard, &span, requester, guests)
        {
            let room_type = guard.room_type.clone();
            drop(guard);
            metrics::counter!(observability::RESERVATIONS_TOTAL, "outcome" => kind.to_string())
                .increment(1);
            let alternatives = self
                .alternatives_best_effort(&room_type, span, guests, room_id)
                .await;
            return Ok(ReserveOutcome::Rejected(ConflictReport {
                kind,
                conflicting_order,
                message,
                alternatives,
            }));
        }

        // The caller's own claim (if any) is consumed by the commit.
        guard
            .pending
            .retain(|c| !(c.requester == requester && c.span.overlaps(&span)));

        let event = Event::ReservationPlaced {
            room_id,
            order_id,
            requester,
            span,
            at: now,
        };
        self.persist_and_apply(room_id, &mut guard, &event, Some(requester))
            .await?;
        metrics::counter!(observability::RESERVATIONS_TOTAL, "outcome" => "accepted").increment(1);
        Ok(ReserveOutcome::Accepted)
    }

    /// Cancel an active reservation and cascade the waiting list for the
    /// freed dates.
    pub async fn cancel_reservation(&self, order_id: OrderId) -> Result<Ulid, EngineError> {
        let room_id = self
            .room_for_order(order_id)
            .ok_or(EngineError::UnknownOrder(order_id))?;
        let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let mut guard = rs.write().await;
        if !guard.reservations.iter().any(|r| r.order_id == order_id) {
            return Err(EngineError::UnknownOrder(order_id));
        }

        let event = Event::ReservationCancelled { room_id, order_id };
        self.persist_and_apply(room_id, &mut guard, &event, None).await?;

        self.cascade(room_id, &mut guard).await?;
        Ok(room_id)
    }

    /// Overlap-free rooms of the same type with enough capacity, ranked by
    /// the external search collaborator. Exhausting the retry budget
    /// surfaces `DetectionUnavailable` — never a silent pass.
    pub async fn find_alternatives(
        &self,
        room_type: &str,
        span: Span,
        guests: u32,
        exclude: Ulid,
    ) -> Result<Vec<AlternativeRoom>, EngineError> {
        let candidates = self.local_candidates(room_type, &span, guests, exclude);
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let policy = RetryPolicy::with_attempts(self.config.detection_retries);
        let search = self.search.clone();
        let mut ranked = retry_with_backoff(
            policy,
            || search.rank(span, candidates.clone()),
            "alternative_search",
        )
        .await
        .map_err(|_| EngineError::DetectionUnavailable)?;
        ranked.truncate(self.config.max_alternatives);
        Ok(ranked)
    }

    /// Alternatives attached to a rejection: ranking failure degrades to
    /// the unranked local candidates instead of failing the classification.
    async fn alternatives_best_effort(
        &self,
        room_type: &str,
        span: Span,
        guests: u32,
        exclude: Ulid,
    ) -> Vec<AlternativeRoom> {
        match self.find_alternatives(room_type, span, guests, exclude).await {
            Ok(alts) => alts,
            Err(e) => {
                warn!("alternative ranking unavailable, returning unranked: {e}");
                let mut candidates = self.local_candidates(room_type, &span, guests, exclude);
                candidates.truncate(self.config.max_alternatives);
                candidates
            }
        }
    }

    /// Scan the room map for same-type, capacity-satisfying, overlap-free
    /// rooms. Rooms with a contended lock are skipped — a busy room is a
    /// poor alternative anyway.
    fn local_candidates(
        &self,
        room_type: &str,
        span: &Span,
        guests: u32,
        exclude: Ulid,
    ) -> Vec<AlternativeRoom> {
        let mut out = Vec::new();
        for entry in self.state.iter() {
            if *entry.key() == exclude {
                continue;
            }
            let rs = entry.value().clone();
            if let Ok(guard) = rs.try_read() {
                if guard.room_type == room_type
                    && guard.max_guests >= guests
                    && guard.overlapping(span).next().is_none()
                {
                    out.push(AlternativeRoom {
                        room_id: guard.id,
                        room_type: guard.room_type.clone(),
                        max_guests: guard.max_guests,
                    });
                }
            }
        }
        // Deterministic order before ranking.
        out.sort_by_key(|a| a.room_id);
        out
    }
}
