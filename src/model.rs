use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only time type.
pub type Ms = i64;

/// Externally issued order identifier (the order service owns these).
pub type OrderId = u64;

/// Half-open stay interval `[check_in, check_out)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Room status per the housekeeping state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomStatus {
    Available,
    Occupied,
    Maintenance,
    Cleaning,
}

impl std::fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RoomStatus::Available => "AVAILABLE",
            RoomStatus::Occupied => "OCCUPIED",
            RoomStatus::Maintenance => "MAINTENANCE",
            RoomStatus::Cleaning => "CLEANING",
        };
        f.write_str(s)
    }
}

/// Who is asking for a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Manager,
    FrontDesk,
    Housekeeping,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::Manager => "manager",
            Role::FrontDesk => "front_desk",
            Role::Housekeeping => "housekeeping",
        };
        f.write_str(s)
    }
}

/// An active (non-cancelled) reservation on a room's calendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub order_id: OrderId,
    pub requester: Ulid,
    pub span: Span,
    pub created_at: Ms,
}

/// Immutable audit record of one committed status transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionLogEntry {
    pub from: RoomStatus,
    pub to: RoomStatus,
    pub reason: String,
    pub operator: Ulid,
    pub occurred_at: Ms,
    /// Room version after the transition committed.
    pub version: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaitlistStatus {
    Waiting,
    Notified,
    Confirmed,
    Expired,
    Removed,
}

impl WaitlistStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WaitlistStatus::Confirmed | WaitlistStatus::Expired | WaitlistStatus::Removed
        )
    }
}

impl std::fmt::Display for WaitlistStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WaitlistStatus::Waiting => "WAITING",
            WaitlistStatus::Notified => "NOTIFIED",
            WaitlistStatus::Confirmed => "CONFIRMED",
            WaitlistStatus::Expired => "EXPIRED",
            WaitlistStatus::Removed => "REMOVED",
        };
        f.write_str(s)
    }
}

/// One deferred request in a room's waiting list.
///
/// `seq` is the per-room enrollment counter; ordering is priority descending,
/// then `seq` ascending — strict FIFO among equal priorities even when two
/// enrollments land in the same millisecond.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitlistEntry {
    pub id: Ulid,
    pub requester: Ulid,
    pub span: Span,
    pub guests: u32,
    pub priority: i32,
    pub seq: u64,
    pub status: WaitlistStatus,
    pub note: Option<String>,
    pub created_at: Ms,
    pub notified_at: Option<Ms>,
    pub expires_at: Option<Ms>,
    /// Set when the entry is confirmed against an order.
    pub order_id: Option<OrderId>,
}

/// Short-lived claim registered by a clear conflict check. A competing
/// request from another requester overlapping a live claim classifies as
/// CONCURRENT_REQUEST instead of racing to commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingClaim {
    pub requester: Ulid,
    pub span: Span,
    pub claimed_at: Ms,
}

/// Per-room record — the only mutable shared state in the engine.
/// All mutation happens under the room's write lock.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub id: Ulid,
    pub room_type: String,
    pub max_guests: u32,
    pub status: RoomStatus,
    /// Strictly increasing; at most one committed transition per version.
    pub version: u64,
    pub last_changed_at: Ms,
    pub last_changed_by: Option<Ulid>,
    /// Active reservations, sorted by `span.start`.
    pub reservations: Vec<Reservation>,
    /// Append-only transition log, ordered by `occurred_at`.
    pub log: Vec<TransitionLogEntry>,
    pub waitlist: Vec<WaitlistEntry>,
    /// Coincidence-window claims. Ephemeral: not persisted, pruned lazily.
    pub pending: Vec<PendingClaim>,
    /// Next enrollment sequence number for this room.
    pub enroll_seq: u64,
}

impl RoomState {
    pub fn new(id: Ulid, room_type: String, max_guests: u32) -> Self {
        Self {
            id,
            room_type,
            max_guests,
            status: RoomStatus::Available,
            version: 0,
            last_changed_at: 0,
            last_changed_by: None,
            reservations: Vec::new(),
            log: Vec::new(),
            waitlist: Vec::new(),
            pending: Vec::new(),
            enroll_seq: 0,
        }
    }

    /// Insert a reservation maintaining sort order by span.start.
    pub fn insert_reservation(&mut self, res: Reservation) {
        let pos = self
            .reservations
            .binary_search_by_key(&res.span.start, |r| r.span.start)
            .unwrap_or_else(|e| e);
        self.reservations.insert(pos, res);
    }

    pub fn remove_reservation(&mut self, order_id: OrderId) -> Option<Reservation> {
        if let Some(pos) = self.reservations.iter().position(|r| r.order_id == order_id) {
            Some(self.reservations.remove(pos))
        } else {
            None
        }
    }

    /// Return only reservations whose span overlaps the query window.
    /// Uses binary search to skip reservations starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Reservation> {
        // Everything at index >= right_bound starts at or after query.end → can't overlap.
        let right_bound = self
            .reservations
            .partition_point(|r| r.span.start < query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.span.end > query.start)
    }

    pub fn waitlist_entry(&self, entry_id: &Ulid) -> Option<&WaitlistEntry> {
        self.waitlist.iter().find(|e| e.id == *entry_id)
    }

    pub fn waitlist_entry_mut(&mut self, entry_id: &Ulid) -> Option<&mut WaitlistEntry> {
        self.waitlist.iter_mut().find(|e| e.id == *entry_id)
    }

    /// 1-based rank of a WAITING entry among the room's WAITING entries.
    pub fn waitlist_rank(&self, entry: &WaitlistEntry) -> u32 {
        1 + self
            .waitlist
            .iter()
            .filter(|o| {
                o.id != entry.id
                    && o.status == WaitlistStatus::Waiting
                    && (o.priority > entry.priority
                        || (o.priority == entry.priority && o.seq < entry.seq))
            })
            .count() as u32
    }

    /// Drop coincidence claims whose window has elapsed.
    pub fn prune_claims(&mut self, now: Ms, window: Ms) {
        self.pending.retain(|c| c.claimed_at + window > now);
    }
}

/// The event types — flat, no nesting. WAL record format and hub payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomRegistered {
        id: Ulid,
        room_type: String,
        max_guests: u32,
        /// Compaction snapshots the live status/version here; fresh
        /// registrations carry `Available`/0.
        status: RoomStatus,
        version: u64,
    },
    RoomRetired {
        id: Ulid,
    },
    RoomStatusChanged {
        room_id: Ulid,
        from: RoomStatus,
        to: RoomStatus,
        reason: String,
        operator: Ulid,
        /// Room version after this transition.
        version: u64,
        at: Ms,
    },
    ReservationPlaced {
        room_id: Ulid,
        order_id: OrderId,
        requester: Ulid,
        span: Span,
        at: Ms,
    },
    ReservationCancelled {
        room_id: Ulid,
        order_id: OrderId,
    },
    WaitlistEnrolled {
        entry_id: Ulid,
        room_id: Ulid,
        requester: Ulid,
        span: Span,
        guests: u32,
        priority: i32,
        seq: u64,
        note: Option<String>,
        at: Ms,
    },
    WaitlistNotified {
        entry_id: Ulid,
        room_id: Ulid,
        notified_at: Ms,
        expires_at: Ms,
    },
    WaitlistConfirmed {
        entry_id: Ulid,
        room_id: Ulid,
        order_id: OrderId,
    },
    WaitlistExpired {
        entry_id: Ulid,
        room_id: Ulid,
    },
    WaitlistRemoved {
        entry_id: Ulid,
        room_id: Ulid,
    },
}

// ── Conflict classification ──────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// Overlaps another requester's active reservation.
    TimeOverlap,
    /// Overlaps the same requester's own active reservation.
    DoubleBooking,
    /// A competing uncommitted request for the same dates is in flight.
    ConcurrentRequest,
    /// Structural rejection (malformed dates, guest count). Never success.
    Unknown,
}

impl std::fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConflictKind::TimeOverlap => "TIME_OVERLAP",
            ConflictKind::DoubleBooking => "DOUBLE_BOOKING",
            ConflictKind::ConcurrentRequest => "CONCURRENT_REQUEST",
            ConflictKind::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// A candidate replacement room offered alongside a rejection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlternativeRoom {
    pub room_id: Ulid,
    pub room_type: String,
    pub max_guests: u32,
}

/// Why a reservation attempt was rejected, plus what to offer instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictReport {
    pub kind: ConflictKind,
    pub conflicting_order: Option<OrderId>,
    pub message: String,
    pub alternatives: Vec<AlternativeRoom>,
}

/// Business outcome of a read-only conflict check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictCheck {
    /// No collision; a coincidence claim has been registered for the caller.
    Clear,
    Conflict(ConflictReport),
}

/// Business outcome of an atomic reserve attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReserveOutcome {
    Accepted,
    Rejected(ConflictReport),
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    pub id: Ulid,
    pub room_type: String,
    pub max_guests: u32,
    pub status: RoomStatus,
    pub version: u64,
    pub last_changed_at: Ms,
    pub last_changed_by: Option<Ulid>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitlistSnapshot {
    pub entry: WaitlistEntry,
    /// 1-based rank while WAITING, 0 while NOTIFIED.
    pub position: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: Ms = 86_400_000;

    fn res(order_id: OrderId, start: Ms, end: Ms) -> Reservation {
        Reservation {
            order_id,
            requester: Ulid::new(),
            span: Span::new(start, end),
            created_at: 0,
        }
    }

    fn waiting(priority: i32, seq: u64) -> WaitlistEntry {
        WaitlistEntry {
            id: Ulid::new(),
            requester: Ulid::new(),
            span: Span::new(DAY, 2 * DAY),
            guests: 1,
            priority,
            seq,
            status: WaitlistStatus::Waiting,
            note: None,
            created_at: 0,
            notified_at: None,
            expires_at: None,
            order_id: None,
        }
    }

    #[test]
    fn span_basics() {
        let s = Span::new(10 * DAY, 12 * DAY);
        assert_eq!(s.duration_ms(), 2 * DAY);
        let next = Span::new(12 * DAY, 13 * DAY);
        assert!(!s.overlaps(&next)); // checkout day is free for the next check-in
        let mid = Span::new(11 * DAY, 13 * DAY);
        assert!(s.overlaps(&mid));
    }

    #[test]
    fn reservation_ordering() {
        let mut rs = RoomState::new(Ulid::new(), "standard".into(), 2);
        rs.insert_reservation(res(3, 30 * DAY, 40 * DAY));
        rs.insert_reservation(res(1, 10 * DAY, 20 * DAY));
        rs.insert_reservation(res(2, 20 * DAY, 30 * DAY));
        let orders: Vec<OrderId> = rs.reservations.iter().map(|r| r.order_id).collect();
        assert_eq!(orders, vec![1, 2, 3]);
    }

    #[test]
    fn overlapping_skips_disjoint() {
        let mut rs = RoomState::new(Ulid::new(), "standard".into(), 2);
        rs.insert_reservation(res(1, DAY, 2 * DAY));
        rs.insert_reservation(res(2, 5 * DAY, 7 * DAY));
        rs.insert_reservation(res(3, 20 * DAY, 21 * DAY));

        let query = Span::new(6 * DAY, 10 * DAY);
        let hits: Vec<_> = rs.overlapping(&query).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].order_id, 2);
    }

    #[test]
    fn overlapping_adjacent_not_included() {
        // Reservation ending exactly at query.start is NOT overlapping (half-open)
        let mut rs = RoomState::new(Ulid::new(), "standard".into(), 2);
        rs.insert_reservation(res(1, DAY, 2 * DAY));
        let query = Span::new(2 * DAY, 3 * DAY);
        assert!(rs.overlapping(&query).next().is_none());
    }

    #[test]
    fn remove_reservation_by_order() {
        let mut rs = RoomState::new(Ulid::new(), "standard".into(), 2);
        rs.insert_reservation(res(1, DAY, 2 * DAY));
        rs.insert_reservation(res(2, 3 * DAY, 4 * DAY));
        let removed = rs.remove_reservation(1).unwrap();
        assert_eq!(removed.order_id, 1);
        assert!(rs.remove_reservation(99).is_none());
        assert_eq!(rs.reservations.len(), 1);
    }

    #[test]
    fn waitlist_rank_priority_then_fifo() {
        let mut rs = RoomState::new(Ulid::new(), "standard".into(), 2);
        rs.waitlist.push(waiting(5, 0)); // A
        rs.waitlist.push(waiting(5, 1)); // B
        rs.waitlist.push(waiting(3, 2)); // C

        let ranks: Vec<u32> = rs.waitlist.iter().map(|e| rs.waitlist_rank(e)).collect();
        assert_eq!(ranks, vec![1, 2, 3]);
    }

    #[test]
    fn waitlist_rank_ignores_terminal() {
        let mut rs = RoomState::new(Ulid::new(), "standard".into(), 2);
        let mut expired = waiting(9, 0);
        expired.status = WaitlistStatus::Expired;
        rs.waitlist.push(expired);
        let live = waiting(1, 1);
        rs.waitlist.push(live.clone());
        assert_eq!(rs.waitlist_rank(&live), 1);
    }

    #[test]
    fn claims_pruned_by_window() {
        let mut rs = RoomState::new(Ulid::new(), "standard".into(), 2);
        rs.pending.push(PendingClaim {
            requester: Ulid::new(),
            span: Span::new(DAY, 2 * DAY),
            claimed_at: 1_000,
        });
        rs.prune_claims(10_000, 30_000);
        assert_eq!(rs.pending.len(), 1);
        rs.prune_claims(40_000, 30_000);
        assert!(rs.pending.is_empty());
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::ReservationPlaced {
            room_id: Ulid::new(),
            order_id: 500,
            requester: Ulid::new(),
            span: Span::new(10 * DAY, 12 * DAY),
            at: 9 * DAY,
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
