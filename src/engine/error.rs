use ulid::Ulid;

use crate::model::{OrderId, Role, RoomStatus, WaitlistStatus};

/// Infrastructure and state-machine failures. Expected business outcomes
/// (TIME_OVERLAP, DOUBLE_BOOKING, CONCURRENT_REQUEST, UNKNOWN) are returned
/// as [`crate::model::ConflictReport`] values, never as errors.
#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    DuplicateOrder(OrderId),
    UnknownOrder(OrderId),
    /// Lost-update race: the caller's snapshot is stale.
    VersionConflict {
        room_id: Ulid,
        expected: u64,
        actual: u64,
    },
    InvalidTransition {
        from: RoomStatus,
        to: RoomStatus,
    },
    NoOpTransition(RoomStatus),
    PermissionDenied {
        role: Role,
        to: RoomStatus,
    },
    AlreadyEnrolled {
        entry_id: Ulid,
    },
    /// Confirmation arrived after the window closed; the entry has been
    /// expired and the queue cascaded.
    WindowExpired(Ulid),
    InvalidEntryState {
        entry_id: Ulid,
        status: WaitlistStatus,
    },
    /// Room still carries active reservations or live waitlist entries.
    RoomBusy(Ulid),
    /// External alternative-room search failed past the retry budget.
    DetectionUnavailable,
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::DuplicateOrder(order) => write!(f, "order already placed: {order}"),
            EngineError::UnknownOrder(order) => write!(f, "no reservation for order: {order}"),
            EngineError::VersionConflict {
                room_id,
                expected,
                actual,
            } => write!(
                f,
                "version conflict on room {room_id}: expected {expected}, is {actual} — refetch and retry"
            ),
            EngineError::InvalidTransition { from, to } => {
                write!(f, "invalid transition: {from} -> {to}")
            }
            EngineError::NoOpTransition(status) => {
                write!(f, "room already {status}")
            }
            EngineError::PermissionDenied { role, to } => {
                write!(f, "role {role} may not set status {to}")
            }
            EngineError::AlreadyEnrolled { entry_id } => {
                write!(f, "already enrolled for these dates: entry {entry_id}")
            }
            EngineError::WindowExpired(id) => {
                write!(f, "confirmation window expired for entry {id}")
            }
            EngineError::InvalidEntryState { entry_id, status } => {
                write!(f, "entry {entry_id} is {status}")
            }
            EngineError::RoomBusy(id) => {
                write!(f, "cannot retire room {id}: reservations or waitlist entries remain")
            }
            EngineError::DetectionUnavailable => {
                write!(f, "alternative search unavailable after retries")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
