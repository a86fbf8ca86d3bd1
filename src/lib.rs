//! Reservation conflict resolution and waiting-list coordination for a
//! hotel's room inventory.
//!
//! The engine keeps one versioned record per room behind its own lock,
//! classifies reservation attempts (overlap, double booking, concurrent
//! request), runs the housekeeping status machine with optimistic
//! concurrency, and coordinates a priority waiting list with confirmation
//! windows. Every committed change is written to a write-ahead log before
//! it is applied, and broadcast through [`notify::NotifyHub`].

pub mod config;
pub mod engine;
pub mod external;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod retry;
pub mod sweeper;
pub mod wal;

pub use config::EngineConfig;
pub use engine::{Engine, EngineError};
pub use model::{
    ConflictCheck, ConflictKind, ConflictReport, ReserveOutcome, RoomStatus, Role, Span,
};
