//! Hard caps. Policy knobs live in [`crate::config`]; these are the
//! non-negotiable bounds that keep a single room record small.

use crate::model::Ms;

pub const MAX_ROOMS: usize = 100_000;
pub const MAX_RESERVATIONS_PER_ROOM: usize = 10_000;
pub const MAX_WAITLIST_PER_ROOM: usize = 1_000;
pub const MAX_ROOM_TYPE_LEN: usize = 64;
pub const MAX_REASON_LEN: usize = 256;
pub const MAX_NOTE_LEN: usize = 512;

/// 2000-01-01T00:00:00Z — anything earlier is a malformed date.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;
/// One year; no stay or waitlist request spans longer.
pub const MAX_SPAN_DURATION_MS: Ms = 366 * 24 * 3_600_000;
