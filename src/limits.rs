use crate::model::{DAY_MS, Ms};

pub const MAX_NOTES_LEN: usize = 2_000;
pub const MAX_MEETING_LINK_LEN: usize = 2_048;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_DESCRIPTION_LEN: usize = 1_000;

/// A consultation longer than a day cannot fit a same-day window.
pub const MAX_DURATION_MINUTES: u32 = 24 * 60;
pub const MAX_WINDOWS_PER_EXPERT: usize = 7 * 24;
pub const MAX_CONSULTATION_TYPES_PER_EXPERT: usize = 64;

/// 2000-01-01T00:00:00Z .. 2200-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
pub const MAX_VALID_TIMESTAMP_MS: Ms = MIN_VALID_TIMESTAMP_MS + 73_049 * DAY_MS;

pub const MAX_BIO_LEN: usize = 4_000;
pub const MAX_REVIEW_COMMENT_LEN: usize = 2_000;
pub const MIN_RATING: u8 = 1;
pub const MAX_RATING: u8 = 5;
/// Reviews returned when the caller names no limit.
pub const DEFAULT_REVIEWS_PAGE: usize = 10;
pub const MAX_REVIEWS_PAGE: usize = 100;

/// Largest WAL frame payload. A longer length prefix on replay is a torn
/// tail, not an allocation request.
pub const MAX_WAL_FRAME_BYTES: usize = 1 << 20;
