//! Hard caps on engine inputs. Anything above these is rejected with
//! `EngineError::LimitExceeded` before touching the WAL.

use crate::model::Ms;

pub const MAX_BUSINESSES: usize = 100_000;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_REASON_LEN: usize = 1024;
pub const MAX_CONTACT_LEN: usize = 320;

pub const MAX_STAFF_PER_BUSINESS: usize = 1_000;
pub const MAX_SERVICES_PER_BUSINESS: usize = 1_000;
pub const MAX_BLOCKS_PER_BUSINESS: usize = 10_000;
pub const MAX_APPOINTMENTS_PER_BUSINESS: usize = 1_000_000;

/// A service lasts at most one day.
pub const MAX_SERVICE_MINUTES: u32 = 24 * 60;
pub const MIN_SLOT_STEP_MINUTES: u32 = 5;
pub const MAX_SLOT_STEP_MINUTES: u32 = 24 * 60;

/// 1970-01-01T00:00:00.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 2100-01-01T00:00:00.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;
/// Emergency blocks may cover up to a year.
pub const MAX_BLOCK_DURATION_MS: Ms = 366 * 24 * 3_600_000;
