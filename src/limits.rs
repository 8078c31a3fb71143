//! Hard limits applied at the engine boundary.

/// Widest interval a single lookup may materialize (roughly ten years).
pub const MAX_INTERVAL_DAYS: usize = 3_660;

/// Max distinct resources in one booking request.
pub const MAX_RESOURCES_PER_BOOKING: usize = 64;

/// Max quantity of a single line item.
pub const MAX_LINE_ITEM_QUANTITY: u32 = 1_000;

pub const MAX_NAME_LEN: usize = 255;

pub const MAX_EMAIL_LEN: usize = 128;

pub const MAX_NOTE_LEN: usize = 8_192;

pub const MAX_NUMBER_LEN: usize = 24;

/// Max reservations returned by one listing page.
pub const MAX_PAGE_SIZE: usize = 500;
