use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::ConflictReason;

#[derive(Debug)]
pub enum EngineError {
    /// Resource, season, reservation or line item does not exist.
    NotFound(Ulid),
    /// The resolved date range has no days.
    EmptyInterval,
    AvailabilityConflict {
        resource_id: Ulid,
        date: NaiveDate,
        reason: ConflictReason,
    },
    MinimumStayViolation {
        required: u32,
    },
    InvalidValue {
        field: &'static str,
        value: i64,
    },
    SeasonHasReservations {
        season_id: Ulid,
        reservation_id: Ulid,
    },
    LimitExceeded(&'static str),
    /// Persistence failure. Fatal to the operation, propagated unchanged.
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::EmptyInterval => write!(f, "date interval can not be empty"),
            EngineError::AvailabilityConflict {
                resource_id,
                date,
                reason,
            } => write!(f, "day {date} of resource {resource_id} is unavailable: {reason}"),
            EngineError::MinimumStayViolation { required } => {
                write!(f, "minimum stay not met: book at least {required} days")
            }
            EngineError::InvalidValue { field, value } => {
                write!(f, "invalid {field}: {value}")
            }
            EngineError::SeasonHasReservations {
                season_id,
                reservation_id,
            } => write!(
                f,
                "season {season_id} can not be removed: it contains reservation {reservation_id}"
            ),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl EngineError {
    /// Short, stable label for metrics and client responses.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::NotFound(_) => "not_found",
            EngineError::EmptyInterval => "empty_interval",
            EngineError::AvailabilityConflict { .. } => "availability_conflict",
            EngineError::MinimumStayViolation { .. } => "minimum_stay_violation",
            EngineError::InvalidValue { .. } => "invalid_value",
            EngineError::SeasonHasReservations { .. } => "season_has_reservations",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::WalError(_) => "wal_error",
        }
    }
}
