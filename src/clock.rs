use chrono::{DateTime, Local, NaiveDate, Utc};

/// Source of "today" for availability checks.
///
/// Days are local calendar days; `Fixed` pins the calendar for tests and replays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Clock {
    #[default]
    System,
    Fixed(NaiveDate),
}

impl Clock {
    pub fn today(&self) -> NaiveDate {
        match self {
            Clock::System => Local::now().date_naive(),
            Clock::Fixed(day) => *day,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
