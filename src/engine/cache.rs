use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::CalendarDate;

/// Operation-local memo of date-set lookups, keyed by resource and a hash of
/// the sorted date list. Lives inside one unit of work and is dropped with it.
#[derive(Debug, Default)]
pub struct DateCache {
    entries: HashMap<(Ulid, u64), Vec<CalendarDate>>,
    hits: u64,
}

fn key_of(dates: &[NaiveDate]) -> u64 {
    let mut hasher = DefaultHasher::new();
    dates.hash(&mut hasher);
    hasher.finish()
}

impl DateCache {
    /// `dates` must be sorted and deduplicated.
    pub fn get(&mut self, resource_id: Ulid, dates: &[NaiveDate]) -> Option<Vec<CalendarDate>> {
        let rows = self.entries.get(&(resource_id, key_of(dates)))?;
        // guard against hash collisions
        if rows.len() != dates.len() || rows.iter().zip(dates).any(|(r, d)| r.date != *d) {
            return None;
        }
        self.hits += 1;
        Some(rows.clone())
    }

    pub fn insert(&mut self, resource_id: Ulid, dates: &[NaiveDate], rows: Vec<CalendarDate>) {
        self.entries.insert((resource_id, key_of(dates)), rows);
    }

    /// Drop every entry containing one of the written days.
    pub fn invalidate(&mut self, touched: &[(Ulid, NaiveDate)]) {
        if touched.is_empty() {
            return;
        }
        self.entries.retain(|(resource_id, _), rows| {
            !rows
                .iter()
                .any(|r| touched.iter().any(|(rid, d)| rid == resource_id && *d == r.date))
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }
}
