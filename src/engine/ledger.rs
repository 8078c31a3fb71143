use std::collections::BTreeMap;

use chrono::{Datelike, Days, NaiveDate};
use tracing::debug;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError, UnitOfWork};

// ── Date arithmetic ──────────────────────────────────────────────

/// Every day of `[from, to]` inclusive. Inverted bounds are swapped.
pub fn date_range(from: NaiveDate, to: NaiveDate) -> Result<Vec<NaiveDate>, EngineError> {
    let (from, to) = if from > to { (to, from) } else { (from, to) };
    if count_days(from, to) as usize > MAX_INTERVAL_DAYS {
        return Err(EngineError::LimitExceeded("date interval too long"));
    }
    Ok(from.iter_days().take_while(|d| *d <= to).collect())
}

/// Number of days in the normalized inclusive interval.
pub fn count_days(from: NaiveDate, to: NaiveDate) -> i64 {
    (to - from).num_days().abs() + 1
}

/// Every day of a month, honoring leap years.
pub fn month_days(year: i32, month: u32) -> Result<Vec<NaiveDate>, EngineError> {
    if !(1..=12).contains(&month) {
        return Err(EngineError::InvalidValue {
            field: "month",
            value: month as i64,
        });
    }
    let first = NaiveDate::from_ymd_opt(year, month, 1).ok_or(EngineError::InvalidValue {
        field: "year",
        value: year as i64,
    })?;
    Ok(first.iter_days().take_while(|d| d.month() == month).collect())
}

pub fn shift_days(date: NaiveDate, days: u32) -> Result<NaiveDate, EngineError> {
    date.checked_add_days(Days::new(days as u64))
        .ok_or(EngineError::LimitExceeded("date out of range"))
}

/// Bucket rows by `YYYY-MM`, preserving their order inside each bucket.
pub fn bucket_by_month(rows: Vec<CalendarDate>) -> BTreeMap<String, Vec<CalendarDate>> {
    let mut months: BTreeMap<String, Vec<CalendarDate>> = BTreeMap::new();
    for row in rows {
        months.entry(row.month_key()).or_default().push(row);
    }
    months
}

// ── Hydration ────────────────────────────────────────────────────

impl Engine {
    /// Resolve a date set of a locked resource, creating missing days first.
    /// Missing days are persisted as their own event, so they survive a failed
    /// operation. Result is ordered by date.
    pub(super) async fn hydrate(
        &self,
        uow: &mut UnitOfWork,
        resource_id: Ulid,
        dates: &[NaiveDate],
    ) -> Result<Vec<CalendarDate>, EngineError> {
        let mut dates = dates.to_vec();
        dates.sort();
        dates.dedup();
        if dates.len() > MAX_INTERVAL_DAYS {
            return Err(EngineError::LimitExceeded("too many dates in one lookup"));
        }
        if let Some(rows) = uow.cache.get(resource_id, &dates) {
            return Ok(rows);
        }

        let missing: Vec<(Ulid, NaiveDate)> = {
            let rs = uow.resource(&resource_id)?;
            dates
                .iter()
                .filter(|d| rs.get(d).is_none())
                .map(|d| (Ulid::new(), *d))
                .collect()
        };
        if !missing.is_empty() {
            debug!("creating {} days for resource {resource_id}", missing.len());
            metrics::counter!(crate::observability::DATES_CREATED_TOTAL)
                .increment(missing.len() as u64);
            let event = Event::DatesCreated {
                resource_id,
                dates: missing,
            };
            self.persist_and_apply(uow, &event).await?;
        }

        let rs = uow.resource(&resource_id)?;
        let rows: Vec<CalendarDate> = dates.iter().filter_map(|d| rs.get(d).cloned()).collect();
        uow.cache.insert(resource_id, &dates, rows.clone());
        Ok(rows)
    }

    pub(super) async fn hydrate_range(
        &self,
        uow: &mut UnitOfWork,
        resource_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<CalendarDate>, EngineError> {
        let dates = date_range(from, to)?;
        self.hydrate(uow, resource_id, &dates).await
    }

    /// Every day of `[from, to]` for a resource, ordered by date.
    pub async fn fetch_range(
        &self,
        resource_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<CalendarDate>, EngineError> {
        self.require_resource(&resource_id)?;
        let mut uow = self.begin([resource_id]).await?;
        self.hydrate_range(&mut uow, resource_id, from, to).await
    }

    pub async fn fetch_by_dates(
        &self,
        resource_id: Ulid,
        dates: &[NaiveDate],
    ) -> Result<BTreeMap<NaiveDate, CalendarDate>, EngineError> {
        self.require_resource(&resource_id)?;
        if dates.is_empty() {
            return Ok(BTreeMap::new());
        }
        let mut uow = self.begin([resource_id]).await?;
        let rows = self.hydrate(&mut uow, resource_id, dates).await?;
        Ok(rows.into_iter().map(|r| (r.date, r)).collect())
    }

    pub async fn month_grid(
        &self,
        resource_id: Ulid,
        year: i32,
        month: u32,
    ) -> Result<BTreeMap<NaiveDate, CalendarDate>, EngineError> {
        let days = month_days(year, month)?;
        self.fetch_by_dates(resource_id, &days).await
    }

    pub async fn group_by_month(
        &self,
        resource_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<BTreeMap<String, Vec<CalendarDate>>, EngineError> {
        let rows = self.fetch_range(resource_id, from, to).await?;
        Ok(bucket_by_month(rows))
    }
}
