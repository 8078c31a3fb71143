use std::collections::BTreeMap;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    /// A reservation with the days it owns on `resources`, ordered by date.
    pub(super) fn build_view<'a>(
        &self,
        reservation: Reservation,
        resources: impl IntoIterator<Item = &'a ResourceState>,
    ) -> ReservationView {
        let mut dates = Vec::new();
        for rs in resources {
            for day in rs.reservation_dates(&reservation.id) {
                let Some(row) = rs.get(&day) else { continue };
                dates.push(ReservedDay {
                    id: row.id,
                    resource_id: rs.id,
                    date: day,
                    season_name: row
                        .season_id
                        .and_then(|sid| self.get_season(&sid))
                        .map(|s| s.name),
                });
            }
        }
        dates.sort_by_key(|d| (d.date, d.resource_id));
        ReservationView {
            identifier: reservation.identifier(),
            from: dates.first().map(|d| d.date),
            to: dates.last().map(|d| d.date),
            dates,
            reservation,
        }
    }

    pub async fn reservation_view(&self, id: Ulid) -> Result<ReservationView, EngineError> {
        let scope = self.reservation_scope(&id)?;
        let mut guards = Vec::with_capacity(scope.len());
        for resource_id in &scope {
            if let Some(guard) = self.read_resource(resource_id).await {
                guards.push(guard);
            }
        }
        let reservation = self.get_reservation(&id).ok_or(EngineError::NotFound(id))?;
        Ok(self.build_view(reservation, guards.iter().map(|g| &**g)))
    }

    async fn summarize(&self, reservation: Reservation) -> ReservationSummary {
        let mut range: Option<(NaiveDate, NaiveDate)> = None;
        for resource_id in self.reservation_scope(&reservation.id).unwrap_or_default() {
            let Some(rs) = self.read_resource(&resource_id).await else { continue };
            if let Some((from, to)) = rs.reservation_range(&reservation.id) {
                range = Some(match range {
                    Some((f, t)) => (f.min(from), t.max(to)),
                    None => (from, to),
                });
            }
        }
        ReservationSummary {
            id: reservation.id,
            identifier: reservation.identifier(),
            customer: reservation.customer,
            price: reservation.price,
            status: reservation.status,
            from: range.map(|r| r.0),
            to: range.map(|r| r.1),
            created_at: reservation.created_at,
        }
    }

    /// Newest first.
    fn reservations_by_age(&self) -> Vec<Reservation> {
        let mut all: Vec<Reservation> = self.reservations.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        all
    }

    /// The reservation plus every other reservation made with the same email.
    pub async fn reservation_detail(&self, id: Ulid) -> Result<ReservationDetail, EngineError> {
        let view = self.reservation_view(id).await?;
        let email = view.reservation.customer.email.clone();
        let mut other_reservations = Vec::new();
        if !email.is_empty() {
            for r in self.reservations_by_age() {
                if r.id != id && r.customer.email == email {
                    other_reservations.push(self.summarize(r).await);
                }
            }
        }
        Ok(ReservationDetail {
            view,
            other_reservations,
        })
    }

    /// One page of reservations, newest first. Pages start at 1.
    pub async fn list_reservations(&self, page: usize, limit: usize) -> Result<ReservationPage, EngineError> {
        if page == 0 {
            return Err(EngineError::InvalidValue { field: "page", value: 0 });
        }
        if limit == 0 {
            return Err(EngineError::InvalidValue { field: "limit", value: 0 });
        }
        if limit > MAX_PAGE_SIZE {
            return Err(EngineError::LimitExceeded("page size too large"));
        }

        let all = self.reservations_by_age();
        let count = all.len();
        let mut items = Vec::with_capacity(limit);
        for r in all.into_iter().skip((page - 1).saturating_mul(limit)).take(limit) {
            items.push(self.summarize(r).await);
        }
        Ok(ReservationPage { count, items })
    }

    /// One day of a resource with its season and reservation contact.
    pub async fn date_detail(&self, resource_id: Ulid, date: NaiveDate) -> Result<DateDetail, EngineError> {
        self.require_resource(&resource_id)?;
        let mut uow = self.begin([resource_id]).await?;
        let row = self
            .hydrate(&mut uow, resource_id, &[date])
            .await?
            .pop()
            .ok_or(EngineError::EmptyInterval)?;

        let rs = uow.resource(&resource_id)?;
        let season = row.season_id.and_then(|sid| self.get_season(&sid));
        let season_dates = season
            .as_ref()
            .map(|s| rs.season_dates(&s.id))
            .unwrap_or_default();
        let reservation = row
            .reservation_id
            .and_then(|rid| self.get_reservation(&rid))
            .map(|r| ReservationContact {
                id: r.id,
                name: r.customer.full_name(),
                email: r.customer.email,
                phone: r.customer.phone,
                price: r.price,
            });

        Ok(DateDetail {
            available: self.availability(&row, self.today()).is_ok(),
            date: row,
            season,
            season_dates,
            reservation,
        })
    }

    /// Every day of a year bucketed by month, and the seasons touching it.
    pub async fn year_overview(&self, resource_id: Ulid, year: i32) -> Result<YearOverview, EngineError> {
        self.require_resource(&resource_id)?;
        let invalid = || EngineError::InvalidValue {
            field: "year",
            value: year as i64,
        };
        let first = NaiveDate::from_ymd_opt(year, 1, 1).ok_or_else(invalid)?;
        let last = NaiveDate::from_ymd_opt(year, 12, 31).ok_or_else(invalid)?;

        let mut uow = self.begin([resource_id]).await?;
        let rows = self.hydrate_range(&mut uow, resource_id, first, last).await?;
        let today = self.today();

        let mut months: BTreeMap<String, Vec<DayCell>> = BTreeMap::new();
        for row in &rows {
            months.entry(row.month_key()).or_default().push(DayCell {
                date: row.date,
                available: self.availability(row, today).is_ok(),
                reserved: row.is_reserved(),
                seasoned: row.is_seasoned(),
            });
        }

        let rs = uow.resource(&resource_id)?;
        let seasons = rs
            .seasons_between(first, last)
            .into_iter()
            .filter_map(|sid| {
                let season = self.get_season(&sid)?;
                let (from, to) = rs.season_range(&sid)?;
                Some(SeasonInfo {
                    days: rs.season_dates(&sid).len(),
                    season,
                    from,
                    to,
                })
            })
            .collect();

        Ok(YearOverview {
            year,
            months,
            seasons,
        })
    }
}
