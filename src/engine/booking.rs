use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::Deserialize;
use tracing::{error, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::*;

use super::ledger::{count_days, shift_days};
use super::{Engine, EngineError, UnitOfWork};

fn default_quantity() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct BookingItem {
    pub resource_id: Ulid,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
}

/// A customer's request to book `[from, to]` on one or more resources.
#[derive(Debug, Clone, Deserialize)]
pub struct BookingRequest {
    pub items: Vec<BookingItem>,
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub customer: Customer,
    #[serde(default)]
    pub note: Option<String>,
}

impl BookingRequest {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.items.is_empty() {
            return Err(EngineError::InvalidValue {
                field: "resources",
                value: 0,
            });
        }
        if self.resource_ids().len() > MAX_RESOURCES_PER_BOOKING {
            return Err(EngineError::LimitExceeded("too many resources in one booking"));
        }
        if let Some(item) = self.items.iter().find(|i| i.quantity > MAX_LINE_ITEM_QUANTITY) {
            return Err(EngineError::InvalidValue {
                field: "quantity",
                value: item.quantity as i64,
            });
        }
        let c = &self.customer;
        if [&c.first_name, &c.last_name, &c.phone]
            .into_iter()
            .flatten()
            .any(|v| v.len() > MAX_NAME_LEN)
        {
            return Err(EngineError::LimitExceeded("customer field too long"));
        }
        if c.email.len() > MAX_EMAIL_LEN {
            return Err(EngineError::LimitExceeded("email too long"));
        }
        if self.note.as_ref().is_some_and(|n| n.len() > MAX_NOTE_LEN) {
            return Err(EngineError::LimitExceeded("note too long"));
        }
        Ok(())
    }

    pub fn resource_ids(&self) -> BTreeSet<Ulid> {
        self.items.iter().map(|i| i.resource_id).collect()
    }
}

/// Longest run of consecutive available days. A gap in the dates or an
/// unavailable day resets the run.
pub fn longest_available_run<'a>(
    rows: impl IntoIterator<Item = &'a CalendarDate>,
    available: impl Fn(&CalendarDate) -> bool,
) -> u32 {
    let mut best = 0u32;
    let mut run = 0u32;
    let mut previous: Option<NaiveDate> = None;
    for row in rows {
        let contiguous = previous.is_none_or(|p| p.succ_opt() == Some(row.date));
        previous = Some(row.date);
        if !available(row) {
            run = 0;
            continue;
        }
        run = if contiguous { run + 1 } else { 1 };
        best = best.max(run);
    }
    best
}

impl Engine {
    /// Sum of the season price of each day. Unseasoned days add nothing.
    pub(super) fn price_of(&self, rows: &[CalendarDate]) -> i64 {
        rows.iter()
            .filter_map(|r| r.season_id.and_then(|sid| self.get_season(&sid)))
            .fold(0i64, |total, s| total.saturating_add(s.price))
    }

    pub(super) async fn minimum_stay_in(
        &self,
        uow: &mut UnitOfWork,
        resource_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<u32, EngineError> {
        let (from, to) = if from > to { (to, from) } else { (from, to) };
        let required = {
            let rs = uow.resource(&resource_id)?;
            rs.seasons_between(from, to)
                .iter()
                .filter_map(|sid| self.get_season(sid))
                .map(|s| s.minimal_days)
                .max()
                .unwrap_or(0)
        };
        if required == 0 {
            return Ok(1);
        }

        // Probe a window shifted forward by `required` days, at least
        // `required` days long.
        let span = count_days(from, to).max(required as i64) as u32;
        let probe_from = shift_days(from, required)?;
        let probe_to = shift_days(probe_from, span - 1)?;
        let probe = self
            .hydrate_range(uow, resource_id, probe_from, probe_to)
            .await?;

        let today = self.today();
        let best = longest_available_run(&probe, |r| self.availability(r, today).is_ok());
        Ok(if best >= required { required } else { best })
    }

    /// Smallest number of consecutive days a booking of `[from, to]` must cover.
    pub async fn minimum_stay(
        &self,
        resource_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<u32, EngineError> {
        self.require_resource(&resource_id)?;
        let mut uow = self.begin([resource_id]).await?;
        self.minimum_stay_in(&mut uow, resource_id, from, to).await
    }

    /// Season price of `[from, to]` on one resource.
    pub async fn price_for(
        &self,
        resource_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<i64, EngineError> {
        self.require_resource(&resource_id)?;
        let mut uow = self.begin([resource_id]).await?;
        let rows = self.hydrate_range(&mut uow, resource_id, from, to).await?;
        Ok(self.price_of(&rows))
    }

    /// Validate and commit a booking. Every day on every requested resource is
    /// claimed in one event, or nothing is. The confirmation is sent after the
    /// commit and its failure never fails the booking.
    pub async fn create_reservation(
        &self,
        request: BookingRequest,
    ) -> Result<ReservationView, EngineError> {
        let view = match self.commit_reservation(request).await {
            Ok(view) => view,
            Err(e) => {
                metrics::counter!(BOOKINGS_REJECTED_TOTAL, "reason" => e.kind()).increment(1);
                return Err(e);
            }
        };
        metrics::counter!(BOOKINGS_CREATED_TOTAL).increment(1);
        info!(
            "reservation {} created: {:?} - {:?}, price {}",
            view.identifier, view.from, view.to, view.reservation.price
        );

        if let Err(e) = self.dispatcher.send(&view).await {
            metrics::counter!(NOTIFICATIONS_FAILED_TOTAL).increment(1);
            error!("confirmation for reservation {} failed: {e}", view.identifier);
        }
        Ok(view)
    }

    async fn commit_reservation(&self, request: BookingRequest) -> Result<ReservationView, EngineError> {
        request.validate()?;
        let resource_ids = request.resource_ids();
        for id in &resource_ids {
            self.require_resource(id)?;
        }

        let today = self.today();
        let requested = count_days(request.from, request.to);
        let mut uow = self.begin(resource_ids.iter().copied()).await?;

        let mut claims = Vec::with_capacity(resource_ids.len());
        let mut price = 0i64;
        for &resource_id in &resource_ids {
            let rows = self
                .hydrate_range(&mut uow, resource_id, request.from, request.to)
                .await?;
            if rows.is_empty() {
                return Err(EngineError::EmptyInterval);
            }

            let required = self
                .minimum_stay_in(&mut uow, resource_id, request.from, request.to)
                .await?;
            if requested < required as i64 {
                return Err(EngineError::MinimumStayViolation { required });
            }

            for row in &rows {
                self.availability(row, today)
                    .map_err(|reason| EngineError::AvailabilityConflict {
                        resource_id,
                        date: row.date,
                        reason,
                    })?;
            }

            price = price.saturating_add(self.price_of(&rows));
            claims.push(DateClaim {
                resource_id,
                dates: rows.iter().map(|r| r.date).collect(),
            });
        }

        let mut reservation = Reservation::new(Ulid::new(), request.customer, price, self.clock.now());
        reservation.note = normalize_text(request.note.as_deref());
        for item in &request.items {
            reservation.add_item(LineItem::new(item.resource_id, item.quantity));
        }

        let event = Event::ReservationCreated {
            reservation: reservation.clone(),
            claims,
        };
        self.persist_and_apply(&mut uow, &event).await?;
        Ok(self.build_view(reservation, uow.resources()))
    }

    /// Lock every resource a reservation spans. Retries if the reservation
    /// moves onto another resource while the locks are being taken.
    async fn begin_reservation(&self, id: Ulid) -> Result<(UnitOfWork, Reservation), EngineError> {
        loop {
            let scope = self.reservation_scope(&id)?;
            let uow = self.begin(scope.iter().copied()).await?;
            let reservation = self.get_reservation(&id).ok_or(EngineError::NotFound(id))?;
            if self.reservation_scope(&id)?.is_subset(&scope) {
                return Ok((uow, reservation));
            }
        }
    }

    /// Move a reservation to `[from, to]` on every resource it covers. Only
    /// days of other reservations block the move; the price is recomputed.
    pub async fn update_interval(
        &self,
        id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<ReservationView, EngineError> {
        let (mut uow, mut reservation) = self.begin_reservation(id).await?;
        let scope = self.reservation_scope(&id)?;

        let mut claims = Vec::with_capacity(scope.len());
        let mut price = 0i64;
        for &resource_id in &scope {
            let rows = self.hydrate_range(&mut uow, resource_id, from, to).await?;
            if let Some((date, other)) = rows
                .iter()
                .find_map(|r| r.reservation_id.filter(|o| *o != id).map(|o| (r.date, o)))
            {
                return Err(EngineError::AvailabilityConflict {
                    resource_id,
                    date,
                    reason: ConflictReason::Reserved {
                        reservation_id: other,
                    },
                });
            }
            price = price.saturating_add(self.price_of(&rows));
            claims.push(DateClaim {
                resource_id,
                dates: rows.iter().map(|r| r.date).collect(),
            });
        }

        let (first, last) = if from > to { (to, from) } else { (from, to) };
        let line = format!(
            "Interval changed: [from: {}, to: {}, current date: {}]",
            first.format("%d. %m. %Y"),
            last.format("%d. %m. %Y"),
            self.clock.now().format("%d. %m. %Y, %H:%M:%S"),
        );
        let note = normalize_text(Some(&format!(
            "{}\n{line}",
            reservation.note.as_deref().unwrap_or_default()
        )));

        let event = Event::ReservationRescheduled {
            id,
            claims,
            price,
            note: note.clone(),
        };
        self.persist_and_apply(&mut uow, &event).await?;
        info!("reservation {id} moved to {first} - {last}");

        reservation.price = price;
        reservation.note = note;
        Ok(self.build_view(reservation, uow.resources()))
    }

    /// Release every owned day and delete the reservation with its line items.
    pub async fn cancel_reservation(&self, id: Ulid) -> Result<(), EngineError> {
        let (mut uow, _) = self.begin_reservation(id).await?;
        self.persist_and_apply(&mut uow, &Event::ReservationCancelled { id })
            .await?;
        info!("reservation {id} cancelled");
        Ok(())
    }

    /// Delete one line item. Owned days stay claimed.
    pub async fn remove_line_item(&self, reservation_id: Ulid, item_id: Ulid) -> Result<Reservation, EngineError> {
        let (mut uow, mut reservation) = self.begin_reservation(reservation_id).await?;
        if reservation.remove_item(item_id).is_none() {
            return Err(EngineError::NotFound(item_id));
        }
        let event = Event::LineItemRemoved {
            reservation_id,
            item_id,
        };
        self.persist_and_apply(&mut uow, &event).await?;
        Ok(reservation)
    }

    pub async fn set_reservation_status(
        &self,
        id: Ulid,
        status: ReservationStatus,
    ) -> Result<Reservation, EngineError> {
        let (mut uow, mut reservation) = self.begin_reservation(id).await?;
        if reservation.status != status {
            self.persist_and_apply(&mut uow, &Event::ReservationStatusSet { id, status })
                .await?;
            reservation.status = status;
        }
        Ok(reservation)
    }

    /// Assign the human-facing number. Blank clears it.
    pub async fn set_reservation_number(
        &self,
        id: Ulid,
        number: Option<String>,
    ) -> Result<Reservation, EngineError> {
        let number = normalize_text(number.as_deref());
        if number.as_ref().is_some_and(|n| n.len() > MAX_NUMBER_LEN) {
            return Err(EngineError::LimitExceeded("reservation number too long"));
        }
        let (mut uow, mut reservation) = self.begin_reservation(id).await?;
        if reservation.number != number {
            let event = Event::ReservationNumberSet {
                id,
                number: number.clone(),
            };
            self.persist_and_apply(&mut uow, &event).await?;
            reservation.number = number;
        }
        Ok(reservation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(flags: &[bool]) -> (Vec<CalendarDate>, impl Fn(&CalendarDate) -> bool) {
        let rid = Ulid::new();
        let start = NaiveDate::from_ymd_opt(2030, 1, 1).unwrap();
        let rows: Vec<CalendarDate> = start
            .iter_days()
            .zip(flags)
            .map(|(d, _)| CalendarDate::new(Ulid::new(), rid, d))
            .collect();
        let free: Vec<NaiveDate> = rows
            .iter()
            .zip(flags)
            .filter(|(_, f)| **f)
            .map(|(r, _)| r.date)
            .collect();
        (rows, move |r: &CalendarDate| free.contains(&r.date))
    }

    #[test]
    fn run_resets_on_unavailable_day() {
        let (days, free) = rows(&[true, true, false, true, true, true, false, true]);
        assert_eq!(longest_available_run(&days, free), 3);
    }

    #[test]
    fn run_of_nothing() {
        let (days, free) = rows(&[false, false]);
        assert_eq!(longest_available_run(&days, free), 0);
        assert_eq!(longest_available_run(&Vec::<CalendarDate>::new(), |_| true), 0);
    }

    #[test]
    fn run_resets_on_date_gap() {
        let rid = Ulid::new();
        let d = |n| NaiveDate::from_ymd_opt(2030, 1, n).unwrap();
        let days = [
            CalendarDate::new(Ulid::new(), rid, d(1)),
            CalendarDate::new(Ulid::new(), rid, d(2)),
            CalendarDate::new(Ulid::new(), rid, d(5)),
        ];
        assert_eq!(longest_available_run(&days, |_| true), 2);
    }

    #[test]
    fn empty_request_is_rejected() {
        let request = BookingRequest {
            items: vec![],
            from: NaiveDate::from_ymd_opt(2030, 1, 1).unwrap(),
            to: NaiveDate::from_ymd_opt(2030, 1, 2).unwrap(),
            customer: Customer::default(),
            note: None,
        };
        assert!(matches!(
            request.validate(),
            Err(EngineError::InvalidValue { field: "resources", value: 0 })
        ));
    }
}
