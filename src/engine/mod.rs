mod booking;
mod cache;
mod error;
mod ledger;
mod queries;
mod seasons;

pub use booking::{longest_available_run, BookingItem, BookingRequest};
pub use cache::DateCache;
pub use error::EngineError;
pub use ledger::{bucket_by_month, count_days, date_range, month_days, shift_days};
pub use seasons::SeasonInput;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::catalog::ResourceCatalog;
use crate::clock::Clock;
use crate::dispatcher::NotificationDispatcher;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedResourceState = Arc<RwLock<ResourceState>>;

type Locks = BTreeMap<Ulid, OwnedRwLockWriteGuard<ResourceState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task owning the WAL. Appends that queue up while one flush is in
/// progress are written together and share a single fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_non_append(&mut wal, cmd);
            continue;
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }
        flush_and_respond(&mut wal, &mut batch);
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let mut result = Ok(());
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            result = Err(e);
            break;
        }
    }
    // Flush even after a failed append so the half-written batch does not leak
    // into the next one.
    let flushed = wal.flush_sync();
    if result.is_ok() {
        result = flushed;
    }

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    for (_, tx) in batch.drain(..) {
        let _ = tx.send(match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        });
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            flush_and_respond(wal, &mut vec![(event, response)]);
        }
    }
}

/// Write locks on every resource an operation touches, plus the operation-local
/// lookup cache. Dropping it ends the unit of work.
pub(super) struct UnitOfWork {
    _gate: OwnedRwLockReadGuard<()>,
    locks: Locks,
    pub(super) cache: DateCache,
}

impl UnitOfWork {
    pub(super) fn resource(&self, id: &Ulid) -> Result<&ResourceState, EngineError> {
        self.locks.get(id).map(|g| &**g).ok_or(EngineError::NotFound(*id))
    }

    pub(super) fn resources(&self) -> impl Iterator<Item = &ResourceState> {
        self.locks.values().map(|g| &**g)
    }
}

pub struct Engine {
    pub state: DashMap<Ulid, SharedResourceState>,
    pub(super) seasons: DashMap<Ulid, Season>,
    pub(super) reservations: DashMap<Ulid, Reservation>,
    /// Reverse lookup: reservation id → resources holding its days or line items.
    pub(super) reservation_resources: DashMap<Ulid, BTreeSet<Ulid>>,
    /// Shared by every unit of work, taken exclusively by compaction.
    pub(super) gate: Arc<RwLock<()>>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) catalog: Arc<dyn ResourceCatalog>,
    pub(super) dispatcher: Arc<dyn NotificationDispatcher>,
    pub(super) clock: Clock,
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        catalog: Arc<dyn ResourceCatalog>,
        dispatcher: Arc<dyn NotificationDispatcher>,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            seasons: DashMap::new(),
            reservations: DashMap::new(),
            reservation_resources: DashMap::new(),
            gate: Arc::new(RwLock::new(())),
            wal_tx,
            notify,
            catalog,
            dispatcher,
            clock: Clock::System,
        };

        // We are the sole owner of every lock here, so try_write never contends.
        // Never block: this may run inside an async context.
        for event in &events {
            let mut locks = Locks::new();
            for resource_id in engine.event_resources(event) {
                let guard = engine
                    .resource_state(resource_id)
                    .try_write_owned()
                    .map_err(|_| io::Error::other("replay: resource lock contended"))?;
                locks.insert(resource_id, guard);
            }
            engine.apply(&mut locks, event);
        }
        tracing::info!("replayed {} events", events.len());

        Ok(engine)
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_resource(&self, id: &Ulid) -> Option<SharedResourceState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn get_season(&self, id: &Ulid) -> Option<Season> {
        self.seasons.get(id).map(|e| e.value().clone())
    }

    pub fn get_reservation(&self, id: &Ulid) -> Option<Reservation> {
        self.reservations.get(id).map(|e| e.value().clone())
    }

    /// Bookability of a day as of today.
    pub fn is_available(&self, day: &CalendarDate) -> bool {
        self.availability(day, self.today()).is_ok()
    }

    pub(super) fn availability(&self, day: &CalendarDate, today: NaiveDate) -> Result<(), ConflictReason> {
        let season = day.season_id.and_then(|sid| self.get_season(&sid));
        day.availability(season.as_ref(), today)
    }

    pub(super) fn require_resource(&self, id: &Ulid) -> Result<(), EngineError> {
        match self.catalog.get_by_id(id) {
            Some(_) => Ok(()),
            None => Err(EngineError::NotFound(*id)),
        }
    }

    fn resource_state(&self, id: Ulid) -> SharedResourceState {
        self.state
            .entry(id)
            .or_insert_with(|| Arc::new(RwLock::new(ResourceState::new(id))))
            .clone()
    }

    pub(super) async fn read_resource(&self, id: &Ulid) -> Option<OwnedRwLockReadGuard<ResourceState>> {
        let rs = self.get_resource(id)?;
        Some(rs.read_owned().await)
    }

    /// Start a unit of work holding write locks on `resource_ids`.
    /// Locks are taken in sorted order so overlapping operations cannot deadlock.
    pub(super) async fn begin(
        &self,
        resource_ids: impl IntoIterator<Item = Ulid>,
    ) -> Result<UnitOfWork, EngineError> {
        let ids: BTreeSet<Ulid> = resource_ids.into_iter().collect();
        let gate = self.gate.clone().read_owned().await;
        let mut locks = Locks::new();
        for id in ids {
            let guard = self.resource_state(id).write_owned().await;
            locks.insert(id, guard);
        }
        Ok(UnitOfWork {
            _gate: gate,
            locks,
            cache: DateCache::default(),
        })
    }

    /// Resources a reservation currently spans.
    pub(super) fn reservation_scope(&self, id: &Ulid) -> Result<BTreeSet<Ulid>, EngineError> {
        if !self.reservations.contains_key(id) {
            return Err(EngineError::NotFound(*id));
        }
        Ok(self
            .reservation_resources
            .get(id)
            .map(|e| e.value().clone())
            .unwrap_or_default())
    }

    /// WAL-append, apply, invalidate cached lookups, notify subscribers.
    pub(super) async fn persist_and_apply(
        &self,
        uow: &mut UnitOfWork,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        let resources = self.event_resources(event);
        let touched = self.apply(&mut uow.locks, event);
        uow.cache.invalidate(&touched);
        for resource_id in resources {
            self.notify.send(resource_id, event);
        }
        Ok(())
    }

    /// Resources whose state an event changes.
    fn event_resources(&self, event: &Event) -> BTreeSet<Ulid> {
        let scope = |id: &Ulid| {
            self.reservation_resources
                .get(id)
                .map(|e| e.value().clone())
                .unwrap_or_default()
        };
        match event {
            Event::DatesCreated { resource_id, .. }
            | Event::SeasonActivated { resource_id, .. }
            | Event::SeasonRemoved { resource_id, .. } => BTreeSet::from([*resource_id]),
            Event::SeasonCreated { season, .. } | Event::SeasonSaved { season, .. } => {
                BTreeSet::from([season.resource_id])
            }
            Event::ReservationCreated { reservation, claims } => claims
                .iter()
                .map(|c| c.resource_id)
                .chain(reservation.item_resources())
                .collect(),
            Event::ReservationRescheduled { id, claims, .. } => {
                let mut all = scope(id);
                all.extend(claims.iter().map(|c| c.resource_id));
                all
            }
            Event::ReservationCancelled { id }
            | Event::ReservationStatusSet { id, .. }
            | Event::ReservationNumberSet { id, .. }
            | Event::LineItemRemoved { reservation_id: id, .. } => scope(id),
        }
    }

    /// Apply an event to locked resources and the season/reservation tables.
    /// Returns the `(resource, day)` rows whose season or reservation changed.
    fn apply(&self, locks: &mut Locks, event: &Event) -> Vec<(Ulid, NaiveDate)> {
        let mut touched = Vec::new();
        match event {
            Event::DatesCreated { resource_id, dates } => {
                if let Some(rs) = locks.get_mut(resource_id) {
                    for (id, date) in dates {
                        rs.insert_date(*id, *date);
                    }
                }
            }
            Event::SeasonCreated { season, dates } | Event::SeasonSaved { season, dates } => {
                if let Some(rs) = locks.get_mut(&season.resource_id) {
                    for date in rs.season_dates(&season.id) {
                        rs.set_season(date, None);
                        touched.push((season.resource_id, date));
                    }
                    for date in dates {
                        rs.set_season(*date, Some(season.id));
                        touched.push((season.resource_id, *date));
                    }
                }
                self.seasons.insert(season.id, season.clone());
            }
            Event::SeasonActivated { id, active, .. } => {
                if let Some(mut season) = self.seasons.get_mut(id) {
                    season.active = *active;
                }
            }
            Event::SeasonRemoved { id, resource_id } => {
                if let Some(rs) = locks.get_mut(resource_id) {
                    for date in rs.season_dates(id) {
                        rs.set_season(date, None);
                        touched.push((*resource_id, date));
                    }
                }
                self.seasons.remove(id);
            }
            Event::ReservationCreated { reservation, claims } => {
                claim_days(locks, reservation.id, claims, &mut touched);
                let scope = claims
                    .iter()
                    .map(|c| c.resource_id)
                    .chain(reservation.item_resources())
                    .collect();
                self.reservation_resources.insert(reservation.id, scope);
                self.reservations.insert(reservation.id, reservation.clone());
            }
            Event::ReservationRescheduled {
                id,
                claims,
                price,
                note,
            } => {
                release_days(locks, id, &mut touched);
                claim_days(locks, *id, claims, &mut touched);
                let mut scope: BTreeSet<Ulid> = claims.iter().map(|c| c.resource_id).collect();
                if let Some(mut reservation) = self.reservations.get_mut(id) {
                    reservation.price = *price;
                    reservation.note = note.clone();
                    scope.extend(reservation.item_resources());
                }
                self.reservation_resources.insert(*id, scope);
            }
            Event::ReservationCancelled { id } => {
                release_days(locks, id, &mut touched);
                self.reservation_resources.remove(id);
                self.reservations.remove(id);
            }
            Event::LineItemRemoved {
                reservation_id,
                item_id,
            } => {
                if let Some(mut reservation) = self.reservations.get_mut(reservation_id) {
                    reservation.remove_item(*item_id);
                }
            }
            Event::ReservationStatusSet { id, status } => {
                if let Some(mut reservation) = self.reservations.get_mut(id) {
                    reservation.status = *status;
                }
            }
            Event::ReservationNumberSet { id, number } => {
                if let Some(mut reservation) = self.reservations.get_mut(id) {
                    reservation.number = number.clone();
                }
            }
        }
        touched
    }

    /// Rewrite the WAL with the minimal set of events that recreates the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _exclusive = self.gate.write().await;
        let events = self.snapshot_events().await;
        tracing::info!("compacting WAL to {} events", events.len());

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL).increment(1);
        Ok(())
    }

    async fn snapshot_events(&self) -> Vec<Event> {
        let mut resource_ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        resource_ids.sort();

        let mut events = Vec::new();
        let mut season_days: HashMap<Ulid, Vec<NaiveDate>> = HashMap::new();
        let mut claims: HashMap<Ulid, BTreeMap<Ulid, Vec<NaiveDate>>> = HashMap::new();

        for resource_id in resource_ids {
            let Some(rs) = self.read_resource(&resource_id).await else {
                continue;
            };
            if rs.dates.is_empty() {
                continue;
            }
            events.push(Event::DatesCreated {
                resource_id,
                dates: rs.dates.values().map(|r| (r.id, r.date)).collect(),
            });
            for row in rs.dates.values() {
                if let Some(sid) = row.season_id {
                    season_days.entry(sid).or_default().push(row.date);
                }
                if let Some(rid) = row.reservation_id {
                    claims
                        .entry(rid)
                        .or_default()
                        .entry(resource_id)
                        .or_default()
                        .push(row.date);
                }
            }
        }

        let mut seasons: Vec<Season> = self.seasons.iter().map(|e| e.value().clone()).collect();
        seasons.sort_by_key(|s| s.id);
        for season in seasons {
            let dates = season_days.remove(&season.id).unwrap_or_default();
            events.push(Event::SeasonCreated { season, dates });
        }

        let mut reservations: Vec<Reservation> =
            self.reservations.iter().map(|e| e.value().clone()).collect();
        reservations.sort_by_key(|r| (r.created_at, r.id));
        for reservation in reservations {
            let claims = claims
                .remove(&reservation.id)
                .unwrap_or_default()
                .into_iter()
                .map(|(resource_id, dates)| DateClaim { resource_id, dates })
                .collect();
            events.push(Event::ReservationCreated { reservation, claims });
        }

        events
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

fn claim_days(locks: &mut Locks, reservation_id: Ulid, claims: &[DateClaim], touched: &mut Vec<(Ulid, NaiveDate)>) {
    for claim in claims {
        if let Some(rs) = locks.get_mut(&claim.resource_id) {
            for date in &claim.dates {
                rs.set_reservation(*date, Some(reservation_id));
                touched.push((claim.resource_id, *date));
            }
        }
    }
}

fn release_days(locks: &mut Locks, reservation_id: &Ulid, touched: &mut Vec<(Ulid, NaiveDate)>) {
    for (resource_id, rs) in locks.iter_mut() {
        for date in rs.reservation_dates(reservation_id) {
            rs.set_reservation(date, None);
            touched.push((*resource_id, date));
        }
    }
}
