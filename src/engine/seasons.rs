use chrono::NaiveDate;
use serde::Deserialize;
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

/// Attributes of a season as submitted by an administrator.
#[derive(Debug, Clone, Deserialize)]
pub struct SeasonInput {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub price: i64,
    pub minimal_days: i64,
}

impl SeasonInput {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.price < 1 {
            return Err(EngineError::InvalidValue {
                field: "price",
                value: self.price,
            });
        }
        if self.minimal_days < 1 || self.minimal_days as usize > MAX_INTERVAL_DAYS {
            return Err(EngineError::InvalidValue {
                field: "minimal_days",
                value: self.minimal_days,
            });
        }
        if self.name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("season name too long"));
        }
        if self.description.as_ref().is_some_and(|d| d.len() > MAX_NOTE_LEN) {
            return Err(EngineError::LimitExceeded("season description too long"));
        }
        Ok(())
    }

    fn into_season(self, id: Ulid, resource_id: Ulid, active: bool) -> Season {
        Season {
            id,
            resource_id,
            name: normalize_season_name(&self.name),
            description: normalize_text(self.description.as_deref()),
            price: self.price,
            minimal_days: self.minimal_days as u32,
            active,
        }
    }
}

impl Engine {
    fn season_taken(&self, row: &CalendarDate, season_id: Ulid) -> EngineError {
        let season_name = self
            .get_season(&season_id)
            .map(|s| s.name)
            .unwrap_or_else(|| DEFAULT_SEASON_NAME.to_string());
        EngineError::AvailabilityConflict {
            resource_id: row.resource_id,
            date: row.date,
            reason: ConflictReason::SeasonTaken {
                season_id,
                season_name,
            },
        }
    }

    /// Create an inactive season over `[from, to]`. Fails if any day already
    /// belongs to a season.
    pub async fn create_season(
        &self,
        resource_id: Ulid,
        input: SeasonInput,
    ) -> Result<Season, EngineError> {
        input.validate()?;
        self.require_resource(&resource_id)?;

        let mut uow = self.begin([resource_id]).await?;
        let rows = self
            .hydrate_range(&mut uow, resource_id, input.from, input.to)
            .await?;
        if rows.is_empty() {
            return Err(EngineError::EmptyInterval);
        }
        if let Some((row, sid)) = rows.iter().find_map(|r| r.season_id.map(|s| (r, s))) {
            return Err(self.season_taken(row, sid));
        }

        let season = input.into_season(Ulid::new(), resource_id, false);
        let event = Event::SeasonCreated {
            season: season.clone(),
            dates: rows.iter().map(|r| r.date).collect(),
        };
        self.persist_and_apply(&mut uow, &event).await?;
        info!(
            "season {} \"{}\" created on resource {resource_id} ({} days)",
            season.id,
            season.name,
            rows.len()
        );
        Ok(season)
    }

    /// Replace a season's attributes and re-resolve its interval. Without
    /// `overwrite` a day owned by another season is a conflict; with it the day
    /// is taken over.
    pub async fn save_season(
        &self,
        id: Ulid,
        input: SeasonInput,
        active: bool,
        overwrite: bool,
    ) -> Result<Season, EngineError> {
        input.validate()?;
        let resource_id = self.get_season(&id).ok_or(EngineError::NotFound(id))?.resource_id;

        let mut uow = self.begin([resource_id]).await?;
        if self.get_season(&id).is_none() {
            return Err(EngineError::NotFound(id));
        }
        let rows = self
            .hydrate_range(&mut uow, resource_id, input.from, input.to)
            .await?;
        if rows.is_empty() {
            return Err(EngineError::EmptyInterval);
        }
        if !overwrite
            && let Some((row, sid)) = rows
                .iter()
                .find_map(|r| r.season_id.filter(|s| *s != id).map(|s| (r, s)))
        {
            return Err(self.season_taken(row, sid));
        }

        let season = input.into_season(id, resource_id, active);
        let event = Event::SeasonSaved {
            season: season.clone(),
            dates: rows.iter().map(|r| r.date).collect(),
        };
        self.persist_and_apply(&mut uow, &event).await?;
        info!("season {id} saved (overwrite={overwrite})");
        Ok(season)
    }

    pub async fn set_season_active(&self, id: Ulid, active: bool) -> Result<Season, EngineError> {
        let resource_id = self.get_season(&id).ok_or(EngineError::NotFound(id))?.resource_id;
        let mut uow = self.begin([resource_id]).await?;
        let mut season = self.get_season(&id).ok_or(EngineError::NotFound(id))?;
        if season.active == active {
            return Ok(season);
        }
        let event = Event::SeasonActivated {
            id,
            resource_id,
            active,
        };
        self.persist_and_apply(&mut uow, &event).await?;
        season.active = active;
        Ok(season)
    }

    /// Flip the active flag. Returns the new value.
    pub async fn toggle_season_active(&self, id: Ulid) -> Result<bool, EngineError> {
        let active = self.get_season(&id).ok_or(EngineError::NotFound(id))?.active;
        Ok(self.set_season_active(id, !active).await?.active)
    }

    /// Detach a season from its days and delete it. Blocked while any of its
    /// days is reserved.
    pub async fn remove_season(&self, id: Ulid) -> Result<(), EngineError> {
        let resource_id = self.get_season(&id).ok_or(EngineError::NotFound(id))?.resource_id;
        let mut uow = self.begin([resource_id]).await?;
        if self.get_season(&id).is_none() {
            return Err(EngineError::NotFound(id));
        }

        let rs = uow.resource(&resource_id)?;
        if let Some(reservation_id) = rs
            .season_dates(&id)
            .iter()
            .find_map(|d| rs.get(d).and_then(|r| r.reservation_id))
        {
            return Err(EngineError::SeasonHasReservations {
                season_id: id,
                reservation_id,
            });
        }

        self.persist_and_apply(&mut uow, &Event::SeasonRemoved { id, resource_id })
            .await?;
        info!("season {id} removed from resource {resource_id}");
        Ok(())
    }

    /// Season with its range derived from the days it owns.
    pub async fn season_detail(&self, id: Ulid) -> Result<SeasonInfo, EngineError> {
        let season = self.get_season(&id).ok_or(EngineError::NotFound(id))?;
        let rs = self
            .read_resource(&season.resource_id)
            .await
            .ok_or(EngineError::EmptyInterval)?;
        let (from, to) = rs.season_range(&id).ok_or(EngineError::EmptyInterval)?;
        let days = rs.season_dates(&id).len();
        Ok(SeasonInfo {
            season,
            from,
            to,
            days,
        })
    }

    /// Seasons of a resource ordered by start. Seasons owning no days are skipped.
    pub async fn list_seasons(&self, resource_id: Ulid) -> Result<Vec<SeasonInfo>, EngineError> {
        self.require_resource(&resource_id)?;
        let Some(rs) = self.read_resource(&resource_id).await else {
            return Ok(Vec::new());
        };
        let mut seasons: Vec<SeasonInfo> = self
            .seasons
            .iter()
            .filter(|e| e.value().resource_id == resource_id)
            .filter_map(|e| {
                let (from, to) = rs.season_range(e.key())?;
                Some(SeasonInfo {
                    season: e.value().clone(),
                    from,
                    to,
                    days: rs.season_dates(e.key()).len(),
                })
            })
            .collect();
        seasons.sort_by_key(|s| (s.from, s.season.id));
        Ok(seasons)
    }
}
