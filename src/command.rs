//! JSON-lines command surface of the `daybook` binary.
//!
//! One command per line, tagged by `"command"`:
//!
//! ```text
//! {"command":"create_season","resource_id":"01H...","name":"summer","from":"2030-06-01","to":"2030-08-31","price":1200,"minimal_days":3}
//! {"command":"create_reservation","items":[{"resource_id":"01H..."}],"from":"2030-07-01","to":"2030-07-05","customer":{"email":"jana@example.com"}}
//! ```
//!
//! Every line gets one response: `{"ok":true,"result":...}` or
//! `{"ok":false,"error":{"kind":...,"message":...}}`.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, warn};
use ulid::Ulid;

use crate::catalog::{InMemoryCatalog, ResourceCatalog};
use crate::dispatcher::{NotificationConfig, NotificationSettings};
use crate::engine::{count_days, BookingRequest, Engine, EngineError, SeasonInput};
use crate::model::ReservationStatus;

fn default_page() -> usize {
    1
}

fn default_limit() -> usize {
    50
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    RegisterResource {
        #[serde(default)]
        id: Option<Ulid>,
        label: String,
    },
    ListResources,
    FetchRange {
        resource_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    },
    MonthGrid {
        resource_id: Ulid,
        year: i32,
        month: u32,
    },
    GroupByMonth {
        resource_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    },
    CountDays {
        from: NaiveDate,
        to: NaiveDate,
    },
    DateDetail {
        resource_id: Ulid,
        date: NaiveDate,
    },
    /// Defaults to the current year.
    YearOverview {
        resource_id: Ulid,
        #[serde(default)]
        year: Option<i32>,
    },
    CreateSeason {
        resource_id: Ulid,
        #[serde(flatten)]
        input: SeasonInput,
    },
    SaveSeason {
        id: Ulid,
        #[serde(flatten)]
        input: SeasonInput,
        #[serde(default)]
        active: bool,
        #[serde(default)]
        overwrite: bool,
    },
    SetSeasonActive {
        id: Ulid,
        active: bool,
    },
    ToggleSeasonActive {
        id: Ulid,
    },
    RemoveSeason {
        id: Ulid,
    },
    SeasonDetail {
        id: Ulid,
    },
    ListSeasons {
        resource_id: Ulid,
    },
    CreateReservation(BookingRequest),
    MinimumStay {
        resource_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    },
    PriceFor {
        resource_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    },
    UpdateInterval {
        id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    },
    CancelReservation {
        id: Ulid,
    },
    RemoveLineItem {
        reservation_id: Ulid,
        item_id: Ulid,
    },
    SetStatus {
        id: Ulid,
        status: ReservationStatus,
    },
    SetNumber {
        id: Ulid,
        #[serde(default)]
        number: Option<String>,
    },
    ReservationDetail {
        id: Ulid,
    },
    ListReservations {
        #[serde(default = "default_page")]
        page: usize,
        #[serde(default = "default_limit")]
        limit: usize,
    },
    GetNotificationConfig,
    SetNotificationConfig(NotificationConfig),
    Compact,
}

/// Serialize a result value. The query types always encode; a failure here is
/// logged and answered with `null`.
fn encode(value: impl Serialize) -> Value {
    serde_json::to_value(value).unwrap_or_else(|e| {
        error!("response encoding failed: {e}");
        Value::Null
    })
}

/// The engine plus the catalog it resolves resources against.
pub struct Session {
    pub engine: Arc<Engine>,
    pub catalog: Arc<InMemoryCatalog>,
    /// Where registered resources are saved. `None` keeps them in memory.
    pub catalog_path: Option<PathBuf>,
    pub notification: Arc<NotificationSettings>,
}

impl Session {
    pub async fn execute(&self, cmd: Command) -> Result<Value, EngineError> {
        let engine = &self.engine;
        Ok(match cmd {
            Command::RegisterResource { id, label } => {
                let resource = self.catalog.register(id.unwrap_or_else(Ulid::new), label);
                if let Some(path) = &self.catalog_path
                    && let Err(e) = self.catalog.save(path)
                {
                    warn!("saving catalog to {} failed: {e}", path.display());
                }
                encode(resource)
            }
            Command::ListResources => encode(self.catalog.list()),
            Command::FetchRange {
                resource_id,
                from,
                to,
            } => encode(engine.fetch_range(resource_id, from, to).await?),
            Command::MonthGrid {
                resource_id,
                year,
                month,
            } => {
                let grid = engine.month_grid(resource_id, year, month).await?;
                encode(grid.into_values().collect::<Vec<_>>())
            }
            Command::GroupByMonth {
                resource_id,
                from,
                to,
            } => encode(engine.group_by_month(resource_id, from, to).await?),
            Command::CountDays { from, to } => json!(count_days(from, to)),
            Command::DateDetail { resource_id, date } => {
                encode(engine.date_detail(resource_id, date).await?)
            }
            Command::YearOverview { resource_id, year } => {
                let year = year.unwrap_or_else(|| engine.today().year());
                encode(engine.year_overview(resource_id, year).await?)
            }
            Command::CreateSeason { resource_id, input } => {
                encode(engine.create_season(resource_id, input).await?)
            }
            Command::SaveSeason {
                id,
                input,
                active,
                overwrite,
            } => encode(engine.save_season(id, input, active, overwrite).await?),
            Command::SetSeasonActive { id, active } => {
                encode(engine.set_season_active(id, active).await?)
            }
            Command::ToggleSeasonActive { id } => {
                json!({ "active": engine.toggle_season_active(id).await? })
            }
            Command::RemoveSeason { id } => {
                engine.remove_season(id).await?;
                Value::Null
            }
            Command::SeasonDetail { id } => encode(engine.season_detail(id).await?),
            Command::ListSeasons { resource_id } => encode(engine.list_seasons(resource_id).await?),
            Command::CreateReservation(request) => {
                encode(engine.create_reservation(request).await?)
            }
            Command::MinimumStay {
                resource_id,
                from,
                to,
            } => json!({
                "from": from,
                "to": to,
                "minimal_days": engine.minimum_stay(resource_id, from, to).await?,
            }),
            Command::PriceFor {
                resource_id,
                from,
                to,
            } => json!(engine.price_for(resource_id, from, to).await?),
            Command::UpdateInterval { id, from, to } => {
                encode(engine.update_interval(id, from, to).await?)
            }
            Command::CancelReservation { id } => {
                engine.cancel_reservation(id).await?;
                Value::Null
            }
            Command::RemoveLineItem {
                reservation_id,
                item_id,
            } => encode(engine.remove_line_item(reservation_id, item_id).await?),
            Command::SetStatus { id, status } => {
                encode(engine.set_reservation_status(id, status).await?)
            }
            Command::SetNumber { id, number } => {
                encode(engine.set_reservation_number(id, number).await?)
            }
            Command::ReservationDetail { id } => encode(engine.reservation_detail(id).await?),
            Command::ListReservations { page, limit } => {
                encode(engine.list_reservations(page, limit).await?)
            }
            Command::GetNotificationConfig => encode(self.notification.get().await),
            Command::SetNotificationConfig(config) => match self.notification.set(config).await {
                Ok(saved) => encode(saved),
                Err(e) => {
                    warn!("saving notification settings failed: {e}");
                    encode(self.notification.get().await)
                }
            },
            Command::Compact => {
                engine.compact_wal().await?;
                Value::Null
            }
        })
    }

    /// Parse, execute and answer one input line.
    pub async fn handle_line(&self, line: &str) -> Value {
        let cmd: Command = match serde_json::from_str(line) {
            Ok(cmd) => cmd,
            Err(e) => return error_response("parse_error", &e.to_string()),
        };

        let label = crate::observability::command_label(&cmd);
        let started = std::time::Instant::now();
        let result = self.execute(cmd).await;
        metrics::histogram!(crate::observability::COMMAND_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());

        match result {
            Ok(value) => {
                metrics::counter!(crate::observability::COMMANDS_TOTAL, "command" => label, "status" => "ok")
                    .increment(1);
                json!({ "ok": true, "result": value })
            }
            Err(e) => {
                metrics::counter!(crate::observability::COMMANDS_TOTAL, "command" => label, "status" => "error")
                    .increment(1);
                warn!("{label} failed: {e}");
                error_response(e.kind(), &e.to_string())
            }
        }
    }
}

fn error_response(kind: &str, message: &str) -> Value {
    json!({ "ok": false, "error": { "kind": kind, "message": message } })
}
