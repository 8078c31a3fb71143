use std::net::SocketAddr;

use crate::command::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total commands executed. Labels: command, status.
pub const COMMANDS_TOTAL: &str = "daybook_commands_total";

/// Histogram: command latency in seconds. Labels: command.
pub const COMMAND_DURATION_SECONDS: &str = "daybook_command_duration_seconds";

/// Counter: reservations committed.
pub const BOOKINGS_CREATED_TOTAL: &str = "daybook_bookings_created_total";

/// Counter: booking attempts rejected. Labels: reason.
pub const BOOKINGS_REJECTED_TOTAL: &str = "daybook_bookings_rejected_total";

/// Counter: confirmations that failed to dispatch.
pub const NOTIFICATIONS_FAILED_TOTAL: &str = "daybook_notifications_failed_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Counter: calendar days materialized by lookups.
pub const DATES_CREATED_TOTAL: &str = "daybook_dates_created_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "daybook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "daybook_wal_flush_batch_size";

/// Counter: WAL compactions completed.
pub const WAL_COMPACTIONS_TOTAL: &str = "daybook_wal_compactions_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::RegisterResource { .. } => "register_resource",
        Command::ListResources => "list_resources",
        Command::FetchRange { .. } => "fetch_range",
        Command::MonthGrid { .. } => "month_grid",
        Command::GroupByMonth { .. } => "group_by_month",
        Command::CountDays { .. } => "count_days",
        Command::DateDetail { .. } => "date_detail",
        Command::YearOverview { .. } => "year_overview",
        Command::CreateSeason { .. } => "create_season",
        Command::SaveSeason { .. } => "save_season",
        Command::SetSeasonActive { .. } => "set_season_active",
        Command::ToggleSeasonActive { .. } => "toggle_season_active",
        Command::RemoveSeason { .. } => "remove_season",
        Command::SeasonDetail { .. } => "season_detail",
        Command::ListSeasons { .. } => "list_seasons",
        Command::CreateReservation(_) => "create_reservation",
        Command::MinimumStay { .. } => "minimum_stay",
        Command::PriceFor { .. } => "price_for",
        Command::UpdateInterval { .. } => "update_interval",
        Command::CancelReservation { .. } => "cancel_reservation",
        Command::RemoveLineItem { .. } => "remove_line_item",
        Command::SetStatus { .. } => "set_status",
        Command::SetNumber { .. } => "set_number",
        Command::ReservationDetail { .. } => "reservation_detail",
        Command::ListReservations { .. } => "list_reservations",
        Command::GetNotificationConfig => "get_notification_config",
        Command::SetNotificationConfig(_) => "set_notification_config",
        Command::Compact => "compact",
    }
}
