use std::path::PathBuf;

use chrono::NaiveDate;

use crate::clock::Clock;
use crate::dispatcher::NotificationConfig;

/// Process configuration, read from `DAYBOOK_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    pub compact_threshold: u64,
    pub notification: NotificationConfig,
    pub clock: Clock,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            compact_threshold: 1000,
            notification: NotificationConfig::default(),
            clock: Clock::System,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unparsable values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let text = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        Self {
            data_dir: text("DAYBOOK_DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            metrics_port: text("DAYBOOK_METRICS_PORT").and_then(|s| s.parse().ok()),
            compact_threshold: text("DAYBOOK_COMPACT_THRESHOLD")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.compact_threshold),
            notification: NotificationConfig {
                to: text("DAYBOOK_NOTIFY_TO"),
                copy: text("DAYBOOK_NOTIFY_COPY"),
                subject: text("DAYBOOK_NOTIFY_SUBJECT"),
            },
            clock: text("DAYBOOK_TODAY")
                .and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok())
                .map_or(Clock::System, Clock::Fixed),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("daybook.wal")
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.data_dir.join("resources.json")
    }

    /// Notification settings saved at runtime. They override the `DAYBOOK_NOTIFY_*` values.
    pub fn notification_path(&self) -> PathBuf {
        self.data_dir.join("notification.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        assert_eq!(Config::from_lookup(|_| None), Config::default());
    }

    #[test]
    fn reads_every_key() {
        let config = Config::from_lookup(lookup(&[
            ("DAYBOOK_DATA_DIR", "/var/lib/daybook"),
            ("DAYBOOK_METRICS_PORT", "9100"),
            ("DAYBOOK_COMPACT_THRESHOLD", "50"),
            ("DAYBOOK_NOTIFY_TO", "desk@example.com"),
            ("DAYBOOK_NOTIFY_SUBJECT", "Booking"),
            ("DAYBOOK_TODAY", "2030-01-15"),
        ]));
        assert_eq!(config.wal_path(), PathBuf::from("/var/lib/daybook/daybook.wal"));
        assert_eq!(
            config.notification_path(),
            PathBuf::from("/var/lib/daybook/notification.json")
        );
        assert_eq!(config.metrics_port, Some(9100));
        assert_eq!(config.compact_threshold, 50);
        assert_eq!(config.notification.to.as_deref(), Some("desk@example.com"));
        assert_eq!(config.notification.copy, None);
        assert_eq!(
            config.clock,
            Clock::Fixed(NaiveDate::from_ymd_opt(2030, 1, 15).unwrap())
        );
    }

    #[test]
    fn garbage_falls_back() {
        let config = Config::from_lookup(lookup(&[
            ("DAYBOOK_METRICS_PORT", "nope"),
            ("DAYBOOK_COMPACT_THRESHOLD", "-1"),
            ("DAYBOOK_TODAY", "15.1.2030"),
            ("DAYBOOK_NOTIFY_TO", "  "),
        ]));
        assert_eq!(config, Config::default());
    }
}
