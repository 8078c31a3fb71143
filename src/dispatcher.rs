use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tracing::debug;
use validator::ValidateEmail;

use crate::model::{normalize_text, ReservationView};

#[derive(Debug)]
pub enum NotifyError {
    Closed,
    Rejected(String),
}

impl std::fmt::Display for NotifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotifyError::Closed => write!(f, "notification outbox closed"),
            NotifyError::Rejected(msg) => write!(f, "notification rejected: {msg}"),
        }
    }
}

impl std::error::Error for NotifyError {}

/// Best-effort delivery of booking confirmations. Failures never fail a booking.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn send(&self, reservation: &ReservationView) -> Result<(), NotifyError>;
}

/// Drops every confirmation.
pub struct NoopDispatcher;

#[async_trait]
impl NotificationDispatcher for NoopDispatcher {
    async fn send(&self, _reservation: &ReservationView) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// Recipients and subject line of confirmation messages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub copy: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
}

impl NotificationConfig {
    /// Trimmed fields; blanks become `None`.
    pub fn normalized(self) -> Self {
        Self {
            to: normalize_text(self.to.as_deref()),
            copy: normalize_text(self.copy.as_deref()),
            subject: normalize_text(self.subject.as_deref()),
        }
    }
}

/// Notification config that can be changed while running. With a path, every
/// change is saved there as JSON.
#[derive(Debug, Default)]
pub struct NotificationSettings {
    current: RwLock<NotificationConfig>,
    path: Option<PathBuf>,
}

impl NotificationSettings {
    pub fn new(config: NotificationConfig, path: Option<PathBuf>) -> Self {
        Self {
            current: RwLock::new(config.normalized()),
            path,
        }
    }

    /// Saved settings at `path` win over `fallback`. A missing file keeps `fallback`.
    pub fn load(path: &Path, fallback: NotificationConfig) -> io::Result<Self> {
        let config = match std::fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => fallback,
            Err(e) => return Err(e),
        };
        Ok(Self::new(config, Some(path.to_path_buf())))
    }

    pub async fn get(&self) -> NotificationConfig {
        self.current.read().await.clone()
    }

    /// Replace the config. It is applied even if saving fails.
    pub async fn set(&self, config: NotificationConfig) -> io::Result<NotificationConfig> {
        let config = config.normalized();
        *self.current.write().await = config.clone();
        if let Some(path) = &self.path {
            std::fs::write(path, serde_json::to_vec_pretty(&config)?)?;
        }
        Ok(config)
    }
}

pub const DEFAULT_SUBJECT: &str = "New reservation";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationMessage {
    pub to: String,
    pub cc: Option<String>,
    pub subject: String,
    pub body: String,
}

impl ConfirmationMessage {
    /// `None` when there is no valid recipient.
    pub fn compose(config: &NotificationConfig, view: &ReservationView) -> Option<Self> {
        let to = config.to.as_deref().filter(|a| is_email(a))?.to_string();
        let cc = config.copy.as_deref().filter(|a| is_email(a)).map(str::to_string);
        let subject = format!(
            "{} | {}",
            config.subject.as_deref().unwrap_or(DEFAULT_SUBJECT),
            view.identifier
        );
        Some(Self { to, cc, subject, body: render_body(view) })
    }
}

fn render_body(view: &ReservationView) -> String {
    let r = &view.reservation;
    let fmt_day = |d: Option<chrono::NaiveDate>| {
        d.map(|d| d.format("%d. %m. %Y").to_string()).unwrap_or_else(|| "-".into())
    };
    let dates = view
        .dates
        .iter()
        .map(|d| d.date.format("%d. %m. %Y").to_string())
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "New reservation {}\n\
         From: {}, To: {}\n\
         Price: {}\n\
         Name: {}\n\
         E-mail: {}\n\
         Phone: {}\n\
         Note: {}\n\
         Real reserved dates: {}\n\
         Created date: {}\n",
        view.identifier,
        fmt_day(view.from),
        fmt_day(view.to),
        r.price,
        r.customer.full_name().unwrap_or_else(|| "???".into()),
        r.customer.email,
        r.customer.phone.as_deref().unwrap_or("-"),
        r.note.as_deref().unwrap_or("-"),
        dates,
        r.created_at.format("%d. %m. %Y, %H:%M:%S"),
    )
}

/// `validator`'s email check, tightened to a dot-atom local part and a dotted domain.
pub fn is_email(address: &str) -> bool {
    let Some((local, domain)) = address.rsplit_once('@') else {
        return false;
    };
    address.validate_email()
        && !local.starts_with('.')
        && !local.ends_with('.')
        && !local.contains("..")
        && domain.contains('.')
}

/// Composes confirmation messages and hands them to a mail transport over a channel.
pub struct OutboxDispatcher {
    settings: Arc<NotificationSettings>,
    outbox: mpsc::UnboundedSender<ConfirmationMessage>,
}

impl OutboxDispatcher {
    pub fn new(
        settings: Arc<NotificationSettings>,
    ) -> (Self, mpsc::UnboundedReceiver<ConfirmationMessage>) {
        let (outbox, rx) = mpsc::unbounded_channel();
        (Self { settings, outbox }, rx)
    }
}

#[async_trait]
impl NotificationDispatcher for OutboxDispatcher {
    async fn send(&self, reservation: &ReservationView) -> Result<(), NotifyError> {
        let config = self.settings.get().await;
        let Some(message) = ConfirmationMessage::compose(&config, reservation) else {
            debug!("no valid recipient, confirmation for {} skipped", reservation.identifier);
            return Ok(());
        };
        self.outbox.send(message).map_err(|_| NotifyError::Closed)
    }
}
