use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;

use daybook::catalog::{InMemoryCatalog, ResourceCatalog};
use daybook::command::Session;
use daybook::config::Config;
use daybook::dispatcher::{NotificationSettings, OutboxDispatcher};
use daybook::engine::Engine;
use daybook::notify::NotifyHub;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let config = Config::from_env();
    daybook::observability::init(config.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let catalog = Arc::new(InMemoryCatalog::load(&config.catalog_path())?);

    let notification = Arc::new(NotificationSettings::load(
        &config.notification_path(),
        config.notification.clone(),
    )?);
    let (dispatcher, mut outbox) = OutboxDispatcher::new(notification.clone());
    tokio::spawn(async move {
        // No mail transport is wired in; confirmations end up in the log.
        while let Some(message) = outbox.recv().await {
            info!(
                to = %message.to,
                cc = ?message.cc,
                subject = %message.subject,
                "confirmation ready:\n{}",
                message.body
            );
        }
    });

    let engine = Arc::new(
        Engine::new(
            config.wal_path(),
            Arc::new(NotifyHub::new()),
            catalog.clone(),
            Arc::new(dispatcher),
        )?
        .with_clock(config.clock),
    );

    let compactor_engine = engine.clone();
    let threshold = config.compact_threshold;
    tokio::spawn(async move {
        daybook::compactor::run_compactor(compactor_engine, threshold).await;
    });

    info!("daybook ready");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  resources: {}", catalog.list().len());
    info!("  today: {}", engine.today());
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let session = Session {
        engine,
        catalog,
        catalog_path: Some(config.catalog_path()),
        notification,
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                let response = session.handle_line(&line).await;
                let mut out = serde_json::to_vec(&response)?;
                out.push(b'\n');
                stdout.write_all(&out).await?;
                stdout.flush().await?;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }
    }

    info!("daybook stopped");
    Ok(())
}
