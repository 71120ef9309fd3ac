use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use black_swan_detector::BlackSwanDetector;
use market_data_client::MarketDataClient;
use notification_service::{Notification, NotificationService};
use tokio::signal::unix::SignalKind;
use tokio::time;

mod config;

use config::AgentConfig;

/// How often the agent logs a detector status line
const STATUS_LOG_INTERVAL: Duration = Duration::from_secs(3600);

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load .env, init tracing
    dotenvy::dotenv().ok();

    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    }

    // Panic hook: log panic info before crashing
    std::panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
        tracing::error!("PANIC: {info}");
    }));

    tracing::info!("Starting Black Swan Agent");

    // 2. Load configuration
    let config = AgentConfig::from_env()?;
    let detector_config = &config.detector;
    tracing::info!("Configuration loaded and validated");
    tracing::info!(
        "  Watch list: {}",
        detector_config
            .watch_list
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );
    tracing::info!(
        "  Thresholds: volatility {}x, volume {}x, correlation {}",
        detector_config.volatility_threshold,
        detector_config.volume_threshold,
        detector_config.correlation_threshold
    );
    tracing::info!("  Check interval: {} seconds", detector_config.check_interval_seconds);
    tracing::info!(
        "  Alert gate: max {} per day, {} min cooldown",
        detector_config.max_alerts_per_day,
        detector_config.alert_cooldown_minutes
    );
    tracing::info!(
        "  Market data: {} ({} req/min)",
        config.market_data_base_url,
        config.market_data_rate_limit
    );
    if let Ok(json) = serde_json::to_string(&config) {
        tracing::debug!("Effective configuration: {}", json);
    }

    // 3. Data source and notification channels
    let client = Arc::new(MarketDataClient::new(
        config.market_data_api_key.clone(),
        config.market_data_base_url.clone(),
        config.market_data_rate_limit,
    ));
    let notifier = NotificationService::new(&config.notifications)?;

    // 4. Detector
    let detector = BlackSwanDetector::new(config.detector.clone());
    detector.set_data_source(client).await;
    for sink in notifier.sinks() {
        detector.register_sink(sink).await;
    }

    if !detector.start_monitoring().await {
        anyhow::bail!("Black swan monitoring failed to start");
    }

    let status = detector.status().await;
    notifier
        .send(&Notification::lifecycle(
            "Black Swan Agent Started",
            format!(
                "Watching {} symbols every {}s | baseline: {} symbols | max {} alerts/day",
                status.watch_list.len(),
                detector_config.check_interval_seconds,
                status.baseline_symbols,
                status.max_alerts_per_day
            ),
        ))
        .await;

    tracing::info!("Agent is now running. Press Ctrl+C to stop.");

    // 5. Wait for shutdown (SIGINT + SIGTERM), logging status periodically
    let mut status_interval = time::interval(STATUS_LOG_INTERVAL);
    status_interval.tick().await;
    let mut sigterm = tokio::signal::unix::signal(SignalKind::terminate())?;
    let shutdown = async {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received SIGINT");
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM");
            }
        }
    };
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = status_interval.tick() => {
                let status = detector.status().await;
                tracing::info!(
                    "Status | monitoring: {} | last check: {} | alerts today: {}/{} | events: {} ({} high severity)",
                    status.is_monitoring,
                    status
                        .last_check_time
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "never".to_string()),
                    status.alert_count_today,
                    status.max_alerts_per_day,
                    status.event_count,
                    status.high_severity_count
                );
            }
            _ = &mut shutdown => {
                tracing::info!("Shutdown signal received, exiting gracefully...");
                break;
            }
        }
    }

    detector.stop_monitoring().await;

    let status = detector.status().await;
    notifier
        .send(&Notification::lifecycle(
            "Black Swan Agent Stopped",
            format!(
                "Graceful shutdown | {} events recorded, {} high severity",
                status.event_count, status.high_severity_count
            ),
        ))
        .await;

    tracing::info!("Black swan agent shut down.");
    Ok(())
}
