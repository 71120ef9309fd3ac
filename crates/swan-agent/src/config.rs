use anyhow::{Context, Result};
use black_swan_detector::DetectorConfig;
use market_data_client::{DEFAULT_BASE_URL, DEFAULT_RATE_LIMIT};
use notification_service::NotificationConfig;
use serde::Serialize;
use std::env;

#[derive(Debug, Clone, Serialize)]
pub struct AgentConfig {
    pub detector: DetectorConfig,

    // Market data API
    #[serde(skip_serializing)]
    pub market_data_api_key: String,
    pub market_data_base_url: String,
    pub market_data_rate_limit: usize, // requests per minute

    // Notifications
    pub discord_webhook_configured: bool,
    #[serde(skip)]
    pub notifications: NotificationConfig,
}

impl AgentConfig {
    pub fn from_env() -> Result<Self> {
        let detector = DetectorConfig::from_env().context("Invalid black swan detector settings")?;
        let notifications = NotificationConfig::from_env();

        let config = Self {
            detector,

            market_data_api_key: env::var("MARKET_DATA_API_KEY")
                .context("MARKET_DATA_API_KEY not set")?,
            market_data_base_url: env::var("MARKET_DATA_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            market_data_rate_limit: match env::var("MARKET_DATA_RATE_LIMIT") {
                Ok(v) => v
                    .parse()
                    .with_context(|| format!("MARKET_DATA_RATE_LIMIT is not a number: {}", v))?,
                Err(_) => DEFAULT_RATE_LIMIT,
            },

            discord_webhook_configured: notifications.discord_webhook_url.is_some(),
            notifications,
        };

        if config.market_data_api_key.trim().is_empty() {
            anyhow::bail!("MARKET_DATA_API_KEY is empty");
        }
        if config.market_data_rate_limit == 0 {
            anyhow::bail!("MARKET_DATA_RATE_LIMIT must be at least 1");
        }

        Ok(config)
    }
}
