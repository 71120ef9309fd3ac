mod discord;
mod logger;

pub use discord::DiscordWebhookNotifier;
pub use logger::LogNotifier;

use async_trait::async_trait;
use black_swan_detector::{CompositeEvent, EventPriority, NotificationSink};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Something worth telling the operator about.
#[derive(Debug, Clone)]
pub enum Notification {
    BlackSwan(CompositeEvent),
    /// Agent start/stop and other operational messages
    Lifecycle {
        title: String,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl Notification {
    pub fn lifecycle(title: impl Into<String>, message: impl Into<String>) -> Self {
        Notification::Lifecycle {
            title: title.into(),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn title(&self) -> String {
        match self {
            Notification::BlackSwan(event) => match event.priority() {
                EventPriority::Normal => event.title.clone(),
                p => format!("[{}] {}", p.label(), event.title),
            },
            Notification::Lifecycle { title, .. } => title.clone(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Notification::BlackSwan(event) => &event.message,
            Notification::Lifecycle { message, .. } => message,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Notification::BlackSwan(event) => event.timestamp,
            Notification::Lifecycle { timestamp, .. } => *timestamp,
        }
    }

    /// Lifecycle messages are always normal priority.
    pub fn priority(&self) -> EventPriority {
        match self {
            Notification::BlackSwan(event) => event.priority(),
            Notification::Lifecycle { .. } => EventPriority::Normal,
        }
    }
}

/// Trait for notification channels.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), NotificationError>;
    fn name(&self) -> &str;
}

/// Errors from the notification system.
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Configuration for the notification service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationConfig {
    pub discord_webhook_url: Option<String>,
    /// Also report events through the process log
    pub log_channel: bool,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            discord_webhook_url: None,
            log_channel: true,
        }
    }
}

impl NotificationConfig {
    /// Load from environment variables.
    pub fn from_env() -> Self {
        Self {
            discord_webhook_url: std::env::var("DISCORD_WEBHOOK_URL")
                .ok()
                .filter(|s| !s.is_empty()),
            log_channel: std::env::var("NOTIFY_LOG_CHANNEL")
                .map(|v| parse_flag(&v))
                .unwrap_or(true),
        }
    }
}

fn parse_flag(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "0" | "false" | "no" | "off"
    )
}

/// Dispatches notifications to all configured channels.
pub struct NotificationService {
    channels: Vec<Arc<dyn NotificationChannel>>,
}

impl NotificationService {
    pub fn new(config: &NotificationConfig) -> Result<Self, NotificationError> {
        let mut channels: Vec<Arc<dyn NotificationChannel>> = Vec::new();

        if let Some(ref webhook_url) = config.discord_webhook_url {
            channels.push(Arc::new(DiscordWebhookNotifier::new(webhook_url.clone())?));
            tracing::info!("Discord webhook notifications enabled");
        }

        if config.log_channel {
            channels.push(Arc::new(LogNotifier));
            tracing::info!("Log channel notifications enabled");
        }

        if channels.is_empty() {
            tracing::info!(
                "No notification channels configured (set DISCORD_WEBHOOK_URL or NOTIFY_LOG_CHANNEL)"
            );
        }

        Ok(Self { channels })
    }

    pub fn with_channels(channels: Vec<Arc<dyn NotificationChannel>>) -> Self {
        Self { channels }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Send to all channels in order, awaiting completion. Failures are logged
    /// and do not stop the remaining channels. Returns the number delivered.
    pub async fn send(&self, notification: &Notification) -> usize {
        let mut delivered = 0;
        for channel in &self.channels {
            match channel.send(notification).await {
                Ok(()) => {
                    tracing::debug!("Sent notification via {}", channel.name());
                    delivered += 1;
                }
                Err(e) => {
                    tracing::warn!("Failed to send notification via {}: {}", channel.name(), e)
                }
            }
        }
        delivered
    }

    /// One detector sink per channel, so the detector isolates their failures.
    pub fn sinks(&self) -> Vec<Arc<dyn NotificationSink>> {
        self.channels
            .iter()
            .map(|channel| Arc::new(ChannelSink::new(channel.clone())) as Arc<dyn NotificationSink>)
            .collect()
    }
}

/// Presents a notification channel to the detector as an event sink.
pub struct ChannelSink {
    channel: Arc<dyn NotificationChannel>,
}

impl ChannelSink {
    pub fn new(channel: Arc<dyn NotificationChannel>) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl NotificationSink for ChannelSink {
    async fn deliver(&self, event: &CompositeEvent) -> anyhow::Result<()> {
        self.channel
            .send(&Notification::BlackSwan(event.clone()))
            .await?;
        Ok(())
    }

    fn name(&self) -> &str {
        self.channel.name()
    }
}
