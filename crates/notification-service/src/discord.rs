use async_trait::async_trait;
use black_swan_detector::EventPriority;
use serde_json::{json, Value};

use crate::{Notification, NotificationChannel, NotificationError};

/// Discord caps embeds at 25 fields; keep headroom for the summary fields.
const MAX_ALERT_FIELDS: usize = 20;

const COLOR_CRITICAL: u32 = 0xff0000;
const COLOR_HIGH: u32 = 0xff6600;
const COLOR_NORMAL: u32 = 0xffcc00;
const COLOR_INFO: u32 = 0x0099ff;

/// Discord webhook notifier.
pub struct DiscordWebhookNotifier {
    webhook_url: String,
    client: reqwest::Client,
}

impl DiscordWebhookNotifier {
    pub fn new(webhook_url: String) -> Result<Self, NotificationError> {
        if !(webhook_url.starts_with("https://") || webhook_url.starts_with("http://")) {
            return Err(NotificationError::Config(format!(
                "Discord webhook URL must be http(s), got '{}'",
                webhook_url
            )));
        }
        Ok(Self {
            webhook_url,
            client: reqwest::Client::new(),
        })
    }
}

fn color_for(notification: &Notification) -> u32 {
    match notification {
        Notification::Lifecycle { .. } => COLOR_INFO,
        Notification::BlackSwan(_) => match notification.priority() {
            EventPriority::Critical => COLOR_CRITICAL,
            EventPriority::High => COLOR_HIGH,
            EventPriority::Normal => COLOR_NORMAL,
        },
    }
}

pub(crate) fn build_payload(notification: &Notification) -> Value {
    let mut fields = Vec::new();

    if let Notification::BlackSwan(event) = notification {
        let affected: Vec<String> = event
            .affected_symbols()
            .iter()
            .map(|s| s.to_string())
            .collect();
        let affected = if affected.is_empty() {
            "basket".to_string()
        } else {
            affected.join(", ")
        };

        fields.push(json!({
            "name": "Severity",
            "value": format!("{:.2} ({})", event.severity, event.priority().label()),
            "inline": true,
        }));
        fields.push(json!({
            "name": "Affected assets",
            "value": affected,
            "inline": true,
        }));
        for alert in event.alerts.iter().take(MAX_ALERT_FIELDS) {
            fields.push(json!({
                "name": alert.kind().name(),
                "value": alert.summary(),
                "inline": false,
            }));
        }
    }

    json!({
        "username": "Black Swan Detector",
        "embeds": [{
            "title": notification.title(),
            "description": notification.message(),
            "color": color_for(notification),
            "timestamp": notification.timestamp().to_rfc3339(),
            "fields": fields,
        }]
    })
}

#[async_trait]
impl NotificationChannel for DiscordWebhookNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotificationError> {
        let payload = build_payload(notification);

        self.client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| NotificationError::Http(e.to_string()))?;

        Ok(())
    }

    fn name(&self) -> &str {
        "discord-webhook"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use black_swan_detector::{Alert, AlertDetails, CompositeEvent};
    use chrono::Utc;
    use market_core::Symbol;

    fn critical_event() -> CompositeEvent {
        CompositeEvent::from_alerts(
            vec![
                Alert {
                    symbol: Some(Symbol::new("ETH/USDT:USDT")),
                    timestamp: Utc::now(),
                    severity: 0.95,
                    details: AlertDetails::Volatility {
                        current_volatility: 0.9,
                        historical_volatility: 0.1,
                        volatility_ratio: 9.0,
                        threshold: 3.5,
                    },
                },
                Alert {
                    symbol: None,
                    timestamp: Utc::now(),
                    severity: 0.2,
                    details: AlertDetails::Correlation {
                        correlation_change: 0.32,
                        threshold: 0.15,
                    },
                },
            ],
            Utc::now(),
        )
    }

    #[test]
    fn test_rejects_non_http_url() {
        assert!(matches!(
            DiscordWebhookNotifier::new("discord.com/api/webhooks/1".to_string()),
            Err(NotificationError::Config(_))
        ));
        assert!(DiscordWebhookNotifier::new("https://discord.com/api/webhooks/1/x".to_string()).is_ok());
    }

    #[test]
    fn test_event_payload() {
        let payload = build_payload(&Notification::BlackSwan(critical_event()));
        let embed = &payload["embeds"][0];

        assert_eq!(embed["title"], "[CRITICAL] Black Swan Event detected");
        assert_eq!(embed["color"], COLOR_CRITICAL);
        let fields = embed["fields"].as_array().unwrap();
        assert_eq!(fields.len(), 4);
        assert_eq!(fields[0]["value"], "0.95 (CRITICAL)");
        assert_eq!(fields[1]["value"], "ETH/USDT:USDT");
        assert_eq!(fields[2]["name"], "volatility");
        assert_eq!(fields[3]["name"], "correlation");
    }

    #[test]
    fn test_lifecycle_payload() {
        let payload = build_payload(&Notification::lifecycle("Agent started", "watching 4 symbols"));
        let embed = &payload["embeds"][0];
        assert_eq!(embed["title"], "Agent started");
        assert_eq!(embed["description"], "watching 4 symbols");
        assert_eq!(embed["color"], COLOR_INFO);
        assert!(embed["fields"].as_array().unwrap().is_empty());
    }
}
