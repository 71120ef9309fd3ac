use async_trait::async_trait;
use black_swan_detector::EventPriority;

use crate::{Notification, NotificationChannel, NotificationError};

/// Writes notifications to the process log. Critical and high priority
/// events are logged at warn level.
pub struct LogNotifier;

#[async_trait]
impl NotificationChannel for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotificationError> {
        match notification {
            Notification::BlackSwan(event) => {
                let details: Vec<String> = event.alerts.iter().map(|a| a.summary()).collect();
                match event.priority() {
                    EventPriority::Critical | EventPriority::High => tracing::warn!(
                        priority = event.priority().label(),
                        severity = event.severity,
                        "{}: {} [{}]",
                        notification.title(),
                        event.message,
                        details.join("; ")
                    ),
                    EventPriority::Normal => tracing::info!(
                        priority = event.priority().label(),
                        severity = event.severity,
                        "{}: {} [{}]",
                        notification.title(),
                        event.message,
                        details.join("; ")
                    ),
                }
            }
            Notification::Lifecycle { title, message, .. } => {
                tracing::info!("{}: {}", title, message)
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}
