use async_trait::async_trait;

use crate::alert::CompositeEvent;

/// Receiver of dispatched composite events.
///
/// Sinks are invoked in registration order. An error from one sink is logged
/// by the detector and does not stop delivery to the next.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, event: &CompositeEvent) -> anyhow::Result<()>;
    fn name(&self) -> &str;
}

/// Adapts a plain synchronous callback into a sink.
pub struct CallbackSink<F> {
    name: String,
    callback: F,
}

impl<F> CallbackSink<F>
where
    F: Fn(&CompositeEvent) -> anyhow::Result<()> + Send + Sync,
{
    pub fn new(name: impl Into<String>, callback: F) -> Self {
        Self {
            name: name.into(),
            callback,
        }
    }
}

#[async_trait]
impl<F> NotificationSink for CallbackSink<F>
where
    F: Fn(&CompositeEvent) -> anyhow::Result<()> + Send + Sync,
{
    async fn deliver(&self, event: &CompositeEvent) -> anyhow::Result<()> {
        (self.callback)(event)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
