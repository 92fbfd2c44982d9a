//! In-process publication of viewer events.

use async_trait::async_trait;
use camwatch_types::{events::ViewerEvent, Result};
use futures::{stream::BoxStream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: ViewerEvent) -> Result<()>;
    fn subscribe(&self) -> BoxStream<'static, ViewerEvent>;
}

/// Simple in-process bus backed by a broadcast channel.
#[derive(Clone)]
pub struct LocalBus {
    tx: broadcast::Sender<ViewerEvent>,
}

impl LocalBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Publishes without awaiting; usable from synchronous hooks.
    pub fn emit(&self, event: ViewerEvent) {
        // No subscribers is not an error: the event is simply dropped.
        let _ = self.tx.send(event);
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EventPublisher for LocalBus {
    async fn publish(&self, event: ViewerEvent) -> Result<()> {
        debug!(
            "Publishing {:?} for {} to {} subscribers",
            event.kind,
            event.camera,
            self.subscriber_count()
        );
        self.emit(event);
        Ok(())
    }

    fn subscribe(&self) -> BoxStream<'static, ViewerEvent> {
        BroadcastStream::new(self.tx.subscribe())
            .filter_map(|event| async move {
                match event {
                    Ok(event) => Some(event),
                    Err(err) => {
                        warn!("Event subscriber lagged: {err}");
                        None
                    }
                }
            })
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camwatch_types::events::{EventKind, EventPayload};

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = LocalBus::new(8);
        let mut stream = bus.subscribe();
        bus.publish(ViewerEvent::new("cam-1", EventPayload::Refreshed))
            .await
            .expect("publish");

        let event = stream.next().await.expect("event delivered");
        assert_eq!(event.camera, "cam-1");
        assert_eq!(event.kind, EventKind::Playback);
    }

    #[tokio::test]
    async fn publishing_without_subscribers_is_fine() {
        let bus = LocalBus::default();
        assert_eq!(bus.subscriber_count(), 0);
        assert!(bus
            .publish(ViewerEvent::new(
                "cam-1",
                EventPayload::Unmounted {
                    metrics: Default::default(),
                },
            ))
            .await
            .is_ok());
    }
}
