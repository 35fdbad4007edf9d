use std::sync::Arc;

use thiserror::Error;
use tokio::sync::broadcast;
use tracing::trace;

/// Trait implemented by payload types that can be carried on the bus.
pub trait Event: Clone + Send + Sync + std::fmt::Debug + 'static {}

impl<T> Event for T where T: Clone + Send + Sync + std::fmt::Debug + 'static {}

#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum BusError {
    #[error("no active subscribers")]
    NoSubscribers,
}

pub trait EventBus<E>: Send + Sync
where
    E: Event,
{
    /// Publish to every current subscriber, returning how many received it.
    fn publish(&self, event: E) -> Result<usize, BusError>;
    fn subscribe(&self) -> broadcast::Receiver<E>;
}

/// Broadcast bus backed by a bounded tokio channel. Slow subscribers lag and
/// lose the oldest notices rather than blocking publishers.
pub struct InMemoryBus<E>
where
    E: Event,
{
    sender: broadcast::Sender<E>,
}

impl<E> InMemoryBus<E>
where
    E: Event,
{
    pub fn new(capacity: usize) -> Arc<Self> {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Arc::new(Self { sender })
    }

    /// Fire-and-forget publish for notices nobody may be listening to.
    pub fn notify(&self, event: E) {
        if let Err(err) = self.publish(event) {
            trace!(target: "event-bus", %err, "notice dropped");
        }
    }
}

impl<E> EventBus<E> for InMemoryBus<E>
where
    E: Event,
{
    fn publish(&self, event: E) -> Result<usize, BusError> {
        self.sender.send(event).map_err(|_| BusError::NoSubscribers)
    }

    fn subscribe(&self) -> broadcast::Receiver<E> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_every_subscriber() {
        let bus = InMemoryBus::<u32>::new(4);
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();
        assert_eq!(bus.publish(7), Ok(2));
        assert_eq!(first.recv().await.unwrap(), 7);
        assert_eq!(second.recv().await.unwrap(), 7);
    }

    #[tokio::test]
    async fn notify_without_subscribers_is_dropped() {
        let bus = InMemoryBus::<u32>::new(4);
        assert_eq!(bus.publish(1), Err(BusError::NoSubscribers));
        bus.notify(2);
        let mut late = bus.subscribe();
        bus.notify(3);
        assert_eq!(late.recv().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn lagging_subscriber_loses_oldest() {
        let bus = InMemoryBus::<u32>::new(2);
        let mut rx = bus.subscribe();
        for value in 0..4 {
            bus.notify(value);
        }
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(2))
        ));
        assert_eq!(rx.recv().await.unwrap(), 2);
    }
}
