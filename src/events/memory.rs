//! In-process inconsistency-event bus.
//!
//! A thin at-least-once channel over tokio mpsc: publish on one side, consume
//! on the other, redeliver by re-queueing. Redelivered events lose their
//! original ordering slot, which the engine tolerates (repair is idempotent
//! and order-insensitive).

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::BusError;
use crate::events::producer::{EventProducer, EventSource};
use crate::events::{Delivery, InconsistencyEvent};

/// Create a connected publisher/subscription pair.
pub fn bus() -> (BusPublisher, BusSubscription) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        BusPublisher { tx: tx.clone() },
        BusSubscription { tx, rx },
    )
}

#[derive(Debug, Clone)]
pub struct BusPublisher {
    tx: mpsc::UnboundedSender<Delivery>,
}

#[async_trait]
impl EventProducer for BusPublisher {
    async fn publish(&self, event: InconsistencyEvent) -> Result<(), BusError> {
        self.tx
            .send(Delivery { event, attempt: 1 })
            .map_err(|_| BusError::Closed)
    }
}

#[derive(Debug)]
pub struct BusSubscription {
    // kept so redelivery works after every publisher is dropped
    tx: mpsc::UnboundedSender<Delivery>,
    rx: mpsc::UnboundedReceiver<Delivery>,
}

#[async_trait]
impl EventSource for BusSubscription {
    async fn next(&mut self) -> Option<Delivery> {
        self.rx.recv().await
    }

    fn redeliver(&mut self, delivery: Delivery) -> Result<(), BusError> {
        self.tx
            .send(Delivery {
                event: delivery.event,
                attempt: delivery.attempt + 1,
            })
            .map_err(|_| BusError::Closed)
    }
}

impl BusSubscription {
    /// Drain without blocking; test helper for asserting emitted events.
    pub fn try_drain(&mut self) -> Vec<InconsistencyEvent> {
        let mut out = Vec::new();
        while let Ok(delivery) = self.rx.try_recv() {
            out.push(delivery.event);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Direction, InconsistencyKind};

    fn sample(id: i64) -> InconsistencyEvent {
        InconsistencyEvent {
            direction: Direction::Src,
            id,
            kind: InconsistencyKind::NotEqual,
        }
    }

    #[tokio::test]
    async fn publish_then_consume() {
        let (publisher, mut sub) = bus();
        publisher.publish(sample(1)).await.expect("publish");
        let delivery = sub.next().await.expect("delivery");
        assert_eq!(delivery.event.id, 1);
        assert_eq!(delivery.attempt, 1);
    }

    #[tokio::test]
    async fn redelivery_bumps_the_attempt_count() {
        let (publisher, mut sub) = bus();
        publisher.publish(sample(7)).await.expect("publish");
        let first = sub.next().await.expect("delivery");
        sub.redeliver(first).expect("redeliver");
        let second = sub.next().await.expect("redelivered");
        assert_eq!(second.event.id, 7);
        assert_eq!(second.attempt, 2);
    }
}
